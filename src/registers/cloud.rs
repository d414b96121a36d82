//! Parameter identifiers of the IAM cloud WebSocket API.
//!
//! The cloud reports raw register integers (temperatures are still multiplied by 10) but keys
//! them by name instead of by address. Mode and airflow codes come back as strings.

use super::{
    Address, Boost, Catalog, DEFAULT_SCHEDULE, TemporaryMode, UserMode, alarm_state_label,
    fan_mode_label, user_mode_label,
};

use Address::Cloud as C;

pub static CLOUD: Catalog = Catalog {
    name: "cloud",
    parameters: parameters! {
        C("main_temperature_offset") => CEL, RW, "main_temperature_offset", TargetTemperature, Operation, min = 120, max = 300,
            "Temperature setpoint for the supply air temperature";
        C("main_user_mode") => ENM, R_, "main_user_mode", UserMode, Operation,
            "Active user mode";
        C("mode_change_request") => ENM, W_, "mode_change_request", ModeRequest, Unpolled, min = 0, max = 6,
            "New desired user mode";
        C("speed_indication_app") => ENM, R_, "speed_indication_app", FanMode, Operation,
            "Airflow level as shown in the app";
        C("main_airflow") => ENM, W_, "main_airflow", FanModeRequest, Unpolled, min = 1, max = 4,
            "Requested airflow level for mode Manual";
        C("eco_mode") => BIT, RW, "eco_mode", EcoMode, Operation,
            "Enabling of eco mode";
        C("control_regulation_speed_after_free_cooling_saf") => U16, R_,
            "control_regulation_speed_after_free_cooling_saf", Measurement, Operation, min = 0, max = 100,
            "SAF fan speed";
        C("control_regulation_speed_after_free_cooling_eaf") => U16, R_,
            "control_regulation_speed_after_free_cooling_eaf", Measurement, Operation, min = 0, max = 100,
            "EAF fan speed";
        C("digital_input_tacho_saf_value") => U16, R_, "digital_input_tacho_saf_value", Measurement, Operation,
            "Supply air fan RPM indication from TACHO";
        C("digital_input_tacho_eaf_value") => U16, R_, "digital_input_tacho_eaf_value", Measurement, Operation,
            "Extract air fan RPM indication from TACHO";
        C("supply_air_temp") => CEL, R_, "supply_air_temp", Measurement, Sensor,
            "Supply Air Temperature sensor";
        C("outdoor_air_temp") => CEL, R_, "outdoor_air_temp", Measurement, Sensor,
            "Outdoor Air Temperature sensor";
        C("pdm_input_temp_value") => CEL, R_, "pdm_input_temp_value", Measurement, Sensor,
            "PDM extract air temperature";
        C("overheat_temp") => CEL, R_, "overheat_temp", Measurement, Sensor,
            "Overheat Temperature sensor (Electrical Heater)";
        C("pdm_input_rh_value") => U16, R_, "pdm_input_rh_value", Measurement, Sensor, min = 0, max = 100,
            "PDM relative humidity";
        C("function_active_pressure_guard") => BIT, R_, "function_active_pressure_guard", Function, Function,
            "Pressure guard";
        C("function_active_cdi_1") => BIT, R_, "function_active_cdi_1", Function, Function,
            "Configurable digital input 1";
        C("function_active_cdi_2") => BIT, R_, "function_active_cdi_2", Function, Function,
            "Configurable digital input 2";
        C("function_active_cdi_3") => BIT, R_, "function_active_cdi_3", Function, Function,
            "Configurable digital input 3";
        C("alarm_eat_state") => ENM, R_, "alarm_eat_state", Alarm, Alarm,
            "Extract air temperature";
        C("alarm_filter_state") => ENM, R_, "alarm_filter_state", Alarm, Alarm,
            "Filter";
        C("alarm_filter_warning_state") => ENM, R_, "alarm_filter_warning_state", Alarm, Alarm,
            "Filter warning";
        C("alarm_type_a") => ENM, R_, "alarm_type_a", Alarm, Alarm,
            "Alarm of type A";
        C("alarm_type_b") => ENM, R_, "alarm_type_b", Alarm, Alarm,
            "Alarm of type B";
        C("alarm_type_c") => ENM, R_, "alarm_type_c", Alarm, Alarm,
            "Alarm of type C";
        C("components_filter_time_left") => U32, R_, "components_filter_time_left", FilterTimeLeft, Config,
            "Remaining filter time in seconds";
        C("user_mode_holiday_duration") => U16, RW, "user_mode_holiday_duration",
            ModeDuration(TemporaryMode::Holiday), Config, min = 1, max = 365,
            "Duration of user mode Holiday (days)";
        C("user_mode_away_duration") => U16, RW, "user_mode_away_duration",
            ModeDuration(TemporaryMode::Away), Config, min = 1, max = 72,
            "Duration of user mode Away (hours)";
        C("user_mode_fireplace_duration") => U16, RW, "user_mode_fireplace_duration",
            ModeDuration(TemporaryMode::Fireplace), Config, min = 1, max = 60,
            "Duration of user mode Fireplace (minutes)";
        C("user_mode_refresh_duration") => U16, RW, "user_mode_refresh_duration",
            ModeDuration(TemporaryMode::Refresh), Config, min = 1, max = 240,
            "Duration of user mode Refresh (minutes)";
        C("user_mode_crowded_duration") => U16, RW, "user_mode_crowded_duration",
            ModeDuration(TemporaryMode::Crowded), Config, min = 1, max = 8,
            "Duration of user mode Crowded (hours)";
        C("user_mode_crowded_airflow") => ENM, R_, "user_mode_crowded_airflow",
            ModeAirflow(UserMode::Crowded), Config,
            "Fan speed level for mode Crowded";
        C("user_mode_refresh_airflow") => ENM, R_, "user_mode_refresh_airflow",
            ModeAirflow(UserMode::Refresh), Config,
            "Fan speed level for mode Refresh";
        C("user_mode_fireplace_airflow") => ENM, R_, "user_mode_fireplace_airflow",
            ModeAirflow(UserMode::Fireplace), Config,
            "Fan speed level for mode Fireplace";
        C("user_mode_away_airflow") => ENM, R_, "user_mode_away_airflow",
            ModeAirflow(UserMode::Away), Config,
            "Fan speed level for mode Away";
        C("user_mode_holiday_airflow") => ENM, R_, "user_mode_holiday_airflow",
            ModeAirflow(UserMode::Holiday), Config,
            "Fan speed level for mode Holiday";
    },
    schedule: DEFAULT_SCHEDULE,
    mode_request_offset: 0,
    requestable_modes: &[0, 1, 2, 3, 4, 5, 6],
    mode_label: user_mode_label,
    fan_mode_label,
    alarm_label: alarm_state_label,
    boost: Boost::ModeAndFan,
};
