//! Value IDs of the unit's Z-Wave node.
//!
//! zwave-js reports values in engineering units. The catalog still describes the raw register
//! domain; the Z-Wave transport scales at the boundary.

use super::{Address, Boost, Catalog, GroupSchedule, Cadence, Group};
use std::time::Duration;

const fn value_id(
    command_class: u8,
    property: &'static str,
    property_key: Option<&'static str>,
) -> Address {
    Address::ValueId { command_class, endpoint: 0, property, property_key }
}

const THERMOSTAT_SETPOINT: u8 = 0x43;
const SWITCH_BINARY: u8 = 0x25;
const THERMOSTAT_MODE: u8 = 0x40;
const THERMOSTAT_FAN_MODE: u8 = 0x44;
const NOTIFICATION: u8 = 0x71;

fn thermostat_mode_label(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "Off",
        1 => "Heat",
        2 => "Cool",
        3 => "Auto",
        5 => "Resume",
        6 => "Fan",
        11 => "Energy heat",
        31 => "Manufacturer specific",
        _ => return None,
    })
}

fn thermostat_fan_mode_label(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "Auto low",
        1 => "Low",
        2 => "Auto high",
        3 => "High",
        4 => "Auto medium",
        5 => "Medium",
        6 => "Circulation",
        _ => return None,
    })
}

fn notification_label(code: i64) -> Option<&'static str> {
    (code == 0).then_some("inactive")
}

pub static ZWAVE: Catalog = Catalog {
    name: "zwave",
    parameters: parameters! {
        value_id(THERMOSTAT_SETPOINT, "setpoint", Some("1")) => CEL, RW, "target_temperature",
            TargetTemperature, Operation, min = 120, max = 300,
            "Heating setpoint";
        value_id(SWITCH_BINARY, "currentValue", None) => BIT, RW, "boost",
            BoostSwitch, Operation,
            "Boost switch";
        value_id(THERMOSTAT_MODE, "mode", None) => ENM, RW, "mode",
            UserMode, Operation,
            "Thermostat mode";
        value_id(THERMOSTAT_FAN_MODE, "mode", None) => ENM, RW, "fan_mode",
            FanMode, Operation,
            "Thermostat fan mode";
        value_id(NOTIFICATION, "Water Alarm", Some("Sensor status")) => ENM, R_, "water_alarm",
            Alarm, Alarm,
            "Water alarm";
    },
    schedule: &[
        GroupSchedule { group: Group::Operation, cadence: Cadence::PollingInterval, offset: Duration::from_secs(1) },
        GroupSchedule { group: Group::Alarm, cadence: Cadence::Every(Duration::from_secs(300)), offset: Duration::from_secs(5) },
    ],
    mode_request_offset: 0,
    requestable_modes: &[0, 1, 2, 3, 6, 11],
    mode_label: thermostat_mode_label,
    fan_mode_label: thermostat_fan_mode_label,
    alarm_label: notification_label,
    boost: Boost::Switch,
};
