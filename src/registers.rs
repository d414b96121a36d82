//! Static parameter catalogs.
//!
//! Each transport addresses the unit's parameters differently (Modbus holding registers, cloud
//! identifiers, Z-Wave value IDs) but the values all share the same representation on the
//! device: a 16 or 32 bit integer, optionally signed, optionally scaled by an integer divisor.
//! The descriptors here carry just enough information to convert between that raw integer and a
//! [`Value`], and to tell the rest of the driver what the parameter *means* (its [`Role`]) and how
//! often it should be read (its [`Group`]).

use num_traits::FromPrimitive as _;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Numeric,
    Boolean,
    /// Small integer codes (modes, alarm states). Never scaled, may arrive as strings.
    Enumeration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct DataType {
    scale: u16,
    signed: bool,
    words: u8,
    kind: Kind,
}

impl DataType {
    // Convenience aliases for the nicely tabulated `parameters!` tables.
    pub const U16: Self = Self { scale: 1, signed: false, words: 1, kind: Kind::Numeric };
    pub const I16: Self = Self { scale: 1, signed: true, words: 1, kind: Kind::Numeric };
    pub const CEL: Self = Self { scale: 10, signed: true, words: 1, kind: Kind::Numeric };
    /// Low word first.
    pub const U32: Self = Self { scale: 1, signed: false, words: 2, kind: Kind::Numeric };
    pub const BIT: Self = Self { scale: 1, signed: false, words: 1, kind: Kind::Boolean };
    pub const ENM: Self = Self { scale: 1, signed: false, words: 1, kind: Kind::Enumeration };

    pub const fn scale(&self) -> u16 {
        self.scale
    }

    pub const fn is_signed(&self) -> bool {
        self.signed
    }

    pub const fn words(&self) -> u8 {
        self.words
    }

    pub const fn kind(&self) -> Kind {
        self.kind
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.signed { "S" } else { "U" })?;
        f.write_fmt(format_args!("{}/{}", 16 * u16::from(self.words), self.scale))
    }
}

/// A decoded parameter value.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Number(f64),
    /// Whatever the unit sent when it could not be interpreted as a number.
    Raw(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(f64::from(u8::from(*b))),
            Value::Raw(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            Value::Raw(s) => match s.trim() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
        }
    }

    /// Integer code of an enumeration value.
    pub fn as_code(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            Value::Number(_) => None,
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::Raw(s) => s.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Boolean(b) => f.write_fmt(format_args!("{b}")),
            Value::Number(n) => f.write_fmt(format_args!("{n}")),
            Value::Raw(s) => f.write_str(s),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Access(u8);

impl Access {
    pub const R: Self = Self(1 << 0);
    pub const W: Self = Self(1 << 1);
    pub const RW: Self = Self(Self::R.0 | Self::W.0);
    const R_: Self = Self::R;
    const W_: Self = Self::W;

    pub const fn readable(&self) -> bool {
        self.0 & Self::R.0 != 0
    }

    pub const fn writable(&self) -> bool {
        self.0 & Self::W.0 != 0
    }
}

impl std::fmt::Debug for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.readable() { "R" } else { "-" })?;
        f.write_str(if self.writable() { "W" } else { "-" })?;
        Ok(())
    }
}

impl serde::Serialize for Access {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Address {
    /// 1-based Modbus holding register, as printed in the unit's documentation.
    Register(u16),
    /// Identifier used by the cloud WebSocket API.
    Cloud(&'static str),
    /// zwave-js value ID on the unit's node.
    ValueId {
        command_class: u8,
        endpoint: u8,
        property: &'static str,
        property_key: Option<&'static str>,
    },
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Register(r) => f.write_fmt(format_args!("{r}")),
            Address::Cloud(id) => f.write_str(id),
            Address::ValueId { command_class, endpoint, property, property_key: None } => {
                f.write_fmt(format_args!("{command_class}/{endpoint}/{property}"))
            }
            Address::ValueId { command_class, endpoint, property, property_key: Some(key) } => {
                f.write_fmt(format_args!("{command_class}/{endpoint}/{property}/{key}"))
            }
        }
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// What a parameter means to the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum Role {
    TargetTemperature,
    /// Sensor readings. Subject to report-interval smoothing.
    Measurement,
    /// The mode the unit is currently in.
    UserMode,
    /// Write-side register for changing the user mode.
    ModeRequest,
    /// The manually selected airflow level.
    FanMode,
    /// Write-side parameter for the airflow level, if it differs from [`Role::FanMode`].
    FanModeRequest,
    EcoMode,
    BoostSwitch,
    /// Seconds until the filter should be replaced.
    FilterTimeLeft,
    Alarm,
    Function,
    ModeDuration(TemporaryMode),
    ModeAirflow(UserMode),
    Setting,
}

/// Parameters are polled in groups with differing cadence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[derive(strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Group {
    Operation,
    Sensor,
    Function,
    Alarm,
    Config,
    /// Write-only parameters.
    Unpolled,
}

#[derive(Clone, Copy, Debug)]
pub enum Cadence {
    PollingInterval,
    ReportInterval,
    Every(Duration),
}

#[derive(Clone, Copy, Debug)]
pub struct GroupSchedule {
    pub group: Group,
    pub cadence: Cadence,
    /// Delay of the first read after start-up, staggering the groups.
    pub offset: Duration,
}

pub const DEFAULT_SCHEDULE: &[GroupSchedule] = &[
    GroupSchedule { group: Group::Operation, cadence: Cadence::PollingInterval, offset: Duration::from_secs(1) },
    GroupSchedule { group: Group::Sensor, cadence: Cadence::ReportInterval, offset: Duration::from_secs(2) },
    GroupSchedule { group: Group::Function, cadence: Cadence::Every(Duration::from_secs(30)), offset: Duration::from_secs(4) },
    GroupSchedule { group: Group::Alarm, cadence: Cadence::Every(Duration::from_secs(300)), offset: Duration::from_secs(6) },
    GroupSchedule { group: Group::Config, cadence: Cadence::Every(Duration::from_secs(600)), offset: Duration::from_secs(9) },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[derive(num_derive::FromPrimitive, num_derive::ToPrimitive)]
#[derive(strum::Display, strum::IntoStaticStr, strum::VariantArray, clap::ValueEnum)]
pub enum UserMode {
    Auto = 0,
    Manual = 1,
    Crowded = 2,
    Refresh = 3,
    Fireplace = 4,
    Away = 5,
    Holiday = 6,
    #[strum(serialize = "Cooker Hood")]
    CookerHood = 7,
    #[strum(serialize = "Vacuum Cleaner")]
    VacuumCleaner = 8,
    #[strum(serialize = "CDI 1")]
    ConfigurableDigitalInput1 = 9,
    #[strum(serialize = "CDI 2")]
    ConfigurableDigitalInput2 = 10,
    #[strum(serialize = "CDI 3")]
    ConfigurableDigitalInput3 = 11,
    #[strum(serialize = "Pressure Guard")]
    PressureGuard = 12,
}

impl UserMode {
    pub fn from_code(code: i64) -> Option<Self> {
        Self::from_i64(code)
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

fn user_mode_label(code: i64) -> Option<&'static str> {
    UserMode::from_code(code).map(<&'static str>::from)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[derive(num_derive::FromPrimitive, num_derive::ToPrimitive)]
#[derive(strum::Display, clap::ValueEnum)]
pub enum FanMode {
    Off = 1,
    Low = 2,
    Normal = 3,
    High = 4,
}

impl FanMode {
    pub fn from_code(code: i64) -> Option<Self> {
        Self::from_i64(code)
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

fn fan_mode_label(code: i64) -> Option<&'static str> {
    Some(match FanMode::from_code(code)? {
        FanMode::Off => "Off",
        FanMode::Low => "Low",
        FanMode::Normal => "Normal",
        FanMode::High => "High",
    })
}

/// Alarm registers hold two bits: firing, and pending a change towards the other state.
fn alarm_state_label(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "inactive",
        1 => "active",
        2 => "waiting",
        3 => "acknowledged",
        _ => return None,
    })
}

pub fn alarm_is_active(label: &str) -> bool {
    label != "inactive" && label != "waiting"
}

/// A self-reverting user mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[derive(strum::Display, clap::ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum TemporaryMode {
    Boost,
    Away,
    Crowded,
    Fireplace,
    Holiday,
    Refresh,
}

impl TemporaryMode {
    pub fn user_mode(self) -> UserMode {
        match self {
            TemporaryMode::Boost => UserMode::Manual,
            TemporaryMode::Away => UserMode::Away,
            TemporaryMode::Crowded => UserMode::Crowded,
            TemporaryMode::Fireplace => UserMode::Fireplace,
            TemporaryMode::Holiday => UserMode::Holiday,
            TemporaryMode::Refresh => UserMode::Refresh,
        }
    }

    /// Length of one duration unit for this mode.
    pub fn unit(self) -> Duration {
        const MINUTE: Duration = Duration::from_secs(60);
        match self {
            TemporaryMode::Boost | TemporaryMode::Fireplace | TemporaryMode::Refresh => MINUTE,
            TemporaryMode::Away | TemporaryMode::Crowded => 60 * MINUTE,
            TemporaryMode::Holiday => 24 * 60 * MINUTE,
        }
    }

    pub fn duration(self, units: u32) -> Duration {
        self.unit() * units
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum EncodeError {
    #[error("`{0}` expects a {1:?} value")]
    KindMismatch(&'static str, Kind),
    #[error("`{1}` is not a valid value for `{0}`")]
    NotANumber(&'static str, String),
}

#[derive(Debug, serde::Serialize)]
pub struct ParameterDescriptor {
    pub id: &'static str,
    pub address: Address,
    pub data_type: DataType,
    pub access: Access,
    pub role: Role,
    pub group: Group,
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
    pub description: &'static str,
}

impl ParameterDescriptor {
    /// Interpret the raw integer stored in the unit.
    pub fn decode_raw(&self, raw: i64) -> Value {
        let dt = self.data_type;
        match dt.kind {
            Kind::Boolean => Value::Boolean(raw != 0),
            Kind::Enumeration => Value::Number(raw as f64),
            Kind::Numeric => {
                let raw = if dt.signed && dt.words == 1 && raw >= 1 << 15 {
                    raw - (1 << 16)
                } else {
                    raw
                };
                Value::Number(raw as f64 / f64::from(dt.scale))
            }
        }
    }

    /// Interpret consecutive registers starting at the parameter's address.
    pub fn decode_words(&self, words: &[u16]) -> Option<Value> {
        let words = words.get(..usize::from(self.data_type.words))?;
        let raw = words.iter().rev().fold(0i64, |acc, w| (acc << 16) | i64::from(*w));
        Some(self.decode_raw(raw))
    }

    /// Interpret a value reported over one of the JSON based transports.
    ///
    /// Numbers are raw (scaled) integers; textual values that are not numeric pass through as
    /// [`Value::Raw`] for enumerations and are rejected otherwise.
    pub fn decode_json(&self, value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::Bool(b) => match self.data_type.kind {
                Kind::Boolean => Some(Value::Boolean(*b)),
                _ => Some(self.decode_raw(i64::from(*b))),
            },
            serde_json::Value::Number(n) => {
                if let Some(raw) = n.as_i64() {
                    Some(self.decode_raw(raw))
                } else {
                    Some(self.decode_raw(n.as_f64()?.round() as i64))
                }
            }
            serde_json::Value::String(s) => {
                let s = s.trim();
                if let Ok(raw) = s.parse::<i64>() {
                    return Some(self.decode_raw(raw));
                }
                match (self.data_type.kind, s) {
                    (Kind::Boolean, "true") => Some(Value::Boolean(true)),
                    (Kind::Boolean, "false") => Some(Value::Boolean(false)),
                    (Kind::Enumeration, _) => Some(Value::Raw(s.to_string())),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Convert to the raw integer, scaling and clamping into the declared range.
    pub fn encode(&self, value: &Value) -> Result<i64, EncodeError> {
        let raw = match (self.data_type.kind, value) {
            (Kind::Boolean, v) => {
                let b = v.as_bool().ok_or(EncodeError::KindMismatch(self.id, Kind::Boolean))?;
                return Ok(i64::from(b));
            }
            (Kind::Numeric | Kind::Enumeration, Value::Boolean(_)) => {
                return Err(EncodeError::KindMismatch(self.id, self.data_type.kind));
            }
            (Kind::Numeric, v) => {
                let x = v.as_f64().ok_or_else(|| EncodeError::NotANumber(self.id, v.to_string()))?;
                (x * f64::from(self.data_type.scale)).round() as i64
            }
            (Kind::Enumeration, v) => {
                v.as_code().ok_or_else(|| EncodeError::NotANumber(self.id, v.to_string()))?
            }
        };
        Ok(self.clamp_raw(raw))
    }

    pub fn clamp_raw(&self, raw: i64) -> i64 {
        let raw = self.minimum.map_or(raw, |min| raw.max(min));
        self.maximum.map_or(raw, |max| raw.min(max))
    }

    /// The value the unit ends up holding once `value` is written.
    pub fn clamp(&self, value: &Value) -> Result<Value, EncodeError> {
        Ok(self.decode_raw(self.encode(value)?))
    }

    /// The 16-bit register representation of an encoded value.
    pub fn to_register(&self, raw: i64) -> u16 {
        if self.data_type.signed {
            raw.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16 as u16
        } else {
            raw.clamp(0, i64::from(u16::MAX)) as u16
        }
    }

    /// The engineering-unit number of an encoded value.
    pub fn to_engineering(&self, raw: i64) -> f64 {
        raw as f64 / f64::from(self.data_type.scale)
    }

    pub fn is_match(&self, pattern: &str) -> bool {
        let pattern = pattern.to_uppercase();
        self.id.to_uppercase().contains(&pattern)
            || self.description.to_uppercase().contains(&pattern)
            || self.address.to_string().contains(&pattern)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Boost {
    /// Manual mode with the highest airflow.
    ModeAndFan,
    /// The unit exposes boost as an on/off switch of its own.
    Switch,
}

pub struct Catalog {
    pub name: &'static str,
    pub parameters: &'static [ParameterDescriptor],
    pub schedule: &'static [GroupSchedule],
    /// Added to a mode code before writing it to the [`Role::ModeRequest`] parameter.
    pub mode_request_offset: i64,
    pub requestable_modes: &'static [i64],
    pub mode_label: fn(i64) -> Option<&'static str>,
    pub fan_mode_label: fn(i64) -> Option<&'static str>,
    pub alarm_label: fn(i64) -> Option<&'static str>,
    pub boost: Boost,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Catalog {
    pub fn get(&self, id: &str) -> Option<&'static ParameterDescriptor> {
        self.parameters.iter().find(|p| p.id == id)
    }

    pub fn by_role(&self, role: Role) -> Option<&'static ParameterDescriptor> {
        self.parameters.iter().find(|p| p.role == role)
    }

    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &'static ParameterDescriptor> {
        self.parameters.iter().filter(move |p| p.role == role)
    }

    pub fn group(&self, group: Group) -> Vec<&'static ParameterDescriptor> {
        self.parameters.iter().filter(|p| p.group == group && p.access.readable()).collect()
    }

    /// Where mode changes are written.
    pub fn mode_request(&self) -> Option<&'static ParameterDescriptor> {
        self.by_role(Role::ModeRequest)
            .or_else(|| self.by_role(Role::UserMode).filter(|p| p.access.writable()))
    }

    /// Where airflow level changes are written.
    pub fn fan_mode_request(&self) -> Option<&'static ParameterDescriptor> {
        self.by_role(Role::FanModeRequest)
            .or_else(|| self.by_role(Role::FanMode).filter(|p| p.access.writable()))
    }

    pub fn mode_name(&self, code: i64) -> String {
        (self.mode_label)(code).map_or_else(|| code.to_string(), str::to_string)
    }

    pub fn fan_mode_name(&self, code: i64) -> String {
        (self.fan_mode_label)(code).map_or_else(|| code.to_string(), str::to_string)
    }

    /// Normalized alarm state label, passing unknown textual states through.
    pub fn alarm_state(&self, value: &Value) -> String {
        match value {
            Value::Boolean(true) => "active".to_string(),
            Value::Boolean(false) => "inactive".to_string(),
            Value::Raw(s) => s.clone(),
            Value::Number(_) => match value.as_code() {
                Some(code) => (self.alarm_label)(code).map_or_else(|| code.to_string(), str::to_string),
                None => value.to_string(),
            },
        }
    }
}

macro_rules! parameters {
    (@bound) => { None };
    (@bound $v: literal) => { Some($v) };
    ($($address: expr => $ty: ident, $access: ident, $id: literal, $role: ident $(($arg: expr))?,
        $group: ident $(, min = $min: literal, max = $max: literal)?, $description: literal;)*) => {
        &[$($crate::registers::ParameterDescriptor {
            id: $id,
            address: $address,
            data_type: $crate::registers::DataType::$ty,
            access: $crate::registers::Access::$access,
            role: $crate::registers::Role::$role $(($arg))?,
            group: $crate::registers::Group::$group,
            minimum: parameters!(@bound $($min)?),
            maximum: parameters!(@bound $($max)?),
            description: $description,
        },)*]
    };
}

mod cloud;
mod zwave;

pub use cloud::CLOUD;
pub use zwave::ZWAVE;

use Address::Register as R;

/// Modbus register map, shared by the Modbus-TCP and Save Connect HTTP transports.
pub static MODBUS: Catalog = Catalog {
    name: "modbus",
    parameters: parameters! {
        R(2001) => CEL, RW, "REG_TC_SP", TargetTemperature, Operation, min = 120, max = 300,
            "Temperature setpoint for the supply air temperature";
        R(1131) => ENM, RW, "REG_USERMODE_MANUAL_AIRFLOW_LEVEL_SAF", FanMode, Operation, min = 0, max = 4,
            "Fan speed level for mode Manual, applies to both fans";
        R(1161) => ENM, R_, "REG_USERMODE_MODE", UserMode, Operation, min = 0, max = 12,
            "Active user mode";
        R(1162) => ENM, W_, "REG_USERMODE_HMI_CHANGE_REQUEST", ModeRequest, Unpolled, min = 0, max = 7,
            "New desired user mode as requested by HMI, the active mode plus one";
        R(2505) => BIT, RW, "REG_ECO_MODE_ON_OFF", EcoMode, Operation,
            "Enabling of eco mode";
        R(12401) => U16, R_, "REG_SENSOR_RPM_SAF", Measurement, Operation, min = 0, max = 5000,
            "Supply air fan RPM indication from TACHO";
        R(12402) => U16, R_, "REG_SENSOR_RPM_EAF", Measurement, Operation, min = 0, max = 5000,
            "Extract air fan RPM indication from TACHO";
        R(14001) => U16, R_, "REG_OUTPUT_SAF", Measurement, Operation, min = 0, max = 100,
            "SAF fan speed";
        R(14002) => U16, R_, "REG_OUTPUT_EAF", Measurement, Operation, min = 0, max = 100,
            "EAF fan speed";
        R(12102) => CEL, R_, "REG_SENSOR_OAT", Measurement, Sensor, min = -400, max = 800,
            "Outdoor Air Temperature sensor (standard)";
        R(12103) => CEL, R_, "REG_SENSOR_SAT", Measurement, Sensor, min = -400, max = 800,
            "Supply Air Temperature sensor (standard)";
        R(12105) => CEL, R_, "REG_SENSOR_EAT", Measurement, Sensor, min = -400, max = 800,
            "Extract Air Temperature sensor (accessory)";
        R(12108) => CEL, R_, "REG_SENSOR_OHT", Measurement, Sensor, min = -400, max = 800,
            "Overheat Temperature sensor (Electrical Heater)";
        R(12109) => U16, R_, "REG_SENSOR_RHS", Measurement, Sensor, min = 0, max = 100,
            "Relative Humidity Sensor (Accessory)";
        R(12136) => U16, R_, "REG_SENSOR_RHS_PDM", Measurement, Sensor, min = 0, max = 100,
            "PDM RHS sensor value (standard)";
        R(12544) => CEL, R_, "REG_SENSOR_PDM_EAT_VALUE", Measurement, Sensor, min = -400, max = 800,
            "PDM EAT sensor value (standard)";
        R(3114) => BIT, R_, "REG_FUNCTION_ACTIVE_PRESSURE_GUARD", Function, Function,
            "Pressure guard";
        R(3115) => BIT, R_, "REG_FUNCTION_ACTIVE_CDI_1", Function, Function,
            "Configurable digital input 1";
        R(3116) => BIT, R_, "REG_FUNCTION_ACTIVE_CDI_2", Function, Function,
            "Configurable digital input 2";
        R(3117) => BIT, R_, "REG_FUNCTION_ACTIVE_CDI_3", Function, Function,
            "Configurable digital input 3";
        R(15086) => ENM, R_, "REG_ALARM_EAT_ALARM", Alarm, Alarm, min = 0, max = 3,
            "Extract air temperature";
        R(15142) => ENM, R_, "REG_ALARM_FILTER_ALARM", Alarm, Alarm, min = 0, max = 3,
            "Filter";
        R(15544) => ENM, R_, "REG_ALARM_FILTER_WARNING_ALARM", Alarm, Alarm, min = 0, max = 3,
            "Filter warning";
        R(15901) => BIT, R_, "REG_ALARM_TYPE_A", Alarm, Alarm,
            "Indicates if an alarm Type A is active";
        R(15902) => BIT, R_, "REG_ALARM_TYPE_B", Alarm, Alarm,
            "Indicates if an alarm Type B is active";
        R(15903) => BIT, R_, "REG_ALARM_TYPE_C", Alarm, Alarm,
            "Indicates if an alarm Type C is active";
        R(7005) => U32, R_, "REG_FILTER_REMAINING_TIME", FilterTimeLeft, Config,
            "Remaining filter time in seconds (registers 7005 and 7006)";
        R(1101) => U16, RW, "REG_USERMODE_HOLIDAY_TIME", ModeDuration(TemporaryMode::Holiday), Config, min = 1, max = 365,
            "Time delay setting for user mode Holiday (days)";
        R(1102) => U16, RW, "REG_USERMODE_AWAY_TIME", ModeDuration(TemporaryMode::Away), Config, min = 1, max = 72,
            "Time delay setting for user mode Away (hours)";
        R(1103) => U16, RW, "REG_USERMODE_FIREPLACE_TIME", ModeDuration(TemporaryMode::Fireplace), Config, min = 1, max = 60,
            "Time delay setting for user mode Fire Place (minutes)";
        R(1104) => U16, RW, "REG_USERMODE_REFRESH_TIME", ModeDuration(TemporaryMode::Refresh), Config, min = 1, max = 240,
            "Time delay setting for user mode Refresh (minutes)";
        R(1105) => U16, RW, "REG_USERMODE_CROWDED_TIME", ModeDuration(TemporaryMode::Crowded), Config, min = 1, max = 8,
            "Time delay setting for user mode Crowded (hours)";
        R(1135) => ENM, RW, "REG_USERMODE_CROWDED_AIRFLOW_LEVEL_SAF", ModeAirflow(UserMode::Crowded), Config, min = 3, max = 5,
            "Fan speed level for mode Crowded";
        R(1137) => ENM, RW, "REG_USERMODE_REFRESH_AIRFLOW_LEVEL_SAF", ModeAirflow(UserMode::Refresh), Config, min = 3, max = 5,
            "Fan speed level for mode Refresh";
        R(1139) => ENM, RW, "REG_USERMODE_FIREPLACE_AIRFLOW_LEVEL_SAF", ModeAirflow(UserMode::Fireplace), Config, min = 3, max = 5,
            "Fan speed level for mode Fireplace";
        R(1141) => ENM, RW, "REG_USERMODE_AWAY_AIRFLOW_LEVEL_SAF", ModeAirflow(UserMode::Away), Config, min = 0, max = 3,
            "Fan speed level for mode Away";
        R(1143) => ENM, RW, "REG_USERMODE_HOLIDAY_AIRFLOW_LEVEL_SAF", ModeAirflow(UserMode::Holiday), Config, min = 0, max = 3,
            "Fan speed level for mode Holiday";
        R(1145) => ENM, RW, "REG_USERMODE_COOKERHOOD_AIRFLOW_LEVEL_SAF", ModeAirflow(UserMode::CookerHood), Config, min = 1, max = 5,
            "Fan speed level for mode Cooker Hood";
        R(1147) => ENM, RW, "REG_USERMODE_VACUUMCLEANER_AIRFLOW_LEVEL_SAF", ModeAirflow(UserMode::VacuumCleaner), Config, min = 1, max = 5,
            "Fan speed level for mode Vacuum Cleaner";
        R(1177) => ENM, RW, "REG_PRESSURE_GUARD_AIRFLOW_LEVEL_SAF", ModeAirflow(UserMode::PressureGuard), Config, min = 0, max = 5,
            "Fan speed level for configurable pressure guard function";
    },
    schedule: DEFAULT_SCHEDULE,
    mode_request_offset: 1,
    requestable_modes: &[0, 1, 2, 3, 4, 5, 6],
    mode_label: user_mode_label,
    fan_mode_label,
    alarm_label: alarm_state_label,
    boost: Boost::ModeAndFan,
};
