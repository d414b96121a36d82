//! Folding read results into the device state.
//!
//! The reconciler holds the last committed value of every parameter and decides, for each newly
//! decoded value, whether to commit it and which [`ChangeEvent`]s that commit produces. Nothing
//! is ever announced for the first value seen of a parameter: there is nothing it changed from.

use crate::connection::{Origin, ReadResult};
use crate::events::{ChangeEvent, Scope};
use crate::registers::{Catalog, ParameterDescriptor, Role, Value, alarm_is_active};
use crate::settings::Settings;
use crate::store::ScopedStore;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

const ALARMS_KEY: &str = "alarms";
const FUNCTIONS_KEY: &str = "functions";
const SECONDS_PER_DAY: f64 = 86400.0;

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct DeviceSnapshot {
    pub values: BTreeMap<&'static str, Value>,
    /// Alarm id to state label.
    pub alarms: BTreeMap<String, String>,
    pub functions: BTreeMap<String, bool>,
    pub mode: Option<i64>,
    /// The manually selected airflow level.
    pub fan_mode: Option<i64>,
    /// What the airflow level was before the most recent local change of it.
    pub previous_fan_mode: Option<i64>,
    pub eco_mode: Option<bool>,
    pub target_temperature: Option<f64>,
    pub filter_days_left: Option<u64>,
    /// Mode code to the airflow level configured for it.
    pub mode_airflow: BTreeMap<i64, i64>,
}

impl DeviceSnapshot {
    /// The airflow level the unit is running at: the level configured for the current mode
    /// where the mode has one, the manual level otherwise.
    pub fn displayed_fan_mode(&self) -> Option<i64> {
        self.mode.and_then(|m| self.mode_airflow.get(&m).copied()).or(self.fan_mode)
    }
}

pub struct Reconciler {
    catalog: &'static Catalog,
    snapshot: DeviceSnapshot,
    suppressed_until: HashMap<&'static str, Instant>,
    committed_at: HashMap<&'static str, Instant>,
    report_interval: Duration,
    suppression_window: Duration,
    store: Option<ScopedStore>,
}

impl Reconciler {
    pub fn new(catalog: &'static Catalog, settings: &Settings, store: Option<ScopedStore>) -> Self {
        let mut snapshot = DeviceSnapshot::default();
        if let Some(store) = &store {
            match store.load::<BTreeMap<String, String>>(ALARMS_KEY) {
                Ok(alarms) => snapshot.alarms = alarms.unwrap_or_default(),
                Err(e) => warn!(message = "could not load alarms", error = (&e as &dyn std::error::Error)),
            }
            match store.load::<BTreeMap<String, bool>>(FUNCTIONS_KEY) {
                Ok(functions) => snapshot.functions = functions.unwrap_or_default(),
                Err(e) => warn!(message = "could not load functions", error = (&e as &dyn std::error::Error)),
            }
        }
        Self {
            catalog,
            snapshot,
            suppressed_until: HashMap::new(),
            committed_at: HashMap::new(),
            report_interval: *settings.report_interval,
            suppression_window: *settings.suppression_window,
            store,
        }
    }

    pub fn update_settings(&mut self, settings: &Settings) {
        self.report_interval = *settings.report_interval;
        self.suppression_window = *settings.suppression_window;
    }

    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    pub fn apply(&mut self, result: &ReadResult, now: Instant) -> Vec<ChangeEvent> {
        if let Origin::Push { asked_by_client: true } = result.origin {
            trace!(message = "ignoring the echo of our own write", count = result.values.len());
            return Vec::new();
        }
        let before = self.derived();
        let mut changes = Changes::default();
        for (id, value) in &result.values {
            let Some(parameter) = self.catalog.get(id) else {
                debug!(message = "value for an unknown parameter", id);
                continue;
            };
            if self.suppressed_until.get(parameter.id).is_some_and(|until| now < *until) {
                trace!(message = "suppressed after a local write", id, %value);
                continue;
            }
            if parameter.role == Role::Measurement
                && self
                    .committed_at
                    .get(parameter.id)
                    .is_some_and(|at| now.saturating_duration_since(*at) < self.report_interval)
            {
                continue;
            }
            self.commit(parameter, value.clone(), now, &mut changes);
        }
        self.finish(before, changes)
    }

    /// Commit values that were just written, ahead of the unit reporting them, and protect them
    /// from stale reads for the suppression window.
    ///
    /// Writes to request parameters are reflected on the parameters they change.
    pub fn record_local_write(
        &mut self,
        values: &[(&'static ParameterDescriptor, Value)],
        now: Instant,
    ) -> Vec<ChangeEvent> {
        let before = self.derived();
        let mut changes = Changes::default();
        for (parameter, value) in values {
            let (parameter, value) = match parameter.role {
                Role::ModeRequest => {
                    let Some(mode) = self.catalog.by_role(Role::UserMode) else { continue };
                    let Some(code) = value.as_code() else { continue };
                    (mode, Value::Number((code - self.catalog.mode_request_offset) as f64))
                }
                Role::FanModeRequest => {
                    let Some(fan_mode) = self.catalog.by_role(Role::FanMode) else { continue };
                    (fan_mode, value.clone())
                }
                _ => (*parameter, value.clone()),
            };
            if parameter.role == Role::FanMode {
                let current = self.snapshot.fan_mode;
                if current.is_some() && current != value.as_code() {
                    self.snapshot.previous_fan_mode = current;
                }
            }
            self.suppressed_until.insert(parameter.id, now + self.suppression_window);
            self.commit(parameter, value, now, &mut changes);
        }
        self.finish(before, changes)
    }

    fn derived(&self) -> (Option<i64>, Option<i64>) {
        (self.snapshot.mode, self.snapshot.displayed_fan_mode())
    }

    fn finish(&mut self, (mode, fan_mode): (Option<i64>, Option<i64>), mut changes: Changes) -> Vec<ChangeEvent> {
        let (new_mode, new_fan_mode) = self.derived();
        if let (Some(old), Some(code)) = (mode, new_mode) {
            if old != code {
                changes.events.push(ChangeEvent::Mode { code, label: self.catalog.mode_name(code) });
            }
        }
        if let (Some(old), Some(code)) = (fan_mode, new_fan_mode) {
            if old != code {
                let label = self.catalog.fan_mode_name(code);
                changes.events.push(ChangeEvent::FanMode { code, label });
            }
        }
        if let Some(store) = &self.store {
            if changes.alarms {
                if let Err(e) = store.save(ALARMS_KEY, &self.snapshot.alarms) {
                    warn!(message = "could not persist alarms", error = (&e as &dyn std::error::Error));
                }
            }
            if changes.functions {
                if let Err(e) = store.save(FUNCTIONS_KEY, &self.snapshot.functions) {
                    warn!(message = "could not persist functions", error = (&e as &dyn std::error::Error));
                }
            }
        }
        changes.events
    }

    fn commit(
        &mut self,
        parameter: &'static ParameterDescriptor,
        value: Value,
        now: Instant,
        changes: &mut Changes,
    ) {
        let id = parameter.id;
        let description = parameter.description;
        let previous = self.snapshot.values.insert(id, value.clone());
        self.committed_at.insert(id, now);
        let changed = previous.as_ref().is_some_and(|p| *p != value);
        let snapshot = &mut self.snapshot;
        match parameter.role {
            Role::TargetTemperature => {
                let Some(x) = value.as_f64() else { return };
                snapshot.target_temperature = Some(x);
                if changed {
                    changes.events.push(ChangeEvent::TargetTemperature { value: x });
                }
            }
            Role::UserMode => match value.as_code() {
                Some(code) => snapshot.mode = Some(code),
                None if changed => changes.events.push(ChangeEvent::Value { id, value }),
                None => {}
            },
            Role::FanMode => match value.as_code() {
                Some(code) => snapshot.fan_mode = Some(code),
                None if changed => changes.events.push(ChangeEvent::Value { id, value }),
                None => {}
            },
            Role::ModeAirflow(mode) => {
                if let Some(level) = value.as_code() {
                    snapshot.mode_airflow.insert(mode.code(), level);
                }
                if changed {
                    changes.events.push(ChangeEvent::Value { id, value });
                }
            }
            Role::EcoMode => {
                let Some(on) = value.as_bool() else { return };
                snapshot.eco_mode = Some(on);
                if changed {
                    changes.events.push(ChangeEvent::EcoMode { on });
                }
            }
            Role::FilterTimeLeft => {
                let Some(seconds) = value.as_f64() else { return };
                let days = (seconds.max(0.0) / SECONDS_PER_DAY).ceil() as u64;
                let previous = snapshot.filter_days_left.replace(days);
                if previous.is_some_and(|p| p != days) {
                    changes.events.push(ChangeEvent::FilterDaysLeft { days });
                }
            }
            Role::Alarm => {
                let state = self.catalog.alarm_state(&value);
                let previous = snapshot.alarms.insert(id.to_string(), state.clone());
                if previous.as_ref() == Some(&state) {
                    return;
                }
                changes.alarms = true;
                // Only a transition from a known, quiet state counts as the alarm going off.
                if previous.is_some_and(|p| !alarm_is_active(&p)) && alarm_is_active(&state) {
                    debug!(message = "alarm raised", id, %state);
                    for scope in [Scope::Any, Scope::Specific] {
                        let state = state.clone();
                        changes.events.push(ChangeEvent::AlarmRaised { scope, id, description, state });
                    }
                }
            }
            Role::Function => {
                let Some(active) = value.as_bool() else { return };
                let previous = snapshot.functions.insert(id.to_string(), active);
                if previous == Some(active) {
                    return;
                }
                changes.functions = true;
                if previous.is_some() {
                    for scope in [Scope::Any, Scope::Specific] {
                        changes.events.push(if active {
                            ChangeEvent::FunctionActivated { scope, id, description }
                        } else {
                            ChangeEvent::FunctionDeactivated { scope, id, description }
                        });
                    }
                }
            }
            Role::Measurement
            | Role::ModeRequest
            | Role::FanModeRequest
            | Role::BoostSwitch
            | Role::ModeDuration(_)
            | Role::Setting => {
                if changed {
                    changes.events.push(ChangeEvent::Value { id, value });
                }
            }
        }
    }
}

#[derive(Default)]
struct Changes {
    events: Vec<ChangeEvent>,
    alarms: bool,
    functions: bool,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registers::{MODBUS, CLOUD};
    use crate::store::{MemoryStore, Store};
    use std::sync::Arc;

    fn poll(values: &[(&'static str, Value)]) -> ReadResult {
        ReadResult { values: values.iter().cloned().collect(), origin: Origin::Poll }
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(&MODBUS, &Settings::default(), None)
    }

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    #[test]
    fn first_observation_is_silent() {
        let mut r = reconciler();
        let now = Instant::now();
        let first = poll(&[
            ("REG_TC_SP", n(21.0)),
            ("REG_USERMODE_MODE", n(1.0)),
            ("REG_USERMODE_MANUAL_AIRFLOW_LEVEL_SAF", n(3.0)),
            ("REG_ECO_MODE_ON_OFF", Value::Boolean(false)),
            ("REG_ALARM_FILTER_ALARM", n(1.0)),
            ("REG_FUNCTION_ACTIVE_CDI_1", Value::Boolean(true)),
            ("REG_FILTER_REMAINING_TIME", n(90000.0)),
        ]);
        assert_eq!(r.apply(&first, now), vec![]);
        let snapshot = r.snapshot();
        assert_eq!(snapshot.target_temperature, Some(21.0));
        assert_eq!(snapshot.mode, Some(1));
        assert_eq!(snapshot.displayed_fan_mode(), Some(3));
        assert_eq!(snapshot.filter_days_left, Some(2));
        assert_eq!(snapshot.alarms["REG_ALARM_FILTER_ALARM"], "active");
        assert_eq!(r.apply(&first, now), vec![]);
    }

    #[test]
    fn alarm_raised_once_in_both_scopes() {
        let mut r = reconciler();
        let now = Instant::now();
        r.apply(&poll(&[("REG_ALARM_FILTER_ALARM", n(0.0))]), now);
        let events = r.apply(&poll(&[("REG_ALARM_FILTER_ALARM", n(1.0))]), now);
        let raised = |scope| ChangeEvent::AlarmRaised {
            scope,
            id: "REG_ALARM_FILTER_ALARM",
            description: "Filter",
            state: "active".into(),
        };
        assert_eq!(events, vec![raised(Scope::Any), raised(Scope::Specific)]);
        // Acknowledging keeps it active.
        assert_eq!(r.apply(&poll(&[("REG_ALARM_FILTER_ALARM", n(3.0))]), now), vec![]);
        assert_eq!(r.apply(&poll(&[("REG_ALARM_FILTER_ALARM", n(2.0))]), now), vec![]);
        assert_eq!(r.apply(&poll(&[("REG_ALARM_FILTER_ALARM", n(1.0))]), now).len(), 2);
    }

    #[test]
    fn cloud_alarm_labels_pass_through() {
        let mut r = Reconciler::new(&CLOUD, &Settings::default(), None);
        let now = Instant::now();
        let state = |s: &str| poll(&[("alarm_eat_state", Value::Raw(s.into()))]);
        r.apply(&state("inactive"), now);
        let events = r.apply(&state("unknown_state"), now);
        assert!(matches!(
            &events[..],
            [ChangeEvent::AlarmRaised { scope: Scope::Any, state, .. }, _] if state == "unknown_state"
        ));
    }

    #[test]
    fn functions_report_both_edges() {
        let mut r = reconciler();
        let now = Instant::now();
        let cdi = |on| poll(&[("REG_FUNCTION_ACTIVE_CDI_2", Value::Boolean(on))]);
        r.apply(&cdi(false), now);
        let events = r.apply(&cdi(true), now);
        assert!(matches!(events[..], [
            ChangeEvent::FunctionActivated { scope: Scope::Any, .. },
            ChangeEvent::FunctionActivated { scope: Scope::Specific, id: "REG_FUNCTION_ACTIVE_CDI_2", .. },
        ]));
        let events = r.apply(&cdi(false), now);
        assert!(matches!(events[..], [ChangeEvent::FunctionDeactivated { .. }, ChangeEvent::FunctionDeactivated { .. }]));
    }

    #[test]
    fn echoes_are_ignored() {
        let mut r = reconciler();
        let now = Instant::now();
        r.apply(&poll(&[("REG_TC_SP", n(21.0))]), now);
        let echo = ReadResult {
            values: [("REG_TC_SP", n(19.0))].into_iter().collect(),
            origin: Origin::Push { asked_by_client: true },
        };
        assert_eq!(r.apply(&echo, now), vec![]);
        assert_eq!(r.snapshot().target_temperature, Some(21.0));
        let push = ReadResult { origin: Origin::Push { asked_by_client: false }, ..echo };
        assert_eq!(r.apply(&push, now), vec![ChangeEvent::TargetTemperature { value: 19.0 }]);
    }

    #[test]
    fn local_writes_survive_stale_reads() {
        let mut r = reconciler();
        let start = Instant::now();
        r.apply(&poll(&[("REG_TC_SP", n(21.0))]), start);
        let target = MODBUS.get("REG_TC_SP").unwrap();
        let events = r.record_local_write(&[(target, n(21.5))], start);
        assert_eq!(events, vec![ChangeEvent::TargetTemperature { value: 21.5 }]);
        let stale = poll(&[("REG_TC_SP", n(21.0))]);
        assert_eq!(r.apply(&stale, start + Duration::from_secs(3)), vec![]);
        assert_eq!(r.snapshot().target_temperature, Some(21.5));
        let events = r.apply(&stale, start + Duration::from_secs(11));
        assert_eq!(events, vec![ChangeEvent::TargetTemperature { value: 21.0 }]);
    }

    #[test]
    fn mode_requests_update_the_mode() {
        let mut r = reconciler();
        let now = Instant::now();
        r.apply(&poll(&[("REG_USERMODE_MODE", n(0.0)), ("REG_USERMODE_MANUAL_AIRFLOW_LEVEL_SAF", n(3.0))]), now);
        let request = MODBUS.mode_request().unwrap();
        let fan = MODBUS.fan_mode_request().unwrap();
        let events = r.record_local_write(&[(request, n(2.0)), (fan, n(4.0))], now);
        assert_eq!(events, vec![
            ChangeEvent::Mode { code: 1, label: "Manual".into() },
            ChangeEvent::FanMode { code: 4, label: "High".into() },
        ]);
        assert_eq!(r.snapshot().previous_fan_mode, Some(3));
        // The unit has not caught up yet.
        let stale = poll(&[("REG_USERMODE_MODE", n(0.0))]);
        assert_eq!(r.apply(&stale, now + Duration::from_secs(1)), vec![]);
    }

    #[test]
    fn fan_mode_follows_the_mode_airflow() {
        let mut r = reconciler();
        let now = Instant::now();
        r.apply(&poll(&[
            ("REG_USERMODE_MODE", n(1.0)),
            ("REG_USERMODE_MANUAL_AIRFLOW_LEVEL_SAF", n(2.0)),
            ("REG_USERMODE_CROWDED_AIRFLOW_LEVEL_SAF", n(4.0)),
        ]), now);
        let events = r.apply(&poll(&[("REG_USERMODE_MODE", n(2.0))]), now);
        assert_eq!(events, vec![
            ChangeEvent::Mode { code: 2, label: "Crowded".into() },
            ChangeEvent::FanMode { code: 4, label: "High".into() },
        ]);
        let events = r.apply(&poll(&[("REG_USERMODE_MODE", n(42.0))]), now);
        assert_eq!(events, vec![
            ChangeEvent::Mode { code: 42, label: "42".into() },
            ChangeEvent::FanMode { code: 2, label: "Low".into() },
        ]);
    }

    #[test]
    fn measurements_are_smoothed() {
        let mut r = reconciler();
        let start = Instant::now();
        let rpm = |x| poll(&[("REG_SENSOR_RPM_SAF", n(x))]);
        r.apply(&rpm(1000.0), start);
        assert_eq!(r.apply(&rpm(1100.0), start + Duration::from_secs(10)), vec![]);
        assert_eq!(r.snapshot().values["REG_SENSOR_RPM_SAF"], n(1000.0));
        let events = r.apply(&rpm(1200.0), start + Duration::from_secs(30));
        assert_eq!(events, vec![ChangeEvent::Value { id: "REG_SENSOR_RPM_SAF", value: n(1200.0) }]);
    }

    #[test]
    fn filter_days_round_up() {
        let mut r = reconciler();
        let now = Instant::now();
        r.apply(&poll(&[("REG_FILTER_REMAINING_TIME", n(86400.0))]), now);
        assert_eq!(r.snapshot().filter_days_left, Some(1));
        let events = r.apply(&poll(&[("REG_FILTER_REMAINING_TIME", n(86401.0))]), now);
        assert_eq!(events, vec![ChangeEvent::FilterDaysLeft { days: 2 }]);
        assert_eq!(r.apply(&poll(&[("REG_FILTER_REMAINING_TIME", n(90000.0))]), now), vec![]);
    }

    #[test]
    fn alarms_are_remembered_across_restarts() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let scoped = ScopedStore::new(store.clone(), "tcp:unit");
        let now = Instant::now();
        let mut r = Reconciler::new(&MODBUS, &Settings::default(), Some(scoped.clone()));
        r.apply(&poll(&[("REG_ALARM_TYPE_A", Value::Boolean(false))]), now);
        assert!(store.contains("tcp:unit/alarms").unwrap());
        let mut r = Reconciler::new(&MODBUS, &Settings::default(), Some(scoped));
        assert_eq!(r.snapshot().alarms["REG_ALARM_TYPE_A"], "inactive");
        let events = r.apply(&poll(&[("REG_ALARM_TYPE_A", Value::Boolean(true))]), now);
        assert_eq!(events.len(), 2);
    }
}
