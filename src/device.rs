//! A ventilation unit, as seen by the rest of the world.
//!
//! [`Device`] wires a transport up with the command queue, the polling scheduler, the
//! reconciler and the temporary-mode controller, and publishes whatever changes on an
//! [`EventBus`].

use crate::connection::{ErrorKind, ReadResult, Transport};
use crate::events::{Availability, ChangeEvent, DeviceEvent, EventBus};
use crate::queue::{self, Queue};
use crate::reconciler::{DeviceSnapshot, Reconciler};
use crate::registers::{
    Boost, Catalog, EncodeError, FanMode, Group, Kind, ParameterDescriptor, Role, TemporaryMode,
    UserMode, Value,
};
use crate::scheduler::Scheduler;
use crate::settings::Settings;
use crate::store::{ScopedStore, Store};
use crate::temporary_mode::{self, SavedState};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("`{0}` is not a parameter of this unit")]
    UnknownParameter(String),
    #[error("`{0}` cannot be written")]
    ReadOnly(&'static str),
    #[error("the value is not acceptable")]
    Validation(#[source] EncodeError),
    #[error("{0} is not supported by this unit")]
    Unsupported(String),
    #[error("the unit is unavailable: {0}")]
    Unavailable(String),
    #[error("the request to the unit failed")]
    Transport(#[source] queue::Error),
}

/// The airflow level to select.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FanModeRequest {
    Level(i64),
    /// Whatever was selected before the most recent change.
    Previous,
}

struct State {
    settings: Settings,
    reconciler: Reconciler,
    availability: Availability,
    temporary: temporary_mode::Controller,
    revert: Option<AbortOnDropHandle<()>>,
    scheduler: Option<Scheduler>,
}

struct Inner {
    id: String,
    catalog: &'static Catalog,
    queue: Queue,
    events: EventBus,
    state: Mutex<State>,
}

pub struct Device {
    inner: Arc<Inner>,
    _worker: AbortOnDropHandle<()>,
    _pushes: Option<AbortOnDropHandle<()>>,
}

/// `error: cause: cause`, for reporting availability.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl Device {
    /// Start polling the unit behind `transport`.
    ///
    /// Alarm and function states are persisted to `store`, under keys scoped by `id`.
    pub fn start<T: Transport>(
        mut transport: T,
        id: String,
        settings: Settings,
        store: Option<Arc<dyn Store>>,
        events: EventBus,
    ) -> Self {
        let catalog = transport.catalog();
        let pushes = transport.take_pushes();
        let (queue, worker) = Queue::spawn(transport, settings.idle_timeout());
        let store = store.map(|store| ScopedStore::new(store, id.clone()));
        let state = State {
            reconciler: Reconciler::new(catalog, &settings, store),
            settings,
            availability: Availability::Unavailable("not connected yet".into()),
            temporary: Default::default(),
            revert: None,
            scheduler: None,
        };
        let inner = Arc::new(Inner { id, catalog, queue, events, state: Mutex::new(state) });
        inner.start_scheduler();
        let pushes = pushes.map(|mut pushes| {
            let inner = Arc::clone(&inner);
            AbortOnDropHandle::new(tokio::spawn(async move {
                while let Some(result) = pushes.recv().await {
                    inner.set_availability(Availability::Available);
                    inner.apply(&result);
                }
                debug!("the transport stopped delivering updates");
            }))
        });
        info!(message = "device started", id = inner.id, catalog = catalog.name);
        Self { inner, _worker: worker, _pushes: pushes }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn catalog(&self) -> &'static Catalog {
        self.inner.catalog
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Fold in values read or pushed from elsewhere.
    pub fn apply(&self, result: &ReadResult) {
        self.inner.apply(result);
    }

    /// Read a group right away, outside of its schedule.
    pub async fn refresh(&self, group: Group) {
        self.inner.fetch(group).await;
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.inner.lock().reconciler.snapshot().clone()
    }

    pub fn availability(&self) -> Availability {
        self.inner.lock().availability.clone()
    }

    pub fn temporary_mode(&self) -> temporary_mode::State {
        self.inner.lock().temporary.state()
    }

    /// Whether the alarm `id` is in an active state, or any alarm if `id` is `None`.
    pub fn has_alarm(&self, id: Option<&str>) -> bool {
        let state = self.inner.lock();
        let alarms = &state.reconciler.snapshot().alarms;
        match id {
            Some(id) => alarms.get(id).is_some_and(|s| crate::registers::alarm_is_active(s)),
            None => alarms.values().any(|s| crate::registers::alarm_is_active(s)),
        }
    }

    /// Whether the function `id` is active, or any function if `id` is `None`.
    pub fn is_function_active(&self, id: Option<&str>) -> bool {
        let state = self.inner.lock();
        let functions = &state.reconciler.snapshot().functions;
        match id {
            Some(id) => functions.get(id).copied().unwrap_or(false),
            None => functions.values().any(|active| *active),
        }
    }

    /// The alarms this unit can raise.
    pub fn alarm_types(&self) -> Vec<&'static ParameterDescriptor> {
        self.inner.catalog.with_role(Role::Alarm).collect()
    }

    /// The functions this unit can report.
    pub fn function_types(&self) -> Vec<&'static ParameterDescriptor> {
        self.inner.catalog.with_role(Role::Function).collect()
    }

    /// Write `value` into the parameter `id`, clamped into its range.
    pub async fn set_target_value(&self, id: &str, value: Value) -> Result<(), Error> {
        let parameter = self.writable(id)?;
        let value = parameter.clamp(&value).map_err(Error::Validation)?;
        self.inner.write(vec![(parameter, value)]).await
    }

    pub async fn set_boolean(&self, id: &str, value: bool) -> Result<(), Error> {
        let parameter = self.writable(id)?;
        if parameter.data_type.kind() != Kind::Boolean {
            let kind = parameter.data_type.kind();
            return Err(Error::Validation(EncodeError::KindMismatch(parameter.id, kind)));
        }
        self.inner.write(vec![(parameter, Value::Boolean(value))]).await
    }

    pub async fn set_target_temperature(&self, celsius: f64) -> Result<(), Error> {
        let parameter = self.by_role(Role::TargetTemperature, "setting the temperature")?;
        self.set_target_value(parameter.id, Value::Number(celsius)).await
    }

    pub async fn set_eco_mode(&self, on: bool) -> Result<(), Error> {
        let parameter = self.by_role(Role::EcoMode, "eco mode")?;
        self.set_boolean(parameter.id, on).await
    }

    /// Switch to mode `code`, abandoning any temporary mode without restoring it.
    pub async fn set_mode(&self, code: i64) -> Result<(), Error> {
        let write = self.inner.mode_write(code)?;
        if self.inner.lock().cancel_temporary_mode() {
            info!(message = "temporary mode cancelled by a mode change", mode = code);
        }
        self.inner.write(vec![write]).await
    }

    pub async fn set_fan_mode(&self, request: FanModeRequest) -> Result<(), Error> {
        let code = match request {
            FanModeRequest::Level(code) => code,
            FanModeRequest::Previous => self
                .inner
                .lock()
                .reconciler
                .snapshot()
                .previous_fan_mode
                .ok_or_else(|| Error::Unsupported("returning to the previous airflow level before it was changed".into()))?,
        };
        let write = self.inner.fan_mode_write(code)?;
        self.inner.write(vec![write]).await
    }

    /// Enter `mode` for `units` of its duration unit, reverting to the current mode afterwards.
    pub async fn enter_temporary_mode(&self, mode: TemporaryMode, units: u32) -> Result<(), Error> {
        let inner = &self.inner;
        let catalog = inner.catalog;
        let mut units = units;
        let writes = match (mode, catalog.boost) {
            (TemporaryMode::Boost, Boost::Switch) => {
                vec![(self.by_role(Role::BoostSwitch, "boost")?, Value::Boolean(true))]
            }
            (TemporaryMode::Boost, Boost::ModeAndFan) => vec![
                inner.mode_write(UserMode::Manual.code())?,
                inner.fan_mode_write(FanMode::High.code())?,
            ],
            (_, Boost::Switch) => return Err(Error::Unsupported(format!("the {mode} mode"))),
            (_, Boost::ModeAndFan) => {
                let mut writes = Vec::with_capacity(2);
                if let Some(duration) = catalog.by_role(Role::ModeDuration(mode)) {
                    let clamped = duration
                        .clamp(&Value::Number(f64::from(units)))
                        .map_err(Error::Validation)?;
                    units = clamped.as_f64().map_or(units, |u| u as u32);
                    writes.push((duration, clamped));
                }
                writes.push(inner.mode_write(mode.user_mode().code())?);
                writes
            }
        };
        let current = {
            let state = inner.lock();
            let snapshot = state.reconciler.snapshot();
            SavedState { mode: snapshot.mode, fan_mode: snapshot.fan_mode }
        };
        inner.write(writes).await?;
        let duration = mode.duration(units);
        let mut state = inner.lock();
        let generation = state.temporary.enter(mode, duration, Instant::now(), current);
        let weak = Arc::downgrade(inner);
        state.revert = Some(AbortOnDropHandle::new(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.revert(generation).await;
            }
        })));
        info!(message = "temporary mode entered", %mode, ?duration);
        Ok(())
    }

    /// Drop the connection and resume polling, even after an unrecoverable error.
    pub async fn reset_connection(&self) -> Result<(), Error> {
        self.inner.queue.reset().await.map_err(Error::Transport)?;
        self.inner.set_availability(Availability::Unavailable("reconnecting".into()));
        self.inner.lock().scheduler.take();
        self.inner.start_scheduler();
        Ok(())
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<(), Error> {
        let idle_timeout = settings.idle_timeout();
        {
            let mut state = self.inner.lock();
            state.reconciler.update_settings(&settings);
            state.settings = settings;
        }
        self.inner.queue.set_idle_timeout(idle_timeout).await.map_err(Error::Transport)?;
        self.reset_connection().await
    }

    /// Stop polling, forget any temporary mode and close the connection.
    pub async fn shutdown(self) {
        {
            let mut state = self.inner.lock();
            if let Some(scheduler) = state.scheduler.take() {
                scheduler.stop();
            }
            state.cancel_temporary_mode();
        }
        if let Err(e) = self.inner.queue.reset().await {
            debug!(message = "could not close the connection", error = (&e as &dyn std::error::Error));
        }
        info!(message = "device stopped", id = self.inner.id);
    }

    fn writable(&self, id: &str) -> Result<&'static ParameterDescriptor, Error> {
        let parameter =
            self.inner.catalog.get(id).ok_or_else(|| Error::UnknownParameter(id.to_string()))?;
        if !parameter.access.writable() {
            return Err(Error::ReadOnly(parameter.id));
        }
        Ok(parameter)
    }

    fn by_role(&self, role: Role, what: &str) -> Result<&'static ParameterDescriptor, Error> {
        self.inner.catalog.by_role(role).ok_or_else(|| Error::Unsupported(what.to_string()))
    }
}

impl State {
    fn cancel_temporary_mode(&mut self) -> bool {
        self.revert = None;
        self.temporary.cancel()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, changes: Vec<ChangeEvent>) {
        let at = jiff::Timestamp::now();
        for change in changes {
            trace!(message = "publishing", ?change);
            self.events.publish(DeviceEvent { device: self.id.clone(), at, change });
        }
    }

    fn set_availability(&self, availability: Availability) {
        let changed = {
            let mut state = self.lock();
            if state.availability == availability {
                false
            } else {
                state.availability = availability.clone();
                true
            }
        };
        if changed {
            match &availability {
                Availability::Available => info!(message = "unit available", id = self.id),
                Availability::Unavailable(reason) | Availability::Failed(reason) => {
                    let retrying = availability.will_retry();
                    warn!(message = "unit unavailable", id = self.id, %reason, retrying);
                }
            }
            self.publish(vec![ChangeEvent::Availability { availability }]);
        }
    }

    fn apply(&self, result: &ReadResult) {
        let events = self.lock().reconciler.apply(result, Instant::now());
        self.publish(events);
    }

    fn handle_error(&self, error: &queue::Error) {
        match error.kind() {
            ErrorKind::Connection { retryable } => {
                let reason = error_chain(error);
                self.set_availability(if retryable {
                    Availability::Unavailable(reason)
                } else {
                    Availability::Failed(reason)
                });
            }
            ErrorKind::Io | ErrorKind::Decode => {
                warn!(message = "request failed", id = self.id, error = (error as &dyn std::error::Error));
            }
        }
    }

    fn start_scheduler(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut state = self.lock();
        let scheduler = Scheduler::start(self.catalog.schedule, &state.settings, move |group| {
            let weak = Weak::clone(&weak);
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.fetch(group).await;
                }
            }
        });
        state.scheduler = Some(scheduler);
    }

    fn restart_fast(&self) {
        if let Some(scheduler) = &self.lock().scheduler {
            scheduler.restart_fast();
        }
    }

    async fn fetch(&self, group: Group) {
        if !self.lock().availability.will_retry() {
            trace!(message = "not polling a failed unit", %group);
            return;
        }
        let parameters = self.catalog.group(group);
        if parameters.is_empty() {
            return;
        }
        match self.queue.read(parameters).await {
            Ok(result) => {
                self.set_availability(Availability::Available);
                self.apply(&result);
            }
            Err(e) => self.handle_error(&e),
        }
    }

    async fn write(&self, values: Vec<(&'static ParameterDescriptor, Value)>) -> Result<(), Error> {
        {
            let mut state = self.lock();
            if let Availability::Failed(reason) = &state.availability {
                return Err(Error::Unavailable(reason.clone()));
            }
            let events = state.reconciler.record_local_write(&values, Instant::now());
            drop(state);
            self.publish(events);
        }
        let result = self.queue.write(values).await;
        self.restart_fast();
        match result {
            Ok(()) => {
                self.set_availability(Availability::Available);
                Ok(())
            }
            Err(e) => {
                self.handle_error(&e);
                Err(Error::Transport(e))
            }
        }
    }

    fn mode_write(&self, code: i64) -> Result<(&'static ParameterDescriptor, Value), Error> {
        if !self.catalog.requestable_modes.contains(&code) {
            return Err(Error::Unsupported(format!("requesting mode {}", self.catalog.mode_name(code))));
        }
        let request = self
            .catalog
            .mode_request()
            .ok_or_else(|| Error::Unsupported("changing the mode".into()))?;
        let value = Value::Number((code + self.catalog.mode_request_offset) as f64);
        Ok((request, request.clamp(&value).map_err(Error::Validation)?))
    }

    fn fan_mode_write(&self, code: i64) -> Result<(&'static ParameterDescriptor, Value), Error> {
        let request = self
            .catalog
            .fan_mode_request()
            .ok_or_else(|| Error::Unsupported("changing the airflow level".into()))?;
        let value = Value::Number(code as f64);
        Ok((request, request.clamp(&value).map_err(Error::Validation)?))
    }

    async fn revert(&self, generation: u64) {
        // This runs inside the timer task, so its handle is held until the restore is done.
        let (saved, _timer) = {
            let mut state = self.lock();
            match state.temporary.expire(generation) {
                Some(saved) => (saved, state.revert.take()),
                None => return,
            }
        };
        let mut writes = Vec::with_capacity(2);
        match self.catalog.boost {
            Boost::Switch => {
                if let Some(boost) = self.catalog.by_role(Role::BoostSwitch) {
                    writes.push((boost, Value::Boolean(false)));
                }
            }
            Boost::ModeAndFan => {
                if let Some(code) = saved.mode {
                    match self.mode_write(code) {
                        Ok(write) => writes.push(write),
                        Err(e) => debug!(message = "not restoring the mode", error = (&e as &dyn std::error::Error)),
                    }
                }
                if let Some(code) = saved.fan_mode {
                    match self.fan_mode_write(code) {
                        Ok(write) => writes.push(write),
                        Err(e) => debug!(message = "not restoring the airflow", error = (&e as &dyn std::error::Error)),
                    }
                }
            }
        }
        if writes.is_empty() {
            debug!("nothing to restore after the temporary mode");
            return;
        }
        info!(message = "temporary mode expired, restoring", mode = ?saved.mode, fan_mode = ?saved.fan_mode);
        if let Err(e) = self.write(writes).await {
            warn!(message = "could not restore the state after a temporary mode", error = (&e as &dyn std::error::Error));
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.scheduler = None;
        state.revert = None;
    }
}
