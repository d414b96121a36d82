//! Change notifications.
//!
//! The reconciler turns decoded values into [`ChangeEvent`]s; the device stamps them and
//! broadcasts them to whoever subscribed to its [`EventBus`].

use crate::registers::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt as _};
use tracing::warn;

const DEFAULT_CAPACITY: usize = 256;

/// Whether an alarm or function event concerns any alarm (function), or one in particular.
///
/// Every transition is announced in both scopes so that listeners can subscribe to either.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Scope {
    Any,
    Specific,
}

/// Whether the unit can be talked to.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum Availability {
    Available,
    /// Polling carries on and may recover.
    Unavailable(String),
    /// Polling has stopped until the connection is reset or the settings are changed.
    Failed(String),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }

    pub fn will_retry(&self) -> bool {
        !matches!(self, Availability::Failed(_))
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    TargetTemperature { value: f64 },
    Mode { code: i64, label: String },
    FanMode { code: i64, label: String },
    EcoMode { on: bool },
    FilterDaysLeft { days: u64 },
    AlarmRaised { scope: Scope, id: &'static str, description: &'static str, state: String },
    FunctionActivated { scope: Scope, id: &'static str, description: &'static str },
    FunctionDeactivated { scope: Scope, id: &'static str, description: &'static str },
    /// Any other parameter.
    Value { id: &'static str, value: Value },
    Availability { availability: Availability },
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct DeviceEvent {
    pub device: String,
    pub at: jiff::Timestamp,
    #[serde(flatten)]
    pub change: ChangeEvent,
}

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    /// All events published from now on. Events a slow subscriber missed are skipped over.
    pub fn stream(&self) -> impl Stream<Item = DeviceEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(message = "event subscriber lagged behind", skipped);
                None
            }
        })
    }

    pub fn publish(&self, event: DeviceEvent) {
        // Nobody listening is fine.
        let _ = self.sender.send(event);
    }
}
