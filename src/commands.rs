fn runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

pub mod registers {
    use crate::registers::{CLOUD, Catalog, MODBUS, ZWAVE};

    #[derive(clap::ValueEnum, Clone, Copy, Debug)]
    pub enum CatalogName {
        /// Modbus holding registers, used over Modbus TCP and Save Connect HTTP.
        Modbus,
        Cloud,
        Zwave,
    }

    impl CatalogName {
        fn catalog(self) -> &'static Catalog {
            match self {
                CatalogName::Modbus => &MODBUS,
                CatalogName::Cloud => &CLOUD,
                CatalogName::Zwave => &ZWAVE,
            }
        }
    }

    /// Search and output the parameters the driver knows about.
    #[derive(clap::Parser)]
    pub struct Args {
        #[arg(long, short = 'c', value_enum, default_value_t = CatalogName::Modbus)]
        catalog: CatalogName,
        filter: Option<String>,
        #[clap(flatten)]
        output: crate::output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the parameter list")]
        Output(#[source] crate::output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output
            .table_headers(vec![
                "Address",
                "Id",
                "Access",
                "Type",
                "Role",
                "Group",
                "Min",
                "Max",
                "Description",
            ])
            .map_err(Error::Output)?;
        for parameter in args.catalog.catalog().parameters {
            if let Some(pattern) = &args.filter {
                if !parameter.is_match(pattern) {
                    continue;
                }
            }
            output
                .result(
                    || {
                        vec![
                            parameter.address.to_string(),
                            parameter.id.to_string(),
                            parameter.access.to_string(),
                            parameter.data_type.to_string(),
                            format!("{:?}", parameter.role),
                            parameter.group.to_string(),
                            parameter.minimum.map(|v| v.to_string()).unwrap_or_default(),
                            parameter.maximum.map(|v| v.to_string()).unwrap_or_default(),
                            parameter.description.to_string(),
                        ]
                    },
                    || parameter,
                )
                .map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }
}

pub mod watch {
    use crate::device::Device;
    use crate::events::{ChangeEvent, DeviceEvent, EventBus};
    use crate::store::{JsonFileStore, Store};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio_stream::StreamExt as _;

    /// Poll a unit and print every change as it happens.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: crate::connection::Args,
        #[clap(flatten)]
        settings: crate::settings::Settings,
        /// Remember alarm and function states in this file.
        #[arg(long)]
        state: Option<PathBuf>,
        #[clap(flatten)]
        output: crate::output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not set up the connection")]
        Connection(#[source] crate::connection::Error),
        #[error("could not open the state file")]
        Store(#[source] crate::store::Error),
        #[error("could not output an event")]
        Output(#[source] crate::output::Error),
        #[error("could not listen for the interrupt signal")]
        Signal(#[source] std::io::Error),
    }

    fn details(change: &ChangeEvent) -> String {
        match change {
            ChangeEvent::TargetTemperature { value } => format!("{value} °C"),
            ChangeEvent::Mode { code, label } | ChangeEvent::FanMode { code, label } => {
                format!("{label} ({code})")
            }
            ChangeEvent::EcoMode { on } => on.to_string(),
            ChangeEvent::FilterDaysLeft { days } => format!("{days} days"),
            ChangeEvent::AlarmRaised { scope, id, state, .. } => format!("{id} {state} ({scope})"),
            ChangeEvent::FunctionActivated { scope, id, .. } => format!("{id} on ({scope})"),
            ChangeEvent::FunctionDeactivated { scope, id, .. } => format!("{id} off ({scope})"),
            ChangeEvent::Value { id, value } => format!("{id} = {value}"),
            ChangeEvent::Availability { availability } => format!("{availability:?}"),
        }
    }

    fn kind(change: &ChangeEvent) -> &'static str {
        match change {
            ChangeEvent::TargetTemperature { .. } => "target temperature",
            ChangeEvent::Mode { .. } => "mode",
            ChangeEvent::FanMode { .. } => "fan mode",
            ChangeEvent::EcoMode { .. } => "eco mode",
            ChangeEvent::FilterDaysLeft { .. } => "filter",
            ChangeEvent::AlarmRaised { .. } => "alarm",
            ChangeEvent::FunctionActivated { .. } | ChangeEvent::FunctionDeactivated { .. } => {
                "function"
            }
            ChangeEvent::Value { .. } => "value",
            ChangeEvent::Availability { .. } => "availability",
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output.table_headers(vec!["Time", "Device", "Event", "Details"]).map_err(Error::Output)?;
        let store = match &args.state {
            None => None,
            Some(path) => Some(Arc::new(JsonFileStore::open(path.clone()).map_err(Error::Store)?)
                as Arc<dyn Store>),
        };
        let id = args.connection.device_id();
        let transport = args
            .connection
            .into_transport(args.settings.idle_timeout())
            .map_err(Error::Connection)?;
        let rt = super::runtime().map_err(Error::Runtime)?;
        rt.block_on(async move {
            let bus = EventBus::new();
            let mut events = std::pin::pin!(bus.stream());
            let device = Device::start(transport, id, args.settings, store, bus);
            let result = loop {
                let event: DeviceEvent = tokio::select! {
                    signal = tokio::signal::ctrl_c() => match signal {
                        Ok(()) => break Ok(()),
                        Err(e) => break Err(Error::Signal(e)),
                    },
                    event = events.next() => match event {
                        Some(event) => event,
                        None => break Ok(()),
                    },
                };
                let written = output
                    .result(
                        || {
                            vec![
                                event.at.to_string(),
                                event.device.clone(),
                                kind(&event.change).to_string(),
                                details(&event.change),
                            ]
                        },
                        || &event,
                    )
                    .and_then(|()| output.flush());
                if let Err(e) = written {
                    break Err(Error::Output(e));
                }
            };
            device.shutdown().await;
            result?;
            output.commit().map_err(Error::Output)
        })
    }
}

pub mod control {
    use crate::device::{self, Device, FanModeRequest};
    use crate::events::EventBus;
    use crate::registers::{FanMode, Group, TemporaryMode, UserMode, Value};
    use crate::temporary_mode;

    #[derive(clap::ValueEnum, Clone, Copy, Debug)]
    pub enum FanLevel {
        Off,
        Low,
        Normal,
        High,
        /// Whatever was selected before the most recent change.
        Previous,
    }

    #[derive(clap::Subcommand, Clone, Debug)]
    pub enum Action {
        /// Print the state of the unit.
        Show,
        /// Set the target temperature (°C).
        Temperature { celsius: f64 },
        /// Change the user mode.
        Mode { mode: UserMode },
        /// Change the mode using the unit's own mode code.
        ModeCode { code: i64 },
        /// Change the airflow level.
        Fan { level: FanLevel },
        /// Turn eco mode on or off.
        Eco {
            #[arg(action = clap::ArgAction::Set)]
            on: bool,
        },
        /// Enter a mode that ends by itself, restoring the current mode and airflow level.
        ///
        /// Keeps running until the mode ends, so that the previous state can be restored.
        Temporary { mode: TemporaryMode, units: u32 },
        /// Write any writable parameter.
        Set { id: String, value: String },
    }

    /// Change settings of a unit.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: crate::connection::Args,
        #[clap(flatten)]
        settings: crate::settings::Settings,
        #[command(subcommand)]
        action: Action,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not set up the connection")]
        Connection(#[source] crate::connection::Error),
        #[error("the unit is unavailable: {0:?}")]
        Unavailable(crate::events::Availability),
        #[error("could not change the setting")]
        Device(#[source] device::Error),
        #[error("could not serialize the state to JSON")]
        SerializeJson(#[source] serde_json::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let id = args.connection.device_id();
        let transport = args
            .connection
            .into_transport(args.settings.idle_timeout())
            .map_err(Error::Connection)?;
        let rt = super::runtime().map_err(Error::Runtime)?;
        rt.block_on(async move {
            let device = Device::start(transport, id, args.settings, None, EventBus::new());
            let result = act(&device, args.action).await;
            device.shutdown().await;
            result
        })
    }

    async fn act(device: &Device, action: Action) -> Result<(), Error> {
        // Modes and airflow levels are only known after a read.
        device.refresh(Group::Operation).await;
        let availability = device.availability();
        if !availability.is_available() {
            return Err(Error::Unavailable(availability));
        }
        match action {
            Action::Show => {
                for group in [Group::Sensor, Group::Function, Group::Alarm, Group::Config] {
                    device.refresh(group).await;
                }
                let snapshot = device.snapshot();
                let json = serde_json::to_string_pretty(&snapshot).map_err(Error::SerializeJson)?;
                println!("{json}");
                return Ok(());
            }
            Action::Temperature { celsius } => device.set_target_temperature(celsius).await,
            Action::Mode { mode } => device.set_mode(mode.code()).await,
            Action::ModeCode { code } => device.set_mode(code).await,
            Action::Fan { level } => {
                let request = match level {
                    FanLevel::Off => FanModeRequest::Level(FanMode::Off.code()),
                    FanLevel::Low => FanModeRequest::Level(FanMode::Low.code()),
                    FanLevel::Normal => FanModeRequest::Level(FanMode::Normal.code()),
                    FanLevel::High => FanModeRequest::Level(FanMode::High.code()),
                    FanLevel::Previous => FanModeRequest::Previous,
                };
                device.set_fan_mode(request).await
            }
            Action::Eco { on } => device.set_eco_mode(on).await,
            Action::Temporary { mode, units } => {
                device.enter_temporary_mode(mode, units).await.map_err(Error::Device)?;
                if let temporary_mode::State::Active { expires_at, .. } = device.temporary_mode() {
                    tokio::time::sleep_until(expires_at).await;
                    // Let the revert go out.
                    while device.temporary_mode() != temporary_mode::State::Idle {
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                    device.refresh(Group::Operation).await;
                }
                return Ok(());
            }
            Action::Set { id, value } => {
                let value = match value.as_str() {
                    "true" => Value::Boolean(true),
                    "false" => Value::Boolean(false),
                    other => other.parse().map_or_else(|_| Value::Raw(other.to_string()), Value::Number),
                };
                device.set_target_value(&id, value).await
            }
        }
        .map_err(Error::Device)
    }
}
