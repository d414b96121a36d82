//! Transports towards the unit.
//!
//! Every transport speaks to exactly one unit and exposes the same small surface: connect, read
//! a list of parameters, write a list of values, close. None of them are safe to use
//! concurrently; [`crate::queue`] owns the transport and serializes all access to it.

use crate::registers::{Catalog, ParameterDescriptor, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod iam_cloud;
pub mod memory;
pub mod modbus_tcp;
pub mod save_connect;
pub mod zwave;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("connecting to `{0}` timed out")]
    ConnectTimeout(String),
    #[error("`{0}` is a placeholder address, the unit has not been configured")]
    PlaceholderAddress(String),
    #[error("the connection is not open")]
    NotConnected,
    #[error("the connection was closed by the peer")]
    ConnectionClosed,
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("the unit did not respond within {0:?}")]
    ResponseTimeout(Duration),
    #[error("the unit responded with modbus exception {0}")]
    Exception(u8),
    #[error("unexpected response to a request for `{0}`")]
    UnexpectedResponse(&'static str),
    #[error("`{0}` cannot be addressed over this transport")]
    UnsupportedAddress(&'static str),
    #[error("could not encode the value for the unit")]
    Encode(#[source] crate::registers::EncodeError),
    #[error("could not construct the HTTP client")]
    CreateReqwest(#[source] reqwest::Error),
    #[error("the HTTP base URL `{0}` cannot have paths")]
    UrlCannotBeABase(reqwest::Url),
    #[error("the `{1}` API request failed")]
    Http(#[source] reqwest::Error, &'static str),
    #[error("the `{1}` API returned malformed JSON")]
    HttpJsonDecode(#[source] reqwest::Error, &'static str),
    #[error("the `{0}` API response is not an object")]
    ResponseIsntObject(&'static str),
    #[error("could not open the WebSocket to `{1}`")]
    WebSocketConnect(#[source] tokio_tungstenite::tungstenite::Error, String),
    #[error("could not exchange WebSocket messages")]
    WebSocket(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("could not serialize the message")]
    Serialize(#[source] serde_json::Error),
    #[error("the cloud refused the login (`{0}`)")]
    LoginRejected(String),
    #[error("`{0}` is not a valid MQTT broker address")]
    BrokerAddress(String),
    #[error("could not talk to the MQTT broker")]
    MqttConnection(#[source] rumqttc::v5::ConnectionError),
    #[error("could not queue an MQTT message")]
    MqttClient(#[source] rumqttc::v5::ClientError),
    #[error("the gateway API `{0}` failed: {1}")]
    GatewayApi(&'static str, String),
    #[error("no transport was selected")]
    NoTransport,
}

/// How the device should react to an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The unit is not reachable. Non-retryable errors need a settings change to resolve.
    Connection { retryable: bool },
    /// The current operation failed, the next one may well succeed.
    Io,
    /// Data could not be interpreted.
    Decode,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            LookupHost(..) | Connect(..) | ConnectTimeout(_) | WebSocketConnect(..)
            | MqttConnection(_) => ErrorKind::Connection { retryable: true },
            Http(e, _) if e.is_connect() || e.is_timeout() => {
                ErrorKind::Connection { retryable: true }
            }
            PlaceholderAddress(_) | LoginRejected(_) | CreateReqwest(_) | UrlCannotBeABase(_)
            | BrokerAddress(_) | NoTransport => ErrorKind::Connection { retryable: false },
            NotConnected | ConnectionClosed | Send(_) | Receive(_) | ResponseTimeout(_)
            | Exception(_) | Http(..) | WebSocket(_) | MqttClient(_) | GatewayApi(..) => {
                ErrorKind::Io
            }
            UnexpectedResponse(_) | UnsupportedAddress(_) | Encode(_) | HttpJsonDecode(..)
            | ResponseIsntObject(_) | Serialize(_) => ErrorKind::Decode,
        }
    }

    /// The unit refused one parameter of a batch; the connection itself is fine and the rest of
    /// the batch can carry on without it.
    pub fn concerns_one_parameter(&self) -> bool {
        matches!(self, Error::Exception(_) | Error::GatewayApi(..) | Error::UnexpectedResponse(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Ready,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Response to a read issued by this driver.
    Poll,
    /// Unsolicited update from the unit. `asked_by_client` marks echoes of our own writes.
    Push { asked_by_client: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReadResult {
    /// Decoded values keyed by parameter id. Parameters that failed to decode are absent.
    pub values: BTreeMap<&'static str, Value>,
    pub origin: Origin,
}

impl ReadResult {
    pub fn poll() -> Self {
        Self { values: BTreeMap::new(), origin: Origin::Poll }
    }
}

pub trait Transport: Send + 'static {
    fn catalog(&self) -> &'static Catalog;

    /// Open the connection, unless it is open already.
    fn connect(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    fn read(
        &mut self,
        parameters: &[&'static ParameterDescriptor],
    ) -> impl Future<Output = Result<ReadResult, Error>> + Send;

    /// Values are expected to be clamped by the caller already.
    fn write(
        &mut self,
        values: &[(&'static ParameterDescriptor, Value)],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;

    fn state(&self) -> ConnectionState;

    /// How long an unused connection is kept open.
    fn idle_timeout(&self) -> Duration;

    /// Unsolicited updates, for transports that have any. Can be taken only once.
    fn take_pushes(&mut self) -> Option<mpsc::UnboundedReceiver<ReadResult>> {
        None
    }
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "connection::Args")]
pub struct Args {
    #[clap(flatten)]
    how: ConnectionGroup,

    /// The modbus unit ID.
    #[arg(long, default_value = "1")]
    unit_id: u8,

    /// The pass code of the cloud account the unit is registered with.
    #[arg(long, requires = "cloud")]
    passcode: Option<String>,

    /// The cloud WebSocket endpoint.
    #[arg(long, default_value = "wss://homesolutions.systemair.com/ws/")]
    cloud_url: String,

    /// The Z-Wave node ID of the unit.
    #[arg(long, default_value = "2")]
    zwave_node: u16,

    /// The MQTT topic prefix configured in zwave-js-ui.
    #[arg(long, default_value = "zwave")]
    zwave_prefix: String,

    /// The gateway name configured in zwave-js-ui.
    #[arg(long, default_value = "zwave-js-ui")]
    zwave_gateway: String,

    /// If a response isn't received in this amount of time, consider the request failed.
    #[arg(long, default_value = "5s")]
    response_timeout: humantime::Duration,

    /// The amount of additional time to wait after receiving a server busy exception.
    ///
    /// When busy, modbus proxies can respond with an exception code 6. Give the device
    /// this amount of time to finish its current work before retrying.
    #[arg(long, default_value = "25ms")]
    server_busy_retry_delay: humantime::Duration,
}

#[derive(clap::Parser, Clone, Debug)]
#[group(required = true, multiple = false)]
pub struct ConnectionGroup {
    /// Connect to the unit over Modbus TCP (e.g. available via the IAM v1 module).
    #[arg(long)]
    tcp: Option<String>,
    /// Connect to the unit over the Save Connect HTTP API.
    #[arg(long)]
    http: Option<reqwest::Url>,
    /// Connect to the unit through the IAM cloud. Specify the machine ID.
    #[arg(long)]
    cloud: Option<String>,
    /// Connect to the unit through a zwave-js-ui MQTT gateway. Specify the broker URL.
    #[arg(long)]
    zwave: Option<String>,
}

impl Args {
    /// A stable identity for the unit, used to scope persisted state.
    pub fn device_id(&self) -> String {
        match &self.how {
            ConnectionGroup { tcp: Some(address), .. } => format!("tcp:{address}"),
            ConnectionGroup { http: Some(url), .. } => {
                format!("http:{}", url.host_str().unwrap_or_default())
            }
            ConnectionGroup { cloud: Some(machine), .. } => format!("cloud:{machine}"),
            ConnectionGroup { zwave: Some(_), .. } => format!("zwave:{}", self.zwave_node),
            _ => String::from("unknown"),
        }
    }

    pub fn into_transport(self, idle_timeout: Option<Duration>) -> Result<AnyTransport, Error> {
        let response_timeout = *self.response_timeout;
        Ok(match self.how {
            ConnectionGroup { tcp: Some(address), .. } => {
                let mut transport = modbus_tcp::ModbusTcp::new(address, self.unit_id);
                transport.response_timeout = response_timeout;
                transport.server_busy_retry_delay = *self.server_busy_retry_delay;
                transport.idle_timeout = idle_timeout.unwrap_or(transport.idle_timeout);
                AnyTransport::ModbusTcp(transport)
            }
            ConnectionGroup { http: Some(url), .. } => {
                let mut transport = save_connect::SaveConnect::new(url, response_timeout)?;
                transport.idle_timeout = idle_timeout.unwrap_or(transport.idle_timeout);
                AnyTransport::SaveConnect(transport)
            }
            ConnectionGroup { cloud: Some(machine_id), .. } => {
                let passcode = self.passcode.unwrap_or_default();
                let mut transport = iam_cloud::IamCloud::new(self.cloud_url, machine_id, passcode);
                transport.response_timeout = response_timeout;
                transport.idle_timeout = idle_timeout.unwrap_or(transport.idle_timeout);
                AnyTransport::IamCloud(transport)
            }
            ConnectionGroup { zwave: Some(broker), .. } => {
                let options = zwave::Options {
                    broker,
                    prefix: self.zwave_prefix,
                    gateway: self.zwave_gateway,
                    node: self.zwave_node,
                };
                let mut transport = zwave::Zwave::new(options)?;
                transport.response_timeout = response_timeout;
                transport.idle_timeout = idle_timeout.unwrap_or(transport.idle_timeout);
                AnyTransport::Zwave(transport)
            }
            _ => return Err(Error::NoTransport),
        })
    }
}

/// The transport selected on the command line.
pub enum AnyTransport {
    ModbusTcp(modbus_tcp::ModbusTcp),
    SaveConnect(save_connect::SaveConnect),
    IamCloud(iam_cloud::IamCloud),
    Zwave(zwave::Zwave),
}

macro_rules! dispatch {
    ($self: ident, $t: ident => $e: expr) => {
        match $self {
            AnyTransport::ModbusTcp($t) => $e,
            AnyTransport::SaveConnect($t) => $e,
            AnyTransport::IamCloud($t) => $e,
            AnyTransport::Zwave($t) => $e,
        }
    };
}

impl Transport for AnyTransport {
    fn catalog(&self) -> &'static Catalog {
        dispatch!(self, t => t.catalog())
    }

    async fn connect(&mut self) -> Result<(), Error> {
        dispatch!(self, t => t.connect().await)
    }

    async fn read(
        &mut self,
        parameters: &[&'static ParameterDescriptor],
    ) -> Result<ReadResult, Error> {
        dispatch!(self, t => t.read(parameters).await)
    }

    async fn write(&mut self, values: &[(&'static ParameterDescriptor, Value)]) -> Result<(), Error> {
        dispatch!(self, t => t.write(values).await)
    }

    async fn close(&mut self) {
        dispatch!(self, t => t.close().await)
    }

    fn state(&self) -> ConnectionState {
        dispatch!(self, t => t.state())
    }

    fn idle_timeout(&self) -> Duration {
        dispatch!(self, t => t.idle_timeout())
    }

    fn take_pushes(&mut self) -> Option<mpsc::UnboundedReceiver<ReadResult>> {
        dispatch!(self, t => t.take_pushes())
    }
}
