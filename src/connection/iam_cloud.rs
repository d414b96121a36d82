//! The IAM cloud WebSocket API.
//!
//! A session starts with a `LOGIN` message that the cloud answers with `LOGGED_IN` (or an
//! `ERROR`). Afterwards `READ` requests are answered by `READ` replies, `WRITE`s are
//! fire-and-forget, and the cloud sends `VALUE_CHANGED` whenever a parameter changes, including
//! changes caused by our own writes (those carry `askedByClient`).

use super::{ConnectionState, Error, Origin, ReadResult, Transport};
use crate::registers::{CLOUD, Catalog, Kind, ParameterDescriptor, Value};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use serde_json::Map;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, trace, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Values = Map<String, serde_json::Value>;

/// `ERROR` types that mean logging in will not succeed until the configuration changes.
const LOGIN_ERRORS: &[&str] = &["UNIT_NOT_CONNECTED", "ACCESS_DENIED_SEVERE", "WRONG_PASSWORD"];

#[derive(serde::Serialize, Debug)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
enum Outgoing<'a> {
    Login { machine_id: &'a str, pass_code: &'a str, session_client_id: String },
    Read { ids_to_read: Vec<&'static str> },
    Write { values_to_write: Values },
}

#[derive(serde::Deserialize, Debug)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
enum Incoming {
    LoggedIn,
    Error {
        #[serde(default)]
        error_type_id: Option<String>,
    },
    Read {
        #[serde(default)]
        read_values: Values,
    },
    ValueChanged {
        #[serde(default)]
        changed_values: Values,
        #[serde(default)]
        asked_by_client: bool,
    },
    IdValidation,
    ParamFileMappings,
    #[serde(other)]
    Unknown,
}

struct Session {
    sink: SplitSink<Socket, Message>,
    replies: mpsc::UnboundedReceiver<Values>,
    reader: AbortOnDropHandle<()>,
}

pub struct IamCloud {
    url: String,
    machine_id: String,
    passcode: String,
    pub response_timeout: Duration,
    pub idle_timeout: Duration,
    session: Option<Session>,
    connecting: bool,
    sessions_opened: u32,
    pushes: mpsc::UnboundedSender<ReadResult>,
    pushes_receiver: Option<mpsc::UnboundedReceiver<ReadResult>>,
}

impl IamCloud {
    pub fn new(url: String, machine_id: String, passcode: String) -> Self {
        let (pushes, pushes_receiver) = mpsc::unbounded_channel();
        Self {
            url,
            machine_id,
            passcode,
            response_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
            session: None,
            connecting: false,
            sessions_opened: 0,
            pushes,
            pushes_receiver: Some(pushes_receiver),
        }
    }

    fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.reader.is_finished())
    }

    async fn login(&mut self) -> Result<Session, Error> {
        info!(message = "connecting...", url = self.url);
        let connecting = tokio_tungstenite::connect_async(self.url.as_str());
        let (socket, _) = tokio::time::timeout(self.response_timeout, connecting)
            .await
            .map_err(|_| Error::ConnectTimeout(self.url.clone()))?
            .map_err(|e| Error::WebSocketConnect(e, self.url.clone()))?;
        let (mut sink, mut stream) = socket.split();
        self.sessions_opened = self.sessions_opened.wrapping_add(1);
        let session_client_id = format!(
            "client-{}-{}",
            jiff::Timestamp::now().as_millisecond(),
            self.sessions_opened % 10000
        );
        let login = Outgoing::Login {
            machine_id: &self.machine_id,
            pass_code: &self.passcode,
            session_client_id,
        };
        send(&mut sink, &login).await?;
        let logged_in = tokio::time::timeout(self.response_timeout, async {
            while let Some(message) = stream.next().await {
                let Message::Text(text) = message.map_err(Error::WebSocket)? else {
                    continue;
                };
                match serde_json::from_str::<Incoming>(&text) {
                    Ok(Incoming::LoggedIn) => return Ok(()),
                    Ok(Incoming::Error { error_type_id: Some(error) })
                        if LOGIN_ERRORS.contains(&error.as_str()) =>
                    {
                        return Err(Error::LoginRejected(error));
                    }
                    Ok(other) => log_message(&other),
                    Err(e) => warn!(message = "undecodable message", %text, error = %e),
                }
            }
            Err(Error::ConnectionClosed)
        })
        .await
        .map_err(|_| Error::ResponseTimeout(self.response_timeout))
        .and_then(|r| r);
        if let Err(e) = logged_in {
            if let Err(close) = sink.close().await {
                debug!(message = "closing the socket failed", error = (&close as &dyn std::error::Error));
            }
            return Err(e);
        }
        info!(message = "logged in", machine_id = self.machine_id);
        let (reply_sender, replies) = mpsc::unbounded_channel();
        let reader = tokio::spawn(receive(stream, reply_sender, self.pushes.clone()));
        Ok(Session { sink, replies, reader: AbortOnDropHandle::new(reader) })
    }
}

async fn send(sink: &mut SplitSink<Socket, Message>, message: &Outgoing<'_>) -> Result<(), Error> {
    let text = serde_json::to_string(message).map_err(Error::Serialize)?;
    trace!(message = "sending", %text);
    sink.send(Message::Text(text)).await.map_err(Error::WebSocket)
}

fn log_message(incoming: &Incoming) {
    match incoming {
        Incoming::Error { .. } => warn!(message = "cloud reported an error", ?incoming),
        Incoming::Unknown => debug!("message of unknown type"),
        _ => debug!(message = "ignoring", ?incoming),
    }
}

fn decode(
    values: &Values,
    wanted: impl Fn(&ParameterDescriptor) -> bool,
    origin: Origin,
) -> ReadResult {
    let mut result = ReadResult { values: Default::default(), origin };
    for (id, value) in values {
        let Some(parameter) = CLOUD.get(id).filter(|p| wanted(p)) else {
            trace!(message = "value for an unknown parameter", id);
            continue;
        };
        match parameter.decode_json(value) {
            Some(v) => {
                result.values.insert(parameter.id, v);
            }
            None => warn!(message = "could not decode", id, ?value),
        }
    }
    result
}

async fn receive(
    mut stream: SplitStream<Socket>,
    replies: mpsc::UnboundedSender<Values>,
    pushes: mpsc::UnboundedSender<ReadResult>,
) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                info!(message = "closed by the cloud", ?frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(message = "receiving failed", error = (&e as &dyn std::error::Error));
                break;
            }
        };
        match serde_json::from_str::<Incoming>(&text) {
            Ok(Incoming::Read { read_values }) => {
                if replies.send(read_values).is_err() {
                    break;
                }
            }
            Ok(Incoming::ValueChanged { changed_values, asked_by_client }) => {
                let origin = Origin::Push { asked_by_client };
                let result = decode(&changed_values, |_| true, origin);
                if !result.values.is_empty() && pushes.send(result).is_err() {
                    debug!("nobody is listening for pushes");
                }
            }
            Ok(other) => log_message(&other),
            Err(e) => warn!(message = "undecodable message", %text, error = %e),
        }
    }
}

/// The cloud wants enumeration codes as strings.
fn to_wire(parameter: &ParameterDescriptor, raw: i64) -> serde_json::Value {
    match parameter.data_type.kind() {
        Kind::Enumeration => serde_json::Value::String(raw.to_string()),
        Kind::Boolean => serde_json::Value::Bool(raw != 0),
        Kind::Numeric => serde_json::Value::from(raw),
    }
}

impl Transport for IamCloud {
    fn catalog(&self) -> &'static Catalog {
        &CLOUD
    }

    async fn connect(&mut self) -> Result<(), Error> {
        if self.is_open() {
            return Ok(());
        }
        self.session = None;
        self.connecting = true;
        let session = self.login().await;
        self.connecting = false;
        self.session = Some(session?);
        Ok(())
    }

    async fn read(
        &mut self,
        parameters: &[&'static ParameterDescriptor],
    ) -> Result<ReadResult, Error> {
        let response_timeout = self.response_timeout;
        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotConnected);
        };
        // Drop replies to reads that timed out earlier.
        while session.replies.try_recv().is_ok() {}
        let ids_to_read = parameters.iter().map(|p| p.id).collect();
        send(&mut session.sink, &Outgoing::Read { ids_to_read }).await?;
        let values = tokio::time::timeout(response_timeout, session.replies.recv())
            .await
            .map_err(|_| Error::ResponseTimeout(response_timeout))?
            .ok_or(Error::ConnectionClosed)?;
        Ok(decode(&values, |p| parameters.iter().any(|w| w.id == p.id), Origin::Poll))
    }

    async fn write(&mut self, values: &[(&'static ParameterDescriptor, Value)]) -> Result<(), Error> {
        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotConnected);
        };
        let mut values_to_write = Values::new();
        for (parameter, value) in values {
            let raw = parameter.encode(value).map_err(Error::Encode)?;
            values_to_write.insert(parameter.id.to_string(), to_wire(parameter, raw));
        }
        debug!(message = "writing", values = ?values_to_write);
        send(&mut session.sink, &Outgoing::Write { values_to_write }).await
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.sink.close().await {
                debug!(message = "closing the socket failed", error = (&e as &dyn std::error::Error));
            }
            info!(message = "disconnected", machine_id = self.machine_id);
        }
    }

    fn state(&self) -> ConnectionState {
        if self.connecting {
            ConnectionState::Connecting
        } else if self.is_open() {
            ConnectionState::Ready
        } else {
            ConnectionState::Closed
        }
    }

    fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn take_pushes(&mut self) -> Option<mpsc::UnboundedReceiver<ReadResult>> {
        self.pushes_receiver.take()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registers::Role;
    use futures::{SinkExt as _, StreamExt as _};
    use serde_json::json;

    /// Serve one WebSocket session, answering each received message with `respond`.
    async fn fake_cloud(
        respond: impl Fn(serde_json::Value) -> Vec<serde_json::Value> + Send + 'static,
    ) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(socket).await.unwrap();
            while let Some(Ok(Message::Text(text))) = socket.next().await {
                for reply in respond(serde_json::from_str(&text).unwrap()) {
                    socket.send(Message::Text(reply.to_string())).await.unwrap();
                }
            }
        });
        format!("ws://{address}/ws/")
    }

    #[test]
    fn wire_shapes() {
        let login = Outgoing::Login {
            machine_id: "IAM1",
            pass_code: "0000",
            session_client_id: "client-1-2".into(),
        };
        assert_eq!(
            serde_json::to_value(&login).unwrap(),
            json!({"type": "LOGIN", "machineId": "IAM1", "passCode": "0000",
                   "sessionClientId": "client-1-2"})
        );
        let read = Outgoing::Read { ids_to_read: vec!["eco_mode"] };
        assert_eq!(
            serde_json::to_value(&read).unwrap(),
            json!({"type": "READ", "idsToRead": ["eco_mode"]})
        );
        let mode = CLOUD.mode_request().unwrap();
        let eco = CLOUD.by_role(Role::EcoMode).unwrap();
        let target = CLOUD.by_role(Role::TargetTemperature).unwrap();
        assert_eq!(to_wire(mode, 1), json!("1"));
        assert_eq!(to_wire(eco, 1), json!(true));
        assert_eq!(to_wire(target, 215), json!(215));
        let changed: Incoming = serde_json::from_value(json!({
            "type": "VALUE_CHANGED", "changedValues": {"eco_mode": true}, "askedByClient": true
        }))
        .unwrap();
        assert!(matches!(changed, Incoming::ValueChanged { asked_by_client: true, .. }));
        let other: Incoming = serde_json::from_value(json!({"type": "SOMETHING_NEW"})).unwrap();
        assert!(matches!(other, Incoming::Unknown));
    }

    #[tokio::test]
    async fn wrong_password_is_not_retryable() {
        let url = fake_cloud(|_| {
            vec![json!({"type": "ERROR", "errorTypeId": "WRONG_PASSWORD"})]
        })
        .await;
        let mut cloud = IamCloud::new(url, "IAM1".into(), "bad".into());
        let error = cloud.connect().await.unwrap_err();
        assert_eq!(error.kind(), super::super::ErrorKind::Connection { retryable: false });
        assert_eq!(cloud.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn login_read_and_push() {
        let url = fake_cloud(|message| match message["type"].as_str() {
            Some("LOGIN") => vec![json!({"type": "ID_VALIDATION"}), json!({"type": "LOGGED_IN"})],
            Some("READ") => vec![json!({
                "type": "READ",
                "readValues": {"main_user_mode": "3", "main_temperature_offset": 215, "bogus": 1}
            })],
            Some("WRITE") => vec![json!({
                "type": "VALUE_CHANGED",
                "changedValues": {"eco_mode": message["valuesToWrite"]["eco_mode"]},
                "askedByClient": true
            })],
            _ => vec![],
        })
        .await;
        let mut cloud = IamCloud::new(url, "IAM1".into(), "0000".into());
        let mut pushes = cloud.take_pushes().unwrap();
        assert!(cloud.take_pushes().is_none());
        cloud.connect().await.unwrap();
        assert_eq!(cloud.state(), ConnectionState::Ready);
        let parameters = [
            CLOUD.by_role(Role::UserMode).unwrap(),
            CLOUD.by_role(Role::TargetTemperature).unwrap(),
        ];
        let result = cloud.read(&parameters).await.unwrap();
        assert_eq!(result.values.get("main_user_mode"), Some(&Value::Number(3.0)));
        assert_eq!(result.values.get("main_temperature_offset"), Some(&Value::Number(21.5)));
        assert_eq!(result.values.len(), 2);
        let eco = CLOUD.by_role(Role::EcoMode).unwrap();
        cloud.write(&[(eco, Value::Boolean(true))]).await.unwrap();
        let push = pushes.recv().await.unwrap();
        assert_eq!(push.origin, Origin::Push { asked_by_client: true });
        assert_eq!(push.values.get("eco_mode"), Some(&Value::Boolean(true)));
        cloud.close().await;
        assert_eq!(cloud.state(), ConnectionState::Closed);
    }
}
