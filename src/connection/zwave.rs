//! Z-Wave through the MQTT gateway of zwave-js-ui.
//!
//! Values are published on `<prefix>/<node>/<cc>/<endpoint>/<property>[/<key>]`. The gateway's
//! API is reached by publishing `{"args": [...]}` to
//! `<prefix>/_CLIENTS/ZWAVE_GATEWAY-<name>/api/<method>/set`; the reply arrives on the same topic
//! without `/set`.
//!
//! zwave-js reports values in engineering units while the catalog describes raw integers, so
//! numbers are scaled on the way in and out.

use super::{ConnectionState, Error, Origin, ReadResult, Transport};
use crate::registers::{Address, Catalog, Kind, ParameterDescriptor, Value, ZWAVE};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, trace, warn};

#[derive(Clone, Debug)]
pub struct Options {
    /// `mqtt://host[:port]` or just `host[:port]`.
    pub broker: String,
    pub prefix: String,
    pub gateway: String,
    pub node: u16,
}

#[derive(serde::Deserialize, Debug)]
struct ApiReply {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

struct Session {
    client: AsyncClient,
    replies: mpsc::UnboundedReceiver<(String, ApiReply)>,
    events: AbortOnDropHandle<()>,
}

pub struct Zwave {
    options: Options,
    host: String,
    port: u16,
    pub response_timeout: Duration,
    pub idle_timeout: Duration,
    session: Option<Session>,
    connecting: bool,
    pushes: mpsc::UnboundedSender<ReadResult>,
    pushes_receiver: Option<mpsc::UnboundedReceiver<ReadResult>>,
}

impl Zwave {
    pub fn new(options: Options) -> Result<Self, Error> {
        let url = reqwest::Url::parse(&options.broker)
            .ok()
            .filter(|u| u.has_host())
            .or_else(|| reqwest::Url::parse(&format!("mqtt://{}", options.broker)).ok())
            .ok_or_else(|| Error::BrokerAddress(options.broker.clone()))?;
        let host = url.host_str().ok_or_else(|| Error::BrokerAddress(options.broker.clone()))?;
        let (pushes, pushes_receiver) = mpsc::unbounded_channel();
        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(1883),
            options,
            response_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(120),
            session: None,
            connecting: false,
            pushes,
            pushes_receiver: Some(pushes_receiver),
        })
    }

    fn api_topic(&self) -> String {
        format!("{}/_CLIENTS/ZWAVE_GATEWAY-{}/api", self.options.prefix, self.options.gateway)
    }

    fn values_topic(&self) -> String {
        format!("{}/{}", self.options.prefix, self.options.node)
    }

    fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.events.is_finished())
    }

    async fn open(&mut self) -> Result<Session, Error> {
        let client_id = format!("systemair-save-driver-{}-{}", self.options.node, std::process::id());
        let mut mqtt_options = MqttOptions::new(client_id, &self.host, self.port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        info!(message = "connecting...", host = self.host, port = self.port);
        let (client, event_loop) = AsyncClient::new(mqtt_options, 16);
        let (connack_sender, connack) = oneshot::channel();
        let (reply_sender, replies) = mpsc::unbounded_channel();
        let router = Router {
            api_topic: self.api_topic(),
            values_topic: self.values_topic(),
            replies: reply_sender,
            pushes: self.pushes.clone(),
        };
        let events = tokio::spawn(router.run(event_loop, connack_sender));
        let events = AbortOnDropHandle::new(events);
        match tokio::time::timeout(self.response_timeout, connack).await {
            Err(_) => return Err(Error::ConnectTimeout(format!("{}:{}", self.host, self.port))),
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Ok(Ok(Err(e))) => return Err(Error::MqttConnection(e)),
            Ok(Ok(Ok(()))) => {}
        }
        for topic in [format!("{}/+", self.api_topic()), format!("{}/#", self.values_topic())] {
            client.subscribe(topic, QoS::AtMostOnce).await.map_err(Error::MqttClient)?;
        }
        info!(message = "connected", host = self.host);
        Ok(Session { client, replies, events })
    }

    /// Call a gateway API method and wait for its reply.
    async fn call(
        &mut self,
        method: &'static str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        let topic = format!("{}/{method}/set", self.api_topic());
        let response_timeout = self.response_timeout;
        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotConnected);
        };
        while session.replies.try_recv().is_ok() {}
        let payload = serde_json::json!({ "args": args }).to_string();
        trace!(message = "calling", topic, payload);
        session
            .client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(Error::MqttClient)?;
        let reply = tokio::time::timeout(response_timeout, async {
            while let Some((name, reply)) = session.replies.recv().await {
                if name == method {
                    return Ok(reply);
                }
            }
            Err(Error::ConnectionClosed)
        })
        .await
        .map_err(|_| Error::ResponseTimeout(response_timeout))??;
        if !reply.success {
            return Err(Error::GatewayApi(method, reply.message));
        }
        Ok(reply.result)
    }

    fn value_id(&self, parameter: &ParameterDescriptor) -> Result<serde_json::Value, Error> {
        let Address::ValueId { command_class, endpoint, property, property_key } = parameter.address
        else {
            return Err(Error::UnsupportedAddress(parameter.id));
        };
        let mut value_id = serde_json::json!({
            "nodeId": self.options.node,
            "commandClass": command_class,
            "endpoint": endpoint,
            "property": property,
        });
        if let Some(key) = property_key {
            value_id["propertyKey"] = match key.parse::<u64>() {
                Ok(n) => serde_json::Value::from(n),
                Err(_) => serde_json::Value::from(key),
            };
        }
        Ok(value_id)
    }
}

/// Routes incoming publishes to API replies and value pushes.
struct Router {
    api_topic: String,
    values_topic: String,
    replies: mpsc::UnboundedSender<(String, ApiReply)>,
    pushes: mpsc::UnboundedSender<ReadResult>,
}

impl Router {
    async fn run(
        self,
        mut event_loop: EventLoop,
        connack: oneshot::Sender<Result<(), ConnectionError>>,
    ) {
        let mut connack = Some(connack);
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if let Some(connack) = connack.take() {
                        let _ = connack.send(Ok(()));
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = String::from_utf8_lossy(&publish.topic);
                    self.route(&topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::Disconnect(_))) => {
                    info!("disconnected by the broker");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    match connack.take() {
                        Some(connack) => {
                            let _ = connack.send(Err(e));
                        }
                        None => warn!(message = "MQTT connection failed", error = %e),
                    }
                    break;
                }
            }
        }
    }

    fn route(&self, topic: &str, payload: &[u8]) {
        if let Some(method) = topic.strip_prefix(&self.api_topic).and_then(|t| t.strip_prefix('/')) {
            if method.ends_with("/set") {
                return;
            }
            match serde_json::from_slice::<ApiReply>(payload) {
                Ok(reply) => {
                    let _ = self.replies.send((method.to_string(), reply));
                }
                Err(e) => warn!(message = "undecodable API reply", topic, error = %e),
            }
            return;
        }
        let Some(suffix) = topic.strip_prefix(&self.values_topic).and_then(|t| t.strip_prefix('/'))
        else {
            trace!(message = "ignoring", topic);
            return;
        };
        let Some(parameter) = parameter_for(suffix) else {
            trace!(message = "value of an unknown property", suffix);
            return;
        };
        let Ok(payload) = serde_json::from_slice::<serde_json::Value>(payload) else {
            warn!(message = "undecodable value", topic);
            return;
        };
        // Either a bare value or `{"time": .., "value": ..}`.
        let value = payload.get("value").unwrap_or(&payload);
        let Some(value) = from_engineering(parameter, value) else {
            warn!(message = "could not decode", id = parameter.id, ?value);
            return;
        };
        let mut result = ReadResult {
            values: Default::default(),
            origin: Origin::Push { asked_by_client: false },
        };
        result.values.insert(parameter.id, value);
        if self.pushes.send(result).is_err() {
            debug!("nobody is listening for pushes");
        }
    }
}

fn parameter_for(suffix: &str) -> Option<&'static ParameterDescriptor> {
    ZWAVE.parameters.iter().find(|p| match p.address {
        Address::ValueId { command_class, endpoint, property, property_key } => {
            let mut parts = suffix.split('/');
            parts.next() == Some(command_class.to_string().as_str())
                && parts.next() == Some(endpoint.to_string().as_str())
                && parts.next() == Some(property)
                && parts.next() == property_key
                && parts.next().is_none()
        }
        _ => false,
    })
}

fn from_engineering(
    parameter: &ParameterDescriptor,
    value: &serde_json::Value,
) -> Option<Value> {
    match (parameter.data_type.kind(), value) {
        (Kind::Numeric, serde_json::Value::Number(n)) => {
            let raw = (n.as_f64()? * f64::from(parameter.data_type.scale())).round();
            Some(parameter.decode_raw(raw as i64))
        }
        _ => parameter.decode_json(value),
    }
}

fn to_engineering(parameter: &ParameterDescriptor, raw: i64) -> serde_json::Value {
    match parameter.data_type.kind() {
        Kind::Boolean => serde_json::Value::Bool(raw != 0),
        Kind::Enumeration => serde_json::Value::from(raw),
        Kind::Numeric => serde_json::Value::from(parameter.to_engineering(raw)),
    }
}

impl Transport for Zwave {
    fn catalog(&self) -> &'static Catalog {
        &ZWAVE
    }

    async fn connect(&mut self) -> Result<(), Error> {
        if self.is_open() {
            return Ok(());
        }
        self.session = None;
        self.connecting = true;
        let session = self.open().await;
        self.connecting = false;
        self.session = Some(session?);
        Ok(())
    }

    async fn read(
        &mut self,
        parameters: &[&'static ParameterDescriptor],
    ) -> Result<ReadResult, Error> {
        let mut result = ReadResult::poll();
        for parameter in parameters {
            let value_id = self.value_id(parameter)?;
            let value = match self.call("pollValue", serde_json::json!([value_id])).await {
                Ok(value) => value,
                Err(e) if e.concerns_one_parameter() => {
                    warn!(message = "gateway could not poll, skipping", id = parameter.id, error = (&e as &dyn std::error::Error));
                    continue;
                }
                Err(e) => return Err(e),
            };
            match from_engineering(parameter, &value) {
                Some(v) => {
                    result.values.insert(parameter.id, v);
                }
                None => debug!(message = "no value polled", id = parameter.id, ?value),
            }
        }
        Ok(result)
    }

    async fn write(&mut self, values: &[(&'static ParameterDescriptor, Value)]) -> Result<(), Error> {
        for (parameter, value) in values {
            let value_id = self.value_id(parameter)?;
            let raw = parameter.encode(value).map_err(Error::Encode)?;
            let value = to_engineering(parameter, raw);
            debug!(message = "writing", id = parameter.id, %value);
            self.call("writeValue", serde_json::json!([value_id, value])).await?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.client.disconnect().await {
                debug!(message = "disconnecting failed", error = %e);
            }
            info!(message = "disconnected", host = self.host);
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
    use serde_json::json;

    fn transport() -> Zwave {
        Zwave::new(Options {
            broker: "broker.local".into(),
            prefix: "zwave".into(),
            gateway: "zwave-js-ui".into(),
            node: 7,
        })
        .unwrap()
    }

    #[test]
    fn broker_addresses() {
        let zwave = transport();
        assert_eq!((zwave.host.as_str(), zwave.port), ("broker.local", 1883));
        let zwave = Zwave::new(Options { broker: "mqtt://10.0.0.3:1884".into(), ..zwave.options })
            .unwrap();
        assert_eq!((zwave.host.as_str(), zwave.port), ("10.0.0.3", 1884));
    }

    #[test]
    fn value_ids() {
        let zwave = transport();
        let target = ZWAVE.by_role(Role::TargetTemperature).unwrap();
        assert_eq!(
            zwave.value_id(target).unwrap(),
            json!({"nodeId": 7, "commandClass": 67, "endpoint": 0, "property": "setpoint",
                   "propertyKey": 1})
        );
        let alarm = ZWAVE.by_role(Role::Alarm).unwrap();
        assert_eq!(zwave.value_id(alarm).unwrap()["propertyKey"], json!("Sensor status"));
    }

    #[test]
    fn value_topics_become_pushes() {
        let zwave = transport();
        let (replies, _replies) = mpsc::unbounded_channel();
        let (pushes, mut received) = mpsc::unbounded_channel();
        let router = Router {
            api_topic: zwave.api_topic(),
            values_topic: zwave.values_topic(),
            replies,
            pushes,
        };
        router.route("zwave/7/67/0/setpoint/1", br#"{"time": 1, "value": 21.5}"#);
        router.route("zwave/7/64/0/mode", b"3");
        router.route("zwave/7/99/0/unknown", b"1");
        router.route("zwave/8/64/0/mode", b"1");
        let push = received.try_recv().unwrap();
        assert_eq!(push.values.get("target_temperature"), Some(&Value::Number(21.5)));
        assert_eq!(push.origin, Origin::Push { asked_by_client: false });
        let push = received.try_recv().unwrap();
        assert_eq!(push.values.get("mode"), Some(&Value::Number(3.0)));
        assert!(received.try_recv().is_err());
    }

    #[test]
    fn api_replies_are_routed_by_method() {
        let zwave = transport();
        let (replies, mut received) = mpsc::unbounded_channel();
        let (pushes, _pushes) = mpsc::unbounded_channel();
        let router = Router {
            api_topic: zwave.api_topic(),
            values_topic: zwave.values_topic(),
            replies,
            pushes,
        };
        router.route(
            "zwave/_CLIENTS/ZWAVE_GATEWAY-zwave-js-ui/api/writeValue/set",
            br#"{"args": []}"#,
        );
        router.route(
            "zwave/_CLIENTS/ZWAVE_GATEWAY-zwave-js-ui/api/writeValue",
            br#"{"success": false, "message": "node is dead"}"#,
        );
        let (method, reply) = received.try_recv().unwrap();
        assert_eq!(method, "writeValue");
        assert!(!reply.success);
        assert_eq!(reply.message, "node is dead");
        assert!(received.try_recv().is_err());
    }

    #[test]
    fn engineering_units() {
        let target = ZWAVE.by_role(Role::TargetTemperature).unwrap();
        let raw = target.encode(&Value::Number(22.5)).unwrap();
        assert_eq!(to_engineering(target, raw), json!(22.5));
        let boost = ZWAVE.by_role(Role::BoostSwitch).unwrap();
        assert_eq!(to_engineering(boost, 1), json!(true));
        assert_eq!(from_engineering(boost, &json!(false)), Some(Value::Boolean(false)));
    }
}
