//! The HTTP API of the Save Connect module.
//!
//! Both endpoints take a JSON object in the raw query string: `/mread?{"2000":1}` reads one
//! register at 0-based address 2000 and responds with `{"2000":215}`; `/mwrite?{"2000":220}`
//! writes it. Values spanning several registers ask for each of them with its own key.

use super::{ConnectionState, Error, ReadResult, Transport};
use crate::registers::{Address, Catalog, MODBUS, ParameterDescriptor, Value};
use std::time::Duration;
use tracing::{debug, trace, warn};

pub struct SaveConnect {
    base: reqwest::Url,
    client: reqwest::Client,
    pub idle_timeout: Duration,
    state: ConnectionState,
}

impl SaveConnect {
    pub fn new(base: reqwest::Url, timeout: Duration) -> Result<Self, Error> {
        if base.cannot_be_a_base() {
            return Err(Error::UrlCannotBeABase(base));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::CreateReqwest)?;
        Ok(Self { base, client, idle_timeout: Duration::from_secs(60), state: ConnectionState::Closed })
    }

    /// Units that have not been assigned an address yet report `x.x.x.xxx`.
    fn is_placeholder(&self) -> bool {
        self.base.host_str().is_some_and(|h| h.ends_with(".xxx"))
    }

    fn url(&self, endpoint: &'static str, query: &serde_json::Value) -> reqwest::Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(endpoint);
        }
        url.set_query(Some(&query.to_string()));
        url
    }

    async fn get(
        &self,
        endpoint: &'static str,
        query: &serde_json::Value,
    ) -> Result<serde_json::Map<String, serde_json::Value>, Error> {
        let url = self.url(endpoint, query);
        trace!(message = "requesting", %url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::Http(e, endpoint))?;
        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| Error::HttpJsonDecode(e, endpoint))?;
        match body {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(Error::ResponseIsntObject(endpoint)),
        }
    }
}

/// Register addresses on the wire are 0-based.
fn key(parameter: &ParameterDescriptor, offset: u16) -> Result<String, Error> {
    match parameter.address {
        Address::Register(r) if r > 0 => Ok((r - 1 + offset).to_string()),
        _ => Err(Error::UnsupportedAddress(parameter.id)),
    }
}

impl Transport for SaveConnect {
    fn catalog(&self) -> &'static Catalog {
        &MODBUS
    }

    async fn connect(&mut self) -> Result<(), Error> {
        if self.is_placeholder() {
            return Err(Error::PlaceholderAddress(self.base.to_string()));
        }
        if self.state == ConnectionState::Ready {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        match self.get("mread", &serde_json::json!({})).await {
            Ok(_) => {
                debug!(message = "connected", base = %self.base);
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    async fn read(
        &mut self,
        parameters: &[&'static ParameterDescriptor],
    ) -> Result<ReadResult, Error> {
        let mut query = serde_json::Map::new();
        for parameter in parameters {
            for offset in 0..u16::from(parameter.data_type.words()) {
                query.insert(key(parameter, offset)?, serde_json::json!(1));
            }
        }
        let response = self.get("mread", &serde_json::Value::Object(query)).await?;
        let mut result = ReadResult::poll();
        'parameters: for parameter in parameters {
            let mut words = Vec::with_capacity(usize::from(parameter.data_type.words()));
            for offset in 0..u16::from(parameter.data_type.words()) {
                let key = key(parameter, offset)?;
                let Some(raw) = response.get(&key).and_then(serde_json::Value::as_i64) else {
                    warn!(
                        message = "register value missing or not an integer",
                        id = parameter.id,
                        key,
                        value = ?response.get(&key)
                    );
                    continue 'parameters;
                };
                // Signed registers are reported as negative numbers.
                words.push(raw as i16 as u16);
            }
            if let Some(value) = parameter.decode_words(&words) {
                result.values.insert(parameter.id, value);
            }
        }
        Ok(result)
    }

    async fn write(&mut self, values: &[(&'static ParameterDescriptor, Value)]) -> Result<(), Error> {
        let mut query = serde_json::Map::new();
        for (parameter, value) in values {
            let raw = parameter.encode(value).map_err(Error::Encode)?;
            query.insert(key(parameter, 0)?, serde_json::json!(raw));
        }
        debug!(message = "writing", values = ?query);
        self.get("mwrite", &serde_json::Value::Object(query)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_is_raw_json() {
        let base = reqwest::Url::parse("http://192.168.1.20/").unwrap();
        let transport = SaveConnect::new(base, Duration::from_secs(1)).unwrap();
        let url = transport.url("mread", &serde_json::json!({"2000": 1}));
        assert_eq!(url.path(), "/mread");
        assert_eq!(url.query(), Some("{%222000%22:1}"));
    }

    #[tokio::test]
    async fn placeholder_addresses_never_connect() {
        let base = reqwest::Url::parse("http://192.168.1.xxx/").unwrap();
        let mut transport = SaveConnect::new(base, Duration::from_secs(1)).unwrap();
        let error = transport.connect().await.unwrap_err();
        assert!(matches!(error, Error::PlaceholderAddress(_)));
        assert_eq!(error.kind(), super::super::ErrorKind::Connection { retryable: false });
    }
}
