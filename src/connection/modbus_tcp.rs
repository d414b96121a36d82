use super::{ConnectionState, Error, ReadResult, Transport};
use crate::modbus::{ModbusTCPCodec, Operation, Request, Response, ResponseKind};
use crate::registers::{Address, Catalog, MODBUS, ParameterDescriptor, Value};
use futures::{SinkExt as _, StreamExt as _};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

type TcpIo = Framed<TcpStream, ModbusTCPCodec>;

/// How many times a request is re-sent when the IAM reports being busy.
const SERVER_BUSY_RETRIES: usize = 5;

/// Modbus-TCP as exposed by the IAM v1 module (port 502).
pub struct ModbusTcp {
    address: String,
    unit_id: u8,
    pub response_timeout: Duration,
    pub server_busy_retry_delay: Duration,
    pub idle_timeout: Duration,
    io: Option<TcpIo>,
    state: ConnectionState,
    transaction_id: u16,
}

impl ModbusTcp {
    pub fn new(address: String, unit_id: u8) -> Self {
        let address = if address.contains(':') { address } else { format!("{address}:502") };
        Self {
            address,
            unit_id,
            response_timeout: Duration::from_millis(5000),
            server_busy_retry_delay: Duration::from_millis(25),
            idle_timeout: Duration::from_secs(60),
            io: None,
            state: ConnectionState::Closed,
            transaction_id: 0,
        }
    }

    async fn open(&mut self) -> Result<TcpIo, Error> {
        let address = &self.address;
        info!(message = "connecting...", address);
        let addresses = tokio::net::lookup_host(address)
            .await
            .map_err(|e| Error::LookupHost(e, address.clone()))?
            .collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        let socket = tokio::time::timeout(self.response_timeout, TcpStream::connect(&*addresses))
            .await
            .map_err(|_| Error::ConnectTimeout(address.clone()))?
            .map_err(|e| Error::Connect(e, address.clone()))?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        info!(message = "connected", address);
        Ok(Framed::new(socket, ModbusTCPCodec {}))
    }

    /// Send one request and wait for its response, retrying `Server Busy` exceptions.
    async fn transact(&mut self, operation: Operation) -> Result<Response, Error> {
        let Some(io) = self.io.as_mut() else {
            return Err(Error::NotConnected);
        };
        let mut attempt = 0;
        loop {
            self.transaction_id = self.transaction_id.wrapping_add(1);
            let transaction_id = self.transaction_id;
            let request = Request { unit_id: self.unit_id, transaction_id, operation };
            io.send(&request).await.map_err(Error::Send)?;
            let response = tokio::time::timeout(self.response_timeout, async {
                loop {
                    match io.next().await {
                        None => return Err(Error::ConnectionClosed),
                        Some(Err(e)) => return Err(Error::Receive(e)),
                        Some(Ok(r)) if r.transaction_id == transaction_id => return Ok(r),
                        Some(Ok(r)) => {
                            debug!(
                                message = "a response we were not expecting",
                                transaction = r.transaction_id
                            );
                        }
                    }
                }
            })
            .await
            .map_err(|_| Error::ResponseTimeout(self.response_timeout))??;
            if response.is_server_busy() && attempt < SERVER_BUSY_RETRIES {
                attempt += 1;
                trace!(message = "server busy, retrying", transaction_id, attempt);
                tokio::time::sleep(self.server_busy_retry_delay).await;
                continue;
            }
            if let Some(code) = response.exception_code() {
                return Err(Error::Exception(code));
            }
            return Ok(response);
        }
    }
}

fn register(parameter: &ParameterDescriptor) -> Result<u16, Error> {
    match parameter.address {
        Address::Register(r) => Ok(r),
        _ => Err(Error::UnsupportedAddress(parameter.id)),
    }
}

impl Transport for ModbusTcp {
    fn catalog(&self) -> &'static Catalog {
        &MODBUS
    }

    async fn connect(&mut self) -> Result<(), Error> {
        if self.io.is_some() {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        match self.open().await {
            Ok(io) => {
                self.io = Some(io);
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
        let mut result = ReadResult::poll();
        for parameter in parameters {
            let address = register(parameter)?;
            let count = u16::from(parameter.data_type.words());
            let values = match self.transact(Operation::GetHoldings { address, count }).await {
                Ok(Response { kind: ResponseKind::GetHoldings { values }, .. }) => values,
                Ok(_) => {
                    warn!(message = "unexpected response, skipping", id = parameter.id);
                    continue;
                }
                Err(e) if e.concerns_one_parameter() => {
                    warn!(message = "unit refused the read, skipping", id = parameter.id, error = (&e as &dyn std::error::Error));
                    continue;
                }
                Err(e) => return Err(e),
            };
            match parameter.decode_words(&values) {
                Some(value) => {
                    trace!(message = "read", id = parameter.id, %value);
                    result.values.insert(parameter.id, value);
                }
                None => warn!(message = "short read", id = parameter.id, words = values.len()),
            }
        }
        Ok(result)
    }

    async fn write(&mut self, values: &[(&'static ParameterDescriptor, Value)]) -> Result<(), Error> {
        for (parameter, value) in values {
            let address = register(parameter)?;
            let raw = parameter.encode(value).map_err(Error::Encode)?;
            let word = parameter.to_register(raw);
            debug!(message = "writing", id = parameter.id, address, word);
            let response = self.transact(Operation::SetHolding { address, value: word }).await?;
            if !matches!(response.kind, ResponseKind::SetHolding { .. }) {
                return Err(Error::UnexpectedResponse(parameter.id));
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut io) = self.io.take() {
            if let Err(e) = io.close().await {
                debug!(message = "closing the socket failed", error = (&e as &dyn std::error::Error));
            }
            info!(message = "disconnected", address = self.address);
        }
        self.state = ConnectionState::Closed;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}
