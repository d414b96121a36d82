//! A simulated unit, for tests and dry runs.
//!
//! The [`Memory`] transport serves reads out of, and applies writes to, a shared [`Unit`]. The
//! unit records every call made against it and can be told to fail upcoming calls.

use super::{ConnectionState, Error, Origin, ReadResult, Transport};
use crate::registers::{Catalog, ParameterDescriptor, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Connect,
    Read(Vec<&'static str>),
    Write(Vec<(&'static str, Value)>),
    Close,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    /// The next connection attempt is refused.
    Refused,
    /// The next connection attempt is rejected for good, like a wrong password.
    Rejected,
    /// The next read or write fails mid-way.
    Io,
}

#[derive(Default)]
struct State {
    values: BTreeMap<&'static str, Value>,
    calls: Vec<Call>,
    failures: VecDeque<Failure>,
    latency: Duration,
    in_flight: usize,
    max_in_flight: usize,
}

/// Handle to the simulated unit behind a [`Memory`] transport.
#[derive(Clone)]
pub struct Unit {
    state: Arc<Mutex<State>>,
    pushes: mpsc::UnboundedSender<ReadResult>,
}

impl Unit {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, id: &'static str, value: Value) {
        self.lock().values.insert(id, value);
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.lock().values.get(id).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Only the writes, flattened.
    pub fn writes(&self) -> Vec<(&'static str, Value)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Write(values) => Some(values.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn fail_next(&self, failure: Failure) {
        self.lock().failures.push_back(failure);
    }

    /// How long every read and write takes.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// The largest number of reads and writes that were ever executing at once.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Deliver an unsolicited update as if the unit had sent it.
    pub fn push(&self, values: impl IntoIterator<Item = (&'static str, Value)>, asked_by_client: bool) {
        let result = ReadResult {
            values: values.into_iter().collect(),
            origin: Origin::Push { asked_by_client },
        };
        let _ = self.pushes.send(result);
    }

    fn take_failure(&self, wanted: impl Fn(Failure) -> bool) -> Option<Failure> {
        let mut state = self.lock();
        let failure = *state.failures.front()?;
        wanted(failure).then(|| state.failures.pop_front()).flatten()
    }

    async fn busy<R>(&self, call: Call, f: impl FnOnce(&mut State) -> R) -> R {
        let latency = {
            let mut state = self.lock();
            state.calls.push(call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.latency
        };
        tokio::time::sleep(latency).await;
        let mut state = self.lock();
        state.in_flight -= 1;
        f(&mut state)
    }
}

pub struct Memory {
    catalog: &'static Catalog,
    unit: Unit,
    state: ConnectionState,
    pub idle_timeout: Duration,
    pushes: Option<mpsc::UnboundedReceiver<ReadResult>>,
}

impl Memory {
    pub fn new(catalog: &'static Catalog) -> (Self, Unit) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let unit = Unit { state: Default::default(), pushes: sender };
        let memory = Self {
            catalog,
            unit: unit.clone(),
            state: ConnectionState::Closed,
            idle_timeout: Duration::from_secs(60),
            pushes: Some(receiver),
        };
        (memory, unit)
    }
}

impl Transport for Memory {
    fn catalog(&self) -> &'static Catalog {
        self.catalog
    }

    async fn connect(&mut self) -> Result<(), Error> {
        if self.state == ConnectionState::Ready {
            return Ok(());
        }
        self.unit.lock().calls.push(Call::Connect);
        match self.unit.take_failure(|f| f != Failure::Io) {
            Some(Failure::Refused) => {
                let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
                Err(Error::Connect(refused, "memory".into()))
            }
            Some(_) => Err(Error::LoginRejected("WRONG_PASSWORD".into())),
            None => {
                self.state = ConnectionState::Ready;
                Ok(())
            }
        }
    }

    async fn read(
        &mut self,
        parameters: &[&'static ParameterDescriptor],
    ) -> Result<ReadResult, Error> {
        if self.state != ConnectionState::Ready {
            return Err(Error::NotConnected);
        }
        let ids = parameters.iter().map(|p| p.id).collect::<Vec<_>>();
        let failure = self.unit.take_failure(|f| f == Failure::Io);
        self.unit
            .busy(Call::Read(ids.clone()), |state| {
                if failure.is_some() {
                    return Err(Error::ResponseTimeout(Duration::ZERO));
                }
                let mut result = ReadResult::poll();
                for id in ids {
                    if let Some(value) = state.values.get(id) {
                        result.values.insert(id, value.clone());
                    }
                }
                Ok(result)
            })
            .await
    }

    async fn write(&mut self, values: &[(&'static ParameterDescriptor, Value)]) -> Result<(), Error> {
        if self.state != ConnectionState::Ready {
            return Err(Error::NotConnected);
        }
        let mut written = Vec::with_capacity(values.len());
        for (parameter, value) in values {
            let raw = parameter.encode(value).map_err(Error::Encode)?;
            written.push((parameter.id, parameter.decode_raw(raw)));
        }
        let failure = self.unit.take_failure(|f| f == Failure::Io);
        self.unit
            .busy(Call::Write(written.clone()), |state| {
                if failure.is_some() {
                    return Err(Error::ResponseTimeout(Duration::ZERO));
                }
                state.values.extend(written);
                Ok(())
            })
            .await
    }

    async fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.unit.lock().calls.push(Call::Close);
        }
        self.state = ConnectionState::Closed;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn take_pushes(&mut self) -> Option<mpsc::UnboundedReceiver<ReadResult>> {
        self.pushes.take()
    }
}
