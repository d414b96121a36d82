//! The per-device command queue.
//!
//! All traffic towards a unit goes through a single worker task that owns the transport and
//! executes one operation at a time, in the order they were enqueued. The worker connects on
//! demand, and closes the connection once it has been idle for the transport's idle timeout.

use crate::connection::{self, ConnectionState, ErrorKind, ReadResult, Transport};
use crate::registers::{Catalog, ParameterDescriptor, Value};
use std::pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, trace, warn};

/// Consecutive I/O failures after which the connection is discarded.
pub const MAX_CONSECUTIVE_ERRORS: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("the command queue has shut down")]
    Closed,
    #[error("the transport operation failed")]
    Transport(#[source] connection::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Closed => ErrorKind::Connection { retryable: false },
            Error::Transport(e) => e.kind(),
        }
    }
}

#[derive(Debug)]
enum Operation {
    Read(Vec<&'static ParameterDescriptor>),
    Write(Vec<(&'static ParameterDescriptor, Value)>),
    /// Drop the connection; the next operation reconnects.
    Reset,
    IdleTimeout(Option<Duration>),
}

enum Outcome {
    Read(ReadResult),
    Done,
}

struct Pending {
    operation: Operation,
    done: oneshot::Sender<Result<Outcome, connection::Error>>,
}

/// Handle for enqueueing operations. Cheap to clone.
#[derive(Clone)]
pub struct Queue {
    catalog: &'static Catalog,
    sender: mpsc::UnboundedSender<Pending>,
    state: watch::Receiver<ConnectionState>,
}

impl Queue {
    /// Start the worker. The queue stops when the returned handle is dropped.
    ///
    /// `idle_timeout` overrides the transport's own.
    pub fn spawn<T: Transport>(
        transport: T,
        idle_timeout: Option<Duration>,
    ) -> (Queue, AbortOnDropHandle<()>) {
        let (sender, jobs) = mpsc::unbounded_channel();
        let (state_sender, state) = watch::channel(transport.state());
        let catalog = transport.catalog();
        let worker =
            Worker { transport, state: state_sender, idle_timeout, consecutive_errors: 0 };
        let handle = AbortOnDropHandle::new(tokio::spawn(worker.main_loop(jobs)));
        (Queue { catalog, sender, state }, handle)
    }

    pub fn catalog(&self) -> &'static Catalog {
        self.catalog
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn enqueue(&self, operation: Operation) -> Result<Outcome, Error> {
        let (done, completion) = oneshot::channel();
        self.sender.send(Pending { operation, done }).map_err(|_| Error::Closed)?;
        completion.await.map_err(|_| Error::Closed)?.map_err(Error::Transport)
    }

    pub async fn read(&self, parameters: Vec<&'static ParameterDescriptor>) -> Result<ReadResult, Error> {
        match self.enqueue(Operation::Read(parameters)).await? {
            Outcome::Read(result) => Ok(result),
            Outcome::Done => Ok(ReadResult::poll()),
        }
    }

    pub async fn write(&self, values: Vec<(&'static ParameterDescriptor, Value)>) -> Result<(), Error> {
        self.enqueue(Operation::Write(values)).await.map(drop)
    }

    pub async fn reset(&self) -> Result<(), Error> {
        self.enqueue(Operation::Reset).await.map(drop)
    }

    /// Applies from the next operation on. `None` restores the transport's own timeout.
    pub async fn set_idle_timeout(&self, idle_timeout: Option<Duration>) -> Result<(), Error> {
        self.enqueue(Operation::IdleTimeout(idle_timeout)).await.map(drop)
    }
}

struct Worker<T> {
    transport: T,
    state: watch::Sender<ConnectionState>,
    idle_timeout: Option<Duration>,
    consecutive_errors: usize,
}

impl<T: Transport> Worker<T> {
    async fn main_loop(mut self, mut jobs: mpsc::UnboundedReceiver<Pending>) {
        let mut idle = pin::pin!(tokio::time::sleep_until(Instant::now()));
        let mut idle_armed = false;
        loop {
            tokio::select! {
                biased;
                job = jobs.recv() => {
                    let Some(Pending { operation, done }) = job else { break };
                    trace!(message = "executing", ?operation);
                    let result = self.execute(operation).await;
                    idle_armed = self.transport.state() != ConnectionState::Closed;
                    if idle_armed {
                        let timeout = self.idle_timeout.unwrap_or_else(|| self.transport.idle_timeout());
                        idle.as_mut().reset(Instant::now() + timeout);
                    }
                    self.publish_state();
                    if done.send(result).is_err() {
                        debug!("the caller went away before the operation completed");
                    }
                }
                _ = &mut idle, if idle_armed => {
                    idle_armed = false;
                    info!("closing the idle connection");
                    self.transport.close().await;
                    self.publish_state();
                }
            }
        }
        self.transport.close().await;
        self.publish_state();
    }

    fn publish_state(&self) {
        self.state.send_replace(self.transport.state());
    }

    async fn execute(&mut self, operation: Operation) -> Result<Outcome, connection::Error> {
        match operation {
            Operation::Reset => {
                self.transport.close().await;
                self.consecutive_errors = 0;
                return Ok(Outcome::Done);
            }
            Operation::IdleTimeout(timeout) => {
                self.idle_timeout = timeout;
                return Ok(Outcome::Done);
            }
            Operation::Read(_) | Operation::Write(_) => {}
        }
        if let Err(e) = self.transport.connect().await {
            self.transport.close().await;
            return Err(e);
        }
        self.publish_state();
        let result = match operation {
            Operation::Read(parameters) => self.transport.read(&parameters).await.map(Outcome::Read),
            Operation::Write(values) => self.transport.write(&values).await.map(|()| Outcome::Done),
            Operation::Reset | Operation::IdleTimeout(_) => Ok(Outcome::Done),
        };
        match &result {
            Ok(_) => self.consecutive_errors = 0,
            Err(e) => match e.kind() {
                ErrorKind::Io => {
                    self.consecutive_errors += 1;
                    if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        warn!(
                            message = "too many consecutive errors, discarding the connection",
                            errors = self.consecutive_errors
                        );
                        self.consecutive_errors = 0;
                        self.transport.close().await;
                    }
                }
                ErrorKind::Connection { .. } => self.transport.close().await,
                ErrorKind::Decode => {}
            },
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::connection::memory::{Call, Failure, Memory};
    use crate::registers::{MODBUS, Role};

    #[tokio::test(start_paused = true)]
    async fn operations_never_overlap() {
        let (transport, unit) = Memory::new(&MODBUS);
        unit.set_latency(Duration::from_millis(100));
        unit.set("REG_TC_SP", Value::Number(21.0));
        let (queue, _worker) = Queue::spawn(transport, None);
        let target = MODBUS.by_role(Role::TargetTemperature).unwrap();
        let operations = (0..8).map(|i| {
            let queue = queue.clone();
            async move {
                if i % 2 == 0 {
                    queue.read(vec![target]).await.map(drop)
                } else {
                    queue.write(vec![(target, Value::Number(20.0 + f64::from(i)))]).await
                }
            }
        });
        for result in futures::future::join_all(operations).await {
            result.unwrap();
        }
        assert_eq!(unit.max_in_flight(), 1);
        let calls = unit.calls();
        assert_eq!(calls.first(), Some(&Call::Connect));
        assert_eq!(calls.iter().filter(|c| **c == Call::Connect).count(), 1);
        // FIFO: the last write wins.
        assert_eq!(unit.get("REG_TC_SP"), Some(Value::Number(27.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_block_the_queue() {
        let (transport, unit) = Memory::new(&MODBUS);
        let (queue, _worker) = Queue::spawn(transport, None);
        let target = MODBUS.by_role(Role::TargetTemperature).unwrap();
        unit.fail_next(Failure::Refused);
        let error = queue.read(vec![target]).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Connection { retryable: true });
        unit.fail_next(Failure::Io);
        assert_eq!(queue.read(vec![target]).await.unwrap_err().kind(), ErrorKind::Io);
        assert!(queue.read(vec![target]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connections_are_closed() {
        let (transport, unit) = Memory::new(&MODBUS);
        let (queue, _worker) = Queue::spawn(transport, None);
        let target = MODBUS.by_role(Role::TargetTemperature).unwrap();
        queue.read(vec![target]).await.unwrap();
        assert_eq!(queue.connection_state(), ConnectionState::Ready);
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(queue.connection_state(), ConnectionState::Ready);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.connection_state(), ConnectionState::Closed);
        assert_eq!(unit.calls().last(), Some(&Call::Close));
        // Reconnects transparently.
        queue.read(vec![target]).await.unwrap();
        assert_eq!(unit.calls().iter().filter(|c| **c == Call::Connect).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_can_be_overridden() {
        let (transport, _unit) = Memory::new(&MODBUS);
        let (queue, _worker) = Queue::spawn(transport, Some(Duration::from_secs(5)));
        let target = MODBUS.by_role(Role::TargetTemperature).unwrap();
        queue.read(vec![target]).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.connection_state(), ConnectionState::Closed);
        queue.set_idle_timeout(None).await.unwrap();
        queue.read(vec![target]).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(queue.connection_state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_io_errors_force_a_reconnect() {
        let (transport, unit) = Memory::new(&MODBUS);
        let (queue, _worker) = Queue::spawn(transport, None);
        let target = MODBUS.by_role(Role::TargetTemperature).unwrap();
        for _ in 0..MAX_CONSECUTIVE_ERRORS {
            unit.fail_next(Failure::Io);
            assert!(queue.read(vec![target]).await.is_err());
        }
        assert_eq!(queue.connection_state(), ConnectionState::Closed);
        queue.read(vec![target]).await.unwrap();
        assert_eq!(unit.calls().iter().filter(|c| **c == Call::Connect).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_drops_the_connection() {
        let (transport, unit) = Memory::new(&MODBUS);
        let (queue, worker) = Queue::spawn(transport, None);
        let target = MODBUS.by_role(Role::TargetTemperature).unwrap();
        queue.read(vec![target]).await.unwrap();
        queue.reset().await.unwrap();
        assert_eq!(queue.connection_state(), ConnectionState::Closed);
        drop(worker);
        assert!(matches!(queue.read(vec![target]).await, Err(Error::Closed)));
        assert!(unit.calls().contains(&Call::Close));
    }
}
