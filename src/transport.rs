//! Modbus/TCP transport and connection lifecycle.
//!
//! The [`Transport`] trait is the seam between the hub and the network. The
//! production implementation, [`TcpTransport`], wraps a `tokio-modbus` client
//! context. [`Connection`] adds the connection state machine on top of any
//! transport:
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!       ^                        |                 |
//!       +-------- failure -------+---- disconnect -+
//! ```
//!
//! A `Connection` is not synchronized by itself. It is owned by the
//! [`RegisterGate`](crate::gate::RegisterGate), which serializes all access.

use crate::tokio_common::{Error, RegisterRequest, RequestKind, Result};
use async_trait::async_trait;
use std::{fmt, io, time::Duration};
use tokio_modbus::{client::Context, prelude::*, ExceptionCode, Slave};

/// Errors reported by a [`Transport`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket level failure, the connection is no longer usable.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The device answered with a Modbus exception response.
    #[error("Modbus exception: {0}")]
    Exception(ExceptionCode),

    /// The response could not be parsed or did not match the request.
    #[error("{0}")]
    Protocol(String),
}

pub(crate) type TransportResult<T> = std::result::Result<T, TransportError>;

/// A Modbus client able to reach every unit id behind one TCP endpoint.
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Opens the socket. Called only while disconnected.
    async fn connect(&mut self, host: &str, port: u16) -> io::Result<()>;

    /// Closes the socket. Called while connected, or after a connect attempt
    /// that did not finish in time.
    async fn disconnect(&mut self) -> io::Result<()>;

    /// Function code 0x03.
    async fn read_holding_registers(&mut self, unit_id: u8, address: u16, count: u16) -> TransportResult<Vec<u16>>;

    /// Function code 0x10.
    async fn write_multiple_registers(&mut self, unit_id: u8, address: u16, words: &[u16]) -> TransportResult<()>;

    /// Function code 0x06.
    async fn write_single_register(&mut self, unit_id: u8, address: u16, word: u16) -> TransportResult<()>;
}

/// `tokio-modbus` backed TCP transport.
#[derive(Default)]
pub struct TcpTransport {
    ctx: Option<Context>,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("connected", &self.ctx.is_some())
            .finish()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn context(&mut self, unit_id: u8) -> io::Result<&mut Context> {
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "Modbus client is not connected"))?;
        ctx.set_slave(Slave(unit_id));
        Ok(ctx)
    }

    /// Helper function to map tokio result to our result.
    fn map_tokio_result<T>(result: tokio_modbus::Result<T>) -> TransportResult<T> {
        match result {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(code)) => Err(TransportError::Exception(code)),
            Err(tokio_modbus::Error::Transport(err)) if err.kind() == io::ErrorKind::InvalidData => {
                Err(TransportError::Protocol(err.to_string()))
            }
            Err(tokio_modbus::Error::Transport(err)) => Err(TransportError::Io(err)),
            Err(err) => Err(TransportError::Protocol(err.to_string())),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        let socket_addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("Cannot resolve host {host}")))?;
        // The unit id is replaced before every request.
        self.ctx = Some(tokio_modbus::client::tcp::connect_slave(socket_addr, Slave(1)).await?);
        Ok(())
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        match self.ctx.take() {
            Some(mut ctx) => match ctx.disconnect().await {
                Ok(_) => Ok(()),
                Err(err) => Err(io::Error::other(err.to_string())),
            },
            None => Ok(()),
        }
    }

    async fn read_holding_registers(&mut self, unit_id: u8, address: u16, count: u16) -> TransportResult<Vec<u16>> {
        let ctx = self.context(unit_id)?;
        Self::map_tokio_result(ctx.read_holding_registers(address, count).await)
    }

    async fn write_multiple_registers(&mut self, unit_id: u8, address: u16, words: &[u16]) -> TransportResult<()> {
        let ctx = self.context(unit_id)?;
        Self::map_tokio_result(ctx.write_multiple_registers(address, words).await)
    }

    async fn write_single_register(&mut self, unit_id: u8, address: u16, word: u16) -> TransportResult<()> {
        let ctx = self.context(unit_id)?;
        Self::map_tokio_result(ctx.write_single_register(address, word).await)
    }
}

/// When the socket is opened and closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Keep the socket open between operations.
    Persistent,
    /// Open before and close after every operation.
    PerOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Function code used for writes of a single register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WriteShape {
    /// Always use Write Multiple Registers (0x10).
    #[default]
    Multiple,
    /// Use Write Single Register (0x06) when the payload is one register.
    SingleWhenPossible,
}

/// A transport together with its endpoint and connection state.
#[derive(Debug)]
pub struct Connection {
    host: String,
    port: u16,
    mode: ConnectMode,
    state: ConnectionState,
    transport: Box<dyn Transport>,
}

impl Connection {
    pub fn new(host: impl Into<String>, port: u16, mode: ConnectMode, transport: Box<dyn Transport>) -> Self {
        Self {
            host: host.into(),
            port,
            mode,
            state: ConnectionState::Disconnected,
            transport,
        }
    }

    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn mode(&self) -> ConnectMode {
        self.mode
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Opens the socket if it is not open yet, giving up after `limit`.
    ///
    /// # Errors
    ///
    /// * `Error::ConnectFailed` if the endpoint cannot be resolved, refuses
    ///   the connection or does not answer within `limit`. The state returns
    ///   to `Disconnected`.
    pub async fn connect(&mut self, limit: Duration) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        let result = match tokio::time::timeout(limit, self.transport.connect(&self.host, self.port)).await {
            Ok(result) => result,
            Err(_) => {
                // Drop whatever the transport set up before it stalled.
                if let Err(err) = self.transport.disconnect().await {
                    log::debug!("Error while aborting connect to {}: {err}", self.address());
                }
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no connection within {limit:?}"),
                ))
            }
        };
        match result {
            Ok(()) => {
                log::debug!("Connected to {}", self.address());
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(source) => {
                self.state = ConnectionState::Disconnected;
                Err(Error::ConnectFailed {
                    address: self.address(),
                    source,
                })
            }
        }
    }

    /// Closes the socket. Closing a closed connection does nothing.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Disconnected;
        match self.transport.disconnect().await {
            Ok(()) => log::debug!("Disconnected from {}", self.address()),
            Err(err) => log::debug!("Error while disconnecting from {}: {err}", self.address()),
        }
    }

    /// Runs one request on the open socket, returning the registers read.
    /// Writes return an empty vector.
    pub(crate) async fn execute(
        &mut self,
        request: RegisterRequest,
        words: &[u16],
        shape: WriteShape,
    ) -> TransportResult<Vec<u16>> {
        let RegisterRequest {
            unit_id,
            start_address,
            count,
            kind,
        } = request;
        match kind {
            RequestKind::Read => {
                self.transport
                    .read_holding_registers(unit_id, start_address, count)
                    .await
            }
            RequestKind::Write => {
                match (shape, words) {
                    (WriteShape::SingleWhenPossible, [word]) => {
                        self.transport
                            .write_single_register(unit_id, start_address, *word)
                            .await?
                    }
                    _ => {
                        self.transport
                            .write_multiple_registers(unit_id, start_address, words)
                            .await?
                    }
                }
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scriptable in-memory transport.

    use super::*;
    use std::{
        collections::{BTreeMap, HashMap, VecDeque},
        sync::{Arc, Mutex},
        time::Duration,
    };

    /// Scripted answer for the next request at an address.
    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Exception(ExceptionCode),
        Io(io::ErrorKind),
        Protocol(&'static str),
        /// Never answers.
        Hang,
        /// Answers with the given words instead of the register contents.
        Words(Vec<u16>),
    }

    #[derive(Debug, Default)]
    pub(crate) struct Log {
        /// `start`/`end` markers of every request, in order.
        pub events: Vec<String>,
        pub reads: Vec<(u8, u16, u16)>,
        pub writes: Vec<(u8, u16, Vec<u16>)>,
        pub single_writes: usize,
        pub connects: usize,
        pub closes: usize,
        pub in_flight: usize,
        pub max_in_flight: usize,
    }

    #[derive(Debug, Default)]
    struct State {
        registers: BTreeMap<(u8, u16), u16>,
        faults: HashMap<(u8, u16), VecDeque<Reply>>,
        refuse_connects: usize,
        hang_connects: bool,
        latency: Duration,
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockTransport {
        state: Arc<Mutex<State>>,
        log: Arc<Mutex<Log>>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Stores `words` starting at `address` of `unit_id`.
        pub(crate) fn set_block(&self, unit_id: u8, address: u16, words: &[u16]) {
            let mut state = self.state.lock().unwrap();
            for (offset, word) in words.iter().enumerate() {
                state.registers.insert((unit_id, address + offset as u16), *word);
            }
        }

        pub(crate) fn register(&self, unit_id: u8, address: u16) -> Option<u16> {
            self.state.lock().unwrap().registers.get(&(unit_id, address)).copied()
        }

        /// Queues a scripted reply for the next request starting at `address`.
        pub(crate) fn push_reply(&self, unit_id: u8, address: u16, reply: Reply) {
            self.state
                .lock()
                .unwrap()
                .faults
                .entry((unit_id, address))
                .or_default()
                .push_back(reply);
        }

        pub(crate) fn refuse_connects(&self, count: usize) {
            self.state.lock().unwrap().refuse_connects = count;
        }

        /// Makes every connect attempt stall, like a host dropping SYNs.
        pub(crate) fn hang_connects(&self, hang: bool) {
            self.state.lock().unwrap().hang_connects = hang;
        }

        /// Simulated network round trip of every request.
        pub(crate) fn set_latency(&self, latency: Duration) {
            self.state.lock().unwrap().latency = latency;
        }

        pub(crate) fn log(&self) -> std::sync::MutexGuard<'_, Log> {
            self.log.lock().unwrap()
        }

        fn begin(&self, unit_id: u8, address: u16, label: &str) -> (Option<Reply>, Duration) {
            let mut log = self.log.lock().unwrap();
            log.events.push(format!("start {label}"));
            log.in_flight += 1;
            log.max_in_flight = log.max_in_flight.max(log.in_flight);
            drop(log);
            let mut state = self.state.lock().unwrap();
            let latency = state.latency;
            let reply = state
                .faults
                .get_mut(&(unit_id, address))
                .and_then(VecDeque::pop_front);
            (reply, latency)
        }

        fn end(&self, label: String) {
            let mut log = self.log.lock().unwrap();
            log.events.push(format!("end {label}"));
            log.in_flight -= 1;
        }

        async fn run(&self, unit_id: u8, address: u16, count: u16) -> TransportResult<Vec<u16>> {
            let label = format!("{unit_id}:{address}");
            let (reply, latency) = self.begin(unit_id, address, &label);
            if matches!(reply, Some(Reply::Hang)) {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(latency).await;
            self.end(label);
            match reply {
                Some(Reply::Exception(code)) => Err(TransportError::Exception(code)),
                Some(Reply::Io(kind)) => Err(TransportError::Io(io::Error::new(kind, "mock"))),
                Some(Reply::Protocol(msg)) => Err(TransportError::Protocol(msg.to_string())),
                Some(Reply::Words(words)) => Ok(words),
                Some(Reply::Hang) | None => {
                    let state = self.state.lock().unwrap();
                    (address..address.saturating_add(count))
                        .map(|a| state.registers.get(&(unit_id, a)).copied())
                        .collect::<Option<Vec<u16>>>()
                        .ok_or(TransportError::Exception(ExceptionCode::IllegalDataAddress))
                }
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self, _host: &str, _port: u16) -> io::Result<()> {
            let hang = self.state.lock().unwrap().hang_connects;
            if hang {
                std::future::pending::<()>().await;
            }
            let mut state = self.state.lock().unwrap();
            if state.refuse_connects > 0 {
                state.refuse_connects -= 1;
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.log.lock().unwrap().connects += 1;
            Ok(())
        }

        async fn disconnect(&mut self) -> io::Result<()> {
            self.log.lock().unwrap().closes += 1;
            Ok(())
        }

        async fn read_holding_registers(&mut self, unit_id: u8, address: u16, count: u16) -> TransportResult<Vec<u16>> {
            self.log.lock().unwrap().reads.push((unit_id, address, count));
            self.run(unit_id, address, count).await
        }

        async fn write_multiple_registers(&mut self, unit_id: u8, address: u16, words: &[u16]) -> TransportResult<()> {
            self.log.lock().unwrap().writes.push((unit_id, address, words.to_vec()));
            self.run(unit_id, address, 0).await?;
            self.set_block(unit_id, address, words);
            Ok(())
        }

        async fn write_single_register(&mut self, unit_id: u8, address: u16, word: u16) -> TransportResult<()> {
            {
                let mut log = self.log.lock().unwrap();
                log.single_writes += 1;
                log.writes.push((unit_id, address, vec![word]));
            }
            self.run(unit_id, address, 0).await?;
            self.set_block(unit_id, address, &[word]);
            Ok(())
        }
    }
}
