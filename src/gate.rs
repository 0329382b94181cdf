//! Serialized register access.
//!
//! All devices behind one endpoint share a single [`RegisterGate`]. The gate
//! guarantees that at most one Modbus transaction is in flight at any time,
//! whatever the number of concurrent callers. Waiting callers are served in
//! FIFO order.
//!
//! A transaction, once started, always runs to completion on its own task.
//! Dropping the caller's future only discards the result, the socket is never
//! left with a half finished request and the next caller starts clean.

use crate::{
    protocol::{MAX_READ_REGISTERS, MAX_WRITE_REGISTERS},
    tokio_common::{Error, Failure, RegisterRequest, RequestKind, Result},
    transport::{ConnectMode, Connection, ConnectionState, TransportError, WriteShape},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

/// Timeout, retry and write settings of a [`RegisterGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOptions {
    /// Upper bound for one request and its response.
    pub timeout: Duration,
    /// Additional attempts for a failed read. Writes are never repeated.
    pub retries: u32,
    pub write_shape: WriteShape,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            retries: 3,
            write_shape: WriteShape::default(),
        }
    }
}

/// Thread-safe, cloneable access to the registers of all units behind one
/// connection.
#[derive(Debug, Clone)]
pub struct RegisterGate {
    conn: Arc<Mutex<Connection>>,
    options: GateOptions,
}

impl RegisterGate {
    /// Creates a new `RegisterGate` owning the given connection.
    pub fn new(conn: Connection, options: GateOptions) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            options,
        }
    }

    /// Creates a new `RegisterGate` from a shared connection.
    pub fn from_shared(conn: Arc<Mutex<Connection>>, options: GateOptions) -> Self {
        Self { conn, options }
    }

    /// Clones the shared connection.
    pub fn clone_shared(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    pub fn options(&self) -> &GateOptions {
        &self.options
    }

    /// Opens the connection, waiting for any transaction in flight.
    /// The attempt is bounded by the request timeout.
    pub async fn connect(&self) -> Result<()> {
        self.conn.lock().await.connect(self.options.timeout).await
    }

    /// Closes the connection, waiting for any transaction in flight.
    pub async fn disconnect(&self) {
        self.conn.lock().await.disconnect().await
    }

    pub async fn state(&self) -> ConnectionState {
        self.conn.lock().await.state()
    }

    /// Reads `count` holding registers starting at the PDU address `address`.
    ///
    /// Failed reads are repeated up to `retries` times if the failure is
    /// transient. The returned vector always holds exactly `count` words.
    ///
    /// # Errors
    ///
    /// * `Error::RequestTooLarge` if `count` is zero or above 125.
    /// * `Error::ModbusReadError` on timeout, exception or malformed response.
    /// * `Error::ConnectFailed` or `Error::ConnectionError` on socket failures,
    ///   including a connect that does not complete within the timeout.
    pub async fn read(&self, unit_id: u8, address: u16, count: u16) -> Result<Vec<u16>> {
        let request = RegisterRequest::read(unit_id, address, count);
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(Error::RequestTooLarge {
                request,
                limit: MAX_READ_REGISTERS,
            });
        }
        let mut attempt = 0;
        loop {
            match self.transact(request, Vec::new()).await {
                Ok(words) => return Ok(words),
                Err(err) if err.is_transient() && attempt < self.options.retries => {
                    attempt += 1;
                    log::debug!("Retrying {request} ({attempt}/{}): {err}", self.options.retries);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Reads a span of any length by splitting it into PDU sized requests.
    pub async fn read_span(&self, unit_id: u8, address: u16, count: u16) -> Result<Vec<u16>> {
        let mut words = Vec::with_capacity(count as usize);
        let mut offset = 0u16;
        while offset < count {
            let chunk = (count - offset).min(MAX_READ_REGISTERS);
            words.extend(self.read(unit_id, address.wrapping_add(offset), chunk).await?);
            offset += chunk;
        }
        Ok(words)
    }

    /// Writes `words` starting at the PDU address `address`.
    ///
    /// # Errors
    ///
    /// * `Error::RequestTooLarge` if `words` is empty or longer than 123.
    /// * `Error::ModbusWriteError` on timeout, exception or malformed response.
    /// * `Error::ConnectFailed` or `Error::ConnectionError` on socket failures.
    pub async fn write(&self, unit_id: u8, address: u16, words: &[u16]) -> Result<()> {
        let request = RegisterRequest::write(unit_id, address, words.len().min(u16::MAX as usize) as u16);
        if words.is_empty() || words.len() > MAX_WRITE_REGISTERS as usize {
            return Err(Error::RequestTooLarge {
                request,
                limit: MAX_WRITE_REGISTERS,
            });
        }
        self.transact(request, words.to_vec()).await.map(|_| ())
    }

    async fn transact(&self, request: RegisterRequest, words: Vec<u16>) -> Result<Vec<u16>> {
        let conn = self.conn.clone().lock_owned().await;
        let options = self.options;
        let task = tokio::spawn(async move {
            let mut conn = conn;
            run_transaction(&mut conn, request, &words, options).await
        });
        match task.await {
            Ok(result) => result,
            Err(err) => Err(Error::ConnectionError {
                request,
                source: std::io::Error::other(err),
            }),
        }
    }
}

async fn run_transaction(
    conn: &mut Connection,
    request: RegisterRequest,
    words: &[u16],
    options: GateOptions,
) -> Result<Vec<u16>> {
    conn.connect(options.timeout).await?;
    log::trace!("Sending {request}");
    let result = match tokio::time::timeout(options.timeout, conn.execute(request, words, options.write_shape)).await
    {
        Err(_) => {
            // The late response would be taken for the answer to the next request.
            conn.disconnect().await;
            Err(Error::failed(request, Failure::Timeout(options.timeout)))
        }
        Ok(Ok(response)) => check_response(request, response),
        Ok(Err(TransportError::Exception(code))) => Err(Error::failed(request, Failure::Exception(code))),
        Ok(Err(TransportError::Protocol(reason))) => {
            conn.disconnect().await;
            Err(Error::failed(request, Failure::Malformed(reason)))
        }
        Ok(Err(TransportError::Io(source))) => {
            log::warn!("Connection to {} lost: {source}", conn.address());
            conn.disconnect().await;
            Err(Error::ConnectionError { request, source })
        }
    };
    if conn.mode() == ConnectMode::PerOperation {
        conn.disconnect().await;
    }
    result
}

fn check_response(request: RegisterRequest, response: Vec<u16>) -> Result<Vec<u16>> {
    if request.kind == RequestKind::Read && response.len() != request.count as usize {
        return Err(Error::failed(
            request,
            Failure::Malformed(format!(
                "expected {} registers, got {}",
                request.count,
                response.len()
            )),
        ));
    }
    Ok(response)
}
