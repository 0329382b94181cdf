//! This module provides the error taxonomy and request descriptions shared by
//! the transport, the register gate, the devices and the hub.
use crate::{device::DeviceRef, protocol as proto};
use std::{fmt, time::Duration};

/// Direction of a register request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

/// Describes one Modbus request for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRequest {
    pub unit_id: u8,
    pub start_address: u16,
    pub count: u16,
    pub kind: RequestKind,
}

impl RegisterRequest {
    pub fn read(unit_id: u8, start_address: u16, count: u16) -> Self {
        Self {
            unit_id,
            start_address,
            count,
            kind: RequestKind::Read,
        }
    }

    pub fn write(unit_id: u8, start_address: u16, count: u16) -> Self {
        Self {
            unit_id,
            start_address,
            count,
            kind: RequestKind::Write,
        }
    }
}

impl fmt::Display for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RequestKind::Read => "read",
            RequestKind::Write => "write",
        };
        write!(
            f,
            "{kind} of {} register(s) at {} (0x{:04X}) on unit {}",
            self.count, self.start_address, self.start_address, self.unit_id
        )
    }
}

/// Why a Modbus transaction did not produce a usable response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("exception response: {0}")]
    Exception(tokio_modbus::ExceptionCode),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Coarse classification of [`Error`], kept on devices as their last error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectFailed,
    ConnectionError,
    ModbusReadError,
    ModbusWriteError,
    HubInitFailed,
    DataUpdateFailed,
    InvalidRequest,
    InvalidState,
    UnknownDevice,
    ProtocolError,
}

/// Represents all possible errors of the hub and its building blocks.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The TCP connection could not be established.
    #[error("Cannot connect to {address}: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The socket failed while a request was in flight.
    #[error("Connection lost during {request}: {source}")]
    ConnectionError {
        request: RegisterRequest,
        #[source]
        source: std::io::Error,
    },

    #[error("Modbus {request} failed: {failure}")]
    ModbusReadError {
        request: RegisterRequest,
        failure: Failure,
    },

    #[error("Modbus {request} failed: {failure}")]
    ModbusWriteError {
        request: RegisterRequest,
        failure: Failure,
    },

    /// The request spans zero registers or more than a single Modbus PDU allows.
    #[error("Invalid {request}, a request spans 1 to {limit} registers")]
    RequestTooLarge { request: RegisterRequest, limit: u16 },

    /// Initial discovery failed, `unit_id` is `None` if no unit could be set up.
    #[error("Initialization of {} failed: {reason}", unit_label(.unit_id))]
    HubInitFailed { unit_id: Option<u8>, reason: String },

    /// At least one device failed during a poll, the others were updated.
    #[error("{} of {total} device(s) failed to update: {}", .failed.len(), device_list(.failed))]
    DataUpdateFailed { failed: Vec<DeviceRef>, total: usize },

    #[error("Hub is {0}")]
    InvalidState(&'static str),

    #[error("Unknown device {0}")]
    UnknownDevice(DeviceRef),

    /// Wraps `proto::Error`.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),
}

fn unit_label(unit_id: &Option<u8>) -> String {
    match unit_id {
        Some(unit_id) => format!("unit {unit_id}"),
        None => "hub".to_string(),
    }
}

fn device_list(devices: &[DeviceRef]) -> String {
    devices
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Builds the read or write error matching the request direction.
    pub(crate) fn failed(request: RegisterRequest, failure: Failure) -> Self {
        match request.kind {
            RequestKind::Read => Error::ModbusReadError { request, failure },
            RequestKind::Write => Error::ModbusWriteError { request, failure },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Error::ConnectionError { .. } => ErrorKind::ConnectionError,
            Error::ModbusReadError { .. } => ErrorKind::ModbusReadError,
            Error::ModbusWriteError { .. } => ErrorKind::ModbusWriteError,
            Error::RequestTooLarge { .. } => ErrorKind::InvalidRequest,
            Error::HubInitFailed { .. } => ErrorKind::HubInitFailed,
            Error::DataUpdateFailed { .. } => ErrorKind::DataUpdateFailed,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::UnknownDevice(_) => ErrorKind::UnknownDevice,
            Error::ProtocolError(_) => ErrorKind::ProtocolError,
        }
    }

    /// The failure reason of a Modbus read or write error.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Error::ModbusReadError { failure, .. } | Error::ModbusWriteError { failure, .. } => Some(failure),
            _ => None,
        }
    }

    /// Errors after which repeating the same read may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ConnectFailed { .. } | Error::ConnectionError { .. } => true,
            Error::ModbusReadError { failure, .. } => matches!(
                failure,
                Failure::Timeout(_)
                    | Failure::Malformed(_)
                    | Failure::Exception(tokio_modbus::ExceptionCode::ServerDeviceBusy)
                    | Failure::Exception(tokio_modbus::ExceptionCode::GatewayTargetDevice)
            ),
            _ => false,
        }
    }
}

/// The result type for hub operations.
pub type Result<T> = std::result::Result<T, crate::tokio_common::Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use tokio_modbus::ExceptionCode;

    #[test]
    fn request_description() {
        let request = RegisterRequest::read(1, 40044, 65);
        assert_eq!(
            request.to_string(),
            "read of 65 register(s) at 40044 (0x9C6C) on unit 1"
        );
    }

    #[test]
    fn failure_maps_to_direction() {
        let read = Error::failed(RegisterRequest::read(1, 40000, 69), Failure::Timeout(Duration::from_secs(3)));
        assert_eq!(read.kind(), ErrorKind::ModbusReadError);
        assert!(read.is_transient());

        let write = Error::failed(
            RegisterRequest::write(1, 0xE008, 2),
            Failure::Exception(ExceptionCode::IllegalDataValue),
        );
        assert_eq!(write.kind(), ErrorKind::ModbusWriteError);
        assert!(!write.is_transient());
        assert_eq!(write.failure(), Some(&Failure::Exception(ExceptionCode::IllegalDataValue)));
    }

    #[test]
    fn update_failure_lists_devices() {
        let err = Error::DataUpdateFailed {
            failed: vec![DeviceRef::new(1, DeviceKind::Meter(2))],
            total: 3,
        };
        assert_eq!(err.to_string(), "1 of 3 device(s) failed to update: unit 1 meter 2");
    }
}
