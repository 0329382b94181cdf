//! Devices reachable through an inverter: the inverter itself, its meters and
//! its batteries.
//!
//! Every device reads its registers in two steps. [`Device::read_telemetry`]
//! only needs shared access and fetches the raw register blocks, so the hub
//! can fetch all devices concurrently through the gate. The blocks are then
//! applied one device at a time with [`Device::apply_update`], which decodes
//! them and replaces the snapshot only if every field decoded.

use crate::{
    gate::RegisterGate,
    protocol as proto,
    sunspec::Block,
    tokio_common::{Error, ErrorKind, Result},
};
use async_trait::async_trait;
use std::fmt;

pub mod battery;
pub mod inverter;
pub mod meter;

pub use battery::Battery;
pub use inverter::Inverter;
pub use meter::Meter;

/// What a device is and in which slot of its inverter it sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Inverter,
    /// Meter slot 1 to 3.
    Meter(u8),
    /// Battery slot 1 to 3.
    Battery(u8),
}

/// Identifies a device across the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceRef {
    pub unit_id: u8,
    pub kind: DeviceKind,
}

impl DeviceRef {
    pub const fn new(unit_id: u8, kind: DeviceKind) -> Self {
        Self { unit_id, kind }
    }

    pub const fn inverter(unit_id: u8) -> Self {
        Self::new(unit_id, DeviceKind::Inverter)
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Inverter => write!(f, "unit {} inverter", self.unit_id),
            DeviceKind::Meter(slot) => write!(f, "unit {} meter {slot}", self.unit_id),
            DeviceKind::Battery(slot) => write!(f, "unit {} battery {slot}", self.unit_id),
        }
    }
}

/// Nameplate data read once during discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub option: Option<String>,
    pub version: String,
    pub serial_number: String,
    pub device_address: u16,
}

impl Identity {
    /// Decodes a SunSpec common model block starting with `DID` and `L`.
    pub(crate) fn decode_common(block: &Block<'_>, did: u16) -> std::result::Result<Self, proto::Error> {
        use crate::sunspec::{COMMON_MODEL_ID, COMMON_MODEL_LENGTH, STRING16, STRING8};
        block.expect_model(did, "common model 1", COMMON_MODEL_ID..=COMMON_MODEL_ID, COMMON_MODEL_LENGTH)?;
        let text = |address, layout| -> std::result::Result<String, proto::Error> {
            Ok(block.text(address, layout)?.into_option().unwrap_or_default())
        };
        Ok(Self {
            manufacturer: text(did + 2, STRING16)?,
            model: text(did + 18, STRING16)?,
            option: block.text(did + 34, STRING8)?.into_option().filter(|o| !o.is_empty()),
            version: text(did + 42, STRING8)?,
            serial_number: text(did + 50, STRING16)?,
            device_address: block.word(did + 66)?,
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (serial {}, version {}",
            self.manufacturer, self.model, self.serial_number, self.version
        )?;
        if let Some(option) = &self.option {
            write!(f, ", option {option}")?;
        }
        write!(f, ")")
    }
}

/// Outcome of the last update of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub last_update_success: bool,
    pub last_error: Option<ErrorKind>,
    pub last_error_message: Option<String>,
}

impl DeviceStatus {
    pub fn record_success(&mut self) {
        self.last_update_success = true;
        self.last_error = None;
        self.last_error_message = None;
    }

    pub fn record_failure(&mut self, err: &Error) {
        self.last_update_success = false;
        self.last_error = Some(err.kind());
        self.last_error_message = Some(err.to_string());
    }
}

/// Raw register blocks fetched for one update, in request order.
pub type RawBlocks = Vec<Vec<u16>>;

#[async_trait]
pub trait Device: Send + Sync {
    fn device_ref(&self) -> DeviceRef;

    /// `None` until [`Device::read_identity`] succeeded.
    fn identity(&self) -> Option<&Identity>;

    fn status(&self) -> &DeviceStatus;

    fn status_mut(&mut self) -> &mut DeviceStatus;

    /// Reads and validates the identification block.
    async fn read_identity(&mut self, gate: &RegisterGate) -> Result<()>;

    /// Fetches the raw telemetry blocks without touching device state.
    async fn read_telemetry(&self, gate: &RegisterGate) -> Result<RawBlocks>;

    /// Decodes fetched blocks into a new snapshot. On error the previous
    /// snapshot is kept.
    fn decode_snapshot(&mut self, blocks: &[Vec<u16>]) -> std::result::Result<(), proto::Error>;

    /// Applies the outcome of a fetch, returning whether the update succeeded.
    fn apply_update(&mut self, fetched: Result<RawBlocks>) -> bool {
        let outcome = fetched.and_then(|blocks| self.decode_snapshot(&blocks).map_err(Error::from));
        match outcome {
            Ok(()) => {
                self.status_mut().record_success();
                true
            }
            Err(err) => {
                log::warn!("Update of {} failed: {err}", self.device_ref());
                self.status_mut().record_failure(&err);
                false
            }
        }
    }

    /// Fetches and applies in one step.
    async fn update(&mut self, gate: &RegisterGate) -> bool {
        let fetched = self.read_telemetry(gate).await;
        self.apply_update(fetched)
    }
}

/// Feeds a lifetime energy counter through its accumulator. A rejected sample
/// is reported as `NotApplicable`.
pub(crate) fn accumulate(acc: &mut proto::Accumulator, value: &mut proto::Decoded<f64>, what: &str, device: DeviceRef) {
    if let proto::Decoded::Value(v) = *value {
        if let Err(err) = acc.update(v) {
            log::debug!("{device} {what} energy rejected: {err}");
            *value = proto::Decoded::NotApplicable;
        }
    }
}

/// Checks the number of fetched blocks and their lengths.
pub(crate) fn expect_blocks<'a>(
    blocks: &'a [Vec<u16>],
    lengths: &[u16],
) -> std::result::Result<&'a [Vec<u16>], proto::Error> {
    if blocks.len() < lengths.len() {
        return Err(proto::Error::WordCount {
            expected: lengths.len(),
            actual: blocks.len(),
        });
    }
    for (block, len) in blocks.iter().zip(lengths) {
        if block.len() != *len as usize {
            return Err(proto::Error::WordCount {
                expected: *len as usize,
                actual: block.len(),
            });
        }
    }
    Ok(blocks)
}
