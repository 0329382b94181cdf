//! Discovery of the devices behind an inverter unit.
//!
//! The inverter itself must answer with a valid SunSpec identity, otherwise
//! the unit is unusable. Meter and battery slots are probed one after the
//! other. An empty slot shows up as a timeout, an exception response or an
//! identification block that does not validate. Any other failure is kept in
//! the [`DiscoveryReport`] and probing continues with the next slot.

use crate::{
    device::{Battery, Device, DeviceRef, Inverter, Meter},
    gate::RegisterGate,
    protocol as proto,
    sunspec::{BATTERY_BASES, METER_BASES},
    tokio_common::{Error, Failure, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub detect_meters: bool,
    pub detect_batteries: bool,
    /// Poll the 0xE000 storage and site limit block of the inverter.
    pub read_storage_control: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            detect_meters: true,
            detect_batteries: true,
            read_storage_control: false,
        }
    }
}

/// A slot probe that failed for a reason other than an empty slot.
#[derive(Debug)]
pub struct ProbeFailure {
    pub device: DeviceRef,
    pub error: Error,
}

/// What was found behind one unit.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub meters: Vec<u8>,
    pub batteries: Vec<u8>,
    pub failures: Vec<ProbeFailure>,
}

/// Whether a probe error means nothing is installed in the slot.
fn is_empty_slot(err: &Error) -> bool {
    match err {
        Error::ModbusReadError { failure, .. } => {
            matches!(failure, Failure::Timeout(_) | Failure::Exception(_))
        }
        Error::ProtocolError(proto::Error::UnexpectedModel { .. }) => true,
        _ => false,
    }
}

/// Reads the identity of a slot device. `Ok(None)` for an empty slot.
async fn probe<D: Device>(mut device: D, gate: &RegisterGate) -> Result<Option<D>> {
    match device.read_identity(gate).await {
        Ok(()) => Ok(Some(device)),
        Err(err) if is_empty_slot(&err) => {
            log::debug!("No device in {}: {err}", device.device_ref());
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Identifies the inverter on `unit_id` and probes its meter and battery slots.
///
/// # Errors
///
/// * `Error::HubInitFailed` if the inverter identity cannot be read or is not
///   a SunSpec inverter.
pub async fn discover_inverter(
    gate: &RegisterGate,
    unit_id: u8,
    options: &DiscoveryOptions,
) -> Result<(Inverter, DiscoveryReport)> {
    let mut inverter = Inverter::new(unit_id, options.read_storage_control);
    inverter
        .read_identity(gate)
        .await
        .map_err(|err| Error::HubInitFailed {
            unit_id: Some(unit_id),
            reason: err.to_string(),
        })?;

    let mut report = DiscoveryReport::default();
    if options.detect_meters {
        for slot in 1..=METER_BASES.len() as u8 {
            let meter = Meter::new(unit_id, slot);
            let device = meter.device_ref();
            match probe(meter, gate).await {
                Ok(Some(meter)) => {
                    report.meters.push(slot);
                    inverter.meters.push(meter);
                }
                Ok(None) => {}
                Err(error) => {
                    log::warn!("Probing {device} failed: {error}");
                    report.failures.push(ProbeFailure { device, error });
                }
            }
        }
    }
    if options.detect_batteries {
        for slot in 1..=BATTERY_BASES.len() as u8 {
            let battery = Battery::new(unit_id, slot);
            let device = battery.device_ref();
            match probe(battery, gate).await {
                Ok(Some(battery)) => {
                    report.batteries.push(slot);
                    inverter.batteries.push(battery);
                }
                Ok(None) => {}
                Err(error) => {
                    log::warn!("Probing {device} failed: {error}");
                    report.failures.push(ProbeFailure { device, error });
                }
            }
        }
    }
    log::info!(
        "Unit {unit_id}: {} meter(s), {} battery(ies)",
        inverter.meters.len(),
        inverter.batteries.len()
    );
    Ok((inverter, report))
}
