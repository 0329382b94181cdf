//! SolarEdge storage battery attached to an inverter.
//!
//! Battery registers are not part of SunSpec. All multi-register values use
//! little endian word order, floats are IEEE-754 single precision.

use super::{accumulate, expect_blocks, Device, DeviceKind, DeviceRef, DeviceStatus, Identity, RawBlocks};
use crate::{
    gate::RegisterGate,
    protocol::{self as proto, Accumulator, Decoded, Layout},
    sunspec::{
        BatteryStatus, Block, BATTERY_BASES, BATTERY_INFO_REG_QUAN, BATTERY_TELEMETRY_REG_OFFSET,
        BATTERY_TELEMETRY_REG_QUAN, LE, STRING16,
    },
    tokio_common::Result,
};
use async_trait::async_trait;
use std::fmt;

/// Nameplate ratings, read together with the identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatteryRating {
    /// Wh
    pub rated_energy: Decoded<f64>,
    /// W
    pub max_charge_continuous: Decoded<f64>,
    pub max_discharge_continuous: Decoded<f64>,
    pub max_charge_peak: Decoded<f64>,
    pub max_discharge_peak: Decoded<f64>,
}

/// One battery poll. Negative power and current mean discharging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatterySnapshot {
    /// °C
    pub average_temperature: Decoded<f64>,
    pub max_temperature: Decoded<f64>,
    /// V
    pub voltage: Decoded<f64>,
    /// A
    pub current: Decoded<f64>,
    /// W
    pub power: Decoded<f64>,
    /// Wh, lifetime
    pub exported_energy: Decoded<f64>,
    pub imported_energy: Decoded<f64>,
    /// Wh
    pub max_energy: Decoded<f64>,
    pub available_energy: Decoded<f64>,
    /// %
    pub state_of_health: Decoded<f64>,
    pub state_of_energy: Decoded<f64>,
    pub status: Decoded<BatteryStatus>,
    pub status_internal: Decoded<u32>,
}

impl BatterySnapshot {
    /// Decodes the telemetry block starting at `base`.
    pub fn decode(base: u16, words: &[u16]) -> std::result::Result<Self, proto::Error> {
        let block = Block::new(base, words);
        let at = |offset: u16| base + offset;
        let u64_at = |offset| -> std::result::Result<Decoded<f64>, proto::Error> {
            Ok(block.unsigned(at(offset), Layout::U64(LE))?.map(|v| v as f64))
        };
        Ok(Self {
            average_temperature: block.float(at(0x00))?,
            max_temperature: block.float(at(0x02))?,
            voltage: block.float(at(0x04))?,
            current: block.float(at(0x06))?,
            power: block.float(at(0x08))?,
            exported_energy: u64_at(0x0A)?,
            imported_energy: u64_at(0x0E)?,
            max_energy: block.float(at(0x12))?,
            available_energy: block.float(at(0x14))?,
            state_of_health: block.float(at(0x16))?,
            state_of_energy: block.float(at(0x18))?,
            status: block
                .unsigned(at(0x1A), Layout::U32(LE))?
                .map(|v| BatteryStatus::decode(v.min(u16::MAX as u64) as u16)),
            status_internal: block.unsigned(at(0x1C), Layout::U32(LE))?.map(|v| v as u32),
        })
    }
}

impl fmt::Display for BatterySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Status:           {}", self.status)?;
        writeln!(f, "  Power:            {} W", self.power)?;
        writeln!(f, "  Voltage:          {} V", self.voltage)?;
        writeln!(f, "  State of energy:  {} %", self.state_of_energy)?;
        writeln!(f, "  State of health:  {} %", self.state_of_health)?;
        writeln!(f, "  Available energy: {} Wh", self.available_energy)?;
        write!(f, "  Temperature:      {} °C", self.average_temperature)
    }
}

/// A battery in one of the three battery slots of an inverter.
#[derive(Debug)]
pub struct Battery {
    unit_id: u8,
    slot: u8,
    identity: Option<Identity>,
    rating: Option<BatteryRating>,
    status: DeviceStatus,
    snapshot: Option<BatterySnapshot>,
    exported: Accumulator,
    imported: Accumulator,
}

impl Battery {
    /// `slot` is 1, 2 or 3.
    pub fn new(unit_id: u8, slot: u8) -> Self {
        Self {
            unit_id,
            slot,
            identity: None,
            rating: None,
            status: DeviceStatus::default(),
            snapshot: None,
            exported: Accumulator::default(),
            imported: Accumulator::default(),
        }
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn base(&self) -> u16 {
        BATTERY_BASES[(self.slot.clamp(1, 3) - 1) as usize]
    }

    fn telemetry_base(&self) -> u16 {
        self.base() + BATTERY_TELEMETRY_REG_OFFSET
    }

    pub fn rating(&self) -> Option<&BatteryRating> {
        self.rating.as_ref()
    }

    pub fn snapshot(&self) -> Option<&BatterySnapshot> {
        self.snapshot.as_ref()
    }

    /// Decodes the identification block. Fails with `UnexpectedModel` if the
    /// slot is empty.
    fn decode_info(base: u16, words: &[u16]) -> std::result::Result<(Identity, BatteryRating), proto::Error> {
        let block = Block::new(base, words);
        let text = |offset| -> std::result::Result<String, proto::Error> {
            Ok(block.text(base + offset, STRING16)?.into_option().unwrap_or_default())
        };
        let identity = Identity {
            manufacturer: text(0x00)?,
            model: text(0x10)?,
            option: None,
            version: text(0x20)?,
            serial_number: text(0x30)?,
            device_address: block.word(base + 0x40)?,
        };
        if !(1..=247).contains(&identity.device_address) || identity.manufacturer.is_empty() {
            return Err(proto::Error::UnexpectedModel {
                expected: "battery",
                actual: identity.device_address,
                length: BATTERY_INFO_REG_QUAN,
            });
        }
        let rating = BatteryRating {
            rated_energy: block.float(base + 0x42)?,
            max_charge_continuous: block.float(base + 0x44)?,
            max_discharge_continuous: block.float(base + 0x46)?,
            max_charge_peak: block.float(base + 0x48)?,
            max_discharge_peak: block.float(base + 0x4A)?,
        };
        Ok((identity, rating))
    }
}

#[async_trait]
impl Device for Battery {
    fn device_ref(&self) -> DeviceRef {
        DeviceRef::new(self.unit_id, DeviceKind::Battery(self.slot))
    }

    fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    fn status(&self) -> &DeviceStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut DeviceStatus {
        &mut self.status
    }

    async fn read_identity(&mut self, gate: &RegisterGate) -> Result<()> {
        let words = gate.read(self.unit_id, self.base(), BATTERY_INFO_REG_QUAN).await?;
        let (identity, rating) = Self::decode_info(self.base(), &words)?;
        log::info!("Found {}: {identity}", self.device_ref());
        self.identity = Some(identity);
        self.rating = Some(rating);
        Ok(())
    }

    async fn read_telemetry(&self, gate: &RegisterGate) -> Result<RawBlocks> {
        Ok(vec![
            gate.read(self.unit_id, self.telemetry_base(), BATTERY_TELEMETRY_REG_QUAN)
                .await?,
        ])
    }

    fn decode_snapshot(&mut self, blocks: &[Vec<u16>]) -> std::result::Result<(), proto::Error> {
        let blocks = expect_blocks(blocks, &[BATTERY_TELEMETRY_REG_QUAN])?;
        let mut snapshot = BatterySnapshot::decode(self.telemetry_base(), &blocks[0])?;
        let device = self.device_ref();
        accumulate(&mut self.exported, &mut snapshot.exported_energy, "exported", device);
        accumulate(&mut self.imported, &mut snapshot.imported_energy, "imported", device);
        self.snapshot = Some(snapshot);
        Ok(())
    }
}
