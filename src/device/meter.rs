//! SunSpec meter (models 201 to 204) attached to an inverter.

use super::{accumulate, expect_blocks, Device, DeviceKind, DeviceRef, DeviceStatus, Identity, RawBlocks};
use crate::{
    gate::RegisterGate,
    protocol::{self as proto, Accumulator, Decoded, Layout},
    sunspec::{
        Block, BE, METER_BASES, METER_COMMON_REG_QUAN, METER_MODEL_IDS, METER_MODEL_LENGTH, METER_MODEL_REG_OFFSET,
        METER_MODEL_REG_QUAN,
    },
    tokio_common::Result,
};
use async_trait::async_trait;
use std::fmt;

/// One meter poll. Positive power is drawn from the grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeterSnapshot {
    /// 201 single phase, 202 split phase, 203 wye, 204 delta.
    pub model_id: u16,
    pub current: Decoded<f64>,
    pub current_phase: [Decoded<f64>; 3],
    pub voltage_phase_neutral: Decoded<f64>,
    pub voltage_phase: [Decoded<f64>; 3],
    pub voltage_phase_phase: Decoded<f64>,
    pub voltage_line: [Decoded<f64>; 3],
    pub frequency: Decoded<f64>,
    pub power: Decoded<f64>,
    pub power_phase: [Decoded<f64>; 3],
    pub apparent_power: Decoded<f64>,
    pub reactive_power: Decoded<f64>,
    pub power_factor: Decoded<f64>,
    /// Wh, lifetime
    pub exported_energy: Decoded<f64>,
    pub exported_energy_phase: [Decoded<f64>; 3],
    pub imported_energy: Decoded<f64>,
    pub imported_energy_phase: [Decoded<f64>; 3],
    pub events: Decoded<u32>,
}

impl MeterSnapshot {
    /// Decodes the 107 register model block starting at `base`.
    pub fn decode(base: u16, words: &[u16]) -> std::result::Result<Self, proto::Error> {
        let block = Block::new(base, words);
        let model_id = block.expect_model(base, "meter model 201-204", METER_MODEL_IDS, METER_MODEL_LENGTH)?;
        // register offsets below follow the model definition, after DID and L
        let at = |offset: u16| base + 2 + offset;
        let i16_sf = |offset, sf| block.scaled(at(offset), Layout::I16, at(sf));
        let acc_sf = |offset, sf| block.scaled(at(offset), Layout::Acc32(BE), at(sf));
        Ok(Self {
            model_id,
            current: i16_sf(0, 4)?,
            current_phase: [i16_sf(1, 4)?, i16_sf(2, 4)?, i16_sf(3, 4)?],
            voltage_phase_neutral: i16_sf(5, 13)?,
            voltage_phase: [i16_sf(6, 13)?, i16_sf(7, 13)?, i16_sf(8, 13)?],
            voltage_phase_phase: i16_sf(9, 13)?,
            voltage_line: [i16_sf(10, 13)?, i16_sf(11, 13)?, i16_sf(12, 13)?],
            frequency: i16_sf(14, 15)?,
            power: i16_sf(16, 20)?,
            power_phase: [i16_sf(17, 20)?, i16_sf(18, 20)?, i16_sf(19, 20)?],
            apparent_power: i16_sf(21, 25)?,
            reactive_power: i16_sf(26, 30)?,
            power_factor: i16_sf(31, 35)?,
            exported_energy: acc_sf(36, 52)?,
            exported_energy_phase: [acc_sf(38, 52)?, acc_sf(40, 52)?, acc_sf(42, 52)?],
            imported_energy: acc_sf(44, 52)?,
            imported_energy_phase: [acc_sf(46, 52)?, acc_sf(48, 52)?, acc_sf(50, 52)?],
            events: block.unsigned(at(103), Layout::Bitfield32(BE))?.map(|v| v as u32),
        })
    }
}

impl fmt::Display for MeterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Power:           {} W", self.power)?;
        writeln!(f, "  Current:         {} A", self.current)?;
        writeln!(f, "  Voltage:         {} V", self.voltage_phase_neutral)?;
        writeln!(f, "  Frequency:       {} Hz", self.frequency)?;
        writeln!(f, "  Exported energy: {} Wh", self.exported_energy)?;
        write!(f, "  Imported energy: {} Wh", self.imported_energy)
    }
}

/// A meter in one of the three meter slots of an inverter.
#[derive(Debug)]
pub struct Meter {
    unit_id: u8,
    slot: u8,
    identity: Option<Identity>,
    status: DeviceStatus,
    snapshot: Option<MeterSnapshot>,
    exported: Accumulator,
    imported: Accumulator,
}

impl Meter {
    /// `slot` is 1, 2 or 3.
    pub fn new(unit_id: u8, slot: u8) -> Self {
        Self {
            unit_id,
            slot,
            identity: None,
            status: DeviceStatus::default(),
            snapshot: None,
            exported: Accumulator::default(),
            imported: Accumulator::default(),
        }
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// First register of the common block of this slot.
    pub fn base(&self) -> u16 {
        METER_BASES[(self.slot.clamp(1, 3) - 1) as usize]
    }

    fn model_base(&self) -> u16 {
        self.base() + METER_MODEL_REG_OFFSET
    }

    pub fn snapshot(&self) -> Option<&MeterSnapshot> {
        self.snapshot.as_ref()
    }
}

#[async_trait]
impl Device for Meter {
    fn device_ref(&self) -> DeviceRef {
        DeviceRef::new(self.unit_id, DeviceKind::Meter(self.slot))
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
        let base = self.base();
        let words = gate.read(self.unit_id, base, METER_COMMON_REG_QUAN).await?;
        let identity = Identity::decode_common(&Block::new(base, &words), base)?;
        let header = gate.read(self.unit_id, self.model_base(), 2).await?;
        let model_id = Block::new(self.model_base(), &header).expect_model(
            self.model_base(),
            "meter model 201-204",
            METER_MODEL_IDS,
            METER_MODEL_LENGTH,
        )?;
        log::info!("Found {}: {identity}, SunSpec model {model_id}", self.device_ref());
        self.identity = Some(identity);
        Ok(())
    }

    async fn read_telemetry(&self, gate: &RegisterGate) -> Result<RawBlocks> {
        Ok(vec![
            gate.read(self.unit_id, self.model_base(), METER_MODEL_REG_QUAN)
                .await?,
        ])
    }

    fn decode_snapshot(&mut self, blocks: &[Vec<u16>]) -> std::result::Result<(), proto::Error> {
        let blocks = expect_blocks(blocks, &[METER_MODEL_REG_QUAN])?;
        let mut snapshot = MeterSnapshot::decode(self.model_base(), &blocks[0])?;
        let device = self.device_ref();
        accumulate(&mut self.exported, &mut snapshot.exported_energy, "exported", device);
        accumulate(&mut self.imported, &mut snapshot.imported_energy, "imported", device);
        self.snapshot = Some(snapshot);
        Ok(())
    }
}
