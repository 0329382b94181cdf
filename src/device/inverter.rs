//! SunSpec inverter (models 101 to 103) with its meters and batteries.

use super::{accumulate, expect_blocks, Battery, Device, DeviceRef, DeviceStatus, Identity, Meter, RawBlocks};
use crate::{
    gate::RegisterGate,
    protocol::{self as proto, Accumulator, Decoded, Layout},
    sunspec::{
        Block, InverterStatus, StorageControl, BE, INVERTER_COMMON_REG_ADDR, INVERTER_COMMON_REG_QUAN,
        INVERTER_MODEL_IDS, INVERTER_MODEL_LENGTH, INVERTER_MODEL_REG_ADDR, INVERTER_TELEMETRY_REG_ADDR,
        INVERTER_TELEMETRY_REG_QUAN, STORAGE_CONTROL_REG_ADDR, STORAGE_CONTROL_REG_QUAN, STRING8,
        SUNSPEC_MARKER,
    },
    tokio_common::Result,
};
use async_trait::async_trait;
use std::fmt;

/// One inverter poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InverterSnapshot {
    /// SunSpec model id, 101 single phase, 102 split phase, 103 three phase.
    pub model_id: u16,
    pub firmware_version: Decoded<String>,
    /// A
    pub ac_current: Decoded<f64>,
    pub ac_current_phase: [Decoded<f64>; 3],
    /// V, phase to phase AB, BC, CA
    pub ac_voltage_line: [Decoded<f64>; 3],
    /// V, phase to neutral AN, BN, CN
    pub ac_voltage_phase: [Decoded<f64>; 3],
    /// W
    pub ac_power: Decoded<f64>,
    /// Hz
    pub ac_frequency: Decoded<f64>,
    /// VA
    pub ac_apparent_power: Decoded<f64>,
    /// var
    pub ac_reactive_power: Decoded<f64>,
    /// %
    pub ac_power_factor: Decoded<f64>,
    /// Wh, lifetime
    pub ac_energy: Decoded<f64>,
    pub dc_current: Decoded<f64>,
    pub dc_voltage: Decoded<f64>,
    pub dc_power: Decoded<f64>,
    /// °C
    pub temperature_cabinet: Decoded<f64>,
    pub temperature_heat_sink: Decoded<f64>,
    pub temperature_transformer: Decoded<f64>,
    pub temperature_other: Decoded<f64>,
    pub status: Decoded<InverterStatus>,
    pub vendor_status: Decoded<u16>,
    /// Present if site limit or storage control is enabled.
    pub storage_control: Option<StorageControl>,
}

impl InverterSnapshot {
    /// Decodes the 65 register telemetry block starting at 40044.
    pub fn decode(words: &[u16]) -> std::result::Result<Self, proto::Error> {
        let block = Block::new(INVERTER_TELEMETRY_REG_ADDR, words);
        let model_id = block.expect_model(
            INVERTER_MODEL_REG_ADDR,
            "inverter model 101-103",
            INVERTER_MODEL_IDS,
            INVERTER_MODEL_LENGTH,
        )?;
        let i16_sf = |address, sf| block.scaled(address, Layout::I16, sf);
        let u16_sf = |address, sf| block.scaled(address, Layout::U16, sf);
        Ok(Self {
            model_id,
            firmware_version: block.text(40044, STRING8)?,
            ac_current: u16_sf(40071, 40075)?,
            ac_current_phase: [u16_sf(40072, 40075)?, u16_sf(40073, 40075)?, u16_sf(40074, 40075)?],
            ac_voltage_line: [u16_sf(40076, 40082)?, u16_sf(40077, 40082)?, u16_sf(40078, 40082)?],
            ac_voltage_phase: [u16_sf(40079, 40082)?, u16_sf(40080, 40082)?, u16_sf(40081, 40082)?],
            ac_power: i16_sf(40083, 40084)?,
            ac_frequency: u16_sf(40085, 40086)?,
            ac_apparent_power: i16_sf(40087, 40088)?,
            ac_reactive_power: i16_sf(40089, 40090)?,
            ac_power_factor: i16_sf(40091, 40092)?,
            ac_energy: block.scaled(40093, Layout::Acc32(BE), 40095)?,
            dc_current: u16_sf(40096, 40097)?,
            dc_voltage: u16_sf(40098, 40099)?,
            dc_power: i16_sf(40100, 40101)?,
            temperature_cabinet: i16_sf(40102, 40106)?,
            temperature_heat_sink: i16_sf(40103, 40106)?,
            temperature_transformer: i16_sf(40104, 40106)?,
            temperature_other: i16_sf(40105, 40106)?,
            status: block
                .unsigned(40107, Layout::Enum16)?
                .map(|v| InverterStatus::decode(v as u16)),
            vendor_status: block.unsigned(40108, Layout::Enum16)?.map(|v| v as u16),
            storage_control: None,
        })
    }

    pub fn phases(&self) -> u8 {
        match self.model_id {
            102 => 2,
            103 => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for InverterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Status:        {}", self.status)?;
        writeln!(f, "  AC power:      {} W", self.ac_power)?;
        writeln!(f, "  AC current:    {} A", self.ac_current)?;
        for (phase, voltage) in ["AN", "BN", "CN"]
            .iter()
            .zip(&self.ac_voltage_phase)
            .take(self.phases() as usize)
        {
            writeln!(f, "  AC voltage {phase}: {voltage} V")?;
        }
        writeln!(f, "  AC frequency:  {} Hz", self.ac_frequency)?;
        writeln!(f, "  Power factor:  {} %", self.ac_power_factor)?;
        writeln!(f, "  Energy:        {} Wh", self.ac_energy)?;
        writeln!(f, "  DC power:      {} W", self.dc_power)?;
        writeln!(f, "  DC voltage:    {} V", self.dc_voltage)?;
        write!(f, "  Heat sink:     {} °C", self.temperature_heat_sink)?;
        if let Some(control) = &self.storage_control {
            write!(f, "\n{control}")?;
        }
        Ok(())
    }
}

/// An inverter unit and everything discovered behind it.
#[derive(Debug)]
pub struct Inverter {
    unit_id: u8,
    read_storage_control: bool,
    identity: Option<Identity>,
    model_id: Option<u16>,
    status: DeviceStatus,
    snapshot: Option<InverterSnapshot>,
    energy: Accumulator,
    pub meters: Vec<Meter>,
    pub batteries: Vec<Battery>,
}

impl Inverter {
    pub fn new(unit_id: u8, read_storage_control: bool) -> Self {
        Self {
            unit_id,
            read_storage_control,
            identity: None,
            model_id: None,
            status: DeviceStatus::default(),
            snapshot: None,
            energy: Accumulator::default(),
            meters: Vec::new(),
            batteries: Vec::new(),
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// SunSpec model id found during discovery.
    pub fn model_id(&self) -> Option<u16> {
        self.model_id
    }

    pub fn snapshot(&self) -> Option<&InverterSnapshot> {
        self.snapshot.as_ref()
    }

    /// The inverter followed by its meters and batteries.
    pub fn devices(&self) -> Vec<&dyn Device> {
        let mut devices: Vec<&dyn Device> = vec![self as &dyn Device];
        devices.extend(self.meters.iter().map(|m| m as &dyn Device));
        devices.extend(self.batteries.iter().map(|b| b as &dyn Device));
        devices
    }

    /// Visits the same devices as [`Inverter::devices`], in the same order.
    pub fn for_each_device_mut<F: FnMut(&mut dyn Device)>(&mut self, mut f: F) {
        f(&mut *self);
        for meter in &mut self.meters {
            f(meter);
        }
        for battery in &mut self.batteries {
            f(battery);
        }
    }

    pub fn device(&self, kind: super::DeviceKind) -> Option<&dyn Device> {
        self.devices().into_iter().find(|d| d.device_ref().kind == kind)
    }
}

#[async_trait]
impl Device for Inverter {
    fn device_ref(&self) -> DeviceRef {
        DeviceRef::inverter(self.unit_id)
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
        let words = gate
            .read(self.unit_id, INVERTER_COMMON_REG_ADDR, INVERTER_COMMON_REG_QUAN)
            .await?;
        let block = Block::new(INVERTER_COMMON_REG_ADDR, &words);
        if *block.words(INVERTER_COMMON_REG_ADDR, 2)? != SUNSPEC_MARKER[..] {
            return Err(proto::Error::MissingSunSpecMarker.into());
        }
        let identity = Identity::decode_common(&block, INVERTER_COMMON_REG_ADDR + 2)?;

        let header = gate.read(self.unit_id, INVERTER_MODEL_REG_ADDR, 2).await?;
        let model_id = Block::new(INVERTER_MODEL_REG_ADDR, &header).expect_model(
            INVERTER_MODEL_REG_ADDR,
            "inverter model 101-103",
            INVERTER_MODEL_IDS,
            INVERTER_MODEL_LENGTH,
        )?;

        log::info!(
            "Found inverter on unit {}: {identity}, SunSpec model {model_id}",
            self.unit_id
        );
        self.identity = Some(identity);
        self.model_id = Some(model_id);
        Ok(())
    }

    async fn read_telemetry(&self, gate: &RegisterGate) -> Result<RawBlocks> {
        let mut blocks = vec![
            gate.read(self.unit_id, INVERTER_TELEMETRY_REG_ADDR, INVERTER_TELEMETRY_REG_QUAN)
                .await?,
        ];
        if self.read_storage_control {
            blocks.push(
                gate.read(self.unit_id, STORAGE_CONTROL_REG_ADDR, STORAGE_CONTROL_REG_QUAN)
                    .await?,
            );
        }
        Ok(blocks)
    }

    fn decode_snapshot(&mut self, blocks: &[Vec<u16>]) -> std::result::Result<(), proto::Error> {
        let lengths: &[u16] = if self.read_storage_control {
            &[INVERTER_TELEMETRY_REG_QUAN, STORAGE_CONTROL_REG_QUAN]
        } else {
            &[INVERTER_TELEMETRY_REG_QUAN]
        };
        let blocks = expect_blocks(blocks, lengths)?;
        let mut snapshot = InverterSnapshot::decode(&blocks[0])?;
        if let Some(words) = blocks.get(1) {
            snapshot.storage_control = Some(StorageControl::decode(words)?);
        }
        if let Some(identity) = &mut self.identity {
            if let Decoded::Value(version) = &snapshot.firmware_version {
                if *version != identity.version {
                    log::info!(
                        "Inverter on unit {} changed firmware from {} to {version}",
                        self.unit_id,
                        identity.version
                    );
                    identity.version = version.clone();
                }
            }
        }
        let device = self.device_ref();
        accumulate(&mut self.energy, &mut snapshot.ac_energy, "AC", device);
        self.snapshot = Some(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::fixtures,
        gate::GateOptions,
        tokio_common::Error,
        transport::{mock::MockTransport, ConnectMode, Connection},
    };
    use assert_matches::assert_matches;

    fn telemetry() -> Vec<u16> {
        let mut words = fixtures::inverter_common(1)[44..].to_vec();
        words.extend(fixtures::inverter_model());
        words
    }

    fn gate(mock: &MockTransport) -> RegisterGate {
        let conn = Connection::new("127.0.0.1", 1502, ConnectMode::Persistent, Box::new(mock.clone()));
        RegisterGate::new(conn, GateOptions::default())
    }

    #[test]
    fn decode_telemetry() {
        let snapshot = InverterSnapshot::decode(&telemetry()).unwrap();
        assert_eq!(snapshot.model_id, 101);
        assert_eq!(snapshot.phases(), 1);
        assert_eq!(snapshot.firmware_version, Decoded::Value("0004.0020.0036".to_string()));
        assert_eq!(snapshot.ac_current, Decoded::Value(12.34));
        assert_eq!(snapshot.ac_current_phase[1], Decoded::NotApplicable);
        assert_eq!(snapshot.ac_voltage_phase[0], Decoded::Value(230.0));
        assert_eq!(snapshot.ac_power, Decoded::Value(500.0));
        assert_eq!(snapshot.ac_frequency, Decoded::Value(50.0));
        assert_eq!(snapshot.ac_reactive_power, Decoded::Value(-25.0));
        assert_eq!(snapshot.ac_power_factor, Decoded::Value(98.0));
        assert_eq!(snapshot.ac_energy, Decoded::Value(100_000.0));
        assert_eq!(snapshot.dc_current, Decoded::Value(13.0));
        assert_eq!(snapshot.dc_voltage, Decoded::Value(380.0));
        assert_eq!(snapshot.dc_power, Decoded::Value(523.0));
        assert_eq!(snapshot.temperature_cabinet, Decoded::NotApplicable);
        assert_eq!(snapshot.temperature_heat_sink, Decoded::Value(42.15));
        assert_eq!(snapshot.status, Decoded::Value(InverterStatus::Producing));
        assert_eq!(snapshot.vendor_status, Decoded::Value(0));
    }

    #[test]
    fn telemetry_header_is_validated() {
        let mut words = telemetry();
        words[25] = 160;
        assert_matches!(
            InverterSnapshot::decode(&words),
            Err(proto::Error::UnexpectedModel { actual: 160, .. })
        );
        let mut words = telemetry();
        words[26] = 49;
        assert_matches!(
            InverterSnapshot::decode(&words),
            Err(proto::Error::UnexpectedModel { length: 49, .. })
        );
    }

    #[test]
    fn failed_decode_keeps_previous_snapshot() {
        let mut inverter = Inverter::new(1, false);
        assert!(inverter.apply_update(Ok(vec![telemetry()])));
        let mut broken = telemetry();
        broken[31] = 0x0020; // current scale factor 32
        assert!(!inverter.apply_update(Ok(vec![broken])));
        assert_eq!(inverter.snapshot().unwrap().ac_power, Decoded::Value(500.0));
        assert!(!inverter.status().last_update_success);
        assert_eq!(
            inverter.status().last_error,
            Some(crate::tokio_common::ErrorKind::ProtocolError)
        );
    }

    #[test]
    fn decreasing_energy_is_not_applicable() {
        let mut inverter = Inverter::new(1, false);
        assert!(inverter.apply_update(Ok(vec![telemetry()])));
        let mut lower = telemetry();
        lower[49] = 0x0000; // energy high word, 100000 -> 34464
        assert!(inverter.apply_update(Ok(vec![lower])));
        assert_eq!(inverter.snapshot().unwrap().ac_energy, Decoded::NotApplicable);
    }

    #[tokio::test]
    async fn identity_and_telemetry_reads() {
        let mock = MockTransport::new();
        mock.set_block(1, 40000, &fixtures::inverter_common(1));
        mock.set_block(1, 40069, &fixtures::inverter_model());
        let gate = gate(&mock);

        let mut inverter = Inverter::new(1, false);
        inverter.read_identity(&gate).await.unwrap();
        assert_eq!(inverter.identity().unwrap().model, "SE5000H");
        assert!(inverter.update(&gate).await);
        assert_eq!(
            mock.log().reads,
            vec![(1, 40000, 69), (1, 40069, 2), (1, 40044, 65)]
        );
    }

    #[tokio::test]
    async fn missing_marker_is_rejected() {
        let mock = MockTransport::new();
        let mut common = fixtures::inverter_common(1);
        common[0] = 0;
        mock.set_block(1, 40000, &common);
        let mut inverter = Inverter::new(1, false);
        assert_matches!(
            inverter.read_identity(&gate(&mock)).await,
            Err(Error::ProtocolError(proto::Error::MissingSunSpecMarker))
        );
        assert!(inverter.identity().is_none());
    }
}
