//! SolarEdge SunSpec register map.
//!
//! Addresses are Modbus PDU addresses, sent on the wire exactly as listed.
//! SunSpec model blocks use big endian word order, the SolarEdge extension
//! registers at 0xE000 and above use little endian word order.

use crate::protocol::{self as proto, Decoded, Layout, Value, WordOrder};
use std::fmt;

pub const SUNSPEC_MARKER: [u16; 2] = [0x5375, 0x6E53];
pub const COMMON_MODEL_ID: u16 = 1;
pub const COMMON_MODEL_LENGTH: u16 = 65;
pub const STRING16: Layout = Layout::Ascii(16);
pub const STRING8: Layout = Layout::Ascii(8);

pub(crate) const BE: WordOrder = WordOrder::BigEndian;
pub(crate) const LE: WordOrder = WordOrder::LittleEndian;

pub const INVERTER_COMMON_REG_ADDR: u16 = 40000;
pub const INVERTER_COMMON_REG_QUAN: u16 = 69;

/// First register of the inverter model block (DID).
pub const INVERTER_MODEL_REG_ADDR: u16 = 40069;
pub const INVERTER_MODEL_LENGTH: u16 = 50;
pub const INVERTER_MODEL_IDS: std::ops::RangeInclusive<u16> = 101..=103;

/// The telemetry read starts at the common block version field so that a
/// firmware update is noticed, and ends with the vendor status.
pub const INVERTER_TELEMETRY_REG_ADDR: u16 = 40044;
pub const INVERTER_TELEMETRY_REG_QUAN: u16 = 65;

pub const STORAGE_CONTROL_REG_ADDR: u16 = 0xE000;
pub const STORAGE_CONTROL_REG_QUAN: u16 = 20;
/// Upper bound of the remote control command timeout in seconds.
pub const MAX_COMMAND_TIMEOUT: u32 = 86_400;

pub const METER_BASES: [u16; 3] = [40121, 40295, 40469];
pub const METER_COMMON_REG_QUAN: u16 = 67;
/// The meter model block follows the common block.
pub const METER_MODEL_REG_OFFSET: u16 = 67;
pub const METER_MODEL_REG_QUAN: u16 = 107;
pub const METER_MODEL_LENGTH: u16 = 105;
pub const METER_MODEL_IDS: std::ops::RangeInclusive<u16> = 201..=204;

pub const BATTERY_BASES: [u16; 3] = [0xE100, 0xE200, 0xE400];
pub const BATTERY_INFO_REG_QUAN: u16 = 0x4C;
pub const BATTERY_TELEMETRY_REG_OFFSET: u16 = 0x6C;
pub const BATTERY_TELEMETRY_REG_QUAN: u16 = 0x1E;

/// A contiguous block of registers read in one request.
///
/// Values are addressed by their absolute register address.
#[derive(Debug, Clone, Copy)]
pub struct Block<'a> {
    base: u16,
    words: &'a [u16],
}

impl<'a> Block<'a> {
    pub fn new(base: u16, words: &'a [u16]) -> Self {
        Self { base, words }
    }

    pub fn words(&self, address: u16, count: usize) -> Result<&'a [u16], proto::Error> {
        let start = address.wrapping_sub(self.base) as usize;
        self.words
            .get(start..start + count)
            .ok_or(proto::Error::WordCount {
                expected: start + count,
                actual: self.words.len(),
            })
    }

    pub fn word(&self, address: u16) -> Result<u16, proto::Error> {
        Ok(self.words(address, 1)?[0])
    }

    pub fn value(&self, address: u16, layout: Layout) -> Result<Decoded<Value>, proto::Error> {
        proto::decode(self.words(address, layout.words())?, layout)
    }

    pub fn scaled(&self, address: u16, layout: Layout, scale_factor: u16) -> Result<Decoded<f64>, proto::Error> {
        proto::decode_scaled(self.words(address, layout.words())?, layout, self.word(scale_factor)?)
    }

    pub fn text(&self, address: u16, layout: Layout) -> Result<Decoded<String>, proto::Error> {
        Ok(proto::decode_string(self.words(address, layout.words())?))
    }

    pub fn unsigned(&self, address: u16, layout: Layout) -> Result<Decoded<u64>, proto::Error> {
        Ok(self.value(address, layout)?.map(|v| match v {
            Value::Unsigned(v) => v,
            Value::Signed(v) => v as u64,
            Value::Float(v) => v as u64,
            Value::Text(_) => 0,
        }))
    }

    pub fn float(&self, address: u16) -> Result<Decoded<f64>, proto::Error> {
        Ok(self
            .value(address, Layout::Float32(LE))?
            .map(|v| v.as_f64().unwrap_or(f64::NAN)))
    }

    /// Checks a SunSpec model header, `DID` followed by `L`.
    pub fn expect_model(
        &self,
        address: u16,
        expected: &'static str,
        ids: std::ops::RangeInclusive<u16>,
        length: u16,
    ) -> Result<u16, proto::Error> {
        let (id, len) = (self.word(address)?, self.word(address + 1)?);
        if ids.contains(&id) && len == length {
            Ok(id)
        } else {
            Err(proto::Error::UnexpectedModel {
                expected,
                actual: id,
                length: len,
            })
        }
    }
}

macro_rules! register_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant,)+
            Unknown(u16),
        }

        impl $name {
            pub fn decode(value: u16) -> Self {
                match value {
                    $($value => $name::$variant,)+
                    other => $name::Unknown(other),
                }
            }

            pub fn encode(&self) -> u16 {
                match self {
                    $($name::$variant => $value,)+
                    $name::Unknown(other) => *other,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($name::$variant => write!(f, $label),)+
                    $name::Unknown(other) => write!(f, "Unknown ({other})"),
                }
            }
        }
    };
}

register_enum! {
    /// Inverter operating state, `I_Status`.
    InverterStatus {
        Off = 1 => "Off",
        Sleeping = 2 => "Sleeping",
        Starting = 3 => "Starting",
        Producing = 4 => "Producing (MPPT)",
        Throttled = 5 => "Throttled",
        ShuttingDown = 6 => "Shutting down",
        Fault = 7 => "Fault",
        Standby = 8 => "Standby",
    }
}

register_enum! {
    /// Battery state as reported by the inverter.
    BatteryStatus {
        Off = 0 => "Off",
        Standby = 1 => "Standby",
        Init = 2 => "Init",
        Charge = 3 => "Charge",
        Discharge = 4 => "Discharge",
        Fault = 5 => "Fault",
        PreserveCharge = 6 => "Preserve charge",
        Idle = 7 => "Idle",
        PowerSaving = 10 => "Power saving",
    }
}

register_enum! {
    /// Storage control mode at 0xE004.
    StorageControlMode {
        Disabled = 0 => "Disabled",
        MaximizeSelfConsumption = 1 => "Maximize self consumption",
        TimeOfUse = 2 => "Time of use",
        BackupOnly = 3 => "Backup only",
        RemoteControl = 4 => "Remote control",
    }
}

register_enum! {
    /// Storage AC charge policy at 0xE005.
    AcChargePolicy {
        Disabled = 0 => "Disabled",
        AlwaysAllowed = 1 => "Always allowed",
        FixedEnergyLimit = 2 => "Fixed energy limit",
        PercentOfProduction = 3 => "Percent of production",
    }
}

register_enum! {
    /// Remote control charge/discharge mode at 0xE00A and 0xE00D.
    StorageMode {
        SolarPowerOnly = 0 => "Solar power only",
        ChargeFromClippedSolar = 1 => "Charge from clipped solar power",
        ChargeFromSolar = 2 => "Charge from solar power",
        ChargeFromSolarAndGrid = 3 => "Charge from solar power and grid",
        DischargeToMaximizeExport = 4 => "Discharge to maximize export",
        DischargeToMinimizeImport = 5 => "Discharge to minimize import",
        MaximizeSelfConsumption = 7 => "Maximize self consumption",
    }
}

/// Setpoint writes supported on the inverter unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteCommand {
    /// Export limit control mode bitfield, 0xE000.
    SiteLimitMode(u16),
    /// Site export limit in W, 0xE002.
    SiteLimit(f32),
    /// External production maximum in W, 0xE012.
    ExternalProductionMax(f32),
    StorageControlMode(StorageControlMode),
    AcChargePolicy(AcChargePolicy),
    /// AC charge limit in kWh or percent, 0xE006.
    AcChargeLimit(f32),
    /// Backup reserve in percent, 0xE008.
    BackupReserve(f32),
    StorageDefaultMode(StorageMode),
    /// Remote control command timeout in seconds, 0 to 86400, 0xE00B.
    CommandTimeout(u32),
    StorageCommandMode(StorageMode),
    /// Remote control charge limit in W, 0xE00E.
    ChargeLimit(f32),
    /// Remote control discharge limit in W, 0xE010.
    DischargeLimit(f32),
    /// Active power limit in percent, 0xF001.
    ActivePowerLimit(u16),
    /// Power factor setpoint, 0xF002.
    CosPhi(f32),
    /// Power reduction in percent, 0xF140.
    PowerReduce(f32),
    /// Maximum AC current in A, 0xF18E.
    MaxCurrent(f32),
}

impl WriteCommand {
    pub fn name(&self) -> &'static str {
        match self {
            WriteCommand::SiteLimitMode(_) => "site limit mode",
            WriteCommand::SiteLimit(_) => "site limit",
            WriteCommand::ExternalProductionMax(_) => "external production max",
            WriteCommand::StorageControlMode(_) => "storage control mode",
            WriteCommand::AcChargePolicy(_) => "AC charge policy",
            WriteCommand::AcChargeLimit(_) => "AC charge limit",
            WriteCommand::BackupReserve(_) => "backup reserve",
            WriteCommand::StorageDefaultMode(_) => "storage default mode",
            WriteCommand::CommandTimeout(_) => "command timeout",
            WriteCommand::StorageCommandMode(_) => "storage command mode",
            WriteCommand::ChargeLimit(_) => "charge limit",
            WriteCommand::DischargeLimit(_) => "discharge limit",
            WriteCommand::ActivePowerLimit(_) => "active power limit",
            WriteCommand::CosPhi(_) => "cos phi",
            WriteCommand::PowerReduce(_) => "power reduce",
            WriteCommand::MaxCurrent(_) => "max current",
        }
    }

    pub fn address(&self) -> u16 {
        match self {
            WriteCommand::SiteLimitMode(_) => 0xE000,
            WriteCommand::SiteLimit(_) => 0xE002,
            WriteCommand::ExternalProductionMax(_) => 0xE012,
            WriteCommand::StorageControlMode(_) => 0xE004,
            WriteCommand::AcChargePolicy(_) => 0xE005,
            WriteCommand::AcChargeLimit(_) => 0xE006,
            WriteCommand::BackupReserve(_) => 0xE008,
            WriteCommand::StorageDefaultMode(_) => 0xE00A,
            WriteCommand::CommandTimeout(_) => 0xE00B,
            WriteCommand::StorageCommandMode(_) => 0xE00D,
            WriteCommand::ChargeLimit(_) => 0xE00E,
            WriteCommand::DischargeLimit(_) => 0xE010,
            WriteCommand::ActivePowerLimit(_) => 0xF001,
            WriteCommand::CosPhi(_) => 0xF002,
            WriteCommand::PowerReduce(_) => 0xF140,
            WriteCommand::MaxCurrent(_) => 0xF18E,
        }
    }

    /// Validates the setpoint and encodes the register payload.
    pub fn encode(&self) -> Result<Vec<u16>, proto::Error> {
        let float = |value: f32, min: f64, max: f64| {
            let name = self.name();
            let value = value as f64;
            if value.is_finite() && (min..=max).contains(&value) {
                proto::encode_number(value, Layout::Float32(LE))
            } else {
                Err(proto::Error::CommandOutOfRange { name, value, min, max })
            }
        };
        match *self {
            WriteCommand::SiteLimitMode(bits) => proto::encode_number(bits as f64, Layout::Bitfield16),
            WriteCommand::SiteLimit(watts) | WriteCommand::ExternalProductionMax(watts) => {
                float(watts, 0.0, 1_000_000.0)
            }
            WriteCommand::StorageControlMode(mode) => Ok(vec![mode.encode()]),
            WriteCommand::AcChargePolicy(policy) => Ok(vec![policy.encode()]),
            WriteCommand::AcChargeLimit(limit) => float(limit, 0.0, 100_000_000.0),
            WriteCommand::BackupReserve(percent) | WriteCommand::PowerReduce(percent) => {
                float(percent, 0.0, 100.0)
            }
            WriteCommand::StorageDefaultMode(mode) | WriteCommand::StorageCommandMode(mode) => {
                Ok(vec![mode.encode()])
            }
            WriteCommand::CommandTimeout(seconds) => {
                if seconds <= MAX_COMMAND_TIMEOUT {
                    proto::encode(&Value::Unsigned(seconds as u64), Layout::U32(LE))
                } else {
                    Err(proto::Error::CommandOutOfRange {
                        name: self.name(),
                        value: seconds as f64,
                        min: 0.0,
                        max: MAX_COMMAND_TIMEOUT as f64,
                    })
                }
            }
            WriteCommand::ChargeLimit(watts) | WriteCommand::DischargeLimit(watts) => {
                float(watts, 0.0, 20_000.0)
            }
            WriteCommand::ActivePowerLimit(percent) => {
                if percent <= 100 {
                    Ok(vec![percent])
                } else {
                    Err(proto::Error::CommandOutOfRange {
                        name: self.name(),
                        value: percent as f64,
                        min: 0.0,
                        max: 100.0,
                    })
                }
            }
            WriteCommand::CosPhi(pf) => float(pf, -1.0, 1.0),
            WriteCommand::MaxCurrent(amps) => float(amps, 0.0, 256.0),
        }
    }
}

impl fmt::Display for WriteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = ", self.name())?;
        match self {
            WriteCommand::SiteLimitMode(bits) => write!(f, "{bits:#06x}"),
            WriteCommand::StorageControlMode(mode) => write!(f, "{mode}"),
            WriteCommand::AcChargePolicy(policy) => write!(f, "{policy}"),
            WriteCommand::StorageDefaultMode(mode) | WriteCommand::StorageCommandMode(mode) => {
                write!(f, "{mode}")
            }
            WriteCommand::CommandTimeout(seconds) => write!(f, "{seconds} s"),
            WriteCommand::ActivePowerLimit(percent) => write!(f, "{percent} %"),
            WriteCommand::SiteLimit(v)
            | WriteCommand::ExternalProductionMax(v)
            | WriteCommand::AcChargeLimit(v)
            | WriteCommand::BackupReserve(v)
            | WriteCommand::ChargeLimit(v)
            | WriteCommand::DischargeLimit(v)
            | WriteCommand::CosPhi(v)
            | WriteCommand::PowerReduce(v)
            | WriteCommand::MaxCurrent(v) => write!(f, "{v}"),
        }
    }
}

/// Site limit and storage control settings, read from 0xE000.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageControl {
    pub site_limit_mode: Decoded<u16>,
    pub site_limit_control: Decoded<u16>,
    pub site_limit: Decoded<f64>,
    pub control_mode: Decoded<StorageControlMode>,
    pub ac_charge_policy: Decoded<AcChargePolicy>,
    pub ac_charge_limit: Decoded<f64>,
    pub backup_reserve: Decoded<f64>,
    pub default_mode: Decoded<StorageMode>,
    pub command_timeout: Decoded<u32>,
    pub command_mode: Decoded<StorageMode>,
    pub charge_limit: Decoded<f64>,
    pub discharge_limit: Decoded<f64>,
    pub external_production_max: Decoded<f64>,
}

impl StorageControl {
    pub fn decode(words: &[u16]) -> Result<Self, proto::Error> {
        let block = Block::new(STORAGE_CONTROL_REG_ADDR, words);
        let u16_at = |address| -> Result<Decoded<u16>, proto::Error> {
            Ok(block.unsigned(address, Layout::U16)?.map(|v| v as u16))
        };
        Ok(Self {
            site_limit_mode: u16_at(0xE000)?,
            site_limit_control: u16_at(0xE001)?,
            site_limit: block.float(0xE002)?,
            control_mode: u16_at(0xE004)?.map(StorageControlMode::decode),
            ac_charge_policy: u16_at(0xE005)?.map(AcChargePolicy::decode),
            ac_charge_limit: block.float(0xE006)?,
            backup_reserve: block.float(0xE008)?,
            default_mode: u16_at(0xE00A)?.map(StorageMode::decode),
            command_timeout: block.unsigned(0xE00B, Layout::U32(LE))?.map(|v| v as u32),
            command_mode: u16_at(0xE00D)?.map(StorageMode::decode),
            charge_limit: block.float(0xE00E)?,
            discharge_limit: block.float(0xE010)?,
            external_production_max: block.float(0xE012)?,
        })
    }
}

impl fmt::Display for StorageControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Site limit mode:      {}", self.site_limit_mode)?;
        writeln!(f, "  Site limit:           {} W", self.site_limit)?;
        writeln!(f, "  Storage control mode: {}", self.control_mode)?;
        writeln!(f, "  AC charge policy:     {}", self.ac_charge_policy)?;
        writeln!(f, "  AC charge limit:      {}", self.ac_charge_limit)?;
        writeln!(f, "  Backup reserve:       {} %", self.backup_reserve)?;
        writeln!(f, "  Default mode:         {}", self.default_mode)?;
        writeln!(f, "  Command timeout:      {} s", self.command_timeout)?;
        writeln!(f, "  Command mode:         {}", self.command_mode)?;
        writeln!(f, "  Charge limit:         {} W", self.charge_limit)?;
        write!(f, "  Discharge limit:      {} W", self.discharge_limit)
    }
}
