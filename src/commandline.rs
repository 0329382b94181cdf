use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use solaredge_modbus_lib::{
    config::{DeviceList, DEFAULT_PORT},
    sunspec::{AcChargePolicy, StorageControlMode, StorageMode, WriteCommand},
};
use std::{path::PathBuf, time::Duration};

fn parse_unit_id(s: &str) -> Result<u8, String> {
    clap_num::number_range(s, 1, 247)
}

fn parse_device_list(s: &str) -> Result<DeviceList, String> {
    s.parse::<DeviceList>().map_err(|e| e.to_string())
}

/// Registers that can be written with the `write` command.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    /// Export limit control mode bitfield.
    SiteLimitMode,
    /// Site export limit in W.
    SiteLimit,
    /// External production maximum in W.
    ExternalProductionMax,
    /// 0 disabled, 1 self consumption, 2 time of use, 3 backup only, 4 remote control.
    StorageControlMode,
    /// 0 disabled, 1 always allowed, 2 fixed energy limit, 3 percent of production.
    AcChargePolicy,
    AcChargeLimit,
    /// Backup reserve in percent.
    BackupReserve,
    /// Remote control default mode, 0 to 7.
    StorageDefaultMode,
    /// Remote control command timeout in seconds, 0 to 86400.
    CommandTimeout,
    /// Remote control command mode, 0 to 7.
    StorageCommandMode,
    /// Remote control charge limit in W.
    ChargeLimit,
    /// Remote control discharge limit in W.
    DischargeLimit,
    /// Active power limit in percent.
    ActivePowerLimit,
    CosPhi,
    /// Power reduction in percent.
    PowerReduce,
    /// Maximum AC current in A.
    MaxCurrent,
}

fn parse_float(value: &str) -> Result<f32, String> {
    value
        .parse::<f32>()
        .map_err(|e| format!("Invalid number '{value}': {e}"))
}

fn parse_word(value: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(value).map_err(|e| format!("Invalid register value '{value}': {e}"))
}

fn known<T>(value: T, unknown: bool, raw: &str) -> Result<T, String> {
    if unknown {
        Err(format!("Unknown mode '{raw}'"))
    } else {
        Ok(value)
    }
}

impl WriteTarget {
    /// Builds the command from its textual value.
    pub fn command(self, value: &str) -> Result<WriteCommand, String> {
        Ok(match self {
            WriteTarget::SiteLimitMode => WriteCommand::SiteLimitMode(parse_word(value)?),
            WriteTarget::SiteLimit => WriteCommand::SiteLimit(parse_float(value)?),
            WriteTarget::ExternalProductionMax => WriteCommand::ExternalProductionMax(parse_float(value)?),
            WriteTarget::StorageControlMode => {
                let mode = StorageControlMode::decode(parse_word(value)?);
                WriteCommand::StorageControlMode(known(mode, matches!(mode, StorageControlMode::Unknown(_)), value)?)
            }
            WriteTarget::AcChargePolicy => {
                let policy = AcChargePolicy::decode(parse_word(value)?);
                WriteCommand::AcChargePolicy(known(policy, matches!(policy, AcChargePolicy::Unknown(_)), value)?)
            }
            WriteTarget::AcChargeLimit => WriteCommand::AcChargeLimit(parse_float(value)?),
            WriteTarget::BackupReserve => WriteCommand::BackupReserve(parse_float(value)?),
            WriteTarget::StorageDefaultMode => {
                let mode = StorageMode::decode(parse_word(value)?);
                WriteCommand::StorageDefaultMode(known(mode, matches!(mode, StorageMode::Unknown(_)), value)?)
            }
            WriteTarget::CommandTimeout => WriteCommand::CommandTimeout(
                value
                    .parse::<u32>()
                    .map_err(|e| format!("Invalid timeout '{value}': {e}"))?,
            ),
            WriteTarget::StorageCommandMode => {
                let mode = StorageMode::decode(parse_word(value)?);
                WriteCommand::StorageCommandMode(known(mode, matches!(mode, StorageMode::Unknown(_)), value)?)
            }
            WriteTarget::ChargeLimit => WriteCommand::ChargeLimit(parse_float(value)?),
            WriteTarget::DischargeLimit => WriteCommand::DischargeLimit(parse_float(value)?),
            WriteTarget::ActivePowerLimit => WriteCommand::ActivePowerLimit(parse_word(value)?),
            WriteTarget::CosPhi => WriteCommand::CosPhi(parse_float(value)?),
            WriteTarget::PowerReduce => WriteCommand::PowerReduce(parse_float(value)?),
            WriteTarget::MaxCurrent => WriteCommand::MaxCurrent(parse_float(value)?),
        })
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Identify the inverters and list the meters and batteries found behind them.
    Discover,

    /// Read and display the telemetry of every discovered device once.
    Read,

    /// Run in daemon mode: poll all devices at a fixed interval and print them.
    /// Failed polls are repeated with the configured backoff.
    /// Stop with Ctrl-C.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval between polls (e.g., "30s", "5m").
        /// Defaults to the scan interval of the configuration.
        #[arg(value_parser = humantime::parse_duration, short, long, verbatim_doc_comment)]
        poll_interval: Option<Duration>,
    },

    /// Write a setpoint to an inverter.
    /// **Warning:** storage and export limit settings change the behaviour of
    /// the installation and persist in the inverter.
    #[clap(verbatim_doc_comment)]
    Write {
        /// Unit id of the inverter (1 to 247).
        #[arg(short, long, value_parser = parse_unit_id)]
        unit: u8,

        /// The setting to write.
        #[arg(value_enum)]
        target: WriteTarget,

        /// New value. Modes and bitfields also accept hexadecimal, e.g. "0x1".
        value: String,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
}

const fn about_text() -> &'static str {
    "SolarEdge Modbus hub CLI - Poll and control SolarEdge inverters, meters and batteries via Modbus/TCP."
}

#[derive(Parser, Debug)]
#[command(name="se-hub", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: CliCommands,

    /// YAML configuration file. Replaces all connection options below.
    #[arg(global = true, short, long)]
    pub config: Option<PathBuf>,

    /// IP address or hostname of the inverter.
    #[arg(global = true, long)]
    pub host: Option<String>,

    /// Modbus/TCP port.
    #[arg(global = true, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Inverter unit ids, e.g. "1" or "1,3-4".
    #[arg(global = true, long, default_value = "1", value_parser = parse_device_list)]
    pub device_list: DeviceList,

    /// Do not probe the meter slots.
    #[arg(global = true, long)]
    pub no_meters: bool,

    /// Do not probe the battery slots.
    #[arg(global = true, long)]
    pub no_batteries: bool,

    /// Read the storage and site limit control registers.
    #[arg(global = true, long)]
    pub storage_control: bool,

    /// Keep the connection open between polls instead of reconnecting.
    #[arg(global = true, long)]
    pub keep_open: bool,

    /// Modbus response timeout.
    /// Examples: "3s", "500ms".
    #[arg(global = true, long, default_value = "3s", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Additional attempts for failed reads.
    #[arg(global = true, long, default_value_t = 3)]
    pub retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_targets() {
        assert_eq!(
            WriteTarget::BackupReserve.command("42.5"),
            Ok(WriteCommand::BackupReserve(42.5))
        );
        assert_eq!(
            WriteTarget::StorageControlMode.command("0x4"),
            Ok(WriteCommand::StorageControlMode(StorageControlMode::RemoteControl))
        );
        assert!(WriteTarget::StorageCommandMode.command("6").is_err());
        assert!(WriteTarget::SiteLimit.command("lots").is_err());
        assert_eq!(
            WriteTarget::CommandTimeout.command("3600"),
            Ok(WriteCommand::CommandTimeout(3600))
        );
        assert!(WriteTarget::CommandTimeout.command("-5").is_err());
    }

    #[test]
    fn parse_arguments() {
        let args = CliArgs::try_parse_from([
            "se-hub",
            "--host",
            "192.168.1.50",
            "--device-list",
            "1-2",
            "write",
            "--unit",
            "2",
            "active-power-limit",
            "80",
            "--yes",
        ])
        .unwrap();
        assert_eq!(args.host.as_deref(), Some("192.168.1.50"));
        assert_eq!(args.device_list.ids(), &[1, 2]);
        assert_eq!(
            args.command,
            CliCommands::Write {
                unit: 2,
                target: WriteTarget::ActivePowerLimit,
                value: "80".to_string(),
                yes: true,
            }
        );
        assert!(CliArgs::try_parse_from(["se-hub", "write", "--unit", "0", "cos-phi", "1"]).is_err());
    }
}
