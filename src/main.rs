//! SolarEdge Modbus hub CLI
//!
//! A command-line interface (CLI) application for SolarEdge inverters with
//! their meters and batteries, talking SunSpec over Modbus/TCP.
//!
//! This tool allows users to:
//! - Discover the inverters of a device list and the devices behind them.
//! - Read the telemetry of every discovered device.
//! - Run in a continuous daemon mode that polls at a fixed interval.
//! - Write storage, export limit and power control setpoints.
//!
//! The CLI leverages the `solaredge_modbus_lib` crate for the hub and the
//! register codec.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use solaredge_modbus_lib::{
    config::HubConfig,
    device::{Device, DeviceRef, Inverter},
    hub::{Backoff, Hub},
    sunspec::WriteCommand,
    tokio_common::Error,
};
use std::panic;
use tokio::time::MissedTickBehavior;

mod commandline;

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .context("Cannot init logging")?
        .start()
        .context("Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    Ok(log_handle)
}

/// Builds the hub configuration from the config file or the command line.
fn hub_config(args: &commandline::CliArgs) -> Result<HubConfig> {
    if let Some(path) = &args.config {
        return HubConfig::from_yaml_file(path)
            .with_context(|| format!("Cannot load configuration from {}", path.display()));
    }
    let Some(host) = &args.host else {
        bail!("Either --config or --host is required");
    };
    let mut config = HubConfig::new(host.clone(), args.device_list.clone());
    config.port = args.port;
    config.detect_meters = !args.no_meters;
    config.detect_batteries = !args.no_batteries;
    config.adv_storage_control = args.storage_control;
    config.keep_modbus_open = args.keep_open;
    config.modbus.timeout = args.timeout;
    config.modbus.retries = args.retries;
    config.validate().context("Invalid connection options")?;
    Ok(config)
}

fn print_identity(device: &dyn Device) {
    match device.identity() {
        Some(identity) => println!("{}: {identity}", device.device_ref()),
        None => println!("{}: not identified", device.device_ref()),
    }
}

fn print_inverter(inverter: &Inverter) {
    for device in inverter.devices() {
        print_identity(device);
        if !device.status().last_update_success {
            let reason = device.status().last_error_message.as_deref().unwrap_or("not polled yet");
            println!("  unavailable: {reason}");
        }
    }
    if let Some(snapshot) = inverter.snapshot() {
        println!("Inverter {}:\n{snapshot}", inverter.unit_id());
    }
    for meter in &inverter.meters {
        if let Some(snapshot) = meter.snapshot() {
            println!("Meter {}:\n{snapshot}", meter.slot());
        }
    }
    for battery in &inverter.batteries {
        if let Some(snapshot) = battery.snapshot() {
            println!("Battery {}:\n{snapshot}", battery.slot());
        }
    }
}

fn handle_discover(hub: &Hub) {
    for (inverter, report) in hub.inverters().iter().zip(hub.discovery_reports()) {
        print_identity(inverter);
        for meter in &inverter.meters {
            print_identity(meter);
        }
        for battery in &inverter.batteries {
            print_identity(battery);
        }
        for failure in &report.failures {
            println!("{}: probe failed: {}", failure.device, failure.error);
        }
    }
    for unit_id in hub.failed_units() {
        println!("unit {unit_id}: no SunSpec inverter found");
    }
}

async fn handle_read(hub: &mut Hub) -> Result<()> {
    match hub.poll_all().await {
        Ok(()) => {}
        Err(error @ Error::DataUpdateFailed { .. }) => warn!("{error}"),
        Err(error) => return Err(error).context("Cannot read devices"),
    }
    for inverter in hub.inverters() {
        print_inverter(inverter);
    }
    Ok(())
}

async fn handle_daemon(hub: &mut Hub, poll_interval: std::time::Duration) -> Result<()> {
    info!("Starting daemon mode: interval={poll_interval:?}");
    let policy = Backoff::from(&hub.config().retry);
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
        }
        debug!("Daemon: polling all devices...");
        match hub.refresh(&policy).await {
            Ok(()) => {}
            Err(error @ Error::DataUpdateFailed { .. }) => warn!("{error}"),
            Err(error) => return Err(error).context("Polling failed"),
        }
        for inverter in hub.inverters() {
            print_inverter(inverter);
        }
    }
}

fn confirm_write(unit: u8, command: &WriteCommand) -> Result<bool> {
    println!("WARNING: This changes the setting '{command}' of inverter unit {unit}.");
    println!("The new value stays active in the inverter after this program exits.");
    Confirm::new()
        .with_prompt("Do you want to continue?")
        .default(false)
        .show_default(true)
        .interact()
        .context("Failed to get user confirmation.")
}

async fn handle_write(hub: &mut Hub, unit: u8, command: WriteCommand) -> Result<()> {
    info!("Executing: Write {command} to unit {unit}");
    hub.write(DeviceRef::inverter(unit), command)
        .await
        .with_context(|| format!("Failed to write {command} to unit {unit}"))?;
    println!("Wrote {command} to unit {unit}.");
    hub.wait_write_settled().await;
    Ok(())
}

async fn run(args: &commandline::CliArgs, hub: &mut Hub) -> Result<()> {
    hub.initialize().await.context("Cannot initialize hub")?;
    match &args.command {
        commandline::CliCommands::Discover => handle_discover(hub),
        commandline::CliCommands::Read => handle_read(hub).await?,
        commandline::CliCommands::Daemon { poll_interval } => {
            let poll_interval = poll_interval.unwrap_or(hub.config().scan_interval);
            handle_daemon(hub, poll_interval).await?
        }
        commandline::CliCommands::Write { unit, target, value, .. } => {
            let command = target
                .command(value)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Invalid value for {target:?}"))?;
            handle_write(hub, *unit, command).await?
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter())?;
    info!("se-hub started. Log level: {}", args.verbose.log_level_filter());

    let config = hub_config(&args)?;

    if let commandline::CliCommands::Write {
        unit, target, value, yes: false,
    } = &args.command
    {
        let command = target.command(value).map_err(anyhow::Error::msg)?;
        if !confirm_write(*unit, &command)? {
            info!("Write aborted by user.");
            return Ok(());
        }
    }

    let mut hub = Hub::new(config);
    let result = run(&args, &mut hub).await;
    hub.shutdown().await;
    result
}
