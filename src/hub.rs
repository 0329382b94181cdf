//! The hub owns the connection and every device discovered behind it.
//!
//! A poll fetches the telemetry of all devices concurrently. The requests all
//! funnel through the single [`RegisterGate`], so the wire only ever sees one
//! transaction at a time. A device that fails keeps its previous snapshot and
//! does not stop the others from updating.
//!
//! After a successful write the hub raises a write settle signal for
//! `sleep_after_write`. A scheduler should wait for it to clear before the
//! next poll, otherwise the poll may read values the inverter has not applied
//! yet.

use crate::{
    config::{HubConfig, RetryOptions},
    device::{Device, DeviceKind, DeviceRef, Inverter},
    discovery::{discover_inverter, DiscoveryOptions, DiscoveryReport},
    gate::RegisterGate,
    sunspec::WriteCommand,
    tokio_common::{Error, Result},
    transport::{Connection, TcpTransport, Transport},
};
use futures::future::join_all;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::watch, time::Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Uninitialized,
    Ready,
    Polling,
    Writing,
    ShuttingDown,
    Closed,
}

impl fmt::Display for HubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HubState::Uninitialized => "uninitialized",
            HubState::Ready => "ready",
            HubState::Polling => "polling",
            HubState::Writing => "writing",
            HubState::ShuttingDown => "shutting down",
            HubState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Decides if and when a failed poll is repeated.
pub trait RetryPolicy: Send + Sync {
    /// Delay before repetition number `attempt`, counting from zero. `None`
    /// gives up.
    fn delay(&self, attempt: u32) -> Option<Duration>;
}

/// Exponential backoff: `time * ratio^attempt`, at most `limit` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub limit: u32,
    pub time: Duration,
    pub ratio: u32,
}

impl RetryPolicy for Backoff {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.limit).then(|| self.time.saturating_mul(self.ratio.saturating_pow(attempt)))
    }
}

impl From<&RetryOptions> for Backoff {
    fn from(options: &RetryOptions) -> Self {
        Self {
            limit: options.limit,
            time: options.time,
            ratio: options.ratio,
        }
    }
}

#[derive(Debug, Default)]
struct Activity {
    polling: AtomicBool,
    writing: AtomicBool,
}

/// Clears an activity flag when dropped, also if the owning future is.
struct ActivityGuard<'a>(&'a AtomicBool);

impl<'a> ActivityGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cloneable view on the busy and write settle signals of a [`Hub`], for use
/// by a scheduler running beside it.
#[derive(Debug, Clone)]
pub struct HubSignals {
    activity: Arc<Activity>,
    settle: watch::Receiver<Option<Instant>>,
}

impl HubSignals {
    /// Whether a poll is in progress.
    pub fn is_busy(&self) -> bool {
        self.activity.polling.load(Ordering::Acquire)
    }

    /// Whether the settle window of the last write is still open.
    pub fn is_write_settling(&self) -> bool {
        matches!(*self.settle.borrow(), Some(deadline) if Instant::now() < deadline)
    }

    /// Waits until the settle window is closed. A write landing in the
    /// meantime extends the wait.
    pub async fn wait_write_settled(&self) {
        loop {
            let deadline = *self.settle.borrow();
            match deadline {
                Some(deadline) if Instant::now() < deadline => tokio::time::sleep_until(deadline).await,
                _ => return,
            }
        }
    }
}

pub struct Hub {
    config: HubConfig,
    gate: RegisterGate,
    state: HubState,
    online: bool,
    inverters: Vec<Inverter>,
    reports: Vec<DiscoveryReport>,
    failed_units: Vec<u8>,
    activity: Arc<Activity>,
    settle: watch::Sender<Option<Instant>>,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &self.state())
            .field("inverters", &self.inverters.len())
            .finish()
    }
}

impl Hub {
    /// Creates a hub talking Modbus/TCP to `config.host`.
    pub fn new(config: HubConfig) -> Self {
        Self::with_transport(config, Box::new(TcpTransport::new()))
    }

    /// Creates a hub on top of any [`Transport`].
    pub fn with_transport(config: HubConfig, transport: Box<dyn Transport>) -> Self {
        let conn = Connection::new(config.host.clone(), config.port, config.connect_mode(), transport);
        let gate = RegisterGate::new(conn, config.gate_options());
        let (settle, _) = watch::channel(None);
        Self {
            config,
            gate,
            state: HubState::Uninitialized,
            online: false,
            inverters: Vec::new(),
            reports: Vec::new(),
            failed_units: Vec::new(),
            activity: Arc::default(),
            settle,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn state(&self) -> HubState {
        if self.activity.writing.load(Ordering::Acquire) {
            HubState::Writing
        } else if self.activity.polling.load(Ordering::Acquire) {
            HubState::Polling
        } else {
            self.state
        }
    }

    /// `true` once initialized, as long as the last poll updated at least
    /// one device.
    pub fn online(&self) -> bool {
        self.online
    }

    pub fn signals(&self) -> HubSignals {
        HubSignals {
            activity: self.activity.clone(),
            settle: self.settle.subscribe(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.activity.polling.load(Ordering::Acquire)
    }

    pub fn is_write_settling(&self) -> bool {
        self.signals().is_write_settling()
    }

    pub async fn wait_write_settled(&self) {
        self.signals().wait_write_settled().await
    }

    pub fn inverters(&self) -> &[Inverter] {
        &self.inverters
    }

    pub fn inverter(&self, unit_id: u8) -> Option<&Inverter> {
        self.inverters.iter().find(|inverter| inverter.unit_id() == unit_id)
    }

    pub fn device(&self, device: DeviceRef) -> Option<&dyn Device> {
        self.inverter(device.unit_id)?.device(device.kind)
    }

    /// Discovery results of the initialized units.
    pub fn discovery_reports(&self) -> &[DiscoveryReport] {
        &self.reports
    }

    /// Configured units whose inverter could not be identified.
    pub fn failed_units(&self) -> &[u8] {
        &self.failed_units
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            HubState::Ready => Ok(()),
            HubState::Uninitialized => Err(Error::InvalidState("not initialized")),
            _ => Err(Error::InvalidState("closed")),
        }
    }

    /// Discovers the inverters of the device list and the meters and
    /// batteries behind them.
    ///
    /// A unit that fails identification is skipped.
    ///
    /// # Errors
    ///
    /// * `Error::HubInitFailed` if the configuration is invalid, the
    ///   persistent connection cannot be opened or no unit could be
    ///   identified.
    /// * `Error::InvalidState` if the hub was already initialized.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.state != HubState::Uninitialized {
            return Err(Error::InvalidState("already initialized"));
        }
        self.config.validate().map_err(|err| Error::HubInitFailed {
            unit_id: None,
            reason: err.to_string(),
        })?;
        if self.config.keep_modbus_open {
            self.gate.connect().await.map_err(|err| Error::HubInitFailed {
                unit_id: None,
                reason: err.to_string(),
            })?;
        }

        let options = DiscoveryOptions {
            detect_meters: self.config.detect_meters,
            detect_batteries: self.config.detect_batteries,
            read_storage_control: self.config.reads_storage_control(),
        };
        self.failed_units.clear();
        let mut errors = Vec::new();
        for &unit_id in self.config.device_list.ids() {
            match discover_inverter(&self.gate, unit_id, &options).await {
                Ok((inverter, report)) => {
                    self.inverters.push(inverter);
                    self.reports.push(report);
                }
                Err(err) => {
                    log::error!("{err}");
                    self.failed_units.push(unit_id);
                    errors.push(err);
                }
            }
        }

        if self.inverters.is_empty() {
            self.gate.disconnect().await;
            return Err(match errors.len() {
                1 => errors.remove(0),
                _ => Error::HubInitFailed {
                    unit_id: None,
                    reason: errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "),
                },
            });
        }
        self.state = HubState::Ready;
        self.online = true;
        log::info!(
            "Hub at {}:{} ready with {} inverter(s)",
            self.config.host,
            self.config.port,
            self.inverters.len()
        );
        Ok(())
    }

    /// Updates every device once.
    ///
    /// # Errors
    ///
    /// * `Error::DataUpdateFailed` listing the devices that failed. All other
    ///   devices were updated.
    /// * `Error::InvalidState` if the hub is not ready.
    pub async fn poll_all(&mut self) -> Result<()> {
        self.ensure_ready()?;
        let activity = self.activity.clone();
        let _polling = ActivityGuard::set(&activity.polling);

        let gate = &self.gate;
        let fetches = self
            .inverters
            .iter()
            .flat_map(|inverter| inverter.devices())
            .map(|device| device.read_telemetry(gate));
        let mut fetched = join_all(fetches).await.into_iter();

        let mut failed = Vec::new();
        let mut total = 0;
        for inverter in &mut self.inverters {
            inverter.for_each_device_mut(|device| {
                total += 1;
                let result = fetched
                    .next()
                    .unwrap_or_else(|| Err(Error::InvalidState("missing fetch result")));
                if !device.apply_update(result) {
                    failed.push(device.device_ref());
                }
            });
        }

        self.online = failed.len() < total;
        if failed.is_empty() {
            log::debug!("Updated {total} device(s)");
            Ok(())
        } else {
            Err(Error::DataUpdateFailed { failed, total })
        }
    }

    /// Polls, waiting for any write to settle first, and repeats failed
    /// polls as long as `policy` allows.
    pub async fn refresh(&mut self, policy: &dyn RetryPolicy) -> Result<()> {
        let mut attempt = 0;
        loop {
            self.wait_write_settled().await;
            match self.poll_all().await {
                Err(err @ Error::DataUpdateFailed { .. }) => match policy.delay(attempt) {
                    Some(delay) => {
                        log::info!("{err}, polling again in {delay:?}");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err),
                },
                result => return result,
            }
        }
    }

    /// Writes a setpoint to an inverter with exactly one transaction and
    /// opens the settle window once the write is acknowledged.
    ///
    /// # Errors
    ///
    /// * `Error::UnknownDevice` if `device` is not a discovered inverter.
    /// * `Error::ProtocolError` if the value is out of range.
    /// * `Error::ModbusWriteError`, `Error::ConnectionError` or
    ///   `Error::ConnectFailed` if the write failed.
    pub async fn write(&mut self, device: DeviceRef, command: WriteCommand) -> Result<()> {
        self.ensure_ready()?;
        if device.kind != DeviceKind::Inverter || self.inverter(device.unit_id).is_none() {
            return Err(Error::UnknownDevice(device));
        }
        let words = command.encode()?;
        let activity = self.activity.clone();
        let _writing = ActivityGuard::set(&activity.writing);

        self.gate.write(device.unit_id, command.address(), &words).await?;
        log::info!("Wrote {command} to {device}");
        if !self.config.sleep_after_write.is_zero() {
            self.settle
                .send_replace(Some(Instant::now() + self.config.sleep_after_write));
        }
        Ok(())
    }

    /// Closes the connection. The hub cannot be used afterwards.
    pub async fn shutdown(&mut self) {
        if self.state == HubState::Closed {
            return;
        }
        self.state = HubState::ShuttingDown;
        self.gate.disconnect().await;
        self.online = false;
        self.state = HubState::Closed;
        log::info!("Hub at {}:{} closed", self.config.host, self.config.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DeviceList,
        device::fixtures,
        protocol::Decoded,
        transport::mock::{MockTransport, Reply},
    };
    use assert_matches::assert_matches;
    use tokio_modbus::ExceptionCode;

    fn config(units: Vec<u8>) -> HubConfig {
        let mut config = HubConfig::new("127.0.0.1", DeviceList::try_from(units).unwrap());
        config.keep_modbus_open = true;
        config.modbus.retries = 0;
        config
    }

    /// Inverter with meter slot 1 and battery slot 1 populated.
    fn site(mock: &MockTransport, unit_id: u8) {
        mock.set_block(unit_id, 40000, &fixtures::inverter_common(unit_id));
        mock.set_block(unit_id, 40069, &fixtures::inverter_model());
        mock.set_block(unit_id, 40121, &fixtures::meter_common(unit_id));
        mock.set_block(unit_id, 40188, &fixtures::meter_model());
        mock.set_block(unit_id, 0xE100, &fixtures::battery_info(15));
        mock.set_block(unit_id, 0xE16C, &fixtures::battery_telemetry());
    }

    async fn ready_hub(mock: &MockTransport, units: Vec<u8>) -> Hub {
        let mut hub = Hub::with_transport(config(units), Box::new(mock.clone()));
        hub.initialize().await.unwrap();
        hub
    }

    #[tokio::test]
    async fn initialize_discovers_devices() {
        let mock = MockTransport::new();
        site(&mock, 1);
        let hub = ready_hub(&mock, vec![1]).await;
        assert_eq!(hub.state(), HubState::Ready);
        assert!(hub.online());
        let inverter = hub.inverter(1).unwrap();
        assert_eq!(inverter.meters.len(), 1);
        assert_eq!(inverter.batteries.len(), 1);
        assert_eq!(inverter.devices().len(), 3);
        assert_eq!(mock.log().connects, 1);
        assert!(hub.device(DeviceRef::new(1, DeviceKind::Battery(1))).is_some());
        assert!(hub.device(DeviceRef::new(1, DeviceKind::Meter(2))).is_none());
    }

    #[tokio::test]
    async fn failed_unit_is_skipped() {
        let mock = MockTransport::new();
        site(&mock, 1);
        let hub = ready_hub(&mock, vec![1, 2]).await;
        assert_eq!(hub.inverters().len(), 1);
        assert_eq!(hub.failed_units(), &[2]);
    }

    #[tokio::test]
    async fn sole_unit_failure_fails_initialization() {
        let mock = MockTransport::new();
        let mut hub = Hub::with_transport(config(vec![3]), Box::new(mock.clone()));
        assert_matches!(
            hub.initialize().await,
            Err(Error::HubInitFailed { unit_id: Some(3), .. })
        );
        assert_eq!(hub.state(), HubState::Uninitialized);
        assert_eq!(mock.log().closes, 1);

        let mut hub = Hub::with_transport(config(vec![3, 4]), Box::new(mock.clone()));
        assert_matches!(
            hub.initialize().await,
            Err(Error::HubInitFailed { unit_id: None, .. })
        );
    }

    #[tokio::test]
    async fn repeated_initialization_reports_current_failures() {
        let mock = MockTransport::new();
        let mut hub = Hub::with_transport(config(vec![1, 2]), Box::new(mock.clone()));
        assert!(hub.initialize().await.is_err());
        assert!(hub.initialize().await.is_err());
        assert_eq!(hub.failed_units(), &[1, 2]);

        site(&mock, 1);
        hub.initialize().await.unwrap();
        assert_eq!(hub.failed_units(), &[2]);
        assert_eq!(hub.inverters().len(), 1);
    }

    #[tokio::test]
    async fn refused_connection_fails_initialization() {
        let mock = MockTransport::new();
        site(&mock, 1);
        mock.refuse_connects(1);
        let mut hub = Hub::with_transport(config(vec![1]), Box::new(mock.clone()));
        assert_matches!(
            hub.initialize().await,
            Err(Error::HubInitFailed { unit_id: None, .. })
        );
    }

    #[tokio::test]
    async fn poll_reads_every_device() {
        let mock = MockTransport::new();
        site(&mock, 1);
        let mut hub = ready_hub(&mock, vec![1]).await;
        mock.log().reads.clear();

        hub.poll_all().await.unwrap();
        let mut reads = mock.log().reads.clone();
        reads.sort();
        assert_eq!(reads, vec![(1, 40044, 65), (1, 40188, 107), (1, 0xE16C, 30)]);
        assert_eq!(mock.log().max_in_flight, 1);

        let inverter = hub.inverter(1).unwrap();
        assert_eq!(inverter.snapshot().unwrap().ac_power, Decoded::Value(500.0));
        assert_eq!(
            inverter.meters[0].snapshot().unwrap().exported_energy,
            Decoded::Value(1_500_000.0)
        );
        assert_eq!(
            inverter.batteries[0].snapshot().unwrap().state_of_energy,
            Decoded::Value(50.0)
        );
        assert!(!hub.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_while_polling_and_cleared_on_cancel() {
        let mock = MockTransport::new();
        site(&mock, 1);
        let mut hub = ready_hub(&mock, vec![1]).await;
        let signals = hub.signals();
        mock.set_latency(Duration::from_millis(100));
        assert!(!signals.is_busy());

        {
            let poll = hub.poll_all();
            tokio::pin!(poll);
            assert!(tokio::time::timeout(Duration::from_millis(150), &mut poll).await.is_err());
            assert!(signals.is_busy());
        }
        assert!(!signals.is_busy());

        hub.poll_all().await.unwrap();
        assert!(!signals.is_busy());
        assert_eq!(mock.log().max_in_flight, 1);
    }

    #[tokio::test]
    async fn failing_device_keeps_snapshot_and_others_update() {
        let mock = MockTransport::new();
        site(&mock, 1);
        site(&mock, 2);
        let mut hub = ready_hub(&mock, vec![1, 2]).await;
        hub.poll_all().await.unwrap();

        // unit 1 produces more, unit 2 stops answering its telemetry read
        mock.set_block(1, 40083, &[6000]);
        mock.push_reply(2, 40044, Reply::Exception(ExceptionCode::IllegalDataAddress));
        let err = hub.poll_all().await.unwrap_err();
        assert_matches!(err, Error::DataUpdateFailed { failed, total: 6 } if failed == vec![DeviceRef::inverter(2)]);
        assert!(hub.online());

        let first = hub.inverter(1).unwrap();
        assert_eq!(first.snapshot().unwrap().ac_power, Decoded::Value(600.0));
        let second = hub.inverter(2).unwrap();
        assert_eq!(second.snapshot().unwrap().ac_power, Decoded::Value(500.0));
        assert!(!second.status().last_update_success);
        assert!(second.meters[0].status().last_update_success);
    }

    #[tokio::test]
    async fn poll_requires_ready_hub() {
        let mock = MockTransport::new();
        let mut hub = Hub::with_transport(config(vec![1]), Box::new(mock.clone()));
        assert_matches!(hub.poll_all().await, Err(Error::InvalidState("not initialized")));

        site(&mock, 1);
        hub.initialize().await.unwrap();
        hub.shutdown().await;
        hub.shutdown().await;
        assert_eq!(hub.state(), HubState::Closed);
        assert!(!hub.online());
        assert_eq!(mock.log().closes, 1);
        assert_matches!(hub.poll_all().await, Err(Error::InvalidState("closed")));
        assert_matches!(
            hub.write(DeviceRef::inverter(1), WriteCommand::ActivePowerLimit(50)).await,
            Err(Error::InvalidState(_))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn write_encodes_and_opens_settle_window() {
        let mock = MockTransport::new();
        site(&mock, 1);
        let mut hub = ready_hub(&mock, vec![1]).await;
        assert!(!hub.is_write_settling());

        hub.write(DeviceRef::inverter(1), WriteCommand::BackupReserve(50.0))
            .await
            .unwrap();
        assert_eq!(mock.log().writes, vec![(1, 0xE008, vec![0x0000, 0x4248])]);
        assert!(hub.is_write_settling());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(hub.is_write_settling());
        hub.write(DeviceRef::inverter(1), WriteCommand::ActivePowerLimit(80))
            .await
            .unwrap();

        // the second write restarted the window
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(hub.is_write_settling());
        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(!hub.is_write_settling());
        assert_eq!(hub.state(), HubState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_settle_follows_later_writes() {
        let mock = MockTransport::new();
        site(&mock, 1);
        let mut hub = ready_hub(&mock, vec![1]).await;
        let start = Instant::now();
        hub.write(DeviceRef::inverter(1), WriteCommand::PowerReduce(100.0))
            .await
            .unwrap();

        let signals = hub.signals();
        let waiter = tokio::spawn(async move {
            signals.wait_write_settled().await;
            Instant::now()
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        hub.write(DeviceRef::inverter(1), WriteCommand::PowerReduce(90.0))
            .await
            .unwrap();

        let waited = waiter.await.unwrap().duration_since(start);
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_millis(5010));
    }

    #[tokio::test]
    async fn failed_write_does_not_settle() {
        let mock = MockTransport::new();
        site(&mock, 1);
        let mut hub = ready_hub(&mock, vec![1]).await;
        mock.push_reply(1, 0xF001, Reply::Exception(ExceptionCode::IllegalDataValue));
        assert_matches!(
            hub.write(DeviceRef::inverter(1), WriteCommand::ActivePowerLimit(10)).await,
            Err(Error::ModbusWriteError { .. })
        );
        assert!(!hub.is_write_settling());
    }

    #[tokio::test]
    async fn write_rejects_unknown_devices_and_bad_values() {
        let mock = MockTransport::new();
        site(&mock, 1);
        let mut hub = ready_hub(&mock, vec![1]).await;
        let meter = DeviceRef::new(1, DeviceKind::Meter(1));
        assert_matches!(
            hub.write(meter, WriteCommand::ActivePowerLimit(10)).await,
            Err(Error::UnknownDevice(device)) if device == meter
        );
        assert_matches!(
            hub.write(DeviceRef::inverter(9), WriteCommand::ActivePowerLimit(10)).await,
            Err(Error::UnknownDevice(_))
        );
        assert_matches!(
            hub.write(DeviceRef::inverter(1), WriteCommand::BackupReserve(101.0)).await,
            Err(Error::ProtocolError(_))
        );
        assert!(mock.log().writes.is_empty());
    }

    #[test]
    fn backoff_delays() {
        let backoff = Backoff::from(&RetryOptions::default());
        assert_eq!(backoff.delay(0), Some(Duration::from_secs(2)));
        assert_eq!(backoff.delay(1), Some(Duration::from_secs(4)));
        assert_eq!(backoff.delay(2), Some(Duration::from_secs(8)));
        assert_eq!(backoff.delay(3), None);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_retries_with_backoff() {
        let mock = MockTransport::new();
        site(&mock, 1);
        let mut hub = ready_hub(&mock, vec![1]).await;
        for _ in 0..3 {
            mock.push_reply(1, 40044, Reply::Exception(ExceptionCode::ServerDeviceFailure));
        }
        let policy = Backoff {
            limit: 2,
            time: Duration::from_secs(1),
            ratio: 2,
        };

        let start = Instant::now();
        assert_matches!(hub.refresh(&policy).await, Err(Error::DataUpdateFailed { .. }));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3010));
        let polls = mock.log().reads.iter().filter(|r| r.1 == 40044).count();
        assert_eq!(polls, 3);

        // the queued failures are used up, the next refresh succeeds at once
        hub.refresh(&policy).await.unwrap();
        assert!(hub.inverter(1).unwrap().status().last_update_success);
    }
}
