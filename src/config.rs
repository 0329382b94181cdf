//! Hub configuration.
//!
//! With the `serde` feature enabled the configuration can be read from a YAML
//! file. Durations use the humantime format, e.g. `3s` or `500ms`:
//!
//! ```yaml
//! host: 192.168.1.50
//! port: 1502
//! device_list: "1,3-4"
//! detect_batteries: true
//! adv_storage_control: true
//! scan_interval: 5m
//! modbus:
//!   timeout: 3s
//!   retries: 3
//! ```

use crate::{
    gate::GateOptions,
    transport::{ConnectMode, WriteShape},
};
use std::{collections::BTreeSet, fmt, net::IpAddr, str::FromStr, time::Duration};

pub const DEVICE_ID_MIN: u16 = 1;
pub const DEVICE_ID_MAX: u16 = 247;
pub const DEFAULT_PORT: u16 = 1502;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Empty device id")]
    EmptyDeviceId,
    #[error("Invalid device id '{0}', expected 1 to 247")]
    InvalidDeviceId(String),
    #[error("Invalid range format '{0}', expected 'start-end'")]
    InvalidRangeFormat(String),
    #[error("Invalid range '{0}', the end is lower than the start")]
    InvalidRangeOrder(String),
    #[error("Device list is empty")]
    EmptyDeviceList,
    #[error("Invalid host '{0}'")]
    InvalidHost(String),
    #[error("Invalid port 0")]
    InvalidPort,
    #[cfg(feature = "serde")]
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serde")]
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

fn parse_device_id(text: &str) -> Result<u8, Error> {
    if text.is_empty() {
        return Err(Error::EmptyDeviceId);
    }
    match text.parse::<u16>() {
        Ok(id) if (DEVICE_ID_MIN..=DEVICE_ID_MAX).contains(&id) => Ok(id as u8),
        _ => Err(Error::InvalidDeviceId(text.to_string())),
    }
}

/// Sorted set of inverter unit ids, parsed from text such as `"1,3-5, 7"`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawDeviceList"))]
pub struct DeviceList(Vec<u8>);

impl DeviceList {
    pub fn ids(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::Deref for DeviceList {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for DeviceList {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut ids = BTreeSet::new();
        for part in text.split(',').map(str::trim) {
            if part.contains('-') {
                let bounds: Vec<&str> = part.split('-').map(str::trim).collect();
                if bounds.len() != 2 {
                    return Err(Error::InvalidRangeFormat(part.to_string()));
                }
                let (start, end) = (parse_device_id(bounds[0])?, parse_device_id(bounds[1])?);
                if end < start {
                    return Err(Error::InvalidRangeOrder(part.to_string()));
                }
                ids.extend(start..=end);
            } else {
                ids.insert(parse_device_id(part)?);
            }
        }
        Ok(Self(ids.into_iter().collect()))
    }
}

impl TryFrom<Vec<u8>> for DeviceList {
    type Error = Error;

    fn try_from(ids: Vec<u8>) -> Result<Self, Self::Error> {
        if ids.is_empty() {
            return Err(Error::EmptyDeviceList);
        }
        let ids: BTreeSet<u8> = ids
            .into_iter()
            .map(|id| {
                if (DEVICE_ID_MIN..=DEVICE_ID_MAX).contains(&(id as u16)) {
                    Ok(id)
                } else {
                    Err(Error::InvalidDeviceId(id.to_string()))
                }
            })
            .collect::<Result<_, _>>()?;
        Ok(Self(ids.into_iter().collect()))
    }
}

impl fmt::Display for DeviceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.0.iter().map(u8::to_string).collect();
        write!(f, "{}", ids.join(","))
    }
}

/// Accepts `device_list: 1`, `device_list: "1-3"` and `device_list: [1, 2]`.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RawDeviceList {
    Id(u16),
    Ids(Vec<u16>),
    Text(String),
}

#[cfg(feature = "serde")]
impl TryFrom<RawDeviceList> for DeviceList {
    type Error = Error;

    fn try_from(raw: RawDeviceList) -> Result<Self, Self::Error> {
        match raw {
            RawDeviceList::Text(text) => text.parse(),
            RawDeviceList::Id(id) => id.to_string().parse(),
            RawDeviceList::Ids(ids) => {
                let ids = ids
                    .into_iter()
                    .map(|id| u8::try_from(id).map_err(|_| Error::InvalidDeviceId(id.to_string())))
                    .collect::<Result<Vec<u8>, _>>()?;
                ids.try_into()
            }
        }
    }
}

/// Accepts IPv4 and IPv6 addresses and RFC 1123 host names.
pub fn host_valid(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    // Looks like an IPv4 address but is not a valid one.
    if host.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return false;
    }
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.trim_end_matches('.').split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct ModbusOptions {
    #[cfg_attr(feature = "serde", serde(default = "default_timeout", with = "humantime_serde"))]
    pub timeout: Duration,
    #[cfg_attr(feature = "serde", serde(default = "default_retries"))]
    pub retries: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub write_shape: WriteShape,
}

fn default_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_retries() -> u32 {
    3
}

impl Default for ModbusOptions {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retries: default_retries(),
            write_shape: WriteShape::default(),
        }
    }
}

/// Backoff of [`Hub::refresh`](crate::hub::Hub::refresh) after a failed poll.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct RetryOptions {
    /// Number of repeated polls.
    #[cfg_attr(feature = "serde", serde(default = "default_retry_limit"))]
    pub limit: u32,
    /// Delay before the first repetition.
    #[cfg_attr(feature = "serde", serde(default = "default_retry_time", with = "humantime_serde"))]
    pub time: Duration,
    /// Growth factor of the delay.
    #[cfg_attr(feature = "serde", serde(default = "default_retry_ratio"))]
    pub ratio: u32,
}

fn default_retry_limit() -> u32 {
    3
}

fn default_retry_time() -> Duration {
    Duration::from_millis(2000)
}

fn default_retry_ratio() -> u32 {
    2
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            limit: default_retry_limit(),
            time: default_retry_time(),
            ratio: default_retry_ratio(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct HubConfig {
    pub host: String,
    #[cfg_attr(feature = "serde", serde(default = "default_port"))]
    pub port: u16,
    pub device_list: DeviceList,
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub detect_meters: bool,
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub detect_batteries: bool,
    /// Keep the socket open between polls.
    #[cfg_attr(feature = "serde", serde(default))]
    pub keep_modbus_open: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub adv_storage_control: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub adv_site_limit_control: bool,
    #[cfg_attr(feature = "serde", serde(default = "default_scan_interval", with = "humantime_serde"))]
    pub scan_interval: Duration,
    /// Settle window after a successful write.
    #[cfg_attr(feature = "serde", serde(default = "default_sleep_after_write", with = "humantime_serde"))]
    pub sleep_after_write: Duration,
    #[cfg_attr(feature = "serde", serde(default))]
    pub modbus: ModbusOptions,
    #[cfg_attr(feature = "serde", serde(default))]
    pub retry: RetryOptions,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[cfg(feature = "serde")]
fn default_true() -> bool {
    true
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_sleep_after_write() -> Duration {
    Duration::from_secs(3)
}

impl HubConfig {
    /// Creates a configuration with default settings.
    pub fn new(host: impl Into<String>, device_list: DeviceList) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            device_list,
            detect_meters: true,
            detect_batteries: true,
            keep_modbus_open: false,
            adv_storage_control: false,
            adv_site_limit_control: false,
            scan_interval: default_scan_interval(),
            sleep_after_write: default_sleep_after_write(),
            modbus: ModbusOptions::default(),
            retry: RetryOptions::default(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !host_valid(&self.host) {
            return Err(Error::InvalidHost(self.host.clone()));
        }
        if self.port == 0 {
            return Err(Error::InvalidPort);
        }
        if self.device_list.is_empty() {
            return Err(Error::EmptyDeviceList);
        }
        Ok(())
    }

    pub fn connect_mode(&self) -> ConnectMode {
        if self.keep_modbus_open {
            ConnectMode::Persistent
        } else {
            ConnectMode::PerOperation
        }
    }

    pub fn gate_options(&self) -> GateOptions {
        GateOptions {
            timeout: self.modbus.timeout,
            retries: self.modbus.retries,
            write_shape: self.modbus.write_shape,
        }
    }

    /// Whether the 0xE000 storage and site limit block is polled.
    pub fn reads_storage_control(&self) -> bool {
        self.adv_storage_control || self.adv_site_limit_control
    }

    /// Loads and validates a YAML configuration file.
    #[cfg(feature = "serde")]
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        log::debug!("Loading config file from {:?}", path.as_ref());
        let file = std::fs::File::open(path)?;
        let config: HubConfig = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }
}
