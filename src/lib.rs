//! A library for polling and controlling SolarEdge inverters over Modbus/TCP.
//!
//! The inverters expose the SunSpec register model. Up to three meters and
//! three batteries can sit behind every inverter. They all share one TCP
//! connection, and usually one unit id per inverter.
//!
//! The crate is built in layers:
//!
//! 1.  **Register codec** ([`protocol`], [`sunspec`]): turns raw register
//!     words into scaled values, honouring the SunSpec "not implemented"
//!     sentinels, and encodes setpoints for writing.
//!
//! 2.  **Transport and gate** ([`transport`], [`gate`]): a single Modbus/TCP
//!     connection with at most one transaction in flight, timeouts, retries
//!     and reconnects.
//!
//! 3.  **Devices and discovery** ([`device`], [`discovery`]): inverter, meter
//!     and battery register maps, and the probing of the fixed meter and
//!     battery slots.
//!
//! 4.  **Hub** ([`hub`]): owns all of the above, polls every device, writes
//!     setpoints and exposes the write settle signal.
//!
//! ## Quick Start
//!
//! ```no_run
//! use solaredge_modbus_lib::{
//!     config::{DeviceList, HubConfig},
//!     hub::Hub,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HubConfig::new("192.168.1.50", "1".parse::<DeviceList>()?);
//!     let mut hub = Hub::new(config);
//!     hub.initialize().await?;
//!
//!     hub.poll_all().await?;
//!     for inverter in hub.inverters() {
//!         if let Some(snapshot) = inverter.snapshot() {
//!             println!("Unit {}:\n{snapshot}", inverter.unit_id());
//!         }
//!     }
//!
//!     hub.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod discovery;
pub mod gate;
pub mod hub;
pub mod protocol;
pub mod sunspec;
pub mod tokio_common;
pub mod transport;
