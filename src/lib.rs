#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Crankpower
//!
//! A Rust library for streaming instantaneous power and crank cadence from
//! Bluetooth Low Energy cycling power meters.
//!
//! The library subscribes to the standard Cycling Power Measurement
//! characteristic, decodes each notification and turns successive crank
//! events into a cadence in revolutions per minute.
//!
//! ## Measurement Frame
//!
//! Only the leading fields of the measurement frame are interpreted
//! (all little-endian):
//!
//! - **Bytes 0-1**: Flags. Bit 1 (`0x02`) marks crank revolution data
//! - **Bytes 2-3**: Instantaneous power in watts
//! - **Bytes 4-5**: Cumulative crank revolutions (wraps at 65536)
//! - **Bytes 6-7**: Last crank event time in 1/1024 s (wraps at 65536)
//!
//! Frames shorter than 4 bytes are skipped. Crank data is read only from
//! frames of at least 10 bytes with the crank flag set.
//!
//! ## Quick Start
//!
//! ```no_run
//! use crankpower::{ConsoleSink, PowerMeterSession};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Device name comes from DEVICE_NAME
//!     let mut session = PowerMeterSession::from_env().await?;
//!
//!     // Prints "Power: 250 W, Cadence: 90.0 RPM" style lines for 30 seconds
//!     session.run(Duration::from_secs(30), &mut ConsoleSink).await?;
//!
//!     Ok(())
//! }
//! ```

use uuid::Uuid;

/// Host stack seam and the `btleplug` implementation
pub mod ble;
/// Cadence derivation from crank events
pub mod cadence;
/// Error types and handling
pub mod error;
/// Power measurement frame decoding
pub mod protocol;
/// Collection session orchestration
pub mod session;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use ble::{BleHost, BtleplugConnection, BtleplugHost, MeterConnection, NotificationReceiver};
pub use cadence::CadenceTracker;
pub use error::{PowerMeterError, Result};
pub use protocol::{decode_frame, parse_crank_event, parse_power};
pub use session::{ConsoleSink, PowerMeterSession, ReadingSink};
pub use types::{
    CrankEvent, DecodedFrame, DeviceInfo, MeasurementFlags, PowerFrame, PowerReading,
    SessionConfig, SessionSummary, StopReason,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cycling Power service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement characteristic UUID (0x2A63)
///
/// Notifies one measurement frame per update while subscribed.
pub const POWER_MEASUREMENT_CHAR_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);
