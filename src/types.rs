use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use uuid::Uuid;

use crate::{
    error::{PowerMeterError, Result},
    CYCLING_POWER_SERVICE_UUID, POWER_MEASUREMENT_CHAR_UUID,
};

/// Environment variable holding the advertised name of the power meter
pub const DEVICE_NAME_ENV: &str = "DEVICE_NAME";

/// Device name used when [`DEVICE_NAME_ENV`] is not set
pub const DEFAULT_DEVICE_NAME: &str = "Power Meter";

/// Flags word from the first two bytes of a power measurement frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeasurementFlags(u16);

impl MeasurementFlags {
    /// Crank revolution data present
    pub const CRANK_REVOLUTION_DATA: u16 = 0x02;

    /// Wrap a raw flags word
    #[must_use]
    pub const fn new(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw flags word, unknown bits included
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether the frame advertises crank revolution data
    #[must_use]
    pub const fn has_crank_revolution_data(self) -> bool {
        self.0 & Self::CRANK_REVOLUTION_DATA != 0
    }
}

impl From<u16> for MeasurementFlags {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for MeasurementFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Flags and instantaneous power decoded from the head of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerFrame {
    /// Flags word
    pub flags: MeasurementFlags,
    /// Instantaneous power in watts
    pub power_watts: u16,
}

/// Cumulative crank revolutions paired with the time of the last crank event
///
/// Both counters are 16-bit and wrap at 65536. `event_time` is in units of
/// 1/1024 second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrankEvent {
    /// Cumulative crank revolutions
    pub revolutions: u16,
    /// Last crank event time, 1/1024 s resolution
    pub event_time: u16,
}

impl CrankEvent {
    /// Create a new crank event
    #[must_use]
    pub const fn new(revolutions: u16, event_time: u16) -> Self {
        Self {
            revolutions,
            event_time,
        }
    }
}

/// Everything decodable from a single notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedFrame {
    /// Flags and power
    pub power: PowerFrame,
    /// Crank data, when flagged and long enough
    pub crank: Option<CrankEvent>,
}

/// A single reading handed to the presentation sink
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    /// Instantaneous power in watts
    pub power_watts: u16,
    /// Derived cadence in revolutions per minute
    pub cadence_rpm: Option<f64>,
}

impl PowerReading {
    /// Create a power-only reading
    #[must_use]
    pub const fn power_only(power_watts: u16) -> Self {
        Self {
            power_watts,
            cadence_rpm: None,
        }
    }

    /// Create a reading with derived cadence
    #[must_use]
    pub const fn with_cadence(power_watts: u16, cadence_rpm: f64) -> Self {
        Self {
            power_watts,
            cadence_rpm: Some(cadence_rpm),
        }
    }
}

impl fmt::Display for PowerReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cadence_rpm {
            Some(rpm) => write!(f, "Power: {} W, Cadence: {rpm:.1} RPM", self.power_watts),
            None => write!(f, "Power: {} W", self.power_watts),
        }
    }
}

/// Device information gathered during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Advertised device name
    pub name: String,
    /// Device address as reported by the host stack
    pub address: String,
    /// Signal strength (RSSI), when reported
    pub rssi: Option<i16>,
}

impl DeviceInfo {
    /// Create new device info
    #[must_use]
    pub const fn new(name: String, address: String) -> Self {
        Self {
            name,
            address,
            rssi: None,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Advertised name to match exactly during discovery
    pub device_name: String,
    /// Discovery window in milliseconds
    pub scan_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Default collection window
    pub collection_duration: Duration,
    /// Capacity of the bounded notification queue
    pub notification_buffer: usize,
    /// Cycling Power service UUID
    pub service_uuid: Uuid,
    /// Power Measurement characteristic UUID
    pub characteristic_uuid: Uuid,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            scan_timeout_ms: 10_000,
            connect_timeout_ms: 30_000,
            collection_duration: Duration::from_secs(30),
            notification_buffer: 64,
            service_uuid: CYCLING_POWER_SERVICE_UUID,
            characteristic_uuid: POWER_MEASUREMENT_CHAR_UUID,
        }
    }
}

impl SessionConfig {
    /// Build a configuration with the device name taken from `DEVICE_NAME`
    ///
    /// Falls back to [`DEFAULT_DEVICE_NAME`] when the variable is unset or blank.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_device_name_var(std::env::var(DEVICE_NAME_ENV).ok())
    }

    fn from_device_name_var(value: Option<String>) -> Self {
        // Discovery matches names exactly, so only blank values are discarded
        let device_name = value
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());

        Self {
            device_name,
            ..Self::default()
        }
    }

    /// Override the device name
    #[must_use]
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Override the default collection window
    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.collection_duration = duration;
        self
    }

    /// Discovery window as a [`Duration`]
    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    /// Connection timeout as a [`Duration`]
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check the configuration before starting a session
    ///
    /// # Errors
    ///
    /// Returns [`PowerMeterError::InvalidConfig`] for an empty device name,
    /// a zero scan timeout or a zero-capacity notification queue.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.trim().is_empty() {
            return Err(PowerMeterError::InvalidConfig(
                "device name must not be empty".to_string(),
            ));
        }
        if self.scan_timeout_ms == 0 {
            return Err(PowerMeterError::InvalidConfig(
                "scan timeout must be greater than zero".to_string(),
            ));
        }
        if self.notification_buffer == 0 {
            return Err(PowerMeterError::InvalidConfig(
                "notification buffer must hold at least one frame".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why a collection window ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The requested duration elapsed
    DurationElapsed,
    /// The caller's shutdown signal fired first
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DurationElapsed => write!(f, "duration elapsed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Counters for a completed collection window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Notifications received
    pub frames_received: u64,
    /// Notifications too short to carry power
    pub frames_skipped: u64,
    /// Readings handed to the sink
    pub readings_emitted: u64,
    /// Readings that carried cadence
    pub cadence_readings: u64,
    /// How the window ended
    pub stop_reason: StopReason,
}

impl SessionSummary {
    pub(crate) const fn new() -> Self {
        Self {
            frames_received: 0,
            frames_skipped: 0,
            readings_emitted: 0,
            cadence_readings: 0,
            stop_reason: StopReason::DurationElapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_display_power_only() {
        let reading = PowerReading::power_only(500);
        assert_eq!(reading.to_string(), "Power: 500 W");
    }

    #[test]
    fn test_reading_display_with_cadence() {
        let reading = PowerReading::with_cadence(500, 150.0);
        assert_eq!(reading.to_string(), "Power: 500 W, Cadence: 150.0 RPM");

        let reading = PowerReading::with_cadence(212, 593.050_193);
        assert_eq!(reading.to_string(), "Power: 212 W, Cadence: 593.1 RPM");
    }

    #[test]
    fn test_measurement_flags() {
        assert!(MeasurementFlags::new(0x0002).has_crank_revolution_data());
        assert!(MeasurementFlags::new(0xFFFF).has_crank_revolution_data());
        assert!(!MeasurementFlags::new(0x0020).has_crank_revolution_data());
        assert_eq!(MeasurementFlags::from(0x0123).bits(), 0x0123);
        assert_eq!(MeasurementFlags::new(0x2A).to_string(), "0x002A");
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();

        assert_eq!(config.device_name, DEFAULT_DEVICE_NAME);
        assert_eq!(config.scan_timeout_ms, 10_000);
        assert_eq!(config.connect_timeout_ms, 30_000);
        assert_eq!(config.collection_duration, Duration::from_secs(30));
        assert_eq!(config.notification_buffer, 64);
        assert_eq!(config.service_uuid, CYCLING_POWER_SERVICE_UUID);
        assert_eq!(config.characteristic_uuid, POWER_MEASUREMENT_CHAR_UUID);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_device_name_from_env_value() {
        let config = SessionConfig::from_device_name_var(Some("Favero Assioma".to_string()));
        assert_eq!(config.device_name, "Favero Assioma");

        let config = SessionConfig::from_device_name_var(Some(" Stages Power ".to_string()));
        assert_eq!(config.device_name, " Stages Power ");

        let config = SessionConfig::from_device_name_var(Some("   ".to_string()));
        assert_eq!(config.device_name, DEFAULT_DEVICE_NAME);

        let config = SessionConfig::from_device_name_var(None);
        assert_eq!(config.device_name, DEFAULT_DEVICE_NAME);
    }

    #[test]
    fn test_session_config_validation() {
        let config = SessionConfig::default().with_device_name("");
        assert!(matches!(
            config.validate(),
            Err(PowerMeterError::InvalidConfig(_))
        ));

        let config = SessionConfig {
            notification_buffer: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            scan_timeout_ms: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_info_creation() {
        let info = DeviceInfo::new("Stages".to_string(), "AA:BB:CC:DD:EE:FF".to_string());
        assert_eq!(info.name, "Stages");
        assert!(info.rssi.is_none());
        assert_eq!(info.to_string(), "Stages (AA:BB:CC:DD:EE:FF)");
    }
}
