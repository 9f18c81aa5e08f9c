use thiserror::Error;

/// Errors that can occur while talking to a cycling power meter
///
/// Frames that are too short to decode are not errors: they are skipped
/// and never surface here.
#[derive(Error, Debug)]
pub enum PowerMeterError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No Bluetooth adapter available on this host
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// No device with a matching name appeared during the scan window
    #[error("Device not found: {name}")]
    DeviceNotFound {
        /// Advertised name that was searched for
        name: String,
    },

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Connection attempt timed out
    #[error("Connection timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Subscribing to the power measurement characteristic failed
    #[error("Failed to subscribe to notifications: {0}")]
    SubscribeFailed(String),

    /// Notification stream ended before the collection window elapsed
    #[error("Device disconnected")]
    Disconnected,

    /// Transport reported an error while delivering notifications
    #[error("Notification error: {0}")]
    Notification(String),

    /// Invalid session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for power meter operations
pub type Result<T> = std::result::Result<T, PowerMeterError>;

impl PowerMeterError {
    /// Check if this error indicates a connectivity issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::NoAdapter
                | Self::DeviceNotFound { .. }
                | Self::ConnectionFailed(_)
                | Self::Timeout { .. }
                | Self::Disconnected
        )
    }

    /// Check if this error was raised before any data could be collected
    #[must_use]
    pub const fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::NoAdapter
                | Self::DeviceNotFound { .. }
                | Self::ConnectionFailed(_)
                | Self::Timeout { .. }
                | Self::SubscribeFailed(_)
                | Self::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = PowerMeterError::DeviceNotFound {
            name: "Assioma".to_string(),
        };
        assert!(not_found.is_connection_error());
        assert!(not_found.is_setup_error());

        let subscribe = PowerMeterError::SubscribeFailed("gatt".to_string());
        assert!(!subscribe.is_connection_error());
        assert!(subscribe.is_setup_error());

        let dropped = PowerMeterError::Disconnected;
        assert!(dropped.is_connection_error());
        assert!(!dropped.is_setup_error());

        let stream = PowerMeterError::Notification("adapter reset".to_string());
        assert!(!stream.is_connection_error());
        assert!(!stream.is_setup_error());
    }

    #[test]
    fn test_error_display() {
        let error = PowerMeterError::DeviceNotFound {
            name: "4iiii Precision".to_string(),
        };
        let error_string = format!("{error}");
        assert!(error_string.contains("Device not found"));
        assert!(error_string.contains("4iiii Precision"));

        let timeout = PowerMeterError::Timeout { timeout_ms: 30_000 };
        assert_eq!(timeout.to_string(), "Connection timed out after 30000ms");
    }
}
