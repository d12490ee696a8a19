//! Error types for platesched
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// Errors raised by device collaborators (robots, plate handlers, pollers).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The device reported a failure while executing a command
    #[error("{device}: {message}")]
    Failed { device: String, message: String },

    /// The robot has no teachpoint for the requested place
    #[error("no teachpoint named '{0}'")]
    NoTeachpoint(String),

    /// The device is not connected
    #[error("{0} is not connected")]
    Disconnected(String),
}

impl DeviceError {
    /// Convenience constructor for a device command failure
    pub fn failed(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            device: device.into(),
            message: message.into(),
        }
    }
}

/// All error types that can occur in platesched
#[derive(Debug, Error)]
pub enum PlateschedError {
    /// A task needs a device type that has no configured instance
    #[error("The device type '{0}' needed is not available in the device registry")]
    DeviceTypeUnavailable(String),

    /// No route exists between two locations
    #[error("No path from {from} to {to}")]
    Unreachable { from: String, to: String },

    /// A location name did not resolve against the current topology
    #[error("Unknown location: {0}")]
    UnknownLocation(String),

    /// A robot transfer failed mid-path
    #[error("Transfer of {plate} by {robot} failed: {source}")]
    Transfer {
        plate: String,
        robot: String,
        #[source]
        source: DeviceError,
    },

    /// A recoverable operation was fired with a trigger its state does not permit
    #[error("Invalid transition: {trigger} is not permitted in state {state}")]
    InvalidTransition { state: String, trigger: String },

    /// An operator picked an option that was not offered
    #[error("Invalid recovery option: {0}")]
    InvalidOption(String),

    /// A component was stopped before it could finish
    #[error("Stopped: {0}")]
    Stopped(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Device error outside of a transfer
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for platesched operations
pub type Result<T> = std::result::Result<T, PlateschedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_unavailable_error() {
        let err = PlateschedError::DeviceTypeUnavailable("Bumblebee".to_string());
        assert_eq!(
            err.to_string(),
            "The device type 'Bumblebee' needed is not available in the device registry"
        );
    }

    #[test]
    fn test_unreachable_error() {
        let err = PlateschedError::Unreachable {
            from: "stacker.out".to_string(),
            to: "sealer.stage".to_string(),
        };
        assert_eq!(err.to_string(), "No path from stacker.out to sealer.stage");
    }

    #[test]
    fn test_transfer_error_keeps_source() {
        let err = PlateschedError::Transfer {
            plate: "source#0".to_string(),
            robot: "arm".to_string(),
            source: DeviceError::failed("arm", "gripper jammed"),
        };
        assert_eq!(err.to_string(), "Transfer of source#0 by arm failed: arm: gripper jammed");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_device_error_conversion() {
        let err: PlateschedError = DeviceError::Disconnected("sealer".to_string()).into();
        assert!(matches!(err, PlateschedError::Device(_)));
        assert_eq!(err.to_string(), "Device error: sealer is not connected");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PlateschedError = io_err.into();
        assert!(matches!(err, PlateschedError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_err = serde_yaml::from_str::<Vec<u32>>("{not: a list").unwrap_err();
        let err: PlateschedError = yaml_err.into();
        assert!(matches!(err, PlateschedError::Yaml(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(PlateschedError::Stopped("plate scheduler".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
