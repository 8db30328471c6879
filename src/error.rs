use thiserror::Error as ThisError;

/// Crate-wide error taxonomy. Variants map onto the failure kinds a driver
/// operation can produce, not onto individual call sites.
#[derive(ThisError, Debug)]
pub enum DriverError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("spec parse error in {file}: {reason}")]
    ParseValidation { file: String, reason: String },

    #[error("binding error for device {device_id}: {reason}")]
    Binding { device_id: String, reason: String },

    #[error("mapping error: {0}")]
    Mapping(String),

    #[error("transport/protocol error: {0}")]
    TransportProtocol(String),

    #[error("subscription lost for device {device_id}: {reason}")]
    SubscriptionLost { device_id: String, reason: String },

    #[error("operation timed out after {0}s")]
    Timeout(u16),

    #[error("unknown device id: {0}")]
    UnknownDevice(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;
