use bridge_traits::device::NativeId;
use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No device attached")]
    NoDeviceAttached,

    #[error("Device connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Device resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Device family mismatch: expected {expected}, found {found}")]
    WrongFamily { expected: String, found: String },

    #[error("Device handshake timed out after {0} ms")]
    HandshakeTimeout(u64),

    #[error("Device I/O error: {0}")]
    Io(String),

    #[error("Folder '{name}' not found under folder {parent_id}")]
    FolderNotFound { name: String, parent_id: NativeId },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Track {0} is not known to this session")]
    TrackNotFound(String),

    #[error("Session is {state}, expected ready")]
    NotReady { state: String },

    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),

    #[error("A session is already registered for device {0}")]
    SessionExists(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },
}

impl DeviceError {
    /// Connection-class failures. Terminal for the current attempt; the
    /// caller decides whether to probe again.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DeviceError::NoDeviceAttached
                | DeviceError::ConnectionFailed(_)
                | DeviceError::ResourceExhausted(_)
                | DeviceError::WrongFamily { .. }
                | DeviceError::HandshakeTimeout(_)
        )
    }
}

impl From<BridgeError> for DeviceError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NoDeviceAttached => DeviceError::NoDeviceAttached,
            BridgeError::ConnectionFailed(msg) => DeviceError::ConnectionFailed(msg),
            BridgeError::ResourceExhausted(msg) => DeviceError::ResourceExhausted(msg),
            BridgeError::WrongFamily { expected, found } => {
                DeviceError::WrongFamily { expected, found }
            }
            BridgeError::Unsupported(msg) | BridgeError::NotAvailable(msg) => {
                DeviceError::UnsupportedOperation(msg)
            }
            BridgeError::ObjectNotFound(id) => {
                DeviceError::Io(format!("object {} not found on device", id))
            }
            BridgeError::OperationFailed(msg) => DeviceError::Io(msg),
            BridgeError::Io(err) => DeviceError::Io(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
