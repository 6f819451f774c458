use thiserror::Error;

/// Errors raised by bridge implementations (host adapters and device drivers).
///
/// The first group mirrors the detection codes device transports report
/// during a handshake; the engine treats those as terminal for one attempt.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("No device attached")]
    NoDeviceAttached,

    #[error("Device connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Device resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Device family mismatch: expected {expected}, found {found}")]
    WrongFamily { expected: String, found: String },

    #[error("Object {0} not found on device")]
    ObjectNotFound(u32),

    #[error("Operation not supported by this bridge: {0}")]
    Unsupported(String),

    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
