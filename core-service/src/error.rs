use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Device error: {0}")]
    Device(#[from] core_device::DeviceError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Transfer error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl CoreError {
    /// Connection errors end the current open attempt; the host decides
    /// whether to probe again.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, CoreError::Device(e) if e.is_connection_error())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
