use thiserror::Error;

/// Failures of the clock's connectivity, time and display pipeline.
///
/// Each variant has a fixed handling policy in bootstrap: connectivity
/// exhaustion is logged and ignored, time-sync exhaustion is gated by debug
/// mode, display init failure ends the refresh task, receive failures affect
/// one request, and a memory integrity fault aborts the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("WiFi connection failed after {attempts} attempts")]
    ConnectivityExhausted { attempts: u8 },

    #[error("SNTP sync did not complete after {attempts} reads")]
    TimeSyncExhausted { attempts: u8 },

    #[error("{peripheral} init failed: {reason}")]
    PeripheralInitFailure {
        peripheral: &'static str,
        reason: String,
    },

    #[error("failed to receive request body: {reason}")]
    RequestReceiveFailure { reason: String },

    #[error("heap integrity check failed {stage} event handling")]
    MemoryIntegrityFault { stage: &'static str },

    #[error("network event channel closed before a connection was made")]
    EventChannelClosed,

    #[error("network stack error: {0}")]
    Network(String),
}

impl ClockError {
    /// True for errors that must take the whole process down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClockError::MemoryIntegrityFault { .. })
    }
}

pub type Result<T> = core::result::Result<T, ClockError>;
