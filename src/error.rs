//! Unified error type for the capture/route/classify pipeline.
//!
//! `RouterError` is the crate's internal error type, carried end to end from
//! a failing worker through the Supervisor to `main`'s exit code; nothing
//! downstream needs to erase it into a generic boxed error.

/// Crate-wide error, one variant per failure domain named in the routing
/// and capture design.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// A routing table could not be compiled from the supplied configuration.
    #[error("invalid route configuration: {0}")]
    Config(String),

    /// A worker's datalink disagreed with the process-wide linktype already
    /// fixed by an earlier worker.
    #[error("linktype mismatch on {source}: expected {expected}, got {actual}")]
    LinktypeMismatch {
        source: String,
        expected: i32,
        actual: i32,
    },

    /// The underlying capture library reported an I/O failure.
    #[error("capture I/O error on {source}: {message}")]
    CaptureIo { source: String, message: String },

    /// A captured frame could not be classified.
    #[error("classifier error: {0}")]
    Classifier(String),

    /// A dump file writer's underlying I/O failed.
    #[error("dump write error for {filename}: {message}")]
    DumpWrite { filename: String, message: String },

    /// The user interrupted the run (Ctrl-C).
    #[error("interrupted")]
    Interrupted,
}

impl RouterError {
    /// Process exit code this error should produce, per the CLI contract:
    /// 0 clean, 1 interrupted, non-zero on any other worker failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            RouterError::Interrupted => 1,
            _ => 2,
        }
    }
}
