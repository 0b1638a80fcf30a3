//! Error types for quantization runs

use thiserror::Error;

/// Quantization orchestration errors
#[derive(Debug, Error)]
pub enum PtqError {
    /// Algorithm identifier outside the preset table
    #[error("Unsupported quantization algorithm '{algorithm}'. Supported: {supported}")]
    UnsupportedAlgorithm { algorithm: String, supported: String },

    /// Export precision tag outside the supported set
    #[error("Unsupported export dtype '{dtype}'. Supported: {supported}")]
    UnsupportedDtype { dtype: String, supported: String },

    /// Calibration data could not be shaped into batches
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Archive packaging or reading failed
    #[error("Archive error at {path}: {reason}")]
    Archive { path: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure raised by the checkpoint store, harness, toolkit or exporter
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Result type for quantization operations
pub type Result<T> = std::result::Result<T, PtqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_is_transparent() {
        let err: PtqError = anyhow::anyhow!("NCCL timeout on rank 3").into();
        assert_eq!(err.to_string(), "NCCL timeout on rank 3");
    }

    #[test]
    fn test_unsupported_algorithm_message() {
        let err = PtqError::UnsupportedAlgorithm {
            algorithm: "int2".to_string(),
            supported: "int8, fp8".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'int2'"));
        assert!(msg.contains("int8, fp8"));
    }
}
