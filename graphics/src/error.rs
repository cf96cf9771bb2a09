//! Graphics error types.

use std::time::Duration;

/// Errors that can occur in the graphics system.
///
/// Setup failures (initialization, resource creation, table exhaustion) are
/// fatal: the caller cannot render without a valid device and bindless
/// tables, so these propagate to top-level termination. A device that has
/// not yet reached a fence value is *not* an error; the frame scheduler
/// blocks on it internally and only surfaces [`DeviceTimeout`] when the
/// configured wait policy expires.
///
/// [`DeviceTimeout`]: GraphicsError::DeviceTimeout
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// Failed to create a resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// A requested feature is not supported by the device.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),
    /// A descriptor table has no free slots left.
    #[error("descriptor table full: {0}")]
    DescriptorTableFull(&'static str),
    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// A wait on the device timeline exceeded the configured timeout.
    #[error("device timeline wait for value {value} timed out after {timeout:?}")]
    DeviceTimeout {
        /// The completion value that was waited for.
        value: u64,
        /// The timeout that elapsed.
        timeout: Duration,
    },
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
    /// The surface is outdated and needs to be reconfigured.
    #[error("surface outdated, needs reconfiguration")]
    SurfaceOutdated,
    /// The surface was lost and needs to be recreated.
    #[error("surface lost, needs recreation")]
    SurfaceLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::DeviceLost;
        assert_eq!(err.to_string(), "GPU device lost");

        let err = GraphicsError::InitializationFailed("no adapter found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no adapter found");

        let err = GraphicsError::DescriptorTableFull("sampler");
        assert_eq!(err.to_string(), "descriptor table full: sampler");
    }

    #[test]
    fn test_timeout_display_mentions_value() {
        let err = GraphicsError::DeviceTimeout {
            value: 7,
            timeout: Duration::from_secs(10),
        };
        assert!(err.to_string().contains("value 7"));
    }
}
