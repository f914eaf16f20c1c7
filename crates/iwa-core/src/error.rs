//! Infrastructure-layer error taxonomy.
//!
//! Every variant here is fatal for the startup sequence that produced it:
//! binaries surface them with a non-zero exit and the attached diagnostics.

use crate::runtime::RuntimeError;

/// Errors produced while provisioning, polling or forwarding.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("{operation} failed for {target}: {source}")]
    Provisioning {
        operation: &'static str,
        target: String,
        #[source]
        source: RuntimeError,
    },

    #[error("{target} not healthy after {attempts} attempt(s); recent logs:\n{log_tail}")]
    ReadinessTimeout {
        target: String,
        attempts: u32,
        log_tail: String,
    },

    #[error("port forward {local_port} -> {target} died at startup: {reason}")]
    ForwardStartup {
        local_port: u16,
        target: String,
        reason: String,
    },

    #[error("sibling services failed to start: {0}")]
    Compose(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl OrchestrationError {
    pub(crate) fn provisioning(
        operation: &'static str,
        target: impl Into<String>,
        source: RuntimeError,
    ) -> Self {
        OrchestrationError::Provisioning {
            operation,
            target: target.into(),
            source,
        }
    }
}

/// Result type for orchestration operations.
pub type OrchestrationResult<T> = std::result::Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_timeout_carries_log_tail() {
        let err = OrchestrationError::ReadinessTimeout {
            target: "autoppia-affine-env".to_string(),
            attempts: 60,
            log_tail: "Traceback: boom".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("60 attempt(s)"));
        assert!(msg.contains("Traceback: boom"));
    }

    #[test]
    fn test_provisioning_error_names_target() {
        let err = OrchestrationError::provisioning(
            "create network",
            "iwa-net",
            RuntimeError::CommandFailed {
                command: "docker network create iwa-net".to_string(),
                code: Some(1),
                stderr: "permission denied".to_string(),
            },
        );
        let msg = err.to_string();
        assert!(msg.contains("create network"));
        assert!(msg.contains("iwa-net"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_forward_startup_error_display() {
        let err = OrchestrationError::ForwardStartup {
            local_port: 8000,
            target: "web:8000".to_string(),
            reason: "address in use".to_string(),
        };
        assert!(err.to_string().contains("8000 -> web:8000"));
    }
}
