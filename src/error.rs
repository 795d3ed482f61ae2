//! Error types for identity export and verification.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Keychain operation failed: {0}")]
    KeychainOperation(String),

    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Identity {0} not found in keychain")]
    IdentityNotFound(String),

    #[error("Export failed: {message}\n   Stdout: {stdout}\n   Stderr: {stderr}")]
    ExportFailed {
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("The exported P12 file is corrupt or invalid: {0}")]
    VerificationFailed(String),

    #[error("Failed to acquire export lock: {0}")]
    Locked(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    /// Remediation line shown under the fatal error, when one applies.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MissingConfig(_) => Some(
                "Set APPLE_CERT_HASH and APPLE_CERT_EXPORT_PASS in your .env file \
                 (see `security find-identity -v -p codesigning` for the hash).",
            ),
            Self::IdentityNotFound(_) => {
                Some("Run `security find-identity -v login.keychain` and copy the 40-character hash.")
            }
            Self::ExportFailed { .. } => Some(
                "Make sure login.keychain is unlocked and allow access if macOS prompts for it.",
            ),
            Self::VerificationFailed(_) => {
                Some("Do not upload this bundle. Re-run the export and check the export password.")
            }
            Self::MissingDependency(_) | Self::UnsupportedPlatform(_) => {
                Some("This tool needs macOS and the /usr/bin/security utility.")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_failure_carries_captured_output() {
        let err = ExportError::ExportFailed {
            message: "output file is empty or missing".to_string(),
            stdout: "".to_string(),
            stderr: "SecKeychainItemExport: User interaction is not allowed.".to_string(),
        };

        let text = err.to_string();
        assert!(text.contains("output file is empty or missing"));
        assert!(text.contains("User interaction is not allowed"));
        assert!(err.hint().is_some());
    }

    #[test]
    fn lock_failure_names_the_lock_not_a_rival_run() {
        let err = ExportError::Locked("scripts/.export.lock: Bad file descriptor".to_string());
        assert_eq!(
            err.to_string(),
            "Failed to acquire export lock: scripts/.export.lock: Bad file descriptor"
        );
    }

    #[test]
    fn io_errors_have_no_hint() {
        let err = ExportError::from(std::io::Error::other("disk full"));
        assert!(err.hint().is_none());
    }
}
