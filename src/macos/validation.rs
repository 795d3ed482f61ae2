//! Path expansion and preflight checks before touching any keychain

use super::runner::{CommandRunner, SecurityCommand};
use crate::error::{ExportError, Result};

/// Expand tilde in path, returning error if HOME is not set
///
/// # Arguments
/// * `path` - Path that may contain tilde prefix
///
/// # Returns
/// * `Ok(String)` - Expanded path
/// * `Err(ExportError::InvalidConfig)` - If tilde expansion failed
///
/// When HOME is unset, shellexpand leaves `~` unchanged; that case is
/// reported instead of silently using a relative path named `~`.
pub fn expand_tilde_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path).to_string();

    if path.starts_with('~') && expanded.starts_with('~') {
        return Err(ExportError::InvalidConfig(
            "Could not expand ~ in path (HOME environment variable not set).\n\
             Please use absolute path instead."
                .to_string(),
        ));
    }

    Ok(expanded)
}

/// Check that the `security` utility can be started
pub async fn check_dependencies(runner: &dyn CommandRunner) -> Result<()> {
    match runner.run(&SecurityCommand::new("help")).await {
        Ok(_) => Ok(()),
        Err(ExportError::MissingDependency(_) | ExportError::CommandExecution(_)) => {
            Err(ExportError::MissingDependency(
                "'security' command not available.\n\
                 This tool requires macOS with the security framework."
                    .to_string(),
            ))
        }
        Err(e) => Err(e),
    }
}

/// Verify keychain is accessible
///
/// Uses `security show-keychain-info` and turns the common failures into
/// instructions for the user.
///
/// # Arguments
/// * `runner` - Executes the `security` subcommands
/// * `keychain` - Keychain name (e.g., "login.keychain")
///
/// # Returns
/// * `Ok(())` - Keychain is accessible
/// * `Err(ExportError::KeychainOperation)` - Keychain is locked, missing or unreadable
pub async fn ensure_keychain_accessible(runner: &dyn CommandRunner, keychain: &str) -> Result<()> {
    let output = runner
        .run(&SecurityCommand::new("show-keychain-info").arg(keychain))
        .await?;

    if output.success() {
        return Ok(());
    }

    let stderr = output.stderr.trim();

    if stderr.contains("locked") {
        return Err(ExportError::KeychainOperation(format!(
            "Keychain '{keychain}' is locked.\n\
             Please unlock it before exporting:\n\
             1. Open Keychain Access app\n\
             2. Right-click '{keychain}' → Unlock Keychain\n\
             3. Or run: security unlock-keychain {keychain}"
        )));
    }

    if stderr.contains("could not be found") || stderr.contains("does not exist") {
        return Err(ExportError::KeychainOperation(format!(
            "Keychain '{keychain}' not found."
        )));
    }

    Err(ExportError::KeychainOperation(format!(
        "Keychain check failed: {stderr}"
    )))
}
