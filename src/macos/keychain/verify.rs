//! Round-trip check of an exported bundle

use super::temp::{TempKeychain, random_password};
use crate::config::VERIFY_KEYCHAIN;
use crate::error::{ExportError, Result};
use crate::macos::runner::{CommandRunner, SecurityCommand};
use std::path::Path;

/// Import `p12_path` into a throwaway keychain with `password`
///
/// A failed import means the bundle is unusable. The verification keychain
/// is deleted whether or not the import worked.
///
/// # Arguments
/// * `runner` - Executes the `security` subcommands
/// * `p12_path` - Bundle produced by the export stage
/// * `password` - Export password the bundle was protected with
///
/// # Returns
/// * `Ok(())` - The bundle imported cleanly
/// * `Err(ExportError::VerificationFailed)` - Import returned non-zero; carries its stderr
/// * `Err(ExportError::KeychainOperation)` - The verification keychain could not be created
pub async fn verify_bundle(runner: &dyn CommandRunner, p12_path: &Path, password: &str) -> Result<()> {
    let keychain = TempKeychain::create(runner, VERIFY_KEYCHAIN, random_password()).await?;

    let outcome = import_into(runner, &keychain, p12_path, password).await;

    keychain.delete(runner).await;

    outcome
}

async fn import_into(
    runner: &dyn CommandRunner,
    keychain: &TempKeychain,
    p12_path: &Path,
    password: &str,
) -> Result<()> {
    let output = runner
        .run(
            &SecurityCommand::new("import")
                .path(p12_path)?
                .args(["-k", keychain.name(), "-P"])
                .secret(password)
                .args(["-T", "/usr/bin/codesign"]),
        )
        .await?;

    if !output.success() {
        return Err(ExportError::VerificationFailed(output.diagnostic().to_string()));
    }

    Ok(())
}
