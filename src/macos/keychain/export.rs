//! PKCS#12 export of signing identities
//!
//! `security export` cannot select a single identity: it writes every
//! identity in the source keychain. To export exactly one, the login
//! keychain's identities are staged in the scratch keychain, everything but
//! the wanted identity is deleted there, and the scratch keychain is exported.

use super::identity::{Identity, delete_identity, find_identities, normalize_hash};
use super::temp::TempKeychain;
use crate::config::LOGIN_KEYCHAIN;
use crate::error::{ExportError, Result};
use crate::macos::runner::{CommandOutput, CommandRunner, SecurityCommand};
use std::path::Path;
use tempfile::TempDir;

/// Export exactly the identity with `identity_hash` from the login keychain
///
/// `scratch` must be unlocked. On return it holds only that identity.
///
/// # Arguments
/// * `runner` - Executes the `security` subcommands
/// * `scratch` - Unlocked temporary keychain used for staging and pruning
/// * `identity_hash` - SHA-1 hash of the identity (case and `:` separators ignored)
/// * `password` - Password protecting the staging bundle and the output bundle
/// * `output` - Where the final PKCS#12 bundle is written
///
/// # Returns
/// * `Ok(Identity)` - The exported identity; `output` is a non-empty bundle
/// * `Err(ExportError::IdentityNotFound)` - The hash is not in the login keychain
/// * `Err(ExportError::ExportFailed)` - An export or the staging import produced nothing usable
pub async fn export_identity(
    runner: &dyn CommandRunner,
    scratch: &TempKeychain,
    identity_hash: &str,
    password: &str,
    output: &Path,
) -> Result<Identity> {
    let wanted = normalize_hash(identity_hash);

    let identity = find_identities(runner, LOGIN_KEYCHAIN)
        .await?
        .into_iter()
        .find(|i| i.hash == wanted)
        .ok_or_else(|| ExportError::IdentityNotFound(format!("{wanted} ({LOGIN_KEYCHAIN})")))?;

    println!("📋 Copying identity {} to {}...", identity.name, scratch.name());

    // Staging bundle lives in a private 0700 directory, removed on drop
    let staging_dir = TempDir::new()?;
    let staging = staging_dir.path().join("identities.p12");

    println!("⚠️  Exporting P12 (You may be prompted for password)...");
    export_keychain(runner, LOGIN_KEYCHAIN, password, &staging).await?;

    let import = runner
        .run(
            &SecurityCommand::new("import")
                .path(&staging)?
                .args(["-k", scratch.name(), "-P"])
                .secret(password)
                .arg("-A"),
        )
        .await?;

    if !import.success() {
        return Err(export_failed(
            format!("could not stage identities in {}", scratch.name()),
            &import,
        ));
    }

    drop(staging_dir);

    for other in find_identities(runner, scratch.name()).await? {
        if other.hash != wanted {
            tracing::debug!(hash = %other.hash, name = %other.name, "Pruning identity");
            delete_identity(runner, scratch.name(), &other.hash).await?;
        }
    }

    let remaining = find_identities(runner, scratch.name()).await?;
    if !remaining.iter().any(|i| i.hash == wanted) {
        return Err(ExportError::IdentityNotFound(format!(
            "{wanted} ({} after import)",
            scratch.name()
        )));
    }

    export_keychain(runner, scratch.name(), password, output).await?;

    Ok(identity)
}

/// Export every identity in the login keychain
pub async fn export_all_identities(
    runner: &dyn CommandRunner,
    password: &str,
    output: &Path,
) -> Result<()> {
    println!("⚠️  Exporting P12 (You may be prompted for password)...");
    export_keychain(runner, LOGIN_KEYCHAIN, password, output).await
}

/// Run `security export` once and require a non-empty bundle at `output`.
async fn export_keychain(
    runner: &dyn CommandRunner,
    keychain: &str,
    password: &str,
    output: &Path,
) -> Result<()> {
    let result = runner
        .run(
            &SecurityCommand::new("export")
                .args(["-k", keychain, "-t", "identities", "-f", "pkcs12", "-P"])
                .secret(password)
                .arg("-o")
                .path(output)?,
        )
        .await?;

    let written = tokio::fs::metadata(output)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false);

    if !written {
        return Err(export_failed(
            "output file is empty or missing".to_string(),
            &result,
        ));
    }

    Ok(())
}

fn export_failed(message: String, output: &CommandOutput) -> ExportError {
    ExportError::ExportFailed {
        message,
        stdout: output.stdout.trim().to_string(),
        stderr: output.stderr.trim().to_string(),
    }
}
