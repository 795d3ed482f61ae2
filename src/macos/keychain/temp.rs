//! Scratch keychains created for the duration of one export

use crate::error::{ExportError, Result};
use crate::macos::runner::{CommandOutput, CommandRunner, SecurityCommand};
use rand::distr::{Alphanumeric, SampleString};
use std::io::Write;
use termcolor::WriteColor;
use zeroize::Zeroizing;

/// A keychain this process created and is responsible for deleting
///
/// There is no `Drop` cleanup: deleting goes through the async runner, so
/// owners call [`TempKeychain::delete`] on every exit path.
#[must_use = "temporary keychains must be deleted with TempKeychain::delete"]
pub struct TempKeychain {
    name: String,
    password: Zeroizing<String>,
}

impl TempKeychain {
    /// Create a fresh keychain, replacing any stale one with the same name.
    ///
    /// The keychain gets no auto-lock timeout. It is left locked; call
    /// [`TempKeychain::unlock`] when items will be written through it.
    pub async fn create(
        runner: &dyn CommandRunner,
        name: &str,
        password: Zeroizing<String>,
    ) -> Result<Self> {
        remove_stale(runner, name).await?;

        run_security(
            runner,
            SecurityCommand::new("create-keychain")
                .arg("-p")
                .secret(&password)
                .arg(name),
        )
        .await?;

        let keychain = Self {
            name: name.to_string(),
            password,
        };

        // Disable the lock timeout
        if let Err(e) = run_security(
            runner,
            SecurityCommand::new("set-keychain-settings").arg(name),
        )
        .await
        {
            keychain.delete(runner).await;
            return Err(e);
        }

        Ok(keychain)
    }

    pub async fn unlock(&self, runner: &dyn CommandRunner) -> Result<()> {
        run_security(
            runner,
            SecurityCommand::new("unlock-keychain")
                .arg("-p")
                .secret(&self.password)
                .arg(&self.name),
        )
        .await
        .map(|_| ())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delete the keychain. Best effort: failures are reported, not returned.
    pub async fn delete(self, runner: &dyn CommandRunner) {
        let cmd = SecurityCommand::new("delete-keychain").arg(&self.name);
        match runner.run(&cmd).await {
            Ok(output) if output.success() => {
                tracing::debug!(keychain = %self.name, "Deleted temporary keychain");
            }
            Ok(output) => {
                warn!(
                    "Failed to delete keychain {}: {}",
                    self.name,
                    output.diagnostic()
                );
            }
            Err(e) => {
                warn!("Failed to delete keychain {}: {e}", self.name);
            }
        }
    }
}

/// Random password for keychains nobody needs to open by hand
#[must_use]
pub fn random_password() -> Zeroizing<String> {
    Zeroizing::new(Alphanumeric.sample_string(&mut rand::rng(), 24))
}

/// Delete a keychain left over from an earlier run.
///
/// A non-zero exit usually means there was nothing to delete.
pub async fn remove_stale(runner: &dyn CommandRunner, name: &str) -> Result<()> {
    let output = runner
        .run(&SecurityCommand::new("delete-keychain").arg(name))
        .await?;

    if output.success() {
        tracing::debug!(keychain = name, "Removed stale keychain");
    }

    Ok(())
}

/// Run a `security` command whose failure aborts the current stage
pub(crate) async fn run_security(
    runner: &dyn CommandRunner,
    command: SecurityCommand,
) -> Result<CommandOutput> {
    let output = runner.run(&command).await?;

    if !output.success() {
        return Err(ExportError::KeychainOperation(format!(
            "security {} failed: {}",
            command.subcommand(),
            output.diagnostic()
        )));
    }

    Ok(output)
}
