//! Scoped changes to the user keychain search list
//!
//! The search list is shared by every keychain-aware tool in the login
//! session. `security create-keychain` also appends the new keychain to it,
//! so the snapshot is taken before any keychain is created. [`SearchListGuard`]
//! puts that snapshot back, whether the export succeeded or not.

use super::temp::run_security;
use crate::error::Result;
use crate::macos::runner::{CommandRunner, SecurityCommand};
use std::io::Write;
use termcolor::WriteColor;

/// The user search list as it was before this run changed it
#[must_use = "the previous search list must be restored with SearchListGuard::restore"]
#[derive(Debug)]
pub struct SearchListGuard {
    previous: Vec<String>,
}

impl SearchListGuard {
    /// Remember the current user search list.
    ///
    /// Call this before creating any keychain: creation itself edits the list.
    ///
    /// # Returns
    /// * `Ok(SearchListGuard)` - Snapshot that must later be restored
    /// * `Err(ExportError::KeychainOperation)` - `list-keychains` failed
    pub async fn snapshot(runner: &dyn CommandRunner) -> Result<Self> {
        let previous = current_search_list(runner).await?;
        Ok(Self { previous })
    }

    /// Replace the user search list with `keychains`.
    pub async fn apply(&self, runner: &dyn CommandRunner, keychains: &[&str]) -> Result<()> {
        set_search_list(runner, keychains).await
    }

    #[must_use]
    pub fn previous(&self) -> &[String] {
        &self.previous
    }

    /// Put the remembered list back. Best effort: failures are reported.
    pub async fn restore(self, runner: &dyn CommandRunner) {
        let keychains: Vec<&str> = self.previous.iter().map(String::as_str).collect();
        match set_search_list(runner, &keychains).await {
            Ok(()) => tracing::debug!(?keychains, "Restored keychain search list"),
            Err(e) => {
                warn!("Could not restore the keychain search list: {e}");
                println!("   Restore it by hand with:");
                println!(
                    "   security list-keychains -d user -s {}",
                    self.previous.join(" ")
                );
            }
        }
    }
}

/// Read the user keychain search list
pub async fn current_search_list(runner: &dyn CommandRunner) -> Result<Vec<String>> {
    let output = run_security(
        runner,
        SecurityCommand::new("list-keychains").args(["-d", "user"]),
    )
    .await?;

    Ok(parse_keychain_list(&output.stdout))
}

async fn set_search_list(runner: &dyn CommandRunner, keychains: &[&str]) -> Result<()> {
    run_security(
        runner,
        SecurityCommand::new("list-keychains")
            .args(["-d", "user", "-s"])
            .args(keychains),
    )
    .await
    .map(|_| ())
}

/// Parse `security list-keychains` output: one quoted path per line.
#[must_use]
pub fn parse_keychain_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|l| l.trim().trim_matches('"').to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
