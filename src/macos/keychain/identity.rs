//! Listing and pruning signing identities

use super::temp::run_security;
use crate::error::Result;
use crate::macos::runner::{CommandRunner, SecurityCommand};

/// A certificate with its private key, as listed by `security find-identity`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Uppercase SHA-1 hash of the certificate
    pub hash: String,
    pub name: String,
}

impl Identity {
    #[must_use]
    pub fn matches(&self, hash: &str) -> bool {
        self.hash == normalize_hash(hash)
    }
}

/// Uppercase a hash and drop spaces and colons, so pasted fingerprints compare equal.
#[must_use]
pub fn normalize_hash(hash: &str) -> String {
    hash.chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// List every identity in `keychain`, valid or not
pub async fn find_identities(runner: &dyn CommandRunner, keychain: &str) -> Result<Vec<Identity>> {
    let output = run_security(runner, SecurityCommand::new("find-identity").arg(keychain)).await?;
    Ok(parse_identities(&output.stdout))
}

/// Remove the identity with `hash` from `keychain`
pub async fn delete_identity(runner: &dyn CommandRunner, keychain: &str, hash: &str) -> Result<()> {
    run_security(
        runner,
        SecurityCommand::new("delete-identity")
            .args(["-Z", hash])
            .arg(keychain),
    )
    .await
    .map(|_| ())
}

/// Parse `security find-identity` output
///
/// Format: `  1) 0123…CDEF "Developer ID Application: Acme Corp (TEAM123)"`.
/// The same identity appears under both "Matching identities" and "Valid
/// identities only"; duplicates are dropped, first occurrence wins.
#[must_use]
pub fn parse_identities(stdout: &str) -> Vec<Identity> {
    let mut identities: Vec<Identity> = Vec::new();

    for line in stdout.lines() {
        let trimmed = line.trim();

        let Some((index, rest)) = trimmed.split_once(')') else {
            continue;
        };
        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let rest = rest.trim_start();
        let Some(hash) = rest.split_whitespace().next() else {
            continue;
        };
        if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }

        let name = rest[hash.len()..]
            .trim()
            .strip_prefix('"')
            .and_then(|n| n.split('"').next())
            .unwrap_or_default()
            .to_string();

        let hash = hash.to_ascii_uppercase();
        if !identities.iter().any(|i| i.hash == hash) {
            identities.push(Identity { hash, name });
        }
    }

    identities
}
