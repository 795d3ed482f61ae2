//! Configuration for identity export.
//!
//! Secrets are read from a `.env`-style file: one `KEY=VALUE` per line,
//! `#` comments, optional matching quotes around the value.

use crate::error::{ExportError, Result};
use crate::warn;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use termcolor::WriteColor;
use zeroize::Zeroizing;

/// Env file read when no `--env-file` is given
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Default location of the exported bundle
pub const DEFAULT_P12_OUTPUT: &str = "scripts/certificate.p12";

/// Default location of the base64 rendering of the bundle
pub const DEFAULT_BASE64_OUTPUT: &str = "scripts/certificate_base64.txt";

/// Keychain the identity is exported from
pub const LOGIN_KEYCHAIN: &str = "login.keychain";

/// Scratch keychain used while exporting
pub const TEMP_KEYCHAIN: &str = "temp_export.keychain";

/// Disposable keychain used to prove the bundle imports
pub const VERIFY_KEYCHAIN: &str = "verify.keychain";

pub const CERT_HASH_KEY: &str = "APPLE_CERT_HASH";
pub const EXPORT_PASS_KEY: &str = "APPLE_CERT_EXPORT_PASS";
pub const TEMP_KEYCHAIN_PASS_KEY: &str = "APPLE_TEMP_KEYCHAIN_PASS";

/// Raw key/value pairs from an env file
pub type EnvMap = HashMap<String, Zeroizing<String>>;

/// Settings needed to export one signing identity
pub struct ExportConfig {
    /// SHA-1 hash of the identity, as printed by `security find-identity`
    pub identity_hash: String,
    pub export_password: Zeroizing<String>,
    /// `None` means a random password is generated for the scratch keychain
    pub temp_keychain_password: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for ExportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportConfig")
            .field("identity_hash", &self.identity_hash)
            .field("export_password", &"****")
            .field(
                "temp_keychain_password",
                &self.temp_keychain_password.as_ref().map(|_| "****"),
            )
            .finish()
    }
}

impl ExportConfig {
    /// Read and validate the env file at `path`.
    ///
    /// A missing file is only a warning; the required keys then fail the
    /// presence check.
    pub async fn load(path: &Path) -> Result<Self> {
        let vars = if tokio::fs::try_exists(path).await.unwrap_or(false) {
            println!("📄 Loading config from {}...", path.display());
            let content = Zeroizing::new(tokio::fs::read_to_string(path).await?);
            parse_env(&content)
        } else {
            warn!("{} file not found!", path.display());
            EnvMap::new()
        };

        Self::from_env_map(&vars)
    }

    /// Build the config from parsed key/value pairs.
    pub fn from_env_map(vars: &EnvMap) -> Result<Self> {
        let identity_hash = non_empty(vars, CERT_HASH_KEY);
        let export_password = non_empty(vars, EXPORT_PASS_KEY);

        let (Some(identity_hash), Some(export_password)) = (identity_hash, export_password) else {
            let missing: Vec<&str> = [CERT_HASH_KEY, EXPORT_PASS_KEY]
                .into_iter()
                .filter(|key| non_empty(vars, key).is_none())
                .collect();
            return Err(ExportError::MissingConfig(format!(
                "{} must be set in your .env file",
                missing.join(" and ")
            )));
        };

        Ok(Self {
            identity_hash: identity_hash.to_string(),
            export_password: export_password.clone(),
            temp_keychain_password: non_empty(vars, TEMP_KEYCHAIN_PASS_KEY).cloned(),
        })
    }
}

fn non_empty<'a>(vars: &'a EnvMap, key: &str) -> Option<&'a Zeroizing<String>> {
    vars.get(key).filter(|v| !v.is_empty())
}

/// Parse `.env` content into key/value pairs.
///
/// Blank lines, `#` comments and lines without `=` are skipped. A leading
/// `export ` is ignored. Values wrapped in a matching pair of `"` or `'`
/// lose the quotes. Later keys overwrite earlier ones.
#[must_use]
pub fn parse_env(content: &str) -> EnvMap {
    let mut vars = EnvMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        vars.insert(key.to_string(), Zeroizing::new(unquote(value.trim()).to_string()));
    }

    vars
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2
            && let Some(inner) = value
                .strip_prefix(quote)
                .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Where the artifacts of one run are written
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub env_file: PathBuf,
    pub p12_output: PathBuf,
    pub base64_output: PathBuf,
}

impl Default for ExportPaths {
    fn default() -> Self {
        Self {
            env_file: PathBuf::from(DEFAULT_ENV_FILE),
            p12_output: PathBuf::from(DEFAULT_P12_OUTPUT),
            base64_output: PathBuf::from(DEFAULT_BASE64_OUTPUT),
        }
    }
}

impl ExportPaths {
    /// Directory that holds the run lock, next to the bundle.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        match self.p12_output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}
