//! The export run: load, prepare, export, verify, encode
//!
//! Stages run strictly in order and each one gates the next. A failure
//! skips the remaining stages, but the scratch keychain, the verification
//! keychain and the search list are always cleaned up.

use crate::config::{ExportConfig, ExportPaths, LOGIN_KEYCHAIN, TEMP_KEYCHAIN, VERIFY_KEYCHAIN};
use crate::encode::encode_bundle;
use crate::error::Result;
use crate::lock::RunLock;
use crate::macos::keychain::{
    Identity, SearchListGuard, TempKeychain, export_all_identities, export_identity,
    random_password, remove_stale, verify_bundle,
};
use crate::macos::runner::CommandRunner;
use crate::macos::validation::{check_dependencies, ensure_keychain_accessible};
use crate::remove_stale_file;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use termcolor::WriteColor;

/// Position of a run in its linear sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Loading,
    Preparing,
    Exporting,
    Verifying,
    Encoding,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loading => "loading configuration",
            Self::Preparing => "preparing keychains",
            Self::Exporting => "exporting",
            Self::Verifying => "verifying",
            Self::Encoding => "encoding",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What to export and where
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub paths: ExportPaths,
    /// Export every identity in the login keychain instead of the configured one
    pub all_identities: bool,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub p12_path: PathBuf,
    pub base64_path: PathBuf,
    pub size: usize,
    /// `None` when every identity was exported
    pub identity: Option<Identity>,
}

/// One export run against a [`CommandRunner`]
pub struct Pipeline<'a> {
    runner: &'a dyn CommandRunner,
    options: ExportOptions,
    stage: Stage,
    failed_during: Option<Stage>,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, options: ExportOptions) -> Self {
        Self {
            runner,
            options,
            stage: Stage::Loading,
            failed_during: None,
        }
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Stage that was running when the run failed
    #[must_use]
    pub fn failed_during(&self) -> Option<Stage> {
        self.failed_during
    }

    /// Run every stage. Ends in [`Stage::Done`] or [`Stage::Failed`].
    pub async fn run(&mut self) -> Result<ExportReport> {
        let result = self.run_stages().await;

        match &result {
            Ok(_) => self.advance(Stage::Done),
            Err(e) => {
                tracing::debug!(stage = %self.stage, error = %e, "Export failed");
                self.failed_during = Some(self.stage);
                self.stage = Stage::Failed;
            }
        }

        result
    }

    fn advance(&mut self, next: Stage) {
        tracing::debug!(from = %self.stage, to = %next, "Stage");
        self.stage = next;
    }

    async fn run_stages(&mut self) -> Result<ExportReport> {
        let config = ExportConfig::load(&self.options.paths.env_file).await?;
        println!("ℹ️  Using Certificate Hash: {}", config.identity_hash);

        self.advance(Stage::Preparing);
        let _lock = RunLock::acquire(self.options.paths.output_dir()).await?;
        let runner = self.runner;

        check_dependencies(runner).await?;
        ensure_keychain_accessible(runner, LOGIN_KEYCHAIN).await?;

        println!("🧹 Cleaning up old files...");
        remove_stale(runner, VERIFY_KEYCHAIN).await?;
        remove_stale(runner, TEMP_KEYCHAIN).await?;
        remove_stale_file(&self.options.paths.p12_output, "exported bundle").await?;
        remove_stale_file(&self.options.paths.base64_output, "base64 bundle").await?;
        if let Some(dir) = self.options.paths.base64_output.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Taken before create-keychain, which appends to the list
        let search_list = SearchListGuard::snapshot(runner).await?;

        let outcome = self.with_scratch_keychain(&config, &search_list).await;

        search_list.restore(runner).await;

        outcome
    }

    async fn with_scratch_keychain(
        &mut self,
        config: &ExportConfig,
        search_list: &SearchListGuard,
    ) -> Result<ExportReport> {
        let runner = self.runner;

        let password = match &config.temp_keychain_password {
            Some(password) => password.clone(),
            None => {
                warn!("APPLE_TEMP_KEYCHAIN_PASS not set, using a random keychain password");
                random_password()
            }
        };

        println!("🔐 Creating temporary keychain: {TEMP_KEYCHAIN}");
        let scratch = TempKeychain::create(runner, TEMP_KEYCHAIN, password).await?;
        if let Err(e) = scratch.unlock(runner).await {
            scratch.delete(runner).await;
            return Err(e);
        }

        println!("🔍 Configuring search list...");
        if let Err(e) = search_list
            .apply(runner, &[TEMP_KEYCHAIN, LOGIN_KEYCHAIN])
            .await
        {
            scratch.delete(runner).await;
            return Err(e);
        }

        let outcome = self.export_verify_encode(config, &scratch).await;

        scratch.delete(runner).await;

        outcome
    }

    async fn export_verify_encode(
        &mut self,
        config: &ExportConfig,
        scratch: &TempKeychain,
    ) -> Result<ExportReport> {
        let runner = self.runner;
        let paths = self.options.paths.clone();

        self.advance(Stage::Exporting);
        let identity = if self.options.all_identities {
            warn!("Exporting ALL identities in {LOGIN_KEYCHAIN}, not only {}", config.identity_hash);
            export_all_identities(runner, &config.export_password, &paths.p12_output).await?;
            None
        } else {
            Some(
                export_identity(
                    runner,
                    scratch,
                    &config.identity_hash,
                    &config.export_password,
                    &paths.p12_output,
                )
                .await?,
            )
        };
        success!("P12 file created.");

        self.advance(Stage::Verifying);
        println!("🕵️  Verifying P12 integrity...");
        verify_bundle(runner, &paths.p12_output, &config.export_password).await?;
        success!("P12 file verified successfully (it works!).");

        self.advance(Stage::Encoding);
        let size = encode_bundle(&paths.p12_output, &paths.base64_output).await?;
        println!("   Size: {size} bytes");

        Ok(ExportReport {
            p12_path: paths.p12_output,
            base64_path: paths.base64_output,
            size,
            identity,
        })
    }
}
