//! Export a macOS code-signing identity to a verified PKCS#12 bundle and its
//! base64 rendering for CI secret stores

use std::io::Write;
use termcolor::{BufferWriter, Color, ColorChoice, ColorSpec, WriteColor};

/// Remove an artifact left by an earlier run.
///
/// A missing file is fine. Any other failure is fatal: a stale bundle that
/// survives would be mistaken for this run's export. The warning printed
/// before returning carries an actionable suggestion.
pub async fn remove_stale_file<P: AsRef<std::path::Path>>(
    path: P,
    description: &str,
) -> error::Result<()> {
    let path = path.as_ref();

    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            return Err(error::ExportError::InvalidConfig(format!(
                "{description} path is a directory: {}",
                path.display()
            )));
        }
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };

    let Err(e) = result else {
        tracing::debug!(path = %path.display(), "Removed stale {description}");
        return Ok(());
    };

    // Nothing to remove
    if e.kind() == std::io::ErrorKind::NotFound {
        return Ok(());
    }

    let bufwtr = BufferWriter::stderr(ColorChoice::Auto);
    let mut buffer = bufwtr.buffer();

    let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)));
    let _ = writeln!(&mut buffer, "⚠️  Warning: Failed to remove stale {description}");
    let _ = buffer.reset();
    let _ = writeln!(&mut buffer, "   Path: {}", path.display());
    let _ = writeln!(&mut buffer, "   Error: {e}");

    if e.kind() == std::io::ErrorKind::PermissionDenied {
        let _ = writeln!(
            &mut buffer,
            "   Suggestion: Check file permissions or try: rm -f {}",
            path.display()
        );
    }

    let _ = bufwtr.print(&buffer);

    Err(e.into())
}

pub mod config;
pub mod encode;
pub mod error;
pub mod lock;

#[macro_use]
pub mod macos;

pub mod pipeline;

// Re-export common types
pub use config::{ExportConfig, ExportPaths};
pub use error::ExportError;
pub use pipeline::{ExportOptions, ExportReport, Pipeline, Stage};
