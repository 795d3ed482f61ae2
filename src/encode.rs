//! Base64 rendering of the exported bundle for CI secret stores

use crate::error::Result;
use base64::Engine;
use std::path::Path;

/// Read the bundle at `p12_path`, write its base64 text to `base64_path`.
///
/// Returns the bundle size in bytes. The text uses the standard alphabet
/// with padding and no line breaks, which is what GitHub secrets expect.
pub async fn encode_bundle(p12_path: &Path, base64_path: &Path) -> Result<usize> {
    let content = tokio::fs::read(p12_path).await?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(&content);
    tokio::fs::write(base64_path, encoded).await?;

    Ok(content.len())
}
