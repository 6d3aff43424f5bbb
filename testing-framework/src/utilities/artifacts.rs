// File: testing-framework/src/utilities/artifacts.rs
//
// Failure Artifact Persistence
//
// Reports of failed runs are written as pretty JSON so they can be attached
// to a CI job and read back without the harness.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Write `artifact` to `<output_dir>/<name>_<timestamp>.json`
///
/// The directory is created if needed. Returns the path of the new file.
pub async fn save_json_artifact<T: Serialize>(
    output_dir: impl AsRef<Path>,
    name: &str,
    artifact: &T,
) -> Result<PathBuf> {
    let output_dir = output_dir.as_ref();
    fs::create_dir_all(output_dir)
        .await
        .context("Failed to create artifact directory")?;

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f");
    let filepath = output_dir.join(format!("{}_{}.json", name, timestamp));

    let json = serde_json::to_string_pretty(artifact).context("Failed to serialize artifact")?;

    let mut file = fs::File::create(&filepath)
        .await
        .context("Failed to create artifact file")?;
    file.write_all(json.as_bytes())
        .await
        .context("Failed to write artifact data")?;
    file.flush()
        .await
        .context("Failed to flush artifact file")?;

    Ok(filepath)
}

/// Read back an artifact written by [`save_json_artifact`]
pub async fn load_json_artifact<T: serde::de::DeserializeOwned>(
    path: impl AsRef<Path>,
) -> Result<T> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;
    serde_json::from_str(&json).context("Failed to parse artifact")
}
