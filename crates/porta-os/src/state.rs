use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use tracing::info;

use porta::PortConfig;

use crate::error::Result;

/// Loads the port configurations saved in a state file.
///
/// A missing file holds no ports.
///
/// # Errors
///
/// Fails when the file cannot be read or does not contain a list of port
/// configurations.
pub async fn load_state(path: impl AsRef<Path>) -> Result<Vec<PortConfig>> {
    let path = path.as_ref();
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            info!("No state file at {}, starting without ports", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&contents)?)
}

/// Saves port configurations to a state file.
///
/// The list is first written next to the file, then moved over it, so that
/// an interrupted save never leaves a truncated file behind.
///
/// # Errors
///
/// Fails when the file cannot be written.
pub async fn save_state(path: impl AsRef<Path>, configs: &[PortConfig]) -> Result<()> {
    let path = path.as_ref();
    let contents = serde_json::to_vec_pretty(configs)?;

    let partial = path.with_extension("partial");
    tokio::fs::write(&partial, contents).await?;
    tokio::fs::rename(&partial, path).await?;
    Ok(())
}
