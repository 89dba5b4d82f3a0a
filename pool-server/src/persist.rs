use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Writes `value` as 2-space-indented JSON to `path` via temp-file + rename,
/// so a crash mid-write never leaves a corrupt file in place.
pub(crate) async fn atomic_write_json<T>(path: &Path, value: &T) -> anyhow::Result<()>
where
    T: Serialize,
{
    let data = serde_json::to_vec_pretty(value)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        use std::io::Write;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)?;
        Ok(())
    })
    .await??;
    Ok(())
}

/// Same atomic temp-file + rename contract as [`atomic_write_json`], for
/// callers writing something other than JSON (the NDP-proxy config file).
pub(crate) async fn atomic_write_json_raw(path: &Path, data: Vec<u8>) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        use std::io::Write;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)?;
        Ok(())
    })
    .await??;
    Ok(())
}

/// Reads and parses a JSON file at `path`. A missing file is treated as
/// absent (`Ok(None)`). A file that fails to parse is quarantined by
/// renaming it with a `.corrupt.<unix-ts>` suffix and treated as absent,
/// rather than failing the caller.
pub(crate) async fn read_json_tolerant<T>(path: &Path) -> anyhow::Result<Option<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let read_path = path.to_path_buf();
    let bytes = tokio::task::spawn_blocking(move || match std::fs::read(&read_path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::Error::from(e)),
    })
    .await??;

    let Some(bytes) = bytes else {
        return Ok(None);
    };

    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(error) => {
            tracing::warn!(%error, path = %path.display(), "corrupt state file, quarantining");
            let corrupt = quarantine_path(path);
            let orig = path.to_path_buf();
            tokio::task::spawn_blocking(move || std::fs::rename(&orig, &corrupt)).await??;
            Ok(None)
        }
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(&format!(".corrupt.{ts}"));
    path.with_file_name(name)
}

pub(crate) fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
