//! Filesystem primitives shared by every component
//!
//! Uses atomic writes (write to temp file, then rename) so a document,
//! config or record file is never observed half-written.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Extension used for every JSON file the engine owns
pub const JSON_EXT: &str = "json";

/// Suffix of in-flight temp files; readers skip these
pub const TEMP_SUFFIX: &str = ".tmp";

/// Check that a name maps onto exactly one path component
///
/// Collections, document ids, config names, backup names and package ids
/// all end up in file or directory names.
pub fn validate_name(name: &str) -> EngineResult<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.starts_with('.') {
        Some("name must not start with '.'")
    } else if name.contains(&['/', '\\', '\0'][..]) {
        Some("name must not contain path separators")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(EngineError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Path of the JSON file for `name` inside `dir`
pub fn json_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{JSON_EXT}"))
}

/// Write data to a file atomically
///
/// 1. Write to a uniquely named temp file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// Concurrent writers to the same path never share a temp file; the last
/// rename wins.
pub async fn atomic_write(path: &Path, data: &[u8]) -> EngineResult<()> {
    let temp_path = write_temp(path, data).await?;
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(EngineError::io(path, e));
    }
    Ok(())
}

/// Write data to a file atomically unless the file already exists
///
/// The synced temp file is hard-linked to the target, which fails instead
/// of replacing an existing file. Returns `false` when the target existed;
/// of two racing creators exactly one gets `true`.
pub async fn atomic_create(path: &Path, data: &[u8]) -> EngineResult<bool> {
    let temp_path = write_temp(path, data).await?;
    let linked = fs::hard_link(&temp_path, path).await;
    let _ = fs::remove_file(&temp_path).await;

    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(EngineError::io(path, e)),
    }
}

/// Write `data` to a fresh synced temp file next to `path`
async fn write_temp(path: &Path, data: &[u8]) -> EngineResult<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::io(parent, e))?;
    }

    let temp_path = temp_path_for(path);
    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(EngineError::io(path, e));
    }
    Ok(temp_path)
}

/// Serialize `value` as pretty JSON and write it atomically
pub async fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> EngineResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes).await
}

/// Temp file path next to `path`, hidden and suffixed so scans ignore it
pub fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nonce = &uuid::Uuid::new_v4().simple().to_string()[..8];
    path.with_file_name(format!(".{file_name}.{nonce}{TEMP_SUFFIX}"))
}

/// True for files the engine should treat as JSON records
pub fn is_json_record(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    !hidden && path.extension().is_some_and(|ext| ext == JSON_EXT)
}

/// Recursively list every regular file under `root`, relative to `root`
///
/// Blocking; callers run it on a blocking worker. The result is sorted so
/// archives are built deterministically. Symlinks are not followed and do
/// not appear in the result.
pub fn walk_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                if let Ok(relative) = path.strip_prefix(root) {
                    files.push(relative.to_path_buf());
                }
            } else if file_type.is_symlink() {
                debug!(path = ?path, "skipping symlink");
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Render a relative path with `/` separators regardless of platform
pub fn to_slash_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
