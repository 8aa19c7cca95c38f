//! Zip archive reading and writing
//!
//! Everything here is blocking and runs on a blocking worker. Archive
//! layout:
//!
//! ```text
//! metadata.json
//! data/<collection>/<id>.json
//! config/<name>.json
//! schemas/core/<type>.json
//! ```

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::metadata::{BackupMetadata, Subtree, METADATA_ENTRY};
use crate::error::{EngineError, EngineResult};
use crate::persistence::{to_slash_path, walk_files, TEMP_SUFFIX};

/// A source directory to capture under its subtree prefix
pub struct Source {
    pub subtree: Subtree,
    pub dir: PathBuf,
}

/// Structural facts about an archive
pub struct Inspection {
    pub entries: usize,
    pub metadata: Result<BackupMetadata, String>,
}

/// Write an archive to `dest`
///
/// The archive is built in a hidden temp file next to `dest` and renamed
/// into place, so a partially written archive is never visible under its
/// final name. Sources whose directory is missing are recorded as excluded
/// in the metadata. Returns the number of file entries written (metadata
/// included).
pub fn write_archive(
    dest: &Path,
    sources: &[Source],
    mut metadata: BackupMetadata,
    compression_level: Option<i64>,
) -> EngineResult<usize> {
    let temp = dest.with_file_name(format!(
        ".{}{}",
        dest.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        TEMP_SUFFIX
    ));

    let result = build(&temp, sources, &mut metadata, compression_level)
        .and_then(|count| fs::rename(&temp, dest).map(|_| count).map_err(|e| EngineError::io(dest, e)));

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Level 0 stores entries uncompressed; zip rejects it for deflate
fn file_options(compression_level: Option<i64>) -> SimpleFileOptions {
    match compression_level {
        Some(0) => SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        level => SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(level),
    }
}

fn build(
    temp: &Path,
    sources: &[Source],
    metadata: &mut BackupMetadata,
    compression_level: Option<i64>,
) -> EngineResult<usize> {
    let file = File::create(temp).map_err(|e| EngineError::io(temp, e))?;
    let mut zip = ZipWriter::new(file);
    let options = file_options(compression_level);
    let write_err = |e: ZipError| EngineError::io(temp, io::Error::new(io::ErrorKind::Other, e));

    let mut count = 0;
    for source in sources {
        if !source.dir.is_dir() {
            metadata.includes.set(source.subtree, false);
            continue;
        }
        metadata.includes.set(source.subtree, true);

        let files = walk_files(&source.dir).map_err(|e| EngineError::io(&source.dir, e))?;
        for relative in files {
            if is_temp_file(&relative) {
                continue;
            }
            let full = source.dir.join(&relative);
            let bytes = fs::read(&full).map_err(|e| EngineError::io(&full, e))?;
            let entry = format!("{}/{}", source.subtree.prefix(), to_slash_path(&relative));
            zip.start_file(entry, options).map_err(write_err)?;
            zip.write_all(&bytes).map_err(|e| EngineError::io(temp, e))?;
            count += 1;
        }
    }

    let record = serde_json::to_vec_pretty(metadata)?;
    zip.start_file(METADATA_ENTRY, options).map_err(write_err)?;
    zip.write_all(&record).map_err(|e| EngineError::io(temp, e))?;
    count += 1;

    let file = zip.finish().map_err(write_err)?;
    file.sync_all().map_err(|e| EngineError::io(temp, e))?;
    Ok(count)
}

fn is_temp_file(relative: &Path) -> bool {
    relative
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(TEMP_SUFFIX))
}

fn open(path: &Path, name: &str) -> EngineResult<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    ZipArchive::new(file).map_err(|e| malformed(name, e))
}

fn malformed(name: &str, details: impl ToString) -> EngineError {
    EngineError::MalformedArchive {
        name: name.to_string(),
        details: details.to_string(),
    }
}

/// Read and parse the embedded metadata record
pub fn read_metadata(path: &Path, name: &str) -> EngineResult<BackupMetadata> {
    let mut archive = open(path, name)?;
    metadata_from(&mut archive).map_err(|details| malformed(name, details))
}

fn metadata_from(archive: &mut ZipArchive<File>) -> Result<BackupMetadata, String> {
    let mut entry = archive
        .by_name(METADATA_ENTRY)
        .map_err(|_| format!("missing {METADATA_ENTRY}"))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| format!("unreadable {METADATA_ENTRY}: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid {METADATA_ENTRY}: {e}"))
}

/// Open an archive and report its entry count and metadata
///
/// Fails only when the file is not a readable zip archive.
pub fn inspect(path: &Path, name: &str) -> EngineResult<Inspection> {
    let mut archive = open(path, name)?;
    Ok(Inspection {
        entries: archive.len(),
        metadata: metadata_from(&mut archive),
    })
}

/// Replace `dest` with the contents of one archive subtree
///
/// Entries whose path would land outside `dest` are rejected before
/// anything on disk is touched. Returns the number of files extracted.
pub fn restore_subtree(path: &Path, name: &str, subtree: Subtree, dest: &Path) -> EngineResult<usize> {
    let mut archive = open(path, name)?;
    let prefix = format!("{}/", subtree.prefix());

    let mut planned = Vec::new();
    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(|e| malformed(name, e))?;
        let Some(rest) = entry.name().strip_prefix(&prefix) else {
            continue;
        };
        if entry.is_dir() || rest.is_empty() {
            continue;
        }
        let relative = safe_relative(rest)
            .ok_or_else(|| malformed(name, format!("entry '{}' escapes its directory", entry.name())))?;
        planned.push((index, relative));
    }

    if dest.exists() {
        fs::remove_dir_all(dest).map_err(|e| EngineError::io(dest, e))?;
    }
    fs::create_dir_all(dest).map_err(|e| EngineError::io(dest, e))?;

    for (index, relative) in &planned {
        let mut entry = archive.by_index(*index).map_err(|e| malformed(name, e))?;
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| EngineError::io(&target, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| EngineError::io(&target, e))?;
    }

    Ok(planned.len())
}

/// Relative path made only of normal components
fn safe_relative(raw: &str) -> Option<PathBuf> {
    let path = Path::new(raw);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() || raw.contains('\\') {
        None
    } else {
        Some(clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::metadata::BackupKind;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_safe_relative() {
        assert_eq!(
            safe_relative("posts/p1.json"),
            Some(PathBuf::from("posts").join("p1.json"))
        );
        assert!(safe_relative("../etc/passwd").is_none());
        assert!(safe_relative("/abs/path").is_none());
        assert!(safe_relative("a/../../b").is_none());
        assert!(safe_relative("a\\..\\b").is_none());
    }

    #[test]
    fn test_level_zero_stores_uncompressed() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        fs::create_dir_all(data.join("posts")).unwrap();
        fs::write(data.join("posts").join("p1.json"), r#"{"id":"p1"}"#).unwrap();

        let dest = temp_dir.path().join("backup.zip");
        let sources = vec![Source {
            subtree: Subtree::Data,
            dir: data,
        }];
        let meta = BackupMetadata::new(BackupKind::Manual, Utc::now(), 90);
        assert_eq!(write_archive(&dest, &sources, meta, Some(0)).unwrap(), 2);

        let mut zip = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let entry = zip.by_name("data/posts/p1.json").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn test_write_then_restore_subtree() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        fs::create_dir_all(data.join("posts")).unwrap();
        fs::write(data.join("posts").join("p1.json"), r#"{"id":"p1"}"#).unwrap();
        fs::write(data.join("posts").join(".p2.json.ab12cd34.tmp"), "{").unwrap();

        let dest = temp_dir.path().join("backup.zip");
        let sources = vec![
            Source {
                subtree: Subtree::Data,
                dir: data.clone(),
            },
            Source {
                subtree: Subtree::Config,
                dir: temp_dir.path().join("missing"),
            },
        ];
        let meta = BackupMetadata::new(BackupKind::Manual, Utc::now(), 90);
        let count = write_archive(&dest, &sources, meta, Some(9)).unwrap();
        assert_eq!(count, 2);

        let inspection = inspect(&dest, "backup.zip").unwrap();
        assert_eq!(inspection.entries, 2);
        let meta = inspection.metadata.unwrap();
        assert_eq!(meta.includes.data, Some(true));
        assert_eq!(meta.includes.config, Some(false));

        fs::write(data.join("posts").join("stray.json"), "{}").unwrap();
        let restored = restore_subtree(&dest, "backup.zip", Subtree::Data, &data).unwrap();
        assert_eq!(restored, 1);
        assert!(data.join("posts").join("p1.json").exists());
        assert!(!data.join("posts").join("stray.json").exists());
    }

    #[test]
    fn test_read_metadata_missing_entry() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bare.zip");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("data/x.json", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"{}").unwrap();
        zip.finish().unwrap();

        let err = read_metadata(&path, "bare.zip").unwrap_err();
        assert!(matches!(err, EngineError::MalformedArchive { .. }));
        assert!(inspect(&path, "bare.zip").unwrap().metadata.is_err());
    }

    #[test]
    fn test_not_a_zip_is_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("junk.zip");
        fs::write(&path, b"definitely not a zip").unwrap();

        assert!(matches!(
            inspect(&path, "junk.zip"),
            Err(EngineError::MalformedArchive { .. })
        ));
    }

    #[test]
    fn test_escaping_entry_rejected_before_clearing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("evil.zip");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("data/../../outside.json", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"{}").unwrap();
        zip.finish().unwrap();

        let dest = temp_dir.path().join("data");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.json"), "{}").unwrap();

        let err = restore_subtree(&path, "evil.zip", Subtree::Data, &dest).unwrap_err();
        assert!(matches!(err, EngineError::MalformedArchive { .. }));
        assert!(dest.join("keep.json").exists());
    }
}
