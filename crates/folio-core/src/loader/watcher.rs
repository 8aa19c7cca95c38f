use std::ffi::OsString;
use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::EngineResult;

/// A live watch on one config file
///
/// Holds the notify watcher; dropping it stops notifications and closes the
/// change channel.
pub struct FileWatch {
    _watcher: RecommendedWatcher,
}

impl FileWatch {
    /// Watch `path` for changes
    ///
    /// The parent directory is watched and events are filtered by file name,
    /// so replacing the file through a rename is seen as a change. Bursts of
    /// events collapse into a single pending notification.
    pub fn new(path: &Path) -> EngineResult<(Self, mpsc::Receiver<()>)> {
        let (tx, rx) = mpsc::channel::<()>(1);

        let file_name = path.file_name().map(OsString::from);
        let dir = path.parent().unwrap_or(Path::new("."));

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                        let touches_file = event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(OsString::from) == file_name);

                        if touches_file {
                            // Full channel means a reload is already pending
                            let _ = tx.try_send(());
                        }
                    }
                    _ => {}
                },
                Err(e) => warn!(error = %e, "config watch error"),
            }
        })?;

        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok((Self { _watcher: watcher }, rx))
    }
}
