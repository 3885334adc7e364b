//! Config file watcher
//!
//! Watches the directory holding the config file (editors usually replace
//! the file rather than write it in place) and sends a unit message on a
//! tokio channel whenever the config file itself is created or modified.
//! The receiver decides what a reload means.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::config::ConfigError;

/// Live watch on one config file. Dropping it stops the watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Start watching `path`
    ///
    /// The parent directory is created if missing.
    pub fn start(path: &Path) -> Result<(Self, mpsc::UnboundedReceiver<()>), ConfigError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| ConfigError::ValidationError(format!("Not a file path: {}", path.display())))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(ConfigError::IoError)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_config_change(&event, &file_name) {
                    tracing::debug!(kind = ?event.kind, "Config file changed");
                    let _ = tx.send(());
                }
            }
            Err(e) => tracing::warn!(error = %e, "Config watcher error"),
        })
        .map_err(ConfigError::WatchError)?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(ConfigError::WatchError)?;

        tracing::info!(path = %path.display(), "Watching config file");
        Ok((
            Self {
                _watcher: watcher,
                path: path.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Whether `event` touches the config file in a way that warrants a reload
fn is_config_change(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    fn name() -> OsString {
        OsString::from("config.json")
    }

    #[test]
    fn test_modify_of_config_file_triggers() {
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/home/u/.config/hidhostd/config.json"));
        assert!(is_config_change(&event, &name()));

        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/home/u/.config/hidhostd/config.json"));
        assert!(is_config_change(&created, &name()));
    }

    #[test]
    fn test_other_files_and_kinds_ignored() {
        let sibling = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/home/u/.config/hidhostd/config.json.swp"));
        assert!(!is_config_change(&sibling, &name()));

        let access = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/home/u/.config/hidhostd/config.json"));
        assert!(!is_config_change(&access, &name()));
    }

    #[tokio::test]
    async fn test_start_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let (watcher, _rx) = ConfigWatcher::start(&path).unwrap();
        assert!(dir.path().join("nested").is_dir());
        assert_eq!(watcher.path(), path.as_path());
    }
}
