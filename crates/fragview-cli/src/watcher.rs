//! File watcher
//!
//! Directories (not individual files) are watched because editors save
//! via write-temp → rename/replace → delete-old; directory watching is
//! the reliable cross-platform way to catch that.
//!
//! Change notifications are posted as `AppEvent::FileChanged(index)` on
//! the shared event channel; the render thread drains and deduplicates
//! them once per loop iteration, so bursts of editor events coalesce
//! into a single reload.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::Sender;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use fragview_engine::events::{AppEvent, WatchFile};

pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    pub fn start(files: &[WatchFile], tx: Sender<AppEvent>, poll_ms: u64) -> anyhow::Result<Self> {
        // (index, parent, file name) of every watched file; notify hands
        // back whatever path the editor touched, so matching is done on
        // parent + name rather than on the exact path string.
        let targets: Vec<(usize, PathBuf, std::ffi::OsString)> = files
            .iter()
            .enumerate()
            .filter_map(|(i, f)| {
                let parent = parent_of(&f.path);
                f.path.file_name().map(|n| (i, parent, n.to_os_string()))
            })
            .collect();

        let matcher = targets.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let Ok(event) = res else { return };
                for changed in event.paths {
                    let changed_parent = parent_of(&changed);
                    let changed_name = changed.file_name();
                    for (index, parent, name) in &matcher {
                        if changed_name == Some(name.as_os_str()) && &changed_parent == parent {
                            let _ = tx.send(AppEvent::FileChanged(*index));
                        }
                    }
                }
            },
            Config::default().with_poll_interval(Duration::from_millis(poll_ms.max(50))),
        )?;

        let parents: BTreeSet<PathBuf> = targets.iter().map(|(_, p, _)| p.clone()).collect();
        for parent in &parents {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        Ok(Self { _watcher: watcher })
    }
}

fn parent_of(path: &Path) -> PathBuf {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    parent.canonicalize().unwrap_or(parent)
}
