use crate::error::MoonResult;
use crate::store::ConfigStore;
use log::{debug, error, trace, warn};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Watch the Moon file and reload the store when it changes on disk. A
/// changed snapshot is pushed to the engine.
///
/// The parent directory is watched so replacing the file by rename is seen.
/// Dropping the returned watcher stops watching.
pub fn watch_moon_file(store: Arc<ConfigStore>, path: impl AsRef<Path>) -> MoonResult<RecommendedWatcher> {
    let path = path.as_ref().to_owned();
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
        _ => PathBuf::from("."),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })
    .map_err(std::io::Error::other)?;
    watcher.watch(&dir, RecursiveMode::NonRecursive).map_err(std::io::Error::other)?;
    debug!("Watching {} for changes", path.display());

    tokio::spawn(async move {
        while let Some(res) = rx.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("Failed to receive config file event: {:?}", e);
                    continue;
                }
            };
            if !(event.kind.is_modify() || event.kind.is_create()) || !touches(&event, &path) {
                trace!("Config file event: {:?}", event);
                continue;
            }
            trace!("Config file changed: {:?}", event);
            match store.reload().await {
                Ok(true) => {
                    debug!("Moon file changed, pushing engine config");
                    if let Err(e) = store.push_engine().await {
                        error!("Failed to push reloaded config: {}", e);
                    }
                }
                Ok(false) => trace!("Moon file unchanged"),
                Err(e) => warn!("Failed to reload config: {}", e),
            }
        }
    });

    Ok(watcher)
}

fn touches(event: &Event, path: &Path) -> bool {
    event.paths.iter().any(|p| p.file_name() == path.file_name())
}
