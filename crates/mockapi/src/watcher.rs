use crate::error::MockError;
use crate::registrar::Registrar;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Time given to an editor to finish writing before the entry is rebuilt.
const SETTLE: Duration = Duration::from_millis(100);

/// Modification time and size of the entry module.
type Fingerprint = Option<(SystemTime, u64)>;

/// Watches the entry module and runs a rebuild cycle when it changes.
///
/// Only the entry file itself is observed. Editing a module it imports does
/// nothing until the entry is touched too.
pub struct EntryWatcher {
    task: JoinHandle<()>,
    _watcher: notify::RecommendedWatcher,
}

impl EntryWatcher {
    /// Start watching `registrar`'s entry module.
    pub fn spawn(registrar: Arc<Registrar>) -> Result<Self, MockError> {
        let entry = registrar.entry_path().to_path_buf();
        let dir = entry
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let file_name = entry.file_name().map(|n| n.to_os_string());

        // One slot is enough: a pending signal already means "rebuild".
        let (tx, rx) = mpsc::channel::<()>(1);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let touches_entry = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if touches_entry {
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            }
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("Watching: {:?}", entry);

        let initial = fingerprint(&entry);
        let task = tokio::spawn(rebuild_loop(registrar, rx, initial));

        Ok(Self {
            task,
            _watcher: watcher,
        })
    }
}

impl Drop for EntryWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Single consumer of change signals, so rebuild cycles never overlap.
async fn rebuild_loop(registrar: Arc<Registrar>, mut rx: mpsc::Receiver<()>, mut last: Fingerprint) {
    let entry: PathBuf = registrar.entry_path().to_path_buf();

    while rx.recv().await.is_some() {
        tokio::time::sleep(SETTLE).await;
        while rx.try_recv().is_ok() {}

        let current = fingerprint(&entry);
        if current.is_none() || current == last {
            debug!("Ignoring event for unchanged {:?}", entry);
            continue;
        }
        last = current;

        info!("File changed: {:?} (rebuilding mock handlers)", entry);
        // Failures were already reported by the registrar.
        let _ = registrar.rebuild().await;
    }
}

fn fingerprint(path: &Path) -> Fingerprint {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}
