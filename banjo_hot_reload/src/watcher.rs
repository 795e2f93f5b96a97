//! Directory change watching
//!
//! A polling watcher on its own thread: scans the directory tree,
//! compares modification times, and publishes changed files over a
//! channel. A second change to the same file within the debounce interval
//! is dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

const MIN_TIME_BETWEEN_CHANGES: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct FileWatcher {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn start(path: PathBuf, events: Sender<PathBuf>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let thread = std::thread::spawn(move || {
            run(&path, events, thread_running);
        });

        Self {
            running,
            thread: Some(thread),
        }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn run(path: &Path, events: Sender<PathBuf>, running: Arc<AtomicBool>) {
    log::info!("watching directory '{}'", path.display());

    let mut mtimes: HashMap<PathBuf, SystemTime> = HashMap::new();
    let mut last_events: HashMap<PathBuf, Instant> = HashMap::new();

    // Prime the modification times so pre-existing files do not fire.
    scan(path, &mut |file, mtime| {
        mtimes.insert(file.to_path_buf(), mtime);
    });

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(POLL_INTERVAL);

        let mut changed = Vec::new();
        scan(path, &mut |file, mtime| {
            let previous = mtimes.insert(file.to_path_buf(), mtime);
            if previous != Some(mtime) && previous.is_some() {
                changed.push(file.to_path_buf());
            } else if previous.is_none() {
                changed.push(file.to_path_buf());
            }
        });

        for file in changed {
            let now = Instant::now();
            if let Some(last) = last_events.get(&file) {
                if now.duration_since(*last) < MIN_TIME_BETWEEN_CHANGES {
                    continue;
                }
            }
            last_events.insert(file.clone(), now);

            log::info!("file '{}' has changed", file.display());
            if events.send(file).is_err() {
                return;
            }
        }
    }
}

fn scan(path: &Path, visit: &mut impl FnMut(&Path, SystemTime)) {
    let Ok(entries) = std::fs::read_dir(path) else {
        return;
    };

    for entry in entries.flatten() {
        let entry_path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };

        if metadata.is_dir() {
            scan(&entry_path, visit);
        } else if let Ok(mtime) = metadata.modified() {
            visit(&entry_path, mtime);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_detects_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mod.bnj");
        std::fs::write(&file, "a").unwrap();

        let (sender, receiver) = mpsc::channel();
        let watcher = FileWatcher::start(dir.path().to_path_buf(), sender);

        // Let the watcher prime itself and the mtime clock tick before
        // mutating the file.
        std::thread::sleep(Duration::from_millis(1100));
        std::fs::write(&file, "b").unwrap();

        let event = receiver.recv_timeout(Duration::from_secs(5));
        watcher.stop();

        assert_eq!(event.unwrap(), file);
    }
}
