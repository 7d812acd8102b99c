//! File-backed producer that replays newline-delimited JSON raw events.
//!
//! Each line is one [`RawEvent`]. Blank lines are skipped and malformed
//! lines are logged and skipped. Lines are emitted from a background thread
//! in file order.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, warn};

use super::events::RawEvent;
use super::producer::{EventProducer, EventSink};
use crate::config::RecordOptions;
use crate::error::{Result, SdkError};

/// Shared view of a replay's progress.
#[derive(Clone, Debug, Default)]
pub struct ReplayProgress {
    emitted: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
}

impl ReplayProgress {
    /// Events read from the file so far (admitted or not).
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Acquire)
    }

    /// Whether the worker reached the end of the file or was stopped.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

pub struct ReplayProducer {
    path: PathBuf,
    stop_flag: Arc<AtomicBool>,
    progress: ReplayProgress,
    worker: Option<JoinHandle<()>>,
}

impl ReplayProducer {
    pub fn new(path: impl AsRef<Path>) -> Self {
        ReplayProducer {
            path: path.as_ref().to_path_buf(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            progress: ReplayProgress::default(),
            worker: None,
        }
    }

    pub fn progress(&self) -> ReplayProgress {
        self.progress.clone()
    }

    /// Block until the worker exits.
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Replay worker for {} panicked", self.path.display());
            }
        }
    }
}

impl EventProducer for ReplayProducer {
    fn start(&mut self, _options: &RecordOptions, sink: EventSink) -> Result<()> {
        let file = File::open(&self.path).map_err(|e| {
            SdkError::Capability(format!("Failed to open replay file {}: {}", self.path.display(), e))
        })?;

        self.stop_flag.store(false, Ordering::Release);
        self.progress.finished.store(false, Ordering::Release);
        let stop_flag = self.stop_flag.clone();
        let progress = self.progress.clone();
        let path = self.path.clone();

        self.worker = Some(std::thread::spawn(move || {
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                if stop_flag.load(Ordering::Acquire) {
                    break;
                }
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Replay read failed at {}:{}: {}", path.display(), line_no + 1, e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawEvent>(&line) {
                    Ok(raw) => {
                        sink.emit(raw);
                        progress.emitted.fetch_add(1, Ordering::AcqRel);
                    }
                    Err(e) => warn!("Skipping malformed event at {}:{}: {}", path.display(), line_no + 1, e),
                }
            }
            progress.finished.store(true, Ordering::Release);
            debug!("Replay of {} finished", path.display());
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        self.wait();
    }
}
