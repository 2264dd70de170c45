//! Dedicated writer thread with a crossbeam-channel bounded(1024) queue.
//!
//! All durable writes for one engine go through this thread, which preserves
//! append ordering per file. Individual write failures are logged and
//! counted, never propagated: the engine's in-memory state stays
//! authoritative and the next batch rewrites the world document.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::warn;

use patchlings_core::errors::StorageError;
use patchlings_core::models::chapter::ChapterSummary;
use patchlings_core::models::salts::SaltsFile;
use patchlings_core::models::world::WorldState;
use patchlings_core::traits::StoryStore;

const CHANNEL_BOUND: usize = 1024;

/// A durable write scheduled by the engine.
pub enum WriteCommand {
    WriteWorld(Box<WorldState>),
    AppendChapter(Box<ChapterSummary>),
    AppendRecording { file_name: String, line: String },
    WriteSalts(Box<SaltsFile>),
    /// Block the sender until everything queued before this has settled.
    FlushSync(std::sync::mpsc::SyncSender<()>),
    Shutdown,
}

/// Statistics from the writer thread, returned at shutdown.
#[derive(Debug, Default, Clone)]
pub struct WriteStats {
    pub worlds_written: usize,
    pub chapters_appended: usize,
    pub recording_lines: usize,
    pub salts_written: usize,
    pub failures: usize,
}

/// Owns the writer thread. One per engine instance.
pub struct StoryWriter {
    tx: Sender<WriteCommand>,
    handle: Option<JoinHandle<WriteStats>>,
}

impl StoryWriter {
    /// Spawn the writer thread over a shared store handle.
    pub fn new(store: Arc<dyn StoryStore>) -> Self {
        let (tx, rx) = bounded(CHANNEL_BOUND);
        let handle = thread::Builder::new()
            .name("patchlings-story-writer".to_string())
            .spawn(move || writer_loop(store, rx))
            .expect("failed to spawn story writer thread");
        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Schedule a write (fire-and-forget).
    pub fn send(&self, cmd: WriteCommand) -> Result<(), StorageError> {
        self.tx
            .send(cmd)
            .map_err(|_| StorageError::WriterDisconnected)
    }

    /// Block until every write queued so far has settled. Failures inside
    /// the writer do not surface here; they are counted in [`WriteStats`].
    pub fn flush_sync(&self) -> Result<(), StorageError> {
        let (done_tx, done_rx) = std::sync::mpsc::sync_channel(0);
        self.send(WriteCommand::FlushSync(done_tx))?;
        done_rx.recv().map_err(|_| StorageError::WriterDisconnected)
    }

    /// Shut down the writer thread and wait for completion.
    pub fn shutdown(mut self) -> WriteStats {
        let _ = self.tx.send(WriteCommand::Shutdown);
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => WriteStats::default(),
        }
    }
}

impl Drop for StoryWriter {
    fn drop(&mut self) {
        // Signal shutdown if not already done.
        let _ = self.tx.send(WriteCommand::Shutdown);
    }
}

fn writer_loop(store: Arc<dyn StoryStore>, rx: Receiver<WriteCommand>) -> WriteStats {
    let mut stats = WriteStats::default();
    for cmd in rx.iter() {
        match cmd {
            WriteCommand::WriteWorld(world) => {
                if apply(&mut stats, "world", store.write_world(&world)) {
                    stats.worlds_written += 1;
                }
            }
            WriteCommand::AppendChapter(chapter) => {
                if apply(&mut stats, "chapter", store.append_chapter(&chapter)) {
                    stats.chapters_appended += 1;
                }
            }
            WriteCommand::AppendRecording { file_name, line } => {
                if apply(
                    &mut stats,
                    "recording",
                    store.append_recording(&file_name, &line),
                ) {
                    stats.recording_lines += 1;
                }
            }
            WriteCommand::WriteSalts(salts) => {
                if apply(&mut stats, "salts", store.write_salts(&salts)) {
                    stats.salts_written += 1;
                }
            }
            WriteCommand::FlushSync(done) => {
                // Everything before this command has already been applied.
                let _ = done.send(());
            }
            WriteCommand::Shutdown => break,
        }
    }
    stats
}

fn apply(stats: &mut WriteStats, artifact: &'static str, result: Result<(), StorageError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            stats.failures += 1;
            warn!(artifact, error = %e, "story write failed");
            false
        }
    }
}
