//! Generic write-ahead log.
//!
//! A [`Wal`] owns a background writer thread fed by a bounded event
//! channel. Events are framed with a length prefix and bincode-encoded
//! into a user-space buffer; a ticker forces buffer-to-file flushes at
//! the configured interval (no fsync). [`Wal::replay`] reads a log back
//! end-to-end via the shared mmap reader, dropping a torn tail record.

use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{
    DEFAULT_WAL_EVENT_CH_SIZE, DEFAULT_WAL_TIME_INTERVAL, DEFAULT_WRITER_BUFFER_SIZE,
};
use crate::env::file_system::FileManager;
use crate::error::StrataError;
use crate::ioutils;
use crate::Result;

/// Anything that can be journaled.
pub trait Event: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Event for T where T: Serialize + DeserializeOwned + Send + 'static {}

#[derive(Debug, Clone)]
pub struct WalOpts {
    /// Path of the log file on disk.
    pub path: PathBuf,
    /// Interval between two buffer-to-file flushes.
    pub flush_interval: Duration,
    /// Event channel capacity; `append` blocks beyond it.
    pub event_ch_size: usize,
    /// User-space write buffer size.
    pub writer_buffer_size: usize,
}

impl WalOpts {
    fn normalized(mut self) -> WalOpts {
        if self.flush_interval.is_zero() {
            self.flush_interval = DEFAULT_WAL_TIME_INTERVAL;
        }
        if self.event_ch_size == 0 {
            self.event_ch_size = DEFAULT_WAL_EVENT_CH_SIZE;
        }
        if self.writer_buffer_size == 0 {
            self.writer_buffer_size = DEFAULT_WRITER_BUFFER_SIZE;
        }
        self
    }
}

pub struct Wal<E: Event> {
    events: Sender<E>,
    close_tx: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    // second handle onto the log file, for truncation
    file: File,
    opts: WalOpts,
}

impl<E: Event> Wal<E> {
    pub fn new(opts: WalOpts) -> Result<Wal<E>> {
        let opts = opts.normalized();
        let writer = FileManager::global().open_for_append(&opts.path)?;
        let file = writer.try_clone_file()?;
        let buffered = BufWriter::with_capacity(opts.writer_buffer_size, writer.into_file());

        let (events, event_rx) = bounded(opts.event_ch_size);
        let (close_tx, close_rx) = bounded(1);
        let flush_interval = opts.flush_interval;
        let worker = thread::Builder::new()
            .name("wal-writer".to_owned())
            .spawn(move || run(event_rx, close_rx, buffered, flush_interval))?;

        Ok(Wal {
            events,
            close_tx,
            worker: Mutex::new(Some(worker)),
            file,
            opts,
        })
    }

    /// Queues an event for the background writer. Delivery order equals
    /// append order; a full channel blocks the caller.
    pub fn append(&self, event: E) {
        if self.events.send(event).is_err() {
            warn!("wal {:?}: append after close", self.opts.path);
        }
    }

    /// Signals shutdown, drains the queued events, final-flushes and
    /// joins the writer thread. Idempotent.
    pub fn close(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(handle) = worker {
            let _ = self.close_tx.send(());
            if handle.join().is_err() {
                error!("wal {:?}: writer thread panicked", self.opts.path);
            }
            // the file grew since any startup-time replay mapped it
            FileManager::global().evict(&self.opts.path);
        }
    }

    /// Resets the log file to length 0.
    pub fn truncate(&self) -> Result<()> {
        self.file.set_len(0)?;
        Ok(())
    }

    /// Closes the log and removes its file.
    pub fn delete(&self) -> Result<()> {
        self.close();
        FileManager::global().delete(&self.opts.path)
    }

    pub fn path(&self) -> &Path {
        &self.opts.path
    }

    /// Reads the log at `path` end-to-end and decodes every whole record.
    /// A decode failure on the trailing record is treated as a torn tail
    /// and ignored.
    pub fn replay(path: &Path) -> Result<Vec<E>> {
        let manager = FileManager::global();
        if !manager.exists(path) {
            return Err(StrataError::FileNotFound(path.to_path_buf()));
        }
        let reader = manager.open_for_read(path)?;
        let mut events = Vec::new();
        for frame in ioutils::frames(reader.payload()) {
            match bincode::deserialize(frame) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("wal {:?}: dropping torn tail record: {}", path, e);
                    break;
                }
            }
        }
        Ok(events)
    }
}

impl<E: Event> Drop for Wal<E> {
    fn drop(&mut self) {
        self.close();
    }
}

fn run<E: Event>(
    events: Receiver<E>,
    close: Receiver<()>,
    mut writer: BufWriter<File>,
    flush_interval: Duration,
) {
    let ticker = tick(flush_interval);
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => write_event(&mut writer, &event),
                Err(_) => break,
            },
            recv(ticker) -> _ => {
                if let Err(e) = writer.flush() {
                    error!("wal flush failed: {}", e);
                }
            },
            recv(close) -> _ => break,
        }
    }
    // drain whatever is still queued, then final-flush
    while let Ok(event) = events.try_recv() {
        write_event(&mut writer, &event);
    }
    if let Err(e) = writer.flush() {
        error!("wal final flush failed: {}", e);
    }
}

fn write_event<E: Event>(writer: &mut BufWriter<File>, event: &E) {
    match bincode::serialize(event) {
        Ok(record) => {
            if let Err(e) = ioutils::write_frame(writer, &record) {
                error!("wal write failed: {}", e);
            }
        }
        Err(e) => error!("wal encode failed: {}", e),
    }
}
