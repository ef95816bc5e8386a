//! Background-task plumbing: a named worker thread paired with a shutdown
//! channel. Dropping or stopping the handle signals the task and joins it.

use std::io;
use std::thread;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use log::warn;

pub(crate) struct TaskHandle {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawns `f` on a named thread. `f` receives a shutdown channel that
    /// disconnects once the handle is stopped.
    pub fn spawn<F>(name: &str, f: F) -> io::Result<TaskHandle>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded(0);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || f(shutdown_rx))?;
        Ok(TaskHandle {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Signals shutdown and waits for the task to finish.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("background task panicked during shutdown");
            }
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.stop_inner();
    }
}
