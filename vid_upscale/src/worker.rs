//! Background worker: runs one job on its own thread and streams progress
//! back over a channel, so a front-end can stay responsive and cancel.

use crate::pipeline::{run_job, ProgressEvent, ProgressSink, UpscaleJob, UpscaleReport};
use shared_utils::{Result, UpscaleError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Shared cancel flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Safe to call repeatedly and from any thread.
    pub fn cancel(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            debug!("Cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn flag(&self) -> &AtomicBool {
        &self.0
    }
}

#[derive(Debug)]
pub enum WorkerMessage {
    Progress(ProgressEvent),
    Done(Result<UpscaleReport>),
}

struct ChannelSink(Sender<WorkerMessage>);

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        // receiver gone means nobody is listening; the job keeps going
        let _ = self.0.send(WorkerMessage::Progress(event));
    }
}

pub struct WorkerHandle {
    pub events: Receiver<WorkerMessage>,
    cancel: CancelToken,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Blocks until the worker finishes and returns its result, ignoring
    /// progress events still in the channel.
    pub fn wait(self) -> Result<UpscaleReport> {
        let mut outcome = None;
        for message in self.events.iter() {
            if let WorkerMessage::Done(result) = message {
                outcome = Some(result);
            }
        }
        self.thread.join().map_err(|_| UpscaleError::WorkerPanicked)?;
        outcome.unwrap_or(Err(UpscaleError::WorkerPanicked))
    }

    pub fn join(self) -> Result<()> {
        self.thread.join().map_err(|_| UpscaleError::WorkerPanicked)
    }
}

pub fn spawn_worker(job: UpscaleJob) -> Result<WorkerHandle> {
    spawn_task(CancelToken::new(), move |sink, cancel| run_job(&job, sink, cancel))
}

/// Runs `task` on a named thread. A panic inside `task` is reported as
/// `Done(Err(WorkerPanicked))` instead of tearing down the front-end.
fn spawn_task<F>(cancel: CancelToken, task: F) -> Result<WorkerHandle>
where
    F: FnOnce(&dyn ProgressSink, &AtomicBool) -> Result<UpscaleReport> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let token = cancel.clone();

    let thread = thread::Builder::new()
        .name("upscale-worker".to_string())
        .spawn(move || {
            let sink = ChannelSink(tx.clone());
            let result = panic::catch_unwind(AssertUnwindSafe(|| task(&sink, token.flag())))
                .unwrap_or_else(|_| {
                    error!("Upscale worker panicked");
                    Err(UpscaleError::WorkerPanicked)
                });
            let _ = tx.send(WorkerMessage::Done(result));
        })?;

    Ok(WorkerHandle {
        events: rx,
        cancel,
        thread,
    })
}
