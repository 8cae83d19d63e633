//! Serialized execution: one thread consumes the work queue, so units never overlap and the
//! engine's session needs no locking.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::core::{MessageExchange, WorkItem};

#[derive(Debug)]
enum Job {
    Run(WorkItem),
    Stop,
}

/// Submits work to the worker. Cheap to clone; one per producer.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<Job>,
}

#[derive(Debug, thiserror::Error)]
#[error("worker stopped")]
pub struct WorkerStopped(pub WorkItem);

impl WorkQueue {
    pub fn enqueue(&self, item: WorkItem) -> Result<(), WorkerStopped> {
        match self.tx.send(Job::Run(item)) {
            Err(mpsc::SendError(Job::Run(item))) => Err(WorkerStopped(item)),
            _ => Ok(()),
        }
    }
}

/// Owner of the worker thread.
pub struct WorkerHandle {
    queue: WorkQueue,
    thread: Option<JoinHandle<MessageExchange>>,
}

/// Start the worker thread. It owns `exchange` until shutdown.
pub fn spawn(exchange: MessageExchange) -> std::io::Result<WorkerHandle> {
    let (tx, rx) = mpsc::channel();
    let thread = thread::Builder::new()
        .name("pigeon-worker".into())
        .spawn(move || run(exchange, rx))?;
    Ok(WorkerHandle {
        queue: WorkQueue { tx },
        thread: Some(thread),
    })
}

fn run(mut exchange: MessageExchange, rx: mpsc::Receiver<Job>) -> MessageExchange {
    while let Ok(Job::Run(item)) = rx.recv() {
        let unit = unit_name(&item);
        debug!(unit, "work unit started");
        if let Err(e) = exchange.handle(item) {
            error!(unit, error = %e, "work unit failed");
        }
    }
    // Queues report stopped once the receiver is gone; anything that slipped in after
    // the stop is discarded here.
    let late = rx.try_iter().filter(|job| matches!(job, Job::Run(_))).count();
    drop(rx);
    if late > 0 {
        warn!(discarded = late, "work queued after shutdown discarded");
    }
    info!("worker stopped");
    exchange
}

fn unit_name(item: &WorkItem) -> &'static str {
    match item {
        WorkItem::RequestToPair(_) => "request_to_pair",
        WorkItem::PairingDecided { .. } => "pairing_decided",
        WorkItem::RetrieveMessages => "retrieve_messages",
    }
}

impl WorkerHandle {
    pub fn queue(&self) -> WorkQueue {
        self.queue.clone()
    }

    pub fn enqueue(&self, item: WorkItem) -> Result<(), WorkerStopped> {
        self.queue.enqueue(item)
    }

    /// Run everything queued so far, stop the thread and hand the engine back. Items
    /// enqueued from other queues after this call are discarded. None if the worker
    /// thread panicked.
    pub fn shutdown(mut self) -> Option<MessageExchange> {
        self.stop()
    }

    fn stop(&mut self) -> Option<MessageExchange> {
        let thread = self.thread.take()?;
        let _ = self.queue.tx.send(Job::Stop);
        thread.join().ok()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
