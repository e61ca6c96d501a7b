//! The dispatch queue between readiness signals and workers.

use crossbeam::channel::{self, Receiver, Sender};
use tracing::error;

use crate::dispatch::ConnectionRef;

#[derive(Debug)]
pub(crate) enum Job<C> {
    Pass(ConnectionRef<C>),
    Shutdown,
}

/// FIFO of connections waiting for a worker.
///
/// The channel itself is unbounded; the configured limit is checked by
/// [`offer`](DispatchQueue::offer) before a new connection goes in, so it is
/// a soft limit that concurrent producers may overshoot by a few entries.
/// Passes that continue work already accepted (resumes, connections that
/// yielded their worker) go in through [`push`](DispatchQueue::push) and are
/// never rejected.
#[derive(Debug)]
pub struct DispatchQueue<C> {
    sender: Sender<Job<C>>,
    receiver: Receiver<Job<C>>,
    limit: usize,
}

impl<C> DispatchQueue<C> {
    pub fn new(limit: usize) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self { sender, receiver, limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    /// Appends `conn` unless the queue already holds `limit` entries, in which
    /// case it is handed back.
    pub fn offer(&self, conn: ConnectionRef<C>) -> Result<(), ConnectionRef<C>> {
        if self.len() >= self.limit {
            return Err(conn);
        }
        self.push(Job::Pass(conn));
        Ok(())
    }

    pub(crate) fn push(&self, job: Job<C>) {
        // the queue owns a receiver, so the channel is never disconnected
        if self.sender.send(job).is_err() {
            error!("dispatch queue is disconnected");
        }
    }

    /// Blocks until a job is available.
    pub(crate) fn take(&self) -> Option<Job<C>> {
        self.receiver.recv().ok()
    }

    #[cfg(test)]
    pub(crate) fn try_take(&self) -> Option<Job<C>> {
        self.receiver.try_recv().ok()
    }
}
