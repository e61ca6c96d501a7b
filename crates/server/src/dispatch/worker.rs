//! Pooled worker threads.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::buffer::BufferProvider;
use crate::connection::Connection;
use crate::dispatch::{DispatchQueue, Job};
use crate::server::Processor;

/// A thread taking connections off the dispatch queue until told to stop.
///
/// Each worker owns its [`BufferProvider`] for its whole life.
#[derive(Debug)]
pub(crate) struct Worker {
    name: String,
    handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn<C: Connection>(index: usize, queue: Arc<DispatchQueue<C>>, processor: Arc<Processor<C>>) -> io::Result<Self> {
        let name = format!("worker_{index}");
        let handle = thread::Builder::new().name(name.clone()).spawn(move || run(&queue, &processor))?;
        Ok(Self { name, handle })
    }

    pub(crate) fn join(self) {
        if self.handle.join().is_err() {
            error!(worker = %self.name, "worker thread panicked");
        }
    }
}

fn run<C: Connection>(queue: &DispatchQueue<C>, processor: &Arc<Processor<C>>) {
    let mut buffers = BufferProvider::new();
    while let Some(job) = queue.take() {
        match job {
            Job::Pass(conn) => processor.run_pass(&conn, &mut buffers),
            Job::Shutdown => break,
        }
    }
    debug!("worker stopped");
}
