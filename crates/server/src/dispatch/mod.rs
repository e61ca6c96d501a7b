//! Hand-off of ready connections to processing passes.
//!
//! - [`ConnectionRef`]: a shared connection plus the latch that keeps passes
//!   over it strictly sequential
//! - [`DispatchQueue`]: the backpressure point between transports and workers
//! - `Worker`: a pooled thread driving passes taken from the queue

mod queue;
mod slot;
mod worker;

pub use queue::DispatchQueue;
pub(crate) use queue::Job;
pub(crate) use slot::Completion;
pub use slot::ConnectionRef;
pub(crate) use worker::Worker;
