//! Slot bookkeeping: active leases and the FIFO wait queue.
//!
//! Neither type locks or awaits. The pool keeps both behind one mutex so a
//! release and the hand-off to the next waiter happen in one critical section.

mod queue;
mod registry;

pub use queue::{WaitQueue, Waiter, WaiterId};
pub use registry::LeaseRegistry;
