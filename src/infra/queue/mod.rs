//! Queue backends.

pub mod fifo;
pub mod growable;
pub mod spsc;
pub mod stealing;

pub use fifo::FifoQueue;
pub use growable::GrowableQueue;
pub use spsc::SpscRing;
pub use stealing::StealingQueue;
