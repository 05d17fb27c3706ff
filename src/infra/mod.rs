//! Infrastructure: concrete queue implementations.

pub mod queue;
