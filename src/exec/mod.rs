//! Execution control
//!
//! The coordinator, its bounded worker pool and the cancellation token callers
//! use to abandon a request.

pub mod cancel;
pub mod coordinator;
pub mod pool;

pub use cancel::CancelToken;
pub use coordinator::Coordinator;
pub use pool::WorkerPool;
