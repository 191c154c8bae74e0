//! Load-generation engine.
//!
//! - [`RequestScheduler`]: dispatch offsets for burst or spread runs
//! - [`WorkerPool`]: bounded concurrent execution of work items
//! - [`ResultAggregator`]: thread-safe outcome accumulation and statistics
//! - [`RunCoordinator`]: the entry point tying them together

pub mod aggregator;
pub mod coordinator;
pub mod pool;
pub mod scheduler;

pub use aggregator::ResultAggregator;
pub use coordinator::RunCoordinator;
pub use pool::WorkerPool;
pub use scheduler::RequestScheduler;
