//! Background tasks that keep derived state in step with the ledger.

pub mod mirror_worker;

pub use mirror_worker::{MirrorWorker, WorkerHandle};
