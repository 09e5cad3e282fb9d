//! Background consumers of the in-process bus.

pub mod projection_worker;

pub use projection_worker::{ProjectionWorker, WorkerHandle};
