//! Multi-process coordination: the coordinator owns the database and routes
//! IPC, workers reach it through [`worker::WorkerLink`].

pub mod coordinator;
pub mod error;
pub mod ipc;
pub mod worker;

pub use coordinator::{Coordinator, CoordinatorHandle, CoordinatorOptions, DatabaseHandle};
pub use error::{Error, Result};
pub use worker::{DatabaseClient, WorkerEvent, WorkerLink};
