//! Worker process: HTTP and WebSocket serving, live ingest and playback.

pub mod http;
pub mod launcher;
pub mod runtime;
pub mod server;
pub mod store;
pub mod uploads;
pub mod worker;

pub use launcher::InProcessLauncher;
pub use runtime::{AppState, WorkerRuntime};
pub use server::HttpServer;
pub use worker::{run_worker, WorkerNode};
