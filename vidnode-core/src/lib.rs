pub mod bandwidth;
pub mod chat;
pub mod config;
pub mod error;
pub mod hls;
pub mod jwt;
pub mod logging;
pub mod models;
pub mod repository;
pub mod verification;

pub use config::Config;
pub use error::{Error, Result};
