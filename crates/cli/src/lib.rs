//! Building blocks of the `sift` binary: configuration, index lifecycle and the HTTP API.

pub mod app;
pub mod config;
pub mod http_api;

pub use config::{SiftConfig, CONFIG_ENV, EMBEDDING_MODE_ENV};
