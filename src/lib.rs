//! # songbatch
//!
//! Batch runner for an AI song-generation API.
//!
//! Takes a CSV of generation requests, fans them out over a pool of async
//! workers that submit, poll, and download the generated audio, and records
//! one results row per artifact. Exposed as an HTTP service and a CLI.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod model;
pub mod output;
pub mod queue;
pub mod server;
pub mod telemetry;
pub mod writer;
