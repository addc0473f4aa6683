// gencache - probation-aware response cache for LLM generation calls
// Author: kelexine (https://github.com/kelexine)

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod server;
pub mod upstream;
pub mod utils;
