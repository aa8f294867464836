//! hwc-logstream library crate.
//!
//! Tails every log stream of a Huawei Cloud LTS project, emitting entries as
//! JSON lines and checkpointing read positions in stream tags.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod output;
pub mod position;
pub mod provider;
pub mod stream;

pub use error::{Error, Result};
