//! Reachability-driven relocation of JVM classes.
//!
//! A [`relocator::Relocator`] loads root, embeddable and reference-only classes,
//! keeps what the roots can reach, and rewrites class names under new prefixes
//! through a staged plugin pipeline.

#[macro_use]
mod error;

pub use error::{Error, Result};

pub mod classpath;
pub mod config;
pub mod diagnostic;
pub mod ir;
mod opcodes;
pub mod plugin;
pub mod reachability;
pub mod reader;
pub mod reference;
pub mod relocation;
pub mod relocator;
pub mod scan;
pub mod types;
