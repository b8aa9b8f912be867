#![doc = include_str!("../README.md")]
//!

//! The public API re-exports `vislog-core`.

pub use vislog_core::*;
