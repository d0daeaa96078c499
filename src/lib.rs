#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod alloc;
pub mod binding;
pub mod browser;
pub mod code;
pub mod error;
pub mod hook;
pub mod hooks;
pub mod memory;
pub mod patcher;
pub mod scan;
pub mod sync;
pub mod wrapper;
