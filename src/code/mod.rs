//! # Code
//!
//! Machine code helpers

pub mod x86;
