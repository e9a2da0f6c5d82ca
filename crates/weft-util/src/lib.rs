#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for weft.
//!
//! Pure helpers with no logging/tracing dependencies. The core crate owns
//! the build events; this crate only touches bytes and directories.

pub mod fs;
pub mod hash;
