//! Raw binary structure definitions for 3DS container formats.
//!
//! This module contains zero-copy struct definitions using the `zerocopy` crate.
//! All structures are defined with `#[repr(C)]` and match the on-disk layout byte for byte.

pub mod ivfc;
pub mod romfs;
