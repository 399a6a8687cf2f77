//! # ctr-object
//! Zero-copy layouts and builders for Nintendo 3DS title containers.
//!
//! This crate provides two layers:
//! - `raw`: Low-level binary structure definitions using `zerocopy`
//! - `write`: Builders producing finished sections (requires `std` feature)
//!
//! Supported formats:
//! - **RomFS** - Read-only filesystem embedded in NCCH/CXI/CFA containers
//! - **IVFC** - Hierarchical SHA-256 hash tree protecting the RomFS
//!
//! # References
//! - [3dbrew RomFS](https://www.3dbrew.org/wiki/RomFS)
//! - [3dbrew NCCH](https://www.3dbrew.org/wiki/NCCH)

#![cfg_attr(not(feature = "std"), no_std)]

pub mod raw;

#[cfg(feature = "std")]
pub mod write;
