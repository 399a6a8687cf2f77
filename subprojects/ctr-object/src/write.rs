//! Builders for 3DS container sections.
//!
//! Builders follow the usual pattern:
//!
//! 1. Create a builder from its inputs (`RomFsBuilder::from_directory`)
//! 2. Configure it with chainable setter methods
//! 3. Call `.build()` to generate the final byte buffer, or `.build_into()`
//!    to fill a buffer owned by the container being assembled
//!
//! # Example
//!
//! ```no_run
//! use ctr_object::write::{EmptyFileOffset, RomFsBuilder};
//!
//! let romfs = RomFsBuilder::from_directory("romfs")
//!     .expect("failed to import romfs")
//!     .empty_file_offset(EmptyFileOffset::Zero)
//!     .build()
//!     .expect("failed to build romfs");
//! ```

pub mod romfs;

pub use romfs::{EmptyFileOffset, RomFsBuilder, RomFsImage};
