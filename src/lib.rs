//! A small, embeddable, single-file key-value storage engine.
//!
//! `slotdb` maps fixed-width binary keys to variable-length binary values and
//! keeps all state in exactly one random-access file. It was originally built
//! to persist sparse voxel chunks indexed by a 3-component integer
//! coordinate; the engine itself only ever sees byte runs, so it is equally
//! at home storing anything else with a fixed-width key.
//!
//! The crate is organised bottom-up:
//! - [`layout`] is the on-disk record layout and positioned I/O.
//! - [`slot`] and [`catalogue`] are the in-memory view rebuilt on open.
//! - [`database`] is the allocator, the concurrency wrapper, and the public
//!   byte-oriented API ([`Database`]).
//! - [`typed`] is a convenience layer for callers who want to work in terms
//!   of their own key/value types ([`TypedDatabase`]).
//!
//! There is no crash consistency story here (no journal, no fsync
//! discipline), no multi-process support, and no compression. See the
//! design notes in the repository root for the reasoning behind the choices
//! that were made instead.

pub mod catalogue;
pub mod database;
pub mod display;
pub mod error;
pub mod layout;
pub mod slot;
#[cfg(test)]
mod test_util;
pub mod typed;

/// Default key width in bytes: three packed 32-bit integers, matching the
/// historical voxel-chunk coordinate this engine was built to index.
pub const DEFAULT_KEY_BYTES: usize = 12;

pub use database::{Database, DatabaseInfo, DatabaseOptions};
pub use error::{Error, Result};
pub use typed::{Pod, ToKeyBytes, TypedDatabase, ValueCodec};
