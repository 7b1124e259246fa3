//! kvcore: the two in-memory building blocks of a key-value store, a
//! chained hash table that grows without long pauses and a compact list
//! encoding that packs small values into one buffer.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep every operation's cost bounded and every byte accounted
//!   for, with the layout of persisted buffers fixed bit for bit.
//! - Layers:
//!   - Allocator / Block: size-tracked allocation. Every byte goes through
//!     a `UsageRecorder`; allocation failure goes to one global hook.
//!   - Dict<T: DictType>: two slot arrays over an entry arena. Growth
//!     allocates the second array and migrates a few buckets per mutating
//!     call. `DictType` supplies hashing, comparison and the dup/destroy
//!     hooks for one key/value domain.
//!   - ZipList: one contiguous buffer of length-prefixed entries with
//!     predecessor lengths for backward traversal. Small integers are
//!     stored in binary, strings verbatim.
//!
//! Constraints
//! - Single-threaded: `Dict` is `!Send`/`!Sync`; `&mut self` serializes
//!   mutation. Only the usage counter is shared across threads.
//! - Unique keys; duplicate inserts fail with `DictError::DuplicateKey`.
//! - Lookups during a rehash search both slot arrays.
//! - No rehash step runs while an iterator is alive. Iterators borrow the
//!   table, so the borrow checker rules out any mutating call under them;
//!   `live_iterators` only reports the count.
//! - Every decode of a list header or entry is bounds-checked and fails
//!   with `DecodeError`; nothing reads past the buffer.
//!
//! Reentrancy policy
//! - `Dict` calls user code (the `DictType` hooks) while its arrays may be
//!   half-migrated. Every public entry point holds a debug-only guard, so a
//!   hook that calls back into the same table panics in debug builds.
//!
//! Layout invariants of the list
//! - Predecessor-length fields are always minimal width. Edits that change
//!   an entry's size propagate forward until a field keeps its width, in
//!   either direction. The buffer is thus a function of its contents.
//! - The stored entry count saturates at 65535; `ZipList::len` walks the
//!   list from then on.
//!
//! Notes and non-goals
//! - No logger is installed; events go through the `log` facade.
//! - Iteration order is bucket order and unspecified.

mod alloc;
mod config;
mod dict;
mod dict_iter;
mod dict_proptest;
mod dict_type;
mod error;
mod reentrancy;
pub mod zip_encoding;
mod ziplist;
mod ziplist_proptest;

// Public surface
pub use alloc::{set_oom_handler, Allocator, Block, UsageRecorder, UsedMemory};
pub use config::{DictConfig, ResizePolicy};
pub use dict::{Dict, DictEntry, DictStats, Expand, TableStats};
pub use dict_iter::Iter;
pub use dict_type::{DictType, DictValue, HashDictType};
pub use error::{DecodeError, DictError};
pub use zip_encoding::{Encoding, Entry};
pub use ziplist::{End, Position, Values, ZipList, ZipValue};
