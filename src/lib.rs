//! # mvccsst
//!
//! A read-only iterator over immutable **sorted-string tables** whose keys
//! are multi-version (MVCC) keys. Tables are produced by an external writer;
//! this crate only reads them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mvccsst::{MvccKey, SstIterator, Timestamp};
//!
//! let mut iter = SstIterator::open("/tmp/export.sst").unwrap();
//!
//! iter.seek(&MvccKey::meta(b"a".to_vec()));
//! while iter.valid().unwrap() {
//!     let key = iter.unsafe_key();
//!     println!("{key} => {} bytes", iter.unsafe_value().len());
//!     iter.next();
//! }
//!
//! // Newest version of every user key at or after "m".
//! iter.seek(&MvccKey::new(b"m".to_vec(), Timestamp::new(i64::MAX, 0)));
//! while iter.valid().unwrap() {
//!     let owned = iter.unsafe_key().to_owned_key();
//!     println!("{owned}");
//!     iter.next_key();
//! }
//!
//! iter.close().unwrap();
//! ```
//!
//! ## Layers
//!
//! - [`mvcc`]: MVCC key model, key codec, checksummed values.
//! - [`comparator`]: [`MvccComparator`] orders user keys ascending, meta key first,
//!   then newest version first.
//! - [`sstable`]: the sorted-table engine behind the [`TableReader`] /
//!   [`TableCursor`] traits, over memory-mapped or in-memory images.
//! - [`iterator`]: [`SstIterator`] with trailer parsing, key decoding,
//!   optional value verification, `seek` / `next` / `next_key`.

pub mod comparator;
pub(crate) mod encoding;
pub mod iterator;
pub mod mvcc;
pub mod sstable;

pub use comparator::{BytewiseComparator, Comparator, MvccComparator};
pub use iterator::{IterOptions, SimpleIterator, SstIterError, SstIterator};
pub use mvcc::{MvccKey, MvccKeyRef, Timestamp};
pub use sstable::{ReadOptions, TableCursor, TableError, TableReader};
