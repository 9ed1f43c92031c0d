//! Key comparators installed into the table reader.
//!
//! A [`Comparator`] defines the total order a table was sorted with. The
//! table engine uses it for every search step, and checks its [`name`]
//! against the name recorded in the table when it is opened.
//!
//! [`name`]: Comparator::name


use std::cmp::Ordering;

use crate::mvcc::split_key;

/// Total order over raw keys.
pub trait Comparator: Send + Sync {
    /// Compares two raw keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Identifier recorded in a table at write time.
    fn name(&self) -> &'static str;

    /// Appends to `dst` a short key `k` with `a <= k < b`.
    ///
    /// Only table builders shorten index keys; readers never call this.
    fn separator(&self, dst: &mut Vec<u8>, a: &[u8], b: &[u8]);
}

// ------------------------------------------------------------------------------------------------
// Bytewise
// ------------------------------------------------------------------------------------------------

/// Lexicographic byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &'static str {
        "leveldb.BytewiseComparator"
    }

    fn separator(&self, dst: &mut Vec<u8>, a: &[u8], _b: &[u8]) {
        dst.extend_from_slice(a);
    }
}

// ------------------------------------------------------------------------------------------------
// MVCC
// ------------------------------------------------------------------------------------------------

/// Orders encoded MVCC keys by user key ascending, then newest version first.
///
/// For equal user keys a key without timestamp sorts before every
/// timestamped version, and timestamped versions compare by their raw
/// big-endian timestamp bytes in reverse.
///
/// Keys that cannot be split fall back to plain byte order. The search
/// structure of a table needs a total order even over corrupt keys, so this
/// comparator never reports an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct MvccComparator;

impl MvccComparator {
    /// Name recorded in tables sorted by this comparator.
    pub const NAME: &'static str = "cockroach_comparator";
}

impl Comparator for MvccComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let (Some((key_a, ts_a)), Some((key_b, ts_b))) = (split_key(a), split_key(b)) else {
            return a.cmp(b);
        };

        key_a.cmp(key_b).then_with(|| match (ts_a.is_empty(), ts_b.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => ts_b.cmp(ts_a),
        })
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn separator(&self, _dst: &mut Vec<u8>, _a: &[u8], _b: &[u8]) {
        unimplemented!("MvccComparator is read-only and cannot build separators")
    }
}
