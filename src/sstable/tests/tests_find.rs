//! Positioning with the MVCC comparator.
//!
//! Tables here are sorted the way an MVCC writer sorts them: user key
//! ascending, newest version first, meta key before all versions. `find`
//! must land on the first entry not less than the target under that order,
//! including when the answer starts a later block.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::comparator::{Comparator, MvccComparator};
    use crate::mvcc::{MvccKey, Timestamp, decode_key, encode_key};
    use crate::sstable::builder::TableBuilder;
    use crate::sstable::internal_key::{make_internal_key, user_portion};
    use crate::sstable::{
        ReadOptions, SSTable, TableOptions, TableReader, TableSource, ValueType,
    };

    fn key(user: &[u8], wall: i64) -> MvccKey {
        MvccKey::new(user.to_vec(), Timestamp::new(wall, 0))
    }

    fn mvcc_table(keys: &[MvccKey], block_size: usize) -> SSTable {
        let cmp = MvccComparator;
        let mut encoded: Vec<Vec<u8>> = keys.iter().map(encode_key).collect();
        encoded.sort_by(|a, b| cmp.compare(a, b));
        let mut builder = TableBuilder::new(&cmp).block_size(block_size);
        for (seq, enc) in encoded.iter().enumerate() {
            builder.add(&make_internal_key(enc, seq as u64, ValueType::Value as u8), b"");
        }
        let image = builder.finish().unwrap();
        SSTable::from_source(
            "mvcc.sst".into(),
            TableSource::Memory(Arc::from(image)),
            TableOptions {
                comparator: Arc::new(MvccComparator),
            },
        )
        .unwrap()
    }

    fn first_at(sst: &SSTable, target: &MvccKey) -> Option<MvccKey> {
        let mut cursor = sst.find(&encode_key(target), &ReadOptions::default());
        if !cursor.next() {
            return None;
        }
        let (user, ts) = decode_key(user_portion(cursor.key())).unwrap();
        Some(MvccKey::new(user.to_vec(), ts))
    }

    fn fixture(block_size: usize) -> SSTable {
        mvcc_table(
            &[
                MvccKey::meta(b"a".to_vec()),
                key(b"a", 30),
                key(b"a", 20),
                key(b"a", 10),
                key(b"b", 10),
                key(b"d", 50),
                key(b"d", 5),
            ],
            block_size,
        )
    }

    #[test]
    fn find_exact_version() {
        for block_size in [1, 64, 4096] {
            let sst = fixture(block_size);
            assert_eq!(first_at(&sst, &key(b"a", 20)), Some(key(b"a", 20)));
            assert_eq!(first_at(&sst, &key(b"d", 5)), Some(key(b"d", 5)));
        }
    }

    #[test]
    fn find_between_versions_lands_on_older() {
        for block_size in [1, 64, 4096] {
            let sst = fixture(block_size);
            // 25 is newer than 20 and older than 30.
            assert_eq!(first_at(&sst, &key(b"a", 25)), Some(key(b"a", 20)));
            // Newer than every version of "a" but after its meta key.
            assert_eq!(first_at(&sst, &key(b"a", 99)), Some(key(b"a", 30)));
        }
    }

    #[test]
    fn meta_target_lands_on_meta_key() {
        let sst = fixture(1);
        assert_eq!(
            first_at(&sst, &MvccKey::meta(b"a".to_vec())),
            Some(MvccKey::meta(b"a".to_vec()))
        );
        // No meta key for "d": the newest version is first.
        assert_eq!(first_at(&sst, &MvccKey::meta(b"d".to_vec())), Some(key(b"d", 50)));
    }

    #[test]
    fn find_missing_user_key_lands_on_next() {
        for block_size in [1, 64, 4096] {
            let sst = fixture(block_size);
            assert_eq!(first_at(&sst, &MvccKey::meta(b"c".to_vec())), Some(key(b"d", 50)));
            assert_eq!(first_at(&sst, &key(b"a", 1)), Some(key(b"b", 10)));
        }
    }

    #[test]
    fn find_past_end_is_exhausted() {
        let sst = fixture(64);
        assert_eq!(first_at(&sst, &key(b"d", 1)), None);
        assert_eq!(first_at(&sst, &MvccKey::meta(b"z".to_vec())), None);
    }

    #[test]
    fn find_before_start_returns_first() {
        let sst = fixture(64);
        assert_eq!(
            first_at(&sst, &MvccKey::meta(Vec::new())),
            Some(MvccKey::meta(b"a".to_vec()))
        );
    }
}
