//! Value verification.
//!
//! With verification on, every entry the iterator lands on has its value
//! checked against the decoded user key. Only the damaged entry fails;
//! everything before it reads normally.

#[cfg(test)]
mod tests {
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    use crate::comparator::MvccComparator;
    use crate::iterator::{SstIterError, SstIterator};
    use crate::mvcc::value::{ValueError, encode_checksummed};
    use crate::mvcc::{MvccKey, Timestamp, encode_key};
    use crate::sstable::builder::TableBuilder;
    use crate::sstable::internal_key::make_internal_key;
    use crate::sstable::ValueType;

    const USERS: [&[u8]; 5] = [b"k0", b"k1", b"k2", b"k3", b"k4"];

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    /// One version per user key; `values[i]` is stored under `USERS[i]`.
    fn image(values: &[Vec<u8>]) -> Vec<u8> {
        let mut builder = TableBuilder::new(&MvccComparator).block_size(40);
        for (seq, (user, value)) in USERS.iter().zip(values).enumerate() {
            let encoded = encode_key(&MvccKey::new(user.to_vec(), Timestamp::new(1, 0)));
            builder.add(
                &make_internal_key(&encoded, seq as u64, ValueType::Value as u8),
                value,
            );
        }
        builder.finish().unwrap()
    }

    fn good_values() -> Vec<Vec<u8>> {
        USERS
            .iter()
            .map(|user| encode_checksummed(user, 3, b"payload"))
            .collect()
    }

    /// Counts entries readable before the first error.
    fn scan(iter: &mut SstIterator) -> (usize, Option<SstIterError>) {
        iter.seek(&MvccKey::meta(b"".to_vec()));
        let mut count = 0;
        loop {
            match iter.valid() {
                Ok(true) => {
                    count += 1;
                    iter.next();
                }
                Ok(false) => return (count, None),
                Err(e) => return (count, Some(e)),
            }
        }
    }

    /// # Scenario
    /// Five checksummed values, the third with a flipped payload byte.
    ///
    /// # Expected behavior
    /// With verification, two entries read and the third fails with a
    /// checksum mismatch naming `k2`. Without verification all five read.
    #[test]
    fn corrupt_value_fails_at_its_entry() {
        init_tracing();
        let mut values = good_values();
        let last = values[2].len() - 1;
        values[2][last] ^= 0x01;
        let bytes = image(&values);

        let mut iter = SstIterator::open_mem(&bytes, true).unwrap();
        let (count, err) = scan(&mut iter);
        assert_eq!(count, 2);
        match err {
            Some(SstIterError::Verify(ValueError::ChecksumMismatch { key, .. })) => {
                assert_eq!(key, "k2");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        iter.close().unwrap();

        let mut iter = SstIterator::open_mem(&bytes, false).unwrap();
        assert!(matches!(scan(&mut iter), (5, None)));
        iter.close().unwrap();
    }

    /// # Scenario
    /// Values that are empty, unchecksummed (stored checksum zero), and
    /// correctly checksummed.
    ///
    /// # Expected behavior
    /// All of them pass verification.
    #[test]
    fn empty_and_unchecked_values_pass() {
        init_tracing();
        let mut values = good_values();
        values[1] = Vec::new();
        values[3] = vec![0, 0, 0, 0, 3, b'x', b'y'];

        let mut iter = SstIterator::open_mem(&image(&values), true).unwrap();
        assert!(matches!(scan(&mut iter), (5, None)));
        iter.close().unwrap();
    }

    /// # Scenario
    /// A value shorter than its 5-byte header.
    ///
    /// # Expected behavior
    /// Verification fails with an invalid header size.
    #[test]
    fn short_value_header() {
        init_tracing();
        let mut values = good_values();
        values[4] = vec![1, 2, 3];

        let mut iter = SstIterator::open_mem(&image(&values), true).unwrap();
        let (count, err) = scan(&mut iter);
        assert_eq!(count, 4);
        assert!(matches!(
            err,
            Some(SstIterError::Verify(ValueError::InvalidHeaderSize { len: 3, .. }))
        ));
        iter.close().unwrap();
    }

    /// # Scenario
    /// A value checksummed under a different user key.
    ///
    /// # Expected behavior
    /// The checksum covers the key, so verification fails.
    #[test]
    fn checksum_is_bound_to_key() {
        init_tracing();
        let mut values = good_values();
        values[0] = encode_checksummed(b"elsewhere", 3, b"payload");

        let mut iter = SstIterator::open_mem(&image(&values), true).unwrap();
        let (count, err) = scan(&mut iter);
        assert_eq!(count, 0);
        assert!(matches!(
            err,
            Some(SstIterError::Verify(ValueError::ChecksumMismatch { .. }))
        ));
        iter.close().unwrap();
    }
}
