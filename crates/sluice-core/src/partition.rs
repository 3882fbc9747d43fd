//! Deterministic mapping from `(topic, partition key)` to a partition index.
//!
//! The hash is the 31-multiplier polynomial over UTF-16 code units with
//! wrapping 32-bit arithmetic. It has no per-process seed, so a key lands on
//! the same partition across restarts and hosts as long as the partition
//! count is unchanged. Changing the partition count re-partitions the topic.

use std::num::NonZeroU32;

fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Partition index for a message: `floor_mod(hash(topic + "#" + key), n)`.
pub fn partition(topic: &str, key: &str, num_partitions: NonZeroU32) -> u32 {
    let hash = i64::from(string_hash(&format!("{topic}#{key}")));
    // rem_euclid is a floor-modulo for a positive divisor, never negative.
    hash.rem_euclid(i64::from(num_partitions.get())) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: u32) -> NonZeroU32 {
        NonZeroU32::new(v).unwrap()
    }

    #[test]
    fn hash_matches_known_values() {
        assert_eq!(string_hash("orders#A"), 1_234_321_955);
        assert_eq!(string_hash("a#b"), 94_400);
        assert_eq!(string_hash("orders#"), -1_207_109_154);
        assert_eq!(string_hash(""), 0);
    }

    #[test]
    fn fixed_inputs_map_to_fixed_partitions() {
        assert_eq!(partition("orders", "A", n(4)), 3);
        assert_eq!(partition("orders", "A", n(16)), 3);
        assert_eq!(partition("orders", "A", n(7)), 6);
        assert_eq!(partition("orders", "customer-42", n(16)), 15);
        assert_eq!(partition("payments", "B", n(16)), 12);
        assert_eq!(partition("topic", "key", n(16)), 11);
    }

    #[test]
    fn negative_hash_uses_floor_modulo() {
        // hash("orders#") is negative; a truncating remainder would give -2.
        assert_eq!(partition("orders", "", n(16)), 14);
        assert_eq!(partition("orders", "", n(7)), 1);
    }

    #[test]
    fn single_partition_always_zero() {
        for key in ["", "a", "b", "some-long-key", "ключ"] {
            assert_eq!(partition("t", key, n(1)), 0);
        }
    }

    #[test]
    fn same_input_is_stable_and_in_range() {
        for i in 0..200 {
            let key = format!("key-{i}");
            let first = partition("events", &key, n(13));
            assert!(first < 13);
            for _ in 0..3 {
                assert_eq!(partition("events", &key, n(13)), first);
            }
        }
    }

    #[test]
    fn topic_participates_in_hash() {
        // Same key, different topics: "a#b" vs "b#b" hash differently.
        assert_ne!(string_hash("a#b"), string_hash("b#b"));
    }
}
