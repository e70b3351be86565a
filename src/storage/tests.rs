//! Storage Module Tests
//!
//! Validates the hash table mechanics and the key placement logic.
//!
//! ## Test Scopes
//! - **Store**: put/get/delete semantics, resize preservation, numeric and string mutators.
//! - **Expiry**: lazy expiry on read and the sweep.
//! - **Subscriptions**: subscriber bookkeeping and the bounded publish history.
//! - **Partitioner**: deterministic hashing and range assignment.

#[cfg(test)]
mod tests {
    use crate::error::KvError;
    use crate::membership::types::{KeyRange, NodeName};
    use crate::storage::keyspace::Keyspace;
    use crate::storage::memory::{HISTORY_LIMIT, MAX_CHAIN_LENGTH, Store, slot_hash};
    use crate::storage::partitioner::{PARTITIONS, PartitionMap, assign_ranges, partition_of};
    use crate::storage::types::Subscriber;
    use crate::transport::types::ConnectionId;
    use std::time::{Duration, Instant};

    // ============================================================
    // STORE TESTS
    // ============================================================

    #[test]
    fn test_put_then_get_returns_value() {
        let mut store = Store::new();
        store.put("foo".to_string(), "bar".to_string()).unwrap();

        assert_eq!(store.get("foo"), Some("bar"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_overwrites_without_changing_count() {
        let mut store = Store::new();
        store.put("key".to_string(), "one".to_string()).unwrap();
        store.put("key".to_string(), "two".to_string()).unwrap();

        assert_eq!(store.get("key"), Some("two"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_absent_key_is_not_found() {
        let mut store = Store::new();
        assert_eq!(store.delete("ghost"), Err(KvError::NotFound));
    }

    #[test]
    fn test_delete_present_key() {
        let mut store = Store::new();
        store.put("a".to_string(), "1".to_string()).unwrap();
        store.put("b".to_string(), "2".to_string()).unwrap();

        store.delete("a").unwrap();

        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), Some("2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_deleted_slot_is_reused_without_duplicates() {
        let mut store = Store::with_capacity(64);
        for i in 0..20 {
            store.put(format!("k{}", i), i.to_string()).unwrap();
        }
        store.delete("k3").unwrap();
        // Re-putting an existing key must find it even past a freed slot.
        for i in 0..20 {
            if i != 3 {
                store.put(format!("k{}", i), "again".to_string()).unwrap();
            }
        }
        assert_eq!(store.len(), 19);

        let mut seen = std::collections::HashSet::new();
        store.iterate(|entry| assert!(seen.insert(entry.key.clone())));
        assert_eq!(seen.len(), 19);
    }

    #[test]
    fn test_resize_preserves_all_entries() {
        let mut store = Store::with_capacity(4);
        let n = 5_000;

        for i in 0..n {
            store.put(format!("key-{}", i), format!("value-{}", i)).unwrap();
        }

        assert_eq!(store.len(), n);
        assert!(store.capacity() >= 2 * n);
        for i in 0..n {
            assert_eq!(
                store.get(&format!("key-{}", i)),
                Some(format!("value-{}", i).as_str())
            );
        }
    }

    #[test]
    fn test_load_factor_never_exceeds_half() {
        let mut store = Store::with_capacity(2);
        for i in 0..300 {
            store.put(i.to_string(), "x".to_string()).unwrap();
            assert!(store.len() * 2 <= store.capacity());
        }
    }

    #[test]
    fn test_slot_hash_is_within_capacity() {
        for capacity in [2, 7, 64, 1024] {
            for i in 0..200 {
                assert!(slot_hash(&format!("k{}", i), capacity) < capacity);
            }
        }
        assert!(MAX_CHAIN_LENGTH > 1);
    }

    #[test]
    fn test_release_drops_everything() {
        let mut store = Store::new();
        for i in 0..10 {
            store.put(i.to_string(), "v".to_string()).unwrap();
        }
        store.release();
        assert!(store.is_empty());
        assert_eq!(store.get("1"), None);
    }

    // ============================================================
    // MUTATOR TESTS
    // ============================================================

    #[test]
    fn test_increment_sequence() {
        let mut store = Store::new();
        assert_eq!(store.add_integer("counter", 1), Err(KvError::NotFound));

        store.put("counter".to_string(), "5".to_string()).unwrap();
        assert_eq!(store.add_integer("counter", 1), Ok(6));
        assert_eq!(store.add_integer("counter", 10), Ok(16));
        assert_eq!(store.get("counter"), Some("16"));
        assert_eq!(store.add_integer("counter", -20), Ok(-4));
    }

    #[test]
    fn test_increment_non_numeric_is_type_mismatch() {
        let mut store = Store::new();
        store.put("name".to_string(), "john".to_string()).unwrap();

        assert!(matches!(
            store.add_integer("name", 1),
            Err(KvError::TypeMismatch { .. })
        ));
        assert!(matches!(
            store.add_float("name", 1.0),
            Err(KvError::TypeMismatch { .. })
        ));
        assert_eq!(store.get("name"), Some("john"));
    }

    #[test]
    fn test_float_increment() {
        let mut store = Store::new();
        store.put("pi".to_string(), "3.5".to_string()).unwrap();

        assert_eq!(store.add_float("pi", 1.0), Ok(4.5));
        assert_eq!(store.add_float("pi", -0.25), Ok(4.25));
        assert_eq!(store.get("pi"), Some("4.25"));
    }

    #[test]
    fn test_integer_overflow_is_rejected() {
        let mut store = Store::new();
        store.put("big".to_string(), i64::MAX.to_string()).unwrap();
        assert!(matches!(
            store.add_integer("big", 1),
            Err(KvError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_append_and_prepend() {
        let mut store = Store::new();
        store.put("name".to_string(), "john".to_string()).unwrap();

        store.append("name", "_doe").unwrap();
        assert_eq!(store.get("name"), Some("john_doe"));

        store.prepend("name", "mr_").unwrap();
        assert_eq!(store.get("name"), Some("mr_john_doe"));

        assert_eq!(store.append("missing", "x"), Err(KvError::NotFound));
    }

    // ============================================================
    // EXPIRY TESTS
    // ============================================================

    #[test]
    fn test_sweep_removes_expired_entries() {
        let mut store = Store::new();
        store.put("temp".to_string(), "v".to_string()).unwrap();
        store.put("kept".to_string(), "v".to_string()).unwrap();
        store
            .set_expiry("temp", Some(Duration::from_millis(100)))
            .unwrap();

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(store.remove_expired(later), 1);
        assert_eq!(store.get("temp"), None);
        assert_eq!(store.get("kept"), Some("v"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_hidden_before_sweep() {
        let mut store = Store::new();
        store.put("temp".to_string(), "v".to_string()).unwrap();
        store.set_expiry("temp", Some(Duration::ZERO)).unwrap();

        assert_eq!(store.get("temp"), None);
        assert_eq!(store.add_integer("temp", 1), Err(KvError::NotFound));
    }

    #[test]
    fn test_entry_without_expiry_never_expires() {
        let mut store = Store::new();
        store.put("forever".to_string(), "v".to_string()).unwrap();

        let far = Instant::now() + Duration::from_secs(3600 * 24 * 365);
        assert_eq!(store.remove_expired(far), 0);
        let entry = store.get_entry("forever").unwrap();
        assert!(!entry.has_expiry());
        assert_eq!(entry.remaining(Instant::now()), None);
    }

    #[test]
    fn test_clear_expiry() {
        let mut store = Store::new();
        store.put("k".to_string(), "v".to_string()).unwrap();
        store.set_expiry("k", Some(Duration::from_millis(1))).unwrap();
        store.set_expiry("k", None).unwrap();

        let later = Instant::now() + Duration::from_secs(5);
        assert_eq!(store.remove_expired(later), 0);
    }

    #[test]
    fn test_put_over_expired_entry_starts_fresh() {
        let mut store = Store::new();
        store.put("k".to_string(), "old".to_string()).unwrap();
        store.set_expiry("k", Some(Duration::ZERO)).unwrap();
        assert_eq!(store.get("k"), None);

        store.put("k".to_string(), "fresh".to_string()).unwrap();
        assert_eq!(store.get("k"), Some("fresh"));
        assert!(!store.get_entry("k").unwrap().has_expiry());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_after_deadline_passes_is_visible() {
        let mut store = Store::new();
        store.put("k".to_string(), "old".to_string()).unwrap();
        store
            .set_expiry("k", Some(Duration::from_millis(20)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.get("k"), None);

        store.put("k".to_string(), "fresh".to_string()).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.get("k"), Some("fresh"));
    }

    #[test]
    fn test_put_over_live_entry_keeps_expiry() {
        let mut store = Store::new();
        store.put("k".to_string(), "v1".to_string()).unwrap();
        store.set_expiry("k", Some(Duration::from_secs(60))).unwrap();
        store.put("k".to_string(), "v2".to_string()).unwrap();

        let entry = store.get_entry("k").unwrap();
        assert_eq!(entry.value, "v2");
        assert_eq!(entry.expiry, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_live_len_skips_unswept_entries() {
        let mut store = Store::new();
        store.put("gone".to_string(), "v".to_string()).unwrap();
        store.put("kept".to_string(), "v".to_string()).unwrap();
        store.set_expiry("gone", Some(Duration::ZERO)).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.live_len(Instant::now()), 1);
    }

    // ============================================================
    // SUBSCRIPTION TESTS
    // ============================================================

    #[test]
    fn test_publish_returns_subscribers() {
        let mut store = Store::new();
        let ann = Subscriber::client(ConnectionId(1));
        let bob = Subscriber::relayed(ConnectionId(2), 7);

        assert!(store.publish("news".to_string(), "v0".to_string()).unwrap().is_empty());
        store.subscribe("news", ann).unwrap();
        store.subscribe("news", ann).unwrap();
        store.subscribe("news", bob).unwrap();

        let notified = store.publish("news".to_string(), "v1".to_string()).unwrap();
        assert_eq!(notified, vec![ann, bob]);
        assert_eq!(store.get("news"), Some("v1"));

        store.unsubscribe("news", ann).unwrap();
        let notified = store.publish("news".to_string(), "v2".to_string()).unwrap();
        assert_eq!(notified, vec![bob]);
    }

    #[test]
    fn test_subscribe_needs_live_key() {
        let mut store = Store::new();
        let ann = Subscriber::client(ConnectionId(1));
        assert_eq!(store.subscribe("ghost", ann), Err(KvError::NotFound));
        assert_eq!(store.unsubscribe("ghost", ann), Err(KvError::NotFound));
        assert_eq!(store.tail("ghost", ann, 0), Err(KvError::NotFound));
    }

    #[test]
    fn test_tail_replays_from_cursor_and_subscribes() {
        let mut store = Store::new();
        for value in ["a", "b", "c"] {
            store.publish("log".to_string(), value.to_string()).unwrap();
        }
        let ann = Subscriber::client(ConnectionId(3));

        assert_eq!(store.tail("log", ann, 1).unwrap(), vec!["b", "c"]);
        assert!(store.tail("log", ann, 10).unwrap().is_empty());
        assert_eq!(store.get_entry("log").unwrap().subscribers, vec![ann]);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut store = Store::new();
        for i in 0..HISTORY_LIMIT + 5 {
            store.publish("log".to_string(), i.to_string()).unwrap();
        }
        let history = &store.get_entry("log").unwrap().history;
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.front().map(String::as_str), Some("5"));
    }

    #[test]
    fn test_drop_subscriber_forgets_connection() {
        let keyspace = Keyspace::new(4);
        let gone = ConnectionId(9);
        for key in ["a", "b", "c"] {
            keyspace.put(key.to_string(), "v".to_string()).unwrap();
            keyspace.subscribe(key, Subscriber::client(gone)).unwrap();
        }
        keyspace
            .subscribe("a", Subscriber::relayed(ConnectionId(10), 4))
            .unwrap();

        assert_eq!(keyspace.drop_subscriber(gone), 3);
        assert_eq!(keyspace.drop_subscriber(gone), 0);
        let left = keyspace.publish("a".to_string(), "w".to_string()).unwrap();
        assert_eq!(left, vec![Subscriber::relayed(ConnectionId(10), 4)]);
    }

    // ============================================================
    // KEYSPACE TESTS
    // ============================================================

    #[test]
    fn test_keyspace_spreads_and_counts() {
        let keyspace = Keyspace::new(8);
        for i in 0..1000 {
            keyspace.put(format!("book_{}", i), i.to_string()).unwrap();
        }

        assert_eq!(keyspace.len(), 1000);
        assert_eq!(keyspace.keys().len(), 1000);
        assert_eq!(keyspace.get("book_42"), Some("42".to_string()));

        keyspace.flush();
        assert!(keyspace.is_empty());
    }

    #[test]
    fn test_keyspace_count_excludes_expired() {
        let keyspace = Keyspace::new(4);
        keyspace.put("temp".to_string(), "v".to_string()).unwrap();
        keyspace.set_expiry("temp", Some(Duration::ZERO)).unwrap();

        assert_eq!(keyspace.len(), 0);
        assert!(keyspace.is_empty());
        assert!(keyspace.keys().is_empty());
    }

    #[test]
    fn test_keyspace_scan_by_prefix() {
        let keyspace = Keyspace::default();
        keyspace.put("user:1".to_string(), "ann".to_string()).unwrap();
        keyspace.put("user:2".to_string(), "bob".to_string()).unwrap();
        keyspace.put("item:1".to_string(), "pen".to_string()).unwrap();

        let mut found = keyspace.scan(|key| key.starts_with("user:"));
        found.sort();
        assert_eq!(found, vec!["ann".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_keyspace_sweep() {
        let keyspace = Keyspace::new(4);
        keyspace.put("a".to_string(), "1".to_string()).unwrap();
        keyspace
            .set_expiry("a", Some(Duration::from_secs(10)))
            .unwrap();

        let snapshot = keyspace.get_entry("a").unwrap();
        assert_eq!(snapshot.expiry_ms, Some(10_000));
        assert!(snapshot.remaining_ms.is_some());

        assert_eq!(keyspace.sweep_expired(Instant::now()), 0);
        assert_eq!(keyspace.sweep_expired(Instant::now() + Duration::from_secs(20)), 1);
        assert_eq!(keyspace.get("a"), None);
    }

    // ============================================================
    // PARTITIONER TESTS
    // ============================================================

    #[test]
    fn test_partition_is_within_range() {
        for i in 0..1000 {
            assert!(partition_of(&format!("test_key_{}", i)) < PARTITIONS);
        }
    }

    #[test]
    fn test_partition_distribution() {
        let mut partition_counts = std::collections::HashMap::new();
        for i in 0..10000 {
            *partition_counts
                .entry(partition_of(&format!("book_{}", i)))
                .or_insert(0) += 1;
        }
        assert!(
            partition_counts.len() > 3000,
            "Expected a wide spread of partitions, got: {}",
            partition_counts.len()
        );
    }

    #[test]
    fn test_three_node_ranges() {
        let ranges = assign_ranges(3);
        assert_eq!(
            ranges,
            vec![
                KeyRange { min: 0, max: 2731 },
                KeyRange { min: 2731, max: 5462 },
                KeyRange { min: 5462, max: 8192 },
            ]
        );
    }

    #[test]
    fn test_balance_sorts_by_name() {
        let names = vec![
            NodeName::from("c"),
            NodeName::from("a"),
            NodeName::from("b"),
        ];
        let map = PartitionMap::balance(names);

        assert!(map.covers_all());
        assert_eq!(map.owner_of(100), Some(&NodeName::from("a")));
        assert_eq!(map.owner_of(2730), Some(&NodeName::from("a")));
        assert_eq!(map.owner_of(2731), Some(&NodeName::from("b")));
        assert_eq!(map.owner_of(8191), Some(&NodeName::from("c")));
        assert_eq!(map.owner_of(PARTITIONS), None);
        assert_eq!(
            map.range_of(&NodeName::from("b")),
            Some(KeyRange { min: 2731, max: 5462 })
        );
    }

    #[test]
    fn test_balance_coverage_for_many_sizes() {
        for k in 1..=64 {
            let names = (0..k).map(|i| NodeName(format!("node-{:02}", i))).collect();
            let map = PartitionMap::balance(names);
            assert!(map.covers_all(), "gap or overlap with {} nodes", k);

            for partition in (0..PARTITIONS).step_by(97) {
                let owners = map
                    .entries()
                    .iter()
                    .filter(|(range, _)| range.contains(partition))
                    .count();
                assert_eq!(owners, 1);
            }
        }
    }

    #[test]
    fn test_balance_is_reproducible() {
        let first = PartitionMap::balance(vec![NodeName::from("x"), NodeName::from("y")]);
        let second = PartitionMap::balance(vec![NodeName::from("y"), NodeName::from("x")]);
        assert_eq!(first, second);
    }
}
