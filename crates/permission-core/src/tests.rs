use crate::address::{Address, AliasTable};
use crate::aggregate::SourceAggregator;
use crate::codec::{self, decode, decode_base64, encode, encode_base64, encoded_len};
use crate::config::{Network, RegistryConfig};
use crate::documents::{load_documents, DocumentSet, ALLOCATIONS_STEM, GOVERNORS_STEM, ONGOING_GOVERNORS_STEM};
use crate::error::{AddressError, CodecError, ConfigError, ScoringError};
use crate::feeds::FeedSnapshot;
use crate::reconcile::{ReconciliationEngine, Snapshot, WritePass};
use crate::record::{DocContribution, PermissionRecord};
use crate::scoring::{permission_for_amount, recompute_totals, Boundary, BoundaryTable};
use crate::staking::staked_amount_from_state;
use crate::subscription::{active_members, MembershipBox, SubscriptionTier, TierMembership};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};

fn addr(n: u8) -> Address {
    Address::new([n; 32])
}

fn stored(values: [u64; 6], docs: &[(u64, u8)]) -> PermissionRecord {
    PermissionRecord::from_stored(
        values[0],
        values[1],
        (values[2], values[3]),
        (values[4], values[5]),
        docs.iter()
            .map(|&(amount, doc_index)| DocContribution { amount, doc_index })
            .collect(),
    )
}

fn membership_box(end: u64) -> Vec<u8> {
    [7u64, 2, 1_700_000_000, end, 2_592_000]
        .iter()
        .flat_map(|v| v.to_be_bytes())
        .collect()
}

// --- address ---------------------------------------------------------------

#[test]
fn zero_address_text_form() {
    let zero = Address::new([0u8; 32]);
    assert_eq!(
        zero.to_string(),
        "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAY5HFKQ"
    );
}

#[test]
fn address_text_form_matches_ledger_encoding() {
    let mut key = [0u8; 32];
    for (i, b) in key.iter_mut().enumerate() {
        *b = i as u8;
    }
    let address = Address::new(key);
    let text = "AAAQEAYEAUDAOCAJBIFQYDIOB4IBCEQTCQKRMFYYDENBWHA5DYP7MUPJQE";
    assert_eq!(address.to_string(), text);
    assert_eq!(text.parse::<Address>().unwrap(), address);
    assert_eq!(address.short(), "AAAQE..UPJQE");
}

#[test]
fn address_parse_rejects_bad_input() {
    let good = addr(9).to_string();
    assert_eq!("ABC".parse::<Address>(), Err(AddressError::Length(3)));

    let mut wrong_char = good.clone();
    wrong_char.replace_range(0..1, "1");
    assert_eq!(wrong_char.parse::<Address>(), Err(AddressError::Alphabet('1')));

    // flip one symbol inside the key part; the checksum no longer matches
    let first = good.as_bytes()[10];
    let replacement = if first == b'A' { "B" } else { "A" };
    let mut tampered = good.clone();
    tampered.replace_range(10..11, replacement);
    assert_eq!(tampered.parse::<Address>(), Err(AddressError::Checksum));
}

#[test]
fn address_parse_rejects_non_zero_padding() {
    // the final symbol carries three data bits and two padding bits;
    // 'Q' -> 'R' sets only the lowest padding bit
    let zero = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAY5HFKR";
    assert_eq!(zero.parse::<Address>(), Err(AddressError::Padding));
    assert_eq!(
        AddressError::Padding.to_string(),
        "address has non-zero padding bits in its final character"
    );
}

#[test]
fn address_round_trips_random_keys() {
    let mut rng = rand::thread_rng();
    for _ in 0..50 {
        let key: [u8; 32] = rng.gen();
        let address = Address::new(key);
        assert_eq!(address.to_string().parse::<Address>().unwrap(), address);
    }
}

#[test]
fn box_key_must_be_32_bytes() {
    assert_eq!(Address::from_key(&[1u8; 31]), Err(AddressError::KeyLength(31)));
    assert_eq!(Address::from_key(&[1u8; 32]).unwrap(), addr(1));
}

#[test]
fn alias_table_maps_to_canonical() {
    let mut map = HashMap::new();
    map.insert("SECONDARY".to_string(), "PRIMARY".to_string());
    let aliases = AliasTable::new(map);
    assert_eq!(aliases.canonical("SECONDARY"), "PRIMARY");
    assert_eq!(aliases.canonical("OTHER"), "OTHER");
}

// --- codec -----------------------------------------------------------------

#[test]
fn encodes_mandatory_fields_only() {
    let record = stored([1, 2, 3, 4, 5, 6], &[]);
    assert_eq!(
        encode_base64(&record).unwrap(),
        "AAAAAAAAAAEAAAAAAAAAAgAAAAAAAAADAAAAAAAAAAQAAAAAAAAABQAAAAAAAAAG"
    );
}

#[test]
fn encodes_doc_pairs_with_nine_byte_stride() {
    let record = stored(
        [100, 200, 300, 400, 500, 600],
        &[(700, 5), (800, 6), (900, 7), (1000, 8)],
    );
    let bytes = encode(&record).unwrap();
    assert_eq!(bytes.len(), encoded_len(4));
    assert_eq!(&bytes[48..57], &[0, 0, 0, 0, 0, 0, 2, 188, 5]);
    assert_eq!(
        encode_base64(&record).unwrap(),
        "AAAAAAAAAGQAAAAAAAAAyAAAAAAAAAEsAAAAAAAAAZAAAAAAAAAB9AAAAAAAAAJYAAAAAAAAArwFAAAAAAAAAyAGAAAAAAAAA4QHAAAAAAAAA+gI"
    );
}

#[test]
fn decode_rejects_misaligned_lengths() {
    for len in [0usize, 8, 47, 49, 56, 58, 65] {
        assert_eq!(
            decode(&vec![0u8; len]),
            Err(CodecError::MalformedRecord { len })
        );
    }
    assert!(decode(&[0u8; 48]).is_ok());
    assert_eq!(decode(&[0u8; 57]).unwrap().doc_contributions().len(), 1);
}

#[test]
fn decode_keeps_stored_totals_verbatim() {
    let record = decode_base64("AAAAAAAAAAEAAAAAAAAAAgAAAAAAAAADAAAAAAAAAAQAAAAAAAAABQAAAAAAAAAG").unwrap();
    assert_eq!(record.votes(), 1);
    assert_eq!(record.permission(), 2);
    assert_eq!(record.subscription(), (3, 4));
    assert_eq!(record.staking(), (5, 6));
    assert!(!record.is_consistent());
}

#[test]
fn decode_base64_reports_bad_payload() {
    assert!(matches!(decode_base64("not base64!"), Err(CodecError::Base64(_))));
}

#[test]
fn encode_refuses_oversized_records() {
    let mut record = PermissionRecord::empty();
    for _ in 0..=codec::MAX_DOC_CONTRIBUTIONS {
        record.doc_contributions.push(DocContribution {
            amount: 1,
            doc_index: 1,
        });
    }
    assert_eq!(
        encode(&record),
        Err(CodecError::TooManyContributions(codec::MAX_DOC_CONTRIBUTIONS + 1))
    );
}

// --- scoring ---------------------------------------------------------------

#[test]
fn permission_for_amount_matches_published_values() {
    let table = BoundaryTable::published();
    let cases = [
        (50_000_000_000_001u64, 3_236_067_977_500u64),
        (49_999_999_999_999, 2_588_854_381_999),
        (5_000_000_000_001, 258_885_438_200),
        (4_999_999_999_999, 232_996_894_379),
        (500_000_000_001, 23_299_689_438),
        (1_500_000_000_001, 69_899_068_314),
        (25_000_000_000_001, 1_294_427_191_000),
        (90_000_000_000_001, 5_824_922_359_500),
    ];
    for (amount, expected) in cases {
        assert_eq!(permission_for_amount(amount, &table), expected, "amount {amount}");
    }
}

#[test]
fn permission_is_zero_up_to_smallest_boundary() {
    let table = BoundaryTable::published();
    for amount in [0u64, 1, 10_000_000, 999_999_999, 1_000_000_000, 450_252_515_252, 499_999_999_999, 500_000_000_000] {
        assert_eq!(permission_for_amount(amount, &table), 0, "amount {amount}");
    }
}

#[test]
fn boundary_amount_itself_stays_in_lower_segment() {
    let table = BoundaryTable::published();
    // equal to a boundary: the strict comparison falls through to the row below
    assert_eq!(permission_for_amount(5_000_000_000_000, &table), 232_996_894_380);
}

#[test]
fn boundary_table_validation() {
    assert_eq!(BoundaryTable::new(vec![]), Err(ScoringError::Empty));
    assert_eq!(
        BoundaryTable::new(vec![Boundary { boundary: 0, base_votes: 1.0 }]),
        Err(ScoringError::NonPositiveBoundary(0))
    );
    assert_eq!(
        BoundaryTable::new(vec![
            Boundary { boundary: 10, base_votes: 1.0 },
            Boundary { boundary: 10, base_votes: 2.0 },
        ]),
        Err(ScoringError::NotAscending { previous: 10, next: 10 })
    );
    assert!(matches!(
        BoundaryTable::new(vec![Boundary { boundary: 10, base_votes: f64::NAN }]),
        Err(ScoringError::InvalidBaseVotes(_, 10))
    ));
}

#[test]
fn recompute_totals_follows_record_formulas() {
    let record = stored(
        [0, 0, 500, 70, 9, 11],
        &[(2_500_000, 1), (1_700_000, 2), (999_999, 20)],
    );
    let docs = 2_500_000 + 1_700_000 + 999_999;
    assert_eq!(recompute_totals(&record), (5, 70 + 11 + docs));
}

#[test]
fn mutators_refresh_totals() {
    let mut record = PermissionRecord::empty();
    record.push_contribution(3_000_000, 4);
    record.set_staking(1, 10);
    record.set_subscription(2, 20);
    assert_eq!(record.votes(), 3);
    assert_eq!(record.permission(), 3_000_030);
    assert!(record.is_consistent());
}

// --- feeds -----------------------------------------------------------------

#[test]
fn membership_activity_respects_grace_period() {
    let now = 1_000_000u64;
    let grace = 3_600u64;
    assert!(MembershipBox::decode(&membership_box(0)).unwrap().is_active(now, grace));
    assert!(MembershipBox::decode(&membership_box(now + grace + 1)).unwrap().is_active(now, grace));
    assert!(!MembershipBox::decode(&membership_box(now + grace)).unwrap().is_active(now, grace));
    assert!(!MembershipBox::decode(&membership_box(now - 1)).unwrap().is_active(now, 0));
}

#[test]
fn active_members_skips_expired_and_malformed_boxes() {
    let tier = SubscriptionTier { app_id: 77, amount: 500, permission: 9 };
    let boxes = vec![
        (addr(1), membership_box(0)),
        (addr(2), membership_box(10)),
        (addr(3), vec![0u8; 12]),
        (addr(4), membership_box(5_000)),
    ];
    assert_eq!(active_members(&tier, boxes, 100, 0), vec![addr(1), addr(4)]);
}

#[test]
fn staked_amount_reads_bytes_after_tag() {
    let mut value = vec![0x01];
    value.extend_from_slice(&123_456_789u64.to_be_bytes());
    value.extend_from_slice(&[0xff; 4]);
    assert_eq!(staked_amount_from_state(&value), 123_456_789);
    assert_eq!(staked_amount_from_state(&[0x01, 0x02]), 0);
}

// --- documents -------------------------------------------------------------

#[test]
fn document_specs_follow_enumeration_order() {
    let set = DocumentSet {
        discussion: vec!["d1".into(), "d2".into()],
        discussion_start_index: 1,
        staking: vec!["s1".into()],
        staking_start_index: 20,
        ..DocumentSet::default()
    };
    let specs: Vec<(String, String, u8)> = set
        .specs()
        .into_iter()
        .map(|s| (s.doc_id, s.stem, s.index))
        .collect();
    assert_eq!(
        specs,
        vec![
            ("d1".into(), ALLOCATIONS_STEM.into(), 1),
            ("d2".into(), ALLOCATIONS_STEM.into(), 2),
            ("s1".into(), GOVERNORS_STEM.into(), 20),
            ("s1".into(), ONGOING_GOVERNORS_STEM.into(), 20),
        ]
    );
}

#[test]
fn documents_load_with_aliases_and_scaling() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("d1")).unwrap();
    std::fs::create_dir_all(dir.path().join("s1")).unwrap();
    std::fs::write(
        dir.path().join("d1").join("allocations.json"),
        format!(
            r#"{{"{}": 10.5, "{}": 2, "not-an-address": 4}}"#,
            addr(1),
            addr(9)
        ),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("s1").join("dao_governors.json"),
        format!(r#"{{"{}": [3, "extra"]}}"#, addr(1)),
    )
    .unwrap();

    let mut aliases = HashMap::new();
    aliases.insert(addr(9).to_string(), addr(2).to_string());
    let set = DocumentSet {
        root: dir.path().to_path_buf(),
        discussion: vec!["d1".into()],
        discussion_start_index: 1,
        staking: vec!["s1".into()],
        staking_start_index: 20,
    };
    let docs = load_documents(&set, &AliasTable::new(aliases)).unwrap();

    assert_eq!(docs.len(), 3);
    assert_eq!(docs[0].entries.get(&addr(1)), Some(&10_500_000));
    assert_eq!(docs[0].entries.get(&addr(2)), Some(&2_000_000));
    assert!(!docs[0].entries.contains_key(&addr(9)));
    assert_eq!(docs[1].entries.get(&addr(1)), Some(&3_000_000));
    // missing ongoing-governors file reads as empty
    assert!(docs[2].entries.is_empty());
}

#[test]
fn unparseable_document_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("bad")).unwrap();
    std::fs::write(dir.path().join("bad").join("allocations.json"), "[1, 2").unwrap();
    let set = DocumentSet {
        root: dir.path().to_path_buf(),
        discussion: vec!["bad".into()],
        ..DocumentSet::default()
    };
    assert!(load_documents(&set, &AliasTable::default()).is_err());
}

#[test]
fn alias_collision_keeps_the_later_entry_in_file_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("d1")).unwrap();
    // the alias sorts after the canonical text but appears first in the file
    assert!(addr(9).to_string() > addr(2).to_string());
    std::fs::write(
        dir.path().join("d1").join("allocations.json"),
        format!(r#"{{"{}": 5, "{}": 1}}"#, addr(9), addr(2)),
    )
    .unwrap();

    let mut aliases = HashMap::new();
    aliases.insert(addr(9).to_string(), addr(2).to_string());
    let set = DocumentSet {
        root: dir.path().to_path_buf(),
        discussion: vec!["d1".into()],
        discussion_start_index: 1,
        ..DocumentSet::default()
    };
    let aliases = AliasTable::new(aliases);
    let docs = load_documents(&set, &aliases).unwrap();

    assert_eq!(docs[0].entries.len(), 1);
    assert_eq!(docs[0].entries.get(&addr(2)), Some(&1_000_000));

    // reversed file order flips the winner
    std::fs::write(
        dir.path().join("d1").join("allocations.json"),
        format!(r#"{{"{}": 1, "{}": 5}}"#, addr(2), addr(9)),
    )
    .unwrap();
    let docs = load_documents(&set, &aliases).unwrap();
    assert_eq!(docs[0].entries.len(), 1);
    assert_eq!(docs[0].entries.get(&addr(2)), Some(&5_000_000));
}

// --- aggregation -----------------------------------------------------------

#[test]
fn aggregator_merges_documents_and_feeds() {
    let table = BoundaryTable::published();
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("d1")).unwrap();
    std::fs::create_dir_all(dir.path().join("s1")).unwrap();
    std::fs::write(
        dir.path().join("d1").join("allocations.json"),
        format!(r#"{{"{}": 10.5, "{}": 1}}"#, addr(1), addr(6)),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("s1").join("dao_ongoing_governors.json"),
        format!(r#"{{"{}": [3]}}"#, addr(1)),
    )
    .unwrap();
    let set = DocumentSet {
        root: dir.path().to_path_buf(),
        discussion: vec!["d1".into()],
        discussion_start_index: 1,
        staking: vec!["s1".into()],
        staking_start_index: 20,
    };
    let docs = load_documents(&set, &AliasTable::default()).unwrap();

    let feeds = FeedSnapshot::default()
        .with_stake(addr(1), 600_000_000_000)
        .with_stake(addr(3), 100)
        .with_stake(addr(4), 5_000_000_000_001)
        .with_membership(addr(5), TierMembership { amount: 500, permission: 7 })
        .with_membership(addr(5), TierMembership { amount: 100, permission: 1 });

    let data = SourceAggregator::new(&table).aggregate(&docs, &feeds);
    assert_eq!(
        data.keys().copied().collect::<Vec<_>>(),
        vec![addr(1), addr(4), addr(5), addr(6)]
    );

    let first = &data[&addr(1)];
    assert_eq!(
        first.doc_contributions(),
        &[
            DocContribution { amount: 10_500_000, doc_index: 1 },
            DocContribution { amount: 3_000_000, doc_index: 20 },
        ]
    );
    let staking_permission = permission_for_amount(600_000_000_000, &table);
    assert_eq!(first.staking(), (600_000_000_000, staking_permission));
    assert_eq!(first.votes(), 13);
    assert_eq!(first.permission(), 13_500_000 + staking_permission);

    assert_eq!(data[&addr(4)].staking().1, 258_885_438_200);
    assert_eq!(data[&addr(5)].subscription(), (600, 8));
    assert_eq!(data[&addr(6)].staking(), (0, 0));
    assert!(data.values().all(PermissionRecord::is_consistent));
}

// --- reconciliation --------------------------------------------------------

fn seeded_snapshot(table: &BoundaryTable) -> Snapshot {
    let mut one = PermissionRecord::empty();
    one.push_contribution(10_000_000, 1);
    one.set_staking(600_000_000_000, permission_for_amount(600_000_000_000, table));

    let mut two = PermissionRecord::empty();
    two.push_contribution(5_000_000, 2);
    two.set_subscription(500, 7);

    let mut records = BTreeMap::new();
    records.insert(addr(1), one);
    records.insert(addr(2), two);
    Snapshot::from_records(records)
}

fn current_feeds() -> FeedSnapshot {
    FeedSnapshot::default()
        .with_stake(addr(1), 600_000_000_000)
        .with_stake(addr(2), 0)
        .with_membership(addr(2), TierMembership { amount: 500, permission: 7 })
}

#[test]
fn unchanged_feeds_produce_no_writes() {
    let table = BoundaryTable::published();
    let report = ReconciliationEngine::new(&table).reconcile(&seeded_snapshot(&table), &current_feeds());
    assert!(report.is_empty());
    assert_eq!(report.unchanged, 2);
}

#[test]
fn staking_change_touches_only_that_address() {
    let table = BoundaryTable::published();
    let feeds = current_feeds().with_stake(addr(1), 7_000_000_000_000);
    let report = ReconciliationEngine::new(&table).reconcile(&seeded_snapshot(&table), &feeds);

    assert_eq!(report.writes.keys().copied().collect::<Vec<_>>(), vec![addr(1)]);
    let write = &report.writes[&addr(1)];
    assert_eq!(write.pass, WritePass::Update);
    assert_eq!(
        write.record.staking(),
        (7_000_000_000_000, permission_for_amount(7_000_000_000_000, &table))
    );
    assert_eq!(write.record.subscription(), (0, 0));
    assert_eq!(write.record.doc_contributions().len(), 1);
    assert!(write.record.is_consistent());
}

#[test]
fn missing_staking_entry_keeps_stored_stake() {
    let table = BoundaryTable::published();
    let mut feeds = current_feeds();
    feeds.staking.remove(&addr(1));
    let report = ReconciliationEngine::new(&table).reconcile(&seeded_snapshot(&table), &feeds);
    assert!(report.is_empty());
}

#[test]
fn expired_subscription_is_reset() {
    let table = BoundaryTable::published();
    let mut feeds = current_feeds();
    feeds.subscriptions.clear();
    let report = ReconciliationEngine::new(&table).reconcile(&seeded_snapshot(&table), &feeds);

    let write = &report.writes[&addr(2)];
    assert_eq!(write.record.subscription(), (0, 0));
    assert_eq!(write.record.permission(), 5_000_000);
}

#[test]
fn incomplete_subscription_feed_never_resets() {
    let table = BoundaryTable::published();
    let mut feeds = current_feeds();
    feeds.subscriptions.clear();
    feeds.subscriptions_complete = false;
    let report = ReconciliationEngine::new(&table).reconcile(&seeded_snapshot(&table), &feeds);
    assert!(report.is_empty());
}

#[test]
fn partial_tier_read_never_lowers_stored_subscription() {
    let table = BoundaryTable::published();
    // stored totals cover tier A (500, 7) and tier B (900, 11); only B was read
    let mut records = BTreeMap::new();
    records.insert(addr(4), stored([0, 18, 1400, 18, 0, 0], &[]));
    let snapshot = Snapshot::from_records(records);
    let mut feeds = FeedSnapshot::default()
        .with_membership(addr(4), TierMembership { amount: 900, permission: 11 });
    feeds.subscriptions_complete = false;

    let engine = ReconciliationEngine::new(&table);
    let report = engine.reconcile(&snapshot, &feeds);
    assert!(report.is_empty(), "partial read rewrote {:?}", report.writes.keys());
    assert_eq!(report.unchanged, 1);

    // staking still refreshes while the subscription pair stays put
    let mut feeds = feeds.with_stake(addr(4), 600_000_000_000);
    let report = engine.reconcile(&snapshot, &feeds);
    let write = &report.writes[&addr(4)];
    assert_eq!(write.record.subscription(), (1400, 18));
    assert_eq!(write.record.staking().0, 600_000_000_000);

    // once every tier reads, the same single membership is authoritative
    feeds.subscriptions_complete = true;
    let report = engine.reconcile(&snapshot, &feeds);
    assert_eq!(report.writes[&addr(4)].record.subscription(), (900, 11));
}

#[test]
fn unreadable_record_is_present_but_never_written() {
    let table = BoundaryTable::published();
    let mut snapshot = seeded_snapshot(&table);
    snapshot.record_unreadable(addr(1).as_bytes().to_vec(), "transport: reset".into());

    assert!(snapshot.contains(&addr(1)));
    assert!(snapshot.get(&addr(1)).is_none());
    assert_eq!(snapshot.malformed().len(), 1);

    let feeds = current_feeds().with_stake(addr(1), 7_000_000_000_000);
    let report = ReconciliationEngine::new(&table).reconcile(&snapshot, &feeds);
    assert!(!report.writes.contains_key(&addr(1)));
    assert_eq!(report.skipped_malformed, 1);
}

#[test]
fn new_stakers_below_boundary_are_filtered() {
    let table = BoundaryTable::published();
    let feeds = current_feeds()
        .with_stake(addr(7), 499_999_999_999)
        .with_stake(addr(8), 900_000_000_000);
    let report = ReconciliationEngine::new(&table).reconcile(&seeded_snapshot(&table), &feeds);

    assert_eq!(report.writes.keys().copied().collect::<Vec<_>>(), vec![addr(8)]);
    assert_eq!(report.writes[&addr(8)].pass, WritePass::NewStaker);
    assert_eq!(report.dust_filtered, 1);
}

#[test]
fn new_subscribers_are_written_unconditionally() {
    let table = BoundaryTable::published();
    let feeds = current_feeds().with_membership(addr(9), TierMembership { amount: 0, permission: 0 });
    let report = ReconciliationEngine::new(&table).reconcile(&seeded_snapshot(&table), &feeds);
    let write = &report.writes[&addr(9)];
    assert_eq!(write.pass, WritePass::NewSubscriber);
    assert_eq!(write.record.permission(), 0);
}

#[test]
fn address_new_to_both_feeds_is_written_once_with_both() {
    let table = BoundaryTable::published();
    let feeds = current_feeds()
        .with_stake(addr(5), 100)
        .with_membership(addr(5), TierMembership { amount: 500, permission: 3 });
    let report = ReconciliationEngine::new(&table).reconcile(&seeded_snapshot(&table), &feeds);

    assert_eq!(report.writes.len(), 1);
    let write = &report.writes[&addr(5)];
    assert_eq!(write.pass, WritePass::NewSubscriber);
    assert_eq!(write.record.staking(), (100, 0));
    assert_eq!(write.record.subscription(), (500, 3));
    assert_eq!(report.count(WritePass::NewSubscriber), 1);
}

#[test]
fn malformed_registry_entries_are_isolated() {
    let table = BoundaryTable::published();
    let good = {
        let mut r = PermissionRecord::empty();
        r.set_subscription(500, 7);
        r
    };
    let entries = vec![
        (addr(1).as_bytes().to_vec(), vec![0u8; 50]),
        (vec![1, 2, 3], encode(&good).unwrap()),
        (addr(2).as_bytes().to_vec(), encode(&good).unwrap()),
    ];
    let snapshot = Snapshot::from_entries(entries);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.malformed().len(), 2);

    // the corrupt address is neither rewritten nor recreated as new
    let feeds = FeedSnapshot::default()
        .with_stake(addr(1), 900_000_000_000)
        .with_membership(addr(2), TierMembership { amount: 500, permission: 7 });
    let report = ReconciliationEngine::new(&table).reconcile(&snapshot, &feeds);
    assert!(report.is_empty());
    assert_eq!(report.skipped_malformed, 2);
}

#[test]
fn reconciliation_converges_for_random_feeds() {
    let table = BoundaryTable::published();
    let mut rng = rand::thread_rng();
    for _ in 0..20 {
        let mut feeds = FeedSnapshot::default();
        for n in 0..30u8 {
            if rng.gen_bool(0.6) {
                feeds = feeds.with_stake(addr(n), rng.gen_range(0..80_000_000_000_000));
            }
            if rng.gen_bool(0.3) {
                feeds = feeds.with_membership(
                    addr(n),
                    TierMembership { amount: rng.gen_range(0..1_000), permission: rng.gen_range(0..50) },
                );
            }
        }
        let engine = ReconciliationEngine::new(&table);
        let mut registry = seeded_snapshot(&table).records().clone();
        let first = engine.reconcile(&Snapshot::from_records(registry.clone()), &feeds);
        for (address, write) in first.writes {
            registry.insert(address, write.record);
        }

        let entries = registry
            .iter()
            .map(|(a, r)| (a.as_bytes().to_vec(), encode(r).unwrap()))
            .collect::<Vec<_>>();
        let second = engine.reconcile(&Snapshot::from_entries(entries), &feeds);
        assert!(second.is_empty(), "second run wrote {:?}", second.writes.keys());
    }
}

// --- configuration ---------------------------------------------------------

#[test]
fn missing_registry_id_is_fatal() {
    let config = RegistryConfig::from_json("{}").unwrap();
    assert!(matches!(
        config.resolve_with(|_| None),
        Err(ConfigError::Missing("registry_app_id"))
    ));
}

#[test]
fn environment_overrides_registry_id() {
    let config = RegistryConfig::from_json(r#"{"registry_app_id": 5, "network": "mainnet"}"#).unwrap();
    let resolved = config
        .resolve_with(|name| (name == "PERMISSION_APP_ID").then(|| "730132583".to_string()))
        .unwrap();
    assert_eq!(resolved.registry_app_id, 730_132_583);
    assert_eq!(resolved.network, Network::Mainnet);
    assert_eq!(resolved.boundaries, BoundaryTable::published());
    assert_eq!(resolved.runtime.max_retries, 20);
}

#[test]
fn configuration_rejects_bad_tables_and_tiers() {
    assert!(RegistryConfig::from_json(r#"{"boundaries": [[10, 1.0], [5, 2.0]]}"#).is_err());

    let duplicate = RegistryConfig::from_json(
        r#"{"registry_app_id": 1, "subscription": {"tiers": [
            {"app_id": 3, "amount": 1, "permission": 1},
            {"app_id": 3, "amount": 2, "permission": 2}
        ]}}"#,
    )
    .unwrap();
    assert!(matches!(
        duplicate.resolve_with(|_| None),
        Err(ConfigError::Invalid { field: "subscription.tiers", .. })
    ));
}

#[test]
fn custom_boundaries_parse_from_pairs() {
    let config = RegistryConfig::from_json(
        r#"{"registry_app_id": 1, "boundaries": [[100, 1.5], [1000, 20.0]]}"#,
    )
    .unwrap();
    let table = config.resolve_with(|_| None).unwrap().boundaries;
    assert_eq!(table.smallest_boundary(), 100);
    assert_eq!(permission_for_amount(200, &table), 3_000_000);
}

#[test]
fn document_indices_past_one_byte_are_rejected() {
    let mut config = RegistryConfig::from_json(r#"{"registry_app_id": 1}"#).unwrap();
    config.documents.staking_start_index = 250;
    config.documents.staking = (0..6).map(|i| format!("s{i}")).collect();
    let last = config.clone().resolve_with(|_| None).unwrap().documents.specs();
    assert_eq!(last.last().map(|spec| spec.index), Some(255));

    config.documents.staking.push("s6".into());
    assert!(matches!(
        config.clone().resolve_with(|_| None),
        Err(ConfigError::Invalid { field: "documents.staking", .. })
    ));

    config.documents.staking.clear();
    config.documents.discussion = (0..257).map(|i| format!("d{i}")).collect();
    assert!(matches!(
        config.resolve_with(|_| None),
        Err(ConfigError::Invalid { field: "documents.discussion", .. })
    ));
}
