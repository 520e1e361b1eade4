use std::collections::HashSet;

use atomgraph::uid::{UID_WIDTH, is_uid};
use atomgraph::{AtomGraphError, UidConfig, UidGenerator};
use rand::SeedableRng;
use rand::rngs::StdRng;

#[test]
fn test_generate_skips_taken_ids() {
    let mut probe = UidGenerator::new(StdRng::seed_from_u64(9), 8);
    let first = probe.draw();
    let second = probe.draw();

    let mut uids = UidGenerator::new(StdRng::seed_from_u64(9), 8);
    let mut asked = Vec::new();
    let uid = uids
        .generate(|candidate| {
            asked.push(candidate.to_string());
            Ok(candidate == first)
        })
        .expect("generate");
    assert_eq!(uid, second);
    assert_eq!(asked, vec![first, second]);
}

#[test]
fn test_exhaustion_after_max_attempts() {
    let mut uids = UidGenerator::new(StdRng::seed_from_u64(1), 5);
    let mut calls = 0;
    let err = uids
        .generate(|_| {
            calls += 1;
            Ok(true)
        })
        .unwrap_err();
    assert!(matches!(err, AtomGraphError::IdSpaceExhausted { attempts: 5 }));
    assert_eq!(calls, 5);
}

#[test]
fn test_predicate_error_propagates() {
    let mut uids = UidGenerator::from_config(&UidConfig::default());
    let err = uids
        .generate(|_| Err(AtomGraphError::engine("search", "disk on fire")))
        .unwrap_err();
    assert!(matches!(err, AtomGraphError::Engine { operation: "search", .. }));
}

#[test]
fn test_ids_are_well_formed_and_mostly_unique() {
    let mut uids = UidGenerator::from_config(&UidConfig {
        max_attempts: 4,
        seed: Some(77),
    });
    let mut seen = HashSet::new();
    for _ in 0..1000 {
        let uid = uids.generate(|c| Ok(seen.contains(c))).expect("generate");
        assert_eq!(uid.len(), UID_WIDTH);
        assert!(is_uid(&uid));
        assert!(seen.insert(uid));
    }
}
