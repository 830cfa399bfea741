//! Property tests for evidence merging and ordering.

use graphqa::retriever::{EvidenceItem, EvidenceOrigin, EvidenceSet};
use proptest::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;

fn arb_item() -> impl Strategy<Value = EvidenceItem> {
    (
        // Small identity space so collisions (and thus merges) are common.
        prop::sample::select(vec!["a", "b", "c", "d", "e"]),
        prop::bool::ANY,
        0.0f64..3.0,
        prop::collection::btree_map(prop::sample::select(vec!["k1", "k2", "k3"]), "[a-z]{1,4}", 0..3),
    )
        .prop_map(|(identity, structured, score, payload)| EvidenceItem {
            identity: identity.to_string(),
            origin: if structured {
                EvidenceOrigin::Structured
            } else {
                EvidenceOrigin::Semantic
            },
            payload: payload
                .into_iter()
                .map(|(k, v)| (k.to_string(), Value::String(v)))
                .collect::<BTreeMap<_, _>>(),
            score,
        })
}

proptest! {
    #[test]
    fn identities_are_unique_after_merging(items in prop::collection::vec(arb_item(), 0..20)) {
        let set = EvidenceSet::from_items(items, Vec::new());
        let mut ids: Vec<&str> = set.items.iter().map(|i| i.identity.as_str()).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(before, ids.len());
    }

    #[test]
    fn merged_score_is_the_maximum_sighting(items in prop::collection::vec(arb_item(), 1..20)) {
        let expected: BTreeMap<String, f64> = items.iter().fold(BTreeMap::new(), |mut acc, i| {
            let e = acc.entry(i.identity.clone()).or_insert(f64::MIN);
            if i.score > *e {
                *e = i.score;
            }
            acc
        });
        let set = EvidenceSet::from_items(items, Vec::new());
        for item in &set.items {
            prop_assert_eq!(item.score, expected[&item.identity]);
        }
    }

    #[test]
    fn merged_payload_is_the_union_of_keys(items in prop::collection::vec(arb_item(), 1..20)) {
        let mut expected_keys: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for item in &items {
            let keys = expected_keys.entry(item.identity.clone()).or_default();
            for k in item.payload.keys() {
                if !keys.contains(k) {
                    keys.push(k.clone());
                }
            }
        }
        let set = EvidenceSet::from_items(items, Vec::new());
        for item in &set.items {
            for key in &expected_keys[&item.identity] {
                prop_assert!(item.payload.contains_key(key));
            }
        }
    }

    #[test]
    fn ordering_is_total_and_deterministic(items in prop::collection::vec(arb_item(), 0..20)) {
        let a = EvidenceSet::from_items(items.clone(), Vec::new());
        let mut shuffled = items;
        shuffled.reverse();
        let b = EvidenceSet::from_items(shuffled, Vec::new());

        let ids_a: Vec<&str> = a.items.iter().map(|i| i.identity.as_str()).collect();
        let ids_b: Vec<&str> = b.items.iter().map(|i| i.identity.as_str()).collect();
        prop_assert_eq!(ids_a, ids_b);

        for pair in a.items.windows(2) {
            prop_assert!(pair[0].score > pair[1].score
                || (pair[0].score == pair[1].score && pair[0].identity < pair[1].identity));
        }
    }

    #[test]
    fn fixed_structured_score_dominates_any_similarity(sim in 0.0f64..=1.0) {
        let structured = EvidenceItem {
            identity: "s0:1".to_string(),
            origin: EvidenceOrigin::Structured,
            payload: BTreeMap::new(),
            score: 2.0,
        };
        let semantic = EvidenceItem {
            identity: "sem:1".to_string(),
            origin: EvidenceOrigin::Semantic,
            payload: BTreeMap::new(),
            score: sim,
        };
        let set = EvidenceSet::from_items(vec![semantic, structured], Vec::new());
        prop_assert_eq!(set.items[0].origin, EvidenceOrigin::Structured);
    }
}
