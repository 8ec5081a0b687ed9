//! Property tests for the universal guarantees of the comparison pipeline:
//! canonical determinism, diff determinism and ordering, redaction purity,
//! and engine determinism.

use proptest::prelude::*;

use forkline_core::{
    canonical_bytes, canonical_hash, diff_values, find_first_divergence, DivergenceConfig,
    DivergenceStatus, Event, RedactionPolicy, Run, RunStatus, Step, Value, REDACTED,
    SECRET_KEY_PATTERNS, STRUCTURAL_ALLOWLIST,
};

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        prop_oneof![
            any::<f64>(),
            Just(f64::NAN),
            Just(f64::INFINITY),
            Just(-0.0f64),
        ]
        .prop_map(Value::Float),
        ".*".prop_map(Value::Str),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(4, 32, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..5).prop_map(Value::Seq),
            proptest::collection::btree_map("[a-z_]{1,10}", inner, 0..5).prop_map(Value::Map),
        ]
    })
}

fn canon(v: &Value) -> Vec<u8> {
    canonical_bytes(v).expect("canonical_bytes")
}

/// Every surviving mapping entry whose key matches a secret pattern (and is
/// not structurally allowlisted) must carry the mask sentinel.
fn assert_no_leaked_secrets(v: &Value) {
    match v {
        Value::Map(map) => {
            for (key, value) in map {
                let lower = key.to_lowercase();
                let allowlisted = STRUCTURAL_ALLOWLIST.contains(&lower.as_str());
                let secret = SECRET_KEY_PATTERNS.iter().any(|p| lower.contains(p));
                if secret && !allowlisted {
                    assert_eq!(
                        value,
                        &Value::Str(REDACTED.to_string()),
                        "secret key '{key}' survived redaction"
                    );
                } else {
                    assert_no_leaked_secrets(value);
                }
            }
        }
        Value::Seq(items) => {
            for item in items {
                assert_no_leaked_secrets(item);
            }
        }
        _ => {}
    }
}

proptest! {
    #[test]
    fn prop_canonical_determinism(v in value_strategy()) {
        let first = canon(&v);
        for _ in 0..10 {
            prop_assert_eq!(&canon(&v), &first);
        }
        let h1 = canonical_hash(&v).expect("hash");
        let h2 = canonical_hash(&v).expect("hash");
        prop_assert_eq!(h1, h2);
    }

    #[test]
    fn prop_map_insertion_order_irrelevant(
        entries in proptest::collection::btree_map("[a-z_]{1,10}", value_strategy(), 0..8)
    ) {
        let entries: Vec<(String, Value)> = entries.into_iter().collect();
        let forward: Value = Value::Map(entries.iter().cloned().collect());
        let backward: Value = Value::Map(entries.iter().rev().cloned().collect());
        prop_assert_eq!(canon(&forward), canon(&backward));
    }

    #[test]
    fn prop_negative_zero_collapses(v in value_strategy()) {
        // Embedding -0.0 next to arbitrary content never distinguishes it
        // from 0.0.
        let with_neg = Value::Seq(vec![Value::Float(-0.0), v.clone()]);
        let with_pos = Value::Seq(vec![Value::Float(0.0), v]);
        prop_assert_eq!(canon(&with_neg), canon(&with_pos));
    }

    #[test]
    fn prop_diff_deterministic(old in value_strategy(), new in value_strategy()) {
        let first = serde_json::to_vec(&diff_values(&old, &new)).expect("serialize");
        for _ in 0..10 {
            let again = serde_json::to_vec(&diff_values(&old, &new)).expect("serialize");
            prop_assert_eq!(&again, &first);
        }
    }

    #[test]
    fn prop_diff_self_is_empty(v in value_strategy()) {
        // NaN is the one value not equal to itself; the differ reports it.
        fn has_nan(v: &Value) -> bool {
            match v {
                Value::Float(f) => f.is_nan(),
                Value::Seq(items) => items.iter().any(has_nan),
                Value::Map(m) => m.values().any(has_nan),
                _ => false,
            }
        }
        prop_assume!(!has_nan(&v));
        prop_assert!(diff_values(&v, &v).is_empty());
    }

    #[test]
    fn prop_diff_mapping_op_order(old in value_strategy(), new in value_strategy()) {
        // Within any mapping diff, removes precede adds precede recursions;
        // globally this means ops at a shared path prefix keep that order.
        let ops = diff_values(&old, &new);
        // Op lists are stable; spot-check the group ordering at the root.
        let mut seen_add_at_root = false;
        let mut seen_recursion_at_root = false;
        for op in &ops {
            let path = op.path();
            let root_child = path.starts_with("$.") && !path[2..].contains(['.', '[']);
            if !root_child {
                if path != "$" {
                    seen_recursion_at_root = true;
                }
                continue;
            }
            match op.op_name() {
                "remove" => {
                    prop_assert!(!seen_add_at_root, "remove after add at root");
                    prop_assert!(!seen_recursion_at_root, "remove after recursion");
                }
                "add" => {
                    seen_add_at_root = true;
                    prop_assert!(!seen_recursion_at_root, "add after recursion");
                }
                _ => {}
            }
        }
    }

    #[test]
    fn prop_redaction_pure_and_deterministic(v in value_strategy()) {
        let policy = RedactionPolicy::safe_default();
        let before = canon(&v);
        let out1 = policy.redact(&v).expect("redact");
        let after = canon(&v);
        prop_assert_eq!(before, after, "input mutated by redaction");

        let out2 = policy.redact(&v).expect("redact");
        prop_assert_eq!(canon(&out1), canon(&out2));
    }

    #[test]
    fn prop_redaction_boundary_never_leaks(v in value_strategy()) {
        let policy = RedactionPolicy::safe_default();
        let out = policy.redact(&v).expect("redact");
        assert_no_leaked_secrets(&out);
    }

    #[test]
    fn prop_engine_self_comparison_exact_match(
        steps in proptest::collection::vec(("[a-z_]{1,12}", value_strategy(), value_strategy()), 0..6)
    ) {
        let steps: Vec<Step> = steps
            .into_iter()
            .enumerate()
            .map(|(i, (name, input, output))| {
                Step::new(
                    i,
                    name,
                    vec![
                        Event::new("input", input, "2024-01-01T00:00:00Z"),
                        Event::new("output", output, "2024-01-01T00:00:01Z"),
                    ],
                )
            })
            .collect();
        let r = Run::new("r", "recording_v0", steps, Value::Null, RunStatus::Success);
        let result =
            find_first_divergence(&r, &r, &DivergenceConfig::default()).expect("divergence");
        prop_assert_eq!(result.status, DivergenceStatus::ExactMatch);
    }

    #[test]
    fn prop_engine_deterministic(
        steps_a in proptest::collection::vec(("[a-z]{1,6}", value_strategy()), 0..5),
        steps_b in proptest::collection::vec(("[a-z]{1,6}", value_strategy()), 0..5),
    ) {
        fn build(run_id: &str, specs: Vec<(String, Value)>) -> Run {
            let steps = specs
                .into_iter()
                .enumerate()
                .map(|(i, (name, input))| {
                    Step::new(i, name, vec![Event::new("input", input, "t0")])
                })
                .collect();
            Run::new(run_id, "recording_v0", steps, Value::Null, RunStatus::Success)
        }
        let a = build("a", steps_a);
        let b = build("b", steps_b);
        let config = DivergenceConfig::default();
        let first = serde_json::to_vec(
            &find_first_divergence(&a, &b, &config).expect("divergence"),
        )
        .expect("serialize");
        for _ in 0..10 {
            let again = serde_json::to_vec(
                &find_first_divergence(&a, &b, &config).expect("divergence"),
            )
            .expect("serialize");
            prop_assert_eq!(&again, &first);
        }
    }
}
