// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Property-based tests for the formula compiler and index rewriting.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use kinmod_engine::compile;
use kinmod_engine::datamodel::{Basic, Composition};
use kinmod_engine::dimensions::{Binding, IndexPoint, IndexShape, Topology, index_fml};

type Markup = (String, BTreeSet<String>);

fn ident_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,5}".prop_map(|s| s.to_string())
}

fn leaf_strategy() -> impl Strategy<Value = Markup> {
    prop_oneof![
        ident_strategy().prop_map(|i| (format!("<mi>{i}</mi>"), BTreeSet::from([i]))),
        (0u32..1000).prop_map(|n| (format!("<mn>{n}</mn>"), BTreeSet::new())),
    ]
}

fn op_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("+"),
        Just("-"),
        Just("*"),
        Just("/"),
        Just("&#x00D7;"),
    ]
}

fn union(a: BTreeSet<String>, b: BTreeSet<String>) -> BTreeSet<String> {
    a.into_iter().chain(b).collect()
}

fn expr_strategy() -> impl Strategy<Value = Markup> {
    leaf_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            (inner.clone(), op_strategy(), inner.clone()).prop_map(|((a, sa), op, (b, sb))| (
                format!("<mrow>{a}<mo>{op}</mo>{b}</mrow>"),
                union(sa, sb)
            )),
            (inner.clone(), inner.clone()).prop_map(|((a, sa), (b, sb))| (
                format!("<mfrac>{a}{b}</mfrac>"),
                union(sa, sb)
            )),
            // juxtaposition is implicit multiplication
            (inner.clone(), inner.clone())
                .prop_map(|((a, sa), (b, sb))| (format!("<mrow>{a}{b}</mrow>"), union(sa, sb))),
            (inner.clone(), 2u32..4)
                .prop_map(|((a, sa), n)| (format!("<msup>{a}<mn>{n}</mn></msup>"), sa)),
            inner.prop_map(|(a, sa)| (format!("<msqrt>{a}</msqrt>"), sa)),
        ]
    })
}

/// contains_word is true when `word` occurs in `code` not as part of a
/// longer identifier
fn contains_word(code: &str, word: &str) -> bool {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    code.match_indices(word).any(|(at, _)| {
        let before = code[..at].chars().next_back();
        let after = code[at + word.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn compile_is_deterministic((body, _) in expr_strategy(), suffix in "(\\[i\\])?") {
        let markup = format!("<math>{body}</math>");
        let a = compile(&markup, &suffix).unwrap();
        let b = compile(&markup, &suffix).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn free_symbols_are_sound((body, expected) in expr_strategy()) {
        let expr = compile(&format!("<math>{body}</math>"), "").unwrap();
        prop_assert_eq!(&expected, &expr.free_symbols);
        for symbol in expr.free_symbols.iter() {
            prop_assert!(
                contains_word(&expr.code, symbol),
                "{} missing from {}",
                symbol,
                expr.code
            );
        }
    }

    #[test]
    fn index_rewriting_addresses_topology_positions(
        stream_species in prop::collection::vec(prop::collection::btree_set(0usize..4, 1..4), 1..4),
        pick in any::<prop::sample::Index>(),
    ) {
        let species: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let mut basic = Basic {
            species: species.clone(),
            ..Default::default()
        };
        for (i, members) in stream_species.iter().enumerate() {
            basic.streams.insert(
                format!("S{i}"),
                Composition {
                    species: members.iter().map(|m| species[*m].clone()).collect(),
                },
            );
        }
        let topology = Topology::new(&basic).unwrap();
        let points = topology.expand(IndexShape::StreamSpecies);
        let point: IndexPoint = points[pick.index(points.len())];

        let expr = compile("<math><mi>k</mi><mi>C</mi><mo>+</mo><mi>C</mi><mi>x</mi></math>", "").unwrap();
        let bindings = BTreeMap::from([(
            "C".to_owned(),
            Binding {
                name: "C".to_owned(),
                shape: IndexShape::StreamSpecies,
            },
        )]);
        let code = index_fml(&expr, &point, &bindings);

        let (i, j) = (point.stream.unwrap(), point.species.unwrap());
        let stream = &topology.streams[i];
        prop_assert!(stream.species.contains(&j));
        let indexed = format!("C[{i}, {j}]");
        prop_assert_eq!(2, code.matches(&indexed).count());
        prop_assert_eq!(2, code.matches("C[").count());
        prop_assert!(contains_word(&code, "k") && contains_word(&code, "x"));
    }
}
