// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Reaction strings have the form `2 A + B > C`: species separated by
//! `+`, optionally preceded by an integer coefficient, reactants and
//! products separated by `>`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::common::Result;
use crate::config_err;
use crate::datamodel::ParameterIndex;

pub const STOICHIOMETRIC_COEFFICIENT: &str = "Stoichiometric_Coefficient";

lazy_static! {
    static ref ARROW_RE: Regex = Regex::new(r"\s*(?:->|=>|>)\s*").unwrap();
    static ref PLUS_RE: Regex = Regex::new(r"\s+\+\s+|^\+\s+|\s+\+$").unwrap();
    static ref TERM_RE: Regex = Regex::new(r"^(?:(\d+)\s*)?(\S+)$").unwrap();
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reaction {
    pub text: String,
    /// net coefficient per participating species, in declaration order
    pub participants: Vec<(String, f64)>,
}

impl Reaction {
    pub fn coefficient(&self, species: &str) -> Option<f64> {
        self.participants
            .iter()
            .find(|(s, _)| s == species)
            .map(|(_, c)| *c)
    }

    pub fn involves(&self, species: &str) -> bool {
        self.coefficient(species).is_some()
    }
}

fn parse_side(reaction: &str, side: &str) -> Result<Vec<(String, f64)>> {
    let mut terms = vec![];
    for term in PLUS_RE.split(side.trim()) {
        let term = term.trim();
        let Some(caps) = TERM_RE.captures(term) else {
            return config_err!(
                BadReaction,
                format!("can't read term '{term}' of reaction '{reaction}'")
            );
        };
        let count = match caps.get(1) {
            Some(n) => n.as_str().parse::<f64>().unwrap_or(1.0),
            None => 1.0,
        };
        terms.push((caps[2].to_owned(), count));
    }
    Ok(terms)
}

/// parse_reaction reads a reaction string against the declared species.
/// A species on both sides nets out to the sum of its signed counts.
pub fn parse_reaction(text: &str, species: &[String]) -> Result<Reaction> {
    let sides: Vec<&str> = ARROW_RE.split(text.trim()).collect();
    if sides.len() != 2 || sides.iter().any(|s| s.trim().is_empty()) {
        return config_err!(
            BadReaction,
            format!("expected 'reactants > products', got '{text}'")
        );
    }

    let mut net: Vec<(String, f64)> = vec![];
    let signed = parse_side(text, sides[0])?
        .into_iter()
        .map(|(s, n)| (s, -n))
        .chain(parse_side(text, sides[1])?);
    for (name, count) in signed {
        if !species.contains(&name) {
            return config_err!(
                UnknownSpecies,
                format!("reaction '{text}' uses undeclared species '{name}'")
            );
        }
        match net.iter_mut().find(|(s, _)| *s == name) {
            Some((_, total)) => *total += count,
            None => net.push((name, count)),
        }
    }

    // participants follow the topology's species order
    net.sort_by_key(|(s, _)| species.iter().position(|decl| decl == s));

    Ok(Reaction {
        text: text.to_owned(),
        participants: net,
    })
}

/// stoichiometry derives the coefficient table entries for every
/// reaction.
pub fn stoichiometry(reactions: &[Reaction]) -> Vec<(ParameterIndex, f64)> {
    reactions
        .iter()
        .flat_map(|r| {
            r.participants.iter().map(move |(species, count)| {
                let index = ParameterIndex::scalar(STOICHIOMETRIC_COEFFICIENT)
                    .with_reaction(&r.text)
                    .with_species(species);
                (index, *count)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorCode;

    fn species(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_coefficients() {
        let r = parse_reaction("2 A + B > C", &species(&["A", "B", "C"])).unwrap();
        assert_eq!(
            vec![
                ("A".to_owned(), -2.0),
                ("B".to_owned(), -1.0),
                ("C".to_owned(), 1.0)
            ],
            r.participants
        );

        let table = stoichiometry(&[r]);
        assert_eq!(3, table.len());
        let (index, value) = &table[0];
        assert_eq!(
            ParameterIndex::scalar("Stoichiometric_Coefficient")
                .with_reaction("2 A + B > C")
                .with_species("A"),
            *index
        );
        assert_eq!(-2.0, *value);
    }

    #[test]
    fn test_compact_and_catalytic() {
        let decl = species(&["H2", "O2", "H2O", "Pt"]);
        let r = parse_reaction("2H2 + O2 + Pt -> 2 H2O + Pt", &decl).unwrap();
        assert_eq!(Some(-2.0), r.coefficient("H2"));
        assert_eq!(Some(2.0), r.coefficient("H2O"));
        assert_eq!(Some(0.0), r.coefficient("Pt"));
        assert!(!r.involves("N2"));
    }

    #[test]
    fn test_errors() {
        let decl = species(&["A", "B"]);
        for bad in ["A + B", "A > B > A", " > B", "A + > B"] {
            let err = parse_reaction(bad, &decl).unwrap_err();
            assert_eq!(ErrorCode::BadReaction, err.code, "{bad}");
            assert!(err.is_configuration_error());
        }
        let err = parse_reaction("A > Z", &decl).unwrap_err();
        assert_eq!(ErrorCode::UnknownSpecies, err.code);
    }
}
