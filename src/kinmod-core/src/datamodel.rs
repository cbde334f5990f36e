// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Serde data model for the two per-request inputs: the ontology snapshot
//! pre-fetched from the knowledge store, and the model context built from
//! the user's phenomenon selections and process topology.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{Error, ErrorCode, ErrorKind, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dimension {
    Species,
    Reaction,
    Stream,
    Gas,
    Solid,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Dimension::Species => "Species",
            Dimension::Reaction => "Reaction",
            Dimension::Stream => "Stream",
            Dimension::Gas => "Gas",
            Dimension::Solid => "Solid",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableClass {
    Constant,
    OperationParameter,
    ModelParameter,
    StateVariable,
    IndependentVariable,
    Quantity,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub class: VariableClass,
    /// either a plain identifier (`k_La`) or a MathML fragment
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub dims: BTreeSet<Dimension>,
    #[serde(default)]
    pub laws: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_value: Option<f64>,
}

impl Variable {
    pub fn is_constant(&self) -> bool {
        self.class == VariableClass::Constant
    }

    pub fn is_operation_parameter(&self) -> bool {
        self.class == VariableClass::OperationParameter
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Law {
    pub formula: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phenomenon: Option<String>,
    #[serde(default)]
    pub vars: BTreeSet<String>,
    #[serde(default)]
    pub opt_vars: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_gas_law: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_solid_law: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integral_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integral_upper_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differential_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula_integrated_with_accumulation: Option<String>,
}

impl Law {
    /// definitional laws carry no phenomenon: they define a derived
    /// quantity wherever that quantity is needed.
    pub fn is_definitional(&self) -> bool {
        self.phenomenon.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio_to_standard: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intercept: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OntologySnapshot {
    #[serde(default)]
    pub variables: BTreeMap<String, Variable>,
    #[serde(default)]
    pub laws: BTreeMap<String, Law>,
    #[serde(default)]
    pub units: BTreeMap<String, Unit>,
}

impl OntologySnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn get_variable(&self, name: &str) -> Result<&Variable> {
        self.variables.get(name).ok_or_else(|| {
            Error::new(
                ErrorKind::Configuration,
                ErrorCode::UnknownVariable,
                Some(name.to_owned()),
            )
        })
    }

    pub fn get_law(&self, name: &str) -> Result<&Law> {
        self.laws.get(name).ok_or_else(|| {
            Error::new(
                ErrorKind::Configuration,
                ErrorCode::UnknownLaw,
                Some(name.to_owned()),
            )
        })
    }

    pub fn get_unit(&self, name: &str) -> Option<&Unit> {
        self.units.get(name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    Steady,
    Dynamic,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    #[serde(default)]
    pub species: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Basic {
    #[serde(default)]
    pub species: Vec<String>,
    #[serde(default)]
    pub reactions: Vec<String>,
    #[serde(default)]
    pub streams: BTreeMap<String, Composition>,
    #[serde(default)]
    pub gases: BTreeMap<String, Composition>,
    #[serde(default)]
    pub solids: BTreeMap<String, Composition>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    #[serde(default)]
    pub accumulation: String,
    #[serde(default)]
    pub flow_pattern: String,
    #[serde(default)]
    pub mass_transport: Vec<String>,
    #[serde(default)]
    pub mass_equilibrium: Vec<String>,
    #[serde(default)]
    pub reaction_phenomena: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub param_law_override: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnownValue {
    pub index: ParameterIndex,
    pub value: ParameterValue,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelContext {
    #[serde(default)]
    pub kind: ModelKind,
    #[serde(default)]
    pub basic: Basic,
    #[serde(default)]
    pub description: Description,
    #[serde(default)]
    pub known_values: Vec<KnownValue>,
}

impl ModelContext {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// validate checks the topology's referential closure: every species
    /// named by a stream, gas or solid must be a declared species.
    pub fn validate(&self) -> Result<()> {
        let species: BTreeSet<&str> = self.basic.species.iter().map(|s| s.as_str()).collect();
        let groups = [
            ("stream", &self.basic.streams),
            ("gas", &self.basic.gases),
            ("solid", &self.basic.solids),
        ];
        for (kind, group) in groups {
            for (name, composition) in group.iter() {
                for s in composition.species.iter() {
                    if !species.contains(s.as_str()) {
                        return Err(Error::new(
                            ErrorKind::Configuration,
                            ErrorCode::UnknownSpecies,
                            Some(format!("{kind} '{name}' references species '{s}'")),
                        ));
                    }
                }
            }
        }
        for reaction in self.description.reaction_phenomena.keys() {
            if !self.basic.reactions.contains(reaction) {
                return Err(Error::new(
                    ErrorKind::Configuration,
                    ErrorCode::BadReaction,
                    Some(format!("phenomena selected for undeclared reaction '{reaction}'")),
                ));
            }
        }
        Ok(())
    }
}

/// ParameterIndex addresses one scalar of the parameter table (and one
/// series of the simulation result).  On the wire it is the 5-element array
/// `[name, phase, stream, reaction, species]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "IndexTuple", into = "IndexTuple")]
pub struct ParameterIndex {
    pub name: String,
    pub phase: Option<String>,
    pub stream: Option<String>,
    pub reaction: Option<String>,
    pub species: Option<String>,
}

type IndexTuple = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

impl From<IndexTuple> for ParameterIndex {
    fn from((name, phase, stream, reaction, species): IndexTuple) -> Self {
        ParameterIndex {
            name,
            phase,
            stream,
            reaction,
            species,
        }
    }
}

impl From<ParameterIndex> for IndexTuple {
    fn from(index: ParameterIndex) -> Self {
        (
            index.name,
            index.phase,
            index.stream,
            index.reaction,
            index.species,
        )
    }
}

impl ParameterIndex {
    pub fn scalar(name: &str) -> Self {
        ParameterIndex {
            name: name.to_owned(),
            phase: None,
            stream: None,
            reaction: None,
            species: None,
        }
    }

    pub fn with_phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_owned());
        self
    }

    pub fn with_stream(mut self, stream: &str) -> Self {
        self.stream = Some(stream.to_owned());
        self
    }

    pub fn with_reaction(mut self, reaction: &str) -> Self {
        self.reaction = Some(reaction.to_owned());
        self
    }

    pub fn with_species(mut self, species: &str) -> Self {
        self.species = Some(species.to_owned());
        self
    }
}

impl fmt::Display for ParameterIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let part = |p: &Option<String>| p.clone().unwrap_or_else(|| "-".to_owned());
        write!(
            f,
            "({}, {}, {}, {}, {})",
            self.name,
            part(&self.phase),
            part(&self.stream),
            part(&self.reaction),
            part(&self.species)
        )
    }
}

/// ParameterValue is a scalar for steady models; dynamic models carry
/// time series for operation parameters and the integration limit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Scalar(f64),
    Series(Vec<f64>),
}

impl ParameterValue {
    pub fn map<F: Fn(f64) -> f64>(self, f: F) -> Self {
        match self {
            ParameterValue::Scalar(v) => ParameterValue::Scalar(f(v)),
            ParameterValue::Series(vs) => ParameterValue::Series(vs.into_iter().map(f).collect()),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ParameterValue::Scalar(v) => Some(*v),
            ParameterValue::Series(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_index_wire_format() {
        let index = ParameterIndex::scalar("Stoichiometric_Coefficient")
            .with_reaction("2 A + B > C")
            .with_species("A");
        let json = serde_json::to_string(&index).unwrap();
        assert_eq!(
            r#"["Stoichiometric_Coefficient",null,null,"2 A + B > C","A"]"#,
            json
        );
        let back: ParameterIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(index, back);
    }

    #[test]
    fn test_parameter_value_untagged() {
        let v: ParameterValue = serde_json::from_str("2.5").unwrap();
        assert_eq!(ParameterValue::Scalar(2.5), v);
        let v: ParameterValue = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(ParameterValue::Series(vec![1.0, 2.0]), v);
        assert_eq!(
            ParameterValue::Series(vec![3.0, 5.0]),
            v.map(|x| x * 2.0 + 1.0)
        );
    }

    #[test]
    fn test_context_defaults_and_validation() {
        let ctx = ModelContext::from_json(
            r#"{
                "basic": {
                    "species": ["A", "B"],
                    "streams": {"liquid": {"species": ["A", "B"]}},
                    "gases": {"air": {"species": ["C"]}}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(ModelKind::Steady, ctx.kind);
        assert!(ctx.known_values.is_empty());
        let err = ctx.validate().unwrap_err();
        assert_eq!(ErrorCode::UnknownSpecies, err.code);
        assert!(err.details.unwrap().contains("'air'"));
    }

    #[test]
    fn test_snapshot_lookup_errors() {
        let snapshot = OntologySnapshot::from_json(
            r#"{"variables": {"k": {"class": "model_parameter", "symbol": "k"}}}"#,
        )
        .unwrap();
        assert!(snapshot.get_variable("k").is_ok());
        assert!(snapshot.get_variable("k").unwrap().dims.is_empty());
        let err = snapshot.get_law("Arrhenius").unwrap_err();
        assert_eq!(ErrorCode::UnknownLaw, err.code);
        assert_eq!(ErrorKind::Configuration, err.kind);
    }
}
