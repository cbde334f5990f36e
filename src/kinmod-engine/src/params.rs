// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::{Error, ErrorCode, ErrorKind, Result};
use crate::datamodel::{ModelContext, OntologySnapshot, ParameterIndex, ParameterValue, Variable};
use crate::dimensions::{IndexShape, Topology};
use crate::laws::{ActiveModel, Definition};
use crate::reaction::{STOICHIOMETRIC_COEFFICIENT, stoichiometry};
use crate::units::rescale_value;

/// one row of a serialized parameter table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub index: ParameterIndex,
    pub value: Option<ParameterValue>,
}

/// ParameterTable maps every input scalar of a model to its value.
/// Operation parameters and initial states may still be unvalued; the
/// caller assigns them before running the program.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterTable {
    entries: BTreeMap<ParameterIndex, Option<ParameterValue>>,
}

impl ParameterTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: &ParameterIndex) -> Option<&Option<ParameterValue>> {
        self.entries.get(index)
    }

    pub fn contains(&self, index: &ParameterIndex) -> bool {
        self.entries.contains_key(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParameterIndex, &Option<ParameterValue>)> {
        self.entries.iter()
    }

    /// entries_for lists the entries of one parameter, in index order
    pub fn entries_for<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = (&'a ParameterIndex, &'a Option<ParameterValue>)> + 'a {
        self.entries.iter().filter(move |(index, _)| index.name == name)
    }

    pub fn to_entries(&self) -> Vec<TableEntry> {
        self.entries
            .iter()
            .map(|(index, value)| TableEntry {
                index: index.clone(),
                value: value.clone(),
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_entries())?)
    }

    fn insert(&mut self, index: ParameterIndex, value: Option<ParameterValue>) {
        self.entries.insert(index, value);
    }
}

fn missing_value(index: &ParameterIndex) -> Error {
    Error::new(
        ErrorKind::Configuration,
        ErrorCode::MissingValue,
        Some(format!("no value for {index}")),
    )
}

/// a leaf may stay unvalued until the caller runs the program
fn is_nullable(var: &Variable, definition: &Definition) -> bool {
    var.is_operation_parameter() || matches!(definition, Definition::State { .. })
}

/// build_parameter_table expands every input variable of the closure over
/// the index points its dimensions have in this topology.
pub fn build_parameter_table(
    snapshot: &OntologySnapshot,
    context: &ModelContext,
    topology: &Topology,
    model: &ActiveModel,
) -> Result<ParameterTable> {
    let mut table = ParameterTable::default();

    for (name, definition) in model.definitions.iter() {
        let in_table = matches!(definition, Definition::Leaf | Definition::State { .. });
        if !in_table || name == STOICHIOMETRIC_COEFFICIENT {
            continue;
        }
        let var = snapshot.get_variable(name)?;
        let shape = IndexShape::from_dims(&var.dims)?;
        let value = var.fixed_value.map(ParameterValue::Scalar);
        for point in topology.expand(shape) {
            table.insert(topology.parameter_index(name, &point), value.clone());
        }
    }

    if model.definitions.contains_key(STOICHIOMETRIC_COEFFICIENT) {
        for (index, coefficient) in stoichiometry(&topology.reactions) {
            table.insert(index, Some(ParameterValue::Scalar(coefficient)));
        }
    }

    for known in context.known_values.iter() {
        if table.contains(&known.index) {
            table.insert(known.index.clone(), Some(known.value.clone()));
        } else {
            log::warn!("ignoring known value for {}: not a model input", known.index);
        }
    }

    // rescale to standard units, then insist on a value for everything
    // the caller isn't expected to fill in
    let mut entries = BTreeMap::new();
    for (index, value) in table.entries.into_iter() {
        if index.name == STOICHIOMETRIC_COEFFICIENT {
            entries.insert(index, value);
            continue;
        }
        let var = snapshot.get_variable(&index.name)?;
        let unit = var.unit.as_deref().and_then(|u| snapshot.get_unit(u));
        let value = value.map(|v| rescale_value(v, unit));
        if value.is_none() && !is_nullable(var, &model.definitions[&index.name]) {
            return Err(missing_value(&index));
        }
        entries.insert(index, value);
    }

    log::debug!("parameter table has {} entries", entries.len());
    Ok(ParameterTable { entries })
}
