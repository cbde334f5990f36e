// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The index space of a model.  A variable's dimension set maps onto one
//! [`IndexShape`]; the shape knows which concrete index points exist for
//! a given [`Topology`] and how a dense array over it is laid out.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use smallvec::{SmallVec, smallvec};

use crate::common::Result;
use crate::config_err;
use crate::datamodel::{Basic, Composition, Dimension, ParameterIndex};
use crate::formula::CompiledExpression;
use crate::reaction::{Reaction, parse_reaction};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhaseKind {
    Gas,
    Solid,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PhaseKind::Gas => write!(f, "gas"),
            PhaseKind::Solid => write!(f, "solid"),
        }
    }
}

/// IndexShape is every dimension combination the assembler knows how to
/// lay out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexShape {
    Scalar,
    Species,
    Stream,
    Reaction,
    StreamSpecies,
    ReactionSpecies,
    StreamReaction,
    StreamReactionSpecies,
    Phase(PhaseKind),
    PhaseSpecies(PhaseKind),
    PhaseStream(PhaseKind),
    PhaseStreamSpecies(PhaseKind),
}

/// one axis of a dense array, listed in precedence order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Axis {
    Phase(PhaseKind),
    Stream,
    Reaction,
    Species,
}

pub type Axes = SmallVec<[Axis; 4]>;

impl IndexShape {
    pub fn from_dims(dims: &BTreeSet<Dimension>) -> Result<IndexShape> {
        use IndexShape::*;
        let has = |d| dims.contains(&d);
        let key = (
            has(Dimension::Gas),
            has(Dimension::Solid),
            has(Dimension::Stream),
            has(Dimension::Reaction),
            has(Dimension::Species),
        );
        let shape = match key {
            (false, false, false, false, false) => Scalar,
            (false, false, false, false, true) => Species,
            (false, false, true, false, false) => Stream,
            (false, false, false, true, false) => Reaction,
            (false, false, true, false, true) => StreamSpecies,
            (false, false, false, true, true) => ReactionSpecies,
            (false, false, true, true, false) => StreamReaction,
            (false, false, true, true, true) => StreamReactionSpecies,
            (true, false, false, false, false) => Phase(PhaseKind::Gas),
            (false, true, false, false, false) => Phase(PhaseKind::Solid),
            (true, false, false, false, true) => PhaseSpecies(PhaseKind::Gas),
            (false, true, false, false, true) => PhaseSpecies(PhaseKind::Solid),
            (true, false, true, false, false) => PhaseStream(PhaseKind::Gas),
            (false, true, true, false, false) => PhaseStream(PhaseKind::Solid),
            (true, false, true, false, true) => PhaseStreamSpecies(PhaseKind::Gas),
            (false, true, true, false, true) => PhaseStreamSpecies(PhaseKind::Solid),
            (true, true, _, _, _) | (true, false, _, true, _) | (false, true, _, true, _) => {
                let dims: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
                return config_err!(
                    UnsupportedDimensions,
                    format!("no layout for dimensions {{{}}}", dims.join(", "))
                );
            }
        };
        Ok(shape)
    }

    /// axes of a dense array of this shape, in precedence order
    pub fn axes(self) -> Axes {
        use IndexShape::*;
        match self {
            Scalar => SmallVec::new(),
            Species => smallvec![Axis::Species],
            Stream => smallvec![Axis::Stream],
            Reaction => smallvec![Axis::Reaction],
            StreamSpecies => smallvec![Axis::Stream, Axis::Species],
            ReactionSpecies => smallvec![Axis::Reaction, Axis::Species],
            StreamReaction => smallvec![Axis::Stream, Axis::Reaction],
            StreamReactionSpecies => smallvec![Axis::Stream, Axis::Reaction, Axis::Species],
            Phase(k) => smallvec![Axis::Phase(k)],
            PhaseSpecies(k) => smallvec![Axis::Phase(k), Axis::Species],
            PhaseStream(k) => smallvec![Axis::Phase(k), Axis::Stream],
            PhaseStreamSpecies(k) => smallvec![Axis::Phase(k), Axis::Stream, Axis::Species],
        }
    }

    pub fn is_scalar(self) -> bool {
        self == IndexShape::Scalar
    }

    pub fn phase(self) -> Option<PhaseKind> {
        match self {
            IndexShape::Phase(k)
            | IndexShape::PhaseSpecies(k)
            | IndexShape::PhaseStream(k)
            | IndexShape::PhaseStreamSpecies(k) => Some(k),
            _ => None,
        }
    }

    pub fn has_reaction(self) -> bool {
        self.axes().contains(&Axis::Reaction)
    }
}

/// IndexPoint is one concrete position in the index space, as zero-based
/// positions into the topology's lists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexPoint {
    pub phase: Option<(PhaseKind, usize)>,
    pub stream: Option<usize>,
    pub reaction: Option<usize>,
    pub species: Option<usize>,
}

impl IndexPoint {
    pub fn coordinate(&self, axis: Axis) -> Option<usize> {
        match axis {
            Axis::Phase(k) => self.phase.filter(|(kind, _)| *kind == k).map(|(_, i)| i),
            Axis::Stream => self.stream,
            Axis::Reaction => self.reaction,
            Axis::Species => self.species,
        }
    }
}

/// a named member of the topology together with the species it holds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    /// positions into [`Topology::species`]
    pub species: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Topology {
    pub species: Vec<String>,
    pub reactions: Vec<Reaction>,
    pub streams: Vec<Group>,
    pub gases: Vec<Group>,
    pub solids: Vec<Group>,
}

fn groups(species: &[String], map: &BTreeMap<String, Composition>) -> Vec<Group> {
    map.iter()
        .map(|(name, composition)| {
            let mut members: Vec<usize> = composition
                .species
                .iter()
                .filter_map(|s| species.iter().position(|decl| decl == s))
                .collect();
            members.sort_unstable();
            members.dedup();
            Group {
                name: name.clone(),
                species: members,
            }
        })
        .collect()
}

impl Topology {
    pub fn new(basic: &Basic) -> Result<Self> {
        let reactions = basic
            .reactions
            .iter()
            .map(|r| parse_reaction(r, &basic.species))
            .collect::<Result<Vec<_>>>()?;
        Ok(Topology {
            species: basic.species.clone(),
            reactions,
            streams: groups(&basic.species, &basic.streams),
            gases: groups(&basic.species, &basic.gases),
            solids: groups(&basic.species, &basic.solids),
        })
    }

    pub fn phases(&self, kind: PhaseKind) -> &[Group] {
        match kind {
            PhaseKind::Gas => &self.gases,
            PhaseKind::Solid => &self.solids,
        }
    }

    pub fn has_phase(&self, kind: PhaseKind) -> bool {
        !self.phases(kind).is_empty()
    }

    /// extent is the full length of an axis, independent of membership
    pub fn extent(&self, axis: Axis) -> usize {
        match axis {
            Axis::Phase(k) => self.phases(k).len(),
            Axis::Stream => self.streams.len(),
            Axis::Reaction => self.reactions.len(),
            Axis::Species => self.species.len(),
        }
    }

    pub fn extents(&self, shape: IndexShape) -> SmallVec<[usize; 4]> {
        shape.axes().iter().map(|a| self.extent(*a)).collect()
    }

    fn reaction_species(&self, r: usize) -> Vec<usize> {
        self.reactions[r]
            .participants
            .iter()
            .filter_map(|(s, _)| self.species.iter().position(|decl| decl == s))
            .collect()
    }

    /// expand lists every index point of `shape` that exists in this
    /// topology, following actual membership: a stream only carries the
    /// species of its composition, a reaction only its participants.
    pub fn expand(&self, shape: IndexShape) -> Vec<IndexPoint> {
        use IndexShape::*;
        let all = |n: usize| 0..n;
        let mut points = vec![];
        match shape {
            Scalar => points.push(IndexPoint::default()),
            Species => {
                for sp in all(self.species.len()) {
                    points.push(IndexPoint {
                        species: Some(sp),
                        ..Default::default()
                    });
                }
            }
            Stream => {
                for st in all(self.streams.len()) {
                    points.push(IndexPoint {
                        stream: Some(st),
                        ..Default::default()
                    });
                }
            }
            Reaction => {
                for r in all(self.reactions.len()) {
                    points.push(IndexPoint {
                        reaction: Some(r),
                        ..Default::default()
                    });
                }
            }
            StreamSpecies => {
                for (st, stream) in self.streams.iter().enumerate() {
                    for sp in stream.species.iter() {
                        points.push(IndexPoint {
                            stream: Some(st),
                            species: Some(*sp),
                            ..Default::default()
                        });
                    }
                }
            }
            ReactionSpecies => {
                for r in all(self.reactions.len()) {
                    for sp in self.reaction_species(r) {
                        points.push(IndexPoint {
                            reaction: Some(r),
                            species: Some(sp),
                            ..Default::default()
                        });
                    }
                }
            }
            StreamReaction => {
                for st in all(self.streams.len()) {
                    for r in all(self.reactions.len()) {
                        points.push(IndexPoint {
                            stream: Some(st),
                            reaction: Some(r),
                            ..Default::default()
                        });
                    }
                }
            }
            StreamReactionSpecies => {
                for (st, stream) in self.streams.iter().enumerate() {
                    for r in all(self.reactions.len()) {
                        for sp in self.reaction_species(r) {
                            if stream.species.contains(&sp) {
                                points.push(IndexPoint {
                                    stream: Some(st),
                                    reaction: Some(r),
                                    species: Some(sp),
                                    ..Default::default()
                                });
                            }
                        }
                    }
                }
            }
            Phase(k) => {
                for p in all(self.phases(k).len()) {
                    points.push(IndexPoint {
                        phase: Some((k, p)),
                        ..Default::default()
                    });
                }
            }
            PhaseSpecies(k) => {
                for (p, phase) in self.phases(k).iter().enumerate() {
                    for sp in phase.species.iter() {
                        points.push(IndexPoint {
                            phase: Some((k, p)),
                            species: Some(*sp),
                            ..Default::default()
                        });
                    }
                }
            }
            PhaseStream(k) => {
                for p in all(self.phases(k).len()) {
                    for st in all(self.streams.len()) {
                        points.push(IndexPoint {
                            phase: Some((k, p)),
                            stream: Some(st),
                            ..Default::default()
                        });
                    }
                }
            }
            PhaseStreamSpecies(k) => {
                for (p, phase) in self.phases(k).iter().enumerate() {
                    for (st, stream) in self.streams.iter().enumerate() {
                        for sp in phase.species.iter() {
                            if stream.species.contains(sp) {
                                points.push(IndexPoint {
                                    phase: Some((k, p)),
                                    stream: Some(st),
                                    species: Some(*sp),
                                    ..Default::default()
                                });
                            }
                        }
                    }
                }
            }
        }
        points
    }

    /// parameter_index names a point the way the parameter table and the
    /// simulation results address it.
    pub fn parameter_index(&self, name: &str, point: &IndexPoint) -> ParameterIndex {
        let mut index = ParameterIndex::scalar(name);
        if let Some((kind, p)) = point.phase {
            index = index.with_phase(&self.phases(kind)[p].name);
        }
        if let Some(st) = point.stream {
            index = index.with_stream(&self.streams[st].name);
        }
        if let Some(r) = point.reaction {
            index = index.with_reaction(&self.reactions[r].text);
        }
        if let Some(sp) = point.species {
            index = index.with_species(&self.species[sp]);
        }
        index
    }

    /// flat_offset is the row-major position of `point` in a dense array of
    /// `shape`.
    pub fn flat_offset(&self, shape: IndexShape, point: &IndexPoint) -> usize {
        let mut offset = 0;
        for axis in shape.axes() {
            offset = offset * self.extent(axis) + point.coordinate(axis).unwrap_or(0);
        }
        offset
    }
}

/// index_expr addresses `symbol` from inside an iteration at `point`:
/// axes the point fixes become literal positions, the rest select
/// everything, and trailing select-everything positions are dropped.
pub fn index_expr(symbol: &str, shape: IndexShape, point: &IndexPoint) -> String {
    let mut indices: SmallVec<[String; 4]> = shape
        .axes()
        .iter()
        .map(|axis| match point.coordinate(*axis) {
            Some(i) => i.to_string(),
            None => ":".to_owned(),
        })
        .collect();
    while indices.last().is_some_and(|i| i == ":") {
        indices.pop();
    }
    if indices.is_empty() {
        symbol.to_owned()
    } else {
        format!("{symbol}[{}]", indices.join(", "))
    }
}

/// Binding is how a formula symbol appears in generated code: the
/// program-level name and the shape of the array behind it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub shape: IndexShape,
}

/// index_fml renders a compiled formula at one iteration point, rewriting
/// every bound symbol into an indexed access.  Substitution works on the
/// expression's symbol fragments, so a symbol is never matched as the
/// prefix of a longer one.
pub fn index_fml(
    expr: &CompiledExpression,
    point: &IndexPoint,
    bindings: &BTreeMap<String, Binding>,
) -> String {
    expr.render_with(|symbol| match bindings.get(symbol) {
        Some(binding) => index_expr(&binding.name, binding.shape, point),
        None => symbol.to_owned(),
    })
}
