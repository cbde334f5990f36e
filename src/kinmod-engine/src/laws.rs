// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Active law resolution: which laws a model context switches on, which
//! variable each of them defines, and the closed set of variables the
//! generated program has to know about.

use std::collections::{BTreeMap, BTreeSet};

use crate::common::Result;
use crate::config_err;
use crate::datamodel::{Law, ModelContext, OntologySnapshot, Variable};
use crate::dimensions::{IndexShape, PhaseKind, Topology};
use crate::reaction::STOICHIOMETRIC_COEFFICIENT;

/// Definition records how a variable in the closure gets its value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Definition {
    /// an input: comes from the parameter table
    Leaf,
    /// a fixed constant, emitted as a literal
    Constant,
    /// the integration variable, the argument of `derivative`
    Independent,
    /// integrated by the solver; its table entries are initial values
    State { law: String },
    /// computed from a single law
    Derived { law: String },
    /// computed per reaction, from the law selected for each reaction
    /// (keyed by position in the topology's reaction list)
    PerReaction { laws: BTreeMap<usize, String> },
}

impl Definition {
    pub fn is_computed(&self) -> bool {
        matches!(self, Definition::Derived { .. } | Definition::PerReaction { .. })
    }

    /// every law this definition draws on
    pub fn laws(&self) -> Vec<&str> {
        match self {
            Definition::State { law } | Definition::Derived { law } => vec![law.as_str()],
            Definition::PerReaction { laws } => {
                let unique: BTreeSet<&str> = laws.values().map(|l| l.as_str()).collect();
                unique.into_iter().collect()
            }
            _ => vec![],
        }
    }
}

/// StateBlock is one integrated quantity: the main accumulation state or
/// an auxiliary gas or solid phase state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateBlock {
    pub variable: String,
    pub law: String,
    pub phase: Option<PhaseKind>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveModel {
    pub accumulation: String,
    pub integral_var: String,
    pub upper_limit: String,
    /// main state first, then the gas and solid blocks when present
    pub states: Vec<StateBlock>,
    /// the flow pattern law whose formula is integrated jointly with
    /// accumulation
    pub joint_law: Option<String>,
    pub active_laws: BTreeSet<String>,
    /// optional variables that some active law defines
    pub selected_optional: BTreeSet<String>,
    pub definitions: BTreeMap<String, Definition>,
    /// computed variables, dependencies first
    pub order: Vec<String>,
}

impl ActiveModel {
    pub fn has_reactions(&self) -> bool {
        self.definitions
            .values()
            .any(|d| matches!(d, Definition::PerReaction { .. }))
    }
}

/// laws_by_phenomenon lists the laws whose phenomenon is in `selected`.
fn laws_by_phenomenon<'a>(
    snapshot: &'a OntologySnapshot,
    selected: &[&str],
) -> Vec<(&'a str, &'a Law)> {
    for phenomenon in unmatched_phenomena(snapshot, selected) {
        log::warn!("no law describes selected phenomenon '{phenomenon}'");
    }
    snapshot
        .laws
        .iter()
        .filter(|(_, law)| {
            law.phenomenon
                .as_deref()
                .is_some_and(|p| selected.contains(&p))
        })
        .map(|(name, law)| (name.as_str(), law))
        .collect()
}

/// selected phenomena that no law in the snapshot is scoped to
fn unmatched_phenomena<'s>(snapshot: &OntologySnapshot, selected: &[&'s str]) -> Vec<&'s str> {
    selected
        .iter()
        .copied()
        .filter(|p| !p.is_empty())
        .filter(|p| {
            !snapshot
                .laws
                .values()
                .any(|law| law.phenomenon.as_deref() == Some(*p))
        })
        .collect()
}

/// law_target finds the variable that claims `law` in its law set.
fn law_target(snapshot: &OntologySnapshot, law: &str) -> Result<Option<String>> {
    let mut claimants = snapshot
        .variables
        .iter()
        .filter(|(_, var)| var.laws.contains(law))
        .map(|(name, _)| name.clone());
    let target = claimants.next();
    if let Some(other) = claimants.next() {
        return config_err!(
            ConflictingLawTarget,
            format!(
                "law '{law}' is claimed by both '{}' and '{other}'",
                target.unwrap_or_default()
            )
        );
    }
    Ok(target)
}

/// associated_law picks the single auxiliary law of one phase reachable
/// from the active mass-transport laws.
fn associated_law<'a>(
    transport: &[(&'a str, &'a Law)],
    kind: PhaseKind,
) -> Result<Option<&'a str>> {
    let reachable: BTreeSet<&str> = transport
        .iter()
        .filter_map(|(_, law)| match kind {
            PhaseKind::Gas => law.associated_gas_law.as_deref(),
            PhaseKind::Solid => law.associated_solid_law.as_deref(),
        })
        .collect();
    if reachable.len() > 1 {
        let names: Vec<&str> = reachable.into_iter().collect();
        return config_err!(
            ConflictingAssociatedLaw,
            format!("{kind} phase laws {} are all associated", names.join(", "))
        );
    }
    Ok(reachable.into_iter().next())
}

struct Resolver<'a> {
    snapshot: &'a OntologySnapshot,
    context: &'a ModelContext,
    /// active phenomenon laws by the variable they define
    phenomenon_targets: BTreeMap<String, BTreeSet<String>>,
    /// per reaction position, the laws active for that reaction
    reaction_laws: BTreeMap<usize, BTreeSet<String>>,
    state_laws: BTreeMap<String, String>,
    active_laws: BTreeSet<String>,
}

impl<'a> Resolver<'a> {
    fn activate(&mut self, name: &str, law: &Law) -> Result<()> {
        self.active_laws.insert(name.to_owned());
        if let Some(state) = law.differential_var.as_ref() {
            self.state_laws.insert(state.clone(), name.to_owned());
            return Ok(());
        }
        match law_target(self.snapshot, name)? {
            Some(target) => {
                self.phenomenon_targets
                    .entry(target)
                    .or_default()
                    .insert(name.to_owned());
            }
            None if law.formula_integrated_with_accumulation.is_some() => {}
            None => {
                return config_err!(
                    UnknownVariable,
                    format!("active law '{name}' defines no variable")
                );
            }
        }
        Ok(())
    }

    fn is_selected(&self, var: &str) -> bool {
        self.phenomenon_targets.contains_key(var)
            || self.state_laws.contains_key(var)
            || self.context.description.param_law_override.contains_key(var)
    }

    /// the variables a law needs: its required variables plus whichever
    /// optional variables are selected
    fn law_inputs(&self, law: &Law) -> BTreeSet<String> {
        let mut inputs = law.vars.clone();
        inputs.extend(law.opt_vars.iter().filter(|v| self.is_selected(v)).cloned());
        inputs
    }

    fn define(&mut self, name: &str, var: &Variable) -> Result<Definition> {
        if let Some(law) = self.state_laws.get(name) {
            return Ok(Definition::State { law: law.clone() });
        }
        if var.is_constant() {
            return Ok(Definition::Constant);
        }

        if let Some(law) = self.context.description.param_law_override.get(name) {
            if !var.laws.contains(law) {
                return config_err!(
                    UnknownLaw,
                    format!("override '{law}' is not a law of '{name}'")
                );
            }
            self.snapshot.get_law(law)?;
            self.active_laws.insert(law.clone());
            return Ok(Definition::Derived { law: law.clone() });
        }

        if let Some(laws) = self.phenomenon_targets.get(name) {
            // reaction laws are chosen per reaction
            let mut per_reaction = BTreeMap::new();
            for (r, active) in self.reaction_laws.iter() {
                let mut matching = active.intersection(laws);
                if let Some(law) = matching.next() {
                    if matching.next().is_some() {
                        return config_err!(
                            AmbiguousLaw,
                            format!("several laws define '{name}' for reaction {r}")
                        );
                    }
                    per_reaction.insert(*r, law.clone());
                }
            }
            let others: Vec<&String> = laws
                .iter()
                .filter(|l| !per_reaction.values().any(|r| r == *l))
                .collect();
            return match (per_reaction.is_empty(), others.as_slice()) {
                (true, [law]) => Ok(Definition::Derived {
                    law: (*law).clone(),
                }),
                (false, []) if IndexShape::from_dims(&var.dims)?.has_reaction() => {
                    Ok(Definition::PerReaction { laws: per_reaction })
                }
                // without a reaction axis every reaction must agree
                (false, []) => {
                    let unique: BTreeSet<&String> = per_reaction.values().collect();
                    match unique.into_iter().collect::<Vec<_>>().as_slice() {
                        [law] => Ok(Definition::Derived {
                            law: (*law).clone(),
                        }),
                        _ => config_err!(
                            AmbiguousLaw,
                            format!("reactions disagree on the law defining '{name}'")
                        ),
                    }
                }
                _ => config_err!(
                    AmbiguousLaw,
                    format!("several active laws define '{name}'")
                ),
            };
        }

        let mut definitional = vec![];
        for law in var.laws.iter() {
            if self.snapshot.get_law(law)?.is_definitional() {
                definitional.push(law.clone());
            }
        }
        match definitional.len() {
            0 => Ok(Definition::Leaf),
            1 => {
                let law = definitional.remove(0);
                self.active_laws.insert(law.clone());
                Ok(Definition::Derived { law })
            }
            _ => config_err!(
                AmbiguousLaw,
                format!(
                    "'{name}' has definitional laws {} and no override",
                    definitional.join(", ")
                )
            ),
        }
    }
}

/// direct dependencies of a computed variable, limited to computed
/// variables.  A law reading its own target keeps the self edge.
fn direct_deps(
    snapshot: &OntologySnapshot,
    resolver: &Resolver,
    definitions: &BTreeMap<String, Definition>,
    name: &str,
) -> Result<BTreeSet<String>> {
    let mut deps = BTreeSet::new();
    for law in definitions[name].laws() {
        let law = snapshot.get_law(law)?;
        deps.extend(
            resolver
                .law_inputs(law)
                .into_iter()
                .filter(|v| definitions.get(v).is_some_and(|d| d.is_computed())),
        );
    }
    Ok(deps)
}

fn all_deps_inner(
    deps: &BTreeMap<String, BTreeSet<String>>,
    name: &str,
    processing: &mut BTreeSet<String>,
    order: &mut Vec<String>,
    done: &mut BTreeSet<String>,
) -> Result<()> {
    if done.contains(name) {
        return Ok(());
    }
    processing.insert(name.to_owned());
    for dep in deps[name].iter() {
        if dep == name {
            return config_err!(
                CircularDependency,
                format!("'{name}' is defined in terms of itself")
            );
        }
        if processing.contains(dep) {
            return config_err!(
                CircularDependency,
                format!("'{name}' and '{dep}' depend on each other")
            );
        }
        all_deps_inner(deps, dep, processing, order, done)?;
    }
    processing.remove(name);
    done.insert(name.to_owned());
    order.push(name.to_owned());
    Ok(())
}

/// resolve decides the active law set for a context and closes the
/// variable set over definitional laws.
pub fn resolve(
    snapshot: &OntologySnapshot,
    context: &ModelContext,
    topology: &Topology,
) -> Result<ActiveModel> {
    let description = &context.description;

    let accumulation = laws_by_phenomenon(snapshot, &[description.accumulation.as_str()]);
    let (accumulation, acc_law) = match accumulation.as_slice() {
        [(name, law)] => (*name, *law),
        [] => {
            return config_err!(
                UnsupportedAccumulation,
                format!("no law for accumulation '{}'", description.accumulation)
            );
        }
        _ => {
            return config_err!(
                UnsupportedAccumulation,
                format!("several laws for accumulation '{}'", description.accumulation)
            );
        }
    };
    let (Some(state), Some(integral_var), Some(upper_limit)) = (
        acc_law.differential_var.clone(),
        acc_law.integral_var.clone(),
        acc_law.integral_upper_limit.clone(),
    ) else {
        return config_err!(
            UnsupportedAccumulation,
            format!("accumulation law '{accumulation}' does not declare what it integrates")
        );
    };

    let mut resolver = Resolver {
        snapshot,
        context,
        phenomenon_targets: BTreeMap::new(),
        reaction_laws: BTreeMap::new(),
        state_laws: BTreeMap::new(),
        active_laws: BTreeSet::new(),
    };
    resolver.activate(accumulation, acc_law)?;

    let flow = laws_by_phenomenon(snapshot, &[description.flow_pattern.as_str()]);
    let mut joint_law = None;
    for (name, law) in flow.iter() {
        resolver.activate(name, law)?;
        if law.formula_integrated_with_accumulation.is_some() {
            if joint_law.replace(name.to_string()).is_some() {
                return config_err!(
                    UnsupportedAccumulation,
                    "several flow pattern laws integrate with accumulation".to_owned()
                );
            }
        }
    }

    let transport_names: Vec<&str> = description.mass_transport.iter().map(|s| s.as_str()).collect();
    let transport = laws_by_phenomenon(snapshot, &transport_names);
    for (name, law) in transport.iter() {
        resolver.activate(name, law)?;
    }

    let equilibrium_names: Vec<&str> = description.mass_equilibrium.iter().map(|s| s.as_str()).collect();
    for (name, law) in laws_by_phenomenon(snapshot, &equilibrium_names) {
        resolver.activate(name, law)?;
    }

    for (r, reaction) in topology.reactions.iter().enumerate() {
        let Some(phenomena) = description.reaction_phenomena.get(&reaction.text) else {
            continue;
        };
        let names: Vec<&str> = phenomena.iter().map(|s| s.as_str()).collect();
        for (name, law) in laws_by_phenomenon(snapshot, &names) {
            resolver.activate(name, law)?;
            resolver.reaction_laws.entry(r).or_default().insert(name.to_owned());
        }
    }

    // auxiliary phase laws only exist alongside the phase they describe
    let mut states = vec![StateBlock {
        variable: state.clone(),
        law: accumulation.to_owned(),
        phase: None,
    }];
    for kind in [PhaseKind::Gas, PhaseKind::Solid] {
        let Some(name) = associated_law(&transport, kind)? else {
            continue;
        };
        if !topology.has_phase(kind) {
            log::debug!("skipping {kind} law '{name}': topology has no {kind} phase");
            continue;
        }
        let law = snapshot.get_law(name)?;
        resolver.activate(name, law)?;
        if let Some(variable) = law.differential_var.clone() {
            states.push(StateBlock {
                variable,
                law: name.to_owned(),
                phase: Some(kind),
            });
        }
    }

    // seed the closure
    let mut pending: Vec<String> = vec![state, integral_var.clone(), upper_limit.clone()];
    for name in resolver.active_laws.clone() {
        let law = snapshot.get_law(&name)?;
        pending.extend(resolver.law_inputs(law));
        if let Some(v) = law.differential_var.as_ref() {
            pending.push(v.clone());
        }
    }
    pending.extend(resolver.phenomenon_targets.keys().cloned());
    if !resolver.reaction_laws.is_empty() {
        pending.push(STOICHIOMETRIC_COEFFICIENT.to_owned());
    }

    let mut definitions: BTreeMap<String, Definition> = BTreeMap::new();
    while let Some(name) = pending.pop() {
        if definitions.contains_key(&name) {
            continue;
        }
        let var = snapshot.get_variable(&name)?;
        let definition = if name == integral_var {
            Definition::Independent
        } else {
            resolver.define(&name, var)?
        };
        for law in definition.laws() {
            let law = snapshot.get_law(law)?;
            pending.extend(resolver.law_inputs(law));
        }
        definitions.insert(name, definition);
    }

    let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (name, definition) in definitions.iter() {
        if definition.is_computed() {
            deps.insert(name.clone(), direct_deps(snapshot, &resolver, &definitions, name)?);
        }
    }
    let mut order = vec![];
    let mut done = BTreeSet::new();
    for name in deps.keys() {
        let mut processing = BTreeSet::new();
        all_deps_inner(&deps, name, &mut processing, &mut order, &mut done)?;
    }

    let selected_optional = definitions
        .keys()
        .filter(|v| resolver.is_selected(v))
        .cloned()
        .collect();

    log::debug!(
        "resolved {} active laws, {} variables, {} computed",
        resolver.active_laws.len(),
        definitions.len(),
        order.len()
    );

    Ok(ActiveModel {
        accumulation: accumulation.to_owned(),
        integral_var,
        upper_limit,
        states,
        joint_law,
        active_laws: resolver.active_laws,
        selected_optional,
        definitions,
        order,
    })
}
