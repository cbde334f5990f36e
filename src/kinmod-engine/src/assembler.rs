// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The model assembler: resolves the active laws of a model context,
//! builds its parameter table and emits a self-contained Python program
//! exposing `simulate(parameter_table)`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::codegen::{ProgramBuilder, py_float, py_ident, py_index, py_shape, py_str};
use crate::common::{Error, ErrorCode, ErrorKind, Result};
use crate::config_err;
use crate::datamodel::{ModelContext, ModelKind, OntologySnapshot, ParameterIndex, Variable};
use crate::dimensions::{Binding, IndexPoint, IndexShape, Topology, index_expr, index_fml};
use crate::formula::{self, CompiledExpression};
use crate::laws::{self, ActiveModel, Definition};
use crate::params::{ParameterTable, build_parameter_table};
use crate::reaction::STOICHIOMETRIC_COEFFICIENT;
use crate::units::rescale;

const FLUX_SUFFIX: &str = "_Flux";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerOptions {
    /// `solve_ivp` integration method
    pub method: String,
    pub rtol: f64,
    pub atol: f64,
    pub bvp_mesh_points: usize,
    pub bvp_tol: f64,
    /// result key name for the independent variable, defaulting to the
    /// integration variable's own name
    pub independent_key: Option<String>,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        AssemblerOptions {
            method: "LSODA".to_owned(),
            rtol: 1e-6,
            atol: 1e-9,
            bvp_mesh_points: 50,
            bvp_tol: 1e-3,
            independent_key: None,
        }
    }
}

/// SimulationProgram is the assembler's output: program text, the table
/// of inputs it reads, and the keys of the result dictionary it returns.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationProgram {
    pub source: String,
    pub parameter_table: ParameterTable,
    pub result_keys: Vec<ParameterIndex>,
}

/// one integrated block of the flat state vector
struct StateLayout {
    variable: String,
    law: String,
    name: String,
    shape: IndexShape,
    extents: SmallVec<[usize; 4]>,
    joint: bool,
    offset: usize,
}

impl StateLayout {
    fn size(&self) -> usize {
        self.extents.iter().product()
    }

    fn len(&self) -> usize {
        if self.joint { 2 * self.size() } else { self.size() }
    }

    /// extents of the block as stored, with the flux half appended along
    /// the last axis
    fn stored_extents(&self) -> SmallVec<[usize; 4]> {
        let mut extents = self.extents.clone();
        if self.joint {
            if let Some(last) = extents.last_mut() {
                *last *= 2;
            }
        }
        extents
    }

    /// positions of a point's state (and flux) in the flat vector
    fn positions(&self, topology: &Topology, point: &IndexPoint) -> (usize, Option<usize>) {
        let axes = self.shape.axes();
        let Some((last, leading)) = axes.split_last() else {
            return (self.offset, self.joint.then_some(self.offset + 1));
        };
        let mut pos = 0;
        for axis in leading {
            pos = pos * topology.extent(*axis) + point.coordinate(*axis).unwrap_or(0);
        }
        let n = topology.extent(*last);
        let coord = point.coordinate(*last).unwrap_or(0);
        if self.joint {
            let pos = self.offset + pos * 2 * n + coord;
            (pos, Some(pos + n))
        } else {
            (self.offset + pos * n + coord, None)
        }
    }
}

struct Emitter<'a> {
    snapshot: &'a OntologySnapshot,
    context: &'a ModelContext,
    options: &'a AssemblerOptions,
    topology: &'a Topology,
    model: &'a ActiveModel,
    bindings: BTreeMap<String, Binding>,
    /// variable name to formula symbol
    symbols: BTreeMap<String, String>,
    formulas: BTreeMap<String, CompiledExpression>,
    states: Vec<StateLayout>,
}

fn duplicate_symbol(symbol: &str, var: &str) -> Error {
    Error::new(
        ErrorKind::Configuration,
        ErrorCode::DuplicateSymbol,
        Some(format!("'{var}' is written '{symbol}', which is already taken")),
    )
}

fn shape_of(name: &str, var: &Variable) -> Result<IndexShape> {
    if name == STOICHIOMETRIC_COEFFICIENT {
        Ok(IndexShape::ReactionSpecies)
    } else {
        IndexShape::from_dims(&var.dims)
    }
}

impl<'a> Emitter<'a> {
    fn new(
        snapshot: &'a OntologySnapshot,
        context: &'a ModelContext,
        options: &'a AssemblerOptions,
        topology: &'a Topology,
        model: &'a ActiveModel,
    ) -> Result<Self> {
        let mut emitter = Emitter {
            snapshot,
            context,
            options,
            topology,
            model,
            bindings: BTreeMap::new(),
            symbols: BTreeMap::new(),
            formulas: BTreeMap::new(),
            states: vec![],
        };
        emitter.bind_variables()?;
        emitter.layout_states()?;
        emitter.compile_formulas()?;
        Ok(emitter)
    }

    fn is_dynamic(&self) -> bool {
        self.context.kind == ModelKind::Dynamic
    }

    fn is_bvp(&self) -> bool {
        self.model.joint_law.is_some()
    }

    fn bind(&mut self, symbol: String, var: &str, binding: Binding) -> Result<()> {
        if self.bindings.contains_key(&symbol) {
            return Err(duplicate_symbol(&symbol, var));
        }
        if self.bindings.values().any(|b| b.name == binding.name) {
            return Err(duplicate_symbol(&binding.name, var));
        }
        self.symbols.insert(var.to_owned(), symbol.clone());
        self.bindings.insert(symbol, binding);
        Ok(())
    }

    fn bind_variables(&mut self) -> Result<()> {
        let (model, snapshot) = (self.model, self.snapshot);
        for name in model.definitions.keys() {
            let var = snapshot.get_variable(name)?;
            let symbol = formula::symbol_name(&var.symbol)?;
            let binding = Binding {
                name: py_ident(&symbol),
                shape: shape_of(name, var)?,
            };
            self.bind(symbol, name, binding)?;
        }
        Ok(())
    }

    fn layout_states(&mut self) -> Result<()> {
        let model = self.model;
        let mut offset = 0;
        for (i, block) in model.states.iter().enumerate() {
            let symbol = self.symbols[&block.variable].clone();
            let binding = self.bindings[&symbol].clone();
            // only the main accumulation state carries a flux half
            let joint = i == 0 && self.is_bvp();
            let layout = StateLayout {
                variable: block.variable.clone(),
                law: block.law.clone(),
                name: binding.name.clone(),
                shape: binding.shape,
                extents: self.topology.extents(binding.shape),
                joint,
                offset,
            };
            offset += layout.len();
            if joint {
                let flux = Binding {
                    name: format!("{}{FLUX_SUFFIX}", binding.name),
                    shape: binding.shape,
                };
                let flux_var = format!("{}{FLUX_SUFFIX}", block.variable);
                self.bind(format!("{symbol}{FLUX_SUFFIX}"), &flux_var, flux)?;
            }
            self.states.push(layout);
        }
        Ok(())
    }

    /// compile_law compiles one law formula down to its value side,
    /// resolving optional brackets against the selected variables.
    fn compile_law(&self, law_name: &str, markup: &str) -> Result<CompiledExpression> {
        let law = self.snapshot.get_law(law_name)?;
        let tree = formula::parse(markup)?;
        let (_, value) = formula::split_assignment(&tree);

        let mut unselected = BTreeSet::new();
        for var in law.opt_vars.iter() {
            if !self.model.selected_optional.contains(var) {
                let var = self.snapshot.get_variable(var)?;
                unselected.insert(formula::symbol_name(&var.symbol)?);
            }
        }
        let keep = |symbols: &BTreeSet<String>| symbols.is_disjoint(&unselected);
        let value = formula::prune_optional(&value, &keep)?;

        let expr = formula::compile_node(&value, "")?;
        if let Some(symbol) = expr
            .free_symbols
            .iter()
            .find(|s| !self.bindings.contains_key(*s))
        {
            return config_err!(
                UnknownSymbol,
                format!("'{symbol}' in law '{law_name}' is not a model variable")
            );
        }
        Ok(expr)
    }

    fn compile_formulas(&mut self) -> Result<()> {
        let model = self.model;
        let mut laws: BTreeSet<&str> = BTreeSet::new();
        for name in model.order.iter() {
            laws.extend(model.definitions[name].laws());
        }
        for block in model.states.iter() {
            laws.insert(block.law.as_str());
        }
        for name in laws {
            let law = self.snapshot.get_law(name)?;
            let expr = self.compile_law(name, &law.formula)?;
            self.formulas.insert(name.to_owned(), expr);
        }
        if let Some(name) = model.joint_law.as_ref() {
            let law = self.snapshot.get_law(name)?;
            let markup = law.formula_integrated_with_accumulation.as_deref().unwrap_or_default();
            let expr = self.compile_law(name, markup)?;
            self.formulas.insert(format!("{name}{FLUX_SUFFIX}"), expr);
        }
        for name in model.order.iter() {
            let symbol = &self.symbols[name];
            for law in model.definitions[name].laws() {
                if self.formulas[law].free_symbols.contains(symbol) {
                    return config_err!(
                        CircularDependency,
                        format!("law '{law}' defines '{name}' in terms of itself")
                    );
                }
            }
        }
        Ok(())
    }

    fn binding_of(&self, var: &str) -> &Binding {
        &self.bindings[&self.symbols[var]]
    }

    /// interpolated lists the operation parameters that follow the time
    /// series in dynamic mode
    fn interpolated(&self) -> Result<Vec<&str>> {
        let mut names = vec![];
        if !self.is_dynamic() {
            return Ok(names);
        }
        for (name, definition) in self.model.definitions.iter() {
            let var = self.snapshot.get_variable(name)?;
            if *definition == Definition::Leaf
                && var.is_operation_parameter()
                && var.unit.is_none()
                && *name != self.model.upper_limit
                && self.binding_of(name).shape.is_scalar()
            {
                names.push(name.as_str());
            }
        }
        Ok(names)
    }

    fn emit_constants(&self, b: &mut ProgramBuilder) -> Result<()> {
        for (name, definition) in self.model.definitions.iter() {
            if *definition != Definition::Constant {
                continue;
            }
            let var = self.snapshot.get_variable(name)?;
            let Some(value) = var.fixed_value else {
                return config_err!(MissingValue, format!("constant '{name}' has no value"));
            };
            let unit = var.unit.as_deref().and_then(|u| self.snapshot.get_unit(u));
            let value = py_float(unit.map_or(value, |u| rescale(value, u)));
            let binding = self.binding_of(name);
            if binding.shape.is_scalar() {
                b.line(format!("{} = {value}", binding.name));
            } else {
                let extents = self.topology.extents(binding.shape);
                b.line(format!("{} = np.full({}, {value})", binding.name, py_shape(&extents)));
            }
        }
        Ok(())
    }

    fn unpack(&self, b: &mut ProgramBuilder, target: &str, name: &str, shape: IndexShape) {
        if shape.is_scalar() {
            let index = ParameterIndex::scalar(name);
            b.line(format!("{target} = _value(parameter_table, {})", py_index(&index)));
            return;
        }
        let extents = self.topology.extents(shape);
        b.line(format!("{target} = np.zeros({})", py_shape(&extents)));
        for point in self.topology.expand(shape) {
            let index = self.topology.parameter_index(name, &point);
            b.line(format!(
                "{} = _value(parameter_table, {})",
                index_expr(target, shape, &point),
                py_index(&index)
            ));
        }
    }

    fn emit_inputs(&self, b: &mut ProgramBuilder) {
        for (name, definition) in self.model.definitions.iter() {
            if *definition == Definition::Leaf {
                let binding = self.binding_of(name);
                self.unpack(b, &binding.name, name, binding.shape);
            }
        }
        for state in self.states.iter() {
            self.unpack(b, &format!("_y0_{}", state.name), &state.variable, state.shape);
        }
    }

    fn emit_interpolation(&self, b: &mut ProgramBuilder) -> Result<()> {
        let upper = &self.binding_of(&self.model.upper_limit).name;
        b.line(format!("_T = np.atleast_1d(np.asarray({upper}, dtype=float))"))
            .line("if _T.size < 2:")
            .indent()
            .line("return None")
            .dedent();
        for name in self.interpolated()? {
            let py = &self.binding_of(name).name;
            b.line(format!(
                "_interp_{py} = interp1d(_T, np.broadcast_to(np.asarray({py}, dtype=float), _T.shape), fill_value='extrapolate')"
            ));
        }
        Ok(())
    }

    fn emit_initial_state(&self, b: &mut ProgramBuilder) {
        let parts: Vec<String> = self
            .states
            .iter()
            .map(|s| {
                let init = format!("_y0_{}", s.name);
                match (s.joint, s.extents.is_empty()) {
                    (false, _) => format!("np.ravel({init})"),
                    (true, true) => format!("np.array([{init}, 0.0])"),
                    (true, false) => {
                        format!("np.concatenate([{init}, np.zeros_like({init})], axis=-1).ravel()")
                    }
                }
            })
            .collect();
        b.line(format!(
            "_y0 = np.asarray(np.concatenate([{}]), dtype=float)",
            parts.join(", ")
        ));
    }

    fn emit_state_views(&self, b: &mut ProgramBuilder) {
        for s in self.states.iter() {
            let (start, end) = (s.offset, s.offset + s.len());
            match (s.joint, s.extents.is_empty()) {
                (false, true) => {
                    b.line(format!("{} = _y[{start}]", s.name));
                }
                (false, false) => {
                    b.line(format!(
                        "{} = _y[{start}:{end}].reshape({})",
                        s.name,
                        py_shape(&s.extents)
                    ));
                }
                (true, true) => {
                    b.line(format!("{} = _y[{start}]", s.name)).line(format!(
                        "{}{FLUX_SUFFIX} = _y[{}]",
                        s.name,
                        start + 1
                    ));
                }
                (true, false) => {
                    let n = s.extents[s.extents.len() - 1];
                    b.line(format!(
                        "_block_{} = _y[{start}:{end}].reshape({})",
                        s.name,
                        py_shape(&s.stored_extents())
                    ))
                    .line(format!("{0} = _block_{0}[..., :{n}]", s.name))
                    .line(format!("{0}{FLUX_SUFFIX} = _block_{0}[..., {n}:]", s.name));
                }
            }
        }
    }

    /// emit_assignments writes `target` over every index point of `shape`,
    /// taking the formula for each point from `formula_at`.
    fn emit_assignments<'f, F>(
        &self,
        b: &mut ProgramBuilder,
        target: &str,
        shape: IndexShape,
        formula_at: F,
    ) where
        F: Fn(&IndexPoint) -> Option<&'f str>,
    {
        if shape.is_scalar() {
            let point = IndexPoint::default();
            let code = formula_at(&point)
                .map(|law| index_fml(&self.formulas[law], &point, &self.bindings))
                .unwrap_or_else(|| "0.0".to_owned());
            b.line(format!("{target} = {code}"));
            return;
        }
        let extents = self.topology.extents(shape);
        b.line(format!("{target} = np.zeros({})", py_shape(&extents)));
        for point in self.topology.expand(shape) {
            if let Some(law) = formula_at(&point) {
                b.line(format!(
                    "{} = {}",
                    index_expr(target, shape, &point),
                    index_fml(&self.formulas[law], &point, &self.bindings)
                ));
            }
        }
    }

    fn emit_derivative(&self, b: &mut ProgramBuilder) -> Result<()> {
        b.line("def derivative(_t, _y):").indent();
        b.line(format!("{} = _t", self.binding_of(&self.model.integral_var).name));
        for name in self.interpolated()? {
            let py = &self.binding_of(name).name;
            b.line(format!("{py} = float(_interp_{py}(_t))"));
        }
        self.emit_state_views(b);

        let model = self.model;
        for name in model.order.iter() {
            let binding = self.binding_of(name);
            match &model.definitions[name] {
                Definition::Derived { law } => {
                    self.emit_assignments(b, &binding.name, binding.shape, |_| Some(law.as_str()));
                }
                Definition::PerReaction { laws } => {
                    self.emit_assignments(b, &binding.name, binding.shape, |point| {
                        point
                            .reaction
                            .and_then(|r| laws.get(&r))
                            .map(|l| l.as_str())
                    });
                }
                _ => {}
            }
        }

        let mut parts = vec![];
        for s in self.states.iter() {
            let target = format!("_d_{}", s.name);
            if s.joint {
                let flux_key = format!("{}{FLUX_SUFFIX}", model.joint_law.as_deref().unwrap_or_default());
                let flux_formula = self.formulas.get_key_value(&flux_key).map(|(k, _)| k.as_str());
                b.line(format!("{target} = {}{FLUX_SUFFIX}", s.name));
                self.emit_assignments(b, &format!("{target}{FLUX_SUFFIX}"), s.shape, |_| flux_formula);
                if s.extents.is_empty() {
                    parts.push(format!("np.array([{target}, {target}{FLUX_SUFFIX}])"));
                } else {
                    parts.push(format!(
                        "np.concatenate([{target}, {target}{FLUX_SUFFIX}], axis=-1).ravel()"
                    ));
                }
            } else {
                let law = s.law.as_str();
                self.emit_assignments(b, &target, s.shape, |_| Some(law));
                parts.push(format!("np.ravel({target})"));
            }
        }
        b.line(format!("return np.concatenate([{}])", parts.join(", ")))
            .dedent();
        Ok(())
    }

    fn solver_failed(b: &mut ProgramBuilder) {
        b.line("if not sol.success or not np.all(np.isfinite(sol.y)):")
            .indent()
            .line("return None")
            .dedent();
    }

    fn emit_ivp(&self, b: &mut ProgramBuilder) {
        let upper = &self.binding_of(&self.model.upper_limit).name;
        let o = self.options;
        b.line(format!(
            "sol = solve_ivp(derivative, (0.0, float({upper})), _y0, method={}, rtol={}, atol={})",
            py_str(&o.method),
            py_float(o.rtol),
            py_float(o.atol)
        ));
        Self::solver_failed(b);
        b.line("_times, _Y = sol.t, sol.y");
    }

    fn emit_segments(&self, b: &mut ProgramBuilder) {
        let o = self.options;
        b.line("_y = _y0")
            .line("_times = [_T[:1]]")
            .line("_Ys = [_y0[:, None]]")
            .line("for _i in range(_T.size - 1):")
            .indent()
            .line(format!(
                "sol = solve_ivp(derivative, (_T[_i], _T[_i + 1]), _y, method={}, rtol={}, atol={})",
                py_str(&o.method),
                py_float(o.rtol),
                py_float(o.atol)
            ));
        Self::solver_failed(b);
        b.line("_times.append(sol.t[1:])")
            .line("_Ys.append(sol.y[:, 1:])")
            .line("_y = sol.y[:, -1]")
            .dedent()
            .line("_times = np.concatenate(_times)")
            .line("_Y = np.concatenate(_Ys, axis=1)");
    }

    fn emit_bvp(&self, b: &mut ProgramBuilder) {
        let upper = &self.binding_of(&self.model.upper_limit).name;
        let o = self.options;
        b.line("_is_state = np.ones(_y0.size, dtype=bool)");
        for s in self.states.iter().filter(|s| s.joint) {
            if s.extents.is_empty() {
                b.line(format!("_is_state[{}] = False", s.offset + 1));
            } else {
                let extents = py_shape(&s.extents);
                b.line(format!(
                    "_is_state[{}:{}] = np.concatenate([np.ones({extents}, dtype=bool), np.zeros({extents}, dtype=bool)], axis=-1).ravel()",
                    s.offset,
                    s.offset + s.len()
                ));
            }
        }
        b.blank()
            .line("def _columns(x, Y):")
            .indent()
            .line("return np.column_stack([derivative(x[i], Y[:, i]) for i in range(x.size)])")
            .dedent()
            .blank()
            .line("def boundary(ya, yb):")
            .indent()
            .line("# inlet state is given, outlet flux vanishes")
            .line("return np.where(_is_state, ya - _y0, yb)")
            .dedent()
            .blank()
            .line(format!(
                "_mesh = np.linspace(0.0, float({upper}), {})",
                o.bvp_mesh_points
            ))
            .line("_guess = np.repeat(_y0[:, None], _mesh.size, axis=1)")
            .line(format!(
                "sol = solve_bvp(_columns, boundary, _mesh, _guess, tol={})",
                py_float(o.bvp_tol)
            ));
        Self::solver_failed(b);
        b.line("_times, _Y = sol.x, sol.y");
    }

    fn independent_key(&self) -> ParameterIndex {
        let name = self
            .options
            .independent_key
            .as_deref()
            .unwrap_or(&self.model.integral_var);
        ParameterIndex::scalar(name)
    }

    fn emit_results(&self, b: &mut ProgramBuilder) -> Vec<ParameterIndex> {
        let mut keys = vec![self.independent_key()];
        b.line("result = {}")
            .line(format!("result[{}] = _times", py_index(&keys[0])));
        for s in self.states.iter() {
            for point in self.topology.expand(s.shape) {
                let (pos, flux) = s.positions(self.topology, &point);
                let key = self.topology.parameter_index(&s.variable, &point);
                b.line(format!("result[{}] = _Y[{pos}]", py_index(&key)));
                keys.push(key);
                if let Some(flux) = flux {
                    let key = self
                        .topology
                        .parameter_index(&format!("{}{FLUX_SUFFIX}", s.variable), &point);
                    b.line(format!("result[{}] = _Y[{flux}]", py_index(&key)));
                    keys.push(key);
                }
            }
        }
        b.line("return result");
        keys
    }

    fn emit(&self) -> Result<(String, Vec<ParameterIndex>)> {
        let mut b = ProgramBuilder::new();
        b.line("import numpy as np");
        if self.is_bvp() {
            b.line("from scipy.integrate import solve_bvp");
        } else {
            b.line("from scipy.integrate import solve_ivp");
        }
        if self.is_dynamic() {
            b.line("from scipy.interpolate import interp1d");
        }
        b.blank()
            .blank()
            .line("def _value(parameter_table, key):")
            .indent()
            .line("value = parameter_table[key]")
            .line("if value is None:")
            .indent()
            .line("raise ValueError('no value for %r' % (key,))")
            .dedent()
            .line("return value")
            .dedent()
            .blank()
            .blank()
            .line("def simulate(parameter_table):")
            .indent();

        self.emit_constants(&mut b)?;
        self.emit_inputs(&mut b);
        if self.is_dynamic() {
            self.emit_interpolation(&mut b)?;
        }
        self.emit_initial_state(&mut b);
        b.blank();
        self.emit_derivative(&mut b)?;
        b.blank();
        if self.is_bvp() {
            self.emit_bvp(&mut b);
        } else if self.is_dynamic() {
            self.emit_segments(&mut b);
        } else {
            self.emit_ivp(&mut b);
        }
        let keys = self.emit_results(&mut b);
        Ok((b.finish(), keys))
    }
}

/// assemble turns one model context into a runnable simulation program.
/// Every failure is a hard stop; no partial program is produced.
pub fn assemble(
    snapshot: &OntologySnapshot,
    context: &ModelContext,
    options: &AssemblerOptions,
) -> Result<SimulationProgram> {
    context.validate()?;
    let topology = Topology::new(&context.basic)?;
    let model = laws::resolve(snapshot, context, &topology)?;
    if context.kind == ModelKind::Dynamic && model.joint_law.is_some() {
        return config_err!(
            UnsupportedOperation,
            "dynamic operation can't be combined with a boundary value flow pattern".to_owned()
        );
    }

    let parameter_table = build_parameter_table(snapshot, context, &topology, &model)?;
    let emitter = Emitter::new(snapshot, context, options, &topology, &model)?;
    let (source, result_keys) = emitter.emit()?;

    log::debug!(
        "assembled {} lines, {} parameters, {} result series",
        source.lines().count(),
        parameter_table.len(),
        result_keys.len()
    );

    Ok(SimulationProgram {
        source,
        parameter_table,
        result_keys,
    })
}

/// assemble_batch assembles independent contexts against one snapshot in
/// parallel.  Results come back in input order.
pub fn assemble_batch(
    snapshot: &OntologySnapshot,
    contexts: &[ModelContext],
    options: &AssemblerOptions,
) -> Vec<Result<SimulationProgram>> {
    use rayon::prelude::*;

    contexts
        .par_iter()
        .map(|context| assemble(snapshot, context, options))
        .collect()
}
