// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The formula compiler turns one MathML expression into one numpy
//! expression plus the set of symbols it references.
//!
//! Compilation runs in three passes:
//!
//! 1. [`implicit`] rewrites the tree, making juxtaposed multiplication
//!    explicit.
//! 2. [`lower`] walks each row's sibling run and emits a flat list of
//!    [`Fragment`]s, keeping symbol references structured.
//! 3. [`sanitize`] normalizes the rendered text.
//!
//! Keeping symbols as fragments means later index rewriting substitutes
//! whole symbols, never a prefix of a longer name.

use std::collections::BTreeSet;

use crate::common::Result;

mod implicit;
mod lower;
mod mathml;
mod optional;
mod sanitize;

pub use self::mathml::parse;
pub use self::optional::prune_optional;
pub use self::sanitize::sanitize;

/// Node is one element of a parsed MathML expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Fenced {
        open: String,
        close: String,
        children: Vec<Node>,
    },
    Frac(Box<Node>, Box<Node>),
    Ident(String),
    Num(String),
    Op(String),
    Row(Vec<Node>),
    Space(String),
    Sqrt(Vec<Node>),
    Sub(Box<Node>, Box<Node>),
    Sup(Box<Node>, Box<Node>),
    Text(String),
    /// an element we don't understand; it emits nothing and its
    /// children are never visited
    Unknown(String),
}

impl Node {
    pub(crate) fn is_op(&self, text: &str) -> bool {
        matches!(self, Node::Op(op) if op == text)
    }

    /// is_optional_bracket is true for `<mfenced open="[" close="]">`,
    /// the notation's marker for a term that only exists when one of its
    /// optional variables is part of the model.
    pub(crate) fn is_optional_bracket(&self) -> bool {
        matches!(self, Node::Fenced { open, close, .. } if open == "[" && close == "]")
    }

    /// call_keyword returns the reserved call-form keyword when this node
    /// is a row starting with one.
    pub(crate) fn call_keyword(&self) -> Option<&'static str> {
        if let Node::Row(children) = self {
            if let Some(Node::Op(op)) = children.first() {
                return lower::call_form(op);
            }
        }
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fragment {
    Symbol { name: String, suffix: String },
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledExpression {
    pub code: String,
    pub free_symbols: BTreeSet<String>,
    fragments: Vec<Fragment>,
}

impl CompiledExpression {
    fn new(fragments: Vec<Fragment>) -> Self {
        let free_symbols = fragments
            .iter()
            .filter_map(|f| match f {
                Fragment::Symbol { name, .. } => Some(name.clone()),
                Fragment::Text(_) => None,
            })
            .collect();
        let mut expr = CompiledExpression {
            code: String::new(),
            free_symbols,
            fragments,
        };
        expr.code = expr.render_with(|name| name.to_owned());
        expr
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// render_with rebuilds the code, replacing every symbol occurrence with
    /// whatever `substitute` returns for it.
    pub fn render_with<F>(&self, substitute: F) -> String
    where
        F: Fn(&str) -> String,
    {
        let raw = self
            .fragments
            .iter()
            .map(|f| match f {
                Fragment::Symbol { name, suffix } => format!("{}{}", substitute(name), suffix),
                Fragment::Text(text) => text.clone(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        let code = sanitize(&raw);
        if code.is_empty() { "0".to_owned() } else { code }
    }
}

/// compile parses `markup` and lowers it to numpy code.  Every identifier
/// is emitted with `index_suffix` appended.
pub fn compile(markup: &str, index_suffix: &str) -> Result<CompiledExpression> {
    let tree = parse(markup)?;
    compile_node(&tree, index_suffix)
}

pub fn compile_node(node: &Node, index_suffix: &str) -> Result<CompiledExpression> {
    let tree = implicit::insert_multiplication(node.clone());
    let fragments = lower::lower(&tree, index_suffix)?;
    Ok(CompiledExpression::new(fragments))
}

/// split_assignment splits `target = value` at the first top-level `=`.
/// A formula without one is all value.
pub fn split_assignment(node: &Node) -> (Option<Node>, Node) {
    let mut node = node;
    while let Node::Row(children) = node {
        if children.len() == 1 && matches!(children[0], Node::Row(_)) {
            node = &children[0];
        } else {
            break;
        }
    }

    if let Node::Row(children) = node {
        if let Some(pos) = children.iter().position(|c| c.is_op("=")) {
            let target = Node::Row(children[..pos].to_vec());
            let value = Node::Row(children[pos + 1..].to_vec());
            return (Some(target), value);
        }
    }

    (None, node.clone())
}

/// symbol_name compiles a variable's symbol, which the ontology stores
/// either as plain text or as MathML.
pub fn symbol_name(symbol: &str) -> Result<String> {
    let symbol = symbol.trim();
    if symbol.starts_with('<') {
        Ok(compile(symbol, "")?.code)
    } else {
        Ok(symbol.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_simple_division() {
        let expr = compile("<math><mi>a</mi><mo>/</mo><mi>b</mi></math>", "").unwrap();
        assert_eq!("a / b", expr.code);
        assert_eq!(symbols(&["a", "b"]), expr.free_symbols);

        let expr = compile(
            "<math><mfrac><mi>a</mi><mi>b</mi></mfrac></math>",
            "",
        )
        .unwrap();
        assert_eq!("a / b", expr.code);
    }

    #[test]
    fn test_fraction_keeps_compound_groups() {
        let expr = compile(
            "<math><mfrac><mrow><mi>a</mi><mo>+</mo><mi>b</mi></mrow><mrow><mi>c</mi><mi>d</mi></mrow></mfrac></math>",
            "",
        )
        .unwrap();
        assert_eq!("(a + b) / (c * d)", expr.code);
    }

    #[test]
    fn test_subscript_is_one_symbol() {
        let expr = compile(
            "<math><msub><mi>k</mi><mi>La</mi></msub><mi>a</mi></math>",
            "",
        )
        .unwrap();
        assert_eq!("k_La * a", expr.code);
        assert_eq!(symbols(&["a", "k_La"]), expr.free_symbols);
    }

    #[test]
    fn test_equilibrium_star() {
        let expr = compile(
            "<math><msup><msub><mi>C</mi><mi>A</mi></msub><mo>*</mo></msup><mo>-</mo><msub><mi>C</mi><mi>A</mi></msub></math>",
            "",
        )
        .unwrap();
        assert_eq!("C_A_star - C_A", expr.code);
        assert_eq!(symbols(&["C_A", "C_A_star"]), expr.free_symbols);
    }

    #[test]
    fn test_power_and_root() {
        let expr = compile(
            "<math><msup><mi>x</mi><mn>2</mn></msup><mo>+</mo><msqrt><mi>y</mi></msqrt></math>",
            "",
        )
        .unwrap();
        assert_eq!("x ** 2 + y ** 0.5", expr.code);

        let expr = compile(
            "<math><msqrt><mrow><mi>x</mi><mo>+</mo><mn>1</mn></mrow></msqrt></math>",
            "",
        )
        .unwrap();
        assert_eq!("(x + 1) ** 0.5", expr.code);
    }

    #[test]
    fn test_index_suffix() {
        let expr = compile(
            "<math><mi>k</mi><msub><mi>C</mi><mi>A</mi></msub></math>",
            "[i]",
        )
        .unwrap();
        assert_eq!("k[i] * C_A[i]", expr.code);
        assert_eq!(symbols(&["C_A", "k"]), expr.free_symbols);
    }

    #[test]
    fn test_glyphs() {
        let expr = compile(
            "<math><mn>2</mn><mo>&#x00D7;</mo><mn>&#x03C0;</mn><mo>&#x2212;</mo><mi>r</mi></math>",
            "",
        )
        .unwrap();
        assert_eq!("2 * np.pi - r", expr.code);
        assert_eq!(symbols(&["r"]), expr.free_symbols);

        let expr = compile("<math><mi>&pi;</mi><msup><mi>r</mi><mn>2</mn></msup></math>", "").unwrap();
        assert_eq!("np.pi * r ** 2", expr.code);
    }

    #[test]
    fn test_render_with_substitutes_whole_symbols() {
        let expr = compile(
            "<math><mi>C</mi><mo>+</mo><msub><mi>C</mi><mi>in</mi></msub></math>",
            "",
        )
        .unwrap();
        let code = expr.render_with(|name| {
            if name == "C" {
                "C[0, 1]".to_owned()
            } else {
                name.to_owned()
            }
        });
        assert_eq!("C[0, 1] + C_in", code);
    }

    #[test]
    fn test_split_assignment() {
        let tree = parse(
            "<math><mrow><mi>r</mi><mo>=</mo><mi>k</mi><mi>C</mi></mrow></math>",
        )
        .unwrap();
        let (target, value) = split_assignment(&tree);
        assert_eq!("r", compile_node(&target.unwrap(), "").unwrap().code);
        let value = compile_node(&value, "").unwrap();
        assert_eq!("k * C", value.code);
        assert_eq!(symbols(&["C", "k"]), value.free_symbols);

        let tree = parse("<math><mi>k</mi></math>").unwrap();
        let (target, value) = split_assignment(&tree);
        assert!(target.is_none());
        assert_eq!("k", compile_node(&value, "").unwrap().code);
    }

    #[test]
    fn test_symbol_name() {
        assert_eq!("k_La", symbol_name("k_La").unwrap());
        assert_eq!(
            "k_La",
            symbol_name("<math><msub><mi>k</mi><mi>La</mi></msub></math>").unwrap()
        );
    }

    #[test]
    fn test_deterministic() {
        let markup = "<math><mo>&#x2211;</mo><mi>&#x03BD;</mi><mi>r</mi><mo>+</mo><mfrac><mi>a</mi><mrow><mn>1</mn><mo>+</mo><mi>b</mi></mrow></mfrac></math>";
        let a = compile(markup, "").unwrap();
        let b = compile(markup, "").unwrap();
        assert_eq!(a, b);
    }
}
