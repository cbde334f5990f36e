// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Python source emission.  [`ProgramBuilder`] owns an append-only line
//! buffer; the helpers below format Rust values as Python literals.

use unicode_xid::UnicodeXID;

use crate::datamodel::ParameterIndex;

const INDENT: &str = "    ";

/// names the generated program uses itself, plus Python keywords
const RESERVED: &[&str] = &[
    "np", "solve_ivp", "solve_bvp", "interp1d", "False", "None", "True", "and", "as", "assert",
    "async", "await", "break", "class", "continue", "def", "del", "elif", "else", "except",
    "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal", "not",
    "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

#[derive(Debug, Default)]
pub struct ProgramBuilder {
    buf: String,
    depth: usize,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line<S: AsRef<str>>(&mut self, code: S) -> &mut Self {
        for _ in 0..self.depth {
            self.buf.push_str(INDENT);
        }
        self.buf.push_str(code.as_ref());
        self.buf.push('\n');
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.buf.push('\n');
        self
    }

    pub fn indent(&mut self) -> &mut Self {
        self.depth += 1;
        self
    }

    pub fn dedent(&mut self) -> &mut Self {
        self.depth = self.depth.saturating_sub(1);
        self
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// py_ident turns a variable symbol into a usable Python name.
pub fn py_ident(symbol: &str) -> String {
    let mut name: String = symbol
        .chars()
        .map(|c| if c.is_xid_continue() { c } else { '_' })
        .collect();
    if name.chars().next().is_none_or(|c| !(c == '_' || c.is_xid_start())) {
        name.insert(0, '_');
    }
    if RESERVED.contains(&name.as_str()) {
        name.push('_');
    }
    name
}

pub fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

pub fn py_float(v: f64) -> String {
    if v.is_nan() {
        "np.nan".to_owned()
    } else if v.is_infinite() {
        if v > 0.0 { "np.inf" } else { "-np.inf" }.to_owned()
    } else {
        format!("{v:?}")
    }
}

fn py_opt(s: &Option<String>) -> String {
    match s {
        Some(s) => py_str(s),
        None => "None".to_owned(),
    }
}

pub fn py_index(index: &ParameterIndex) -> String {
    format!(
        "({}, {}, {}, {}, {})",
        py_str(&index.name),
        py_opt(&index.phase),
        py_opt(&index.stream),
        py_opt(&index.reaction),
        py_opt(&index.species)
    )
}

/// py_shape formats array extents as a tuple; no extents is a scalar.
pub fn py_shape(extents: &[usize]) -> String {
    match extents {
        [n] => format!("({n},)"),
        _ => {
            let dims: Vec<String> = extents.iter().map(|e| e.to_string()).collect();
            format!("({})", dims.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let mut b = ProgramBuilder::new();
        b.line("def f(x):").indent().line("return x").dedent().blank().line("y = f(1)");
        assert_eq!("def f(x):\n    return x\n\ny = f(1)\n", b.finish());
    }

    #[test]
    fn test_literals() {
        assert_eq!("'2 A + B > C'", py_str("2 A + B > C"));
        assert_eq!("'it\\'s'", py_str("it's"));
        assert_eq!("1.0", py_float(1.0));
        assert_eq!("1e-9", py_float(1e-9));
        assert_eq!("-np.inf", py_float(f64::NEG_INFINITY));
        assert_eq!("(3,)", py_shape(&[3]));
        assert_eq!("(2, 3)", py_shape(&[2, 3]));
        let index = ParameterIndex::scalar("C").with_stream("Liquid").with_species("A");
        assert_eq!("('C', None, 'Liquid', None, 'A')", py_index(&index));
    }

    #[test]
    fn test_identifiers() {
        assert_eq!("k_La", py_ident("k_La"));
        assert_eq!("lambda_", py_ident("lambda"));
        assert_eq!("np_", py_ident("np"));
        assert_eq!("_2x", py_ident("2x"));
        assert_eq!("C_A_", py_ident("C_A'"));
        assert_eq!("\u{03BD}", py_ident("\u{03BD}"));
    }
}
