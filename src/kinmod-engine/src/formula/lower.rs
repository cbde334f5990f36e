// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use unicode_xid::UnicodeXID;

use super::{Fragment, Node};
use crate::common::Result;
use crate::shape_err;

/// constants written as glyphs in the notation, and where numpy keeps them
const CONSTANTS: &[(&str, &str)] = &[("\u{03C0}", "np.pi"), ("\u{221E}", "np.inf")];

const OPERATORS: &[(&str, &str)] = &[
    ("\u{00D7}", "*"), // multiplication sign
    ("\u{00B7}", "*"), // middle dot
    ("\u{22C5}", "*"), // dot operator
    ("\u{2217}", "*"), // asterisk operator
    ("\u{2062}", "*"), // invisible times
    ("\u{2212}", "-"),
    ("\u{00F7}", "/"),
    ("\u{2215}", "/"),
    ("\u{2264}", "<="),
    ("\u{2265}", ">="),
    ("\u{2260}", "!="),
    ("\u{2061}", ""), // function application
];

pub(super) const SUM: &str = "\u{2211}";
pub(super) const PRODUCT: &str = "\u{220F}";

/// the reserved call-form keywords, recognized by a row's first operator
const CALL_FORMS: &[&str] = &["[", "len", "exp", SUM, PRODUCT, "max", "matmul"];

pub(super) fn call_form(op: &str) -> Option<&'static str> {
    CALL_FORMS.iter().find(|kw| **kw == op.trim()).copied()
}

fn constant(text: &str) -> Option<&'static str> {
    CONSTANTS
        .iter()
        .find(|(glyph, _)| *glyph == text)
        .map(|(_, code)| *code)
}

fn operator(text: &str) -> String {
    OPERATORS
        .iter()
        .find(|(glyph, _)| *glyph == text)
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| text.to_owned())
}

pub(super) fn lower(node: &Node, suffix: &str) -> Result<Vec<Fragment>> {
    let mut out = Vec::new();
    lower_node(node, suffix, &mut out)?;
    Ok(out)
}

fn text(out: &mut Vec<Fragment>, s: &str) {
    out.push(Fragment::Text(s.to_owned()));
}

fn lower_node(node: &Node, suffix: &str, out: &mut Vec<Fragment>) -> Result<()> {
    match node {
        Node::Row(children) => {
            if let Some(Node::Op(op)) = children.first() {
                if let Some(keyword) = call_form(op) {
                    return lower_call_form(keyword, &children[1..], suffix, out);
                }
            }
            for child in children.iter() {
                lower_node(child, suffix, out)?;
            }
        }
        Node::Fenced {
            open,
            close,
            children,
        } => {
            text(out, open);
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    text(out, ",");
                }
                lower_node(child, suffix, out)?;
            }
            text(out, close);
        }
        Node::Frac(numerator, denominator) => {
            text(out, "(");
            lower_node(numerator, suffix, out)?;
            text(out, ")");
            text(out, "/");
            text(out, "(");
            lower_node(denominator, suffix, out)?;
            text(out, ")");
        }
        Node::Ident(name) => match constant(name) {
            Some(code) => text(out, code),
            None => out.push(Fragment::Symbol {
                name: name.clone(),
                suffix: suffix.to_owned(),
            }),
        },
        Node::Num(num) => text(out, constant(num).unwrap_or(num.as_str())),
        Node::Op(op) => {
            let op = operator(op);
            if !op.is_empty() {
                text(out, &op);
            }
        }
        Node::Space(_) => {}
        Node::Text(s) => {
            if !s.trim().is_empty() {
                text(out, s.trim());
            }
        }
        Node::Sqrt(children) => {
            text(out, "(");
            for child in children.iter() {
                lower_node(child, suffix, out)?;
            }
            text(out, ")");
            text(out, "**");
            text(out, "0.5");
        }
        Node::Sub(_, _) => {
            out.push(Fragment::Symbol {
                name: flat_name(node),
                suffix: suffix.to_owned(),
            });
        }
        Node::Sup(base, exponent) => {
            if is_star(exponent) {
                out.push(Fragment::Symbol {
                    name: flat_name(node),
                    suffix: suffix.to_owned(),
                });
            } else {
                text(out, "(");
                lower_node(base, suffix, out)?;
                text(out, ")");
                text(out, "**");
                text(out, "(");
                lower_node(exponent, suffix, out)?;
                text(out, ")");
            }
        }
        Node::Unknown(tag) => {
            log::warn!("skipping unsupported MathML element <{tag}>");
        }
    }
    Ok(())
}

fn expect_args(keyword: &str, args: &[Node], n: usize) -> Result<()> {
    if args.len() != n {
        return shape_err!(
            BadCallFormArgs,
            format!("'{keyword}' takes {n} argument(s), found {}", args.len())
        );
    }
    Ok(())
}

fn lower_call_form(
    keyword: &str,
    args: &[Node],
    suffix: &str,
    out: &mut Vec<Fragment>,
) -> Result<()> {
    match keyword {
        "[" => {
            if args.len() < 2 || !args[args.len() - 1].is_op("]") {
                return shape_err!(
                    BadCallFormArgs,
                    "index construction needs content and a closing ']'".to_owned()
                );
            }
            text(out, "[");
            for arg in args[..args.len() - 1].iter() {
                lower_node(arg, suffix, out)?;
            }
            text(out, "]");
        }
        "len" | "exp" => {
            expect_args(keyword, args, 1)?;
            text(out, if keyword == "len" { "len(" } else { "np.exp(" });
            lower_node(&args[0], suffix, out)?;
            text(out, ")");
        }
        "max" | "matmul" => {
            expect_args(keyword, args, 2)?;
            text(
                out,
                if keyword == "max" {
                    "np.maximum("
                } else {
                    "np.matmul("
                },
            );
            lower_node(&args[0], suffix, out)?;
            text(out, ",");
            lower_node(&args[1], suffix, out)?;
            text(out, ")");
        }
        SUM | PRODUCT => {
            if args.is_empty() {
                return shape_err!(
                    BadCallFormArgs,
                    format!("'{keyword}' needs an operand")
                );
            }
            text(out, if keyword == SUM { "np.sum(" } else { "np.prod(" });
            for arg in args.iter() {
                lower_node(arg, suffix, out)?;
            }
            text(out, ")");
        }
        _ => unreachable!("call_form only returns known keywords"),
    }
    Ok(())
}

fn is_star(node: &Node) -> bool {
    match node {
        Node::Op(op) | Node::Text(op) | Node::Ident(op) => operator(op.trim()) == "*",
        Node::Row(children) => children.len() == 1 && is_star(&children[0]),
        _ => false,
    }
}

/// flat_name flattens a subscript or superscript into one compound
/// identifier; `k` sub `La` is `k_La`, `C` sup `*` is `C_star`.
fn flat_name(node: &Node) -> String {
    match node {
        Node::Sub(base, index) => format!("{}_{}", flat_name(base), flat_name(index)),
        Node::Sup(base, exponent) if is_star(exponent) => format!("{}_star", flat_name(base)),
        Node::Sup(base, exponent) => format!("{}{}", flat_name(base), flat_name(exponent)),
        Node::Row(children) | Node::Sqrt(children) | Node::Fenced { children, .. } => {
            children.iter().map(flat_name).collect()
        }
        Node::Frac(a, b) => format!("{}{}", flat_name(a), flat_name(b)),
        Node::Ident(s) | Node::Num(s) | Node::Op(s) | Node::Text(s) => s
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| if c.is_xid_continue() { c } else { '_' })
            .collect(),
        Node::Space(_) | Node::Unknown(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorCode;
    use crate::formula::{compile, parse};

    #[test]
    fn test_call_forms() {
        let cases: &[(&str, &str)] = &[
            ("<math><mo>exp</mo><mrow><mo>-</mo><mi>E</mi></mrow></math>", "np.exp(-E)"),
            ("<math><mo>len</mo><mi>x</mi></math>", "len(x)"),
            ("<math><mo>max</mo><mi>a</mi><mn>0</mn></math>", "np.maximum(a, 0)"),
            ("<math><mo>matmul</mo><mi>A</mi><mi>x</mi></math>", "np.matmul(A, x)"),
            ("<math><mo>&#x2211;</mo><mi>&#x03BD;</mi><mi>r</mi></math>", "np.sum(\u{03BD} * r)"),
            ("<math><mo>&#x220F;</mo><mi>a</mi></math>", "np.prod(a)"),
        ];
        for (markup, expected) in cases {
            let expr = compile(markup, "").unwrap();
            assert_eq!(*expected, expr.code, "for {markup}");
        }
    }

    #[test]
    fn test_call_form_inside_product() {
        let expr = compile(
            "<math><mi>k</mi><mrow><mo>exp</mo><mfrac><mrow><mo>-</mo><mi>E</mi></mrow><mrow><mi>R</mi><mi>T</mi></mrow></mfrac></mrow></math>",
            "",
        )
        .unwrap();
        assert_eq!("k * np.exp((-E) / (R * T))", expr.code);
    }

    #[test]
    fn test_index_construction() {
        let expr = compile(
            "<math><mi>C</mi><mrow><mo>[</mo><mn>0</mn><mo>,</mo><mn>1</mn><mo>]</mo></mrow></math>",
            "",
        )
        .unwrap();
        assert_eq!("C[0, 1]", expr.code);
    }

    #[test]
    fn test_bad_call_form_arity() {
        let err = compile("<math><mo>max</mo><mi>a</mi></math>", "").unwrap_err();
        assert_eq!(ErrorCode::BadCallFormArgs, err.code);
        assert!(err.is_shape_error());

        let err = compile("<math><mo>exp</mo></math>", "").unwrap_err();
        assert_eq!(ErrorCode::BadCallFormArgs, err.code);

        let err = compile("<math><mo>&#x2211;</mo></math>", "").unwrap_err();
        assert_eq!(ErrorCode::BadCallFormArgs, err.code);

        let err = compile(
            "<math><mi>C</mi><mrow><mo>[</mo><mn>0</mn></mrow></math>",
            "",
        )
        .unwrap_err();
        assert_eq!(ErrorCode::BadCallFormArgs, err.code);
    }

    #[test]
    fn test_unknown_node_is_skipped() {
        let expr = compile(
            "<math><mi>a</mi><mo>+</mo><mstyle><mi>hidden</mi></mstyle><mi>b</mi></math>",
            "",
        )
        .unwrap();
        assert_eq!("a + b", expr.code);
        assert!(!expr.free_symbols.contains("hidden"));
    }

    #[test]
    fn test_flat_name() {
        let tree = parse("<msub><mi>C</mi><mrow><mi>A</mi><mo>,</mo><mtext>in</mtext></mrow></msub>").unwrap();
        assert_eq!("C_A_in", flat_name(&tree));
    }
}
