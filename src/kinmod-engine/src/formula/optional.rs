// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::BTreeSet;

use super::{Node, compile_node};
use crate::common::Result;

fn is_additive(node: &Node) -> bool {
    node.is_op("+") || node.is_op("-") || node.is_op("\u{2212}")
}

fn group(children: Vec<Node>) -> Node {
    Node::Fenced {
        open: "(".to_owned(),
        close: ")".to_owned(),
        children: vec![Node::Row(children)],
    }
}

/// prune_optional resolves every optional bracket (`<mfenced open="["
/// close="]">`) in the tree.  `keep` is asked with the bracket's free
/// symbols: a kept bracket becomes a plain parenthesised group, a dropped
/// one disappears together with the `+`/`-` that attaches it when it is a
/// whole term, and turns into `0` when it is a factor of a product.
pub fn prune_optional<F>(node: &Node, keep: &F) -> Result<Node>
where
    F: Fn(&BTreeSet<String>) -> bool,
{
    let node = match node {
        Node::Row(children) => {
            let mut out: Vec<Node> = vec![];
            let mut skip_plus = false;
            for (i, child) in children.iter().enumerate() {
                if skip_plus {
                    skip_plus = false;
                    if child.is_op("+") {
                        continue;
                    }
                }
                let Node::Fenced { children: inner, .. } = child else {
                    out.push(prune_optional(child, keep)?);
                    continue;
                };
                if !child.is_optional_bracket() {
                    out.push(prune_optional(child, keep)?);
                    continue;
                }
                if keeps(inner, keep)? {
                    out.push(group(prune_children(inner, keep)?));
                    continue;
                }
                // only a bracket standing as a whole additive term takes
                // its sign with it; inside a product it becomes a zero factor
                let ends_term = children.get(i + 1).is_none_or(is_additive);
                if ends_term && out.last().is_some_and(is_additive) {
                    out.pop();
                } else if ends_term && out.is_empty() {
                    // a leading dropped term leaves `- x` alone but `+ x`
                    // loses its sign
                    skip_plus = true;
                } else {
                    out.push(Node::Num("0".to_owned()));
                }
            }
            if out.is_empty() {
                Node::Num("0".to_owned())
            } else {
                Node::Row(out)
            }
        }
        Node::Fenced { children, .. } if node.is_optional_bracket() => {
            if keeps(children, keep)? {
                group(prune_children(children, keep)?)
            } else {
                Node::Num("0".to_owned())
            }
        }
        Node::Fenced {
            open,
            close,
            children,
        } => Node::Fenced {
            open: open.clone(),
            close: close.clone(),
            children: prune_children(children, keep)?,
        },
        Node::Frac(a, b) => Node::Frac(
            Box::new(prune_optional(a, keep)?),
            Box::new(prune_optional(b, keep)?),
        ),
        Node::Sup(a, b) => Node::Sup(
            Box::new(prune_optional(a, keep)?),
            Box::new(prune_optional(b, keep)?),
        ),
        Node::Sqrt(children) => Node::Sqrt(prune_children(children, keep)?),
        other => other.clone(),
    };
    Ok(node)
}

fn prune_children<F>(children: &[Node], keep: &F) -> Result<Vec<Node>>
where
    F: Fn(&BTreeSet<String>) -> bool,
{
    match prune_optional(&Node::Row(children.to_vec()), keep)? {
        Node::Row(children) => Ok(children),
        other => Ok(vec![other]),
    }
}

fn keeps<F>(children: &[Node], keep: &F) -> Result<bool>
where
    F: Fn(&BTreeSet<String>) -> bool,
{
    let symbols = compile_node(&Node::Row(children.to_vec()), "")?.free_symbols;
    Ok(keep(&symbols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{compile_node, parse};

    const RATE: &str = "<math><mi>k</mi><mi>C</mi><mo>+</mo><mfenced open=\"[\" close=\"]\"><msub><mi>k</mi><mi>b</mi></msub><mi>D</mi></mfenced><mo>-</mo><mi>s</mi></math>";

    fn pruned(markup: &str, selected: &[&str]) -> String {
        let tree = parse(markup).unwrap();
        let keep = |symbols: &BTreeSet<String>| {
            symbols.iter().any(|s| selected.contains(&s.as_str()))
        };
        compile_node(&prune_optional(&tree, &keep).unwrap(), "")
            .unwrap()
            .code
    }

    #[test]
    fn test_dropped_with_operator() {
        assert_eq!("k * C - s", pruned(RATE, &[]));
    }

    #[test]
    fn test_kept_as_group() {
        assert_eq!("k * C + (k_b * D) - s", pruned(RATE, &["k_b"]));
    }

    #[test]
    fn test_leading_bracket() {
        let markup = "<math><mfenced open=\"[\" close=\"]\"><mi>x</mi></mfenced><mo>+</mo><mi>y</mi></math>";
        assert_eq!("y", pruned(markup, &[]));

        let markup = "<math><mfenced open=\"[\" close=\"]\"><mi>x</mi></mfenced><mo>-</mo><mi>y</mi></math>";
        assert_eq!("-y", pruned(markup, &[]));
    }

    #[test]
    fn test_dropped_factor_zeroes_its_product() {
        let juxtaposed = "<math><mi>a</mi><mo>-</mo><mi>k</mi><mfenced open=\"[\" close=\"]\"><mi>x</mi></mfenced><mo>+</mo><mi>y</mi></math>";
        assert_eq!("a - k * 0 + y", pruned(juxtaposed, &[]));
        assert_eq!("a - k * x + y", pruned(juxtaposed, &["x"]));

        let times = "<math><mi>k</mi><mo>&#x00D7;</mo><mfenced open=\"[\" close=\"]\"><mi>x</mi></mfenced><mo>+</mo><mi>y</mi></math>";
        assert_eq!("k * 0 + y", pruned(times, &[]));

        let leading = "<math><mfenced open=\"[\" close=\"]\"><mi>x</mi></mfenced><mi>k</mi><mo>+</mo><mi>y</mi></math>";
        assert_eq!("0 * k + y", pruned(leading, &[]));
    }

    #[test]
    fn test_only_bracket() {
        let markup = "<math><mfenced open=\"[\" close=\"]\"><mi>x</mi></mfenced></math>";
        assert_eq!("0", pruned(markup, &[]));
        assert_eq!("x", pruned(markup, &["x"]));
    }

    #[test]
    fn test_ordinary_fence_untouched() {
        let markup = "<math><mfenced><mi>a</mi><mi>b</mi></mfenced></math>";
        assert_eq!("(a, b)", pruned(markup, &[]));
    }
}
