// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Written notation omits the multiplication operator between adjacent
//! terms; this pass puts it back so lowering can emit siblings in order.

use super::Node;
use super::lower::{PRODUCT, SUM, call_form};

fn ends_term(node: &Node) -> bool {
    match node {
        Node::Op(op) => op == ")" || op == "]",
        _ => true,
    }
}

fn starts_term(node: &Node) -> bool {
    match node {
        Node::Op(op) => op == "(",
        // an index construction attaches to the term before it
        Node::Row(_) => node.call_keyword() != Some("["),
        Node::Unknown(_) => false,
        _ => true,
    }
}

fn multiply(children: Vec<Node>) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::with_capacity(children.len());
    for child in children {
        // unknown elements emit nothing, so they don't separate terms
        let prev = out.iter().rev().find(|n| !matches!(n, Node::Unknown(_)));
        if let Some(prev) = prev {
            if ends_term(prev) && starts_term(&child) {
                out.push(Node::Op("*".to_owned()));
            }
        }
        out.push(child);
    }
    out
}

fn descend(children: Vec<Node>) -> Vec<Node> {
    children
        .into_iter()
        .filter(|n| !matches!(n, Node::Space(_)))
        .map(insert_multiplication)
        .collect()
}

pub(super) fn insert_multiplication(node: Node) -> Node {
    match node {
        Node::Row(children) => {
            let keyword = match children.first() {
                Some(Node::Op(op)) => call_form(op),
                _ => None,
            };
            let children = descend(children);
            match keyword {
                Some(kw) if kw == SUM || kw == PRODUCT => {
                    let mut children = children.into_iter();
                    let mut row: Vec<Node> = children.next().into_iter().collect();
                    row.extend(multiply(children.collect()));
                    Node::Row(row)
                }
                // remaining call forms take arguments, not factors
                Some(_) => Node::Row(children),
                None => Node::Row(multiply(children)),
            }
        }
        Node::Fenced {
            open,
            close,
            children,
        } => Node::Fenced {
            open,
            close,
            children: descend(children),
        },
        Node::Frac(a, b) => Node::Frac(
            Box::new(insert_multiplication(*a)),
            Box::new(insert_multiplication(*b)),
        ),
        // subscripts flatten into a single name, nothing to multiply
        sub @ Node::Sub(_, _) => sub,
        Node::Sup(a, b) => Node::Sup(
            Box::new(insert_multiplication(*a)),
            Box::new(insert_multiplication(*b)),
        ),
        Node::Sqrt(children) => Node::Sqrt(descend(children)),
        leaf => leaf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> Node {
        Node::Ident(s.to_owned())
    }

    fn op(s: &str) -> Node {
        Node::Op(s.to_owned())
    }

    #[test]
    fn test_juxtaposition() {
        let row = Node::Row(vec![
            ident("k"),
            Node::Space("1em".to_owned()),
            op("("),
            ident("a"),
            op("+"),
            ident("b"),
            op(")"),
            ident("c"),
        ]);
        assert_eq!(
            Node::Row(vec![
                ident("k"),
                op("*"),
                op("("),
                ident("a"),
                op("+"),
                ident("b"),
                op(")"),
                op("*"),
                ident("c"),
            ]),
            insert_multiplication(row)
        );
    }

    #[test]
    fn test_call_arguments_untouched() {
        let row = Node::Row(vec![op("max"), ident("a"), ident("b")]);
        assert_eq!(row.clone(), insert_multiplication(row));

        let row = Node::Row(vec![op(SUM), ident("a"), ident("b")]);
        assert_eq!(
            Node::Row(vec![op(SUM), ident("a"), op("*"), ident("b")]),
            insert_multiplication(row)
        );
    }

    #[test]
    fn test_index_row_attaches() {
        let index = Node::Row(vec![op("["), Node::Num("0".to_owned()), op("]")]);
        let row = Node::Row(vec![ident("C"), index.clone()]);
        assert_eq!(row.clone(), insert_multiplication(row));
    }

    #[test]
    fn test_structural_children_kept_apart() {
        let sub = Node::Sub(
            Box::new(ident("C")),
            Box::new(Node::Row(vec![ident("A"), ident("in")])),
        );
        assert_eq!(sub.clone(), insert_multiplication(sub));

        // recursion still reaches the rows inside a fraction
        let frac = Node::Frac(
            Box::new(ident("a")),
            Box::new(Node::Row(vec![ident("R"), ident("T")])),
        );
        let expected = Node::Frac(
            Box::new(ident("a")),
            Box::new(Node::Row(vec![ident("R"), op("*"), ident("T")])),
        );
        assert_eq!(expected, insert_multiplication(frac));

        let sqrt = Node::Sqrt(vec![ident("x"), ident("y")]);
        assert_eq!(sqrt.clone(), insert_multiplication(sqrt));
    }
}
