// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Normalizes generated numpy code: whitespace, operator spacing and
//! redundant grouping parentheses.  Works line by line on a small token
//! stream rather than on raw text, so string literals and comments pass
//! through untouched.

use unicode_xid::UnicodeXID;

/// calls whose wrapping parentheses are always kept
const RESERVED_CALLS: &[&str] = &[
    "np.exp",
    "np.sum",
    "np.prod",
    "np.maximum",
    "np.matmul",
    "len",
];

const MULTI_CHAR_OPS: &[&str] = &["**", "<=", ">=", "==", "!=", "//"];

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Op(String),
    Open(char),
    Close(char),
    Comma,
    Colon,
    Comment(String),
}

impl Token {
    fn is_op(&self) -> bool {
        matches!(self, Token::Op(_))
    }

    /// a token after which `(` or `[` is a call or subscript
    fn is_callable(&self) -> bool {
        matches!(self, Token::Ident(_) | Token::Close(_) | Token::Str(_))
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_xid_start()
}

fn is_ident_continue(c: char) -> bool {
    c == '.' || c.is_xid_continue()
}

fn lex(line: &str) -> Vec<Token> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = vec![];
    let mut i = 0;

    let take_while = |mut i: usize, f: &dyn Fn(char) -> bool| {
        while i < chars.len() && f(chars[i]) {
            i += 1;
        }
        i
    };

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c.is_whitespace() {
            i += 1;
        } else if c == '#' {
            tokens.push(Token::Comment(chars[i..].iter().collect()));
            i = chars.len();
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            i = take_while(i, &|c| c.is_ascii_digit() || c == '.');
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = take_while(j, &|c| c.is_ascii_digit());
                }
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
        } else if is_ident_start(c) {
            i = take_while(i + 1, &is_ident_continue);
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c == '\'' || c == '"' {
            i += 1;
            while i < chars.len() && chars[i] != c {
                if chars[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(chars.len());
            tokens.push(Token::Str(chars[start..i].iter().collect()));
        } else if matches!(c, '(' | '[' | '{') {
            tokens.push(Token::Open(c));
            i += 1;
        } else if matches!(c, ')' | ']' | '}') {
            tokens.push(Token::Close(c));
            i += 1;
        } else if c == ',' {
            tokens.push(Token::Comma);
            i += 1;
        } else if c == ':' {
            tokens.push(Token::Colon);
            i += 1;
        } else {
            let pair: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            if MULTI_CHAR_OPS.contains(&pair.as_str()) {
                tokens.push(Token::Op(pair));
                i += 2;
            } else {
                tokens.push(Token::Op(c.to_string()));
                i += 1;
            }
        }
    }

    tokens
}

/// for every opening token, the position of its closing token
fn matching(tokens: &[Token]) -> Vec<Option<usize>> {
    let mut result = vec![None; tokens.len()];
    let mut stack = vec![];
    for (i, tok) in tokens.iter().enumerate() {
        match tok {
            Token::Open(_) => stack.push(i),
            Token::Close(_) => {
                if let Some(open) = stack.pop() {
                    result[open] = Some(i);
                }
            }
            _ => {}
        }
    }
    result
}

fn is_grouping(tokens: &[Token], i: usize) -> bool {
    tokens[i] == Token::Open('(') && (i == 0 || !tokens[i - 1].is_callable())
}

/// `((x))` loses its outer pair, once per group
fn collapse_double(tokens: &mut Vec<Token>) {
    let mut i = 0;
    while i + 1 < tokens.len() {
        let pairs = matching(tokens);
        if is_grouping(tokens, i) && tokens[i + 1] == Token::Open('(') {
            if let (Some(outer), Some(inner)) = (pairs[i], pairs[i + 1]) {
                if outer == inner + 1 {
                    tokens.remove(outer);
                    tokens.remove(i);
                }
            }
        }
        i += 1;
    }
}

/// a term is atomic when nothing at its top level could bind looser than
/// the surrounding expression
fn is_atomic(inner: &[Token]) -> bool {
    if inner.is_empty() {
        return false;
    }
    if let [Token::Ident(name), Token::Open('('), ..] = inner {
        if RESERVED_CALLS.contains(&name.as_str()) {
            return false;
        }
    }
    let mut depth = 0;
    for tok in inner {
        match tok {
            Token::Open(_) => depth += 1,
            Token::Close(_) => depth -= 1,
            Token::Op(_) | Token::Comma | Token::Colon | Token::Comment(_) if depth == 0 => {
                return false;
            }
            _ => {}
        }
    }
    true
}

fn strip_atomic(tokens: &mut Vec<Token>) {
    loop {
        let pairs = matching(tokens);
        let found = (0..tokens.len()).find_map(|i| {
            let close = pairs[i]?;
            if is_grouping(tokens, i) && is_atomic(&tokens[i + 1..close]) {
                Some((i, close))
            } else {
                None
            }
        });
        match found {
            Some((open, close)) => {
                tokens.remove(close);
                tokens.remove(open);
            }
            None => break,
        }
    }
}

fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev: Option<&Token> = None;
    let mut prev_unary = false;

    for tok in tokens {
        let unary = match tok {
            Token::Op(op) if op == "-" || op == "+" => match prev {
                None => true,
                Some(p) => p.is_op() || matches!(p, Token::Open(_) | Token::Comma | Token::Colon),
            },
            _ => false,
        };

        let space = match (prev, tok) {
            (None, _) => false,
            (Some(Token::Comma), Token::Colon) => true,
            (_, Token::Close(_) | Token::Comma | Token::Colon) => false,
            (Some(Token::Open(_) | Token::Colon), _) => false,
            (Some(Token::Comma), _) => true,
            (Some(p), Token::Open(_)) if p.is_callable() => false,
            (Some(Token::Op(_)), _) if prev_unary => false,
            _ => true,
        };

        if space {
            out.push(' ');
        }
        match tok {
            Token::Ident(s) | Token::Number(s) | Token::Str(s) | Token::Op(s) | Token::Comment(s) => {
                out.push_str(s)
            }
            Token::Open(c) | Token::Close(c) => out.push(*c),
            Token::Comma => out.push(','),
            Token::Colon => out.push(':'),
        }

        prev = Some(tok);
        prev_unary = unary;
    }

    out
}

fn sanitize_line(line: &str) -> String {
    let body = line.trim_start();
    let indent = &line[..line.len() - body.len()];
    let mut tokens = lex(body);
    if tokens.is_empty() {
        return String::new();
    }
    collapse_double(&mut tokens);
    strip_atomic(&mut tokens);
    format!("{indent}{}", render(&tokens))
}

/// sanitize normalizes whitespace and parentheses in generated code.
/// Leading indentation of every line is preserved.
pub fn sanitize(code: &str) -> String {
    code.lines()
        .map(sanitize_line)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spacing() {
        let cases: &[(&str, &str)] = &[
            ("a  /   b", "a / b"),
            ("( a + b ) / ( c * d )", "(a + b) / (c * d)"),
            ("C [ 0 , : , 2 ]", "C[0, :, 2]"),
            ("np.exp ( - E )", "np.exp(-E)"),
            ("x ** - 1", "x ** -1"),
            ("a * - b + 1e-3", "a * -b + 1e-3"),
            ("f ( a , b ) [ 1 : 3 ]", "f(a, b)[1:3]"),
            ("a<=b", "a <= b"),
        ];
        for (input, expected) in cases {
            assert_eq!(*expected, sanitize(input), "for {input:?}");
        }
    }

    #[test]
    fn test_redundant_parens() {
        let cases: &[(&str, &str)] = &[
            ("( x ) ** ( 2 )", "x ** 2"),
            ("((a + b)) * c", "(a + b) * c"),
            ("(((a)))", "a"),
            ("(np.exp(x)) * k", "(np.exp(x)) * k"),
            ("(f(x)) * k", "f(x) * k"),
            ("(-E) / (R * T)", "(-E) / (R * T)"),
            ("g((a, b))", "g((a, b))"),
            ("()", "()"),
        ];
        for (input, expected) in cases {
            assert_eq!(*expected, sanitize(input), "for {input:?}");
        }
    }

    #[test]
    fn test_lines_and_literals() {
        let code = "def f(t, y):\n    k  =  ( 2 )   \n    s = 'a  ( b )'  # keep  ( this )\n";
        assert_eq!(
            "def f(t, y):\n    k = 2\n    s = 'a  ( b )' # keep  ( this )",
            sanitize(code)
        );
    }

    #[test]
    fn test_idempotent() {
        let once = sanitize("( a + ( b ) ) * np.sum ( ( c ) )");
        assert_eq!(once, sanitize(&once));
    }
}
