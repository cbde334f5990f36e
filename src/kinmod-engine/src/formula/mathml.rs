// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::Node;
use crate::common::{Error, ErrorCode, ErrorKind, Result};
use crate::shape_err;

/// named entities MathML authors commonly use beyond the five XML ones
fn mathml_entity(name: &str) -> Option<&'static str> {
    let glyph = match name {
        "pi" => "\u{03C0}",
        "times" => "\u{00D7}",
        "minus" => "\u{2212}",
        "sum" => "\u{2211}",
        "prod" => "\u{220F}",
        "InvisibleTimes" | "it" => "\u{2062}",
        "ApplyFunction" | "af" => "\u{2061}",
        "le" => "\u{2264}",
        "ge" => "\u{2265}",
        "ne" => "\u{2260}",
        "infin" => "\u{221E}",
        "middot" => "\u{00B7}",
        "sdot" => "\u{22C5}",
        "divide" => "\u{00F7}",
        _ => return None,
    };
    Some(glyph)
}

fn malformed(details: String) -> Error {
    Error::new(ErrorKind::Shape, ErrorCode::MalformedMarkup, Some(details))
}

fn unescape(raw: &[u8]) -> Result<String> {
    let raw = std::str::from_utf8(raw).map_err(|err| malformed(err.to_string()))?;
    let text = unescape_with(raw, |entity| {
        resolve_predefined_entity(entity).or_else(|| mathml_entity(entity))
    })
    .map_err(|err| malformed(err.to_string()))?;
    Ok(text.into_owned())
}

struct Frame {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
    text: String,
}

impl Frame {
    fn new(start: &BytesStart) -> Result<Self> {
        let tag = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attrs = vec![];
        for attr in start.attributes() {
            let attr = attr.map_err(|err| malformed(err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            attrs.push((key, unescape(&attr.value)?));
        }
        Ok(Frame {
            tag,
            attrs,
            children: vec![],
            text: String::new(),
        })
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn is_leaf(&self) -> bool {
        matches!(self.tag.as_str(), "mi" | "mn" | "mo" | "mtext")
    }

    fn into_node(self) -> Result<Node> {
        if self.is_leaf() {
            if !self.children.is_empty() {
                return shape_err!(
                    MalformedMarkup,
                    format!("<{}> must only contain text", self.tag)
                );
            }
            let text = self.text.trim().to_owned();
            return Ok(match self.tag.as_str() {
                "mi" => Node::Ident(text),
                "mn" => Node::Num(text),
                "mo" => Node::Op(text),
                _ => Node::Text(text),
            });
        }

        if !self.text.trim().is_empty() {
            return shape_err!(
                MalformedMarkup,
                format!("stray text '{}' inside <{}>", self.text.trim(), self.tag)
            );
        }

        let node = match self.tag.as_str() {
            "math" | "mrow" => Node::Row(self.children),
            "mfenced" => Node::Fenced {
                open: self.attr("open").unwrap_or("(").to_owned(),
                close: self.attr("close").unwrap_or(")").to_owned(),
                children: self.children,
            },
            "msqrt" => Node::Sqrt(self.children),
            "mspace" => Node::Space(self.attr("width").unwrap_or_default().to_owned()),
            "mfrac" | "msub" | "msup" => {
                let tag = self.tag;
                let Ok([a, b]) = <[Node; 2]>::try_from(self.children) else {
                    return shape_err!(
                        UnknownNodeShape,
                        format!("<{tag}> needs exactly 2 children")
                    );
                };
                let (a, b) = (Box::new(a), Box::new(b));
                match tag.as_str() {
                    "mfrac" => Node::Frac(a, b),
                    "msub" => Node::Sub(a, b),
                    _ => Node::Sup(a, b),
                }
            }
            _ => Node::Unknown(self.tag),
        };
        Ok(node)
    }
}

fn is_known_tag(tag: &str) -> bool {
    matches!(
        tag,
        "math"
            | "mrow"
            | "mfenced"
            | "mfrac"
            | "mi"
            | "mn"
            | "mo"
            | "mspace"
            | "msqrt"
            | "msub"
            | "msup"
            | "mtext"
    )
}

/// Parser turns a stream of XML events into a [`Node`] tree.  Content of
/// an unknown element is skipped without being interpreted, only its tag
/// nesting is tracked.
struct Parser {
    stack: Vec<Frame>,
    roots: Vec<Node>,
    skipping: usize,
}

impl Parser {
    fn start(&mut self, start: &BytesStart) -> Result<()> {
        if self.skipping > 0 {
            self.skipping += 1;
            return Ok(());
        }
        let frame = Frame::new(start)?;
        if !is_known_tag(&frame.tag) {
            // the frame stays so the matching close produces Node::Unknown
            self.skipping = 1;
        }
        self.stack.push(frame);
        Ok(())
    }

    fn end(&mut self, name: &[u8]) -> Result<()> {
        if self.skipping > 1 {
            self.skipping -= 1;
            return Ok(());
        }
        self.skipping = 0;
        let name = String::from_utf8_lossy(name);
        let Some(frame) = self.stack.pop() else {
            return shape_err!(MalformedMarkup, format!("unexpected </{name}>"));
        };
        if frame.tag != name {
            return shape_err!(
                MalformedMarkup,
                format!("<{}> closed by </{name}>", frame.tag)
            );
        }
        let node = frame.into_node()?;
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<()> {
        if self.skipping > 0 {
            return Ok(());
        }
        match self.stack.last_mut() {
            Some(frame) => {
                frame.text.push_str(text);
                Ok(())
            }
            None if text.trim().is_empty() => Ok(()),
            None => shape_err!(
                MalformedMarkup,
                format!("text '{}' outside any element", text.trim())
            ),
        }
    }
}

/// parse reads MathML markup into a [`Node`] tree.  Several top-level
/// elements are treated as one row.
pub fn parse(markup: &str) -> Result<Node> {
    let mut reader = Reader::from_str(markup);
    reader.config_mut().trim_text(true);

    let mut parser = Parser {
        stack: vec![],
        roots: vec![],
        skipping: 0,
    };

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(err) => {
                let pos = reader.buffer_position();
                return Err(malformed(format!("at byte {pos}: {err}")));
            }
        };
        match event {
            Event::Start(e) => parser.start(&e)?,
            Event::Empty(e) => {
                parser.start(&e)?;
                parser.end(e.local_name().as_ref())?;
            }
            Event::End(e) => parser.end(e.local_name().as_ref())?,
            Event::Text(e) => parser.text(&unescape(&e)?)?,
            Event::CData(e) => parser.text(&String::from_utf8_lossy(&e))?,
            Event::GeneralRef(e) => {
                let raw = format!("&{};", String::from_utf8_lossy(&e));
                parser.text(&unescape(raw.as_bytes())?)?
            }
            Event::Eof => break,
            // declarations, comments and processing instructions
            _ => {}
        }
    }

    if let Some(frame) = parser.stack.last() {
        return shape_err!(MalformedMarkup, format!("<{}> is never closed", frame.tag));
    }

    let mut roots = parser.roots;
    match roots.len() {
        0 => shape_err!(EmptyFormula, "no root element".to_owned()),
        1 => Ok(roots.remove(0)),
        _ => Ok(Node::Row(roots)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> Node {
        Node::Ident(s.to_owned())
    }

    #[test]
    fn test_parse_tree() {
        let node = parse(
            r#"<math xmlns="http://www.w3.org/1998/Math/MathML">
                 <mfrac><mi>a</mi><mi>b</mi></mfrac>
                 <mspace width="0.2em"/>
                 <mfenced open="[" close="]"><mi>c</mi></mfenced>
               </math>"#,
        )
        .unwrap();
        assert_eq!(
            Node::Row(vec![
                Node::Frac(Box::new(ident("a")), Box::new(ident("b"))),
                Node::Space("0.2em".to_owned()),
                Node::Fenced {
                    open: "[".to_owned(),
                    close: "]".to_owned(),
                    children: vec![ident("c")],
                },
            ]),
            node
        );
    }

    #[test]
    fn test_entities() {
        let node = parse("<math><mi>&pi;</mi><mo>&#x2212;</mo><mo>&lt;</mo><mi>&#946;</mi></math>").unwrap();
        assert_eq!(
            Node::Row(vec![
                ident("\u{03C0}"),
                Node::Op("\u{2212}".to_owned()),
                Node::Op("<".to_owned()),
                ident("\u{03B2}"),
            ]),
            node
        );
    }

    #[test]
    fn test_unknown_content_not_validated() {
        // the inner msub has the wrong arity but sits inside an unknown
        // element, so it is never looked at
        let node = parse("<math><semantics><msub><mi>a</mi></msub></semantics></math>").unwrap();
        assert_eq!(Node::Row(vec![Node::Unknown("semantics".to_owned())]), node);
    }

    #[test]
    fn test_malformed() {
        let cases = [
            "<math><mi>a</mi>",
            "<math><mi>a</mo></math>",
            "<math>a<mi>b</mi></math>",
            "<math><mi><mn>1</mn></mi></math>",
            "stray",
        ];
        for markup in cases {
            let err = parse(markup).unwrap_err();
            assert!(err.is_shape_error(), "{markup}");
            assert_eq!(ErrorCode::MalformedMarkup, err.code, "{markup}");
        }
    }

    #[test]
    fn test_arity() {
        let err = parse("<msub><mi>a</mi></msub>").unwrap_err();
        assert_eq!(ErrorCode::UnknownNodeShape, err.code);
        let err = parse("<mfrac><mi>a</mi><mi>b</mi><mi>c</mi></mfrac>").unwrap_err();
        assert_eq!(ErrorCode::UnknownNodeShape, err.code);
    }

    #[test]
    fn test_empty() {
        let err = parse("  ").unwrap_err();
        assert_eq!(ErrorCode::EmptyFormula, err.code);
    }
}
