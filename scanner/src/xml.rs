//! Just enough XML for SOAP and XML-RPC responses.
//!
//! Namespace prefixes are dropped from element and attribute names;
//! DTDs and processing instructions are skipped.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Errors parsing XML.
#[derive(Error, Clone, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum XmlError {
    /// The document ended early.
    #[error("unexpected end of document")]
    Eof,

    /// The document is not well formed at `offset`.
    #[error("malformed xml at byte {offset}: {reason}")]
    Malformed {
        /// Byte offset of the problem.
        offset: usize,

        /// What was wrong.
        reason: String,
    },
}

/// A node in an element's content.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Node {
    /// A child element.
    Element(Element),

    /// Character data, with entities decoded.
    Text(String),
}

/// An XML element.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Element {
    /// Local name of the element.
    pub name: String,

    /// Attributes by local name.
    pub attrs: BTreeMap<String, String>,

    /// Content in document order.
    pub children: Vec<Node>,
}

impl Element {
    /// Child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// The first child element named `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// Every child element named `name`.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.name == name)
    }

    /// The first element named `name` at any depth, including self.
    pub fn find(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.elements().find_map(|e| e.find(name))
    }

    /// Concatenated character data of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Element(element) => out.push_str(&element.text()),
            }
        }
        out
    }

    /// Trimmed text of the child named `name`.
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(|e| e.text().trim().to_owned())
    }
}

/// Parse a document, returning its root element.
pub fn parse(input: &str) -> Result<Element, XmlError> {
    let mut parser = Parser { input, pos: 0 };
    parser.skip_prolog()?;
    let root = parser.element()?;
    Ok(root)
}

/// Escape text for inclusion in element content or attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn local(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn malformed(&self, reason: impl Into<String>) -> XmlError {
        XmlError::Malformed {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn skip_past(&mut self, marker: &str) -> Result<&'a str, XmlError> {
        let rest = self.rest();
        let end = rest.find(marker).ok_or(XmlError::Eof)?;
        self.pos += end + marker.len();
        Ok(&rest[..end])
    }

    fn skip_prolog(&mut self) -> Result<(), XmlError> {
        loop {
            self.skip_ws();
            let rest = self.rest();
            if rest.starts_with("<?") {
                self.skip_past("?>")?;
            } else if rest.starts_with("<!--") {
                self.skip_past("-->")?;
            } else if rest.starts_with("<!") {
                self.skip_past(">")?;
            } else {
                return Ok(());
            }
        }
    }

    fn name(&mut self) -> Result<&'a str, XmlError> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/' || c == '=')
            .ok_or(XmlError::Eof)?;
        if end == 0 {
            return Err(self.malformed("expected a name"));
        }
        self.pos += end;
        Ok(&rest[..end])
    }

    fn element(&mut self) -> Result<Element, XmlError> {
        if !self.rest().starts_with('<') {
            return Err(self.malformed("expected '<'"));
        }
        self.pos += 1;
        let qualified = self.name()?;
        let mut element = Element {
            name: local(qualified).to_owned(),
            ..Default::default()
        };

        loop {
            self.skip_ws();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok(element);
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break;
            }
            if rest.is_empty() {
                return Err(XmlError::Eof);
            }
            let name = self.name()?;
            self.skip_ws();
            if !self.rest().starts_with('=') {
                return Err(self.malformed("expected '=' after attribute name"));
            }
            self.pos += 1;
            self.skip_ws();
            let quote = self.rest().chars().next().ok_or(XmlError::Eof)?;
            if quote != '"' && quote != '\'' {
                return Err(self.malformed("expected a quoted attribute value"));
            }
            self.pos += 1;
            let raw = self.skip_past(&quote.to_string())?;
            element.attrs.insert(local(name).to_owned(), decode(raw));
        }

        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Err(XmlError::Eof);
            }
            if let Some(after) = rest.strip_prefix("</") {
                let end = after.find('>').ok_or(XmlError::Eof)?;
                let closing = after[..end].trim();
                if local(closing) != element.name {
                    return Err(self.malformed(format!("'{}' closed by '{closing}'", element.name)));
                }
                self.pos += 2 + end + 1;
                return Ok(element);
            }
            if rest.starts_with("<!--") {
                self.skip_past("-->")?;
            } else if rest.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                let text = self.skip_past("]]>")?;
                element.children.push(Node::Text(text.to_owned()));
            } else if rest.starts_with("<?") {
                self.skip_past("?>")?;
            } else if rest.starts_with('<') {
                let child = self.element()?;
                element.children.push(Node::Element(child));
            } else {
                let end = rest.find('<').unwrap_or(rest.len());
                let text = decode(&rest[..end]);
                self.pos += end;
                if !text.trim().is_empty() {
                    element.children.push(Node::Text(text));
                }
            }
        }
    }
}

fn decode(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_owned();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let Some(end) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Encoding and decoding of XML-RPC calls.
pub mod rpc {
    use super::*;

    /// A scalar XML-RPC parameter.
    #[derive(Clone, PartialEq, Eq, Debug)]
    pub enum Param {
        /// `<string>`.
        String(String),

        /// `<int>`.
        Int(i64),
    }

    /// Render a `methodCall` document.
    pub fn call(method: &str, params: &[Param]) -> String {
        let mut body = format!(
            "<?xml version=\"1.0\"?><methodCall><methodName>{}</methodName><params>",
            escape(method)
        );
        for param in params {
            let value = match param {
                Param::String(s) => format!("<string>{}</string>", escape(s)),
                Param::Int(n) => format!("<int>{n}</int>"),
            };
            body.push_str(&format!("<param><value>{value}</value></param>"));
        }
        body.push_str("</params></methodCall>");
        body
    }

    /// Decode a `methodResponse` into its single return value.
    ///
    /// A fault is returned as `Err` carrying the fault string.
    pub fn response(document: &str) -> Result<Result<Value, String>, XmlError> {
        let root = parse(document)?;
        if let Some(fault) = root.find("fault") {
            let detail = fault.child("value").map(value).unwrap_or(Value::Null);
            let message = detail
                .get("faultString")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| detail.to_string());
            return Ok(Err(message));
        }
        let value = root
            .find("param")
            .and_then(|param| param.child("value"))
            .map(value)
            .unwrap_or(Value::Null);
        Ok(Ok(value))
    }

    fn value(element: &Element) -> Value {
        let Some(typed) = element.elements().next() else {
            return Value::String(element.text());
        };
        let text = typed.text();
        match typed.name.as_str() {
            "int" | "i4" | "i8" => text
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or(Value::String(text)),
            "double" => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::String(text)),
            "boolean" => Value::Bool(text.trim() == "1"),
            "nil" => Value::Null,
            "array" => Value::Array(
                typed
                    .child("data")
                    .map(|data| data.children_named("value").map(value).collect())
                    .unwrap_or_default(),
            ),
            "struct" => Value::Object(
                typed
                    .children_named("member")
                    .filter_map(|member| {
                        let name = member.child_text("name")?;
                        let value = member.child("value").map(value).unwrap_or(Value::Null);
                        Some((name, value))
                    })
                    .collect::<Map<_, _>>(),
            ),
            _ => Value::String(text),
        }
    }
}
