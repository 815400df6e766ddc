//! Structural patterns.
//!
//! Content blocks and their parts are recognised by CSS-selector patterns
//! supplied as configuration. Patterns are parsed once at startup so a typo
//! fails fast instead of silently matching nothing; the parsed form is then
//! evaluated by any tree implementing [`ElementTree`]. Backends that have a
//! native selector engine use [`Selector::source`] instead.
//!
//! Supported grammar: selector lists (`,`), descendant and child (`>`)
//! combinators, type selectors, `*`, `.class`, `#id`, and attribute selectors
//! `[a]`, `[a=v]`, `[a~=v]`, `[a|=v]`, `[a^=v]`, `[a$=v]`, `[a*=v]`.

use std::fmt;

use thiserror::Error;

/// A tree a [`Selector`] can be evaluated against.
pub trait ElementTree {
    type Node: Copy;

    /// Lower-case tag name, `None` for non-element nodes.
    fn local_name(&self, node: Self::Node) -> Option<&str>;

    fn attribute(&self, node: Self::Node, name: &str) -> Option<&str>;

    fn parent_element(&self, node: Self::Node) -> Option<Self::Node>;
}

/// Pattern parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct SelectorError {
    pub offset: usize,
    pub message: String,
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    subject: Compound,
    /// Compounds to the left of the subject, nearest first.
    ancestors: Vec<(Combinator, Compound)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeSelector {
    name: String,
    test: Option<(AttributeOp, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeOp {
    Equals,
    Includes,
    DashMatch,
    Prefix,
    Suffix,
    Substring,
}

impl Selector {
    /// Parse a selector list.
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let alternatives = Parser::new(source).parse_list()?;
        Ok(Self {
            source: source.trim().to_string(),
            alternatives,
        })
    }

    /// Selector matching elements carrying `class_name`.
    pub fn class(class_name: &str) -> Self {
        let compound = Compound {
            classes: vec![class_name.to_string()],
            ..Default::default()
        };
        Self {
            source: format!(".{}", escape_ident(class_name)),
            alternatives: vec![Complex {
                subject: compound,
                ancestors: Vec::new(),
            }],
        }
    }

    /// The pattern text, normalised only by trimming.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether `node` matches any alternative of this list.
    pub fn matches<T: ElementTree>(&self, tree: &T, node: T::Node) -> bool {
        tree.local_name(node).is_some()
            && self
                .alternatives
                .iter()
                .any(|complex| complex.matches(tree, node))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Complex {
    fn matches<T: ElementTree>(&self, tree: &T, node: T::Node) -> bool {
        self.subject.matches(tree, node) && match_ancestors(tree, node, &self.ancestors)
    }
}

fn match_ancestors<T: ElementTree>(
    tree: &T,
    node: T::Node,
    rest: &[(Combinator, Compound)],
) -> bool {
    let Some(((combinator, compound), tail)) = rest.split_first() else {
        return true;
    };

    match combinator {
        Combinator::Child => tree.parent_element(node).is_some_and(|parent| {
            compound.matches(tree, parent) && match_ancestors(tree, parent, tail)
        }),
        Combinator::Descendant => {
            let mut current = tree.parent_element(node);
            while let Some(ancestor) = current {
                if compound.matches(tree, ancestor) && match_ancestors(tree, ancestor, tail) {
                    return true;
                }
                current = tree.parent_element(ancestor);
            }
            false
        }
    }
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.ids.is_empty()
            && self.classes.is_empty()
            && self.attributes.is_empty()
    }

    fn matches<T: ElementTree>(&self, tree: &T, node: T::Node) -> bool {
        let Some(name) = tree.local_name(node) else {
            return false;
        };

        if let Some(tag) = &self.tag {
            if tag != "*" && !tag.eq_ignore_ascii_case(name) {
                return false;
            }
        }

        if !self.ids.iter().all(|id| tree.attribute(node, "id") == Some(id.as_str())) {
            return false;
        }

        if !self.classes.is_empty() {
            let class_attr = tree.attribute(node, "class").unwrap_or("");
            let has_all = self
                .classes
                .iter()
                .all(|class| class_attr.split_ascii_whitespace().any(|c| c == class));
            if !has_all {
                return false;
            }
        }

        self.attributes.iter().all(|attr| attr.matches(tree, node))
    }
}

impl AttributeSelector {
    fn matches<T: ElementTree>(&self, tree: &T, node: T::Node) -> bool {
        let Some(actual) = tree.attribute(node, &self.name) else {
            return false;
        };
        let Some((op, expected)) = &self.test else {
            return true;
        };
        let expected = expected.as_str();

        match op {
            AttributeOp::Equals => actual == expected,
            AttributeOp::Includes => actual.split_ascii_whitespace().any(|v| v == expected),
            AttributeOp::DashMatch => {
                actual == expected
                    || actual
                        .strip_prefix(expected)
                        .is_some_and(|rest| rest.starts_with('-'))
            }
            AttributeOp::Prefix => !expected.is_empty() && actual.starts_with(expected),
            AttributeOp::Suffix => !expected.is_empty() && actual.ends_with(expected),
            AttributeOp::Substring => !expected.is_empty() && actual.contains(expected),
        }
    }
}

fn escape_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    for (i, ch) in ident.chars().enumerate() {
        if i == 0 && ch.is_ascii_digit() {
            out.push_str(&format!("\\{:x} ", ch as u32));
        } else if is_ident_char(ch) {
            out.push(ch);
        } else {
            out.push('\\');
            out.push(ch);
        }
    }
    out
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || !ch.is_ascii()
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, SelectorError> {
        Err(SelectorError {
            offset: self.pos,
            message: message.into(),
        })
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn expect(&mut self, expected: char) -> Result<(), SelectorError> {
        match self.bump() {
            Some(ch) if ch == expected => Ok(()),
            Some(ch) => {
                self.pos -= 1;
                self.error(format!("expected '{}', found '{}'", expected, ch))
            }
            None => self.error(format!("expected '{}', found end of input", expected)),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Complex>, SelectorError> {
        let mut alternatives = Vec::new();
        loop {
            self.skip_whitespace();
            alternatives.push(self.parse_complex()?);
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(',') => {
                    self.bump();
                }
                Some(ch) => return self.error(format!("unexpected '{}'", ch)),
            }
        }
        Ok(alternatives)
    }

    fn parse_complex(&mut self) -> Result<Complex, SelectorError> {
        let mut compounds = vec![self.parse_compound()?];
        let mut combinators = Vec::new();

        loop {
            let had_whitespace = self.skip_whitespace();
            let combinator = match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.bump();
                    self.skip_whitespace();
                    Combinator::Child
                }
                Some(ch @ ('+' | '~')) => {
                    return self.error(format!("sibling combinator '{}' is not supported", ch));
                }
                Some(_) if had_whitespace => Combinator::Descendant,
                Some(ch) => return self.error(format!("unexpected '{}'", ch)),
            };
            combinators.push(combinator);
            compounds.push(self.parse_compound()?);
        }

        let subject = compounds.pop().unwrap_or_default();
        let ancestors = combinators.into_iter().rev().zip(compounds.into_iter().rev()).collect();
        Ok(Complex { subject, ancestors })
    }

    fn parse_compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();

        match self.peek() {
            Some('*') => {
                self.bump();
                compound.tag = Some("*".to_string());
            }
            Some(ch) if is_ident_char(ch) || ch == '\\' => {
                compound.tag = Some(self.parse_ident()?.to_ascii_lowercase());
            }
            _ => {}
        }

        loop {
            match self.peek() {
                Some('.') => {
                    self.bump();
                    compound.classes.push(self.parse_ident()?);
                }
                Some('#') => {
                    self.bump();
                    compound.ids.push(self.parse_ident()?);
                }
                Some('[') => {
                    self.bump();
                    compound.attributes.push(self.parse_attribute()?);
                }
                Some(':') => return self.error("pseudo-classes are not supported"),
                _ => break,
            }
        }

        if compound.is_empty() {
            return match self.peek() {
                Some(ch) => self.error(format!("expected selector, found '{}'", ch)),
                None => self.error("expected selector, found end of input"),
            };
        }
        Ok(compound)
    }

    fn parse_ident(&mut self) -> Result<String, SelectorError> {
        let mut ident = String::new();
        while let Some(ch) = self.peek() {
            if ch == '\\' {
                self.bump();
                match self.bump() {
                    Some(escaped) => ident.push(escaped),
                    None => return self.error("dangling escape"),
                }
            } else if is_ident_char(ch) {
                self.bump();
                ident.push(ch);
            } else {
                break;
            }
        }

        if ident.is_empty() {
            return self.error("expected identifier");
        }
        Ok(ident)
    }

    fn parse_attribute(&mut self) -> Result<AttributeSelector, SelectorError> {
        self.skip_whitespace();
        let name = self.parse_ident()?.to_ascii_lowercase();
        self.skip_whitespace();

        let op = match self.peek() {
            Some(']') => {
                self.bump();
                return Ok(AttributeSelector { name, test: None });
            }
            Some('=') => {
                self.bump();
                AttributeOp::Equals
            }
            Some(prefix @ ('~' | '|' | '^' | '$' | '*')) => {
                self.bump();
                self.expect('=')?;
                match prefix {
                    '~' => AttributeOp::Includes,
                    '|' => AttributeOp::DashMatch,
                    '^' => AttributeOp::Prefix,
                    '$' => AttributeOp::Suffix,
                    _ => AttributeOp::Substring,
                }
            }
            Some(ch) => return self.error(format!("unexpected '{}' in attribute selector", ch)),
            None => return self.error("unterminated attribute selector"),
        };

        self.skip_whitespace();
        let value = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                self.parse_quoted(quote)?
            }
            _ => self.parse_ident()?,
        };
        self.skip_whitespace();
        self.expect(']')?;

        Ok(AttributeSelector {
            name,
            test: Some((op, value)),
        })
    }

    fn parse_quoted(&mut self, quote: char) -> Result<String, SelectorError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(escaped) => value.push(escaped),
                    None => return self.error("dangling escape"),
                },
                Some(ch) if ch == quote => return Ok(value),
                Some(ch) => value.push(ch),
                None => return self.error("unterminated string"),
            }
        }
    }
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;
