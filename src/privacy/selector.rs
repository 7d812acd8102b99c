//! Block selector matching.
//!
//! Supports the CSS subset hosts use for blocking in practice:
//! type (`div`), universal (`*`), `#id`, `.class`, `[attr]`, `[attr=value]`,
//! compounds of those (`input.secret[type=text]`), the descendant combinator
//! (`form .card`), and comma-separated selector lists.

use std::sync::OnceLock;

use regex::Regex;

use crate::capture::ElementNode;
use crate::error::{Result, SdkError};

fn simple_selector_regex() -> Result<&'static Regex> {
    static CACHED: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    CACHED
        .get_or_init(|| {
            Regex::new(
                r#"(?x)
                (?P<tag>^[A-Za-z][\w-]*) |
                (?P<any>^\*) |
                \#(?P<id>[\w-]+) |
                \.(?P<class>[\w-]+) |
                \[\s*(?P<attr>[\w-]+)\s*(?:=\s*["']?(?P<value>[^"'\]]*)["']?\s*)?\]
                "#,
            )
        })
        .as_ref()
        .map_err(|e| SdkError::Configuration(format!("selector grammar failed to compile: {}", e)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SimpleSelector {
    Tag(String),
    Id(String),
    Class(String),
    Attribute { name: String, value: Option<String> },
}

impl SimpleSelector {
    fn matches(&self, node: &ElementNode) -> bool {
        match self {
            SimpleSelector::Tag(tag) => node.tag.eq_ignore_ascii_case(tag),
            SimpleSelector::Id(id) => node.id.as_deref() == Some(id.as_str()),
            SimpleSelector::Class(class) => node.has_class(class),
            SimpleSelector::Attribute { name, value } => match (node.attributes.get(name), value) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            },
        }
    }
}

/// All simple selectors must match the same element.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Compound(Vec<SimpleSelector>);

impl Compound {
    fn parse(token: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut consumed = 0;
        for caps in simple_selector_regex()?.captures_iter(token) {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            consumed += whole.len();
            if let Some(tag) = caps.name("tag") {
                parts.push(SimpleSelector::Tag(tag.as_str().to_ascii_lowercase()));
            } else if caps.name("any").is_some() {
                // universal selector adds no constraint
            } else if let Some(id) = caps.name("id") {
                parts.push(SimpleSelector::Id(id.as_str().to_string()));
            } else if let Some(class) = caps.name("class") {
                parts.push(SimpleSelector::Class(class.as_str().to_string()));
            } else if let Some(attr) = caps.name("attr") {
                parts.push(SimpleSelector::Attribute {
                    name: attr.as_str().to_string(),
                    value: caps.name("value").map(|v| v.as_str().to_string()),
                });
            }
        }
        if consumed != token.len() {
            return Err(SdkError::Configuration(format!(
                "unsupported blockSelector component: {}",
                token
            )));
        }
        Ok(Compound(parts))
    }

    fn matches(&self, node: &ElementNode) -> bool {
        self.0.iter().all(|s| s.matches(node))
    }
}

/// One complex selector: compounds joined by descendant combinators.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex(Vec<Compound>);

impl Complex {
    /// Match with `path[index]` as the subject element. Ancestors are at
    /// higher indices.
    fn matches_at(&self, path: &[ElementNode], index: usize) -> bool {
        let Some((subject, ancestors)) = self.0.split_last() else {
            return false;
        };
        if !subject.matches(&path[index]) {
            return false;
        }
        let mut search_from = index + 1;
        for compound in ancestors.iter().rev() {
            match path[search_from..].iter().position(|n| compound.matches(n)) {
                Some(offset) => search_from += offset + 1,
                None => return false,
            }
        }
        true
    }
}

/// A parsed, comma-separated selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSelector {
    source: String,
    alternatives: Vec<Complex>,
}

impl BlockSelector {
    pub fn parse(source: &str) -> Result<Self> {
        let mut alternatives = Vec::new();
        for alternative in source.split(',') {
            let compounds = alternative
                .split_whitespace()
                .map(Compound::parse)
                .collect::<Result<Vec<_>>>()?;
            if compounds.is_empty() {
                return Err(SdkError::Configuration(format!(
                    "empty alternative in blockSelector: {:?}",
                    source
                )));
            }
            alternatives.push(Complex(compounds));
        }
        Ok(BlockSelector {
            source: source.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the element at `path[0]` matches any alternative.
    pub fn matches(&self, path: &[ElementNode]) -> bool {
        self.matches_at(path, 0)
    }

    /// Whether `path[index]` matches any alternative, with `path[index + 1..]`
    /// as its ancestors.
    pub fn matches_at(&self, path: &[ElementNode], index: usize) -> bool {
        index < path.len() && self.alternatives.iter().any(|c| c.matches_at(path, index))
    }
}
