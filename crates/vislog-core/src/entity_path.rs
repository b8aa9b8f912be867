//! Hierarchical entity identifiers.
//!
//! An [`EntityPath`] is an ordered list of unescaped parts. Its string form
//! joins the escaped parts with `/`, where `/` and `\` inside a part are
//! prefixed with a backslash. Equality and hashing use the decoded parts, so
//! `a/b` and `/a/b` name the same entity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VislogError};

pub const SEPARATOR: char = '/';
const ESCAPE: char = '\\';

fn is_reserved(c: char) -> bool {
    c == SEPARATOR || c == ESCAPE
}

/// Escape a single raw part so it can be embedded in a path string.
pub fn escape_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if is_reserved(c) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Inverse of [`escape_part`]. Fails on a bare separator, a dangling
/// backslash or an escape of a non-reserved character.
pub fn unescape_part(escaped: &str) -> Result<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => out.push(next_escaped(escaped, chars.next())?),
            SEPARATOR => {
                return Err(malformed(escaped, "unescaped separator inside a part"));
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn next_escaped(raw: &str, next: Option<char>) -> Result<char> {
    match next {
        Some(c) if is_reserved(c) => Ok(c),
        Some(c) => Err(malformed(raw, &format!("invalid escape sequence '\\{c}'"))),
        None => Err(malformed(raw, "trailing unescaped backslash")),
    }
}

fn malformed(path: &str, reason: &str) -> VislogError {
    VislogError::MalformedPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityPath {
    parts: Vec<String>,
}

impl EntityPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a pre-escaped path string.
    ///
    /// A single leading `/` is optional. `""` and `"/"` are the root. Empty
    /// parts (`a//b`, `a/`) are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let body = raw.strip_prefix(SEPARATOR).unwrap_or(raw);
        if body.is_empty() {
            return Ok(Self::root());
        }

        let mut parts = Vec::new();
        let mut current = String::new();
        let mut chars = body.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => current.push(next_escaped(raw, chars.next())?),
                SEPARATOR => {
                    if current.is_empty() {
                        return Err(malformed(raw, "empty path part"));
                    }
                    parts.push(std::mem::take(&mut current));
                }
                c => current.push(c),
            }
        }
        if current.is_empty() {
            return Err(malformed(raw, "empty path part"));
        }
        parts.push(current);

        Ok(Self { parts })
    }

    /// Build a path from raw, unescaped parts. Empty parts carry no name and
    /// are skipped.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts
                .into_iter()
                .map(Into::into)
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// The decoded parts.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            parts: self.parts[..self.parts.len() - 1].to_vec(),
        })
    }

    /// Append one raw part.
    pub fn join(&self, part: impl Into<String>) -> Self {
        let mut parts = self.parts.clone();
        let part = part.into();
        if !part.is_empty() {
            parts.push(part);
        }
        Self { parts }
    }

    pub fn is_descendant_of(&self, other: &EntityPath) -> bool {
        self.parts.len() > other.parts.len() && self.parts.starts_with(&other.parts)
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return f.write_str("/");
        }
        for part in &self.parts {
            write!(f, "/{}", escape_part(part))?;
        }
        Ok(())
    }
}

impl FromStr for EntityPath {
    type Err = VislogError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityPath {
    type Error = VislogError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<EntityPath> for String {
    fn from(path: EntityPath) -> Self {
        path.to_string()
    }
}

/// Anything a `log` call accepts as a path.
pub trait IntoEntityPath {
    fn into_entity_path(self) -> Result<EntityPath>;
}

impl IntoEntityPath for EntityPath {
    fn into_entity_path(self) -> Result<EntityPath> {
        Ok(self)
    }
}

impl IntoEntityPath for &EntityPath {
    fn into_entity_path(self) -> Result<EntityPath> {
        Ok(self.clone())
    }
}

impl IntoEntityPath for &str {
    fn into_entity_path(self) -> Result<EntityPath> {
        EntityPath::parse(self)
    }
}

impl IntoEntityPath for String {
    fn into_entity_path(self) -> Result<EntityPath> {
        EntityPath::parse(&self)
    }
}

impl IntoEntityPath for &String {
    fn into_entity_path(self) -> Result<EntityPath> {
        EntityPath::parse(self)
    }
}
