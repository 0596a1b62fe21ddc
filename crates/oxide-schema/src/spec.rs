//! Field and index spec strings.
//!
//! A spec is the backend's own textual description of a column or index
//! (`"varchar(50) character set utf8"`, `"unique (Email)"`). The engine treats
//! specs as opaque and compares them as strings; [`normalize_spec`] provides a
//! structured-ish form for backends whose specs are known to be
//! whitespace- and case-insensitive.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static COLLATION_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\b(character\s+set|collate)\s+[^\s,()]+").expect("valid collation regex")
});

static INDEX_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*([,()])\s*").expect("valid separator regex"));

static INDEX_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(index|unique|fulltext)?\s*\(([^()]*)\)\s*$").expect("valid index regex")
});

/// Backend-specific description of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSpec(String);

impl FieldSpec {
    /// Wraps a spec string.
    #[must_use]
    pub fn new(spec: impl Into<String>) -> Self {
        Self(spec.into())
    }

    /// Returns the raw spec string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the spec with every `character set X` / `collate Y` clause removed.
    #[must_use]
    pub fn without_collation(&self) -> Self {
        if !COLLATION_CLAUSE.is_match(&self.0) {
            return self.clone();
        }
        Self(COLLATION_CLAUSE.replace_all(&self.0, "").trim().to_string())
    }

    /// Returns the normalized form used by [`SpecComparison::Normalized`].
    #[must_use]
    pub fn normalized(&self) -> String {
        normalize_spec(&self.0)
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldSpec {
    fn from(spec: &str) -> Self {
        Self::new(spec)
    }
}

impl From<String> for FieldSpec {
    fn from(spec: String) -> Self {
        Self(spec)
    }
}

/// Backend-specific description of an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexSpec(String);

impl IndexSpec {
    /// Wraps a spec string, collapsing whitespace around `,`, `(` and `)`.
    #[must_use]
    pub fn new(spec: impl Into<String>) -> Self {
        let spec = spec.into();
        Self(INDEX_SEPARATOR.replace_all(spec.trim(), "$1").into_owned())
    }

    /// Returns the raw spec string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the normalized form used by [`SpecComparison::Normalized`].
    #[must_use]
    pub fn normalized(&self) -> String {
        normalize_spec(&self.0)
    }

    /// Parses the spec into kind and column list.
    ///
    /// Returns `None` for dialect-specific specs that don't follow the
    /// `[kind] (col, ...)` shape.
    #[must_use]
    pub fn definition(&self) -> Option<IndexDefinition> {
        let caps = INDEX_DEFINITION.captures(&self.0)?;
        let kind = match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()) {
            Some(k) if k == "unique" => IndexKind::Unique,
            Some(k) if k == "fulltext" => IndexKind::Fulltext,
            _ => IndexKind::Index,
        };
        let columns: Vec<String> = caps[2]
            .split(',')
            .map(|c| c.trim().trim_matches(|ch| ch == '"' || ch == '`').to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if columns.is_empty() {
            return None;
        }
        Some(IndexDefinition { kind, columns })
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndexSpec {
    fn from(spec: &str) -> Self {
        Self::new(spec)
    }
}

impl From<String> for IndexSpec {
    fn from(spec: String) -> Self {
        Self::new(spec)
    }
}

/// Kind of index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Plain (non-unique) index.
    Index,
    /// Unique index.
    Unique,
    /// Full-text index.
    Fulltext,
}

/// Structured form of an index spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Index kind.
    pub kind: IndexKind,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
}

impl IndexDefinition {
    /// Renders the canonical spec string: `(a,b)`, `unique(a,b)` or `fulltext(a,b)`.
    #[must_use]
    pub fn to_spec(&self) -> IndexSpec {
        let columns = self.columns.join(",");
        match self.kind {
            IndexKind::Index => IndexSpec::new(format!("({columns})")),
            IndexKind::Unique => IndexSpec::new(format!("unique({columns})")),
            IndexKind::Fulltext => IndexSpec::new(format!("fulltext({columns})")),
        }
    }
}

/// What a caller passes to `require_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexDescriptor {
    /// Single-column index on the column named like the index.
    Shorthand,
    /// Explicit spec.
    Spec(IndexSpec),
}

impl IndexDescriptor {
    /// Resolves the descriptor for the named index.
    #[must_use]
    pub fn resolve(&self, index: &str) -> IndexSpec {
        match self {
            Self::Shorthand => IndexSpec::new(format!("({index})")),
            Self::Spec(spec) => spec.clone(),
        }
    }
}

impl From<&str> for IndexDescriptor {
    fn from(spec: &str) -> Self {
        Self::Spec(IndexSpec::new(spec))
    }
}

impl From<String> for IndexDescriptor {
    fn from(spec: String) -> Self {
        Self::Spec(IndexSpec::new(spec))
    }
}

impl From<IndexSpec> for IndexDescriptor {
    fn from(spec: IndexSpec) -> Self {
        Self::Spec(spec)
    }
}

/// How a desired spec is compared with the introspected one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecComparison {
    /// Raw string equality. Reformatted but equivalent specs count as changed.
    #[default]
    Raw,
    /// Compare [`normalize_spec`] forms.
    Normalized,
}

/// Outcome of comparing an existing spec with a desired one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecMatch {
    /// Identical strings.
    Same,
    /// Different strings with equal normalized forms.
    Stale,
    /// Different specs.
    Changed,
}

impl SpecComparison {
    /// Compares two spec strings.
    #[must_use]
    pub fn compare(self, existing: &str, desired: &str) -> SpecMatch {
        if existing == desired {
            SpecMatch::Same
        } else if normalize_spec(existing) == normalize_spec(desired) {
            SpecMatch::Stale
        } else {
            SpecMatch::Changed
        }
    }

    /// Returns `true` if the outcome should stage an alteration.
    #[must_use]
    pub const fn needs_alter(self, outcome: SpecMatch) -> bool {
        match outcome {
            SpecMatch::Same => false,
            SpecMatch::Stale => matches!(self, Self::Raw),
            SpecMatch::Changed => true,
        }
    }
}

/// Lowercases outside quoted literals, collapses whitespace runs, and drops
/// whitespace next to `(`, `)` and `,`.
#[must_use]
pub fn normalize_spec(spec: &str) -> String {
    let mut out = String::with_capacity(spec.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for ch in spec.trim().chars() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => {
                if pending_space && !out.ends_with(['(', ',']) {
                    out.push(' ');
                }
                pending_space = false;
                quote = Some(ch);
                out.push(ch);
            }
            c if c.is_whitespace() => pending_space = true,
            '(' | ')' | ',' => {
                pending_space = false;
                out.push(ch);
            }
            c => {
                if pending_space && !out.ends_with(['(', ',']) {
                    out.push(' ');
                }
                pending_space = false;
                out.extend(c.to_lowercase());
            }
        }
    }
    out
}

/// An ordered name-to-spec map.
///
/// Keeps first-insertion order (column order matters for `CREATE TABLE`);
/// inserting an existing name replaces its spec in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecMap<S> {
    entries: Vec<(String, S)>,
}

impl<S> Default for SpecMap<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SpecMap<S> {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts or replaces a spec. Returns the replaced spec, if any.
    pub fn insert(&mut self, name: impl Into<String>, spec: S) -> Option<S> {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            return Some(std::mem::replace(&mut slot.1, spec));
        }
        self.entries.push((name, spec));
        None
    }

    /// Looks up a spec by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&S> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Returns `true` if the name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &S)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

impl<K: Into<String>, S> FromIterator<(K, S)> for SpecMap<S> {
    fn from_iter<I: IntoIterator<Item = (K, S)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, spec) in iter {
            map.insert(name, spec);
        }
        map
    }
}
