//! Desired table shape passed to `require_table`.

use crate::spec::IndexDescriptor;

/// Desired fields and indexes of a table.
///
/// Field descriptors are either registered type names (`Varchar(100)`) or raw
/// backend specs; see [`FieldTypeRegistry`](crate::registry::FieldTypeRegistry).
///
/// # Example
///
/// ```
/// use oxide_schema::{IndexDescriptor, TableDefinition};
///
/// let page = TableDefinition::new()
///     .field("Title", "Varchar(255)")
///     .field("Sort", "Int")
///     .index("Sort", IndexDescriptor::Shorthand)
///     .index("TitleSort", "unique (Title, Sort)");
/// assert_eq!(page.fields().count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDefinition {
    fields: Vec<(String, String)>,
    indexes: Vec<(String, IndexDescriptor)>,
}

impl TableDefinition {
    /// Creates an empty definition.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Adds a field descriptor.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.fields.push((name.into(), descriptor.into()));
        self
    }

    /// Adds an index descriptor.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>, descriptor: impl Into<IndexDescriptor>) -> Self {
        self.indexes.push((name.into(), descriptor.into()));
        self
    }

    /// Field descriptors in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, d)| (n.as_str(), d.as_str()))
    }

    /// Index descriptors in declaration order.
    pub fn indexes(&self) -> impl Iterator<Item = (&str, &IndexDescriptor)> {
        self.indexes.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Returns `true` if no fields or indexes are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.indexes.is_empty()
    }
}
