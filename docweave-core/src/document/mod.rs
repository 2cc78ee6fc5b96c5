//! Document structure model
//!
//! Elements are derived from the current document text on every processing
//! pass and are never persisted. Each element carries byte spans into the
//! exact string it was parsed from.

pub mod changes;
pub mod parser;
pub mod resolver;

pub use changes::{ChangeError, ChangeTracker, ContentChange, Replacement};
pub use parser::DocumentParser;
pub use resolver::TargetResolver;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Kind of a structural element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Document,
    Section,
    Paragraph,
    Table,
    Cell,
}

impl ElementKind {
    pub fn label(&self) -> &'static str {
        match self {
            ElementKind::Document => "document",
            ElementKind::Section => "section",
            ElementKind::Paragraph => "paragraph",
            ElementKind::Table => "table",
            ElementKind::Cell => "cell",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Half-open byte range `[start, end)` into a document string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end: end.max(start) }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Two spans overlap when they share at least one byte
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Level-specific element metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementMetadata {
    Document,
    Section { heading_level: u8 },
    Paragraph,
    Table { rows: usize, columns: usize },
    Cell { table_id: String, row: usize, col: usize, header: Option<String>, is_header: bool },
}

/// A structural element of a parsed document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentElement {
    /// Element id: the markup `id` attribute when present, positional otherwise
    pub id: String,
    pub kind: ElementKind,
    /// Ordinal among elements of the same kind
    pub index: usize,
    /// Full extent including the enclosing markup
    pub span: Span,
    /// Replaceable content; replacements never touch the enclosing tags
    pub content_span: Span,
    /// Heading text for sections
    pub title: Option<String>,
    /// Plain text with tags stripped
    pub text: String,
    pub metadata: ElementMetadata,
}

impl DocumentElement {
    /// Markup of the replaceable content inside `source`
    pub fn content<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.content_span.range()).unwrap_or("")
    }

    /// Full markup of the element inside `source`
    pub fn markup<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.span.range()).unwrap_or("")
    }

    pub fn cell_coordinates(&self) -> Option<(&str, usize, usize)> {
        match &self.metadata {
            ElementMetadata::Cell { table_id, row, col, .. } => Some((table_id.as_str(), *row, *col)),
            _ => None,
        }
    }
}

/// Ordered elements of one parsing pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub content_len: usize,
    pub document: DocumentElement,
    pub sections: Vec<DocumentElement>,
    pub paragraphs: Vec<DocumentElement>,
    pub tables: Vec<DocumentElement>,
    pub cells: Vec<DocumentElement>,
}

impl DocumentStructure {
    /// All elements of one kind, in document order
    pub fn elements(&self, kind: ElementKind) -> &[DocumentElement] {
        match kind {
            ElementKind::Document => std::slice::from_ref(&self.document),
            ElementKind::Section => &self.sections,
            ElementKind::Paragraph => &self.paragraphs,
            ElementKind::Table => &self.tables,
            ElementKind::Cell => &self.cells,
        }
    }

    pub fn find(&self, kind: ElementKind, id: &str) -> Option<&DocumentElement> {
        self.elements(kind).iter().find(|e| e.id == id)
    }

    pub fn element_count(&self) -> usize {
        1 + self.sections.len() + self.paragraphs.len() + self.tables.len() + self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_overlap() {
        let a = Span::new(0, 5);
        let b = Span::new(5, 9);
        let c = Span::new(4, 6);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert!(Span::new(0, 10).contains(&c));
    }

    #[test]
    fn test_span_never_inverted() {
        let span = Span::new(8, 3);
        assert!(span.is_empty());
        assert_eq!(span.len(), 0);
    }
}
