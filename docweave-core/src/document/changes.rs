//! Content change tracking
//!
//! Replacements computed against one parsing pass are applied in a single
//! pass in descending start order, so an earlier edit's length change never
//! shifts the offsets of a later element.

use super::{DocumentElement, ElementKind, Span};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while splicing content back into a document
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChangeError {
    #[error("Span {start}..{end} of element '{element_id}' is outside the document (length {len})")]
    OutOfBounds { element_id: String, start: usize, end: usize, len: usize },

    #[error("Span {start}..{end} of element '{element_id}' does not fall on character boundaries")]
    NotCharBoundary { element_id: String, start: usize, end: usize },

    #[error("Replacements for '{first}' and '{second}' overlap")]
    Overlapping { first: String, second: String },
}

/// Audit record of one content change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChange {
    pub element_id: String,
    pub element_type: ElementKind,
    /// Span of the replaced content in the document before the pass
    pub span: Span,
    pub old_value: String,
    pub new_value: String,
    pub confidence: f32,
    /// Character-level similarity ratio between old and new content
    pub similarity: f32,
}

/// A pending replacement of one element's content
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub element_id: String,
    pub element_type: ElementKind,
    pub span: Span,
    pub new_content: String,
    pub confidence: f32,
}

impl Replacement {
    pub fn for_element(element: &DocumentElement, new_content: impl Into<String>, confidence: f32) -> Self {
        Self {
            element_id: element.id.clone(),
            element_type: element.kind,
            span: element.content_span,
            new_content: new_content.into(),
            confidence,
        }
    }
}

/// Computes change records and applies replacements
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    excerpt_chars: usize,
    confidence: f32,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new(500, 0.9)
    }
}

impl ChangeTracker {
    const SIMILARITY_TIMEOUT: Duration = Duration::from_millis(200);

    pub fn new(excerpt_chars: usize, confidence: f32) -> Self {
        Self { excerpt_chars: excerpt_chars.max(1), confidence: confidence.clamp(0.0, 1.0) }
    }

    /// Coarse before/after record for a whole document
    pub fn diff(&self, original: &str, modified: &str) -> Vec<ContentChange> {
        if original == modified {
            return Vec::new();
        }

        vec![ContentChange {
            element_id: "document".to_string(),
            element_type: ElementKind::Document,
            span: Span::new(0, original.len()),
            old_value: self.excerpt(original),
            new_value: self.excerpt(modified),
            confidence: self.confidence,
            similarity: similarity(original, modified),
        }]
    }

    /// Replace one element's content
    pub fn apply(
        &self,
        document: &str,
        element: &DocumentElement,
        new_content: &str,
    ) -> Result<String, ChangeError> {
        let replacement = Replacement::for_element(element, new_content, self.confidence);
        self.apply_all(document, vec![replacement]).map(|(content, _)| content)
    }

    /// Apply every replacement of one pass.
    ///
    /// All spans refer to `document` as given. Returns the new document and
    /// the change records in document order.
    pub fn apply_all(
        &self,
        document: &str,
        mut replacements: Vec<Replacement>,
    ) -> Result<(String, Vec<ContentChange>), ChangeError> {
        for replacement in &replacements {
            Self::check_bounds(document, replacement)?;
        }

        replacements.sort_by(|a, b| b.span.start.cmp(&a.span.start).then(b.span.end.cmp(&a.span.end)));
        for pair in replacements.windows(2) {
            let (later, earlier) = (&pair[0], &pair[1]);
            if earlier.span.overlaps(&later.span) || (earlier.span == later.span) {
                return Err(ChangeError::Overlapping {
                    first: earlier.element_id.clone(),
                    second: later.element_id.clone(),
                });
            }
        }

        let mut content = document.to_string();
        let mut changes = Vec::with_capacity(replacements.len());

        for replacement in &replacements {
            let old = document.get(replacement.span.range()).unwrap_or_default();
            if old != replacement.new_content {
                changes.push(ContentChange {
                    element_id: replacement.element_id.clone(),
                    element_type: replacement.element_type,
                    span: replacement.span,
                    old_value: self.excerpt(old),
                    new_value: self.excerpt(&replacement.new_content),
                    confidence: replacement.confidence,
                    similarity: similarity(old, &replacement.new_content),
                });
            }
            content.replace_range(replacement.span.range(), &replacement.new_content);
        }

        changes.reverse();
        Ok((content, changes))
    }

    fn check_bounds(document: &str, replacement: &Replacement) -> Result<(), ChangeError> {
        let Span { start, end } = replacement.span;
        if end > document.len() {
            return Err(ChangeError::OutOfBounds {
                element_id: replacement.element_id.clone(),
                start,
                end,
                len: document.len(),
            });
        }
        if !document.is_char_boundary(start) || !document.is_char_boundary(end) {
            return Err(ChangeError::NotCharBoundary {
                element_id: replacement.element_id.clone(),
                start,
                end,
            });
        }
        Ok(())
    }

    fn excerpt(&self, value: &str) -> String {
        if value.chars().count() <= self.excerpt_chars {
            return value.to_string();
        }
        let mut excerpt: String = value.chars().take(self.excerpt_chars).collect();
        excerpt.push_str("...");
        excerpt
    }
}

fn similarity(old: &str, new: &str) -> f32 {
    TextDiff::configure()
        .timeout(ChangeTracker::SIMILARITY_TIMEOUT)
        .diff_chars(old, new)
        .ratio()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentParser;

    #[test]
    fn test_diff_of_identical_content_is_empty() {
        let tracker = ChangeTracker::default();
        assert!(tracker.diff("<p>a</p>", "<p>a</p>").is_empty());
    }

    #[test]
    fn test_diff_records_excerpts() {
        let tracker = ChangeTracker::new(4, 0.8);
        let changes = tracker.diff("abcdefgh", "ABCDEFGH");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_value, "abcd...");
        assert_eq!(changes[0].new_value, "ABCD...");
        assert_eq!(changes[0].confidence, 0.8);
    }

    #[test]
    fn test_offset_safe_replacement_with_different_lengths() {
        let doc = "<p>first</p><p>second</p>";
        let structure = DocumentParser::new().parse(doc);
        let (a, b) = (&structure.paragraphs[0], &structure.paragraphs[1]);

        let tracker = ChangeTracker::default();
        let (content, changes) = tracker
            .apply_all(
                doc,
                vec![
                    Replacement::for_element(a, "a much longer first paragraph", 0.9),
                    Replacement::for_element(b, "2nd", 0.9),
                ],
            )
            .unwrap();

        assert_eq!(content, "<p>a much longer first paragraph</p><p>2nd</p>");
        assert_eq!(changes.iter().map(|c| c.element_id.as_str()).collect::<Vec<_>>(), vec![
            "paragraph-0",
            "paragraph-1"
        ]);

        let reparsed = DocumentParser::new().parse(&content);
        assert_eq!(reparsed.paragraphs[1].content(&content), "2nd");
        assert!(reparsed.paragraphs[0].span.end <= reparsed.paragraphs[1].span.start);
    }

    #[test]
    fn test_overlapping_replacements_are_rejected() {
        let doc = "<table id=\"t\"><tr><td>x</td></tr></table>";
        let structure = DocumentParser::new().parse(doc);
        let table = &structure.tables[0];
        let cell = &structure.cells[0];

        let result = ChangeTracker::default().apply_all(doc, vec![
            Replacement::for_element(table, "<tr><td>y</td></tr>", 0.9),
            Replacement::for_element(cell, "z", 0.9),
        ]);
        assert!(matches!(result, Err(ChangeError::Overlapping { .. })));
    }

    #[test]
    fn test_out_of_bounds_span() {
        let replacement = Replacement {
            element_id: "ghost".to_string(),
            element_type: ElementKind::Paragraph,
            span: Span::new(5, 50),
            new_content: String::new(),
            confidence: 0.5,
        };
        let result = ChangeTracker::default().apply_all("short", vec![replacement]);
        assert!(matches!(result, Err(ChangeError::OutOfBounds { len: 5, .. })));
    }

    #[test]
    fn test_apply_single_element() {
        let doc = "<h1>Scope</h1><p>old</p>";
        let structure = DocumentParser::new().parse(doc);
        let updated = ChangeTracker::default().apply(doc, &structure.sections[0], "<p>new</p>").unwrap();
        assert_eq!(updated, "<h1>Scope</h1><p>new</p>");
    }
}
