//! Target resolution against a parsed document

use super::{DocumentElement, DocumentStructure, ElementKind, ElementMetadata};
use crate::instructions::{InstructionLevel, Target};

/// Selects the elements an instruction target refers to
pub struct TargetResolver;

impl TargetResolver {
    /// Resolve `target` among the elements of `level` only.
    ///
    /// An empty result is not an error; callers report it as a warning.
    pub fn resolve<'a>(
        structure: &'a DocumentStructure,
        level: InstructionLevel,
        target: &Target,
    ) -> Vec<&'a DocumentElement> {
        Self::resolve_in(structure.elements(level.element_kind()), target)
    }

    /// Resolve `target` within a list of same-kind elements
    pub fn resolve_in<'a>(elements: &'a [DocumentElement], target: &Target) -> Vec<&'a DocumentElement> {
        elements.iter().filter(|element| Self::matches(element, target)).collect()
    }

    pub fn matches(element: &DocumentElement, target: &Target) -> bool {
        match element.kind {
            ElementKind::Document => Self::matches_document(element, target),
            ElementKind::Section => Self::matches_text(
                element,
                target,
                element.title.as_deref().unwrap_or(element.text.as_str()),
            ),
            ElementKind::Paragraph => Self::matches_text(element, target, &element.text),
            ElementKind::Table => Self::matches_table(element, target),
            ElementKind::Cell => Self::matches_cell(element, target),
        }
    }

    /// A target without selector or id covers the whole document
    fn matches_document(element: &DocumentElement, target: &Target) -> bool {
        if target.element_id.is_none() && target.selector.trim().is_empty() {
            return true;
        }
        Self::matches_text(element, target, &element.text)
    }

    fn matches_text(element: &DocumentElement, target: &Target, haystack: &str) -> bool {
        if let Some(id) = &target.element_id {
            return element.id.eq_ignore_ascii_case(id.trim());
        }
        if target.is_all_selector() {
            return true;
        }

        let needle = target.selector.trim().to_lowercase();
        !needle.is_empty() && haystack.to_lowercase().contains(&needle)
    }

    fn matches_table(element: &DocumentElement, target: &Target) -> bool {
        if let Some(id) = &target.element_id {
            return element.id.eq_ignore_ascii_case(id.trim());
        }
        if target.is_all_selector() {
            return true;
        }

        let selector = target.selector.trim();
        !selector.is_empty() && element.id.eq_ignore_ascii_case(selector)
    }

    fn matches_cell(element: &DocumentElement, target: &Target) -> bool {
        let ElementMetadata::Cell { table_id, row, col, .. } = &element.metadata else {
            return false;
        };

        // An element id naming the cell itself is an exact match
        if let Some(id) = &target.element_id {
            if element.id.eq_ignore_ascii_case(id.trim()) {
                return true;
            }
        }

        if let Some(table) = target.table_filter() {
            if !table_id.eq_ignore_ascii_case(table.trim()) {
                return false;
            }
        }

        match &target.cell {
            Some(filter) => {
                filter.row.is_none_or(|r| r == *row) && filter.col.is_none_or(|c| c == *col)
            }
            None => true,
        }
    }
}
