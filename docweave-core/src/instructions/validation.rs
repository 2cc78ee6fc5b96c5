//! Instruction validation
//!
//! Every rule is checked so a caller sees all violated fields at once.

use super::{Instruction, InstructionDraft, InstructionLevel, MAX_PRIORITY, MIN_PRIORITY, Target};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const MAX_TITLE_CHARS: usize = 200;

/// One violated field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self { field: field.to_string(), message: message.into() }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Rejected instruction definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid instruction: {}", format_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Validate a draft before it is stored
pub fn validate_draft(draft: &InstructionDraft) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    check_title(&draft.title, &mut violations);
    check_body(&draft.body, &mut violations);
    match draft.level {
        Some(level) => check_target(level, &draft.target, &mut violations),
        None => violations.push(FieldViolation::new(
            "level",
            "is required (global, section, paragraph, table or cell)",
        )),
    }
    if let Some(priority) = draft.priority {
        check_priority(priority, &mut violations);
    }
    if draft.execution_order == Some(0) {
        violations.push(FieldViolation::new("execution_order", "must be at least 1"));
    }

    finish(violations)
}

/// Validate a stored instruction after an update has been applied to it
pub fn validate_instruction(instruction: &Instruction) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    check_title(&instruction.title, &mut violations);
    check_body(&instruction.body, &mut violations);
    check_target(instruction.level, &instruction.target, &mut violations);
    check_priority(instruction.priority, &mut violations);
    if instruction.execution_order == 0 {
        violations.push(FieldViolation::new("execution_order", "must be at least 1"));
    }

    finish(violations)
}

fn finish(violations: Vec<FieldViolation>) -> Result<(), ValidationError> {
    if violations.is_empty() { Ok(()) } else { Err(ValidationError { violations }) }
}

fn check_title(title: &str, violations: &mut Vec<FieldViolation>) {
    let title = title.trim();
    if title.is_empty() {
        violations.push(FieldViolation::new("title", "is required"));
    } else if title.chars().count() > MAX_TITLE_CHARS {
        violations.push(FieldViolation::new(
            "title",
            format!("must be at most {} characters", MAX_TITLE_CHARS),
        ));
    }
}

fn check_body(body: &str, violations: &mut Vec<FieldViolation>) {
    if body.trim().is_empty() {
        violations.push(FieldViolation::new("body", "is required"));
    }
}

fn check_priority(priority: u8, violations: &mut Vec<FieldViolation>) {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        violations.push(FieldViolation::new(
            "priority",
            format!("must be between {} and {}, got {}", MIN_PRIORITY, MAX_PRIORITY, priority),
        ));
    }
}

fn check_target(level: InstructionLevel, target: &Target, violations: &mut Vec<FieldViolation>) {
    if level == InstructionLevel::Global {
        return;
    }

    let has_selector = !target.selector.trim().is_empty();
    let has_id = target.element_id.as_deref().is_some_and(|id| !id.trim().is_empty());
    if !has_selector && !has_id && target.cell.is_none() {
        violations.push(FieldViolation::new(
            "target",
            format!("{} instructions need a selector, element id or cell coordinates", level),
        ));
    }
    if target.cell.is_some() && level != InstructionLevel::Cell {
        violations.push(FieldViolation::new(
            "target.cell",
            format!("cell coordinates are only valid for cell instructions, not {}", level),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_draft() {
        let draft = InstructionDraft::new(InstructionLevel::Paragraph, "Tone", "Use a formal tone");
        assert!(validate_draft(&draft).is_ok());
    }

    #[test]
    fn test_every_violation_is_reported() {
        let mut draft = InstructionDraft::new(InstructionLevel::Table, "  ", "");
        draft.level = None;
        draft.priority = Some(11);

        let err = validate_draft(&draft).unwrap_err();
        assert_eq!(err.fields(), vec!["title", "body", "level", "priority"]);
        assert!(err.to_string().starts_with("Invalid instruction: title: is required"));
    }

    #[test]
    fn test_priority_bounds() {
        for (priority, ok) in [(0, false), (1, true), (10, true), (11, false)] {
            let draft = InstructionDraft::new(InstructionLevel::Global, "t", "b").with_priority(priority);
            assert_eq!(validate_draft(&draft).is_ok(), ok, "priority {}", priority);
        }
    }

    #[test]
    fn test_title_length() {
        let draft = InstructionDraft::new(InstructionLevel::Global, "x".repeat(201), "b");
        assert!(validate_draft(&draft).unwrap_err().has_field("title"));
    }

    #[test]
    fn test_target_required_below_global() {
        let draft = InstructionDraft::new(InstructionLevel::Section, "t", "b").with_target(Target::selector(""));
        assert!(validate_draft(&draft).unwrap_err().has_field("target"));

        let global = InstructionDraft::new(InstructionLevel::Global, "t", "b").with_target(Target::selector(""));
        assert!(validate_draft(&global).is_ok());
    }

    #[test]
    fn test_cell_coordinates_only_for_cells() {
        let draft = InstructionDraft::new(InstructionLevel::Table, "t", "b")
            .with_target(Target::cell(Some("budget"), Some(0), None));
        assert!(validate_draft(&draft).unwrap_err().has_field("target.cell"));

        let cell = InstructionDraft::new(InstructionLevel::Cell, "t", "b")
            .with_target(Target::cell(Some("budget"), Some(0), None));
        assert!(validate_draft(&cell).is_ok());
    }
}
