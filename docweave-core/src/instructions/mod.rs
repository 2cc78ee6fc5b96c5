//! Template instructions
//!
//! An instruction is a stored natural-language directive scoped to one
//! structural level of a document template, plus the targeting metadata used
//! to find the elements it applies to.

mod formats;
mod repository;
mod store;
mod validation;

pub use formats::{ImportError, ImportFormat, InstructionFile, detect_format, load_drafts, parse_drafts};
pub use repository::{InstructionFilters, InstructionRepository};
pub use store::{
    ExecutionRecord, InstructionStats, InstructionStore, MemoryInstructionStore, RepositoryError,
};
pub use validation::{FieldViolation, ValidationError, validate_draft, validate_instruction};

use crate::document::ElementKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type InstructionId = Uuid;

/// Lowest and highest accepted priority
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;
pub const DEFAULT_PRIORITY: u8 = 5;

/// Structural level an instruction applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionLevel {
    Global,
    Section,
    Paragraph,
    Table,
    Cell,
}

impl InstructionLevel {
    pub const ALL: [InstructionLevel; 5] = [
        InstructionLevel::Global,
        InstructionLevel::Section,
        InstructionLevel::Paragraph,
        InstructionLevel::Table,
        InstructionLevel::Cell,
    ];

    /// Execution rank: coarser levels run first
    pub fn rank(&self) -> usize {
        match self {
            InstructionLevel::Global => 0,
            InstructionLevel::Section => 1,
            InstructionLevel::Paragraph => 2,
            InstructionLevel::Table => 3,
            InstructionLevel::Cell => 4,
        }
    }

    /// The only element kind this level may target
    pub fn element_kind(&self) -> ElementKind {
        match self {
            InstructionLevel::Global => ElementKind::Document,
            InstructionLevel::Section => ElementKind::Section,
            InstructionLevel::Paragraph => ElementKind::Paragraph,
            InstructionLevel::Table => ElementKind::Table,
            InstructionLevel::Cell => ElementKind::Cell,
        }
    }

    pub fn default_scope(&self) -> InstructionScope {
        match self {
            InstructionLevel::Global => InstructionScope::Document,
            InstructionLevel::Section => InstructionScope::Section,
            _ => InstructionScope::Element,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionLevel::Global => "global",
            InstructionLevel::Section => "section",
            InstructionLevel::Paragraph => "paragraph",
            InstructionLevel::Table => "table",
            InstructionLevel::Cell => "cell",
        }
    }
}

impl fmt::Display for InstructionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstructionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "global" | "document" => Ok(InstructionLevel::Global),
            "section" => Ok(InstructionLevel::Section),
            "paragraph" => Ok(InstructionLevel::Paragraph),
            "table" => Ok(InstructionLevel::Table),
            "cell" => Ok(InstructionLevel::Cell),
            other => Err(format!("unknown instruction level '{}'", other)),
        }
    }
}

/// Scope an instruction is declared for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionScope {
    Document,
    Section,
    Element,
}

/// Coordinates filter for cell targets; every field narrows independently
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellTarget {
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub row: Option<usize>,
    #[serde(default)]
    pub col: Option<usize>,
}

/// Target descriptor used to find the elements an instruction applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default = "Target::default_selector")]
    pub selector: String,
    #[serde(default)]
    pub element_id: Option<String>,
    #[serde(default)]
    pub cell: Option<CellTarget>,
}

impl Default for Target {
    fn default() -> Self {
        Self::all()
    }
}

impl Target {
    pub const ALL_SELECTOR: &'static str = "all";

    fn default_selector() -> String {
        Self::ALL_SELECTOR.to_string()
    }

    pub fn all() -> Self {
        Self { selector: Self::default_selector(), element_id: None, cell: None }
    }

    pub fn selector(selector: impl Into<String>) -> Self {
        Self { selector: selector.into(), element_id: None, cell: None }
    }

    pub fn element(id: impl Into<String>) -> Self {
        Self { selector: String::new(), element_id: Some(id.into()), cell: None }
    }

    pub fn cell(table_id: Option<&str>, row: Option<usize>, col: Option<usize>) -> Self {
        Self {
            selector: String::new(),
            element_id: None,
            cell: Some(CellTarget { table_id: table_id.map(str::to_string), row, col }),
        }
    }

    /// Selector equals `all` (case-insensitive)
    pub fn is_all_selector(&self) -> bool {
        self.selector.trim().eq_ignore_ascii_case(Self::ALL_SELECTOR)
    }

    /// Matches every element of its level with no narrowing filter
    pub fn is_unrestricted(&self) -> bool {
        self.element_id.is_none()
            && self.cell.as_ref().is_none_or(|c| c.table_id.is_none() && c.row.is_none() && c.col.is_none())
            && (self.is_all_selector() || (self.selector.trim().is_empty() && self.cell.is_some()))
    }

    /// The table a cell target is narrowed to, if any
    pub fn table_filter(&self) -> Option<&str> {
        self.cell
            .as_ref()
            .and_then(|c| c.table_id.as_deref())
            .or(self.element_id.as_deref())
            .or_else(|| {
                let selector = self.selector.trim();
                (!selector.is_empty() && !self.is_all_selector()).then_some(selector)
            })
    }

    /// Human-readable form for logs and warnings
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.selector.trim().is_empty() {
            parts.push(format!("selector '{}'", self.selector.trim()));
        }
        if let Some(id) = &self.element_id {
            parts.push(format!("id '{}'", id));
        }
        if let Some(cell) = &self.cell {
            let table = cell.table_id.as_deref().unwrap_or("*");
            let row = cell.row.map(|r| r.to_string()).unwrap_or_else(|| "*".to_string());
            let col = cell.col.map(|c| c.to_string()).unwrap_or_else(|| "*".to_string());
            parts.push(format!("cell {}[{},{}]", table, row, col));
        }
        if parts.is_empty() { "empty target".to_string() } else { parts.join(", ") }
    }
}

/// Before/after example passed to the model as a few-shot pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionExample {
    pub before: String,
    pub after: String,
}

/// A stored instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstructionId,
    pub template_id: String,
    pub user_id: String,
    pub level: InstructionLevel,
    pub scope: InstructionScope,
    pub title: String,
    /// Free-text directive sent to the model
    pub body: String,
    pub target: Target,
    pub active: bool,
    pub priority: u8,
    pub execution_order: u32,
    pub preserve_formatting: bool,
    pub substitute_variables: bool,
    pub context_aware: bool,
    pub prompt_template: Option<String>,
    pub examples: Vec<InstructionExample>,
    /// Variables that must be supplied upstream before this instruction runs
    pub dependent_variables: Vec<String>,
    /// Variables this instruction makes available to later instructions
    pub provided_variables: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub version: u32,
}

impl Instruction {
    /// Build an instruction from a draft; the draft is expected to be validated
    pub fn from_draft(
        draft: InstructionDraft,
        template_id: &str,
        user_id: &str,
        execution_order: u32,
    ) -> Self {
        let level = draft.level.unwrap_or(InstructionLevel::Global);
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            template_id: template_id.to_string(),
            user_id: user_id.to_string(),
            level,
            scope: draft.scope.unwrap_or_else(|| level.default_scope()),
            title: draft.title.trim().to_string(),
            body: draft.body.trim().to_string(),
            target: draft.target,
            active: draft.active,
            priority: draft.priority.unwrap_or(DEFAULT_PRIORITY),
            execution_order,
            preserve_formatting: draft.preserve_formatting,
            substitute_variables: draft.substitute_variables,
            context_aware: draft.context_aware,
            prompt_template: draft.prompt_template,
            examples: draft.examples,
            dependent_variables: draft.dependent_variables,
            provided_variables: draft.provided_variables,
            created_at: now,
            updated_at: now,
            created_by: user_id.to_string(),
            version: 1,
        }
    }

    /// Total execution order: level rank, then higher priority, then execution order
    pub fn execution_cmp(&self, other: &Self) -> Ordering {
        self.level
            .rank()
            .cmp(&other.level.rank())
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.execution_order.cmp(&other.execution_order))
    }
}

/// Stable sort of instructions into execution order
pub fn sort_for_execution(instructions: &mut [Instruction]) {
    instructions.sort_by(Instruction::execution_cmp);
}

fn default_true() -> bool {
    true
}

/// Unvalidated instruction input, as submitted by a caller or import file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionDraft {
    #[serde(default)]
    pub level: Option<InstructionLevel>,
    #[serde(default)]
    pub scope: Option<InstructionScope>,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "instruction")]
    pub body: String,
    #[serde(default)]
    pub target: Target,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub execution_order: Option<u32>,
    #[serde(default = "default_true")]
    pub preserve_formatting: bool,
    #[serde(default)]
    pub substitute_variables: bool,
    #[serde(default)]
    pub context_aware: bool,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub examples: Vec<InstructionExample>,
    #[serde(default)]
    pub dependent_variables: Vec<String>,
    #[serde(default)]
    pub provided_variables: Vec<String>,
}

impl InstructionDraft {
    pub fn new(level: InstructionLevel, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: Some(level),
            scope: None,
            title: title.into(),
            body: body.into(),
            target: Target::all(),
            active: true,
            priority: None,
            execution_order: None,
            preserve_formatting: true,
            substitute_variables: false,
            context_aware: false,
            prompt_template: None,
            examples: Vec::new(),
            dependent_variables: Vec::new(),
            provided_variables: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Partial update of a stored instruction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionUpdate {
    pub level: Option<InstructionLevel>,
    pub scope: Option<InstructionScope>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub target: Option<Target>,
    pub active: Option<bool>,
    pub priority: Option<u8>,
    pub execution_order: Option<u32>,
    pub preserve_formatting: Option<bool>,
    pub substitute_variables: Option<bool>,
    pub context_aware: Option<bool>,
    pub prompt_template: Option<Option<String>>,
    pub examples: Option<Vec<InstructionExample>>,
    pub dependent_variables: Option<Vec<String>>,
    pub provided_variables: Option<Vec<String>>,
}

impl InstructionUpdate {
    /// Apply the set fields onto a copy of `instruction`
    pub fn apply_to(&self, instruction: &Instruction) -> Instruction {
        let mut updated = instruction.clone();
        if let Some(level) = self.level {
            updated.level = level;
        }
        if let Some(scope) = self.scope {
            updated.scope = scope;
        }
        if let Some(title) = &self.title {
            updated.title = title.trim().to_string();
        }
        if let Some(body) = &self.body {
            updated.body = body.trim().to_string();
        }
        if let Some(target) = &self.target {
            updated.target = target.clone();
        }
        if let Some(active) = self.active {
            updated.active = active;
        }
        if let Some(priority) = self.priority {
            updated.priority = priority;
        }
        if let Some(order) = self.execution_order {
            updated.execution_order = order;
        }
        if let Some(flag) = self.preserve_formatting {
            updated.preserve_formatting = flag;
        }
        if let Some(flag) = self.substitute_variables {
            updated.substitute_variables = flag;
        }
        if let Some(flag) = self.context_aware {
            updated.context_aware = flag;
        }
        if let Some(template) = &self.prompt_template {
            updated.prompt_template = template.clone();
        }
        if let Some(examples) = &self.examples {
            updated.examples = examples.clone();
        }
        if let Some(vars) = &self.dependent_variables {
            updated.dependent_variables = vars.clone();
        }
        if let Some(vars) = &self.provided_variables {
            updated.provided_variables = vars.clone();
        }
        updated
    }
}
