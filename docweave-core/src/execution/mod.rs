//! Instruction execution
//!
//! An [`Orchestrator`] runs a [`Batch`] of instructions against a document,
//! dispatching each instruction through the [`LevelExecutor`] registered for
//! its level.

pub mod executor;
pub mod orchestrator;

pub use executor::{
    CellExecutor, ExecutorTable, GlobalExecutor, LevelExecutor, ParagraphExecutor, SectionExecutor,
    TableExecutor,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig};

use crate::conflicts::Conflict;
use crate::document::ContentChange;
use crate::instructions::{ExecutionRecord, Instruction, InstructionId, RepositoryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use uuid::Uuid;

/// Errors that refuse or abort a whole batch
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Batch refused: {} blocking conflict(s): {}", .0.len(), describe_conflicts(.0))]
    BlockingConflicts(Vec<Conflict>),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Batch was cancelled")]
    Cancelled,

    #[error("Nesting depth {depth} exceeds the maximum of {max}")]
    DepthExceeded { depth: u32, max: u32 },

    #[error("Invalid batch transition from {from} to {to}")]
    InvalidTransition { from: BatchStatus, to: BatchStatus },
}

fn describe_conflicts(conflicts: &[Conflict]) -> String {
    conflicts.iter().map(|c| c.description.as_str()).collect::<Vec<_>>().join("; ")
}

/// Reference text usable as model context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub title: String,
    pub content: String,
}

impl KnowledgeDocument {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self { title: title.into(), content: content.into() }
    }
}

/// Inputs visible to one instruction execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub current_content: String,
    pub original_content: String,
    pub variables: HashMap<String, String>,
    pub knowledge: Vec<KnowledgeDocument>,
    /// Instructions already applied before this one, oldest first
    pub parent_instructions: Vec<InstructionId>,
    pub depth: u32,
}

impl ExecutionContext {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            original_content: content.clone(),
            current_content: content,
            variables: HashMap::new(),
            knowledge: Vec::new(),
            parent_instructions: Vec::new(),
            depth: 0,
        }
    }

    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_knowledge(mut self, knowledge: Vec<KnowledgeDocument>) -> Self {
        self.knowledge.extend(knowledge);
        self
    }

    /// Context for the next sequential step after `result` succeeded
    pub fn applied(&self, result: &ExecutionResult) -> Self {
        let mut next = self.clone();
        next.current_content = result.modified_content.clone();
        next.parent_instructions.push(result.instruction.id);
        next.variables.extend(result.provided_variables.clone());
        next
    }

    /// Context for executions nested under `parent`
    pub fn nested(&self, parent: InstructionId, max_depth: u32) -> Result<Self, EngineError> {
        let depth = self.depth + 1;
        if depth > max_depth {
            return Err(EngineError::DepthExceeded { depth, max: max_depth });
        }
        let mut nested = self.clone();
        nested.depth = depth;
        nested.parent_instructions.push(parent);
        Ok(nested)
    }

    pub fn available_variables(&self) -> HashSet<String> {
        self.variables.keys().cloned().collect()
    }
}

/// What an execution actually drew on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUsage {
    pub variables: Vec<String>,
    pub knowledge_documents: Vec<String>,
    pub parent_instructions: Vec<InstructionId>,
}

impl ContextUsage {
    pub fn merge(&mut self, other: ContextUsage) {
        for var in other.variables {
            if !self.variables.contains(&var) {
                self.variables.push(var);
            }
        }
        for doc in other.knowledge_documents {
            if !self.knowledge_documents.contains(&doc) {
                self.knowledge_documents.push(doc);
            }
        }
        if self.parent_instructions.is_empty() {
            self.parent_instructions = other.parent_instructions;
        }
    }
}

/// Outcome of applying one instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub instruction: Instruction,
    pub success: bool,
    pub original_content: String,
    pub modified_content: String,
    pub changes: Vec<ContentChange>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub tokens_used: u32,
    /// Mean confidence over the completions, absent when nothing was invoked
    pub confidence: Option<f32>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub context_used: ContextUsage,
    /// Values bound to the instruction's provided variables
    pub provided_variables: BTreeMap<String, String>,
    pub provider: Option<String>,
    pub used_fallback: bool,
}

impl ExecutionResult {
    pub(crate) fn begin(instruction: &Instruction, content: &str) -> Self {
        Self {
            instruction: instruction.clone(),
            success: false,
            original_content: content.to_string(),
            modified_content: content.to_string(),
            changes: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
            tokens_used: 0,
            confidence: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            context_used: ContextUsage::default(),
            provided_variables: BTreeMap::new(),
            provider: None,
            used_fallback: false,
        }
    }

    pub fn instruction_id(&self) -> InstructionId {
        self.instruction.id
    }

    pub fn is_noop(&self) -> bool {
        self.success && self.changes.is_empty()
    }

    /// History entry for the instruction store
    pub fn record(&self) -> ExecutionRecord {
        ExecutionRecord {
            instruction_id: self.instruction.id,
            template_id: self.instruction.template_id.clone(),
            user_id: self.instruction.user_id.clone(),
            success: self.success,
            duration_ms: self.duration_ms,
            tokens_used: self.tokens_used,
            confidence: self.confidence,
            changes: self.changes.len(),
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
            executed_at: self.started_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Content threaded forward from one instruction to the next
    #[default]
    Sequential,
    /// Every instruction runs against the same base snapshot
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Parallel => f.write_str("parallel"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled)
    }

    fn can_move_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Pending, BatchStatus::Executing)
                | (BatchStatus::Pending, BatchStatus::Cancelled)
                | (BatchStatus::Executing, BatchStatus::Completed)
                | (BatchStatus::Executing, BatchStatus::Failed)
                | (BatchStatus::Executing, BatchStatus::Cancelled)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Executing => "executing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// One orchestrated run of instructions against a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    /// Instructions in execution order
    pub instructions: Vec<Instruction>,
    pub mode: ExecutionMode,
    pub stop_on_error: bool,
    pub status: BatchStatus,
    /// Non-blocking conflicts found before execution
    pub conflicts: Vec<Conflict>,
    pub results: Vec<ExecutionResult>,
    /// Instructions never attempted
    pub skipped: Vec<InstructionId>,
    pub base_content: String,
    pub final_content: String,
    /// Parallel results diverge from the base and were not merged
    pub requires_reconciliation: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_duration_ms: u64,
}

impl Batch {
    pub fn new(instructions: Vec<Instruction>, mode: ExecutionMode, stop_on_error: bool, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            instructions,
            mode,
            stop_on_error,
            status: BatchStatus::Pending,
            conflicts: Vec::new(),
            results: Vec::new(),
            skipped: Vec::new(),
            base_content: content.to_string(),
            final_content: content.to_string(),
            requires_reconciliation: false,
            started_at: None,
            completed_at: None,
            total_duration_ms: 0,
        }
    }

    pub fn transition(&mut self, next: BatchStatus) -> Result<(), EngineError> {
        if !self.status.can_move_to(next) {
            return Err(EngineError::InvalidTransition { from: self.status, to: next });
        }
        match next {
            BatchStatus::Executing => self.started_at = Some(Utc::now()),
            _ if next.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// Completed without failures, Failed otherwise
    pub fn finish(&mut self) -> Result<(), EngineError> {
        let next = if self.failed_count() > 0 { BatchStatus::Failed } else { BatchStatus::Completed };
        self.transition(next)
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    pub fn total_tokens(&self) -> u64 {
        self.results.iter().map(|r| u64::from(r.tokens_used)).sum()
    }

    pub fn total_changes(&self) -> usize {
        self.results.iter().map(|r| r.changes.len()).sum()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.results.iter().flat_map(|r| r.warnings.iter().cloned()).collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|r| r.errors.iter().map(move |e| format!("{}: {}", r.instruction.title, e)))
            .collect()
    }
}

/// Cooperative cancellation shared between a caller and a running batch
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
