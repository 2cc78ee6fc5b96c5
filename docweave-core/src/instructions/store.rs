//! Instruction storage
//!
//! The engine only talks to storage through [`InstructionStore`]. The bundled
//! [`MemoryInstructionStore`] backs tests and the CLI.

use super::{Instruction, InstructionId, ValidationError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Errors raised by instruction storage
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Instruction {id} not found")]
    NotFound { id: InstructionId },

    #[error("Execution order {order} is already taken at level {level}")]
    DuplicateOrder { level: String, order: u32 },

    #[error("Reorder for level {level} must list every instruction of that level exactly once")]
    IncompleteReorder { level: String },

    #[error("Instruction store unavailable: {message}")]
    Unavailable { message: String },
}

impl RepositoryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }
}

/// Immutable history entry for one instruction execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub instruction_id: InstructionId,
    pub template_id: String,
    pub user_id: String,
    pub success: bool,
    pub duration_ms: u64,
    pub tokens_used: u32,
    pub confidence: Option<f32>,
    pub changes: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub executed_at: DateTime<Utc>,
}

/// Aggregated performance of one instruction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionStats {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl InstructionStats {
    pub fn average_duration_ms(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.executions as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 { 0.0 } else { self.successes as f64 / self.executions as f64 }
    }
}

/// Narrow persistence interface for instructions and their history
#[async_trait]
pub trait InstructionStore: Send + Sync {
    async fn insert(&self, instruction: Instruction) -> Result<(), RepositoryError>;

    /// All instructions of a template owned by a user, in no particular order
    async fn list(&self, template_id: &str, user_id: &str) -> Result<Vec<Instruction>, RepositoryError>;

    async fn get(&self, id: InstructionId) -> Result<Option<Instruction>, RepositoryError>;

    /// Replace a stored instruction with the same id
    async fn replace(&self, instruction: Instruction) -> Result<(), RepositoryError>;

    async fn remove(&self, id: InstructionId) -> Result<Option<Instruction>, RepositoryError>;

    async fn record_execution(&self, record: ExecutionRecord) -> Result<(), RepositoryError>;

    async fn increment_performance_stats(
        &self,
        id: InstructionId,
        success: bool,
        duration_ms: u64,
    ) -> Result<(), RepositoryError>;

    async fn stats(&self, id: InstructionId) -> Result<InstructionStats, RepositoryError>;

    async fn executions(&self, id: InstructionId) -> Result<Vec<ExecutionRecord>, RepositoryError>;
}

/// In-memory store over concurrent maps
#[derive(Debug)]
pub struct MemoryInstructionStore {
    instructions: DashMap<InstructionId, Instruction>,
    history: DashMap<InstructionId, Vec<ExecutionRecord>>,
    stats: DashMap<InstructionId, InstructionStats>,
    available: AtomicBool,
}

impl Default for MemoryInstructionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInstructionStore {
    pub fn new() -> Self {
        Self {
            instructions: DashMap::new(),
            history: DashMap::new(),
            stats: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backing store going offline
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    fn check(&self) -> Result<(), RepositoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepositoryError::unavailable("memory store is offline"))
        }
    }
}

#[async_trait]
impl InstructionStore for MemoryInstructionStore {
    async fn insert(&self, instruction: Instruction) -> Result<(), RepositoryError> {
        self.check()?;
        self.instructions.insert(instruction.id, instruction);
        Ok(())
    }

    async fn list(&self, template_id: &str, user_id: &str) -> Result<Vec<Instruction>, RepositoryError> {
        self.check()?;
        Ok(self
            .instructions
            .iter()
            .filter(|entry| entry.template_id == template_id && entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get(&self, id: InstructionId) -> Result<Option<Instruction>, RepositoryError> {
        self.check()?;
        Ok(self.instructions.get(&id).map(|entry| entry.value().clone()))
    }

    async fn replace(&self, instruction: Instruction) -> Result<(), RepositoryError> {
        self.check()?;
        match self.instructions.get_mut(&instruction.id) {
            Some(mut entry) => {
                *entry = instruction;
                Ok(())
            }
            None => Err(RepositoryError::NotFound { id: instruction.id }),
        }
    }

    async fn remove(&self, id: InstructionId) -> Result<Option<Instruction>, RepositoryError> {
        self.check()?;
        Ok(self.instructions.remove(&id).map(|(_, instruction)| instruction))
    }

    async fn record_execution(&self, record: ExecutionRecord) -> Result<(), RepositoryError> {
        self.check()?;
        self.history.entry(record.instruction_id).or_default().push(record);
        Ok(())
    }

    async fn increment_performance_stats(
        &self,
        id: InstructionId,
        success: bool,
        duration_ms: u64,
    ) -> Result<(), RepositoryError> {
        self.check()?;
        let mut stats = self.stats.entry(id).or_default();
        stats.executions += 1;
        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        stats.total_duration_ms += duration_ms;
        stats.last_executed_at = Some(Utc::now());
        Ok(())
    }

    async fn stats(&self, id: InstructionId) -> Result<InstructionStats, RepositoryError> {
        self.check()?;
        Ok(self.stats.get(&id).map(|entry| entry.value().clone()).unwrap_or_default())
    }

    async fn executions(&self, id: InstructionId) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        self.check()?;
        Ok(self.history.get(&id).map(|entry| entry.value().clone()).unwrap_or_default())
    }
}
