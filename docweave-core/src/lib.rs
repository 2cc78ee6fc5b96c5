//! Core functionality for docweave
//!
//! This crate contains the instruction engine: document structure parsing,
//! instruction storage, conflict detection, model invocation and batch
//! execution against structured markup.

pub mod config;
pub mod conflicts;
pub mod document;
pub mod execution;
pub mod instructions;
pub mod integration;
pub mod llm;

pub use config::EngineConfig;
pub use conflicts::{Conflict, ConflictDetector, ConflictKind, ConflictSeverity};
pub use document::{DocumentElement, DocumentParser, DocumentStructure, ElementKind};
pub use execution::{
    Batch, BatchStatus, CancellationFlag, EngineError, ExecutionContext, ExecutionMode, ExecutionResult,
    Orchestrator,
};
pub use instructions::{
    Instruction, InstructionDraft, InstructionLevel, InstructionRepository, MemoryInstructionStore, Target,
};
pub use integration::{AnalysisDocument, ApplyOptions, ApplyOutcome, InstructionEngine, ProcessingSummary, SkipReason};
