//! Entry points for document-import pipelines
//!
//! [`InstructionEngine`] never returns an error for a processing request:
//! every failure is folded into the [`ProcessingSummary`] and the caller gets
//! the original content back.

use crate::conflicts::Conflict;
use crate::execution::{
    Batch, BatchStatus, CancellationFlag, EngineError, ExecutionContext, ExecutionMode, ExecutionResult,
    KnowledgeDocument, Orchestrator,
};
use crate::instructions::{Instruction, InstructionLevel, InstructionRepository, RepositoryError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;


/// Caller options for one processing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOptions {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Only run instructions of these levels
    #[serde(default)]
    pub levels: Option<Vec<InstructionLevel>>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub stop_on_error: bool,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub knowledge: Vec<KnowledgeDocument>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            levels: None,
            mode: ExecutionMode::Sequential,
            stop_on_error: false,
            variables: HashMap::new(),
            knowledge: Vec::new(),
        }
    }
}

impl ApplyOptions {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Default::default() }
    }

    pub fn with_levels(mut self, levels: Vec<InstructionLevel>) -> Self {
        self.levels = Some(levels);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

/// Why a request left the document untouched without running anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    Disabled,
    NoInstructions,
    NoMatchingTypes,
}

/// Machine-readable account of one processing request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub batch_id: Option<Uuid>,
    pub status: Option<BatchStatus>,
    pub mode: ExecutionMode,
    pub reason: Option<SkipReason>,
    pub total_instructions: usize,
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub changes: usize,
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub requires_reconciliation: bool,
}

impl ProcessingSummary {
    fn skipped(reason: SkipReason, mode: ExecutionMode) -> Self {
        Self { reason: Some(reason), mode, ..Default::default() }
    }

    fn failed(mode: ExecutionMode, error: &EngineError) -> Self {
        let mut summary = Self { mode, errors: vec![error.to_string()], ..Default::default() };
        if let EngineError::BlockingConflicts(conflicts) = error {
            summary.conflicts = conflicts.clone();
        }
        summary
    }

    fn from_batch(batch: &Batch) -> Self {
        let mut warnings: Vec<String> = batch.conflicts.iter().map(|c| c.description.clone()).collect();
        warnings.extend(batch.warnings());
        if batch.requires_reconciliation {
            warnings.push("Parallel results were not merged into the document".to_string());
        }

        Self {
            batch_id: Some(batch.id),
            status: Some(batch.status),
            mode: batch.mode,
            reason: None,
            total_instructions: batch.instructions.len(),
            executed: batch.results.len(),
            succeeded: batch.succeeded_count(),
            failed: batch.failed_count(),
            skipped: batch.skipped.len(),
            changes: batch.total_changes(),
            tokens_used: batch.total_tokens(),
            duration_ms: batch.total_duration_ms,
            conflicts: batch.conflicts.clone(),
            warnings,
            errors: batch.errors(),
            requires_reconciliation: batch.requires_reconciliation,
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Content handed back to the caller together with its summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub content: String,
    pub summary: ProcessingSummary,
    pub results: Vec<ExecutionResult>,
}

impl ApplyOutcome {
    fn unchanged(content: &str, summary: ProcessingSummary) -> Self {
        Self { content: content.to_string(), summary, results: Vec::new() }
    }
}

/// Analysis result produced by an import pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDocument {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_processing: Option<ProcessingSummary>,
    /// Pipeline fields passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AnalysisDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), instruction_processing: None, extra: serde_json::Map::new() }
    }
}

/// Repository plus orchestrator behind the processing entry points
pub struct InstructionEngine {
    repository: InstructionRepository,
    orchestrator: Orchestrator,
}

impl InstructionEngine {
    pub fn new(repository: InstructionRepository, orchestrator: Orchestrator) -> Self {
        Self { repository, orchestrator }
    }

    pub fn repository(&self) -> &InstructionRepository {
        &self.repository
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Apply the template's active instructions to `content`
    pub async fn apply_instructions_to_document(
        &self,
        content: &str,
        template_id: &str,
        user_id: &str,
        options: &ApplyOptions,
    ) -> ApplyOutcome {
        self.apply_with_cancellation(content, template_id, user_id, options, &CancellationFlag::new())
            .await
    }

    pub async fn apply_with_cancellation(
        &self,
        content: &str,
        template_id: &str,
        user_id: &str,
        options: &ApplyOptions,
        cancel: &CancellationFlag,
    ) -> ApplyOutcome {
        if !options.enabled {
            debug!("Instruction processing disabled for template {}", template_id);
            return ApplyOutcome::unchanged(content, ProcessingSummary::skipped(SkipReason::Disabled, options.mode));
        }

        let instructions = match self.repository.active(template_id, user_id).await {
            Ok(instructions) => instructions,
            Err(err) => {
                warn!("Could not load instructions for template {}: {}", template_id, err);
                return ApplyOutcome::unchanged(content, ProcessingSummary::failed(options.mode, &EngineError::from(err)));
            }
        };

        if instructions.is_empty() {
            return ApplyOutcome::unchanged(
                content,
                ProcessingSummary::skipped(SkipReason::NoInstructions, options.mode),
            );
        }

        let instructions = filter_levels(instructions, options.levels.as_deref());
        if instructions.is_empty() {
            return ApplyOutcome::unchanged(
                content,
                ProcessingSummary::skipped(SkipReason::NoMatchingTypes, options.mode),
            );
        }

        let context = ExecutionContext::new(content)
            .with_variables(options.variables.clone())
            .with_knowledge(options.knowledge.clone());

        let batch = match self
            .orchestrator
            .execute(instructions, options.mode, options.stop_on_error, context, cancel)
            .await
        {
            Ok(batch) => batch,
            Err(err) => {
                warn!("Instruction batch for template {} not run: {}", template_id, err);
                return ApplyOutcome::unchanged(content, ProcessingSummary::failed(options.mode, &err));
            }
        };

        let mut summary = ProcessingSummary::from_batch(&batch);
        summary.warnings.extend(self.record_results(&batch.results).await);

        info!(
            "Applied {} of {} instructions to template {} document ({} changes)",
            summary.succeeded, summary.total_instructions, template_id, summary.changes
        );

        ApplyOutcome { content: batch.final_content, summary, results: batch.results }
    }

    /// Conflicts among the template's active instructions
    pub async fn get_conflicts(&self, template_id: &str, user_id: &str) -> Result<Vec<Conflict>, RepositoryError> {
        self.get_conflicts_with(template_id, user_id, &ApplyOptions::default()).await
    }

    /// Conflicts as a batch run with `options` would see them.
    ///
    /// Level filtering, context variables and mode are taken from `options`.
    pub async fn get_conflicts_with(
        &self,
        template_id: &str,
        user_id: &str,
        options: &ApplyOptions,
    ) -> Result<Vec<Conflict>, RepositoryError> {
        let instructions = filter_levels(self.repository.active(template_id, user_id).await?, options.levels.as_deref());
        let available: HashSet<String> = options.variables.keys().cloned().collect();
        Ok(self.orchestrator.detector().detect_for_mode(&instructions, &available, None, options.mode))
    }

    /// Apply instructions to an analysis result and attach the summary
    pub async fn enrich_analysis(
        &self,
        mut analysis: AnalysisDocument,
        template_id: &str,
        user_id: &str,
        options: &ApplyOptions,
    ) -> AnalysisDocument {
        let outcome = self
            .apply_instructions_to_document(&analysis.content, template_id, user_id, options)
            .await;
        analysis.content = outcome.content;
        analysis.instruction_processing = Some(outcome.summary);
        analysis
    }

    /// Store history and stats; failures come back as warnings
    async fn record_results(&self, results: &[ExecutionResult]) -> Vec<String> {
        let mut warnings = Vec::new();
        for result in results {
            if let Err(err) = self.repository.record_execution(result.record()).await {
                warnings.push(format!("Execution history not recorded for '{}': {}", result.instruction.title, err));
            }
            if let Err(err) = self
                .repository
                .increment_performance_stats(result.instruction.id, result.success, result.duration_ms)
                .await
            {
                warnings.push(format!("Stats not updated for '{}': {}", result.instruction.title, err));
            }
        }
        warnings
    }
}

fn filter_levels(instructions: Vec<Instruction>, levels: Option<&[InstructionLevel]>) -> Vec<Instruction> {
    match levels {
        Some(levels) => instructions.into_iter().filter(|i| levels.contains(&i.level)).collect(),
        None => instructions,
    }
}
