//! Batch orchestration
//!
//! Instructions run in `(level rank, -priority, execution order)` order.
//! Sequential batches thread content forward; parallel batches run every
//! instruction against the same snapshot and leave reconciliation to the
//! caller.

use super::{Batch, BatchStatus, CancellationFlag, EngineError, ExecutionContext, ExecutionMode, ExecutionResult};
use super::executor::ExecutorTable;
use crate::conflicts::{self, ConflictDetector};
use crate::document::{ChangeTracker, DocumentParser, Replacement, TargetResolver};
use crate::instructions::{Instruction, sort_for_execution};
use crate::llm::{AiInvoker, PreparedInstruction};
use futures::future::join_all;
use markup_regex::text;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Orchestrator limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Concurrent model calls in parallel mode
    pub max_concurrency: usize,
    /// Maximum nesting depth of dependent executions
    pub max_depth: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_concurrency: 4, max_depth: 3 }
    }
}

/// Runs batches of instructions against a document
pub struct Orchestrator {
    invoker: AiInvoker,
    executors: ExecutorTable,
    parser: DocumentParser,
    tracker: ChangeTracker,
    detector: ConflictDetector,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(invoker: AiInvoker) -> Self {
        Self {
            invoker,
            executors: ExecutorTable::new(),
            parser: DocumentParser::new(),
            tracker: ChangeTracker::default(),
            detector: ConflictDetector::new(),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tracker(mut self, tracker: ChangeTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_executors(mut self, executors: ExecutorTable) -> Self {
        self.executors = executors;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    /// Active instructions in execution order
    pub fn order(instructions: Vec<Instruction>) -> Vec<Instruction> {
        let mut ordered: Vec<Instruction> = instructions.into_iter().filter(|i| i.active).collect();
        sort_for_execution(&mut ordered);
        ordered
    }

    /// Order instructions and check them for conflicts.
    ///
    /// Every blocking conflict is reported together; the batch is not created.
    pub fn prepare(
        &self,
        instructions: Vec<Instruction>,
        mode: ExecutionMode,
        stop_on_error: bool,
        context: &ExecutionContext,
    ) -> Result<Batch, EngineError> {
        let ordered = Self::order(instructions);
        let structure = self.parser.parse(&context.current_content);
        let found = self
            .detector
            .detect_for_mode(&ordered, &context.available_variables(), Some(&structure), mode);

        let blocking = conflicts::blocking(&found);
        if !blocking.is_empty() {
            error!("Refusing batch: {} blocking conflicts", blocking.len());
            return Err(EngineError::BlockingConflicts(blocking));
        }

        let mut batch = Batch::new(ordered, mode, stop_on_error, &context.current_content);
        batch.conflicts = found;
        Ok(batch)
    }

    /// Prepare and run a batch
    pub async fn execute(
        &self,
        instructions: Vec<Instruction>,
        mode: ExecutionMode,
        stop_on_error: bool,
        context: ExecutionContext,
        cancel: &CancellationFlag,
    ) -> Result<Batch, EngineError> {
        let mut batch = self.prepare(instructions, mode, stop_on_error, &context)?;
        self.run(&mut batch, context, cancel).await?;
        Ok(batch)
    }

    /// Run a prepared batch to a terminal status
    pub async fn run(
        &self,
        batch: &mut Batch,
        context: ExecutionContext,
        cancel: &CancellationFlag,
    ) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            batch.skipped = batch.instructions.iter().map(|i| i.id).collect();
            return batch.transition(BatchStatus::Cancelled);
        }

        batch.transition(BatchStatus::Executing)?;
        info!(
            "Executing batch {} with {} instructions ({} mode)",
            batch.id,
            batch.instructions.len(),
            batch.mode
        );
        let started = Instant::now();

        let cancelled = match batch.mode {
            ExecutionMode::Sequential => self.run_sequential(batch, context, cancel).await,
            ExecutionMode::Parallel => self.run_parallel(batch, context, cancel).await,
        };

        batch.total_duration_ms = elapsed_ms(started);
        if cancelled {
            warn!("Batch {} cancelled after {} results", batch.id, batch.results.len());
            batch.transition(BatchStatus::Cancelled)?;
        } else {
            batch.finish()?;
        }

        info!(
            "Batch {} {}: {} succeeded, {} failed, {} skipped in {}ms",
            batch.id,
            batch.status,
            batch.succeeded_count(),
            batch.failed_count(),
            batch.skipped.len(),
            batch.total_duration_ms
        );
        Ok(())
    }

    /// Returns whether the batch was cancelled
    async fn run_sequential(&self, batch: &mut Batch, context: ExecutionContext, cancel: &CancellationFlag) -> bool {
        let mut context = context;
        let instructions = batch.instructions.clone();

        for (index, instruction) in instructions.iter().enumerate() {
            if cancel.is_cancelled() {
                batch.skipped.extend(instructions[index..].iter().map(|i| i.id));
                batch.final_content = context.current_content;
                return true;
            }

            let result = self.execute_instruction(instruction, &context).await;
            let failed = !result.success;
            if !failed {
                context = context.applied(&result);
            }
            batch.results.push(result);

            if failed && batch.stop_on_error {
                warn!("Stopping batch {} after failure of '{}'", batch.id, instruction.title);
                batch.skipped.extend(instructions[index + 1..].iter().map(|i| i.id));
                break;
            }
        }

        batch.final_content = context.current_content;
        false
    }

    /// Returns whether the batch was cancelled
    async fn run_parallel(&self, batch: &mut Batch, context: ExecutionContext, cancel: &CancellationFlag) -> bool {
        let semaphore = Semaphore::new(self.config.max_concurrency.max(1));
        let snapshot = &context;
        let semaphore = &semaphore;

        let tasks = batch.instructions.iter().map(|instruction| async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return None;
            };
            if cancel.is_cancelled() {
                return None;
            }
            let result = self.execute_instruction(instruction, snapshot).await;
            // In-flight results of a cancelled batch are discarded
            (!cancel.is_cancelled()).then_some(result)
        });
        let outcomes = join_all(tasks).await;

        for (instruction, outcome) in batch.instructions.iter().zip(outcomes) {
            match outcome {
                Some(result) => batch.results.push(result),
                None => batch.skipped.push(instruction.id),
            }
        }

        batch.final_content = context.current_content.clone();
        batch.requires_reconciliation = batch.results.iter().any(|r| r.success && !r.changes.is_empty());
        cancel.is_cancelled()
    }

    /// Apply one instruction to the context's current content.
    ///
    /// Never fails: problems are recorded on the result.
    pub async fn execute_instruction(&self, instruction: &Instruction, context: &ExecutionContext) -> ExecutionResult {
        let started = Instant::now();
        let mut result = ExecutionResult::begin(instruction, &context.current_content);
        result.context_used.parent_instructions = context.parent_instructions.clone();

        if context.depth > self.config.max_depth {
            result.errors.push(
                EngineError::DepthExceeded { depth: context.depth, max: self.config.max_depth }.to_string(),
            );
            result.duration_ms = elapsed_ms(started);
            return result;
        }

        let prepared = PreparedInstruction::prepare(instruction, &context.variables);
        for name in &prepared.missing_variables {
            result.warnings.push(format!("Variable '{}' has no value; placeholder left in place", name));
        }

        // Content may have changed since the previous instruction, so parse afresh
        let structure = self.parser.parse(&context.current_content);
        let targets = TargetResolver::resolve(&structure, instruction.level, &instruction.target);

        if targets.is_empty() {
            let warning = format!(
                "No {} elements matched {}",
                instruction.level.element_kind(),
                instruction.target.describe()
            );
            warn!("Instruction '{}': {}", instruction.title, warning);
            result.warnings.push(warning);
            result.success = true;
            result.duration_ms = elapsed_ms(started);
            return result;
        }

        debug!("Instruction '{}' matched {} {} elements", instruction.title, targets.len(), instruction.level);

        let mut replacements = Vec::with_capacity(targets.len());
        let mut confidences = Vec::with_capacity(targets.len());

        for element in &targets {
            match self
                .executors
                .invoke(&self.invoker, instruction, &prepared, context, element, &structure)
                .await
            {
                Ok((completion, usage)) => {
                    result.tokens_used = result.tokens_used.saturating_add(completion.tokens_used);
                    result.used_fallback |= completion.used_fallback;
                    result.provider = Some(completion.provider.clone());
                    result.context_used.merge(usage);
                    confidences.push(completion.confidence);
                    replacements.push(Replacement::for_element(element, completion.text, completion.confidence));
                }
                Err(err) => {
                    warn!("Instruction '{}' failed on {}: {}", instruction.title, element.id, err);
                    result.errors.push(format!("{}: {}", element.id, err));
                    result.duration_ms = elapsed_ms(started);
                    return result;
                }
            }
        }

        if !confidences.is_empty() {
            result.confidence = Some(confidences.iter().sum::<f32>() / confidences.len() as f32);
        }

        let last_output = replacements.last().map(|r| text::strip_tags(&r.new_content));
        match self.tracker.apply_all(&context.current_content, replacements) {
            Ok((content, changes)) => {
                result.modified_content = content;
                result.changes = changes;
                result.success = true;
                if let Some(value) = last_output {
                    for name in &instruction.provided_variables {
                        result.provided_variables.insert(name.clone(), value.clone());
                    }
                }
            }
            Err(err) => {
                error!("Instruction '{}' produced unusable replacements: {}", instruction.title, err);
                result.errors.push(err.to_string());
            }
        }

        result.duration_ms = elapsed_ms(started);
        result
    }

    /// Run `children` sequentially one nesting level below `parent`
    pub async fn execute_nested(
        &self,
        parent: &Instruction,
        children: Vec<Instruction>,
        context: &ExecutionContext,
        cancel: &CancellationFlag,
    ) -> Result<Batch, EngineError> {
        let nested = context.nested(parent.id, self.config.max_depth)?;
        self.execute(children, ExecutionMode::Sequential, true, nested, cancel).await
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::{InstructionDraft, InstructionLevel, Target};
    use crate::llm::mock::MockCompletionProvider;
    use crate::llm::AiError;
    use std::sync::Arc;
    use std::time::Duration;

    fn instruction(level: InstructionLevel, title: &str, body: &str, target: Target, order: u32) -> Instruction {
        let draft = InstructionDraft::new(level, title, body).with_target(target);
        Instruction::from_draft(draft, "tpl", "u", order)
    }

    fn orchestrator(provider: MockCompletionProvider) -> Orchestrator {
        Orchestrator::new(AiInvoker::new(Arc::new(provider)))
    }

    #[test]
    fn test_order_drops_inactive_and_sorts() {
        let mut inactive = instruction(InstructionLevel::Global, "off", "b", Target::all(), 1);
        inactive.active = false;
        let ordered = Orchestrator::order(vec![
            instruction(InstructionLevel::Cell, "cell", "b", Target::all(), 1),
            inactive,
            instruction(InstructionLevel::Global, "global", "b", Target::all(), 2),
        ]);
        let titles: Vec<_> = ordered.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["global", "cell"]);
    }

    #[tokio::test]
    async fn test_sequential_threads_content() {
        let provider = MockCompletionProvider::transforming("mock", |c| format!("{}!", c));
        let orchestrator = orchestrator(provider.clone());
        let doc = "<p>a</p><p>b</p>";

        let batch = orchestrator
            .execute(
                vec![
                    instruction(InstructionLevel::Paragraph, "first", "x", Target::element("paragraph-0"), 1),
                    instruction(InstructionLevel::Paragraph, "second", "x", Target::all(), 2),
                ],
                ExecutionMode::Sequential,
                false,
                ExecutionContext::new(doc),
                &CancellationFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.final_content, "<p>a!!</p><p>b!</p>");
        assert_eq!(provider.requested_contents(), vec!["a", "a!", "b"]);
        assert_eq!(batch.results[1].context_used.parent_instructions, vec![batch.results[0].instruction.id]);
    }

    #[tokio::test]
    async fn test_parallel_uses_one_snapshot() {
        let provider = MockCompletionProvider::transforming("mock", |c| c.to_uppercase());
        let orchestrator = orchestrator(provider.clone());
        let doc = "<p>a</p><p>b</p>";

        let batch = orchestrator
            .execute(
                vec![
                    instruction(InstructionLevel::Paragraph, "first", "x", Target::element("paragraph-0"), 1),
                    instruction(InstructionLevel::Paragraph, "second", "x", Target::element("paragraph-1"), 2),
                ],
                ExecutionMode::Parallel,
                false,
                ExecutionContext::new(doc),
                &CancellationFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.results[0].original_content, doc);
        assert_eq!(batch.results[1].original_content, doc);
        assert_eq!(batch.results[0].modified_content, "<p>A</p><p>b</p>");
        assert_eq!(batch.results[1].modified_content, "<p>a</p><p>B</p>");
        assert_eq!(batch.final_content, doc);
        assert!(batch.requires_reconciliation);
    }

    #[tokio::test]
    async fn test_failure_without_stop_continues_from_last_good_content() {
        let provider = MockCompletionProvider::transforming("mock", |c| format!("[{}]", c));
        provider.push_response(crate::llm::CompletionResponse::new("one", 5));
        provider.push_error(AiError::network("down"));
        let orchestrator = orchestrator(provider);

        let batch = orchestrator
            .execute(
                vec![
                    instruction(InstructionLevel::Global, "a", "x", Target::all(), 1),
                    instruction(InstructionLevel::Global, "b", "x", Target::all(), 2),
                    instruction(InstructionLevel::Global, "c", "x", Target::all(), 3),
                ],
                ExecutionMode::Sequential,
                false,
                ExecutionContext::new("zero"),
                &CancellationFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.results.len(), 3);
        assert!(!batch.results[1].success);
        assert_eq!(batch.results[2].original_content, "one");
        assert_eq!(batch.final_content, "[one]");
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let orchestrator = orchestrator(MockCompletionProvider::new());
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let batch = orchestrator
            .execute(
                vec![instruction(InstructionLevel::Global, "a", "x", Target::all(), 1)],
                ExecutionMode::Sequential,
                false,
                ExecutionContext::new("doc"),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Cancelled);
        assert!(batch.results.is_empty());
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.final_content, "doc");
    }

    #[tokio::test]
    async fn test_sequential_cancel_mid_batch_keeps_applied_content() {
        let cancel = CancellationFlag::new();
        let trigger = cancel.clone();
        let provider = MockCompletionProvider::new().with_handler(move |c| {
            trigger.cancel();
            Ok(c.to_uppercase())
        });
        let orchestrator = orchestrator(provider.clone());

        let batch = orchestrator
            .execute(
                vec![
                    instruction(InstructionLevel::Global, "a", "x", Target::all(), 1),
                    instruction(InstructionLevel::Global, "b", "x", Target::all(), 2),
                    instruction(InstructionLevel::Global, "c", "x", Target::all(), 3),
                ],
                ExecutionMode::Sequential,
                false,
                ExecutionContext::new("doc"),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Cancelled);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(batch.results.len(), 1);
        assert_eq!(batch.skipped.len(), 2);
        assert_eq!(batch.skipped[0], batch.instructions[1].id);
        assert_eq!(batch.final_content, "DOC");
    }

    #[tokio::test]
    async fn test_parallel_cancel_discards_in_flight_results() {
        let cancel = CancellationFlag::new();
        let trigger = cancel.clone();
        let provider = MockCompletionProvider::new()
            .with_delay(Duration::from_millis(20))
            .with_handler(move |c| {
                trigger.cancel();
                Ok(c.to_uppercase())
            });
        let orchestrator = orchestrator(provider.clone());
        let doc = "<p>a</p><p>b</p><p>c</p>";

        let batch = orchestrator
            .execute(
                (0..3)
                    .map(|i| {
                        let target = Target::element(format!("paragraph-{}", i));
                        instruction(InstructionLevel::Paragraph, "p", "x", target, i + 1)
                    })
                    .collect(),
                ExecutionMode::Parallel,
                false,
                ExecutionContext::new(doc),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Cancelled);
        assert_eq!(provider.call_count(), 3);
        assert!(batch.results.is_empty());
        assert_eq!(batch.skipped.len(), 3);
        assert_eq!(batch.final_content, doc);
        assert!(!batch.requires_reconciliation);
    }

    #[tokio::test]
    async fn test_parallel_respects_max_concurrency() {
        let provider =
            MockCompletionProvider::transforming("mock", |c| c.to_uppercase()).with_delay(Duration::from_millis(20));
        let orchestrator = orchestrator(provider.clone())
            .with_config(OrchestratorConfig { max_concurrency: 2, max_depth: 3 });
        let doc = "<p>a</p><p>b</p><p>c</p><p>d</p><p>e</p>";

        let batch = orchestrator
            .execute(
                (0..5)
                    .map(|i| {
                        let target = Target::element(format!("paragraph-{}", i));
                        instruction(InstructionLevel::Paragraph, "p", "x", target, i + 1)
                    })
                    .collect(),
                ExecutionMode::Parallel,
                false,
                ExecutionContext::new(doc),
                &CancellationFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.succeeded_count(), 5);
        assert_eq!(provider.call_count(), 5);
        assert_eq!(provider.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_parallel_refuses_dependencies_on_batch_providers() {
        let orchestrator = orchestrator(MockCompletionProvider::new());
        let mut producer = instruction(InstructionLevel::Paragraph, "produce", "x", Target::element("paragraph-0"), 1);
        producer.provided_variables = vec!["summary".to_string()];
        let mut consumer = instruction(InstructionLevel::Paragraph, "consume", "x", Target::element("paragraph-1"), 2);
        consumer.dependent_variables = vec!["summary".to_string()];
        let context = ExecutionContext::new("<p>a</p><p>b</p>");

        let batch = vec![producer, consumer.clone()];
        assert!(orchestrator.prepare(batch.clone(), ExecutionMode::Sequential, false, &context).is_ok());
        match orchestrator.prepare(batch, ExecutionMode::Parallel, false, &context) {
            Err(EngineError::BlockingConflicts(conflicts)) => {
                assert_eq!(conflicts.len(), 1);
                assert!(conflicts[0].involves(consumer.id));
            }
            other => panic!("expected blocking conflicts, got {:?}", other.map(|b| b.id)),
        }
    }

    #[tokio::test]
    async fn test_global_without_selector_rewrites_document() {
        let provider = MockCompletionProvider::transforming("mock", |c| c.to_uppercase());
        let orchestrator = orchestrator(provider.clone());

        let batch = orchestrator
            .execute(
                vec![instruction(InstructionLevel::Global, "tone", "x", Target::selector(""), 1)],
                ExecutionMode::Sequential,
                false,
                ExecutionContext::new("<p>plain</p>"),
                &CancellationFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(batch.results[0].changes.len(), 1);
        assert_ne!(batch.final_content, "<p>plain</p>");
    }

    #[tokio::test]
    async fn test_blocking_conflicts_refuse_batch() {
        let orchestrator = orchestrator(MockCompletionProvider::new());
        let mut a = instruction(InstructionLevel::Global, "a", "x", Target::all(), 1);
        a.dependent_variables = vec!["client".to_string()];
        let mut b = instruction(InstructionLevel::Paragraph, "b", "x", Target::all(), 1);
        b.dependent_variables = vec!["deadline".to_string()];

        let result = orchestrator.prepare(vec![a, b], ExecutionMode::Sequential, false, &ExecutionContext::new("<p>x</p>"));
        match result {
            Err(EngineError::BlockingConflicts(conflicts)) => assert_eq!(conflicts.len(), 2),
            other => panic!("expected blocking conflicts, got {:?}", other.map(|b| b.id)),
        }

        let context = ExecutionContext::new("<p>x</p>").with_variable("client", "Acme").with_variable("deadline", "May");
        let mut a = instruction(InstructionLevel::Global, "a", "x", Target::all(), 1);
        a.dependent_variables = vec!["client".to_string()];
        assert!(orchestrator.prepare(vec![a], ExecutionMode::Sequential, false, &context).is_ok());
    }

    #[tokio::test]
    async fn test_provided_variables_flow_to_later_instructions() {
        let provider = MockCompletionProvider::new()
            .with_handler(|c| Ok(if c.contains("long") { "Short summary".to_string() } else { c.to_string() }));
        let orchestrator = orchestrator(provider.clone());

        let mut producer = instruction(InstructionLevel::Paragraph, "summarize", "Summarize", Target::selector("long"), 1);
        producer.provided_variables = vec!["summary".to_string()];
        let mut consumer =
            instruction(InstructionLevel::Paragraph, "use", "Mention {{summary}}", Target::selector("closing"), 2);
        consumer.dependent_variables = vec!["summary".to_string()];
        consumer.substitute_variables = true;

        let doc = "<h1>Summary</h1><p>long text</p><p>closing words</p>";
        let batch = orchestrator
            .execute(
                vec![consumer, producer],
                ExecutionMode::Sequential,
                true,
                ExecutionContext::new(doc),
                &CancellationFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.results[0].instruction.title, "summarize");
        assert_eq!(batch.results[0].provided_variables.get("summary").map(String::as_str), Some("Short summary"));
        assert_eq!(batch.final_content, "<h1>Summary</h1><p>Short summary</p><p>closing words</p>");
        let requests: Vec<String> =
            provider.call_history().iter().filter_map(|p| p.request().map(str::to_string)).collect();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].starts_with("Instruction:\nMention Short summary"));
    }

    #[tokio::test]
    async fn test_nesting_depth_is_bounded() {
        let orchestrator = orchestrator(MockCompletionProvider::new())
            .with_config(OrchestratorConfig { max_concurrency: 1, max_depth: 1 });
        let parent = instruction(InstructionLevel::Global, "parent", "x", Target::all(), 1);
        let context = ExecutionContext::new("doc").nested(parent.id, 1).unwrap();

        let result = orchestrator
            .execute_nested(&parent, vec![], &context, &CancellationFlag::new())
            .await;
        assert!(matches!(result, Err(EngineError::DepthExceeded { depth: 2, max: 1 })));
    }
}
