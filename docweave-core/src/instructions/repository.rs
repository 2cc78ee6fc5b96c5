//! Instruction repository: validation and execution-order bookkeeping over a store

use super::{
    ExecutionRecord, Instruction, InstructionDraft, InstructionId, InstructionLevel, InstructionScope,
    InstructionStats, InstructionStore, InstructionUpdate, RepositoryError, validate_draft,
    validate_instruction,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Optional narrowing for [`InstructionRepository::list`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionFilters {
    pub level: Option<InstructionLevel>,
    pub active: Option<bool>,
    pub scope: Option<InstructionScope>,
}

impl InstructionFilters {
    pub fn active() -> Self {
        Self { active: Some(true), ..Default::default() }
    }

    pub fn level(level: InstructionLevel) -> Self {
        Self { level: Some(level), ..Default::default() }
    }

    fn matches(&self, instruction: &Instruction) -> bool {
        self.level.is_none_or(|level| instruction.level == level)
            && self.active.is_none_or(|active| instruction.active == active)
            && self.scope.is_none_or(|scope| instruction.scope == scope)
    }
}

/// Instructions of a template, scoped by `(template_id, user_id)`
#[derive(Clone)]
pub struct InstructionRepository {
    store: Arc<dyn InstructionStore>,
}

impl InstructionRepository {
    pub fn new(store: Arc<dyn InstructionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn InstructionStore> {
        &self.store
    }

    /// Validate and store a new instruction.
    ///
    /// Without an explicit order the instruction goes after every other
    /// instruction of its level.
    pub async fn create(
        &self,
        template_id: &str,
        user_id: &str,
        draft: InstructionDraft,
    ) -> Result<Instruction, RepositoryError> {
        validate_draft(&draft)?;
        let level = draft.level.unwrap_or(InstructionLevel::Global);

        let existing = self.store.list(template_id, user_id).await?;
        let order = match draft.execution_order {
            Some(order) => {
                if existing.iter().any(|i| i.level == level && i.execution_order == order) {
                    return Err(RepositoryError::DuplicateOrder { level: level.to_string(), order });
                }
                order
            }
            None => next_order(&existing, level),
        };

        let instruction = Instruction::from_draft(draft, template_id, user_id, order);
        self.store.insert(instruction.clone()).await?;

        info!(
            "Created {} instruction '{}' ({}) for template {} at order {}",
            instruction.level, instruction.title, instruction.id, template_id, order
        );
        Ok(instruction)
    }

    /// Instructions ordered by `(level, execution_order)`
    pub async fn list(
        &self,
        template_id: &str,
        user_id: &str,
        filters: &InstructionFilters,
    ) -> Result<Vec<Instruction>, RepositoryError> {
        let mut instructions: Vec<Instruction> = self
            .store
            .list(template_id, user_id)
            .await?
            .into_iter()
            .filter(|i| filters.matches(i))
            .collect();

        instructions.sort_by(|a, b| {
            a.level
                .rank()
                .cmp(&b.level.rank())
                .then(a.execution_order.cmp(&b.execution_order))
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(instructions)
    }

    pub async fn active(&self, template_id: &str, user_id: &str) -> Result<Vec<Instruction>, RepositoryError> {
        self.list(template_id, user_id, &InstructionFilters::active()).await
    }

    /// Fetch an instruction owned by `(template_id, user_id)`
    pub async fn get(
        &self,
        template_id: &str,
        user_id: &str,
        id: InstructionId,
    ) -> Result<Instruction, RepositoryError> {
        match self.store.get(id).await? {
            Some(instruction) if instruction.template_id == template_id && instruction.user_id == user_id => {
                Ok(instruction)
            }
            _ => Err(RepositoryError::NotFound { id }),
        }
    }

    /// Apply a partial update; bumps the version.
    ///
    /// Moving an instruction to another level without an explicit order
    /// appends it to the new level.
    pub async fn update(
        &self,
        template_id: &str,
        user_id: &str,
        id: InstructionId,
        update: InstructionUpdate,
    ) -> Result<Instruction, RepositoryError> {
        let current = self.get(template_id, user_id, id).await?;
        let mut updated = update.apply_to(&current);

        let siblings: Vec<Instruction> =
            self.store.list(template_id, user_id).await?.into_iter().filter(|i| i.id != id).collect();

        if updated.level != current.level && update.execution_order.is_none() {
            updated.execution_order = next_order(&siblings, updated.level);
        }
        if update.execution_order.is_some()
            && siblings.iter().any(|i| i.level == updated.level && i.execution_order == updated.execution_order)
        {
            return Err(RepositoryError::DuplicateOrder {
                level: updated.level.to_string(),
                order: updated.execution_order,
            });
        }

        validate_instruction(&updated)?;
        updated.version = current.version + 1;
        updated.updated_at = Utc::now();

        self.store.replace(updated.clone()).await?;
        debug!("Updated instruction {} to version {}", id, updated.version);
        Ok(updated)
    }

    /// Remove an instruction; recorded executions are kept
    pub async fn delete(&self, template_id: &str, user_id: &str, id: InstructionId) -> Result<(), RepositoryError> {
        self.get(template_id, user_id, id).await?;
        self.store.remove(id).await?;
        info!("Deleted instruction {} from template {}", id, template_id);
        Ok(())
    }

    /// Rewrite execution orders of one level to `1..=n` following `ids`
    pub async fn reorder(
        &self,
        template_id: &str,
        user_id: &str,
        level: InstructionLevel,
        ids: &[InstructionId],
    ) -> Result<Vec<Instruction>, RepositoryError> {
        let current = self.list(template_id, user_id, &InstructionFilters::level(level)).await?;

        let requested: HashSet<InstructionId> = ids.iter().copied().collect();
        let stored: HashSet<InstructionId> = current.iter().map(|i| i.id).collect();
        if requested.len() != ids.len() || requested != stored {
            return Err(RepositoryError::IncompleteReorder { level: level.to_string() });
        }

        let now = Utc::now();
        let mut reordered = Vec::with_capacity(ids.len());
        for (position, id) in ids.iter().enumerate() {
            let Some(instruction) = current.iter().find(|i| i.id == *id) else { continue };
            let mut instruction = instruction.clone();
            let order = position as u32 + 1;
            if instruction.execution_order != order {
                instruction.execution_order = order;
                instruction.version += 1;
                instruction.updated_at = now;
                self.store.replace(instruction.clone()).await?;
            }
            reordered.push(instruction);
        }

        debug!("Reordered {} {} instructions for template {}", reordered.len(), level, template_id);
        Ok(reordered)
    }

    pub async fn record_execution(&self, record: ExecutionRecord) -> Result<(), RepositoryError> {
        self.store.record_execution(record).await
    }

    pub async fn increment_performance_stats(
        &self,
        id: InstructionId,
        success: bool,
        duration_ms: u64,
    ) -> Result<(), RepositoryError> {
        self.store.increment_performance_stats(id, success, duration_ms).await
    }

    pub async fn stats(&self, id: InstructionId) -> Result<InstructionStats, RepositoryError> {
        self.store.stats(id).await
    }

    pub async fn executions(&self, id: InstructionId) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        self.store.executions(id).await
    }
}

fn next_order(instructions: &[Instruction], level: InstructionLevel) -> u32 {
    instructions.iter().filter(|i| i.level == level).map(|i| i.execution_order).max().unwrap_or(0) + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::{MemoryInstructionStore, Target};

    const TEMPLATE: &str = "tpl";
    const USER: &str = "user";

    fn repository() -> InstructionRepository {
        InstructionRepository::new(Arc::new(MemoryInstructionStore::new()))
    }

    fn paragraph(title: &str) -> InstructionDraft {
        InstructionDraft::new(InstructionLevel::Paragraph, title, "Rewrite formally")
    }

    #[tokio::test]
    async fn test_create_assigns_next_order_per_level() {
        let repo = repository();
        let a = repo.create(TEMPLATE, USER, paragraph("a")).await.unwrap();
        let b = repo.create(TEMPLATE, USER, paragraph("b")).await.unwrap();
        let g = repo
            .create(TEMPLATE, USER, InstructionDraft::new(InstructionLevel::Global, "g", "Fix typos"))
            .await
            .unwrap();

        assert_eq!((a.execution_order, b.execution_order, g.execution_order), (1, 2, 1));
        assert_eq!(a.version, 1);
        assert_eq!(a.created_by, USER);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_draft_with_all_fields() {
        let repo = repository();
        let mut draft = InstructionDraft::new(InstructionLevel::Cell, "", "").with_priority(0);
        draft.target = Target::selector("");

        match repo.create(TEMPLATE, USER, draft).await {
            Err(RepositoryError::Validation(err)) => {
                assert_eq!(err.fields(), vec!["title", "body", "target", "priority"]);
            }
            other => panic!("expected validation error, got {:?}", other.map(|i| i.id)),
        }
    }

    #[tokio::test]
    async fn test_explicit_duplicate_order_is_rejected() {
        let repo = repository();
        repo.create(TEMPLATE, USER, paragraph("a")).await.unwrap();

        let mut draft = paragraph("b");
        draft.execution_order = Some(1);
        assert!(matches!(
            repo.create(TEMPLATE, USER, draft).await,
            Err(RepositoryError::DuplicateOrder { order: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let repo = repository();
        repo.create(TEMPLATE, USER, paragraph("p1")).await.unwrap();
        repo.create(TEMPLATE, USER, InstructionDraft::new(InstructionLevel::Global, "g", "x")).await.unwrap();
        repo.create(TEMPLATE, USER, paragraph("p2").inactive()).await.unwrap();

        let all = repo.list(TEMPLATE, USER, &InstructionFilters::default()).await.unwrap();
        let titles: Vec<_> = all.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["g", "p1", "p2"]);

        let active = repo.active(TEMPLATE, USER).await.unwrap();
        assert_eq!(active.len(), 2);

        let paragraphs = repo.list(TEMPLATE, USER, &InstructionFilters::level(InstructionLevel::Paragraph)).await.unwrap();
        assert_eq!(paragraphs.len(), 2);
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_moves_level() {
        let repo = repository();
        repo.create(TEMPLATE, USER, InstructionDraft::new(InstructionLevel::Global, "g", "x")).await.unwrap();
        let p = repo.create(TEMPLATE, USER, paragraph("p")).await.unwrap();

        let update = InstructionUpdate { level: Some(InstructionLevel::Global), ..Default::default() };
        let moved = repo.update(TEMPLATE, USER, p.id, update).await.unwrap();
        assert_eq!(moved.level, InstructionLevel::Global);
        assert_eq!(moved.execution_order, 2);
        assert_eq!(moved.version, 2);

        let bad = InstructionUpdate { priority: Some(42), ..Default::default() };
        assert!(matches!(repo.update(TEMPLATE, USER, p.id, bad).await, Err(RepositoryError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_keeps_history() {
        let repo = repository();
        let p = repo.create(TEMPLATE, USER, paragraph("p")).await.unwrap();
        repo.record_execution(ExecutionRecord {
            instruction_id: p.id,
            template_id: TEMPLATE.to_string(),
            user_id: USER.to_string(),
            success: true,
            duration_ms: 12,
            tokens_used: 30,
            confidence: Some(0.9),
            changes: 1,
            errors: Vec::new(),
            warnings: Vec::new(),
            executed_at: Utc::now(),
        })
        .await
        .unwrap();

        repo.delete(TEMPLATE, USER, p.id).await.unwrap();
        assert!(matches!(repo.get(TEMPLATE, USER, p.id).await, Err(RepositoryError::NotFound { .. })));
        assert_eq!(repo.executions(p.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_other_users_cannot_touch_instruction() {
        let repo = repository();
        let p = repo.create(TEMPLATE, USER, paragraph("p")).await.unwrap();
        assert!(matches!(repo.delete(TEMPLATE, "intruder", p.id).await, Err(RepositoryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_reorder() {
        let repo = repository();
        let a = repo.create(TEMPLATE, USER, paragraph("a")).await.unwrap();
        let b = repo.create(TEMPLATE, USER, paragraph("b")).await.unwrap();
        let c = repo.create(TEMPLATE, USER, paragraph("c")).await.unwrap();

        let reordered = repo.reorder(TEMPLATE, USER, InstructionLevel::Paragraph, &[c.id, a.id, b.id]).await.unwrap();
        let orders: Vec<_> = reordered.iter().map(|i| (i.title.as_str(), i.execution_order)).collect();
        assert_eq!(orders, vec![("c", 1), ("a", 2), ("b", 3)]);

        let partial = repo.reorder(TEMPLATE, USER, InstructionLevel::Paragraph, &[a.id]).await;
        assert!(matches!(partial, Err(RepositoryError::IncompleteReorder { .. })));
    }
}
