// Command implementations

pub mod apply;
pub mod conflicts;
pub mod parse;
pub mod validate;

use anyhow::{Context, Result};
use docweave_core::instructions::{InstructionFile, load_drafts};
use docweave_core::{EngineConfig, Instruction, InstructionRepository, MemoryInstructionStore};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Owner id used for instructions loaded from files
pub const CLI_USER: &str = "cli";

/// Template id used when the instruction file names none
pub const DEFAULT_TEMPLATE: &str = "default";

/// Load the configuration file, or defaults when none is given
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path),
        None => Ok(EngineConfig::default()),
    }
}

pub fn read_document(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read document {}", path.display()))
}

pub fn read_instruction_file(path: &Path) -> Result<InstructionFile> {
    load_drafts(path).with_context(|| format!("Failed to load instructions from {}", path.display()))
}

/// Store every draft of `file` in a fresh in-memory repository
pub async fn load_repository(file: InstructionFile) -> Result<(InstructionRepository, String, Vec<Instruction>)> {
    let template_id = file.template_id.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
    let repository = InstructionRepository::new(Arc::new(MemoryInstructionStore::new()));

    let mut created = Vec::with_capacity(file.instructions.len());
    for (index, draft) in file.instructions.into_iter().enumerate() {
        let instruction = repository
            .create(&template_id, CLI_USER, draft)
            .await
            .with_context(|| format!("Instruction #{} is invalid", index + 1))?;
        created.push(instruction);
    }

    debug!("Loaded {} instructions for template {}", created.len(), template_id);
    Ok((repository, template_id, created))
}
