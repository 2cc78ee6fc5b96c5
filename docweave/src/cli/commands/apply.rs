//! Apply an instruction file to a document

use super::{CLI_USER, load_config, load_repository, read_document, read_instruction_file};
use crate::cli::app::ApplyArgs;
use anyhow::{Context, Result, bail};
use docweave_core::execution::KnowledgeDocument;
use docweave_core::{InstructionEngine, ProcessingSummary};
use std::path::Path;
use tracing::info;

/// Execute the apply command
pub async fn execute(args: ApplyArgs, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let content = read_document(&args.document)?;
    let (repository, template_id, instructions) =
        load_repository(read_instruction_file(&args.instructions)?).await?;
    info!("Applying {} instructions to {}", instructions.len(), args.document.display());

    let mut options = config.apply_options();
    if let Some(mode) = args.mode {
        options.mode = mode;
    }
    options.stop_on_error |= args.stop_on_error;
    if !args.levels.is_empty() {
        options.levels = Some(args.levels.clone());
    }
    for pair in &args.variables {
        let (name, value) = parse_variable(pair)?;
        options.variables.insert(name.to_string(), value.to_string());
    }
    for path in &args.knowledge {
        let title = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        options.knowledge.push(KnowledgeDocument::new(title, read_document(path)?));
    }

    let invoker = config.build_invoker().context("Failed to configure model providers")?;
    let engine = InstructionEngine::new(repository, config.orchestrator(invoker));
    let outcome = engine
        .apply_instructions_to_document(&content, &template_id, CLI_USER, &options)
        .await;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &outcome.content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", outcome.content),
    }

    if args.json {
        eprintln!("{}", serde_json::to_string_pretty(&outcome.summary)?);
    } else {
        print_summary(&outcome.summary);
    }

    if !outcome.summary.errors.is_empty() {
        bail!("{} instruction error(s)", outcome.summary.errors.len());
    }
    Ok(())
}

fn parse_variable(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => bail!("Variable '{}' must look like NAME=VALUE", pair),
    }
}

fn print_summary(summary: &ProcessingSummary) {
    if let Some(reason) = summary.reason {
        eprintln!("Nothing applied: {:?}", reason);
        return;
    }

    eprintln!("\n Summary ({} mode):", summary.mode);
    eprintln!("  Instructions: {}", summary.total_instructions);
    eprintln!("  Succeeded: {}", summary.succeeded);
    eprintln!("  Failed: {}", summary.failed);
    eprintln!("  Skipped: {}", summary.skipped);
    eprintln!("  Changes: {}", summary.changes);
    eprintln!("  Tokens: {}", summary.tokens_used);
    eprintln!("  Duration: {}ms", summary.duration_ms);

    if summary.requires_reconciliation {
        eprintln!("\n  Parallel results were not merged; rerun sequentially to combine them");
    }
    if !summary.warnings.is_empty() {
        eprintln!("\n Warnings:");
        for warning in &summary.warnings {
            eprintln!("  - {}", warning);
        }
    }
    if !summary.errors.is_empty() {
        eprintln!("\n Errors:");
        for error in &summary.errors {
            eprintln!("  - {}", error);
        }
    }
}
