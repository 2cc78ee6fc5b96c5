//! Report conflicts between the instructions of a file

use super::{load_repository, read_document, read_instruction_file};
use crate::cli::app::ConflictsArgs;
use anyhow::Result;
use docweave_core::{ConflictDetector, DocumentParser};
use std::collections::HashSet;

/// Execute the conflicts command
pub async fn execute(args: ConflictsArgs) -> Result<()> {
    let (_, template_id, instructions) = load_repository(read_instruction_file(&args.instructions)?).await?;

    let structure = match &args.document {
        Some(path) => Some(DocumentParser::new().parse(&read_document(path)?)),
        None => None,
    };
    let variables: HashSet<String> = args.variables.iter().cloned().collect();
    let mode = args.mode.unwrap_or_default();
    let conflicts = ConflictDetector::new().detect_for_mode(&instructions, &variables, structure.as_ref(), mode);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    println!("Checked {} instructions of template {} ({} mode)", instructions.len(), template_id, mode);
    if conflicts.is_empty() {
        println!("No conflicts found");
        return Ok(());
    }

    for conflict in &conflicts {
        let titles: Vec<&str> = conflict
            .instruction_ids
            .iter()
            .filter_map(|id| instructions.iter().find(|i| i.id == *id))
            .map(|i| i.title.as_str())
            .collect();
        println!("\n [{:?}] {} conflict: {}", conflict.severity, conflict.kind, titles.join(", "));
        println!("  {}", conflict.description);
        for resolution in &conflict.resolutions {
            println!("  - {}", resolution);
        }
    }

    let blocking = conflicts.iter().filter(|c| c.is_blocking()).count();
    if blocking > 0 {
        println!("\n{} blocking conflict(s): a batch with these instructions will be refused", blocking);
    }
    Ok(())
}
