//! Validate every instruction of a file without storing it

use super::read_instruction_file;
use crate::cli::app::ValidateArgs;
use anyhow::{Result, bail};
use docweave_core::instructions::validate_draft;

/// Execute the validate command
pub async fn execute(args: ValidateArgs) -> Result<()> {
    let file = read_instruction_file(&args.instructions)?;
    println!(
        "Validating {} instructions from {}",
        file.instructions.len(),
        args.instructions.display()
    );

    let mut invalid = 0;
    for (index, draft) in file.instructions.iter().enumerate() {
        match validate_draft(draft) {
            Ok(()) => println!("  ok  #{} {}", index + 1, draft.title),
            Err(err) => {
                invalid += 1;
                println!("  err #{} {}", index + 1, draft.title);
                for violation in &err.violations {
                    println!("      {}: {}", violation.field, violation.message);
                }
            }
        }
    }

    if invalid > 0 {
        bail!("{} of {} instructions are invalid", invalid, file.instructions.len());
    }
    println!("All instructions are valid");
    Ok(())
}
