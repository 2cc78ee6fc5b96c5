//! Parse a document and list its structure

use super::read_document;
use crate::cli::app::ParseArgs;
use anyhow::Result;
use docweave_core::{DocumentElement, DocumentParser, ElementKind};

const EXCERPT_CHARS: usize = 60;

/// Execute the parse command
pub async fn execute(args: ParseArgs) -> Result<()> {
    let content = read_document(&args.document)?;
    let structure = DocumentParser::new().parse(&content);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&structure)?);
        return Ok(());
    }

    println!("Parsed {} ({} bytes)", args.document.display(), structure.content_len);
    println!("  Sections: {}", structure.sections.len());
    println!("  Paragraphs: {}", structure.paragraphs.len());
    println!("  Tables: {}", structure.tables.len());
    println!("  Cells: {}", structure.cells.len());

    for kind in [ElementKind::Section, ElementKind::Paragraph, ElementKind::Table, ElementKind::Cell] {
        let elements = structure.elements(kind);
        if elements.is_empty() {
            continue;
        }
        println!("\n {}s:", kind);
        for element in elements {
            print_element(element);
        }
    }
    Ok(())
}

fn print_element(element: &DocumentElement) {
    let mut excerpt: String = element.text.chars().take(EXCERPT_CHARS).collect();
    if element.text.chars().count() > EXCERPT_CHARS {
        excerpt.push_str("...");
    }
    println!(
        "  - {} [{}..{}] {}",
        element.id, element.span.start, element.span.end, excerpt
    );
}
