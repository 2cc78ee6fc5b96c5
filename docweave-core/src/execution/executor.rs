//! Per-level prompt construction
//!
//! Each level has one [`LevelExecutor`]; the [`ExecutorTable`] selects it by
//! level rank so the orchestrator never branches on the level itself.

use super::{ContextUsage, ExecutionContext};
use crate::document::{DocumentElement, DocumentStructure, ElementMetadata};
use crate::instructions::{Instruction, InstructionLevel};
use crate::llm::{AiError, AiInvoker, Completion, PreparedInstruction, Prompt, PromptTemplates};

/// Knowledge excerpts are cut to this many characters
const KNOWLEDGE_EXCERPT_CHARS: usize = 1500;

/// Prompt construction for one instruction level
pub trait LevelExecutor: Send + Sync {
    fn level(&self) -> InstructionLevel;

    /// Confidence used when the provider reports none
    fn default_confidence(&self) -> f32;

    /// Brief structural context for one target
    fn structural_context(&self, element: &DocumentElement, structure: &DocumentStructure) -> Vec<String>;

    /// Whether variables, knowledge and history go into the prompt
    fn includes_ambient_context(&self, instruction: &Instruction) -> bool {
        instruction.context_aware
    }

    /// Build the prompt for `element` and report what context it drew on
    fn build_prompt(
        &self,
        instruction: &Instruction,
        prepared: &PreparedInstruction,
        context: &ExecutionContext,
        element: &DocumentElement,
        structure: &DocumentStructure,
    ) -> (Prompt, ContextUsage) {
        let mut lines = self.structural_context(element, structure);
        let mut usage = ContextUsage {
            variables: prepared.used_variables.clone(),
            knowledge_documents: Vec::new(),
            parent_instructions: context.parent_instructions.clone(),
        };

        if self.includes_ambient_context(instruction) {
            let mut names: Vec<&String> = context.variables.keys().collect();
            names.sort();
            for name in names {
                lines.push(format!("Variable {} = {}", name, context.variables[name]));
                if !usage.variables.contains(name) {
                    usage.variables.push(name.clone());
                }
            }
            for doc in &context.knowledge {
                lines.push(format!("Reference '{}': {}", doc.title, excerpt(&doc.content)));
                usage.knowledge_documents.push(doc.title.clone());
            }
            if !context.parent_instructions.is_empty() {
                lines.push(format!(
                    "{} earlier instruction(s) have already been applied to this document",
                    context.parent_instructions.len()
                ));
            }
        }

        let prompt = PromptTemplates::build(
            prepared,
            self.level(),
            instruction.preserve_formatting,
            element.content(&context.current_content),
            &lines,
            &instruction.examples,
        );
        (prompt, usage)
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= KNOWLEDGE_EXCERPT_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(KNOWLEDGE_EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Whole-document instructions; always carry the full context
pub struct GlobalExecutor;

impl LevelExecutor for GlobalExecutor {
    fn level(&self) -> InstructionLevel {
        InstructionLevel::Global
    }

    fn default_confidence(&self) -> f32 {
        0.70
    }

    fn structural_context(&self, _element: &DocumentElement, structure: &DocumentStructure) -> Vec<String> {
        vec![format!(
            "Document with {} sections, {} paragraphs and {} tables",
            structure.sections.len(),
            structure.paragraphs.len(),
            structure.tables.len()
        )]
    }

    fn includes_ambient_context(&self, _instruction: &Instruction) -> bool {
        true
    }
}

pub struct SectionExecutor;

impl LevelExecutor for SectionExecutor {
    fn level(&self) -> InstructionLevel {
        InstructionLevel::Section
    }

    fn default_confidence(&self) -> f32 {
        0.80
    }

    fn structural_context(&self, element: &DocumentElement, structure: &DocumentStructure) -> Vec<String> {
        let heading_level = match element.metadata {
            ElementMetadata::Section { heading_level } => heading_level,
            _ => 1,
        };
        vec![
            format!(
                "Section '{}' (heading level {})",
                element.title.as_deref().unwrap_or_default(),
                heading_level
            ),
            format!("Section {} of {}", element.index + 1, structure.sections.len()),
        ]
    }
}

pub struct ParagraphExecutor;

impl LevelExecutor for ParagraphExecutor {
    fn level(&self) -> InstructionLevel {
        InstructionLevel::Paragraph
    }

    fn default_confidence(&self) -> f32 {
        0.85
    }

    fn structural_context(&self, element: &DocumentElement, structure: &DocumentStructure) -> Vec<String> {
        let mut lines = vec![format!("Paragraph {} of {}", element.index + 1, structure.paragraphs.len())];
        if let Some(section) = structure.sections.iter().find(|s| s.span.contains(&element.span)) {
            lines.push(format!("Inside section '{}'", section.title.as_deref().unwrap_or_default()));
        }
        lines
    }
}

pub struct TableExecutor;

impl LevelExecutor for TableExecutor {
    fn level(&self) -> InstructionLevel {
        InstructionLevel::Table
    }

    fn default_confidence(&self) -> f32 {
        0.90
    }

    fn structural_context(&self, element: &DocumentElement, structure: &DocumentStructure) -> Vec<String> {
        let (rows, columns) = match element.metadata {
            ElementMetadata::Table { rows, columns } => (rows, columns),
            _ => (0, 0),
        };
        let mut lines = vec![format!("Table '{}' with {} rows and {} columns", element.id, rows, columns)];

        let headers: Vec<&str> = structure
            .cells
            .iter()
            .filter(|cell| {
                matches!(&cell.metadata, ElementMetadata::Cell { table_id, is_header: true, row: 0, .. } if *table_id == element.id)
            })
            .map(|cell| cell.text.as_str())
            .collect();
        if !headers.is_empty() {
            lines.push(format!("Column headers: {}", headers.join(", ")));
        }
        lines
    }
}

pub struct CellExecutor;

impl LevelExecutor for CellExecutor {
    fn level(&self) -> InstructionLevel {
        InstructionLevel::Cell
    }

    fn default_confidence(&self) -> f32 {
        0.95
    }

    fn structural_context(&self, element: &DocumentElement, structure: &DocumentStructure) -> Vec<String> {
        let ElementMetadata::Cell { table_id, row, col, header, .. } = &element.metadata else {
            return Vec::new();
        };

        let mut lines = vec![format!("Cell at row {}, column {} of table '{}'", row, col, table_id)];
        if let Some(header) = header {
            lines.push(format!("Column header: {}", header));
        }
        if *col > 0 {
            let label = structure.cells.iter().find_map(|cell| match cell.cell_coordinates() {
                Some((t, r, 0)) if t == table_id && r == *row => Some(cell.text.as_str()),
                _ => None,
            });
            if let Some(label) = label.filter(|l| !l.is_empty()) {
                lines.push(format!("Row label: {}", label));
            }
        }
        lines
    }
}

/// Executors indexed by level rank
pub struct ExecutorTable {
    executors: [Box<dyn LevelExecutor>; 5],
}

impl Default for ExecutorTable {
    fn default() -> Self {
        Self {
            executors: [
                Box::new(GlobalExecutor),
                Box::new(SectionExecutor),
                Box::new(ParagraphExecutor),
                Box::new(TableExecutor),
                Box::new(CellExecutor),
            ],
        }
    }
}

impl ExecutorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, level: InstructionLevel) -> &dyn LevelExecutor {
        self.executors[level.rank()].as_ref()
    }

    /// Replace the executor registered for its level
    pub fn register(&mut self, executor: Box<dyn LevelExecutor>) {
        let rank = executor.level().rank();
        self.executors[rank] = executor;
    }

    /// Build the level's prompt for `element` and invoke the model on it
    pub async fn invoke(
        &self,
        invoker: &AiInvoker,
        instruction: &Instruction,
        prepared: &PreparedInstruction,
        context: &ExecutionContext,
        element: &DocumentElement,
        structure: &DocumentStructure,
    ) -> Result<(Completion, ContextUsage), AiError> {
        let executor = self.get(instruction.level);
        let (prompt, usage) = executor.build_prompt(instruction, prepared, context, element, structure);
        let completion = invoker.invoke_prompt(&prompt, executor.default_confidence()).await?;
        Ok((completion, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentParser;
    use crate::execution::KnowledgeDocument;
    use crate::instructions::{InstructionDraft, Target};
    use std::collections::HashMap;

    const DOC: &str = "<h1>Costs</h1><p>Overview</p>\
        <table id=\"budget\"><tr><th>Item</th><th>Amount</th></tr><tr><td>Dev</td><td>100</td></tr></table>";

    fn instruction(level: InstructionLevel) -> Instruction {
        let draft = InstructionDraft::new(level, "t", "Improve").with_target(Target::all());
        Instruction::from_draft(draft, "tpl", "u", 1)
    }

    #[test]
    fn test_table_dispatches_by_rank() {
        let table = ExecutorTable::new();
        for level in InstructionLevel::ALL {
            assert_eq!(table.get(level).level(), level);
        }
        assert!(table.get(InstructionLevel::Cell).default_confidence() > table.get(InstructionLevel::Global).default_confidence());
    }

    #[test]
    fn test_cell_context_names_header_and_row() {
        let structure = DocumentParser::new().parse(DOC);
        let cell = structure.find(crate::document::ElementKind::Cell, "budget-r1-c1").unwrap();
        let lines = CellExecutor.structural_context(cell, &structure);
        assert_eq!(
            lines,
            vec!["Cell at row 1, column 1 of table 'budget'", "Column header: Amount", "Row label: Dev"]
        );
    }

    #[test]
    fn test_table_context_lists_headers() {
        let structure = DocumentParser::new().parse(DOC);
        let lines = TableExecutor.structural_context(&structure.tables[0], &structure);
        assert_eq!(lines[0], "Table 'budget' with 2 rows and 2 columns");
        assert_eq!(lines[1], "Column headers: Item, Amount");
    }

    #[test]
    fn test_element_prompt_holds_only_element_content() {
        let structure = DocumentParser::new().parse(DOC);
        let context = ExecutionContext::new(DOC).with_variable("client", "Acme");
        let instr = instruction(InstructionLevel::Paragraph);
        let prepared = PreparedInstruction::prepare(&instr, &context.variables);

        let (prompt, usage) =
            ParagraphExecutor.build_prompt(&instr, &prepared, &context, &structure.paragraphs[0], &structure);
        let request = prompt.request().unwrap();
        assert_eq!(PromptTemplates::extract_content(request), Some("Overview"));
        assert!(request.contains("Inside section 'Costs'"));
        assert!(!request.contains("Acme"));
        assert!(usage.variables.is_empty());
    }

    #[test]
    fn test_global_prompt_includes_variables_and_knowledge() {
        let structure = DocumentParser::new().parse(DOC);
        let context = ExecutionContext::new(DOC)
            .with_variables(HashMap::from([("client".to_string(), "Acme".to_string())]))
            .with_knowledge(vec![KnowledgeDocument::new("Style guide", "Use British spelling")]);
        let instr = instruction(InstructionLevel::Global);
        let prepared = PreparedInstruction::prepare(&instr, &context.variables);

        let (prompt, usage) = GlobalExecutor.build_prompt(&instr, &prepared, &context, &structure.document, &structure);
        let request = prompt.request().unwrap();
        assert_eq!(PromptTemplates::extract_content(request), Some(DOC));
        assert!(request.contains("Variable client = Acme"));
        assert!(request.contains("Reference 'Style guide': Use British spelling"));
        assert_eq!(usage.variables, vec!["client"]);
        assert_eq!(usage.knowledge_documents, vec!["Style guide"]);
    }
}
