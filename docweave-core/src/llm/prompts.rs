//! Prompt templates for instruction execution
//!
//! Every prompt has the same frame: a level-specific system message, optional
//! before/after example pairs, then a request holding the instruction, the
//! structural context lines and the delimited content.

use super::types::Prompt;
use crate::instructions::{Instruction, InstructionExample, InstructionLevel};
use markup_regex::placeholders;
use std::collections::HashMap;

/// Placeholders recognized in custom prompt templates
const RESERVED: [&str; 3] = ["instruction", "content", "context"];

/// Prompt templates for each instruction level
pub struct PromptTemplates;

impl PromptTemplates {
    pub const CONTENT_OPEN: &'static str = "<<<CONTENT";
    pub const CONTENT_CLOSE: &'static str = "CONTENT>>>";

    /// System message for a level
    pub fn system_prompt(level: InstructionLevel, preserve_formatting: bool) -> String {
        let scope = match level {
            InstructionLevel::Global => "an entire document",
            InstructionLevel::Section => "one section of a document",
            InstructionLevel::Paragraph => "a single paragraph of a document",
            InstructionLevel::Table => "the rows of a single table",
            InstructionLevel::Cell => "the value of a single table cell",
        };

        let mut prompt = format!(
            "You rewrite {} according to the user's instruction. \
             Reply with the rewritten content only, without explanations or commentary.",
            scope
        );
        if preserve_formatting {
            prompt.push_str(" Keep every markup tag and attribute exactly as given; change text only.");
        }
        prompt
    }

    /// Default request body
    pub fn request(instruction: &str, content: &str, context: &[String]) -> String {
        let mut request = format!("Instruction:\n{}\n\n", instruction.trim());
        if !context.is_empty() {
            request.push_str("Context:\n");
            for line in context {
                request.push_str("- ");
                request.push_str(line);
                request.push('\n');
            }
            request.push('\n');
        }
        request.push_str(&Self::delimit(content));
        request
    }

    /// Fill a custom template's `{{instruction}}`, `{{content}}` and `{{context}}`
    pub fn custom(template: &str, instruction: &str, content: &str, context: &[String]) -> String {
        let (filled, _) = placeholders::substitute(template, |name| match name {
            "instruction" => Some(instruction.trim().to_string()),
            "content" => Some(Self::delimit(content)),
            "context" => Some(context.join("\n")),
            _ => None,
        });
        filled
    }

    /// Build the complete prompt for one target
    pub fn build(
        prepared: &PreparedInstruction,
        level: InstructionLevel,
        preserve_formatting: bool,
        content: &str,
        context: &[String],
        examples: &[InstructionExample],
    ) -> Prompt {
        let request = match &prepared.template {
            Some(template) => Self::custom(template, &prepared.body, content, context),
            None => Self::request(&prepared.body, content, context),
        };

        examples
            .iter()
            .fold(Prompt::new(Self::system_prompt(level, preserve_formatting)), |prompt, example| {
                prompt.example(
                    Self::request(&prepared.body, &example.before, &[]),
                    example.after.clone(),
                )
            })
            .user(request)
    }

    fn delimit(content: &str) -> String {
        format!("{}\n{}\n{}", Self::CONTENT_OPEN, content, Self::CONTENT_CLOSE)
    }

    /// Content between the delimiters of a request, if present
    pub fn extract_content(request: &str) -> Option<&str> {
        let start = request.find(Self::CONTENT_OPEN)? + Self::CONTENT_OPEN.len() + 1;
        let end = request.rfind(Self::CONTENT_CLOSE)?.checked_sub(1)?;
        request.get(start..end)
    }
}

/// Instruction text after variable substitution
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedInstruction {
    pub body: String,
    pub template: Option<String>,
    /// Placeholders with no value in the context
    pub missing_variables: Vec<String>,
    /// Variables that were substituted
    pub used_variables: Vec<String>,
}

impl PreparedInstruction {
    pub fn prepare(instruction: &Instruction, variables: &HashMap<String, String>) -> Self {
        if !instruction.substitute_variables {
            return Self {
                body: instruction.body.clone(),
                template: instruction.prompt_template.clone(),
                missing_variables: Vec::new(),
                used_variables: Vec::new(),
            };
        }

        let lookup = |name: &str| {
            if RESERVED.contains(&name) {
                return Some(format!("{{{{{}}}}}", name));
            }
            variables.get(name).cloned()
        };

        let (body, mut missing) = placeholders::substitute(&instruction.body, lookup);
        let mut used: Vec<String> =
            placeholders::names(&instruction.body).into_iter().filter(|n| variables.contains_key(n)).collect();

        let template = instruction.prompt_template.as_ref().map(|template| {
            let (filled, template_missing) = placeholders::substitute(template, lookup);
            for name in template_missing {
                if !missing.contains(&name) {
                    missing.push(name);
                }
            }
            for name in placeholders::names(template) {
                if variables.contains_key(&name) && !RESERVED.contains(&name.as_str()) && !used.contains(&name) {
                    used.push(name);
                }
            }
            filled
        });

        Self { body, template, missing_variables: missing, used_variables: used }
    }
}
