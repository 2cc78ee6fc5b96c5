use clap::{Args, Parser, Subcommand};
use docweave_core::{ExecutionMode, InstructionLevel};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "docweave",
    version,
    about = "Docweave - Apply layered editing instructions to structured documents",
    long_about = "Docweave applies stored natural-language instructions to markup documents at document, section, paragraph, table and cell level, using a language model to rewrite each targeted element."
)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply instructions to a document
    #[command(about = "Apply an instruction file to a document")]
    Apply(ApplyArgs),

    /// Report conflicts between instructions
    #[command(about = "Detect targeting, priority, dependency and variable conflicts")]
    Conflicts(ConflictsArgs),

    /// Show the structure of a document
    #[command(about = "Parse a document and list its sections, paragraphs, tables and cells")]
    Parse(ParseArgs),

    /// Validate an instruction file
    #[command(about = "Check every instruction in a file for invalid fields")]
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Document to process
    #[arg(help = "Path to the markup document")]
    pub document: PathBuf,

    /// Instruction file (JSON, YAML or TOML)
    #[arg(short, long, help = "Path to the instruction file")]
    pub instructions: PathBuf,

    /// Write the processed document here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Execution mode (sequential or parallel)
    #[arg(short, long)]
    pub mode: Option<ExecutionMode>,

    /// Stop the batch at the first failed instruction
    #[arg(long)]
    pub stop_on_error: bool,

    /// Only run instructions of these levels
    #[arg(long, value_delimiter = ',')]
    pub levels: Vec<InstructionLevel>,

    /// Context variable as NAME=VALUE
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub variables: Vec<String>,

    /// Reference documents passed as model context
    #[arg(long)]
    pub knowledge: Vec<PathBuf>,

    /// Print the processing summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ConflictsArgs {
    /// Instruction file (JSON, YAML or TOML)
    #[arg(help = "Path to the instruction file")]
    pub instructions: PathBuf,

    /// Resolve targets against this document instead of comparing descriptors
    #[arg(short, long)]
    pub document: Option<PathBuf>,

    /// Variables the execution context will supply
    #[arg(long = "var", value_name = "NAME")]
    pub variables: Vec<String>,

    /// Mode the batch would run in (sequential or parallel)
    #[arg(short, long)]
    pub mode: Option<ExecutionMode>,

    /// Print conflicts as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Document to parse
    #[arg(help = "Path to the markup document")]
    pub document: PathBuf,

    /// Print the structure as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Instruction file (JSON, YAML or TOML)
    #[arg(help = "Path to the instruction file")]
    pub instructions: PathBuf,
}
