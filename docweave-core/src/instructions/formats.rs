//! Instruction file import
//!
//! Handles JSON, YAML and TOML files holding instruction drafts, either as a
//! bare list or as an object with an `instructions` array.

use super::InstructionDraft;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while importing instruction files
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not detect instruction file format")]
    UnknownFormat,

    #[error("Failed to parse {format:?} instructions: {message}")]
    Parse { format: ImportFormat, message: String },
}

/// Supported instruction file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportFormat {
    Json,
    Yaml,
    Toml,
}

/// Contents of an instruction file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionFile {
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub instructions: Vec<InstructionDraft>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FileShape {
    Document(InstructionFile),
    List(Vec<InstructionDraft>),
}

impl From<FileShape> for InstructionFile {
    fn from(shape: FileShape) -> Self {
        match shape {
            FileShape::Document(file) => file,
            FileShape::List(instructions) => InstructionFile { template_id: None, instructions },
        }
    }
}

/// Detect format from file extension, then from content
pub fn detect_format(path: &Path, content: &str) -> Option<ImportFormat> {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        match ext.to_lowercase().as_str() {
            "json" => return Some(ImportFormat::Json),
            "yaml" | "yml" => return Some(ImportFormat::Yaml),
            "toml" => return Some(ImportFormat::Toml),
            _ => {}
        }
    }

    let trimmed = content.trim();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<JsonValue>(trimmed).is_ok()
    {
        return Some(ImportFormat::Json);
    }

    // TOML files here always carry `[[instructions]]` tables
    if trimmed.contains("[[instructions]]") && toml::from_str::<toml::Table>(trimmed).is_ok() {
        return Some(ImportFormat::Toml);
    }

    if (trimmed.contains(":\n") || trimmed.contains(": ") || trimmed.starts_with("- "))
        && serde_yaml::from_str::<YamlValue>(trimmed).is_ok()
    {
        return Some(ImportFormat::Yaml);
    }

    None
}

/// Parse instruction drafts in the given format
pub fn parse_drafts(content: &str, format: ImportFormat) -> Result<InstructionFile, ImportError> {
    let parse_error = |message: String| ImportError::Parse { format, message };

    let shape: FileShape = match format {
        ImportFormat::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        ImportFormat::Yaml => serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        ImportFormat::Toml => {
            FileShape::Document(toml::from_str(content).map_err(|e| parse_error(e.to_string()))?)
        }
    };

    Ok(shape.into())
}

/// Read and parse an instruction file
pub fn load_drafts(path: &Path) -> Result<InstructionFile, ImportError> {
    let content = std::fs::read_to_string(path)
        .map_err(|source| ImportError::Io { path: path.to_path_buf(), source })?;
    let format = detect_format(path, &content).ok_or(ImportError::UnknownFormat)?;
    parse_drafts(&content, format)
}
