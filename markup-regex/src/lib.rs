//! Regex utilities for docweave
//! Markup scanning patterns kept in a separate crate for compilation optimization

use once_cell::sync::Lazy;
use regex::Regex;

/// Block-level markup patterns.
///
/// Every pattern exposes an `open` group (the opening tag, used for attribute
/// lookup) and a `body` group (the inner content).
pub mod blocks {
    use super::*;

    pub static HEADING: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?is)(?P<open><h(?P<level>[1-6])\b[^>]*>)(?P<body>.*?)</h[1-6]\s*>")
            .expect("Invalid regex pattern")
    });

    pub static PARAGRAPH: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?is)(?P<open><p\b[^>]*>)(?P<body>.*?)</p\s*>")
            .expect("Invalid regex pattern")
    });

    pub static TABLE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?is)(?P<open><table\b[^>]*>)(?P<body>.*?)</table\s*>")
            .expect("Invalid regex pattern")
    });

    pub static ROW: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?is)(?P<open><tr\b[^>]*>)(?P<body>.*?)</tr\s*>")
            .expect("Invalid regex pattern")
    });

    pub static CELL: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?is)(?P<open><(?P<tag>td|th)\b[^>]*>)(?P<body>.*?)</t[dh]\s*>")
            .expect("Invalid regex pattern")
    });
}

/// Attribute extraction from opening tags
pub mod attributes {
    use super::*;

    pub static ID: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?i)\sid\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
            .expect("Invalid regex pattern")
    });

    /// Extract the `id` attribute of an opening tag, if present and non-empty
    pub fn id_of(open_tag: &str) -> Option<String> {
        let caps = ID.captures(open_tag)?;
        let value = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
        let value = value.as_str().trim();

        if value.is_empty() { None } else { Some(value.to_string()) }
    }
}

/// Plain-text views over markup
pub mod text {
    use super::*;

    pub static TAG: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("Invalid regex pattern"));

    pub static WHITESPACE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\s+").expect("Invalid regex pattern"));

    /// Strip tags, decode the common entities and collapse whitespace
    pub fn strip_tags(markup: &str) -> String {
        let without_tags = TAG.replace_all(markup, " ");
        let decoded = without_tags
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&");

        WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
    }
}

/// `{{variable}}` placeholders in instruction bodies and prompt templates
pub mod placeholders {
    use super::*;

    pub static VARIABLE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("Invalid regex pattern")
    });

    /// Names of all placeholders in order of first appearance
    pub fn names(text: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in VARIABLE.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                if !names.iter().any(|n| n == name.as_str()) {
                    names.push(name.as_str().to_string());
                }
            }
        }
        names
    }

    /// Replace placeholders using `lookup`.
    ///
    /// Placeholders without a value are left untouched and returned as the
    /// second tuple element.
    pub fn substitute<F>(text: &str, lookup: F) -> (String, Vec<String>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing: Vec<String> = Vec::new();
        let replaced = VARIABLE.replace_all(text, |caps: &regex::Captures<'_>| {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let Some(name) = caps.get(1).map(|m| m.as_str()) else {
                return whole.to_string();
            };
            match lookup(name) {
                Some(value) => value,
                None => {
                    if !missing.iter().any(|m| m == name) {
                        missing.push(name.to_string());
                    }
                    whole.to_string()
                }
            }
        });

        (replaced.into_owned(), missing)
    }
}

/// Markdown code fences wrapped around model output
pub mod fences {
    use super::*;

    pub static WRAPPING_FENCE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?s)\A```[A-Za-z0-9_+\-]*[ \t]*\r?\n(?P<inner>.*?)\r?\n?```\s*\z")
            .expect("Invalid regex pattern")
    });

    /// Remove a single code fence wrapping the entire text
    pub fn unwrap(text: &str) -> &str {
        WRAPPING_FENCE
            .captures(text)
            .and_then(|caps| caps.name("inner"))
            .map(|m| m.as_str())
            .unwrap_or(text)
    }
}
