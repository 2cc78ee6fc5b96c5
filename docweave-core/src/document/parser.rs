//! Document structure parser
//!
//! Splits markup into sections, paragraphs, tables and cells. Parsing is pure
//! and never fails: unbalanced markup simply produces fewer elements.

use super::{DocumentElement, DocumentStructure, ElementKind, ElementMetadata, Span};
use markup_regex::{attributes, blocks, text};
use regex::Captures;
use tracing::trace;

/// Parser for structured document markup
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentParser;

impl DocumentParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse `content` into its structural elements
    pub fn parse(&self, content: &str) -> DocumentStructure {
        let document = DocumentElement {
            id: "document".to_string(),
            kind: ElementKind::Document,
            index: 0,
            span: Span::new(0, content.len()),
            content_span: Span::new(0, content.len()),
            title: None,
            text: text::strip_tags(content),
            metadata: ElementMetadata::Document,
        };

        let sections = Self::parse_sections(content);
        let paragraphs = Self::parse_paragraphs(content);
        let (tables, cells) = Self::parse_tables(content);

        trace!(
            "Parsed {} sections, {} paragraphs, {} tables, {} cells",
            sections.len(),
            paragraphs.len(),
            tables.len(),
            cells.len()
        );

        DocumentStructure { content_len: content.len(), document, sections, paragraphs, tables, cells }
    }

    /// A section runs from one heading to the next, or to the end of the document
    fn parse_sections(content: &str) -> Vec<DocumentElement> {
        let headings: Vec<Captures<'_>> = blocks::HEADING.captures_iter(content).collect();
        let mut sections = Vec::with_capacity(headings.len());

        for (index, caps) in headings.iter().enumerate() {
            let Some(whole) = caps.get(0) else { continue };
            let end = headings
                .get(index + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(content.len());

            let heading_level = caps
                .name("level")
                .and_then(|m| m.as_str().parse::<u8>().ok())
                .unwrap_or(1);
            let title = caps.name("body").map(|m| text::strip_tags(m.as_str())).unwrap_or_default();
            let id = Self::element_id(caps).unwrap_or_else(|| format!("section-{}", index));
            let span = Span::new(whole.start(), end);

            sections.push(DocumentElement {
                id,
                kind: ElementKind::Section,
                index,
                span,
                content_span: Span::new(whole.end(), end),
                title: Some(title),
                text: text::strip_tags(content.get(span.range()).unwrap_or("")),
                metadata: ElementMetadata::Section { heading_level },
            });
        }

        sections
    }

    fn parse_paragraphs(content: &str) -> Vec<DocumentElement> {
        blocks::PARAGRAPH
            .captures_iter(content)
            .enumerate()
            .filter_map(|(index, caps)| {
                let whole = caps.get(0)?;
                let body = caps.name("body")?;
                Some(DocumentElement {
                    id: Self::element_id(&caps).unwrap_or_else(|| format!("paragraph-{}", index)),
                    kind: ElementKind::Paragraph,
                    index,
                    span: Span::new(whole.start(), whole.end()),
                    content_span: Span::new(body.start(), body.end()),
                    title: None,
                    text: text::strip_tags(body.as_str()),
                    metadata: ElementMetadata::Paragraph,
                })
            })
            .collect()
    }

    fn parse_tables(content: &str) -> (Vec<DocumentElement>, Vec<DocumentElement>) {
        let mut tables = Vec::new();
        let mut cells = Vec::new();

        for (index, caps) in blocks::TABLE.captures_iter(content).enumerate() {
            let (Some(whole), Some(body)) = (caps.get(0), caps.name("body")) else { continue };
            let table_id = Self::element_id(&caps).unwrap_or_else(|| format!("table-{}", index));

            let table_cells = Self::parse_cells(body.as_str(), body.start(), &table_id, cells.len());
            let rows = blocks::ROW.find_iter(body.as_str()).count();
            let columns = table_cells
                .iter()
                .filter_map(|c| c.cell_coordinates().map(|(_, _, col)| col + 1))
                .max()
                .unwrap_or(0);

            tables.push(DocumentElement {
                id: table_id,
                kind: ElementKind::Table,
                index,
                span: Span::new(whole.start(), whole.end()),
                content_span: Span::new(body.start(), body.end()),
                title: None,
                text: text::strip_tags(body.as_str()),
                metadata: ElementMetadata::Table { rows, columns },
            });
            cells.extend(table_cells);
        }

        (tables, cells)
    }

    /// Cells of one table body; `offset` is the body's position in the document
    fn parse_cells(
        body: &str,
        offset: usize,
        table_id: &str,
        first_index: usize,
    ) -> Vec<DocumentElement> {
        let mut cells = Vec::new();
        let mut headers: Vec<String> = Vec::new();

        for (row, row_caps) in blocks::ROW.captures_iter(body).enumerate() {
            let Some(row_body) = row_caps.name("body") else { continue };
            let row_offset = offset + row_body.start();

            for (col, cell_caps) in blocks::CELL.captures_iter(row_body.as_str()).enumerate() {
                let (Some(whole), Some(cell_body)) = (cell_caps.get(0), cell_caps.name("body"))
                else {
                    continue;
                };
                let is_header = cell_caps
                    .name("tag")
                    .map(|t| t.as_str().eq_ignore_ascii_case("th"))
                    .unwrap_or(false);
                let cell_text = text::strip_tags(cell_body.as_str());

                if row == 0 && is_header {
                    headers.push(cell_text.clone());
                }

                cells.push(DocumentElement {
                    id: Self::element_id(&cell_caps)
                        .unwrap_or_else(|| format!("{}-r{}-c{}", table_id, row, col)),
                    kind: ElementKind::Cell,
                    index: first_index + cells.len(),
                    span: Span::new(row_offset + whole.start(), row_offset + whole.end()),
                    content_span: Span::new(
                        row_offset + cell_body.start(),
                        row_offset + cell_body.end(),
                    ),
                    title: None,
                    text: cell_text,
                    metadata: ElementMetadata::Cell {
                        table_id: table_id.to_string(),
                        row,
                        col,
                        header: None,
                        is_header,
                    },
                });
            }
        }

        if !headers.is_empty() {
            for cell in &mut cells {
                if let ElementMetadata::Cell { col, header, .. } = &mut cell.metadata {
                    *header = headers.get(*col).cloned().filter(|h| !h.is_empty());
                }
            }
        }

        cells
    }

    fn element_id(caps: &Captures<'_>) -> Option<String> {
        caps.name("open").and_then(|open| attributes::id_of(open.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "<h1>Introduction</h1><p>Welcome to the plan.</p>\
        <h2 id=\"costs\">Costs</h2><p id=\"summary\">Budget summary</p>\
        <table id=\"budget\"><tr><th>Item</th><th>Amount</th></tr>\
        <tr><td>Dev</td><td>100</td></tr></table>";

    #[test]
    fn test_sections_run_to_next_heading() {
        let structure = DocumentParser::new().parse(SAMPLE);
        assert_eq!(structure.sections.len(), 2);

        let intro = &structure.sections[0];
        assert_eq!(intro.id, "section-0");
        assert_eq!(intro.title.as_deref(), Some("Introduction"));
        assert_eq!(intro.span.end, structure.sections[1].span.start);
        assert_eq!(intro.content(SAMPLE), "<p>Welcome to the plan.</p>");

        let costs = &structure.sections[1];
        assert_eq!(costs.id, "costs");
        assert_eq!(costs.span.end, SAMPLE.len());
        assert_eq!(costs.metadata, ElementMetadata::Section { heading_level: 2 });
    }

    #[test]
    fn test_paragraph_spans() {
        let structure = DocumentParser::new().parse(SAMPLE);
        assert_eq!(structure.paragraphs.len(), 2);
        assert_eq!(structure.paragraphs[1].id, "summary");
        assert_eq!(structure.paragraphs[1].content(SAMPLE), "Budget summary");
        assert_eq!(structure.paragraphs[1].markup(SAMPLE), "<p id=\"summary\">Budget summary</p>");
    }

    #[test]
    fn test_table_and_cells() {
        let structure = DocumentParser::new().parse(SAMPLE);
        assert_eq!(structure.tables.len(), 1);
        assert_eq!(structure.tables[0].id, "budget");
        assert_eq!(structure.tables[0].metadata, ElementMetadata::Table { rows: 2, columns: 2 });

        assert_eq!(structure.cells.len(), 4);
        let amount = structure.cells.iter().find(|c| c.id == "budget-r1-c1").unwrap();
        assert_eq!(amount.content(SAMPLE), "100");
        match &amount.metadata {
            ElementMetadata::Cell { table_id, row, col, header, is_header } => {
                assert_eq!(table_id, "budget");
                assert_eq!((*row, *col), (1, 1));
                assert_eq!(header.as_deref(), Some("Amount"));
                assert!(!is_header);
            }
            other => panic!("unexpected metadata {:?}", other),
        }
    }

    #[test]
    fn test_parse_is_idempotent() {
        let parser = DocumentParser::new();
        assert_eq!(parser.parse(SAMPLE), parser.parse(SAMPLE));
    }

    #[test]
    fn test_malformed_markup_is_best_effort() {
        let content = "<h1>Open heading<p>never closed<table><tr><td>x";
        let structure = DocumentParser::new().parse(content);
        assert!(structure.sections.is_empty());
        assert!(structure.paragraphs.is_empty());
        assert!(structure.tables.is_empty());
        assert!(structure.cells.is_empty());
        assert_eq!(structure.document.span, Span::new(0, content.len()));
    }

    #[test]
    fn test_multibyte_spans_stay_on_char_boundaries() {
        let content = "<p>Què tal, món</p><p>Ça va</p>";
        let structure = DocumentParser::new().parse(content);
        assert_eq!(structure.paragraphs[0].content(content), "Què tal, món");
        assert_eq!(structure.paragraphs[1].content(content), "Ça va");
    }
}
