// Export of scan results as plain text or a tab-separated table
//
// Only canonical numbers survive the export filter; verbatim model lines and
// not-found markers stay in the report but never reach the export payload.

use regex::Regex;
use std::sync::OnceLock;

use crate::core::types::Extraction;

/// A value is exportable when it is fully canonical: `628` plus 8 to 11
/// further digits, nothing else on the line.
fn valid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^628\d{8,11}$").unwrap())
}

pub fn filter_valid(extractions: &[Extraction]) -> Vec<&Extraction> {
    extractions
        .iter()
        .filter(|e| valid_re().is_match(&e.value))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// One number per line.
    Text,
    /// Numbered TSV with a header row.
    Table,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "table" | "tsv" => Some(Self::Table),
            _ => None,
        }
    }
}

pub fn render(extractions: &[Extraction], format: ExportFormat) -> String {
    let valid = filter_valid(extractions);
    match format {
        ExportFormat::Text => valid
            .iter()
            .map(|e| e.value.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        ExportFormat::Table => {
            let mut out = String::from("no\tphone_number");
            for (i, e) in valid.iter().enumerate() {
                out.push_str(&format!("\n{}\t{}", i + 1, e.value));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extraction(value: &str) -> Extraction {
        Extraction {
            source: "img.jpg".to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn only_canonical_numbers_are_exported() {
        let extractions = vec![
            extraction("62812345678"),
            extraction("TIDAK_DITEMUKAN"),
            extraction("some verbatim model text"),
            extraction("0812345678"),
            extraction("62899999999999"),
            // too long: 12 digits after 628
            extraction("628123456789012"),
        ];
        let valid = filter_valid(&extractions);
        let values: Vec<&str> = valid.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(values, vec!["62812345678", "62899999999999"]);
    }

    #[test]
    fn text_format_is_one_number_per_line() {
        let extractions = vec![extraction("62812345678"), extraction("62887654321")];
        assert_eq!(
            render(&extractions, ExportFormat::Text),
            "62812345678\n62887654321"
        );
    }

    #[test]
    fn table_format_has_header_and_row_numbers() {
        let extractions = vec![extraction("62812345678"), extraction("62887654321")];
        assert_eq!(
            render(&extractions, ExportFormat::Table),
            "no\tphone_number\n1\t62812345678\n2\t62887654321"
        );
    }

    #[test]
    fn empty_export_renders_cleanly() {
        assert_eq!(render(&[], ExportFormat::Text), "");
        assert_eq!(render(&[], ExportFormat::Table), "no\tphone_number");
    }

    #[test]
    fn format_parsing() {
        assert_eq!(ExportFormat::parse("TSV"), Some(ExportFormat::Table));
        assert_eq!(ExportFormat::parse(" text "), Some(ExportFormat::Text));
        assert_eq!(ExportFormat::parse("csv"), None);
    }
}
