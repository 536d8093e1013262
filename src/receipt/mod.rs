// src/receipt/mod.rs

mod dates;
mod parser;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::Date;
use tracing::debug;

use crate::config::ParserSection;

/// Pixel-space box of a line as reported by the OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One line of OCR output. Confidence and box are advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

/// OCR engine output for one receipt image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawText {
    pub lines: Vec<OcrLine>,
}

impl RawText {
    pub fn from_plain(text: &str) -> Self {
        Self {
            lines: text
                .lines()
                .map(|l| OcrLine {
                    text: l.to_string(),
                    confidence: None,
                    bbox: None,
                })
                .collect(),
        }
    }

    pub fn to_text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreGuess {
    pub name: String,
    pub confidence: f64,
}

/// A single receipt line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedItem {
    pub description: String,
    pub quantity: f64,
    pub unit: String,
    pub price: f64,
    /// 1-based line in the source text.
    pub line_number: usize,
}

/// Everything we could recover from one receipt's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedReceipt {
    pub store: Option<StoreGuess>,
    pub date: Option<Date>,
    pub items: Vec<ParsedItem>,
    /// Not reconciled against the item sum.
    pub total: Option<f64>,
    pub raw_text: String,
}

impl ParsedReceipt {
    pub fn empty(raw_text: &str) -> Self {
        Self {
            store: None,
            date: None,
            items: Vec::new(),
            total: None,
            raw_text: raw_text.to_string(),
        }
    }

    /// No items or no store: the caller should treat the receipt as failed.
    pub fn needs_review(&self) -> bool {
        self.items.is_empty() || self.store.is_none()
    }

    pub fn item_sum(&self) -> f64 {
        self.items.iter().map(|i| i.price).sum()
    }
}

/// Heuristic receipt parser. Stateless apart from its store lookup.
#[derive(Debug, Clone)]
pub struct ReceiptParser {
    known_stores: Vec<(String, Regex)>,
    header_scan_lines: usize,
    footer_scan_lines: usize,
}

impl Default for ReceiptParser {
    fn default() -> Self {
        Self::new(&ParserSection::default())
    }
}

impl ReceiptParser {
    pub fn new(cfg: &ParserSection) -> Self {
        let known_stores = cfg
            .known_stores
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .filter_map(|s| {
                let re = Regex::new(&format!(r"\b{}\b", regex::escape(&s))).ok()?;
                Some((s, re))
            })
            .collect();

        Self {
            known_stores,
            header_scan_lines: cfg.header_scan_lines,
            footer_scan_lines: cfg.footer_scan_lines,
        }
    }

    /// Parse OCR text into a receipt. Never fails; unknown parts come back as `None`.
    pub fn parse(&self, text: &str) -> ParsedReceipt {
        let lines = parser::split_lines(text);
        if lines.is_empty() {
            return ParsedReceipt::empty(text);
        }

        let receipt = ParsedReceipt {
            store: parser::detect_store(&lines, &self.known_stores, self.header_scan_lines),
            date: dates::extract_date(text),
            items: parser::extract_items(&lines),
            total: parser::extract_total(&lines, self.footer_scan_lines),
            raw_text: text.to_string(),
        };

        debug!(
            store = ?receipt.store.as_ref().map(|s| s.name.as_str()),
            date = ?receipt.date,
            items = receipt.items.len(),
            total = ?receipt.total,
            "Parsed receipt"
        );
        receipt
    }

    /// Parse structured OCR output. Per-line confidence is not consulted.
    pub fn parse_raw(&self, raw: &RawText) -> ParsedReceipt {
        self.parse(&raw.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    const WALMART: &str = "WALMART\n123 Main St\nDate: 01/15/2024\n\nApple Red 1kg     €2.50\nBread             €1.99\n\nTotal:            €4.49";

    #[test]
    fn test_walmart_receipt() {
        let receipt = ReceiptParser::default().parse(WALMART);

        let store = receipt.store.as_ref().unwrap();
        assert!(store.name.to_lowercase().contains("walmart"));
        assert_eq!(store.confidence, 0.9);
        assert_eq!(receipt.date, Some(date!(2024 - 01 - 15)));
        assert_eq!(receipt.items.len(), 2);

        let apple = &receipt.items[0];
        assert_eq!(apple.description, "Apple Red");
        assert_eq!(apple.quantity, 1.0);
        assert_eq!(apple.unit, "kg");
        assert_eq!(apple.price, 2.50);
        assert_eq!(apple.line_number, 5);

        let bread = &receipt.items[1];
        assert_eq!(bread.description, "Bread");
        assert_eq!(bread.quantity, 1.0);
        assert_eq!(bread.unit, "pcs");
        assert_eq!(bread.price, 1.99);

        assert_eq!(receipt.total, Some(4.49));
        assert_eq!(receipt.raw_text, WALMART);
        assert!(!receipt.needs_review());
    }

    #[test]
    fn test_empty_text() {
        let receipt = ReceiptParser::default().parse("");
        assert_eq!(receipt, ParsedReceipt::empty(""));
        assert!(receipt.needs_review());
    }

    #[test]
    fn test_whitespace_only_text() {
        let receipt = ReceiptParser::default().parse("   \n\t\n  ");
        assert!(receipt.store.is_none());
        assert!(receipt.items.is_empty());
        assert_eq!(receipt.raw_text, "   \n\t\n  ");
    }

    #[test]
    fn test_unknown_store_falls_back_to_first_line() {
        let receipt = ReceiptParser::default().parse("Corner Deli\nMilk 0,99\n");
        let store = receipt.store.unwrap();
        assert_eq!(store.name, "Corner Deli");
        assert_eq!(store.confidence, 0.5);
    }

    #[test]
    fn test_parse_is_idempotent() {
        let parser = ReceiptParser::default();
        let text = "REWE Markt\n15.03.2024\n2 x Joghurt 1,58\nBananen 1,2 kg 2,39 A\nSUMME EUR 3,97\nKarte 3,97";
        assert_eq!(parser.parse(text), parser.parse(text));
    }

    #[test]
    fn test_german_receipt() {
        let text = "REWE Markt GmbH\nHauptstr. 5\n15.03.2024 10:12\n2 x Joghurt 1,58\nBananen 1,2 kg 2,39 A\nPfand 0,00\nSUMME EUR 3,97\nKarte 3,97\nVielen Dank";
        let receipt = ReceiptParser::default().parse(text);

        assert_eq!(receipt.store.as_ref().unwrap().name, "rewe");
        assert_eq!(receipt.date, Some(date!(2024 - 03 - 15)));
        assert_eq!(receipt.items.len(), 3);
        assert_eq!(receipt.items[0].description, "Joghurt");
        assert_eq!(receipt.items[0].quantity, 2.0);
        assert_eq!(receipt.items[1].description, "Bananen");
        assert_eq!(receipt.items[1].quantity, 1.2);
        assert_eq!(receipt.items[1].unit, "kg");
        // zero-price lines are items too
        assert_eq!(receipt.items[2].description, "Pfand");
        assert_eq!(receipt.items[2].price, 0.0);
        assert_eq!(receipt.total, Some(3.97));
    }

    #[test]
    fn test_raw_text_ignores_confidence() {
        let raw = RawText {
            lines: vec![
                OcrLine {
                    text: "LIDL".into(),
                    confidence: Some(0.2),
                    bbox: None,
                },
                OcrLine {
                    text: "Butter 2.29".into(),
                    confidence: Some(0.99),
                    bbox: Some(BoundingBox {
                        x: 0.0,
                        y: 10.0,
                        width: 100.0,
                        height: 12.0,
                    }),
                },
            ],
        };
        let parser = ReceiptParser::default();
        assert_eq!(parser.parse_raw(&raw), parser.parse("LIDL\nButter 2.29"));
    }

    #[test]
    fn test_serializes_date_as_string() {
        let receipt = ReceiptParser::default().parse(WALMART);
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["date"], "2024-01-15");
        assert_eq!(json["items"][0]["unit"], "kg");
    }
}
