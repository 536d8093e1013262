use super::{ParsedItem, StoreGuess};
use regex::Regex;
use std::sync::LazyLock;

const KNOWN_STORE_CONFIDENCE: f64 = 0.9;
const FIRST_LINE_CONFIDENCE: f64 = 0.5;
const DEFAULT_UNIT: &str = "pcs";

/// Header/footer lines that carry amounts but are not items.
static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:sub-?total|total|totale|tax|vat|mwst|ust|iva|tva|thank|thanks|danke|merci|gracias|card|karte|ec-karte|cash|bar\s*geld|bargeld|change|rückgeld|wechselgeld|summe|zwischensumme|gesamt|gesamtbetrag|balance|payment|visa|mastercard|maestro|debit|credit|zu\s+zahlen|gegeben)\b",
    )
    .unwrap()
});

/// Amount at the end of a line: optional currency on either side, two decimals,
/// optional single-letter VAT class marker.
static TRAILING_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|[\s:])(?P<price>(?:[€$£]\s*|(?:eur|usd|gbp|chf)\s+)?-?(?:\d{1,3}(?:[.,]\d{3})+|\d+)[.,]\d{2})(?:\s*[€$£]|\s+(?:eur|usd|gbp|chf))?(?:\s+[a-z])?\s*$",
    )
    .unwrap()
});

static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?(?:\d{1,3}(?:[.,]\d{3})+|\d+)[.,]\d{2}").unwrap());

static TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:grand\s+total|total|totale|summe|gesamt|gesamtbetrag|sum|amount\s+due|balance\s+due|to\s+pay|zu\s+zahlen|importe|montant)\b",
    )
    .unwrap()
});

static SUBTOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:sub[\s-]?total|zwischensumme)\b").unwrap());

/// "2 x Milk", "3* Eggs"
static LEADING_MULTIPLIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?P<qty>\d+(?:[.,]\d+)?)\s*[x*×](?:\s+|$)").unwrap()
});

/// "Milk x2", "Milk 2 x"
static TRAILING_MULTIPLIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s(?:[x*×]\s*(?P<a>\d+(?:[.,]\d+)?)|(?P<b>\d+(?:[.,]\d+)?)\s*[x*×])\s*$").unwrap()
});

/// "1.5 kg", "500g", "2 pcs"
static MEASURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|\s)(?P<qty>\d+(?:[.,]\d+)?)\s*(?P<unit>kg|g|gr|lbs|lb|oz|ltr|l|ml|cl|pcs|pc|pk|stk|st)\b\.?",
    )
    .unwrap()
});

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// A trimmed, non-empty source line with its 1-based position.
#[derive(Debug, Clone, Copy)]
pub(super) struct Line<'a> {
    pub number: usize,
    pub text: &'a str,
}

pub(super) fn split_lines(text: &str) -> Vec<Line<'_>> {
    text.lines()
        .enumerate()
        .map(|(i, l)| Line {
            number: i + 1,
            text: l.trim(),
        })
        .filter(|l| !l.text.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub(super) fn detect_store(
    lines: &[Line<'_>],
    known_stores: &[(String, Regex)],
    scan_lines: usize,
) -> Option<StoreGuess> {
    let header = &lines[..lines.len().min(scan_lines)];

    for line in header {
        let lower = line.text.to_lowercase();
        if let Some((name, _)) = known_stores.iter().find(|(_, re)| re.is_match(&lower)) {
            return Some(StoreGuess {
                name: name.clone(),
                confidence: KNOWN_STORE_CONFIDENCE,
            });
        }
    }

    lines.first().map(|l| StoreGuess {
        name: l.text.to_string(),
        confidence: FIRST_LINE_CONFIDENCE,
    })
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

pub(super) fn extract_items(lines: &[Line<'_>]) -> Vec<ParsedItem> {
    lines.iter().filter_map(|l| parse_item_line(l)).collect()
}

fn parse_item_line(line: &Line<'_>) -> Option<ParsedItem> {
    if NOISE_RE.is_match(line.text) {
        return None;
    }

    let caps = TRAILING_PRICE_RE.captures(line.text)?;
    let price = parse_amount(&caps["price"])?;
    let desc_part = &line.text[..caps.get(0)?.start()];

    let (quantity, unit, rest) = split_quantity(desc_part);
    let description = clean_description(&rest);
    if description.is_empty() {
        return None;
    }

    Some(ParsedItem {
        description,
        quantity,
        unit,
        price,
        line_number: line.number,
    })
}

/// Pull a quantity/unit token out of the description portion.
fn split_quantity(desc: &str) -> (f64, String, String) {
    if let Some(caps) = LEADING_MULTIPLIER_RE.captures(desc) {
        if let Some(qty) = parse_quantity(&caps["qty"]) {
            let rest = &desc[caps.get(0).map_or(0, |m| m.end())..];
            return (qty, DEFAULT_UNIT.to_string(), rest.to_string());
        }
    }

    if let Some(caps) = TRAILING_MULTIPLIER_RE.captures(desc) {
        let raw = caps.name("a").or_else(|| caps.name("b")).map(|m| m.as_str());
        if let Some(qty) = raw.and_then(parse_quantity) {
            let start = caps.get(0).map_or(desc.len(), |m| m.start());
            return (qty, DEFAULT_UNIT.to_string(), desc[..start].to_string());
        }
    }

    if let Some(caps) = MEASURE_RE.captures(desc) {
        if let (Some(qty), Some(whole)) = (parse_quantity(&caps["qty"]), caps.get(0)) {
            let unit = normalize_unit(&caps["unit"]);
            let rest = format!("{} {}", &desc[..whole.start()], &desc[whole.end()..]);
            return (qty, unit, rest);
        }
    }

    (1.0, DEFAULT_UNIT.to_string(), desc.to_string())
}

fn parse_quantity(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok().filter(|q| *q > 0.0)
}

fn normalize_unit(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "gr" => "g".to_string(),
        "lbs" => "lb".to_string(),
        "ltr" => "l".to_string(),
        "pc" | "pk" | "stk" | "st" => DEFAULT_UNIT.to_string(),
        other => other.to_string(),
    }
}

fn clean_description(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '&' | '%' | '\'') {
                c
            } else {
                ' '
            }
        })
        .collect();
    let collapsed = WHITESPACE_RE.replace_all(&kept, " ");
    collapsed
        .trim()
        .trim_matches(|c: char| c == '-' || c == '\'')
        .trim()
        .to_string()
}

/// "€1.234,56" → 1234.56. The last separator is always the decimal one.
pub(super) fn parse_amount(raw: &str) -> Option<f64> {
    let negative = raw.contains('-');
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let split = digits.rfind(['.', ','])?;
    let whole: String = digits[..split].chars().filter(|c| c.is_ascii_digit()).collect();
    let frac = &digits[split + 1..];
    let value = format!("{}.{}", if whole.is_empty() { "0" } else { &whole }, frac)
        .parse::<f64>()
        .ok()?;
    Some(if negative { -value } else { value })
}

// ---------------------------------------------------------------------------
// Total
// ---------------------------------------------------------------------------

/// Closest-to-the-end total line wins.
pub(super) fn extract_total(lines: &[Line<'_>], scan_lines: usize) -> Option<f64> {
    let footer_start = lines.len().saturating_sub(scan_lines);

    lines[footer_start..].iter().rev().find_map(|line| {
        if SUBTOTAL_RE.is_match(line.text) {
            return None;
        }
        let keyword = TOTAL_RE.find(line.text)?;
        let tail = &line.text[keyword.end()..];
        AMOUNT_RE
            .find_iter(tail)
            .last()
            .and_then(|m| parse_amount(m.as_str()))
    })
}
