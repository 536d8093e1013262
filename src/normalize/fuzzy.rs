use std::collections::BTreeSet;
use strsim::normalized_levenshtein;

/// Edit-distance similarity on a 0–100 scale.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    (normalized_levenshtein(a, b) * 100.0).round()
}

/// Token-set similarity on a 0–100 scale.
///
/// Both strings are reduced to sorted unique tokens. The shared tokens are
/// compared against each side's full token set, so a description whose words
/// are all contained in the other scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let sect = join(ta.intersection(&tb));
    let only_a = join(ta.difference(&tb));
    let only_b = join(tb.difference(&ta));

    let combined_a = join_nonempty(&sect, &only_a);
    let combined_b = join_nonempty(&sect, &only_b);

    let mut best = ratio(&combined_a, &combined_b);
    if !sect.is_empty() {
        best = best
            .max(ratio(&sect, &combined_a))
            .max(ratio(&sect, &combined_b));
    }
    best
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn join<'a>(parts: impl Iterator<Item = &'a String>) -> String {
    parts.map(String::as_str).collect::<Vec<_>>().join(" ")
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{a} {b}"),
    }
}
