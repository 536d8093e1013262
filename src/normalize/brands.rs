//! Brand and category lookup tables.

/// Known brands in normalized form. Multi-word entries are tried first.
const KNOWN_BRANDS: &[&str] = &[
    "ben jerrys",
    "bonne maman",
    "coca cola",
    "del monte",
    "dr oetker",
    "granny smith",
    "green giant",
    "kinder bueno",
    "pink lady",
    "uncle bens",
    "alpro",
    "activia",
    "arla",
    "barilla",
    "cadbury",
    "chiquita",
    "danone",
    "dole",
    "fanta",
    "ferrero",
    "gala",
    "haribo",
    "heinz",
    "hellmanns",
    "hovis",
    "kelloggs",
    "kerrygold",
    "knorr",
    "kraft",
    "lays",
    "lindt",
    "lurpak",
    "milka",
    "muller",
    "nestle",
    "nutella",
    "oatly",
    "oreo",
    "pepsi",
    "philadelphia",
    "pringles",
    "sprite",
    "tropicana",
    "warburtons",
    "weihenstephan",
    "zott",
];

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "fruit",
        &[
            "apple", "apfel", "äpfel", "banana", "banane", "orange", "grape", "traube", "pear",
            "birne", "berry", "beere", "lemon", "zitrone", "lime", "melon", "peach", "kiwi",
            "mango", "cherry", "kirsche", "plum", "pineapple", "avocado",
        ],
    ),
    (
        "vegetable",
        &[
            "tomato", "tomate", "potato", "kartoffel", "carrot", "karotte", "möhre", "onion",
            "zwiebel", "lettuce", "salad", "salat", "cucumber", "gurke", "pepper", "paprika",
            "broccoli", "brokkoli", "cabbage", "kohl", "spinach", "spinat", "garlic", "zucchini",
            "mushroom", "pilz",
        ],
    ),
    (
        "dairy",
        &[
            "milk", "milch", "cheese", "käse", "yogurt", "yoghurt", "joghurt", "butter", "cream",
            "sahne", "quark", "kefir", "mozzarella", "cheddar",
        ],
    ),
    (
        "bakery",
        &[
            "bread", "brot", "roll", "brötchen", "bun", "croissant", "baguette", "cake", "kuchen",
            "toast", "bagel", "muffin", "pretzel", "brezel",
        ],
    ),
    (
        "meat",
        &[
            "chicken", "hähnchen", "beef", "rind", "pork", "schwein", "ham", "schinken",
            "sausage", "wurst", "turkey", "pute", "bacon", "salami", "steak", "mince", "hack",
        ],
    ),
];

pub const DEFAULT_CATEGORY: &str = "other";

/// Find a known brand in a normalized description and return it together with
/// the description minus the brand tokens.
pub fn extract_brand(normalized: &str) -> (Option<String>, String) {
    let tokens: Vec<&str> = normalized.split_whitespace().collect();

    let mut brands: Vec<Vec<&str>> = KNOWN_BRANDS
        .iter()
        .map(|b| b.split_whitespace().collect())
        .collect();
    brands.sort_by(|a, b| b.len().cmp(&a.len()));

    for brand in &brands {
        if brand.len() > tokens.len() {
            continue;
        }
        if let Some(pos) = tokens.windows(brand.len()).position(|w| w == brand.as_slice()) {
            let rest: Vec<&str> = tokens[..pos]
                .iter()
                .chain(&tokens[pos + brand.len()..])
                .copied()
                .collect();
            return (Some(brand.join(" ")), rest.join(" "));
        }
    }

    (None, tokens.join(" "))
}

/// Keyword table lookup; the first category with a matching word wins.
pub fn categorize(normalized: &str) -> &'static str {
    let words: Vec<&str> = normalized.split_whitespace().collect();

    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| {
            words
                .iter()
                .any(|w| keywords.iter().any(|k| w.starts_with(k)))
        })
        .map(|(category, _)| *category)
        .unwrap_or(DEFAULT_CATEGORY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_word_brand() {
        let (brand, rest) = extract_brand("gala apple red 1 5kg");
        assert_eq!(brand.as_deref(), Some("gala"));
        assert_eq!(rest, "apple red 1 5kg");
    }

    #[test]
    fn test_two_word_brand_wins() {
        let (brand, rest) = extract_brand("diet coca cola 1 5l");
        assert_eq!(brand.as_deref(), Some("coca cola"));
        assert_eq!(rest, "diet 1 5l");
    }

    #[test]
    fn test_brand_must_be_whole_tokens() {
        let (brand, rest) = extract_brand("galaxy bar");
        assert_eq!(brand, None);
        assert_eq!(rest, "galaxy bar");
    }

    #[test]
    fn test_categorize() {
        assert_eq!(categorize("red apples"), "fruit");
        assert_eq!(categorize("whole milk"), "dairy");
        assert_eq!(categorize("rye bread"), "bakery");
        assert_eq!(categorize("cherry tomatoes"), "fruit");
        assert_eq!(categorize("chicken breast"), "meat");
        assert_eq!(categorize("xyzzy unknown snack bar 123"), "other");
    }
}
