use crate::models::{MealCategory, RecommendedItem};

/// 3+ unmatched meaningful name tokens force a deterministic rename.
/// Fixed threshold; it does not scale with name length.
const FALLBACK_RENAME_THRESHOLD: usize = 3;

/// Words a meal name may carry without any ingredient backing them:
/// cuisine adjectives, cooking methods, generic meal-type words, fillers.
/// Entries are stored in tokenizer form (lowercase, singularized).
const NAME_STOPWORDS: &[&str] = &[
    // cuisine adjectives
    "italian", "mexican", "asian", "mediterranean", "french", "thai", "indian",
    "chinese", "japanese", "korean", "greek", "spanish", "american", "cajun",
    "tex", "mex",
    // cooking methods
    "grilled", "baked", "roasted", "steamed", "fried", "sauteed", "seared",
    "poached", "boiled", "braised", "smoked", "toasted", "scrambled", "stir",
    "slow", "cooked", "raw", "crispy", "crunchy", "chopped", "shredded",
    "mashed", "whipped", "stuffed", "glazed", "marinated", "loaded",
    // generic meal-type words
    "breakfast", "lunch", "dinner", "snack", "meal", "bowl", "plate",
    "platter", "salad", "wrap", "sandwich", "soup", "stew", "curry",
    "skillet", "medley", "mix", "dish", "bite", "parfait", "smoothie",
    "omelette", "scramble", "bake", "roast",
    // fillers
    "with", "and", "the", "of", "on", "in", "a", "an", "side", "style",
    "quick", "easy", "simple", "healthy", "light", "classic", "homemade",
    "hearty", "power", "lean", "low", "high", "fresh", "warm", "cold",
    "mini", "big", "half", "double",
];

struct FlavorIngredient {
    token: &'static str,
    name: &'static str,
    serving_size: &'static str,
    calories: f64,
    protein_g: f64,
    carbs_g: f64,
    fat_g: f64,
    fiber_g: f64,
    sugar_g: f64,
}

/// Name words that imply a small real ingredient. When a name references
/// one and the item list does not, the synthetic entry below is appended
/// so the name stays honest.
const FLAVOR_TOKENS: &[FlavorIngredient] = &[
    FlavorIngredient { token: "lemon", name: "Lemon juice", serving_size: "1 tbsp", calories: 4.0, protein_g: 0.1, carbs_g: 1.3, fat_g: 0.0, fiber_g: 0.1, sugar_g: 0.4 },
    FlavorIngredient { token: "lime", name: "Lime juice", serving_size: "1 tbsp", calories: 4.0, protein_g: 0.1, carbs_g: 1.3, fat_g: 0.0, fiber_g: 0.1, sugar_g: 0.3 },
    FlavorIngredient { token: "garlic", name: "Garlic, raw", serving_size: "1 clove", calories: 4.0, protein_g: 0.2, carbs_g: 1.0, fat_g: 0.0, fiber_g: 0.1, sugar_g: 0.0 },
    FlavorIngredient { token: "ginger", name: "Ginger, raw", serving_size: "1 tsp", calories: 2.0, protein_g: 0.0, carbs_g: 0.4, fat_g: 0.0, fiber_g: 0.0, sugar_g: 0.0 },
    FlavorIngredient { token: "basil", name: "Basil, fresh", serving_size: "5 leaves", calories: 1.0, protein_g: 0.1, carbs_g: 0.1, fat_g: 0.0, fiber_g: 0.1, sugar_g: 0.0 },
    FlavorIngredient { token: "cilantro", name: "Cilantro, fresh", serving_size: "2 tbsp", calories: 1.0, protein_g: 0.0, carbs_g: 0.1, fat_g: 0.0, fiber_g: 0.1, sugar_g: 0.0 },
    FlavorIngredient { token: "parsley", name: "Parsley, fresh", serving_size: "2 tbsp", calories: 3.0, protein_g: 0.2, carbs_g: 0.5, fat_g: 0.1, fiber_g: 0.3, sugar_g: 0.1 },
    FlavorIngredient { token: "dill", name: "Dill, fresh", serving_size: "1 tbsp", calories: 1.0, protein_g: 0.1, carbs_g: 0.1, fat_g: 0.0, fiber_g: 0.0, sugar_g: 0.0 },
    FlavorIngredient { token: "mint", name: "Mint, fresh", serving_size: "5 leaves", calories: 1.0, protein_g: 0.1, carbs_g: 0.2, fat_g: 0.0, fiber_g: 0.1, sugar_g: 0.0 },
    FlavorIngredient { token: "rosemary", name: "Rosemary, fresh", serving_size: "1 tsp", calories: 1.0, protein_g: 0.0, carbs_g: 0.2, fat_g: 0.1, fiber_g: 0.1, sugar_g: 0.0 },
    FlavorIngredient { token: "thyme", name: "Thyme, fresh", serving_size: "1 tsp", calories: 1.0, protein_g: 0.0, carbs_g: 0.2, fat_g: 0.0, fiber_g: 0.1, sugar_g: 0.0 },
    FlavorIngredient { token: "oregano", name: "Oregano, dried", serving_size: "1 tsp", calories: 3.0, protein_g: 0.1, carbs_g: 0.7, fat_g: 0.1, fiber_g: 0.4, sugar_g: 0.0 },
    FlavorIngredient { token: "cinnamon", name: "Cinnamon, ground", serving_size: "1 tsp", calories: 6.0, protein_g: 0.1, carbs_g: 2.1, fat_g: 0.0, fiber_g: 1.4, sugar_g: 0.1 },
    FlavorIngredient { token: "cumin", name: "Cumin, ground", serving_size: "1 tsp", calories: 8.0, protein_g: 0.4, carbs_g: 0.9, fat_g: 0.5, fiber_g: 0.2, sugar_g: 0.0 },
    FlavorIngredient { token: "paprika", name: "Paprika", serving_size: "1 tsp", calories: 6.0, protein_g: 0.3, carbs_g: 1.2, fat_g: 0.3, fiber_g: 0.8, sugar_g: 0.2 },
    FlavorIngredient { token: "turmeric", name: "Turmeric, ground", serving_size: "1 tsp", calories: 8.0, protein_g: 0.3, carbs_g: 1.4, fat_g: 0.2, fiber_g: 0.5, sugar_g: 0.1 },
    FlavorIngredient { token: "chili", name: "Chili flakes", serving_size: "1 tsp", calories: 6.0, protein_g: 0.2, carbs_g: 1.0, fat_g: 0.3, fiber_g: 0.5, sugar_g: 0.2 },
    FlavorIngredient { token: "honey", name: "Honey", serving_size: "1 tsp", calories: 21.0, protein_g: 0.0, carbs_g: 5.8, fat_g: 0.0, fiber_g: 0.0, sugar_g: 5.6 },
    FlavorIngredient { token: "maple", name: "Maple syrup", serving_size: "1 tsp", calories: 17.0, protein_g: 0.0, carbs_g: 4.5, fat_g: 0.0, fiber_g: 0.0, sugar_g: 4.0 },
    FlavorIngredient { token: "vanilla", name: "Vanilla extract", serving_size: "1 tsp", calories: 12.0, protein_g: 0.0, carbs_g: 0.5, fat_g: 0.0, fiber_g: 0.0, sugar_g: 0.5 },
    FlavorIngredient { token: "cocoa", name: "Cocoa powder", serving_size: "1 tsp", calories: 6.0, protein_g: 0.5, carbs_g: 1.5, fat_g: 0.4, fiber_g: 0.9, sugar_g: 0.0 },
    FlavorIngredient { token: "soy", name: "Soy sauce", serving_size: "1 tbsp", calories: 9.0, protein_g: 1.3, carbs_g: 0.8, fat_g: 0.0, fiber_g: 0.1, sugar_g: 0.1 },
    FlavorIngredient { token: "sesame", name: "Sesame seeds", serving_size: "1 tsp", calories: 17.0, protein_g: 0.5, carbs_g: 0.7, fat_g: 1.5, fiber_g: 0.4, sugar_g: 0.0 },
    FlavorIngredient { token: "mustard", name: "Dijon mustard", serving_size: "1 tsp", calories: 5.0, protein_g: 0.3, carbs_g: 0.3, fat_g: 0.3, fiber_g: 0.2, sugar_g: 0.1 },
    FlavorIngredient { token: "balsamic", name: "Balsamic vinegar", serving_size: "1 tbsp", calories: 14.0, protein_g: 0.1, carbs_g: 2.7, fat_g: 0.0, fiber_g: 0.0, sugar_g: 2.4 },
    FlavorIngredient { token: "pesto", name: "Pesto", serving_size: "1 tbsp", calories: 80.0, protein_g: 1.4, carbs_g: 1.0, fat_g: 8.1, fiber_g: 0.3, sugar_g: 0.2 },
    FlavorIngredient { token: "salsa", name: "Salsa", serving_size: "2 tbsp", calories: 9.0, protein_g: 0.4, carbs_g: 2.0, fat_g: 0.1, fiber_g: 0.5, sugar_g: 1.2 },
];

impl FlavorIngredient {
    fn to_item(&self) -> RecommendedItem {
        RecommendedItem {
            name: self.name.to_string(),
            serving_size: Some(self.serving_size.to_string()),
            calories: Some(self.calories),
            protein_g: Some(self.protein_g),
            carbs_g: Some(self.carbs_g),
            fat_g: Some(self.fat_g),
            fiber_g: Some(self.fiber_g),
            sugar_g: Some(self.sugar_g),
            servings: 1.0,
        }
    }
}

/// Lowercase, fold non-alphanumeric runs to spaces, split, and naively
/// singularize (trailing 's' stripped from tokens longer than 3 chars).
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(singularize)
        .collect()
}

fn singularize(token: &str) -> String {
    if token.len() > 3 {
        if let Some(stripped) = token.strip_suffix('s') {
            return stripped.to_string();
        }
    }
    token.to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsistentMeal {
    pub meal_name: String,
    pub items: Vec<RecommendedItem>,
}

/// Make the meal name and item list agree.
///
/// Flavor words referenced by the name but absent from the items are
/// injected as small synthetic ingredients; a name with 3+ tokens that
/// match nothing (and no flavor entry) is discarded and rebuilt from the
/// items. Idempotent: re-running on its own output changes nothing.
#[must_use]
pub fn enforce_name_consistency(
    proposed_name: &str,
    items: Vec<RecommendedItem>,
    category: MealCategory,
) -> ConsistentMeal {
    let mut items = items;
    let proposed = proposed_name.trim();

    let item_tokens: std::collections::HashSet<String> = items
        .iter()
        .flat_map(|it| tokenize(&it.name))
        .collect();

    let mut unmatched_meaningful = 0usize;
    for token in tokenize(proposed) {
        if NAME_STOPWORDS.contains(&token.as_str()) || item_tokens.contains(&token) {
            continue;
        }
        if let Some(flavor) = FLAVOR_TOKENS.iter().find(|f| f.token == token) {
            let already_present = items
                .iter()
                .any(|it| it.name.to_lowercase().contains(&token));
            if !already_present {
                items.push(flavor.to_item());
            }
        } else if token.len() >= 4 {
            unmatched_meaningful += 1;
        }
    }

    let meal_name = if proposed.is_empty() || unmatched_meaningful >= FALLBACK_RENAME_THRESHOLD {
        infer_meal_name(&items, category)
    } else {
        proposed.to_string()
    };

    ConsistentMeal { meal_name, items }
}

fn clean_item_name(name: &str) -> String {
    let no_parens = match (name.find('('), name.find(')')) {
        (Some(open), Some(close)) if close > open => {
            format!("{}{}", &name[..open], &name[close + 1..])
        }
        (Some(open), _) => name[..open].to_string(),
        _ => name.to_string(),
    };
    no_parens
        .split(',')
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Deterministic name from the item list: the highest calories × servings
/// item leads, up to two distinct runners-up become sides.
#[must_use]
pub fn infer_meal_name(items: &[RecommendedItem], category: MealCategory) -> String {
    let mut scored: Vec<(String, f64)> = items
        .iter()
        .filter_map(|it| {
            let cleaned = clean_item_name(&it.name);
            if cleaned.is_empty() {
                return None;
            }
            let calories = it.calories.filter(|c| c.is_finite()).unwrap_or(0.0);
            let servings = if it.servings.is_finite() { it.servings } else { 0.0 };
            Some((cleaned, calories * servings))
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut names: Vec<String> = Vec::new();
    for (name, _) in scored {
        let duplicate = names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&name));
        if !duplicate {
            names.push(name);
        }
        if names.len() == 3 {
            break;
        }
    }

    match names.len() {
        0 => format!("AI Recommended {category}"),
        1 => names[0].clone(),
        2 => format!("{} with {}", names[0], names[1]),
        _ => format!("{} with {} & {}", names[0], names[1], names[2]),
    }
}
