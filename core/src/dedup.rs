use std::collections::HashSet;

use crate::models::{FavoriteMeal, LastGenerated, RecommendedItem, RecommendedMealRecord};

/// Similarity thresholds. Heuristic constants without a derivation; kept
/// as configuration rather than values to tune in code.
#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub name_similarity: f64,
    pub ingredient_similarity: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            name_similarity: 0.8,
            ingredient_similarity: 0.6,
        }
    }
}

/// The comparable surface of a meal: its name and its item names.
#[derive(Debug, Clone)]
pub struct MealSketch {
    pub meal_name: String,
    pub item_names: Vec<String>,
}

impl MealSketch {
    #[must_use]
    pub fn new(meal_name: &str, items: &[RecommendedItem]) -> Self {
        Self {
            meal_name: meal_name.to_string(),
            item_names: items.iter().map(|it| it.name.clone()).collect(),
        }
    }
}

impl From<&RecommendedMealRecord> for MealSketch {
    fn from(record: &RecommendedMealRecord) -> Self {
        Self::new(&record.meal_name, &record.items)
    }
}

impl From<&LastGenerated> for MealSketch {
    fn from(last: &LastGenerated) -> Self {
        Self::new(&last.meal_name, &last.items)
    }
}

impl From<&FavoriteMeal> for MealSketch {
    fn from(fav: &FavoriteMeal) -> Self {
        Self::new(&fav.meal_name, &fav.items)
    }
}

fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn word_set(normalized: &str) -> HashSet<&str> {
    normalized.split_whitespace().collect()
}

/// `|A∩B| / |A∪B|`, defined as 0 when either set is empty.
#[must_use]
pub fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    #[allow(clippy::cast_precision_loss)]
    let score = intersection as f64 / union as f64;
    score
}

/// Two meals are "similar" when their normalized names match exactly, the
/// name word sets overlap strongly, or the ingredient token sets do.
#[must_use]
pub fn is_similar_meal(a: &MealSketch, b: &MealSketch, config: &DedupConfig) -> bool {
    let name_a = normalize_name(&a.meal_name);
    let name_b = normalize_name(&b.meal_name);
    if !name_a.is_empty() && name_a == name_b {
        return true;
    }

    if jaccard(&word_set(&name_a), &word_set(&name_b)) >= config.name_similarity {
        return true;
    }

    let ingredients_a = a.item_names.iter().map(|n| normalize_name(n)).collect::<Vec<_>>();
    let ingredients_b = b.item_names.iter().map(|n| normalize_name(n)).collect::<Vec<_>>();
    let set_a: HashSet<&str> = ingredients_a.iter().flat_map(|n| n.split_whitespace()).collect();
    let set_b: HashSet<&str> = ingredients_b.iter().flat_map(|n| n.split_whitespace()).collect();
    if set_a.is_empty() || set_b.is_empty() {
        return false;
    }
    jaccard(&set_a, &set_b) >= config.ingredient_similarity
}
