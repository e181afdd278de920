use std::sync::LazyLock;

use regex::Regex;

use crate::models::{MealCategory, Recipe, RecommendedItem};

/// Fallback recipes never exceed this many steps.
const MAX_FALLBACK_STEPS: usize = 10;

/// One instruction per ingredient category, matched against item names.
/// Order matters: protein first, then carbs, vegetables, aromatics.
static STEP_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"\b(egg|omelette?|frittata)s?\b",
            "Whisk the eggs and cook gently in a lightly oiled pan until just set.",
        ),
        (
            r"\b(salmon|tuna|cod|tilapia|shrimp|prawn|sardine|fish|seafood)s?\b",
            "Season the fish and pan-sear or bake until it flakes easily.",
        ),
        (
            r"\b(chicken|turkey|beef|pork|lamb|steak)s?\b",
            "Season the meat and cook over medium-high heat until cooked through.",
        ),
        (
            r"\b(tofu|tempeh|seitan|edamame)\b",
            "Cube the plant protein and pan-fry until golden on all sides.",
        ),
        (
            r"\b(lentil|chickpea|bean)s?\b",
            "Rinse the legumes and simmer or warm them through.",
        ),
        (
            r"\b(rice|quinoa|oat|pasta|couscous|noodle|bread|tortilla|barley)s?\b",
            "Cook the grains to package timing and set aside.",
        ),
        (
            r"\b(broccoli|spinach|kale|pepper|zucchini|carrot|tomato|cucumber|asparagus|mushroom|onion|cauliflower|lettuce|green)s?\b",
            "Chop the vegetables and steam or saut\u{e9} until tender-crisp.",
        ),
        (
            r"\b(lemon|lime|garlic|ginger|basil|cilantro|parsley|dill|vinegar|chili|herb|spice)s?\b",
            "Finish with the aromatics, herbs, or citrus for brightness.",
        ),
    ]
    .into_iter()
    .map(|(pattern, step)| (Regex::new(pattern).expect("fixed pattern"), step))
    .collect()
});

fn default_times(category: MealCategory) -> (u32, u32) {
    match category {
        MealCategory::Breakfast => (5, 10),
        MealCategory::Snack => (5, 0),
        MealCategory::Lunch | MealCategory::Dinner => (10, 20),
    }
}

/// Build a heuristic step list from the item names: one instruction per
/// matched ingredient category plus a combine-and-season step.
#[must_use]
pub fn build_fallback_recipe(items: &[RecommendedItem], category: MealCategory) -> Recipe {
    let haystack = items
        .iter()
        .map(|it| it.name.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");

    let mut steps: Vec<String> = STEP_RULES
        .iter()
        .filter(|(pattern, _)| pattern.is_match(&haystack))
        .map(|(_, step)| (*step).to_string())
        .collect();
    steps.push("Combine everything, season with salt and pepper to taste, and serve.".to_string());
    steps.truncate(MAX_FALLBACK_STEPS);

    let (prep_minutes, cook_minutes) = default_times(category);
    Recipe {
        servings: Some(1),
        prep_minutes: Some(prep_minutes),
        cook_minutes: Some(cook_minutes),
        steps,
    }
}

/// Use the supplied recipe when it has steps, otherwise build one.
#[must_use]
pub fn ensure_recipe(
    recipe: Option<Recipe>,
    items: &[RecommendedItem],
    category: MealCategory,
) -> Recipe {
    match recipe {
        Some(r) if !r.steps.is_empty() => r,
        _ => build_fallback_recipe(items, category),
    }
}
