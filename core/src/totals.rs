use crate::models::{MAX_SERVINGS, MacroTotals, RecommendedItem};

/// Floor for the calorie-fit scale factor: a meal is never shrunk below
/// 15% of its proposed size, even when the remaining budget is tiny.
pub const MIN_FIT_FACTOR: f64 = 0.15;

#[must_use]
pub fn round3(n: f64) -> f64 {
    (n * 1000.0).round() / 1000.0
}

fn macro_or_zero(v: Option<f64>) -> f64 {
    v.filter(|n| n.is_finite()).unwrap_or(0.0)
}

fn rounded(calories: f64, protein: f64, carbs: f64, fat: f64, fiber: f64, sugar: f64) -> MacroTotals {
    MacroTotals {
        calories: Some(calories.round()),
        protein_g: Some(round3(protein)),
        carbs_g: Some(round3(carbs)),
        fat_g: Some(round3(fat)),
        fiber_g: Some(round3(fiber)),
        sugar_g: Some(round3(sugar)),
    }
}

/// Derive totals from the item list. Always recomputed in full; totals are
/// never accumulated incrementally across edits.
#[must_use]
pub fn compute_totals(items: &[RecommendedItem]) -> MacroTotals {
    let mut cal = 0.0;
    let mut protein = 0.0;
    let mut carbs = 0.0;
    let mut fat = 0.0;
    let mut fiber = 0.0;
    let mut sugar = 0.0;
    for item in items {
        let servings = if item.servings.is_finite() { item.servings } else { 0.0 };
        cal += macro_or_zero(item.calories) * servings;
        protein += macro_or_zero(item.protein_g) * servings;
        carbs += macro_or_zero(item.carbs_g) * servings;
        fat += macro_or_zero(item.fat_g) * servings;
        fiber += macro_or_zero(item.fiber_g) * servings;
        sugar += macro_or_zero(item.sugar_g) * servings;
    }
    rounded(cal, protein, carbs, fat, fiber, sugar)
}

/// Sum rows null-safely (missing fields count as zero).
#[must_use]
pub fn sum_totals(rows: &[MacroTotals]) -> MacroTotals {
    let mut cal = 0.0;
    let mut protein = 0.0;
    let mut carbs = 0.0;
    let mut fat = 0.0;
    let mut fiber = 0.0;
    let mut sugar = 0.0;
    for r in rows {
        cal += macro_or_zero(r.calories);
        protein += macro_or_zero(r.protein_g);
        carbs += macro_or_zero(r.carbs_g);
        fat += macro_or_zero(r.fat_g);
        fiber += macro_or_zero(r.fiber_g);
        sugar += macro_or_zero(r.sugar_g);
    }
    rounded(cal, protein, carbs, fat, fiber, sugar)
}

/// Field-wise `a - b`. A null on either side yields null: an unknown
/// budget stays unknown rather than pretending to be zero.
#[must_use]
pub fn subtract_totals(a: &MacroTotals, b: &MacroTotals) -> MacroTotals {
    let sub = |x: Option<f64>, y: Option<f64>| match (x, y) {
        (Some(x), Some(y)) => Some(round3(x - y)),
        _ => None,
    };
    MacroTotals {
        calories: match (a.calories, b.calories) {
            (Some(x), Some(y)) => Some(x - y),
            _ => None,
        },
        protein_g: sub(a.protein_g, b.protein_g),
        carbs_g: sub(a.carbs_g, b.carbs_g),
        fat_g: sub(a.fat_g, b.fat_g),
        fiber_g: sub(a.fiber_g, b.fiber_g),
        sugar_g: sub(a.sugar_g, b.sugar_g),
    }
}

/// Scale servings down so total calories fit under `calories_cap`. The
/// factor is clamped to [`MIN_FIT_FACTOR`, 1]; meals already under the cap
/// (or with no usable cap/total) pass through untouched.
#[must_use]
pub fn scale_to_fit_calories(
    items: Vec<RecommendedItem>,
    calories_cap: Option<f64>,
) -> Vec<RecommendedItem> {
    let Some(cap) = calories_cap.filter(|c| c.is_finite() && *c > 0.0) else {
        return items;
    };
    let total = compute_totals(&items).calories.unwrap_or(0.0);
    if !total.is_finite() || total <= 0.0 || total <= cap {
        return items;
    }
    let factor = (cap / total).clamp(MIN_FIT_FACTOR, 1.0);
    items
        .into_iter()
        .map(|mut it| {
            let servings = if it.servings.is_finite() { it.servings } else { 0.0 };
            it.servings = round3((servings * factor).clamp(0.0, MAX_SERVINGS));
            it
        })
        .collect()
}
