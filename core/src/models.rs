use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Six nullable macro fields. Calories are integer-rounded, the rest carry
/// at most 3 decimal places; `None` means "unknown", not zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroTotals {
    pub calories: Option<f64>,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub fiber_g: Option<f64>,
    pub sugar_g: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedItem {
    pub name: String,
    #[serde(default)]
    pub serving_size: Option<String>,
    #[serde(default)]
    pub calories: Option<f64>,
    #[serde(default)]
    pub protein_g: Option<f64>,
    #[serde(default)]
    pub carbs_g: Option<f64>,
    #[serde(default)]
    pub fat_g: Option<f64>,
    #[serde(default)]
    pub fiber_g: Option<f64>,
    #[serde(default)]
    pub sugar_g: Option<f64>,
    pub servings: f64,
}

/// Structured preparation steps. A recipe with zero steps is treated as
/// absent everywhere; `normalize_recipe` never produces one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub servings: Option<u32>,
    #[serde(default)]
    pub prep_minutes: Option<u32>,
    #[serde(default)]
    pub cook_minutes: Option<u32>,
    pub steps: Vec<String>,
}

pub const MAX_RECIPE_STEPS: usize = 12;
pub const MAX_TAGS: usize = 12;
pub const MAX_SERVINGS: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealCategory {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealCategory {
    /// Normalize free-form category input. Unknown values map to dinner,
    /// the most generic slot.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "breakfast" => Self::Breakfast,
            "lunch" => Self::Lunch,
            "snack" => Self::Snack,
            _ => Self::Dinner,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Snack => "snack",
        }
    }
}

impl std::fmt::Display for MealCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedMealRecord {
    pub id: String,
    pub created_at: String,
    pub date: String,
    pub category: MealCategory,
    pub meal_name: String,
    pub tags: Vec<String>,
    pub why: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<Recipe>,
    pub items: Vec<RecommendedItem>,
    pub totals: MacroTotals,
}

/// The most recent draft, kept only for duplicate avoidance. Never shown
/// as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastGenerated {
    pub meal_name: String,
    pub items: Vec<RecommendedItem>,
    pub created_at: String,
}

/// Per-user persisted blob. `history` must stay a subset of records whose
/// id is in `committed_ids`; `store::save` enforces this on every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredState {
    pub version: i64,
    pub history: Vec<RecommendedMealRecord>,
    #[serde(default)]
    pub seen_explain_at: Option<String>,
    #[serde(default)]
    pub committed_ids: Vec<String>,
    #[serde(default)]
    pub last_generated: Option<LastGenerated>,
}

impl Default for StoredState {
    fn default() -> Self {
        Self {
            version: 1,
            history: Vec::new(),
            seen_explain_at: None,
            committed_ids: Vec::new(),
            last_generated: None,
        }
    }
}

/// Prompt context for one user. Everything is optional; the prompt builder
/// renders whatever is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub birthdate: Option<String>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub exercise_frequency: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub goal_intensity: Option<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub health_notes: String,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub diabetes_type: Option<String>,
    #[serde(default)]
    pub supplements: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FoodLogEntry {
    pub id: i64,
    pub local_date: String,
    pub description: String,
    pub totals: MacroTotals,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FavoriteMeal {
    pub id: i64,
    pub meal_name: String,
    pub items: Vec<RecommendedItem>,
}

#[derive(Debug, Clone, Copy)]
pub struct WalletStatus {
    pub total_available_cents: i64,
}

/// Strict YYYY-MM-DD: shape first, then calendar validity.
pub fn validate_date(date: &str) -> Result<()> {
    let shape_ok = date.len() == 10
        && date.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shape_ok || NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        bail!("Invalid date '{date}'. Must be YYYY-MM-DD");
    }
    Ok(())
}

fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        _ => None,
    }
}

/// Normalize a raw item list from the generator or a client-held draft.
/// Entries without a non-empty name are dropped; macros coerce to numbers
/// or null; servings default to 1 and are clamped to [0, 20].
#[must_use]
pub fn normalize_items(raw: &Value) -> Vec<RecommendedItem> {
    let Some(entries) = raw.as_array() else {
        return Vec::new();
    };
    let mut safe = Vec::new();
    for entry in entries {
        let Some(name) = coerce_string(&entry["name"]) else {
            continue;
        };
        let servings = coerce_number(&entry["servings"])
            .unwrap_or(1.0)
            .clamp(0.0, MAX_SERVINGS);
        safe.push(RecommendedItem {
            name,
            serving_size: coerce_string(&entry["serving_size"]),
            calories: coerce_number(&entry["calories"]),
            protein_g: coerce_number(&entry["protein_g"]),
            carbs_g: coerce_number(&entry["carbs_g"]),
            fat_g: coerce_number(&entry["fat_g"]),
            fiber_g: coerce_number(&entry["fiber_g"]),
            sugar_g: coerce_number(&entry["sugar_g"]),
            servings,
        });
    }
    safe
}

/// Normalize a raw recipe. Zero usable steps means no recipe at all.
#[must_use]
pub fn normalize_recipe(raw: &Value) -> Option<Recipe> {
    if !raw.is_object() {
        return None;
    }
    let steps: Vec<String> = raw["steps"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(coerce_string)
                .take(MAX_RECIPE_STEPS)
                .collect()
        })
        .unwrap_or_default();
    if steps.is_empty() {
        return None;
    }
    let coerce_count = |v: &Value| {
        coerce_number(v)
            .filter(|n| *n >= 0.0)
            .map(|n| n.round() as u32)
    };
    Some(Recipe {
        servings: coerce_count(&raw["servings"]),
        prep_minutes: coerce_count(&raw["prep_minutes"]),
        cook_minutes: coerce_count(&raw["cook_minutes"]),
        steps,
    })
}

#[must_use]
pub fn normalize_tags(raw: &Value) -> Vec<String> {
    raw.as_array()
        .map(|arr| arr.iter().filter_map(coerce_string).take(MAX_TAGS).collect())
        .unwrap_or_default()
}
