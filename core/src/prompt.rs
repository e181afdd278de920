use serde_json::json;

use crate::models::{MacroTotals, MealCategory, UserProfile};

/// How much optional context a prompt may carry. The cost guard drops from
/// `full` to `reduced` before touching the output-token budget.
#[derive(Debug, Clone, Copy)]
pub struct ContextLimits {
    pub supplements: usize,
    pub medications: usize,
    pub notes_chars: usize,
    pub logged_descriptions: usize,
    pub recent_names: usize,
    pub ingredient_hints: usize,
}

impl ContextLimits {
    #[must_use]
    pub fn full() -> Self {
        Self {
            supplements: 30,
            medications: 30,
            notes_chars: 600,
            logged_descriptions: 12,
            recent_names: 10,
            ingredient_hints: 40,
        }
    }

    #[must_use]
    pub fn reduced() -> Self {
        Self {
            supplements: 10,
            medications: 10,
            notes_chars: 200,
            logged_descriptions: 6,
            recent_names: 5,
            ingredient_hints: 15,
        }
    }
}

/// Everything the prompt builder needs for one attempt.
pub struct PromptInput<'a> {
    pub category: MealCategory,
    pub date: &'a str,
    pub profile: &'a UserProfile,
    pub targets: &'a MacroTotals,
    pub used: &'a MacroTotals,
    pub remaining: &'a MacroTotals,
    pub calories_cap: Option<f64>,
    pub todays_descriptions: &'a [String],
    pub recent_names: &'a [String],
    pub ingredient_hints: &'a [String],
    /// Added from the second attempt on: forbid the avoid-lists outright
    /// instead of merely asking for rotation.
    pub strict_avoidance: bool,
}

#[must_use]
pub fn build_system() -> String {
    [
        "You are Forkcast's AI meal recommender.",
        "Return JSON only. No markdown. No extra text.",
        "Do NOT make medical claims. Use informational wording only.",
        "Respect allergies/intolerances and avoid excluded foods.",
        "Respect remaining calories/macros: stay within remaining if possible; if very tight, recommend a smaller/snack-style meal.",
        "Avoid repeating meals; rotate away from recent names/ingredients when possible.",
        "",
        "Output schema:",
        "{",
        "  \"mealName\": string,",
        "  \"tags\": string[],",
        "  \"why\": string,",
        "  \"items\": Array<{",
        "    \"name\": string,",
        "    \"serving_size\": string,",
        "    \"servings\": number,",
        "    \"calories\": number,",
        "    \"protein_g\": number,",
        "    \"carbs_g\": number,",
        "    \"fat_g\": number,",
        "    \"fiber_g\": number,",
        "    \"sugar_g\": number",
        "  }>,",
        "  \"recipe\": {",
        "    \"servings\": number,",
        "    \"prep_minutes\": number,",
        "    \"cook_minutes\": number,",
        "    \"steps\": string[]",
        "  }",
        "}",
    ]
    .join("\n")
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn head<T: Clone>(list: &[T], limit: usize) -> Vec<T> {
    list.iter().take(limit).cloned().collect()
}

#[must_use]
#[allow(clippy::too_many_lines)]
pub fn build_user(input: &PromptInput<'_>, limits: ContextLimits) -> String {
    let profile = input.profile;
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("Meal type: {}", input.category));
    lines.push(format!("Date: {}", input.date));
    lines.push(String::new());

    lines.push("User profile (may be partial):".to_string());
    lines.push(format!("- gender: {}", profile.gender.as_deref().unwrap_or("")));
    lines.push(format!(
        "- weightKg: {}",
        profile.weight_kg.map(|w| w.to_string()).unwrap_or_default()
    ));
    lines.push(format!(
        "- heightCm: {}",
        profile.height_cm.map(|h| h.to_string()).unwrap_or_default()
    ));
    lines.push(format!("- birthdate: {}", profile.birthdate.as_deref().unwrap_or("")));
    lines.push(format!(
        "- exerciseFrequency: {}",
        profile.exercise_frequency.as_deref().unwrap_or("")
    ));
    lines.push(format!("- goal: {}", profile.goal.as_deref().unwrap_or("")));
    lines.push(format!(
        "- goalIntensity: {}",
        profile.goal_intensity.as_deref().unwrap_or("")
    ));
    lines.push(format!("- concerns: {}", profile.concerns.join(", ")));
    lines.push(String::new());

    if !profile.health_notes.trim().is_empty() {
        lines.push("Health notes (free-text):".to_string());
        lines.push(excerpt(profile.health_notes.trim(), limits.notes_chars));
        lines.push(String::new());
    }

    lines.push("Allergies/intolerances to avoid:".to_string());
    lines.push(json!(profile.allergies).to_string());
    if let Some(diabetes) = profile.diabetes_type.as_deref() {
        lines.push(format!("Diabetes: {diabetes}"));
    }
    lines.push(String::new());

    lines.push("Supplements logged:".to_string());
    lines.push(json!(head(&profile.supplements, limits.supplements)).to_string());
    lines.push("Medications logged:".to_string());
    lines.push(json!(head(&profile.medications, limits.medications)).to_string());
    lines.push(String::new());

    lines.push("Daily targets:".to_string());
    lines.push(json!(input.targets).to_string());
    lines.push("Used so far today:".to_string());
    lines.push(json!(input.used).to_string());
    lines.push("Remaining for today:".to_string());
    lines.push(json!(input.remaining).to_string());
    if let Some(cap) = input.calories_cap.filter(|c| c.is_finite()) {
        lines.push(format!(
            "Hard cap calories for this meal: <= {}",
            cap.max(0.0).floor()
        ));
    }
    lines.push(String::new());

    lines.push("Foods already logged today (avoid repeating):".to_string());
    lines.push(json!(head(input.todays_descriptions, limits.logged_descriptions)).to_string());
    lines.push("Recent recommended meal names (avoid repeating):".to_string());
    lines.push(json!(head(input.recent_names, limits.recent_names)).to_string());
    lines.push("Recent recommended ingredient hints (avoid repeating):".to_string());
    lines.push(json!(head(input.ingredient_hints, limits.ingredient_hints)).to_string());
    if input.strict_avoidance {
        lines.push(String::new());
        lines.push(
            "STRICT: do NOT reuse any meal name listed above, and do NOT build the meal around any listed ingredient hint."
                .to_string(),
        );
    }
    lines.push(String::new());

    lines.push("Constraints:".to_string());
    lines.push("- Provide 2-6 ingredients.".to_string());
    lines.push("- Use common, realistic foods and portions; keep the ingredient list concise.".to_string());
    lines.push(
        "- Tags must be short (1-3 words), informational (e.g., \"Low sugar\", \"High protein\", \"Gut-friendly\")."
            .to_string(),
    );
    lines.push(
        "- The \"why\" must be 2-5 sentences in plain English referencing goals and remaining macros."
            .to_string(),
    );
    lines.push("- The recipe must have 1-12 short, numbered-free steps.".to_string());

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            gender: Some("female".to_string()),
            weight_kg: Some(65.0),
            allergies: vec!["peanuts".to_string()],
            supplements: (0..30).map(|i| format!("supplement {i}")).collect(),
            medications: (0..30).map(|i| format!("medication {i}")).collect(),
            health_notes: "n".repeat(600),
            ..UserProfile::default()
        }
    }

    fn input<'a>(
        profile: &'a UserProfile,
        totals: &'a MacroTotals,
        names: &'a [String],
        strict: bool,
    ) -> PromptInput<'a> {
        PromptInput {
            category: MealCategory::Lunch,
            date: "2024-06-15",
            profile,
            targets: totals,
            used: totals,
            remaining: totals,
            calories_cap: Some(512.7),
            todays_descriptions: &[],
            recent_names: names,
            ingredient_hints: &[],
            strict_avoidance: strict,
        }
    }

    #[test]
    fn test_reduced_limits_shrink_the_prompt() {
        let profile = profile();
        let totals = MacroTotals::default();
        let names: Vec<String> = (0..10).map(|i| format!("Meal {i}")).collect();
        let inp = input(&profile, &totals, &names, false);
        let full = build_user(&inp, ContextLimits::full());
        let reduced = build_user(&inp, ContextLimits::reduced());
        assert!(reduced.len() < full.len());
        assert!(full.contains("supplement 29"));
        assert!(!reduced.contains("supplement 29"));
        assert!(reduced.contains("supplement 9"));
    }

    #[test]
    fn test_strict_avoidance_wording() {
        let profile = profile();
        let totals = MacroTotals::default();
        let names = vec!["Greek yogurt bowl".to_string()];
        let soft = build_user(&input(&profile, &totals, &names, false), ContextLimits::full());
        let strict = build_user(&input(&profile, &totals, &names, true), ContextLimits::full());
        assert!(!soft.contains("STRICT:"));
        assert!(strict.contains("STRICT: do NOT reuse any meal name"));
    }

    #[test]
    fn test_calorie_cap_is_floored() {
        let profile = profile();
        let totals = MacroTotals::default();
        let out = build_user(&input(&profile, &totals, &[], false), ContextLimits::full());
        assert!(out.contains("Hard cap calories for this meal: <= 512"));
    }

    #[test]
    fn test_system_prompt_pins_output_schema() {
        let system = build_system();
        assert!(system.contains("Return JSON only"));
        assert!(system.contains("\"mealName\""));
        assert!(system.contains("\"recipe\""));
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo wörld", 5), "héllo");
    }
}
