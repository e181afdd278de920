use tracing::{debug, warn};

use crate::prompt::{ContextLimits, PromptInput, build_system, build_user};

/// Business constants behind the per-generation price. All of it is
/// injected configuration; nothing is read from the environment here.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// Minor units (cents of credit) charged per generation.
    pub credit_cost_cents: u32,
    /// Real revenue per charged cent for subscription-sourced credits.
    pub subscription_revenue_per_cent: f64,
    /// Real revenue per charged cent for top-up-sourced credits.
    pub topup_revenue_per_cent: f64,
    /// Fraction of revenue that must survive as margin.
    pub target_margin: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            credit_cost_cents: 25,
            subscription_revenue_per_cent: 0.8,
            topup_revenue_per_cent: 1.0,
            target_margin: 0.55,
        }
    }
}

impl PricingConfig {
    /// Maximum acceptable upstream spend per generation, in cents.
    /// Uses the lower revenue-per-credit of the two sale channels: meeting
    /// the subscription margin also satisfies the top-up margin.
    #[must_use]
    pub fn cost_ceiling_cents(&self) -> f64 {
        let revenue_per_cent = self
            .subscription_revenue_per_cent
            .min(self.topup_revenue_per_cent);
        (f64::from(self.credit_cost_cents) * revenue_per_cent * (1.0 - self.target_margin)).floor()
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model: String,
    pub max_output_tokens: u32,
    pub input_cents_per_1k: f64,
    pub output_cents_per_1k: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_output_tokens: 650,
            input_cents_per_1k: 0.5,
            output_cents_per_1k: 1.5,
        }
    }
}

/// Output-token budget after the second shrink step.
const REDUCED_OUTPUT_TOKENS: u32 = 400;

/// Rough ~4-characters-per-token heuristic; fine for a pre-call estimate.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    text.len().div_ceil(4) as u32
}

/// Conservative upstream cost for a prompt plus a full output budget.
#[must_use]
pub fn estimate_cost_cents(model: &ModelConfig, prompt_tokens: u32, output_tokens: u32) -> f64 {
    f64::from(prompt_tokens) / 1000.0 * model.input_cents_per_1k
        + f64::from(output_tokens) / 1000.0 * model.output_cents_per_1k
}

/// A prompt that passed (or was pushed through) the cost guard.
#[derive(Debug, Clone)]
pub struct GuardedPrompt {
    pub system: String,
    pub user: String,
    pub max_output_tokens: u32,
}

/// Fit the prompt under the margin ceiling: shrink context first, then the
/// output budget, then proceed anyway with a diagnostic. Refusing to
/// generate would be worse than a thin margin on a rare outlier, so this
/// never fails.
#[must_use]
pub fn fit_prompt(
    input: &PromptInput<'_>,
    pricing: &PricingConfig,
    model: &ModelConfig,
) -> GuardedPrompt {
    let ceiling = pricing.cost_ceiling_cents();
    let system = build_system();

    let user = build_user(input, ContextLimits::full());
    let prompt_tokens = estimate_tokens(&system) + estimate_tokens(&user);
    let estimate = estimate_cost_cents(model, prompt_tokens, model.max_output_tokens);
    if estimate <= ceiling {
        return GuardedPrompt {
            system,
            user,
            max_output_tokens: model.max_output_tokens,
        };
    }

    debug!(estimate, ceiling, "prompt over cost ceiling, shrinking context");
    let user = build_user(input, ContextLimits::reduced());
    let prompt_tokens = estimate_tokens(&system) + estimate_tokens(&user);
    let estimate = estimate_cost_cents(model, prompt_tokens, model.max_output_tokens);
    if estimate <= ceiling {
        return GuardedPrompt {
            system,
            user,
            max_output_tokens: model.max_output_tokens,
        };
    }

    let output_tokens = model.max_output_tokens.min(REDUCED_OUTPUT_TOKENS);
    let estimate = estimate_cost_cents(model, prompt_tokens, output_tokens);
    if estimate > ceiling {
        warn!(
            model = %model.model,
            estimate,
            ceiling,
            "generation cost estimate exceeds margin ceiling even after shrinking; proceeding"
        );
    }
    GuardedPrompt {
        system,
        user,
        max_output_tokens: output_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MacroTotals, MealCategory, UserProfile};
    use crate::prompt::ContextLimits;

    #[test]
    fn test_ceiling_uses_lower_revenue_channel_and_floors() {
        let pricing = PricingConfig {
            credit_cost_cents: 25,
            subscription_revenue_per_cent: 0.8,
            topup_revenue_per_cent: 1.0,
            target_margin: 0.55,
        };
        // 25 * 0.8 * 0.45 = 9.0
        assert_eq!(pricing.cost_ceiling_cents(), 9.0);

        let flipped = PricingConfig {
            subscription_revenue_per_cent: 1.0,
            topup_revenue_per_cent: 0.6,
            ..pricing
        };
        // 25 * 0.6 * 0.45 = 6.75 -> 6
        assert_eq!(flipped.cost_ceiling_cents(), 6.0);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_estimate_cost_combines_input_and_output() {
        let model = ModelConfig::default();
        // 2000 input tokens * 0.5/1k + 650 output * 1.5/1k = 1.0 + 0.975
        let cost = estimate_cost_cents(&model, 2000, 650);
        assert!((cost - 1.975).abs() < 1e-9);
    }

    fn big_profile() -> UserProfile {
        UserProfile {
            supplements: (0..30).map(|i| format!("long supplement entry number {i}")).collect(),
            medications: (0..30).map(|i| format!("long medication entry number {i}")).collect(),
            health_notes: "x".repeat(600),
            ..UserProfile::default()
        }
    }

    fn input<'a>(profile: &'a UserProfile, totals: &'a MacroTotals) -> PromptInput<'a> {
        PromptInput {
            category: MealCategory::Dinner,
            date: "2024-06-15",
            profile,
            targets: totals,
            used: totals,
            remaining: totals,
            calories_cap: None,
            todays_descriptions: &[],
            recent_names: &[],
            ingredient_hints: &[],
            strict_avoidance: false,
        }
    }

    #[test]
    fn test_fit_keeps_full_context_under_generous_ceiling() {
        let profile = big_profile();
        let totals = MacroTotals::default();
        let inp = input(&profile, &totals);
        let pricing = PricingConfig {
            credit_cost_cents: 10_000,
            ..PricingConfig::default()
        };
        let model = ModelConfig::default();
        let guarded = fit_prompt(&inp, &pricing, &model);
        assert_eq!(guarded.user, build_user(&inp, ContextLimits::full()));
        assert_eq!(guarded.max_output_tokens, model.max_output_tokens);
    }

    #[test]
    fn test_fit_shrinks_context_then_output_budget() {
        let profile = big_profile();
        let totals = MacroTotals::default();
        let inp = input(&profile, &totals);
        // Ceiling of zero: nothing fits, both shrink steps fire, and the
        // guard still returns a usable prompt.
        let pricing = PricingConfig {
            credit_cost_cents: 0,
            ..PricingConfig::default()
        };
        let model = ModelConfig::default();
        let guarded = fit_prompt(&inp, &pricing, &model);
        assert_eq!(guarded.user, build_user(&inp, ContextLimits::reduced()));
        assert_eq!(guarded.max_output_tokens, REDUCED_OUTPUT_TOKENS);
    }

    #[test]
    fn test_fit_never_raises_a_small_output_budget() {
        let profile = big_profile();
        let totals = MacroTotals::default();
        let inp = input(&profile, &totals);
        let pricing = PricingConfig {
            credit_cost_cents: 0,
            ..PricingConfig::default()
        };
        let model = ModelConfig {
            max_output_tokens: 200,
            ..ModelConfig::default()
        };
        let guarded = fit_prompt(&inp, &pricing, &model);
        assert_eq!(guarded.max_output_tokens, 200);
    }
}
