use std::sync::LazyLock;

use anyhow::Result;
use chrono::{Local, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::costguard::{ModelConfig, PricingConfig, fit_prompt};
use crate::db::Database;
use crate::dedup::{DedupConfig, MealSketch, is_similar_meal};
use crate::models::{
    FavoriteMeal, FoodLogEntry, LastGenerated, MacroTotals, MealCategory, Recipe,
    RecommendedItem, RecommendedMealRecord, UserProfile, WalletStatus, normalize_items,
    normalize_recipe, normalize_tags, validate_date,
};
use crate::naming::enforce_name_consistency;
use crate::prompt::PromptInput;
use crate::recipe_fallback::ensure_recipe;
use crate::store;
use crate::totals::{compute_totals, scale_to_fit_calories, subtract_totals, sum_totals};

/// Caller-visible failure taxonomy. The HTTP layer maps variants to
/// status codes; nothing here should ever take the process down.
#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("Invalid date '{0}'. Must be YYYY-MM-DD")]
    InvalidDate(String),
    #[error("{0}")]
    InvalidRecord(String),
    #[error("User '{0}' not found")]
    UnknownUser(String),
    #[error("Insufficient credits")]
    InsufficientCredits,
    #[error("Meal generation call failed")]
    Generator(#[source] anyhow::Error),
    #[error("Could not generate a unique meal; try again")]
    Exhausted,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// One upstream text-generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub max_output_tokens: u32,
    pub temperature: f64,
}

/// External text-generation service: prompt in, raw text out. Implemented
/// over the wire by the CLI; scripted in tests.
pub trait MealGenerator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Read-only nutrition context owned by other subsystems.
pub trait ContextProvider {
    fn daily_targets(&self, user_id: &str) -> Result<MacroTotals>;
    fn logs_for_day(&self, user_id: &str, date: &str, tz_offset_min: i32)
    -> Result<Vec<FoodLogEntry>>;
    fn favorites(&self, user_id: &str) -> Result<Vec<FavoriteMeal>>;
    fn profile(&self, user_id: &str) -> Result<UserProfile>;
}

/// The credit ledger boundary: checked before generation, charged once
/// after a usable result exists.
pub trait CreditGate {
    /// `None` means the user is unknown to the ledger.
    fn wallet_status(&self, user_id: &str) -> Result<Option<WalletStatus>>;
    fn charge_cents(&self, user_id: &str, amount_cents: u32) -> Result<bool>;
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub pricing: PricingConfig,
    pub model: ModelConfig,
    pub dedup: DedupConfig,
}

/// Attempts are sequential: each one's avoidance wording depends only on
/// the attempt number, never on concurrent work.
const MAX_ATTEMPTS: u32 = 3;
const GENERATION_TEMPERATURE: f64 = 0.5;

/// Same-category history entries feeding the avoidance lists.
const RECENT_SAME_CATEGORY: usize = 10;
const HINT_ITEMS_PER_RECORD: usize = 6;
const MAX_INGREDIENT_HINTS: usize = 40;
const MAX_LOGGED_DESCRIPTIONS: usize = 12;

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationContext {
    pub targets: MacroTotals,
    pub used: MacroTotals,
    pub remaining: MacroTotals,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub cost_credits: u32,
    pub context: RecommendationContext,
    pub history: Vec<RecommendedMealRecord>,
    pub seen_explainer: bool,
    pub category: MealCategory,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOutcome {
    pub cost_credits: u32,
    pub context: RecommendationContext,
    pub history: Vec<RecommendedMealRecord>,
    pub seen_explainer: bool,
    pub category: MealCategory,
    pub recommendation: RecommendedMealRecord,
}

static FENCE_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^```(?:json)?").expect("fixed pattern"));
static FENCE_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```$").expect("fixed pattern"));
static BARE_KEYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([{,]\s*)([A-Za-z0-9_]+)\s*:").expect("fixed pattern"));
static TRAILING_COMMAS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("fixed pattern"));

/// Strict-then-relaxed decode of generator output. The relaxed pass is a
/// fixed transform pipeline (fence strip, bare-key quoting, quote
/// normalization, trailing-comma removal) applied once; anything still
/// invalid is treated as empty output for the attempt.
#[must_use]
pub fn parse_relaxed(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Some(value);
    }
    let trimmed = raw.trim();
    let no_open_fence = FENCE_OPEN.replace(trimmed, "");
    let fenced = FENCE_CLOSE.replace(&no_open_fence, "");
    let keys_quoted = BARE_KEYS.replace_all(fenced.trim(), "$1\"$2\":");
    let double_quoted = keys_quoted.replace('\'', "\"");
    let repaired = TRAILING_COMMAS.replace_all(&double_quoted, "$1");
    serde_json::from_str(&repaired).ok()
}

struct Candidate {
    meal_name: String,
    tags: Vec<String>,
    why: String,
    recipe: Recipe,
    items: Vec<RecommendedItem>,
    totals: MacroTotals,
}

pub struct RecommendationEngine<'a> {
    db: &'a Database,
    generator: &'a dyn MealGenerator,
    credits: &'a dyn CreditGate,
    context: &'a dyn ContextProvider,
    config: EngineConfig,
}

impl<'a> RecommendationEngine<'a> {
    pub fn new(
        db: &'a Database,
        generator: &'a dyn MealGenerator,
        credits: &'a dyn CreditGate,
        context: &'a dyn ContextProvider,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            generator,
            credits,
            context,
            config,
        }
    }

    fn require_known_user(&self, user_id: &str) -> Result<WalletStatus, RecommendError> {
        self.credits
            .wallet_status(user_id)?
            .ok_or_else(|| RecommendError::UnknownUser(user_id.to_string()))
    }

    fn nutrition_context(
        &self,
        user_id: &str,
        date: &str,
        tz_offset_min: i32,
    ) -> Result<(RecommendationContext, Vec<FoodLogEntry>), RecommendError> {
        let targets = self.context.daily_targets(user_id)?;
        let logs = self.context.logs_for_day(user_id, date, tz_offset_min)?;
        let used = sum_totals(&logs.iter().map(|l| l.totals.clone()).collect::<Vec<_>>());
        let remaining = subtract_totals(&targets, &used);
        Ok((
            RecommendationContext {
                targets,
                used,
                remaining,
            },
            logs,
        ))
    }

    /// The read operation: cost, macro context, committed history, and the
    /// one-time explainer flag.
    pub fn read_state(
        &self,
        user_id: &str,
        date: &str,
        category_raw: &str,
        tz_offset_min: i32,
    ) -> Result<StateView, RecommendError> {
        validate_date(date).map_err(|_| RecommendError::InvalidDate(date.to_string()))?;
        self.require_known_user(user_id)?;
        let category = MealCategory::normalize(category_raw);
        let state = store::load(self.db, user_id);
        let (context, _) = self.nutrition_context(user_id, date, tz_offset_min)?;
        Ok(StateView {
            cost_credits: self.config.pricing.credit_cost_cents,
            context,
            history: state.history,
            seen_explainer: state.seen_explain_at.is_some(),
            category,
        })
    }

    /// The generation loop: up to three attempts, each validated for
    /// consistency, calorie fit, and uniqueness; credits are charged only
    /// after an accepted candidate exists.
    #[allow(clippy::too_many_lines)]
    pub fn generate(
        &self,
        user_id: &str,
        date: &str,
        category_raw: &str,
        tz_offset_min: i32,
    ) -> Result<GenerateOutcome, RecommendError> {
        validate_date(date).map_err(|_| RecommendError::InvalidDate(date.to_string()))?;
        let wallet = self.require_known_user(user_id)?;
        let cost = self.config.pricing.credit_cost_cents;
        if wallet.total_available_cents < i64::from(cost) {
            return Err(RecommendError::InsufficientCredits);
        }

        let category = MealCategory::normalize(category_raw);
        let mut state = store::load(self.db, user_id);
        let (context, logs) = self.nutrition_context(user_id, date, tz_offset_min)?;
        let profile = self.context.profile(user_id)?;
        let favorites = self.context.favorites(user_id)?;

        let calories_cap = context
            .remaining
            .calories
            .filter(|c| c.is_finite())
            .map(|c| c.max(0.0));

        let recent_same_category: Vec<&RecommendedMealRecord> = state
            .history
            .iter()
            .filter(|h| h.category == category)
            .take(RECENT_SAME_CATEGORY)
            .collect();
        let recent_names: Vec<String> = recent_same_category
            .iter()
            .map(|h| h.meal_name.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        let ingredient_hints: Vec<String> = recent_same_category
            .iter()
            .flat_map(|h| h.items.iter().take(HINT_ITEMS_PER_RECORD))
            .map(|it| it.name.trim().to_string())
            .filter(|n| !n.is_empty())
            .take(MAX_INGREDIENT_HINTS)
            .collect();
        let todays_descriptions: Vec<String> = logs
            .iter()
            .filter_map(|l| l.description.lines().next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .take(MAX_LOGGED_DESCRIPTIONS)
            .collect();

        let mut pool: Vec<MealSketch> = Vec::new();
        if let Some(last) = &state.last_generated {
            pool.push(MealSketch::from(last));
        }
        pool.extend(state.history.iter().map(MealSketch::from));
        pool.extend(favorites.iter().map(MealSketch::from));

        let mut accepted: Option<Candidate> = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let input = PromptInput {
                category,
                date,
                profile: &profile,
                targets: &context.targets,
                used: &context.used,
                remaining: &context.remaining,
                calories_cap,
                todays_descriptions: &todays_descriptions,
                recent_names: &recent_names,
                ingredient_hints: &ingredient_hints,
                strict_avoidance: attempt >= 2,
            };
            let guarded = fit_prompt(&input, &self.config.pricing, &self.config.model);
            let raw = self
                .generator
                .generate(&GenerationRequest {
                    model: self.config.model.model.clone(),
                    system: guarded.system,
                    user: guarded.user,
                    max_output_tokens: guarded.max_output_tokens,
                    temperature: GENERATION_TEMPERATURE,
                })
                .map_err(RecommendError::Generator)?;

            let Some(parsed) = parse_relaxed(&raw) else {
                debug!(attempt, "unparseable generator output; retrying");
                continue;
            };
            let mut items = normalize_items(&parsed["items"]);
            if items.is_empty() {
                debug!(attempt, "generator returned no usable items; retrying");
                continue;
            }
            // Multiplicity is expressed via the serving-size label, not the
            // serving count.
            for item in &mut items {
                item.servings = 1.0;
            }

            let proposed_name = parsed["mealName"].as_str().unwrap_or("");
            let consistent = enforce_name_consistency(proposed_name, items, category);
            let items = scale_to_fit_calories(consistent.items, calories_cap);
            let recipe = ensure_recipe(normalize_recipe(&parsed["recipe"]), &items, category);
            let totals = compute_totals(&items);

            let sketch = MealSketch::new(&consistent.meal_name, &items);
            if pool
                .iter()
                .any(|seen| is_similar_meal(&sketch, seen, &self.config.dedup))
            {
                debug!(attempt, meal = %consistent.meal_name, "candidate too similar; retrying");
                continue;
            }

            accepted = Some(Candidate {
                meal_name: consistent.meal_name,
                tags: normalize_tags(&parsed["tags"]),
                why: parsed["why"].as_str().unwrap_or("").trim().to_string(),
                recipe,
                items,
                totals,
            });
            break;
        }

        let Some(candidate) = accepted else {
            return Err(RecommendError::Exhausted);
        };

        // Charge only now that a usable recommendation exists. A race that
        // drained the wallet in the meantime surfaces as insufficient
        // funds, and the draft is discarded unpersisted.
        if !self.credits.charge_cents(user_id, cost)? {
            return Err(RecommendError::InsufficientCredits);
        }

        let record = RecommendedMealRecord {
            id: format!("rec-{}", Uuid::new_v4()),
            created_at: Utc::now().to_rfc3339(),
            date: date.to_string(),
            category,
            meal_name: candidate.meal_name,
            tags: candidate.tags,
            why: candidate.why,
            recipe: Some(candidate.recipe),
            items: candidate.items,
            totals: candidate.totals,
        };

        // Best-effort: losing the draft pointer only weakens future dedup,
        // so a save failure must not fail an already-charged request.
        state.last_generated = Some(LastGenerated {
            meal_name: record.meal_name.clone(),
            items: record.items.clone(),
            created_at: record.created_at.clone(),
        });
        if let Err(err) = store::save(self.db, user_id, &state) {
            warn!(user_id, error = %err, "failed to persist last-generated draft");
        }

        Ok(GenerateOutcome {
            cost_credits: cost,
            context,
            history: state.history,
            seen_explainer: state.seen_explain_at.is_some(),
            category,
            recommendation: record,
        })
    }

    /// Commit a client-held draft into persisted history. Items are
    /// re-validated and the consistency/totals/recipe passes re-run: the
    /// client copy is not trusted.
    pub fn commit(
        &self,
        user_id: &str,
        raw: &Value,
    ) -> Result<Vec<RecommendedMealRecord>, RecommendError> {
        self.require_known_user(user_id)?;

        let items = normalize_items(&raw["items"]);
        if items.is_empty() {
            return Err(RecommendError::InvalidRecord(
                "Record must contain at least one named item".to_string(),
            ));
        }

        let date = match raw["date"].as_str() {
            Some(d) => {
                validate_date(d).map_err(|_| RecommendError::InvalidDate(d.to_string()))?;
                d.to_string()
            }
            None => Local::now().date_naive().format("%Y-%m-%d").to_string(),
        };
        let category = MealCategory::normalize(raw["category"].as_str().unwrap_or(""));

        let proposed_name = raw["mealName"].as_str().unwrap_or("");
        let consistent = enforce_name_consistency(proposed_name, items, category);
        let recipe = ensure_recipe(normalize_recipe(&raw["recipe"]), &consistent.items, category);
        let totals = compute_totals(&consistent.items);

        let id = raw["id"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| format!("rec-{}", Uuid::new_v4()), String::from);
        let created_at = raw["createdAt"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| Utc::now().to_rfc3339(), String::from);

        let record = RecommendedMealRecord {
            id: id.clone(),
            created_at,
            date,
            category,
            meal_name: consistent.meal_name,
            tags: normalize_tags(&raw["tags"]),
            why: raw["why"].as_str().unwrap_or("").trim().to_string(),
            recipe: Some(recipe),
            items: consistent.items,
            totals,
        };

        let mut state = store::load(self.db, user_id);
        state.history.retain(|r| r.id != id);
        state.history.insert(0, record);
        state.committed_ids.retain(|existing| *existing != id);
        state.committed_ids.insert(0, id);
        store::save(self.db, user_id, &state)?;

        Ok(store::load(self.db, user_id).history)
    }

    /// Idempotent one-time disclosure marker.
    pub fn mark_explainer_seen(&self, user_id: &str) -> Result<String, RecommendError> {
        self.require_known_user(user_id)?;
        let mut state = store::load(self.db, user_id);
        if let Some(existing) = state.seen_explain_at.clone() {
            return Ok(existing);
        }
        let now = Utc::now().to_rfc3339();
        state.seen_explain_at = Some(now.clone());
        if let Err(err) = store::save(self.db, user_id, &state) {
            warn!(user_id, error = %err, "failed to persist explainer-seen marker");
        }
        Ok(now)
    }
}
