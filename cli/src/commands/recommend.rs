use anyhow::Result;

use forkcast_core::db::Database;
use forkcast_core::engine::{EngineConfig, MealGenerator, RecommendationEngine};

use super::format_macros;

/// Run one generation end-to-end from the terminal. The engine is
/// synchronous, so the call is moved off the async runtime's worker.
#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_recommend(
    db: &Database,
    generator: &dyn MealGenerator,
    config: &EngineConfig,
    user: &str,
    date: &str,
    category: &str,
    tz: i32,
    json: bool,
) -> Result<()> {
    let outcome = tokio::task::block_in_place(|| {
        let engine = RecommendationEngine::new(db, generator, db, db, config.clone());
        engine.generate(user, date, category, tz)
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let rec = &outcome.recommendation;
    println!("=== {} ({} on {}) ===\n", rec.meal_name, rec.category, rec.date);
    if !rec.tags.is_empty() {
        println!("  tags: {}", rec.tags.join(", "));
    }
    for item in &rec.items {
        let serving = item.serving_size.as_deref().unwrap_or("1 serving");
        let cal = item.calories.unwrap_or(0.0) * item.servings;
        println!("  - {} — {} x{:.2} — {:.0} kcal", item.name, serving, item.servings, cal);
    }
    println!("\n  TOTAL: {}", format_macros(&rec.totals));
    println!("  REMAINING BEFORE THIS MEAL: {}", format_macros(&outcome.context.remaining));
    if !rec.why.is_empty() {
        println!("\n  {}", rec.why);
    }
    if let Some(recipe) = &rec.recipe {
        let prep = recipe.prep_minutes.unwrap_or(0);
        let cook = recipe.cook_minutes.unwrap_or(0);
        println!("\n  RECIPE (prep {prep} min, cook {cook} min):");
        for (i, step) in recipe.steps.iter().enumerate() {
            println!("    {}. {step}", i + 1);
        }
    }
    println!("\n  Cost: {} credit cents", outcome.cost_credits);

    Ok(())
}

/// The read operation from the terminal: macro context plus committed
/// history, without spending anything.
#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_context(
    db: &Database,
    generator: &dyn MealGenerator,
    config: &EngineConfig,
    user: &str,
    date: &str,
    category: &str,
    tz: i32,
    json: bool,
) -> Result<()> {
    let view = tokio::task::block_in_place(|| {
        let engine = RecommendationEngine::new(db, generator, db, db, config.clone());
        engine.read_state(user, date, category, tz)
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("=== {date} ({}) ===\n", view.category);
    println!("  TARGETS:   {}", format_macros(&view.context.targets));
    println!("  USED:      {}", format_macros(&view.context.used));
    println!("  REMAINING: {}", format_macros(&view.context.remaining));
    println!("\n  Next recommendation costs {} credit cents", view.cost_credits);

    if view.history.is_empty() {
        println!("\n  No committed recommendations yet.");
        return Ok(());
    }

    println!("\n  HISTORY (most recent first):");
    for record in &view.history {
        println!(
            "    [{}] {} — {} — {}",
            record.date,
            record.category,
            record.meal_name,
            format_macros(&record.totals),
        );
    }

    Ok(())
}
