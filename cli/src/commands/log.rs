use anyhow::Result;
use chrono::NaiveDate;

use forkcast_core::db::Database;
use forkcast_core::models::MacroTotals;

/// Append a food-log entry; these feed the "used so far today" totals the
/// recommendation engine subtracts from the daily targets.
#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_log(
    db: &Database,
    user: &str,
    description: &str,
    date: &str,
    calories: Option<f64>,
    protein: Option<f64>,
    carbs: Option<f64>,
    fat: Option<f64>,
    fiber: Option<f64>,
    sugar: Option<f64>,
    json: bool,
) -> Result<()> {
    let description = description.trim();
    if description.is_empty() {
        anyhow::bail!("Description must not be empty");
    }

    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")?;
    let totals = MacroTotals {
        calories,
        protein_g: protein,
        carbs_g: carbs,
        fat_g: fat,
        fiber_g: fiber,
        sugar_g: sugar,
    };
    let entry = db.insert_food_log(user, parsed, description, &totals)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    let cal = entry.totals.calories.unwrap_or(0.0);
    println!("Logged [{}] {} — {:.0} kcal on {}", entry.id, entry.description, cal, entry.local_date);
    Ok(())
}
