mod log;
mod recommend;
mod setup;

pub(crate) use log::cmd_log;
pub(crate) use recommend::{cmd_context, cmd_recommend};
pub(crate) use setup::{
    cmd_favorite_add, cmd_favorite_list, cmd_profile_set, cmd_profile_show, cmd_target_set,
    cmd_target_show, cmd_wallet_grant, cmd_wallet_show,
};

use anyhow::Result;
use chrono::{Duration, Local};

use forkcast_core::models::validate_date;

/// Resolve an optional date argument: `today`/`yesterday`/`tomorrow`
/// shorthands, a strict YYYY-MM-DD string, or today when absent.
pub(crate) fn parse_date(date: Option<String>) -> Result<String> {
    let today = Local::now().date_naive();
    let Some(raw) = date else {
        return Ok(today.format("%Y-%m-%d").to_string());
    };
    let resolved = match raw.trim().to_lowercase().as_str() {
        "today" => today,
        "yesterday" => today - Duration::days(1),
        "tomorrow" => today + Duration::days(1),
        _ => {
            validate_date(raw.trim())?;
            return Ok(raw.trim().to_string());
        }
    };
    Ok(resolved.format("%Y-%m-%d").to_string())
}

/// One-line macro summary used across command output.
pub(crate) fn format_macros(totals: &forkcast_core::models::MacroTotals) -> String {
    let field = |v: Option<f64>| v.map_or_else(|| "?".to_string(), |n| format!("{n:.0}"));
    format!(
        "{} kcal | P:{}g C:{}g F:{}g",
        field(totals.calories),
        field(totals.protein_g),
        field(totals.carbs_g),
        field(totals.fat_g),
    )
}
