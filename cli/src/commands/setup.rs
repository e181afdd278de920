use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use forkcast_core::db::Database;
use forkcast_core::models::{MacroTotals, UserProfile, normalize_items};

use super::format_macros;

// --- Targets ---

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_target_set(
    db: &Database,
    user: &str,
    calories: Option<f64>,
    protein: Option<f64>,
    carbs: Option<f64>,
    fat: Option<f64>,
    fiber: Option<f64>,
    sugar: Option<f64>,
    json: bool,
) -> Result<()> {
    for (label, value) in [
        ("calories", calories),
        ("protein", protein),
        ("carbs", carbs),
        ("fat", fat),
        ("fiber", fiber),
        ("sugar", sugar),
    ] {
        if value.is_some_and(|v| v < 0.0 || !v.is_finite()) {
            anyhow::bail!("{label} must be a non-negative number");
        }
    }

    let targets = MacroTotals {
        calories,
        protein_g: protein,
        carbs_g: carbs,
        fat_g: fat,
        fiber_g: fiber,
        sugar_g: sugar,
    };
    db.set_targets(user, &targets)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
    } else {
        println!("Targets for {user}: {}", format_macros(&targets));
    }
    Ok(())
}

pub(crate) fn cmd_target_show(db: &Database, user: &str, json: bool) -> Result<()> {
    let targets = db.get_targets(user)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
    } else if targets == MacroTotals::default() {
        println!("No targets set for {user}");
    } else {
        println!("Targets for {user}: {}", format_macros(&targets));
    }
    Ok(())
}

// --- Profile ---

/// Store the prompt-context profile from a JSON file (or stdin with `-`).
pub(crate) fn cmd_profile_set(
    db: &Database,
    user: &str,
    file: &PathBuf,
    json: bool,
) -> Result<()> {
    let raw = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read profile JSON from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read profile file: {}", file.display()))?
    };

    let profile: UserProfile =
        serde_json::from_str(&raw).context("Profile file is not valid profile JSON")?;
    db.set_profile(user, &profile)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        println!("Profile saved for {user}");
    }
    Ok(())
}

pub(crate) fn cmd_profile_show(db: &Database, user: &str, json: bool) -> Result<()> {
    let profile = db.get_profile(user)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }
    println!("Profile for {user}:");
    println!("  gender: {}", profile.gender.as_deref().unwrap_or("-"));
    println!("  goal: {}", profile.goal.as_deref().unwrap_or("-"));
    println!("  allergies: {}", profile.allergies.join(", "));
    println!("  supplements: {}", profile.supplements.len());
    println!("  medications: {}", profile.medications.len());
    Ok(())
}

// --- Favorites ---

/// Save a favorite meal; favorites join the duplicate-avoidance pool, so a
/// generated draft will never mirror one of them.
pub(crate) fn cmd_favorite_add(
    db: &Database,
    user: &str,
    name: &str,
    items_json: Option<&str>,
    json: bool,
) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Favorite name must not be empty");
    }

    let items = match items_json {
        Some(raw) => {
            let value: serde_json::Value =
                serde_json::from_str(raw).context("--items must be a JSON array of items")?;
            normalize_items(&value)
        }
        None => Vec::new(),
    };

    let favorite = db.add_favorite(user, name, &items)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&favorite)?);
    } else {
        println!("Saved favorite [{}] {}", favorite.id, favorite.meal_name);
    }
    Ok(())
}

pub(crate) fn cmd_favorite_list(db: &Database, user: &str, json: bool) -> Result<()> {
    let favorites = db.list_favorites(user)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&favorites)?);
        return Ok(());
    }
    if favorites.is_empty() {
        println!("No favorites saved for {user}");
        return Ok(());
    }

    #[derive(Tabled)]
    struct FavoriteRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Items")]
        items: String,
    }

    let rows: Vec<FavoriteRow> = favorites
        .iter()
        .map(|f| FavoriteRow {
            id: f.id,
            meal: f.meal_name.clone(),
            items: f
                .items
                .iter()
                .map(|it| it.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::right()));
    println!("{table}");
    Ok(())
}

// --- Wallet ---

pub(crate) fn cmd_wallet_grant(db: &Database, user: &str, cents: i64, json: bool) -> Result<()> {
    if cents <= 0 {
        anyhow::bail!("Grant amount must be greater than 0");
    }
    let wallet = db.grant_credits(user, cents)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "totalAvailableCents": wallet.total_available_cents })
        );
    } else {
        println!(
            "Wallet for {user}: {} cents available",
            wallet.total_available_cents
        );
    }
    Ok(())
}

pub(crate) fn cmd_wallet_show(db: &Database, user: &str, json: bool) -> Result<()> {
    match db.get_wallet(user)? {
        Some(wallet) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "totalAvailableCents": wallet.total_available_cents })
                );
            } else {
                println!(
                    "Wallet for {user}: {} cents available",
                    wallet.total_available_cents
                );
            }
        }
        None => {
            if json {
                println!("null");
            } else {
                println!("No wallet for {user} (use `forkcast wallet grant` to create one)");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_set_rejects_negative() {
        let db = Database::open_in_memory().unwrap();
        let result = cmd_target_set(&db, "u1", Some(-100.0), None, None, None, None, None, true);
        assert!(result.is_err());
    }

    #[test]
    fn test_target_set_and_show() {
        let db = Database::open_in_memory().unwrap();
        cmd_target_set(
            &db,
            "u1",
            Some(2000.0),
            Some(150.0),
            None,
            None,
            None,
            None,
            true,
        )
        .unwrap();
        assert_eq!(db.get_targets("u1").unwrap().calories, Some(2000.0));
    }

    #[test]
    fn test_favorite_add_parses_items() {
        let db = Database::open_in_memory().unwrap();
        cmd_favorite_add(
            &db,
            "u1",
            "Greek yogurt bowl",
            Some(r#"[{"name":"Greek yogurt","servings":1},{"name":"Blueberries","servings":1}]"#),
            true,
        )
        .unwrap();
        let favorites = db.list_favorites("u1").unwrap();
        assert_eq!(favorites[0].items.len(), 2);
    }

    #[test]
    fn test_favorite_add_rejects_bad_items_json() {
        let db = Database::open_in_memory().unwrap();
        let result = cmd_favorite_add(&db, "u1", "Bowl", Some("not json"), true);
        assert!(result.is_err());
    }

    #[test]
    fn test_wallet_grant_requires_positive_amount() {
        let db = Database::open_in_memory().unwrap();
        assert!(cmd_wallet_grant(&db, "u1", 0, true).is_err());
        assert!(cmd_wallet_grant(&db, "u1", 500, true).is_ok());
    }
}
