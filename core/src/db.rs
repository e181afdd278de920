use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::engine::{ContextProvider, CreditGate};
use crate::models::{FavoriteMeal, FoodLogEntry, MacroTotals, RecommendedItem, UserProfile, WalletStatus};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS recommendation_state (
                    user_id TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS wallets (
                    user_id TEXT PRIMARY KEY,
                    balance_cents INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS food_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    local_date TEXT NOT NULL,
                    description TEXT NOT NULL,
                    calories REAL,
                    protein_g REAL,
                    carbs_g REAL,
                    fat_g REAL,
                    fiber_g REAL,
                    sugar_g REAL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS favorite_meals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    meal_name TEXT NOT NULL,
                    items_payload TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS profiles (
                    user_id TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS targets (
                    user_id TEXT PRIMARY KEY,
                    calories REAL,
                    protein_g REAL,
                    carbs_g REAL,
                    fat_g REAL,
                    fiber_g REAL,
                    sugar_g REAL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_food_logs_user_date ON food_logs(user_id, local_date);
                CREATE INDEX IF NOT EXISTS idx_favorites_user ON favorite_meals(user_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Recommendation state blob ---

    pub fn get_state_payload(&self, user_id: &str) -> Result<Option<String>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM recommendation_state WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    pub fn put_state_payload(&self, user_id: &str, payload: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO recommendation_state (user_id, payload, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![user_id, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // --- Wallet (local credit ledger) ---

    pub fn get_wallet(&self, user_id: &str) -> Result<Option<WalletStatus>> {
        let balance: Option<i64> = self
            .conn
            .query_row(
                "SELECT balance_cents FROM wallets WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(balance.map(|total_available_cents| WalletStatus {
            total_available_cents,
        }))
    }

    /// Create-or-top-up a wallet. A wallet row is what makes a user known
    /// to the recommendation endpoints.
    pub fn grant_credits(&self, user_id: &str, cents: i64) -> Result<WalletStatus> {
        self.conn.execute(
            "INSERT INTO wallets (user_id, balance_cents, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                balance_cents = balance_cents + excluded.balance_cents,
                updated_at = excluded.updated_at",
            params![user_id, cents, Utc::now().to_rfc3339()],
        )?;
        self.get_wallet(user_id)?
            .context("wallet row missing after grant")
    }

    /// Conditional decrement: returns false when the balance is short,
    /// including when another request spent it first.
    pub fn charge_wallet(&self, user_id: &str, cents: i64) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE wallets
             SET balance_cents = balance_cents - ?2, updated_at = ?3
             WHERE user_id = ?1 AND balance_cents >= ?2",
            params![user_id, cents, Utc::now().to_rfc3339()],
        )?;
        Ok(affected == 1)
    }

    // --- Food logs (read-only input for the engine) ---

    pub fn insert_food_log(
        &self,
        user_id: &str,
        date: NaiveDate,
        description: &str,
        totals: &MacroTotals,
    ) -> Result<FoodLogEntry> {
        let created_at = Utc::now().to_rfc3339();
        let local_date = date.format("%Y-%m-%d").to_string();
        self.conn.execute(
            "INSERT INTO food_logs (user_id, local_date, description, calories, protein_g, carbs_g, fat_g, fiber_g, sugar_g, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user_id,
                local_date,
                description,
                totals.calories,
                totals.protein_g,
                totals.carbs_g,
                totals.fat_g,
                totals.fiber_g,
                totals.sugar_g,
                created_at,
            ],
        )?;
        Ok(FoodLogEntry {
            id: self.conn.last_insert_rowid(),
            local_date,
            description: description.to_string(),
            totals: totals.clone(),
            created_at,
        })
    }

    pub fn food_logs_for_date(&self, user_id: &str, date: &str) -> Result<Vec<FoodLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, local_date, description, calories, protein_g, carbs_g, fat_g, fiber_g, sugar_g, created_at
             FROM food_logs
             WHERE user_id = ?1 AND local_date = ?2
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id, date], |row| {
            Ok(FoodLogEntry {
                id: row.get(0)?,
                local_date: row.get(1)?,
                description: row.get(2)?,
                totals: MacroTotals {
                    calories: row.get(3)?,
                    protein_g: row.get(4)?,
                    carbs_g: row.get(5)?,
                    fat_g: row.get(6)?,
                    fiber_g: row.get(7)?,
                    sugar_g: row.get(8)?,
                },
                created_at: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // --- Favorites (read-only dedup input) ---

    pub fn add_favorite(
        &self,
        user_id: &str,
        meal_name: &str,
        items: &[RecommendedItem],
    ) -> Result<FavoriteMeal> {
        let items_payload = serde_json::to_string(items)?;
        self.conn.execute(
            "INSERT INTO favorite_meals (user_id, meal_name, items_payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, meal_name, items_payload, Utc::now().to_rfc3339()],
        )?;
        Ok(FavoriteMeal {
            id: self.conn.last_insert_rowid(),
            meal_name: meal_name.to_string(),
            items: items.to_vec(),
        })
    }

    pub fn list_favorites(&self, user_id: &str) -> Result<Vec<FavoriteMeal>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, meal_name, items_payload FROM favorite_meals
             WHERE user_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let id: i64 = row.get(0)?;
            let meal_name: String = row.get(1)?;
            let items_payload: String = row.get(2)?;
            Ok((id, meal_name, items_payload))
        })?;
        let mut favorites = Vec::new();
        for row in rows {
            let (id, meal_name, items_payload) = row?;
            let items = serde_json::from_str(&items_payload).unwrap_or_default();
            favorites.push(FavoriteMeal {
                id,
                meal_name,
                items,
            });
        }
        Ok(favorites)
    }

    // --- Profile / targets (read-only prompt context) ---

    pub fn set_profile(&self, user_id: &str, profile: &UserProfile) -> Result<()> {
        let payload = serde_json::to_string(profile)?;
        self.conn.execute(
            "INSERT INTO profiles (user_id, payload, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![user_id, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_profile(&self, user_id: &str) -> Result<UserProfile> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload
            .and_then(|p| serde_json::from_str(&p).ok())
            .unwrap_or_default())
    }

    pub fn set_targets(&self, user_id: &str, targets: &MacroTotals) -> Result<()> {
        self.conn.execute(
            "INSERT INTO targets (user_id, calories, protein_g, carbs_g, fat_g, fiber_g, sugar_g, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id) DO UPDATE SET
                calories = excluded.calories,
                protein_g = excluded.protein_g,
                carbs_g = excluded.carbs_g,
                fat_g = excluded.fat_g,
                fiber_g = excluded.fiber_g,
                sugar_g = excluded.sugar_g,
                updated_at = excluded.updated_at",
            params![
                user_id,
                targets.calories,
                targets.protein_g,
                targets.carbs_g,
                targets.fat_g,
                targets.fiber_g,
                targets.sugar_g,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_targets(&self, user_id: &str) -> Result<MacroTotals> {
        let targets = self
            .conn
            .query_row(
                "SELECT calories, protein_g, carbs_g, fat_g, fiber_g, sugar_g
                 FROM targets WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(MacroTotals {
                        calories: row.get(0)?,
                        protein_g: row.get(1)?,
                        carbs_g: row.get(2)?,
                        fat_g: row.get(3)?,
                        fiber_g: row.get(4)?,
                        sugar_g: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(targets.unwrap_or_default())
    }
}

impl ContextProvider for Database {
    fn daily_targets(&self, user_id: &str) -> Result<MacroTotals> {
        self.get_targets(user_id)
    }

    fn logs_for_day(
        &self,
        user_id: &str,
        date: &str,
        _tz_offset_min: i32,
    ) -> Result<Vec<FoodLogEntry>> {
        // Entries are stamped with their local date at write time, so the
        // caller's UTC offset is not needed for the match here.
        self.food_logs_for_date(user_id, date)
    }

    fn favorites(&self, user_id: &str) -> Result<Vec<FavoriteMeal>> {
        self.list_favorites(user_id)
    }

    fn profile(&self, user_id: &str) -> Result<UserProfile> {
        self.get_profile(user_id)
    }
}

impl CreditGate for Database {
    fn wallet_status(&self, user_id: &str) -> Result<Option<WalletStatus>> {
        self.get_wallet(user_id)
    }

    fn charge_cents(&self, user_id: &str, amount_cents: u32) -> Result<bool> {
        self.charge_wallet(user_id, i64::from(amount_cents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_state_payload_upsert() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_state_payload("u1").unwrap().is_none());

        db.put_state_payload("u1", "{\"version\":1}").unwrap();
        assert_eq!(db.get_state_payload("u1").unwrap().unwrap(), "{\"version\":1}");

        db.put_state_payload("u1", "{\"version\":2}").unwrap();
        assert_eq!(db.get_state_payload("u1").unwrap().unwrap(), "{\"version\":2}");
    }

    #[test]
    fn test_wallet_grant_and_charge() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_wallet("u1").unwrap().is_none());

        let wallet = db.grant_credits("u1", 100).unwrap();
        assert_eq!(wallet.total_available_cents, 100);

        assert!(db.charge_wallet("u1", 60).unwrap());
        assert_eq!(db.get_wallet("u1").unwrap().unwrap().total_available_cents, 40);

        // Short balance: no charge, balance untouched.
        assert!(!db.charge_wallet("u1", 60).unwrap());
        assert_eq!(db.get_wallet("u1").unwrap().unwrap().total_available_cents, 40);

        // Unknown user charges nothing.
        assert!(!db.charge_wallet("ghost", 1).unwrap());
    }

    #[test]
    fn test_wallet_grant_tops_up() {
        let db = Database::open_in_memory().unwrap();
        db.grant_credits("u1", 100).unwrap();
        let wallet = db.grant_credits("u1", 50).unwrap();
        assert_eq!(wallet.total_available_cents, 150);
    }

    #[test]
    fn test_food_logs_matched_by_local_date() {
        let db = Database::open_in_memory().unwrap();
        let totals = MacroTotals {
            calories: Some(300.0),
            protein_g: Some(20.0),
            ..MacroTotals::default()
        };
        db.insert_food_log("u1", date("2024-06-15"), "Chicken wrap", &totals)
            .unwrap();
        db.insert_food_log("u1", date("2024-06-16"), "Pasta", &totals)
            .unwrap();
        db.insert_food_log("u2", date("2024-06-15"), "Salad", &totals)
            .unwrap();

        let logs = db.food_logs_for_date("u1", "2024-06-15").unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].description, "Chicken wrap");
        assert_eq!(logs[0].totals.calories, Some(300.0));
    }

    #[test]
    fn test_favorites_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let items = vec![RecommendedItem {
            name: "Greek yogurt".to_string(),
            serving_size: Some("1 cup".to_string()),
            calories: Some(130.0),
            protein_g: Some(12.0),
            carbs_g: None,
            fat_g: None,
            fiber_g: None,
            sugar_g: None,
            servings: 1.0,
        }];
        db.add_favorite("u1", "Greek yogurt bowl", &items).unwrap();

        let favorites = db.list_favorites("u1").unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].meal_name, "Greek yogurt bowl");
        assert_eq!(favorites[0].items[0].name, "Greek yogurt");
        assert!(db.list_favorites("u2").unwrap().is_empty());
    }

    #[test]
    fn test_profile_roundtrip_and_default() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_profile("u1").unwrap().gender.is_none());

        let profile = UserProfile {
            gender: Some("male".to_string()),
            allergies: vec!["shellfish".to_string()],
            ..UserProfile::default()
        };
        db.set_profile("u1", &profile).unwrap();
        let loaded = db.get_profile("u1").unwrap();
        assert_eq!(loaded.gender.as_deref(), Some("male"));
        assert_eq!(loaded.allergies, vec!["shellfish".to_string()]);
    }

    #[test]
    fn test_targets_roundtrip_and_default() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_targets("u1").unwrap().calories.is_none());

        let targets = MacroTotals {
            calories: Some(2000.0),
            protein_g: Some(150.0),
            ..MacroTotals::default()
        };
        db.set_targets("u1", &targets).unwrap();
        assert_eq!(db.get_targets("u1").unwrap(), targets);
    }
}
