use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

use forkcast_core::costguard::{ModelConfig, PricingConfig};
use forkcast_core::engine::EngineConfig;

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "forkcast").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("forkcast.db");

        Ok(Config { db_path, data_dir })
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Include in requests: Authorization: Bearer {key}");
        Ok((key, true))
    }
}

fn env_number(key: &str, fallback: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite())
        .unwrap_or(fallback)
}

fn env_string(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Business and model constants, read once at startup and passed down as
/// explicit configuration. Defaults match the shipped pricing.
#[must_use]
pub fn engine_config_from_env() -> EngineConfig {
    let pricing_defaults = PricingConfig::default();
    let model_defaults = ModelConfig::default();
    EngineConfig {
        pricing: PricingConfig {
            credit_cost_cents: env_number(
                "FORKCAST_CREDIT_COST_CENTS",
                f64::from(pricing_defaults.credit_cost_cents),
            )
            .max(0.0) as u32,
            subscription_revenue_per_cent: env_number(
                "FORKCAST_SUBSCRIPTION_REVENUE_PER_CENT",
                pricing_defaults.subscription_revenue_per_cent,
            ),
            topup_revenue_per_cent: env_number(
                "FORKCAST_TOPUP_REVENUE_PER_CENT",
                pricing_defaults.topup_revenue_per_cent,
            ),
            target_margin: env_number("FORKCAST_TARGET_MARGIN", pricing_defaults.target_margin),
        },
        model: ModelConfig {
            model: env_string("FORKCAST_LLM_MODEL", &model_defaults.model),
            max_output_tokens: env_number(
                "FORKCAST_LLM_MAX_OUTPUT_TOKENS",
                f64::from(model_defaults.max_output_tokens),
            )
            .max(1.0) as u32,
            input_cents_per_1k: env_number(
                "FORKCAST_LLM_INPUT_CENTS_PER_1K",
                model_defaults.input_cents_per_1k,
            ),
            output_cents_per_1k: env_number(
                "FORKCAST_LLM_OUTPUT_CENTS_PER_1K",
                model_defaults.output_cents_per_1k,
            ),
        },
        dedup: forkcast_core::dedup::DedupConfig::default(),
    }
}
