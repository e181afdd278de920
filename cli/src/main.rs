mod commands;
mod config;
mod generator;
mod server;

use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_context, cmd_favorite_add, cmd_favorite_list, cmd_log, cmd_profile_set, cmd_profile_show,
    cmd_recommend, cmd_target_set, cmd_target_show, cmd_wallet_grant, cmd_wallet_show, parse_date,
};
use crate::config::Config;
use crate::generator::{GeneratorSettings, OpenAiChatClient};
use forkcast_core::db::Database;

#[derive(Parser)]
#[command(
    name = "forkcast",
    version,
    about = "A local-first meal tracker with an AI meal recommendation engine",
    long_about = "\n\n  ███████╗ ██████╗ ██████╗ ██╗  ██╗ ██████╗ █████╗ ███████╗████████╗
  ██╔════╝██╔═══██╗██╔══██╗██║ ██╔╝██╔════╝██╔══██╗██╔════╝╚══██╔══╝
  █████╗  ██║   ██║██████╔╝█████╔╝ ██║     ███████║███████╗   ██║
  ██╔══╝  ██║   ██║██╔══██╗██╔═██╗ ██║     ██╔══██║╚════██║   ██║
  ██║     ╚██████╔╝██║  ██║██║  ██╗╚██████╗██║  ██║███████║   ██║
  ╚═╝      ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝ ╚═════╝╚═╝  ╚═╝╚══════╝   ╚═╝
          know what you'll be eating.
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
    /// Generate one AI meal recommendation
    Recommend {
        /// User id
        #[arg(short, long)]
        user: String,
        /// Meal category: breakfast, lunch, dinner, snack
        #[arg(short, long, default_value = "dinner")]
        category: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Caller's UTC offset in minutes
        #[arg(long, default_value = "0")]
        tz: i32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show macro context and committed recommendation history
    Context {
        /// User id
        #[arg(short, long)]
        user: String,
        /// Meal category: breakfast, lunch, dinner, snack
        #[arg(short, long, default_value = "dinner")]
        category: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Caller's UTC offset in minutes
        #[arg(long, default_value = "0")]
        tz: i32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log an eaten food (feeds the "used so far today" totals)
    Log {
        /// User id
        #[arg(short, long)]
        user: String,
        /// Free-text description of the food
        description: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Calories
        #[arg(long)]
        calories: Option<f64>,
        /// Protein grams
        #[arg(long)]
        protein: Option<f64>,
        /// Carb grams
        #[arg(long)]
        carbs: Option<f64>,
        /// Fat grams
        #[arg(long)]
        fat: Option<f64>,
        /// Fiber grams
        #[arg(long)]
        fiber: Option<f64>,
        /// Sugar grams
        #[arg(long)]
        sugar: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage daily macro targets
    Target {
        #[command(subcommand)]
        command: TargetCommands,
    },
    /// Manage the prompt-context profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Manage favorite meals (duplicate-avoidance pool)
    Favorite {
        #[command(subcommand)]
        command: FavoriteCommands,
    },
    /// Manage the local credit wallet
    Wallet {
        #[command(subcommand)]
        command: WalletCommands,
    },
}

#[derive(Subcommand)]
enum TargetCommands {
    /// Set daily macro targets
    Set {
        /// User id
        #[arg(short, long)]
        user: String,
        /// Daily calorie target
        #[arg(long)]
        calories: Option<f64>,
        /// Protein grams
        #[arg(long)]
        protein: Option<f64>,
        /// Carb grams
        #[arg(long)]
        carbs: Option<f64>,
        /// Fat grams
        #[arg(long)]
        fat: Option<f64>,
        /// Fiber grams
        #[arg(long)]
        fiber: Option<f64>,
        /// Sugar-maximum grams
        #[arg(long)]
        sugar: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show targets
    Show {
        /// User id
        #[arg(short, long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Store the profile from a JSON file (use - for stdin)
    Set {
        /// User id
        #[arg(short, long)]
        user: String,
        /// Path to the profile JSON file
        file: std::path::PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the stored profile
    Show {
        /// User id
        #[arg(short, long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum FavoriteCommands {
    /// Save a favorite meal
    Add {
        /// User id
        #[arg(short, long)]
        user: String,
        /// Meal name
        name: String,
        /// Items as a JSON array (e.g. '[{"name":"Oats","servings":1}]')
        #[arg(long)]
        items: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List favorite meals
    List {
        /// User id
        #[arg(short, long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WalletCommands {
    /// Create or top up a wallet (a wallet row is what makes a user known)
    Grant {
        /// User id
        #[arg(short, long)]
        user: String,
        /// Amount in credit cents
        cents: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the wallet balance
    Show {
        /// User id
        #[arg(short, long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("forkcast=info,forkcast_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;
    let engine_config = config::engine_config_from_env();

    match cli.command {
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                let (key, _new) = config.load_or_create_api_key()?;
                Some(key)
            };
            let generator = Arc::new(OpenAiChatClient::new(GeneratorSettings::from_env()));
            server::start_server(db, generator, engine_config, port, &bind, api_key).await
        }
        Commands::Recommend {
            user,
            category,
            date,
            tz,
            json,
        } => {
            let date = parse_date(date)?;
            let generator = OpenAiChatClient::new(GeneratorSettings::from_env());
            cmd_recommend(&db, &generator, &engine_config, &user, &date, &category, tz, json)
        }
        Commands::Context {
            user,
            category,
            date,
            tz,
            json,
        } => {
            let date = parse_date(date)?;
            let generator = OpenAiChatClient::new(GeneratorSettings::from_env());
            cmd_context(&db, &generator, &engine_config, &user, &date, &category, tz, json)
        }
        Commands::Log {
            user,
            description,
            date,
            calories,
            protein,
            carbs,
            fat,
            fiber,
            sugar,
            json,
        } => {
            let date = parse_date(date)?;
            cmd_log(
                &db, &user, &description, &date, calories, protein, carbs, fat, fiber, sugar, json,
            )
        }
        Commands::Target { command } => match command {
            TargetCommands::Set {
                user,
                calories,
                protein,
                carbs,
                fat,
                fiber,
                sugar,
                json,
            } => cmd_target_set(&db, &user, calories, protein, carbs, fat, fiber, sugar, json),
            TargetCommands::Show { user, json } => cmd_target_show(&db, &user, json),
        },
        Commands::Profile { command } => match command {
            ProfileCommands::Set { user, file, json } => cmd_profile_set(&db, &user, &file, json),
            ProfileCommands::Show { user, json } => cmd_profile_show(&db, &user, json),
        },
        Commands::Favorite { command } => match command {
            FavoriteCommands::Add {
                user,
                name,
                items,
                json,
            } => cmd_favorite_add(&db, &user, &name, items.as_deref(), json),
            FavoriteCommands::List { user, json } => cmd_favorite_list(&db, &user, json),
        },
        Commands::Wallet { command } => match command {
            WalletCommands::Grant { user, cents, json } => cmd_wallet_grant(&db, &user, cents, json),
            WalletCommands::Show { user, json } => cmd_wallet_show(&db, &user, json),
        },
    }
}
