mod assistant;
mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::assistant::{AssistantSettings, OpenAiAssistant};
use crate::commands::{
    RecipeFieldArgs, SelectionChange, cmd_chat, cmd_ingredient_import, cmd_ingredient_list,
    cmd_ingredient_set, cmd_ingredient_used, cmd_recipe_add, cmd_recipe_delete, cmd_recipe_edit,
    cmd_recipe_import, cmd_recipe_list, cmd_recipe_show, cmd_recipe_tags, cmd_shop_change,
    cmd_shop_clear, cmd_shop_show, parse_flag_arg,
};
use crate::config::Config;
use recipebox_core::db::Database;
use recipebox_core::models::RecipeFilter;
use recipebox_core::service::RecipeBoxService;

#[derive(Parser)]
#[command(
    name = "recipebox",
    version,
    about = "A recipe box with an ingredient library and shopping lists"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Manage the ingredient library
    Ingredient {
        #[command(subcommand)]
        command: IngredientCommands,
    },
    /// Build a shopping list from selected recipes
    Shop {
        #[command(subcommand)]
        command: ShopCommands,
    },
    /// Ask the recipe assistant
    Chat {
        /// Message to send
        message: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
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
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a new recipe
    Add {
        /// Recipe title
        title: String,
        #[command(flatten)]
        fields: RecipeFieldArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a recipe; only the given fields change
    Edit {
        /// Recipe ID
        id: i64,
        /// New title
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: RecipeFieldArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe with its ingredients
    Show {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recipes
    List {
        /// Only recipes whose tags contain this text (repeatable, all must match)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Only recipes on this menu
        #[arg(long)]
        menu: Option<String>,
        /// Only recipes in this menu section
        #[arg(long)]
        section: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe
    Delete {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List every tag in use
    Tags {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import a recipe from a Cooklang (.cook) file
    Import {
        /// Path to the .cook file
        file: PathBuf,
        /// Title override (defaults to metadata title or filename)
        #[arg(long)]
        title: Option<String>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IngredientCommands {
    /// List the whole ingredient library
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List ingredients used by at least one recipe
    Used {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set an ingredient's category, notes or staple flag
    Set {
        /// Ingredient ID
        id: i64,
        /// Grocery category (e.g. Dairy)
        #[arg(long)]
        category: Option<String>,
        /// Notes
        #[arg(long)]
        notes: Option<String>,
        /// Kitchen staple: yes/no
        #[arg(long, value_parser = parse_flag_arg)]
        staple: Option<bool>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update library metadata from a CSV file (Name,Category,Staple,Notes)
    Import {
        /// Path to the CSV file
        file: PathBuf,
        /// Preview import without making changes
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ShopCommands {
    /// Add a recipe (or one more of it)
    Add {
        /// Recipe ID
        recipe_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cook a selected recipe one more time
    Increase {
        /// Recipe ID
        recipe_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cook a selected recipe one time fewer
    Decrease {
        /// Recipe ID
        recipe_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Take a recipe off the list
    Remove {
        /// Recipe ID
        recipe_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Empty the list
    Clear {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the consolidated shopping list
    Show {
        /// Output as CSV
        #[arg(long, conflicts_with = "json")]
        csv: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;
    let svc = RecipeBoxService::from_database(db);

    match cli.command {
        Commands::Recipe { command } => match command {
            RecipeCommands::Add {
                title,
                fields,
                json,
            } => cmd_recipe_add(&svc, title, fields, json),
            RecipeCommands::Edit {
                id,
                title,
                fields,
                json,
            } => cmd_recipe_edit(&svc, id, title, fields, json),
            RecipeCommands::Show { id, json } => cmd_recipe_show(&svc, id, json),
            RecipeCommands::List {
                tags,
                menu,
                section,
                json,
            } => cmd_recipe_list(
                &svc,
                &RecipeFilter {
                    tags,
                    menu,
                    section,
                },
                json,
            ),
            RecipeCommands::Delete { id, json } => cmd_recipe_delete(&svc, id, json),
            RecipeCommands::Tags { json } => cmd_recipe_tags(&svc, json),
            RecipeCommands::Import {
                file,
                title,
                tags,
                json,
            } => cmd_recipe_import(&svc, &file, title, tags, json),
        },
        Commands::Ingredient { command } => match command {
            IngredientCommands::List { json } => cmd_ingredient_list(&svc, json),
            IngredientCommands::Used { json } => cmd_ingredient_used(&svc, json),
            IngredientCommands::Set {
                id,
                category,
                notes,
                staple,
                json,
            } => cmd_ingredient_set(&svc, id, category, notes, staple, json),
            IngredientCommands::Import {
                file,
                dry_run,
                json,
            } => cmd_ingredient_import(&svc, &file, dry_run, json),
        },
        Commands::Shop { command } => {
            let path = &config.selection_path;
            match command {
                ShopCommands::Add { recipe_id, json } => {
                    cmd_shop_change(&svc, path, recipe_id, SelectionChange::Add, json)
                }
                ShopCommands::Increase { recipe_id, json } => {
                    cmd_shop_change(&svc, path, recipe_id, SelectionChange::Increase, json)
                }
                ShopCommands::Decrease { recipe_id, json } => {
                    cmd_shop_change(&svc, path, recipe_id, SelectionChange::Decrease, json)
                }
                ShopCommands::Remove { recipe_id, json } => {
                    cmd_shop_change(&svc, path, recipe_id, SelectionChange::Remove, json)
                }
                ShopCommands::Clear { json } => cmd_shop_clear(path, json),
                ShopCommands::Show { csv, json } => cmd_shop_show(&svc, path, csv, json),
            }
        }
        Commands::Chat { message, json } => {
            let assistant = OpenAiAssistant::new(AssistantSettings::from_env())?;
            cmd_chat(&svc, &assistant, &message, json)
        }
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                Some(config.load_or_create_api_key()?.0)
            };
            let assistant = OpenAiAssistant::new(AssistantSettings::from_env())?;
            server::start_server(svc, assistant, port, &bind, api_key).await
        }
    }
}
