mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_household_show, cmd_household_timezone, cmd_plan_clear, cmd_plan_export,
    cmd_plan_reminders, cmd_plan_set, cmd_plan_show, cmd_plan_validate, cmd_recipe_add,
    cmd_recipe_delete, cmd_recipe_list, cmd_recipe_show, cmd_recipe_update, cmd_rule_delete,
    cmd_rule_limit, cmd_rule_list, cmd_rule_remind, cmd_rule_set_enabled, cmd_rule_update,
    cmd_tag_add, cmd_tag_delete, cmd_tag_list, cmd_tag_rename,
};
use crate::config::Config;
use mealprep_core::models::{DEFAULT_HOUSEHOLD, DEFAULT_SERVINGS};
use mealprep_core::service::PlannerService;

#[derive(Parser)]
#[command(
    name = "mealprep",
    version,
    about = "Plan a week of dinners, check it against your rules, export it to a calendar"
)]
struct Cli {
    /// Household to operate on
    #[arg(long, global = true, default_value = DEFAULT_HOUSEHOLD)]
    household: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or configure the household
    Household {
        #[command(subcommand)]
        command: HouseholdCommands,
    },
    /// Manage tags (protein, portion, prep, other)
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Manage weekly limits and reminder rules
    Rule {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// Edit, check and export the weekly dinner plan
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
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
enum HouseholdCommands {
    /// Show household settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the household time zone (IANA name, e.g. "Europe/Berlin")
    Timezone {
        zone: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Add a tag
    Add {
        /// Tag name (unique, case-insensitive)
        name: String,
        /// Tag type: protein, portion, prep, other
        #[arg(short = 't', long = "type", default_value = "other")]
        tag_type: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List tags
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename a tag or change its type
    Rename {
        /// Tag name or ID
        tag: String,
        /// New name
        name: Option<String>,
        /// New type: protein, portion, prep, other
        #[arg(short = 't', long = "type")]
        tag_type: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a tag (recipes lose it; rules on it are reported as orphaned)
    Delete {
        /// Tag name or ID
        tag: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Add a recipe
    Add {
        /// Recipe title
        title: String,
        /// Tag name or ID (repeatable, at least one)
        #[arg(short, long = "tag", required = true)]
        tags: Vec<String>,
        /// Default servings
        #[arg(short, long, default_value_t = DEFAULT_SERVINGS)]
        servings: u32,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recipes
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe
    Show {
        /// Recipe title or ID
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update a recipe
    Update {
        /// Recipe title or ID
        recipe: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// Replace the tag set (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// New default servings
        #[arg(short, long)]
        servings: Option<u32>,
        /// New notes
        #[arg(long, conflicts_with = "clear_notes")]
        notes: Option<String>,
        /// Remove the notes
        #[arg(long)]
        clear_notes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe
    Delete {
        /// Recipe title or ID
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RuleCommands {
    /// Limit how many dinners per week may carry a tag
    Limit {
        /// Tag name or ID
        tag: String,
        /// Maximum dinners per week
        max: u32,
        /// Create the rule disabled
        #[arg(long)]
        disabled: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remind ahead of dinners with a tag or recipe
    Remind {
        /// Target tag name or ID
        #[arg(long, required_unless_present = "recipe", conflicts_with = "recipe")]
        tag: Option<String>,
        /// Target recipe title or ID
        #[arg(long)]
        recipe: Option<String>,
        /// Days relative to the dinner (0 = same day, -1 = day before)
        #[arg(long, default_value = "-1", allow_negative_numbers = true)]
        offset: i32,
        /// Local time of day (HH:MM)
        #[arg(long, default_value = "10:00")]
        time: String,
        /// Message template ({recipe_title}, {meal_date}, {day_of_week})
        #[arg(short, long, default_value = "Reminder for {recipe_title}")]
        message: String,
        /// Create the rule disabled
        #[arg(long)]
        disabled: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List rules
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enable a rule
    Enable {
        /// Rule ID or unique ID prefix
        rule: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Disable a rule
    Disable {
        /// Rule ID or unique ID prefix
        rule: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a rule's parameters
    Update {
        /// Rule ID or unique ID prefix
        rule: String,
        /// New weekly maximum (limit rules)
        #[arg(long)]
        max: Option<u32>,
        /// New day offset (reminder rules)
        #[arg(long, allow_negative_numbers = true)]
        offset: Option<i32>,
        /// New local time, HH:MM (reminder rules)
        #[arg(long)]
        time: Option<String>,
        /// New message template (reminder rules)
        #[arg(short, long)]
        message: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a rule
    Delete {
        /// Rule ID or unique ID prefix
        rule: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Show a week's dinners
    Show {
        /// Week: this, next, last, or a Monday (YYYY-MM-DD)
        week: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Plan a dinner
    Set {
        /// Recipe title or ID
        recipe: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Servings (default: the recipe's default)
        #[arg(short, long)]
        servings: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a planned dinner
    Clear {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a week against the enabled limit rules
    Validate {
        /// Week: this, next, last, or a Monday (YYYY-MM-DD)
        week: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the reminders a week's plan produces
    Reminders {
        /// Week: this, next, last, or a Monday (YYYY-MM-DD)
        week: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export a week as an iCalendar (.ics) file
    Export {
        /// Week: this, next, last, or a Monday (YYYY-MM-DD)
        week: Option<String>,
        /// Output file or directory (default: stdout)
        #[arg(short, long, value_name = "PATH")]
        output: Option<std::path::PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    });

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let svc = PlannerService::open(&config.db_path, &cli.household)?;

    match cli.command {
        Commands::Household { command } => match command {
            HouseholdCommands::Show { json } => cmd_household_show(&svc, json),
            HouseholdCommands::Timezone { zone, json } => {
                cmd_household_timezone(&svc, &zone, json)
            }
        },
        Commands::Tag { command } => match command {
            TagCommands::Add {
                name,
                tag_type,
                json,
            } => cmd_tag_add(&svc, &name, &tag_type, json),
            TagCommands::List { json } => cmd_tag_list(&svc, json),
            TagCommands::Rename {
                tag,
                name,
                tag_type,
                json,
            } => cmd_tag_rename(&svc, &tag, name, tag_type.as_deref(), json),
            TagCommands::Delete { tag, json } => cmd_tag_delete(&svc, &tag, json),
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::Add {
                title,
                tags,
                servings,
                notes,
                json,
            } => cmd_recipe_add(&svc, &title, &tags, servings, notes, json),
            RecipeCommands::List { json } => cmd_recipe_list(&svc, json),
            RecipeCommands::Show { recipe, json } => cmd_recipe_show(&svc, &recipe, json),
            RecipeCommands::Update {
                recipe,
                title,
                tags,
                servings,
                notes,
                clear_notes,
                json,
            } => {
                let tags = (!tags.is_empty()).then_some(tags.as_slice());
                cmd_recipe_update(
                    &svc,
                    &recipe,
                    title,
                    tags,
                    servings,
                    notes,
                    clear_notes,
                    json,
                )
            }
            RecipeCommands::Delete { recipe, json } => cmd_recipe_delete(&svc, &recipe, json),
        },
        Commands::Rule { command } => match command {
            RuleCommands::Limit {
                tag,
                max,
                disabled,
                json,
            } => cmd_rule_limit(&svc, &tag, max, disabled, json),
            RuleCommands::Remind {
                tag,
                recipe,
                offset,
                time,
                message,
                disabled,
                json,
            } => cmd_rule_remind(
                &svc,
                tag.as_deref(),
                recipe.as_deref(),
                offset,
                &time,
                &message,
                disabled,
                json,
            ),
            RuleCommands::List { json } => cmd_rule_list(&svc, json),
            RuleCommands::Enable { rule, json } => cmd_rule_set_enabled(&svc, &rule, true, json),
            RuleCommands::Disable { rule, json } => {
                cmd_rule_set_enabled(&svc, &rule, false, json)
            }
            RuleCommands::Update {
                rule,
                max,
                offset,
                time,
                message,
                json,
            } => cmd_rule_update(&svc, &rule, max, offset, time.as_deref(), message, json),
            RuleCommands::Delete { rule, json } => cmd_rule_delete(&svc, &rule, json),
        },
        Commands::Plan { command } => match command {
            PlanCommands::Show { week, json } => cmd_plan_show(&svc, week, json),
            PlanCommands::Set {
                recipe,
                date,
                servings,
                json,
            } => cmd_plan_set(&svc, date, &recipe, servings, json),
            PlanCommands::Clear { date, json } => cmd_plan_clear(&svc, date, json),
            PlanCommands::Validate { week, json } => cmd_plan_validate(&svc, week, json),
            PlanCommands::Reminders { week, json } => cmd_plan_reminders(&svc, week, json),
            PlanCommands::Export { week, output, json } => {
                cmd_plan_export(&svc, week, output.as_deref(), json)
            }
        },
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let (api_key, new_api_key) = if no_auth {
                (None, false)
            } else {
                let (key, new) = config.load_or_create_api_key()?;
                (Some(key), new)
            };
            server::start_server(svc, port, &bind, api_key, new_api_key).await
        }
    }
}
