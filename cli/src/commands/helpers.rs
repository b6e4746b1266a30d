use anyhow::{Context, Result};
use chrono::{Datelike, Duration, Local, NaiveDate};
use serde::Serialize;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use mealprep_core::models::{
    Catalog, Recipe, Reminder, Rule, RuleTarget, Tag, ValidationWarning, WeeklyPlan,
    parse_week_start, week_start_for, weekday_name,
};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Resolve a week argument to its Monday: `this` (default), `next`, `last`,
/// or a Monday in `YYYY-MM-DD` form.
pub(crate) fn parse_week(week_str: Option<String>) -> Result<NaiveDate> {
    let this_week = week_start_for(Local::now().date_naive());
    match week_str.as_deref() {
        None | Some("this") => Ok(this_week),
        Some("next") => Ok(this_week + Duration::weeks(1)),
        Some("last") => Ok(this_week - Duration::weeks(1)),
        Some(s) => parse_week_start(s).with_context(|| {
            let hint = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| format!(" (that week starts {})", week_start_for(d)))
                .unwrap_or_default();
            format!("Invalid week '{s}'{hint}. Use this/next/last or a Monday as YYYY-MM-DD")
        }),
    }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Report a missing record and exit with status 2.
pub(crate) fn exit_not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

pub(crate) fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(i, _)| &id[..i])
}

fn tag_label(catalog: &Catalog<'_>, tag_id: &str) -> String {
    catalog
        .tag(tag_id)
        .map_or_else(|| format!("(deleted {})", short_id(tag_id)), |t| t.name.clone())
}

fn recipe_label(catalog: &Catalog<'_>, recipe_id: &str) -> String {
    catalog.recipe(recipe_id).map_or_else(
        || format!("(deleted {})", short_id(recipe_id)),
        |r| r.title.clone(),
    )
}

pub(crate) fn print_tag_table(tags: &[Tag]) {
    #[derive(Tabled)]
    struct TagRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Type")]
        tag_type: String,
    }

    let rows: Vec<TagRow> = tags
        .iter()
        .map(|t| TagRow {
            id: short_id(&t.id).to_string(),
            name: truncate(&t.name, 30),
            tag_type: t.tag_type.to_string(),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
}

pub(crate) fn print_recipe_table(recipes: &[Recipe], catalog: &Catalog<'_>) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Tags")]
        tags: String,
        #[tabled(rename = "Servings")]
        servings: u32,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: short_id(&r.id).to_string(),
            title: truncate(&r.title, 35),
            tags: r
                .tag_ids
                .iter()
                .map(|id| tag_label(catalog, id))
                .collect::<Vec<_>>()
                .join(", "),
            servings: r.default_servings,
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_rule_table(rules: &[Rule], catalog: &Catalog<'_>) {
    #[derive(Tabled)]
    struct RuleRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Target")]
        target: String,
        #[tabled(rename = "Rule")]
        summary: String,
        #[tabled(rename = "Enabled")]
        enabled: String,
    }

    let rows: Vec<RuleRow> = rules
        .iter()
        .map(|rule| {
            let (target, summary) = match rule {
                Rule::Constraint(c) => (
                    format!("tag {}", tag_label(catalog, &c.tag_id)),
                    format!("at most {} per week", c.max_count),
                ),
                Rule::Action(a) => {
                    let target = match &a.target {
                        RuleTarget::Tag { tag_id } => format!("tag {}", tag_label(catalog, tag_id)),
                        RuleTarget::Recipe { recipe_id } => {
                            format!("recipe {}", recipe_label(catalog, recipe_id))
                        }
                    };
                    let when = match a.offset_days {
                        0 => "same day".to_string(),
                        -1 => "1 day before".to_string(),
                        n => format!("{} days before", n.unsigned_abs()),
                    };
                    (
                        target,
                        format!(
                            "{when} at {}: {}",
                            a.time_local.format("%H:%M"),
                            truncate(&a.message_template, 30)
                        ),
                    )
                }
            };
            RuleRow {
                id: short_id(rule.id()).to_string(),
                kind: rule.kind().as_str().to_lowercase(),
                target,
                summary,
                enabled: if rule.is_enabled() { "yes" } else { "no" }.to_string(),
            }
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
}

pub(crate) fn print_plan(plan: &WeeklyPlan, catalog: &Catalog<'_>) {
    #[derive(Tabled)]
    struct DayRow {
        #[tabled(rename = "Day")]
        day: String,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Dinner")]
        dinner: String,
        #[tabled(rename = "Servings")]
        servings: String,
    }

    let rows: Vec<DayRow> = plan
        .dates()
        .map(|date| {
            let entry = plan.get(date);
            DayRow {
                day: weekday_name(date.weekday()).to_string(),
                date: date.to_string(),
                dinner: entry.map_or_else(
                    || "-".to_string(),
                    |e| truncate(&recipe_label(catalog, &e.recipe_id), 35),
                ),
                servings: entry.map_or_else(|| "-".to_string(), |e| e.servings.to_string()),
            }
        })
        .collect();

    println!("Week of {}", plan.week_start());
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_warnings(warnings: &[ValidationWarning]) {
    if warnings.is_empty() {
        println!("No warnings. The plan satisfies every enabled rule.");
        return;
    }
    for w in warnings {
        println!(
            "  [{}] {}: {}",
            short_id(&w.rule_id),
            w.kind.as_str(),
            w.message
        );
    }
}

pub(crate) fn print_reminders(reminders: &[Reminder]) {
    #[derive(Tabled)]
    struct ReminderRow {
        #[tabled(rename = "Fires at")]
        fire_at: String,
        #[tabled(rename = "Message")]
        message: String,
        #[tabled(rename = "For dinner")]
        meal: String,
    }

    if reminders.is_empty() {
        println!("No reminders this week.");
        return;
    }

    let rows: Vec<ReminderRow> = reminders
        .iter()
        .map(|r| ReminderRow {
            fire_at: r.fire_at.format("%a %Y-%m-%d %H:%M %Z").to_string(),
            message: truncate(&r.message, 45),
            meal: format!(
                "{} {}",
                weekday_name(r.meal_date.weekday()),
                truncate(&r.recipe_title, 25)
            ),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
}
