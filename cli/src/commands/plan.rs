use anyhow::{Context, Result};
use std::path::Path;

use mealprep_core::models::{Catalog, week_start_for};
use mealprep_core::service::PlannerService;

use super::helpers::{
    exit_not_found, parse_date, parse_week, print_plan, print_reminders, print_warnings,
};
use super::require_recipe;

pub(crate) fn cmd_plan_show(svc: &PlannerService, week: Option<String>, json: bool) -> Result<()> {
    let snapshot = svc.snapshot(parse_week(week)?)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.plan)?);
    } else {
        print_plan(&snapshot.plan, &Catalog::new(&snapshot.recipes, &snapshot.tags));
    }
    Ok(())
}

pub(crate) fn cmd_plan_set(
    svc: &PlannerService,
    date: Option<String>,
    recipe_key: &str,
    servings: Option<u32>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let week = week_start_for(date);
    let recipe = require_recipe(svc, recipe_key, json)?;
    let plan = svc.set_plan_entry(week, date, &recipe.id, servings)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        let servings = plan.get(date).map_or(recipe.default_servings, |e| e.servings);
        println!("Planned {} for {date} ({servings} servings)", recipe.title);
    }
    Ok(())
}

pub(crate) fn cmd_plan_clear(svc: &PlannerService, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    if !svc.clear_plan_entry(week_start_for(date), date)? {
        exit_not_found(&format!("Nothing planned for {date}"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "cleared": date }));
    } else {
        println!("Cleared {date}");
    }
    Ok(())
}

pub(crate) fn cmd_plan_validate(
    svc: &PlannerService,
    week: Option<String>,
    json: bool,
) -> Result<()> {
    let week = parse_week(week)?;
    let warnings = svc.validate_week(week)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "warnings": warnings }))?
        );
    } else {
        println!("Week of {week}");
        print_warnings(&warnings);
    }
    Ok(())
}

pub(crate) fn cmd_plan_reminders(
    svc: &PlannerService,
    week: Option<String>,
    json: bool,
) -> Result<()> {
    let week = parse_week(week)?;
    let reminders = svc.reminders_for_week(week)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reminders)?);
    } else {
        println!("Week of {week}");
        print_reminders(&reminders);
    }
    Ok(())
}

/// Write the week's calendar to `output`, or to stdout when no path is given.
pub(crate) fn cmd_plan_export(
    svc: &PlannerService,
    week: Option<String>,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let export = svc.export_week(parse_week(week)?)?;
    let Some(path) = output else {
        if json {
            println!("{}", serde_json::to_string_pretty(&export)?);
        } else {
            print!("{}", export.content);
        }
        return Ok(());
    };

    let path = if path.is_dir() {
        path.join(&export.filename)
    } else {
        path.to_path_buf()
    };
    std::fs::write(&path, &export.content)
        .with_context(|| format!("Failed to write calendar: {}", path.display()))?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "path": path.display().to_string(), "bytes": export.content.len() })
        );
    } else {
        println!("Wrote {}", path.display());
    }
    Ok(())
}
