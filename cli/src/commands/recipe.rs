use anyhow::Result;

use mealprep_core::models::{Catalog, NewRecipe, UpdateRecipe};
use mealprep_core::service::PlannerService;

use super::helpers::{exit_not_found, print_recipe_table};
use super::{require_recipe, require_tag};

/// Map tag names or ids to tag ids.
fn resolve_tag_ids(svc: &PlannerService, keys: &[String], json: bool) -> Result<Vec<String>> {
    keys.iter()
        .map(|key| require_tag(svc, key, json).map(|t| t.id))
        .collect()
}

pub(crate) fn cmd_recipe_add(
    svc: &PlannerService,
    title: &str,
    tags: &[String],
    servings: u32,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    let tag_ids = resolve_tag_ids(svc, tags, json)?;
    let recipe = svc.create_recipe(&NewRecipe {
        title: title.to_string(),
        tag_ids,
        default_servings: servings,
        notes,
    })?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        println!(
            "Created recipe: {} (id: {}, serves {})",
            recipe.title, recipe.id, recipe.default_servings
        );
    }
    Ok(())
}

pub(crate) fn cmd_recipe_list(svc: &PlannerService, json: bool) -> Result<()> {
    let recipes = svc.list_recipes()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }
    if recipes.is_empty() {
        println!("No recipes yet. Add one with: mealprep recipe add <title> --tag <tag>");
        return Ok(());
    }
    let tags = svc.list_tags()?;
    print_recipe_table(&recipes, &Catalog::new(&recipes, &tags));
    Ok(())
}

pub(crate) fn cmd_recipe_show(svc: &PlannerService, key: &str, json: bool) -> Result<()> {
    let recipe = require_recipe(svc, key, json)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
        return Ok(());
    }

    let tags = svc.list_tags()?;
    let tag_names: Vec<&str> = recipe
        .tag_ids
        .iter()
        .filter_map(|id| tags.iter().find(|t| t.id == *id))
        .map(|t| t.name.as_str())
        .collect();

    println!("{}", recipe.title);
    println!("  ID:       {}", recipe.id);
    println!("  Tags:     {}", tag_names.join(", "));
    println!("  Servings: {}", recipe.default_servings);
    if let Some(notes) = &recipe.notes {
        println!("  Notes:    {notes}");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_recipe_update(
    svc: &PlannerService,
    key: &str,
    title: Option<String>,
    tags: Option<&[String]>,
    servings: Option<u32>,
    notes: Option<String>,
    clear_notes: bool,
    json: bool,
) -> Result<()> {
    let recipe = require_recipe(svc, key, json)?;
    let tag_ids = tags
        .map(|keys| resolve_tag_ids(svc, keys, json))
        .transpose()?;
    let notes = if clear_notes { Some(None) } else { notes.map(Some) };

    let update = UpdateRecipe {
        title,
        tag_ids,
        default_servings: servings,
        notes,
    };
    let Some(updated) = svc.update_recipe(&recipe.id, &update)? else {
        exit_not_found(&format!("Recipe '{key}' not found"), json);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        println!("Updated recipe: {}", updated.title);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_delete(svc: &PlannerService, key: &str, json: bool) -> Result<()> {
    let recipe = require_recipe(svc, key, json)?;
    svc.delete_recipe(&recipe.id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": recipe.id }));
    } else {
        println!("Deleted recipe '{}'", recipe.title);
        println!("Planned meals using it will show as missing until reselected.");
    }
    Ok(())
}
