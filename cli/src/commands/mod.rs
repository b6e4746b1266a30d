mod helpers;
mod household;
mod plan;
mod recipe;
mod rule;
mod tag;

use anyhow::Result;

use mealprep_core::models::{Recipe, Rule, Tag};
use mealprep_core::service::PlannerService;

use helpers::exit_not_found;

pub(crate) use household::{cmd_household_show, cmd_household_timezone};
pub(crate) use plan::{
    cmd_plan_clear, cmd_plan_export, cmd_plan_reminders, cmd_plan_set, cmd_plan_show,
    cmd_plan_validate,
};
pub(crate) use recipe::{
    cmd_recipe_add, cmd_recipe_delete, cmd_recipe_list, cmd_recipe_show, cmd_recipe_update,
};
pub(crate) use rule::{
    cmd_rule_delete, cmd_rule_limit, cmd_rule_list, cmd_rule_remind, cmd_rule_set_enabled,
    cmd_rule_update,
};
pub(crate) use tag::{cmd_tag_add, cmd_tag_delete, cmd_tag_list, cmd_tag_rename};

/// Resolve a tag by name or id, exiting with status 2 when it does not exist.
pub(super) fn require_tag(svc: &PlannerService, key: &str, json: bool) -> Result<Tag> {
    match svc.find_tag(key)? {
        Some(tag) => Ok(tag),
        None => exit_not_found(&format!("Tag '{key}' not found"), json),
    }
}

/// Resolve a recipe by title or id, exiting with status 2 when it does not exist.
pub(super) fn require_recipe(svc: &PlannerService, key: &str, json: bool) -> Result<Recipe> {
    match svc.find_recipe(key)? {
        Some(recipe) => Ok(recipe),
        None => exit_not_found(&format!("Recipe '{key}' not found"), json),
    }
}

/// Resolve a rule by id or unique id prefix, exiting with status 2 when it does not exist.
pub(super) fn require_rule(svc: &PlannerService, key: &str, json: bool) -> Result<Rule> {
    match svc.find_rule(key)? {
        Some(rule) => Ok(rule),
        None => exit_not_found(&format!("Rule '{key}' not found"), json),
    }
}
