use anyhow::{Result, bail};

use mealprep_core::models::{
    Catalog, NewActionRule, RuleTarget, UpdateRule, parse_time_local,
};
use mealprep_core::service::PlannerService;

use super::helpers::{exit_not_found, print_rule_table, short_id};
use super::{require_recipe, require_rule, require_tag};

pub(crate) fn cmd_rule_limit(
    svc: &PlannerService,
    tag_key: &str,
    max: u32,
    disabled: bool,
    json: bool,
) -> Result<()> {
    let tag = require_tag(svc, tag_key, json)?;
    let rule = svc.create_limit_rule(&tag.id, max, !disabled)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rule)?);
    } else {
        println!(
            "Created rule {}: at most {max} '{}' meal(s) per week",
            short_id(rule.id()),
            tag.name
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_rule_remind(
    svc: &PlannerService,
    tag_key: Option<&str>,
    recipe_key: Option<&str>,
    offset: i32,
    time: &str,
    message: &str,
    disabled: bool,
    json: bool,
) -> Result<()> {
    let target = match (tag_key, recipe_key) {
        (Some(key), None) => RuleTarget::Tag {
            tag_id: require_tag(svc, key, json)?.id,
        },
        (None, Some(key)) => RuleTarget::Recipe {
            recipe_id: require_recipe(svc, key, json)?.id,
        },
        _ => bail!("Specify exactly one of --tag or --recipe"),
    };
    let rule = svc.create_reminder_rule(&NewActionRule {
        target,
        offset_days: offset,
        time_local: parse_time_local(time)?,
        message_template: message.to_string(),
        enabled: !disabled,
    })?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rule)?);
    } else {
        println!("Created reminder rule {}", short_id(rule.id()));
    }
    Ok(())
}

pub(crate) fn cmd_rule_list(svc: &PlannerService, json: bool) -> Result<()> {
    let rules = svc.list_rules()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }
    if rules.is_empty() {
        println!("No rules yet. Try: mealprep rule limit <tag> <max>");
        return Ok(());
    }
    let tags = svc.list_tags()?;
    let recipes = svc.list_recipes()?;
    print_rule_table(&rules, &Catalog::new(&recipes, &tags));
    Ok(())
}

pub(crate) fn cmd_rule_set_enabled(
    svc: &PlannerService,
    key: &str,
    enabled: bool,
    json: bool,
) -> Result<()> {
    cmd_rule_update_with(
        svc,
        key,
        &UpdateRule {
            enabled: Some(enabled),
            ..UpdateRule::default()
        },
        json,
    )
}

pub(crate) fn cmd_rule_update(
    svc: &PlannerService,
    key: &str,
    max: Option<u32>,
    offset: Option<i32>,
    time: Option<&str>,
    message: Option<String>,
    json: bool,
) -> Result<()> {
    let update = UpdateRule {
        enabled: None,
        max_count: max,
        offset_days: offset,
        time_local: time.map(parse_time_local).transpose()?,
        message_template: message,
    };
    cmd_rule_update_with(svc, key, &update, json)
}

fn cmd_rule_update_with(
    svc: &PlannerService,
    key: &str,
    update: &UpdateRule,
    json: bool,
) -> Result<()> {
    let rule = require_rule(svc, key, json)?;
    let Some(updated) = svc.update_rule(rule.id(), update)? else {
        exit_not_found(&format!("Rule '{key}' not found"), json);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        let state = if updated.is_enabled() { "enabled" } else { "disabled" };
        println!("Updated rule {} ({state})", short_id(updated.id()));
    }
    Ok(())
}

pub(crate) fn cmd_rule_delete(svc: &PlannerService, key: &str, json: bool) -> Result<()> {
    let rule = require_rule(svc, key, json)?;
    svc.delete_rule(rule.id())?;
    if json {
        println!("{}", serde_json::json!({ "deleted": rule.id() }));
    } else {
        println!("Deleted rule {}", short_id(rule.id()));
    }
    Ok(())
}
