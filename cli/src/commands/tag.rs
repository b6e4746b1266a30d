use anyhow::Result;

use mealprep_core::models::{Rule, RuleTarget, TagType, UpdateTag};
use mealprep_core::service::PlannerService;

use super::helpers::{exit_not_found, print_tag_table};
use super::require_tag;

pub(crate) fn cmd_tag_add(
    svc: &PlannerService,
    name: &str,
    tag_type: &str,
    json: bool,
) -> Result<()> {
    let tag_type: TagType = tag_type.parse()?;
    let tag = svc.create_tag(name, tag_type)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tag)?);
    } else {
        println!("Created tag: {} ({}, id: {})", tag.name, tag.tag_type, tag.id);
    }
    Ok(())
}

pub(crate) fn cmd_tag_list(svc: &PlannerService, json: bool) -> Result<()> {
    let tags = svc.list_tags()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
    } else if tags.is_empty() {
        println!("No tags yet. Add one with: mealprep tag add <name> --type protein");
    } else {
        print_tag_table(&tags);
    }
    Ok(())
}

pub(crate) fn cmd_tag_rename(
    svc: &PlannerService,
    key: &str,
    new_name: Option<String>,
    tag_type: Option<&str>,
    json: bool,
) -> Result<()> {
    let tag = require_tag(svc, key, json)?;
    let update = UpdateTag {
        name: new_name,
        tag_type: tag_type.map(str::parse).transpose()?,
    };
    let Some(updated) = svc.update_tag(&tag.id, &update)? else {
        exit_not_found(&format!("Tag '{key}' not found"), json);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        println!("Updated tag: {} ({})", updated.name, updated.tag_type);
    }
    Ok(())
}

pub(crate) fn cmd_tag_delete(svc: &PlannerService, key: &str, json: bool) -> Result<()> {
    let tag = require_tag(svc, key, json)?;
    svc.delete_tag(&tag.id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": tag.id }));
    } else {
        println!("Deleted tag '{}'", tag.name);
        let orphaned = svc
            .list_rules()?
            .iter()
            .filter(|r| match r {
                Rule::Constraint(c) => c.tag_id == tag.id,
                Rule::Action(a) => {
                    matches!(&a.target, RuleTarget::Tag { tag_id } if *tag_id == tag.id)
                }
            })
            .count();
        if orphaned > 0 {
            println!(
                "{orphaned} rule(s) still reference it; edit or delete them (mealprep rule list)"
            );
        }
    }
    Ok(())
}
