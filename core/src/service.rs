use std::path::Path;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::models::{
    Household, NewActionRule, NewRecipe, NewTag, Recipe, Reminder, Rule, Tag, TagType,
    UpdateRecipe, UpdateRule, UpdateTag, ValidationWarning, WarningKind, WeekSnapshot,
    WeeklyPlan,
};
use crate::{evaluator, ics, reminders};

/// A rendered calendar file for one week.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarExport {
    pub filename: String,
    pub content: String,
}

/// Planner operations for one household, backed by the SQLite store.
///
/// Engine operations (`validate_week`, `reminders_for_week`, `export_week`)
/// read a single snapshot, so the plan, catalogue and rules they see are
/// mutually consistent.
pub struct PlannerService {
    db: Database,
    household_id: String,
}

impl PlannerService {
    pub fn open(db_path: &Path, household_id: &str) -> Result<Self> {
        let db = Database::open(db_path)?;
        Self::with_database(db, household_id)
    }

    pub fn new_in_memory(household_id: &str) -> Result<Self> {
        Self::with_database(Database::open_in_memory()?, household_id)
    }

    fn with_database(db: Database, household_id: &str) -> Result<Self> {
        let household = db.get_or_create_household(household_id)?;
        Ok(Self {
            db,
            household_id: household.id,
        })
    }

    #[must_use]
    pub fn household_id(&self) -> &str {
        &self.household_id
    }

    // --- Household ---

    pub fn household(&self) -> Result<Household> {
        self.db.get_or_create_household(&self.household_id)
    }

    pub fn update_household(
        &self,
        name: Option<&str>,
        timezone: Option<&str>,
    ) -> Result<Household> {
        let household = self.db.update_household(&self.household_id, name, timezone)?;
        info!(household = %household.id, timezone = %household.timezone, "updated household");
        Ok(household)
    }

    // --- Tags ---

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        self.db.list_tags(&self.household_id)
    }

    pub fn get_tag(&self, id: &str) -> Result<Option<Tag>> {
        self.db.get_tag(&self.household_id, id)
    }

    pub fn get_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        self.db.get_tag_by_name(&self.household_id, name)
    }

    pub fn find_tag(&self, key: &str) -> Result<Option<Tag>> {
        self.db.find_tag(&self.household_id, key)
    }

    pub fn create_tag(&self, name: &str, tag_type: TagType) -> Result<Tag> {
        let tag = self.db.create_tag(
            &self.household_id,
            &NewTag {
                name: name.to_string(),
                tag_type,
            },
        )?;
        info!(tag_id = %tag.id, name = %tag.name, "created tag");
        Ok(tag)
    }

    pub fn update_tag(&self, id: &str, update: &UpdateTag) -> Result<Option<Tag>> {
        let tag = self.db.update_tag(&self.household_id, id, update)?;
        if let Some(tag) = &tag {
            info!(tag_id = %tag.id, name = %tag.name, "updated tag");
        }
        Ok(tag)
    }

    pub fn delete_tag(&self, id: &str) -> Result<bool> {
        let deleted = self.db.delete_tag(&self.household_id, id)?;
        if deleted {
            info!(tag_id = %id, "deleted tag");
        }
        Ok(deleted)
    }

    // --- Recipes ---

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        self.db.list_recipes(&self.household_id)
    }

    pub fn get_recipe(&self, id: &str) -> Result<Option<Recipe>> {
        self.db.get_recipe(&self.household_id, id)
    }

    pub fn find_recipe(&self, key: &str) -> Result<Option<Recipe>> {
        self.db.find_recipe(&self.household_id, key)
    }

    pub fn create_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        let recipe = self.db.create_recipe(&self.household_id, recipe)?;
        info!(recipe_id = %recipe.id, title = %recipe.title, "created recipe");
        Ok(recipe)
    }

    pub fn update_recipe(&self, id: &str, update: &UpdateRecipe) -> Result<Option<Recipe>> {
        let recipe = self.db.update_recipe(&self.household_id, id, update)?;
        if let Some(recipe) = &recipe {
            info!(recipe_id = %recipe.id, title = %recipe.title, "updated recipe");
        }
        Ok(recipe)
    }

    pub fn delete_recipe(&self, id: &str) -> Result<bool> {
        let deleted = self.db.delete_recipe(&self.household_id, id)?;
        if deleted {
            info!(recipe_id = %id, "deleted recipe");
        }
        Ok(deleted)
    }

    // --- Rules ---

    pub fn list_rules(&self) -> Result<Vec<Rule>> {
        self.db.list_rules(&self.household_id)
    }

    pub fn get_rule(&self, id: &str) -> Result<Option<Rule>> {
        self.db.get_rule(&self.household_id, id)
    }

    /// Resolve a rule by full id or a unique id prefix.
    pub fn find_rule(&self, key: &str) -> Result<Option<Rule>> {
        if let Some(rule) = self.get_rule(key)? {
            return Ok(Some(rule));
        }
        let key = key.trim();
        if key.is_empty() {
            return Ok(None);
        }
        let mut matches: Vec<Rule> = self
            .list_rules()?
            .into_iter()
            .filter(|r| r.id().starts_with(key))
            .collect();
        if matches.len() > 1 {
            bail!("Rule id '{key}' is ambiguous ({} matches)", matches.len());
        }
        Ok(matches.pop())
    }

    pub fn create_limit_rule(&self, tag_id: &str, max_count: u32, enabled: bool) -> Result<Rule> {
        let rule = self
            .db
            .create_constraint_rule(&self.household_id, tag_id, max_count, enabled)?;
        info!(rule_id = %rule.id(), tag_id = %tag_id, max_count, "created constraint rule");
        Ok(rule)
    }

    pub fn create_reminder_rule(&self, rule: &NewActionRule) -> Result<Rule> {
        let rule = self.db.create_action_rule(&self.household_id, rule)?;
        info!(rule_id = %rule.id(), "created action rule");
        Ok(rule)
    }

    pub fn update_rule(&self, id: &str, update: &UpdateRule) -> Result<Option<Rule>> {
        let rule = self.db.update_rule(&self.household_id, id, update)?;
        if let Some(rule) = &rule {
            info!(rule_id = %rule.id(), enabled = rule.is_enabled(), "updated rule");
        }
        Ok(rule)
    }

    pub fn delete_rule(&self, id: &str) -> Result<bool> {
        let deleted = self.db.delete_rule(&self.household_id, id)?;
        if deleted {
            info!(rule_id = %id, "deleted rule");
        }
        Ok(deleted)
    }

    // --- Plans ---

    pub fn plan(&self, week_start: NaiveDate) -> Result<WeeklyPlan> {
        self.db.get_plan(&self.household_id, week_start)
    }

    pub fn set_plan_entry(
        &self,
        week_start: NaiveDate,
        date: NaiveDate,
        recipe_id: &str,
        servings: Option<u32>,
    ) -> Result<WeeklyPlan> {
        let plan = self
            .db
            .set_plan_entry(&self.household_id, week_start, date, recipe_id, servings)?;
        info!(week = %week_start, date = %date, recipe_id = %recipe_id, "set plan entry");
        Ok(plan)
    }

    pub fn clear_plan_entry(&self, week_start: NaiveDate, date: NaiveDate) -> Result<bool> {
        let removed = self
            .db
            .delete_plan_entry(&self.household_id, week_start, date)?;
        if let Some(entry) = &removed {
            info!(
                week = %week_start,
                date = %date,
                recipe_id = %entry.recipe_id,
                "cleared plan entry"
            );
        }
        Ok(removed.is_some())
    }

    // --- Engine ---

    pub fn snapshot(&self, week_start: NaiveDate) -> Result<WeekSnapshot> {
        self.db.load_week_snapshot(&self.household_id, week_start)
    }

    pub fn validate_week(&self, week_start: NaiveDate) -> Result<Vec<ValidationWarning>> {
        let warnings = validate_snapshot(&self.snapshot(week_start)?);
        for w in warnings.iter().filter(|w| w.kind != WarningKind::MaxMealsPerWeekByTag) {
            warn!(week = %week_start, rule_id = %w.rule_id, "{}", w.message);
        }
        debug!(week = %week_start, count = warnings.len(), "validated week");
        Ok(warnings)
    }

    pub fn reminders_for_week(&self, week_start: NaiveDate) -> Result<Vec<Reminder>> {
        let reminders = derive_snapshot_reminders(&self.snapshot(week_start)?)?;
        debug!(week = %week_start, count = reminders.len(), "derived reminders");
        Ok(reminders)
    }

    pub fn export_week(&self, week_start: NaiveDate) -> Result<CalendarExport> {
        let export = export_snapshot(&self.snapshot(week_start)?)?;
        debug!(week = %week_start, bytes = export.content.len(), "exported calendar");
        Ok(export)
    }
}

/// Constraint warnings, missing-recipe advisories and action-rule orphans,
/// merged and ordered by `rule_id`.
#[must_use]
pub fn validate_snapshot(snapshot: &WeekSnapshot) -> Vec<ValidationWarning> {
    let catalog = snapshot.catalog();
    let mut warnings = evaluator::evaluate(&snapshot.plan, &catalog, &snapshot.constraint_rules());
    warnings.extend(reminders::orphaned_action_rules(
        &catalog,
        &snapshot.action_rules(),
    ));
    warnings.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
    warnings
}

pub fn derive_snapshot_reminders(snapshot: &WeekSnapshot) -> Result<Vec<Reminder>> {
    let tz = snapshot.household.tz()?;
    Ok(reminders::derive(
        &snapshot.plan,
        &snapshot.catalog(),
        &snapshot.action_rules(),
        tz,
    ))
}

pub fn export_snapshot(snapshot: &WeekSnapshot) -> Result<CalendarExport> {
    let tz = snapshot.household.tz()?;
    let catalog = snapshot.catalog();
    let reminders = reminders::derive(&snapshot.plan, &catalog, &snapshot.action_rules(), tz);
    let week = snapshot.plan.week_start();
    Ok(CalendarExport {
        filename: format!("mealprep_{week}.ics"),
        content: ics::serialize(&snapshot.plan, &catalog, &reminders, tz),
    })
}
