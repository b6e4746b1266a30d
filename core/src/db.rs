use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{
    ActionRule, ConstraintRule, DEFAULT_TIMEZONE, Household, NewActionRule, NewRecipe, NewTag,
    PlanEntry, Recipe, Rule, RuleTarget, Tag, TagType, UpdateRecipe, UpdateRule, UpdateTag,
    WeekSnapshot, WeeklyPlan, parse_iso_date, parse_time_local, parse_timezone,
    validate_message_template, validate_name, validate_offset_days, validate_servings,
    validate_tag_ids, validate_week_start,
};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            // Rules and plan entries hold plain ids for tags and recipes so
            // that deleting either leaves the reference behind to be reported.
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS households (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    timezone TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tags (
                    id TEXT PRIMARY KEY,
                    household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    tag_type TEXT NOT NULL
                        CHECK (tag_type IN ('PROTEIN', 'PORTION', 'PREP', 'OTHER')),
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id TEXT PRIMARY KEY,
                    household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    default_servings INTEGER NOT NULL CHECK (default_servings >= 1),
                    notes TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_tags (
                    recipe_id TEXT NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (recipe_id, tag_id)
                );

                CREATE TABLE IF NOT EXISTS rules (
                    id TEXT PRIMARY KEY,
                    household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
                    rule_kind TEXT NOT NULL CHECK (rule_kind IN ('CONSTRAINT', 'ACTION')),
                    target_type TEXT CHECK (target_type IN ('TAG', 'RECIPE')),
                    tag_id TEXT,
                    recipe_id TEXT,
                    max_count INTEGER CHECK (max_count >= 0),
                    offset_days INTEGER CHECK (offset_days <= 0),
                    time_local TEXT,
                    message_template TEXT,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS plan_entries (
                    household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
                    week_start TEXT NOT NULL,
                    date TEXT NOT NULL,
                    recipe_id TEXT NOT NULL,
                    servings INTEGER NOT NULL CHECK (servings >= 1),
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (household_id, date)
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_household_name
                    ON tags(household_id, name COLLATE NOCASE);
                CREATE INDEX IF NOT EXISTS idx_recipes_household ON recipes(household_id);
                CREATE INDEX IF NOT EXISTS idx_recipe_tags_tag ON recipe_tags(tag_id);
                CREATE INDEX IF NOT EXISTS idx_rules_household ON rules(household_id);
                CREATE INDEX IF NOT EXISTS idx_plan_entries_week
                    ON plan_entries(household_id, week_start);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Households ---

    pub fn get_household(&self, id: &str) -> Result<Option<Household>> {
        let household = self
            .conn
            .query_row(
                "SELECT id, name, timezone, created_at FROM households WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Household {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        timezone: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(household)
    }

    pub fn get_or_create_household(&self, id: &str) -> Result<Household> {
        if let Some(existing) = self.get_household(id)? {
            return Ok(existing);
        }
        let id = validate_name("Household id", id)?;
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO households (id, name, timezone, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, id, DEFAULT_TIMEZONE, now],
        )?;
        self.get_household(&id)?
            .context("Household not found after insert")
    }

    pub fn update_household(
        &self,
        id: &str,
        name: Option<&str>,
        timezone: Option<&str>,
    ) -> Result<Household> {
        let mut household = self.get_or_create_household(id)?;
        if let Some(name) = name {
            household.name = validate_name("Household name", name)?;
        }
        if let Some(tz) = timezone {
            household.timezone = parse_timezone(tz)?.name().to_string();
        }
        self.conn.execute(
            "UPDATE households SET name = ?1, timezone = ?2 WHERE id = ?3",
            params![household.name, household.timezone, household.id],
        )?;
        Ok(household)
    }

    // --- Tags ---

    fn tag_from_row(row: &rusqlite::Row) -> rusqlite::Result<Tag> {
        let tag_type: String = row.get(2)?;
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            tag_type: tag_type
                .parse::<TagType>()
                .map_err(|e| invalid_column(2, &e.to_string()))?,
            created_at: row.get(3)?,
        })
    }

    pub fn list_tags(&self, household_id: &str) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, tag_type, created_at FROM tags
             WHERE household_id = ?1 ORDER BY name COLLATE NOCASE",
        )?;
        let tags = stmt
            .query_map(params![household_id], Self::tag_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    pub fn get_tag(&self, household_id: &str, id: &str) -> Result<Option<Tag>> {
        let tag = self
            .conn
            .query_row(
                "SELECT id, name, tag_type, created_at FROM tags
                 WHERE household_id = ?1 AND id = ?2",
                params![household_id, id],
                Self::tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    pub fn get_tag_by_name(&self, household_id: &str, name: &str) -> Result<Option<Tag>> {
        let tag = self
            .conn
            .query_row(
                "SELECT id, name, tag_type, created_at FROM tags
                 WHERE household_id = ?1 AND name = ?2 COLLATE NOCASE",
                params![household_id, name.trim()],
                Self::tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    /// Look up a tag by id, falling back to a case-insensitive name match.
    pub fn find_tag(&self, household_id: &str, key: &str) -> Result<Option<Tag>> {
        if let Some(tag) = self.get_tag(household_id, key)? {
            return Ok(Some(tag));
        }
        self.get_tag_by_name(household_id, key)
    }

    pub fn create_tag(&self, household_id: &str, tag: &NewTag) -> Result<Tag> {
        self.get_or_create_household(household_id)?;
        let name = validate_name("Tag name", &tag.name)?;
        if self.get_tag_by_name(household_id, &name)?.is_some() {
            bail!("Tag '{name}' already exists");
        }
        let id = Uuid::new_v4().to_string();
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO tags (id, household_id, name, tag_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, household_id, name, tag.tag_type.as_str(), now],
        )?;
        self.get_tag(household_id, &id)?
            .context("Tag not found after insert")
    }

    pub fn update_tag(
        &self,
        household_id: &str,
        id: &str,
        update: &UpdateTag,
    ) -> Result<Option<Tag>> {
        let Some(mut tag) = self.get_tag(household_id, id)? else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            let name = validate_name("Tag name", name)?;
            if let Some(other) = self.get_tag_by_name(household_id, &name)? {
                if other.id != tag.id {
                    bail!("Tag '{name}' already exists");
                }
            }
            tag.name = name;
        }
        if let Some(tag_type) = update.tag_type {
            tag.tag_type = tag_type;
        }
        self.conn.execute(
            "UPDATE tags SET name = ?1, tag_type = ?2 WHERE household_id = ?3 AND id = ?4",
            params![tag.name, tag.tag_type.as_str(), household_id, id],
        )?;
        Ok(Some(tag))
    }

    /// Delete a tag. Recipes lose the tag; rules keep pointing at it.
    pub fn delete_tag(&self, household_id: &str, id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM tags WHERE household_id = ?1 AND id = ?2",
            params![household_id, id],
        )?;
        Ok(rows > 0)
    }

    fn ensure_tags_exist(&self, household_id: &str, tag_ids: &[String]) -> Result<()> {
        for tag_id in tag_ids {
            if self.get_tag(household_id, tag_id)?.is_none() {
                bail!("Tag '{tag_id}' not found");
            }
        }
        Ok(())
    }

    // --- Recipes ---

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            title: row.get(1)?,
            tag_ids: Vec::new(),
            default_servings: row.get(2)?,
            notes: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn recipe_tag_ids(&self, recipe_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT rt.tag_id FROM recipe_tags rt
             JOIN tags t ON t.id = rt.tag_id
             WHERE rt.recipe_id = ?1
             ORDER BY t.name COLLATE NOCASE",
        )?;
        let ids = stmt
            .query_map(params![recipe_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn with_tags(&self, mut recipe: Recipe) -> Result<Recipe> {
        recipe.tag_ids = self.recipe_tag_ids(&recipe.id)?;
        Ok(recipe)
    }

    pub fn list_recipes(&self, household_id: &str) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, default_servings, notes, created_at, updated_at FROM recipes
             WHERE household_id = ?1 ORDER BY title COLLATE NOCASE, created_at",
        )?;
        let recipes = stmt
            .query_map(params![household_id], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        recipes.into_iter().map(|r| self.with_tags(r)).collect()
    }

    pub fn get_recipe(&self, household_id: &str, id: &str) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                "SELECT id, title, default_servings, notes, created_at, updated_at FROM recipes
                 WHERE household_id = ?1 AND id = ?2",
                params![household_id, id],
                Self::recipe_from_row,
            )
            .optional()?;
        recipe.map(|r| self.with_tags(r)).transpose()
    }

    /// Look up a recipe by id, falling back to a case-insensitive title match.
    pub fn find_recipe(&self, household_id: &str, key: &str) -> Result<Option<Recipe>> {
        if let Some(recipe) = self.get_recipe(household_id, key)? {
            return Ok(Some(recipe));
        }
        let recipe = self
            .conn
            .query_row(
                "SELECT id, title, default_servings, notes, created_at, updated_at FROM recipes
                 WHERE household_id = ?1 AND title = ?2 COLLATE NOCASE
                 ORDER BY created_at LIMIT 1",
                params![household_id, key.trim()],
                Self::recipe_from_row,
            )
            .optional()?;
        recipe.map(|r| self.with_tags(r)).transpose()
    }

    fn replace_recipe_tags(&self, recipe_id: &str, tag_ids: &[String]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM recipe_tags WHERE recipe_id = ?1",
            params![recipe_id],
        )?;
        for tag_id in tag_ids {
            self.conn.execute(
                "INSERT OR IGNORE INTO recipe_tags (recipe_id, tag_id) VALUES (?1, ?2)",
                params![recipe_id, tag_id],
            )?;
        }
        Ok(())
    }

    pub fn create_recipe(&self, household_id: &str, recipe: &NewRecipe) -> Result<Recipe> {
        self.get_or_create_household(household_id)?;
        let title = validate_name("Recipe title", &recipe.title)?;
        validate_servings(recipe.default_servings)?;
        validate_tag_ids(&recipe.tag_ids)?;
        self.ensure_tags_exist(household_id, &recipe.tag_ids)?;

        let id = Uuid::new_v4().to_string();
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        self.conn.execute(
            "INSERT INTO recipes (id, household_id, title, default_servings, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                household_id,
                title,
                recipe.default_servings,
                recipe.notes,
                now,
                now,
            ],
        )?;
        self.replace_recipe_tags(&id, &recipe.tag_ids)?;
        tx.commit()?;

        self.get_recipe(household_id, &id)?
            .context("Recipe not found after insert")
    }

    pub fn update_recipe(
        &self,
        household_id: &str,
        id: &str,
        update: &UpdateRecipe,
    ) -> Result<Option<Recipe>> {
        let Some(mut recipe) = self.get_recipe(household_id, id)? else {
            return Ok(None);
        };
        if let Some(title) = &update.title {
            recipe.title = validate_name("Recipe title", title)?;
        }
        if let Some(servings) = update.default_servings {
            validate_servings(servings)?;
            recipe.default_servings = servings;
        }
        if let Some(notes) = &update.notes {
            recipe.notes.clone_from(notes);
        }
        if let Some(tag_ids) = &update.tag_ids {
            validate_tag_ids(tag_ids)?;
            self.ensure_tags_exist(household_id, tag_ids)?;
        }

        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        self.conn.execute(
            "UPDATE recipes SET title = ?1, default_servings = ?2, notes = ?3, updated_at = ?4
             WHERE household_id = ?5 AND id = ?6",
            params![
                recipe.title,
                recipe.default_servings,
                recipe.notes,
                now,
                household_id,
                id,
            ],
        )?;
        if let Some(tag_ids) = &update.tag_ids {
            self.replace_recipe_tags(id, tag_ids)?;
        }
        tx.commit()?;

        self.get_recipe(household_id, id)
    }

    /// Delete a recipe. Plan entries and rules referencing it are kept.
    pub fn delete_recipe(&self, household_id: &str, id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM recipes WHERE household_id = ?1 AND id = ?2",
            params![household_id, id],
        )?;
        Ok(rows > 0)
    }

    // --- Rules ---

    fn rule_from_row(row: &rusqlite::Row) -> rusqlite::Result<Rule> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let target_type: Option<String> = row.get(2)?;
        let tag_id: Option<String> = row.get(3)?;
        let recipe_id: Option<String> = row.get(4)?;
        let enabled: bool = row.get(9)?;

        match kind.as_str() {
            "CONSTRAINT" => Ok(Rule::Constraint(ConstraintRule {
                id,
                tag_id: tag_id.unwrap_or_default(),
                max_count: row.get::<_, Option<u32>>(5)?.unwrap_or(0),
                enabled,
            })),
            "ACTION" => {
                let target = match target_type.as_deref() {
                    Some("TAG") => RuleTarget::Tag {
                        tag_id: tag_id.unwrap_or_default(),
                    },
                    Some("RECIPE") => RuleTarget::Recipe {
                        recipe_id: recipe_id.unwrap_or_default(),
                    },
                    other => {
                        return Err(invalid_column(2, &format!("unknown target_type {other:?}")));
                    }
                };
                let time: String = row.get(7)?;
                let time_local =
                    parse_time_local(&time).map_err(|e| invalid_column(7, &e.to_string()))?;
                Ok(Rule::Action(ActionRule {
                    id,
                    target,
                    offset_days: row.get::<_, Option<i32>>(6)?.unwrap_or(0),
                    time_local,
                    message_template: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                    enabled,
                }))
            }
            other => Err(invalid_column(1, &format!("unknown rule_kind '{other}'"))),
        }
    }

    pub fn list_rules(&self, household_id: &str) -> Result<Vec<Rule>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, rule_kind, target_type, tag_id, recipe_id, max_count, offset_days,
                    time_local, message_template, enabled
             FROM rules WHERE household_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rules = stmt
            .query_map(params![household_id], Self::rule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    pub fn get_rule(&self, household_id: &str, id: &str) -> Result<Option<Rule>> {
        let rule = self
            .conn
            .query_row(
                "SELECT id, rule_kind, target_type, tag_id, recipe_id, max_count, offset_days,
                        time_local, message_template, enabled
                 FROM rules WHERE household_id = ?1 AND id = ?2",
                params![household_id, id],
                Self::rule_from_row,
            )
            .optional()?;
        Ok(rule)
    }

    pub fn create_constraint_rule(
        &self,
        household_id: &str,
        tag_id: &str,
        max_count: u32,
        enabled: bool,
    ) -> Result<Rule> {
        self.get_or_create_household(household_id)?;
        if self.get_tag(household_id, tag_id)?.is_none() {
            bail!("Tag '{tag_id}' not found");
        }
        let rule = Rule::Constraint(ConstraintRule {
            id: Uuid::new_v4().to_string(),
            tag_id: tag_id.to_string(),
            max_count,
            enabled,
        });
        self.insert_rule(household_id, &rule)?;
        Ok(rule)
    }

    pub fn create_action_rule(&self, household_id: &str, new: &NewActionRule) -> Result<Rule> {
        self.get_or_create_household(household_id)?;
        validate_offset_days(new.offset_days)?;
        validate_message_template(&new.message_template)?;
        match &new.target {
            RuleTarget::Tag { tag_id } => {
                if self.get_tag(household_id, tag_id)?.is_none() {
                    bail!("Tag '{tag_id}' not found");
                }
            }
            RuleTarget::Recipe { recipe_id } => {
                if self.get_recipe(household_id, recipe_id)?.is_none() {
                    bail!("Recipe '{recipe_id}' not found");
                }
            }
        }
        let rule = Rule::Action(ActionRule {
            id: Uuid::new_v4().to_string(),
            target: new.target.clone(),
            offset_days: new.offset_days,
            time_local: new.time_local,
            message_template: new.message_template.clone(),
            enabled: new.enabled,
        });
        self.insert_rule(household_id, &rule)?;
        Ok(rule)
    }

    fn insert_rule(&self, household_id: &str, rule: &Rule) -> Result<()> {
        let row = RuleRow::from(rule);
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO rules (id, household_id, rule_kind, target_type, tag_id, recipe_id,
                                max_count, offset_days, time_local, message_template, enabled,
                                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                rule.id(),
                household_id,
                rule.kind().as_str(),
                row.target_type,
                row.tag_id,
                row.recipe_id,
                row.max_count,
                row.offset_days,
                row.time_local,
                row.message_template,
                rule.is_enabled(),
                now,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn update_rule(
        &self,
        household_id: &str,
        id: &str,
        update: &UpdateRule,
    ) -> Result<Option<Rule>> {
        let Some(mut rule) = self.get_rule(household_id, id)? else {
            return Ok(None);
        };
        if let Some(enabled) = update.enabled {
            rule.set_enabled(enabled);
        }
        match &mut rule {
            Rule::Constraint(c) => {
                if update.offset_days.is_some()
                    || update.time_local.is_some()
                    || update.message_template.is_some()
                {
                    bail!(
                        "offset_days, time_local and message_template apply to action rules only"
                    );
                }
                if let Some(max_count) = update.max_count {
                    c.max_count = max_count;
                }
            }
            Rule::Action(a) => {
                if update.max_count.is_some() {
                    bail!("max_count applies to constraint rules only");
                }
                if let Some(offset_days) = update.offset_days {
                    validate_offset_days(offset_days)?;
                    a.offset_days = offset_days;
                }
                if let Some(time_local) = update.time_local {
                    a.time_local = time_local;
                }
                if let Some(template) = &update.message_template {
                    validate_message_template(template)?;
                    a.message_template.clone_from(template);
                }
            }
        }

        let row = RuleRow::from(&rule);
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "UPDATE rules SET max_count = ?1, offset_days = ?2, time_local = ?3,
                              message_template = ?4, enabled = ?5, updated_at = ?6
             WHERE household_id = ?7 AND id = ?8",
            params![
                row.max_count,
                row.offset_days,
                row.time_local,
                row.message_template,
                rule.is_enabled(),
                now,
                household_id,
                id,
            ],
        )?;
        Ok(Some(rule))
    }

    pub fn delete_rule(&self, household_id: &str, id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM rules WHERE household_id = ?1 AND id = ?2",
            params![household_id, id],
        )?;
        Ok(rows > 0)
    }

    // --- Plans ---

    pub fn get_plan(&self, household_id: &str, week_start: NaiveDate) -> Result<WeeklyPlan> {
        let mut plan = WeeklyPlan::new(week_start)?;
        let mut stmt = self.conn.prepare(
            "SELECT date, recipe_id, servings FROM plan_entries
             WHERE household_id = ?1 AND week_start = ?2 ORDER BY date",
        )?;
        let rows = stmt
            .query_map(params![household_id, iso(week_start)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    PlanEntry {
                        recipe_id: row.get(1)?,
                        servings: row.get(2)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (date, entry) in rows {
            plan.set(parse_iso_date(&date)?, entry)?;
        }
        Ok(plan)
    }

    /// Put a recipe on one day of the week, replacing whatever was there.
    /// `servings` falls back to the recipe's default.
    pub fn set_plan_entry(
        &self,
        household_id: &str,
        week_start: NaiveDate,
        date: NaiveDate,
        recipe_id: &str,
        servings: Option<u32>,
    ) -> Result<WeeklyPlan> {
        let plan = WeeklyPlan::new(week_start)?;
        if !plan.contains(date) {
            bail!("Date {date} is outside the week starting {week_start}");
        }
        self.get_or_create_household(household_id)?;
        let Some(recipe) = self.get_recipe(household_id, recipe_id)? else {
            bail!("Recipe '{recipe_id}' not found");
        };
        let servings = servings.unwrap_or(recipe.default_servings);
        validate_servings(servings)?;

        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO plan_entries (household_id, week_start, date, recipe_id, servings, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(household_id, date) DO UPDATE SET
                recipe_id = excluded.recipe_id,
                servings = excluded.servings,
                updated_at = excluded.updated_at",
            params![
                household_id,
                iso(week_start),
                iso(date),
                recipe.id,
                servings,
                now,
            ],
        )?;
        self.get_plan(household_id, week_start)
    }

    /// Remove the meal planned on `date`, returning it. `None` when nothing
    /// was planned there or `date` lies outside the week.
    pub fn delete_plan_entry(
        &self,
        household_id: &str,
        week_start: NaiveDate,
        date: NaiveDate,
    ) -> Result<Option<PlanEntry>> {
        let mut plan = self.get_plan(household_id, week_start)?;
        let Some(removed) = plan.clear(date) else {
            return Ok(None);
        };
        self.conn.execute(
            "DELETE FROM plan_entries WHERE household_id = ?1 AND week_start = ?2 AND date = ?3",
            params![household_id, iso(week_start), iso(date)],
        )?;
        Ok(Some(removed))
    }

    /// Read everything the engine needs for one week in a single transaction.
    pub fn load_week_snapshot(
        &self,
        household_id: &str,
        week_start: NaiveDate,
    ) -> Result<WeekSnapshot> {
        validate_week_start(week_start)?;
        let tx = self.conn.unchecked_transaction()?;
        let snapshot = WeekSnapshot {
            household: self.get_or_create_household(household_id)?,
            tags: self.list_tags(household_id)?,
            recipes: self.list_recipes(household_id)?,
            rules: self.list_rules(household_id)?,
            plan: self.get_plan(household_id, week_start)?,
        };
        tx.commit()?;
        Ok(snapshot)
    }
}

/// Column values for a rule row; fields that don't apply to the kind are NULL.
struct RuleRow {
    target_type: Option<&'static str>,
    tag_id: Option<String>,
    recipe_id: Option<String>,
    max_count: Option<u32>,
    offset_days: Option<i32>,
    time_local: Option<String>,
    message_template: Option<String>,
}

impl From<&Rule> for RuleRow {
    fn from(rule: &Rule) -> Self {
        match rule {
            Rule::Constraint(c) => RuleRow {
                target_type: None,
                tag_id: Some(c.tag_id.clone()),
                recipe_id: None,
                max_count: Some(c.max_count),
                offset_days: None,
                time_local: None,
                message_template: None,
            },
            Rule::Action(a) => {
                let (target_type, tag_id, recipe_id) = match &a.target {
                    RuleTarget::Tag { tag_id } => ("TAG", Some(tag_id.clone()), None),
                    RuleTarget::Recipe { recipe_id } => ("RECIPE", None, Some(recipe_id.clone())),
                };
                RuleRow {
                    target_type: Some(target_type),
                    tag_id,
                    recipe_id,
                    max_count: None,
                    offset_days: Some(a.offset_days),
                    time_local: Some(a.time_local.format("%H:%M").to_string()),
                    message_template: Some(a.message_template.clone()),
                }
            }
        }
    }
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn invalid_column(index: usize, message: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        message.to_string().into(),
    )
}
