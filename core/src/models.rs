use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize, Serializer};

pub const DEFAULT_HOUSEHOLD: &str = "default";
pub const DEFAULT_TIMEZONE: &str = "America/Los_Angeles";
pub const DEFAULT_SERVINGS: u32 = 4;
pub const DAYS_PER_WEEK: usize = 7;

/// Earliest a reminder may fire, in days before the meal.
pub const MIN_OFFSET_DAYS: i32 = -365;

/// `rule_id` used for advisories that are not attached to a user rule.
pub const SYSTEM_RULE_ID: &str = "system";

// --- Households ---

#[derive(Debug, Clone, Serialize)]
pub struct Household {
    #[serde(rename = "household_id")]
    pub id: String,
    pub name: String,
    pub timezone: String,
    pub created_at: String,
}

impl Household {
    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim().parse::<Tz>().map_err(|_| {
        anyhow::anyhow!("Unknown time zone '{name}'. Use an IANA name like 'Europe/Berlin'")
    })
}

// --- Tags ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagType {
    Protein,
    Portion,
    Prep,
    Other,
}

impl TagType {
    pub const ALL: [TagType; 4] = [
        TagType::Protein,
        TagType::Portion,
        TagType::Prep,
        TagType::Other,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TagType::Protein => "PROTEIN",
            TagType::Portion => "PORTION",
            TagType::Prep => "PREP",
            TagType::Other => "OTHER",
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        TagType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid tag type '{s}'. Must be one of: protein, portion, prep, other"
                )
            })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    #[serde(rename = "tag_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub tag_type: TagType,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewTag {
    pub name: String,
    pub tag_type: TagType,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTag {
    pub name: Option<String>,
    pub tag_type: Option<TagType>,
}

// --- Recipes ---

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    #[serde(rename = "recipe_id")]
    pub id: String,
    pub title: String,
    pub tag_ids: Vec<String>,
    pub default_servings: u32,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Recipe {
    #[must_use]
    pub fn has_tag(&self, tag_id: &str) -> bool {
        self.tag_ids.iter().any(|t| t == tag_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub title: String,
    pub tag_ids: Vec<String>,
    pub default_servings: u32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdateRecipe {
    pub title: Option<String>,
    pub tag_ids: Option<Vec<String>>,
    pub default_servings: Option<u32>,
    pub notes: Option<Option<String>>,
}

// --- Rules ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    Constraint,
    Action,
}

impl RuleKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::Constraint => "CONSTRAINT",
            RuleKind::Action => "ACTION",
        }
    }
}

/// "No more than `max_count` meals per calendar week may carry `tag_id`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintRule {
    #[serde(rename = "rule_id")]
    pub id: String,
    pub tag_id: String,
    pub max_count: u32,
    pub enabled: bool,
}

/// What an action rule fires for: every meal carrying a tag, or one recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleTarget {
    Tag { tag_id: String },
    Recipe { recipe_id: String },
}

impl RuleTarget {
    #[must_use]
    pub fn matches(&self, recipe: &Recipe) -> bool {
        match self {
            RuleTarget::Tag { tag_id } => recipe.has_tag(tag_id),
            RuleTarget::Recipe { recipe_id } => recipe.id == *recipe_id,
        }
    }
}

/// "For every planned meal matching `target`, remind at meal date +
/// `offset_days`, `time_local`." `offset_days` is zero or negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRule {
    #[serde(rename = "rule_id")]
    pub id: String,
    #[serde(flatten)]
    pub target: RuleTarget,
    pub offset_days: i32,
    #[serde(with = "time_hhmm")]
    pub time_local: NaiveTime,
    pub message_template: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule_kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rule {
    Constraint(ConstraintRule),
    Action(ActionRule),
}

impl Rule {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Rule::Constraint(r) => &r.id,
            Rule::Action(r) => &r.id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Constraint(_) => RuleKind::Constraint,
            Rule::Action(_) => RuleKind::Action,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match self {
            Rule::Constraint(r) => r.enabled,
            Rule::Action(r) => r.enabled,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        match self {
            Rule::Constraint(r) => r.enabled = enabled,
            Rule::Action(r) => r.enabled = enabled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewActionRule {
    pub target: RuleTarget,
    pub offset_days: i32,
    pub time_local: NaiveTime,
    pub message_template: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRule {
    pub enabled: Option<bool>,
    pub max_count: Option<u32>,
    pub offset_days: Option<i32>,
    pub time_local: Option<NaiveTime>,
    pub message_template: Option<String>,
}

mod time_hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_time_local(&s).map_err(serde::de::Error::custom)
    }
}

// --- Weekly plans ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub recipe_id: String,
    pub servings: u32,
}

/// One household week, Monday through Sunday. Slot `i` holds the meal for
/// `week_start + i` days; an empty slot is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyPlan {
    week_start: NaiveDate,
    slots: [Option<PlanEntry>; DAYS_PER_WEEK],
}

impl WeeklyPlan {
    pub fn new(week_start: NaiveDate) -> Result<Self> {
        validate_week_start(week_start)?;
        Ok(Self {
            week_start,
            slots: Default::default(),
        })
    }

    #[must_use]
    pub fn week_start(&self) -> NaiveDate {
        self.week_start
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.week_start.iter_days().take(DAYS_PER_WEEK)
    }

    #[must_use]
    pub fn day_index(&self, date: NaiveDate) -> Option<usize> {
        let offset = (date - self.week_start).num_days();
        usize::try_from(offset)
            .ok()
            .filter(|&i| i < DAYS_PER_WEEK)
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.day_index(date).is_some()
    }

    #[must_use]
    pub fn get(&self, date: NaiveDate) -> Option<&PlanEntry> {
        self.day_index(date).and_then(|i| self.slots[i].as_ref())
    }

    /// Place `entry` on `date`, returning whatever was there before.
    pub fn set(&mut self, date: NaiveDate, entry: PlanEntry) -> Result<Option<PlanEntry>> {
        let Some(i) = self.day_index(date) else {
            bail!(
                "Date {date} is outside the week starting {}",
                self.week_start
            );
        };
        Ok(self.slots[i].replace(entry))
    }

    pub fn clear(&mut self, date: NaiveDate) -> Option<PlanEntry> {
        self.day_index(date).and_then(|i| self.slots[i].take())
    }

    /// Planned meals in date order.
    pub fn entries(&self) -> impl Iterator<Item = (NaiveDate, &PlanEntry)> + '_ {
        self.dates()
            .zip(self.slots.iter())
            .filter_map(|(date, slot)| slot.as_ref().map(|e| (date, e)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for WeeklyPlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            week_start_date: NaiveDate,
            entries: BTreeMap<NaiveDate, Option<&'a PlanEntry>>,
        }

        let entries = self
            .dates()
            .zip(self.slots.iter())
            .map(|(date, slot)| (date, slot.as_ref()))
            .collect();
        Wire {
            week_start_date: self.week_start,
            entries,
        }
        .serialize(serializer)
    }
}

// --- Engine inputs ---

/// Read-only lookup over one household's recipes and tags.
#[derive(Debug, Clone)]
pub struct Catalog<'a> {
    recipes: HashMap<&'a str, &'a Recipe>,
    tags: HashMap<&'a str, &'a Tag>,
}

impl<'a> Catalog<'a> {
    #[must_use]
    pub fn new(recipes: &'a [Recipe], tags: &'a [Tag]) -> Self {
        Self {
            recipes: recipes.iter().map(|r| (r.id.as_str(), r)).collect(),
            tags: tags.iter().map(|t| (t.id.as_str(), t)).collect(),
        }
    }

    #[must_use]
    pub fn recipe(&self, id: &str) -> Option<&'a Recipe> {
        self.recipes.get(id).copied()
    }

    #[must_use]
    pub fn tag(&self, id: &str) -> Option<&'a Tag> {
        self.tags.get(id).copied()
    }

    /// Whether an action rule's target still resolves.
    #[must_use]
    pub fn resolves(&self, target: &RuleTarget) -> bool {
        match target {
            RuleTarget::Tag { tag_id } => self.tags.contains_key(tag_id.as_str()),
            RuleTarget::Recipe { recipe_id } => self.recipes.contains_key(recipe_id.as_str()),
        }
    }
}

/// Everything the engine needs for one household week, read in a single
/// transaction.
#[derive(Debug, Clone)]
pub struct WeekSnapshot {
    pub household: Household,
    pub tags: Vec<Tag>,
    pub recipes: Vec<Recipe>,
    pub rules: Vec<Rule>,
    pub plan: WeeklyPlan,
}

impl WeekSnapshot {
    #[must_use]
    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(&self.recipes, &self.tags)
    }

    #[must_use]
    pub fn constraint_rules(&self) -> Vec<ConstraintRule> {
        self.rules
            .iter()
            .filter_map(|r| match r {
                Rule::Constraint(c) => Some(c.clone()),
                Rule::Action(_) => None,
            })
            .collect()
    }

    #[must_use]
    pub fn action_rules(&self) -> Vec<ActionRule> {
        self.rules
            .iter()
            .filter_map(|r| match r {
                Rule::Action(a) => Some(a.clone()),
                Rule::Constraint(_) => None,
            })
            .collect()
    }
}

// --- Engine outputs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningKind {
    MaxMealsPerWeekByTag,
    OrphanedRule,
    MissingRecipe,
}

impl WarningKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WarningKind::MaxMealsPerWeekByTag => "MAX_MEALS_PER_WEEK_BY_TAG",
            WarningKind::OrphanedRule => "ORPHANED_RULE",
            WarningKind::MissingRecipe => "MISSING_RECIPE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationWarning {
    pub rule_id: String,
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub message: String,
    pub details: serde_json::Value,
}

impl ValidationWarning {
    #[must_use]
    pub fn orphaned_tag(rule_id: &str, kind: RuleKind, tag_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            kind: WarningKind::OrphanedRule,
            message: format!(
                "Rule references a deleted tag ({tag_id}); edit or delete the rule"
            ),
            details: serde_json::json!({
                "rule_kind": kind.as_str(),
                "tag_id": tag_id,
            }),
        }
    }

    #[must_use]
    pub fn orphaned_recipe(rule_id: &str, recipe_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            kind: WarningKind::OrphanedRule,
            message: format!(
                "Rule references a deleted recipe ({recipe_id}); edit or delete the rule"
            ),
            details: serde_json::json!({
                "rule_kind": RuleKind::Action.as_str(),
                "recipe_id": recipe_id,
            }),
        }
    }

    #[must_use]
    pub fn missing_recipe(date: NaiveDate, recipe_id: &str) -> Self {
        Self {
            rule_id: SYSTEM_RULE_ID.to_string(),
            kind: WarningKind::MissingRecipe,
            message: format!("Recipe missing for {date}; please reselect"),
            details: serde_json::json!({
                "date": date,
                "recipe_id": recipe_id,
            }),
        }
    }
}

/// A derived, non-persisted reminder for one (action rule, planned meal) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reminder {
    pub rule_id: String,
    pub meal_date: NaiveDate,
    pub recipe_id: String,
    pub recipe_title: String,
    pub fire_at: DateTime<Tz>,
    pub message: String,
}

// --- Calendar helpers ---

/// Monday of the week containing `date`.
#[must_use]
pub fn week_start_for(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

#[must_use]
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

pub fn parse_iso_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid date '{s}'. Use YYYY-MM-DD"))
}

pub fn parse_week_start(s: &str) -> Result<NaiveDate> {
    let date = parse_iso_date(s)?;
    validate_week_start(date)?;
    Ok(date)
}

// --- Boundary validation ---

pub fn validate_week_start(date: NaiveDate) -> Result<()> {
    if date.weekday() != Weekday::Mon {
        bail!(
            "Week start {date} is a {}; weeks must start on a Monday",
            weekday_name(date.weekday())
        );
    }
    Ok(())
}

/// Parse a wall-clock time in `HH:MM` form.
pub fn parse_time_local(s: &str) -> Result<NaiveTime> {
    let invalid = || anyhow::anyhow!("Invalid time '{s}'. time_local must be in HH:MM format");
    let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
    let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if !digits(h) || h.len() > 2 || !digits(m) || m.len() != 2 {
        return Err(invalid());
    }
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

pub fn validate_name(what: &str, name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        bail!("{what} must not be empty");
    }
    Ok(trimmed.to_string())
}

pub fn validate_servings(servings: u32) -> Result<()> {
    if servings < 1 {
        bail!("Servings must be at least 1");
    }
    Ok(())
}

pub fn validate_tag_ids(tag_ids: &[String]) -> Result<()> {
    if tag_ids.is_empty() {
        bail!("At least one tag is required");
    }
    Ok(())
}

pub fn validate_max_count(max_count: i64) -> Result<u32> {
    if max_count < 0 {
        bail!("max_count must be >= 0");
    }
    u32::try_from(max_count).map_err(|_| anyhow::anyhow!("max_count is too large"))
}

pub fn validate_offset_days(offset_days: i32) -> Result<()> {
    if offset_days > 0 {
        bail!("offset_days must be 0 (day of the meal) or negative (days before)");
    }
    if offset_days < MIN_OFFSET_DAYS {
        bail!("offset_days must be >= {MIN_OFFSET_DAYS}");
    }
    Ok(())
}

pub fn validate_message_template(template: &str) -> Result<()> {
    if template.trim().is_empty() {
        bail!("message_template must not be empty");
    }
    Ok(())
}
