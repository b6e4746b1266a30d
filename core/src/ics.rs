//! iCalendar (RFC 5545) export of a weekly plan.
//!
//! Meals become all-day events; reminders become short timed events in UTC
//! carrying a display alarm. Output is byte-for-byte deterministic for the
//! same inputs: `DTSTAMP` is derived from the week start, never the clock.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::models::{Catalog, Reminder, WeeklyPlan};

pub const PRODID: &str = "-//MealPrep//Weekly Plan//EN";

const UID_DOMAIN: &str = "mealprep";
const MAX_LINE_OCTETS: usize = 75;
const REMINDER_MINUTES: i64 = 5;

#[must_use]
pub fn serialize(
    plan: &WeeklyPlan,
    catalog: &Catalog<'_>,
    reminders: &[Reminder],
    tz: Tz,
) -> String {
    let week = plan.week_start();
    let stamp = format!("{}T000000Z", week.format("%Y%m%d"));
    let mut doc = Document::default();

    doc.prop("BEGIN", "VCALENDAR");
    doc.prop("VERSION", "2.0");
    doc.prop("PRODID", PRODID);
    doc.prop("CALSCALE", "GREGORIAN");
    doc.prop("METHOD", "PUBLISH");
    doc.text("X-WR-CALNAME", &format!("Meal plan week of {week}"));
    doc.prop("X-WR-TIMEZONE", tz.name());

    for (date, entry) in plan.entries() {
        let Some(recipe) = catalog.recipe(&entry.recipe_id) else {
            continue;
        };
        let mut description = format!("Servings: {}", entry.servings);
        if let Some(notes) = recipe.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            description.push_str("\nNotes: ");
            description.push_str(notes);
        }

        doc.prop("BEGIN", "VEVENT");
        doc.prop("UID", &format!("meal-{week}-{date}-{}@{UID_DOMAIN}", recipe.id));
        doc.prop("DTSTAMP", &stamp);
        doc.prop("DTSTART;VALUE=DATE", &ics_date(date));
        doc.prop("DTEND;VALUE=DATE", &ics_date(date + Duration::days(1)));
        doc.text("SUMMARY", &recipe.title);
        doc.text("DESCRIPTION", &description);
        doc.prop("TRANSP", "TRANSPARENT");
        doc.prop("END", "VEVENT");
    }

    for reminder in reminders {
        let start = reminder.fire_at.with_timezone(&Utc);
        let end = start + Duration::minutes(REMINDER_MINUTES);

        doc.prop("BEGIN", "VEVENT");
        doc.prop(
            "UID",
            &format!(
                "reminder-{}-{}@{UID_DOMAIN}",
                reminder.rule_id, reminder.meal_date
            ),
        );
        doc.prop("DTSTAMP", &stamp);
        doc.prop("DTSTART", &ics_utc(start));
        doc.prop("DTEND", &ics_utc(end));
        doc.text("SUMMARY", &reminder.message);
        doc.text(
            "DESCRIPTION",
            &format!(
                "For dinner on {}: {}",
                reminder.meal_date, reminder.recipe_title
            ),
        );
        doc.prop("BEGIN", "VALARM");
        doc.prop("ACTION", "DISPLAY");
        doc.text("DESCRIPTION", &reminder.message);
        doc.prop("TRIGGER", "PT0S");
        doc.prop("END", "VALARM");
        doc.prop("END", "VEVENT");
    }

    doc.prop("END", "VCALENDAR");
    doc.out
}

/// Escape a TEXT value: backslash, semicolon, comma and newlines.
#[must_use]
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            _ => out.push(ch),
        }
    }
    out
}

fn ics_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

fn ics_utc(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

#[derive(Default)]
struct Document {
    out: String,
}

impl Document {
    fn prop(&mut self, name: &str, value: &str) {
        self.line(&format!("{name}:{value}"));
    }

    fn text(&mut self, name: &str, value: &str) {
        self.prop(name, &escape_text(value));
    }

    /// Append one content line, folded so no physical line exceeds 75
    /// octets. Continuations start with a single space and never split a
    /// UTF-8 sequence.
    fn line(&mut self, content: &str) {
        let mut width = 0;
        for ch in content.chars() {
            let len = ch.len_utf8();
            if width + len > MAX_LINE_OCTETS {
                self.out.push_str("\r\n ");
                width = 1;
            }
            self.out.push(ch);
            width += len;
        }
        self.out.push_str("\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionRule, PlanEntry, Recipe, RuleTarget, Tag, TagType};
    use crate::reminders;
    use chrono::NaiveTime;
    use chrono_tz::America::Los_Angeles;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn recipe(id: &str, title: &str, notes: Option<&str>) -> Recipe {
        Recipe {
            id: id.to_string(),
            title: title.to_string(),
            tag_ids: vec!["t_thaw".to_string()],
            default_servings: 4,
            notes: notes.map(ToString::to_string),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn week(days: &[(u32, &str)]) -> WeeklyPlan {
        let mut plan = WeeklyPlan::new(date(1)).unwrap();
        for (d, id) in days {
            plan.set(
                date(*d),
                PlanEntry {
                    recipe_id: (*id).to_string(),
                    servings: 3,
                },
            )
            .unwrap();
        }
        plan
    }

    fn thaw() -> ActionRule {
        ActionRule {
            id: "a1".to_string(),
            target: RuleTarget::Tag {
                tag_id: "t_thaw".to_string(),
            },
            offset_days: -1,
            time_local: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            message_template: "Thaw {recipe_title}".to_string(),
            enabled: true,
        }
    }

    /// Join folded continuation lines back into logical lines.
    fn unfold(doc: &str) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        for physical in doc.split("\r\n").filter(|l| !l.is_empty()) {
            if let Some(rest) = physical.strip_prefix(' ') {
                lines.last_mut().unwrap().push_str(rest);
            } else {
                lines.push(physical.to_string());
            }
        }
        lines
    }

    fn export(plan: &WeeklyPlan, recipes: &[Recipe], rules: &[ActionRule]) -> String {
        let tags = vec![Tag {
            id: "t_thaw".to_string(),
            name: "thaw".to_string(),
            tag_type: TagType::Prep,
            created_at: String::new(),
        }];
        let catalog = Catalog::new(recipes, &tags);
        let derived = reminders::derive(plan, &catalog, rules, Los_Angeles);
        serialize(plan, &catalog, &derived, Los_Angeles)
    }

    #[test]
    fn test_empty_plan_is_valid_calendar() {
        let doc = export(&week(&[]), &[], &[]);
        let lines = unfold(&doc);
        assert_eq!(lines.first().unwrap(), "BEGIN:VCALENDAR");
        assert_eq!(lines.last().unwrap(), "END:VCALENDAR");
        assert!(lines.contains(&"VERSION:2.0".to_string()));
        assert!(lines.contains(&format!("PRODID:{PRODID}")));
        assert!(lines.contains(&"X-WR-TIMEZONE:America/Los_Angeles".to_string()));
        assert!(!doc.contains("VEVENT"));
        assert!(doc.ends_with("\r\n"));
    }

    #[test]
    fn test_meal_and_reminder_events() {
        let recipes = vec![recipe("r1", "Salmon", None)];
        let doc = export(&week(&[(3, "r1")]), &recipes, &[thaw()]);
        let lines = unfold(&doc);

        assert_eq!(lines.iter().filter(|l| *l == "BEGIN:VEVENT").count(), 2);
        assert_eq!(lines.iter().filter(|l| *l == "END:VEVENT").count(), 2);
        assert!(lines.contains(&"UID:meal-2024-01-01-2024-01-03-r1@mealprep".to_string()));
        assert!(lines.contains(&"DTSTART;VALUE=DATE:20240103".to_string()));
        assert!(lines.contains(&"DTEND;VALUE=DATE:20240104".to_string()));
        assert!(lines.contains(&"SUMMARY:Salmon".to_string()));
        assert!(lines.contains(&"DESCRIPTION:Servings: 3".to_string()));

        assert!(lines.contains(&"UID:reminder-a1-2024-01-03@mealprep".to_string()));
        assert!(lines.contains(&"DTSTART:20240102T180000Z".to_string()));
        assert!(lines.contains(&"DTEND:20240102T180500Z".to_string()));
        assert!(lines.contains(&"SUMMARY:Thaw Salmon".to_string()));
        assert!(lines.contains(&"DESCRIPTION:For dinner on 2024-01-03: Salmon".to_string()));
        assert!(lines.contains(&"TRIGGER:PT0S".to_string()));
        assert!(lines.iter().all(|l| !l.starts_with("DTSTAMP") || l == "DTSTAMP:20240101T000000Z"));
    }

    #[test]
    fn test_missing_recipe_event_skipped() {
        let recipes = vec![recipe("r1", "Salmon", None)];
        let doc = export(&week(&[(2, "deleted"), (3, "r1")]), &recipes, &[]);
        assert_eq!(doc.matches("BEGIN:VEVENT").count(), 1);
        assert!(!doc.contains("deleted"));
    }

    #[test]
    fn test_text_escaping_round_trips() {
        let title = "Mac, cheese; \"best\" \\ ever\nline two";
        let recipes = vec![recipe("r1", title, Some("Use\r\nleftovers"))];
        let doc = export(&week(&[(1, "r1")]), &recipes, &[]);
        let lines = unfold(&doc);

        assert!(lines.contains(
            &"SUMMARY:Mac\\, cheese\\; \"best\" \\\\ ever\\nline two".to_string()
        ));
        assert!(lines.contains(&"DESCRIPTION:Servings: 3\\nNotes: Use\\nleftovers".to_string()));
        // Raw CR never reaches the output except as part of CRLF.
        assert_eq!(doc.matches('\r').count(), doc.matches("\r\n").count());
    }

    #[test]
    fn test_long_lines_fold_at_75_octets() {
        let title =
            "Slow-braised short ribs with gremolata, polenta and roasted winter vegetables à la maison";
        let recipes = vec![recipe("r1", title, Some(&"é".repeat(80)))];
        let doc = export(&week(&[(1, "r1")]), &recipes, &[]);

        for physical in doc.split("\r\n") {
            assert!(physical.len() <= 75, "line too long: {physical:?}");
        }
        let lines = unfold(&doc);
        assert!(lines.contains(&format!("SUMMARY:{title}")));
        assert!(lines.contains(&format!(
            "DESCRIPTION:Servings: 3\\nNotes: {}",
            "é".repeat(80)
        )));
    }

    #[test]
    fn test_output_is_deterministic() {
        let recipes = vec![recipe("r1", "Salmon", None), recipe("r2", "Tacos", None)];
        let plan = week(&[(1, "r1"), (5, "r2"), (3, "r1")]);
        let first = export(&plan, &recipes, &[thaw()]);
        let second = export(&plan, &recipes, &[thaw()]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_uids_unique() {
        let recipes = vec![recipe("r1", "Salmon", None)];
        let mut second = thaw();
        second.id = "a2".to_string();
        let doc = export(&week(&[(1, "r1"), (2, "r1"), (3, "r1")]), &recipes, &[thaw(), second]);

        let uids: Vec<String> = unfold(&doc)
            .into_iter()
            .filter(|l| l.starts_with("UID:"))
            .collect();
        let mut deduped = uids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(uids.len(), 9);
        assert_eq!(deduped.len(), uids.len());
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("a,b;c\\d"), "a\\,b\\;c\\\\d");
        assert_eq!(escape_text("one\ntwo\r\nthree\rfour"), "one\\ntwo\\nthree\\nfour");
        assert_eq!(escape_text("plain"), "plain");
    }
}
