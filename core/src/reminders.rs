use chrono::{DateTime, Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::models::{
    ActionRule, Catalog, Reminder, RuleKind, RuleTarget, ValidationWarning, WeeklyPlan,
};
use crate::template::{TemplateContext, render};

/// Derive the reminders a week's action rules produce.
///
/// Each enabled rule fires once per planned meal whose recipe matches its
/// target. Rules pointing at a deleted tag or recipe fire nothing (see
/// [`orphaned_action_rules`]), and meals whose recipe is gone are skipped,
/// as are meals whose shifted date falls outside the calendar.
/// Output is ordered by fire time, then `rule_id`, then meal date.
#[must_use]
pub fn derive(
    plan: &WeeklyPlan,
    catalog: &Catalog<'_>,
    rules: &[ActionRule],
    tz: Tz,
) -> Vec<Reminder> {
    let mut reminders = Vec::new();

    for rule in rules.iter().filter(|r| r.enabled) {
        if !catalog.resolves(&rule.target) {
            continue;
        }
        for (meal_date, entry) in plan.entries() {
            let Some(recipe) = catalog.recipe(&entry.recipe_id) else {
                continue;
            };
            if !rule.target.matches(recipe) {
                continue;
            }
            let Some(at) = fire_at(meal_date, rule.offset_days, rule.time_local, tz) else {
                continue;
            };
            let ctx = TemplateContext {
                meal_date,
                recipe_title: &recipe.title,
            };
            reminders.push(Reminder {
                rule_id: rule.id.clone(),
                meal_date,
                recipe_id: recipe.id.clone(),
                recipe_title: recipe.title.clone(),
                fire_at: at,
                message: render(&rule.message_template, &ctx),
            });
        }
    }

    reminders.sort_by(|a, b| {
        a.fire_at
            .cmp(&b.fire_at)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
            .then_with(|| a.meal_date.cmp(&b.meal_date))
    });
    reminders
}

/// `ORPHANED_RULE` warnings for enabled action rules whose target is gone.
#[must_use]
pub fn orphaned_action_rules(
    catalog: &Catalog<'_>,
    rules: &[ActionRule],
) -> Vec<ValidationWarning> {
    rules
        .iter()
        .filter(|r| r.enabled && !catalog.resolves(&r.target))
        .map(|r| match &r.target {
            RuleTarget::Tag { tag_id } => {
                ValidationWarning::orphaned_tag(&r.id, RuleKind::Action, tag_id)
            }
            RuleTarget::Recipe { recipe_id } => {
                ValidationWarning::orphaned_recipe(&r.id, recipe_id)
            }
        })
        .collect()
}

/// The instant a reminder fires: `time_local` on the meal date shifted by
/// `offset_days`, in `tz`. `None` when the shifted date is out of range.
#[must_use]
pub fn fire_at(
    meal_date: NaiveDate,
    offset_days: i32,
    time_local: NaiveTime,
    tz: Tz,
) -> Option<DateTime<Tz>> {
    let shift = Days::new(u64::from(offset_days.unsigned_abs()));
    let day = if offset_days < 0 {
        meal_date.checked_sub_days(shift)?
    } else {
        meal_date.checked_add_days(shift)?
    };
    Some(localize(tz, day.and_time(time_local)))
}

/// Resolve a wall-clock time. Ambiguous times (clocks falling back) take the
/// earlier instant; times inside a spring-forward gap move ahead one hour.
fn localize(tz: Tz, local: NaiveDateTime) -> DateTime<Tz> {
    if let Some(dt) = tz.from_local_datetime(&local).earliest() {
        return dt;
    }
    local
        .checked_add_signed(Duration::hours(1))
        .and_then(|shifted| tz.from_local_datetime(&shifted).earliest())
        .unwrap_or_else(|| tz.from_utc_datetime(&local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlanEntry, Recipe, Tag, TagType};
    use chrono::Utc;
    use chrono_tz::America::Los_Angeles;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn tag(id: &str) -> Tag {
        Tag {
            id: id.to_string(),
            name: id.to_string(),
            tag_type: TagType::Prep,
            created_at: String::new(),
        }
    }

    fn recipe(id: &str, title: &str, tags: &[&str]) -> Recipe {
        Recipe {
            id: id.to_string(),
            title: title.to_string(),
            tag_ids: tags.iter().map(ToString::to_string).collect(),
            default_servings: 4,
            notes: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn thaw_rule(id: &str, target: RuleTarget, offset_days: i32) -> ActionRule {
        ActionRule {
            id: id.to_string(),
            target,
            offset_days,
            time_local: time(10, 0),
            message_template: "Thaw {recipe_title} for {day_of_week}".to_string(),
            enabled: true,
        }
    }

    fn tag_target(id: &str) -> RuleTarget {
        RuleTarget::Tag {
            tag_id: id.to_string(),
        }
    }

    fn plan_on(week: NaiveDate, days: &[(NaiveDate, &str)]) -> WeeklyPlan {
        let mut plan = WeeklyPlan::new(week).unwrap();
        for (d, recipe_id) in days {
            plan.set(
                *d,
                PlanEntry {
                    recipe_id: (*recipe_id).to_string(),
                    servings: 4,
                },
            )
            .unwrap();
        }
        plan
    }

    #[test]
    fn test_thaw_day_before_in_january() {
        let tags = vec![tag("t_thaw")];
        let recipes = vec![recipe("r1", "Salmon", &["t_thaw"])];
        let catalog = Catalog::new(&recipes, &tags);
        let plan = plan_on(date(2024, 1, 1), &[(date(2024, 1, 3), "r1")]);
        let rules = [thaw_rule("a1", tag_target("t_thaw"), -1)];

        let out = derive(&plan, &catalog, &rules, Los_Angeles);
        assert_eq!(out.len(), 1);
        let r = &out[0];
        assert_eq!(r.message, "Thaw Salmon for Wednesday");
        assert_eq!(r.meal_date, date(2024, 1, 3));
        assert_eq!(r.fire_at.naive_local(), date(2024, 1, 2).and_time(time(10, 0)));
        // PST is UTC-8
        assert_eq!(
            r.fire_at.with_timezone(&Utc).naive_utc(),
            date(2024, 1, 2).and_time(time(18, 0))
        );
    }

    #[test]
    fn test_offset_crosses_week_boundary() {
        let tags = vec![tag("t_thaw")];
        let recipes = vec![recipe("r1", "Stew", &["t_thaw"])];
        let catalog = Catalog::new(&recipes, &tags);
        let plan = plan_on(date(2024, 1, 1), &[(date(2024, 1, 1), "r1")]);
        let rules = [thaw_rule("a1", tag_target("t_thaw"), -2)];

        let out = derive(&plan, &catalog, &rules, Los_Angeles);
        assert_eq!(out[0].fire_at.date_naive(), date(2023, 12, 30));
        assert_eq!(out[0].meal_date, date(2024, 1, 1));
    }

    #[test]
    fn test_spring_forward_gap_moves_ahead() {
        // 2024-03-10 02:30 does not exist in Los Angeles.
        let at = fire_at(date(2024, 3, 10), 0, time(2, 30), Los_Angeles).unwrap();
        assert_eq!(at.naive_local(), date(2024, 3, 10).and_time(time(3, 30)));
    }

    #[test]
    fn test_fall_back_takes_earlier_instant() {
        // 2024-11-03 01:30 happens twice in Los Angeles; the first is PDT (UTC-7).
        let at = fire_at(date(2024, 11, 3), 0, time(1, 30), Los_Angeles).unwrap();
        assert_eq!(
            at.with_timezone(&Utc).naive_utc(),
            date(2024, 11, 3).and_time(time(8, 30))
        );
    }

    #[test]
    fn test_same_day_reminder_after_dst_change() {
        // Summer: PDT is UTC-7
        let at = fire_at(date(2024, 7, 4), 0, time(16, 0), Los_Angeles).unwrap();
        assert_eq!(
            at.with_timezone(&Utc).naive_utc(),
            date(2024, 7, 4).and_time(time(23, 0))
        );
    }

    #[test]
    fn test_recipe_target_and_disabled_rules() {
        let tags = vec![tag("t_thaw")];
        let recipes = vec![
            recipe("r1", "Salmon", &["t_thaw"]),
            recipe("r2", "Tacos", &[]),
        ];
        let catalog = Catalog::new(&recipes, &tags);
        let plan = plan_on(
            date(2024, 1, 1),
            &[(date(2024, 1, 2), "r1"), (date(2024, 1, 4), "r2")],
        );
        let mut disabled = thaw_rule("a0", tag_target("t_thaw"), 0);
        disabled.enabled = false;
        let by_recipe = thaw_rule(
            "a1",
            RuleTarget::Recipe {
                recipe_id: "r2".to_string(),
            },
            0,
        );

        let out = derive(&plan, &catalog, &[disabled, by_recipe], Los_Angeles);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipe_id, "r2");
        assert_eq!(out[0].message, "Thaw Tacos for Thursday");
    }

    #[test]
    fn test_orphaned_rules_fire_nothing() {
        let tags = vec![];
        let recipes = vec![recipe("r1", "Salmon", &["t_gone"])];
        let catalog = Catalog::new(&recipes, &tags);
        let plan = plan_on(date(2024, 1, 1), &[(date(2024, 1, 2), "r1")]);
        let rules = [
            thaw_rule("a1", tag_target("t_gone"), -1),
            thaw_rule(
                "a2",
                RuleTarget::Recipe {
                    recipe_id: "r_gone".to_string(),
                },
                -1,
            ),
        ];

        assert!(derive(&plan, &catalog, &rules, Los_Angeles).is_empty());

        let orphans = orphaned_action_rules(&catalog, &rules);
        assert_eq!(orphans.len(), 2);
        assert_eq!(orphans[0].details["rule_kind"], "ACTION");
        assert_eq!(orphans[0].details["tag_id"], "t_gone");
        assert_eq!(orphans[1].details["recipe_id"], "r_gone");
    }

    #[test]
    fn test_missing_recipe_entries_skipped() {
        let tags = vec![tag("t_thaw")];
        let recipes = vec![recipe("r1", "Salmon", &["t_thaw"])];
        let catalog = Catalog::new(&recipes, &tags);
        let plan = plan_on(
            date(2024, 1, 1),
            &[(date(2024, 1, 2), "deleted"), (date(2024, 1, 3), "r1")],
        );

        let rules = [thaw_rule("a1", tag_target("t_thaw"), 0)];
        let out = derive(&plan, &catalog, &rules, Los_Angeles);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].meal_date, date(2024, 1, 3));
    }

    #[test]
    fn test_ordering_fire_at_then_rule_id() {
        let tags = vec![tag("t_thaw")];
        let recipes = vec![recipe("r1", "Salmon", &["t_thaw"])];
        let catalog = Catalog::new(&recipes, &tags);
        let plan = plan_on(
            date(2024, 1, 1),
            &[(date(2024, 1, 3), "r1"), (date(2024, 1, 5), "r1")],
        );
        // Both rules fire at identical instants for each meal.
        let rules = [
            thaw_rule("b_rule", tag_target("t_thaw"), -1),
            thaw_rule("a_rule", tag_target("t_thaw"), -1),
        ];

        let out = derive(&plan, &catalog, &rules, Los_Angeles);
        let keys: Vec<(&str, NaiveDate)> = out
            .iter()
            .map(|r| (r.rule_id.as_str(), r.meal_date))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("a_rule", date(2024, 1, 3)),
                ("b_rule", date(2024, 1, 3)),
                ("a_rule", date(2024, 1, 5)),
                ("b_rule", date(2024, 1, 5)),
            ]
        );
        assert!(out.windows(2).all(|w| w[0].fire_at <= w[1].fire_at));
    }

    #[test]
    fn test_cardinality_matches_rule_meal_pairs() {
        let tags = vec![tag("t_a"), tag("t_b")];
        let recipes = vec![
            recipe("r1", "One", &["t_a", "t_b"]),
            recipe("r2", "Two", &["t_a"]),
        ];
        let catalog = Catalog::new(&recipes, &tags);
        let plan = plan_on(
            date(2024, 1, 1),
            &[
                (date(2024, 1, 1), "r1"),
                (date(2024, 1, 2), "r2"),
                (date(2024, 1, 3), "r1"),
            ],
        );
        let rules = [
            thaw_rule("a", tag_target("t_a"), 0),
            thaw_rule("b", tag_target("t_b"), 0),
        ];

        // t_a matches 3 meals, t_b matches 2; overlapping rules are not merged.
        assert_eq!(derive(&plan, &catalog, &rules, Los_Angeles).len(), 5);
    }

    #[test]
    fn test_out_of_range_offset_is_skipped() {
        assert!(fire_at(date(2024, 1, 1), i32::MIN, time(10, 0), Los_Angeles).is_none());

        let tags = vec![tag("t_thaw")];
        let recipes = vec![recipe("r1", "Salmon", &["t_thaw"])];
        let catalog = Catalog::new(&recipes, &tags);
        let plan = plan_on(date(2024, 1, 1), &[(date(2024, 1, 1), "r1")]);
        let rules = [
            thaw_rule("far", tag_target("t_thaw"), i32::MIN),
            thaw_rule("near", tag_target("t_thaw"), -1),
        ];

        let out = derive(&plan, &catalog, &rules, Los_Angeles);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rule_id, "near");
    }

    #[test]
    fn test_disabling_one_rule_removes_only_its_reminders() {
        let tags = vec![tag("t_a"), tag("t_b")];
        let recipes = vec![
            recipe("r1", "One", &["t_a", "t_b"]),
            recipe("r2", "Two", &["t_a"]),
        ];
        let catalog = Catalog::new(&recipes, &tags);
        let plan = plan_on(
            date(2024, 1, 1),
            &[(date(2024, 1, 1), "r1"), (date(2024, 1, 4), "r2")],
        );
        let rules = vec![
            thaw_rule("a", tag_target("t_a"), -1),
            thaw_rule("b", tag_target("t_b"), 0),
            thaw_rule(
                "c",
                RuleTarget::Recipe {
                    recipe_id: "r2".to_string(),
                },
                -2,
            ),
        ];
        let before = derive(&plan, &catalog, &rules, Los_Angeles);

        for i in 0..rules.len() {
            let mut edited = rules.clone();
            edited[i].enabled = false;
            let after = derive(&plan, &catalog, &edited, Los_Angeles);
            let expected: Vec<&Reminder> =
                before.iter().filter(|r| r.rule_id != rules[i].id).collect();
            assert_eq!(
                after.iter().collect::<Vec<_>>(),
                expected,
                "disabling {}",
                rules[i].id
            );
        }
    }

    const TAG_IDS: [&str; 3] = ["t0", "t1", "t2"];

    fn sample_recipes() -> Vec<Recipe> {
        vec![
            recipe("r0", "Salmon", &["t0"]),
            recipe("r1", "Chicken", &["t1", "t2"]),
            recipe("r2", "Tofu", &["t0", "t2"]),
            recipe("r3", "Soup", &[]),
        ]
    }

    fn arb_plan() -> impl Strategy<Value = Vec<Option<usize>>> {
        prop::collection::vec(prop::option::of(0..4usize), 7)
    }

    fn arb_rules() -> impl Strategy<Value = Vec<ActionRule>> {
        prop::collection::vec((0..3usize, -3..=0i32, any::<bool>()), 0..5).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (t, offset, enabled))| {
                    let mut rule = thaw_rule(&format!("rule{i}"), tag_target(TAG_IDS[t]), offset);
                    rule.enabled = enabled;
                    rule
                })
                .collect()
        })
    }

    fn build_plan(slots: &[Option<usize>]) -> WeeklyPlan {
        let week = date(2024, 3, 4);
        let days: Vec<(NaiveDate, String)> = slots
            .iter()
            .zip(week.iter_days())
            .filter_map(|(slot, d)| slot.map(|r| (d, format!("r{r}"))))
            .collect();
        let refs: Vec<(NaiveDate, &str)> = days.iter().map(|(d, r)| (*d, r.as_str())).collect();
        plan_on(week, &refs)
    }

    proptest! {
        #[test]
        fn prop_one_reminder_per_enabled_rule_and_matching_meal(
            slots in arb_plan(),
            rules in arb_rules(),
        ) {
            let tags: Vec<Tag> = TAG_IDS.iter().map(|t| tag(t)).collect();
            let recipes = sample_recipes();
            let catalog = Catalog::new(&recipes, &tags);
            let plan = build_plan(&slots);

            let expected: usize = rules
                .iter()
                .filter(|r| r.enabled)
                .map(|r| {
                    plan.entries()
                        .filter_map(|(_, e)| catalog.recipe(&e.recipe_id))
                        .filter(|rc| r.target.matches(rc))
                        .count()
                })
                .sum();
            let out = derive(&plan, &catalog, &rules, Los_Angeles);
            prop_assert_eq!(out.len(), expected);
            prop_assert!(out.windows(2).all(|w| w[0].fire_at <= w[1].fire_at));
        }

        #[test]
        fn prop_disabling_a_rule_removes_exactly_its_reminders(
            slots in arb_plan(),
            rules in arb_rules(),
            pick in any::<prop::sample::Index>(),
        ) {
            prop_assume!(!rules.is_empty());
            let tags: Vec<Tag> = TAG_IDS.iter().map(|t| tag(t)).collect();
            let recipes = sample_recipes();
            let catalog = Catalog::new(&recipes, &tags);
            let plan = build_plan(&slots);

            let target = pick.index(rules.len());
            let mut edited = rules.clone();
            edited[target].enabled = false;

            let before = derive(&plan, &catalog, &rules, Los_Angeles);
            let after = derive(&plan, &catalog, &edited, Los_Angeles);
            let expected: Vec<&Reminder> = before
                .iter()
                .filter(|r| r.rule_id != rules[target].id)
                .collect();
            prop_assert_eq!(after.iter().collect::<Vec<_>>(), expected);
        }
    }
}
