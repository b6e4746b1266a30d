use chrono::NaiveDate;

use crate::models::{
    Catalog, ConstraintRule, RuleKind, ValidationWarning, WarningKind, WeeklyPlan,
};

/// Check a week against its constraint rules.
///
/// Disabled rules are skipped. An enabled rule whose tag no longer exists
/// yields an `ORPHANED_RULE` warning instead of being evaluated. Planned
/// meals whose recipe has been deleted yield one `MISSING_RECIPE` advisory
/// each and never count toward any tag. The result is sorted by `rule_id`;
/// warnings sharing a `rule_id` keep their emission order.
#[must_use]
pub fn evaluate(
    plan: &WeeklyPlan,
    catalog: &Catalog<'_>,
    rules: &[ConstraintRule],
) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    for rule in rules.iter().filter(|r| r.enabled) {
        let Some(tag) = catalog.tag(&rule.tag_id) else {
            warnings.push(ValidationWarning::orphaned_tag(
                &rule.id,
                RuleKind::Constraint,
                &rule.tag_id,
            ));
            continue;
        };

        let dates: Vec<NaiveDate> = plan
            .entries()
            .filter(|(_, entry)| {
                catalog
                    .recipe(&entry.recipe_id)
                    .is_some_and(|recipe| recipe.has_tag(&rule.tag_id))
            })
            .map(|(date, _)| date)
            .collect();

        if dates.len() > rule.max_count as usize {
            warnings.push(ValidationWarning {
                rule_id: rule.id.clone(),
                kind: WarningKind::MaxMealsPerWeekByTag,
                message: format!(
                    "Tag '{}' planned {} times > max {}",
                    tag.name,
                    dates.len(),
                    rule.max_count
                ),
                details: serde_json::json!({
                    "tag_id": tag.id,
                    "tag_name": tag.name,
                    "max_count": rule.max_count,
                    "actual_count": dates.len(),
                    "dates": dates,
                }),
            });
        }
    }

    warnings.extend(
        plan.entries()
            .filter(|(_, entry)| catalog.recipe(&entry.recipe_id).is_none())
            .map(|(date, entry)| ValidationWarning::missing_recipe(date, &entry.recipe_id)),
    );

    warnings.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlanEntry, Recipe, Tag, TagType};
    use proptest::prelude::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn tag(id: &str, name: &str) -> Tag {
        Tag {
            id: id.to_string(),
            name: name.to_string(),
            tag_type: TagType::Protein,
            created_at: String::new(),
        }
    }

    fn recipe(id: &str, tags: &[&str]) -> Recipe {
        Recipe {
            id: id.to_string(),
            title: format!("Recipe {id}"),
            tag_ids: tags.iter().map(ToString::to_string).collect(),
            default_servings: 4,
            notes: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn limit(id: &str, tag_id: &str, max_count: u32) -> ConstraintRule {
        ConstraintRule {
            id: id.to_string(),
            tag_id: tag_id.to_string(),
            max_count,
            enabled: true,
        }
    }

    fn plan(days: &[(u32, &str)]) -> WeeklyPlan {
        let mut plan = WeeklyPlan::new(date(1)).unwrap();
        for (d, recipe_id) in days {
            plan.set(
                date(*d),
                PlanEntry {
                    recipe_id: (*recipe_id).to_string(),
                    servings: 2,
                },
            )
            .unwrap();
        }
        plan
    }

    #[test]
    fn test_over_limit_reports_dates() {
        let tags = vec![tag("t_fish", "fish")];
        let recipes = vec![recipe("r1", &["t_fish"])];
        let catalog = Catalog::new(&recipes, &tags);
        let week = plan(&[(1, "r1"), (3, "r1")]);

        let warnings = evaluate(&week, &catalog, &[limit("c1", "t_fish", 1)]);
        assert_eq!(warnings.len(), 1);
        let w = &warnings[0];
        assert_eq!(w.kind, WarningKind::MaxMealsPerWeekByTag);
        assert_eq!(w.rule_id, "c1");
        assert_eq!(w.message, "Tag 'fish' planned 2 times > max 1");
        assert_eq!(w.details["actual_count"], 2);
        assert_eq!(w.details["max_count"], 1);
        assert_eq!(
            w.details["dates"],
            serde_json::json!(["2024-01-01", "2024-01-03"])
        );
    }

    #[test]
    fn test_at_limit_is_clean() {
        let tags = vec![tag("t_fish", "fish")];
        let recipes = vec![recipe("r1", &["t_fish"]), recipe("r2", &[])];
        let catalog = Catalog::new(&recipes, &tags);
        let week = plan(&[(1, "r1"), (2, "r2"), (3, "r2")]);

        assert!(evaluate(&week, &catalog, &[limit("c1", "t_fish", 1)]).is_empty());
    }

    #[test]
    fn test_max_zero_forbids_tag() {
        let tags = vec![tag("t_pork", "pork")];
        let recipes = vec![recipe("r1", &["t_pork"])];
        let catalog = Catalog::new(&recipes, &tags);

        let warnings = evaluate(&plan(&[(7, "r1")]), &catalog, &[limit("c1", "t_pork", 0)]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].details["actual_count"], 1);
    }

    #[test]
    fn test_disabled_rule_is_silent() {
        let tags = vec![tag("t_fish", "fish")];
        let recipes = vec![recipe("r1", &["t_fish"])];
        let catalog = Catalog::new(&recipes, &tags);
        let mut rule = limit("c1", "t_fish", 0);
        rule.enabled = false;

        assert!(evaluate(&plan(&[(1, "r1")]), &catalog, &[rule]).is_empty());
    }

    #[test]
    fn test_orphaned_rule_warns_without_evaluating() {
        let tags = vec![];
        let recipes = vec![recipe("r1", &["t_gone"])];
        let catalog = Catalog::new(&recipes, &tags);

        let warnings = evaluate(
            &plan(&[(1, "r1"), (2, "r1")]),
            &catalog,
            &[limit("c1", "t_gone", 0)],
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::OrphanedRule);
        assert_eq!(warnings[0].details["tag_id"], "t_gone");
        assert_eq!(warnings[0].details["rule_kind"], "CONSTRAINT");
    }

    #[test]
    fn test_missing_recipe_never_counts() {
        let tags = vec![tag("t_fish", "fish")];
        let recipes = vec![recipe("r1", &["t_fish"])];
        let catalog = Catalog::new(&recipes, &tags);
        let week = plan(&[(1, "r1"), (2, "deleted")]);

        let warnings = evaluate(&week, &catalog, &[limit("c1", "t_fish", 1)]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::MissingRecipe);
        assert_eq!(warnings[0].rule_id, "system");
        assert_eq!(warnings[0].message, "Recipe missing for 2024-01-02; please reselect");
    }

    #[test]
    fn test_empty_plan_yields_nothing() {
        let tags = vec![tag("t_fish", "fish")];
        let recipes = vec![recipe("r1", &["t_fish"])];
        let catalog = Catalog::new(&recipes, &tags);

        assert!(evaluate(&plan(&[]), &catalog, &[limit("c1", "t_fish", 0)]).is_empty());
    }

    #[test]
    fn test_sorted_by_rule_id() {
        let tags = vec![tag("t_a", "a"), tag("t_b", "b")];
        let recipes = vec![recipe("r1", &["t_a", "t_b"])];
        let catalog = Catalog::new(&recipes, &tags);
        let rules = [
            limit("z_rule", "t_a", 0),
            limit("m_orphan", "t_gone", 0),
            limit("a_rule", "t_b", 0),
        ];

        let warnings = evaluate(&plan(&[(1, "r1")]), &catalog, &rules);
        let ids: Vec<&str> = warnings.iter().map(|w| w.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["a_rule", "m_orphan", "z_rule"]);
    }

    #[test]
    fn test_independent_of_rule_and_entry_order() {
        let tags = vec![tag("t_a", "a"), tag("t_b", "b")];
        let recipes = vec![recipe("r1", &["t_a"]), recipe("r2", &["t_a", "t_b"])];
        let catalog = Catalog::new(&recipes, &tags);
        let rules = vec![limit("c1", "t_a", 1), limit("c2", "t_b", 0)];
        let mut reversed = rules.clone();
        reversed.reverse();

        let forward = evaluate(&plan(&[(1, "r1"), (4, "r2")]), &catalog, &rules);
        let backward = evaluate(&plan(&[(4, "r2"), (1, "r1")]), &catalog, &reversed);
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 2);
    }

    #[test]
    fn test_max_count_boundary_sweep() {
        let tags = vec![tag("t_fish", "fish")];
        let recipes = vec![recipe("r1", &["t_fish"]), recipe("r2", &[])];
        let catalog = Catalog::new(&recipes, &tags);

        for max in 0..=6u32 {
            let rules = [limit("c1", "t_fish", max)];
            // `max` fish dinners, rest untagged
            let at: Vec<(u32, &str)> = (1..=7)
                .map(|d| (d, if d <= max { "r1" } else { "r2" }))
                .collect();
            assert!(evaluate(&plan(&at), &catalog, &rules).is_empty(), "max {max}");

            let over: Vec<(u32, &str)> = (1..=7)
                .map(|d| (d, if d <= max + 1 { "r1" } else { "r2" }))
                .collect();
            let warnings = evaluate(&plan(&over), &catalog, &rules);
            assert_eq!(warnings.len(), 1, "max {max}");
            assert_eq!(warnings[0].details["actual_count"], max + 1);
        }
    }

    #[test]
    fn test_disabling_one_rule_removes_only_its_warnings() {
        let tags = vec![tag("t_a", "a"), tag("t_b", "b")];
        let recipes = vec![recipe("r1", &["t_a", "t_b"]), recipe("r2", &["t_a"])];
        let catalog = Catalog::new(&recipes, &tags);
        let week = plan(&[(1, "r1"), (2, "r2"), (3, "r1"), (5, "gone")]);
        let rules = vec![
            limit("c1", "t_a", 1),
            limit("c2", "t_b", 0),
            limit("c3", "t_gone", 2),
        ];
        let before = evaluate(&week, &catalog, &rules);
        assert_eq!(before.len(), 4);

        for i in 0..rules.len() {
            let mut edited = rules.clone();
            edited[i].enabled = false;
            let after = evaluate(&week, &catalog, &edited);
            let expected: Vec<&ValidationWarning> =
                before.iter().filter(|w| w.rule_id != rules[i].id).collect();
            assert_eq!(after.iter().collect::<Vec<_>>(), expected);
        }
    }

    const TAG_IDS: [&str; 3] = ["t0", "t1", "t2"];

    fn sample_recipes() -> Vec<Recipe> {
        vec![
            recipe("r0", &["t0"]),
            recipe("r1", &["t1", "t2"]),
            recipe("r2", &["t0", "t2"]),
            recipe("r3", &[]),
        ]
    }

    /// Seven slots; index 4 names a recipe missing from the catalog.
    fn arb_slots() -> impl Strategy<Value = Vec<Option<usize>>> {
        prop::collection::vec(prop::option::of(0..5usize), 7)
    }

    fn plan_from_slots(slots: &[Option<usize>]) -> WeeklyPlan {
        let days: Vec<(u32, String)> = (1..=7)
            .zip(slots)
            .filter_map(|(d, slot)| slot.map(|r| (d, format!("r{r}"))))
            .collect();
        let refs: Vec<(u32, &str)> = days.iter().map(|(d, r)| (*d, r.as_str())).collect();
        plan(&refs)
    }

    fn arb_rules() -> impl Strategy<Value = Vec<ConstraintRule>> {
        prop::collection::vec((0..3usize, 0..=7u32, any::<bool>()), 0..5).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (t, max, enabled))| {
                    let mut rule = limit(&format!("c{i}"), TAG_IDS[t], max);
                    rule.enabled = enabled;
                    rule
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_violation_iff_count_exceeds_max(slots in arb_slots(), rules in arb_rules()) {
            let tags: Vec<Tag> = TAG_IDS.iter().map(|t| tag(t, t)).collect();
            let recipes = sample_recipes();
            let catalog = Catalog::new(&recipes, &tags);
            let week = plan_from_slots(&slots);
            let warnings = evaluate(&week, &catalog, &rules);

            for rule in &rules {
                let count = week
                    .entries()
                    .filter_map(|(_, e)| catalog.recipe(&e.recipe_id))
                    .filter(|r| r.has_tag(&rule.tag_id))
                    .count();
                let mine: Vec<&ValidationWarning> =
                    warnings.iter().filter(|w| w.rule_id == rule.id).collect();
                if rule.enabled && count > rule.max_count as usize {
                    prop_assert_eq!(mine.len(), 1);
                    prop_assert_eq!(mine[0].details["actual_count"].as_u64(), Some(count as u64));
                } else {
                    prop_assert!(mine.is_empty());
                }
            }

            let missing = slots.iter().filter(|s| **s == Some(4)).count();
            prop_assert_eq!(
                warnings.iter().filter(|w| w.kind == WarningKind::MissingRecipe).count(),
                missing
            );
            prop_assert!(warnings.windows(2).all(|w| w[0].rule_id <= w[1].rule_id));
        }

        #[test]
        fn prop_disabling_a_rule_removes_exactly_its_warnings(
            slots in arb_slots(),
            rules in arb_rules(),
            pick in any::<prop::sample::Index>(),
        ) {
            prop_assume!(!rules.is_empty());
            let tags: Vec<Tag> = TAG_IDS.iter().map(|t| tag(t, t)).collect();
            let recipes = sample_recipes();
            let catalog = Catalog::new(&recipes, &tags);
            let week = plan_from_slots(&slots);

            let target = pick.index(rules.len());
            let mut edited = rules.clone();
            edited[target].enabled = false;

            let before = evaluate(&week, &catalog, &rules);
            let after = evaluate(&week, &catalog, &edited);
            let expected: Vec<&ValidationWarning> = before
                .iter()
                .filter(|w| w.rule_id != rules[target].id)
                .collect();
            prop_assert_eq!(after.iter().collect::<Vec<_>>(), expected);
        }
    }
}
