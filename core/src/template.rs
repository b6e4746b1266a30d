//! Placeholder substitution for reminder message templates.
//!
//! Recognized placeholders are `{meal_date}` (ISO date), `{recipe_title}` and
//! `{day_of_week}` (full English weekday name). Anything else in braces is
//! copied through unchanged, and substituted values are never re-scanned, so
//! rendering cannot fail and cannot loop.

use std::borrow::Cow;

use chrono::{Datelike, NaiveDate};

use crate::models::weekday_name;

pub const PLACEHOLDERS: [&str; 3] = ["meal_date", "recipe_title", "day_of_week"];

#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub meal_date: NaiveDate,
    pub recipe_title: &'a str,
}

impl<'a> TemplateContext<'a> {
    fn lookup(&self, name: &str) -> Option<Cow<'a, str>> {
        match name {
            "meal_date" => Some(Cow::Owned(self.meal_date.format("%Y-%m-%d").to_string())),
            "recipe_title" => Some(Cow::Borrowed(self.recipe_title)),
            "day_of_week" => Some(Cow::Borrowed(weekday_name(self.meal_date.weekday()))),
            _ => None,
        }
    }
}

#[must_use]
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        // A token runs to the first '}', unless another '{' starts first.
        match after.find(['{', '}']) {
            Some(close) if after.as_bytes()[close] == b'}' => {
                let name = &after[..close];
                if let Some(value) = ctx.lookup(name) {
                    out.push_str(&value);
                } else {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
