use anyhow::Result;

use mealprep_core::service::PlannerService;

pub(crate) fn cmd_household_show(svc: &PlannerService, json: bool) -> Result<()> {
    let household = svc.household()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&household)?);
    } else {
        println!("Household: {} ({})", household.name, household.id);
        println!("Time zone: {}", household.timezone);
    }
    Ok(())
}

pub(crate) fn cmd_household_timezone(svc: &PlannerService, zone: &str, json: bool) -> Result<()> {
    let household = svc.update_household(None, Some(zone))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&household)?);
    } else {
        println!(
            "Time zone for {} set to {}",
            household.name, household.timezone
        );
    }
    Ok(())
}
