use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use mealprep_core::models::{
    Household, NewActionRule, NewRecipe, Recipe, Reminder, Rule, RuleTarget, Tag, TagType,
    UpdateRecipe, UpdateRule, UpdateTag, WeeklyPlan, parse_iso_date, parse_time_local,
    parse_timezone, parse_week_start, validate_max_count, validate_message_template,
    validate_name, validate_offset_days, validate_servings, validate_tag_ids,
};
use mealprep_core::service::PlannerService;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<PlannerService>>,
    api_key: Option<String>,
}

impl AppState {
    fn service(&self) -> MutexGuard<'_, PlannerService> {
        self.service.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// --- Request / Response types ---

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct UpdateHouseholdRequest {
    name: Option<String>,
    timezone: Option<String>,
}

#[derive(Deserialize)]
struct CreateTagRequest {
    name: String,
    #[serde(rename = "type", default = "default_tag_type")]
    tag_type: TagType,
}

fn default_tag_type() -> TagType {
    TagType::Other
}

#[derive(Deserialize)]
struct UpdateTagRequest {
    name: Option<String>,
    #[serde(rename = "type")]
    tag_type: Option<TagType>,
}

#[derive(Deserialize)]
struct CreateRecipeRequest {
    title: String,
    tag_ids: Vec<String>,
    #[serde(default = "default_servings")]
    default_servings: u32,
    notes: Option<String>,
}

fn default_servings() -> u32 {
    mealprep_core::models::DEFAULT_SERVINGS
}

#[derive(Deserialize)]
#[allow(clippy::option_option)]
struct UpdateRecipeRequest {
    title: Option<String>,
    tag_ids: Option<Vec<String>>,
    default_servings: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_some")]
    notes: Option<Option<String>>,
}

#[derive(Deserialize)]
struct CreateConstraintRuleRequest {
    tag_id: String,
    max_count: i64,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TargetType {
    Tag,
    Recipe,
}

#[derive(Deserialize)]
struct CreateActionRuleRequest {
    target_type: TargetType,
    tag_id: Option<String>,
    recipe_id: Option<String>,
    #[serde(default = "default_offset_days")]
    offset_days: i32,
    #[serde(default = "default_time_local")]
    time_local: String,
    #[serde(default = "default_message_template")]
    message_template: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_offset_days() -> i32 {
    -1
}

fn default_time_local() -> String {
    "10:00".to_string()
}

fn default_message_template() -> String {
    "Reminder for {recipe_title}".to_string()
}

#[derive(Deserialize)]
struct UpdateRuleRequest {
    enabled: Option<bool>,
    max_count: Option<i64>,
    offset_days: Option<i32>,
    time_local: Option<String>,
    message_template: Option<String>,
}

#[derive(Deserialize)]
struct PlanEntryRequest {
    date: String,
    recipe_id: String,
    servings: Option<u32>,
}

#[derive(Deserialize)]
struct EntryQuery {
    date: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct ValidationResponse {
    warnings: Vec<mealprep_core::models::ValidationWarning>,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn bad_request(err: anyhow::Error) -> ApiError {
    ApiError::BadRequest(format!("{err}"))
}

fn parse_week(week: &str) -> Result<NaiveDate, ApiError> {
    parse_week_start(week).map_err(bad_request)
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Household ---

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_household(State(state): State<AppState>) -> Result<Json<Household>, ApiError> {
    let household = state.service().household().context("database error")?;
    Ok(Json(household))
}

async fn update_household(
    State(state): State<AppState>,
    Json(req): Json<UpdateHouseholdRequest>,
) -> Result<Json<Household>, ApiError> {
    if let Some(name) = &req.name {
        validate_name("Household name", name).map_err(bad_request)?;
    }
    if let Some(tz) = &req.timezone {
        parse_timezone(tz).map_err(bad_request)?;
    }
    let household = state
        .service()
        .update_household(req.name.as_deref(), req.timezone.as_deref())
        .context("failed to update household")?;
    Ok(Json(household))
}

// --- Tags ---

async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>, ApiError> {
    let tags = state.service().list_tags().context("database error")?;
    Ok(Json(tags))
}

async fn tag_types() -> Json<Vec<&'static str>> {
    Json(TagType::ALL.iter().map(|t| t.as_str()).collect())
}

async fn create_tag(
    State(state): State<AppState>,
    Json(req): Json<CreateTagRequest>,
) -> Result<(StatusCode, Json<Tag>), ApiError> {
    let name = validate_name("Tag name", &req.name).map_err(bad_request)?;
    let svc = state.service();
    if svc.get_tag_by_name(&name).context("database error")?.is_some() {
        return Err(ApiError::BadRequest(format!("Tag '{name}' already exists")));
    }
    let tag = svc
        .create_tag(&name, req.tag_type)
        .context("failed to create tag")?;
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn update_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTagRequest>,
) -> Result<Json<Tag>, ApiError> {
    let svc = state.service();
    svc.get_tag(&id)
        .context("database error")?
        .ok_or_else(|| ApiError::NotFound(format!("Tag {id} not found")))?;

    let name = req
        .name
        .as_deref()
        .map(|n| validate_name("Tag name", n))
        .transpose()
        .map_err(bad_request)?;
    if let Some(name) = &name {
        if let Some(other) = svc.get_tag_by_name(name).context("database error")? {
            if other.id != id {
                return Err(ApiError::BadRequest(format!("Tag '{name}' already exists")));
            }
        }
    }

    let update = UpdateTag {
        name,
        tag_type: req.tag_type,
    };
    let tag = svc
        .update_tag(&id, &update)
        .context("failed to update tag")?
        .ok_or_else(|| ApiError::NotFound(format!("Tag {id} not found")))?;
    Ok(Json(tag))
}

async fn delete_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.service().delete_tag(&id).context("failed to delete tag")?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Tag {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// --- Recipes ---

fn check_recipe_tags(svc: &PlannerService, tag_ids: &[String]) -> Result<(), ApiError> {
    validate_tag_ids(tag_ids).map_err(bad_request)?;
    for tag_id in tag_ids {
        if svc.get_tag(tag_id).context("database error")?.is_none() {
            return Err(ApiError::BadRequest(format!("Tag {tag_id} not found")));
        }
    }
    Ok(())
}

async fn list_recipes(State(state): State<AppState>) -> Result<Json<Vec<Recipe>>, ApiError> {
    let recipes = state.service().list_recipes().context("database error")?;
    Ok(Json(recipes))
}

async fn create_recipe(
    State(state): State<AppState>,
    Json(req): Json<CreateRecipeRequest>,
) -> Result<(StatusCode, Json<Recipe>), ApiError> {
    let title = validate_name("Recipe title", &req.title).map_err(bad_request)?;
    validate_servings(req.default_servings).map_err(bad_request)?;

    let svc = state.service();
    check_recipe_tags(&svc, &req.tag_ids)?;
    let recipe = svc
        .create_recipe(&NewRecipe {
            title,
            tag_ids: req.tag_ids,
            default_servings: req.default_servings,
            notes: req.notes,
        })
        .context("failed to create recipe")?;
    Ok((StatusCode::CREATED, Json(recipe)))
}

async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Recipe>, ApiError> {
    let recipe = state
        .service()
        .get_recipe(&id)
        .context("database error")?
        .ok_or_else(|| ApiError::NotFound(format!("Recipe {id} not found")))?;
    Ok(Json(recipe))
}

async fn update_recipe(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRecipeRequest>,
) -> Result<Json<Recipe>, ApiError> {
    let svc = state.service();
    svc.get_recipe(&id)
        .context("database error")?
        .ok_or_else(|| ApiError::NotFound(format!("Recipe {id} not found")))?;

    let title = req
        .title
        .as_deref()
        .map(|t| validate_name("Recipe title", t))
        .transpose()
        .map_err(bad_request)?;
    if let Some(servings) = req.default_servings {
        validate_servings(servings).map_err(bad_request)?;
    }
    if let Some(tag_ids) = &req.tag_ids {
        check_recipe_tags(&svc, tag_ids)?;
    }

    let update = UpdateRecipe {
        title,
        tag_ids: req.tag_ids,
        default_servings: req.default_servings,
        notes: req.notes,
    };
    let recipe = svc
        .update_recipe(&id, &update)
        .context("failed to update recipe")?
        .ok_or_else(|| ApiError::NotFound(format!("Recipe {id} not found")))?;
    Ok(Json(recipe))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .service()
        .delete_recipe(&id)
        .context("failed to delete recipe")?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Recipe {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// --- Rules ---

async fn list_rules(State(state): State<AppState>) -> Result<Json<Vec<Rule>>, ApiError> {
    let rules = state.service().list_rules().context("database error")?;
    Ok(Json(rules))
}

async fn create_constraint_rule(
    State(state): State<AppState>,
    Json(req): Json<CreateConstraintRuleRequest>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
    let max_count = validate_max_count(req.max_count).map_err(bad_request)?;
    let svc = state.service();
    if svc.get_tag(&req.tag_id).context("database error")?.is_none() {
        return Err(ApiError::BadRequest(format!("Tag {} not found", req.tag_id)));
    }
    let rule = svc
        .create_limit_rule(&req.tag_id, max_count, req.enabled)
        .context("failed to create rule")?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn create_action_rule(
    State(state): State<AppState>,
    Json(req): Json<CreateActionRuleRequest>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
    validate_offset_days(req.offset_days).map_err(bad_request)?;
    let time_local = parse_time_local(&req.time_local).map_err(bad_request)?;
    validate_message_template(&req.message_template).map_err(bad_request)?;

    let svc = state.service();
    let target = match req.target_type {
        TargetType::Tag => {
            let tag_id = req
                .tag_id
                .ok_or_else(|| ApiError::BadRequest("tag_id is required".to_string()))?;
            if svc.get_tag(&tag_id).context("database error")?.is_none() {
                return Err(ApiError::BadRequest(format!("Tag {tag_id} not found")));
            }
            RuleTarget::Tag { tag_id }
        }
        TargetType::Recipe => {
            let recipe_id = req
                .recipe_id
                .ok_or_else(|| ApiError::BadRequest("recipe_id is required".to_string()))?;
            if svc.get_recipe(&recipe_id).context("database error")?.is_none() {
                return Err(ApiError::BadRequest(format!("Recipe {recipe_id} not found")));
            }
            RuleTarget::Recipe { recipe_id }
        }
    };

    let rule = svc
        .create_reminder_rule(&NewActionRule {
            target,
            offset_days: req.offset_days,
            time_local,
            message_template: req.message_template,
            enabled: req.enabled,
        })
        .context("failed to create rule")?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRuleRequest>,
) -> Result<Json<Rule>, ApiError> {
    let svc = state.service();
    let existing = svc
        .get_rule(&id)
        .context("database error")?
        .ok_or_else(|| ApiError::NotFound(format!("Rule {id} not found")))?;

    let action_fields =
        req.offset_days.is_some() || req.time_local.is_some() || req.message_template.is_some();
    match existing {
        Rule::Constraint(_) if action_fields => {
            return Err(ApiError::BadRequest(
                "offset_days, time_local and message_template apply to action rules only"
                    .to_string(),
            ));
        }
        Rule::Action(_) if req.max_count.is_some() => {
            return Err(ApiError::BadRequest(
                "max_count applies to constraint rules only".to_string(),
            ));
        }
        _ => {}
    }

    let max_count = req
        .max_count
        .map(validate_max_count)
        .transpose()
        .map_err(bad_request)?;
    if let Some(offset_days) = req.offset_days {
        validate_offset_days(offset_days).map_err(bad_request)?;
    }
    let time_local = req
        .time_local
        .as_deref()
        .map(parse_time_local)
        .transpose()
        .map_err(bad_request)?;
    if let Some(template) = &req.message_template {
        validate_message_template(template).map_err(bad_request)?;
    }

    let update = UpdateRule {
        enabled: req.enabled,
        max_count,
        offset_days: req.offset_days,
        time_local,
        message_template: req.message_template,
    };
    let rule = svc
        .update_rule(&id, &update)
        .context("failed to update rule")?
        .ok_or_else(|| ApiError::NotFound(format!("Rule {id} not found")))?;
    Ok(Json(rule))
}

async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.service().delete_rule(&id).context("failed to delete rule")?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Rule {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// --- Plans ---

async fn get_plan(
    State(state): State<AppState>,
    Path(week): Path<String>,
) -> Result<Json<WeeklyPlan>, ApiError> {
    let week = parse_week(&week)?;
    let plan = state.service().plan(week).context("database error")?;
    Ok(Json(plan))
}

async fn put_plan_entry(
    State(state): State<AppState>,
    Path(week): Path<String>,
    Json(req): Json<PlanEntryRequest>,
) -> Result<Json<WeeklyPlan>, ApiError> {
    let week = parse_week(&week)?;
    let date = parse_iso_date(&req.date).map_err(bad_request)?;
    if !WeeklyPlan::new(week).context("invalid week")?.contains(date) {
        return Err(ApiError::BadRequest(format!(
            "Date {date} is outside the week starting {week}"
        )));
    }
    if let Some(servings) = req.servings {
        validate_servings(servings).map_err(bad_request)?;
    }

    let svc = state.service();
    if svc.get_recipe(&req.recipe_id).context("database error")?.is_none() {
        return Err(ApiError::BadRequest(format!(
            "Recipe {} not found",
            req.recipe_id
        )));
    }
    let plan = svc
        .set_plan_entry(week, date, &req.recipe_id, req.servings)
        .context("failed to set plan entry")?;
    Ok(Json(plan))
}

async fn delete_plan_entry(
    State(state): State<AppState>,
    Path(week): Path<String>,
    Query(query): Query<EntryQuery>,
) -> Result<StatusCode, ApiError> {
    let week = parse_week(&week)?;
    let date = parse_iso_date(&query.date).map_err(bad_request)?;
    let cleared = state
        .service()
        .clear_plan_entry(week, date)
        .context("failed to clear plan entry")?;
    if !cleared {
        return Err(ApiError::NotFound(format!("No plan entry for {date}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn validate_plan(
    State(state): State<AppState>,
    Path(week): Path<String>,
) -> Result<Json<ValidationResponse>, ApiError> {
    let week = parse_week(&week)?;
    let warnings = state
        .service()
        .validate_week(week)
        .context("failed to validate week")?;
    Ok(Json(ValidationResponse { warnings }))
}

async fn plan_reminders(
    State(state): State<AppState>,
    Path(week): Path<String>,
) -> Result<Json<Vec<Reminder>>, ApiError> {
    let week = parse_week(&week)?;
    let reminders = state
        .service()
        .reminders_for_week(week)
        .context("failed to derive reminders")?;
    Ok(Json(reminders))
}

async fn export_plan(
    State(state): State<AppState>,
    Path(week): Path<String>,
) -> Result<Response, ApiError> {
    let week = parse_week(&week)?;
    let export = state
        .service()
        .export_week(week)
        .context("failed to export calendar")?;
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename={}",
        export.filename
    ))
    .context("invalid content disposition")?;
    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/calendar; charset=utf-8"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.content,
    )
        .into_response())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/household", get(get_household).patch(update_household))
        .route("/api/tags", get(list_tags).post(create_tag))
        .route("/api/tags/types", get(tag_types))
        .route("/api/tags/{id}", patch(update_tag).delete(delete_tag))
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/{id}",
            get(get_recipe).patch(update_recipe).delete(delete_recipe),
        )
        .route("/api/rules", get(list_rules))
        .route(
            "/api/rules/constraint/max_meals_per_week_by_tag",
            post(create_constraint_rule),
        )
        .route(
            "/api/rules/action/remind_offset_days_before_dinner",
            post(create_action_rule),
        )
        .route(
            "/api/rules/{id}",
            patch(update_rule).delete(delete_rule),
        )
        .route("/api/plans/{week}", get(get_plan))
        .route(
            "/api/plans/{week}/entry",
            put(put_plan_entry).delete(delete_plan_entry),
        )
        .route("/api/plans/{week}/validate", post(validate_plan))
        .route("/api/plans/{week}/reminders", get(plan_reminders))
        .route("/api/plans/{week}/export.ics", get(export_plan))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    service: PlannerService,
    port: u16,
    bind: &str,
    api_key: Option<String>,
    new_api_key: bool,
) -> anyhow::Result<()> {
    let household = service.household()?;
    let state = AppState {
        service: Arc::new(Mutex::new(service)),
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        if new_api_key {
            eprintln!("Generated new API key: {key}");
            eprintln!("Include in requests: Authorization: Bearer {key}");
        } else {
            info!(
                "API key: {}... (see api_key file in data directory)",
                key.get(..4).unwrap_or_default()
            );
        }
    } else {
        warn!("authentication disabled (--no-auth); the API is open to anyone");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        warn!(
            "listening on {bind} with no authentication; any device on your network can access this API"
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!(
        household = %household.id,
        timezone = %household.timezone,
        "listening on http://{bind}:{port}"
    );
    axum::serve(listener, app).await?;

    Ok(())
}
