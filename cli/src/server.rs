use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

use recipebox_core::assistant::{ChatMessage, build_transcript};
use recipebox_core::models::{
    Ingredient, IngredientUpdate, NewRecipe, Recipe, RecipeDetail, RecipeFilter, UpdateRecipe,
    UsedIngredient, split_tags, validate_recipe_title,
};
use recipebox_core::service::{AssistantProvider, RecipeBoxService};
use recipebox_core::shopping::{AggregatedShoppingEntry, ShoppingListSelection};

const BODY_LIMIT: usize = 2 * 1024 * 1024; // 2 MB
const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<RecipeBoxService>>,
    sessions: Arc<Mutex<HashMap<String, ShoppingListSelection>>>,
    assistant: Arc<dyn AssistantProvider>,
    api_key: Option<String>,
}

impl AppState {
    fn service(&self) -> MutexGuard<'_, RecipeBoxService> {
        self.service.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, ShoppingListSelection>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct RecipeListQuery {
    tags: Option<String>,
    menu: Option<String>,
    section: Option<String>,
}

#[derive(Deserialize)]
struct CreateRecipeRequest {
    #[serde(flatten)]
    recipe: NewRecipe,
    #[serde(default)]
    ingredients: String,
}

#[derive(Deserialize)]
struct UpdateRecipeRequest {
    #[serde(flatten)]
    fields: UpdateRecipe,
    ingredients: Option<String>,
}

#[derive(Serialize)]
struct IngredientTextResponse {
    recipe_id: i64,
    ingredient_text: String,
}

#[derive(Serialize)]
struct ShoppingListResponse {
    session_id: String,
    selection: ShoppingListSelection,
    items: Vec<AggregatedShoppingEntry>,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type SessionResponse = ([(&'static str, String); 1], Json<ShoppingListResponse>);

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Upstream(anyhow::Error),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Upstream(err) => {
                tracing::warn!("assistant request failed: {err:#}");
                (
                    StatusCode::BAD_GATEWAY,
                    "Recipe assistant is unavailable".to_string(),
                )
            }
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
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

// --- Recipe handlers ---

async fn list_recipes(
    State(state): State<AppState>,
    Query(params): Query<RecipeListQuery>,
) -> Result<Json<Vec<Recipe>>, ApiError> {
    let filter = RecipeFilter {
        tags: params.tags.as_deref().map(split_tags).unwrap_or_default(),
        menu: params.menu.filter(|m| !m.is_empty()),
        section: params.section.filter(|s| !s.is_empty()),
    };
    let recipes = state
        .service()
        .list_recipes(&filter)
        .context("database error")?;
    Ok(Json(recipes))
}

async fn create_recipe(
    State(state): State<AppState>,
    Json(req): Json<CreateRecipeRequest>,
) -> Result<(StatusCode, Json<RecipeDetail>), ApiError> {
    validate_recipe_title(&req.recipe.title).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let svc = state.service();
    let recipe = svc
        .create_recipe(&req.recipe, &req.ingredients)
        .context("failed to create recipe")?;
    let detail = svc
        .get_recipe_detail(recipe.id)
        .context("failed to get recipe detail")?;
    Ok((StatusCode::CREATED, Json(detail)))
}

fn ensure_recipe(svc: &RecipeBoxService, id: i64) -> Result<(), ApiError> {
    if svc.db().recipe_exists(id).context("database error")? {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("Recipe {id} not found")))
    }
}

async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let svc = state.service();
    ensure_recipe(&svc, id)?;
    let detail = svc.get_recipe_detail(id).context("database error")?;
    Ok(Json(detail))
}

async fn update_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRecipeRequest>,
) -> Result<Json<RecipeDetail>, ApiError> {
    if req.fields.is_empty() && req.ingredients.is_none() {
        return Err(ApiError::BadRequest(
            "At least one field must be provided".to_string(),
        ));
    }
    if let Some(title) = &req.fields.title {
        validate_recipe_title(title).map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    }

    let svc = state.service();
    ensure_recipe(&svc, id)?;
    svc.update_recipe(id, &req.fields, req.ingredients.as_deref())
        .context("failed to update recipe")?;
    let detail = svc
        .get_recipe_detail(id)
        .context("failed to get recipe detail")?;
    Ok(Json(detail))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .service()
        .delete_recipe(id)
        .context("failed to delete recipe")?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Recipe {id} not found")))
    }
}

async fn get_recipe_ingredients(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<IngredientTextResponse>, ApiError> {
    let svc = state.service();
    ensure_recipe(&svc, id)?;
    let ingredient_text = svc.get_ingredient_text(id).context("database error")?;
    Ok(Json(IngredientTextResponse {
        recipe_id: id,
        ingredient_text,
    }))
}

async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let tags = state.service().list_tags().context("database error")?;
    Ok(Json(tags))
}

// --- Ingredient library handlers ---

async fn list_ingredients(
    State(state): State<AppState>,
) -> Result<Json<Vec<Ingredient>>, ApiError> {
    let ingredients = state
        .service()
        .list_ingredients()
        .context("database error")?;
    Ok(Json(ingredients))
}

async fn list_used_ingredients(
    State(state): State<AppState>,
) -> Result<Json<Vec<UsedIngredient>>, ApiError> {
    let used = state
        .service()
        .list_used_ingredients()
        .context("database error")?;
    Ok(Json(used))
}

async fn update_ingredients(
    State(state): State<AppState>,
    Json(updates): Json<Vec<IngredientUpdate>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = state
        .service()
        .update_ingredient_library(&updates)
        .context("failed to update ingredient library")?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

// --- Shopping list handlers ---

/// The caller's session id, or a freshly minted one when absent or malformed.
fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .map_or_else(|| Uuid::new_v4().to_string(), |id| id.to_string())
}

fn shopping_response(
    state: &AppState,
    session: String,
    selection: ShoppingListSelection,
) -> Result<SessionResponse, ApiError> {
    let items = state
        .service()
        .build_shopping_list(&selection)
        .context("failed to build shopping list")?;
    Ok((
        [(SESSION_HEADER, session.clone())],
        Json(ShoppingListResponse {
            session_id: session,
            selection,
            items,
        }),
    ))
}

fn not_selected(recipe_id: i64) -> ApiError {
    ApiError::NotFound(format!("Recipe {recipe_id} is not on the shopping list"))
}

/// A copy of the session's selection. Sessions whose selection is empty are dropped.
fn take_selection(
    sessions: &mut HashMap<String, ShoppingListSelection>,
    session: &str,
) -> ShoppingListSelection {
    let selection = sessions.get(session).cloned().unwrap_or_default();
    if selection.is_empty() {
        sessions.remove(session);
    }
    selection
}

async fn get_shopping_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<SessionResponse, ApiError> {
    let session = session_id(&headers);
    let selection = state.sessions().get(&session).cloned().unwrap_or_default();
    shopping_response(&state, session, selection)
}

async fn clear_shopping_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<SessionResponse, ApiError> {
    let session = session_id(&headers);
    state.sessions().remove(&session);
    shopping_response(&state, session, ShoppingListSelection::new())
}

async fn change_shopping_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((recipe_id, action)): Path<(i64, String)>,
) -> Result<SessionResponse, ApiError> {
    let session = session_id(&headers);

    if !matches!(action.as_str(), "add" | "increase" | "decrease") {
        return Err(ApiError::BadRequest(format!(
            "Unknown action '{action}'. Use add, increase or decrease"
        )));
    }
    if action == "add" {
        ensure_recipe(&state.service(), recipe_id)?;
    }

    let selection = {
        let mut sessions = state.sessions();
        let changed = match action.as_str() {
            "add" => Some(sessions.entry(session.clone()).or_default().add(recipe_id)),
            "increase" => sessions
                .get_mut(&session)
                .and_then(|selection| selection.increase(recipe_id)),
            _ => sessions
                .get_mut(&session)
                .and_then(|selection| selection.decrease(recipe_id)),
        };
        if changed.is_none() {
            return Err(not_selected(recipe_id));
        }
        take_selection(&mut sessions, &session)
    };

    shopping_response(&state, session, selection)
}

async fn remove_from_shopping_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(recipe_id): Path<i64>,
) -> Result<SessionResponse, ApiError> {
    let session = session_id(&headers);
    let selection = {
        let mut sessions = state.sessions();
        let removed = sessions
            .get_mut(&session)
            .is_some_and(|selection| selection.remove(recipe_id));
        if !removed {
            return Err(not_selected(recipe_id));
        }
        take_selection(&mut sessions, &session)
    };
    shopping_response(&state, session, selection)
}

// --- Assistant handler ---

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let transcript = build_transcript(&req.history, message);
    let assistant = Arc::clone(&state.assistant);
    let reply = tokio::task::spawn_blocking(move || assistant.reply(&transcript))
        .await
        .context("assistant task panicked")?
        .map_err(ApiError::Upstream)?;

    Ok(Json(ChatResponse { reply }))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/{id}",
            get(get_recipe).put(update_recipe).delete(delete_recipe),
        )
        .route("/api/recipes/{id}/ingredients", get(get_recipe_ingredients))
        .route("/api/tags", get(list_tags))
        .route(
            "/api/ingredients",
            get(list_ingredients).put(update_ingredients),
        )
        .route("/api/ingredients/used", get(list_used_ingredients))
        .route(
            "/api/shopping-list",
            get(get_shopping_list).delete(clear_shopping_list),
        )
        .route(
            "/api/shopping-list/{recipe_id}",
            delete(remove_from_shopping_list),
        )
        .route(
            "/api/shopping-list/{recipe_id}/{action}",
            post(change_shopping_list),
        )
        .route("/api/chat", post(chat))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server<A>(
    svc: RecipeBoxService,
    assistant: A,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()>
where
    A: AssistantProvider + 'static,
{
    let state = AppState {
        service: Arc::new(Mutex::new(svc)),
        sessions: Arc::new(Mutex::new(HashMap::new())),
        assistant: Arc::new(assistant),
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        let tail = key.len().saturating_sub(4);
        eprintln!(
            "API key: {}...{} (see api_key file in data directory)",
            key.get(..4).unwrap_or_default(),
            key.get(tail..).unwrap_or_default(),
        );
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    tracing::info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
