use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use tower_governor::{
    governor::GovernorConfigBuilder,
    key_extractor::GlobalKeyExtractor,
    GovernorLayer,
};
use tracing::{debug, info, warn};

use crate::config::RateLimitConfig;
use crate::store::{Product, ProductFilter, StoreConnection};
use crate::users::User;

use super::auth::{removal_cookie, session_cookie, CurrentUser, SESSION_COOKIE};
use super::error::AppError;
use super::forms::{
    parse_product_id, CredentialsForm, FilterQuery, OverrideMethod, Payload, ProductForm,
};
use super::state::AppState;
use super::views::{
    render, AddProductView, EditProductView, IndexView, LoginView, ProductView, ProductsView,
    RegisterView,
};

pub fn router(state: AppState, rate_limit: RateLimitConfig) -> Router {
    let mut app = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/register", get(register_form).post(register))
        .route("/login", get(login_form).post(login))
        .route("/logout", get(logout))
        .route("/products", get(list_products))
        .route("/products/add", get(add_form).post(add_product))
        .route("/product/add", get(add_form))
        .route("/product/filterProducto", get(filter_product))
        .route("/products/edit/{id}", get(edit_form))
        .route(
            "/products/{id}",
            get(show_product)
                .patch(update_product)
                .delete(delete_product)
                .post(override_product),
        );

    let governor_conf = GovernorConfigBuilder::default()
        .per_millisecond(rate_limit.period_ms)
        .burst_size(rate_limit.burst)
        .key_extractor(GlobalKeyExtractor)
        .finish();
    match governor_conf {
        Some(conf) => app = app.layer(GovernorLayer::new(Arc::new(conf))),
        None => warn!(
            period_ms = rate_limit.period_ms,
            burst = rate_limit.burst,
            "invalid rate limit; requests are not rate limited"
        ),
    }

    app.layer(
        tower_http::request_id::SetRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
            tower_http::request_id::MakeRequestUuid,
        ),
    )
    .layer(tower_http::request_id::PropagateRequestIdLayer::new(
        axum::http::header::HeaderName::from_static("x-request-id"),
    ))
    .layer(tower_http::trace::TraceLayer::new_for_http())
    .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    pool_size: usize,
    connections_in_use: usize,
    checkouts: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.store.stats();
    Json(HealthResponse {
        status: "ok",
        pool_size: stats.pool_size,
        connections_in_use: stats.in_use,
        checkouts: stats.checkouts,
    })
}

async fn index() -> Result<Html<String>, AppError> {
    render("index", &IndexView)
}

async fn register_form() -> Result<Html<String>, AppError> {
    render("register", &RegisterView { message: None })
}

async fn register(
    State(state): State<AppState>,
    Payload(form): Payload<CredentialsForm>,
) -> Result<Response, AppError> {
    let user = User {
        username: form.username.unwrap_or_default(),
        password: form.password.unwrap_or_default(),
    };
    let username = user.username.clone();

    match state.users.insert(user) {
        Ok(()) => {
            info!(username = %username, users = state.users.count(), "user registered");
            let view = LoginView {
                message: Some(String::from("registration complete; please log in")),
            };
            Ok(render("login", &view)?.into_response())
        }
        Err(err) => {
            warn!(username = %username, error = %err, "registration rejected");
            let view = RegisterView {
                message: Some(err.to_string()),
            };
            Ok((StatusCode::BAD_REQUEST, render("register", &view)?).into_response())
        }
    }
}

async fn login_form() -> Result<Html<String>, AppError> {
    render("login", &LoginView { message: None })
}

/// On success the session is set and the product list is rendered straight away,
/// so a successful login also reads the whole collection. If that read fails the
/// new session is dropped and no cookie is sent.
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Payload(form): Payload<CredentialsForm>,
) -> Result<Response, AppError> {
    let username = form.username.unwrap_or_default();
    let password = form.password.unwrap_or_default();

    let Some(user) = state.users.find_by_credentials(&username, &password) else {
        warn!(username = %username, "login failed");
        let view = LoginView {
            message: Some(String::from("invalid username or password")),
        };
        return Ok((StatusCode::UNAUTHORIZED, render("login", &view)?).into_response());
    };

    if let Some(previous) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
        state.sessions.remove(&previous);
    }
    let token = state.sessions.create(user.clone());

    match products_page(&state, &user).await {
        Ok(page) => {
            info!(username = %user.username, "user logged in");
            let jar = jar.add(session_cookie(token, state.sessions.ttl()));
            Ok((jar, page).into_response())
        }
        Err(err) => {
            state.sessions.remove(&token);
            warn!(username = %user.username, error = %err, "login aborted; product list unavailable");
            Err(err)
        }
    }
}

async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, &'static str) {
    if let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
        if state.sessions.remove(&token) {
            info!("user logged out");
        }
    }
    (jar.remove(removal_cookie()), "logged out")
}

async fn list_products(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Html<String>, AppError> {
    products_page(&state, &user).await
}

async fn products_page(state: &AppState, user: &User) -> Result<Html<String>, AppError> {
    let conn = state.store.connect().await?;
    let result = conn.find_all().await;
    state.store.disconnect(conn);

    let products = result?;
    debug!(count = products.len(), "products listed");
    render(
        "products",
        &ProductsView {
            username: user.username.clone(),
            products,
        },
    )
}

async fn show_product(
    CurrentUser(_): CurrentUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Html<String>, AppError> {
    let conn = state.store.connect().await?;
    let result = find_by_id(&conn, &raw_id).await;
    state.store.disconnect(conn);

    render("product", &ProductView { product: result? })
}

async fn edit_form(
    CurrentUser(_): CurrentUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Html<String>, AppError> {
    let conn = state.store.connect().await?;
    let result = find_by_id(&conn, &raw_id).await;
    state.store.disconnect(conn);

    render("edit_product", &EditProductView { product: result? })
}

async fn find_by_id(conn: &StoreConnection, raw_id: &str) -> Result<Product, AppError> {
    let id = parse_product_id(raw_id)?;
    conn.find_one(&ProductFilter::Id(id))
        .await?
        .ok_or_else(|| AppError::product_not_found(id))
}

async fn filter_product(
    CurrentUser(_): CurrentUser,
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> Result<Html<String>, AppError> {
    let conn = state.store.connect().await?;
    let result = find_by_filter(&conn, query).await;
    state.store.disconnect(conn);

    render("product", &ProductView { product: result? })
}

async fn find_by_filter(conn: &StoreConnection, query: FilterQuery) -> Result<Product, AppError> {
    let filter = query.into_filter()?;
    conn.find_one(&filter)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no product found with {filter}")))
}

async fn add_form(CurrentUser(_): CurrentUser) -> Result<Html<String>, AppError> {
    render("add_product", &AddProductView)
}

async fn add_product(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Payload(form): Payload<ProductForm>,
) -> Result<Redirect, AppError> {
    let conn = state.store.connect().await?;
    let result = insert(&conn, form).await;
    state.store.disconnect(conn);

    let product = result?;
    info!(id = product.id, username = %user.username, "product added");
    Ok(Redirect::to(&format!("/products/{}", product.id)))
}

async fn insert(conn: &StoreConnection, form: ProductForm) -> Result<Product, AppError> {
    let product = form.into_new_product()?;
    Ok(conn.insert_one(product).await?)
}

async fn update_product(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Payload(form): Payload<ProductForm>,
) -> Result<Response, AppError> {
    update_flow(&state, &user, &raw_id, form).await
}

async fn delete_product(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    delete_flow(&state, &user, &raw_id).await
}

/// POST target of the HTML edit and delete forms.
async fn override_product(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Payload(form): Payload<ProductForm>,
) -> Result<Response, AppError> {
    match form.override_method()? {
        OverrideMethod::Patch => update_flow(&state, &user, &raw_id, form).await,
        OverrideMethod::Delete => delete_flow(&state, &user, &raw_id).await,
    }
}

async fn update_flow(
    state: &AppState,
    user: &User,
    raw_id: &str,
    form: ProductForm,
) -> Result<Response, AppError> {
    let conn = state.store.connect().await?;
    let result = update(&conn, raw_id, form).await;
    state.store.disconnect(conn);

    let product = result?;
    info!(id = product.id, username = %user.username, "product updated");
    Ok(render("product", &ProductView { product })?.into_response())
}

async fn update(conn: &StoreConnection, raw_id: &str, form: ProductForm) -> Result<Product, AppError> {
    let id = parse_product_id(raw_id)?;
    let changes = form.into_changes()?;
    match conn.update_one(id, &changes).await? {
        (outcome, Some(product)) if outcome.matched == 1 => Ok(product),
        _ => Err(AppError::product_not_found(id)),
    }
}

async fn delete_flow(state: &AppState, user: &User, raw_id: &str) -> Result<Response, AppError> {
    let conn = state.store.connect().await?;
    let result = delete(&conn, raw_id).await;
    state.store.disconnect(conn);

    let id = result?;
    info!(id, username = %user.username, "product deleted");
    Ok(Redirect::to("/products").into_response())
}

async fn delete(conn: &StoreConnection, raw_id: &str) -> Result<u64, AppError> {
    let id = parse_product_id(raw_id)?;
    let outcome = conn.delete_one(id).await?;
    if outcome.deleted == 0 {
        return Err(AppError::product_not_found(id));
    }
    Ok(id)
}
