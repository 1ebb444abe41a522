#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::module_inception)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use cookie::Cookie;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    use crate::config::RateLimitConfig;
    use crate::store::{Collection, NewProduct, Product, ProductFilter, StoreGateway};
    use crate::users::{InMemoryUsers, User};

    use crate::http::auth::SESSION_COOKIE;
    use crate::http::{router, AppState, SessionStore};

    fn test_app_state(collection: Collection, pool_size: usize, ttl: Duration) -> AppState {
        AppState {
            users: Arc::new(InMemoryUsers::new()),
            sessions: SessionStore::new(ttl),
            store: StoreGateway::new(collection, pool_size, Duration::from_millis(50)),
        }
    }

    fn default_state() -> AppState {
        test_app_state(
            Collection::in_memory("Ecomerce", "productos"),
            4,
            Duration::from_secs(60),
        )
    }

    fn test_server(state: AppState) -> Result<TestServer> {
        Ok(TestServer::new(router(state, RateLimitConfig::default()))?)
    }

    fn arroz() -> NewProduct {
        NewProduct {
            code: 1001,
            name: String::from("Arroz"),
            price: 1.25,
            category: String::from("almacen"),
        }
    }

    /// Session cookie for a user, created without going through the store.
    fn session_for(state: &AppState) -> Cookie<'static> {
        let token = state.sessions.create(User {
            username: String::from("tester"),
            password: String::from("secret"),
        });
        Cookie::new(SESSION_COOKIE, token)
    }

    #[tokio::test]
    async fn register_then_login_renders_product_list() -> Result<()> {
        let state = default_state();
        state.store.seed(vec![arroz()]).await?;
        let server = test_server(state)?;

        let registered = server
            .post("/register")
            .form(&json!({ "username": "a", "password": "b" }))
            .await;
        assert_eq!(registered.status_code(), StatusCode::OK);
        assert!(registered.text().contains("action=\"/login\""));

        let logged_in = server
            .post("/login")
            .form(&json!({ "username": "a", "password": "b" }))
            .await;
        assert_eq!(logged_in.status_code(), StatusCode::OK);
        assert!(logged_in.text().contains("Arroz"));

        let session = logged_in.cookie(SESSION_COOKIE);
        assert!(!session.value().is_empty());

        let listed = server.get("/products").add_cookie(session).await;
        assert_eq!(listed.status_code(), StatusCode::OK);
        assert!(listed.text().contains("Arroz"));
        Ok(())
    }

    #[tokio::test]
    async fn login_accepts_json_bodies() -> Result<()> {
        let server = test_server(default_state())?;
        server
            .post("/register")
            .json(&json!({ "username": "a", "password": "b" }))
            .await;

        let response = server
            .post("/login")
            .json(&json!({ "username": "a", "password": "b" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert!(response.maybe_cookie(SESSION_COOKIE).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn login_with_wrong_password_rerenders_login() -> Result<()> {
        let server = test_server(default_state())?;
        server
            .post("/register")
            .form(&json!({ "username": "a", "password": "b" }))
            .await;

        let response = server
            .post("/login")
            .form(&json!({ "username": "a", "password": "nope" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert!(response.text().contains("invalid username or password"));
        assert!(response.maybe_cookie(SESSION_COOKIE).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() -> Result<()> {
        let server = test_server(default_state())?;
        let form = json!({ "username": "a", "password": "b" });
        server.post("/register").form(&form).await;

        let again = server.post("/register").form(&form).await;
        assert_eq!(again.status_code(), StatusCode::BAD_REQUEST);
        assert!(again.text().contains("already registered"));
        Ok(())
    }

    #[tokio::test]
    async fn unauthenticated_requests_never_reach_the_store() -> Result<()> {
        let state = default_state();
        let store = state.store.clone();
        let server = test_server(state)?;

        let responses = vec![
            server.get("/products").await,
            server.get("/products/1").await,
            server.get("/products/edit/1").await,
            server.get("/products/add").await,
            server.get("/product/filterProducto?nombre=Arroz").await,
            server
                .post("/products/add")
                .form(&json!({ "codigo": "1", "nombre": "x", "precio": "1", "categoria": "y" }))
                .await,
            server
                .patch("/products/1")
                .json(&json!({ "nombre": "x" }))
                .await,
            server.delete("/products/1").await,
            server
                .post("/products/1")
                .form(&json!({ "_method": "DELETE" }))
                .await,
        ];

        for response in responses {
            assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
            assert!(response.text().contains("action=\"/login\""));
        }
        assert_eq!(store.stats().checkouts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_product_is_404_with_id() -> Result<()> {
        let state = default_state();
        let store = state.store.clone();
        let session = session_for(&state);
        let server = test_server(state)?;

        let response = server.get("/products/999999").add_cookie(session).await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        assert!(response.text().contains("999999"));
        assert_eq!(store.stats().checkouts, 1);
        assert_eq!(store.stats().in_use, 0);
        Ok(())
    }

    #[tokio::test]
    async fn unparseable_id_is_rejected_not_defaulted() -> Result<()> {
        let state = default_state();
        state.store.seed(vec![arroz()]).await?;
        let session = session_for(&state);
        let server = test_server(state)?;

        let response = server.get("/products/abc").add_cookie(session).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert!(response.text().contains("abc"));
        Ok(())
    }

    #[tokio::test]
    async fn inserted_product_round_trips() -> Result<()> {
        let state = default_state();
        let store = state.store.clone();
        let session = session_for(&state);
        let server = test_server(state)?;

        let created = server
            .post("/products/add")
            .add_cookie(session.clone())
            .form(&json!({
                "codigo": "1001",
                "nombre": "Arroz",
                "precio": "1.25",
                "categoria": "almacen"
            }))
            .await;
        assert_eq!(created.status_code(), StatusCode::SEE_OTHER);
        let location = created.header("location").to_str()?.to_string();
        let id: u64 = location.trim_start_matches("/products/").parse()?;

        let shown = server.get(&location).add_cookie(session).await;
        assert_eq!(shown.status_code(), StatusCode::OK);
        assert!(shown.text().contains("Arroz"));

        let conn = store.connect().await?;
        let stored = conn.find_one(&ProductFilter::Id(id)).await?;
        store.disconnect(conn);
        assert_eq!(stored, Some(arroz().with_id(id)));
        Ok(())
    }

    #[tokio::test]
    async fn add_product_requires_all_fields() -> Result<()> {
        let state = default_state();
        let store = state.store.clone();
        let session = session_for(&state);
        let server = test_server(state)?;

        let response = server
            .post("/products/add")
            .add_cookie(session)
            .json(&json!({ "codigo": 5, "nombre": "Sal" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert!(response.text().contains("precio"));
        assert_eq!(store.stats().in_use, 0);
        Ok(())
    }

    #[tokio::test]
    async fn delete_then_fetch_is_404() -> Result<()> {
        let state = default_state();
        let store = state.store.clone();
        state.store.seed(vec![arroz()]).await?;
        let session = session_for(&state);
        let server = test_server(state)?;

        let deleted = server.delete("/products/1").add_cookie(session.clone()).await;
        assert_eq!(deleted.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(deleted.header("location"), "/products");

        let fetched = server.get("/products/1").add_cookie(session.clone()).await;
        assert_eq!(fetched.status_code(), StatusCode::NOT_FOUND);

        let again = server.delete("/products/1").add_cookie(session).await;
        assert_eq!(again.status_code(), StatusCode::NOT_FOUND);
        assert!(again.text().contains('1'));
        assert_eq!(store.stats().in_use, 0);
        Ok(())
    }

    #[tokio::test]
    async fn patch_sets_only_supplied_fields() -> Result<()> {
        let state = default_state();
        let store = state.store.clone();
        state.store.seed(vec![arroz()]).await?;
        let session = session_for(&state);
        let server = test_server(state)?;

        let updated = server
            .patch("/products/1")
            .add_cookie(session.clone())
            .json(&json!({ "precio": 3.5 }))
            .await;
        assert_eq!(updated.status_code(), StatusCode::OK);
        assert!(updated.text().contains("3.5"));

        let conn = store.connect().await?;
        let stored = conn.find_one(&ProductFilter::Id(1)).await?;
        store.disconnect(conn);
        assert_eq!(
            stored,
            Some(Product {
                price: 3.5,
                ..arroz().with_id(1)
            })
        );

        let missing = server
            .patch("/products/77")
            .add_cookie(session.clone())
            .json(&json!({ "precio": 3.5 }))
            .await;
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert!(missing.text().contains("77"));

        let empty = server
            .patch("/products/1")
            .add_cookie(session)
            .json(&json!({}))
            .await;
        assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn html_forms_use_method_override() -> Result<()> {
        let state = default_state();
        state.store.seed(vec![arroz()]).await?;
        let session = session_for(&state);
        let server = test_server(state)?;

        let edited = server
            .post("/products/1")
            .add_cookie(session.clone())
            .form(&json!({
                "_method": "PATCH",
                "codigo": "1001",
                "nombre": "Arroz largo fino",
                "precio": "",
                "categoria": "almacen"
            }))
            .await;
        assert_eq!(edited.status_code(), StatusCode::OK);
        assert!(edited.text().contains("Arroz largo fino"));

        let deleted = server
            .post("/products/1")
            .add_cookie(session.clone())
            .form(&json!({ "_method": "DELETE" }))
            .await;
        assert_eq!(deleted.status_code(), StatusCode::SEE_OTHER);

        let unsupported = server
            .post("/products/1")
            .add_cookie(session)
            .form(&json!({ "_method": "PUT_ALL" }))
            .await;
        assert_eq!(unsupported.status_code(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn edit_form_is_prefilled() -> Result<()> {
        let state = default_state();
        state.store.seed(vec![arroz()]).await?;
        let session = session_for(&state);
        let server = test_server(state)?;

        let response = server.get("/products/edit/1").add_cookie(session.clone()).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.text();
        assert!(body.contains("value=\"Arroz\""));
        assert!(body.contains("value=\"PATCH\""));

        let missing = server.get("/products/edit/5").add_cookie(session).await;
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn add_form_renders_without_store_access() -> Result<()> {
        let state = default_state();
        let store = state.store.clone();
        let session = session_for(&state);
        let server = test_server(state)?;

        for path in ["/products/add", "/product/add"] {
            let response = server.get(path).add_cookie(session.clone()).await;
            assert_eq!(response.status_code(), StatusCode::OK);
            assert!(response.text().contains("name=\"codigo\""));
        }
        assert_eq!(store.stats().checkouts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn filter_finds_by_id_or_name() -> Result<()> {
        let state = default_state();
        state.store.seed(vec![arroz()]).await?;
        let session = session_for(&state);
        let server = test_server(state)?;

        let by_name = server
            .get("/product/filterProducto?nombre=Arroz")
            .add_cookie(session.clone())
            .await;
        assert_eq!(by_name.status_code(), StatusCode::OK);
        assert!(by_name.text().contains("almacen"));

        let legacy = server
            .get("/product/filterProducto?productNombre=1")
            .add_cookie(session.clone())
            .await;
        assert_eq!(legacy.status_code(), StatusCode::OK);

        let missing = server
            .get("/product/filterProducto?productNombre=Fideos")
            .add_cookie(session.clone())
            .await;
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert!(missing.text().contains("Fideos"));

        let neither = server
            .get("/product/filterProducto")
            .add_cookie(session)
            .await;
        assert_eq!(neither.status_code(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn login_without_store_connection_sets_no_session() -> Result<()> {
        let state = test_app_state(
            Collection::in_memory("Ecomerce", "productos"),
            0,
            Duration::from_secs(60),
        );
        let sessions = state.sessions.clone();
        let server = test_server(state)?;

        server
            .post("/register")
            .form(&json!({ "username": "a", "password": "b" }))
            .await;
        let response = server
            .post("/login")
            .form(&json!({ "username": "a", "password": "b" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.text().contains("could not connect"));
        assert!(response.maybe_cookie(SESSION_COOKIE).is_none());
        assert_eq!(sessions.len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn connection_failure_is_500_and_skips_operation() -> Result<()> {
        let state = test_app_state(
            Collection::in_memory("Ecomerce", "productos"),
            0,
            Duration::from_secs(60),
        );
        let session = session_for(&state);
        let server = test_server(state)?;

        let response = server.get("/products").add_cookie(session.clone()).await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.text().contains("could not connect"));

        let invalid_id = server.get("/products/abc").add_cookie(session).await;
        assert_eq!(invalid_id.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        Ok(())
    }

    #[tokio::test]
    async fn operation_failure_is_500_and_releases_connection() -> Result<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file in the way")?;
        let collection =
            Collection::open_snapshot("Ecomerce", "productos", &blocker.join("productos.json"))?;

        let state = test_app_state(collection, 1, Duration::from_secs(60));
        let store = state.store.clone();
        let session = session_for(&state);
        let server = test_server(state)?;

        let response = server
            .post("/products/add")
            .add_cookie(session.clone())
            .form(&json!({
                "codigo": "1",
                "nombre": "Sal",
                "precio": "0.5",
                "categoria": "almacen"
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.text().contains("insertOne"));
        assert_eq!(store.stats().in_use, 0);

        // The single pooled connection is available again.
        let listed = server.get("/products").add_cookie(session).await;
        assert_eq!(listed.status_code(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_inserts_get_unique_ids() -> Result<()> {
        let state = default_state();
        let store = state.store.clone();
        let session = session_for(&state);
        let server = test_server(state)?;

        let requests = (0..20).map(|i| {
            let request = server
                .post("/products/add")
                .add_cookie(session.clone())
                .json(&json!({
                    "codigo": i,
                    "nombre": format!("producto {i}"),
                    "precio": 10,
                    "categoria": "varios"
                }));
            async move { request.await }
        });
        let responses = futures_util::future::join_all(requests).await;

        let mut locations = HashSet::new();
        for response in &responses {
            assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
            locations.insert(response.header("location").to_str()?.to_string());
        }
        assert_eq!(locations.len(), 20);
        assert_eq!(store.stats().in_use, 0);
        Ok(())
    }

    #[tokio::test]
    async fn logout_destroys_session() -> Result<()> {
        let state = default_state();
        let session = session_for(&state);
        let server = test_server(state)?;

        let before = server.get("/products").add_cookie(session.clone()).await;
        assert_eq!(before.status_code(), StatusCode::OK);

        let logout = server.get("/logout").add_cookie(session.clone()).await;
        assert_eq!(logout.status_code(), StatusCode::OK);
        assert_eq!(logout.text(), "logged out");

        let after = server.get("/products").add_cookie(session).await;
        assert_eq!(after.status_code(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn expired_session_is_treated_as_anonymous() -> Result<()> {
        let state = test_app_state(
            Collection::in_memory("Ecomerce", "productos"),
            2,
            Duration::ZERO,
        );
        let session = session_for(&state);
        let server = test_server(state)?;

        let response = server.get("/products").add_cookie(session).await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn public_pages_render() -> Result<()> {
        let server = test_server(default_state())?;
        for path in ["/", "/login", "/register"] {
            let response = server.get(path).await;
            assert_eq!(response.status_code(), StatusCode::OK, "{path}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn health_reports_pool_usage() -> Result<()> {
        let server = test_server(default_state())?;
        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body.get("status"), Some(&Value::String("ok".into())));
        assert_eq!(body.get("pool_size"), Some(&Value::Number(4_u64.into())));
        assert_eq!(
            body.get("connections_in_use"),
            Some(&Value::Number(0_u64.into()))
        );
        assert_eq!(body.get("checkouts"), Some(&Value::Number(0_u64.into())));
        Ok(())
    }
}
