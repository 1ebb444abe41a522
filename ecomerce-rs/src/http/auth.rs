use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{debug, warn};

use crate::users::User;

use super::state::AppState;
use super::views::{render, LoginView};

pub const SESSION_COOKIE: &str = "ecomerce.sid";

/// The authenticated user of the current request.
///
/// Extracting it is the route guard: without a live session the request stops
/// here and the login view is rendered, before any handler code runs.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[derive(Debug)]
pub struct LoginRequired;

impl IntoResponse for LoginRequired {
    fn into_response(self) -> Response {
        let view = LoginView {
            message: Some(String::from("please log in to continue")),
        };
        match render("login", &view) {
            Ok(page) => (StatusCode::UNAUTHORIZED, page).into_response(),
            Err(err) => err.into_response(),
        }
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = LoginRequired;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let user = jar
            .get(SESSION_COOKIE)
            .and_then(|cookie| state.sessions.get(cookie.value()));

        match user {
            Some(user) => {
                debug!(username = %user.username, "authorized request using session");
                Ok(Self(user))
            }
            None => {
                warn!(path = %parts.uri.path(), "unauthenticated request");
                Err(LoginRequired)
            }
        }
    }
}

pub fn session_cookie(token: String, ttl: Duration) -> Cookie<'static> {
    let max_age = cookie::time::Duration::try_from(ttl).unwrap_or(cookie::time::Duration::MAX);
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{session_cookie, SESSION_COOKIE};

    #[test]
    fn session_cookie_is_http_only_with_ttl() {
        let cookie = session_cookie(String::from("token"), Duration::from_secs(60));
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "token");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.max_age(), Some(cookie::time::Duration::seconds(60)));
        assert_eq!(cookie.path(), Some("/"));
    }
}
