//! Request bodies and query strings, and their validation into store types.
//!
//! Bodies arrive either as JSON or as URL-encoded HTML forms. Field values are
//! kept loose ([`FieldValue`]) so that validation happens inside the handler,
//! after the store connection has been acquired.

use axum::extract::{FromRequest, Request};
use axum::http::header::CONTENT_TYPE;
use axum::{Form, Json};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::store::{NewProduct, ProductChanges, ProductFilter};

use super::error::AppError;

/// JSON or URL-encoded body. A request without either content type yields `T::default()`.
#[derive(Debug)]
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if content_type.starts_with("application/json") {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
            return Ok(Self(value));
        }
        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
            return Ok(Self(value));
        }
        Ok(Self(T::default()))
    }
}

/// A submitted value: JSON numbers stay numbers, everything else is text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    fn is_blank(&self) -> bool {
        matches!(self, FieldValue::Text(text) if text.trim().is_empty())
    }

    fn text(&self) -> String {
        match self {
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(text) => text.trim().to_string(),
        }
    }

    fn integer(&self, field: &str) -> Result<i64, AppError> {
        let invalid = || AppError::Validation(format!("{field} must be an integer, got {}", self.text()));
        match self {
            FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Ok(*n as i64),
            FieldValue::Number(_) => Err(invalid()),
            FieldValue::Text(text) => text.trim().parse::<i64>().map_err(|_| invalid()),
        }
    }

    fn number(&self, field: &str) -> Result<f64, AppError> {
        let value = match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(text) => text.trim().parse::<f64>().ok(),
        };
        value
            .filter(|n| n.is_finite())
            .ok_or_else(|| AppError::Validation(format!("{field} must be a number, got {}", self.text())))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CredentialsForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductForm {
    #[serde(alias = "code")]
    pub codigo: Option<FieldValue>,
    #[serde(alias = "name")]
    pub nombre: Option<FieldValue>,
    #[serde(alias = "price")]
    pub precio: Option<FieldValue>,
    #[serde(alias = "category")]
    pub categoria: Option<FieldValue>,
    /// HTML forms can only POST; `_method` selects PATCH or DELETE.
    #[serde(rename = "_method")]
    pub method: Option<String>,
}

/// Method requested through the `_method` form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideMethod {
    Patch,
    Delete,
}

impl ProductForm {
    pub fn override_method(&self) -> Result<OverrideMethod, AppError> {
        let method = self.method.as_deref().map(str::trim).unwrap_or_default();
        if method.eq_ignore_ascii_case("patch") || method.eq_ignore_ascii_case("put") {
            Ok(OverrideMethod::Patch)
        } else if method.eq_ignore_ascii_case("delete") {
            Ok(OverrideMethod::Delete)
        } else {
            Err(AppError::Validation(format!(
                "unsupported _method {method:?}; expected PATCH or DELETE"
            )))
        }
    }

    /// Every field is required for a new product.
    pub fn into_new_product(self) -> Result<NewProduct, AppError> {
        let code = required(&self.codigo, "codigo")?.integer("codigo")?;
        let name = required(&self.nombre, "nombre")?.text();
        let price = required(&self.precio, "precio")?.number("precio")?;
        let category = required(&self.categoria, "categoria")?.text();
        Ok(NewProduct {
            code,
            name,
            price,
            category,
        })
    }

    /// Blank fields are left unchanged. At least one field must be supplied.
    pub fn into_changes(self) -> Result<ProductChanges, AppError> {
        let changes = ProductChanges {
            code: supplied(&self.codigo)
                .map(|v| v.integer("codigo"))
                .transpose()?,
            name: supplied(&self.nombre).map(FieldValue::text),
            price: supplied(&self.precio)
                .map(|v| v.number("precio"))
                .transpose()?,
            category: supplied(&self.categoria).map(FieldValue::text),
        };
        if changes.is_empty() {
            return Err(AppError::Validation(String::from(
                "no fields to update; supply codigo, nombre, precio or categoria",
            )));
        }
        Ok(changes)
    }
}

fn supplied(value: &Option<FieldValue>) -> Option<&FieldValue> {
    value.as_ref().filter(|v| !v.is_blank())
}

fn required<'a>(value: &'a Option<FieldValue>, field: &str) -> Result<&'a FieldValue, AppError> {
    supplied(value).ok_or_else(|| AppError::Validation(format!("{field} is required")))
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    pub id: Option<String>,
    #[serde(alias = "name")]
    pub nombre: Option<String>,
    /// Older search form: a numeric value is an id, anything else a name.
    #[serde(rename = "productNombre")]
    pub product_nombre: Option<String>,
}

impl FilterQuery {
    pub fn into_filter(self) -> Result<ProductFilter, AppError> {
        if let Some(id) = non_blank(self.id) {
            return parse_product_id(&id).map(ProductFilter::Id);
        }
        if let Some(name) = non_blank(self.nombre) {
            return Ok(ProductFilter::Name(name));
        }
        if let Some(value) = non_blank(self.product_nombre) {
            return Ok(match value.parse::<u64>() {
                Ok(id) if id > 0 => ProductFilter::Id(id),
                _ => ProductFilter::Name(value),
            });
        }
        Err(AppError::Validation(String::from(
            "a product id or product name is required",
        )))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Ids are positive integers. Anything else is rejected rather than defaulted.
pub fn parse_product_id(raw: &str) -> Result<u64, AppError> {
    match raw.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(AppError::Validation(format!("invalid product id: {raw}"))),
    }
}
