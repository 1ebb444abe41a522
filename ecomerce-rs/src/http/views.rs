//! HTML views rendered with askama templates from `templates/`.

use askama::Template;
use axum::response::Html;
use tracing::error;

use crate::store::Product;

use super::error::AppError;

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexView;

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginView {
    pub message: Option<String>,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterView {
    pub message: Option<String>,
}

#[derive(Template)]
#[template(path = "products.html")]
pub struct ProductsView {
    pub username: String,
    pub products: Vec<Product>,
}

#[derive(Template)]
#[template(path = "product.html")]
pub struct ProductView {
    pub product: Product,
}

#[derive(Template)]
#[template(path = "add_product.html")]
pub struct AddProductView;

#[derive(Template)]
#[template(path = "edit_product.html")]
pub struct EditProductView {
    pub product: Product,
}

pub fn render<T: Template>(view: &'static str, template: &T) -> Result<Html<String>, AppError> {
    template.render().map(Html).map_err(|err| {
        error!(view, error = %err, "view render failed");
        AppError::Render { view }
    })
}
