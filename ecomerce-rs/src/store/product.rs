//! Product documents as stored in the `productos` collection.
//!
//! Documents keep the field names of the existing collection (`codigo`, `nombre`,
//! `precio`, `categoria`). The English names are accepted when reading.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    #[serde(rename = "codigo", alias = "code")]
    pub code: i64,
    #[serde(rename = "nombre", alias = "name")]
    pub name: String,
    #[serde(rename = "precio", alias = "price")]
    pub price: f64,
    #[serde(rename = "categoria", alias = "category")]
    pub category: String,
}

/// A product before the store has assigned its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    #[serde(rename = "codigo", alias = "code")]
    pub code: i64,
    #[serde(rename = "nombre", alias = "name")]
    pub name: String,
    #[serde(rename = "precio", alias = "price")]
    pub price: f64,
    #[serde(rename = "categoria", alias = "category")]
    pub category: String,
}

impl NewProduct {
    pub fn with_id(self, id: u64) -> Product {
        Product {
            id,
            code: self.code,
            name: self.name,
            price: self.price,
            category: self.category,
        }
    }
}

/// Field-wise `$set`: only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductChanges {
    pub code: Option<i64>,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub category: Option<String>,
}

impl ProductChanges {
    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.name.is_none() && self.price.is_none() && self.category.is_none()
    }

    /// Applies the changes and reports whether any field actually changed.
    pub fn apply_to(&self, product: &mut Product) -> bool {
        let before = product.clone();
        if let Some(code) = self.code {
            product.code = code;
        }
        if let Some(name) = &self.name {
            product.name.clone_from(name);
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(category) = &self.category {
            product.category.clone_from(category);
        }
        *product != before
    }
}

/// Single-document lookup criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductFilter {
    Id(u64),
    Name(String),
}

impl ProductFilter {
    pub fn matches(&self, product: &Product) -> bool {
        match self {
            ProductFilter::Id(id) => product.id == *id,
            ProductFilter::Name(name) => product.name == *name,
        }
    }
}

impl std::fmt::Display for ProductFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductFilter::Id(id) => write!(f, "id {id}"),
            ProductFilter::Name(name) => write!(f, "name {name}"),
        }
    }
}
