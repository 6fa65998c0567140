//! Ecommerce cart and order parameters
//!
//! Items are kept exactly as given; defaults (empty name and category, price
//! 0, quantity 1) are only filled in when an order or cart update is sent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::{format_number, number_value};
use crate::url::encode;

/// Most categories an item may carry
pub const MAX_CATEGORIES: usize = 5;

/// Reserved page-scope slots written by a product or category view
pub const CATEGORY_SLOT: i64 = 5;
pub const PRICE_SLOT: i64 = 2;
pub const SKU_SLOT: i64 = 3;
pub const NAME_SLOT: i64 = 4;

/// One category or a list of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Category {
    Single(String),
    List(Vec<String>),
}

impl Category {
    fn to_value(&self) -> Value {
        match self {
            Category::Single(name) => Value::String(name.clone()),
            Category::List(names) => Value::Array(
                names
                    .iter()
                    .take(MAX_CATEGORIES)
                    .map(|n| Value::String(n.clone()))
                    .collect(),
            ),
        }
    }

    /// Text stored in the category custom variable
    pub fn to_variable(&self) -> String {
        match self {
            Category::Single(name) => name.clone(),
            Category::List(_) => self.to_value().to_string(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Category::Single(name) => name.is_empty(),
            Category::List(names) => names.is_empty(),
        }
    }
}

/// A product in the cart or order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcommerceItem {
    pub sku: String,
    pub name: Option<String>,
    pub category: Option<Category>,
    pub price: Option<f64>,
    pub quantity: Option<f64>,
}

impl EcommerceItem {
    pub fn new(sku: &str) -> Self {
        Self {
            sku: sku.to_string(),
            name: None,
            category: None,
            price: None,
            quantity: None,
        }
    }

    /// `[sku, name, category, price, quantity]` with defaults applied
    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::String(self.sku.clone()),
            Value::String(self.name.clone().unwrap_or_default()),
            self.category
                .as_ref()
                .map(Category::to_value)
                .unwrap_or_else(|| Value::String(String::new())),
            number_value(self.price.unwrap_or(0.0)),
            number_value(self.quantity.unwrap_or(1.0)),
        ])
    }
}

/// Items keyed by SKU, in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    items: Vec<EcommerceItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item; an empty SKU is ignored and a known SKU is overwritten
    pub fn add(&mut self, item: EcommerceItem) {
        if item.sku.is_empty() {
            return;
        }
        match self.items.iter_mut().find(|i| i.sku == item.sku) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    pub fn items(&self) -> &[EcommerceItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// JSON array for `ec_items`
    pub fn items_json(&self) -> String {
        Value::Array(self.items.iter().map(EcommerceItem::to_value).collect()).to_string()
    }
}

/// Order totals. An empty id makes it a cart update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EcommerceOrder {
    pub id: String,
    pub grand_total: f64,
    pub sub_total: Option<f64>,
    pub tax: Option<f64>,
    pub shipping: Option<f64>,
    pub discount: Option<f64>,
}

impl EcommerceOrder {
    pub fn cart_update(grand_total: f64) -> Self {
        Self {
            grand_total,
            ..Self::default()
        }
    }

    /// Leading request parameters for this order and the cart contents
    pub fn to_params(&self, cart: &Cart) -> String {
        let mut params = String::from("idgoal=0");
        if !self.id.is_empty() {
            params.push_str("&ec_id=");
            params.push_str(&encode(&self.id));
        }
        params.push_str("&revenue=");
        params.push_str(&format_number(self.grand_total));

        for (key, amount) in [
            ("ec_st", self.sub_total),
            ("ec_tx", self.tax),
            ("ec_sh", self.shipping),
            ("ec_dt", self.discount),
        ] {
            if let Some(amount) = amount {
                params.push_str(&format!("&{key}={}", format_number(amount)));
            }
        }

        params.push_str("&ec_items=");
        params.push_str(&encode(&cart.items_json()));
        params
    }
}

/// Page-scope custom variables for a product or category page view.
///
/// A category page (no SKU and no name) only records category and price.
pub fn product_view_variables(
    sku: Option<&str>,
    name: Option<&str>,
    category: Option<&Category>,
    price: Option<f64>,
) -> Vec<(i64, &'static str, String)> {
    let mut slots = Vec::new();

    let category = category
        .filter(|c| !c.is_empty())
        .map(Category::to_variable)
        .unwrap_or_default();
    slots.push((CATEGORY_SLOT, "_pkc", category));

    if let Some(price) = price {
        slots.push((PRICE_SLOT, "_pkp", format_number(price)));
    }

    let sku = sku.filter(|s| !s.is_empty());
    let name = name.filter(|n| !n.is_empty());
    if sku.is_none() && name.is_none() {
        return slots;
    }

    if let Some(sku) = sku {
        slots.push((SKU_SLOT, "_pks", sku.to_string()));
    }
    slots.push((NAME_SLOT, "_pkn", name.unwrap_or_default().to_string()));
    slots
}
