use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use serde_with::{DefaultOnNull, serde_as};
use thiserror::Error;

/// One order as the order-management backend hands it over. Immutable input.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub order_number: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub ship_to: ShipTo,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub items: Vec<LineItem>,
}

impl OrderRecord {
    pub fn order_id(&self) -> &str {
        self.order_number.trim()
    }

    pub fn customer(&self) -> &str {
        self.ship_to.name.trim()
    }
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShipTo {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub name: String,
}

/// Fields are decoded loosely so one wrong-typed value fails that item, not
/// the whole order list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Raw SKU; the backend sends `null` or `""` for items without one.
    #[serde(default)]
    pub sku: Option<TextField>,
    /// Item description as entered in the storefront.
    #[serde(default)]
    pub name: Option<TextField>,
    #[serde(default)]
    pub quantity: Option<QuantityField>,
    #[serde(default)]
    pub image_url: Option<TextField>,
}

impl LineItem {
    /// Raw SKU text, `""` when absent.
    pub fn raw_sku(&self) -> Result<&str, ItemFault> {
        match &self.sku {
            None => Ok(""),
            Some(field) => field.text("sku"),
        }
    }

    /// SKU as it arrived, for error reports.
    pub fn sku_label(&self) -> String {
        self.sku.as_ref().map(TextField::raw_text).unwrap_or_default()
    }

    pub fn quantity(&self) -> Result<u32, ItemFault> {
        self.quantity
            .as_ref()
            .ok_or(ItemFault::MissingQuantity)?
            .parse()
    }

    pub fn description(&self) -> Result<&str, ItemFault> {
        self.name
            .as_ref()
            .ok_or(ItemFault::MissingDescription)?
            .text("name")
    }

    pub fn image_ref(&self) -> Result<Option<String>, ItemFault> {
        let Some(field) = &self.image_url else {
            return Ok(None);
        };
        let url = field.text("imageUrl")?.trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextField {
    Text(String),
    Other(Value),
}

impl TextField {
    fn text(&self, field: &'static str) -> Result<&str, ItemFault> {
        match self {
            TextField::Text(text) => Ok(text),
            TextField::Other(value) => Err(ItemFault::InvalidField {
                field,
                raw: value.to_string(),
            }),
        }
    }

    fn raw_text(&self) -> String {
        match self {
            TextField::Text(text) => text.clone(),
            TextField::Other(value) => value.to_string(),
        }
    }
}

/// Quantities arrive as JSON numbers from some channels and as text from others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QuantityField {
    Number(Number),
    Text(String),
    Other(Value),
}

impl QuantityField {
    pub fn parse(&self) -> Result<u32, ItemFault> {
        let parsed = match self {
            QuantityField::Number(number) => number
                .as_u64()
                .and_then(|value| u32::try_from(value).ok()),
            QuantityField::Text(text) => text.trim().parse::<u32>().ok(),
            QuantityField::Other(_) => None,
        };
        parsed
            .filter(|value| *value > 0)
            .ok_or_else(|| ItemFault::InvalidQuantity {
                raw: self.raw_text(),
            })
    }

    fn raw_text(&self) -> String {
        match self {
            QuantityField::Number(number) => number.to_string(),
            QuantityField::Text(text) => text.clone(),
            QuantityField::Other(value) => value.to_string(),
        }
    }
}

/// Why a single line item could not be folded into the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemFault {
    #[error("missing quantity")]
    MissingQuantity,
    #[error("quantity `{raw}` is not a positive integer")]
    InvalidQuantity { raw: String },
    #[error("field `{field}` has unexpected value {raw}")]
    InvalidField { field: &'static str, raw: String },
    #[error("missing item description")]
    MissingDescription,
    #[error("item has neither a sku nor a description")]
    Unidentifiable,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
impl OrderRecord {
    pub fn sample(order_number: &str, customer: &str, items: Vec<LineItem>) -> Self {
        Self {
            order_number: order_number.to_string(),
            ship_to: ShipTo {
                name: customer.to_string(),
            },
            items,
        }
    }
}

#[cfg(test)]
impl LineItem {
    pub fn sample(sku: &str, name: &str, quantity: u32, image_url: &str) -> Self {
        Self {
            sku: Some(TextField::Text(sku.to_string())),
            name: Some(TextField::Text(name.to_string())),
            quantity: Some(QuantityField::Number(quantity.into())),
            image_url: Some(TextField::Text(image_url.to_string())),
        }
    }
}
