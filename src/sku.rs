use serde::Serialize;
use std::{collections::HashMap, fmt};

/// Display SKU after legacy rewrites and description fallback.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CanonicalSku(String);

impl CanonicalSku {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn shape(&self) -> SkuShape<'_> {
        SkuShape::parse(&self.0)
    }
}

impl fmt::Display for CanonicalSku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CanonicalSku {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SkuNormalizer {
    rewrites: HashMap<String, String>,
    opaque_prefixes: Vec<String>,
}

impl SkuNormalizer {
    pub fn new(rewrites: HashMap<String, String>, opaque_prefixes: Vec<String>) -> Self {
        Self {
            rewrites,
            opaque_prefixes,
        }
    }

    /// Rewrite legacy SKUs, then fall back to the description for
    /// auto-generated or missing SKUs.
    pub fn normalize(&self, raw_sku: &str, description: &str) -> CanonicalSku {
        let sku = self
            .rewrites
            .get(raw_sku)
            .map(String::as_str)
            .unwrap_or(raw_sku);

        if sku.is_empty() || self.is_opaque(sku) {
            CanonicalSku(description.to_string())
        } else {
            CanonicalSku(sku.to_string())
        }
    }

    fn is_opaque(&self, sku: &str) -> bool {
        self.opaque_prefixes
            .iter()
            .any(|prefix| sku.starts_with(prefix.as_str()))
    }
}

/// How a canonical SKU reads for pick-list grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkuShape<'a> {
    /// `BRAND-STYLE-SIZE` with a numeric style.
    Structured {
        brand: &'a str,
        style: &'a str,
        size: &'a str,
    },
    /// Anything else; the text itself is the pick-list line.
    Fallback(&'a str),
}

impl<'a> SkuShape<'a> {
    pub fn parse(sku: &'a str) -> Self {
        let mut parts = sku.split('-');
        let (Some(brand), Some(style), Some(size), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return SkuShape::Fallback(sku);
        };
        let numeric_style = !style.is_empty() && style.bytes().all(|b| b.is_ascii_digit());
        if brand.is_empty() || size.is_empty() || !numeric_style {
            return SkuShape::Fallback(sku);
        }
        SkuShape::Structured { brand, style, size }
    }

    /// `brand-style` for structured SKUs.
    pub fn style_key(&self) -> Option<String> {
        match self {
            SkuShape::Structured { brand, style, .. } => Some(format!("{brand}-{style}")),
            SkuShape::Fallback(_) => None,
        }
    }
}
