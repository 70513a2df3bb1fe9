use crate::ingest::AggregatedItem;
use crate::sizes::SizeTaxonomy;
use crate::sku::{CanonicalSku, SkuShape};
use serde::Serialize;
use std::{collections::BTreeMap, collections::HashMap, fmt};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatEntry {
    pub sku: CanonicalSku,
    pub quantity: u64,
    pub image_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeEntry {
    pub size: String,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PickListEntry {
    Group { style: String, sizes: Vec<SizeEntry> },
    Single { name: String, quantity: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsolidateError {
    #[error("sku {sku}: size `{size}` is not in the size taxonomy")]
    UnknownSize { sku: String, size: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Consolidated {
    /// Every SKU once, ascending by SKU text.
    pub flat: Vec<FlatEntry>,
    pub pick_list: Vec<PickListEntry>,
    /// Sizes outside the taxonomy; those entries are still emitted at the
    /// tail of their group.
    pub errors: Vec<ConsolidateError>,
}

/// Appends ` (q)` only when more than one unit is needed.
pub fn with_quantity(name: &str, quantity: u64) -> String {
    if quantity == 1 {
        name.to_string()
    } else {
        format!("{name} ({quantity})")
    }
}

impl fmt::Display for SizeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&with_quantity(&self.size, self.quantity))
    }
}

impl fmt::Display for PickListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PickListEntry::Group { style, sizes } => {
                let sizes: Vec<String> = sizes.iter().map(SizeEntry::to_string).collect();
                write!(f, "{style} -> {}", sizes.join(", "))
            }
            PickListEntry::Single { name, quantity } => {
                f.write_str(&with_quantity(name, *quantity))
            }
        }
    }
}

pub fn consolidate(
    items: BTreeMap<CanonicalSku, AggregatedItem>,
    sizes: &SizeTaxonomy,
) -> Consolidated {
    let flat: Vec<FlatEntry> = items
        .into_iter()
        .map(|(sku, item)| FlatEntry {
            sku,
            quantity: item.quantity,
            image_ref: item.image_ref,
        })
        .collect();

    let mut pick_list = Vec::new();
    let mut groups: HashMap<String, usize> = HashMap::new();
    let mut errors = Vec::new();

    for entry in &flat {
        let shape = entry.sku.shape();
        match shape {
            SkuShape::Structured { size, .. } => {
                let style = shape.style_key().unwrap_or_default();
                if !sizes.contains(size) {
                    warn!(
                        target = "pickwell.picklist",
                        sku = %entry.sku,
                        size = size,
                        "size not in taxonomy"
                    );
                    errors.push(ConsolidateError::UnknownSize {
                        sku: entry.sku.to_string(),
                        size: size.to_string(),
                    });
                }
                let size_entry = SizeEntry {
                    size: size.to_string(),
                    quantity: entry.quantity,
                };
                match groups.get(&style).copied() {
                    Some(idx) => {
                        if let PickListEntry::Group { sizes, .. } = &mut pick_list[idx] {
                            sizes.push(size_entry);
                        }
                    }
                    None => {
                        groups.insert(style.clone(), pick_list.len());
                        pick_list.push(PickListEntry::Group {
                            style,
                            sizes: vec![size_entry],
                        });
                    }
                }
            }
            SkuShape::Fallback(name) => pick_list.push(PickListEntry::Single {
                name: name.to_string(),
                quantity: entry.quantity,
            }),
        }
    }

    for entry in &mut pick_list {
        if let PickListEntry::Group { sizes: group, .. } = entry {
            // Stable: equal ranks and unknown sizes keep insertion order.
            group.sort_by(|a, b| sizes.compare(&a.size, &b.size));
        }
    }

    Consolidated {
        flat,
        pick_list,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(entries: &[(&str, u64)]) -> BTreeMap<CanonicalSku, AggregatedItem> {
        entries
            .iter()
            .map(|(sku, quantity)| {
                (
                    CanonicalSku::from(*sku),
                    AggregatedItem {
                        quantity: *quantity,
                        image_ref: Some(format!("https://img/{sku}")),
                    },
                )
            })
            .collect()
    }

    fn rendered(consolidated: &Consolidated) -> Vec<String> {
        consolidated
            .pick_list
            .iter()
            .map(PickListEntry::to_string)
            .collect()
    }

    #[test]
    fn single_shirt_groups_without_suffix() {
        let out = consolidate(items(&[("BR-600-SML", 1)]), &SizeTaxonomy::default());
        assert_eq!(
            out.flat,
            vec![FlatEntry {
                sku: CanonicalSku::from("BR-600-SML"),
                quantity: 1,
                image_ref: Some("https://img/BR-600-SML".into()),
            }]
        );
        assert_eq!(rendered(&out), vec!["BR-600 -> SML"]);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn summed_legacy_sku_renders_count() {
        let out = consolidate(items(&[("A-600-SML", 5)]), &SizeTaxonomy::default());
        assert_eq!(rendered(&out), vec!["A-600 -> SML (5)"]);
    }

    #[test]
    fn description_sku_is_standalone() {
        let out = consolidate(
            items(&[("Custom Mug", 1), ("Gift Card", 3)]),
            &SizeTaxonomy::default(),
        );
        assert_eq!(rendered(&out), vec!["Custom Mug", "Gift Card (3)"]);
    }

    #[test]
    fn sizes_follow_rank_not_text() {
        let out = consolidate(
            items(&[
                ("T-100-2XL", 1),
                ("T-100-LRG", 2),
                ("T-100-MED", 1),
                ("T-100-SML", 4),
                ("T-100-XL", 1),
                ("T-100-5XL", 1),
            ]),
            &SizeTaxonomy::default(),
        );
        assert_eq!(
            rendered(&out),
            vec!["T-100 -> SML (4), MED, LRG (2), XL, 2XL, 5XL"]
        );
    }

    #[test]
    fn flat_list_is_sorted_by_sku_text() {
        let out = consolidate(
            items(&[("Z-1-SML", 1), ("A-2-MED", 1), ("Mug", 2)]),
            &SizeTaxonomy::default(),
        );
        let skus: Vec<&str> = out.flat.iter().map(|e| e.sku.as_str()).collect();
        assert_eq!(skus, vec!["A-2-MED", "Mug", "Z-1-SML"]);
    }

    #[test]
    fn unknown_size_is_reported_and_trails() {
        let out = consolidate(
            items(&[("K-9-OSFA", 2), ("K-9-MED", 1), ("K-9-SML", 1)]),
            &SizeTaxonomy::default(),
        );
        assert_eq!(rendered(&out), vec!["K-9 -> SML, MED, OSFA (2)"]);
        assert_eq!(
            out.errors,
            vec![ConsolidateError::UnknownSize {
                sku: "K-9-OSFA".into(),
                size: "OSFA".into()
            }]
        );
    }

    #[test]
    fn every_sku_lands_in_exactly_one_place() {
        let input = items(&[
            ("A-1-SML", 1),
            ("A-1-MED", 2),
            ("B-2-XL", 1),
            ("wi note", 1),
            ("C-x-SML", 3),
        ]);
        let total: u64 = input.values().map(|i| i.quantity).sum();
        let out = consolidate(input, &SizeTaxonomy::default());

        let mut placed = 0;
        let mut picked = 0;
        for entry in &out.pick_list {
            match entry {
                PickListEntry::Group { sizes, .. } => {
                    placed += sizes.len();
                    picked += sizes.iter().map(|s| s.quantity).sum::<u64>();
                }
                PickListEntry::Single { quantity, .. } => {
                    placed += 1;
                    picked += quantity;
                }
            }
        }
        assert_eq!(placed, out.flat.len());
        assert_eq!(picked, total);
    }

    #[test]
    fn quantity_suffix_only_above_one() {
        assert_eq!(with_quantity("Mug", 1), "Mug");
        assert_eq!(with_quantity("Mug", 2), "Mug (2)");
    }
}
