// Read-only item catalog loaded from CSV.
//
// The engine never mutates the catalog; it is queried by the eligibility
// policy (pool membership, categories) and the standings aggregator (item
// values). Category declaration order -- first appearance in the file --
// drives the round-locked category rotation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path}: {source}")]
    Read {
        path: PathBuf,
        source: csv::Error,
    },

    #[error("duplicate item id in catalog: {item_id}")]
    DuplicateItem { item_id: String },

    #[error("catalog contains no items")]
    Empty,
}

/// A single selectable item (a movie, an award nominee, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item_id: String,
    pub name: String,
    /// Category the item belongs to, for category-constrained drafts.
    /// `None` for flat open-pool catalogs.
    pub category: Option<String>,
    /// Scoring value used by the item-value scoring mode and as the
    /// auto-selection ranking.
    pub value: f64,
}

/// CSV row shape: `item_id,name,category,value`. An empty category cell
/// means uncategorized; a missing value defaults to 0.
#[derive(Debug, Deserialize)]
struct CatalogRow {
    item_id: String,
    name: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    value: f64,
}

/// The immutable item pool.
#[derive(Debug, Clone)]
pub struct Catalog {
    items: Vec<CatalogItem>,
    index: HashMap<String, usize>,
    /// Distinct categories in declaration order.
    categories: Vec<String>,
}

impl Catalog {
    /// Build a catalog from in-memory items, rejecting duplicate ids.
    pub fn new(items: Vec<CatalogItem>) -> Result<Self, CatalogError> {
        if items.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut index = HashMap::with_capacity(items.len());
        let mut categories: Vec<String> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            if index.insert(item.item_id.clone(), i).is_some() {
                return Err(CatalogError::DuplicateItem {
                    item_id: item.item_id.clone(),
                });
            }
            if let Some(category) = &item.category {
                if !categories.iter().any(|c| c == category) {
                    categories.push(category.clone());
                }
            }
        }

        Ok(Catalog {
            items,
            index,
            categories,
        })
    }

    /// Load a catalog from a CSV file with headers `item_id,name,category,value`.
    pub fn from_csv_path(path: &Path) -> Result<Self, CatalogError> {
        let mut reader = csv::Reader::from_path(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut items = Vec::new();
        for row in reader.deserialize::<CatalogRow>() {
            let row = row.map_err(|source| CatalogError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let category = if row.category.trim().is_empty() {
                None
            } else {
                Some(row.category.trim().to_string())
            };
            items.push(CatalogItem {
                item_id: row.item_id,
                name: row.name,
                category,
                value: row.value,
            });
        }

        Catalog::new(items)
    }

    pub fn item(&self, item_id: &str) -> Option<&CatalogItem> {
        self.index.get(item_id).map(|&i| &self.items[i])
    }

    pub fn category_of(&self, item_id: &str) -> Option<&str> {
        self.item(item_id).and_then(|item| item.category.as_deref())
    }

    pub fn items(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.iter()
    }

    pub fn item_ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.item_id.as_str())
    }

    /// Distinct categories in declaration order.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Number of items declared in the given category.
    pub fn category_size(&self, category: &str) -> usize {
        self.items
            .iter()
            .filter(|item| item.category.as_deref() == Some(category))
            .count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
