//! Product list loading.
//!
//! A workbook is a list of named groups, each a list of rows keyed by column
//! header. Every group needs an id column, a `Product Name` column and an
//! `Original Phase` column; groups without them are reported, not processed.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::models::{ProductId, ProductQuery};

/// Column headers recognized as the product id
pub const ID_COLUMN_CANDIDATES: [&str; 2] = ["TC Scrape Number", "bioTRAK Product ID"];

/// Header containing the searched product name
pub const NAME_COLUMN: &str = "Product Name";

/// Header containing the upstream phase
pub const PHASE_COLUMN: &str = "Original Phase";

/// Errors reading a product workbook
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("failed to read workbook {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workbook is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("groups not found in workbook: {}", .0.join(", "))]
    UnknownGroups(Vec<String>),
}

/// How to read a workbook
#[derive(Debug, Clone, Default)]
pub struct InputOptions {
    /// Id column header; detected per group when unset
    pub id_column: Option<String>,

    /// Groups to load, by name; all groups when empty
    pub groups: Vec<String>,
}

/// A named group of products, exported as one section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductGroup {
    pub name: String,
    /// Header the product ids were read from
    pub id_column: String,
    pub products: Vec<ProductQuery>,
}

impl ProductGroup {
    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// A group that failed column validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidGroup {
    pub name: String,
    pub reason: String,
}

/// Groups loaded from a workbook
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    pub groups: Vec<ProductGroup>,
    pub invalid: Vec<InvalidGroup>,
}

impl Workbook {
    pub fn product_count(&self) -> usize {
        self.groups.iter().map(ProductGroup::len).sum()
    }
}

#[derive(Deserialize)]
struct RawWorkbook {
    #[serde(default)]
    groups: Vec<RawGroup>,
}

#[derive(Deserialize)]
struct RawGroup {
    name: String,
    #[serde(default)]
    products: Vec<Map<String, Value>>,
}

impl RawGroup {
    /// Headers in first-seen order across all rows
    fn columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for row in &self.products {
            for key in row.keys() {
                if !columns.contains(&key.as_str()) {
                    columns.push(key);
                }
            }
        }
        columns
    }
}

fn normalize_header(header: &str) -> String {
    header.replace('_', " ").to_lowercase()
}

fn find_column<'a>(columns: &[&'a str], wanted: &str) -> Option<&'a str> {
    let wanted = normalize_header(wanted);
    columns
        .iter()
        .find(|c| normalize_header(c).trim() == wanted)
        .or_else(|| columns.iter().find(|c| normalize_header(c).contains(&wanted)))
        .copied()
}

/// Pick the id column from a group's headers
///
/// The first header containing `TC Scrape Number` or `bioTRAK Product ID`
/// wins, so `TC Scrape Number (Duplicates removed)` matches too. A plain
/// `Product ID` / `product_id` header is the fallback.
pub fn find_id_column<'a>(columns: &[&'a str]) -> Option<&'a str> {
    columns
        .iter()
        .copied()
        .find(|c| {
            let header = normalize_header(c);
            ID_COLUMN_CANDIDATES
                .iter()
                .any(|id| header.contains(&normalize_header(id)))
        })
        .or_else(|| find_column(columns, "Product ID"))
}

fn cell_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Read and parse a workbook file
pub fn load_workbook(path: &Path, options: &InputOptions) -> Result<Workbook, InputError> {
    let content = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_workbook(&content, options)
}

/// Parse workbook JSON
///
/// Groups missing a required column land in [`Workbook::invalid`]. Within a
/// valid group, rows without a product id or product name are skipped with a
/// warning.
pub fn parse_workbook(content: &str, options: &InputOptions) -> Result<Workbook, InputError> {
    let raw: RawWorkbook = serde_json::from_str(content)?;

    let unknown: Vec<String> = options
        .groups
        .iter()
        .filter(|wanted| !raw.groups.iter().any(|g| &g.name == *wanted))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(InputError::UnknownGroups(unknown));
    }

    let mut workbook = Workbook::default();
    for group in raw.groups {
        if !options.groups.is_empty() && !options.groups.contains(&group.name) {
            tracing::debug!("Group {:?} not selected", group.name);
            continue;
        }
        match read_group(&group, options.id_column.as_deref()) {
            Ok(products) => workbook.groups.push(products),
            Err(reason) => {
                tracing::warn!("Skipping group {:?}: {}", group.name, reason);
                workbook.invalid.push(InvalidGroup {
                    name: group.name,
                    reason,
                });
            }
        }
    }

    tracing::debug!(
        "Loaded {} groups with {} products ({} invalid)",
        workbook.groups.len(),
        workbook.product_count(),
        workbook.invalid.len()
    );
    Ok(workbook)
}

fn read_group(group: &RawGroup, id_column: Option<&str>) -> Result<ProductGroup, String> {
    let columns = group.columns();
    let id_column = match id_column {
        Some(wanted) => columns
            .iter()
            .find(|c| **c == wanted)
            .copied()
            .ok_or_else(|| format!("id column {:?} not found", wanted))?,
        None => find_id_column(&columns).ok_or_else(|| {
            format!(
                "no id column (expected one containing {})",
                ID_COLUMN_CANDIDATES.join(" or ")
            )
        })?,
    };

    let name_column = find_column(&columns, NAME_COLUMN);
    let phase_column = find_column(&columns, PHASE_COLUMN);
    let missing: Vec<&str> = [(NAME_COLUMN, name_column), (PHASE_COLUMN, phase_column)]
        .into_iter()
        .filter(|(_, found)| found.is_none())
        .map(|(wanted, _)| wanted)
        .collect();
    let (Some(name_column), Some(phase_column)) = (name_column, phase_column) else {
        return Err(format!("missing required columns: {}", missing.join(", ")));
    };

    let mut products = Vec::with_capacity(group.products.len());
    for (row, cells) in group.products.iter().enumerate() {
        let id = cell_text(cells.get(id_column));
        let name = cell_text(cells.get(name_column));

        match (id, name) {
            (Some(id), Some(name)) => products.push(ProductQuery {
                product_id: ProductId::new(id),
                product_name: name,
                original_phase: cell_text(cells.get(phase_column)).unwrap_or_default(),
            }),
            (None, _) => {
                tracing::warn!("Skipping row {} in {:?}: missing {}", row + 1, group.name, id_column)
            }
            (Some(id), None) => {
                tracing::warn!(
                    "Skipping row {} in {:?}: product {} has no name",
                    row + 1,
                    group.name,
                    id
                )
            }
        }
    }

    Ok(ProductGroup {
        name: group.name.clone(),
        id_column: id_column.to_string(),
        products,
    })
}
