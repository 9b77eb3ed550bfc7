use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::validate_multiplicity;
use crate::parser::format_line;

/// A scaled ingredient amount.
///
/// Amounts that parse as numbers stay numeric and add up. Anything else
/// (`"a pinch"`, `"2-3"`) becomes text, and once text is involved every
/// further merge is a comma-joined concatenation with no more arithmetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Numeric(f64),
    Text(String),
}

impl Quantity {
    /// Scale a raw amount by the number of times its recipe is selected.
    #[must_use]
    pub fn scaled(amount: &str, count: u32) -> Self {
        match amount.trim().parse::<f64>() {
            Ok(value) => Self::Numeric(value * f64::from(count)),
            Err(_) => Self::Text(format!("{amount} x {count}")),
        }
    }

    /// Combine with the next amount for the same shopping key, in merge order.
    #[must_use]
    pub fn merge(self, next: Quantity) -> Quantity {
        match (self, next) {
            (Self::Numeric(a), Self::Numeric(b)) => Self::Numeric(a + b),
            (existing, next) => Self::Text(format!(
                "{}, {}",
                existing.merge_text(),
                next.merge_text()
            )),
        }
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Numeric(_))
    }

    // Numbers always carry a fractional part in merged text ("100.0").
    fn merge_text(&self) -> String {
        match self {
            Self::Numeric(value) => {
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
                    format!("{value:.1}")
                } else {
                    format!("{value}")
                }
            }
            Self::Text(text) => text.clone(),
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Recipes picked for the shopping list and how many times each is cooked.
///
/// Serialized as `{ "<recipe_id>": count }`. Every stored count is at least 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShoppingListSelection {
    entries: BTreeMap<String, u32>,
}

impl ShoppingListSelection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries with a zero count, e.g. after loading hand-edited JSON.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.entries.retain(|_, count| *count > 0);
        self
    }

    /// Add a recipe, or bump its count if it is already selected. Returns the new count.
    pub fn add(&mut self, recipe_id: i64) -> u32 {
        let count = self.entries.entry(recipe_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Increment an already selected recipe. Returns `None` when it is not selected.
    pub fn increase(&mut self, recipe_id: i64) -> Option<u32> {
        let count = self.entries.get_mut(&recipe_id.to_string())?;
        *count = count.saturating_add(1);
        Some(*count)
    }

    /// Decrement a selected recipe; a count of 1 removes the entry.
    /// Returns the remaining count (0 when removed), or `None` when not selected.
    pub fn decrease(&mut self, recipe_id: i64) -> Option<u32> {
        let key = recipe_id.to_string();
        let count = self.entries.get_mut(&key)?;
        if *count <= 1 {
            self.entries.remove(&key);
            return Some(0);
        }
        *count -= 1;
        Some(*count)
    }

    pub fn set(&mut self, recipe_id: i64, count: u32) -> Result<()> {
        let count = validate_multiplicity(count)?;
        self.entries.insert(recipe_id.to_string(), count);
        Ok(())
    }

    pub fn remove(&mut self, recipe_id: i64) -> bool {
        self.entries.remove(&recipe_id.to_string()).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn get(&self, recipe_id: i64) -> Option<u32> {
        self.entries.get(&recipe_id.to_string()).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw `(key, count)` pairs in key order. Keys are not guaranteed to be valid ids.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// One ingredient line of a recipe as the aggregator sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ShoppingRow {
    pub name: String,
    pub amount: String,
    pub unit: String,
    pub grocery_category: String,
    pub kitchen_staple: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ShoppingKey {
    name: String,
    unit: String,
    grocery_category: String,
    kitchen_staple: bool,
}

impl From<&ShoppingRow> for ShoppingKey {
    fn from(row: &ShoppingRow) -> Self {
        Self {
            name: row.name.clone(),
            unit: row.unit.clone(),
            grocery_category: row.grocery_category.clone(),
            kitchen_staple: row.kitchen_staple,
        }
    }
}

/// One consolidated line of the shopping list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedShoppingEntry {
    pub name: String,
    pub unit: String,
    pub grocery_category: String,
    pub kitchen_staple: bool,
    pub quantity: Quantity,
}

impl AggregatedShoppingEntry {
    #[must_use]
    pub fn to_line(&self) -> String {
        format_line(&self.quantity.to_string(), &self.unit, &self.name)
    }

    // Staples first, then category, then name. Unit only separates otherwise equal keys.
    fn cmp_order(&self, other: &Self) -> Ordering {
        (!self.kitchen_staple, &self.grocery_category, &self.name, &self.unit).cmp(&(
            !other.kitchen_staple,
            &other.grocery_category,
            &other.name,
            &other.unit,
        ))
    }
}

/// Merge the ingredient rows of every selected recipe into one ordered list.
///
/// Each item is a recipe's rows paired with its selection count. Rows sharing
/// `(name, unit, category, staple)` merge in iteration order.
pub fn aggregate<'a, I>(recipes: I) -> Vec<AggregatedShoppingEntry>
where
    I: IntoIterator<Item = (&'a [ShoppingRow], u32)>,
{
    let mut totals: HashMap<ShoppingKey, Quantity> = HashMap::new();

    for (rows, count) in recipes {
        for row in rows {
            let key = ShoppingKey::from(row);
            let scaled = Quantity::scaled(&row.amount, count);
            let merged = match totals.remove(&key) {
                Some(existing) => existing.merge(scaled),
                None => scaled,
            };
            totals.insert(key, merged);
        }
    }

    let mut entries: Vec<AggregatedShoppingEntry> = totals
        .into_iter()
        .map(|(key, quantity)| AggregatedShoppingEntry {
            name: key.name,
            unit: key.unit,
            grocery_category: key.grocery_category,
            kitchen_staple: key.kitchen_staple,
            quantity,
        })
        .collect();
    entries.sort_by(AggregatedShoppingEntry::cmp_order);
    entries
}

/// Write the shopping list as CSV with a `Name,Amount,Unit,Category,Staple` header.
pub fn write_csv<W: Write>(entries: &[AggregatedShoppingEntry], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["Name", "Amount", "Unit", "Category", "Staple"])
        .context("Failed to write CSV header")?;
    for entry in entries {
        let amount = entry.quantity.to_string();
        wtr.write_record([
            entry.name.as_str(),
            amount.as_str(),
            entry.unit.as_str(),
            entry.grocery_category.as_str(),
            if entry.kitchen_staple { "yes" } else { "no" },
        ])
        .with_context(|| format!("Failed to write CSV row for '{}'", entry.name))?;
    }
    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}
