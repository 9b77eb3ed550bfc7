use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::parser::format_line;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub menu: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub tags: String,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Recipe {
    /// Individual tags from the comma-separated tag text.
    #[must_use]
    pub fn tag_list(&self) -> Vec<String> {
        split_tags(&self.tags)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRecipe {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub menu: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub tags: String,
}

/// Partial edit of a recipe's descriptive fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRecipe {
    pub title: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub notes: Option<String>,
    pub image_url: Option<String>,
    pub menu: Option<String>,
    pub section: Option<String>,
    pub tags: Option<String>,
}

impl UpdateRecipe {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.instructions.is_none()
            && self.notes.is_none()
            && self.image_url.is_none()
            && self.menu.is_none()
            && self.section.is_none()
            && self.tags.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeFilter {
    #[serde(default)]
    pub tags: Vec<String>,
    pub menu: Option<String>,
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub grocery_category: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub kitchen_staple: bool,
}

/// A catalog entry together with every recipe that references it.
#[derive(Debug, Clone, Serialize)]
pub struct UsedIngredient {
    #[serde(flatten)]
    pub ingredient: Ingredient,
    pub recipe_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngredientUpdate {
    pub id: i64,
    #[serde(default)]
    pub grocery_category: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub kitchen_staple: bool,
}

/// One ingredient line of a recipe, joined with its catalog metadata.
#[derive(Debug, Clone, Serialize)]
pub struct RecipeIngredient {
    pub recipe_id: i64,
    pub ingredient_id: i64,
    pub position: i64,
    pub name: String,
    pub amount: String,
    pub unit: String,
    pub note: String,
    pub grocery_category: String,
    pub kitchen_staple: bool,
}

impl RecipeIngredient {
    #[must_use]
    pub fn to_line(&self) -> String {
        format_line(&self.amount, &self.unit, &self.name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub ingredients: Vec<RecipeIngredient>,
    pub ingredient_text: String,
}

/// Unit written for imported ingredients that carry none, so the name stays
/// in the name position of the line.
pub const IMPORT_COUNT_UNIT: &str = "pc";

/// An ingredient pulled out of an external recipe format.
#[derive(Debug, Clone)]
pub struct ImportedIngredient {
    pub name: String,
    pub quantity: Option<String>,
    pub unit: Option<String>,
}

impl ImportedIngredient {
    /// The ingredient as one editable line.
    ///
    /// A missing quantity counts as one of the ingredient and a missing unit
    /// becomes [`IMPORT_COUNT_UNIT`]. Spaces inside the amount or unit are
    /// joined with `-` so each stays a single token when the line is parsed.
    #[must_use]
    pub fn to_line(&self) -> String {
        let amount = single_token(self.quantity.as_deref()).unwrap_or_else(|| "1".to_string());
        let unit =
            single_token(self.unit.as_deref()).unwrap_or_else(|| IMPORT_COUNT_UNIT.to_string());
        format_line(&amount, &unit, self.name.trim())
    }
}

fn single_token(value: Option<&str>) -> Option<String> {
    let words: Vec<&str> = value?.split_whitespace().collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join("-"))
    }
}

/// Split comma-separated tag text into trimmed, non-empty tags.
#[must_use]
pub fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

pub fn validate_recipe_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        bail!("Recipe title must not be empty");
    }
    Ok(trimmed.to_string())
}

pub fn validate_multiplicity(count: u32) -> Result<u32> {
    if count == 0 {
        bail!("Shopping list multiplicity must be at least 1");
    }
    Ok(count)
}
