use anyhow::{Context, Result};
use std::path::Path;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use recipebox_core::models::Ingredient;
use recipebox_core::service::RecipeBoxService;

use super::helpers::{print_json, truncate, yes_no};

#[derive(Tabled)]
struct IngredientRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Staple")]
    staple: &'static str,
    #[tabled(rename = "Notes")]
    notes: String,
}

impl IngredientRow {
    fn from_ingredient(ing: &Ingredient) -> Self {
        Self {
            id: ing.id,
            name: truncate(&ing.name, 30),
            category: truncate(&ing.grocery_category, 20),
            staple: yes_no(ing.kitchen_staple),
            notes: truncate(&ing.notes, 30),
        }
    }
}

pub(crate) fn cmd_ingredient_list(svc: &RecipeBoxService, json: bool) -> Result<()> {
    let ingredients = svc.list_ingredients()?;
    if json {
        return print_json(&ingredients);
    }
    if ingredients.is_empty() {
        eprintln!("Ingredient library is empty");
        return Ok(());
    }

    let rows: Vec<IngredientRow> = ingredients.iter().map(IngredientRow::from_ingredient).collect();
    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_ingredient_used(svc: &RecipeBoxService, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct UsedRow {
        #[tabled(inline)]
        ingredient: IngredientRow,
        #[tabled(rename = "Recipes")]
        recipes: usize,
    }

    let used = svc.list_used_ingredients()?;
    if json {
        return print_json(&used);
    }
    if used.is_empty() {
        eprintln!("No ingredients are used by any recipe");
        return Ok(());
    }

    let rows: Vec<UsedRow> = used
        .iter()
        .map(|u| UsedRow {
            ingredient: IngredientRow::from_ingredient(&u.ingredient),
            recipes: u.recipe_ids.len(),
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(5..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

/// Overwrite classification fields; any flag not given keeps its stored value.
pub(crate) fn cmd_ingredient_set(
    svc: &RecipeBoxService,
    id: i64,
    category: Option<String>,
    notes: Option<String>,
    staple: Option<bool>,
    json: bool,
) -> Result<()> {
    let current = svc.db().get_ingredient(id)?;
    let updated = svc.update_ingredient(
        id,
        category.as_deref().unwrap_or(&current.grocery_category),
        notes.as_deref().unwrap_or(&current.notes),
        staple.unwrap_or(current.kitchen_staple),
    )?;

    if json {
        print_json(&updated)
    } else {
        let name = &updated.name;
        let category = if updated.grocery_category.is_empty() {
            "-"
        } else {
            &updated.grocery_category
        };
        let staple = yes_no(updated.kitchen_staple);
        println!("Updated {name}: category {category}, staple {staple}");
        Ok(())
    }
}

pub(crate) fn cmd_ingredient_import(
    svc: &RecipeBoxService,
    file: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let csv_data = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let summary = svc.import_library_csv(&csv_data, dry_run)?;

    if json {
        return print_json(&summary);
    }

    let prefix = if dry_run { "Would update" } else { "Updated" };
    let updated = summary.ingredients_updated;
    let parsed = summary.rows_parsed;
    println!("{prefix} {updated} of {parsed} ingredients");
    if !summary.unknown_names.is_empty() {
        eprintln!("Not in the library (skipped):");
        for name in &summary.unknown_names {
            eprintln!("  {name}");
        }
    }
    Ok(())
}
