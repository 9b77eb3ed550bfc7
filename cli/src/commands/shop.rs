use anyhow::{Context, Result};
use std::path::Path;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use recipebox_core::service::RecipeBoxService;
use recipebox_core::shopping::{AggregatedShoppingEntry, ShoppingListSelection, write_csv};

use super::helpers::{json_error, print_json, truncate, yes_no};

/// Read the saved selection. A missing file is an empty selection.
pub(crate) fn load_selection(path: &Path) -> Result<ShoppingListSelection> {
    if !path.exists() {
        return Ok(ShoppingListSelection::new());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read shopping list: {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(ShoppingListSelection::new());
    }
    let selection: ShoppingListSelection = serde_json::from_str(&data)
        .with_context(|| format!("Shopping list file is corrupt: {}", path.display()))?;
    Ok(selection.normalized())
}

/// Write the selection to a sibling temp file, then rename over the old one.
pub(crate) fn save_selection(path: &Path, selection: &ShoppingListSelection) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_string_pretty(selection)?;
    std::fs::write(&tmp, data)
        .with_context(|| format!("Failed to write shopping list: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace shopping list: {}", path.display()))?;
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SelectionChange {
    Add,
    Increase,
    Decrease,
    Remove,
}

pub(crate) fn cmd_shop_change(
    svc: &RecipeBoxService,
    path: &Path,
    recipe_id: i64,
    change: SelectionChange,
    json: bool,
) -> Result<()> {
    let mut selection = load_selection(path)?;
    let count = apply_change(svc, &mut selection, recipe_id, change)?;

    let Some(count) = count else {
        let message = format!("Recipe {recipe_id} is not on the shopping list");
        if json {
            println!("{}", json_error(&message));
        } else {
            eprintln!("{message}");
        }
        process::exit(2);
    };

    save_selection(path, &selection)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "recipe_id": recipe_id, "count": count, "selection": selection })
        );
    } else if count == 0 {
        println!("Removed recipe {recipe_id} from the shopping list");
    } else {
        println!("Recipe {recipe_id} x {count} on the shopping list");
    }
    Ok(())
}

/// Returns the new count, `Some(0)` once the recipe is gone, or `None` if it was never selected.
fn apply_change(
    svc: &RecipeBoxService,
    selection: &mut ShoppingListSelection,
    recipe_id: i64,
    change: SelectionChange,
) -> Result<Option<u32>> {
    let count = match change {
        SelectionChange::Add => Some(svc.select_recipe(selection, recipe_id)?),
        SelectionChange::Increase => selection.increase(recipe_id),
        SelectionChange::Decrease => selection.decrease(recipe_id),
        SelectionChange::Remove => selection.remove(recipe_id).then_some(0),
    };
    Ok(count)
}

pub(crate) fn cmd_shop_clear(path: &Path, json: bool) -> Result<()> {
    let mut selection = load_selection(path)?;
    let cleared = selection.len();
    selection.clear();
    save_selection(path, &selection)?;

    if json {
        println!("{}", serde_json::json!({ "cleared": cleared }));
    } else {
        println!("Cleared shopping list ({cleared} recipes)");
    }
    Ok(())
}

pub(crate) fn cmd_shop_show(svc: &RecipeBoxService, path: &Path, csv: bool, json: bool) -> Result<()> {
    let selection = load_selection(path)?;
    let entries = svc.build_shopping_list(&selection)?;

    if csv {
        return write_csv(&entries, std::io::stdout().lock());
    }
    if json {
        return print_json(&serde_json::json!({
            "selection": selection,
            "items": entries,
        }));
    }
    if entries.is_empty() {
        eprintln!("Shopping list is empty. Add recipes with: recipebox shop add <recipe-id>");
        return Ok(());
    }

    print_shopping_table(&entries);
    Ok(())
}

fn print_shopping_table(entries: &[AggregatedShoppingEntry]) {
    #[derive(Tabled)]
    struct ShoppingTableRow {
        #[tabled(rename = "Amount")]
        amount: String,
        #[tabled(rename = "Unit")]
        unit: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Staple")]
        staple: &'static str,
    }

    let rows: Vec<ShoppingTableRow> = entries
        .iter()
        .map(|e| ShoppingTableRow {
            amount: truncate(&e.quantity.to_string(), 30),
            unit: e.unit.clone(),
            name: truncate(&e.name, 30),
            category: e.grocery_category.clone(),
            staple: yes_no(e.kitchen_staple),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(0)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use recipebox_core::models::NewRecipe;

    fn svc_with_recipe() -> (RecipeBoxService, i64) {
        let svc = RecipeBoxService::new_in_memory().unwrap();
        let recipe = svc
            .create_recipe(
                &NewRecipe {
                    title: "Ärtsoppa".to_string(),
                    ..NewRecipe::default()
                },
                "500 g gula ärtor\n1 st lök",
            )
            .unwrap();
        (svc, recipe.id)
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let selection = load_selection(&dir.path().join("shopping_list.json")).unwrap();
        assert!(selection.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shopping_list.json");

        let mut selection = ShoppingListSelection::new();
        selection.set(3, 2).unwrap();
        selection.add(11);
        save_selection(&path, &selection).unwrap();

        let loaded = load_selection(&path).unwrap();
        assert_eq!(loaded.get(3), Some(2));
        assert_eq!(loaded.get(11), Some(1));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_drops_zero_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shopping_list.json");
        std::fs::write(&path, r#"{"1": 0, "2": 3}"#).unwrap();

        let loaded = load_selection(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(2), Some(3));
    }

    #[test]
    fn test_load_corrupt_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shopping_list.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_selection(&path).is_err());
    }

    #[test]
    fn test_apply_change_sequence() {
        let (svc, id) = svc_with_recipe();
        let mut selection = ShoppingListSelection::new();

        assert_eq!(
            apply_change(&svc, &mut selection, id, SelectionChange::Increase).unwrap(),
            None
        );
        assert_eq!(
            apply_change(&svc, &mut selection, id, SelectionChange::Add).unwrap(),
            Some(1)
        );
        assert_eq!(
            apply_change(&svc, &mut selection, id, SelectionChange::Increase).unwrap(),
            Some(2)
        );
        assert_eq!(
            apply_change(&svc, &mut selection, id, SelectionChange::Decrease).unwrap(),
            Some(1)
        );
        assert_eq!(
            apply_change(&svc, &mut selection, id, SelectionChange::Decrease).unwrap(),
            Some(0)
        );
        assert!(selection.is_empty());
        assert_eq!(
            apply_change(&svc, &mut selection, id, SelectionChange::Remove).unwrap(),
            None
        );
    }

    #[test]
    fn test_apply_add_unknown_recipe_fails() {
        let (svc, id) = svc_with_recipe();
        let mut selection = ShoppingListSelection::new();
        assert!(apply_change(&svc, &mut selection, id + 100, SelectionChange::Add).is_err());
        assert!(selection.is_empty());
    }
}
