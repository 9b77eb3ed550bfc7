use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process;
use tabled::{Table, Tabled, settings::Style};

use recipebox_core::models::{ImportedIngredient, NewRecipe, RecipeFilter, UpdateRecipe};
use recipebox_core::service::RecipeBoxService;

use super::helpers::{json_error, print_json, read_ingredient_text, truncate};

/// Descriptive recipe fields shared by `recipe add` and `recipe edit`.
#[derive(clap::Args, Debug, Default)]
pub(crate) struct RecipeFieldArgs {
    /// Short description
    #[arg(long)]
    pub description: Option<String>,
    /// Preparation steps
    #[arg(long)]
    pub instructions: Option<String>,
    /// Free-form notes
    #[arg(long)]
    pub notes: Option<String>,
    /// Image URL
    #[arg(long)]
    pub image_url: Option<String>,
    /// Menu the recipe belongs to (e.g. dinner)
    #[arg(long)]
    pub menu: Option<String>,
    /// Section within the menu (e.g. mains)
    #[arg(long)]
    pub section: Option<String>,
    /// Comma-separated tags
    #[arg(long)]
    pub tags: Option<String>,
    /// Ingredient lines, one per line: "<amount> <unit> <name>"
    #[arg(long)]
    pub ingredients: Option<String>,
    /// Read ingredient lines from a file ("-" for stdin)
    #[arg(long, value_name = "PATH", conflicts_with = "ingredients")]
    pub ingredients_file: Option<PathBuf>,
}

impl RecipeFieldArgs {
    fn into_new_recipe(self, title: String) -> (NewRecipe, Option<String>, Option<PathBuf>) {
        let recipe = NewRecipe {
            title,
            description: self.description.unwrap_or_default(),
            instructions: self.instructions.unwrap_or_default(),
            notes: self.notes.unwrap_or_default(),
            image_url: self.image_url.unwrap_or_default(),
            menu: self.menu.unwrap_or_default(),
            section: self.section.unwrap_or_default(),
            tags: self.tags.unwrap_or_default(),
        };
        (recipe, self.ingredients, self.ingredients_file)
    }

    fn into_update(
        self,
        title: Option<String>,
    ) -> (UpdateRecipe, Option<String>, Option<PathBuf>) {
        let update = UpdateRecipe {
            title,
            description: self.description,
            instructions: self.instructions,
            notes: self.notes,
            image_url: self.image_url,
            menu: self.menu,
            section: self.section,
            tags: self.tags,
        };
        (update, self.ingredients, self.ingredients_file)
    }
}

pub(crate) fn cmd_recipe_add(
    svc: &RecipeBoxService,
    title: String,
    fields: RecipeFieldArgs,
    json: bool,
) -> Result<()> {
    let (recipe, inline, file) = fields.into_new_recipe(title);
    let text = read_ingredient_text(inline, file.as_deref())?.unwrap_or_default();
    let recipe = svc.create_recipe(&recipe, &text)?;

    if json {
        print_json(&svc.get_recipe_detail(recipe.id)?)
    } else {
        let id = recipe.id;
        let title = &recipe.title;
        println!("Created recipe: {title} (id: {id})");
        Ok(())
    }
}

pub(crate) fn cmd_recipe_edit(
    svc: &RecipeBoxService,
    id: i64,
    title: Option<String>,
    fields: RecipeFieldArgs,
    json: bool,
) -> Result<()> {
    let (update, inline, file) = fields.into_update(title);
    let text = read_ingredient_text(inline, file.as_deref())?;
    if update.is_empty() && text.is_none() {
        bail!("Nothing to change. Pass at least one field or --ingredients");
    }
    let recipe = svc.update_recipe(id, &update, text.as_deref())?;

    if json {
        print_json(&svc.get_recipe_detail(recipe.id)?)
    } else {
        let title = &recipe.title;
        println!("Updated recipe: {title} (id: {id})");
        Ok(())
    }
}

pub(crate) fn cmd_recipe_show(svc: &RecipeBoxService, id: i64, json: bool) -> Result<()> {
    let detail = svc.get_recipe_detail(id)?;

    if json {
        return print_json(&detail);
    }

    let recipe = &detail.recipe;
    println!("=== {} ===", recipe.title);
    if !recipe.description.is_empty() {
        println!("  {}", recipe.description);
    }
    let place = [recipe.menu.as_str(), recipe.section.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" / ");
    if !place.is_empty() {
        println!("  Menu: {place}");
    }
    if !recipe.tags.is_empty() {
        println!("  Tags: {}", recipe.tag_list().join(", "));
    }

    println!("\n  INGREDIENTS:");
    if detail.ingredients.is_empty() {
        println!("    (none)");
    }
    for ing in &detail.ingredients {
        println!("    {}", ing.to_line());
    }

    if !recipe.instructions.is_empty() {
        println!("\n  INSTRUCTIONS:");
        for line in recipe.instructions.lines() {
            println!("    {line}");
        }
    }
    if !recipe.notes.is_empty() {
        println!("\n  NOTES:");
        for line in recipe.notes.lines() {
            println!("    {line}");
        }
    }

    Ok(())
}

pub(crate) fn cmd_recipe_list(
    svc: &RecipeBoxService,
    filter: &RecipeFilter,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Menu")]
        menu: String,
        #[tabled(rename = "Section")]
        section: String,
        #[tabled(rename = "Tags")]
        tags: String,
    }

    let recipes = svc.list_recipes(filter)?;
    if json {
        return print_json(&recipes);
    }
    if recipes.is_empty() {
        eprintln!("No recipes found");
        process::exit(2);
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            title: truncate(&r.title, 35),
            menu: r.menu.clone(),
            section: r.section.clone(),
            tags: truncate(&r.tag_list().join(", "), 30),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_recipe_delete(svc: &RecipeBoxService, id: i64, json: bool) -> Result<()> {
    if svc.delete_recipe(id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": id }));
        } else {
            println!("Deleted recipe {id}");
        }
    } else {
        if json {
            println!("{}", json_error(&format!("Recipe {id} not found")));
        } else {
            eprintln!("Recipe {id} not found");
        }
        process::exit(2);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_tags(svc: &RecipeBoxService, json: bool) -> Result<()> {
    let tags = svc.list_tags()?;
    if json {
        return print_json(&tags);
    }
    for tag in &tags {
        println!("{tag}");
    }
    Ok(())
}

pub(crate) fn cmd_recipe_import(
    svc: &RecipeBoxService,
    file: &Path,
    title_override: Option<String>,
    tags: Option<String>,
    json: bool,
) -> Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let stem = file.file_stem().and_then(|s| s.to_str());
    let parsed = parse_cooklang(&input, stem)?;

    let recipe = NewRecipe {
        title: title_override.unwrap_or(parsed.title),
        instructions: parsed.instructions,
        tags: tags.unwrap_or_default(),
        ..NewRecipe::default()
    };
    let ingredient_text = parsed
        .ingredients
        .iter()
        .map(ImportedIngredient::to_line)
        .collect::<Vec<_>>()
        .join("\n");

    let recipe = svc.create_recipe(&recipe, &ingredient_text)?;
    tracing::info!(recipe_id = recipe.id, file = %file.display(), "imported cooklang recipe");

    let detail = svc.get_recipe_detail(recipe.id)?;
    if json {
        print_json(&detail)
    } else {
        let title = &detail.recipe.title;
        let id = detail.recipe.id;
        let count = detail.ingredients.len();
        println!("Imported recipe: {title} (id: {id}, {count} ingredients)");
        Ok(())
    }
}

struct CooklangRecipe {
    title: String,
    instructions: String,
    ingredients: Vec<ImportedIngredient>,
}

fn parse_cooklang(input: &str, file_stem: Option<&str>) -> Result<CooklangRecipe> {
    let (recipe_data, _report) = cooklang::parse(input)
        .into_result()
        .map_err(|e| anyhow::anyhow!("Failed to parse Cooklang file: {e}"))?;

    let title = recipe_data
        .metadata
        .title()
        .map(String::from)
        .or_else(|| file_stem.map(String::from))
        .context("Could not determine recipe title. Use --title to specify one")?;

    let converter = cooklang::Converter::default();
    let grouped = recipe_data.group_ingredients(&converter);
    let ingredients: Vec<ImportedIngredient> =
        grouped.iter().map(cooklang_ingredient_to_imported).collect();

    if ingredients.is_empty() {
        bail!("No ingredients found in recipe");
    }

    let instructions = cooklang_instructions(input);

    Ok(CooklangRecipe {
        title,
        instructions,
        ingredients,
    })
}

fn cooklang_ingredient_to_imported(
    gi: &cooklang::ingredient_list::GroupedIngredient<'_>,
) -> ImportedIngredient {
    // Grouped quantities in incompatible units are listed separately; keep the first.
    let (quantity, unit) =
        gi.quantity
            .iter()
            .next()
            .map_or((None, None), |qty: &cooklang::Quantity| {
                let value = match qty.value() {
                    cooklang::Value::Number(n) => format_amount(n.value()),
                    cooklang::Value::Range { start, end } => {
                        format!("{}-{}", format_amount(start.value()), format_amount(end.value()))
                    }
                    cooklang::Value::Text(t) => t.clone(),
                };
                (Some(value), qty.unit().map(String::from))
            });

    ImportedIngredient {
        name: gi.ingredient.display_name().to_string(),
        quantity,
        unit,
    }
}

/// Shortest decimal form: `2.0` prints as `2`, `0.5` as `0.5`.
fn format_amount(value: f64) -> String {
    format!("{value}")
}

/// Step lines of a Cooklang file, markup kept, metadata and comment lines dropped.
fn cooklang_instructions(input: &str) -> String {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(">>") && !line.starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(2.0), "2");
        assert_eq!(format_amount(0.5), "0.5");
        assert_eq!(format_amount(100.0), "100");
    }

    #[test]
    fn test_parse_cooklang_ingredients() {
        let input = "Mix @flour{100%g} with @eggs{2} and season with @salt\n";
        let parsed = parse_cooklang(input, Some("pancakes")).unwrap();

        assert_eq!(parsed.title, "pancakes");
        assert_eq!(parsed.ingredients.len(), 3);

        let flour = &parsed.ingredients[0];
        assert_eq!(flour.name, "flour");
        assert_eq!(flour.quantity.as_deref(), Some("100"));
        assert_eq!(flour.unit.as_deref(), Some("g"));

        let eggs = &parsed.ingredients[1];
        assert_eq!(eggs.quantity.as_deref(), Some("2"));
        assert!(eggs.unit.is_none());

        assert_eq!(parsed.ingredients[2].to_line(), "1 pc salt");
    }

    #[test]
    fn test_parse_cooklang_without_ingredients() {
        assert!(parse_cooklang("Just boil some water.\n", Some("water")).is_err());
    }

    #[test]
    fn test_cooklang_instructions_skip_metadata() {
        let input = ">> servings: 4\n-- family recipe\n\nBoil @potatoes{1%kg}.\n\nMash with @butter{50%g}.\n";
        assert_eq!(
            cooklang_instructions(input),
            "Boil @potatoes{1%kg}.\nMash with @butter{50%g}."
        );
    }

    #[test]
    fn test_import_creates_recipe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Kanelbullar.cook");
        std::fs::write(&path, "Knead @flour{500%g} with @butter{75%g} and @milk{2.5%dl}.\n")
            .unwrap();

        let svc = RecipeBoxService::new_in_memory().unwrap();
        cmd_recipe_import(&svc, &path, None, Some("fika".to_string()), true).unwrap();

        let recipes = svc.list_recipes(&RecipeFilter::default()).unwrap();
        assert_eq!(recipes.len(), 1);
        assert_eq!(recipes[0].title, "Kanelbullar");
        assert_eq!(recipes[0].tags, "fika");
        assert_eq!(
            svc.get_ingredient_text(recipes[0].id).unwrap(),
            "500 g flour\n75 g butter\n2.5 dl milk"
        );
    }

    #[test]
    fn test_import_unitless_ingredient_survives_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Omelett.cook");
        std::fs::write(&path, "Whisk @eggs{2} with @milk{1%dl}.\n").unwrap();

        let svc = RecipeBoxService::new_in_memory().unwrap();
        cmd_recipe_import(&svc, &path, None, None, true).unwrap();
        let id = svc.list_recipes(&RecipeFilter::default()).unwrap()[0].id;

        let text = svc.get_ingredient_text(id).unwrap();
        assert_eq!(text, "2 pc eggs\n1 dl milk");

        svc.replace_recipe_ingredients(id, &text).unwrap();
        let detail = svc.get_recipe_detail(id).unwrap();
        assert_eq!(detail.ingredients[0].name, "eggs");
        assert_eq!(detail.ingredients[0].unit, "pc");
        assert_eq!(detail.ingredient_text, text);
    }
}
