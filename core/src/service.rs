use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::assistant::{self, ChatMessage};
use crate::db::Database;
use crate::library_import::{self, LibraryImportSummary};
use crate::models::{
    Ingredient, IngredientUpdate, NewRecipe, Recipe, RecipeDetail, RecipeFilter, UpdateRecipe,
    UsedIngredient, validate_recipe_title,
};
use crate::parser::parse_lines;
use crate::shopping::{AggregatedShoppingEntry, ShoppingListSelection};

/// Text-generation backend for the recipe assistant.
///
/// The CLI implements this with reqwest against an OpenAI-compatible endpoint.
/// Called synchronously; async callers should run it on a blocking thread.
pub trait AssistantProvider: Send + Sync {
    fn reply(&self, transcript: &[ChatMessage]) -> Result<String>;
}

pub struct RecipeBoxService {
    db: Database,
}

impl RecipeBoxService {
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Database::open(Path::new(db_path))?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    // --- Recipes ---

    /// Every stored ingredient line comes out of the line parser, so the
    /// reconstructed text parses back to the same links.
    pub fn create_recipe(&self, recipe: &NewRecipe, ingredient_text: &str) -> Result<Recipe> {
        let recipe = NewRecipe {
            title: validate_recipe_title(&recipe.title)?,
            ..recipe.clone()
        };
        self.db.create_recipe(&recipe, &parse_lines(ingredient_text))
    }

    pub fn update_recipe(
        &self,
        id: i64,
        update: &UpdateRecipe,
        ingredient_text: Option<&str>,
    ) -> Result<Recipe> {
        let mut update = update.clone();
        if let Some(title) = &update.title {
            update.title = Some(validate_recipe_title(title)?);
        }
        let lines = ingredient_text.map(parse_lines);
        self.db.update_recipe(id, &update, lines.as_deref())
    }

    pub fn get_recipe(&self, id: i64) -> Result<Recipe> {
        self.db.get_recipe(id)
    }

    pub fn get_recipe_detail(&self, id: i64) -> Result<RecipeDetail> {
        self.db.get_recipe_detail(id)
    }

    pub fn delete_recipe(&self, id: i64) -> Result<bool> {
        self.db.delete_recipe(id)
    }

    pub fn list_recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>> {
        self.db.list_recipes(filter)
    }

    pub fn list_tags(&self) -> Result<Vec<String>> {
        self.db.list_tags()
    }

    // --- Ingredient sets ---

    pub fn get_ingredient_text(&self, recipe_id: i64) -> Result<String> {
        if !self.db.recipe_exists(recipe_id)? {
            bail!("Recipe {recipe_id} not found");
        }
        self.db.get_ingredient_text(recipe_id)
    }

    pub fn replace_recipe_ingredients(&self, recipe_id: i64, text: &str) -> Result<usize> {
        self.db.replace_recipe_ingredients(recipe_id, text)
    }

    // --- Ingredient library ---

    pub fn list_ingredients(&self) -> Result<Vec<Ingredient>> {
        self.db.list_ingredients()
    }

    pub fn list_used_ingredients(&self) -> Result<Vec<UsedIngredient>> {
        self.db.list_used_ingredients()
    }

    pub fn update_ingredient(
        &self,
        id: i64,
        grocery_category: &str,
        notes: &str,
        kitchen_staple: bool,
    ) -> Result<Ingredient> {
        if !self
            .db
            .update_ingredient_metadata(id, grocery_category.trim(), notes.trim(), kitchen_staple)?
        {
            bail!("Ingredient {id} not found");
        }
        self.db.get_ingredient(id)
    }

    pub fn update_ingredient_library(&self, updates: &[IngredientUpdate]) -> Result<usize> {
        self.db.update_ingredient_library(updates)
    }

    pub fn import_library_csv(&self, csv_data: &str, dry_run: bool) -> Result<LibraryImportSummary> {
        let rows = library_import::parse_library_csv(csv_data.as_bytes())?;
        library_import::import_library(&self.db, &rows, dry_run)
    }

    // --- Shopping list ---

    /// Add one more of an existing recipe to the selection. Returns the new count.
    pub fn select_recipe(
        &self,
        selection: &mut ShoppingListSelection,
        recipe_id: i64,
    ) -> Result<u32> {
        if !self.db.recipe_exists(recipe_id)? {
            bail!("Recipe {recipe_id} not found");
        }
        Ok(selection.add(recipe_id))
    }

    pub fn build_shopping_list(
        &self,
        selection: &ShoppingListSelection,
    ) -> Result<Vec<AggregatedShoppingEntry>> {
        self.db.build_shopping_list(selection)
    }

    // --- Assistant ---

    pub fn ask_assistant(
        &self,
        provider: &dyn AssistantProvider,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<String> {
        let message = message.trim();
        if message.is_empty() {
            bail!("Message must not be empty");
        }
        let transcript = assistant::build_transcript(history, message);
        provider
            .reply(&transcript)
            .context("Recipe assistant request failed")
    }
}
