use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use rusqlite::{
    Connection, OptionalExtension, Transaction, TransactionBehavior, params, params_from_iter,
};
use tracing::{debug, info};

use crate::models::{
    Ingredient, IngredientUpdate, NewRecipe, Recipe, RecipeDetail, RecipeFilter, RecipeIngredient,
    UpdateRecipe, UsedIngredient, split_tags,
};
use crate::parser::{IngredientLine, parse_lines};
use crate::shopping::{AggregatedShoppingEntry, ShoppingListSelection, ShoppingRow, aggregate};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RECIPE_COLUMNS: &str = "id, title, description, instructions, notes, image_url, menu, section, tags, created_at, updated_at";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    // Writers take the lock up front so a busy database waits out the busy
    // timeout instead of failing on a read-to-write upgrade.
    fn write_transaction(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", "ON")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS recipe (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    instructions TEXT NOT NULL DEFAULT '',
                    notes TEXT NOT NULL DEFAULT '',
                    image_url TEXT NOT NULL DEFAULT '',
                    menu TEXT NOT NULL DEFAULT '',
                    section TEXT NOT NULL DEFAULT '',
                    tags TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS ingredient (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    grocery_category TEXT NOT NULL DEFAULT '',
                    notes TEXT NOT NULL DEFAULT '',
                    kitchen_staple INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredient (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipe(id),
                    ingredient_id INTEGER NOT NULL REFERENCES ingredient(id),
                    position INTEGER NOT NULL,
                    amount TEXT NOT NULL DEFAULT '',
                    unit TEXT NOT NULL DEFAULT '',
                    note TEXT NOT NULL DEFAULT ''
                );

                CREATE INDEX IF NOT EXISTS idx_recipe_ingredient_recipe
                    ON recipe_ingredient(recipe_id, position);
                CREATE INDEX IF NOT EXISTS idx_recipe_ingredient_ingredient
                    ON recipe_ingredient(ingredient_id);
                CREATE INDEX IF NOT EXISTS idx_recipe_menu ON recipe(menu, section);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            instructions: row.get(3)?,
            notes: row.get(4)?,
            image_url: row.get(5)?,
            menu: row.get(6)?,
            section: row.get(7)?,
            tags: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            name: row.get(1)?,
            grocery_category: row.get(2)?,
            notes: row.get(3)?,
            kitchen_staple: row.get(4)?,
        })
    }

    // Expects columns:
    // 0: ri.recipe_id, 1: ri.ingredient_id, 2: ri.position, 3: i.name,
    // 4: ri.amount, 5: ri.unit, 6: ri.note, 7: i.grocery_category, 8: i.kitchen_staple
    fn recipe_ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<RecipeIngredient> {
        Ok(RecipeIngredient {
            recipe_id: row.get(0)?,
            ingredient_id: row.get(1)?,
            position: row.get(2)?,
            name: row.get(3)?,
            amount: row.get(4)?,
            unit: row.get(5)?,
            note: row.get(6)?,
            grocery_category: row.get(7)?,
            kitchen_staple: row.get(8)?,
        })
    }

    // --- Recipes ---

    /// Insert a recipe together with its ingredient set. Nothing is written if any line fails.
    pub fn create_recipe(&self, recipe: &NewRecipe, lines: &[IngredientLine]) -> Result<Recipe> {
        let now = Local::now().to_rfc3339();
        let tx = self.write_transaction()?;
        tx.execute(
            "INSERT INTO recipe (title, description, instructions, notes, image_url, menu, section, tags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                recipe.title,
                recipe.description,
                recipe.instructions,
                recipe.notes,
                recipe.image_url,
                recipe.menu,
                recipe.section,
                recipe.tags,
                now,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        Self::write_ingredient_lines(&tx, id, lines)?;
        tx.commit()
            .with_context(|| format!("Recipe '{}' was not created", recipe.title))?;

        info!(recipe_id = id, lines = lines.len(), "created recipe");
        self.get_recipe(id)
    }

    pub fn get_recipe(&self, id: i64) -> Result<Recipe> {
        self.find_recipe(id)?
            .with_context(|| format!("Recipe {id} not found"))
    }

    pub fn find_recipe(&self, id: i64) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipe WHERE id = ?1"),
                params![id],
                Self::recipe_from_row,
            )
            .optional()?;
        Ok(recipe)
    }

    pub fn recipe_exists(&self, id: i64) -> Result<bool> {
        Self::recipe_exists_in(&self.conn, id)
    }

    fn recipe_exists_in(conn: &Connection, id: i64) -> Result<bool> {
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM recipe WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Rewrite descriptive fields in place and, when `lines` is given, replace the
    /// ingredient set. Both happen in one transaction.
    pub fn update_recipe(
        &self,
        id: i64,
        update: &UpdateRecipe,
        lines: Option<&[IngredientLine]>,
    ) -> Result<Recipe> {
        let tx = self.write_transaction()?;
        if !Self::recipe_exists_in(&tx, id)? {
            bail!("Recipe {id} not found");
        }

        if !update.is_empty() {
            let now = Local::now().to_rfc3339();
            tx.execute(
                "UPDATE recipe SET
                    title = COALESCE(?1, title),
                    description = COALESCE(?2, description),
                    instructions = COALESCE(?3, instructions),
                    notes = COALESCE(?4, notes),
                    image_url = COALESCE(?5, image_url),
                    menu = COALESCE(?6, menu),
                    section = COALESCE(?7, section),
                    tags = COALESCE(?8, tags),
                    updated_at = ?9
                 WHERE id = ?10",
                params![
                    update.title,
                    update.description,
                    update.instructions,
                    update.notes,
                    update.image_url,
                    update.menu,
                    update.section,
                    update.tags,
                    now,
                    id,
                ],
            )?;
        }

        if let Some(lines) = lines {
            Self::write_ingredient_lines(&tx, id, lines)?;
            tx.execute(
                "UPDATE recipe SET updated_at = ?1 WHERE id = ?2",
                params![Local::now().to_rfc3339(), id],
            )?;
        }

        tx.commit()
            .with_context(|| format!("Update of recipe {id} did not apply"))?;
        self.get_recipe(id)
    }

    /// Delete a recipe and its ingredient links. Returns false if the recipe did not exist.
    pub fn delete_recipe(&self, id: i64) -> Result<bool> {
        let tx = self.write_transaction()?;
        let links = tx.execute(
            "DELETE FROM recipe_ingredient WHERE recipe_id = ?1",
            params![id],
        )?;
        let rows = tx.execute("DELETE FROM recipe WHERE id = ?1", params![id])?;
        tx.commit()
            .with_context(|| format!("Deletion of recipe {id} did not apply"))?;

        if rows > 0 {
            info!(recipe_id = id, links, "deleted recipe");
        }
        Ok(rows > 0)
    }

    /// Recipes matching every tag (case-insensitive substring of the tag text)
    /// and the exact menu/section when given, ordered by id.
    pub fn list_recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>> {
        let mut sql = format!("SELECT {RECIPE_COLUMNS} FROM recipe WHERE 1 = 1");
        let mut values: Vec<String> = Vec::new();

        for tag in filter.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            let escaped = tag
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            values.push(format!("%{escaped}%"));
            sql.push_str(&format!(" AND tags LIKE ?{} ESCAPE '\\'", values.len()));
        }
        if let Some(menu) = &filter.menu {
            values.push(menu.clone());
            sql.push_str(&format!(" AND menu = ?{}", values.len()));
        }
        if let Some(section) = &filter.section {
            values.push(section.clone());
            sql.push_str(&format!(" AND section = ?{}", values.len()));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let recipes = stmt
            .query_map(params_from_iter(values.iter()), Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    /// Every distinct tag across all recipes, sorted.
    pub fn list_tags(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT tags FROM recipe")?;
        let tag_texts = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let tags: BTreeSet<String> = tag_texts.iter().flat_map(|t| split_tags(t)).collect();
        Ok(tags.into_iter().collect())
    }

    pub fn get_recipe_detail(&self, id: i64) -> Result<RecipeDetail> {
        let recipe = self.get_recipe(id)?;
        let ingredients = self.get_recipe_ingredients(id)?;
        let ingredient_text = ingredients
            .iter()
            .map(RecipeIngredient::to_line)
            .collect::<Vec<_>>()
            .join("\n");
        Ok(RecipeDetail {
            recipe,
            ingredients,
            ingredient_text,
        })
    }

    // --- Ingredient catalog ---

    /// Id of the catalog entry named exactly `name`, creating it if absent.
    pub fn resolve_ingredient(&self, name: &str) -> Result<i64> {
        let tx = self.write_transaction()?;
        let id = Self::resolve_ingredient_in(&tx, name)?;
        tx.commit()?;
        Ok(id)
    }

    // Insert-or-fetch against the UNIQUE(name) constraint; a concurrent insert of
    // the same name resolves to the existing row instead of failing.
    fn resolve_ingredient_in(conn: &Connection, name: &str) -> Result<i64> {
        let inserted = conn.execute(
            "INSERT INTO ingredient (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        if inserted > 0 {
            let id = conn.last_insert_rowid();
            debug!(ingredient_id = id, name, "added ingredient to catalog");
            return Ok(id);
        }
        conn.query_row(
            "SELECT id FROM ingredient WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .with_context(|| format!("Failed to resolve ingredient '{name}'"))
    }

    pub fn get_ingredient(&self, id: i64) -> Result<Ingredient> {
        self.conn
            .query_row(
                "SELECT id, name, grocery_category, notes, kitchen_staple FROM ingredient WHERE id = ?1",
                params![id],
                Self::ingredient_from_row,
            )
            .optional()?
            .with_context(|| format!("Ingredient {id} not found"))
    }

    pub fn find_ingredient_by_name(&self, name: &str) -> Result<Option<Ingredient>> {
        let ingredient = self
            .conn
            .query_row(
                "SELECT id, name, grocery_category, notes, kitchen_staple FROM ingredient WHERE name = ?1",
                params![name],
                Self::ingredient_from_row,
            )
            .optional()?;
        Ok(ingredient)
    }

    pub fn list_ingredients(&self) -> Result<Vec<Ingredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, grocery_category, notes, kitchen_staple FROM ingredient ORDER BY name, id",
        )?;
        let ingredients = stmt
            .query_map([], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    /// Overwrite classification fields. The name is never touched.
    pub fn update_ingredient_metadata(
        &self,
        id: i64,
        grocery_category: &str,
        notes: &str,
        kitchen_staple: bool,
    ) -> Result<bool> {
        Self::update_ingredient_metadata_in(&self.conn, id, grocery_category, notes, kitchen_staple)
    }

    fn update_ingredient_metadata_in(
        conn: &Connection,
        id: i64,
        grocery_category: &str,
        notes: &str,
        kitchen_staple: bool,
    ) -> Result<bool> {
        let rows = conn.execute(
            "UPDATE ingredient SET grocery_category = ?1, notes = ?2, kitchen_staple = ?3 WHERE id = ?4",
            params![grocery_category, notes, kitchen_staple, id],
        )?;
        Ok(rows > 0)
    }

    /// Apply a batch of metadata edits atomically. Unknown ids are skipped.
    /// Returns the number of rows updated.
    pub fn update_ingredient_library(&self, updates: &[IngredientUpdate]) -> Result<usize> {
        let tx = self.write_transaction()?;
        let mut updated = 0;
        for update in updates {
            if Self::update_ingredient_metadata_in(
                &tx,
                update.id,
                &update.grocery_category,
                &update.notes,
                update.kitchen_staple,
            )? {
                updated += 1;
            } else {
                debug!(ingredient_id = update.id, "skipping unknown ingredient");
            }
        }
        tx.commit()
            .context("Ingredient library edit did not apply")?;
        Ok(updated)
    }

    /// Every ingredient referenced by at least one recipe, ordered by name,
    /// with the ids of the recipes that use it.
    pub fn list_used_ingredients(&self) -> Result<Vec<UsedIngredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT i.id, i.name, i.grocery_category, i.notes, i.kitchen_staple, ri.recipe_id
             FROM ingredient i
             JOIN recipe_ingredient ri ON ri.ingredient_id = i.id
             ORDER BY i.name, i.id, ri.recipe_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((Self::ingredient_from_row(row)?, row.get::<_, i64>(5)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut used: Vec<UsedIngredient> = Vec::new();
        for (ingredient, recipe_id) in rows {
            match used.last_mut() {
                Some(last) if last.ingredient.id == ingredient.id => {
                    last.recipe_ids.push(recipe_id);
                }
                _ => used.push(UsedIngredient {
                    ingredient,
                    recipe_ids: vec![recipe_id],
                }),
            }
        }
        Ok(used)
    }

    // --- Recipe ingredient sets ---

    /// Replace a recipe's ingredient set from multi-line text. Blank lines are skipped.
    /// Returns the number of links written.
    pub fn replace_recipe_ingredients(&self, recipe_id: i64, text: &str) -> Result<usize> {
        self.replace_recipe_ingredient_lines(recipe_id, &parse_lines(text))
    }

    pub fn replace_recipe_ingredient_lines(
        &self,
        recipe_id: i64,
        lines: &[IngredientLine],
    ) -> Result<usize> {
        let tx = self.write_transaction()?;
        if !Self::recipe_exists_in(&tx, recipe_id)? {
            bail!("Recipe {recipe_id} not found");
        }
        let written = Self::write_ingredient_lines(&tx, recipe_id, lines)?;
        tx.commit()
            .with_context(|| format!("Ingredient replacement for recipe {recipe_id} did not apply"))?;
        Ok(written)
    }

    // Delete-then-reinsert; callers own the surrounding transaction.
    fn write_ingredient_lines(
        conn: &Connection,
        recipe_id: i64,
        lines: &[IngredientLine],
    ) -> Result<usize> {
        let removed = conn.execute(
            "DELETE FROM recipe_ingredient WHERE recipe_id = ?1",
            params![recipe_id],
        )?;

        let mut position: i64 = 0;
        for line in lines {
            let ingredient_id = Self::resolve_ingredient_in(conn, &line.name)?;
            conn.execute(
                "INSERT INTO recipe_ingredient (recipe_id, ingredient_id, position, amount, unit, note)
                 VALUES (?1, ?2, ?3, ?4, ?5, '')",
                params![recipe_id, ingredient_id, position, line.amount, line.unit],
            )
            .with_context(|| format!("Failed to add '{}' to recipe {recipe_id}", line.to_line()))?;
            position += 1;
        }

        debug!(recipe_id, removed, written = lines.len(), "replaced ingredient set");
        Ok(lines.len())
    }

    pub fn get_recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT ri.recipe_id, ri.ingredient_id, ri.position, i.name,
                    ri.amount, ri.unit, ri.note, i.grocery_category, i.kitchen_staple
             FROM recipe_ingredient ri
             JOIN ingredient i ON ri.ingredient_id = i.id
             WHERE ri.recipe_id = ?1
             ORDER BY ri.position, ri.id",
        )?;
        let ingredients = stmt
            .query_map(params![recipe_id], Self::recipe_ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    /// The editable text form of a recipe's ingredients, one line per link in entry order.
    pub fn get_ingredient_text(&self, recipe_id: i64) -> Result<String> {
        let lines: Vec<String> = self
            .get_recipe_ingredients(recipe_id)?
            .iter()
            .map(RecipeIngredient::to_line)
            .collect();
        Ok(lines.join("\n"))
    }

    // --- Shopping list ---

    fn shopping_rows_in(conn: &Connection, recipe_id: i64) -> Result<Vec<ShoppingRow>> {
        let mut stmt = conn.prepare(
            "SELECT i.name, ri.amount, ri.unit, i.grocery_category, i.kitchen_staple
             FROM recipe_ingredient ri
             JOIN ingredient i ON ri.ingredient_id = i.id
             WHERE ri.recipe_id = ?1
             ORDER BY ri.position, ri.id",
        )?;
        let rows = stmt
            .query_map(params![recipe_id], |row| {
                Ok(ShoppingRow {
                    name: row.get(0)?,
                    amount: row.get(1)?,
                    unit: row.get(2)?,
                    grocery_category: row.get(3)?,
                    kitchen_staple: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Build the consolidated shopping list for a selection from one consistent snapshot.
    /// Keys that are not ids of existing recipes are skipped.
    pub fn build_shopping_list(
        &self,
        selection: &ShoppingListSelection,
    ) -> Result<Vec<AggregatedShoppingEntry>> {
        let tx = self.conn.unchecked_transaction()?;
        let mut per_recipe: Vec<(Vec<ShoppingRow>, u32)> = Vec::with_capacity(selection.len());

        for (key, count) in selection.iter() {
            let Ok(recipe_id) = key.trim().parse::<i64>() else {
                debug!(key, "skipping non-numeric shopping list key");
                continue;
            };
            if count == 0 || !Self::recipe_exists_in(&tx, recipe_id)? {
                debug!(recipe_id, "skipping missing recipe in shopping list");
                continue;
            }
            per_recipe.push((Self::shopping_rows_in(&tx, recipe_id)?, count));
        }
        tx.commit().context("Failed to read shopping list")?;

        Ok(aggregate(
            per_recipe
                .iter()
                .map(|(rows, count)| (rows.as_slice(), *count)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shopping::Quantity;

    fn sample_recipe(title: &str) -> NewRecipe {
        NewRecipe {
            title: title.to_string(),
            description: "Klassisk svensk husmanskost".to_string(),
            instructions: "1. Blanda.\n2. Stek.".to_string(),
            tags: "husmanskost,kött,potatis".to_string(),
            menu: "dinner".to_string(),
            section: "mains".to_string(),
            ..NewRecipe::default()
        }
    }

    fn create_with_text(db: &Database, title: &str, text: &str) -> Recipe {
        db.create_recipe(&sample_recipe(title), &parse_lines(text))
            .unwrap()
    }

    fn link_count(db: &Database, recipe_id: i64) -> i64 {
        db.conn
            .query_row(
                "SELECT COUNT(*) FROM recipe_ingredient WHERE recipe_id = ?1",
                params![recipe_id],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_create_and_get_recipe() {
        let db = Database::open_in_memory().unwrap();
        let recipe = create_with_text(&db, "Köttbullar", "500 g köttfärs\n1 st ägg");

        let fetched = db.get_recipe(recipe.id).unwrap();
        assert_eq!(fetched.title, "Köttbullar");
        assert_eq!(fetched.menu, "dinner");
        assert_eq!(fetched.tag_list(), vec!["husmanskost", "kött", "potatis"]);
        assert!(!fetched.created_at.is_empty());
        assert_eq!(link_count(&db, recipe.id), 2);
    }

    #[test]
    fn test_get_recipe_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_recipe(42).is_err());
        assert!(db.find_recipe(42).unwrap().is_none());
        assert!(!db.recipe_exists(42).unwrap());
    }

    #[test]
    fn test_update_recipe_fields() {
        let db = Database::open_in_memory().unwrap();
        let recipe = create_with_text(&db, "Pannkakor", "3 dl mjöl");

        let updated = db
            .update_recipe(
                recipe.id,
                &UpdateRecipe {
                    title: Some("Tunna pannkakor".to_string()),
                    notes: Some("Vila smeten".to_string()),
                    ..UpdateRecipe::default()
                },
                None,
            )
            .unwrap();

        assert_eq!(updated.id, recipe.id);
        assert_eq!(updated.title, "Tunna pannkakor");
        assert_eq!(updated.notes, "Vila smeten");
        assert_eq!(updated.description, recipe.description);
        assert_eq!(link_count(&db, recipe.id), 1);
    }

    #[test]
    fn test_update_recipe_with_ingredients() {
        let db = Database::open_in_memory().unwrap();
        let recipe = create_with_text(&db, "Pannkakor", "3 dl mjöl\n6 dl mjölk");

        db.update_recipe(
            recipe.id,
            &UpdateRecipe::default(),
            Some(&parse_lines("3 st ägg")),
        )
        .unwrap();

        assert_eq!(db.get_ingredient_text(recipe.id).unwrap(), "3 st ägg");
    }

    #[test]
    fn test_update_missing_recipe() {
        let db = Database::open_in_memory().unwrap();
        let result = db.update_recipe(99, &UpdateRecipe::default(), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_delete_recipe_removes_links() {
        let db = Database::open_in_memory().unwrap();
        let recipe = create_with_text(&db, "Soppa", "1 l buljong\n2 st morötter");

        assert!(db.delete_recipe(recipe.id).unwrap());
        assert!(!db.recipe_exists(recipe.id).unwrap());
        assert_eq!(link_count(&db, recipe.id), 0);
        // Catalog entries outlive the recipe
        assert!(db.find_ingredient_by_name("buljong").unwrap().is_some());

        assert!(!db.delete_recipe(recipe.id).unwrap());
    }

    #[test]
    fn test_list_recipes_filters_by_tags() {
        let db = Database::open_in_memory().unwrap();
        let a = db
            .create_recipe(
                &NewRecipe {
                    title: "Kycklinggryta".to_string(),
                    tags: "chicken,swedish".to_string(),
                    ..NewRecipe::default()
                },
                &[],
            )
            .unwrap();
        db.create_recipe(
            &NewRecipe {
                title: "Chicken curry".to_string(),
                tags: "chicken,indian".to_string(),
                ..NewRecipe::default()
            },
            &[],
        )
        .unwrap();

        assert_eq!(db.list_recipes(&RecipeFilter::default()).unwrap().len(), 2);

        let chicken = RecipeFilter {
            tags: vec!["chicken".to_string()],
            ..RecipeFilter::default()
        };
        assert_eq!(db.list_recipes(&chicken).unwrap().len(), 2);

        let swedish_chicken = RecipeFilter {
            tags: vec!["Chicken".to_string(), "swedish".to_string()],
            ..RecipeFilter::default()
        };
        let found = db.list_recipes(&swedish_chicken).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);
    }

    #[test]
    fn test_list_recipes_tag_wildcards_are_literal() {
        let db = Database::open_in_memory().unwrap();
        db.create_recipe(
            &NewRecipe {
                title: "Plain".to_string(),
                tags: "vegan".to_string(),
                ..NewRecipe::default()
            },
            &[],
        )
        .unwrap();
        let filter = RecipeFilter {
            tags: vec!["%".to_string()],
            ..RecipeFilter::default()
        };
        assert!(db.list_recipes(&filter).unwrap().is_empty());
    }

    #[test]
    fn test_list_recipes_filters_by_menu_and_section() {
        let db = Database::open_in_memory().unwrap();
        create_with_text(&db, "Köttbullar", "");
        db.create_recipe(
            &NewRecipe {
                title: "Gröt".to_string(),
                menu: "breakfast".to_string(),
                ..NewRecipe::default()
            },
            &[],
        )
        .unwrap();

        let dinner = RecipeFilter {
            menu: Some("dinner".to_string()),
            section: Some("mains".to_string()),
            ..RecipeFilter::default()
        };
        let found = db.list_recipes(&dinner).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Köttbullar");
    }

    #[test]
    fn test_list_tags() {
        let db = Database::open_in_memory().unwrap();
        create_with_text(&db, "A", "");
        db.create_recipe(
            &NewRecipe {
                title: "B".to_string(),
                tags: "potatis, vegetarisk".to_string(),
                ..NewRecipe::default()
            },
            &[],
        )
        .unwrap();
        assert_eq!(
            db.list_tags().unwrap(),
            vec!["husmanskost", "kött", "potatis", "vegetarisk"]
        );
    }

    #[test]
    fn test_resolve_creates_once() {
        let db = Database::open_in_memory().unwrap();
        let first = db.resolve_ingredient("flour").unwrap();
        let second = db.resolve_ingredient("flour").unwrap();
        assert_eq!(first, second);
        assert_eq!(db.list_ingredients().unwrap().len(), 1);

        let ingredient = db.get_ingredient(first).unwrap();
        assert_eq!(ingredient.name, "flour");
        assert_eq!(ingredient.grocery_category, "");
        assert_eq!(ingredient.notes, "");
        assert!(!ingredient.kitchen_staple);
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        let db = Database::open_in_memory().unwrap();
        let lower = db.resolve_ingredient("onion").unwrap();
        let upper = db.resolve_ingredient("Onion").unwrap();
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_resolve_allows_empty_name() {
        let db = Database::open_in_memory().unwrap();
        let id = db.resolve_ingredient("").unwrap();
        assert_eq!(db.get_ingredient(id).unwrap().name, "");
        assert_eq!(db.resolve_ingredient("").unwrap(), id);
    }

    #[test]
    fn test_resolve_same_name_from_separate_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        // Create the schema before the threads race on it
        drop(Database::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let db = Database::open(&path).unwrap();
                    db.resolve_ingredient("saffron").unwrap()
                })
            })
            .collect();
        let ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_ingredients().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_ingredient_edits_from_separate_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edits.db");
        let recipe_id = {
            let db = Database::open(&path).unwrap();
            create_with_text(&db, "Gryta", "1 st lök").id
        };

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let db = Database::open(&path).unwrap();
                    for round in 0..10 {
                        let text = format!("{worker} st lök\n{round} dl grädde");
                        db.replace_recipe_ingredients(recipe_id, &text).unwrap();
                        db.update_recipe(
                            recipe_id,
                            &UpdateRecipe {
                                notes: Some(format!("worker {worker}")),
                                ..UpdateRecipe::default()
                            },
                            None,
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_recipe_ingredients(recipe_id).unwrap().len(), 2);
    }

    #[test]
    fn test_shared_name_resolves_to_same_ingredient() {
        let db = Database::open_in_memory().unwrap();
        let a = create_with_text(&db, "A", "2 dl grädde");
        let b = create_with_text(&db, "B", "1 dl grädde");
        let a_ing = db.get_recipe_ingredients(a.id).unwrap();
        let b_ing = db.get_recipe_ingredients(b.id).unwrap();
        assert_eq!(a_ing[0].ingredient_id, b_ing[0].ingredient_id);
    }

    #[test]
    fn test_update_ingredient_metadata_keeps_name() {
        let db = Database::open_in_memory().unwrap();
        let id = db.resolve_ingredient("salt").unwrap();
        assert!(db
            .update_ingredient_metadata(id, "Spices", "flingsalt", true)
            .unwrap());

        let ingredient = db.get_ingredient(id).unwrap();
        assert_eq!(ingredient.name, "salt");
        assert_eq!(ingredient.grocery_category, "Spices");
        assert_eq!(ingredient.notes, "flingsalt");
        assert!(ingredient.kitchen_staple);

        assert!(!db.update_ingredient_metadata(999, "", "", false).unwrap());
    }

    #[test]
    fn test_update_ingredient_library_batch() {
        let db = Database::open_in_memory().unwrap();
        let salt = db.resolve_ingredient("salt").unwrap();
        let milk = db.resolve_ingredient("milk").unwrap();

        let updated = db
            .update_ingredient_library(&[
                IngredientUpdate {
                    id: salt,
                    grocery_category: String::new(),
                    notes: String::new(),
                    kitchen_staple: true,
                },
                IngredientUpdate {
                    id: milk,
                    grocery_category: "Dairy".to_string(),
                    notes: String::new(),
                    kitchen_staple: false,
                },
                IngredientUpdate {
                    id: 12345,
                    grocery_category: "Nowhere".to_string(),
                    notes: String::new(),
                    kitchen_staple: false,
                },
            ])
            .unwrap();

        assert_eq!(updated, 2);
        assert!(db.get_ingredient(salt).unwrap().kitchen_staple);
        assert_eq!(db.get_ingredient(milk).unwrap().grocery_category, "Dairy");
    }

    #[test]
    fn test_list_used_ingredients() {
        let db = Database::open_in_memory().unwrap();
        let a = create_with_text(&db, "A", "2 st lök\n1 tsk salt");
        let b = create_with_text(&db, "B", "1 st lök\n1 st lök");
        db.resolve_ingredient("unused").unwrap();

        let used = db.list_used_ingredients().unwrap();
        let names: Vec<&str> = used.iter().map(|u| u.ingredient.name.as_str()).collect();
        assert_eq!(names, vec!["lök", "salt"]);
        assert_eq!(used[0].recipe_ids, vec![a.id, b.id]);
        assert_eq!(used[1].recipe_ids, vec![a.id]);
    }

    #[test]
    fn test_replace_ingredients_full_replace() {
        let db = Database::open_in_memory().unwrap();
        let recipe = create_with_text(&db, "Gryta", "1 st lök\n2 st morot\n3 st potatis");
        let old_ids: Vec<i64> = db
            .conn
            .prepare("SELECT id FROM recipe_ingredient WHERE recipe_id = ?1")
            .unwrap()
            .query_map(params![recipe.id], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let written = db
            .replace_recipe_ingredients(recipe.id, "500 g nötkött\n\n  \n2 dl vin\n")
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(link_count(&db, recipe.id), 2);

        let remaining_old: i64 = db
            .conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM recipe_ingredient WHERE id IN ({})",
                    old_ids
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                ),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(remaining_old, 0);
    }

    #[test]
    fn test_replace_ingredients_missing_recipe() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.replace_recipe_ingredients(7, "1 st ägg").is_err());
        assert!(db.list_ingredients().unwrap().is_empty());
    }

    #[test]
    fn test_replace_ingredients_rolls_back_on_failure() {
        let db = Database::open_in_memory().unwrap();
        let recipe = create_with_text(&db, "Omelett", "3 st ägg\n1 msk smör");
        db.conn
            .execute_batch(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON ingredient
                 WHEN NEW.name = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let result = db.replace_recipe_ingredients(recipe.id, "2 st tomat\n1 st boom");
        assert!(result.is_err());

        assert_eq!(
            db.get_ingredient_text(recipe.id).unwrap(),
            "3 st ägg\n1 msk smör"
        );
        assert!(db.find_ingredient_by_name("tomat").unwrap().is_none());
    }

    #[test]
    fn test_ingredient_text_round_trip_preserves_order() {
        let db = Database::open_in_memory().unwrap();
        let text = "500 g köttfärs\n1 st gul lök\nsalt\n2 krm vitpeppar\n1 dl ströbröd";
        let recipe = create_with_text(&db, "Köttbullar", text);
        assert_eq!(db.get_ingredient_text(recipe.id).unwrap(), text);

        let detail = db.get_recipe_detail(recipe.id).unwrap();
        assert_eq!(detail.ingredient_text, text);
        assert_eq!(detail.ingredients.len(), 5);
        assert_eq!(detail.ingredients[1].name, "gul lök");
        assert_eq!(detail.ingredients[2].amount, "salt");
        assert_eq!(detail.ingredients[2].name, "");
    }

    #[test]
    fn test_shopping_list_empty_selection() {
        let db = Database::open_in_memory().unwrap();
        create_with_text(&db, "A", "100 g flour");
        let list = db
            .build_shopping_list(&ShoppingListSelection::new())
            .unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_shopping_list_scales_recipe() {
        let db = Database::open_in_memory().unwrap();
        let recipe = create_with_text(&db, "Bröd", "100 g flour");
        let flour = db.find_ingredient_by_name("flour").unwrap().unwrap();
        db.update_ingredient_metadata(flour.id, "Bakery", "", false)
            .unwrap();

        let mut selection = ShoppingListSelection::new();
        selection.set(recipe.id, 3).unwrap();
        let list = db.build_shopping_list(&selection).unwrap();

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "flour");
        assert_eq!(list[0].unit, "g");
        assert_eq!(list[0].grocery_category, "Bakery");
        assert!(!list[0].kitchen_staple);
        assert_eq!(list[0].quantity, Quantity::Numeric(300.0));
    }

    #[test]
    fn test_shopping_list_skips_missing_recipes() {
        let db = Database::open_in_memory().unwrap();
        let recipe = create_with_text(&db, "A", "2 st ägg");
        let gone = create_with_text(&db, "B", "1 l mjölk");
        db.delete_recipe(gone.id).unwrap();

        let selection: ShoppingListSelection = serde_json::from_str(&format!(
            r#"{{"{}": 1, "{}": 2, "not-a-number": 4}}"#,
            recipe.id, gone.id
        ))
        .unwrap();
        let list = db.build_shopping_list(&selection).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "ägg");
    }

    #[test]
    fn test_shopping_list_merges_and_sorts() {
        let db = Database::open_in_memory().unwrap();
        let a = create_with_text(&db, "A", "1 l Milk\n1 tsk Salt\n500 g Flour");
        let b = create_with_text(&db, "B", "2 l Milk");
        for (name, category, staple) in [
            ("Milk", "Dairy", false),
            ("Salt", "", true),
            ("Flour", "Bakery", false),
        ] {
            let ing = db.find_ingredient_by_name(name).unwrap().unwrap();
            db.update_ingredient_metadata(ing.id, category, "", staple)
                .unwrap();
        }

        let mut selection = ShoppingListSelection::new();
        selection.add(a.id);
        selection.set(b.id, 2).unwrap();
        let list = db.build_shopping_list(&selection).unwrap();

        let names: Vec<&str> = list.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Salt", "Flour", "Milk"]);
        assert_eq!(list[2].quantity, Quantity::Numeric(5.0));
    }

    #[test]
    fn test_shopping_list_is_deterministic() {
        let db = Database::open_in_memory().unwrap();
        let a = create_with_text(&db, "A", "1 nypa salt\n2 st lök\nlite persilja");
        let b = create_with_text(&db, "B", "några nypor salt\n1 st lök");
        let mut selection = ShoppingListSelection::new();
        selection.add(a.id);
        selection.set(b.id, 2).unwrap();

        let first = serde_json::to_string(&db.build_shopping_list(&selection).unwrap()).unwrap();
        let second = serde_json::to_string(&db.build_shopping_list(&selection).unwrap()).unwrap();
        assert_eq!(first, second);
    }
}
