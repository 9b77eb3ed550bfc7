mod chat;
mod helpers;
mod ingredient;
mod recipe;
mod shop;

pub(crate) use chat::cmd_chat;
pub(crate) use helpers::parse_flag_arg;
pub(crate) use ingredient::{
    cmd_ingredient_import, cmd_ingredient_list, cmd_ingredient_set, cmd_ingredient_used,
};
pub(crate) use recipe::{
    RecipeFieldArgs, cmd_recipe_add, cmd_recipe_delete, cmd_recipe_edit, cmd_recipe_import,
    cmd_recipe_list, cmd_recipe_show, cmd_recipe_tags,
};
pub(crate) use shop::{SelectionChange, cmd_shop_change, cmd_shop_clear, cmd_shop_show};
