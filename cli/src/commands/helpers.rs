use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Read;
use std::path::Path;

use recipebox_core::library_import::parse_staple_flag;

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

pub(crate) fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// clap value parser for yes/no style flags.
pub(crate) fn parse_flag_arg(s: &str) -> Result<bool, String> {
    parse_staple_flag(s).map_err(|e| e.to_string())
}

/// Ingredient text from `--ingredients` or `--ingredients-file` (`-` reads stdin).
pub(crate) fn read_ingredient_text(
    inline: Option<String>,
    file: Option<&Path>,
) -> Result<Option<String>> {
    if inline.is_some() {
        return Ok(inline);
    }
    let Some(file) = file else {
        return Ok(None);
    };
    if file == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read ingredients from stdin")?;
        return Ok(Some(text));
    }
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    Ok(Some(text))
}
