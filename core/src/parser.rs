use serde::{Deserialize, Serialize};

/// One free-text ingredient line split into its parts.
///
/// `amount` is kept as raw text: quantities such as `2-3` or `to taste`
/// are valid and only coerced to numbers when a shopping list is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientLine {
    pub amount: String,
    pub unit: String,
    pub name: String,
}

impl IngredientLine {
    #[must_use]
    pub fn to_line(&self) -> String {
        format_line(&self.amount, &self.unit, &self.name)
    }
}

/// Split one ingredient line into `(amount, unit, name)`.
///
/// Only the first two whitespace runs separate tokens, so the name keeps its
/// own spaces (`"2 tbsp olive oil"` names `"olive oil"`). Missing trailing
/// tokens are empty. Returns `None` for a blank line.
#[must_use]
pub fn parse_line(line: &str) -> Option<IngredientLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (amount, rest) = split_token(line);
    let (unit, name) = split_token(rest);

    Some(IngredientLine {
        amount: amount.to_string(),
        unit: unit.to_string(),
        name: name.to_string(),
    })
}

/// Parse every non-blank line of a multi-line ingredient text, in order.
#[must_use]
pub fn parse_lines(text: &str) -> Vec<IngredientLine> {
    text.lines().filter_map(parse_line).collect()
}

/// Inverse of [`parse_line`]: join the parts with single spaces, omitting empty ones.
#[must_use]
pub fn format_line(amount: &str, unit: &str, name: &str) -> String {
    [amount, unit, name]
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Take the leading token and return it with the remainder (leading whitespace removed).
fn split_token(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (s, ""),
    }
}
