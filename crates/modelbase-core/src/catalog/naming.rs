//! Deterministic naming rules for synthesized tables.

use heck::{ToSnakeCase, ToTitleCase};

const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("datum", "data"),
    ("index", "indices"),
];

const UNCOUNTABLE: &[&str] = &["data", "metadata", "information", "equipment", "series", "news"];

/// Table name for a declaration name: snake case with the last word pluralized.
///
/// `User` becomes `users`, `TeamMember` becomes `team_members`,
/// `Category` becomes `categories`.
pub fn table_name_for(declaration: &str) -> String {
    let snake = declaration.to_snake_case();
    match snake.rsplit_once('_') {
        Some((head, last)) => format!("{head}_{}", pluralize(last)),
        None => pluralize(&snake),
    }
}

/// Human readable name for a declaration name, used in column comments.
pub fn friendly_name_for(declaration: &str) -> String {
    declaration.to_title_case()
}

/// Pluralize a single lowercase English word.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() || UNCOUNTABLE.contains(&word) {
        return word.to_string();
    }

    if let Some((_, plural)) = IRREGULAR_PLURALS.iter().find(|(singular, _)| *singular == word) {
        return (*plural).to_string();
    }

    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last();
        if before.is_some_and(|c| !"aeiou".contains(c)) {
            return format!("{stem}ies");
        }
    }

    if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| word.ends_with(suffix)) {
        return format!("{word}es");
    }

    format!("{word}s")
}
