//! Interactive model/scale picker.

use crate::models::{MenuOption, ModelCategory, ModelMenu};
use console::{style, Term};
use shared_utils::{Result, UpscaleError};
use std::path::PathBuf;

pub const COLUMN_WIDTH: usize = 40;

const UNIVERSAL_HEADER: &str = "Universal";
const ANIME_HEADER: &str = "Anime / 2D";

/// Header, rule and option rows, unstyled.
pub fn render_menu(menu: &ModelMenu) -> Vec<String> {
    let mut lines = Vec::with_capacity(menu.rows.len() + 2);
    lines.push(format!(
        "{:^width$}{:^width$}",
        UNIVERSAL_HEADER,
        ANIME_HEADER,
        width = COLUMN_WIDTH
    ));
    lines.push("-".repeat(COLUMN_WIDTH * 2));

    for row in &menu.rows {
        let left = row.left.map(|o| o.label()).unwrap_or_default();
        let right = row.right.map(|o| o.label()).unwrap_or_default();
        let line = format!("{:<width$}{}", left, right, width = COLUMN_WIDTH);
        lines.push(line.trim_end().to_string());
    }
    lines
}

pub fn print_menu(term: &Term, menu: &ModelMenu) -> Result<()> {
    term.write_line("")?;
    term.write_line(&style("Choose a model and scale:").bold().to_string())?;
    for (i, line) in render_menu(menu).iter().enumerate() {
        if i == 0 {
            term.write_line(&style(line).cyan().to_string())?;
        } else {
            term.write_line(line)?;
        }
    }
    Ok(())
}

pub fn prompt_selection(term: &Term, menu: &ModelMenu) -> Result<MenuOption> {
    term.write_str("\nEnter option number: ")?;
    let answer = term.read_line()?;
    menu.select(&answer)
}

/// Accepts pasted or drag-and-dropped paths, which often arrive quoted.
pub fn parse_input_path(raw: &str) -> Result<PathBuf> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if trimmed.is_empty() {
        return Err(UpscaleError::InvalidSelection(
            "no input video given".to_string(),
        ));
    }
    Ok(PathBuf::from(trimmed))
}

pub fn prompt_input(term: &Term) -> Result<PathBuf> {
    term.write_str("Path to input video: ")?;
    parse_input_path(&term.read_line()?)
}

pub fn describe(option: &MenuOption) -> String {
    let category = match option.model.category {
        ModelCategory::Universal => style(option.model.category.as_str()).green(),
        ModelCategory::Anime => style(option.model.category.as_str()).magenta(),
    };
    format!(
        "{} ({}) x{}",
        style(option.model.name).bold(),
        category,
        option.target
    )
}
