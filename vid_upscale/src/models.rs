//! Real-ESRGAN model catalog and the numbered menu built from it.

use serde::Serialize;
use shared_utils::{Result, UpscaleError};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModelCategory {
    Universal,
    Anime,
}

impl ModelCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelCategory::Universal => "Universal",
            ModelCategory::Anime => "Anime / 2D",
        }
    }
}

impl fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub name: &'static str,
    pub category: ModelCategory,
    /// Scales offered in the menu; the smallest is the model's native ratio.
    pub targets: &'static [u32],
}

impl ModelSpec {
    pub fn weights_file(&self) -> String {
        format!("{}.pth", self.name)
    }

    pub fn base_scale(&self) -> u32 {
        self.targets.iter().copied().min().unwrap_or(1)
    }

    pub fn offers(&self, target: u32) -> bool {
        self.targets.contains(&target)
    }
}

pub const MODELS: &[ModelSpec] = &[
    ModelSpec {
        name: "RealESRGAN_x2plus",
        category: ModelCategory::Universal,
        targets: &[2, 4, 8, 16],
    },
    ModelSpec {
        name: "RealESRGAN_x4plus",
        category: ModelCategory::Universal,
        targets: &[4, 16],
    },
    ModelSpec {
        name: "RealESRGAN_x4plus_anime_6B",
        category: ModelCategory::Anime,
        targets: &[4, 16],
    },
    ModelSpec {
        name: "realesr-animevideov3",
        category: ModelCategory::Anime,
        targets: &[4, 16],
    },
];

pub const DEFAULT_MODEL: &str = "realesr-animevideov3";

/// Accepts the bare model name or its `.pth` file name.
pub fn find_model(name: &str) -> Result<&'static ModelSpec> {
    let name = name.strip_suffix(".pth").unwrap_or(name);
    MODELS
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| UpscaleError::InvalidSelection(format!("unknown model '{}'", name)))
}

pub fn models_in(category: ModelCategory) -> impl Iterator<Item = &'static ModelSpec> {
    MODELS.iter().filter(move |m| m.category == category)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuOption {
    pub number: usize,
    pub model: &'static ModelSpec,
    pub target: u32,
}

impl MenuOption {
    pub fn label(&self) -> String {
        format!("{}. {} - {}x", self.number, self.model.name, self.target)
    }
}

/// One menu row: universal option on the left, anime option on the right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuRow {
    pub left: Option<MenuOption>,
    pub right: Option<MenuOption>,
}

#[derive(Debug, Clone)]
pub struct ModelMenu {
    pub rows: Vec<MenuRow>,
    options: BTreeMap<usize, MenuOption>,
}

impl ModelMenu {
    /// Numbers options left-then-right across rows, starting at 1.
    pub fn build() -> Self {
        let pairs = |category: ModelCategory| -> Vec<(&'static ModelSpec, u32)> {
            models_in(category)
                .flat_map(|m| m.targets.iter().map(move |&t| (m, t)))
                .collect()
        };
        let universal = pairs(ModelCategory::Universal);
        let anime = pairs(ModelCategory::Anime);

        let mut rows = Vec::new();
        let mut options = BTreeMap::new();
        let mut number = 1;

        for i in 0..universal.len().max(anime.len()) {
            let mut row = MenuRow::default();
            for (side, list) in [(&mut row.left, &universal), (&mut row.right, &anime)] {
                if let Some(&(model, target)) = list.get(i) {
                    let option = MenuOption {
                        number,
                        model,
                        target,
                    };
                    options.insert(number, option);
                    *side = Some(option);
                    number += 1;
                }
            }
            rows.push(row);
        }

        Self { rows, options }
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn get(&self, number: usize) -> Option<&MenuOption> {
        self.options.get(&number)
    }

    /// Resolves raw user input such as `" 7\n"`.
    pub fn select(&self, input: &str) -> Result<MenuOption> {
        let trimmed = input.trim();
        let number: usize = trimmed
            .parse()
            .map_err(|_| UpscaleError::InvalidSelection(format!("'{}' is not a number", trimmed)))?;
        self.get(number)
            .copied()
            .ok_or_else(|| UpscaleError::InvalidSelection(format!("no option {}", number)))
    }
}
