use std::collections::HashSet;
use std::path::Path;

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::error::{FoodError, Result};

/// Ordered, duplicate-free list of class names.
///
/// Position `i` is the canonical label `i` for one-hot targets during
/// training and for argmax lookup at inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ClassTaxonomy {
    names: Vec<String>,
}

impl ClassTaxonomy {
    pub fn new(names: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if name.trim().is_empty() {
                return Err(FoodError::config("class names must not be blank"));
            }
            if !seen.insert(name.as_str()) {
                return Err(FoodError::config(format!("duplicate class name '{}'", name)));
            }
        }
        Ok(ClassTaxonomy { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Label for an index, `None` when out of range.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// One-hot target of width `len()`.
    pub fn one_hot(&self, index: usize) -> Vec<f64> {
        let mut v = vec![0.0; self.names.len()];
        if let Some(slot) = v.get_mut(index) {
            *slot = 1.0;
        }
        v
    }

    /// Writes one name per line, in order.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut text = self.names.join("\n");
        text.push('\n');
        std::fs::write(path, text)?;
        debug!(path = %path.display(), classes = self.len(), "class list written");
        Ok(())
    }

    /// Reads names in file order, trimming whitespace and skipping blank
    /// lines. An empty list is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let names: Vec<String> = text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect();
        if names.is_empty() {
            return Err(FoodError::artifact(format!("class list {} is empty", path.display())));
        }
        ClassTaxonomy::new(names)
    }
}

impl TryFrom<Vec<String>> for ClassTaxonomy {
    type Error = FoodError;

    fn try_from(names: Vec<String>) -> Result<Self> {
        ClassTaxonomy::new(names)
    }
}

impl From<ClassTaxonomy> for Vec<String> {
    fn from(taxonomy: ClassTaxonomy) -> Self {
        taxonomy.names
    }
}

/// Produce folders searched for when a keyword filter is requested, in
/// priority order.
pub const PRODUCE_KEYWORDS: [&str; 20] = [
    "Apple", "Banana", "Orange", "Tomato", "Carrot",
    "Cucumber", "Onion", "Peach", "Pear", "Cherry",
    "Grape", "Pepper", "Potato", "Avocado", "Mango",
    "Strawberry", "Lemon", "Watermelon", "Corn", "Eggplant",
];

const GENERIC_FALLBACK: [&str; 5] = ["Apple 10", "Banana 1", "Orange 1", "Tomato 1", "Carrot 1"];

const PRODUCE_FALLBACK: [&str; 20] = [
    "Apple 10", "Banana 1", "Orange 1", "Tomato 1", "Carrot 1",
    "Cucumber 1", "Onion 2", "Peach 1", "Pear 1", "Cherry 1",
    "Grape Blue 1", "Pepper Green 1", "Potato Red 1", "Avocado 1", "Mango 1",
    "Strawberry 1", "Lemon 1", "Watermelon 1", "Corn 1", "Eggplant 1",
];

/// Class list the inference service uses when the persisted one cannot be
/// read. Any value other than `None` marks the service as degraded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "names", rename_all = "snake_case")]
pub enum FallbackClasses {
    None,
    Generic,
    Produce,
    Custom(Vec<String>),
}

impl Default for FallbackClasses {
    fn default() -> Self {
        FallbackClasses::Produce
    }
}

impl FallbackClasses {
    pub fn taxonomy(&self) -> Option<Result<ClassTaxonomy>> {
        let names: Vec<String> = match self {
            FallbackClasses::None => return None,
            FallbackClasses::Generic => GENERIC_FALLBACK.iter().map(|s| s.to_string()).collect(),
            FallbackClasses::Produce => PRODUCE_FALLBACK.iter().map(|s| s.to_string()).collect(),
            FallbackClasses::Custom(names) => names.clone(),
        };
        Some(ClassTaxonomy::new(names))
    }
}
