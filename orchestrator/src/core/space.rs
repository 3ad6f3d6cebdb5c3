//! Deterministic enumeration of the combination space
//!
//! Combinations are ordered lexicographically by category, rightmost category
//! varying fastest. Any index decodes in O(categories) as a mixed-radix number
//! over the category sizes, so a run can restart anywhere without walking the
//! combinations before it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{OrchestratorError, OrchestratorResult};

pub const DEFAULT_SEPARATOR: &str = ", ";

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// One parameter category with its ordered values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    /// Text placed before a non-empty value when rendering
    #[serde(default)]
    pub prefix: String,
    pub values: Vec<String>,
}

impl CategorySpec {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// One assignment of values across all categories
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Combination {
    pub index: u64,
    /// Value position per category, in category order
    pub selections: Vec<usize>,
}

/// The full cartesian product of a list of categories
#[derive(Debug, Clone)]
pub struct CombinationSpace {
    categories: Vec<CategorySpec>,
    separator: String,
    size: u64,
}

impl CombinationSpace {
    /// Build a space; duplicate values inside a category keep their first position
    pub fn new(categories: Vec<CategorySpec>) -> OrchestratorResult<Self> {
        Self::with_separator(categories, DEFAULT_SEPARATOR)
    }

    pub fn with_separator(categories: Vec<CategorySpec>, separator: &str) -> OrchestratorResult<Self> {
        let categories: Vec<CategorySpec> = categories.into_iter().map(dedup_values).collect();
        let size = product_of_sizes(&categories)?;

        Ok(Self {
            categories,
            separator: separator.to_string(),
            size,
        })
    }

    /// Number of combinations, computed without enumerating
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn categories(&self) -> &[CategorySpec] {
        &self.categories
    }

    /// Stable description of the category layout, stored in the ledger
    ///
    /// Covers names, sizes and the ordered values, so any edit that would
    /// shift an index changes the signature.
    pub fn layout_signature(&self) -> String {
        self.categories
            .iter()
            .map(|c| format!("{}={}@{:016x}", c.name, c.values.len(), values_digest(&c.values)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Decode an index directly, without visiting earlier combinations
    pub fn decode(&self, index: u64) -> Option<Combination> {
        if index >= self.size {
            return None;
        }

        let mut selections = vec![0usize; self.categories.len()];
        let mut remainder = index;
        for (slot, category) in selections.iter_mut().zip(&self.categories).rev() {
            let radix = category.values.len() as u64;
            *slot = (remainder % radix) as usize;
            remainder /= radix;
        }

        Some(Combination { index, selections })
    }

    /// Lazy iteration over the whole space
    pub fn iter(&self) -> CombinationIter<'_> {
        self.iter_from(0)
    }

    /// Lazy iteration starting at `start`
    pub fn iter_from(&self, start: u64) -> CombinationIter<'_> {
        CombinationIter {
            space: self,
            next: self.decode(start),
        }
    }

    /// `(category, value)` pairs of a combination
    pub fn values<'a>(&'a self, combination: &Combination) -> Vec<(&'a str, &'a str)> {
        self.categories
            .iter()
            .zip(&combination.selections)
            .map(|(category, &pick)| (category.name.as_str(), category.values[pick].as_str()))
            .collect()
    }

    /// Render a combination into prompt text
    ///
    /// Empty values are skipped; the rest are emitted as `prefix + value` and
    /// joined with the separator.
    pub fn render(&self, combination: &Combination) -> String {
        self.categories
            .iter()
            .zip(&combination.selections)
            .filter_map(|(category, &pick)| {
                let value = category.values[pick].as_str();
                if value.is_empty() {
                    None
                } else {
                    Some(format!("{}{}", category.prefix, value))
                }
            })
            .collect::<Vec<_>>()
            .join(&self.separator)
    }

    /// Render the combination at `index`
    pub fn render_index(&self, index: u64) -> Option<String> {
        self.decode(index).map(|c| self.render(&c))
    }
}

/// Odometer-style iterator over a [`CombinationSpace`]
pub struct CombinationIter<'a> {
    space: &'a CombinationSpace,
    next: Option<Combination>,
}

impl<'a> Iterator for CombinationIter<'a> {
    type Item = Combination;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;

        let mut selections = current.selections.clone();
        let mut carried = true;
        for (slot, category) in selections.iter_mut().zip(&self.space.categories).rev() {
            *slot += 1;
            if *slot < category.values.len() {
                carried = false;
                break;
            }
            *slot = 0;
        }

        if !carried {
            self.next = Some(Combination {
                index: current.index + 1,
                selections,
            });
        }

        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.next {
            Some(c) => {
                let left = self.space.size - c.index;
                let left = usize::try_from(left).unwrap_or(usize::MAX);
                (left, Some(left))
            }
            None => (0, Some(0)),
        }
    }
}

fn dedup_values(mut category: CategorySpec) -> CategorySpec {
    let mut seen = HashSet::new();
    category.values.retain(|v| seen.insert(v.clone()));
    category
}

fn product_of_sizes(categories: &[CategorySpec]) -> OrchestratorResult<u64> {
    if categories.is_empty() || categories.iter().any(|c| c.values.is_empty()) {
        return Ok(0);
    }

    categories.iter().try_fold(1u64, |acc, category| {
        acc.checked_mul(category.values.len() as u64)
            .ok_or_else(|| OrchestratorError::SpaceError {
                message: format!("space size overflows u64 at category '{}'", category.name),
            })
    })
}

/// 64-bit FNV-1a over the ordered values, each terminated by a unit separator
fn values_digest(values: &[String]) -> u64 {
    values
        .iter()
        .flat_map(|value| value.bytes().chain(std::iter::once(0x1f)))
        .fold(FNV_OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
}
