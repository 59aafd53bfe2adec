use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSpace {
    Venue,
    Opponent,
}

/// Explicit category -> small integer dictionary. Codes are never reassigned once
/// handed out, so a dictionary loaded from disk keeps earlier runs comparable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCodes {
    #[serde(default)]
    pub venue: BTreeMap<String, u32>,
    #[serde(default)]
    pub opponent: BTreeMap<String, u32>,
}

impl CategoryCodes {
    fn space(&self, space: CodeSpace) -> &BTreeMap<String, u32> {
        match space {
            CodeSpace::Venue => &self.venue,
            CodeSpace::Opponent => &self.opponent,
        }
    }

    fn space_mut(&mut self, space: CodeSpace) -> &mut BTreeMap<String, u32> {
        match space {
            CodeSpace::Venue => &mut self.venue,
            CodeSpace::Opponent => &mut self.opponent,
        }
    }

    /// Adds unseen values in sorted order after the highest existing code.
    /// Returns how many values were new.
    pub fn register<'a, I>(&mut self, space: CodeSpace, values: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let map = self.space_mut(space);
        let fresh: BTreeSet<&str> = values
            .into_iter()
            .filter(|v| !map.contains_key(*v))
            .collect();
        let mut next = map.values().max().map(|m| m + 1).unwrap_or(0);
        for value in &fresh {
            map.insert((*value).to_string(), next);
            next += 1;
        }
        fresh.len()
    }

    pub fn code(&self, space: CodeSpace, value: &str) -> Option<u32> {
        self.space(space).get(value).copied()
    }

    pub fn len(&self, space: CodeSpace) -> usize {
        self.space(space).len()
    }

    pub fn is_empty(&self) -> bool {
        self.venue.is_empty() && self.opponent.is_empty()
    }
}

/// A missing file is an empty dictionary; a corrupt one is an error.
pub fn load_codes(path: &Path) -> Result<CategoryCodes> {
    if !path.exists() {
        return Ok(CategoryCodes::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read category codes {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse category codes {}", path.display()))
}

pub fn save_codes(path: &Path, codes: &CategoryCodes) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(codes).context("serialize category codes")?;
    fs::write(&tmp, json).context("write category codes")?;
    fs::rename(&tmp, path).context("swap category codes")?;
    Ok(())
}
