//! Servable table resolution
//!
//! A table is servable when its name matches at least one include rule and
//! no exclude rule. Rules are case-sensitive globs where `*` matches any
//! run of characters and every other character is literal.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::{info, warn};

use featureserver_common::error::{Error, Result};
use featureserver_common::types::TableDescriptor;

/// Compiled include/exclude glob pattern
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a pattern. Blank patterns are rejected.
    pub fn new(pattern: &str) -> Result<Self> {
        let source = pattern.trim();
        if source.is_empty() {
            return Err(Error::ConfigError("empty table pattern".to_string()));
        }

        let body = source
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{body}$")).map_err(|e| {
            Error::ConfigError(format!("invalid table pattern \"{source}\": {e}"))
        })?;

        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Include/exclude rule set
#[derive(Debug, Clone, Default)]
pub struct TableRules {
    include: Vec<GlobPattern>,
    exclude: Vec<GlobPattern>,
}

impl TableRules {
    /// Compile both rule lists; any malformed pattern fails the whole set
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        let include = include
            .iter()
            .map(|p| GlobPattern::new(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let exclude = exclude
            .iter()
            .map(|p| GlobPattern::new(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        for rule in &include {
            info!("Include rule added: \"{}\"", rule.as_str());
        }
        for rule in &exclude {
            info!("Exclude rule added: \"{}\"", rule.as_str());
        }

        Ok(Self { include, exclude })
    }

    pub fn is_servable(&self, name: &str) -> bool {
        self.include.iter().any(|r| r.matches(name)) && !self.exclude.iter().any(|r| r.matches(name))
    }

    /// Filter `all_tables`, preserving their order
    pub fn filter<'a>(&self, all_tables: &'a [String]) -> Vec<&'a str> {
        all_tables
            .iter()
            .map(String::as_str)
            .filter(|name| self.is_servable(name))
            .collect()
    }
}

/// Resolve the servable tables among `all_tables`.
///
/// With no include rules nothing is servable. Malformed rules never widen
/// the result: the whole catalog is then treated as excluded.
pub fn resolve_servable<S: AsRef<str>>(
    all_tables: &[String],
    include: &[S],
    exclude: &[S],
) -> Vec<String> {
    match TableRules::new(include, exclude) {
        Ok(rules) => rules
            .filter(all_tables)
            .into_iter()
            .map(str::to_string)
            .collect(),
        Err(e) => {
            warn!("Table rules rejected, no table will be served: {}", e);
            Vec::new()
        }
    }
}

/// Resolved servable tables, in discovery order
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: Vec<Arc<TableDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(tables: Vec<TableDescriptor>) -> Self {
        let tables: Vec<_> = tables.into_iter().map(Arc::new).collect();
        let by_name = tables
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.name.clone(), idx))
            .collect();
        Self { tables, by_name }
    }

    pub fn tables(&self) -> &[Arc<TableDescriptor>] {
        &self.tables
    }

    pub fn get(&self, name: &str) -> Result<Arc<TableDescriptor>> {
        self.by_name
            .get(name)
            .map(|&idx| self.tables[idx].clone())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
