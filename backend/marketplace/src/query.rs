//! Filter expressions against the search index.
//!
//! The index speaks a PostgREST-style dialect: `Bid?id=eq.7`,
//! `Project?name=in.a,b,c`. A [`Query`] holds the table and its filters and
//! renders either a URL (values encoded) or a display string for logs.

use std::fmt;

use reqwest::Url;

use crate::errors::{MarketError, Result};

/// Maximum number of values listed in a single `in.` filter. Longer lists are
/// split so the request URL stays within server limits.
pub const MAX_IN_LIST: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    filters: Vec<(String, String)>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    /// `field = value`
    pub fn eq(mut self, field: &str, value: impl fmt::Display) -> Self {
        self.filters.push((field.to_string(), format!("eq.{value}")));
        self
    }

    /// `field IN (values…)`
    pub fn in_list<I, S>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let csv = values
            .into_iter()
            .map(|v| v.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.filters.push((field.to_string(), format!("in.{csv}")));
        self
    }

    #[cfg(test)]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    #[cfg(test)]
    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    /// Resolve against the index base URL.
    pub fn to_url(&self, base: &str) -> Result<Url> {
        let joined = format!("{}/{}", base.trim_end_matches('/'), self.table);
        let mut url = Url::parse(&joined)
            .map_err(|e| MarketError::Config(format!("Invalid search URL {joined}: {e}")))?;
        if !self.filters.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (field, expr) in &self.filters {
                pairs.append_pair(field, expr);
            }
        }
        Ok(url)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table)?;
        for (i, (field, expr)) in self.filters.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{field}={expr}")?;
        }
        Ok(())
    }
}

/// Build one `in.` query per chunk of at most [`MAX_IN_LIST`] values.
pub fn chunked_in_queries<S: AsRef<str>>(table: &str, field: &str, values: &[S]) -> Vec<Query> {
    values
        .chunks(MAX_IN_LIST)
        .map(|chunk| Query::table(table).in_list(field, chunk.iter().map(|v| v.as_ref())))
        .collect()
}
