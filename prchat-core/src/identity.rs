//! GitHub login → Slack user id mapping.
//!
//! Loaded once at startup and shared read-only. A login without an entry is
//! a normal condition: that person is simply not invited or mentioned.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap {
    by_login: HashMap<String, String>,
}

impl IdentityMap {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            by_login: entries
                .into_iter()
                .filter(|(login, id)| !login.trim().is_empty() && !id.trim().is_empty())
                .map(|(login, id)| (login.to_lowercase(), id))
                .collect(),
        }
    }

    /// Parse the serialised `{"login": "U123", ...}` form used in configuration.
    /// Blank input yields an empty map.
    pub fn from_json(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let entries: HashMap<String, String> = serde_json::from_str(text)
            .context("identity map must be a JSON object of login -> Slack user id")?;
        Ok(Self::new(entries))
    }

    /// GitHub logins are case-insensitive.
    pub fn slack_id(&self, login: &str) -> Option<&str> {
        self.by_login.get(&login.to_lowercase()).map(String::as_str)
    }

    /// `<@U123>` when mapped, otherwise the raw login.
    pub fn mention(&self, login: &str) -> String {
        match self.slack_id(login) {
            Some(id) => format!("<@{}>", id),
            None => login.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_login.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_login.is_empty()
    }

    /// Stable, serialisable form (sorted by login).
    pub fn to_sorted(&self) -> BTreeMap<String, String> {
        self.by_login
            .iter()
            .map(|(login, id)| (login.clone(), id.clone()))
            .collect()
    }
}

/// Result of building a map from a login → email table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverseBuild {
    pub map: IdentityMap,
    /// Logins whose email has no Slack account.
    pub unresolved: Vec<String>,
}

/// Offline maintenance: invert Slack's email → id listing against a
/// login → email table. Email comparison is case-insensitive.
pub fn build_from_emails(
    login_to_email: &BTreeMap<String, String>,
    email_to_slack_id: &HashMap<String, String>,
) -> ReverseBuild {
    let by_email: HashMap<String, &String> = email_to_slack_id
        .iter()
        .map(|(email, id)| (email.to_lowercase(), id))
        .collect();

    let mut entries = Vec::new();
    let mut unresolved = Vec::new();
    for (login, email) in login_to_email {
        match by_email.get(&email.to_lowercase()) {
            Some(id) => entries.push((login.clone(), (*id).clone())),
            None => unresolved.push(login.clone()),
        }
    }

    ReverseBuild {
        map: IdentityMap::new(entries),
        unresolved,
    }
}
