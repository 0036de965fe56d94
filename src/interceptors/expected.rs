//! The allow-list of `{host, status}` pairs considered expected noise.
//!
//! Matching is explicit per rule: a host matches exactly, by domain suffix,
//! or always; a status matches exactly, by inclusive range, or always.
//! Host comparison is case-insensitive.
use crate::entry::Severity;
use serde::{Deserialize, Serialize};

/// How a rule matches the request host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostMatch {
    Exact(String),
    /// Matches the domain itself and any subdomain of it.
    Suffix(String),
    Any,
}

impl HostMatch {
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostMatch::Exact(expected) => expected.eq_ignore_ascii_case(host),
            HostMatch::Suffix(domain) => {
                let host = host.to_ascii_lowercase();
                let domain = domain.trim_start_matches('.').to_ascii_lowercase();
                host == domain || host.ends_with(&format!(".{}", domain))
            }
            HostMatch::Any => true,
        }
    }
}

/// How a rule matches the response status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusMatch {
    Exact(u16),
    Range { min: u16, max: u16 },
    Any,
}

impl StatusMatch {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            StatusMatch::Exact(expected) => *expected == status,
            StatusMatch::Range { min, max } => (*min..=*max).contains(&status),
            StatusMatch::Any => true,
        }
    }
}

/// One allow-list rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedError {
    pub host: HostMatch,
    pub status: StatusMatch,
}

impl ExpectedError {
    /// A rule matching exactly one host and one status.
    pub fn exact(host: impl Into<String>, status: u16) -> Self {
        Self {
            host: HostMatch::Exact(host.into()),
            status: StatusMatch::Exact(status),
        }
    }
}

/// The full allow-list. Serializes as a plain array of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedErrors {
    rules: Vec<ExpectedError>,
}

impl ExpectedErrors {
    pub fn new(rules: Vec<ExpectedError>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: ExpectedError) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ExpectedError] {
        &self.rules
    }

    /// Whether any rule matches both `host` and `status`.
    pub fn is_expected(&self, host: &str, status: u16) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.host.matches(host) && rule.status.matches(status))
    }

    /// Severity for a non-success response from `host`.
    pub fn classify(&self, host: &str, status: u16) -> Severity {
        if self.is_expected(host, status) {
            Severity::Warn
        } else {
            Severity::Error
        }
    }
}
