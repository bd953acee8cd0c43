//! Rendering of a Moon snapshot into the configuration the proxy engine loads.
//!
//! Proxies are flattened in group order then node order. Rules are rendered as
//! `TYPE,PAYLOAD,ACTION` lines, with the catch-all rule rendered as
//! `MATCH,ACTION` and always placed last.

use crate::config::types::{CATCH_ALL, MoonConfig, ProxyNode, Rule};
use serde::{Deserialize, Serialize};

/// Substring marking a process pattern as a regex.
pub const WILDCARD: &str = ".*";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClashConfig {
    pub proxies: Vec<ProxyRecord>,
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub server: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// How a process rule payload is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    ProcessId,
    ProcessPathRegex,
    ProcessNameRegex,
    ProcessPath,
    ProcessName,
}

/// Token set used for rule types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDialect {
    #[default]
    Descriptive,
    Clash,
}

impl RuleKind {
    /// Infer the match type from the shape of the payload.
    pub fn infer(payload: &str) -> Self {
        let wildcard = payload.contains(WILDCARD);
        let path = payload.contains('/') || payload.contains('\\');
        if is_numeric(payload) {
            Self::ProcessId
        } else if wildcard && path {
            Self::ProcessPathRegex
        } else if wildcard {
            Self::ProcessNameRegex
        } else if path {
            Self::ProcessPath
        } else {
            Self::ProcessName
        }
    }

    pub fn token(self, dialect: RuleDialect) -> &'static str {
        match (dialect, self) {
            (RuleDialect::Descriptive, Self::ProcessId) => "match-by-process-id",
            (RuleDialect::Descriptive, Self::ProcessPathRegex) => "match-by-process-path-regex",
            (RuleDialect::Descriptive, Self::ProcessNameRegex) => "match-by-process-name-regex",
            (RuleDialect::Descriptive, Self::ProcessPath) => "match-by-process-path",
            (RuleDialect::Descriptive, Self::ProcessName) => "match-by-process-name",
            (RuleDialect::Clash, Self::ProcessId) => "PROCESS-PID",
            (RuleDialect::Clash, Self::ProcessPathRegex) => "PROCESS-PATH-REGEX",
            (RuleDialect::Clash, Self::ProcessNameRegex) => "PROCESS-NAME-REGEX",
            (RuleDialect::Clash, Self::ProcessPath) => "PROCESS-PATH",
            (RuleDialect::Clash, Self::ProcessName) => "PROCESS-NAME",
        }
    }
}

fn is_numeric(payload: &str) -> bool {
    let trimmed = payload.trim();
    !trimmed.is_empty() && trimmed.parse::<f64>().is_ok_and(f64::is_finite)
}

impl From<&ProxyNode> for ProxyRecord {
    fn from(node: &ProxyNode) -> Self {
        Self {
            name: node.uid.clone(),
            kind: node.scheme.clone(),
            server: node.host.clone(),
            port: node.port,
            username: node.username.clone(),
            password: node.password.clone(),
        }
    }
}

/// Render one rule as an engine rule line.
pub fn render_rule(rule: &Rule, dialect: RuleDialect) -> String {
    if rule.is_catch_all() {
        return format!("{},{}", CATCH_ALL, rule.action);
    }
    let kind = RuleKind::infer(&rule.process);
    format!("{},{},{}", kind.token(dialect), rule.process, rule.action)
}

/// Render the full engine configuration for a snapshot.
pub fn translate(config: &MoonConfig, dialect: RuleDialect) -> ClashConfig {
    let proxies = config.all_proxies().map(ProxyRecord::from).collect();

    let (catch_all, normal): (Vec<&Rule>, Vec<&Rule>) = config.rule_list.iter().partition(|r| r.is_catch_all());
    let rules = normal.into_iter().chain(catch_all).map(|r| render_rule(r, dialect)).collect();

    ClashConfig { proxies, rules }
}
