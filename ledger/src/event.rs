//! Compliance events recorded under EU AI Act Article 12 (record keeping).

use crate::error::LedgerError;
use crate::hash::sha256_hex;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    #[default]
    Pending,
    Pass,
    Fail,
    Warning,
}

impl ComplianceStatus {
    /// Numeric code used as a circuit witness.
    pub fn code(self) -> u8 {
        match self {
            ComplianceStatus::Pending => 0,
            ComplianceStatus::Pass => 1,
            ComplianceStatus::Fail => 2,
            ComplianceStatus::Warning => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComplianceStatus::Pending => "PENDING",
            ComplianceStatus::Pass => "PASS",
            ComplianceStatus::Fail => "FAIL",
            ComplianceStatus::Warning => "WARNING",
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    HighRisk,
    MediumRisk,
    LowRisk,
}

/// EU AI Act article covered by the ledger (12 through 15).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Article(u8);

impl Article {
    pub const RECORD_KEEPING: Article = Article(12);
    pub const TRANSPARENCY: Article = Article(13);
    pub const HUMAN_OVERSIGHT: Article = Article(14);
    pub const ACCURACY: Article = Article(15);

    pub const ALL: [Article; 4] = [
        Article::RECORD_KEEPING,
        Article::TRANSPARENCY,
        Article::HUMAN_OVERSIGHT,
        Article::ACCURACY,
    ];

    pub fn number(self) -> u8 {
        self.0
    }

    /// Position of this article within [`Article::ALL`].
    pub fn index(self) -> usize {
        (self.0 - 12) as usize
    }
}

impl Default for Article {
    fn default() -> Self {
        Article::RECORD_KEEPING
    }
}

impl TryFrom<u16> for Article {
    type Error = LedgerError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            12..=15 => Ok(Article(value as u8)),
            other => Err(LedgerError::InvalidArticle(other)),
        }
    }
}

impl From<Article> for u16 {
    fn from(article: Article) -> Self {
        article.0 as u16
    }
}

impl fmt::Display for Article {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "article_{}", self.0)
    }
}

/// Caller-supplied data for a new event.
///
/// Raw input and output are hashed on construction and never stored.
#[derive(Clone, Debug, Default)]
pub struct EventDraft {
    pub model_id: String,
    pub input_data: String,
    pub output_data: String,
    pub compliance_status: ComplianceStatus,
    pub risk_level: RiskLevel,
    pub article_reference: Article,
    pub system_purpose: String,
    pub deployment_context: String,
    pub oversight_mechanism: Option<String>,
}

/// One recorded compliance event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article12Event {
    pub event_id: String,
    pub timestamp: String,
    pub model_id: String,
    pub input_hash: String,
    pub output_hash: String,
    pub compliance_status: ComplianceStatus,
    pub risk_level: RiskLevel,
    pub article_reference: Article,
    pub system_purpose: String,
    pub deployment_context: String,
    pub oversight_mechanism: Option<String>,
}

/// Hashing view of an event. Field order is part of the hash format.
#[derive(Serialize)]
struct CanonicalEvent<'a> {
    event_id: &'a str,
    timestamp: &'a str,
    model_id: &'a str,
    input_hash: &'a str,
    output_hash: &'a str,
    compliance_status: ComplianceStatus,
    risk_level: RiskLevel,
    article_reference: Article,
    system_purpose: &'a str,
    deployment_context: &'a str,
    oversight_mechanism: &'a str,
}

impl Article12Event {
    pub fn from_draft(draft: EventDraft, now: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            model_id: draft.model_id,
            input_hash: sha256_hex(draft.input_data.as_bytes()),
            output_hash: sha256_hex(draft.output_data.as_bytes()),
            compliance_status: draft.compliance_status,
            risk_level: draft.risk_level,
            article_reference: draft.article_reference,
            system_purpose: draft.system_purpose,
            deployment_context: draft.deployment_context,
            oversight_mechanism: draft.oversight_mechanism,
        }
    }

    /// Compact JSON with a fixed key order.
    pub fn canonical_json(&self) -> Result<String, LedgerError> {
        let view = CanonicalEvent {
            event_id: &self.event_id,
            timestamp: &self.timestamp,
            model_id: &self.model_id,
            input_hash: &self.input_hash,
            output_hash: &self.output_hash,
            compliance_status: self.compliance_status,
            risk_level: self.risk_level,
            article_reference: self.article_reference,
            system_purpose: &self.system_purpose,
            deployment_context: &self.deployment_context,
            oversight_mechanism: self.oversight_mechanism.as_deref().unwrap_or(""),
        };
        serde_json::to_string(&view).map_err(|e| LedgerError::Serialization(format!("{e}")))
    }

    pub fn event_hash(&self) -> Result<String, LedgerError> {
        Ok(sha256_hex(self.canonical_json()?.as_bytes()))
    }
}
