//! Per-chain compliance ledger: events, Merkle commitment and certificates.

use crate::error::LedgerError;
use crate::event::{Article, Article12Event, ComplianceStatus, EventDraft};
use crate::hash::decode_hash;
use crate::merkle::{leaf_hash, verify_consistency, verify_inclusion, Hash, MerkleTree};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum PASS percentage for a `COMPLIANT` certificate.
pub const COMPLIANCE_THRESHOLD: f64 = 80.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    Compliant,
    ReviewRequired,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplianceCertificate {
    pub certificate_id: String,
    pub chain_name: String,
    pub issued_at: DateTime<Utc>,
    pub ledger_root: String,
    pub total_events: u64,
    pub compliance_level: f64,
    pub articles_covered: Vec<Article>,
    pub status: CertificateStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub chain_tag: String,
    pub created_at: DateTime<Utc>,
    pub root: String,
    pub event_count: u64,
    pub tree_height: u32,
    pub first_event_hash: Option<String>,
    pub latest_event_hash: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditTrail {
    pub ledger: LedgerSummary,
    pub certificate: ComplianceCertificate,
    pub events: Vec<Article12Event>,
}

/// Proof that one event hash is committed under a ledger root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub event_index: u64,
    pub event_hash: String,
    pub tree_size: u64,
    pub root: String,
    pub path: Vec<String>,
}

impl InclusionProof {
    pub fn verify(&self) -> Result<bool, LedgerError> {
        let leaf = leaf_hash(&decode_hash(&self.event_hash)?);
        let root = decode_hash(&self.root)?;
        let path = decode_path(&self.path)?;
        Ok(verify_inclusion(&leaf, self.event_index, self.tree_size, &path, &root))
    }
}

/// Proof that an earlier ledger root is a prefix of a later one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyProof {
    pub old_size: u64,
    pub new_size: u64,
    pub old_root: String,
    pub new_root: String,
    pub path: Vec<String>,
}

impl ConsistencyProof {
    pub fn verify(&self) -> Result<bool, LedgerError> {
        let old_root = decode_hash(&self.old_root)?;
        let new_root = decode_hash(&self.new_root)?;
        let path = decode_path(&self.path)?;
        Ok(verify_consistency(self.old_size, self.new_size, &old_root, &new_root, &path))
    }
}

fn decode_path(path: &[String]) -> Result<Vec<Hash>, LedgerError> {
    path.iter().map(|h| decode_hash(h)).collect()
}

fn encode_path(path: &[Hash]) -> Vec<String> {
    path.iter().map(hex::encode).collect()
}

/// Event hashes and the Merkle tree over them, without event bodies.
///
/// Enough to report roots and build proofs for a chain.
#[derive(Clone, Debug, Default)]
pub struct LedgerTree {
    event_hashes: Vec<String>,
    tree: MerkleTree,
}

impl LedgerTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hex event hash and return its index.
    pub fn push_hash(&mut self, event_hash: impl Into<String>) -> Result<u64, LedgerError> {
        let event_hash = event_hash.into();
        let index = self.tree.push(&decode_hash(&event_hash)?);
        self.event_hashes.push(event_hash);
        Ok(index)
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn height(&self) -> u32 {
        self.tree.height()
    }

    pub fn event_hash(&self, index: u64) -> Option<&str> {
        self.event_hashes.get(index as usize).map(String::as_str)
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.tree.root())
    }

    pub fn inclusion_proof(&self, index: u64) -> Result<InclusionProof, LedgerError> {
        let path = self.tree.inclusion_proof(index)?;
        Ok(InclusionProof {
            event_index: index,
            event_hash: self.event_hashes[index as usize].clone(),
            tree_size: self.len(),
            root: self.root_hex(),
            path: encode_path(&path),
        })
    }

    pub fn consistency_proof(&self, old_size: u64) -> Result<ConsistencyProof, LedgerError> {
        let path = self.tree.consistency_proof(old_size)?;
        Ok(ConsistencyProof {
            old_size,
            new_size: self.len(),
            old_root: hex::encode(self.tree.root_at(old_size)?),
            new_root: self.root_hex(),
            path: encode_path(&path),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ComplianceLedger {
    chain_name: String,
    tag: String,
    created_at: DateTime<Utc>,
    events: Vec<Article12Event>,
    hashes: LedgerTree,
}

impl ComplianceLedger {
    pub fn new(chain_name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let tag = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self::with_tag(chain_name, tag, created_at)
    }

    pub fn with_tag(chain_name: impl Into<String>, tag: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            chain_name: chain_name.into(),
            tag: tag.into(),
            created_at,
            events: Vec::new(),
            hashes: LedgerTree::new(),
        }
    }

    /// Rebuild a ledger from events in their recorded order.
    pub fn from_events(
        chain_name: impl Into<String>,
        tag: impl Into<String>,
        created_at: DateTime<Utc>,
        events: impl IntoIterator<Item = Article12Event>,
    ) -> Result<Self, LedgerError> {
        let mut ledger = Self::with_tag(chain_name, tag, created_at);
        for event in events {
            ledger.append(event)?;
        }
        Ok(ledger)
    }

    pub fn record_event(&mut self, draft: EventDraft, now: DateTime<Utc>) -> Result<&Article12Event, LedgerError> {
        let index = self.append(Article12Event::from_draft(draft, now))?;
        Ok(&self.events[index as usize])
    }

    /// Append an existing event, hashing it, and return its index.
    pub fn append(&mut self, event: Article12Event) -> Result<u64, LedgerError> {
        let index = self.hashes.push_hash(event.event_hash()?)?;
        self.events.push(event);
        Ok(index)
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn events(&self) -> &[Article12Event] {
        &self.events
    }

    pub fn tree(&self) -> &LedgerTree {
        &self.hashes
    }

    pub fn len(&self) -> u64 {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn event_hash(&self, index: u64) -> Option<&str> {
        self.hashes.event_hash(index)
    }

    pub fn root_hex(&self) -> String {
        self.hashes.root_hex()
    }

    /// Percentage of events with status PASS.
    pub fn compliance_level(&self) -> f64 {
        if self.events.is_empty() {
            return 0.0;
        }
        let passed = self
            .events
            .iter()
            .filter(|e| e.compliance_status == ComplianceStatus::Pass)
            .count();
        passed as f64 / self.events.len() as f64 * 100.0
    }

    pub fn articles_covered(&self) -> Vec<Article> {
        let mut articles: Vec<Article> = self.events.iter().map(|e| e.article_reference).collect();
        articles.sort();
        articles.dedup();
        articles
    }

    pub fn certificate(&self, now: DateTime<Utc>) -> ComplianceCertificate {
        let level = self.compliance_level();
        ComplianceCertificate {
            certificate_id: format!("CERT-{}-{}", self.tag, now.timestamp()),
            chain_name: self.chain_name.clone(),
            issued_at: now,
            ledger_root: self.root_hex(),
            total_events: self.len(),
            compliance_level: level,
            articles_covered: self.articles_covered(),
            status: if level >= COMPLIANCE_THRESHOLD {
                CertificateStatus::Compliant
            } else {
                CertificateStatus::ReviewRequired
            },
        }
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            chain_tag: self.tag.clone(),
            created_at: self.created_at,
            root: self.root_hex(),
            event_count: self.len(),
            tree_height: self.hashes.height(),
            first_event_hash: self.hashes.event_hash(0).map(str::to_string),
            latest_event_hash: self.len().checked_sub(1).and_then(|i| self.hashes.event_hash(i)).map(str::to_string),
        }
    }

    pub fn audit_trail(&self, now: DateTime<Utc>) -> AuditTrail {
        AuditTrail {
            ledger: self.summary(),
            certificate: self.certificate(now),
            events: self.events.clone(),
        }
    }

    pub fn inclusion_proof(&self, index: u64) -> Result<InclusionProof, LedgerError> {
        self.hashes.inclusion_proof(index)
    }

    pub fn consistency_proof(&self, old_size: u64) -> Result<ConsistencyProof, LedgerError> {
        self.hashes.consistency_proof(old_size)
    }
}
