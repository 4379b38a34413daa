use crate::config::{ModeProfile, SovereignMode};
use chrono::{DateTime, Utc};
use gallows_ledger::ledger::{AuditTrail, ComplianceCertificate};
use gallows_ledger::quorum::{ComplianceCriteria, NodeInfo, QuorumCertificate, VerificationRequest};
use gallows_ledger::{ComplianceStatus, RiskLevel};
use gallows_zk::constants::NUM_ARTICLES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// --- service info ---

#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub name: String,
    pub version: String,
    pub mode: SovereignMode,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ModeResponse {
    pub mode: SovereignMode,
    pub config: ModeProfile,
    pub description: String,
    pub verification_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub mode: SovereignMode,
    pub ledgers_active: u64,
    pub violations_recorded: u64,
    pub judgments_issued: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComplianceMappingResponse {
    pub mode: SovereignMode,
    pub articles: BTreeMap<String, String>,
    pub verification_type: String,
    pub can_expose_violations: bool,
    pub is_public_registry: bool,
}

// --- ledger ---

fn default_article() -> u16 {
    12
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub model_id: String,
    pub model_provider: String,

    /// Raw model input; only its SHA-256 is recorded.
    pub input_hash: String,
    /// Raw model output; only its SHA-256 is recorded.
    pub output_hash: String,

    #[serde(default)]
    pub compliance_status: ComplianceStatus,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default = "default_article")]
    pub article_reference: u16,
    #[serde(default)]
    pub system_purpose: String,
    #[serde(default)]
    pub deployment_context: String,
    #[serde(default)]
    pub oversight_mechanism: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub mode: SovereignMode,
    pub event_id: String,
    pub event_index: u64,
    pub chain_id: String,
    pub root_hash: String,
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_status: Option<ComplianceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ledger: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_sent_to: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CertificateResponse {
    #[serde(flatten)]
    pub certificate: ComplianceCertificate,
    pub mode: SovereignMode,
    pub is_public: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditResponse {
    #[serde(flatten)]
    pub audit: AuditTrail,
    pub mode: SovereignMode,
    pub is_public: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConsistencyParams {
    pub old_size: u64,
}

/// Either kind of ledger proof, tagged by `kind`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProofVerifyRequest {
    Inclusion(gallows_ledger::InclusionProof),
    Consistency(gallows_ledger::ConsistencyProof),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProofVerifyResponse {
    pub ok: bool,
}

// --- red list / whistleblower ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSource {
    /// A FAIL event recorded through the verify endpoint.
    Ledger,
    Whistleblower,
}

/// One red-list entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Violation {
    pub violation_id: String,
    pub source: ViolationSource,
    pub model_id: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_type: Option<String>,
    pub evidence_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub reported_by: String,
    pub mode: SovereignMode,
}

fn default_severity() -> String {
    "HIGH".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WhistleblowerReport {
    pub model_id: String,
    pub provider: String,
    pub violation_type: String,
    pub evidence_hash: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default = "default_true")]
    pub anonymous: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WhistleblowerResponse {
    pub success: bool,
    pub report_id: String,
    pub status: String,
    pub action_taken: String,
    pub regulators_notified: Vec<String>,
    pub mode: SovereignMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedListResponse {
    pub mode: SovereignMode,
    pub total_violations: u64,
    pub violations: Vec<Violation>,
}

// --- judge ---

#[derive(Debug, Serialize, Deserialize)]
pub struct JudgeRulingRequest {
    pub article: u16,
    pub question: String,
    pub ruling: String,
    #[serde(default)]
    pub precedent_cases: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Judgment {
    pub judgment_id: String,
    pub article: u16,
    pub question: String,
    pub ruling: String,
    pub precedent_cases: Vec<String>,
    pub precedent: String,
    pub issued_at: DateTime<Utc>,
    pub authority: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JudgeRulingResponse {
    pub success: bool,
    pub judgment_id: String,
    pub status: String,
    pub message: String,
    pub precedent: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RulingsResponse {
    pub mode: SovereignMode,
    pub total_judgments: u64,
    pub rulings: Vec<Judgment>,
}

// --- quorum ---

#[derive(Debug, Serialize, Deserialize)]
pub struct QuorumNodesResponse {
    pub threshold: usize,
    pub total_nodes: usize,
    pub nodes: Vec<NodeInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuorumVerifyRequest {
    pub model_id: String,
    pub inference_hash: String,
    #[serde(default)]
    pub criteria: ComplianceCriteria,
    /// Node ids to treat as unavailable for this round.
    #[serde(default)]
    pub offline_nodes: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuorumOutcome {
    Verified,
    Failed,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuorumVerifyResponse {
    pub request: VerificationRequest,
    pub status: QuorumOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<QuorumCertificate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuorumCertificateCheckResponse {
    pub ok: bool,
    pub valid_signatures: usize,
    pub threshold: usize,
}

// --- attestations ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationStatus {
    Generating,
    Ready,
    Failed,
    Expired,
}

impl AttestationStatus {
    pub fn from_db(s: &str) -> Self {
        match s {
            "generating" => AttestationStatus::Generating,
            "ready" => AttestationStatus::Ready,
            _ => AttestationStatus::Failed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttestationCreateRequest {
    pub chain_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttestationCreateResponse {
    pub attestation_id: Uuid,
    pub event_count: u64,
    pub batches_total: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttestationGetResponse {
    pub attestation_id: Uuid,
    pub chain_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: AttestationStatus,
    pub mode: SovereignMode,

    /// Ledger size and root the attestation covers.
    pub event_count: u64,
    pub ledger_root: String,

    pub batch_size: u64,
    pub batches_total: u64,
    pub batches_done: u64,

    pub attestation_commitment_hex: Option<String>,
    pub pass_by_article: Option<[u64; NUM_ARTICLES]>,
    pub total_by_article: Option<[u64; NUM_ARTICLES]>,
    pub compliance_level: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListBatchesParams {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub include_proof: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchListResponse {
    pub attestation_id: Uuid,
    pub offset: u64,
    pub limit: u64,
    pub batches_total: u64,
    pub batches: Vec<BatchListItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchListItem {
    pub batch_index: u64,
    pub batch_commitment_hex: String,

    pub pass_by_article: [u64; NUM_ARTICLES],
    pub total_by_article: [u64; NUM_ARTICLES],

    pub verified: bool,

    /// Included only if requested (large).
    pub proof_b64: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ZkVkResponse {
    pub curve: String,
    pub proof_system: String,
    pub batch_size: u64,
    pub vk_b64: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyBatchRequest {
    pub vk_b64: String,
    pub proof_b64: String,

    pub public_batch_commitment_hex: String,
    pub public_pass_by_article: [u64; NUM_ARTICLES],
    pub public_total_by_article: [u64; NUM_ARTICLES],
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyBatchResponse {
    pub ok: bool,
}
