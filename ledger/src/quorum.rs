//! k-of-n verification quorum.
//!
//! Each node evaluates a verification request and signs the resulting verdict
//! with its Ed25519 key. A certificate is valid once `threshold` distinct
//! registered nodes have signed the same verdict digest, so no single node can
//! produce a certificate alone.

use crate::error::LedgerError;
use crate::event::Article;
use crate::hash::sha256_hex;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Domain separator for verdict digests.
const VERDICT_DOMAIN: &[u8] = b"gallows/quorum-verdict/v1";

/// Which articles the model provider claims to satisfy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceCriteria {
    #[serde(default = "default_true")]
    pub logging: bool,
    #[serde(default = "default_true")]
    pub transparency: bool,
    #[serde(default = "default_true")]
    pub oversight: bool,
    #[serde(default = "default_true")]
    pub accuracy: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ComplianceCriteria {
    fn default() -> Self {
        Self {
            logging: true,
            transparency: true,
            oversight: true,
            accuracy: true,
        }
    }
}

impl ComplianceCriteria {
    pub fn for_article(&self, article: Article) -> bool {
        match article.number() {
            12 => self.logging,
            13 => self.transparency,
            14 => self.oversight,
            _ => self.accuracy,
        }
    }

    /// Per-article results keyed `article_12` .. `article_15`.
    pub fn by_article(&self) -> BTreeMap<String, bool> {
        Article::ALL
            .iter()
            .map(|a| (a.to_string(), self.for_article(*a)))
            .collect()
    }

    pub fn all_met(&self) -> bool {
        Article::ALL.iter().all(|a| self.for_article(*a))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    PendingVerification,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Verified,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub request_id: String,
    pub model_id: String,
    pub inference_hash: String,
    pub threshold: usize,
    pub total_nodes: usize,
    pub criteria: ComplianceCriteria,
    pub status: RequestStatus,
}

impl VerificationRequest {
    pub fn new(
        model_id: impl Into<String>,
        inference_hash: impl Into<String>,
        criteria: ComplianceCriteria,
        threshold: usize,
        total_nodes: usize,
    ) -> Self {
        let model_id = model_id.into();
        let inference_hash = inference_hash.into();
        let computation_id = sha256_hex(format!("{model_id}{inference_hash}{threshold}"));
        Self {
            request_id: format!("REQ-{}", &computation_id[..16]),
            model_id,
            inference_hash,
            threshold,
            total_nodes,
            criteria,
            status: RequestStatus::PendingVerification,
        }
    }
}

/// The statement every node signs. Field order is part of the digest.
#[derive(Serialize)]
struct VerdictStatement<'a> {
    request_id: &'a str,
    model_id: &'a str,
    inference_hash: &'a str,
    verdict: Verdict,
    compliance: &'a BTreeMap<String, bool>,
}

impl VerdictStatement<'_> {
    fn digest(&self) -> Result<[u8; 32], LedgerError> {
        let json = serde_json::to_vec(self).map_err(|e| LedgerError::Serialization(format!("{e}")))?;
        let mut hasher = Sha256::new();
        hasher.update(VERDICT_DOMAIN);
        hasher.update(&json);
        Ok(hasher.finalize().into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    pub node_id: String,
    pub public_key_hex: String,
    pub signature_hex: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub request_id: String,
    pub model_id: String,
    pub inference_hash: String,
    pub verdict: Verdict,
    pub compliance: BTreeMap<String, bool>,
    pub threshold: usize,
    pub signatures: Vec<PartialSignature>,
    pub digest_hex: String,
}

impl QuorumCertificate {
    fn statement(&self) -> VerdictStatement<'_> {
        VerdictStatement {
            request_id: &self.request_id,
            model_id: &self.model_id,
            inference_hash: &self.inference_hash,
            verdict: self.verdict,
            compliance: &self.compliance,
        }
    }

    /// Count signatures from distinct registered nodes that verify over the
    /// recomputed verdict digest.
    pub fn valid_signatures(&self, registry: &NodeRegistry) -> Result<usize, LedgerError> {
        let digest = self.statement().digest()?;
        let mut seen = BTreeSet::new();

        for partial in &self.signatures {
            let Some(key) = registry.keys.get(&partial.node_id) else {
                continue;
            };
            if hex::encode(key.as_bytes()) != partial.public_key_hex {
                continue;
            }
            let Ok(sig_bytes) = hex::decode(&partial.signature_hex) else {
                continue;
            };
            let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
                continue;
            };
            let signature = Signature::from_bytes(&sig_bytes);
            if key.verify_strict(&digest, &signature).is_ok() {
                seen.insert(partial.node_id.as_str());
            }
        }

        Ok(seen.len())
    }

    /// Valid iff at least the registry's threshold of nodes signed.
    pub fn verify(&self, registry: &NodeRegistry) -> Result<bool, LedgerError> {
        let required = registry.threshold.max(self.threshold);
        Ok(self.valid_signatures(registry)? >= required)
    }
}

/// Public description of one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub public_key_hex: String,
}

/// Public keys of the quorum, used to check certificates.
#[derive(Clone, Debug)]
pub struct NodeRegistry {
    pub threshold: usize,
    keys: BTreeMap<String, VerifyingKey>,
}

impl NodeRegistry {
    pub fn from_nodes(threshold: usize, nodes: &[NodeInfo]) -> Result<Self, LedgerError> {
        let mut keys = BTreeMap::new();
        for node in nodes {
            let bytes = hex::decode(&node.public_key_hex)
                .map_err(|e| LedgerError::InvalidHash(format!("{}: {e}", node.node_id)))?;
            let bytes = <[u8; 32]>::try_from(bytes.as_slice())
                .map_err(|_| LedgerError::InvalidHash(format!("{}: expected 32-byte key", node.node_id)))?;
            let key = VerifyingKey::from_bytes(&bytes)
                .map_err(|e| LedgerError::InvalidHash(format!("{}: {e}", node.node_id)))?;
            keys.insert(node.node_id.clone(), key);
        }
        if threshold == 0 || threshold > keys.len() {
            return Err(LedgerError::InvalidThreshold { threshold, nodes: keys.len() });
        }
        Ok(Self { threshold, keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

pub struct QuorumNode {
    pub node_id: String,
    signing_key: SigningKey,
}

impl QuorumNode {
    pub fn generate<R: RngCore + CryptoRng>(node_id: impl Into<String>, rng: &mut R) -> Self {
        Self {
            node_id: node_id.into(),
            signing_key: SigningKey::generate(rng),
        }
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.node_id.clone(),
            public_key_hex: hex::encode(self.signing_key.verifying_key().as_bytes()),
        }
    }

    fn sign(&self, digest: &[u8; 32]) -> PartialSignature {
        let signature = self.signing_key.sign(digest);
        PartialSignature {
            node_id: self.node_id.clone(),
            public_key_hex: hex::encode(self.signing_key.verifying_key().as_bytes()),
            signature_hex: hex::encode(signature.to_bytes()),
        }
    }
}

pub struct QuorumNetwork {
    threshold: usize,
    nodes: Vec<QuorumNode>,
}

impl QuorumNetwork {
    pub fn generate<R: RngCore + CryptoRng>(
        threshold: usize,
        node_ids: impl IntoIterator<Item = String>,
        rng: &mut R,
    ) -> Result<Self, LedgerError> {
        let nodes: Vec<QuorumNode> = node_ids
            .into_iter()
            .map(|id| QuorumNode::generate(id, &mut *rng))
            .collect();
        if threshold == 0 || threshold > nodes.len() {
            return Err(LedgerError::InvalidThreshold { threshold, nodes: nodes.len() });
        }
        Ok(Self { threshold, nodes })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn total_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.nodes.iter().map(QuorumNode::info).collect()
    }

    pub fn registry(&self) -> NodeRegistry {
        NodeRegistry {
            threshold: self.threshold,
            keys: self
                .nodes
                .iter()
                .map(|n| (n.node_id.clone(), n.signing_key.verifying_key()))
                .collect(),
        }
    }

    pub fn request(
        &self,
        model_id: impl Into<String>,
        inference_hash: impl Into<String>,
        criteria: ComplianceCriteria,
    ) -> VerificationRequest {
        VerificationRequest::new(model_id, inference_hash, criteria, self.threshold, self.nodes.len())
    }

    /// Have every online node sign the verdict for `request`.
    pub fn verify(&self, request: &VerificationRequest, offline: &[String]) -> Result<QuorumCertificate, LedgerError> {
        if let Some(unknown) = offline.iter().find(|id| !self.nodes.iter().any(|n| &n.node_id == *id)) {
            return Err(LedgerError::UnknownNode(unknown.clone()));
        }

        let online: Vec<&QuorumNode> = self
            .nodes
            .iter()
            .filter(|n| !offline.contains(&n.node_id))
            .collect();

        if online.len() < self.threshold {
            return Err(LedgerError::InsufficientNodes {
                online: online.len(),
                threshold: self.threshold,
            });
        }

        let compliance = request.criteria.by_article();
        let verdict = if request.criteria.all_met() { Verdict::Verified } else { Verdict::Failed };

        let statement = VerdictStatement {
            request_id: &request.request_id,
            model_id: &request.model_id,
            inference_hash: &request.inference_hash,
            verdict,
            compliance: &compliance,
        };
        let digest = statement.digest()?;

        Ok(QuorumCertificate {
            request_id: request.request_id.clone(),
            model_id: request.model_id.clone(),
            inference_hash: request.inference_hash.clone(),
            verdict,
            compliance: compliance.clone(),
            threshold: self.threshold,
            signatures: online.iter().map(|n| n.sign(&digest)).collect(),
            digest_hex: hex::encode(digest),
        })
    }
}
