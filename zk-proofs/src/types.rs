//! Types shared between the circuit and the host-side prover/verifier.

use crate::constants::{ARTICLES, NUM_ARTICLES, PADDING_ARTICLE, STATUS_PASS, STATUS_PENDING};
use ark_bn254::Fr;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::{Deserialize, Serialize};

/// The private part of one ledger event as seen by the circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWitness {
    /// Article number (12..=15), or 0 for padding.
    pub article: u8,
    /// Status code (see `constants::STATUS_*`).
    pub status: u8,
}

impl EventWitness {
    pub fn new(article: u8, status: u8) -> Self {
        Self { article, status }
    }

    /// Filler record used to bring a short batch up to the circuit size.
    pub fn padding() -> Self {
        Self { article: PADDING_ARTICLE, status: STATUS_PENDING }
    }

    pub fn is_padding(&self) -> bool {
        self.article == PADDING_ARTICLE
    }

    pub fn is_pass(&self) -> bool {
        self.status == STATUS_PASS
    }
}

/// A batch's aggregate statistics, per article.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Events with status PASS per article.
    pub pass_by_article: [u64; NUM_ARTICLES],
    /// All (non-padding) events per article.
    pub total_by_article: [u64; NUM_ARTICLES],
}

impl BatchStats {
    pub fn zero() -> Self {
        Self {
            pass_by_article: [0u64; NUM_ARTICLES],
            total_by_article: [0u64; NUM_ARTICLES],
        }
    }

    pub fn total(&self) -> u64 {
        self.total_by_article.iter().sum()
    }

    pub fn passed(&self) -> u64 {
        self.pass_by_article.iter().sum()
    }

    /// Element-wise sum, used to fold batches into an attestation total.
    pub fn merge(&mut self, other: &BatchStats) {
        for i in 0..NUM_ARTICLES {
            self.pass_by_article[i] += other.pass_by_article[i];
            self.total_by_article[i] += other.total_by_article[i];
        }
    }
}

/// JSON-friendly representation of a field element.
///
/// Fr values travel as hex of arkworks' compressed encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrHex {
    pub hex: String,
}

impl FrHex {
    pub fn from_fr(x: &Fr) -> Self {
        let mut bytes = Vec::new();
        x.serialize_compressed(&mut bytes)
            .expect("in-memory serialization");
        Self { hex: hex::encode(bytes) }
    }

    pub fn to_fr(&self) -> Result<Fr, String> {
        let bytes = hex::decode(&self.hex).map_err(|e| format!("invalid hex: {e}"))?;
        Fr::deserialize_compressed(&bytes[..]).map_err(|e| format!("invalid field bytes: {e}"))
    }
}

/// Public inputs for a batch proof.
///
/// Ordering MUST match the circuit's public input allocation order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchPublicInputs {
    pub batch_commitment: FrHex,
    pub pass_by_article: [u64; NUM_ARTICLES],
    pub total_by_article: [u64; NUM_ARTICLES],
}

/// Map an article number to its public-input slot.
pub fn article_index(article: u8) -> Option<usize> {
    ARTICLES.iter().position(|a| *a == article)
}
