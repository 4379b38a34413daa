//! Append-only compliance ledger for AI system audit events.
//!
//! This crate contains:
//! - Compliance events and their canonical SHA-256 hashing.
//! - An RFC 6962 Merkle tree with inclusion and consistency proofs.
//! - The per-chain ledger that issues compliance certificates.
//! - A k-of-n Ed25519 quorum used to co-sign compliance verdicts.

pub mod error;
pub mod event;
pub mod hash;
pub mod ledger;
pub mod merkle;
pub mod quorum;

pub use error::LedgerError;
pub use event::{Article, Article12Event, ComplianceStatus, EventDraft, RiskLevel};
pub use ledger::{AuditTrail, ComplianceCertificate, ComplianceLedger, ConsistencyProof, InclusionProof, LedgerTree};
pub use merkle::{Hash, MerkleTree};
