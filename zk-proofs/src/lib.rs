//! ZK layer for the compliance ledger.
//!
//! This crate contains:
//! - A SNARK circuit proving per-article PASS/total counts were computed from committed events.
//! - Prover + verifier orchestration.
//! - Serialization helpers for transporting proofs and public inputs.

pub mod constants;
pub mod circuit;
pub mod groth16;
pub mod types;
