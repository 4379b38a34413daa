//! Groth16 prover/verifier orchestration for the compliance batch circuit.
//!
//! SECURITY NOTE (prototype): Groth16 requires a trusted setup that produces a proving key (PK)
//! and verifying key (VK). Keys are generated locally here. In production, an MPC ceremony
//! (or a transparent system) should be used.

use crate::circuit::ComplianceBatchCircuit;
use crate::constants::{poseidon_config, NUM_ARTICLES, STATUS_WARNING};
use crate::types::{article_index, BatchPublicInputs, BatchStats, EventWitness, FrHex};
use ark_bn254::{Bn254, Fr};
use ark_crypto_primitives::sponge::poseidon::PoseidonSponge;
use ark_crypto_primitives::sponge::CryptographicSponge;
use ark_groth16::{prepare_verifying_key, Groth16, Proof, ProvingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use base64::Engine;
use rand::RngCore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZkError {
    #[error("invalid batch size: expected {expected}, got {got}")]
    InvalidBatchSize { expected: usize, got: usize },

    #[error("invalid witness at position {index}: article {article}, status {status}")]
    InvalidWitness { index: usize, article: u8, status: u8 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("proof verification failed")]
    VerificationFailed,

    #[error("arkworks error: {0}")]
    Ark(String),
}

/// Poseidon commitment over (article, status) pairs, in order.
///
/// Performs no validation; see [`compute_batch_commitment_and_stats`].
pub fn commit_events(events: &[EventWitness]) -> Fr {
    let cfg = poseidon_config();
    let mut sponge = PoseidonSponge::<Fr>::new(&cfg);
    for e in events {
        sponge.absorb(&vec![Fr::from(e.article as u64), Fr::from(e.status as u64)]);
    }
    sponge.squeeze_field_elements::<Fr>(1)[0]
}

/// Compute (commitment, stats) for a batch.
///
/// This MUST match the circuit's logic.
pub fn compute_batch_commitment_and_stats<const N: usize>(events: &[EventWitness]) -> Result<(Fr, BatchStats), ZkError> {
    if events.len() != N {
        return Err(ZkError::InvalidBatchSize { expected: N, got: events.len() });
    }

    let mut stats = BatchStats::zero();

    for (index, e) in events.iter().enumerate() {
        if e.status > STATUS_WARNING {
            return Err(ZkError::InvalidWitness { index, article: e.article, status: e.status });
        }
        if e.is_padding() {
            continue;
        }
        let Some(a) = article_index(e.article) else {
            return Err(ZkError::InvalidWitness { index, article: e.article, status: e.status });
        };
        stats.total_by_article[a] += 1;
        if e.is_pass() {
            stats.pass_by_article[a] += 1;
        }
    }

    Ok((commit_events(events), stats))
}

/// Pad a short run of events up to the circuit size `N`.
pub fn pad_batch<const N: usize>(mut events: Vec<EventWitness>) -> Result<Vec<EventWitness>, ZkError> {
    if events.len() > N {
        return Err(ZkError::InvalidBatchSize { expected: N, got: events.len() });
    }
    events.resize(N, EventWitness::padding());
    Ok(events)
}

/// Convert (commitment, stats) to the public-input vector expected by Groth16.
///
/// ORDERING MUST MATCH the circuit's `new_input` allocation order.
pub fn batch_public_inputs_to_field_elems(commitment: Fr, stats: &BatchStats) -> Vec<Fr> {
    let mut v = Vec::with_capacity(1 + 2 * NUM_ARTICLES);
    v.push(commitment);
    for i in 0..NUM_ARTICLES {
        v.push(Fr::from(stats.pass_by_article[i]));
    }
    for i in 0..NUM_ARTICLES {
        v.push(Fr::from(stats.total_by_article[i]));
    }
    v
}

/// Generate a Groth16 keypair for the batch circuit.
///
/// For a fixed `N`, this must be run once.
pub fn setup_keys<const N: usize>(rng: &mut impl RngCore) -> Result<(ProvingKey<Bn254>, VerifyingKey<Bn254>), ZkError> {
    // Constraints only depend on N, so an all-padding witness is enough.
    let dummy_events = vec![EventWitness::padding(); N];
    let (commitment, stats) = compute_batch_commitment_and_stats::<N>(&dummy_events)?;

    let circuit = ComplianceBatchCircuit::<N> {
        events: dummy_events,
        public_batch_commitment: commitment,
        public_pass_by_article: stats.pass_by_article,
        public_total_by_article: stats.total_by_article,
    };

    let pk = Groth16::<Bn254>::generate_random_parameters_with_reduction(circuit, rng)
        .map_err(|e| ZkError::Ark(format!("{e}")))?;

    let vk = pk.vk.clone();
    Ok((pk, vk))
}

/// Prove a batch's commitment and per-article counts.
pub fn prove_batch<const N: usize>(
    rng: &mut impl RngCore,
    pk: &ProvingKey<Bn254>,
    events: Vec<EventWitness>,
) -> Result<(Proof<Bn254>, Fr, BatchStats), ZkError> {
    let (commitment, stats) = compute_batch_commitment_and_stats::<N>(&events)?;

    let circuit = ComplianceBatchCircuit::<N> {
        events,
        public_batch_commitment: commitment,
        public_pass_by_article: stats.pass_by_article,
        public_total_by_article: stats.total_by_article,
    };

    let proof = Groth16::<Bn254>::create_random_proof_with_reduction(circuit, pk, rng)
        .map_err(|e| ZkError::Ark(format!("{e}")))?;

    Ok((proof, commitment, stats))
}

/// Verify a batch proof.
pub fn verify_batch_proof(
    vk: &VerifyingKey<Bn254>,
    proof: &Proof<Bn254>,
    commitment: Fr,
    stats: &BatchStats,
) -> Result<(), ZkError> {
    let public_inputs = batch_public_inputs_to_field_elems(commitment, stats);
    let pvk = prepare_verifying_key(vk);
    let ok = Groth16::<Bn254>::verify_proof(&pvk, proof, &public_inputs)
        .map_err(|e| ZkError::Ark(format!("{e}")))?;
    if !ok {
        return Err(ZkError::VerificationFailed);
    }
    Ok(())
}

/// Serialize a proving key to bytes.
pub fn serialize_pk(pk: &ProvingKey<Bn254>) -> Result<Vec<u8>, ZkError> {
    let mut out = Vec::new();
    pk.serialize_compressed(&mut out)
        .map_err(|e| ZkError::Serialization(format!("{e}")))?;
    Ok(out)
}

pub fn deserialize_pk(bytes: &[u8]) -> Result<ProvingKey<Bn254>, ZkError> {
    ProvingKey::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ZkError::Serialization(format!("{e}")))
}

pub fn serialize_vk(vk: &VerifyingKey<Bn254>) -> Result<Vec<u8>, ZkError> {
    let mut out = Vec::new();
    vk.serialize_compressed(&mut out)
        .map_err(|e| ZkError::Serialization(format!("{e}")))?;
    Ok(out)
}

pub fn deserialize_vk(bytes: &[u8]) -> Result<VerifyingKey<Bn254>, ZkError> {
    VerifyingKey::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ZkError::Serialization(format!("{e}")))
}

pub fn serialize_proof(proof: &Proof<Bn254>) -> Result<Vec<u8>, ZkError> {
    let mut out = Vec::new();
    proof
        .serialize_compressed(&mut out)
        .map_err(|e| ZkError::Serialization(format!("{e}")))?;
    Ok(out)
}

pub fn deserialize_proof(bytes: &[u8]) -> Result<Proof<Bn254>, ZkError> {
    Proof::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ZkError::Serialization(format!("{e}")))
}

/// Base64 transport encoding for keys and proofs.
pub fn encode_b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_b64(s: &str) -> Result<Vec<u8>, ZkError> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| ZkError::Serialization(format!("{e}")))
}

/// JSON-friendly public input bundle.
pub fn batch_public_inputs_json(commitment: Fr, stats: &BatchStats) -> BatchPublicInputs {
    BatchPublicInputs {
        batch_commitment: FrHex::from_fr(&commitment),
        pass_by_article: stats.pass_by_article,
        total_by_article: stats.total_by_article,
    }
}
