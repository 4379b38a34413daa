use crate::state::AppState;
use crate::{db, errors::ApiError};
use chrono::{Duration, Utc};
use gallows_ledger::Article12Event;
use gallows_zk::constants::poseidon_config;
use gallows_zk::groth16::{encode_b64, pad_batch, prove_batch, serialize_proof, verify_batch_proof};
use gallows_zk::types::{BatchStats, EventWitness, FrHex};
use tracing::info;
use uuid::Uuid;

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::PoseidonSponge;
use ark_crypto_primitives::sponge::CryptographicSponge;

/// Ready attestations stop being current after this long.
pub const ATTESTATION_VALIDITY_DAYS: i64 = 365;

/// The circuit's view of a ledger event: article and status only.
pub fn witness_for(event: &Article12Event) -> EventWitness {
    EventWitness::new(event.article_reference.number(), event.compliance_status.code())
}

/// Split events into batches of `N`, padding the last one.
pub fn batches_for<const N: usize>(events: &[Article12Event]) -> Result<Vec<Vec<EventWitness>>, ApiError> {
    events
        .chunks(N)
        .map(|chunk| -> Result<Vec<EventWitness>, ApiError> {
            Ok(pad_batch::<N>(chunk.iter().map(witness_for).collect())?)
        })
        .collect()
}

pub fn batch_count(event_count: u64, batch_size: u64) -> u64 {
    event_count.div_ceil(batch_size.max(1))
}

/// Fold batch commitments, in order, into one attestation commitment.
pub fn fold_commitments(commitments: &[Fr]) -> Fr {
    let cfg = poseidon_config();
    let mut sponge = PoseidonSponge::<Fr>::new(&cfg);
    for c in commitments {
        sponge.absorb(c);
    }
    sponge.squeeze_field_elements::<Fr>(1)[0]
}

/// Background job: prove every batch of the chain snapshot and record the attestation.
///
/// `N` must match the size of the state's Groth16 keys. Only counts,
/// commitments and proofs are stored; event contents stay in the ledger.
pub async fn generate_attestation<const N: usize>(state: AppState, attestation_id: Uuid, chain_id: String, event_count: u64) {
    let res = generate_attestation_inner::<N>(state.clone(), attestation_id, &chain_id, event_count).await;
    if let Err(e) = res {
        tracing::warn!(%attestation_id, %chain_id, error = %e, "attestation failed");
        if let Err(db_err) = db::set_attestation_failed(&state.db, attestation_id, &format!("{e}")).await {
            tracing::error!(%attestation_id, error = %db_err, "could not mark attestation failed");
        }
    }
}

async fn generate_attestation_inner<const N: usize>(
    state: AppState,
    attestation_id: Uuid,
    chain_id: &str,
    event_count: u64,
) -> Result<(), ApiError> {
    let ledger = db::load_ledger(&state.db, chain_id, Some(event_count))
        .await?
        .ok_or_else(|| ApiError::NotFound("chain not found".to_string()))?;

    if ledger.len() != event_count {
        return Err(ApiError::Conflict("ledger shrank below the attested size".to_string()));
    }

    let keys = state.ensure_keys().await?;
    if keys.batch_size != N {
        tracing::error!(key_batch_size = keys.batch_size, batch_size = N, "groth16 keys do not match the batch size");
        return Err(ApiError::Internal);
    }
    let batches = batches_for::<N>(ledger.events())?;

    info!(%attestation_id, %chain_id, event_count, batches = batches.len(), "starting attestation");

    let mut commitments = Vec::with_capacity(batches.len());
    let mut totals = BatchStats::zero();

    for (batch_index, events) in batches.into_iter().enumerate() {
        let pk = keys.pk.clone();
        let vk = keys.vk.clone();

        // Prove on a blocking thread.
        let (commitment, stats, proof_b64) = tokio::task::spawn_blocking(move || {
            let mut proof_rng = rand::rngs::OsRng;
            let (proof, commitment, stats) = prove_batch::<N>(&mut proof_rng, pk.as_ref(), events)?;

            // Fail closed if proof doesn't verify.
            verify_batch_proof(vk.as_ref(), &proof, commitment, &stats)?;

            let proof_b64 = encode_b64(&serialize_proof(&proof)?);
            Ok::<(Fr, BatchStats, String), ApiError>((commitment, stats, proof_b64))
        })
        .await
        .map_err(|_| ApiError::Internal)??;

        db::insert_batch(
            &state.db,
            attestation_id,
            batch_index as u64,
            &FrHex::from_fr(&commitment).hex,
            &stats,
            &proof_b64,
            true,
        )
        .await?;

        commitments.push(commitment);
        totals.merge(&stats);

        if batch_index % 10 == 0 {
            info!(%attestation_id, batch_index, "proved batch");
        }
    }

    let attestation_commitment = fold_commitments(&commitments);
    let expires_at = Utc::now() + Duration::days(ATTESTATION_VALIDITY_DAYS);

    db::set_attestation_ready(
        &state.db,
        attestation_id,
        &FrHex::from_fr(&attestation_commitment).hex,
        &totals,
        expires_at,
    )
    .await?;

    info!(%attestation_id, passed = totals.passed(), total = totals.total(), "attestation ready");
    Ok(())
}
