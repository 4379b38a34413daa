//! Crate-wide constants used by the ZK circuit and host-side orchestration.

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{find_poseidon_ark_and_mds, PoseidonConfig};
use ark_ff::PrimeField;

/// Default number of events per proven batch.
///
/// Ledgers are chunked into batches of this size; the final batch is padded.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Number of EU AI Act articles tracked by the circuit.
pub const NUM_ARTICLES: usize = 4;

/// Article numbers, in public-input order.
pub const ARTICLES: [u8; NUM_ARTICLES] = [12, 13, 14, 15];

/// Article value marking a padding record. Padding belongs to no article.
pub const PADDING_ARTICLE: u8 = 0;

/// Status codes, matching the ledger's compliance statuses.
pub const STATUS_PENDING: u8 = 0;
pub const STATUS_PASS: u8 = 1;
pub const STATUS_FAIL: u8 = 2;
pub const STATUS_WARNING: u8 = 3;

// Poseidon sponge configuration.
//
// Width-3 sponge (rate=2, capacity=1): each event absorbs exactly one
// (article, status) pair per permutation.
pub const POSEIDON_RATE: usize = 2;
pub const POSEIDON_CAPACITY: usize = 1;

pub const POSEIDON_FULL_ROUNDS: usize = 8;
pub const POSEIDON_PARTIAL_ROUNDS: usize = 57;

/// Poseidon S-box exponent (alpha).
pub const POSEIDON_ALPHA: u64 = 5;

/// Deterministically derive Poseidon parameters for BN254::Fr.
///
/// The native hasher and the in-circuit gadget both call this, so they agree
/// on the same round constants and MDS matrix.
pub fn poseidon_config() -> PoseidonConfig<Fr> {
    let prime_bits = Fr::MODULUS_BIT_SIZE as u64;

    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        prime_bits,
        POSEIDON_RATE,
        POSEIDON_FULL_ROUNDS as u64,
        POSEIDON_PARTIAL_ROUNDS as u64,
        0,
    );

    PoseidonConfig::new(
        POSEIDON_FULL_ROUNDS,
        POSEIDON_PARTIAL_ROUNDS,
        POSEIDON_ALPHA,
        mds,
        ark,
        POSEIDON_RATE,
        POSEIDON_CAPACITY,
    )
}
