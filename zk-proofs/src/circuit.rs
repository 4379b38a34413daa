//! R1CS circuit for proving batch-level compliance counts.
//!
//! What this circuit proves (for one batch of ledger events):
//! 1) The prover knows N private (article, status) pairs.
//! 2) A public commitment `C` equals Poseidon(pairs) (binding the proof to committed events).
//! 3) The public per-article totals and PASS counts equal the counts computed from those pairs.
//!
//! Privacy: individual events are witnesses (never public). Only counts + commitment are public.

use crate::constants::{poseidon_config, ARTICLES, NUM_ARTICLES, PADDING_ARTICLE, STATUS_PASS, STATUS_WARNING};
use crate::types::EventWitness;
use ark_bn254::Fr;
use ark_crypto_primitives::sponge::constraints::CryptographicSpongeVar;
use ark_crypto_primitives::sponge::poseidon::constraints::PoseidonSpongeVar;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::prelude::*;
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};

/// Convert little-endian boolean bits into an FpVar.
fn bits_le_to_fp(bits_le: &[Boolean<Fr>]) -> Result<FpVar<Fr>, SynthesisError> {
    let mut acc = FpVar::<Fr>::constant(Fr::from(0u64));
    let mut coeff = FpVar::<Fr>::constant(Fr::from(1u64));

    for b in bits_le {
        // b ? coeff : 0
        let term = b.select(&coeff, &FpVar::<Fr>::constant(Fr::from(0u64)))?;
        acc += term;
        coeff += coeff.clone();
    }

    Ok(acc)
}

/// Enforce that `v` is a u8 (fits in 8 bits) and return its 8 little-endian bits.
fn constrain_u8(v: &FpVar<Fr>) -> Result<Vec<Boolean<Fr>>, SynthesisError> {
    let bits = v.to_bits_le()?;
    let bits8 = bits[..8].to_vec();
    let reconstructed = bits_le_to_fp(&bits8)?;
    reconstructed.enforce_equal(v)?;
    Ok(bits8)
}

/// Boolean gadget: `a == c` for a u8 value given as little-endian bits.
fn eq_const_u8(a_bits_le: &[Boolean<Fr>], c: u8) -> Result<Boolean<Fr>, SynthesisError> {
    let mut equal = Boolean::constant(true);
    for (i, a_i) in a_bits_le.iter().enumerate().take(8) {
        let c_i = (c >> i) & 1 == 1;
        let bit_matches = if c_i { a_i.clone() } else { !a_i.clone() };
        equal = &equal & &bit_matches;
    }
    Ok(equal)
}

/// Boolean gadget: `a <= c` where `a` is an 8-bit unsigned value in little-endian bits.
fn leq_const_u8(a_bits_le: &[Boolean<Fr>], c: u8) -> Result<Boolean<Fr>, SynthesisError> {
    // Lexicographic compare from MSB to LSB.
    let mut less = Boolean::constant(false);
    let mut equal = Boolean::constant(true);

    for i in (0..8).rev() {
        let a_i = a_bits_le[i].clone();
        let c_i = ((c >> i) & 1u8) == 1u8;

        // equal && (!a_i) && c_i
        if c_i {
            let less_i = &equal & &!a_i.clone();
            less = &less | &less_i;
        }

        let a_eq_ci = if c_i { a_i } else { !a_i };
        equal = &equal & &a_eq_ci;
    }

    Ok(&less | &equal)
}

/// Circuit proving batch commitment binding and per-article counts.
///
/// `N` is the number of events in the batch (padding included).
#[derive(Clone, Debug)]
pub struct ComplianceBatchCircuit<const N: usize> {
    /// Private events.
    pub events: Vec<EventWitness>,

    /// Public commitment to the batch's events.
    pub public_batch_commitment: Fr,

    /// Public aggregate outputs.
    pub public_pass_by_article: [u64; NUM_ARTICLES],
    pub public_total_by_article: [u64; NUM_ARTICLES],
}

impl<const N: usize> ConstraintSynthesizer<Fr> for ComplianceBatchCircuit<N> {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        // --- Public inputs ---
        // IMPORTANT: ordering MUST match `groth16::batch_public_inputs_to_field_elems`:
        // commitment, pass[0..A), total[0..A).
        let public_commitment = FpVar::<Fr>::new_input(cs.clone(), || Ok(self.public_batch_commitment))?;

        let mut public_pass = Vec::<FpVar<Fr>>::with_capacity(NUM_ARTICLES);
        let mut public_total = Vec::<FpVar<Fr>>::with_capacity(NUM_ARTICLES);

        for i in 0..NUM_ARTICLES {
            public_pass.push(FpVar::<Fr>::new_input(cs.clone(), || Ok(Fr::from(self.public_pass_by_article[i])))?);
        }
        for i in 0..NUM_ARTICLES {
            public_total.push(FpVar::<Fr>::new_input(cs.clone(), || Ok(Fr::from(self.public_total_by_article[i])))?);
        }

        // --- Witness (private) events ---
        if self.events.len() != N {
            return Err(SynthesisError::Unsatisfiable);
        }

        let poseidon_cfg = poseidon_config();
        let mut sponge = PoseidonSpongeVar::<Fr>::new(cs.clone(), &poseidon_cfg);

        let zero = FpVar::<Fr>::constant(Fr::from(0u64));
        let one = FpVar::<Fr>::constant(Fr::from(1u64));

        let mut pass_vars = vec![zero.clone(); NUM_ARTICLES];
        let mut total_vars = vec![zero.clone(); NUM_ARTICLES];

        for event in self.events {
            let article = FpVar::<Fr>::new_witness(cs.clone(), || Ok(Fr::from(event.article as u64)))?;
            let status = FpVar::<Fr>::new_witness(cs.clone(), || Ok(Fr::from(event.status as u64)))?;

            let article_bits = constrain_u8(&article)?;
            let status_bits = constrain_u8(&status)?;

            // Commitment binding: absorb private fields.
            sponge.absorb(&vec![article.clone(), status.clone()])?;

            // Status must be one of the known codes.
            leq_const_u8(&status_bits, STATUS_WARNING)?.enforce_equal(&Boolean::constant(true))?;

            let is_pass = eq_const_u8(&status_bits, STATUS_PASS)?;
            let is_padding = eq_const_u8(&article_bits, PADDING_ARTICLE)?;

            // Articles are distinct constants, so at most one matches.
            let mut matched = Boolean::constant(false);
            for (i, number) in ARTICLES.iter().enumerate() {
                let in_article = eq_const_u8(&article_bits, *number)?;
                matched = &matched | &in_article;

                total_vars[i] += in_article.select(&one, &zero)?;

                let passed_here = &in_article & &is_pass;
                pass_vars[i] += passed_here.select(&one, &zero)?;
            }

            // Every event is either tracked or explicit padding.
            (&matched | &is_padding).enforce_equal(&Boolean::constant(true))?;
        }

        let commitment = sponge.squeeze_field_elements(1)?[0].clone();
        commitment.enforce_equal(&public_commitment)?;

        for i in 0..NUM_ARTICLES {
            pass_vars[i].enforce_equal(&public_pass[i])?;
            total_vars[i].enforce_equal(&public_total[i])?;
        }

        Ok(())
    }
}
