//! Property-Based Tests for Erasure Coding
//!
//! Uses proptest to check the field, matrix and coder invariants across
//! random inputs and configurations.
//!
//! # Test Properties
//!
//! 1. **Inverse**: `invert(M) × M = I` for every invertible matrix
//! 2. **Round trip**: any `<= m` erasures are restored exactly
//! 3. **Incremental checksums**: `recalc_checksum` equals recomputation
//! 4. **Backend agreement**: portable and accelerated backends match

#![cfg(test)]

use std::sync::Arc;

use proptest::prelude::*;

use super::backend::{SliceBackend, TableBackend};
use super::coder::Column;
use super::domain::CodingDomain;
use crate::error::Error;
use crate::field::{GaloisField, Matrix};

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for `(k, m)` configurations over GF(2^8).
fn code_config_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=10, 1usize..=4)
}

/// Strategy for field widths.
fn field_bits_strategy() -> impl Strategy<Value = u32> {
    2u32..=8
}

/// Strategy for square matrices with entries from GF(2^8).
fn square_matrix_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    (1usize..=6).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::vec(any::<u8>(), n), n)
    })
}

/// Strategy for erasure positions (which columns to lose).
fn erasure_strategy(total: usize, max_erasures: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..total, 0..=max_erasures).prop_map(|mut v| {
        v.sort();
        v.dedup();
        v
    })
}

fn valid_mask(total: usize, erased: &[usize]) -> u64 {
    erased
        .iter()
        .fold((1u64 << total) - 1, |mask, &e| mask & !(1 << e))
}

// =============================================================================
// Field and Matrix Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: division undoes multiplication in every field width.
    #[test]
    fn prop_div_undoes_mult(bits in field_bits_strategy(), a in any::<u8>(), b in any::<u8>()) {
        let field = GaloisField::standard(bits)?;
        let mask = (field.size() - 1) as u8;
        let (a, b) = (a & mask, b & mask);
        prop_assume!(b != 0);

        prop_assert_eq!(field.div(field.mult(a, b), b)?, a);
    }

    /// Property: multiplication is associative.
    #[test]
    fn prop_mult_associative(a in any::<u8>(), b in any::<u8>(), c in any::<u8>()) {
        let field = GaloisField::gf256();
        prop_assert_eq!(
            field.mult(field.mult(a, b), c),
            field.mult(a, field.mult(b, c))
        );
    }

    /// Property: an inverted matrix times the original is the identity, and
    /// singular matrices are reported rather than producing garbage.
    #[test]
    fn prop_invert_is_inverse(rows in square_matrix_strategy()) {
        let field = GaloisField::gf256();
        let original = Matrix::from_rows(&rows)?;
        let mut inverse = original.clone();

        match inverse.invert(&field) {
            Ok(()) => {
                prop_assert!(inverse.multiply(&original, &field)?.is_identity());
            }
            Err(Error::SingularMatrix { .. }) => {
                prop_assert_eq!(inverse, original);
            }
            Err(e) => return Err(TestCaseError::fail(e.to_string())),
        }
    }
}

// =============================================================================
// Coder Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: any set of at most m erasures is restored exactly.
    #[test]
    fn prop_word_round_trip(
        (k, m) in code_config_strategy(),
        seed in prop::collection::vec(any::<u8>(), 14),
        erased in erasure_strategy(14, 4),
    ) {
        let domain = CodingDomain::gf256(k, m)?;
        let total = k + m;
        let erased: Vec<usize> = erased.into_iter().filter(|&e| e < total).take(m).collect();

        let mut word = seed[..total].to_vec();
        domain.checksum_coder().calculate_word_all(&mut word)?;

        let mut damaged = word.clone();
        for &e in &erased {
            damaged[e] = 0;
        }
        domain.create_coder(valid_mask(total, &erased))?.calculate_word_all(&mut damaged)?;

        prop_assert_eq!(damaged, word);
    }

    /// Property: one more erasure than checksums is always rejected.
    #[test]
    fn prop_too_many_erasures_rejected((k, m) in code_config_strategy()) {
        let domain = CodingDomain::gf256(k, m)?;
        let erased: Vec<usize> = (0..=m).collect();
        let result = domain.create_coder(valid_mask(k + m, &erased));
        let is_uncorrectable = matches!(result, Err(Error::Uncorrectable { .. }));
        prop_assert!(is_uncorrectable);
    }

    /// Property: updating one data symbol incrementally matches recomputing.
    #[test]
    fn prop_recalc_checksum(
        (k, m) in code_config_strategy(),
        seed in prop::collection::vec(any::<u8>(), 10),
        index in 0usize..10,
        new_value in any::<u8>(),
    ) {
        let domain = CodingDomain::gf256(k, m)?;
        let index = index % k;
        let mut word = seed[..k].to_vec();
        word.resize(k + m, 0);
        domain.checksum_coder().calculate_word_all(&mut word)?;

        let old_value = word[index];
        word[index] = new_value;
        let mut incremental = word.clone();
        domain.recalc_checksum(&mut incremental, k, index, old_value, new_value)?;
        domain.checksum_coder().calculate_word_all(&mut word)?;

        prop_assert_eq!(incremental, word);
    }

    /// Property: both backends compute identical jagged checksum columns.
    #[test]
    fn prop_backends_agree(
        lens in prop::collection::vec(0usize..64, 4),
        fill in any::<u8>(),
    ) {
        let field = GaloisField::gf256();
        let data: Vec<Vec<u8>> = lens
            .iter()
            .enumerate()
            .map(|(c, &len)| (0..len).map(|i| fill ^ (i as u8).wrapping_mul(c as u8 + 3)).collect())
            .collect();
        let height = lens.iter().copied().max().unwrap_or(0);

        let mut results = Vec::new();
        for domain in [
            CodingDomain::with_backend(4, 2, field.clone(), Arc::new(TableBackend))?,
            CodingDomain::with_backend(4, 2, field.clone(), Arc::new(SliceBackend))?,
        ] {
            let mut p0 = vec![0u8; height];
            let mut p1 = vec![0u8; height];
            let mut columns: Vec<Column> = data.iter().map(|d| Column::Source(d)).collect();
            columns.push(Column::Target(&mut p0));
            columns.push(Column::Target(&mut p1));
            let coded = domain.checksum_coder().calculate_all_columns(&mut columns)?;
            prop_assert_eq!(coded.height, height);
            drop(columns);
            results.push((p0, p1));
        }

        prop_assert_eq!(&results[0], &results[1]);
    }
}
