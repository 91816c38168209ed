//! Galois Field Arithmetic
//!
//! Arithmetic over GF(2^b) for widths of 2 to 8 bits, backed by log/antilog
//! tables. Every field element fits in a `u8`, so one byte of a column is one
//! code word symbol.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::{Error, Result};

/// Smallest supported field width in bits
pub const MIN_FIELD_BITS: u32 = 2;

/// Largest supported field width in bits
pub const MAX_FIELD_BITS: u32 = 8;

/// Standard primitive polynomials indexed by `bits - MIN_FIELD_BITS`
const STANDARD_POLYNOMIALS: [u32; 7] = [0x7, 0xB, 0x13, 0x25, 0x43, 0x83, 0x11D];

static STANDARD_FIELDS: Lazy<Vec<Arc<GaloisField>>> = Lazy::new(|| {
    (MIN_FIELD_BITS..=MAX_FIELD_BITS)
        .zip(STANDARD_POLYNOMIALS)
        .map(|(bits, polynomial)| Arc::new(GaloisField::build(bits, polynomial)))
        .collect()
});

// =============================================================================
// Galois Field
// =============================================================================

/// Finite field GF(2^bits) with precomputed multiplication tables
#[derive(Clone)]
pub struct GaloisField {
    bits: u32,
    primitive: u32,
    size: usize,
    mask: u8,
    /// Discrete log of each nonzero element (entry 0 unused)
    log: Vec<usize>,
    /// Powers of the generator, doubled in length so `log[a] + log[b]` never wraps
    antilog: Vec<u8>,
    inverse: Vec<u8>,
}

impl GaloisField {
    /// Create a field from a width and a primitive polynomial
    ///
    /// # Arguments
    /// * `bits` - Field width, 2 to 8
    /// * `primitive` - Primitive polynomial including the `x^bits` term
    ///
    /// # Returns
    /// The field, or an error if the width is unsupported or the polynomial
    /// does not generate every nonzero element
    pub fn new(bits: u32, primitive: u32) -> Result<Self> {
        if !(MIN_FIELD_BITS..=MAX_FIELD_BITS).contains(&bits) {
            return Err(Error::UnsupportedFieldWidth(bits));
        }
        if !Self::is_primitive(bits, primitive) {
            return Err(Error::NonPrimitivePolynomial {
                bits,
                polynomial: primitive,
            });
        }
        Ok(Self::build(bits, primitive))
    }

    /// Shared field for the standard polynomial of the given width
    pub fn standard(bits: u32) -> Result<Arc<Self>> {
        if !(MIN_FIELD_BITS..=MAX_FIELD_BITS).contains(&bits) {
            return Err(Error::UnsupportedFieldWidth(bits));
        }
        Ok(Arc::clone(
            &STANDARD_FIELDS[(bits - MIN_FIELD_BITS) as usize],
        ))
    }

    /// Shared GF(2^8) with polynomial 0x11D
    pub fn gf256() -> Arc<Self> {
        Arc::clone(&STANDARD_FIELDS[(MAX_FIELD_BITS - MIN_FIELD_BITS) as usize])
    }

    /// Standard primitive polynomial for a width, if the width is supported
    pub fn standard_polynomial(bits: u32) -> Option<u32> {
        if (MIN_FIELD_BITS..=MAX_FIELD_BITS).contains(&bits) {
            Some(STANDARD_POLYNOMIALS[(bits - MIN_FIELD_BITS) as usize])
        } else {
            None
        }
    }

    /// Check that the powers of 2 modulo `primitive` visit every nonzero
    /// element of GF(2^bits) exactly once
    pub fn is_primitive(bits: u32, primitive: u32) -> bool {
        if !(MIN_FIELD_BITS..=MAX_FIELD_BITS).contains(&bits) {
            return false;
        }
        let size = 1usize << bits;
        let mut seen = vec![false; size];
        let mut x = 1usize;
        for _ in 0..size - 1 {
            if x == 0 || x >= size || seen[x] {
                return false;
            }
            seen[x] = true;
            x <<= 1;
            if x & size != 0 {
                x ^= primitive as usize;
            }
        }
        x == 1
    }

    fn build(bits: u32, primitive: u32) -> Self {
        let size = 1usize << bits;
        let mut log = vec![0usize; size];
        let mut antilog = vec![0u8; 2 * size];

        let mut x = 1usize;
        for (power, slot) in antilog.iter_mut().enumerate().take(size - 1) {
            *slot = x as u8;
            log[x] = power;
            x <<= 1;
            if x & size != 0 {
                x ^= primitive as usize;
            }
        }
        for i in size - 1..2 * size {
            antilog[i] = antilog[i - (size - 1)];
        }

        let mut field = Self {
            bits,
            primitive,
            size,
            mask: (size - 1) as u8,
            log,
            antilog,
            inverse: vec![0u8; size],
        };

        let mut inverse = vec![0u8; size];
        for v in 1..size {
            if let Some(w) = (1..size).find(|&w| field.mult(v as u8, w as u8) == 1) {
                inverse[v] = w as u8;
            }
        }
        field.inverse = inverse;
        field
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Field width in bits
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Primitive polynomial the tables were built from
    pub fn primitive(&self) -> u32 {
        self.primitive
    }

    /// Number of elements, `2^bits`
    pub fn size(&self) -> usize {
        self.size
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    /// Addition (and subtraction): bitwise XOR
    #[inline]
    pub fn add(&self, a: u8, b: u8) -> u8 {
        (a ^ b) & self.mask
    }

    #[inline]
    pub fn mult(&self, a: u8, b: u8) -> u8 {
        let (a, b) = (a & self.mask, b & self.mask);
        if a == 0 || b == 0 {
            0
        } else {
            self.antilog[self.log[a as usize] + self.log[b as usize]]
        }
    }

    /// Multiplicative inverse
    #[inline]
    pub fn inv(&self, v: u8) -> Result<u8> {
        match v & self.mask {
            0 => Err(Error::DivideByZero(self.size)),
            v => Ok(self.inverse[v as usize]),
        }
    }

    #[inline]
    pub fn div(&self, a: u8, b: u8) -> Result<u8> {
        Ok(self.mult(a, self.inv(b)?))
    }

    /// Discrete logarithm of a nonzero element
    #[inline]
    pub fn log(&self, v: u8) -> Option<usize> {
        match v & self.mask {
            0 => None,
            v => Some(self.log[v as usize]),
        }
    }

    /// Multiply `b` by the element whose logarithm is `log_a`.
    /// `log_a` must come from [`GaloisField::log`], i.e. be below `size - 1`.
    #[inline]
    pub(crate) fn mult_log(&self, log_a: usize, b: u8) -> u8 {
        debug_assert!(
            log_a < self.size - 1,
            "logarithm {} out of range for GF({})",
            log_a,
            self.size
        );
        match b & self.mask {
            0 => 0,
            b => self.antilog[log_a + self.log[b as usize]],
        }
    }
}

impl fmt::Debug for GaloisField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaloisField")
            .field("bits", &self.bits)
            .field("primitive", &format_args!("{:#x}", self.primitive))
            .finish()
    }
}

impl fmt::Display for GaloisField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GF(2^{})", self.bits)
    }
}

impl PartialEq for GaloisField {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits && self.primitive == other.primitive
    }
}

impl Eq for GaloisField {}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn all_fields() -> Vec<Arc<GaloisField>> {
        (MIN_FIELD_BITS..=MAX_FIELD_BITS)
            .map(|bits| GaloisField::standard(bits).unwrap())
            .collect()
    }

    // =========================================================================
    // Construction Tests
    // =========================================================================

    #[test]
    fn test_standard_polynomials_are_primitive() {
        for bits in MIN_FIELD_BITS..=MAX_FIELD_BITS {
            let polynomial = GaloisField::standard_polynomial(bits).unwrap();
            assert!(
                GaloisField::is_primitive(bits, polynomial),
                "{:#x} should be primitive for {} bits",
                polynomial,
                bits
            );
            assert!(GaloisField::new(bits, polynomial).is_ok());
        }
    }

    #[test]
    fn test_rejects_non_primitive_polynomial() {
        // x^8 + x^4 + x^3 + x + 1 is irreducible but 2 only has order 51
        assert!(!GaloisField::is_primitive(8, 0x11B));
        assert_matches!(
            GaloisField::new(8, 0x11B),
            Err(Error::NonPrimitivePolynomial {
                bits: 8,
                polynomial: 0x11B
            })
        );
        // x^4 + 1 is reducible
        assert_matches!(
            GaloisField::new(4, 0x11),
            Err(Error::NonPrimitivePolynomial { .. })
        );
    }

    #[test]
    fn test_rejects_unsupported_width() {
        assert_matches!(GaloisField::new(1, 0x3), Err(Error::UnsupportedFieldWidth(1)));
        assert_matches!(GaloisField::new(9, 0x211), Err(Error::UnsupportedFieldWidth(9)));
        assert_matches!(GaloisField::standard(16), Err(Error::UnsupportedFieldWidth(16)));
        assert_eq!(GaloisField::standard_polynomial(0), None);
    }

    #[test]
    fn test_standard_fields_are_shared() {
        let a = GaloisField::standard(8).unwrap();
        let b = GaloisField::gf256();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.size(), 256);
        assert_eq!(a.primitive(), 0x11D);
        assert_eq!(a.to_string(), "GF(2^8)");
    }

    // =========================================================================
    // Field Axiom Tests
    // =========================================================================

    #[test]
    fn test_mult_axioms_every_width() {
        for field in all_fields() {
            let size = field.size();
            for x in 0..size {
                let x = x as u8;
                assert_eq!(field.mult(x, 0), 0);
                assert_eq!(field.mult(0, x), 0);
                assert_eq!(field.mult(x, 1), x);
                for y in 0..size {
                    let y = y as u8;
                    assert_eq!(field.mult(x, y), field.mult(y, x), "{} commutes", field);
                }
            }
        }
    }

    #[test]
    fn test_inverse_every_width() {
        for field in all_fields() {
            for x in 1..field.size() {
                let x = x as u8;
                let inv = field.inv(x).unwrap();
                assert_eq!(field.mult(x, inv), 1, "{} inverse of {}", field, x);
                assert_eq!(field.div(x, x).unwrap(), 1);
            }
            assert_matches!(field.inv(0), Err(Error::DivideByZero(_)));
            assert_matches!(field.div(1, 0), Err(Error::DivideByZero(_)));
        }
    }

    #[test]
    fn test_mult_distributes_over_add() {
        let field = GaloisField::standard(4).unwrap();
        for a in 0..16u8 {
            for b in 0..16u8 {
                for c in 0..16u8 {
                    assert_eq!(
                        field.mult(a, field.add(b, c)),
                        field.add(field.mult(a, b), field.mult(a, c))
                    );
                }
            }
        }
    }

    #[test]
    fn test_gf256_known_products() {
        let field = GaloisField::gf256();
        assert_eq!(field.mult(2, 128), 0x1D);
        assert_eq!(field.mult(3, 7), 9);
        assert_eq!(field.mult(0x53, 0x02), 0xA6);
    }

    #[test]
    fn test_gf256_matches_reed_solomon_erasure_tables() {
        let field = GaloisField::gf256();
        for a in 0..=255u8 {
            for b in (0..=255u8).step_by(7) {
                assert_eq!(field.mult(a, b), reed_solomon_erasure::galois_8::mul(a, b));
            }
        }
    }

    #[test]
    fn test_mult_log_matches_mult() {
        let field = GaloisField::standard(5).unwrap();
        for a in 1..32u8 {
            let log_a = field.log(a).unwrap();
            for b in 0..32u8 {
                assert_eq!(field.mult_log(log_a, b), field.mult(a, b));
            }
        }
        assert_eq!(field.log(0), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of range")]
    fn test_mult_log_rejects_foreign_logarithm() {
        GaloisField::gf256().mult_log(255, 3);
    }

    #[test]
    fn test_operands_masked_to_width() {
        let field = GaloisField::standard(3).unwrap();
        assert_eq!(field.mult(0xF9, 1), 1);
        assert_eq!(field.add(0xF0, 0x01), 0x01);
    }
}
