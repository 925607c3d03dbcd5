//! Size-class codec.
//!
//! Byte sizes map to class indices laid out like a tiny unsigned float: the
//! upper bits are an exponent, the low [`MANTISSA_BITS`] bits a mantissa with
//! an implicit leading one. Sizes below [`MANTISSA_VALUE`] are denormals and
//! map to themselves. Each octave is split into eight classes, so rounding to
//! a class costs at most 1/8 of the requested size.

/// Mantissa width in bits.
pub const MANTISSA_BITS: u32 = 3;

/// Number of mantissa steps per octave.
pub const MANTISSA_VALUE: u32 = 1 << MANTISSA_BITS;

/// Mask selecting the mantissa of a class index.
pub const MANTISSA_MASK: u32 = MANTISSA_VALUE - 1;

/// Splits a normalized size into `(exponent, mantissa, low_bits_nonzero)`.
///
/// Caller guarantees `size >= MANTISSA_VALUE`.
#[inline]
fn normalize(size: u32) -> (u32, u32, bool) {
    let highest_set_bit = 31 - size.leading_zeros();
    let mantissa_start_bit = highest_set_bit - MANTISSA_BITS;
    let exp = mantissa_start_bit + 1;
    let mantissa = (size >> mantissa_start_bit) & MANTISSA_MASK;
    let low_bits_mask = (1u32 << mantissa_start_bit) - 1;
    (exp, mantissa, size & low_bits_mask != 0)
}

/// Returns the smallest class whose size is `>= size`.
///
/// Used on the allocation path so a class found in the bitmap always fits.
#[inline]
#[must_use]
pub fn class_index_round_up(size: u32) -> u32 {
    if size < MANTISSA_VALUE {
        return size;
    }
    let (exp, mut mantissa, truncated) = normalize(size);
    if truncated {
        mantissa += 1;
    }
    // Addition, not OR: a mantissa of 8 carries into the exponent.
    (exp << MANTISSA_BITS) + mantissa
}

/// Returns the largest class whose size is `<= size`.
///
/// Used when filing a free block of known size into its bin.
#[inline]
#[must_use]
pub fn class_index_round_down(size: u32) -> u32 {
    if size < MANTISSA_VALUE {
        return size;
    }
    let (exp, mantissa, _) = normalize(size);
    (exp << MANTISSA_BITS) | mantissa
}

/// Returns the byte size at the floor of `class_index`.
///
/// Classes whose size exceeds `u32::MAX` (only index 240, the round-up of
/// sizes above `0xF000_0000`) saturate.
#[inline]
#[must_use]
pub fn class_index_to_size(class_index: u32) -> u32 {
    let exponent = class_index >> MANTISSA_BITS;
    let mantissa = class_index & MANTISSA_MASK;
    if exponent == 0 {
        return mantissa;
    }
    let wide = u64::from(mantissa | MANTISSA_VALUE) << (exponent - 1);
    u32::try_from(wide).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denormals_are_exact() {
        for size in 0..MANTISSA_VALUE {
            assert_eq!(class_index_round_up(size), size);
            assert_eq!(class_index_round_down(size), size);
            assert_eq!(class_index_to_size(size), size);
        }
    }

    #[test]
    fn test_known_classes() {
        // 8..16 step by 1, 16..32 step by 2, 32..64 step by 4.
        assert_eq!(class_index_round_up(8), 8);
        assert_eq!(class_index_to_size(8), 8);
        assert_eq!(class_index_round_up(17), class_index_round_up(18));
        assert_eq!(class_index_to_size(class_index_round_up(17)), 18);
        assert_eq!(class_index_to_size(class_index_round_down(17)), 16);
        assert_eq!(class_index_to_size(class_index_round_up(33)), 36);
        assert_eq!(class_index_to_size(class_index_round_down(35)), 32);
    }

    #[test]
    fn test_mantissa_carry_moves_to_next_exponent() {
        // 31 rounds up past the last mantissa step of [16, 32) into 32.
        let class = class_index_round_up(31);
        assert_eq!(class_index_to_size(class), 32);
        assert_eq!(class, class_index_round_down(32));
    }

    #[test]
    fn test_round_up_and_down_agree_on_representable_sizes() {
        for class in 0..240 {
            let size = class_index_to_size(class);
            assert_eq!(class_index_round_up(size), class, "class {class}");
            assert_eq!(class_index_round_down(size), class, "class {class}");
        }
    }

    #[test]
    fn test_bounds_and_precision_sweep() {
        let mut x: u32 = 1;
        while x < (1 << 31) {
            for probe in [x, x + 1, x.saturating_mul(3) / 2, x.saturating_mul(2) - 1] {
                let down = class_index_to_size(class_index_round_down(probe));
                let up = class_index_to_size(class_index_round_up(probe));
                assert!(down <= probe, "down {down} > {probe}");
                assert!(probe <= up, "up {up} < {probe}");
                // (up - x) / x < 1 / 2^M
                assert!(
                    u64::from(up - probe) * u64::from(MANTISSA_VALUE) < u64::from(probe),
                    "precision loss too large at {probe}: {up}"
                );
            }
            x = x.saturating_mul(2);
        }
    }

    #[test]
    fn test_largest_classes() {
        assert_eq!(class_index_round_down(u32::MAX), 239);
        assert_eq!(class_index_to_size(239), 0xF000_0000);
        assert_eq!(class_index_round_up(u32::MAX), 240);
        assert_eq!(class_index_to_size(240), u32::MAX);
    }
}
