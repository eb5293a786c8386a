//! # Alignment Arithmetic
//!
//! Integer helpers for power-of-two address alignment.
//!
//! Pool and stack offsets are plain `usize` values, and alignment is done
//! with explicit bit arithmetic so the cost stays visible at the call site.
//! Every public allocator entry point validates its alignment argument once
//! with [`usize::is_power_of_two`]; the helpers here only debug-assert it.

/// Rounds `value` up to the next multiple of `align`.
///
/// # Arguments
///
/// * `value` - Offset or size in bytes
/// * `align` - Alignment in bytes, must be a power of two
#[inline]
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Returns the padding needed to advance `value` to an `align` boundary.
///
/// Zero when `value` is already aligned.
///
/// # Arguments
///
/// * `value` - Offset or address in bytes
/// * `align` - Alignment in bytes, must be a power of two
#[inline]
#[must_use]
pub const fn align_padding(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value.wrapping_neg() & (align - 1)
}

/// Overflow-checked [`align_up`] for caller-controlled sizes.
///
/// # Returns
///
/// The aligned value, or None if rounding up would overflow `usize`.
#[inline]
#[must_use]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Returns true if `value` is a multiple of `align`.
///
/// # Arguments
///
/// * `value` - Offset or address in bytes
/// * `align` - Alignment in bytes, must be a power of two
#[inline]
#[must_use]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    debug_assert!(align.is_power_of_two());
    value & (align - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up_basic() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
        assert_eq!(align_up(100, 64), 128);
    }

    #[test]
    fn test_align_padding() {
        assert_eq!(align_padding(0, 16), 0);
        assert_eq!(align_padding(1, 16), 15);
        assert_eq!(align_padding(16, 16), 0);
        assert_eq!(align_padding(33, 32), 31);
    }

    #[test]
    fn test_padding_plus_value_is_aligned() {
        for value in [0usize, 1, 7, 15, 16, 100, 4095, 4096] {
            for align in [1usize, 2, 8, 16, 64, 4096] {
                let advanced = value + align_padding(value, align);
                assert!(is_aligned(advanced, align));
                assert!(advanced - value < align);
            }
        }
    }

    #[test]
    fn test_checked_align_up_overflow() {
        assert_eq!(checked_align_up(usize::MAX - 3, 16), None);
        assert_eq!(checked_align_up(64, 16), Some(64));
        assert_eq!(checked_align_up(65, 16), Some(80));
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(0, 8));
        assert!(is_aligned(64, 8));
        assert!(!is_aligned(65, 8));
        assert!(is_aligned(65, 1));
    }
}
