//! Bit-level packing of fixed-width fields into a byte buffer.
//!
//! Fields live at arbitrary bit offsets. Offsets count bits in little-endian
//! order: bit `k` of the buffer is bit `k % 8` of byte `k / 8`, so a field
//! written at offset `o` with width `w` occupies bits `o..o + w` of the
//! little-endian integer that starts at byte `o / 8`. The convention is the
//! same on every target, which keeps persisted tables portable.
//!
//! WARNING: the write functions OR into the buffer. They assume the target
//! bits are zero and that no two writes overlap. Violating either silently
//! corrupts neighbouring fields.
//!
//! Reads and writes touch an 8-byte (or 4-byte, for narrow fields) window
//! starting at the field's first byte, so buffers carry 8 bytes of tail
//! padding. Call [`sanity_check`] once before populating any table.

use crate::error::{Result, TrieError};

/// Whether the target handles unaligned 8-byte loads cheaply.
///
/// When false, windows are assembled one byte at a time instead of through a
/// single unaligned load. Both paths produce identical results.
pub const FAST_UNALIGNED: bool = cfg!(any(
    target_arch = "x86",
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "powerpc64",
));

pub(crate) const SIGN_BIT: u32 = 0x8000_0000;

/// Widest integer field supported by the 64-bit window.
pub const MAX_INT_BITS: u8 = 57;

/// Widest integer field supported by the 32-bit window.
pub const MAX_NARROW_BITS: u8 = 25;

/// Number of bits needed to store every integer in `0..=max_value`.
#[inline]
pub fn required_bits(max_value: u64) -> u8 {
    (64 - max_value.leading_zeros()) as u8
}

/// Field width together with its extraction mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitMask {
    pub bits: u8,
    pub mask: u64,
}

impl BitMask {
    pub fn from_max(max_value: u64) -> Self {
        let bits = required_bits(max_value);
        Self {
            bits,
            mask: low_mask(bits),
        }
    }
}

#[inline]
pub fn low_mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

// =============================================================================
// Windows
// =============================================================================

#[inline]
fn load_u64_fast(buf: &[u8], at: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(w)
}

#[inline]
fn load_u64_bytewise(buf: &[u8], at: usize) -> u64 {
    let mut v = 0u64;
    for i in (0..8).rev() {
        v = (v << 8) | u64::from(buf[at + i]);
    }
    v
}

#[inline]
fn or_u64_fast(buf: &mut [u8], at: usize, bits: u64) {
    let v = load_u64_fast(buf, at) | bits;
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn or_u64_bytewise(buf: &mut [u8], at: usize, bits: u64) {
    for i in 0..8 {
        buf[at + i] |= (bits >> (8 * i)) as u8;
    }
}

#[inline]
fn load_u64(buf: &[u8], at: usize) -> u64 {
    if FAST_UNALIGNED {
        load_u64_fast(buf, at)
    } else {
        load_u64_bytewise(buf, at)
    }
}

#[inline]
fn or_u64(buf: &mut [u8], at: usize, bits: u64) {
    if FAST_UNALIGNED {
        or_u64_fast(buf, at, bits)
    } else {
        or_u64_bytewise(buf, at, bits)
    }
}

#[inline]
fn load_u32(buf: &[u8], at: usize) -> u32 {
    if FAST_UNALIGNED {
        let mut w = [0u8; 4];
        w.copy_from_slice(&buf[at..at + 4]);
        u32::from_le_bytes(w)
    } else {
        u32::from(buf[at])
            | (u32::from(buf[at + 1]) << 8)
            | (u32::from(buf[at + 2]) << 16)
            | (u32::from(buf[at + 3]) << 24)
    }
}

#[inline]
fn or_u32(buf: &mut [u8], at: usize, bits: u32) {
    let v = load_u32(buf, at) | bits;
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn byte_of(bit_off: u64) -> usize {
    (bit_off >> 3) as usize
}

#[inline]
fn shift_of(bit_off: u64) -> u32 {
    (bit_off & 7) as u32
}

// =============================================================================
// Integers
// =============================================================================

/// Read an integer of up to 57 bits. `mask` must equal `(1 << length) - 1`.
#[inline]
pub fn read_int57(buf: &[u8], bit_off: u64, length: u8, mask: u64) -> u64 {
    debug_assert!(length <= MAX_INT_BITS);
    (load_u64(buf, byte_of(bit_off)) >> shift_of(bit_off)) & mask
}

/// OR an integer of up to 57 bits into zeroed memory.
#[inline]
pub fn write_int57(buf: &mut [u8], bit_off: u64, length: u8, value: u64) {
    debug_assert!(length <= MAX_INT_BITS);
    debug_assert!(value <= low_mask(length), "value {value} exceeds {length} bits");
    or_u64(buf, byte_of(bit_off), value << shift_of(bit_off));
}

/// Read an integer of up to 25 bits through a 32-bit window.
#[inline]
pub fn read_int25(buf: &[u8], bit_off: u64, length: u8, mask: u32) -> u32 {
    debug_assert!(length <= MAX_NARROW_BITS);
    (load_u32(buf, byte_of(bit_off)) >> shift_of(bit_off)) & mask
}

/// OR an integer of up to 25 bits into zeroed memory through a 32-bit window.
#[inline]
pub fn write_int25(buf: &mut [u8], bit_off: u64, length: u8, value: u32) {
    debug_assert!(length <= MAX_NARROW_BITS);
    debug_assert!(u64::from(value) <= low_mask(length));
    or_u32(buf, byte_of(bit_off), value << shift_of(bit_off));
}

/// Read a field of `width` bits, picking the narrow window when it suffices.
#[inline]
pub fn read_bits(buf: &[u8], bit_off: u64, width: u8, mask: u64) -> u64 {
    if width <= MAX_NARROW_BITS {
        u64::from(read_int25(buf, bit_off, width, mask as u32))
    } else {
        read_int57(buf, bit_off, width, mask)
    }
}

/// Write a field of `width` bits, picking the narrow window when it suffices.
#[inline]
pub fn write_bits(buf: &mut [u8], bit_off: u64, width: u8, value: u64) {
    if width <= MAX_NARROW_BITS {
        write_int25(buf, bit_off, width, value as u32)
    } else {
        write_int57(buf, bit_off, width, value)
    }
}

// =============================================================================
// Floats
// =============================================================================

/// Read a 31-bit float whose sign bit was dropped on write.
#[inline]
pub fn read_nonpositive_float31(buf: &[u8], bit_off: u64) -> f32 {
    let raw = read_int57(buf, bit_off, 31, u64::from(!SIGN_BIT)) as u32;
    f32::from_bits(raw | SIGN_BIT)
}

/// Store a float known to be `<= 0` in 31 bits by dropping its sign bit.
#[inline]
pub fn write_nonpositive_float31(buf: &mut [u8], bit_off: u64, value: f32) {
    debug_assert!(!(value > 0.0), "positive value {value} in sign-less slot");
    write_int57(buf, bit_off, 31, u64::from(value.to_bits() & !SIGN_BIT));
}

#[inline]
pub fn read_float32(buf: &[u8], bit_off: u64) -> f32 {
    f32::from_bits(read_int57(buf, bit_off, 32, u64::from(u32::MAX)) as u32)
}

#[inline]
pub fn write_float32(buf: &mut [u8], bit_off: u64, value: f32) {
    write_int57(buf, bit_off, 32, u64::from(value.to_bits()));
}

// =============================================================================
// Self-test
// =============================================================================

/// Verify that packed integers and floats survive a write/read cycle at every
/// in-byte shift across a full 57 x 8 bit super-word.
pub fn sanity_check() -> Result<()> {
    if ((-1.0f32).to_bits() ^ 1.0f32.to_bits()) != SIGN_BIT {
        return Err(TrieError::BitPacking(
            "sign bit is not the top bit of f32".to_owned(),
        ));
    }

    const TEST57: u64 = 0x0123_4567_89ab_cdef;
    let mut mem = [0u8; 57 + 8];
    for b in (0..57 * 8).step_by(57) {
        write_int57(&mut mem, b, 57, TEST57);
    }
    for b in (0..57 * 8).step_by(57) {
        let got = read_int57(&mem, b, 57, low_mask(57));
        if got != TEST57 {
            return Err(TrieError::BitPacking(format!(
                "57-bit read at offset {b} returned {got:#x}, expected {TEST57:#x}"
            )));
        }
    }

    let mut mem = [0u8; 31 + 8];
    let sample = -1.234_567_8f32;
    for b in (0..31 * 8).step_by(31) {
        write_nonpositive_float31(&mut mem, b, sample);
    }
    for b in (0..31 * 8).step_by(31) {
        let got = read_nonpositive_float31(&mem, b);
        if got.to_bits() != sample.to_bits() {
            return Err(TrieError::BitPacking(format!(
                "31-bit float at offset {b} returned {got}, expected {sample}"
            )));
        }
    }
    Ok(())
}
