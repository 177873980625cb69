//! Reserved pixel values.
//!
//! The five specials occupy the most negative finite doubles so a single
//! comparison separates them from valid data. NaN is treated as special too.

pub const NULL: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFB);
pub const LOW_REPR_SAT: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFC);
pub const LOW_INSTR_SAT: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFD);
pub const HIGH_INSTR_SAT: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFE);
pub const HIGH_REPR_SAT: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFF);

/// Smallest value that is not special.
pub const VALID_MINIMUM: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFA);
pub const VALID_MAXIMUM: f64 = f64::MAX;

// Real32 on-disk encodings.
pub const NULL4: u32 = 0xFF7F_FFFB;
pub const LOW_REPR_SAT4: u32 = 0xFF7F_FFFC;
pub const LOW_INSTR_SAT4: u32 = 0xFF7F_FFFD;
pub const HIGH_INSTR_SAT4: u32 = 0xFF7F_FFFE;
pub const HIGH_REPR_SAT4: u32 = 0xFF7F_FFFF;

#[inline]
pub fn is_special(value: f64) -> bool {
    value < VALID_MINIMUM || value.is_nan()
}

#[inline]
pub fn is_valid(value: f64) -> bool {
    !is_special(value)
}

#[inline]
pub fn is_null(value: f64) -> bool {
    value.to_bits() == NULL.to_bits()
}

/// Widens a Real32 pixel, mapping the 4-byte specials onto their 8-byte forms.
pub fn from_real32(value: f32) -> f64 {
    match value.to_bits() {
        NULL4 => NULL,
        LOW_REPR_SAT4 => LOW_REPR_SAT,
        LOW_INSTR_SAT4 => LOW_INSTR_SAT,
        HIGH_INSTR_SAT4 => HIGH_INSTR_SAT,
        HIGH_REPR_SAT4 => HIGH_REPR_SAT,
        _ if value.is_nan() => NULL,
        _ => value as f64,
    }
}

/// Narrows to Real32. Specials map to their 4-byte forms; out-of-range
/// values saturate to the representation limits.
pub fn to_real32(value: f64) -> f32 {
    if is_special(value) {
        let bits = match value.to_bits() {
            b if b == LOW_REPR_SAT.to_bits() => LOW_REPR_SAT4,
            b if b == LOW_INSTR_SAT.to_bits() => LOW_INSTR_SAT4,
            b if b == HIGH_INSTR_SAT.to_bits() => HIGH_INSTR_SAT4,
            b if b == HIGH_REPR_SAT.to_bits() => HIGH_REPR_SAT4,
            _ => NULL4,
        };
        return f32::from_bits(bits);
    }
    // Keep the narrowed value above the 4-byte special range.
    let min_valid = f32::from_bits(0xFF7F_FFFA) as f64;
    if value < min_valid {
        f32::from_bits(LOW_REPR_SAT4)
    } else if value > f32::MAX as f64 {
        f32::from_bits(HIGH_REPR_SAT4)
    } else {
        value as f32
    }
}
