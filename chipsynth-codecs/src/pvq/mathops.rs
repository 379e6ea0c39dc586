/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Fixed-point arithmetic primitives.
//!
//! All operations reproduce the exact truncation and rounding of the reference decoders:
//! 16-bit additions wrap, `q15` multiplies shift right arithmetically, `p15` multiplies round.

/// 1.0 in Q15 (saturated).
pub const Q15_ONE: i16 = 32767;

#[inline(always)]
pub fn add16(a: i16, b: i16) -> i16 {
    a.wrapping_add(b)
}

#[inline(always)]
pub fn sub16(a: i16, b: i16) -> i16 {
    a.wrapping_sub(b)
}

#[inline(always)]
pub fn mult16_16(a: i16, b: i16) -> i32 {
    i32::from(a) * i32::from(b)
}

#[inline(always)]
pub fn mult16_16_q15(a: i16, b: i16) -> i16 {
    (mult16_16(a, b) >> 15) as i16
}

#[inline(always)]
pub fn mult16_16_p15(a: i16, b: i16) -> i16 {
    (16384i32.wrapping_add(mult16_16(a, b)) >> 15) as i16
}

#[inline(always)]
pub fn mult16_32_q16(a: i16, b: i32) -> i32 {
    mult16_16(a, (b >> 16) as i16)
        .wrapping_add((i32::from(a) * (b & 0xFFFF)) >> 16)
}

#[inline(always)]
pub fn mult32_32_q31(a: i32, b: i32) -> i32 {
    let (ah, bh) = ((a >> 16) as i16, (b >> 16) as i16);
    (mult16_16(ah, bh) << 1)
        .wrapping_add((i32::from(ah) * (b & 0xFFFF)) >> 15)
        .wrapping_add((i32::from(bh) * (a & 0xFFFF)) >> 15)
}
/// Shifts right with rounding.
#[inline(always)]
pub fn pshr32(a: i32, shift: i32) -> i32 {
    a.wrapping_add((1 << shift) >> 1) >> shift
}
/// Shifts right for positive and left for negative `shift`.
#[inline(always)]
pub fn vshr32(a: i32, shift: i32) -> i32 {
    if shift > 0 {
        a >> shift
    }
    else {
        a.wrapping_shl((-shift) as u32)
    }
}

/// Returns `floor(log2(x))`. `x` must be positive.
#[inline]
pub fn ilog2(x: i32) -> i32 {
    debug_assert!(x > 0, "ilog2 only defined for positive values");
    31 - x.leading_zeros() as i32
}

/// Returns the reciprocal of a positive `x` scaled by 2^31.
pub fn rcp(x: i32) -> i32 {
    debug_assert!(x > 0, "rcp only defined for positive values");
    let i = ilog2(x);
    // n is Q15 in [0, 1)
    let n = (vshr32(x, i - 15) - 32768) as i16;
    // linear guess of 2/(n+1) in Q14, then two Newton steps
    let mut r = add16(30840, mult16_16_q15(-15420, n));
    r = sub16(r, mult16_16_q15(r,
            add16(mult16_16_q15(r, n), add16(r, -32768))));
    r = sub16(r, add16(1, mult16_16_q15(r,
            add16(mult16_16_q15(r, n), add16(r, -32768)))));
    vshr32(i32::from(r), i - 16)
}

/// Returns `a / b` in the Q format of `a`.
#[inline]
pub fn div(a: i32, b: i32) -> i32 {
    mult32_32_q31(a, rcp(b))
}

/// Returns the Q14 reciprocal square root of a Q16 `x` in `[0.25, 1)`.
pub fn rsqrt_norm(x: i32) -> i16 {
    // n in [-0.5, 1) Q15
    let n = (x - 32768) as i16;
    // quadratic guess in Q14
    let r = add16(23557, mult16_16_q15(n, add16(-13490, mult16_16_q15(n, 6713))));
    let r2 = mult16_16_q15(r, r);
    let y = (i32::from(sub16(add16(mult16_16_q15(r2, n), r2), 16384)) << 1) as i16;
    // 2nd order Householder step
    add16(r, mult16_16_q15(r, mult16_16_q15(y,
            sub16(mult16_16_q15(y, 12288), 16384))))
}

const L1: i32 = 32767;
const L2: i32 = -7651;
const L3: i32 = 8277;
const L4: i16 = -626;

fn cos_pi_2(x: i16) -> i16 {
    let x2 = mult16_16_p15(x, x);
    let t3 = (L3 + i32::from(mult16_16_p15(L4, x2))) as i16;
    let t2 = (L2 + i32::from(mult16_16_p15(x2, t3))) as i16;
    let t1 = i32::from(sub16(L1 as i16, x2)) + i32::from(mult16_16_p15(x2, t2));
    add16(1, t1.min(32766) as i16)
}

/// Returns `cos(x * PI / 2)` in Q15 for `x` in Q16 (period 4.0).
pub fn cos_norm(x: i32) -> i16 {
    let mut x = x & 0x0001_FFFF;
    if x > 1 << 16 {
        x = (1 << 17) - x;
    }
    if x & 0x0000_7FFF != 0 {
        if x < 1 << 15 {
            cos_pi_2(x as i16)
        }
        else {
            cos_pi_2((65536 - x) as i16).wrapping_neg()
        }
    }
    else if x & 0x0000_FFFF != 0 {
        0
    }
    else if x & 0x0001_FFFF != 0 {
        -32767
    }
    else {
        32767
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand::rngs::SmallRng;
    use super::*;

    #[test]
    fn mathops_primitives_work() {
        assert_eq!(add16(32767, 1), -32768);
        assert_eq!(sub16(-32768, 1), 32767);
        assert_eq!(mult16_16_q15(16384, 16384), 8192);
        assert_eq!(mult16_16_q15(-1, 1), -1);
        assert_eq!(mult16_16_p15(-1, 1), 0);
        assert_eq!(mult16_32_q16(3, 1 << 17), 6);
        assert_eq!(mult32_32_q31(1 << 30, 1 << 30), 1 << 29);
        assert_eq!(pshr32(5, 1), 3);
        assert_eq!(pshr32(-5, 1), -2);
        assert_eq!(vshr32(256, 4), 16);
        assert_eq!(vshr32(16, -4), 256);
        assert_eq!(ilog2(1), 0);
        assert_eq!(ilog2(2), 1);
        assert_eq!(ilog2(3), 1);
        assert_eq!(ilog2(i32::MAX), 30);
    }

    #[test]
    fn mathops_rcp_works() {
        let mut rng = SmallRng::seed_from_u64(31);
        for x in (1..64).chain((0..2000).map(|_| rng.gen_range(64..1 << 24))) {
            let expected = (1u64 << 31) as f64 / x as f64;
            let r = rcp(x) as f64;
            assert!((r - expected).abs() <= expected * 1.0e-4 + 2.0,
                "rcp({}) = {} expected {}", x, r, expected);
        }
        assert!((div(1 << 20, 1 << 10) - (1 << 10)).abs() <= 1);
    }

    #[test]
    fn mathops_rsqrt_norm_works() {
        for x in (16384..65536).step_by(97) {
            let expected = 16384.0 / (x as f64 / 65536.0).sqrt();
            let r = f64::from(rsqrt_norm(x));
            assert!((r - expected).abs() <= 3.0, "rsqrt_norm({}) = {} expected {}", x, r, expected);
        }
    }

    #[test]
    fn mathops_exact_values() {
        for &(x, r) in &[(1, 2147418112), (2, 1073709056), (3, 715816960), (7, 306774016),
                         (100, 21474304), (12345, 173952), (16384, 131068), (32768, 65534),
                         (65535, 32768), (1000000, 2147), (16777215, 128)] {
            assert_eq!(rcp(x), r, "rcp({})", x);
        }
        for &(x, r) in &[(16384, 32766), (20000, 29658), (25000, 26528), (32768, 23170),
                         (40000, 20971), (50000, 18757), (60000, 17124), (65535, 16385)] {
            assert_eq!(rsqrt_norm(x), r, "rsqrt_norm({})", x);
        }
        for &(x, c) in &[(1, 32767), (1000, 32730), (12345, 27196), (32767, 2),
                         (40000, -11134), (65535, -32767), (70000, -32021), (100000, 2661)] {
            assert_eq!(cos_norm(x), c, "cos_norm({})", x);
        }
    }

    #[test]
    fn mathops_cos_norm_works() {
        assert_eq!(cos_norm(0), 32767);
        assert_eq!(cos_norm(1 << 15), 0);
        assert_eq!(cos_norm(1 << 16), -32767);
        assert_eq!(cos_norm(3 << 15), 0);
        assert_eq!(cos_norm(1 << 17), 32767);
        for x in (1..1 << 17).step_by(251) {
            let expected = 32767.0 * (core::f64::consts::PI * x as f64 / 65536.0).cos();
            let c = f64::from(cos_norm(x));
            assert!((c - expected).abs() <= 8.0, "cos_norm({}) = {} expected {}", x, c, expected);
        }
        assert_eq!(cos_norm(12345), cos_norm(-12345));
    }
}
