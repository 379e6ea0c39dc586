/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Traits for the primitive types being used as audio samples and pulse amplitudes.
//!
//! Chip emulators compute their output levels as 16-bit integers. Pulse buffers may keep
//! their amplitudes as `f32`, `f64`, `i16` or `i32`, so conversions between those types
//! are provided here. Float samples are normalized to the `[-1.0, 1.0]` range.

/// Primitive types accepted as audio samples by host outputs.
pub trait AudioSample: Copy + Send + Default + 'static {}

/// A conversion of a sample from another sample type.
pub trait FromSample<S> {
    fn from_sample(other: S) -> Self;
}

/// The reverse of [FromSample], available for every type pair [FromSample] is.
pub trait IntoSample<S> {
    fn into_sample(self) -> S;
}

/// The ∆ amplitude type of pulse steps.
pub trait SampleDelta: Copy + Default {
    /// Returns `after - self`, or `None` if both are the same.
    fn sample_delta(self, after: Self) -> Option<Self>;
}

/// Arithmetic of amplitudes relative to the full scale: `[-1.0, 1.0]` for floats
/// and `[MIN, MAX]` for integers.
pub trait MulNorm {
    /// Adds `other`. Integers saturate at their bounds, floats keep the headroom
    /// until [MulNorm::clamp_norm].
    fn saturating_add(self, other: Self) -> Self;
    /// Scales `self` by `other`, as if both were fractions of the full scale.
    fn mul_norm(self, other: Self) -> Self;
    /// Clamps `self` to the full scale range.
    fn clamp_norm(self) -> Self;
}

impl<S: FromSample<T>, T> IntoSample<S> for T {
    #[inline]
    fn into_sample(self) -> S {
        S::from_sample(self)
    }
}

impl<T: AudioSample> FromSample<T> for T {
    #[inline(always)]
    fn from_sample(other: T) -> T {
        other
    }
}

macro_rules! float_samples {
    ($($ft:ty),*) => {$(
        impl AudioSample for $ft {}

        impl SampleDelta for $ft {
            #[inline]
            fn sample_delta(self, after: $ft) -> Option<$ft> {
                Some(after - self).filter(|delta| delta.abs() > <$ft>::EPSILON)
            }
        }

        impl MulNorm for $ft {
            #[inline]
            fn saturating_add(self, other: $ft) -> $ft {
                self + other
            }

            #[inline]
            fn mul_norm(self, other: $ft) -> $ft {
                self * other
            }

            #[inline]
            fn clamp_norm(self) -> $ft {
                self.max(-1.0).min(1.0)
            }
        }
    )*};
}

macro_rules! int_samples {
    ($($it:ty => $wide:ty),*) => {$(
        impl AudioSample for $it {}

        impl SampleDelta for $it {
            #[inline]
            fn sample_delta(self, after: $it) -> Option<$it> {
                match after.wrapping_sub(self) {
                    0 => None,
                    delta => Some(delta)
                }
            }
        }

        impl MulNorm for $it {
            #[inline]
            fn saturating_add(self, other: $it) -> $it {
                <$it>::saturating_add(self, other)
            }

            #[inline]
            fn mul_norm(self, other: $it) -> $it {
                ((<$wide>::from(self) * <$wide>::from(other)) >> (<$it>::BITS - 1)) as $it
            }

            #[inline(always)]
            fn clamp_norm(self) -> $it {
                self
            }
        }
    )*};
}

// Negative integers are scaled by -MIN and positive ones by MAX, so both ends map onto +-1.0.
macro_rules! int_float_conversions {
    ($($it:ty => $ft:ty),*) => {$(
        impl FromSample<$it> for $ft {
            #[inline]
            fn from_sample(other: $it) -> $ft {
                let full_scale = if other < 0 { -(<$it>::MIN as $ft) } else { <$it>::MAX as $ft };
                other as $ft / full_scale
            }
        }

        impl FromSample<$ft> for $it {
            #[inline]
            fn from_sample(other: $ft) -> $it {
                let full_scale = if other < 0.0 { -(<$it>::MIN as $ft) } else { <$it>::MAX as $ft };
                (other * full_scale) as $it
            }
        }
    )*};
}

float_samples!(f32, f64);
int_samples!(i16 => i32, i32 => i64);
int_float_conversions!(i16 => f32, i16 => f64, i32 => f64);

impl FromSample<i32> for f32 {
    #[inline]
    fn from_sample(other: i32) -> f32 {
        f64::from_sample(other) as f32
    }
}

impl FromSample<f32> for i32 {
    #[inline]
    fn from_sample(other: f32) -> i32 {
        i32::from_sample(f64::from(other))
    }
}

impl FromSample<i16> for i32 {
    #[inline]
    fn from_sample(other: i16) -> i32 {
        i32::from(other) << 16
    }
}

impl FromSample<i32> for i16 {
    #[inline]
    fn from_sample(other: i32) -> i16 {
        (other >> 16) as i16
    }
}

impl FromSample<f32> for f64 {
    #[inline]
    fn from_sample(other: f32) -> f64 {
        f64::from(other)
    }
}

impl FromSample<f64> for f32 {
    #[inline]
    fn from_sample(other: f64) -> f32 {
        other as f32
    }
}

/// A conversion from chip output levels, where `i16::MAX` stands for the full scale amplitude.
///
/// Levels are integers, so a sum of voices or a difference between two levels may exceed the
/// 16-bit range. Integer implementations saturate.
pub trait FromLevel {
    fn from_level(level: i32) -> Self;
}

impl FromLevel for f32 {
    #[inline]
    fn from_level(level: i32) -> f32 {
        level as f32 / 32768.0
    }
}

impl FromLevel for f64 {
    #[inline]
    fn from_level(level: i32) -> f64 {
        level as f64 / 32768.0
    }
}

impl FromLevel for i16 {
    #[inline]
    fn from_level(level: i32) -> i16 {
        level.clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}

impl FromLevel for i32 {
    #[inline]
    fn from_level(level: i32) -> i32 {
        level.saturating_mul(1 << 16)
    }
}
