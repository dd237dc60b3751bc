//! Quantized per-frame input.
//!
//! Analog sticks are quantized to a symmetric `-127..=127` range before they
//! touch the simulation so that every machine feeds bit-identical values.

use bitcode::{Decode, Encode};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Quantized input sample for one player on one frame.
///
/// POD layout so it can be hashed or copied into simulation state directly.
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Pod,
    Zeroable,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
pub struct QuantizedInput {
    /// Button bitmask
    pub buttons: u32,
    /// Stick X in `-127..=127`
    pub x: i8,
    /// Stick Y in `-127..=127`
    pub y: i8,
    #[serde(skip)]
    _pad: [u8; 2],
}

impl QuantizedInput {
    /// Neutral stick, no buttons held.
    pub const NEUTRAL: Self = Self {
        buttons: 0,
        x: 0,
        y: 0,
        _pad: [0; 2],
    };

    pub const fn new(x: i8, y: i8, buttons: u32) -> Self {
        Self {
            buttons,
            x,
            y,
            _pad: [0; 2],
        }
    }

    /// Quantize a floating-point stick sample.
    pub fn from_stick(x: f32, y: f32, buttons: u32) -> Self {
        Self::new(quantize_axis(x), quantize_axis(y), buttons)
    }

    /// Clamp axes into the symmetric range and zero the padding.
    ///
    /// `-128` is representable in an `i8` but never produced locally, so
    /// remote samples carrying it are pulled back to `-127`.
    pub fn normalized(self) -> Self {
        Self::new(self.x.max(-127), self.y.max(-127), self.buttons)
    }

    /// Whether the given button bit is held.
    pub fn pressed(&self, bit: u32) -> bool {
        bit < 32 && self.buttons & (1 << bit) != 0
    }
}

/// Quantize one stick axis from `-1.0..=1.0` to `-127..=127`.
///
/// Non-finite input maps to zero.
pub fn quantize_axis(value: f32) -> i8 {
    if !value.is_finite() {
        return 0;
    }
    (value.clamp(-1.0, 1.0) * 127.0).round() as i8
}

/// Inverse of [`quantize_axis`].
pub fn dequantize_axis(value: i8) -> f32 {
    f32::from(value.max(-127)) / 127.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_clamps_and_rounds() {
        assert_eq!(quantize_axis(0.0), 0);
        assert_eq!(quantize_axis(1.0), 127);
        assert_eq!(quantize_axis(-1.0), -127);
        assert_eq!(quantize_axis(4.2), 127);
        assert_eq!(quantize_axis(-9.0), -127);
        assert_eq!(quantize_axis(0.5), 64);
        assert_eq!(quantize_axis(f32::NAN), 0);
    }

    #[test]
    fn dequantize_is_symmetric() {
        assert_eq!(dequantize_axis(127), 1.0);
        assert_eq!(dequantize_axis(-127), -1.0);
        assert_eq!(dequantize_axis(-128), -1.0);
    }

    #[test]
    fn normalized_pulls_in_minus_128() {
        let input = QuantizedInput::new(-128, 5, 3).normalized();
        assert_eq!(input, QuantizedInput::new(-127, 5, 3));
    }

    #[test]
    fn pod_layout_is_eight_bytes() {
        let input = QuantizedInput::new(1, -1, 0xAABB);
        assert_eq!(bytemuck::bytes_of(&input).len(), 8);
    }

    #[test]
    fn pressed_checks_bits() {
        let input = QuantizedInput::new(0, 0, 0b101);
        assert!(input.pressed(0));
        assert!(!input.pressed(1));
        assert!(input.pressed(2));
        assert!(!input.pressed(40));
    }
}
