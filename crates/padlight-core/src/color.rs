//! Pad colors in the controller's 6-bit RGB space

use serde::{Deserialize, Serialize};

/// Highest value a single color channel can take.
pub const MAX_CHANNEL: u8 = 63;

/// RGB color with 0..=63 per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const OFF: Color = Color { red: 0, green: 0, blue: 0 };
    pub const WHITE: Color = Color { red: MAX_CHANNEL, green: MAX_CHANNEL, blue: MAX_CHANNEL };

    /// Build a color, clamping every channel into range.
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red: red.min(MAX_CHANNEL),
            green: green.min(MAX_CHANNEL),
            blue: blue.min(MAX_CHANNEL),
        }
    }

    pub fn lit(&self) -> bool {
        self.red > 0 || self.green > 0 || self.blue > 0
    }

    /// Largest absolute per-channel difference between two colors.
    pub fn max_channel_delta(&self, other: &Color) -> u8 {
        self.red
            .abs_diff(other.red)
            .max(self.green.abs_diff(other.green))
            .max(self.blue.abs_diff(other.blue))
    }

    /// Channel-wise interpolation, `amount` in 0.0..=1.0.
    pub fn mix(&self, other: &Color, amount: f64) -> Color {
        let amount = amount.clamp(0.0, 1.0);
        let channel = |a: u8, b: u8| -> u8 {
            (a as f64 + (b as f64 - a as f64) * amount).round() as u8
        };
        Color::new(
            channel(self.red, other.red),
            channel(self.green, other.green),
            channel(self.blue, other.blue),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_channels() {
        let c = Color::new(200, 10, 64);
        assert_eq!(c, Color { red: 63, green: 10, blue: 63 });
    }

    #[test]
    fn test_lit() {
        assert!(!Color::OFF.lit());
        assert!(Color::new(0, 0, 1).lit());
    }

    #[test]
    fn test_mix_endpoints() {
        let a = Color::new(63, 0, 0);
        let b = Color::new(0, 0, 63);
        assert_eq!(a.mix(&b, 0.0), a);
        assert_eq!(a.mix(&b, 1.0), b);
        assert_eq!(a.mix(&b, 0.5), Color::new(32, 0, 32));
        assert_eq!(a.max_channel_delta(&b), 63);
    }
}
