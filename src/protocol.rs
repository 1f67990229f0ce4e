//! Wire protocol for the camera head.
//!
//! Commands are short ASCII words with space-separated decimal arguments;
//! responses are fixed-size binary acknowledgments followed, for readout,
//! by the raw pixel payload. This module owns the command vocabulary and
//! the fixed-format response decoding; it never touches the transport.

use crate::errors::CameraError;

/// ADC full-scale reference for the temperature conversion. The sensor
/// reports a 12-bit code; full scale corresponds to 500 K.
const ADC_REFERENCE: f64 = 500.0;

/// Every trigger command is confirmed with exactly this many bytes before
/// the readout command may be issued.
pub const SHOT_ACK_LEN: usize = 2;

/// The cooling command is confirmed with a single byte; its value is not
/// validated.
pub const COOLING_ACK_LEN: usize = 1;

/// The temperature query answers with exactly 4 bytes; bytes 0-1 carry the
/// little-endian ADC code.
pub const TEMPERATURE_RESPONSE_LEN: usize = 4;

/// The help text is free-form and ends with this marker.
pub const HELP_TERMINATOR: &str = "\r\n\r\n\r\n";

/// Sensor binning factor. Each step combines that many pixels per axis,
/// dividing the effective resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Binning {
    #[default]
    X1 = 1,
    X2 = 2,
    X4 = 4,
    X8 = 8,
    X16 = 16,
    X32 = 32,
    X64 = 64,
}

impl Binning {
    /// Parse a binning factor, rejecting values the sensor does not support.
    pub fn from_u32_checked(value: u32) -> Result<Self, CameraError> {
        match value {
            1 => Ok(Binning::X1),
            2 => Ok(Binning::X2),
            4 => Ok(Binning::X4),
            8 => Ok(Binning::X8),
            16 => Ok(Binning::X16),
            32 => Ok(Binning::X32),
            64 => Ok(Binning::X64),
            _ => Err(CameraError::UnknownMode(format!(
                "binning {value} (supported: 1, 2, 4, 8, 16, 32, 64)"
            ))),
        }
    }

    pub fn factor(self) -> u32 {
        self as u32
    }
}

/// Pixel bit depth advertised by the camera. Depths up to 8 bit fit one
/// byte per pixel, 10/12 bit take two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitDepth {
    Six = 6,
    #[default]
    Eight = 8,
    Ten = 10,
    Twelve = 12,
}

impl BitDepth {
    pub fn from_u32_checked(value: u32) -> Result<Self, CameraError> {
        match value {
            6 => Ok(BitDepth::Six),
            8 => Ok(BitDepth::Eight),
            10 => Ok(BitDepth::Ten),
            12 => Ok(BitDepth::Twelve),
            _ => Err(CameraError::UnknownMode(format!(
                "bit depth {value} (supported: 6, 8, 10, 12)"
            ))),
        }
    }

    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn bytes_per_pixel(self) -> usize {
        if self.bits() <= 8 {
            1
        } else {
            2
        }
    }
}

/// A command understood by the camera head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Trigger an exposure. Zero milliseconds requests a dark frame for
    /// background subtraction.
    Shot { exposure_ms: u64 },
    /// Transfer the last captured frame at the given binning/bit depth.
    ReadImage { binning: Binning, bit_depth: BitDepth },
    /// Enable or disable sensor cooling.
    Cooling { enabled: bool },
    /// Query the sensor temperature ADC.
    Temperature,
    /// Ask the firmware for its help text.
    Help,
}

impl Command {
    pub fn encode(&self) -> String {
        match self {
            Command::Shot { exposure_ms } => format!("sht {exposure_ms}"),
            Command::ReadImage { binning, bit_depth } => {
                format!("rid {} {}", binning.factor(), bit_depth.bits())
            }
            Command::Cooling { enabled } => format!("cld {}", u8::from(*enabled)),
            Command::Temperature => "chp".to_string(),
            Command::Help => "hlp".to_string(),
        }
    }

    /// Line terminator the firmware expects after this command.
    pub fn terminator(&self) -> &'static str {
        match self {
            Command::Shot { .. } | Command::ReadImage { .. } | Command::Help => "",
            Command::Cooling { .. } | Command::Temperature => "\n",
        }
    }
}

/// Decode a temperature response into degrees Celsius.
///
/// Bytes 0-1 hold the little-endian 12-bit ADC code; the remaining bytes
/// are padding. `K = adc * ADC_REFERENCE / 4096`, then shifted to Celsius.
pub fn decode_temperature(response: &[u8; TEMPERATURE_RESPONSE_LEN]) -> f64 {
    let adc = u16::from_le_bytes([response[0], response[1]]) as f64;
    let temp_k = adc * ADC_REFERENCE / 4096.0;
    temp_k - 273.15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shot_command_encoding() {
        let cmd = Command::Shot { exposure_ms: 250 };
        assert_eq!(cmd.encode(), "sht 250");
        assert_eq!(cmd.terminator(), "");

        // Zero exposure is the dark-frame request.
        assert_eq!(Command::Shot { exposure_ms: 0 }.encode(), "sht 0");
    }

    #[test]
    fn read_image_command_encoding() {
        let cmd = Command::ReadImage {
            binning: Binning::X4,
            bit_depth: BitDepth::Twelve,
        };
        assert_eq!(cmd.encode(), "rid 4 12");
        assert_eq!(cmd.terminator(), "");
    }

    #[test]
    fn cooling_and_temperature_encoding() {
        assert_eq!(Command::Cooling { enabled: true }.encode(), "cld 1");
        assert_eq!(Command::Cooling { enabled: false }.encode(), "cld 0");
        assert_eq!(Command::Cooling { enabled: true }.terminator(), "\n");
        assert_eq!(Command::Temperature.encode(), "chp");
        assert_eq!(Command::Temperature.terminator(), "\n");
        assert_eq!(Command::Help.encode(), "hlp");
        assert_eq!(Command::Help.terminator(), "");
    }

    #[test]
    fn binning_rejects_unsupported_factors() {
        for ok in [1u32, 2, 4, 8, 16, 32, 64] {
            assert_eq!(Binning::from_u32_checked(ok).unwrap().factor(), ok);
        }
        for bad in [0u32, 3, 5, 128] {
            assert!(matches!(
                Binning::from_u32_checked(bad),
                Err(CameraError::UnknownMode(_))
            ));
        }
    }

    #[test]
    fn bit_depth_bytes_per_pixel() {
        assert_eq!(BitDepth::Six.bytes_per_pixel(), 1);
        assert_eq!(BitDepth::Eight.bytes_per_pixel(), 1);
        assert_eq!(BitDepth::Ten.bytes_per_pixel(), 2);
        assert_eq!(BitDepth::Twelve.bytes_per_pixel(), 2);
        assert!(matches!(
            BitDepth::from_u32_checked(14),
            Err(CameraError::UnknownMode(_))
        ));
    }

    #[test]
    fn temperature_decode_matches_formula() {
        // adc = 0x0962 = 2402 -> K = 2402 * 500 / 4096 = 293.21... -> ~20.06 C
        let response = [0x62, 0x09, 0x00, 0x00];
        let celsius = decode_temperature(&response);
        let expected = 2402.0 * 500.0 / 4096.0 - 273.15;
        assert!((celsius - expected).abs() < 1e-9);

        // All-zero ADC code sits at absolute zero.
        assert!((decode_temperature(&[0, 0, 0, 0]) + 273.15).abs() < 1e-9);
    }
}
