//! Embedded scan configuration
//!
//! The pixel stream carries a JSON document describing the exposure. Only
//! `AdditionalScanInfo.PixLine` feeds back into parsing (nominal scanline
//! width); the remaining fields are extracted for logging.

use serde::Deserialize;
use tracing::{debug, warn};

/// Scan configuration document embedded in the pixel stream
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Device model string
    #[serde(rename = "ManufacturerModelName")]
    pub model_name: String,

    /// Significant bits per pixel sample
    #[serde(rename = "BitsStored")]
    pub bits_stored: i32,

    /// Scan geometry details
    #[serde(rename = "AdditionalScanInfo")]
    pub scan_info: ScanInfo,
}

/// Scan geometry subsection of [`ScanConfig`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanInfo {
    /// Nominal full width of a scanline in pixels
    #[serde(rename = "PixLine")]
    pub pix_line: i32,

    /// Number of cassette slots
    #[serde(rename = "SlotCount")]
    pub slot_count: i32,
}

impl Default for ScanInfo {
    fn default() -> Self {
        ScanInfo {
            pix_line: -1,
            slot_count: -1,
        }
    }
}

/// Parse an embedded config document and return its `PixLine`
///
/// The device emits Latin-1 text, which is not necessarily valid UTF-8, so
/// the bytes are widened char-by-char before JSON parsing. Parse failures
/// are logged and yield -1 (width unknown); the caller falls back to
/// bounding-box rasterization.
pub fn parse_scan_config(data: &[u8]) -> i32 {
    let text: String = data.iter().map(|&b| b as char).collect();

    let config: ScanConfig = match serde_json::from_str(&text) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "scan config JSON parse failed");
            return -1;
        }
    };

    debug!(json = %text, "scan config document");
    debug!(
        model = %config.model_name,
        bits_stored = config.bits_stored,
        pix_line = config.scan_info.pix_line,
        slot_count = config.scan_info.slot_count,
        "scan config parsed"
    );

    config.scan_info.pix_line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pix_line_extracted() {
        let json = br#"{"AdditionalScanInfo":{"PixLine":1234}}"#;
        assert_eq!(parse_scan_config(json), 1234);
    }

    #[test]
    fn test_full_document() {
        let json = br#"{
            "ManufacturerModelName": "CR 35",
            "BitsStored": 16,
            "AdditionalScanInfo": {"PixLine": 2370, "SlotCount": 4}
        }"#;
        assert_eq!(parse_scan_config(json), 2370);
    }

    #[test]
    fn test_missing_pix_line_defaults() {
        let json = br#"{"AdditionalScanInfo":{"SlotCount":2}}"#;
        assert_eq!(parse_scan_config(json), -1);

        let json = br#"{"BitsStored":16}"#;
        assert_eq!(parse_scan_config(json), -1);
    }

    #[test]
    fn test_parse_failure_defaults() {
        assert_eq!(parse_scan_config(b"not json at all"), -1);
        assert_eq!(parse_scan_config(b""), -1);
    }

    #[test]
    fn test_latin1_bytes_tolerated() {
        // 0xE4 is "ä" in Latin-1 and invalid as a standalone UTF-8 byte.
        let json = b"{\"ManufacturerModelName\":\"Ger\xE4t\",\"AdditionalScanInfo\":{\"PixLine\":5}}";
        assert_eq!(parse_scan_config(json), 5);
    }
}
