//! Typed result payloads attached to completed jobs.
//!
//! Append-only: rows are written atomically with the Completed transition and
//! never mutated afterwards. A single image may yield several rows (multiple
//! barcode detections on one photo).

use serde::{Deserialize, Serialize};

/// Extracted text for an OCR pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub full_text: String,
    /// Language the engine actually detected (may differ from the requested
    /// `params.language`).
    pub language: Option<String>,
    pub confidence_avg: Option<f64>,
}

/// One decoded barcode detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarcodeResult {
    pub barcode_data: String,
    /// Symbology, e.g. "ean13", "code128".
    pub barcode_type: String,
    pub confidence: Option<f64>,
}

/// One decoded QR payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrcodeResult {
    pub data: String,
    /// Interpreted payload kind, e.g. "url", "text", "wifi".
    pub content_type: Option<String>,
}

/// A single result row, tagged by the decoder that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResultRow {
    Ocr(OcrResult),
    Barcode(BarcodeResult),
    Qrcode(QrcodeResult),
}

impl ResultRow {
    pub fn ocr(full_text: impl Into<String>, language: Option<&str>) -> Self {
        Self::Ocr(OcrResult {
            full_text: full_text.into(),
            language: language.map(str::to_owned),
            confidence_avg: None,
        })
    }

    pub fn barcode(data: impl Into<String>, barcode_type: impl Into<String>) -> Self {
        Self::Barcode(BarcodeResult {
            barcode_data: data.into(),
            barcode_type: barcode_type.into(),
            confidence: None,
        })
    }

    pub fn qrcode(data: impl Into<String>) -> Self {
        Self::Qrcode(QrcodeResult {
            data: data.into(),
            content_type: None,
        })
    }
}
