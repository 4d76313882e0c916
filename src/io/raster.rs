//! Raw little-endian band files shared by the scene catalog and the exporter.
//!
//! A band file is `rows * cols` samples in row-major order with no header.
//! Files may be gzip-compressed; compression is detected from the magic bytes.

use crate::core::image::Band;
use crate::types::{PixelValue, VerdantError, VerdantResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// On-disk sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Unsigned 16-bit digital numbers (Sentinel-2 L1C / L2A)
    U16,
    /// 32-bit float, NaN for no data
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFormat::U16 => write!(f, "u16"),
            SampleFormat::F32 => write!(f, "f32"),
        }
    }
}

/// Check if content is gzip format by examining magic bytes
pub fn is_gzip_content(content: &[u8]) -> bool {
    content.len() >= 2 && content[0] == 0x1F && content[1] == 0x8B
}

fn gunzip(content: &[u8]) -> VerdantResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(content);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| VerdantError::InvalidFormat(format!("Failed to decompress band file: {}", e)))?;
    log::debug!("Decompressed {} -> {} bytes", content.len(), decompressed.len());
    Ok(decompressed)
}

/// Decode raw samples into a band. Non-finite samples and samples equal to
/// `nodata` are masked.
pub fn decode_band(
    bytes: &[u8],
    name: &str,
    format: SampleFormat,
    shape: (usize, usize),
    nodata: Option<PixelValue>,
) -> VerdantResult<Band> {
    let (rows, cols) = shape;
    let expected = rows * cols * format.bytes_per_sample();
    if bytes.len() != expected {
        return Err(VerdantError::InvalidFormat(format!(
            "Band '{}' has {} bytes, expected {} for {}x{} {} samples",
            name,
            bytes.len(),
            expected,
            rows,
            cols,
            format
        )));
    }

    let samples: Vec<PixelValue> = match format {
        SampleFormat::U16 => bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]) as PixelValue)
            .collect(),
        SampleFormat::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as PixelValue)
            .collect(),
    };

    let values = Array2::from_shape_vec(shape, samples)
        .map_err(|e| VerdantError::InvalidFormat(format!("Band '{}': {}", name, e)))?;
    let valid = values.mapv(|v| v.is_finite() && nodata.map_or(true, |nd| v != nd));
    Band::new(name, values, valid)
}

/// Encode a band; masked pixels become `nodata` (NaN for f32 when unset, 0 for u16)
pub fn encode_band(band: &Band, format: SampleFormat, nodata: Option<PixelValue>) -> Vec<u8> {
    let mut out = Vec::with_capacity(band.values().len() * format.bytes_per_sample());
    for (&value, &ok) in band.values().iter().zip(band.valid().iter()) {
        match format {
            SampleFormat::U16 => {
                let v = if ok { value } else { nodata.unwrap_or(0.0) };
                out.extend_from_slice(&(v.round().clamp(0.0, u16::MAX as f64) as u16).to_le_bytes());
            }
            SampleFormat::F32 => {
                let v = if ok { value as f32 } else { nodata.map_or(f32::NAN, |nd| nd as f32) };
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    out
}

/// Read a band file, transparently handling gzip
pub fn read_band_file<P: AsRef<Path>>(
    path: P,
    name: &str,
    format: SampleFormat,
    shape: (usize, usize),
    nodata: Option<PixelValue>,
) -> VerdantResult<Band> {
    log::debug!("Reading band '{}' from {}", name, path.as_ref().display());
    let raw = std::fs::read(path.as_ref())?;
    let bytes = if is_gzip_content(&raw) { gunzip(&raw)? } else { raw };
    decode_band(&bytes, name, format, shape, nodata)
}

/// Write a band file, returning the number of bytes written to disk
pub fn write_band_file<P: AsRef<Path>>(
    path: P,
    band: &Band,
    format: SampleFormat,
    nodata: Option<PixelValue>,
    compress: bool,
) -> VerdantResult<u64> {
    let payload = encode_band(band, format, nodata);
    let file = File::create(path.as_ref())?;
    if compress {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        encoder.write_all(&payload)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = BufWriter::new(file);
        writer.write_all(&payload)?;
        writer.flush()?;
    }
    let written = std::fs::metadata(path.as_ref())?.len();
    log::debug!(
        "Wrote band '{}' ({} payload bytes, {} on disk) to {}",
        band.name(),
        payload.len(),
        written,
        path.as_ref().display()
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_u16_nodata_is_masked() {
        let bytes: Vec<u8> = [0u16, 1200, 3400, 0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let band = decode_band(&bytes, "B4", SampleFormat::U16, (2, 2), Some(0.0)).unwrap();
        assert_eq!(band.get(0, 0), None);
        assert_eq!(band.get(0, 1), Some(1200.0));
        assert_eq!(band.get(1, 0), Some(3400.0));
        assert_eq!(band.valid_count(), 2);
    }

    #[test]
    fn test_size_mismatch_is_format_error() {
        let bytes = vec![0u8; 6];
        assert!(matches!(
            decode_band(&bytes, "B8", SampleFormat::U16, (2, 2), None),
            Err(VerdantError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_gzip_file_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ndvi.bin.gz");
        let band = Band::from_values("NDVI", array![[0.25, f64::NAN], [-0.5, 0.75]]);

        write_band_file(&path, &band, SampleFormat::F32, None, true).unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert!(is_gzip_content(&raw));

        let back = read_band_file(&path, "NDVI", SampleFormat::F32, (2, 2), None).unwrap();
        assert_eq!(back.get(0, 0), Some(0.25));
        assert_eq!(back.get(0, 1), None);
        assert_eq!(back.get(1, 0), Some(-0.5));
    }
}
