//! Stream filter decoding.
//!
//! Cross-reference streams and object streams are almost always
//! FlateDecode-compressed, optionally behind a PNG predictor. This module
//! covers exactly that; content-stream filters (DCT, CCITT, ...) belong to
//! the rendering layer and are rejected here.

use super::error::{PdfError, PdfResult};
use super::primitives::{Dict, PdfObject};
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Inflates FlateDecode (zlib) data.
pub fn decode_flate(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PdfError::format(format!("FlateDecode error: {}", e)))?;
    Ok(out)
}

/// Reverses a PNG predictor (values 10-14; the per-row tag byte selects the
/// actual algorithm, so they all decode identically).
pub fn apply_png_predictor(
    data: &[u8],
    colors: usize,
    bits_per_component: usize,
    columns: usize,
) -> PdfResult<Vec<u8>> {
    let bpp = (colors * bits_per_component).div_ceil(8).max(1);
    let row_len = (columns * colors * bits_per_component).div_ceil(8);
    if row_len == 0 {
        return Err(PdfError::format("PNG predictor with zero-width rows"));
    }

    let mut out = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_len];
    let mut pos = 0;

    while pos < data.len() {
        let tag = data[pos];
        pos += 1;
        if pos + row_len > data.len() {
            return Err(PdfError::format("PNG predictor row truncated"));
        }
        let mut row = data[pos..pos + row_len].to_vec();
        pos += row_len;

        match tag {
            0 => {}
            1 => {
                for i in bpp..row_len {
                    row[i] = row[i].wrapping_add(row[i - bpp]);
                }
            }
            2 => {
                for i in 0..row_len {
                    row[i] = row[i].wrapping_add(prev_row[i]);
                }
            }
            3 => {
                for i in 0..row_len {
                    let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                    let up = prev_row[i] as u16;
                    row[i] = row[i].wrapping_add(((left + up) / 2) as u8);
                }
            }
            4 => {
                for i in 0..row_len {
                    let left = if i >= bpp { row[i - bpp] } else { 0 };
                    let up = prev_row[i];
                    let up_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
                    row[i] = row[i].wrapping_add(paeth(left, up, up_left));
                }
            }
            _ => {
                return Err(PdfError::format(format!(
                    "invalid PNG predictor tag: {}",
                    tag
                )));
            }
        }

        out.extend_from_slice(&row);
        prev_row = row;
    }

    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Decodes stream data according to the stream dictionary's `Filter` and
/// `DecodeParms` entries. Filter values must be direct objects here (the
/// cross-reference stream dictionary is not allowed to contain references).
pub fn decode_stream_data(dict: &Dict, data: &[u8]) -> PdfResult<Vec<u8>> {
    let filter = match dict.get_raw("Filter") {
        None => None,
        Some(PdfObject::Name(name)) => Some(name.clone()),
        Some(PdfObject::Array(filters)) => match filters.len() {
            0 => None,
            1 => match &filters[0] {
                PdfObject::Name(name) => Some(name.clone()),
                other => {
                    return Err(PdfError::format(format!(
                        "invalid filter entry: {:?}",
                        other
                    )));
                }
            },
            _ => return Err(PdfError::format("filter chains are not supported")),
        },
        Some(other) => {
            return Err(PdfError::format(format!("invalid Filter value: {:?}", other)));
        }
    };

    let decoded = match filter.as_deref() {
        None => data.to_vec(),
        Some("FlateDecode") | Some("Fl") => decode_flate(data)?,
        Some(other) => {
            return Err(PdfError::format(format!("unsupported filter: {}", other)));
        }
    };

    let parms = match dict.get_raw("DecodeParms") {
        Some(PdfObject::Dictionary(d)) => Some(d.clone()),
        Some(PdfObject::Array(items)) => match items.first() {
            Some(PdfObject::Dictionary(d)) => Some(d.clone()),
            _ => None,
        },
        _ => None,
    };

    let Some(parms) = parms else {
        return Ok(decoded);
    };

    match parms.get_raw("Predictor").and_then(PdfObject::as_i64) {
        Some(predictor) if predictor >= 10 => {
            let colors = parms
                .get_raw("Colors")
                .and_then(PdfObject::as_i64)
                .unwrap_or(1) as usize;
            let bits = parms
                .get_raw("BitsPerComponent")
                .and_then(PdfObject::as_i64)
                .unwrap_or(8) as usize;
            let columns = parms
                .get_raw("Columns")
                .and_then(PdfObject::as_i64)
                .unwrap_or(1) as usize;
            apply_png_predictor(&decoded, colors, bits, columns)
        }
        Some(2) => Err(PdfError::format("TIFF predictor is not supported")),
        _ => Ok(decoded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_flate_round_trip() {
        let original = b"cross-reference stream payload";
        assert_eq!(decode_flate(&deflate(original)).unwrap(), original);
    }

    #[test]
    fn test_png_up_predictor() {
        // Two rows of 3 bytes each, tag 2 (Up): second row adds to the first.
        let data = [2, 1, 2, 3, 2, 1, 1, 1];
        let out = apply_png_predictor(&data, 1, 8, 3).unwrap();
        assert_eq!(out, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_png_sub_predictor() {
        let data = [1, 5, 1, 1];
        let out = apply_png_predictor(&data, 1, 8, 3).unwrap();
        assert_eq!(out, vec![5, 6, 7]);
    }

    #[test]
    fn test_invalid_predictor_tag() {
        let data = [9, 0, 0, 0];
        assert!(apply_png_predictor(&data, 1, 8, 3).is_err());
    }

    #[test]
    fn test_decode_stream_data_with_filter() {
        let mut dict = Dict::new();
        dict.insert("Filter", PdfObject::Name("FlateDecode".to_string()));
        let out = decode_stream_data(&dict, &deflate(b"abc")).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_decode_stream_data_unknown_filter() {
        let mut dict = Dict::new();
        dict.insert("Filter", PdfObject::Name("DCTDecode".to_string()));
        assert!(decode_stream_data(&dict, b"").is_err());
    }
}
