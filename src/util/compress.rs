//! Payload compression for outbound broadcasts
//!
//! Realtime payloads use zstd at its fastest level; bulk payloads use zlib at
//! the best level. Payloads under the threshold go out unchanged.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Payloads shorter than this are sent as-is
pub const DEFAULT_THRESHOLD: usize = 256;

const ZSTD_FAST_LEVEL: i32 = 1;

/// How a payload should be compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadClass {
    /// Per-tick traffic: favor speed
    Realtime,
    /// Large one-off payloads: favor ratio
    Bulk,
}

/// Scheme applied to an outbound payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Raw,
    Zstd,
    Zlib,
}

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("payload is neither zstd nor zlib")]
    Undecodable,
}

#[derive(Debug, Clone)]
pub struct Compressor {
    threshold: usize,
}

impl Compressor {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Compress `payload`, returning it unchanged when under the threshold
    pub fn compress(
        &self,
        payload: Bytes,
        class: PayloadClass,
    ) -> Result<(Bytes, Scheme), CompressError> {
        if payload.len() < self.threshold {
            return Ok((payload, Scheme::Raw));
        }

        match class {
            PayloadClass::Realtime => {
                let out = zstd::bulk::compress(&payload, ZSTD_FAST_LEVEL)
                    .map_err(CompressError::Compress)?;
                Ok((Bytes::from(out), Scheme::Zstd))
            }
            PayloadClass::Bulk => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
                encoder
                    .write_all(&payload)
                    .map_err(CompressError::Compress)?;
                let out = encoder.finish().map_err(CompressError::Compress)?;
                Ok((Bytes::from(out), Scheme::Zlib))
            }
        }
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

/// Decompress a payload, trying the class's preferred scheme first
pub fn decompress(data: &[u8], realtime: bool) -> Result<Vec<u8>, CompressError> {
    let decoded = if realtime {
        unzstd(data).or_else(|| unzlib(data))
    } else {
        unzlib(data).or_else(|| unzstd(data))
    };
    decoded.ok_or(CompressError::Undecodable)
}

fn unzstd(data: &[u8]) -> Option<Vec<u8>> {
    zstd::stream::decode_all(data).ok()
}

fn unzlib(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 7) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn test_small_payload_is_raw() {
        let compressor = Compressor::default();
        let data = payload(DEFAULT_THRESHOLD - 1);
        let (out, scheme) = compressor
            .compress(data.clone(), PayloadClass::Realtime)
            .unwrap();
        assert_eq!(scheme, Scheme::Raw);
        assert_eq!(out, data);
    }

    #[test]
    fn test_realtime_uses_zstd() {
        let compressor = Compressor::default();
        let data = payload(4_096);
        let (out, scheme) = compressor
            .compress(data.clone(), PayloadClass::Realtime)
            .unwrap();
        assert_eq!(scheme, Scheme::Zstd);
        assert!(out.len() < data.len());
        assert_eq!(decompress(&out, true).unwrap(), data.to_vec());
    }

    #[test]
    fn test_decompress_falls_back_to_other_scheme() {
        let compressor = Compressor::default();
        let data = payload(4_096);
        let (bulk, scheme) = compressor
            .compress(data.clone(), PayloadClass::Bulk)
            .unwrap();
        assert_eq!(scheme, Scheme::Zlib);
        // realtime prefers zstd, then falls back to zlib
        assert_eq!(decompress(&bulk, true).unwrap(), data.to_vec());

        let (fast, _) = compressor
            .compress(data.clone(), PayloadClass::Realtime)
            .unwrap();
        assert_eq!(decompress(&fast, false).unwrap(), data.to_vec());
    }

    #[test]
    fn test_garbage_is_undecodable() {
        assert!(matches!(
            decompress(b"definitely not compressed", true),
            Err(CompressError::Undecodable)
        ));
    }
}
