//! Decompressor Registry (spec §4.2). Per-message variants are stateless;
//! streaming variants carry decoder state across calls and must not be
//! shared between sessions.
//!
//! The streaming decoders are synchronous and incremental: `decompress`
//! feeds the input and returns whatever output is currently decodable
//! before returning, rather than handing decoding off to a background
//! task reading from a pipe.

use std::collections::HashMap;
use std::io::Read;

use flate2::{Decompress, FlushDecompress};
use zstd::dict::{DecoderDictionary, EncoderDictionary};
use zstd::stream::raw::{Decoder as RawZstdDecoder, InBuffer, Operation, OutBuffer};

use crate::error::{DecompressError, GatewayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecompressMode {
    None,
    ZlibPerMessage,
    ZstdPerMessage,
    ZlibStream,
    ZstdStream,
}

pub trait Decompressor: Send {
    fn decompress(&mut self, bytes: &[u8]) -> Result<Vec<u8>, GatewayError>;
    /// Clear transient decode state after a mid-stream error, without
    /// giving the instance back to a pool.
    fn reset(&mut self);
    /// Prepare the instance to be returned to a [`DecompressorPool`] for
    /// reuse by a future connection within the same session.
    fn recycle(&mut self);
}

#[derive(Default)]
pub struct NoneDecompressor;

impl Decompressor for NoneDecompressor {
    fn decompress(&mut self, bytes: &[u8]) -> Result<Vec<u8>, GatewayError> {
        Ok(bytes.to_vec())
    }

    fn reset(&mut self) {}
    fn recycle(&mut self) {}
}

#[derive(Default)]
pub struct ZlibPerMessageDecompressor;

impl Decompressor for ZlibPerMessageDecompressor {
    fn decompress(&mut self, bytes: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let mut decoder = flate2::read::ZlibDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| DecompressError::Zlib(e.to_string()))?;
        Ok(out)
    }

    fn reset(&mut self) {}
    fn recycle(&mut self) {}
}

#[derive(Default)]
pub struct ZstdPerMessageDecompressor;

impl Decompressor for ZstdPerMessageDecompressor {
    fn decompress(&mut self, bytes: &[u8]) -> Result<Vec<u8>, GatewayError> {
        zstd::stream::decode_all(bytes)
            .map_err(|e| DecompressError::Zstd(e.to_string()).into())
    }

    fn reset(&mut self) {}
    fn recycle(&mut self) {}
}

/// Zlib stream decompressor carrying a growing input buffer and the
/// inflater's dictionary state across calls.
pub struct ZlibStreamDecompressor {
    pending: Vec<u8>,
    inflater: Decompress,
}

impl ZlibStreamDecompressor {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            inflater: Decompress::new(true),
        }
    }
}

impl Default for ZlibStreamDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor for ZlibStreamDecompressor {
    fn decompress(&mut self, bytes: &[u8]) -> Result<Vec<u8>, GatewayError> {
        self.pending.extend_from_slice(bytes);
        if !ends_with_sync_flush(&self.pending) {
            return Ok(Vec::new());
        }

        let before = self.inflater.total_in();
        let mut out = Vec::new();
        self.inflater
            .decompress_vec(&self.pending, &mut out, FlushDecompress::Sync)
            .map_err(|e| DecompressError::Zlib(e.to_string()))?;
        let consumed = (self.inflater.total_in() - before) as usize;
        if consumed > 0 && consumed <= self.pending.len() {
            self.pending.drain(0..consumed);
        } else {
            self.pending.clear();
        }
        Ok(out)
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.inflater.reset(true);
    }

    /// A recycled instance is handed to a new connection within the same
    /// session, which starts its own fresh zlib window — so recycling is
    /// the same full reset as mid-stream error recovery.
    fn recycle(&mut self) {
        self.reset();
    }
}

/// Zstd stream decompressor. Unlike the zlib path, zstd frame boundaries
/// are self-describing, so this drives `Operation::run` until the input
/// buffer is exhausted rather than scanning for a sync-flush marker.
pub struct ZstdStreamDecompressor {
    decoder: RawZstdDecoder<'static>,
}

impl ZstdStreamDecompressor {
    pub fn new() -> Result<Self, GatewayError> {
        let decoder =
            RawZstdDecoder::new().map_err(|e| DecompressError::Zstd(e.to_string()))?;
        Ok(Self { decoder })
    }
}

impl Decompressor for ZstdStreamDecompressor {
    fn decompress(&mut self, bytes: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let mut input = InBuffer::around(bytes);
        let mut out = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];

        loop {
            let mut output = OutBuffer::around(&mut chunk);
            self.decoder
                .run(&mut input, &mut output)
                .map_err(|e| DecompressError::Zstd(e.to_string()))?;
            let produced = output.as_slice().len();
            out.extend_from_slice(output.as_slice());
            if produced == 0 || input.pos() >= bytes.len() {
                break;
            }
        }

        Ok(out)
    }

    fn reset(&mut self) {
        let _ = self.decoder.reinit();
    }

    /// Same reasoning as [`ZlibStreamDecompressor::recycle`]: a new
    /// connection is a new zstd frame sequence, so recycling reinitializes
    /// the decoder exactly like a reset.
    fn recycle(&mut self) {
        self.reset();
    }
}

/// Loads a zip archive of `.dict` files at startup and holds one decoder
/// dictionary per entry (so any dictionary version can be decoded) and one
/// encoder dictionary per name, for callers that need to compress outbound
/// payloads against the same dictionary.
pub struct ZstdDictionaryRegistry {
    decoders: HashMap<String, DecoderDictionary<'static>>,
    encoders: HashMap<String, EncoderDictionary<'static>>,
}

impl ZstdDictionaryRegistry {
    pub fn load_from_zip(bytes: &[u8]) -> Result<Self, GatewayError> {
        let cursor = std::io::Cursor::new(bytes);
        let mut archive =
            zip::ZipArchive::new(cursor).map_err(|e| DecompressError::Dictionary(e.to_string()))?;

        let mut decoders = HashMap::new();
        let mut encoders = HashMap::new();

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| DecompressError::Dictionary(e.to_string()))?;
            let name = entry.name().to_string();
            if !name.ends_with(".dict") {
                continue;
            }
            let key = name.trim_end_matches(".dict").to_string();

            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| DecompressError::Dictionary(e.to_string()))?;

            decoders.insert(key.clone(), DecoderDictionary::copy(&data));
            encoders.insert(key, EncoderDictionary::copy(&data, 0));
        }

        Ok(Self { decoders, encoders })
    }

    pub fn decoder(&self, name: &str) -> Result<&DecoderDictionary<'static>, GatewayError> {
        self.decoders
            .get(name)
            .ok_or_else(|| DecompressError::UnknownDictionary(name.to_string()).into())
    }

    pub fn encoder(&self, name: &str) -> Result<&EncoderDictionary<'static>, GatewayError> {
        self.encoders
            .get(name)
            .ok_or_else(|| DecompressError::UnknownDictionary(name.to_string()).into())
    }
}

/// Pools streaming decompressor instances per [`DecompressMode`] so a
/// session that reconnects doesn't rebuild decoder state from scratch on
/// every dial; per-message modes pool too, trivially, since their `acquire`
/// is just as cheap either way.
#[derive(Default)]
pub struct DecompressorPool {
    idle: HashMap<DecompressMode, Vec<Box<dyn Decompressor>>>,
}

impl DecompressorPool {
    pub fn new() -> Self {
        Self {
            idle: HashMap::new(),
        }
    }

    /// Reuse a recycled instance for `mode` if one is idle, else build one.
    pub fn acquire(&mut self, mode: DecompressMode) -> Result<Box<dyn Decompressor>, GatewayError> {
        if let Some(reused) = self.idle.get_mut(&mode).and_then(Vec::pop) {
            return Ok(reused);
        }
        let fresh: Box<dyn Decompressor> = match mode {
            DecompressMode::None => Box::new(NoneDecompressor),
            DecompressMode::ZlibPerMessage => Box::new(ZlibPerMessageDecompressor),
            DecompressMode::ZstdPerMessage => Box::new(ZstdPerMessageDecompressor),
            DecompressMode::ZlibStream => Box::new(ZlibStreamDecompressor::new()),
            DecompressMode::ZstdStream => Box::new(ZstdStreamDecompressor::new()?),
        };
        Ok(fresh)
    }

    /// Recycle `decompressor` back into the pool under `mode`.
    pub fn release(&mut self, mode: DecompressMode, mut decompressor: Box<dyn Decompressor>) {
        decompressor.recycle();
        self.idle.entry(mode).or_default().push(decompressor);
    }
}

fn ends_with_sync_flush(data: &[u8]) -> bool {
    data.len() >= 4 && data[data.len() - 4..] == [0x00, 0x00, 0xff, 0xff]
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    #[test]
    fn zlib_per_message_round_trip() {
        let input = br#"{"s":0,"d":{}}"#;
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(input).expect("write");
        let compressed = enc.finish().expect("finish");

        let mut dec = ZlibPerMessageDecompressor;
        let out = dec.decompress(&compressed).expect("decode");
        assert_eq!(out, input);
    }

    #[test]
    fn zstd_per_message_round_trip() {
        let input = br#"{"s":0,"d":{}}"#;
        let compressed = zstd::stream::encode_all(&input[..], 0).expect("encode");

        let mut dec = ZstdPerMessageDecompressor;
        let out = dec.decompress(&compressed).expect("decode");
        assert_eq!(out, input);
    }

    #[test]
    fn sync_flush_detection() {
        assert!(ends_with_sync_flush(&[1, 2, 0, 0, 0xff, 0xff]));
        assert!(!ends_with_sync_flush(&[1, 2, 3]));
    }

    #[test]
    fn zlib_stream_buffers_until_sync_flush() {
        let mut dec = ZlibStreamDecompressor::new();
        // A single byte with no sync-flush suffix yields nothing yet.
        let out = dec.decompress(&[0x01]).expect("decode");
        assert!(out.is_empty());
    }

    #[test]
    fn pool_reuses_recycled_instance() {
        let mut pool = DecompressorPool::new();
        let first = pool.acquire(DecompressMode::ZlibStream).expect("acquire");
        let first_ptr = first.as_ref() as *const dyn Decompressor as *const ();
        pool.release(DecompressMode::ZlibStream, first);

        let second = pool.acquire(DecompressMode::ZlibStream).expect("acquire");
        let second_ptr = second.as_ref() as *const dyn Decompressor as *const ();
        assert_eq!(first_ptr, second_ptr, "expected the recycled instance back");
    }

    #[test]
    fn pool_builds_fresh_instance_when_idle_is_empty() {
        let mut pool = DecompressorPool::new();
        let mut dec = pool.acquire(DecompressMode::None).expect("acquire");
        assert_eq!(dec.decompress(b"passthrough").unwrap(), b"passthrough");
    }
}
