//! Chunked compression for archive entries.
//!
//! An entry's payload is split into chunks of at most `max_chunk_size` bytes.
//! Each chunk is compressed by the inner codec, and the result by the outer
//! codec. The serialized container is laid out as
//!
//! | Field              | Size           |
//! |--------------------|----------------|
//! | decompressed size  | `u32`          |
//! | max chunk size     | `u32`          |
//! | outer type         | `u8`           |
//! | inner type         | `u8`           |
//! | chunk count        | `u16`          |
//! | chunk offsets      | `u32` × count  |
//! | end of file offset | `u32`          |
//! | chunks             | ...            |
//!
//! All values are little endian. Offsets are relative to the first byte after
//! the end of file offset. Type bytes use the same encoding as the low byte of
//! a compression header (`0x10` LZSS, `0x24`/`0x28` Huffman, `0x30` run-length)
//! with `0` for uncompressed.

use crate::{
    cursor::{ByteReader, ByteWriter},
    decode::Decoder,
    encode::{compress, CompressionType},
    errors::{CodecError, EntryContext},
    format::CompressionInfo,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::convert::{TryFrom, TryInto};

/// How the chunks of an entry are compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSettings {
    pub max_chunk_size: u32,
    pub outer: CompressionType,
    pub inner: CompressionType,
}

impl ChunkSettings {
    pub fn new(max_chunk_size: u32, outer: CompressionType, inner: CompressionType) -> Self {
        Self {
            max_chunk_size,
            outer,
            inner,
        }
    }
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            max_chunk_size: 0x8000,
            outer: CompressionType::None,
            inner: CompressionType::Lzss,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedHeader {
    pub decompressed_size: u32,
    pub max_chunk_size: u32,
    pub outer: CompressionType,
    pub inner: CompressionType,
}

impl ChunkedHeader {
    /// size of the fixed fields, including the chunk count
    pub const SIZE: usize = 12;
}

/// A compressed entry: its header, the offset table, and each compressed chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedPayload {
    pub header: ChunkedHeader,
    pub chunk_offsets: Vec<u32>,
    pub end_of_file_offset: u32,
    pub chunks: Vec<Vec<u8>>,
}

impl ChunkedPayload {
    /// Parse a serialized container. Each chunk runs up to the next offset (or
    /// the end of file offset for the last chunk).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut rdr = ByteReader::new(bytes);
        let decompressed_size = rdr.read_u32()?;
        let max_chunk_size = rdr.read_u32()?;
        let outer = CompressionType::try_from(rdr.read_u8()?)?;
        let inner = CompressionType::try_from(rdr.read_u8()?)?;
        let count = rdr.read_u16()? as usize;

        let chunk_offsets = (0..count)
            .map(|_| rdr.read_u32())
            .collect::<Result<Vec<_>, _>>()?;
        let end_of_file_offset = rdr.read_u32()?;
        let base = rdr.position();
        check_offsets(&chunk_offsets, end_of_file_offset)?;

        let ends = chunk_offsets
            .iter()
            .skip(1)
            .chain(Some(&end_of_file_offset));
        let mut chunks = Vec::with_capacity(count);
        for (&start, &end) in chunk_offsets.iter().zip(ends) {
            rdr.jump(base + start as usize)?;
            chunks.push(rdr.read_bytes((end - start) as usize)?.to_vec());
        }

        Ok(Self {
            header: ChunkedHeader {
                decompressed_size,
                max_chunk_size,
                outer,
                inner,
            },
            chunk_offsets,
            end_of_file_offset,
            chunks,
        })
    }

    /// Serialize the container, placing each chunk at its recorded offset
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let count = self.check_count()?;
        let count = u16::try_from(count).map_err(|_| CodecError::PayloadTooLarge(count))?;

        let mut wtr = ByteWriter::with_capacity(
            ChunkedHeader::SIZE + 4 * (self.chunks.len() + 1) + self.end_of_file_offset as usize,
        );
        wtr.write_u32(self.header.decompressed_size)?;
        wtr.write_u32(self.header.max_chunk_size)?;
        wtr.write_u8(self.header.outer.tag())?;
        wtr.write_u8(self.header.inner.tag())?;
        wtr.write_u16(count)?;

        let offset_sites = (0..count)
            .map(|_| wtr.reserve_u32())
            .collect::<Result<Vec<_>, _>>()?;
        let eof_site = wtr.reserve_u32()?;
        let base = wtr.position();

        let placed = offset_sites
            .into_iter()
            .zip(&self.chunk_offsets)
            .zip(&self.chunks);
        for ((site, &offset), chunk) in placed {
            wtr.jump(base + offset as usize, 0)?;
            wtr.patch_u32(site, relative_offset(base, wtr.position())?);
            wtr.write_bytes(chunk)?;
        }

        let end = relative_offset(base, wtr.position())?;
        if end != self.end_of_file_offset {
            return Err(CodecError::EndOfFileMismatch {
                expected: end,
                found: self.end_of_file_offset,
            });
        }
        wtr.patch_u32(eof_site, end);

        Ok(wtr.into_inner())
    }

    /// Check the offset table against the chunks it locates
    pub fn validate(&self) -> Result<(), CodecError> {
        self.check_count()?;
        check_offsets(&self.chunk_offsets, self.end_of_file_offset)?;

        let mut end = 0u32;
        for (index, (&offset, chunk)) in self.chunk_offsets.iter().zip(&self.chunks).enumerate() {
            // chunks are packed back to back from offset 0
            if offset != end {
                return Err(CodecError::UnorderedChunkOffsets { index, offset });
            }
            end = u32::try_from(chunk.len())
                .ok()
                .and_then(|len| offset.checked_add(len))
                .ok_or(CodecError::PayloadTooLarge(chunk.len()))?;
        }

        if end != self.end_of_file_offset {
            return Err(CodecError::EndOfFileMismatch {
                expected: end,
                found: self.end_of_file_offset,
            });
        }

        Ok(())
    }

    fn check_count(&self) -> Result<usize, CodecError> {
        if self.chunk_offsets.len() != self.chunks.len() {
            return Err(CodecError::ChunkCountMismatch {
                offsets: self.chunk_offsets.len(),
                chunks: self.chunks.len(),
            });
        }

        Ok(self.chunks.len())
    }
}

/// The offsets, followed by the end of file offset, must be strictly increasing
fn check_offsets(offsets: &[u32], end_of_file_offset: u32) -> Result<(), CodecError> {
    let all = offsets.iter().chain(Some(&end_of_file_offset));
    for (index, (prev, &offset)) in all.clone().zip(all.skip(1)).enumerate() {
        if offset <= *prev {
            return Err(CodecError::UnorderedChunkOffsets {
                index: index + 1,
                offset,
            });
        }
    }

    Ok(())
}

fn relative_offset(base: usize, pos: usize) -> Result<u32, CodecError> {
    (pos - base)
        .try_into()
        .map_err(|_| CodecError::PayloadTooLarge(pos))
}

/// The details captured from both layers of one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub outer: Option<CompressionInfo>,
    pub inner: Option<CompressionInfo>,
}

/// Everything needed to compress an entry back to the same bytes
///
/// The archive layer keeps this alongside the entry. It is not needed to
/// decompress the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub outer: CompressionType,
    pub inner: CompressionType,
    pub max_chunk_size: u32,
    pub chunks: Vec<ChunkInfo>,
}

impl EntryMetadata {
    pub fn settings(&self) -> ChunkSettings {
        ChunkSettings::new(self.max_chunk_size, self.outer, self.inner)
    }

    fn chunk(&self, index: usize) -> Option<&ChunkInfo> {
        self.chunks.get(index)
    }
}

/// Split `bytes` into chunks and compress each, reusing the Huffman trees in `prior`
/// where they still fit
pub fn compress_payload(
    bytes: &[u8],
    settings: &ChunkSettings,
    prior: Option<&EntryMetadata>,
) -> Result<(ChunkedPayload, EntryMetadata), CodecError> {
    if settings.max_chunk_size == 0 {
        return Err(CodecError::ZeroChunkSize);
    }
    let decompressed_size =
        u32::try_from(bytes.len()).map_err(|_| CodecError::PayloadTooLarge(bytes.len()))?;

    let mut chunk_offsets = Vec::new();
    let mut chunks = Vec::new();
    let mut infos = Vec::new();
    let mut end = 0usize;

    for (index, plain) in bytes.chunks(settings.max_chunk_size as usize).enumerate() {
        let prior = prior.and_then(|p| p.chunk(index));
        let inner = compress(plain, settings.inner, prior.and_then(|p| p.inner.as_ref()))?;
        let outer = compress(&inner.data, settings.outer, prior.and_then(|p| p.outer.as_ref()))?;

        chunk_offsets.push(relative_offset(0, end)?);
        end += outer.data.len();
        chunks.push(outer.data);
        infos.push(ChunkInfo {
            outer: outer.info,
            inner: inner.info,
        });
    }
    debug!(
        "compressed {} bytes into {} chunks ({} bytes) as {} in {}",
        bytes.len(),
        chunks.len(),
        end,
        settings.inner,
        settings.outer
    );

    let payload = ChunkedPayload {
        header: ChunkedHeader {
            decompressed_size,
            max_chunk_size: settings.max_chunk_size,
            outer: settings.outer,
            inner: settings.inner,
        },
        chunk_offsets,
        end_of_file_offset: relative_offset(0, end)?,
        chunks,
    };
    let metadata = EntryMetadata {
        outer: settings.outer,
        inner: settings.inner,
        max_chunk_size: settings.max_chunk_size,
        chunks: infos,
    };

    Ok((payload, metadata))
}

/// Decompress every chunk of `payload`, capturing the details needed to compress
/// it back to the same bytes
pub fn decompress_payload(
    payload: &ChunkedPayload,
) -> Result<(Vec<u8>, EntryMetadata), CodecError> {
    payload.validate()?;
    let header = &payload.header;
    let size = header.decompressed_size as usize;
    if size > 0 && header.max_chunk_size == 0 {
        return Err(CodecError::ZeroChunkSize);
    }

    // the header size is untrusted; the chunks bound what can really be produced
    let bound = payload
        .chunks
        .len()
        .saturating_mul(header.max_chunk_size as usize);
    let mut output = Vec::with_capacity(size.min(bound));
    let mut infos = Vec::with_capacity(payload.chunks.len());
    for (index, chunk) in payload.chunks.iter().enumerate() {
        let (middle, outer) = decode_layer(chunk, header.outer)?;
        let (plain, inner) = decode_layer(&middle, header.inner)?;

        let expected = (size - output.len()).min(header.max_chunk_size as usize);
        if plain.len() != expected {
            return Err(CodecError::ChunkSizeMismatch {
                index,
                expected,
                found: plain.len(),
            });
        }
        output.extend_from_slice(&plain);
        infos.push(ChunkInfo { outer, inner });
    }

    if output.len() != size {
        return Err(CodecError::ChunkSizeMismatch {
            index: payload.chunks.len(),
            expected: size - output.len(),
            found: 0,
        });
    }
    debug!(
        "decompressed {} chunks into {} bytes",
        payload.chunks.len(),
        output.len()
    );

    let metadata = EntryMetadata {
        outer: header.outer,
        inner: header.inner,
        max_chunk_size: header.max_chunk_size,
        chunks: infos,
    };

    Ok((output, metadata))
}

fn decode_layer(
    data: &[u8],
    kind: CompressionType,
) -> Result<(Vec<u8>, Option<CompressionInfo>), CodecError> {
    let expected = match kind.algorithm() {
        Some(algorithm) => algorithm,
        None => return Ok((data.to_vec(), None)),
    };

    let mut decoder = Decoder::for_bytes(data);
    let found = decoder.header()?.algorithm;
    if found != expected {
        return Err(CodecError::AlgorithmMismatch { expected, found });
    }

    decoder.decode_with_info()
}

/// Compress the entry `name` into a serialized container
pub fn compress_entry(
    name: &str,
    bytes: &[u8],
    settings: &ChunkSettings,
    prior: Option<&EntryMetadata>,
) -> Result<(Vec<u8>, EntryMetadata), CodecError> {
    compress_payload(bytes, settings, prior)
        .and_then(|(payload, metadata)| payload.to_bytes().map(|raw| (raw, metadata)))
        .while_compressing(name)
}

/// Decompress the serialized container of the entry `name`
pub fn decompress_entry(name: &str, raw: &[u8]) -> Result<(Vec<u8>, EntryMetadata), CodecError> {
    ChunkedPayload::from_bytes(raw)
        .and_then(|payload| decompress_payload(&payload))
        .while_decompressing(name)
}
