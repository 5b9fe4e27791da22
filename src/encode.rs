use crate::{
    errors::CodecError,
    format::{Algorithm, CompressionInfo, SymbolWidth},
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt};

pub(crate) mod huffman;
pub(crate) mod lzss;
pub(crate) mod rle;

pub use self::{huffman::compress_huffman, lzss::compress_lzss, rle::compress_rle};

type Frequency = u64;

/// How a block of data is (or is not) compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionType {
    /// Stored as is
    None,
    Lzss,
    RunLength,
    Huffman(SymbolWidth),
}

impl CompressionType {
    /// The header tag for this type, or `None` for uncompressed data
    pub fn algorithm(self) -> Option<Algorithm> {
        match self {
            Self::None => None,
            Self::Lzss => Some(Algorithm::Lzss),
            Self::RunLength => Some(Algorithm::RunLength),
            Self::Huffman(..) => Some(Algorithm::Huffman),
        }
    }

    /// Encode as the low byte of a compression header: `algorithm << 4 | symbol width`
    pub fn tag(self) -> u8 {
        match self {
            Self::Huffman(width) => Algorithm::Huffman.tag() << 4 | width.bits(),
            other => other.algorithm().map_or(0, |a| a.tag() << 4),
        }
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        Self::None
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        if tag == 0 {
            return Ok(Self::None);
        }

        match Algorithm::try_from(tag >> 4)? {
            Algorithm::Lzss => Ok(Self::Lzss),
            Algorithm::RunLength => Ok(Self::RunLength),
            Algorithm::Huffman => SymbolWidth::try_from(tag & 0xF).map(Self::Huffman),
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::None => write!(f, "uncompressed"),
            Self::Huffman(width) => write!(f, "{}-bit Huffman", width.bits()),
            Self::Lzss => write!(f, "LZSS"),
            Self::RunLength => write!(f, "run-length"),
        }
    }
}

/// The output of an [`Encoder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub data: Vec<u8>,
    /// Details needed to repeat this exact encode (the Huffman tree), if any
    pub info: Option<CompressionInfo>,
}

/// Specify the encoding settings, and then compress.
///
/// To create a new `Encoder`, use [`for_bytes()`]. Then, choose the compression
/// with [`method()`] or one of its shortcuts, and optionally give it the
/// [`CompressionInfo`] captured by an earlier decode. Finally, compress the input
/// with [`encode()`] or [`encode_to_vec()`].
/// ```
/// # use nitrocomp::{Encoder, Decoder};
/// let original = b"ABBACABBACD";
/// let compressed = Encoder::for_bytes(original)
///     .lzss()
///     .encode_to_vec()
///     .unwrap();
/// let decompressed = Decoder::for_bytes(&compressed)
///     .decode()
///     .unwrap();
/// assert_eq!(&original[..], decompressed);
/// ```
///
/// The default encoding stores the input uncompressed.
///
/// [`for_bytes()`]: Encoder::for_bytes
/// [`method()`]: Encoder::method
/// [`encode()`]: Encoder::encode
/// [`encode_to_vec()`]: Encoder::encode_to_vec
#[derive(Debug, Clone, Copy)]
pub struct Encoder<'a> {
    input: &'a [u8],
    method: CompressionType,
    prior: Option<&'a CompressionInfo>,
}

impl<'a> Encoder<'a> {
    /// Create a new `Encoder` for the data in the `bytes` slice.
    #[inline]
    pub fn for_bytes(bytes: &'a [u8]) -> Self {
        Self {
            input: bytes,
            method: CompressionType::None,
            prior: None,
        }
    }

    #[inline]
    pub fn method(&mut self, method: CompressionType) -> &mut Self {
        self.method = method;
        self
    }

    /// Convenience method to set LZSS encoding without importing [`CompressionType`].
    #[inline]
    pub fn lzss(&mut self) -> &mut Self {
        self.method(CompressionType::Lzss)
    }

    /// Convenience method to set run-length encoding without importing [`CompressionType`].
    #[inline]
    pub fn run_length(&mut self) -> &mut Self {
        self.method(CompressionType::RunLength)
    }

    #[inline]
    pub fn huffman(&mut self, width: SymbolWidth) -> &mut Self {
        self.method(CompressionType::Huffman(width))
    }

    /// Reuse the Huffman tree in `info` (if it fits the input) instead of building a new one.
    /// This is the only way to create 8-bit Huffman data.
    #[inline]
    pub fn with_info(&mut self, info: Option<&'a CompressionInfo>) -> &mut Self {
        self.prior = info;
        self
    }

    /// Start the encoding and return the compressed data with any captured details
    pub fn encode(&self) -> Result<Encoded, CodecError> {
        compress(self.input, self.method, self.prior)
    }

    /// Start the encoding and return only the compressed data in a `Vec<u8>`.
    #[inline]
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, CodecError> {
        self.encode().map(|e| e.data)
    }
}

/// Compress `input` with `method`
///
/// This is a convenience function to encode without having to set up an [`Encoder`].
pub fn compress(
    input: &[u8],
    method: CompressionType,
    prior: Option<&CompressionInfo>,
) -> Result<Encoded, CodecError> {
    let (data, info) = match method {
        CompressionType::None => (input.to_vec(), None),
        CompressionType::Lzss => (compress_lzss(input)?, None),
        CompressionType::RunLength => (compress_rle(input)?, None),
        CompressionType::Huffman(width) => {
            let (data, info) = compress_huffman(input, width, prior)?;
            (data, Some(info))
        }
    };
    debug!("{} => {} bytes as {}", input.len(), data.len(), method);

    Ok(Encoded { data, info })
}
