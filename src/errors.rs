use crate::format::Algorithm;
use std::io;
use thiserror::Error;

/// Possible errors that arise from attempting to convert compressed data into its
/// decompressed form, or vise-versa.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression tag {0:#x} is invalid and not supported")]
    InvalidAlgorithm(u8),

    #[error("Huffman symbol width {0} is invalid (expected 4 or 8)")]
    InvalidSymbolWidth(u8),

    #[error("input ended at offset {offset:#x} with {needed} more byte(s) expected")]
    TruncatedInput { offset: usize, needed: usize },

    #[error("copyback of {displacement} bytes reaches before the {available} decoded bytes")]
    BadLookBack {
        displacement: usize,
        available: usize,
    },

    #[error("Huffman node at table slot {position:#x} points outside the {table_len} byte table")]
    CorruptTree { position: usize, table_len: usize },

    #[error("symbol {0:#04x} has no code in the Huffman tree")]
    MissingSymbol(u8),

    #[error("Huffman code for symbol {0:#04x} is longer than 32 bits")]
    CodeTooLong(u8),

    #[error("unsupported encode: {0}")]
    EncodeUnsupported(&'static str),

    #[error("compressed data must decompress to at least one byte")]
    EmptyPayload,

    #[error("payload of {0} bytes is too large for its size field")]
    PayloadTooLarge(usize),

    #[error("maximum chunk size must be at least one byte")]
    ZeroChunkSize,

    #[error("expected {expected} data, but the header is for {found}")]
    AlgorithmMismatch {
        expected: Algorithm,
        found: Algorithm,
    },

    #[error("{offsets} chunk offsets for {chunks} chunks")]
    ChunkCountMismatch { offsets: usize, chunks: usize },

    #[error("chunk offset {index} ({offset:#x}) does not follow the previous offset")]
    UnorderedChunkOffsets { index: usize, offset: u32 },

    #[error("end of file offset is {found:#x}, but the chunks end at {expected:#x}")]
    EndOfFileMismatch { expected: u32, found: u32 },

    #[error("chunk {index} decompressed to {found} bytes instead of {expected}")]
    ChunkSizeMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("cannot jump back from {from:#x} to {to:#x} while writing")]
    SeekBackwards { from: usize, to: usize },

    #[error("while decompressing `{entry}`")]
    Decompressing {
        entry: String,
        #[source]
        source: Box<CodecError>,
    },

    #[error("while compressing `{entry}`")]
    Compressing {
        entry: String,
        #[source]
        source: Box<CodecError>,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Attach the name of the archive entry being worked on to an error
pub trait EntryContext<T> {
    fn while_decompressing(self, entry: &str) -> Result<T, CodecError>;
    fn while_compressing(self, entry: &str) -> Result<T, CodecError>;
}

impl<T> EntryContext<T> for Result<T, CodecError> {
    fn while_decompressing(self, entry: &str) -> Result<T, CodecError> {
        self.map_err(|e| CodecError::Decompressing {
            entry: entry.into(),
            source: Box::new(e),
        })
    }

    fn while_compressing(self, entry: &str) -> Result<T, CodecError> {
        self.map_err(|e| CodecError::Compressing {
            entry: entry.into(),
            source: Box::new(e),
        })
    }
}
