//! Compression codecs for Nintendo DS style game data.
//!
//! Every compressed stream starts with a four byte [`CompressionHeader`], followed by
//! LZSS, Huffman, or run-length data. Use a [`Decoder`] or [`decompress`] to read a
//! stream, and an [`Encoder`] or [`compress`] to write one. Archive entries made of
//! independently compressed chunks are handled by the [`chunked`] functions.
//!
//! Huffman trees captured while decoding (see [`CompressionInfo`]) can be given back
//! to the encoder to reproduce the original bytes exactly.

mod decode;
mod encode;
mod errors;
mod format;

pub mod chunked;
pub mod cursor;

pub use chunked::{
    compress_entry, compress_payload, decompress_entry, decompress_payload, ChunkInfo,
    ChunkSettings, ChunkedHeader, ChunkedPayload, EntryMetadata,
};
pub use decode::{compression_info, decompress, Decoder};
pub use encode::{
    compress, compress_huffman, compress_lzss, compress_rle, CompressionType, Encoded, Encoder,
};
pub use errors::{CodecError, EntryContext};
pub use format::{
    Algorithm, CodeMap, CompressionHeader, CompressionInfo, HuffCode, HuffmanTree, Node, NodeId,
    SymbolWidth,
};
