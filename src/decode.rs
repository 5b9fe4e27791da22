use crate::{
    cursor::ByteReader,
    encode::lzss::LzssSettings,
    encode::rle,
    errors::CodecError,
    format::{
        swap_words, Algorithm, CompressionHeader, CompressionInfo, HuffmanTree, Node, SymbolWidth,
    },
};
use bitstream_io::{BigEndian, BitReader};
use log::{debug, trace};
use std::{io::Cursor, iter};

/// Specify the decoding input, then decode.
///
/// To create a new `Decoder`, use [`for_bytes()`]. Then, decode the input data
/// with [`decode()`], or [`decode_with_info()`] to also capture the details needed
/// to reproduce the same compressed bytes later.
/// ```
/// # use nitrocomp::{Encoder, Decoder};
/// let original = b"ABBACABBACD";
/// let compressed = Encoder::for_bytes(original)
///     .run_length()
///     .encode_to_vec()
///     .unwrap();
/// let decompressed = Decoder::for_bytes(&compressed)
///     .decode()
///     .unwrap();
/// assert_eq!(&original[..], decompressed);
/// ```
/// You can use a `Decoder` to get the [`CompressionHeader`] with [`header()`]:
/// ```
/// # use nitrocomp::{Encoder, Decoder, Algorithm};
/// # let original = b"ABBACABBACD";
/// # let compressed = Encoder::for_bytes(original).lzss().encode_to_vec().unwrap();
/// let mut decoder = Decoder::for_bytes(&compressed);
/// let header = decoder.header().unwrap();
/// assert_eq!(header.algorithm, Algorithm::Lzss);
/// assert_eq!(header.decompressed_size as usize, original.len());
/// ```
/// [`for_bytes()`]: Decoder::for_bytes
/// [`decode()`]: Decoder::decode
/// [`decode_with_info()`]: Decoder::decode_with_info
/// [`header()`]: Decoder::header
pub struct Decoder<'a> {
    src: ByteReader<'a>,
    header: Option<CompressionHeader>,
}

impl<'a> Decoder<'a> {
    #[inline]
    pub fn for_bytes(bytes: &'a [u8]) -> Self {
        Self {
            src: ByteReader::new(bytes),
            header: None,
        }
    }

    pub fn header(&mut self) -> Result<CompressionHeader, CodecError> {
        match self.header {
            Some(header) => Ok(header),
            None => {
                let header = CompressionHeader::read(&mut self.src)?;
                self.header = Some(header);
                Ok(header)
            }
        }
    }

    #[inline]
    pub fn decode(&mut self) -> Result<Vec<u8>, CodecError> {
        self.decode_with_info().map(|(data, _)| data)
    }

    /// Decode the data, and return the Huffman tree for Huffman encoded data
    pub fn decode_with_info(&mut self) -> Result<(Vec<u8>, Option<CompressionInfo>), CodecError> {
        let header = self.header()?;
        debug!(
            "decoding {} bytes of {} data",
            header.decompressed_size, header.algorithm
        );

        let size = header.decompressed_size as usize;
        if size == 0 {
            return Err(CodecError::EmptyPayload);
        }

        match header.algorithm {
            Algorithm::Lzss => decode_lzss(&mut self.src, size).map(|d| (d, None)),
            Algorithm::RunLength => decode_rle(&mut self.src, size).map(|d| (d, None)),
            Algorithm::Huffman => {
                let width = header.symbol_width()?;
                decode_huffman(&mut self.src, size, width).map(|(d, info)| (d, Some(info)))
            }
        }
    }

    /// Get the header and, for Huffman data, the encoding tree without decoding the data
    pub fn info(&mut self) -> Result<(CompressionHeader, Option<CompressionInfo>), CodecError> {
        let header = self.header()?;
        let info = match header.algorithm {
            Algorithm::Huffman => {
                let width = header.symbol_width()?;
                let mut src = self.src.clone();
                Some(CompressionInfo::new(width, HuffmanTree::read(&mut src)?))
            }
            _ => None,
        };

        Ok((header, info))
    }
}

/// Decompress LZSS, Huffman, or run-length data into a `Vec<u8>`
///
/// This is a convenience function to decode without having to set up a [`Decoder`]
pub fn decompress(src: &[u8]) -> Result<Vec<u8>, CodecError> {
    Decoder::for_bytes(src).decode()
}

/// Extract the [`CompressionHeader`] and any [`CompressionInfo`] from compressed data
///
/// This is a convenience function to get information about compressed data without having
/// to set up a [`Decoder`]
pub fn compression_info(
    src: &[u8],
) -> Result<(CompressionHeader, Option<CompressionInfo>), CodecError> {
    Decoder::for_bytes(src).info()
}

fn decode_lzss(src: &mut ByteReader, size: usize) -> Result<Vec<u8>, CodecError> {
    let mut output: Vec<u8> = Vec::with_capacity(size);

    while output.len() < size {
        let flags = src.read_u8()?;

        for bit in (0..LzssSettings::GROUP_SIZE).rev() {
            if output.len() >= size {
                break;
            }

            if flags & (1 << bit) == 0 {
                output.push(src.read_u8()?);
                continue;
            }

            let hi = src.read_u8()?;
            let lo = src.read_u8()?;
            let count = (hi >> 4) as usize + LzssSettings::MIN_MATCH;
            let move_back = ((hi as usize & 0xF) << 8 | lo as usize) + 1;

            if move_back > output.len() {
                return Err(CodecError::BadLookBack {
                    displacement: move_back,
                    available: output.len(),
                });
            }

            let start = output.len() - move_back;
            let count = count.min(size - output.len());
            trace!(
                "{:04x} - Encoded [Copyback]: size: {} mb: {} | start: {:04x}",
                output.len(),
                count,
                move_back,
                start
            );

            // byte by byte, as the copy can overlap the bytes it is writing
            for i in start..start + count {
                let byte = output[i];
                output.push(byte);
            }
        }
    }

    Ok(output)
}

fn decode_rle(src: &mut ByteReader, size: usize) -> Result<Vec<u8>, CodecError> {
    let mut output: Vec<u8> = Vec::with_capacity(size);

    while output.len() < size {
        let flag = src.read_u8()?;
        let remaining = size - output.len();

        if flag & rle::COMPRESSED_FLAG != 0 {
            let count = (flag & 0x7F) as usize + rle::MIN_RUN;
            let byte = src.read_u8()?;
            trace!("{:04x} - Run: {} x {:02x}", output.len(), count, byte);
            output.extend(iter::repeat(byte).take(count.min(remaining)));
        } else {
            let count = (flag & 0x7F) as usize + 1;
            let literals = src.read_bytes(count.min(remaining))?;
            trace!("{:04x} - Literals: {}", output.len(), literals.len());
            output.extend_from_slice(literals);
        }
    }

    Ok(output)
}

fn decode_huffman(
    src: &mut ByteReader,
    size: usize,
    width: SymbolWidth,
) -> Result<(Vec<u8>, CompressionInfo), CodecError> {
    let tree = HuffmanTree::read(src)?;
    debug!("Huffman tree: {}", tree);

    // whole words only; a missing word is truncated input
    let stream_start = src.position();
    let mut words = src.read_bytes(src.remaining() & !3)?.to_vec();
    swap_words(&mut words);
    let total_bits = words.len() * 8;
    let mut bits = BitReader::endian(Cursor::new(words), BigEndian);

    let mut output: Vec<u8> = Vec::with_capacity(size);
    // low nibble waiting for its high nibble
    let mut low: Option<u8> = None;
    let mut node = HuffmanTree::ROOT;
    let mut bits_read = 0;

    while output.len() < size {
        if bits_read == total_bits {
            return Err(CodecError::TruncatedInput {
                offset: stream_start + total_bits / 8,
                needed: 4,
            });
        }
        let bit = bits.read_bit()?;
        bits_read += 1;

        // `node` is always a branch
        node = match tree.step(node, bit) {
            Some(next) => next,
            None => {
                return Err(CodecError::CorruptTree {
                    position: node + 1,
                    table_len: tree.nodes().len(),
                })
            }
        };

        let sym = match tree.node(node) {
            Node::Leaf(sym) => sym,
            Node::Branch { .. } => continue,
            Node::Unused(..) => {
                return Err(CodecError::CorruptTree {
                    position: node + 1,
                    table_len: tree.nodes().len(),
                })
            }
        };
        node = HuffmanTree::ROOT;

        match width {
            SymbolWidth::Byte => output.push(sym),
            SymbolWidth::Nibble => match low.take() {
                Some(lo) => output.push(lo | (sym & 0xF) << 4),
                None => low = Some(sym & 0xF),
            },
        }
    }

    Ok((output, CompressionInfo::new(width, tree)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_overlapping_copy() -> Result<(), CodecError> {
        let compressed = [0x10, 0x09, 0x00, 0x00, 0x10, b'A', b'B', b'C', 0x30, 0x02, 0x00, 0x00];
        assert_eq!(decompress(&compressed)?, b"ABCABCABC");

        Ok(())
    }

    #[test]
    fn lzss_stops_mid_group() -> Result<(), CodecError> {
        // the rest of the flag asks for copybacks, but the first literal fills the output
        let compressed = [0x10, 0x01, 0x00, 0x00, 0x7F, 0xEE];
        assert_eq!(decompress(&compressed)?, [0xEE]);

        Ok(())
    }

    #[test]
    fn lzss_copy_before_start() {
        let compressed = [0x10, 0x08, 0x00, 0x00, 0x40, b'A', 0x50, 0x01];
        match decompress(&compressed) {
            Err(CodecError::BadLookBack {
                displacement,
                available,
            }) => {
                assert_eq!(displacement, 2);
                assert_eq!(available, 1);
            }
            other => panic!("expected bad lookback, got {:?}", other),
        }
    }

    #[test]
    fn decode_run_and_literals() -> Result<(), CodecError> {
        let compressed = [0x30, 0x06, 0x00, 0x00, 0x81, 0xAA, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00];
        assert_eq!(decompress(&compressed)?, [0xAA, 0xAA, 0xAA, 0xAA, 0x01, 0x02]);

        Ok(())
    }

    #[test]
    fn nibble_symbols_fill_low_first() -> Result<(), CodecError> {
        let compressed = [0x24, 0x02, 0x00, 0x00, 0x01, 0xC0, 0x02, 0x01, 0x00, 0x00, 0x00, 0xD0];
        let (data, info) = Decoder::for_bytes(&compressed).decode_with_info()?;
        assert_eq!(data, [0x11, 0x12]);
        assert_eq!(info.map(|i| i.symbol_width), Some(SymbolWidth::Nibble));

        Ok(())
    }

    #[test]
    fn huffman_needs_more_words() {
        // one word holds 32 one-bit symbols, but 33 are asked for
        let compressed = [0x28, 0x21, 0x00, 0x00, 0x01, 0xC0, 0x41, 0x42, 0x00, 0x00, 0x00, 0x69];
        assert!(matches!(
            decompress(&compressed),
            Err(CodecError::TruncatedInput { offset: 12, .. })
        ));
    }

    #[test]
    fn zero_size_is_an_error() {
        assert!(matches!(
            decompress(&[0x10, 0x00, 0x00, 0x00]),
            Err(CodecError::EmptyPayload)
        ));
    }

    #[test]
    fn info_without_decoding() -> Result<(), CodecError> {
        let compressed = [0x28, 0x08, 0x00, 0x00, 0x01, 0xC0, 0x41, 0x42];
        let (header, info) = compression_info(&compressed)?;
        assert_eq!(header.decompressed_size, 8);
        let tree = info.and_then(|i| i.tree).map(|t| t.to_string());
        assert_eq!(tree, Some("(0x41, 0x42)".into()));

        Ok(())
    }
}
