use std::{collections::VecDeque, iter};

use bitstream_io::{BigEndian, BitWriter};
use log::{debug, warn};

use super::Frequency;
use crate::{
    cursor::ByteWriter,
    errors::CodecError,
    format::{
        pair_offset, swap_words, Algorithm, CodeMap, CompressionHeader, CompressionInfo,
        HuffmanTree, Node, SymbolWidth,
    },
};

type SymbolFreqs = [Frequency; 256];

/// Split `input` into its Huffman symbols: whole bytes, or the low then high nibble of each byte
pub(crate) fn symbols<'a>(
    input: &'a [u8],
    width: SymbolWidth,
) -> Box<dyn Iterator<Item = u8> + 'a> {
    match width {
        SymbolWidth::Byte => Box::new(input.iter().copied()),
        SymbolWidth::Nibble => Box::new(
            input
                .iter()
                .flat_map(|&b| iter::once(b & 0xF).chain(iter::once(b >> 4))),
        ),
    }
}

fn count_symbols(input: &[u8], width: SymbolWidth) -> SymbolFreqs {
    let mut freqs = [0; 256];
    for sym in symbols(input, width) {
        freqs[sym as usize] += 1;
    }
    freqs
}

/// Compress `input` into a Huffman stream.
///
/// If `prior` holds a tree of the same width with a code for every symbol in `input`,
/// that tree is reused as is. Otherwise, a new tree is built; this is only supported
/// for 4-bit symbols. The returned [`CompressionInfo`] holds the tree that was used.
pub fn compress_huffman(
    input: &[u8],
    width: SymbolWidth,
    prior: Option<&CompressionInfo>,
) -> Result<(Vec<u8>, CompressionInfo), CodecError> {
    let mut header = CompressionHeader::for_payload(Algorithm::Huffman, input.len())?;
    header.data_size = width.bits();

    let freqs = count_symbols(input, width);
    let tree = match reusable_tree(prior, width, &freqs)? {
        Some(tree) => {
            debug!("reusing captured {}-bit Huffman tree", width.bits());
            tree.clone()
        }
        None if width == SymbolWidth::Nibble => build_tree(&freqs)?,
        None => {
            return Err(CodecError::EncodeUnsupported(
                "new 8-bit Huffman trees cannot be built; reuse a tree captured on decode",
            ))
        }
    };
    debug!("Huffman tree: {}", tree);
    let codes = tree.code_map()?;

    let mut wtr =
        ByteWriter::with_capacity(CompressionHeader::SIZE + tree.nodes().len() + input.len() + 4);
    header.write(&mut wtr)?;
    tree.write(&mut wtr)?;
    write_bitstream(&mut wtr, symbols(input, width), &codes)?;
    wtr.align4(0)?;

    Ok((wtr.into_inner(), CompressionInfo::new(width, tree)))
}

fn reusable_tree<'a>(
    prior: Option<&'a CompressionInfo>,
    width: SymbolWidth,
    freqs: &SymbolFreqs,
) -> Result<Option<&'a HuffmanTree>, CodecError> {
    let tree = match prior {
        Some(CompressionInfo {
            symbol_width,
            tree: Some(tree),
        }) if *symbol_width == width => tree,
        _ => return Ok(None),
    };

    let codes = match tree.code_map() {
        Ok(codes) => codes,
        Err(e) => {
            warn!("captured Huffman tree cannot be reused: {}", e);
            return Ok(None);
        }
    };
    let missing = (0..=u8::MAX).find(|&sym| freqs[sym as usize] > 0 && !codes.contains(sym));
    if let Some(sym) = missing {
        warn!("captured Huffman tree has no code for {:#04x}; it cannot be reused", sym);
        return Ok(None);
    }

    Ok(Some(tree))
}

/// Write the codes for `symbols` as little endian words that are read from the top bit down
fn write_bitstream<I>(wtr: &mut ByteWriter, symbols: I, codes: &CodeMap) -> Result<(), CodecError>
where
    I: Iterator<Item = u8>,
{
    const WORD_BITS: u32 = 32;

    let mut packed = Vec::new();
    {
        let mut out = BitWriter::endian(&mut packed, BigEndian);
        let mut word_bits = 0;
        for sym in symbols {
            let code = codes.get(sym).ok_or(CodecError::MissingSymbol(sym))?;
            out.write(code.bitlen(), code.code)?;
            word_bits = (word_bits + code.bitlen()) % WORD_BITS;
        }
        if word_bits != 0 {
            out.write(WORD_BITS - word_bits, 0u32)?;
        }
    }

    swap_words(&mut packed);
    wtr.write_bytes(&packed)
}

#[derive(Debug, Clone, Copy)]
enum BuildNode {
    Leaf(u8),
    Branch { left: usize, right: usize },
}

/// A leaf or branch waiting in one of the two build queues
#[derive(Debug, Clone, Copy)]
struct Weighted {
    freq: Frequency,
    id: usize,
    leaf: bool,
}

/// Build a tree with the two queue method: leaves sorted by frequency (then symbol value),
/// and branches in the order they were made, which is also by frequency.
/// The two lowest nodes are repeatedly combined, with a leaf always on the left of a
/// branch that has exactly one leaf.
///
/// This reproduces the 4-bit trees found in game data, but not the 8-bit ones.
fn build_tree(freqs: &SymbolFreqs) -> Result<HuffmanTree, CodecError> {
    let mut syms: Vec<(Frequency, u8)> = freqs
        .iter()
        .enumerate()
        .filter(|&(_, &freq)| freq > 0)
        .map(|(sym, &freq)| (freq, sym as u8))
        .collect();
    syms.sort_unstable();

    match syms.len() {
        0 => return Err(CodecError::EmptyPayload),
        // a lone symbol still needs a root branch
        1 => syms.push(syms[0]),
        _ => (),
    }

    let mut arena: Vec<BuildNode> = Vec::with_capacity(syms.len() * 2);
    let mut leaves: VecDeque<Weighted> = VecDeque::with_capacity(syms.len());
    for (freq, sym) in syms {
        arena.push(BuildNode::Leaf(sym));
        leaves.push_back(Weighted {
            freq,
            id: arena.len() - 1,
            leaf: true,
        });
    }
    let mut branches: VecDeque<Weighted> = VecDeque::with_capacity(leaves.len());

    let root = loop {
        let first = pop_lowest(&mut leaves, &mut branches).ok_or(CodecError::EmptyPayload)?;
        let second = match pop_lowest(&mut leaves, &mut branches) {
            Some(second) => second,
            None => break first,
        };

        let (left, right) = if !first.leaf && second.leaf {
            (second, first)
        } else {
            (first, second)
        };
        arena.push(BuildNode::Branch {
            left: left.id,
            right: right.id,
        });
        branches.push_back(Weighted {
            freq: first.freq + second.freq,
            id: arena.len() - 1,
            leaf: false,
        });
    };

    layout_tree(&arena, root.id)
}

fn pop_lowest(
    leaves: &mut VecDeque<Weighted>,
    branches: &mut VecDeque<Weighted>,
) -> Option<Weighted> {
    // leaves win frequency ties
    let take_branch = match (leaves.front(), branches.front()) {
        (Some(leaf), Some(branch)) => branch.freq < leaf.freq,
        (None, Some(_)) => true,
        _ => false,
    };

    if take_branch {
        branches.pop_front()
    } else {
        leaves.pop_front()
    }
}

/// Place the built tree into table slots breadth first, with each branch's children
/// in the next free pair of slots
fn layout_tree(arena: &[BuildNode], root: usize) -> Result<HuffmanTree, CodecError> {
    const MAX_PAIR_OFFSET: usize = 0x3F;
    let filler = [Node::Unused(0), Node::Unused(0)];

    let mut nodes = vec![Node::Unused(0)];
    let mut queue = VecDeque::new();
    queue.push_back((root, HuffmanTree::ROOT));

    while let Some((build_id, slot)) = queue.pop_front() {
        match arena[build_id] {
            BuildNode::Leaf(sym) => nodes[slot] = Node::Leaf(sym),
            BuildNode::Branch { left, right } => {
                let pair = nodes.len();
                if pair_offset(slot, pair).map_or(true, |o| o > MAX_PAIR_OFFSET) {
                    return Err(CodecError::EncodeUnsupported(
                        "Huffman tree is too wide for its table",
                    ));
                }

                nodes[slot] = Node::Branch {
                    left: pair,
                    right: pair + 1,
                };
                nodes.extend(&filler);
                queue.push_back((left, pair));
                queue.push_back((right, pair + 1));
            }
        }
    }

    // header and count byte are five bytes, so keep the bitstream word aligned
    if (1 + nodes.len()) % 4 != 0 {
        nodes.extend(&filler);
    }

    Ok(HuffmanTree::from_nodes(nodes))
}
