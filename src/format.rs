//! Information and structures shared by the compressed data formats.
//!
//! ## Header
//! Every compressed stream starts with a four byte, little endian header word:
//!
//! | Bits  | Description |
//! | :---: | ----------- |
//! | 0..4  | data size: the Huffman symbol width (4 or 8), unused otherwise |
//! | 4..8  | algorithm (1 => LZSS; 2 => Huffman; 3 => Run-length) |
//! | 8..32 | size of the decompressed data in bytes |
//!
//! So, a nine byte LZSS stream has the header word `0x0910`.
//!
//! ## Huffman Tree Table
//! A Huffman stream stores its tree after the header as a one byte count `n`
//! followed by `2n + 1` table bytes. The first table byte is the root. Positions
//! are counted from the count byte, so the root is at position 1.
//!
//! A branch byte holds a six bit pair offset `P` in its low bits. Its left child
//! is at `(position & !1) + 2 * (P + 1)` and its right child directly follows the left.
//! Bit 7 is set if the left child is a leaf, and bit 6 is set if the right child is a leaf.
//! A leaf's byte is its symbol.
//!
//! For example, the table `01 C0 41 42` is a root with the leaves `0x41` (code `0`)
//! and `0x42` (code `1`).

use crate::{
    cursor::{ByteReader, ByteWriter},
    errors::CodecError,
};
use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt};

/// The compression algorithm tagged in a [`CompressionHeader`]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    Lzss = 1,
    Huffman = 2,
    RunLength = 3,
}

impl Algorithm {
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Algorithm {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Self::Lzss),
            2 => Ok(Self::Huffman),
            3 => Ok(Self::RunLength),
            unk => Err(CodecError::InvalidAlgorithm(unk)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Lzss => write!(f, "LZSS"),
            Self::Huffman => write!(f, "Huffman"),
            Self::RunLength => write!(f, "Run-length"),
        }
    }
}

/// Number of bits in each Huffman coded symbol
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SymbolWidth {
    /// Each byte is coded as two symbols, low nibble first
    Nibble = 4,
    Byte = 8,
}

impl SymbolWidth {
    #[inline]
    pub const fn bits(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SymbolWidth {
    type Error = CodecError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            4 => Ok(Self::Nibble),
            8 => Ok(Self::Byte),
            unk => Err(CodecError::InvalidSymbolWidth(unk)),
        }
    }
}

/// The header word at the start of every compressed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompressionHeader {
    /// Huffman symbol width; only the low four bits are stored
    pub data_size: u8,
    pub algorithm: Algorithm,
    /// size of decompressed data
    pub decompressed_size: u32,
}

impl CompressionHeader {
    pub const SIZE: usize = 4;
    pub const MAX_DECOMPRESSED_SIZE: u32 = 0x00FF_FFFF;

    /// Create the header for compressing `len` bytes with `algorithm`
    pub fn for_payload(algorithm: Algorithm, len: usize) -> Result<Self, CodecError> {
        if len == 0 {
            return Err(CodecError::EmptyPayload);
        }
        if len > Self::MAX_DECOMPRESSED_SIZE as usize {
            return Err(CodecError::PayloadTooLarge(len));
        }

        Ok(Self {
            data_size: 0,
            algorithm,
            decompressed_size: len as u32,
        })
    }

    pub fn parse(word: u32) -> Result<Self, CodecError> {
        let data_size = (word & 0xF) as u8;
        let algorithm = Algorithm::try_from(((word >> 4) & 0xF) as u8)?;
        let decompressed_size = word >> 8;

        Ok(Self {
            data_size,
            algorithm,
            decompressed_size,
        })
    }

    pub fn serialize(&self) -> u32 {
        (self.decompressed_size & Self::MAX_DECOMPRESSED_SIZE) << 8
            | (self.algorithm.tag() as u32) << 4
            | (self.data_size & 0xF) as u32
    }

    /// The Huffman symbol width stored in `data_size`
    pub fn symbol_width(&self) -> Result<SymbolWidth, CodecError> {
        SymbolWidth::try_from(self.data_size)
    }

    pub(crate) fn read(rdr: &mut ByteReader) -> Result<Self, CodecError> {
        rdr.read_u32().and_then(Self::parse)
    }

    pub(crate) fn write(&self, wtr: &mut ByteWriter) -> Result<(), CodecError> {
        wtr.write_u32(self.serialize())
    }
}

/// Index of a node in a [`HuffmanTree`]; equal to its slot in the tree table
pub type NodeId = usize;

/// A Huffman tree node or leaf designed to be stored in an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Node {
    Leaf(u8),
    /// `right` is always the slot after `left`
    Branch { left: NodeId, right: NodeId },
    /// A table byte that no branch points at
    Unused(u8),
}

/// An array based Huffman tree laid out exactly as its tree table
///
/// Slot 0 is the root, and the children of every branch are a pair of adjacent slots.
/// Keeping the layout (along with any unreferenced bytes) means a tree captured
/// from a stream is written back byte for byte.
///
/// A deserialized tree is checked the same way as a parsed table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TreeNodes")]
pub struct HuffmanTree {
    nodes: Vec<Node>,
}

/// Unchecked serialized form of a [`HuffmanTree`]
#[derive(Deserialize)]
struct TreeNodes {
    nodes: Vec<Node>,
}

impl TryFrom<TreeNodes> for HuffmanTree {
    type Error = CodecError;

    /// Accept `nodes` only if they are exactly what their own table parses to
    fn try_from(TreeNodes { nodes }: TreeNodes) -> Result<Self, Self::Error> {
        let unchecked = Self { nodes };
        let parsed = Self::from_table(&unchecked.to_table()?)?;
        if parsed != unchecked {
            return Err(CodecError::CorruptTree {
                position: 0,
                table_len: unchecked.nodes.len(),
            });
        }

        Ok(parsed)
    }
}

impl HuffmanTree {
    pub const ROOT: NodeId = 0;
    const MAX_PAIR_OFFSET: usize = 0x3F;
    const LEFT_IS_LEAF: u8 = 0x80;
    const RIGHT_IS_LEAF: u8 = 0x40;

    /// Create a tree from already laid out `nodes`. The layout is checked when the
    /// tree is serialized.
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Parse the table bytes that follow the count byte
    pub fn from_table(table: &[u8]) -> Result<Self, CodecError> {
        let table_len = table.len();
        if table.is_empty() {
            return Err(CodecError::CorruptTree {
                position: 1,
                table_len,
            });
        }

        let mut nodes: Vec<Node> = table.iter().copied().map(Node::Unused).collect();
        // each slot may have only one parent
        let mut reached = vec![false; table_len];
        reached[Self::ROOT] = true;
        // every branch points at (strictly) later slots, so this always ends
        let mut pending = vec![Self::ROOT];

        while let Some(id) = pending.pop() {
            let byte = table[id];
            let left = pair_start(id, byte & Self::MAX_PAIR_OFFSET as u8);
            let right = left + 1;
            if right >= table_len {
                return Err(CodecError::CorruptTree {
                    position: id + 1,
                    table_len,
                });
            }

            nodes[id] = Node::Branch { left, right };

            let children = [
                (left, byte & Self::LEFT_IS_LEAF != 0),
                (right, byte & Self::RIGHT_IS_LEAF != 0),
            ];
            for &(child, is_leaf) in &children {
                if reached[child] {
                    return Err(CodecError::CorruptTree {
                        position: child + 1,
                        table_len,
                    });
                }
                reached[child] = true;

                if is_leaf {
                    nodes[child] = Node::Leaf(table[child]);
                } else {
                    pending.push(child);
                }
            }
        }

        Ok(Self { nodes })
    }

    /// Read a count byte and its tree table
    pub(crate) fn read(rdr: &mut ByteReader) -> Result<Self, CodecError> {
        let count = rdr.read_u8()? as usize;
        rdr.read_bytes(2 * count + 1).and_then(Self::from_table)
    }

    /// Serialize the tree into its table bytes (without the count byte)
    pub fn to_table(&self) -> Result<Vec<u8>, CodecError> {
        let table_len = self.nodes.len();
        let corrupt = |id: NodeId| CodecError::CorruptTree {
            position: id + 1,
            table_len,
        };

        self.nodes
            .iter()
            .enumerate()
            .map(|(id, node)| match *node {
                Node::Leaf(sym) | Node::Unused(sym) => Ok(sym),
                Node::Branch { left, right } => {
                    let offset = pair_offset(id, left)
                        .filter(|&o| o <= Self::MAX_PAIR_OFFSET)
                        .filter(|_| right == left + 1 && right < table_len)
                        .ok_or_else(|| corrupt(id))?;
                    let mut byte = offset as u8;
                    if let Node::Leaf(..) = self.nodes[left] {
                        byte |= Self::LEFT_IS_LEAF;
                    }
                    if let Node::Leaf(..) = self.nodes[right] {
                        byte |= Self::RIGHT_IS_LEAF;
                    }
                    Ok(byte)
                }
            })
            .collect()
    }

    /// Write the count byte and tree table
    pub(crate) fn write(&self, wtr: &mut ByteWriter) -> Result<(), CodecError> {
        let table = self.to_table()?;
        if table.len() % 2 == 0 || table.len() > 2 * u8::MAX as usize + 1 {
            return Err(CodecError::CorruptTree {
                position: 0,
                table_len: table.len(),
            });
        }

        wtr.write_u8((table.len() / 2) as u8)?;
        wtr.write_bytes(&table)
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> Node {
        self.nodes[id]
    }

    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Follow one bit from the branch `id`. Returns `None` if `id` is not a branch.
    #[inline]
    pub fn step(&self, id: NodeId, bit: bool) -> Option<NodeId> {
        match self.nodes[id] {
            Node::Branch { right, .. } if bit => Some(right),
            Node::Branch { left, .. } => Some(left),
            _ => None,
        }
    }

    /// Generate the Huffman code of every symbol that has a leaf in the tree
    pub fn code_map(&self) -> Result<CodeMap, CodecError> {
        let mut map = CodeMap::new();
        let mut pending = vec![(Self::ROOT, HuffCode::new())];

        while let Some((id, prefix)) = pending.pop() {
            match self.nodes[id] {
                Node::Branch { left, right } => {
                    // push right first so the left side is visited first
                    for &(child, bit) in &[(right, true), (left, false)] {
                        let code = match (prefix.extend(bit), self.nodes[child]) {
                            (Some(code), _) => code,
                            (None, Node::Leaf(sym)) => return Err(CodecError::CodeTooLong(sym)),
                            (None, _) => continue,
                        };
                        pending.push((child, code));
                    }
                }
                Node::Leaf(sym) => map.insert(sym, prefix),
                Node::Unused(..) => (),
            }
        }

        Ok(map)
    }

    fn format_node(&self, id: NodeId, f: &mut fmt::Formatter) -> fmt::Result {
        match self.nodes[id] {
            Node::Leaf(val) | Node::Unused(val) => write!(f, "{:#04x}", val),
            Node::Branch { left, right } => {
                write!(f, "(")?;
                self.format_node(left, f)?;
                write!(f, ", ")?;
                self.format_node(right, f)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for HuffmanTree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.nodes.is_empty() {
            write!(f, "()")
        } else {
            self.format_node(Self::ROOT, f)
        }
    }
}

/// first slot of the child pair for the branch in slot `id`
#[inline]
const fn pair_start(id: NodeId, offset: u8) -> NodeId {
    // in table positions (slot + 1): (position & !1) + 2 * (offset + 1)
    ((id + 1) & !1) + 2 * offset as usize + 1
}

/// the pair offset that points the branch in slot `id` at the pair starting at `left`
#[inline]
pub(crate) fn pair_offset(id: NodeId, left: NodeId) -> Option<usize> {
    left.checked_sub(pair_start(id, 0))
        .filter(|d| d % 2 == 0)
        .map(|d| d / 2)
}

/// Huffman bitstreams are little endian words consumed from the top bit down.
/// Reversing the bytes of every word gives the same bits in plain MSB-first byte order.
pub(crate) fn swap_words(buf: &mut [u8]) {
    for word in buf.chunks_exact_mut(4) {
        word.reverse();
    }
}

type BitCodeBacking = u32;

/// A Huffman code of up to 32 bits, stored right aligned
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HuffCode {
    pub code: BitCodeBacking,
    size: u8,
}

impl HuffCode {
    const MAX_SIZE: usize = std::mem::size_of::<BitCodeBacking>() * 8;

    fn new() -> Self {
        Self { code: 0, size: 0 }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.size as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline(always)]
    pub fn bitlen(&self) -> u32 {
        self.size as u32
    }

    fn extend(self, bit: bool) -> Option<Self> {
        if self.len() >= Self::MAX_SIZE {
            return None;
        }

        Some(Self {
            code: self.code << 1 | bit as BitCodeBacking,
            size: self.size + 1,
        })
    }
}

impl fmt::Display for HuffCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:0width$b}", self.code, width = self.len())
    }
}

/// symbol => Huffman code
#[derive(Debug, Clone)]
pub struct CodeMap {
    codes: [Option<HuffCode>; 256],
}

impl CodeMap {
    fn new() -> Self {
        Self { codes: [None; 256] }
    }

    fn insert(&mut self, sym: u8, code: HuffCode) {
        // a corrupt table can reach a leaf through more than one branch;
        // the first (leftmost) path wins
        self.codes[sym as usize].get_or_insert(code);
    }

    #[inline]
    pub fn get(&self, sym: u8) -> Option<HuffCode> {
        self.codes[sym as usize]
    }

    #[inline]
    pub fn contains(&self, sym: u8) -> bool {
        self.codes[sym as usize].is_some()
    }
}

/// Captured compression details that let a future encode reproduce the original bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub symbol_width: SymbolWidth,
    pub tree: Option<HuffmanTree>,
}

impl CompressionInfo {
    pub fn new(symbol_width: SymbolWidth, tree: HuffmanTree) -> Self {
        Self {
            symbol_width,
            tree: Some(tree),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_words() -> Result<(), CodecError> {
        let header = CompressionHeader::for_payload(Algorithm::Lzss, 9)?;
        assert_eq!(header.serialize(), 0x0910);
        assert_eq!(CompressionHeader::parse(0x0910)?, header);

        let huff = CompressionHeader::parse(0x0102_0028)?;
        assert_eq!(huff.algorithm, Algorithm::Huffman);
        assert_eq!(huff.symbol_width()?, SymbolWidth::Byte);
        assert_eq!(huff.decompressed_size, 0x010200);

        Ok(())
    }

    #[test]
    fn unknown_algorithm_is_an_error() {
        for &word in &[0x0900, 0x0940, 0x09F0] {
            match CompressionHeader::parse(word) {
                Err(CodecError::InvalidAlgorithm(tag)) => assert_eq!(tag as u32, (word >> 4) & 0xF),
                other => panic!("expected invalid algorithm for {:#x}, got {:?}", word, other),
            }
        }
    }

    #[test]
    fn payload_size_limits() {
        assert!(matches!(
            CompressionHeader::for_payload(Algorithm::RunLength, 0),
            Err(CodecError::EmptyPayload)
        ));
        assert!(matches!(
            CompressionHeader::for_payload(Algorithm::RunLength, 0x0100_0000),
            Err(CodecError::PayloadTooLarge(0x0100_0000))
        ));
    }

    #[test]
    fn parse_two_leaf_table() -> Result<(), CodecError> {
        let tree = HuffmanTree::from_table(&[0xC0, 0x41, 0x42])?;
        assert_eq!(
            tree.nodes(),
            &[
                Node::Branch { left: 1, right: 2 },
                Node::Leaf(0x41),
                Node::Leaf(0x42)
            ]
        );
        assert_eq!(tree.to_string(), "(0x41, 0x42)");

        let map = tree.code_map()?;
        assert_eq!(map.get(0x41).map(|c| (c.code, c.len())), Some((0b0, 1)));
        assert_eq!(map.get(0x42).map(|c| (c.code, c.len())), Some((0b1, 1)));
        assert!(!map.contains(0x43));

        Ok(())
    }

    #[test]
    fn parse_nested_table() -> Result<(), CodecError> {
        // root: left leaf 'a', right branch at slot 2
        // slot 2 (position 3): pair offset 0 => positions 4, 5 => slots 3, 4
        let table = [0x80, b'a', 0xC0, b'b', b'c'];
        let tree = HuffmanTree::from_table(&table)?;
        assert_eq!(tree.to_string(), "(0x61, (0x62, 0x63))");

        let map = tree.code_map()?;
        let codes: Vec<_> = [b'a', b'b', b'c']
            .iter()
            .map(|&s| map.get(s).map(|c| c.to_string()))
            .collect();
        assert_eq!(
            codes,
            vec![Some("0".into()), Some("10".into()), Some("11".into())]
        );
        assert_eq!(tree.to_table()?, table);

        Ok(())
    }

    #[test]
    fn unreferenced_slots_survive() -> Result<(), CodecError> {
        let table = [0xC0, 0x01, 0x02, 0xEE, 0x77];
        let tree = HuffmanTree::from_table(&table)?;
        assert_eq!(tree.node(3), Node::Unused(0xEE));

        let mut wtr = ByteWriter::new();
        tree.write(&mut wtr)?;
        assert_eq!(wtr.as_slice(), &[0x02, 0xC0, 0x01, 0x02, 0xEE, 0x77]);

        Ok(())
    }

    #[test]
    fn out_of_range_pair_is_corrupt() {
        // root points past the end of a three byte table
        let table = [0xC1, 0x01, 0x02];
        assert!(matches!(
            HuffmanTree::from_table(&table),
            Err(CodecError::CorruptTree { position: 1, .. })
        ));
        // inner branch at slot 2 points past the end
        let table = [0x80, 0x01, 0x05, 0x02, 0x03];
        assert!(matches!(
            HuffmanTree::from_table(&table),
            Err(CodecError::CorruptTree { position: 3, .. })
        ));
        assert!(HuffmanTree::from_table(&[]).is_err());
    }

    #[test]
    fn shared_children_are_corrupt() {
        // slots 1 and 2 both point at the pair in slots 3 and 4
        let table = [0x00, 0xC0, 0xC0, 0x41, 0x42];
        assert!(matches!(
            HuffmanTree::from_table(&table),
            Err(CodecError::CorruptTree { position: 4, .. })
        ));
    }

    #[test]
    fn deserialize_checks_the_layout() {
        let json = r#"{"nodes":[{"Branch":{"left":1,"right":2}},{"Leaf":65},{"Leaf":66}]}"#;
        let tree: HuffmanTree = serde_json::from_str(json).unwrap();
        assert_eq!(tree.to_string(), "(0x41, 0x42)");

        let bad = [
            r#"{"nodes":[{"Branch":{"left":7,"right":8}}]}"#,
            r#"{"nodes":[]}"#,
            // a leaf that no branch points at
            r#"{"nodes":[{"Branch":{"left":1,"right":2}},{"Leaf":65},{"Leaf":66},{"Leaf":67}]}"#,
        ];
        for json in &bad {
            let err = serde_json::from_str::<HuffmanTree>(json).unwrap_err();
            assert!(err.to_string().contains("Huffman node"), "{}: {}", json, err);
        }
    }
}
