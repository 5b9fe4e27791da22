use std::fmt;

use log::trace;
use smallvec::SmallVec;

use crate::{
    cursor::ByteWriter,
    errors::CodecError,
    format::{Algorithm, CompressionHeader},
};

/// LZSS parameters fixed by the hardware decoder
///
/// | Parameter  | Bytes   | Stored as |
/// | ---------- | :-----: | --------- |
/// | Dictionary | 4096    | `displacement - 1` in 12 bits |
/// | Max Match  | 18      | `count - 3` in 4 bits |
/// | Min Match  | 3       | |
pub(crate) struct LzssSettings;

impl LzssSettings {
    pub(crate) const WINDOW_SIZE: usize = 0x1000;
    pub(crate) const MIN_MATCH: usize = 3;
    pub(crate) const MAX_MATCH: usize = 18;
    /// number of units described by one flag byte
    pub(crate) const GROUP_SIZE: usize = 8;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct MoveBack {
    pub size: usize,         // count
    pub displacement: usize, // offset
}

impl MoveBack {
    fn new(size: usize, displacement: usize) -> Self {
        Self { size, displacement }
    }

    /// The two byte copyback reference
    fn to_bytes(self) -> [u8; 2] {
        let count = (self.size - LzssSettings::MIN_MATCH) as u8;
        let disp = self.displacement - 1;

        [count << 4 | (disp >> 8) as u8 & 0xF, disp as u8]
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum LzssUnit {
    Uncoded(u8),
    Encoded(MoveBack),
}

impl LzssUnit {
    // total number of bytes this unit encodes from the uncoded input
    fn size(&self) -> usize {
        match self {
            Self::Uncoded(..) => 1,
            Self::Encoded(m) => m.size,
        }
    }
}

/// The greedy parse of an input into literal and copyback units
pub(crate) struct LzssPass<'a> {
    input: &'a [u8],
    csr: usize,
}

impl<'a> LzssPass<'a> {
    pub(crate) fn new(input: &'a [u8]) -> Self {
        Self { input, csr: 0 }
    }
}

impl Iterator for LzssPass<'_> {
    type Item = LzssUnit;

    fn next(&mut self) -> Option<Self::Item> {
        if self.csr >= self.input.len() {
            return None;
        }

        let unit = brute_find_match(self.input, self.csr)
            .map(LzssUnit::Encoded)
            .unwrap_or_else(|| LzssUnit::Uncoded(self.input[self.csr]));

        self.csr += unit.size();
        Some(unit)
    }
}

impl fmt::Display for LzssUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Uncoded(b) => write!(f, "Uncoded: {:02x}", b),
            Self::Encoded(m) => write!(
                f,
                "Encoded [Copyback]: size: {} mb: {}",
                m.size, m.displacement
            ),
        }
    }
}

/// Naive search for the longest match of the bytes at `pos` in the preceding window.
///
/// Candidates are checked from the nearest displacement outward, and only a strictly
/// longer match replaces the current best, so ties keep the smaller displacement.
/// A candidate may run into the bytes at `pos` itself ("self-matches"), as the
/// decoder copies one byte at a time.
fn brute_find_match(input: &[u8], pos: usize) -> Option<MoveBack> {
    let ahead = &input[pos..];
    let longest_match = ahead.len().min(LzssSettings::MAX_MATCH);
    let window_size = pos.min(LzssSettings::WINDOW_SIZE);

    if longest_match < LzssSettings::MIN_MATCH {
        return None;
    }

    let mut best: Option<MoveBack> = None;
    for displacement in 1..=window_size {
        let length = input[pos - displacement..]
            .iter()
            .zip(&ahead[..longest_match])
            .take_while(|(s, d)| s == d)
            .count();

        if length >= LzssSettings::MIN_MATCH && best.map_or(true, |b| length > b.size) {
            best = Some(MoveBack::new(length, displacement));
            if length == longest_match {
                break;
            }
        }
    }

    best
}

/// Compress `input` into an LZSS stream
pub fn compress_lzss(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let header = CompressionHeader::for_payload(Algorithm::Lzss, input.len())?;
    let mut wtr = ByteWriter::with_capacity(CompressionHeader::SIZE + input.len() * 9 / 8 + 4);
    header.write(&mut wtr)?;

    let mut group: SmallVec<[LzssUnit; LzssSettings::GROUP_SIZE]> = SmallVec::new();
    let mut position = 0;
    for unit in LzssPass::new(input) {
        trace!("{:04x} - {}", position, unit);
        position += unit.size();

        group.push(unit);
        if group.len() == LzssSettings::GROUP_SIZE {
            write_group(&mut wtr, &group)?;
            group.clear();
        }
    }
    if !group.is_empty() {
        write_group(&mut wtr, &group)?;
    }

    wtr.align4(0)?;
    Ok(wtr.into_inner())
}

/// Write a flag byte and the (up to eight) units it describes
fn write_group(wtr: &mut ByteWriter, group: &[LzssUnit]) -> Result<(), CodecError> {
    let site = wtr.reserve_u8()?;
    let mut flags = 0u8;

    for (i, unit) in group.iter().enumerate() {
        match *unit {
            LzssUnit::Uncoded(byte) => wtr.write_u8(byte)?,
            LzssUnit::Encoded(m) => {
                flags |= 0x80 >> i;
                wtr.write_bytes(&m.to_bytes())?;
            }
        }
    }

    wtr.patch_u8(site, flags);
    Ok(())
}
