use log::trace;

use crate::{
    cursor::ByteWriter,
    errors::CodecError,
    format::{Algorithm, CompressionHeader},
};

pub(crate) const COMPRESSED_FLAG: u8 = 0x80;
pub(crate) const MIN_RUN: usize = 3;
pub(crate) const MAX_RUN: usize = 0x7F + MIN_RUN;
pub(crate) const MAX_LITERALS: usize = 0x7F + 1;

/// length of the run of identical bytes at the start of `input`, up to [`MAX_RUN`]
fn run_length(input: &[u8]) -> usize {
    input
        .first()
        .map(|&first| {
            input
                .iter()
                .take(MAX_RUN)
                .take_while(|&&b| b == first)
                .count()
        })
        .unwrap_or(0)
}

/// Compress `input` into a run-length stream
pub fn compress_rle(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let header = CompressionHeader::for_payload(Algorithm::RunLength, input.len())?;
    let mut wtr =
        ByteWriter::with_capacity(CompressionHeader::SIZE + input.len() + input.len() / 128 + 4);
    header.write(&mut wtr)?;

    let mut literal_start = 0;
    let mut csr = 0;
    while csr < input.len() {
        let run = run_length(&input[csr..]);
        if run >= MIN_RUN {
            write_literals(&mut wtr, &input[literal_start..csr])?;
            trace!("{:04x} - Run: {} x {:02x}", csr, run, input[csr]);
            wtr.write_u8(COMPRESSED_FLAG | (run - MIN_RUN) as u8)?;
            wtr.write_u8(input[csr])?;

            csr += run;
            literal_start = csr;
        } else {
            csr += 1;
        }
    }
    write_literals(&mut wtr, &input[literal_start..])?;

    wtr.align4(0)?;
    Ok(wtr.into_inner())
}

fn write_literals(wtr: &mut ByteWriter, literals: &[u8]) -> Result<(), CodecError> {
    for chunk in literals.chunks(MAX_LITERALS) {
        trace!("Literals: {:02x?}", chunk);
        wtr.write_u8((chunk.len() - 1) as u8)?;
        wtr.write_bytes(chunk)?;
    }

    Ok(())
}
