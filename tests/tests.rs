use nitrocomp::{
    ChunkSettings, CodecError, CompressionHeader, CompressionInfo, CompressionType, Decoder,
    Encoder, EntryMetadata, HuffmanTree, SymbolWidth,
};
use proptest::{collection::vec, prelude::*};
use std::iter;

// two leaf tree ('A' => 0, 'B' => 1) over one word of bits
const HUFFMAN_AB: [u8; 12] = [
    0x28, 0x08, 0x00, 0x00, 0x01, 0xC0, 0x41, 0x42, 0x00, 0x00, 0x00, 0x69,
];

#[test]
fn decode_huffman_fixture() {
    let decoded = nitrocomp::decompress(&HUFFMAN_AB).unwrap();
    assert_eq!(decoded, b"ABBABAAB");
}

#[test]
fn reencode_with_captured_tree() {
    let (decoded, info) = Decoder::for_bytes(&HUFFMAN_AB).decode_with_info().unwrap();

    let reencoded = Encoder::for_bytes(&decoded)
        .huffman(SymbolWidth::Byte)
        .with_info(info.as_ref())
        .encode_to_vec()
        .unwrap();

    assert_eq!(reencoded, HUFFMAN_AB, "captured tree did not reproduce the stream");
}

#[test]
fn run_length_scenario() {
    let input = [0xAA, 0xAA, 0xAA, 0xAA, 0x01, 0x02];
    let compressed = Encoder::for_bytes(&input).run_length().encode_to_vec().unwrap();

    assert_eq!(&compressed[4..9], &[0x81, 0xAA, 0x01, 0x01, 0x02]);
    assert_eq!(nitrocomp::decompress(&compressed).unwrap(), input);
}

#[test]
fn lzss_scenario() {
    let compressed = nitrocomp::compress_lzss(b"ABCABCABC").unwrap();
    let (header, info) = nitrocomp::compression_info(&compressed).unwrap();

    assert_eq!(header.serialize(), 0x0910);
    assert_eq!(info, None);
    assert_eq!(nitrocomp::decompress(&compressed).unwrap(), b"ABCABCABC");
}

#[test]
fn decode_bad_algorithm() {
    match nitrocomp::decompress(&[0x40, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]) {
        Err(CodecError::InvalidAlgorithm(4)) => (),
        other => panic!("Expected an invalid algorithm error, got {:?}", other),
    }
}

#[test]
fn decode_truncated_lzss() {
    // a copyback flag with only one of its two bytes
    let result = nitrocomp::decompress(&[0x10, 0x08, 0x00, 0x00, 0x40, 0x41, 0x50]);
    assert!(matches!(
        result,
        Err(CodecError::TruncatedInput { offset: 7, needed: 1 })
    ));
}

#[test]
fn decode_corrupt_tree() {
    // the root's children would be past the end of the table
    let result = nitrocomp::decompress(&[0x28, 0x04, 0x00, 0x00, 0x01, 0x3F, 0x41, 0x42]);
    assert!(matches!(result, Err(CodecError::CorruptTree { .. })));
}

#[test]
fn metadata_persists_as_json() {
    let settings = ChunkSettings::new(
        0x10,
        CompressionType::Huffman(SymbolWidth::Nibble),
        CompressionType::Lzss,
    );
    let payload: Vec<u8> = (0..0x30u8).map(|b| b % 5).collect();
    let (raw, metadata) =
        nitrocomp::compress_entry("data/test.bin", &payload, &settings, None).unwrap();

    let json = serde_json::to_string(&metadata).unwrap();
    let restored: EntryMetadata = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, metadata);
    assert_eq!(restored.settings(), settings);

    // the captured trees give back the same entry bytes
    let (decoded, captured) = nitrocomp::decompress_entry("data/test.bin", &raw).unwrap();
    assert_eq!(decoded, payload);
    let (again, _) = nitrocomp::compress_entry(
        "data/test.bin",
        &decoded,
        &captured.settings(),
        Some(&captured),
    )
    .unwrap();
    assert_eq!(again, raw);
}

#[test]
fn corrupt_metadata_is_rejected() {
    let settings = ChunkSettings::new(
        0x10,
        CompressionType::Huffman(SymbolWidth::Nibble),
        CompressionType::None,
    );
    let (_, metadata) =
        nitrocomp::compress_entry("data/test.bin", b"huffman", &settings, None).unwrap();
    let mut json = serde_json::to_value(&metadata).unwrap();

    let corrupt = [
        serde_json::json!([{ "Branch": { "left": 7, "right": 8 } }]),
        serde_json::json!([]),
    ];
    for nodes in &corrupt {
        json["chunks"][0]["outer"]["tree"]["nodes"] = nodes.clone();
        let err = serde_json::from_value::<EntryMetadata>(json.clone()).unwrap_err();
        assert!(
            err.to_string().contains("Huffman node"),
            "unexpected error: {}",
            err
        );
    }
}

#[test]
fn compress_entry_names_the_entry() {
    let settings = ChunkSettings::new(
        8,
        CompressionType::Huffman(SymbolWidth::Byte),
        CompressionType::None,
    );
    let err =
        nitrocomp::compress_entry("text/strings.bin", b"no tree", &settings, None).unwrap_err();

    assert_eq!(err.to_string(), "while compressing `text/strings.bin`");
    match err {
        CodecError::Compressing { source, .. } => {
            assert!(matches!(*source, CodecError::EncodeUnsupported(..)))
        }
        other => panic!("Expected entry context, got {:?}", other),
    }
}

/// Byte strings made of runs, so the run-length and LZSS encoders have something to find
fn runs() -> impl Strategy<Value = Vec<u8>> {
    vec((any::<u8>(), 1usize..40), 1..60).prop_map(|runs| {
        runs.into_iter()
            .flat_map(|(byte, len)| iter::repeat(byte).take(len))
            .collect()
    })
}

fn data() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        runs(),
        vec(any::<u8>(), 1..1500),
        vec(0u8..4, 1..3000),
    ]
}

fn plain_type() -> impl Strategy<Value = CompressionType> {
    prop_oneof![
        Just(CompressionType::None),
        Just(CompressionType::RunLength),
        Just(CompressionType::Lzss),
    ]
}

/// 8-bit tree for 'a' (00), 'b' (01), 'c' (10), and 'd' (11)
fn abcd_tree() -> CompressionInfo {
    let tree = HuffmanTree::from_table(&[0x00, 0xC0, 0xC1, b'a', b'b', b'c', b'd']).unwrap();
    CompressionInfo::new(SymbolWidth::Byte, tree)
}

proptest! {
    #[test]
    fn run_length_round_trip(input in data()) {
        let compressed = nitrocomp::compress_rle(&input).unwrap();
        prop_assert_eq!(compressed.len() % 4, 0);
        prop_assert_eq!(nitrocomp::decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn lzss_round_trip(input in data()) {
        let compressed = nitrocomp::compress_lzss(&input).unwrap();
        prop_assert_eq!(compressed.len() % 4, 0);
        prop_assert_eq!(nitrocomp::decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn nibble_huffman_round_trip(input in data()) {
        let (compressed, info) =
            nitrocomp::compress_huffman(&input, SymbolWidth::Nibble, None).unwrap();
        let (decoded, captured) = Decoder::for_bytes(&compressed).decode_with_info().unwrap();
        prop_assert_eq!(&decoded, &input);
        prop_assert_eq!(captured, Some(info));
    }

    #[test]
    fn huffman_with_existing_tree(input in vec(prop::sample::select(&b"abcd"[..]), 1..2000)) {
        let prior = abcd_tree();
        let (compressed, info) =
            nitrocomp::compress_huffman(&input, SymbolWidth::Byte, Some(&prior)).unwrap();
        prop_assert_eq!(&info, &prior);
        prop_assert_eq!(nitrocomp::decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn header_round_trip(
        data_size in 0u8..16,
        tag in 1u8..=3,
        size in 0u32..=CompressionHeader::MAX_DECOMPRESSED_SIZE,
    ) {
        let word = size << 8 | (tag as u32) << 4 | data_size as u32;
        let header = CompressionHeader::parse(word).unwrap();
        prop_assert_eq!(header.data_size, data_size);
        prop_assert_eq!(header.algorithm.tag(), tag);
        prop_assert_eq!(header.decompressed_size, size);
        prop_assert_eq!(CompressionHeader::parse(header.serialize()).unwrap(), header);
    }

    #[test]
    fn container_round_trip(
        input in prop_oneof![Just(Vec::new()), data()],
        max_chunk_size in 1u32..600,
        outer in plain_type(),
        inner in plain_type(),
    ) {
        let settings = ChunkSettings::new(max_chunk_size, outer, inner);
        let (raw, _) = nitrocomp::compress_entry("entry", &input, &settings, None).unwrap();
        let payload = nitrocomp::ChunkedPayload::from_bytes(&raw).unwrap();
        prop_assert!(payload.chunk_offsets.windows(2).all(|w| w[0] < w[1]));

        let (decoded, metadata) = nitrocomp::decompress_payload(&payload).unwrap();
        prop_assert_eq!(decoded, input);
        prop_assert_eq!(metadata.settings(), settings);
    }
}
