//! End-to-end decoding tests

use crate::abbrev::AbbrevOperand;
use crate::container::FourCC;
use crate::ids::{BLOCKINFO_CODE_SETBID, module_code};
use crate::test_utils::{BitstreamWriter, build_container, build_dxil_part, build_wrapper};
use crate::tree::TreeNode;
use crate::types::type_code;
use crate::{
    BitReader, BitcodeSource, DecodeBuilder, DecodeFlags, Error, ModuleProgress, NoTrace,
    StreamCursor, decode, decode_container, read_input,
};
use pretty_assertions::assert_eq;

/// Every node's range covers its children, and siblings appear in stream order.
fn assert_ranges_nest(node: &TreeNode) {
    let mut previous_start = 0;
    for child in &node.children {
        if let (Some(outer), Some(inner)) = (node.range, child.range) {
            assert!(
                outer.start <= inner.start && inner.end <= outer.end,
                "{:?} {outer} does not cover {:?} {inner}",
                node.label,
                child.label
            );
        }
        if let Some(range) = child.range {
            assert!(
                range.start >= previous_start,
                "{:?} starts before its previous sibling",
                child.label
            );
            previous_start = range.start;
        }
        assert_ranges_nest(child);
    }
}

fn minimal_module() -> Vec<u8> {
    let mut writer = BitstreamWriter::new();
    writer.emit_magic();
    writer.enter_subblock(8, 3);
    writer.emit_unabbrev_record(module_code::VERSION, &[1]);
    writer.end_block();
    writer.emit_stray_end_block();
    writer.finish()
}

/// A module with one defined function `main`, its symbol table placed before
/// the body when `vst_first` is set.
fn module_with_function(vst_first: bool) -> Vec<u8> {
    let emit_vst = |writer: &mut BitstreamWriter| {
        writer.enter_subblock(14, 4);
        writer.emit_string_record(1, "\0main");
        writer.end_block();
    };

    let mut writer = BitstreamWriter::new();
    writer.emit_magic();
    writer.enter_subblock(8, 3);
    writer.emit_unabbrev_record(module_code::VERSION, &[1]);
    writer.enter_subblock(17, 4);
    writer.emit_unabbrev_record(type_code::NUMENTRY, &[3]);
    writer.emit_unabbrev_record(type_code::VOID, &[]);
    writer.emit_unabbrev_record(type_code::FUNCTION, &[0, 0]);
    writer.emit_unabbrev_record(type_code::POINTER, &[1, 0]);
    writer.end_block();
    writer.emit_unabbrev_record(module_code::FUNCTION, &[2, 0, 0, 0, 0, 0, 0, 0]);
    if vst_first {
        emit_vst(&mut writer);
    }
    writer.enter_subblock(12, 4);
    writer.emit_unabbrev_record(1, &[1]);
    writer.emit_unabbrev_record(10, &[]);
    writer.end_block();
    if !vst_first {
        emit_vst(&mut writer);
    }
    writer.end_block();
    writer.finish()
}

#[test]
fn test_minimal_module() {
    let bytes = minimal_module();
    let (tree, error) = decode(&bytes, 0, bytes.len() as u64 * 8);
    assert!(error.is_none(), "{error:?}");

    let module = tree.find("Module Block").unwrap();
    let records: Vec<&TreeNode> = module
        .children
        .iter()
        .filter(|child| !child.children.is_empty())
        .collect();
    assert_eq!(records.len(), 1);
    assert!(records[0].label.starts_with("VERSION [1]"));
    assert_ranges_nest(&tree);
}

#[test]
fn test_tree_covers_the_stream() {
    let bytes = module_with_function(false);
    let result = DecodeBuilder::new(&bytes).decode();
    assert!(result.is_ok(), "{:?}", result.error);

    let range = result.tree.range.unwrap();
    assert_eq!(range.start, 0);
    assert_eq!(range.end, bytes.len() as u64 * 8);
    assert_ranges_nest(&result.tree);
}

#[test]
fn test_altered_signature() {
    let mut bytes = minimal_module();
    bytes[2] = 0xC1;

    let (tree, error) = decode(&bytes, 0, bytes.len() as u64 * 8);
    assert!(matches!(error, Some(Error::MalformedSignature)));
    assert!(tree.find("error: ").is_some());

    let mut cursor = StreamCursor::new(BitReader::new(&bytes), NoTrace);
    assert!(cursor.read_signature().is_err());
    assert_eq!(cursor.bit_position(), 32);
}

#[test]
fn test_unknown_block_in_module_is_skipped() {
    let mut writer = BitstreamWriter::new();
    writer.emit_magic();
    writer.enter_subblock(8, 3);
    writer.enter_subblock(99, 5);
    writer.emit_unabbrev_record(1, &[1, 2, 3]);
    writer.emit_unabbrev_record(2, &[4]);
    writer.end_block();
    writer.end_block();
    let bytes = writer.finish();

    let (tree, error) = decode(&bytes, 0, bytes.len() as u64 * 8);
    assert!(error.is_none(), "{error:?}");

    // magic, module header, module length, block 99 header, block 99 length
    let words = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let skipped = tree.find("Block 99 (skipped)").unwrap();
    let leaves: Vec<&TreeNode> = skipped.children_labelled("skipped").collect();
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].label, format!("skipped {words} words"));
    assert_eq!(leaves[0].range.unwrap().len(), u64::from(words) * 32);
}

/// BLOCKINFO giving block 18 one abbreviation: literal code 5, one fixed(8)
/// operand.
fn emit_block_info(writer: &mut BitstreamWriter) {
    writer.enter_subblock(0, 2);
    writer.emit_unabbrev_record(BLOCKINFO_CODE_SETBID, &[18]);
    writer.emit_define_abbrev(&[AbbrevOperand::Literal(5), AbbrevOperand::Fixed(8)]);
    writer.end_block();
}

#[test]
fn test_block_info_abbrevs_apply_to_their_block() {
    let mut writer = BitstreamWriter::new();
    writer.emit_magic();
    emit_block_info(&mut writer);
    writer.enter_subblock(8, 3);
    writer.enter_subblock(18, 3);
    writer.emit_abbrev_id(4);
    writer.emit(42, 8);
    writer.end_block();
    writer.end_block();
    let bytes = writer.finish();

    let (tree, error) = decode(&bytes, 0, bytes.len() as u64 * 8);
    assert!(error.is_none(), "{error:?}");
    let block = tree.find("UseList Block").unwrap();
    assert!(block.find("record 5 [42]").is_some());
}

#[test]
fn test_block_info_abbrevs_do_not_apply_to_other_blocks() {
    let mut writer = BitstreamWriter::new();
    writer.emit_magic();
    emit_block_info(&mut writer);
    writer.enter_subblock(8, 3);
    writer.enter_subblock(16, 3);
    writer.emit_abbrev_id(4);
    writer.emit(42, 8);
    writer.end_block();
    writer.end_block();
    let bytes = writer.finish();

    let (tree, error) = decode(&bytes, 0, bytes.len() as u64 * 8);
    assert!(matches!(error, Some(Error::InvalidRecord(_))));
    assert!(tree.find("MetadataAttachment Block [incomplete]").is_some());
}

#[test]
fn test_local_abbrevs_end_with_their_block() {
    let mut writer = BitstreamWriter::new();
    writer.emit_magic();
    writer.enter_subblock(8, 3);
    writer.enter_subblock(16, 3);
    writer.emit_define_abbrev(&[AbbrevOperand::Literal(5), AbbrevOperand::Fixed(8)]);
    writer.emit_abbrev_id(4);
    writer.emit(1, 8);
    writer.end_block();
    writer.enter_subblock(16, 3);
    writer.emit_abbrev_id(4);
    writer.emit(2, 8);
    writer.end_block();
    writer.end_block();
    let bytes = writer.finish();

    let (_, error) = decode(&bytes, 0, bytes.len() as u64 * 8);
    assert!(matches!(error, Some(Error::InvalidRecord(_))));
}

#[test]
fn test_function_bodies_materialize_by_default() {
    let bytes = module_with_function(true);
    let result = DecodeBuilder::new(&bytes).decode();
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.progress, Some(ModuleProgress::Complete));

    let bodies = result.tree.find("Function Bodies").unwrap();
    let body = bodies.find("Function Body 0 @main").unwrap();
    assert!(body.find("DECLAREBLOCKS [1]").is_some());
    assert!(body.find("INST_RET").is_some());
    assert!(result.module.function_bodies[0].materialized);
    assert_ranges_nest(&result.tree);
}

#[test]
fn test_stop_at_suspend() {
    let bytes = module_with_function(true);
    let result = DecodeBuilder::new(&bytes)
        .flags(DecodeFlags::STOP_AT_SUSPEND)
        .decode();
    assert!(result.is_ok(), "{:?}", result.error);
    assert!(matches!(
        result.progress,
        Some(ModuleProgress::Suspended { .. })
    ));
    assert!(result.tree.find("Function Bodies").is_none());
    assert!(!result.module.function_bodies[0].materialized);
}

#[test]
fn test_lazy_decode_leaves_bodies_unparsed() {
    let bytes = module_with_function(false);
    let result = DecodeBuilder::new(&bytes)
        .flags(DecodeFlags::empty())
        .decode();
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.progress, Some(ModuleProgress::Complete));
    assert!(result.tree.find("Function Bodies").is_none());
    assert!(result.tree.find("Function Block (deferred body 0)").is_some());
    assert_eq!(result.module.functions[0].name.as_deref(), Some("main"));
}

#[test]
fn test_truncated_stream_keeps_partial_tree() {
    let mut writer = BitstreamWriter::new();
    writer.emit_magic();
    writer.enter_subblock(8, 3);
    writer.emit_unabbrev_record(module_code::VERSION, &[1]);
    writer.emit_string_record(module_code::TRIPLE, "dxil-ms-dx");
    writer.end_block();
    let mut bytes = writer.finish();
    bytes.truncate(16);

    let result = DecodeBuilder::new(&bytes).decode();
    assert!(matches!(result.error, Some(Error::StreamTruncated { .. })));
    assert_eq!(result.module.version, Some(1));

    let module = result.tree.find("Module Block [incomplete]").unwrap();
    assert!(module.find("VERSION [1]").is_some());
    assert!(result.tree.find("error: ").is_some());
}

#[test]
fn test_stream_without_module() {
    let mut writer = BitstreamWriter::new();
    writer.emit_magic();
    let bytes = writer.finish();

    let (_, error) = decode(&bytes, 0, bytes.len() as u64 * 8);
    assert!(matches!(error, Some(Error::MalformedBlock(_))));
}

#[test]
fn test_window_outside_buffer() {
    let bytes = minimal_module();
    let (tree, error) = decode(&bytes, 64, bytes.len() as u64 * 8);
    assert!(matches!(error, Some(Error::StreamTruncated { .. })));
    assert!(tree.find("error: ").is_some());
}

#[test]
fn test_decode_window_inside_buffer() {
    let bitcode = minimal_module();
    let mut bytes = vec![0xAA; 8];
    bytes.extend_from_slice(&bitcode);

    let (tree, error) = decode(&bytes, 64, bitcode.len() as u64 * 8);
    assert!(error.is_none(), "{error:?}");
    assert_eq!(tree.range.unwrap().start, 64);
}

#[test]
fn test_decode_dxbc_container() {
    let bitcode = module_with_function(false);
    let part = build_dxil_part(&bitcode, 0x60, 0x100);
    let flags = [0u8; 8];
    let bytes = build_container(&[(FourCC(*b"SFI0"), &flags[..]), (FourCC::DXIL, &part[..])]);

    let result = decode_container(&bytes).unwrap();
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.tree.label, "DXBC part DXIL ps_6_0");
    assert_eq!(result.module.version, Some(1));

    let location = result.location.unwrap();
    assert_eq!(location.source, BitcodeSource::Dxbc(FourCC::DXIL));
    assert_eq!(location.length_bits, bitcode.len() as u64 * 8);
    assert_eq!(result.tree.range.unwrap().start, location.start_bit);
    assert_ranges_nest(&result.tree);
}

#[test]
fn test_decode_wrapped_bitcode() {
    let bitcode = minimal_module();
    let bytes = build_wrapper(&bitcode);

    let result = decode_container(&bytes).unwrap();
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.location.unwrap().source, BitcodeSource::Wrapper);
    assert_eq!(result.tree.range.unwrap().start, 20 * 8);
}

#[test]
fn test_decode_container_rejects_unknown_input() {
    assert!(matches!(
        decode_container(b"not bitcode"),
        Err(Error::MalformedContainer(_))
    ));
}

#[test]
fn test_wide_nested_type_labels_stay_bounded() {
    let mut writer = BitstreamWriter::new();
    writer.emit_magic();
    writer.enter_subblock(8, 3);
    writer.emit_unabbrev_record(module_code::VERSION, &[1]);
    writer.enter_subblock(17, 4);
    writer.emit_unabbrev_record(type_code::NUMENTRY, &[12]);
    writer.emit_unabbrev_record(type_code::INTEGER, &[32]);
    for k in 1..12u64 {
        // { T(k-1) x 8 }
        let mut values = vec![0];
        values.extend(std::iter::repeat_n(k - 1, 8));
        writer.emit_unabbrev_record(type_code::STRUCT_ANON, &values);
    }
    writer.end_block();
    writer.end_block();
    let bytes = writer.finish();

    let result = DecodeBuilder::new(&bytes).decode();
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.module.types.len(), 12);

    let longest = result.tree.walk().map(|node| node.label.len()).max().unwrap();
    assert!(longest < 2048, "longest label is {longest} bytes");
    assert!(
        result
            .tree
            .walk()
            .any(|node| node.label.contains("type 11 = { { ") && node.label.contains("..."))
    );
}

#[test]
fn test_read_input() {
    let path = std::env::temp_dir().join(format!("dxilbc-read-input-{}.bc", std::process::id()));
    std::fs::write(&path, minimal_module()).unwrap();
    let bytes = read_input(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(bytes, minimal_module());

    let error = read_input(&path).unwrap_err();
    assert!(matches!(error, Error::Io(_)));
    assert_eq!(error.kind(), "Io");
}
