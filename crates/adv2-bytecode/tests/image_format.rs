use adv2_bytecode::{BytecodeWriter, Image, Opcode, HEADER_LEN};

#[test]
fn encodes_header_then_segments_in_declared_order() {
    let mut code = BytecodeWriter::new();
    code.emit_u8(0x00);
    code.emit_opcode(Opcode::Halt);
    code.emit_opcode(Opcode::Lit);
    code.emit_i32(7);
    code.emit_opcode(Opcode::Return);

    let img = Image {
        data: vec![0u8; 8],
        strings: Vec::new(),
        code: code.into_bytes(),
        main_function: 2,
    };
    let bytes = img.encode();

    assert_eq!(&bytes[0..4], &(HEADER_LEN as u32).to_le_bytes());
    let decoded = Image::decode(&bytes).unwrap();
    assert_eq!(decoded.main_function, 2);
    assert_eq!(decoded.code, img.code);
    assert_eq!(decoded.data.len(), 8);
}

#[test]
fn code_segment_begins_with_halt_sentinel() {
    let mut code = BytecodeWriter::new();
    code.emit_u8(0x00);
    code.emit_opcode(Opcode::Halt);
    let bytes = code.into_bytes();
    assert_eq!(bytes[0], 0x00);
    assert_eq!(bytes[1], Opcode::Halt.to_u8());
}
