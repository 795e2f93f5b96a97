//! x86-64 encoder tests: instruction forms, branch relaxation, constant
//! encoding.

use banjo_emit::x86_64_encoder;
use banjo_mcode::{Function, Instruction, Module, Operand};
use banjo_target::x86_64::opcode as op;
use banjo_target::x86_64::register::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use test_case::test_case;

fn encode_single(instr: Instruction) -> Vec<u8> {
    let mut func = Function::new("f");
    let entry = func.create_block("f.entry");
    func.blocks[entry].append(instr);
    func.blocks[entry].append(Instruction::new(op::RET, Vec::<Operand>::new()));

    let mut module = Module::new();
    module.add_function(func);

    let encoded = x86_64_encoder::encode(&module).expect("encode failed");
    let mut bytes = encoded.text.into_data();
    // Strip the trailing ret.
    assert_eq!(bytes.pop(), Some(0xC3));
    bytes
}

#[test_case(8, &[0x48, 0x89, 0xC8]; "64-bit form carries REX.W")]
#[test_case(4, &[0x89, 0xC8]; "32-bit form is bare")]
#[test_case(2, &[0x66, 0x89, 0xC8]; "16-bit form carries the size prefix")]
#[test_case(1, &[0x88, 0xC8]; "8-bit form uses the byte opcode")]
fn test_mov_rax_rcx_forms(size: u8, expected: &[u8]) {
    let bytes = encode_single(Instruction::new(
        op::MOV,
        vec![Operand::physical(RAX, size), Operand::physical(RCX, size)],
    ));
    assert_eq!(bytes, expected);
}

#[test]
fn test_mov_high_registers_set_rex_bits() {
    let bytes = encode_single(Instruction::new(
        op::MOV,
        vec![Operand::physical(R8, 8), Operand::physical(R9, 8)],
    ));
    // REX.W + REX.R + REX.B
    assert_eq!(bytes, vec![0x4D, 0x89, 0xC8]);
}

#[test]
fn test_push_pop_forms() {
    assert_eq!(
        encode_single(Instruction::new(op::PUSH, vec![Operand::physical(RBX, 8)])),
        vec![0x53]
    );
    assert_eq!(
        encode_single(Instruction::new(op::PUSH, vec![Operand::physical(R12, 8)])),
        vec![0x41, 0x54]
    );
    assert_eq!(
        encode_single(Instruction::new(op::POP, vec![Operand::physical(RBX, 8)])),
        vec![0x5B]
    );
}

#[test]
fn test_external_call_leaves_relocation() {
    let mut func = Function::new("f");
    let entry = func.create_block("f.entry");
    func.blocks[entry].append(Instruction::new(
        op::CALL,
        vec![Operand::symbol(banjo_mcode::Symbol::plt("puts"), 8)],
    ));
    func.blocks[entry].append(Instruction::new(op::RET, Vec::<Operand>::new()));

    let mut module = Module::new();
    module.add_external_symbol("puts");
    module.add_function(func);

    let encoded = x86_64_encoder::encode(&module).expect("encode failed");

    assert_eq!(encoded.text.data()[0], 0xE8);
    let use_ = encoded
        .symbol_uses
        .iter()
        .find(|u| u.kind == banjo_emit::BinSymbolUseKind::Plt32)
        .expect("missing call relocation");
    assert_eq!(use_.address, 1);

    let def = &encoded.symbol_defs[use_.symbol_index as usize];
    assert_eq!(def.name, "puts");

    // Every relocation stays inside its section and references a valid
    // symbol.
    for use_ in &encoded.symbol_uses {
        let section_size = match use_.section {
            banjo_emit::BinSectionKind::Text => encoded.text.size(),
            banjo_emit::BinSectionKind::Data => encoded.data.size(),
            banjo_emit::BinSectionKind::AddrTable => 0,
        };
        assert!((use_.address as usize) < section_size);
        assert!((use_.symbol_index as usize) < encoded.symbol_defs.len());
    }
}

/// A function with a forward conditional jump over `padding` ten-byte
/// instructions.
fn forward_branch_module(padding: usize) -> Module {
    let mut func = Function::new("f");

    let entry = func.create_block("f.entry");
    func.blocks[entry].append(Instruction::new(
        op::CMP,
        vec![Operand::physical(RAX, 8), Operand::int_immediate(0, 8)],
    ));
    func.blocks[entry].append(Instruction::new(op::JE, vec![Operand::label("f.far")]));

    let middle = func.create_block("f.middle");
    for _ in 0..padding {
        // mov r10, imm64 encodes to ten bytes.
        func.blocks[middle].append(Instruction::new(
            op::MOV,
            vec![
                Operand::physical(R10, 8),
                Operand::int_immediate(0x1_0000_0000, 8),
            ],
        ));
    }

    let far = func.create_block("f.far");
    func.blocks[far].append(Instruction::new(op::RET, Vec::<Operand>::new()));

    let mut module = Module::new();
    module.add_function(func);
    module
}

#[test]
fn test_short_forward_branch_keeps_rel8() {
    let module = forward_branch_module(2);
    let encoded = x86_64_encoder::encode(&module).expect("encode failed");
    let text = encoded.text.data();

    // cmp (4 bytes), then je rel8 over 20 bytes.
    assert_eq!(text[4], 0x74);
    assert_eq!(text[5] as i8, 20);
}

#[test]
fn test_far_forward_branch_relaxes_to_rel32() {
    // 25 * 10 = 250 bytes of straight-line code between branch and target.
    let module = forward_branch_module(25);
    let encoded = x86_64_encoder::encode(&module).expect("encode failed");
    let text = encoded.text.data();

    // The 6-byte 0F 84 rel32 form.
    assert_eq!(&text[4..6], &[0x0F, 0x84]);
    let displacement = i32::from_le_bytes(text[6..10].try_into().unwrap());
    assert_eq!(displacement, 250);
}

proptest! {
    /// Relaxation fixpoint: whatever the distance, the chosen encoding's
    /// displacement fits and lands on the target.
    #[test]
    fn prop_branch_displacement_fits_chosen_encoding(padding in 0usize..40) {
        let module = forward_branch_module(padding);
        let encoded = x86_64_encoder::encode(&module).unwrap();
        let text = encoded.text.data();

        let distance = (padding * 10) as i64;
        if text[4] == 0x74 {
            let displacement = text[5] as i8 as i64;
            prop_assert_eq!(displacement, distance);
        } else {
            prop_assert_eq!(&text[4..6], &[0x0F, 0x84]);
            let displacement = i32::from_le_bytes(text[6..10].try_into().unwrap()) as i64;
            prop_assert_eq!(displacement, distance);
            prop_assert!(distance > i8::MAX as i64);
        }
    }

    /// Integer globals encode as two's complement at their declared width.
    #[test]
    fn prop_global_constants_are_twos_complement(value in any::<i64>(), size_index in 0usize..4) {
        let size = [1u64, 2, 4, 8][size_index];

        let mut module = Module::new();
        module.globals.push(banjo_mcode::Global {
            name: "g".to_string(),
            size,
            alignment: size,
            value: banjo_mcode::GlobalValue::Int(value as i128),
        });

        let encoded = x86_64_encoder::encode(&module).unwrap();
        let expected = &value.to_le_bytes()[..size as usize];
        prop_assert_eq!(encoded.data.data(), expected);
    }
}
