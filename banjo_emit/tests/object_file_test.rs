//! Object-file write tests: emitted bytes survive the trip to disk.

use banjo_emit::emit_object;
use banjo_mcode::{Function, Instruction, Module, Operand};
use banjo_target::x86_64::opcode as op;
use banjo_target::{Arch, OperatingSystem, TargetDescription};
use pretty_assertions::assert_eq;

fn ret_only_module(name: &str) -> Module {
    let mut func = Function::new(name);
    let entry = func.create_block(format!("{}.entry", name));
    func.blocks[entry].append(Instruction::new(op::RET, Vec::<Operand>::new()));

    let mut module = Module::new();
    module.global_symbols.insert(name.to_string());
    module.add_function(func);
    module
}

#[test]
fn test_elf_object_survives_disk_round_trip() {
    let description = TargetDescription::new(Arch::X86_64, OperatingSystem::Linux);
    let module = ret_only_module("f");
    let bytes = emit_object(description, &module).expect("emit failed");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.o");
    std::fs::write(&path, &bytes).unwrap();

    let read_back = std::fs::read(&path).unwrap();
    assert_eq!(read_back, bytes);
    assert_eq!(&read_back[0..4], &[0x7F, b'E', b'L', b'F']);
}

#[test]
fn test_pe_object_survives_disk_round_trip() {
    let description = TargetDescription::new(Arch::X86_64, OperatingSystem::Windows);
    let module = ret_only_module("f");
    let bytes = emit_object(description, &module).expect("emit failed");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.obj");
    std::fs::write(&path, &bytes).unwrap();

    let read_back = std::fs::read(&path).unwrap();
    assert_eq!(read_back, bytes);
    assert_eq!(u16::from_le_bytes([read_back[0], read_back[1]]), 0x8664);
}
