//! Hot-reload end-to-end test against the in-process target

use banjo_common::{BanjoResult, Reports};
use banjo_compiler::{CompilerConfig, ModuleProvider};
use banjo_hot_reload::{reloader, HotReloader, JitCompiler, LocalProcess, TargetProcess};
use banjo_sir::build::UnitBuilder;
use banjo_sir::{Primitive, Unit};
use pretty_assertions::{assert_eq, assert_ne};
use std::path::Path;

/// A frontend whose single module is `func counter() -> i32 { return N }`;
/// the test flips N between reloads.
struct CounterProvider {
    value: i128,
}

impl ModuleProvider for CounterProvider {
    fn load(&mut self, _config: &CompilerConfig, _reports: &mut Reports) -> BanjoResult<Unit> {
        let mut b = UnitBuilder::new();
        let module = b.create_module(&["main"]);

        let return_type = b.prim_type(Primitive::I32);
        let body = b.func_body(module);
        let value = b.int(self.value);
        b.return_stmt(body, Some(value));
        b.add_func(module.block, "counter", vec![], Some(return_type), body);

        Ok(b.finish())
    }

    fn module_path_of(&self, _path: &Path) -> Option<Vec<String>> {
        Some(vec!["main".to_string()])
    }
}

#[test]
fn test_reload_patches_address_table_slot() {
    let config = CompilerConfig {
        hot_reload: true,
        ..Default::default()
    };

    // Build the initial program's address table and install it as the
    // running process's .bnjatbl section.
    let mut provider = CounterProvider { value: 1 };
    let table = {
        let mut jit = JitCompiler::new(&config, &mut provider);
        assert!(jit.build_ir().unwrap(), "initial build failed: {:?}", jit.reports.reports);
        jit.addr_table().expect("no address table").clone()
    };

    let index = table.find_index("main.counter").expect("counter not in table");

    let mut process = LocalProcess::new();
    process.install_section(
        reloader::ADDR_TABLE_SECTION,
        reloader::serialize_addr_table(&table),
    );

    let mut reloader = HotReloader::attach(&mut process).unwrap();
    assert_eq!(reloader.addr_table().entries, table.entries);
    assert_eq!(reloader.read_slot(index).unwrap(), 0);

    // Change the source and reload.
    let mut provider = CounterProvider { value: 2 };
    reloader
        .reload_file(&config, &mut provider, Path::new("main.bnj"))
        .unwrap();

    let new_addr = reloader.read_slot(index).unwrap();
    assert_ne!(new_addr, 0, "slot was not patched");

    // The patched slot points at freshly written machine code: the frame
    // setup followed by `mov eax, 2`.
    drop(reloader);
    let mut head = [0u8; 4];
    process.read_memory(new_addr, &mut head).unwrap();
    assert_eq!(head[0], 0x48, "expected a REX-prefixed frame adjustment");

    let mut window = [0u8; 1];
    let mut found = false;
    for offset in 0..12 {
        process.read_memory(new_addr + offset, &mut window).unwrap();
        if window[0] == 0xB8 {
            let mut imm = [0u8; 4];
            process.read_memory(new_addr + offset + 1, &mut imm).unwrap();
            assert_eq!(i32::from_le_bytes(imm), 2);
            found = true;
            break;
        }
    }
    assert!(found, "mov eax, imm32 not found in patched code");
}
