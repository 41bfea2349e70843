/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Module Emitter for the Lo Compiler.
 *
 * Drives the passes over a loaded program, lays out linear memory,
 * serialises the finished module and runs structural verification.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use crate::ast::{Ast, Span};
use crate::builder::{GlobalInit, ModuleBuilder};
use crate::config::{CompileOptions, PAGE_SIZE};
use crate::context::{ModuleContext, FRAME_ALIGN};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::layout::{align_to, LayoutTable};
use crate::lower::lower_module;
use crate::symbols::SymbolTable;
use tracing::{debug, info};
use wasm_encoder::{
    CodeSection, ConstExpr, DataSection, ExportKind, ExportSection, Function, FunctionSection,
    GlobalSection, GlobalType, ImportSection, MemorySection, MemoryType, Module, TypeSection,
    ValType,
};

/// Placement of the regions of linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMap {
    /// Start of static data (globals and strings).
    pub data_start: u32,
    pub data_end: u32,
    /// Lowest address of the shadow stack.
    pub stack_base: u32,
    /// Initial stack pointer; the stack grows down from here.
    pub stack_top: u32,
    /// First heap address, exposed as `__heap_base`.
    pub heap_base: u32,
    pub pages: u32,
}

impl MemoryMap {
    /// Fails with `InvalidModule`, located at `span`, when the stack does
    /// not fit in a 32-bit address space.
    pub fn compute(builder: &ModuleBuilder, options: &CompileOptions, span: &Span) -> CompileResult<MemoryMap> {
        let data_start = builder.image.base();
        let data_end = builder.image.end();
        let stack_base = align_to(data_end, FRAME_ALIGN);
        let stack_top = stack_base.checked_add(options.stack_size).ok_or_else(|| {
            CompileError::new(
                ErrorKind::InvalidModule,
                span,
                format!(
                    "a stack of {} bytes above address {} exceeds the 32-bit address space",
                    options.stack_size, stack_base
                ),
            )
        })?;
        let heap_base = stack_top;
        let pages = heap_base.div_ceil(PAGE_SIZE).max(options.min_memory_pages);
        Ok(MemoryMap {
            data_start,
            data_end,
            stack_base,
            stack_top,
            heap_base,
            pages,
        })
    }
}

/// Compile a loaded program to a verified module binary.
#[tracing::instrument(level = "debug", skip_all, fields(file = %ast.entry_file))]
pub fn compile_ast(ast: &Ast, options: &CompileOptions) -> CompileResult<Vec<u8>> {
    let symbols = SymbolTable::collect(ast)?;
    let layouts = LayoutTable::compute(&symbols)?;
    debug!(
        functions = symbols.functions.len(),
        types = symbols.types.len(),
        globals = symbols.globals.len(),
        "symbols collected"
    );

    let mut ctx = ModuleContext::new(ast, &symbols, &layouts, options);
    lower_module(&mut ctx)?;
    let builder = ctx.into_builder();

    let bytes = encode(&builder, options, &Span::module(&ast.entry_file))?;
    info!(bytes = bytes.len(), functions = builder.functions.len(), "module emitted");
    Ok(bytes)
}

/// Serialise `builder`, verifying the result when `options.verify` is set.
/// `span` locates module-level failures.
pub fn encode(builder: &ModuleBuilder, options: &CompileOptions, span: &Span) -> CompileResult<Vec<u8>> {
    let map = MemoryMap::compute(builder, options, span)?;
    if let Some(max) = options.max_memory_pages {
        if map.pages > max {
            return Err(CompileError::new(
                ErrorKind::InvalidModule,
                span,
                format!(
                    "static data and stack need {} page(s), above the maximum of {}",
                    map.pages, max
                ),
            ));
        }
    }
    debug!(?map, "memory map");

    let bytes = build_module(builder, options, &map);
    if options.verify {
        verify(&bytes, span)?;
    }
    Ok(bytes)
}

/// Run the structural validator over a finished binary.
pub fn verify(bytes: &[u8], span: &Span) -> CompileResult<()> {
    wasmparser::Validator::new()
        .validate_all(bytes)
        .map(|_| ())
        .map_err(|e| {
            CompileError::new(
                ErrorKind::InvalidModule,
                span,
                format!("module failed validation: {}", e),
            )
        })
}

fn const_expr(init: GlobalInit) -> ConstExpr {
    match init {
        GlobalInit::I32(v) => ConstExpr::i32_const(v),
        GlobalInit::I64(v) => ConstExpr::i64_const(v),
        GlobalInit::F32(bits) => ConstExpr::f32_const(f32::from_bits(bits).into()),
        GlobalInit::F64(bits) => ConstExpr::f64_const(f64::from_bits(bits).into()),
    }
}

/// Run-length encode a local declaration list.
fn group_locals(locals: &[ValType]) -> Vec<(u32, ValType)> {
    let mut groups: Vec<(u32, ValType)> = Vec::new();
    for &ty in locals {
        match groups.last_mut() {
            Some((count, last)) if *last == ty => *count += 1,
            _ => groups.push((1, ty)),
        }
    }
    groups
}

fn build_module(builder: &ModuleBuilder, options: &CompileOptions, map: &MemoryMap) -> Vec<u8> {
    let mut module = Module::new();

    // --- Type Section ---
    let mut types = TypeSection::new();
    for (params, results) in &builder.types {
        types.ty().function(params.clone(), results.clone());
    }
    module.section(&types);

    // --- Import Section ---
    if !builder.imports.is_empty() {
        let mut imports = ImportSection::new();
        for import in &builder.imports {
            imports.import(
                &import.module,
                &import.field,
                wasm_encoder::EntityType::Function(import.type_index),
            );
        }
        module.section(&imports);
    }

    // --- Function Section ---
    let mut functions = FunctionSection::new();
    for func in &builder.functions {
        functions.function(func.type_index);
    }
    module.section(&functions);

    // --- Memory Section ---
    let mut memories = MemorySection::new();
    memories.memory(MemoryType {
        minimum: map.pages as u64,
        maximum: options.max_memory_pages.map(u64::from),
        memory64: false,
        shared: false,
        page_size_log2: None,
    });
    module.section(&memories);

    // --- Global Section (__stack_pointer, __heap_base, user globals) ---
    let mut globals = GlobalSection::new();
    globals.global(
        GlobalType {
            val_type: ValType::I32,
            mutable: true,
            shared: false,
        },
        &ConstExpr::i32_const(map.stack_top as i32),
    );
    globals.global(
        GlobalType {
            val_type: ValType::I32,
            mutable: false,
            shared: false,
        },
        &ConstExpr::i32_const(map.heap_base as i32),
    );
    for global in &builder.globals {
        globals.global(
            GlobalType {
                val_type: global.init.val_type(),
                mutable: global.mutable,
                shared: false,
            },
            &const_expr(global.init),
        );
    }
    module.section(&globals);

    // --- Export Section ---
    let mut exports = ExportSection::new();
    exports.export(&options.memory_export, ExportKind::Memory, 0);
    exports.export("__heap_base", ExportKind::Global, 1);
    for (name, index) in &builder.exports {
        exports.export(name, ExportKind::Func, *index);
    }
    module.section(&exports);

    // --- Code Section ---
    let mut codes = CodeSection::new();
    for func in &builder.functions {
        let mut body = Function::new(group_locals(&func.locals));
        for instr in &func.instructions {
            body.instruction(instr);
        }
        codes.function(&body);
    }
    module.section(&codes);

    // --- Data Section (static globals and strings) ---
    if !builder.image.bytes().is_empty() {
        let mut data = DataSection::new();
        data.active(
            0,
            &ConstExpr::i32_const(builder.image.base() as i32),
            builder.image.bytes().iter().copied(),
        );
        module.section(&data);
    }

    module.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBody;
    use crate::parser::parse_program;
    use wasm_encoder::Instruction;

    fn compile_src(src: &str) -> CompileResult<Vec<u8>> {
        let ast = parse_program(src, "test.lo").expect("parse failed");
        compile_ast(&ast, &CompileOptions::default())
    }

    #[test]
    fn test_minimal_module_validates() {
        let bytes = compile_src("export fn main(): u32 { return 42; }").unwrap();
        assert_eq!(&bytes[..4], b"\0asm");
    }

    #[test]
    fn test_memory_map_follows_data() {
        let mut builder = ModuleBuilder::new(8);
        builder.intern_str(b"hello");
        let options = CompileOptions {
            stack_size: 1024,
            ..CompileOptions::default()
        };
        let map = MemoryMap::compute(&builder, &options, &Span::module("m.lo")).unwrap();
        assert_eq!(map.data_start, 8);
        // 5 bytes of text, then the 8-byte descriptor at 16.
        assert_eq!(map.data_end, 24);
        assert_eq!(map.stack_base, 32);
        assert_eq!(map.stack_top, 32 + 1024);
        assert_eq!(map.heap_base, map.stack_top);
        assert_eq!(map.pages, 1);
    }

    #[test]
    fn test_pages_cover_stack() {
        let builder = ModuleBuilder::new(8);
        let options = CompileOptions {
            stack_size: 2 * PAGE_SIZE,
            ..CompileOptions::default()
        };
        assert_eq!(MemoryMap::compute(&builder, &options, &Span::module("m.lo")).unwrap().pages, 3);
    }

    #[test]
    fn test_page_limit_is_invalid_module() {
        let options = CompileOptions {
            stack_size: 2 * PAGE_SIZE,
            max_memory_pages: Some(2),
            ..CompileOptions::default()
        };
        let err = encode(&ModuleBuilder::new(8), &options, &Span::module("m.lo")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidModule);
    }

    #[test]
    fn test_oversized_stack_is_invalid_module() {
        let options = CompileOptions {
            stack_size: u32::MAX - 4,
            ..CompileOptions::default()
        };
        let err = encode(&ModuleBuilder::new(8), &options, &Span::module("m.lo")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidModule);
        assert!(err.message.contains("address space"), "got {}", err.message);
    }

    #[test]
    fn test_verifier_failure_is_invalid_module() {
        let mut builder = ModuleBuilder::new(8);
        let ty = builder.intern_type(vec![], vec![ValType::I32]);
        builder.add_function(FunctionBody {
            name: "broken".into(),
            type_index: ty,
            locals: vec![],
            // Pops two operands from an empty stack.
            instructions: vec![Instruction::I32Add, Instruction::End],
        });
        let err = encode(&builder, &CompileOptions::default(), &Span::module("m.lo")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidModule);
        assert!(err.message.starts_with("module failed validation"));

        let unchecked = CompileOptions {
            verify: false,
            ..CompileOptions::default()
        };
        assert!(encode(&builder, &unchecked, &Span::module("m.lo")).is_ok());
    }

    #[test]
    fn test_group_locals() {
        let groups = group_locals(&[ValType::I32, ValType::I32, ValType::I64, ValType::I32]);
        assert_eq!(groups, vec![(2, ValType::I32), (1, ValType::I64), (1, ValType::I32)]);
    }

    #[test]
    fn test_errors_surface_unmodified() {
        let err = compile_src("struct A { b: B } struct B { a: A }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InfiniteLayout);
        let err = compile_src("fn f() {} fn f() {}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol);
    }
}
