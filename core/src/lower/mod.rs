/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Construct Lowering Engine for the Lo Compiler.
 *
 * Walks every function body and emits WASM instructions into the module
 * builder, one rule per construct kind:
 *
 *   expr   literals, operators, casts, struct literals
 *   place  variables, fields, indexing, dereference, address-of
 *   call   calls, methods, built-ins, enum construction
 *   stmt   bindings, assignment, control flow, defer
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

pub mod call;
pub mod expr;
pub mod place;
pub mod stmt;

use crate::ast::{FunctionItem, ItemKind};
use crate::builder::{FunctionBody, STACK_POINTER_GLOBAL};
use crate::consts::lower_globals;
use crate::context::{FunctionContext, LocalBinding, ModuleContext};
use crate::error::CompileResult;
use crate::layout::ParamPassing;
use crate::symbols::{FunctionDecl, FunctionKind};
use crate::types::Type;
use place::{emit_store, spill_to_frame};
use stmt::{exit_scope, lower_block};
use tracing::{debug, trace};
use wasm_encoder::Instruction;

/// Lower imports, globals and every function body, in index order.
#[tracing::instrument(level = "debug", skip_all)]
pub fn lower_module(ctx: &mut ModuleContext<'_>) -> CompileResult<()> {
    let symbols = ctx.symbols;
    let ast = ctx.ast;
    let decls = symbols.functions_by_index();

    for decl in &decls {
        if let FunctionKind::Imported { module, field } = &decl.kind {
            let abi = ctx.abi(&decl.sig);
            let type_index = ctx.builder.intern_type(abi.wasm_params(), abi.wasm_results());
            ctx.builder.add_import(module, field, type_index);
            trace!(module = %module, field = %field, "import");
        }
    }

    lower_globals(ctx)?;

    for decl in decls {
        let FunctionKind::Defined(item) = decl.kind else {
            continue;
        };
        if let ItemKind::Function(func) = &ast.item(item).kind {
            lower_function(ctx, decl, func)?;
            if decl.exported {
                ctx.builder.export_function(&decl.name, decl.index);
            }
        }
    }
    Ok(())
}

/// Restore the caller's stack pointer.
pub fn emit_epilogue(ctx: &mut ModuleContext<'_>) {
    ctx.emit(Instruction::LocalGet(ctx.func.saved_sp));
    ctx.emit(Instruction::GlobalSet(STACK_POINTER_GLOBAL));
}

fn lower_function(ctx: &mut ModuleContext<'_>, decl: &FunctionDecl, item: &FunctionItem) -> CompileResult<()> {
    debug!(function = %decl.name, index = decl.index, "lowering function");
    let abi = ctx.abi(&decl.sig);
    let type_index = ctx.builder.intern_type(abi.wasm_params(), abi.wasm_results());
    let mut address_taken = Vec::new();
    ctx.ast.address_taken_in(&item.body, &mut address_taken);

    ctx.func = FunctionContext::new(&decl.name, decl.sig.ret.clone(), abi.clone(), address_taken);
    ctx.func.push_scope();

    // WASM parameter index; the hidden result pointer comes first.
    let mut next = u32::from(abi.has_sret());
    for ((name, ty), passing) in decl.sig.params.iter().zip(&abi.params) {
        let binding = match passing {
            ParamPassing::Direct(_) if ctx.func.is_address_taken(name) => {
                ctx.emit(Instruction::LocalGet(next));
                next += 1;
                let offset = spill_to_frame(ctx, ty);
                LocalBinding::Frame {
                    offset,
                    ty: ty.clone(),
                }
            }
            ParamPassing::Direct(_) => {
                next += 1;
                LocalBinding::Local {
                    index: next - 1,
                    ty: ty.clone(),
                }
            }
            ParamPassing::Lanes(lanes) => {
                let slot = ctx.alloc_temp(ty);
                for lane in lanes {
                    ctx.emit(Instruction::LocalGet(ctx.func.frame_base));
                    ctx.emit(Instruction::LocalGet(next));
                    emit_store(ctx, &lane.ty, slot + lane.offset);
                    next += 1;
                }
                LocalBinding::Frame {
                    offset: slot,
                    ty: ty.clone(),
                }
            }
            ParamPassing::Indirect => {
                next += 1;
                LocalBinding::Indirect {
                    local: next - 1,
                    ty: ty.clone(),
                }
            }
        };
        ctx.func.bind(name, binding);
    }

    lower_block(ctx, &item.body)?;
    exit_scope(ctx)?;
    if decl.sig.ret == Type::Void {
        emit_epilogue(ctx);
    } else {
        // Falling off the end of a value-returning function.
        ctx.emit(Instruction::Unreachable);
    }
    ctx.emit(Instruction::End);

    let func = std::mem::take(&mut ctx.func);
    let mut instructions = vec![
        Instruction::GlobalGet(STACK_POINTER_GLOBAL),
        Instruction::LocalTee(func.saved_sp),
        Instruction::I32Const(func.frame_bytes() as i32),
        Instruction::I32Sub,
        Instruction::LocalTee(func.frame_base),
        Instruction::GlobalSet(STACK_POINTER_GLOBAL),
    ];
    instructions.extend(func.instructions);
    trace!(function = %func.name, frame = func.frame_size, locals = func.locals.len(), "lowered");
    ctx.builder.add_function(FunctionBody {
        name: func.name,
        type_index,
        locals: func.locals,
        instructions,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use crate::config::CompileOptions;
    use crate::error::{CompileError, ErrorKind};
    use crate::layout::LayoutTable;
    use crate::parser::parse_program;
    use crate::symbols::SymbolTable;

    fn lower_source(src: &str) -> Result<ModuleBuilder, CompileError> {
        let ast = parse_program(src, "test.lo").expect("parse failed");
        let symbols = SymbolTable::collect(&ast)?;
        let layouts = LayoutTable::compute(&symbols)?;
        let options = CompileOptions::default();
        let mut ctx = ModuleContext::new(&ast, &symbols, &layouts, &options);
        lower_module(&mut ctx)?;
        Ok(ctx.into_builder())
    }

    fn code_of(builder: &ModuleBuilder, name: &str) -> Vec<String> {
        builder
            .functions
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.instructions.iter().map(|i| format!("{:?}", i)).collect())
            .unwrap_or_default()
    }

    fn error_kind(src: &str) -> ErrorKind {
        match lower_source(src) {
            Ok(_) => panic!("expected a compile error"),
            Err(err) => err.kind,
        }
    }

    #[test]
    fn test_prologue_and_epilogue() {
        let builder = lower_source("export fn main(): u32 { return 42; }").unwrap();
        let code = code_of(&builder, "main");
        assert_eq!(
            code[..6],
            [
                "GlobalGet(0)",
                "LocalTee(0)",
                "I32Const(0)",
                "I32Sub",
                "LocalTee(1)",
                "GlobalSet(0)"
            ]
        );
        assert!(code.ends_with(&[
            "LocalGet(0)".to_string(),
            "GlobalSet(0)".to_string(),
            "LocalGet(2)".to_string(),
            "Return".to_string(),
            "Unreachable".to_string(),
            "End".to_string(),
        ]));
        assert_eq!(builder.exports, vec![("main".to_string(), 0)]);
    }

    #[test]
    fn test_imports_take_low_indices() {
        let src = r#"
            import from "env" { fn tick(n: u32); }
            fn main() { tick(1); }
        "#;
        let builder = lower_source(src).unwrap();
        assert_eq!(builder.imports.len(), 1);
        assert!(code_of(&builder, "main").contains(&"Call(0)".to_string()));
    }

    #[test]
    fn test_defers_replayed_newest_first() {
        let src = r#"
            import from "env" { fn mark(n: u32); }
            fn main() { defer mark(1); defer mark(2); mark(0); }
        "#;
        let builder = lower_source(src).unwrap();
        let marks: Vec<String> = code_of(&builder, "main")
            .into_iter()
            .filter(|i| i.starts_with("I32Const("))
            // frame size
            .skip(1)
            .collect();
        assert_eq!(marks, ["I32Const(0)", "I32Const(2)", "I32Const(1)"]);
    }

    #[test]
    fn test_break_flushes_only_loop_defers() {
        let src = r#"
            import from "env" { fn mark(n: u32); }
            fn main() {
                defer mark(9);
                loop { defer mark(1); break; }
                mark(5);
            }
        "#;
        let builder = lower_source(src).unwrap();
        let code = code_of(&builder, "main");
        let br = code.iter().position(|i| i == "Br(1)").expect("break");
        // Only the loop's defer runs before the break leaves the loop.
        assert_eq!(code[br - 2..br], ["I32Const(1)", "Call(0)"]);
        let nines = code.iter().filter(|i| *i == "I32Const(9)").count();
        assert_eq!(nines, 1);
    }

    #[test]
    fn test_return_flushes_every_frame() {
        let src = r#"
            import from "env" { fn mark(n: u32); }
            fn main() {
                defer mark(1);
                { defer mark(2); return; }
            }
        "#;
        let builder = lower_source(src).unwrap();
        let code = code_of(&builder, "main");
        let ret = code.iter().position(|i| i == "Return").expect("return");
        let before: Vec<&String> = code[..ret].iter().filter(|i| i.starts_with("I32Const(")).collect();
        assert_eq!(before[before.len() - 2..], [&"I32Const(2)".to_string(), &"I32Const(1)".to_string()]);
    }

    #[test]
    fn test_unknown_label() {
        assert_eq!(
            error_kind("fn main() { loop { break 'nope; } }"),
            ErrorKind::UnknownLabel
        );
        assert_eq!(error_kind("fn main() { break; }"), ErrorKind::UnknownLabel);
        assert_eq!(
            error_kind("fn main() { 'blk: { continue 'blk; } }"),
            ErrorKind::UnknownLabel
        );
    }

    #[test]
    fn test_labeled_break_depth() {
        let src = "fn main() { 'outer: loop { while true { break 'outer; } } }";
        let code = code_of(&lower_source(src).unwrap(), "main");
        // outer block, outer loop, inner block, inner loop.
        assert!(code.contains(&"Br(3)".to_string()));
    }

    #[test]
    fn test_assign_to_immutable_global() {
        let err = lower_source("global N: u32 = 1; fn main() { N = 2; }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert!(err.message.contains("immutable global `N`"));
    }

    #[test]
    fn test_return_value_checks() {
        assert_eq!(error_kind("fn f(): u32 { return; }"), ErrorKind::TypeMismatch);
        assert_eq!(error_kind("fn f() { return 1u32; }"), ErrorKind::TypeMismatch);
        assert_eq!(error_kind("fn f() { let x = g(); }"), ErrorKind::UnknownSymbol);
    }

    #[test]
    fn test_match_rejects_foreign_pattern() {
        let src = r#"
            enum A { X, Y }
            enum B { X }
            fn f(a: A) { match a { B::X => {} _ => {} } }
        "#;
        assert_eq!(error_kind(src), ErrorKind::TypeMismatch);
        let src = r#"
            enum A { X, Y(u32) }
            fn f(a: A) { match a { A::X(v) => {} _ => {} } }
        "#;
        assert_eq!(error_kind(src), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_address_taken_param_lives_in_frame() {
        let src = "fn f(x: u32): &u32 { return &x; }";
        let code = code_of(&lower_source(src).unwrap(), "f");
        assert_eq!(code[2], "I32Const(16)");
        assert!(code.contains(&"I32Store(MemArg { offset: 0, align: 2, memory_index: 0 })".to_string()));
    }
}
