/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Call Lowering for the Lo Compiler.
 *
 * Direct calls, statically dispatched method calls, built-in memory
 * operations and enum construction. Arguments are marshalled according to
 * the callee's ABI, which the callee derives from the same signature.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use super::expr::{coerce, lower_expr, lower_value, store_value};
use super::place::{emit_load, emit_store, spill_to_frame};
use crate::ast::{ExprId, Span};
use crate::builder::HEAP_BASE_GLOBAL;
use crate::consts::{split_variant, variant_payload};
use crate::context::ModuleContext;
use crate::error::{CompileError, CompileResult};
use crate::layout::{Lane, ParamPassing, ReturnPassing, Shape, ENUM_TAG_SIZE};
use crate::symbols::FunctionDecl;
use crate::types::Type;
use wasm_encoder::{Instruction, ValType};

/// Already-lowered receiver of a method call.
struct Receiver {
    code: Vec<Instruction<'static>>,
    ty: Type,
}

/// `name(args)`: user functions first, then built-ins, then enum variants.
pub fn lower_call(ctx: &mut ModuleContext<'_>, callee: &str, args: &[ExprId], span: &Span) -> CompileResult<Type> {
    let symbols = ctx.symbols;
    if let Some(decl) = symbols.functions.get(callee) {
        return emit_call(ctx, decl, None, args, span);
    }
    if let Some(ty) = lower_builtin(ctx, callee, args, span)? {
        return Ok(ty);
    }
    if let Some((enum_name, variant)) = split_variant(ctx, callee) {
        return lower_enum_value(ctx, enum_name, variant, args, span);
    }
    Err(CompileError::unknown_symbol(span, "function", callee))
}

/// `receiver.method(args)`, resolved from the receiver's static type to
/// the function `Type::method`.
pub fn lower_method_call(
    ctx: &mut ModuleContext<'_>,
    receiver: ExprId,
    method: &str,
    args: &[ExprId],
    span: &Span,
) -> CompileResult<Type> {
    let (recv_ty, code) = ctx.capture(|ctx| lower_expr(ctx, receiver, None))?;
    let base = match &recv_ty {
        Type::Pointer(inner) => (**inner).clone(),
        other => other.clone(),
    };
    let symbols = ctx.symbols;
    let decl = symbols
        .method(&base.to_string(), method)
        .filter(|decl| decl.is_method())
        .ok_or_else(|| CompileError::unknown_symbol(span, "method", &format!("{}::{}", base, method)))?;
    emit_call(ctx, decl, Some(Receiver { code, ty: recv_ty }), args, span)
}

fn emit_call(
    ctx: &mut ModuleContext<'_>,
    decl: &FunctionDecl,
    receiver: Option<Receiver>,
    args: &[ExprId],
    span: &Span,
) -> CompileResult<Type> {
    let abi = ctx.abi(&decl.sig);
    let given = args.len() + usize::from(receiver.is_some());
    if given != decl.sig.params.len() {
        return Err(CompileError::type_mismatch(
            span,
            format!(
                "`{}` expects {} argument(s), found {}",
                decl.name,
                decl.sig.params.len(),
                given
            ),
        ));
    }

    let sret_slot = if abi.has_sret() {
        let slot = ctx.alloc_temp(&decl.sig.ret);
        ctx.func.frame_address(slot);
        Some(slot)
    } else {
        None
    };

    let mut params = decl.sig.params.iter().zip(&abi.params);
    if let Some(recv) = receiver {
        if let Some(((_, self_ty), passing)) = params.next() {
            ctx.splice(recv.code);
            adapt_receiver(ctx, &recv.ty, self_ty, span)?;
            pass_argument(ctx, self_ty, passing);
        }
    }
    for (&arg, ((_, ty), passing)) in args.iter().zip(params) {
        lower_value(ctx, arg, ty)?;
        pass_argument(ctx, ty, passing);
    }
    ctx.emit(Instruction::Call(decl.index));

    let ret = decl.sig.ret.clone();
    match &abi.ret {
        ReturnPassing::Void | ReturnPassing::Direct(_) => {}
        ReturnPassing::Lanes(lanes) => {
            let slot = collect_lanes(ctx, &ret, lanes);
            ctx.func.frame_address(slot);
        }
        ReturnPassing::Sret => {
            if let Some(slot) = sret_slot {
                ctx.func.frame_address(slot);
            }
        }
    }
    Ok(ret)
}

/// Bring a receiver of type `found` to the `self` parameter type.
///
/// An aggregate already travels as its address, so `T` satisfies `&T`;
/// a `&T` receiver satisfies a by-value `T` by loading through it.
fn adapt_receiver(ctx: &mut ModuleContext<'_>, found: &Type, self_ty: &Type, span: &Span) -> CompileResult<()> {
    if found == self_ty {
        return Ok(());
    }
    if let Type::Pointer(inner) = self_ty {
        if **inner == *found && found.is_aggregate() {
            return Ok(());
        }
    }
    if let Type::Pointer(inner) = found {
        if **inner == *self_ty {
            emit_load(ctx, self_ty, 0);
            return Ok(());
        }
    }
    coerce(ctx, found, self_ty, span)
}

/// Marshal the value on top of the stack for a parameter.
fn pass_argument(ctx: &mut ModuleContext<'_>, ty: &Type, passing: &ParamPassing) {
    match passing {
        ParamPassing::Direct(_) => {}
        ParamPassing::Lanes(lanes) => {
            let addr = ctx.func.alloc_local(ValType::I32);
            ctx.emit(Instruction::LocalSet(addr));
            for lane in lanes {
                ctx.emit(Instruction::LocalGet(addr));
                emit_load(ctx, &lane.ty, lane.offset);
            }
        }
        ParamPassing::Indirect => {
            let slot = spill_to_frame(ctx, ty);
            ctx.func.frame_address(slot);
        }
    }
}

/// Pop lane values (last lane on top) into a fresh frame slot and return
/// its offset.
pub fn collect_lanes(ctx: &mut ModuleContext<'_>, ty: &Type, lanes: &[Lane]) -> u32 {
    let slot = ctx.alloc_temp(ty);
    let mut temps: Vec<u32> = lanes
        .iter()
        .rev()
        .map(|lane| {
            let tmp = ctx.func.alloc_local(lane.val_type());
            ctx.emit(Instruction::LocalSet(tmp));
            tmp
        })
        .collect();
    temps.reverse();
    for (lane, tmp) in lanes.iter().zip(temps) {
        ctx.emit(Instruction::LocalGet(ctx.func.frame_base));
        ctx.emit(Instruction::LocalGet(tmp));
        emit_store(ctx, &lane.ty, slot + lane.offset);
    }
    slot
}

// =============================================================================
// Built-ins
// =============================================================================

fn expect_arity(name: &str, args: &[ExprId], n: usize, span: &Span) -> CompileResult<()> {
    if args.len() == n {
        Ok(())
    } else {
        Err(CompileError::type_mismatch(
            span,
            format!("`{}` expects {} argument(s), found {}", name, n, args.len()),
        ))
    }
}

/// An address operand: any pointer, or a 32-bit integer.
fn lower_address(ctx: &mut ModuleContext<'_>, id: ExprId) -> CompileResult<()> {
    let ty = lower_expr(ctx, id, Some(&Type::U32))?;
    if ty.is_pointer() || ty == Type::U32 || ty == Type::I32 {
        return Ok(());
    }
    Err(CompileError::type_mismatch(
        &ctx.ast.expr(id).span,
        format!("expected an address, found `{}`", ty),
    ))
}

fn lower_builtin(
    ctx: &mut ModuleContext<'_>,
    name: &str,
    args: &[ExprId],
    span: &Span,
) -> CompileResult<Option<Type>> {
    let ty = match name {
        "memory::size" => {
            expect_arity(name, args, 0, span)?;
            ctx.emit(Instruction::MemorySize(0));
            Type::U32
        }
        "memory::grow" => {
            expect_arity(name, args, 1, span)?;
            lower_value(ctx, args[0], &Type::U32)?;
            ctx.emit(Instruction::MemoryGrow(0));
            Type::I32
        }
        "memory::copy" => {
            expect_arity(name, args, 3, span)?;
            lower_address(ctx, args[0])?;
            lower_address(ctx, args[1])?;
            lower_value(ctx, args[2], &Type::U32)?;
            ctx.emit(Instruction::MemoryCopy {
                src_mem: 0,
                dst_mem: 0,
            });
            Type::Void
        }
        "memory::fill" => {
            expect_arity(name, args, 3, span)?;
            lower_address(ctx, args[0])?;
            lower_value(ctx, args[1], &Type::U8)?;
            lower_value(ctx, args[2], &Type::U32)?;
            ctx.emit(Instruction::MemoryFill(0));
            Type::Void
        }
        "memory::heap_base" => {
            expect_arity(name, args, 0, span)?;
            ctx.emit(Instruction::GlobalGet(HEAP_BASE_GLOBAL));
            Type::U32
        }
        "unreachable" => {
            expect_arity(name, args, 0, span)?;
            ctx.emit(Instruction::Unreachable);
            Type::Void
        }
        _ => return Ok(None),
    };
    Ok(Some(ty))
}

// =============================================================================
// Enum Construction
// =============================================================================

/// `Enum::Variant` or `Enum::Variant(payload)`: build the value in a fresh
/// frame slot and push its address.
pub fn lower_enum_value(
    ctx: &mut ModuleContext<'_>,
    enum_name: &str,
    variant: &str,
    args: &[ExprId],
    span: &Span,
) -> CompileResult<Type> {
    let (tag, payload) = variant_payload(ctx, enum_name, variant, Some(args.len()), span)?;
    let ty = Type::Enum(enum_name.to_string());
    let payload_offset = match ctx.layouts.layout_of(&ty).shape {
        Shape::Enum { payload_offset, .. } => payload_offset,
        _ => ENUM_TAG_SIZE,
    };
    let slot = ctx.alloc_temp(&ty);
    ctx.func.frame_address(slot);
    ctx.emit(Instruction::I32Const(tag as i32));
    emit_store(ctx, &Type::U32, 0);
    if let (Some(payload_ty), [arg]) = (payload, args) {
        ctx.func.frame_address(slot);
        store_value(ctx, &payload_ty, payload_offset, *arg)?;
    }
    ctx.func.frame_address(slot);
    Ok(ty)
}
