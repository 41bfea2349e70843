/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Statement Lowering for the Lo Compiler.
 *
 * Blocks, bindings, assignment and structured control flow. Jumps that
 * leave a scope first replay the deferred statements of every scope they
 * cross, innermost first and newest first within a scope.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use super::emit_epilogue;
use super::expr::{emit_binary_op, lower_condition, lower_expr, lower_operands, lower_value};
use super::place::{
    binding_place, emit_copy, emit_load, emit_store, is_place_expr, lower_place, read_place,
    spill_to_frame, write_place, Place, PlaceKind,
};
use crate::ast::{BinaryOp, Block, ElseBranch, ExprId, ExprKind, MatchArm, Pattern, Span, StmtId, StmtKind};
use crate::context::{DeferFrame, LocalBinding, LoopFrame, ModuleContext};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::layout::{ReturnPassing, Shape, ENUM_TAG_SIZE};
use crate::types::Type;
use wasm_encoder::{BlockType, Instruction, ValType};

// =============================================================================
// Blocks & Scopes
// =============================================================================

/// Lower `block` in a fresh scope, replaying its defers on fall-through.
pub fn lower_block(ctx: &mut ModuleContext<'_>, block: &Block) -> CompileResult<()> {
    ctx.func.push_scope();
    for &stmt in &block.stmts {
        lower_stmt(ctx, stmt)?;
    }
    exit_scope(ctx)
}

/// Emit the innermost scope's defers and pop it.
pub fn exit_scope(ctx: &mut ModuleContext<'_>) -> CompileResult<()> {
    let top = ctx.func.scopes.len().saturating_sub(1);
    emit_deferred(ctx, top)?;
    ctx.func.pop_scope();
    Ok(())
}

/// Emit the defers of every scope at index `from` and above, innermost first.
fn flush_frames(ctx: &mut ModuleContext<'_>, from: usize) -> CompileResult<()> {
    for k in (from..ctx.func.defers.len()).rev() {
        emit_deferred(ctx, k)?;
    }
    Ok(())
}

/// Emit the defers registered in scope `k`, newest first.
///
/// Each action sees exactly the bindings that were visible when it was
/// registered. Jump targets are hidden while it is lowered, so a deferred
/// `break` has to target a loop of its own.
fn emit_deferred(ctx: &mut ModuleContext<'_>, k: usize) -> CompileResult<()> {
    let actions = match ctx.func.defers.get(k) {
        Some(frame) => frame.actions.clone(),
        None => return Ok(()),
    };
    for action in actions.into_iter().rev() {
        let saved_scopes = ctx.func.scopes.clone();
        let saved_defers = ctx.func.defers.clone();
        let saved_loops = std::mem::take(&mut ctx.func.loops);

        ctx.func.scopes.truncate(k + 1);
        if let Some(frame) = ctx.func.scopes.get_mut(k) {
            frame.bindings.truncate(action.visible);
        }
        ctx.func.defers.truncate(k);
        ctx.func.defers.push(DeferFrame::default());
        ctx.func.defer_depth += 1;

        lower_stmt(ctx, action.stmt)?;
        // Defers registered by the deferred statement itself.
        emit_deferred(ctx, k)?;

        ctx.func.defer_depth -= 1;
        ctx.func.scopes = saved_scopes;
        ctx.func.defers = saved_defers;
        ctx.func.loops = saved_loops;
    }
    Ok(())
}

/// Bind `name` to the value on top of the stack.
///
/// Aggregates and address-taken names get a frame slot; other values a
/// fresh WASM local.
pub fn store_new_binding(ctx: &mut ModuleContext<'_>, name: &str, ty: Type) {
    let binding = match ty.val_type() {
        Some(vt) if !ty.is_aggregate() && !ctx.func.is_address_taken(name) => {
            let index = ctx.func.alloc_local(vt);
            ctx.emit(Instruction::LocalSet(index));
            LocalBinding::Local { index, ty }
        }
        _ => {
            let offset = spill_to_frame(ctx, &ty);
            LocalBinding::Frame { offset, ty }
        }
    };
    ctx.func.bind(name, binding);
}

// =============================================================================
// Statements
// =============================================================================

pub fn lower_stmt(ctx: &mut ModuleContext<'_>, id: StmtId) -> CompileResult<()> {
    let ast = ctx.ast;
    let stmt = ast.stmt(id);
    let span = &stmt.span;
    match &stmt.kind {
        StmtKind::Let { name, ty, init, .. } => {
            let ty = match ty {
                Some(annotation) => {
                    let ty = ctx.resolve_type(annotation)?;
                    lower_value(ctx, *init, &ty)?;
                    ty
                }
                None => lower_expr(ctx, *init, None)?,
            };
            if ty == Type::Void {
                return Err(CompileError::type_mismatch(
                    span,
                    format!("cannot bind `{}` to a value of type `void`", name),
                ));
            }
            store_new_binding(ctx, name, ty);
            Ok(())
        }
        StmtKind::Assign { target, op, value } => lower_assign(ctx, *target, *op, *value, span),
        StmtKind::Expr(expr) => {
            if lower_expr(ctx, *expr, None)? != Type::Void {
                ctx.emit(Instruction::Drop);
            }
            Ok(())
        }
        StmtKind::Return(value) => lower_return(ctx, *value, span),
        StmtKind::Break(label) => lower_jump(ctx, label.as_deref(), false, span),
        StmtKind::Continue(label) => lower_jump(ctx, label.as_deref(), true, span),
        StmtKind::Defer(inner) => {
            ctx.func.register_defer(*inner);
            Ok(())
        }
        StmtKind::If {
            cond,
            then_block,
            else_branch,
        } => {
            lower_condition(ctx, *cond)?;
            ctx.emit(Instruction::If(BlockType::Empty));
            ctx.func.control_depth += 1;
            lower_block(ctx, then_block)?;
            match else_branch {
                Some(ElseBranch::Block(block)) => {
                    ctx.emit(Instruction::Else);
                    lower_block(ctx, block)?;
                }
                Some(ElseBranch::If(nested)) => {
                    ctx.emit(Instruction::Else);
                    lower_stmt(ctx, *nested)?;
                }
                None => {}
            }
            ctx.emit(Instruction::End);
            ctx.func.control_depth -= 1;
            Ok(())
        }
        StmtKind::Loop { label, body } => lower_loop(ctx, label.clone(), None, body),
        StmtKind::While { label, cond, body } => lower_loop(ctx, label.clone(), Some(*cond), body),
        StmtKind::For {
            label,
            var,
            start,
            end,
            body,
        } => lower_for(ctx, label.clone(), var, *start, *end, body, span),
        StmtKind::Match { scrutinee, arms } => lower_match(ctx, *scrutinee, arms, span),
        StmtKind::Block { label: None, body } => lower_block(ctx, body),
        StmtKind::Block {
            label: Some(label),
            body,
        } => {
            ctx.emit(Instruction::Block(BlockType::Empty));
            ctx.func.control_depth += 1;
            let level = ctx.func.control_depth;
            ctx.func.loops.push(LoopFrame {
                label: Some(label.clone()),
                scope_depth: ctx.func.scopes.len(),
                break_level: level,
                continue_level: None,
            });
            lower_block(ctx, body)?;
            ctx.func.loops.pop();
            ctx.emit(Instruction::End);
            ctx.func.control_depth -= 1;
            Ok(())
        }
    }
}

// =============================================================================
// Assignment
// =============================================================================

fn lower_assign(
    ctx: &mut ModuleContext<'_>,
    target: ExprId,
    op: Option<BinaryOp>,
    value: ExprId,
    span: &Span,
) -> CompileResult<()> {
    if !is_place_expr(ctx, target) {
        return Err(CompileError::type_mismatch(span, "invalid left-hand side of assignment"));
    }
    let place = lower_place(ctx, target)?;
    if !place.mutable {
        let message = match &ctx.ast.expr(target).kind {
            ExprKind::Path(name) => format!("cannot assign to immutable global `{}`", name),
            _ => "cannot assign to a field of a temporary value".to_string(),
        };
        return Err(CompileError::type_mismatch(span, message));
    }
    match op {
        None => write_place(ctx, &place, value),
        Some(op) => update_place(ctx, &place, op, Some(value), span),
    }
}

/// `place op= rhs`, where a missing `rhs` stands for the constant one.
/// The place's address, if any, is already pushed.
fn update_place(
    ctx: &mut ModuleContext<'_>,
    place: &Place,
    op: BinaryOp,
    rhs: Option<ExprId>,
    span: &Span,
) -> CompileResult<()> {
    let finish = match place.kind {
        PlaceKind::Local(index) => {
            ctx.emit(Instruction::LocalGet(index));
            Instruction::LocalSet(index)
        }
        PlaceKind::Global(index) => {
            ctx.emit(Instruction::GlobalGet(index));
            Instruction::GlobalSet(index)
        }
        PlaceKind::Memory { offset } => {
            let addr = ctx.func.alloc_local(ValType::I32);
            ctx.emit(Instruction::LocalTee(addr));
            ctx.emit(Instruction::LocalGet(addr));
            emit_load(ctx, &place.ty, offset);
            match rhs {
                Some(value) => lower_value(ctx, value, &place.ty)?,
                None => emit_one(ctx, &place.ty),
            }
            emit_binary_op(ctx, op, &place.ty, span)?;
            emit_store(ctx, &place.ty, offset);
            return Ok(());
        }
    };
    match rhs {
        Some(value) => lower_value(ctx, value, &place.ty)?,
        None => emit_one(ctx, &place.ty),
    }
    emit_binary_op(ctx, op, &place.ty, span)?;
    ctx.emit(finish);
    Ok(())
}

fn emit_one(ctx: &mut ModuleContext<'_>, ty: &Type) {
    match ty.val_type() {
        Some(ValType::I64) => ctx.emit(Instruction::I64Const(1)),
        _ => ctx.emit(Instruction::I32Const(1)),
    }
}

// =============================================================================
// Jumps
// =============================================================================

fn lower_return(ctx: &mut ModuleContext<'_>, value: Option<ExprId>, span: &Span) -> CompileResult<()> {
    if ctx.func.defer_depth > 0 {
        return Err(CompileError::type_mismatch(span, "`return` is not allowed in a deferred statement"));
    }
    let ret = ctx.func.ret.clone();
    let passing = ctx
        .func
        .abi
        .as_ref()
        .map_or(ReturnPassing::Void, |abi| abi.ret.clone());

    // The result is evaluated into temporaries before any defer runs.
    let mut results = Vec::new();
    match (value, &passing) {
        (None, ReturnPassing::Void) => {}
        (None, _) => {
            return Err(CompileError::type_mismatch(
                span,
                format!("`return` without a value in a function returning `{}`", ret),
            ))
        }
        (Some(value), ReturnPassing::Void) => {
            let found = lower_expr(ctx, value, None)?;
            if found != Type::Void {
                return Err(ctx.mismatch(span, &Type::Void, &found));
            }
        }
        (Some(value), ReturnPassing::Direct(vt)) => {
            lower_value(ctx, value, &ret)?;
            let tmp = ctx.func.alloc_local(*vt);
            ctx.emit(Instruction::LocalSet(tmp));
            results.push(tmp);
        }
        (Some(value), ReturnPassing::Lanes(lanes)) => {
            lower_value(ctx, value, &ret)?;
            let addr = ctx.func.alloc_local(ValType::I32);
            ctx.emit(Instruction::LocalSet(addr));
            for lane in lanes {
                let tmp = ctx.func.alloc_local(lane.val_type());
                ctx.emit(Instruction::LocalGet(addr));
                emit_load(ctx, &lane.ty, lane.offset);
                ctx.emit(Instruction::LocalSet(tmp));
                results.push(tmp);
            }
        }
        (Some(value), ReturnPassing::Sret) => {
            ctx.emit(Instruction::LocalGet(0));
            lower_value(ctx, value, &ret)?;
            let size = ctx.layouts.size_of(&ret);
            emit_copy(ctx, size);
        }
    }

    flush_frames(ctx, 0)?;
    emit_epilogue(ctx);
    for tmp in results {
        ctx.emit(Instruction::LocalGet(tmp));
    }
    ctx.emit(Instruction::Return);
    Ok(())
}

fn lower_jump(ctx: &mut ModuleContext<'_>, label: Option<&str>, is_continue: bool, span: &Span) -> CompileResult<()> {
    let keyword = if is_continue { "continue" } else { "break" };
    let target = match ctx.func.find_target(label) {
        Some(target) => target.clone(),
        None => {
            let message = match label {
                Some(name) => format!("unknown label `'{}`", name),
                None => format!("`{}` outside of a loop", keyword),
            };
            return Err(CompileError::new(ErrorKind::UnknownLabel, span, message));
        }
    };
    let level = if is_continue {
        match target.continue_level {
            Some(level) => level,
            None => {
                return Err(CompileError::new(
                    ErrorKind::UnknownLabel,
                    span,
                    format!("`continue` cannot target the block `'{}`", label.unwrap_or_default()),
                ))
            }
        }
    } else {
        target.break_level
    };
    flush_frames(ctx, target.scope_depth)?;
    let depth = ctx.func.branch_depth(level);
    ctx.emit(Instruction::Br(depth));
    Ok(())
}

// =============================================================================
// Loops
// =============================================================================

/// `loop` and `while`: `block { loop { [cond; br_if exit] body; br head } }`.
fn lower_loop(
    ctx: &mut ModuleContext<'_>,
    label: Option<String>,
    cond: Option<ExprId>,
    body: &Block,
) -> CompileResult<()> {
    ctx.emit(Instruction::Block(BlockType::Empty));
    ctx.func.control_depth += 1;
    let exit = ctx.func.control_depth;
    ctx.emit(Instruction::Loop(BlockType::Empty));
    ctx.func.control_depth += 1;
    let head = ctx.func.control_depth;

    if let Some(cond) = cond {
        lower_condition(ctx, cond)?;
        ctx.emit(Instruction::I32Eqz);
        ctx.emit(Instruction::BrIf(ctx.func.branch_depth(exit)));
    }

    ctx.func.loops.push(LoopFrame {
        label,
        scope_depth: ctx.func.scopes.len(),
        break_level: exit,
        continue_level: Some(head),
    });
    lower_block(ctx, body)?;
    ctx.func.loops.pop();

    ctx.emit(Instruction::Br(ctx.func.branch_depth(head)));
    ctx.emit(Instruction::End);
    ctx.emit(Instruction::End);
    ctx.func.control_depth -= 2;
    Ok(())
}

/// `for var in start..end`: the end bound is evaluated once, and `continue`
/// lands on the increment.
fn lower_for(
    ctx: &mut ModuleContext<'_>,
    label: Option<String>,
    var: &str,
    start: ExprId,
    end: ExprId,
    body: &Block,
    span: &Span,
) -> CompileResult<()> {
    ctx.func.push_scope();
    let ty = lower_operands(ctx, start, end, None, BinaryOp::Lt, span)?;
    if !ty.is_int() {
        return Err(CompileError::type_mismatch(
            span,
            format!("range bounds must be integers, found `{}`", ty),
        ));
    }
    let end_local = ctx.func.alloc_local(ty.val_type().unwrap_or(ValType::I32));
    ctx.emit(Instruction::LocalSet(end_local));
    store_new_binding(ctx, var, ty.clone());
    let binding = ctx
        .func
        .lookup(var)
        .cloned()
        .ok_or_else(|| CompileError::unknown_symbol(span, "variable", var))?;

    ctx.emit(Instruction::Block(BlockType::Empty));
    ctx.func.control_depth += 1;
    let exit = ctx.func.control_depth;
    ctx.emit(Instruction::Loop(BlockType::Empty));
    ctx.func.control_depth += 1;
    let head = ctx.func.control_depth;

    let place = binding_place(ctx, binding.clone());
    read_place(ctx, &place);
    ctx.emit(Instruction::LocalGet(end_local));
    emit_binary_op(ctx, BinaryOp::Ge, &ty, span)?;
    ctx.emit(Instruction::BrIf(ctx.func.branch_depth(exit)));

    ctx.emit(Instruction::Block(BlockType::Empty));
    ctx.func.control_depth += 1;
    let step = ctx.func.control_depth;
    ctx.func.loops.push(LoopFrame {
        label,
        scope_depth: ctx.func.scopes.len(),
        break_level: exit,
        continue_level: Some(step),
    });
    lower_block(ctx, body)?;
    ctx.func.loops.pop();
    ctx.emit(Instruction::End);
    ctx.func.control_depth -= 1;

    let place = binding_place(ctx, binding);
    update_place(ctx, &place, BinaryOp::Add, None, span)?;
    ctx.emit(Instruction::Br(ctx.func.branch_depth(head)));
    ctx.emit(Instruction::End);
    ctx.emit(Instruction::End);
    ctx.func.control_depth -= 2;
    exit_scope(ctx)
}

// =============================================================================
// Match
// =============================================================================

/// Dispatch on an enum's tag. Each arm is a block that is skipped when the
/// tag differs; a taken arm branches to the end of the whole match.
fn lower_match(ctx: &mut ModuleContext<'_>, scrutinee: ExprId, arms: &[MatchArm], span: &Span) -> CompileResult<()> {
    let found = lower_expr(ctx, scrutinee, None)?;
    let enum_name = match &found {
        Type::Enum(name) => name.clone(),
        Type::Pointer(inner) => match &**inner {
            Type::Enum(name) => name.clone(),
            _ => return Err(not_an_enum(span, &found)),
        },
        _ => return Err(not_an_enum(span, &found)),
    };
    let symbols = ctx.symbols;
    let def = symbols
        .enum_def(&enum_name)
        .ok_or_else(|| CompileError::unknown_symbol(span, "enum", &enum_name))?;
    let enum_ty = Type::Enum(enum_name.clone());
    let payload_offset = match ctx.layouts.layout_of(&enum_ty).shape {
        Shape::Enum { payload_offset, .. } => payload_offset,
        _ => ENUM_TAG_SIZE,
    };

    let addr = ctx.func.alloc_local(ValType::I32);
    ctx.emit(Instruction::LocalTee(addr));
    emit_load(ctx, &Type::U32, 0);
    let tag = ctx.func.alloc_local(ValType::I32);
    ctx.emit(Instruction::LocalSet(tag));

    ctx.emit(Instruction::Block(BlockType::Empty));
    ctx.func.control_depth += 1;
    let end = ctx.func.control_depth;

    for arm in arms {
        match &arm.pattern {
            Pattern::Wildcard(_) => {
                lower_block(ctx, &arm.body)?;
                ctx.emit(Instruction::Br(ctx.func.branch_depth(end)));
            }
            Pattern::Variant {
                path,
                binding,
                span: pat_span,
            } => {
                let variant = match path.rsplit_once("::") {
                    Some((prefix, variant)) if prefix == enum_name => variant,
                    _ => {
                        return Err(CompileError::type_mismatch(
                            pat_span,
                            format!("pattern `{}` does not match type `{}`", path, enum_name),
                        ))
                    }
                };
                let (index, variant_def) = def
                    .variant(variant)
                    .ok_or_else(|| CompileError::unknown_symbol(pat_span, "variant", path))?;
                let payload = match (binding, &variant_def.payload) {
                    (Some(name), Some(ty)) => Some((name, ty.clone())),
                    (Some(_), None) => {
                        return Err(CompileError::type_mismatch(
                            pat_span,
                            format!("variant `{}` carries no payload", path),
                        ))
                    }
                    (None, _) => None,
                };

                ctx.emit(Instruction::Block(BlockType::Empty));
                ctx.func.control_depth += 1;
                ctx.emit(Instruction::LocalGet(tag));
                ctx.emit(Instruction::I32Const(index as i32));
                ctx.emit(Instruction::I32Ne);
                ctx.emit(Instruction::BrIf(0));

                ctx.func.push_scope();
                if let Some((name, ty)) = payload {
                    ctx.emit(Instruction::LocalGet(addr));
                    emit_load(ctx, &ty, payload_offset);
                    store_new_binding(ctx, name, ty);
                }
                lower_block(ctx, &arm.body)?;
                exit_scope(ctx)?;
                ctx.emit(Instruction::Br(ctx.func.branch_depth(end)));

                ctx.emit(Instruction::End);
                ctx.func.control_depth -= 1;
            }
        }
    }

    ctx.emit(Instruction::End);
    ctx.func.control_depth -= 1;
    Ok(())
}

fn not_an_enum(span: &Span, found: &Type) -> CompileError {
    CompileError::type_mismatch(span, format!("cannot match on a value of type `{}`", found))
}
