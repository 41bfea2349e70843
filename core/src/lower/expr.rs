/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Expression Lowering for the Lo Compiler.
 *
 * Every expression leaves exactly one value on the operand stack (none for
 * void calls) and reports its resolved type. Aggregates are represented by
 * the i32 address of their storage.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use super::call::{lower_call, lower_enum_value, lower_method_call};
use super::place::{
    add_offset, emit_copy, emit_store, is_variable, lower_addr_of, lower_place, read_place,
};
use crate::ast::{BinaryOp, ExprId, ExprKind, FieldInit, Span, UnaryOp};
use crate::consts::{float_literal_type, int_literal_type, split_variant};
use crate::context::ModuleContext;
use crate::error::{CompileError, CompileResult};
use crate::layout::Shape;
use crate::types::{Scalar, Type};
use wasm_encoder::{BlockType, Instruction, ValType};

/// Lower `id`, pushing its value. `hint` is the type the context expects;
/// only untyped literals consult it.
pub fn lower_expr(ctx: &mut ModuleContext<'_>, id: ExprId, hint: Option<&Type>) -> CompileResult<Type> {
    let ast = ctx.ast;
    let expr = ast.expr(id);
    let span = &expr.span;
    match &expr.kind {
        ExprKind::Int { value, suffix } => lower_int(ctx, *value as i128, suffix.as_deref(), hint, span),
        ExprKind::Float { value, suffix } => {
            let ty = float_literal_type(suffix.as_deref(), hint, span)?;
            emit_float(ctx, &ty, *value);
            Ok(ty)
        }
        ExprKind::Bool(b) => {
            ctx.emit(Instruction::I32Const(*b as i32));
            Ok(Type::BOOL)
        }
        ExprKind::Char(c) => {
            ctx.emit(Instruction::I32Const(*c as i32));
            Ok(Type::U8)
        }
        ExprKind::Str(bytes) => {
            let interned = ctx.builder.intern_str(bytes);
            ctx.emit(Instruction::I32Const(interned.descriptor as i32));
            Ok(Type::str())
        }
        ExprKind::Path(name) => {
            if is_variable(ctx, name) {
                let place = lower_place(ctx, id)?;
                read_place(ctx, &place);
                return Ok(place.ty);
            }
            match split_variant(ctx, name) {
                Some((enum_name, variant)) => lower_enum_value(ctx, enum_name, variant, &[], span),
                None => Err(CompileError::unknown_symbol(span, "variable", name)),
            }
        }
        ExprKind::Unary { op, operand } => lower_unary(ctx, *op, *operand, hint, span),
        ExprKind::Binary { op, lhs, rhs } => lower_binary(ctx, *op, *lhs, *rhs, hint, span),
        ExprKind::Cast { expr, ty } => {
            let target = ctx.resolve_type(ty)?;
            let from = lower_expr(ctx, *expr, None)?;
            emit_cast(ctx, &from, &target, span)?;
            Ok(target)
        }
        ExprKind::Call { callee, args } => lower_call(ctx, callee, args, span),
        ExprKind::MethodCall {
            receiver,
            method,
            args,
        } => lower_method_call(ctx, *receiver, method, args, span),
        ExprKind::Field { .. } | ExprKind::Index { .. } | ExprKind::Deref(_) => {
            let place = lower_place(ctx, id)?;
            read_place(ctx, &place);
            Ok(place.ty)
        }
        ExprKind::StructLit { name, fields } => lower_struct_lit(ctx, name, fields, span),
        ExprKind::SizeOf(ty) => {
            let ty = ctx.resolve_type(ty)?;
            let size = ctx.layouts.size_of(&ty);
            ctx.emit(Instruction::I32Const(size as i32));
            Ok(Type::U32)
        }
        ExprKind::AddrOf(inner) => lower_addr_of(ctx, *inner, span),
    }
}

/// Lower `id` as a value of type `expected`, inserting implicit widening.
pub fn lower_value(ctx: &mut ModuleContext<'_>, id: ExprId, expected: &Type) -> CompileResult<()> {
    let found = lower_expr(ctx, id, Some(expected))?;
    let span = ctx.ast.expr(id).span.clone();
    coerce(ctx, &found, expected, &span)
}

/// Lower a condition; it must be `bool`.
pub fn lower_condition(ctx: &mut ModuleContext<'_>, id: ExprId) -> CompileResult<()> {
    lower_value(ctx, id, &Type::BOOL)
}

// =============================================================================
// Literals
// =============================================================================

fn lower_int(
    ctx: &mut ModuleContext<'_>,
    value: i128,
    suffix: Option<&str>,
    hint: Option<&Type>,
    span: &Span,
) -> CompileResult<Type> {
    if suffix.is_none() {
        if let Some(ty @ Type::Scalar(s)) = hint {
            if s.is_float() {
                emit_float(ctx, ty, value as f64);
                return Ok(ty.clone());
            }
        }
    }
    let ty = int_literal_type(value, suffix, hint, span)?;
    match ty.val_type() {
        Some(ValType::I64) => ctx.emit(Instruction::I64Const(value as i64)),
        _ => ctx.emit(Instruction::I32Const(value as i32)),
    }
    Ok(ty)
}

fn emit_float(ctx: &mut ModuleContext<'_>, ty: &Type, value: f64) {
    if *ty == Type::Scalar(Scalar::F32) {
        ctx.emit(Instruction::F32Const((value as f32).into()));
    } else {
        ctx.emit(Instruction::F64Const(value.into()));
    }
}

// =============================================================================
// Conversions
// =============================================================================

/// Implicit conversion from `from` to `to`; anything outside the widening
/// table is a mismatch.
pub fn coerce(ctx: &mut ModuleContext<'_>, from: &Type, to: &Type, span: &Span) -> CompileResult<()> {
    if from == to {
        return Ok(());
    }
    if !from.coerces_to(to) {
        return Err(ctx.mismatch(span, to, from));
    }
    if let (Some(a), Some(b)) = (from.scalar(), to.scalar()) {
        if a.val_type() == ValType::I32 && b.val_type() == ValType::I64 {
            ctx.emit(if a.is_signed() {
                Instruction::I64ExtendI32S
            } else {
                Instruction::I64ExtendI32U
            });
        } else if a == Scalar::F32 && b == Scalar::F64 {
            ctx.emit(Instruction::F64PromoteF32);
        }
    }
    Ok(())
}

/// Re-establish the canonical representation of a narrow integer.
pub fn normalize(ctx: &mut ModuleContext<'_>, scalar: Scalar) {
    match scalar {
        Scalar::U8 => {
            ctx.emit(Instruction::I32Const(0xFF));
            ctx.emit(Instruction::I32And);
        }
        Scalar::U16 => {
            ctx.emit(Instruction::I32Const(0xFFFF));
            ctx.emit(Instruction::I32And);
        }
        Scalar::I8 => ctx.emit(Instruction::I32Extend8S),
        Scalar::I16 => ctx.emit(Instruction::I32Extend16S),
        _ => {}
    }
}

/// Explicit `as` conversion.
pub fn emit_cast(ctx: &mut ModuleContext<'_>, from: &Type, to: &Type, span: &Span) -> CompileResult<()> {
    if from == to {
        return Ok(());
    }
    let bad = || CompileError::type_mismatch(span, format!("cannot cast `{}` to `{}`", from, to));
    // Pointers convert like `u32`.
    let as_scalar = |ty: &Type| match ty {
        Type::Scalar(s) => Some(*s),
        Type::Pointer(_) => Some(Scalar::U32),
        _ => None,
    };
    let (a, b) = match (as_scalar(from), as_scalar(to)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(bad()),
    };
    if (to.is_pointer() && a.is_float()) || (from.is_pointer() && b.is_float()) {
        return Err(bad());
    }
    // `bool` converts as a `u8` source.
    let a = if a == Scalar::Bool { Scalar::U8 } else { a };
    if b == Scalar::Bool {
        match a.val_type() {
            ValType::I64 => {
                ctx.emit(Instruction::I64Const(0));
                ctx.emit(Instruction::I64Ne);
            }
            ValType::I32 => {
                ctx.emit(Instruction::I32Const(0));
                ctx.emit(Instruction::I32Ne);
            }
            _ => return Err(bad()),
        }
        return Ok(());
    }
    use Instruction as I;
    let wide_src = a.val_type() == ValType::I64;
    let wide_dst = b.val_type() == ValType::I64;
    match (a.is_float(), b.is_float()) {
        (false, false) => {
            if wide_src && !wide_dst {
                ctx.emit(I::I32WrapI64);
            } else if !wide_src && wide_dst {
                ctx.emit(if a.is_signed() { I::I64ExtendI32S } else { I::I64ExtendI32U });
            }
            normalize(ctx, b);
        }
        (false, true) => {
            let signed = a.is_signed();
            ctx.emit(match (b, wide_src, signed) {
                (Scalar::F32, false, true) => I::F32ConvertI32S,
                (Scalar::F32, false, false) => I::F32ConvertI32U,
                (Scalar::F32, true, true) => I::F32ConvertI64S,
                (Scalar::F32, true, false) => I::F32ConvertI64U,
                (_, false, true) => I::F64ConvertI32S,
                (_, false, false) => I::F64ConvertI32U,
                (_, true, true) => I::F64ConvertI64S,
                (_, true, false) => I::F64ConvertI64U,
            });
        }
        (true, false) => {
            let signed = b.is_signed();
            ctx.emit(match (a, wide_dst, signed) {
                (Scalar::F32, false, true) => I::I32TruncSatF32S,
                (Scalar::F32, false, false) => I::I32TruncSatF32U,
                (Scalar::F32, true, true) => I::I64TruncSatF32S,
                (Scalar::F32, true, false) => I::I64TruncSatF32U,
                (_, false, true) => I::I32TruncSatF64S,
                (_, false, false) => I::I32TruncSatF64U,
                (_, true, true) => I::I64TruncSatF64S,
                (_, true, false) => I::I64TruncSatF64U,
            });
            normalize(ctx, b);
        }
        (true, true) => {
            if a == Scalar::F32 && b == Scalar::F64 {
                ctx.emit(I::F64PromoteF32);
            } else if a == Scalar::F64 && b == Scalar::F32 {
                ctx.emit(I::F32DemoteF64);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Operators
// =============================================================================

fn lower_unary(
    ctx: &mut ModuleContext<'_>,
    op: UnaryOp,
    operand: ExprId,
    hint: Option<&Type>,
    span: &Span,
) -> CompileResult<Type> {
    let ast = ctx.ast;
    match op {
        UnaryOp::Neg => {
            match &ast.expr(operand).kind {
                ExprKind::Int { value, suffix } => {
                    return lower_int(ctx, -(*value as i128), suffix.as_deref(), hint, span)
                }
                ExprKind::Float { value, suffix } => {
                    let ty = float_literal_type(suffix.as_deref(), hint, span)?;
                    emit_float(ctx, &ty, -*value);
                    return Ok(ty);
                }
                _ => {}
            }
            let ty = lower_expr(ctx, operand, hint)?;
            match ty.scalar() {
                Some(Scalar::F32) => ctx.emit(Instruction::F32Neg),
                Some(Scalar::F64) => ctx.emit(Instruction::F64Neg),
                Some(Scalar::I64) => {
                    ctx.emit(Instruction::I64Const(-1));
                    ctx.emit(Instruction::I64Mul);
                }
                Some(s) if s.is_int() && s.is_signed() => {
                    ctx.emit(Instruction::I32Const(-1));
                    ctx.emit(Instruction::I32Mul);
                    normalize(ctx, s);
                }
                _ => {
                    return Err(CompileError::type_mismatch(
                        span,
                        format!("cannot negate a value of type `{}`", ty),
                    ))
                }
            }
            Ok(ty)
        }
        UnaryOp::Not => {
            lower_condition(ctx, operand)?;
            ctx.emit(Instruction::I32Eqz);
            Ok(Type::BOOL)
        }
        UnaryOp::BitNot => {
            let ty = lower_expr(ctx, operand, hint)?;
            match ty.scalar() {
                Some(s) if s.is_wide() => {
                    ctx.emit(Instruction::I64Const(-1));
                    ctx.emit(Instruction::I64Xor);
                }
                Some(s) if s.is_int() => {
                    ctx.emit(Instruction::I32Const(-1));
                    ctx.emit(Instruction::I32Xor);
                    normalize(ctx, s);
                }
                _ => {
                    return Err(CompileError::type_mismatch(
                        span,
                        format!("`~` needs an integer, found `{}`", ty),
                    ))
                }
            }
            Ok(ty)
        }
    }
}

fn lower_binary(
    ctx: &mut ModuleContext<'_>,
    op: BinaryOp,
    lhs: ExprId,
    rhs: ExprId,
    hint: Option<&Type>,
    span: &Span,
) -> CompileResult<Type> {
    if op.is_logical() {
        lower_condition(ctx, lhs)?;
        ctx.emit(Instruction::If(BlockType::Result(ValType::I32)));
        ctx.func.control_depth += 1;
        if op == BinaryOp::And {
            lower_condition(ctx, rhs)?;
            ctx.emit(Instruction::Else);
            ctx.emit(Instruction::I32Const(0));
        } else {
            ctx.emit(Instruction::I32Const(1));
            ctx.emit(Instruction::Else);
            lower_condition(ctx, rhs)?;
        }
        ctx.emit(Instruction::End);
        ctx.func.control_depth -= 1;
        return Ok(Type::BOOL);
    }
    let operand_hint = if op.is_comparison() { None } else { hint };
    let ty = lower_operands(ctx, lhs, rhs, operand_hint, op, span)?;
    emit_binary_op(ctx, op, &ty, span)
}

/// Push both operands converted to a common type and return that type.
///
/// An untyped literal on the left takes its type from the right operand,
/// so the right side is lowered first into a scratch buffer.
pub fn lower_operands(
    ctx: &mut ModuleContext<'_>,
    lhs: ExprId,
    rhs: ExprId,
    hint: Option<&Type>,
    op: BinaryOp,
    span: &Span,
) -> CompileResult<Type> {
    let ast = ctx.ast;
    let (lt, rt) = if ast.is_untyped_literal(lhs) && !ast.is_untyped_literal(rhs) {
        let (rt, rhs_code) = ctx.capture(|ctx| lower_expr(ctx, rhs, hint))?;
        let lt = lower_expr(ctx, lhs, Some(&rt))?;
        ctx.splice(rhs_code);
        (lt, rt)
    } else {
        let lt = lower_expr(ctx, lhs, hint)?;
        let rt = lower_expr(ctx, rhs, Some(&lt))?;
        (lt, rt)
    };
    if lt == rt {
        return Ok(lt);
    }
    if rt.coerces_to(&lt) {
        coerce(ctx, &rt, &lt, span)?;
        return Ok(lt);
    }
    if lt.coerces_to(&rt) {
        if lt.val_type() == rt.val_type() {
            return Ok(rt);
        }
        let vt = rt.val_type().unwrap_or(ValType::I32);
        let tmp = ctx.func.alloc_local(vt);
        ctx.emit(Instruction::LocalSet(tmp));
        coerce(ctx, &lt, &rt, span)?;
        ctx.emit(Instruction::LocalGet(tmp));
        return Ok(rt);
    }
    Err(CompileError::type_mismatch(
        span,
        format!(
            "mismatched operand types `{}` and `{}` for `{}`",
            lt,
            rt,
            op.symbol()
        ),
    ))
}

/// `[a, b] -> [a op b]` on operands of type `ty`. Returns the result type.
pub fn emit_binary_op(ctx: &mut ModuleContext<'_>, op: BinaryOp, ty: &Type, span: &Span) -> CompileResult<Type> {
    use BinaryOp as B;
    use Instruction as I;
    let invalid = || {
        CompileError::type_mismatch(
            span,
            format!("operator `{}` is not defined for `{}`", op.symbol(), ty),
        )
    };
    let scalar = match ty {
        Type::Scalar(s) => *s,
        Type::Pointer(_) if op.is_comparison() => Scalar::U32,
        _ => return Err(invalid()),
    };
    if scalar == Scalar::Bool
        && !matches!(op, B::Eq | B::Ne | B::BitAnd | B::BitOr | B::BitXor)
    {
        return Err(invalid());
    }
    let signed = scalar.is_signed();
    let instr = match scalar.val_type() {
        ValType::I32 => match op {
            B::Add => I::I32Add,
            B::Sub => I::I32Sub,
            B::Mul => I::I32Mul,
            B::Div if signed => I::I32DivS,
            B::Div => I::I32DivU,
            B::Rem if signed => I::I32RemS,
            B::Rem => I::I32RemU,
            B::BitAnd => I::I32And,
            B::BitOr => I::I32Or,
            B::BitXor => I::I32Xor,
            B::Shl => I::I32Shl,
            B::Shr if signed => I::I32ShrS,
            B::Shr => I::I32ShrU,
            B::Eq => I::I32Eq,
            B::Ne => I::I32Ne,
            B::Lt if signed => I::I32LtS,
            B::Lt => I::I32LtU,
            B::Le if signed => I::I32LeS,
            B::Le => I::I32LeU,
            B::Gt if signed => I::I32GtS,
            B::Gt => I::I32GtU,
            B::Ge if signed => I::I32GeS,
            B::Ge => I::I32GeU,
            B::And | B::Or => return Err(invalid()),
        },
        ValType::I64 => match op {
            B::Add => I::I64Add,
            B::Sub => I::I64Sub,
            B::Mul => I::I64Mul,
            B::Div if signed => I::I64DivS,
            B::Div => I::I64DivU,
            B::Rem if signed => I::I64RemS,
            B::Rem => I::I64RemU,
            B::BitAnd => I::I64And,
            B::BitOr => I::I64Or,
            B::BitXor => I::I64Xor,
            B::Shl => I::I64Shl,
            B::Shr if signed => I::I64ShrS,
            B::Shr => I::I64ShrU,
            B::Eq => I::I64Eq,
            B::Ne => I::I64Ne,
            B::Lt if signed => I::I64LtS,
            B::Lt => I::I64LtU,
            B::Le if signed => I::I64LeS,
            B::Le => I::I64LeU,
            B::Gt if signed => I::I64GtS,
            B::Gt => I::I64GtU,
            B::Ge if signed => I::I64GeS,
            B::Ge => I::I64GeU,
            B::And | B::Or => return Err(invalid()),
        },
        ValType::F32 => match op {
            B::Add => I::F32Add,
            B::Sub => I::F32Sub,
            B::Mul => I::F32Mul,
            B::Div => I::F32Div,
            B::Eq => I::F32Eq,
            B::Ne => I::F32Ne,
            B::Lt => I::F32Lt,
            B::Le => I::F32Le,
            B::Gt => I::F32Gt,
            B::Ge => I::F32Ge,
            _ => return Err(invalid()),
        },
        _ => match op {
            B::Add => I::F64Add,
            B::Sub => I::F64Sub,
            B::Mul => I::F64Mul,
            B::Div => I::F64Div,
            B::Eq => I::F64Eq,
            B::Ne => I::F64Ne,
            B::Lt => I::F64Lt,
            B::Le => I::F64Le,
            B::Gt => I::F64Gt,
            B::Ge => I::F64Ge,
            _ => return Err(invalid()),
        },
    };
    ctx.emit(instr);
    if op.is_comparison() {
        return Ok(Type::BOOL);
    }
    normalize(ctx, scalar);
    Ok(ty.clone())
}

// =============================================================================
// Aggregate Construction
// =============================================================================

/// Build a struct value in a fresh frame slot, fields in declared order,
/// and push its address.
fn lower_struct_lit(
    ctx: &mut ModuleContext<'_>,
    name: &str,
    inits: &[FieldInit],
    span: &Span,
) -> CompileResult<Type> {
    let symbols = ctx.symbols;
    let def = symbols
        .struct_def(name)
        .ok_or_else(|| CompileError::unknown_symbol(span, "struct", name))?;
    def.check_initializer(inits, span)?;
    let ty = Type::Struct(name.to_string());
    let layout = ctx.layouts.layout_of(&ty);
    let slot = ctx.alloc_temp(&ty);
    if let Shape::Struct(fields) = &layout.shape {
        for field in fields {
            let value = match inits.iter().find(|i| i.name == field.name) {
                Some(init) => init.value,
                None => continue,
            };
            ctx.func.frame_address(slot);
            store_value(ctx, &field.ty, field.offset, value)?;
        }
    }
    ctx.func.frame_address(slot);
    Ok(ty)
}

/// `[addr] -> []`: write the value of `value` to `addr + offset`.
pub fn store_value(ctx: &mut ModuleContext<'_>, ty: &Type, offset: u32, value: ExprId) -> CompileResult<()> {
    if ty.is_aggregate() {
        add_offset(ctx, offset);
        lower_value(ctx, value, ty)?;
        let size = ctx.layouts.size_of(ty);
        emit_copy(ctx, size);
    } else {
        lower_value(ctx, value, ty)?;
        emit_store(ctx, ty, offset);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::context::FunctionContext;
    use crate::layout::{FunctionAbi, LayoutTable, ReturnPassing};
    use crate::parser::parse_program;
    use crate::symbols::SymbolTable;

    /// Lower the initializer of the first `let` in `main` and return the
    /// instructions and type it produced.
    fn lower_first_let(src: &str) -> CompileResult<(Type, Vec<String>)> {
        let ast = parse_program(src, "test.lo").expect("parse failed");
        let symbols = SymbolTable::collect(&ast).expect("symbols");
        let layouts = LayoutTable::compute(&symbols).expect("layouts");
        let options = CompileOptions::default();
        let mut ctx = ModuleContext::new(&ast, &symbols, &layouts, &options);
        let abi = FunctionAbi {
            params: vec![],
            ret: ReturnPassing::Void,
        };
        ctx.func = FunctionContext::new("main", Type::Void, abi, vec![]);
        ctx.func.push_scope();
        let init = ast
            .items()
            .find_map(|(_, item)| match &item.kind {
                crate::ast::ItemKind::Function(f) => f.body.stmts.first().copied(),
                _ => None,
            })
            .and_then(|stmt| match &ast.stmt(stmt).kind {
                crate::ast::StmtKind::Let { init, .. } => Some(*init),
                _ => None,
            })
            .expect("no let");
        let ty = lower_expr(&mut ctx, init, None)?;
        let code = ctx.func.instructions.iter().map(|i| format!("{:?}", i)).collect();
        Ok((ty, code))
    }

    #[test]
    fn test_literal_defaults() {
        let (ty, code) = lower_first_let("fn main() { let x = 7; }").unwrap();
        assert_eq!(ty, Type::U32);
        assert_eq!(code, ["I32Const(7)"]);
        let (ty, _) = lower_first_let("fn main() { let x = 5000000000; }").unwrap();
        assert_eq!(ty, Type::Scalar(Scalar::U64));
        let (ty, _) = lower_first_let("fn main() { let x = 1.5; }").unwrap();
        assert_eq!(ty, Type::Scalar(Scalar::F64));
    }

    #[test]
    fn test_literal_adopts_other_operand_type() {
        let (ty, code) = lower_first_let("fn main() { let x = 1 + 2u64; }").unwrap();
        assert_eq!(ty, Type::Scalar(Scalar::U64));
        assert_eq!(code, ["I64Const(1)", "I64Const(2)", "I64Add"]);
    }

    #[test]
    fn test_narrow_arithmetic_is_normalised() {
        let (ty, code) = lower_first_let("fn main() { let x = 200u8 + 100u8; }").unwrap();
        assert_eq!(ty, Type::U8);
        assert_eq!(code[2..], ["I32Add", "I32Const(255)", "I32And"]);
    }

    #[test]
    fn test_signedness_selects_instruction() {
        let (_, code) = lower_first_let("fn main() { let x = -7 / 2; }").unwrap();
        assert_eq!(code.last().map(String::as_str), Some("I32DivS"));
        let (_, code) = lower_first_let("fn main() { let x = 7 / 2; }").unwrap();
        assert_eq!(code.last().map(String::as_str), Some("I32DivU"));
    }

    #[test]
    fn test_implicit_widening_and_rejections() {
        let (ty, code) = lower_first_let("fn main() { let x = 3u8 + 4u32; }").unwrap();
        assert_eq!(ty, Type::U32);
        assert_eq!(code.len(), 3, "u8 is already a valid u32: {:?}", code);
        let err = lower_first_let("fn main() { let x = 3i32 + 4u32; }").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::TypeMismatch);
        let err = lower_first_let("fn main() { let x = 1.0 + 2u32; }").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_out_of_range_literal() {
        let err = lower_first_let("fn main() { let x = 256u8; }").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_casts() {
        let (ty, code) = lower_first_let("fn main() { let x = -1 as u64; }").unwrap();
        assert_eq!(ty, Type::Scalar(Scalar::U64));
        assert_eq!(code, ["I32Const(-1)", "I64ExtendI32S"]);
        let (_, code) = lower_first_let("fn main() { let x = 2.9 as u8; }").unwrap();
        assert_eq!(code[1..], ["I32TruncSatF64U", "I32Const(255)", "I32And"]);
    }

    #[test]
    fn test_logical_and_short_circuits() {
        let (ty, code) = lower_first_let("fn main() { let x = true && false; }").unwrap();
        assert_eq!(ty, Type::BOOL);
        assert!(code[1].starts_with("If("), "{:?}", code);
        assert_eq!(code.last().map(String::as_str), Some("End"));
    }

    #[test]
    fn test_unknown_variable() {
        let err = lower_first_let("fn main() { let x = nope; }").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UnknownSymbol);
        assert_eq!(err.message, "unknown variable: nope");
    }
}
