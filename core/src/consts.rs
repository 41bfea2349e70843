/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Constant Folding for the Lo Compiler.
 *
 * Global initialisers are evaluated at compile time into either a WASM
 * global's init expression or bytes of the static data image. Literal
 * typing rules live here too, shared with the expression lowering.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use crate::ast::{BinaryOp, ExprId, ExprKind, FieldInit, ItemKind, Span, UnaryOp};
use crate::builder::GlobalInit;
use crate::context::{GlobalSlot, ModuleContext};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::layout::{Shape, ENUM_TAG_SIZE};
use crate::types::{Scalar, Type};

// =============================================================================
// Literal Typing
// =============================================================================

/// Type of an integer literal: its suffix, else the contextual type, else
/// `u32` (`i32` when negative), widening to 64 bits when the value needs it.
pub fn int_literal_type(
    value: i128,
    suffix: Option<&str>,
    hint: Option<&Type>,
    span: &Span,
) -> CompileResult<Type> {
    let ty = match suffix {
        Some(s) => match Scalar::from_name(s) {
            Some(scalar) if scalar != Scalar::Bool => Type::Scalar(scalar),
            _ => {
                return Err(CompileError::type_mismatch(
                    span,
                    format!("invalid literal suffix `{}`", s),
                ))
            }
        },
        None => match hint {
            Some(Type::Scalar(s)) if *s != Scalar::Bool => Type::Scalar(*s),
            Some(ptr @ Type::Pointer(_)) => ptr.clone(),
            _ if value < 0 => {
                if value >= i32::MIN as i128 {
                    Type::I32
                } else {
                    Type::Scalar(Scalar::I64)
                }
            }
            _ if value > u32::MAX as i128 => Type::Scalar(Scalar::U64),
            _ => Type::U32,
        },
    };
    let (lo, hi) = match &ty {
        Type::Scalar(s) => s.int_range(),
        _ => Scalar::U32.int_range(),
    };
    if value < lo || value > hi {
        return Err(CompileError::type_mismatch(
            span,
            format!("literal `{}` does not fit in `{}`", value, ty),
        ));
    }
    Ok(ty)
}

/// Type of a float literal: suffix, else a float contextual type, else `f64`.
pub fn float_literal_type(suffix: Option<&str>, hint: Option<&Type>, span: &Span) -> CompileResult<Type> {
    match suffix {
        Some("f32") => Ok(Type::Scalar(Scalar::F32)),
        Some("f64") => Ok(Type::Scalar(Scalar::F64)),
        Some(other) => Err(CompileError::type_mismatch(
            span,
            format!("invalid float suffix `{}`", other),
        )),
        None => match hint {
            Some(Type::Scalar(Scalar::F32)) => Ok(Type::Scalar(Scalar::F32)),
            _ => Ok(Type::Scalar(Scalar::F64)),
        },
    }
}

/// Reduce `value` modulo the width of `scalar`, reinterpreting as signed
/// where the type is signed.
pub fn wrap_int(value: i128, scalar: Scalar) -> i128 {
    match scalar {
        Scalar::Bool => value & 1,
        Scalar::F32 | Scalar::F64 => value,
        _ => {
            let modulus = 1i128 << (scalar.size() * 8);
            let v = value.rem_euclid(modulus);
            if scalar.is_signed() && v >= modulus / 2 {
                v - modulus
            } else {
                v
            }
        }
    }
}

/// Integer-class view of a type: pointers behave as `u32`.
fn int_scalar(ty: &Type) -> Option<Scalar> {
    match ty {
        Type::Scalar(s) if !s.is_float() => Some(*s),
        Type::Pointer(_) => Some(Scalar::U32),
        _ => None,
    }
}

// =============================================================================
// Constant Values
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    /// Integers, booleans, characters and pointers.
    Int { ty: Type, value: i128 },
    Float { ty: Type, value: f64 },
    /// Struct and enum values, as laid out in memory.
    Bytes { ty: Type, bytes: Vec<u8> },
}

impl ConstValue {
    pub fn ty(&self) -> &Type {
        match self {
            ConstValue::Int { ty, .. } | ConstValue::Float { ty, .. } | ConstValue::Bytes { ty, .. } => ty,
        }
    }

    /// Little-endian image of the value, truncated to `out.len()` bytes.
    pub fn write_into(&self, out: &mut [u8]) {
        let n = out.len();
        match self {
            ConstValue::Int { value, .. } => {
                let le = (*value as u64).to_le_bytes();
                out.copy_from_slice(&le[..n.min(8)]);
            }
            ConstValue::Float { ty, value } => {
                if *ty == Type::Scalar(Scalar::F32) {
                    out.copy_from_slice(&(*value as f32).to_bits().to_le_bytes()[..n.min(4)]);
                } else {
                    out.copy_from_slice(&value.to_bits().to_le_bytes()[..n.min(8)]);
                }
            }
            ConstValue::Bytes { bytes, .. } => out.copy_from_slice(&bytes[..n.min(bytes.len())]),
        }
    }

    /// Init expression for a WASM global holding this value.
    pub fn global_init(&self) -> Option<GlobalInit> {
        match self {
            ConstValue::Int { ty, value } => match int_scalar(ty).map(Scalar::is_wide) {
                Some(true) => Some(GlobalInit::I64(*value as i64)),
                Some(false) => Some(GlobalInit::I32(*value as i32)),
                None => None,
            },
            ConstValue::Float { ty, value } => {
                if *ty == Type::Scalar(Scalar::F32) {
                    Some(GlobalInit::F32((*value as f32).to_bits()))
                } else {
                    Some(GlobalInit::F64(value.to_bits()))
                }
            }
            ConstValue::Bytes { .. } => None,
        }
    }
}

fn non_constant(span: &Span, message: impl Into<String>) -> CompileError {
    CompileError::new(ErrorKind::NonConstantInitializer, span, message)
}

/// Split `Enum::Variant` when the prefix names an enum.
pub fn split_variant<'p>(ctx: &ModuleContext<'_>, path: &'p str) -> Option<(&'p str, &'p str)> {
    let (prefix, variant) = path.rsplit_once("::")?;
    ctx.symbols.enum_def(prefix).map(|_| (prefix, variant))
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluate `id` as a constant of type `expected`, applying implicit widening.
pub fn eval_const(ctx: &mut ModuleContext<'_>, id: ExprId, expected: &Type) -> CompileResult<ConstValue> {
    let value = eval(ctx, id, Some(expected))?;
    let span = ctx.ast.expr(id).span.clone();
    coerce_const(ctx, value, expected, &span)
}

fn coerce_const(
    ctx: &ModuleContext<'_>,
    value: ConstValue,
    target: &Type,
    span: &Span,
) -> CompileResult<ConstValue> {
    if value.ty() == target {
        return Ok(value);
    }
    if !value.ty().coerces_to(target) {
        return Err(ctx.mismatch(span, target, value.ty()));
    }
    Ok(match value {
        ConstValue::Int { value, .. } => ConstValue::Int {
            ty: target.clone(),
            value,
        },
        ConstValue::Float { value, .. } => ConstValue::Float {
            ty: target.clone(),
            value,
        },
        bytes => bytes,
    })
}

fn eval(ctx: &mut ModuleContext<'_>, id: ExprId, hint: Option<&Type>) -> CompileResult<ConstValue> {
    let ast = ctx.ast;
    let expr = ast.expr(id);
    let span = &expr.span;
    match &expr.kind {
        ExprKind::Int { value, suffix } => {
            int_const(*value as i128, suffix.as_deref(), hint, span)
        }
        ExprKind::Float { value, suffix } => Ok(ConstValue::Float {
            ty: float_literal_type(suffix.as_deref(), hint, span)?,
            value: *value,
        }),
        ExprKind::Bool(b) => Ok(ConstValue::Int {
            ty: Type::BOOL,
            value: *b as i128,
        }),
        ExprKind::Char(c) => Ok(ConstValue::Int {
            ty: Type::U8,
            value: *c as i128,
        }),
        ExprKind::Str(bytes) => {
            let s = ctx.builder.intern_str(bytes);
            let mut desc = Vec::with_capacity(8);
            desc.extend_from_slice(&s.ptr.to_le_bytes());
            desc.extend_from_slice(&s.len.to_le_bytes());
            Ok(ConstValue::Bytes {
                ty: Type::str(),
                bytes: desc,
            })
        }
        ExprKind::Path(name) => {
            if let Some(value) = ctx.global_values.get(name) {
                return Ok(value.clone());
            }
            if let Some(global) = ctx.symbols.globals.get(name) {
                let why = if global.mutable { "is mutable" } else { "is not initialised yet" };
                return Err(non_constant(span, format!("global `{}` {}", name, why)));
            }
            if let Some((enum_name, variant)) = split_variant(ctx, name) {
                return enum_const(ctx, enum_name, variant, None, span);
            }
            Err(CompileError::unknown_symbol(span, "global", name))
        }
        ExprKind::Unary { op, operand } => eval_unary(ctx, *op, *operand, hint, span),
        ExprKind::Binary { op, lhs, rhs } => {
            let bool_ty = Type::BOOL;
            let operand_hint = if op.is_comparison() {
                None
            } else if op.is_logical() {
                Some(&bool_ty)
            } else {
                hint
            };
            let (l, r) = if ast.is_untyped_literal(*lhs) && !ast.is_untyped_literal(*rhs) {
                let r = eval(ctx, *rhs, operand_hint)?;
                let l = eval(ctx, *lhs, Some(r.ty()))?;
                (l, r)
            } else {
                let l = eval(ctx, *lhs, operand_hint)?;
                let r = eval(ctx, *rhs, Some(l.ty()))?;
                (l, r)
            };
            let (l, r) = if l.ty() == r.ty() {
                (l, r)
            } else if r.ty().coerces_to(l.ty()) {
                let ty = l.ty().clone();
                (l, coerce_const(ctx, r, &ty, span)?)
            } else if l.ty().coerces_to(r.ty()) {
                let ty = r.ty().clone();
                (coerce_const(ctx, l, &ty, span)?, r)
            } else {
                return Err(CompileError::type_mismatch(
                    span,
                    format!(
                        "mismatched operand types `{}` and `{}` for `{}`",
                        l.ty(),
                        r.ty(),
                        op.symbol()
                    ),
                ));
            };
            fold_binary(*op, l, r, span)
        }
        ExprKind::Cast { expr, ty } => {
            let target = ctx.resolve_type(ty)?;
            let value = eval(ctx, *expr, None)?;
            cast_const(value, &target, span)
        }
        ExprKind::SizeOf(ty) => {
            let ty = ctx.resolve_type(ty)?;
            Ok(ConstValue::Int {
                ty: Type::U32,
                value: ctx.layouts.size_of(&ty) as i128,
            })
        }
        ExprKind::StructLit { name, fields } => struct_const(ctx, name, fields, span),
        ExprKind::Call { callee, args } if ctx.symbols.functions.get(callee).is_none() => {
            match split_variant(ctx, callee) {
                Some((enum_name, variant)) => {
                    enum_const(ctx, enum_name, variant, Some(args.as_slice()), span)
                }
                None => Err(CompileError::unknown_symbol(span, "function", callee)),
            }
        }
        _ => Err(non_constant(span, "initializer is not a compile-time constant")),
    }
}

fn int_const(value: i128, suffix: Option<&str>, hint: Option<&Type>, span: &Span) -> CompileResult<ConstValue> {
    if suffix.is_none() && matches!(hint, Some(Type::Scalar(s)) if s.is_float()) {
        return Ok(ConstValue::Float {
            ty: hint.cloned().unwrap_or_default(),
            value: value as f64,
        });
    }
    let ty = int_literal_type(value, suffix, hint, span)?;
    Ok(ConstValue::Int { ty, value })
}

fn eval_unary(
    ctx: &mut ModuleContext<'_>,
    op: UnaryOp,
    operand: ExprId,
    hint: Option<&Type>,
    span: &Span,
) -> CompileResult<ConstValue> {
    match op {
        UnaryOp::Neg => {
            if let ExprKind::Int { value, suffix } = &ctx.ast.expr(operand).kind {
                return int_const(-(*value as i128), suffix.as_deref(), hint, span);
            }
            match eval(ctx, operand, hint)? {
                ConstValue::Float { ty, value } => Ok(ConstValue::Float { ty, value: -value }),
                ConstValue::Int { ty, value } => match ty.scalar() {
                    Some(s) if s.is_int() && s.is_signed() => Ok(ConstValue::Int {
                        value: wrap_int(-value, s),
                        ty,
                    }),
                    _ => Err(CompileError::type_mismatch(
                        span,
                        format!("cannot negate a value of type `{}`", ty),
                    )),
                },
                other => Err(CompileError::type_mismatch(
                    span,
                    format!("cannot negate a value of type `{}`", other.ty()),
                )),
            }
        }
        UnaryOp::Not => match eval(ctx, operand, Some(&Type::BOOL))? {
            ConstValue::Int { ty, value } if ty == Type::BOOL => Ok(ConstValue::Int { ty, value: 1 - value }),
            other => Err(ctx.mismatch(span, &Type::BOOL, other.ty())),
        },
        UnaryOp::BitNot => match eval(ctx, operand, hint)? {
            ConstValue::Int { ty, value } if ty.is_int() => {
                let s = ty.scalar().unwrap_or(Scalar::U32);
                Ok(ConstValue::Int {
                    value: wrap_int(!value, s),
                    ty,
                })
            }
            other => Err(CompileError::type_mismatch(
                span,
                format!("`~` needs an integer, found `{}`", other.ty()),
            )),
        },
    }
}

fn fold_binary(op: BinaryOp, l: ConstValue, r: ConstValue, span: &Span) -> CompileResult<ConstValue> {
    let invalid = |ty: &Type| {
        CompileError::type_mismatch(
            span,
            format!("operator `{}` is not defined for `{}`", op.symbol(), ty),
        )
    };
    let boolean = |b: bool| ConstValue::Int {
        ty: Type::BOOL,
        value: b as i128,
    };
    match (l, r) {
        (ConstValue::Int { ty, value: a }, ConstValue::Int { value: b, .. }) => {
            let s = int_scalar(&ty).ok_or_else(|| invalid(&ty))?;
            let is_bool = s == Scalar::Bool;
            let arith = !is_bool && !ty.is_pointer();
            let value = match op {
                BinaryOp::Eq => return Ok(boolean(a == b)),
                BinaryOp::Ne => return Ok(boolean(a != b)),
                BinaryOp::Lt if !is_bool => return Ok(boolean(a < b)),
                BinaryOp::Le if !is_bool => return Ok(boolean(a <= b)),
                BinaryOp::Gt if !is_bool => return Ok(boolean(a > b)),
                BinaryOp::Ge if !is_bool => return Ok(boolean(a >= b)),
                BinaryOp::And if is_bool => a & b,
                BinaryOp::Or if is_bool => a | b,
                BinaryOp::BitAnd if !ty.is_pointer() => a & b,
                BinaryOp::BitOr if !ty.is_pointer() => a | b,
                BinaryOp::BitXor if !ty.is_pointer() => a ^ b,
                BinaryOp::Add if arith => a.wrapping_add(b),
                BinaryOp::Sub if arith => a.wrapping_sub(b),
                BinaryOp::Mul if arith => a.wrapping_mul(b),
                BinaryOp::Div | BinaryOp::Rem if arith && b == 0 => {
                    return Err(non_constant(span, "division by zero in constant expression"))
                }
                BinaryOp::Div if arith => a / b,
                BinaryOp::Rem if arith => a % b,
                // Narrow integers shift as i32 values, so the amount wraps
                // at the register width rather than the type width.
                BinaryOp::Shl if arith => {
                    let amount = (b as u32) % register_bits(s);
                    (a as u128).wrapping_shl(amount) as i128
                }
                BinaryOp::Shr if arith => a >> ((b as u32) % register_bits(s)),
                _ => return Err(invalid(&ty)),
            };
            Ok(ConstValue::Int {
                value: wrap_int(value, s),
                ty,
            })
        }
        (ConstValue::Float { ty, value: a }, ConstValue::Float { value: b, .. }) => {
            let value = match op {
                BinaryOp::Eq => return Ok(boolean(a == b)),
                BinaryOp::Ne => return Ok(boolean(a != b)),
                BinaryOp::Lt => return Ok(boolean(a < b)),
                BinaryOp::Le => return Ok(boolean(a <= b)),
                BinaryOp::Gt => return Ok(boolean(a > b)),
                BinaryOp::Ge => return Ok(boolean(a >= b)),
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => return Err(invalid(&ty)),
            };
            let value = if ty == Type::Scalar(Scalar::F32) {
                value as f32 as f64
            } else {
                value
            };
            Ok(ConstValue::Float { ty, value })
        }
        (l, _) => Err(invalid(l.ty())),
    }
}

fn register_bits(s: Scalar) -> u32 {
    if s.is_wide() {
        64
    } else {
        32
    }
}

fn cast_const(value: ConstValue, target: &Type, span: &Span) -> CompileResult<ConstValue> {
    if value.ty() == target {
        return Ok(value);
    }
    let bad = || {
        CompileError::type_mismatch(
            span,
            format!("cannot cast `{}` to `{}`", value.ty(), target),
        )
    };
    match (&value, target) {
        (ConstValue::Int { value: v, .. }, Type::Scalar(Scalar::Bool)) => Ok(ConstValue::Int {
            ty: Type::BOOL,
            value: (*v != 0) as i128,
        }),
        (ConstValue::Int { value: v, .. }, Type::Scalar(s)) if s.is_float() => Ok(ConstValue::Float {
            ty: target.clone(),
            value: if *s == Scalar::F32 { *v as f32 as f64 } else { *v as f64 },
        }),
        (ConstValue::Int { value: v, .. }, _) => match int_scalar(target) {
            Some(s) => Ok(ConstValue::Int {
                ty: target.clone(),
                value: wrap_int(*v, s),
            }),
            None => Err(bad()),
        },
        (ConstValue::Float { value: v, .. }, Type::Scalar(s)) if s.is_float() => Ok(ConstValue::Float {
            ty: target.clone(),
            value: if *s == Scalar::F32 { *v as f32 as f64 } else { *v },
        }),
        (ConstValue::Float { value: v, .. }, Type::Scalar(s)) if s.is_int() => {
            let (lo, hi) = s.int_range();
            Ok(ConstValue::Int {
                ty: target.clone(),
                value: (*v as i128).clamp(lo, hi),
            })
        }
        _ => Err(bad()),
    }
}

fn struct_const(
    ctx: &mut ModuleContext<'_>,
    name: &str,
    inits: &[FieldInit],
    span: &Span,
) -> CompileResult<ConstValue> {
    let symbols = ctx.symbols;
    let def = symbols
        .struct_def(name)
        .ok_or_else(|| CompileError::unknown_symbol(span, "struct", name))?;
    def.check_initializer(inits, span)?;
    let layout = ctx.layouts.layout_of(&Type::Struct(name.to_string()));
    let mut bytes = vec![0u8; layout.size as usize];
    if let Shape::Struct(fields) = &layout.shape {
        for field in fields {
            let init = match inits.iter().find(|i| i.name == field.name) {
                Some(init) => init.value,
                None => continue,
            };
            let value = eval_const(ctx, init, &field.ty)?;
            let size = ctx.layouts.size_of(&field.ty) as usize;
            let start = field.offset as usize;
            value.write_into(&mut bytes[start..start + size]);
        }
    }
    Ok(ConstValue::Bytes {
        ty: Type::Struct(name.to_string()),
        bytes,
    })
}

fn enum_const(
    ctx: &mut ModuleContext<'_>,
    enum_name: &str,
    variant: &str,
    args: Option<&[ExprId]>,
    span: &Span,
) -> CompileResult<ConstValue> {
    let (tag, payload) = variant_payload(ctx, enum_name, variant, args.map(<[ExprId]>::len), span)?;
    let layout = ctx.layouts.layout_of(&Type::Enum(enum_name.to_string()));
    let mut bytes = vec![0u8; layout.size as usize];
    bytes[..ENUM_TAG_SIZE as usize].copy_from_slice(&tag.to_le_bytes());
    if let (Some(ty), Some(&[arg])) = (payload, args) {
        let value = eval_const(ctx, arg, &ty)?;
        let start = match layout.shape {
            Shape::Enum { payload_offset, .. } => payload_offset as usize,
            _ => ENUM_TAG_SIZE as usize,
        };
        let size = ctx.layouts.size_of(&ty) as usize;
        value.write_into(&mut bytes[start..start + size]);
    }
    Ok(ConstValue::Bytes {
        ty: Type::Enum(enum_name.to_string()),
        bytes,
    })
}

/// Tag and payload type of `Enum::variant`, checking the argument count.
pub fn variant_payload(
    ctx: &ModuleContext<'_>,
    enum_name: &str,
    variant: &str,
    arg_count: Option<usize>,
    span: &Span,
) -> CompileResult<(u32, Option<Type>)> {
    let def = ctx
        .symbols
        .enum_def(enum_name)
        .ok_or_else(|| CompileError::unknown_symbol(span, "enum", enum_name))?;
    let (tag, v) = def
        .variant(variant)
        .ok_or_else(|| CompileError::unknown_symbol(span, "variant", &format!("{}::{}", enum_name, variant)))?;
    match (&v.payload, arg_count.unwrap_or(0)) {
        (None, 0) | (Some(_), 1) => Ok((tag, v.payload.clone())),
        (None, n) => Err(CompileError::type_mismatch(
            span,
            format!("variant `{}::{}` takes no payload, found {} argument(s)", enum_name, variant, n),
        )),
        (Some(ty), n) => Err(CompileError::type_mismatch(
            span,
            format!(
                "variant `{}::{}` carries one `{}`, found {} argument(s)",
                enum_name, variant, ty, n
            ),
        )),
    }
}

// =============================================================================
// Global Lowering
// =============================================================================

/// Place every user global, in declaration order.
///
/// Scalars whose address is never taken become WASM globals; everything
/// else gets a fixed slot in the static data image.
#[tracing::instrument(level = "debug", skip_all)]
pub fn lower_globals(ctx: &mut ModuleContext<'_>) -> CompileResult<()> {
    let ast = ctx.ast;
    let mut address_taken = Vec::new();
    for (_, item) in ast.items() {
        if let ItemKind::Function(f) = &item.kind {
            ast.address_taken_in(&f.body, &mut address_taken);
        }
    }

    let symbols = ctx.symbols;
    for global in symbols.globals.iter() {
        let in_memory = global.ty.is_aggregate() || address_taken.contains(&global.name);
        let value = eval_const(ctx, global.init, &global.ty)?;
        let slot = if in_memory {
            let (size, align) = ctx.layouts.size_align(&global.ty);
            let addr = ctx.builder.image.alloc(size, align);
            let mut bytes = vec![0u8; size as usize];
            value.write_into(&mut bytes);
            ctx.builder.image.write(addr, &bytes);
            GlobalSlot::Static(addr)
        } else {
            let init = value
                .global_init()
                .ok_or_else(|| ctx.mismatch(&global.span, &global.ty, value.ty()))?;
            GlobalSlot::Wasm(ctx.builder.add_global(&global.name, global.mutable, init))
        };
        tracing::trace!(name = %global.name, ?slot, "placed global");
        ctx.globals.insert(global.name.clone(), slot);
        if !global.mutable {
            ctx.global_values.insert(global.name.clone(), value);
        }
    }
    Ok(())
}
