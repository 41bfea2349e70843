/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Places and Memory Access for the Lo Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use super::expr::{lower_expr, lower_value};
use crate::ast::{ExprId, ExprKind, Span};
use crate::context::{GlobalSlot, LocalBinding, ModuleContext};
use crate::error::{CompileError, CompileResult};
use crate::types::{Scalar, Type};
use wasm_encoder::{Instruction, MemArg, ValType};

// =============================================================================
// Loads, Stores, Copies
// =============================================================================

fn mem_arg(offset: u32, size: u32) -> MemArg {
    MemArg {
        offset: offset as u64,
        align: size.max(1).trailing_zeros(),
        memory_index: 0,
    }
}

/// `[addr] -> [value]`. Aggregates are left as `addr + offset`.
pub fn emit_load(ctx: &mut ModuleContext<'_>, ty: &Type, offset: u32) {
    let instr = match ty {
        Type::Scalar(s) => {
            let arg = mem_arg(offset, s.size());
            match s {
                Scalar::Bool | Scalar::U8 => Instruction::I32Load8U(arg),
                Scalar::I8 => Instruction::I32Load8S(arg),
                Scalar::U16 => Instruction::I32Load16U(arg),
                Scalar::I16 => Instruction::I32Load16S(arg),
                Scalar::U32 | Scalar::I32 => Instruction::I32Load(arg),
                Scalar::U64 | Scalar::I64 => Instruction::I64Load(arg),
                Scalar::F32 => Instruction::F32Load(arg),
                Scalar::F64 => Instruction::F64Load(arg),
            }
        }
        Type::Pointer(_) => Instruction::I32Load(mem_arg(offset, 4)),
        Type::Struct(_) | Type::Enum(_) => {
            add_offset(ctx, offset);
            return;
        }
        Type::Void => return,
    };
    ctx.emit(instr);
}

/// `[addr, value] -> []` for scalars and pointers.
pub fn emit_store(ctx: &mut ModuleContext<'_>, ty: &Type, offset: u32) {
    let instr = match ty {
        Type::Scalar(s) => {
            let arg = mem_arg(offset, s.size());
            match s {
                Scalar::Bool | Scalar::U8 | Scalar::I8 => Instruction::I32Store8(arg),
                Scalar::U16 | Scalar::I16 => Instruction::I32Store16(arg),
                Scalar::U32 | Scalar::I32 => Instruction::I32Store(arg),
                Scalar::U64 | Scalar::I64 => Instruction::I64Store(arg),
                Scalar::F32 => Instruction::F32Store(arg),
                Scalar::F64 => Instruction::F64Store(arg),
            }
        }
        Type::Pointer(_) => Instruction::I32Store(mem_arg(offset, 4)),
        Type::Struct(_) | Type::Enum(_) | Type::Void => return,
    };
    ctx.emit(instr);
}

/// `[dst, src] -> []`, copying `size` bytes.
pub fn emit_copy(ctx: &mut ModuleContext<'_>, size: u32) {
    ctx.emit(Instruction::I32Const(size as i32));
    ctx.emit(Instruction::MemoryCopy {
        src_mem: 0,
        dst_mem: 0,
    });
}

pub fn add_offset(ctx: &mut ModuleContext<'_>, offset: u32) {
    if offset != 0 {
        ctx.emit(Instruction::I32Const(offset as i32));
        ctx.emit(Instruction::I32Add);
    }
}

/// Store the value on top of the stack into a fresh frame slot.
/// `[value] -> []`, returning the slot offset.
pub fn spill_to_frame(ctx: &mut ModuleContext<'_>, ty: &Type) -> u32 {
    let slot = ctx.alloc_temp(ty);
    let vt = ty.val_type().unwrap_or(ValType::I32);
    let tmp = ctx.func.alloc_local(vt);
    ctx.emit(Instruction::LocalSet(tmp));
    if ty.is_aggregate() {
        ctx.func.frame_address(slot);
        ctx.emit(Instruction::LocalGet(tmp));
        let size = ctx.layouts.size_of(ty);
        emit_copy(ctx, size);
    } else {
        ctx.emit(Instruction::LocalGet(ctx.func.frame_base));
        ctx.emit(Instruction::LocalGet(tmp));
        emit_store(ctx, ty, slot);
    }
    slot
}

// =============================================================================
// Places
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PlaceKind {
    Local(u32),
    Global(u32),
    /// Memory at `[base] + offset`, with the base address already pushed.
    Memory { offset: u32 },
}

/// An assignable location.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub kind: PlaceKind,
    pub ty: Type,
    pub mutable: bool,
}

pub fn is_place_expr(ctx: &ModuleContext<'_>, id: ExprId) -> bool {
    matches!(
        ctx.ast.expr(id).kind,
        ExprKind::Path(_) | ExprKind::Field { .. } | ExprKind::Index { .. } | ExprKind::Deref(_)
    )
}

/// Whether `name` resolves to a local or global variable.
pub fn is_variable(ctx: &ModuleContext<'_>, name: &str) -> bool {
    ctx.func.lookup(name).is_some() || ctx.globals.contains_key(name)
}

/// Lower the address part of a place expression.
pub fn lower_place(ctx: &mut ModuleContext<'_>, id: ExprId) -> CompileResult<Place> {
    let ast = ctx.ast;
    let expr = ast.expr(id);
    let span = &expr.span;
    match &expr.kind {
        ExprKind::Path(name) => variable_place(ctx, name, span),
        ExprKind::Field { object, field } => field_place(ctx, *object, field, span),
        ExprKind::Index { object, index } => {
            let object_ty = lower_expr(ctx, *object, None)?;
            let elem = match object_ty.pointee() {
                Some(elem) if !elem.is_void() => elem.clone(),
                _ => {
                    return Err(CompileError::type_mismatch(
                        span,
                        format!("cannot index a value of type `{}`", object_ty),
                    ))
                }
            };
            let index_ty = lower_expr(ctx, *index, Some(&Type::U32))?;
            match index_ty.scalar() {
                Some(s) if s.is_wide() => ctx.emit(Instruction::I32WrapI64),
                Some(s) if s.is_int() => {}
                _ => {
                    return Err(CompileError::type_mismatch(
                        span,
                        format!("index must be an integer, found `{}`", index_ty),
                    ))
                }
            }
            let size = ctx.layouts.size_of(&elem);
            if size != 1 {
                ctx.emit(Instruction::I32Const(size as i32));
                ctx.emit(Instruction::I32Mul);
            }
            ctx.emit(Instruction::I32Add);
            Ok(Place {
                kind: PlaceKind::Memory { offset: 0 },
                ty: elem,
                mutable: true,
            })
        }
        ExprKind::Deref(inner) => {
            let ty = lower_expr(ctx, *inner, None)?;
            match ty {
                Type::Pointer(pointee) if !pointee.is_void() => Ok(Place {
                    kind: PlaceKind::Memory { offset: 0 },
                    ty: *pointee,
                    mutable: true,
                }),
                other => Err(CompileError::type_mismatch(
                    span,
                    format!("cannot dereference a value of type `{}`", other),
                )),
            }
        }
        _ => Err(CompileError::type_mismatch(span, "expression is not addressable")),
    }
}

fn variable_place(ctx: &mut ModuleContext<'_>, name: &str, span: &Span) -> CompileResult<Place> {
    if let Some(binding) = ctx.func.lookup(name).cloned() {
        return Ok(binding_place(ctx, binding));
    }
    let symbols = ctx.symbols;
    if let (Some(slot), Some(decl)) = (ctx.globals.get(name).copied(), symbols.globals.get(name)) {
        let kind = match slot {
            GlobalSlot::Wasm(index) => PlaceKind::Global(index),
            GlobalSlot::Static(addr) => {
                ctx.emit(Instruction::I32Const(addr as i32));
                PlaceKind::Memory { offset: 0 }
            }
        };
        return Ok(Place {
            kind,
            ty: decl.ty.clone(),
            mutable: decl.mutable,
        });
    }
    Err(CompileError::unknown_symbol(span, "variable", name))
}

/// Place of a local binding, pushing its base address if it lives in memory.
pub fn binding_place(ctx: &mut ModuleContext<'_>, binding: LocalBinding) -> Place {
    let (kind, ty) = match binding {
        LocalBinding::Local { index, ty } => (PlaceKind::Local(index), ty),
        LocalBinding::Frame { offset, ty } => {
            ctx.emit(Instruction::LocalGet(ctx.func.frame_base));
            (PlaceKind::Memory { offset }, ty)
        }
        LocalBinding::Indirect { local, ty } => {
            ctx.emit(Instruction::LocalGet(local));
            (PlaceKind::Memory { offset: 0 }, ty)
        }
    };
    Place {
        kind,
        ty,
        mutable: true,
    }
}

fn field_place(ctx: &mut ModuleContext<'_>, object: ExprId, field: &str, span: &Span) -> CompileResult<Place> {
    let (struct_ty, base_offset, mutable) = if is_place_expr(ctx, object) {
        let place = lower_place(ctx, object)?;
        match (&place.ty, &place.kind) {
            (Type::Struct(_), PlaceKind::Memory { offset }) => (place.ty.clone(), *offset, place.mutable),
            (Type::Pointer(inner), _) if matches!(**inner, Type::Struct(_)) => {
                let inner = (**inner).clone();
                read_place(ctx, &place);
                (inner, 0, true)
            }
            _ => return Err(no_field(span, &place.ty, field)),
        }
    } else {
        match lower_expr(ctx, object, None)? {
            ty @ Type::Struct(_) => (ty, 0, false),
            Type::Pointer(inner) if matches!(*inner, Type::Struct(_)) => (*inner, 0, true),
            other => return Err(no_field(span, &other, field)),
        }
    };
    let name = match &struct_ty {
        Type::Struct(name) => name,
        other => return Err(no_field(span, other, field)),
    };
    let layout = ctx
        .layouts
        .named(name)
        .and_then(|l| l.field(field))
        .ok_or_else(|| CompileError::unknown_symbol(span, "field", &format!("{}.{}", name, field)))?;
    Ok(Place {
        kind: PlaceKind::Memory {
            offset: base_offset + layout.offset,
        },
        ty: layout.ty.clone(),
        mutable,
    })
}

fn no_field(span: &Span, ty: &Type, field: &str) -> CompileError {
    CompileError::type_mismatch(span, format!("type `{}` has no field `{}`", ty, field))
}

/// Push the value held in `place`. Aggregates push their address.
pub fn read_place(ctx: &mut ModuleContext<'_>, place: &Place) {
    match place.kind {
        PlaceKind::Local(index) => ctx.emit(Instruction::LocalGet(index)),
        PlaceKind::Global(index) => ctx.emit(Instruction::GlobalGet(index)),
        PlaceKind::Memory { offset } => emit_load(ctx, &place.ty, offset),
    }
}

/// Store `value` into `place`. The place's address, if any, is already pushed.
pub fn write_place(ctx: &mut ModuleContext<'_>, place: &Place, value: ExprId) -> CompileResult<()> {
    match place.kind {
        PlaceKind::Local(index) => {
            lower_value(ctx, value, &place.ty)?;
            ctx.emit(Instruction::LocalSet(index));
        }
        PlaceKind::Global(index) => {
            lower_value(ctx, value, &place.ty)?;
            ctx.emit(Instruction::GlobalSet(index));
        }
        PlaceKind::Memory { offset } if place.ty.is_aggregate() => {
            add_offset(ctx, offset);
            lower_value(ctx, value, &place.ty)?;
            let size = ctx.layouts.size_of(&place.ty);
            emit_copy(ctx, size);
        }
        PlaceKind::Memory { offset } => {
            lower_value(ctx, value, &place.ty)?;
            emit_store(ctx, &place.ty, offset);
        }
    }
    Ok(())
}

/// `&expr`: the address of a place that lives in memory.
pub fn lower_addr_of(ctx: &mut ModuleContext<'_>, inner: ExprId, span: &Span) -> CompileResult<Type> {
    if !is_place_expr(ctx, inner) {
        // Taking the address of a temporary aggregate yields its storage.
        let ty = lower_expr(ctx, inner, None)?;
        if ty.is_aggregate() {
            return Ok(Type::pointer_to(ty));
        }
        return Err(CompileError::type_mismatch(
            span,
            format!("cannot take the address of a temporary `{}`", ty),
        ));
    }
    let place = lower_place(ctx, inner)?;
    match place.kind {
        PlaceKind::Memory { offset } => {
            add_offset(ctx, offset);
            Ok(Type::pointer_to(place.ty))
        }
        _ => Err(CompileError::type_mismatch(
            span,
            "value does not live in memory and has no address",
        )),
    }
}
