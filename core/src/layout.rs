/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Layout & ABI Calculator for the Lo Compiler.
 *
 * Sizes, alignments and field offsets of every aggregate, plus the calling
 * convention used for aggregates passed or returned by value.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::symbols::{FunctionSig, SymbolTable, TypeDecl};
use crate::types::Type;
use std::collections::HashMap;
use std::fmt;
use wasm_encoder::ValType;

/// Pointer width in bytes (wasm32).
pub const POINTER_SIZE: u32 = 4;

/// Aggregates up to this many bytes may be split into scalar lanes.
pub const MACHINE_WORD: u32 = 8;

/// Enum discriminant: a `u32` at offset 0.
pub const ENUM_TAG_SIZE: u32 = 4;

pub fn align_to(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

// =============================================================================
// Layouts
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub offset: u32,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Scalar,
    Struct(Vec<FieldLayout>),
    /// Tag at offset 0, payload of the active variant at `payload_offset`.
    Enum {
        payload_offset: u32,
        payload_size: u32,
        payloads: Vec<Option<Type>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub size: u32,
    pub align: u32,
    pub shape: Shape,
}

impl Layout {
    fn scalar(size: u32) -> Self {
        Layout {
            size,
            align: size.max(1),
            shape: Shape::Scalar,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        match &self.shape {
            Shape::Struct(fields) => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "size={} align={}", self.size, self.align)?;
        match &self.shape {
            Shape::Scalar => Ok(()),
            Shape::Struct(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|fl| format!("{}@{}: {}", fl.name, fl.offset, fl.ty))
                    .collect();
                write!(f, " {{{}}}", parts.join(", "))
            }
            Shape::Enum {
                payload_offset,
                payload_size,
                payloads,
            } => write!(
                f,
                " tag@0 payload@{} ({} bytes, {} variants)",
                payload_offset,
                payload_size,
                payloads.len()
            ),
        }
    }
}

// =============================================================================
// Layout Table
// =============================================================================

/// Layouts of every named aggregate, computed once and then immutable.
#[derive(Debug, Clone, Default)]
pub struct LayoutTable {
    named: HashMap<String, Layout>,
}

impl LayoutTable {
    /// Compute every struct and enum layout, rejecting types that contain
    /// themselves without a pointer in between.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn compute(symbols: &SymbolTable) -> CompileResult<LayoutTable> {
        let mut table = LayoutTable::default();
        for decl in symbols.types.iter() {
            let name = match decl {
                TypeDecl::Struct(s) => &s.name,
                TypeDecl::Enum(e) => &e.name,
            };
            let mut visiting = Vec::new();
            table.compute_named(symbols, name, &mut visiting)?;
        }
        tracing::debug!(count = table.named.len(), "layouts computed");
        Ok(table)
    }

    fn compute_named(
        &mut self,
        symbols: &SymbolTable,
        name: &str,
        visiting: &mut Vec<String>,
    ) -> CompileResult<()> {
        if self.named.contains_key(name) {
            return Ok(());
        }
        let decl = match symbols.types.get(name) {
            Some(decl) => decl,
            None => return Ok(()),
        };
        if let Some(pos) = visiting.iter().position(|n| n == name) {
            let mut cycle: Vec<&str> = visiting[pos..].iter().map(String::as_str).collect();
            cycle.push(name);
            return Err(CompileError::new(
                ErrorKind::InfiniteLayout,
                decl.span(),
                format!(
                    "type `{}` contains itself without indirection ({})",
                    name,
                    cycle.join(" -> ")
                ),
            ));
        }
        visiting.push(name.to_string());

        let layout = match decl {
            TypeDecl::Struct(def) => {
                let mut cursor = 0u32;
                let mut align = 1u32;
                let mut fields = Vec::with_capacity(def.fields.len());
                for field in &def.fields {
                    let (fsize, falign) = self.size_align_computing(symbols, &field.ty, visiting)?;
                    let offset = align_to(cursor, falign);
                    fields.push(FieldLayout {
                        name: field.name.clone(),
                        offset,
                        ty: field.ty.clone(),
                    });
                    cursor = offset + fsize;
                    align = align.max(falign);
                }
                Layout {
                    size: align_to(cursor, align),
                    align,
                    shape: Shape::Struct(fields),
                }
            }
            TypeDecl::Enum(def) => {
                let mut payload_size = 0u32;
                let mut payload_align = 1u32;
                let mut payloads = Vec::with_capacity(def.variants.len());
                for variant in &def.variants {
                    if let Some(ty) = &variant.payload {
                        let (size, align) = self.size_align_computing(symbols, ty, visiting)?;
                        payload_size = payload_size.max(size);
                        payload_align = payload_align.max(align);
                    }
                    payloads.push(variant.payload.clone());
                }
                let align = ENUM_TAG_SIZE.max(payload_align);
                let payload_offset = align_to(ENUM_TAG_SIZE, payload_align);
                Layout {
                    size: align_to(payload_offset + payload_size, align),
                    align,
                    shape: Shape::Enum {
                        payload_offset,
                        payload_size,
                        payloads,
                    },
                }
            }
        };

        visiting.pop();
        tracing::trace!(name, %layout, "layout");
        self.named.insert(name.to_string(), layout);
        Ok(())
    }

    fn size_align_computing(
        &mut self,
        symbols: &SymbolTable,
        ty: &Type,
        visiting: &mut Vec<String>,
    ) -> CompileResult<(u32, u32)> {
        if let Type::Struct(name) | Type::Enum(name) = ty {
            self.compute_named(symbols, name, visiting)?;
        }
        Ok(self.size_align(ty))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Layout of a named struct or enum.
    pub fn named(&self, name: &str) -> Option<&Layout> {
        self.named.get(name)
    }

    pub fn size_align(&self, ty: &Type) -> (u32, u32) {
        match ty {
            Type::Void => (0, 1),
            Type::Scalar(s) => (s.size(), s.size()),
            Type::Pointer(_) => (POINTER_SIZE, POINTER_SIZE),
            Type::Struct(name) | Type::Enum(name) => self
                .named
                .get(name)
                .map(|l| (l.size, l.align))
                .unwrap_or((0, 1)),
        }
    }

    pub fn size_of(&self, ty: &Type) -> u32 {
        self.size_align(ty).0
    }

    pub fn layout_of(&self, ty: &Type) -> Layout {
        match ty {
            Type::Struct(name) | Type::Enum(name) => match self.named.get(name) {
                Some(layout) => layout.clone(),
                None => Layout::scalar(0),
            },
            other => Layout::scalar(self.size_of(other)),
        }
    }

    // =========================================================================
    // Calling Convention
    // =========================================================================

    /// Scalar lanes of a struct small enough to travel in registers.
    ///
    /// A struct qualifies when it fits in [`MACHINE_WORD`] bytes and every
    /// leaf is a scalar or pointer. Lanes follow field order, nested
    /// structs flattened in place. Enums never qualify.
    pub fn lanes(&self, ty: &Type) -> Option<Vec<Lane>> {
        let name = match ty {
            Type::Struct(name) => name,
            _ => return None,
        };
        let layout = self.named.get(name)?;
        if layout.size > MACHINE_WORD {
            return None;
        }
        let mut lanes = Vec::new();
        self.collect_lanes(layout, 0, &mut lanes).then_some(lanes)
    }

    fn collect_lanes(&self, layout: &Layout, base: u32, out: &mut Vec<Lane>) -> bool {
        let fields = match &layout.shape {
            Shape::Struct(fields) => fields,
            _ => return false,
        };
        for field in fields {
            match &field.ty {
                Type::Scalar(_) | Type::Pointer(_) => out.push(Lane {
                    ty: field.ty.clone(),
                    offset: base + field.offset,
                }),
                Type::Struct(name) => match self.named.get(name) {
                    Some(inner) if self.collect_lanes(inner, base + field.offset, out) => {}
                    _ => return false,
                },
                Type::Enum(_) | Type::Void => return false,
            }
        }
        true
    }

    /// Lower a signature to its WASM calling convention. Every call site and
    /// the callee derive the same answer from the same signature.
    pub fn function_abi(&self, sig: &FunctionSig) -> FunctionAbi {
        let params = sig
            .params
            .iter()
            .map(|(_, ty)| match ty {
                Type::Struct(_) | Type::Enum(_) => match self.lanes(ty) {
                    Some(lanes) => ParamPassing::Lanes(lanes),
                    None => ParamPassing::Indirect,
                },
                other => match other.val_type() {
                    Some(vt) => ParamPassing::Direct(vt),
                    None => ParamPassing::Lanes(Vec::new()),
                },
            })
            .collect();
        let ret = match &sig.ret {
            Type::Void => ReturnPassing::Void,
            ty @ (Type::Struct(_) | Type::Enum(_)) => match self.lanes(ty) {
                Some(lanes) => ReturnPassing::Lanes(lanes),
                None => ReturnPassing::Sret,
            },
            other => match other.val_type() {
                Some(vt) => ReturnPassing::Direct(vt),
                None => ReturnPassing::Void,
            },
        };
        FunctionAbi { params, ret }
    }
}

// =============================================================================
// ABI Types
// =============================================================================

/// One scalar piece of a decomposed aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Lane {
    pub ty: Type,
    pub offset: u32,
}

impl Lane {
    pub fn val_type(&self) -> ValType {
        self.ty.val_type().unwrap_or(ValType::I32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamPassing {
    /// Scalar or pointer passed as itself.
    Direct(ValType),
    /// Small struct split into scalar arguments in field order.
    Lanes(Vec<Lane>),
    /// Pointer to a caller-owned copy.
    Indirect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnPassing {
    Void,
    Direct(ValType),
    /// Small struct returned as multiple values.
    Lanes(Vec<Lane>),
    /// Caller passes a hidden first parameter pointing at result storage.
    Sret,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionAbi {
    pub params: Vec<ParamPassing>,
    pub ret: ReturnPassing,
}

impl FunctionAbi {
    pub fn has_sret(&self) -> bool {
        matches!(self.ret, ReturnPassing::Sret)
    }

    pub fn wasm_params(&self) -> Vec<ValType> {
        let mut out = Vec::new();
        if self.has_sret() {
            out.push(ValType::I32);
        }
        for p in &self.params {
            match p {
                ParamPassing::Direct(vt) => out.push(*vt),
                ParamPassing::Lanes(lanes) => out.extend(lanes.iter().map(Lane::val_type)),
                ParamPassing::Indirect => out.push(ValType::I32),
            }
        }
        out
    }

    pub fn wasm_results(&self) -> Vec<ValType> {
        match &self.ret {
            ReturnPassing::Void | ReturnPassing::Sret => Vec::new(),
            ReturnPassing::Direct(vt) => vec![*vt],
            ReturnPassing::Lanes(lanes) => lanes.iter().map(Lane::val_type).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn layouts(src: &str) -> CompileResult<(SymbolTable, LayoutTable)> {
        let ast = parse_program(src, "layout.lo").expect("parse failed");
        let symbols = SymbolTable::collect(&ast)?;
        let layouts = LayoutTable::compute(&symbols)?;
        Ok((symbols, layouts))
    }

    #[test]
    fn test_sequential_field_placement() {
        let (_, table) = layouts("struct S { a: u8, b: u32, c: u8 }").unwrap();
        let layout = table.named("S").unwrap();
        insta::assert_snapshot!(layout.to_string(), @"size=12 align=4 {a@0: u8, b@4: u32, c@8: u8}");
    }

    #[test]
    fn test_field_order_is_load_bearing() {
        let (_, table) = layouts("struct S { b: u32, a: u8, c: u8 }").unwrap();
        let layout = table.named("S").unwrap();
        assert_eq!(layout.size, 8, "reordering fields changes the size");
        assert_eq!(layout.field("c").unwrap().offset, 5);
    }

    #[test]
    fn test_nested_struct_alignment() {
        let (_, table) = layouts(
            "struct Inner { x: u16, y: u8 }\n\
             struct Outer { flag: bool, inner: Inner, big: u64 }",
        )
        .unwrap();
        let inner = table.named("Inner").unwrap();
        assert_eq!((inner.size, inner.align), (4, 2));
        let outer = table.named("Outer").unwrap();
        assert_eq!(outer.field("inner").unwrap().offset, 2);
        assert_eq!(outer.field("big").unwrap().offset, 8);
        assert_eq!((outer.size, outer.align), (16, 8));
    }

    #[test]
    fn test_enum_layout() {
        let (_, table) = layouts("enum Shape { Empty, Circle(u32), Wide(u64) }").unwrap();
        let layout = table.named("Shape").unwrap();
        insta::assert_snapshot!(layout.to_string(), @"size=16 align=8 tag@0 payload@8 (8 bytes, 3 variants)");
    }

    #[test]
    fn test_recursive_struct_rejected() {
        let err = layouts("struct Node { value: u32, next: Node }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InfiniteLayout);
        assert!(err.message.contains("Node -> Node"), "message was {}", err.message);
    }

    #[test]
    fn test_mutual_recursion_rejected() {
        let err = layouts("struct A { b: B }\nstruct B { a: A }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InfiniteLayout);
    }

    #[test]
    fn test_recursion_through_pointer_allowed() {
        let (_, table) = layouts("struct Node { value: u32, next: &Node }").unwrap();
        assert_eq!(table.named("Node").unwrap().size, 8);
    }

    #[test]
    fn test_small_struct_decomposes_into_lanes() {
        let (symbols, table) = layouts(
            "struct Pair { a: u16, b: u32 }\n\
             struct Big { a: u32, b: u32, c: u32 }\n\
             fn f(p: Pair, b: Big, s: str): Pair { return p; }",
        )
        .unwrap();
        let f = symbols.functions.get("f").unwrap();
        let abi = table.function_abi(&f.sig);
        assert_eq!(
            abi.params[0],
            ParamPassing::Lanes(vec![
                Lane { ty: Type::Scalar(crate::types::Scalar::U16), offset: 0 },
                Lane { ty: Type::U32, offset: 4 },
            ])
        );
        assert_eq!(abi.params[1], ParamPassing::Indirect, "12 bytes exceeds a machine word");
        assert!(matches!(abi.params[2], ParamPassing::Lanes(ref l) if l.len() == 2));
        assert_eq!(abi.wasm_params(), vec![ValType::I32; 5]);
        assert_eq!(abi.wasm_results(), vec![ValType::I32, ValType::I32]);
    }

    #[test]
    fn test_large_return_uses_sret() {
        let (symbols, table) = layouts(
            "struct Big { a: u64, b: u64 }\n\
             enum Opt { None, Some(u32) }\n\
             fn f(): Big { return Big { a: 1, b: 2 }; }\n\
             fn g(o: Opt): Opt { return o; }",
        )
        .unwrap();
        let f = table.function_abi(&symbols.functions.get("f").unwrap().sig);
        assert!(f.has_sret());
        assert_eq!(f.wasm_params(), vec![ValType::I32]);
        assert!(f.wasm_results().is_empty());
        let g = table.function_abi(&symbols.functions.get("g").unwrap().sig);
        assert_eq!(g.params[0], ParamPassing::Indirect, "enums always pass by pointer");
        assert!(g.has_sret());
    }

    #[test]
    fn test_abi_is_deterministic() {
        let (symbols, table) = layouts("struct P { x: u32, y: u32 }\nfn f(p: P): P { return p; }").unwrap();
        let sig = &symbols.functions.get("f").unwrap().sig;
        assert_eq!(table.function_abi(sig), table.function_abi(sig));
    }
}
