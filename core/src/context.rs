/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Module Context for the Lo Compiler.
 *
 * Per-module compilation state threaded through every lowering routine:
 * the read-only tables, the module under construction, and the state of
 * the function currently being lowered.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use crate::ast::{Ast, Span, StmtId};
use crate::builder::ModuleBuilder;
use crate::config::CompileOptions;
use crate::consts::ConstValue;
use crate::error::{CompileError, CompileResult};
use crate::layout::{align_to, FunctionAbi, LayoutTable, ReturnPassing};
use crate::symbols::SymbolTable;
use crate::types::Type;
use std::collections::HashMap;
use wasm_encoder::{Instruction, ValType};

/// Stack frames are kept 16-byte aligned.
pub const FRAME_ALIGN: u32 = 16;

// =============================================================================
// Scope & Local Variable Tracking
// =============================================================================

/// Where a named local lives.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalBinding {
    /// Scalar or pointer held in a WASM local.
    Local { index: u32, ty: Type },
    /// Value stored in the current frame at `frame_base + offset`.
    Frame { offset: u32, ty: Type },
    /// Value stored at the address held in a WASM local (indirect parameters).
    Indirect { local: u32, ty: Type },
}

impl LocalBinding {
    pub fn ty(&self) -> &Type {
        match self {
            LocalBinding::Local { ty, .. }
            | LocalBinding::Frame { ty, .. }
            | LocalBinding::Indirect { ty, .. } => ty,
        }
    }
}

/// Bindings introduced by one lexical block. Later entries shadow earlier ones.
#[derive(Debug, Clone, Default)]
pub struct ScopeFrame {
    pub bindings: Vec<(String, LocalBinding)>,
}

/// A deferred statement together with how many bindings of its frame were
/// visible when it was registered.
#[derive(Debug, Clone, Copy)]
pub struct DeferredAction {
    pub stmt: StmtId,
    pub visible: usize,
}

/// Deferred statements of one block, in registration order.
#[derive(Debug, Clone, Default)]
pub struct DeferFrame {
    pub actions: Vec<DeferredAction>,
}

/// A `break`/`continue` target.
#[derive(Debug, Clone)]
pub struct LoopFrame {
    pub label: Option<String>,
    /// Number of scope frames open outside the construct. Frames at or above
    /// this index are exited by a jump to this target.
    pub scope_depth: usize,
    /// Control depth just inside the block a `break` leaves.
    pub break_level: u32,
    /// Control depth just inside the block a `continue` branches to.
    /// `None` for labelled plain blocks.
    pub continue_level: Option<u32>,
}

// =============================================================================
// Function Compilation Context
// =============================================================================

/// State of the function currently being lowered.
#[derive(Debug, Clone, Default)]
pub struct FunctionContext {
    pub name: String,
    pub ret: Type,
    pub abi: Option<FunctionAbi>,
    /// WASM parameter count, including the hidden result pointer.
    pub param_count: u32,
    /// Locals beyond the parameters.
    pub locals: Vec<ValType>,
    pub instructions: Vec<Instruction<'static>>,
    pub scopes: Vec<ScopeFrame>,
    pub defers: Vec<DeferFrame>,
    pub loops: Vec<LoopFrame>,
    /// Number of enclosing `block`/`loop`/`if` constructs at the current point.
    pub control_depth: u32,
    /// Bytes of stack frame reserved so far.
    pub frame_size: u32,
    /// Local holding this call's frame address.
    pub frame_base: u32,
    /// Local holding the caller's stack pointer.
    pub saved_sp: u32,
    /// Locals whose address is taken somewhere in the body.
    pub address_taken: Vec<String>,
    /// Nesting of deferred statements currently being emitted.
    pub defer_depth: u32,
}

impl FunctionContext {
    pub fn new(name: &str, ret: Type, abi: FunctionAbi, address_taken: Vec<String>) -> Self {
        let param_count = abi.wasm_params().len() as u32;
        let mut func = FunctionContext {
            name: name.to_string(),
            ret,
            abi: Some(abi),
            param_count,
            address_taken,
            ..Default::default()
        };
        func.saved_sp = func.alloc_local(ValType::I32);
        func.frame_base = func.alloc_local(ValType::I32);
        func
    }

    pub fn emit(&mut self, instr: Instruction<'static>) {
        self.instructions.push(instr);
    }

    /// Fresh WASM local of the given type.
    pub fn alloc_local(&mut self, ty: ValType) -> u32 {
        self.locals.push(ty);
        self.param_count + self.locals.len() as u32 - 1
    }

    /// Reserve `size` bytes of frame storage and return the offset from
    /// `frame_base`.
    pub fn alloc_frame(&mut self, size: u32, align: u32) -> u32 {
        let offset = align_to(self.frame_size, align.clamp(1, FRAME_ALIGN));
        self.frame_size = offset + size.max(1);
        offset
    }

    /// Total frame size rounded to [`FRAME_ALIGN`].
    pub fn frame_bytes(&self) -> u32 {
        align_to(self.frame_size, FRAME_ALIGN)
    }

    /// Push `frame_base + offset`.
    pub fn frame_address(&mut self, offset: u32) {
        self.emit(Instruction::LocalGet(self.frame_base));
        if offset != 0 {
            self.emit(Instruction::I32Const(offset as i32));
            self.emit(Instruction::I32Add);
        }
    }

    pub fn is_address_taken(&self, name: &str) -> bool {
        self.address_taken.iter().any(|n| n == name)
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(ScopeFrame::default());
        self.defers.push(DeferFrame::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        self.defers.pop();
    }

    pub fn bind(&mut self, name: &str, binding: LocalBinding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.push((name.to_string(), binding));
        }
    }

    /// Innermost visible binding for `name`.
    pub fn lookup(&self, name: &str) -> Option<&LocalBinding> {
        self.scopes.iter().rev().find_map(|scope| {
            scope
                .bindings
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, b)| b)
        })
    }

    pub fn register_defer(&mut self, stmt: StmtId) {
        let visible = self.scopes.last().map_or(0, |s| s.bindings.len());
        if let Some(frame) = self.defers.last_mut() {
            frame.actions.push(DeferredAction { stmt, visible });
        }
    }

    /// Innermost jump target matching `label`. Without a label, the innermost
    /// loop; labelled plain blocks are only reachable by name.
    pub fn find_target(&self, label: Option<&str>) -> Option<&LoopFrame> {
        match label {
            Some(name) => self
                .loops
                .iter()
                .rev()
                .find(|l| l.label.as_deref() == Some(name)),
            None => self.loops.iter().rev().find(|l| l.continue_level.is_some()),
        }
    }

    /// `br` depth that reaches the construct opened at `level`.
    pub fn branch_depth(&self, level: u32) -> u32 {
        self.control_depth - level
    }

    pub fn returns_via_pointer(&self) -> bool {
        self.abi
            .as_ref()
            .is_some_and(|abi| matches!(abi.ret, ReturnPassing::Sret))
    }
}

// =============================================================================
// Module Context
// =============================================================================

/// Where a user global ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalSlot {
    /// A WASM global.
    Wasm(u32),
    /// A fixed address in the static data image.
    Static(u32),
}

pub struct ModuleContext<'a> {
    pub ast: &'a Ast,
    pub symbols: &'a SymbolTable,
    pub layouts: &'a LayoutTable,
    pub options: &'a CompileOptions,
    pub builder: ModuleBuilder,
    pub globals: HashMap<String, GlobalSlot>,
    /// Folded values of immutable globals, usable in later initialisers.
    pub global_values: HashMap<String, ConstValue>,
    pub func: FunctionContext,
}

impl<'a> ModuleContext<'a> {
    pub fn new(
        ast: &'a Ast,
        symbols: &'a SymbolTable,
        layouts: &'a LayoutTable,
        options: &'a CompileOptions,
    ) -> Self {
        ModuleContext {
            ast,
            symbols,
            layouts,
            options,
            builder: ModuleBuilder::new(options.data_start),
            globals: HashMap::new(),
            global_values: HashMap::new(),
            func: FunctionContext::default(),
        }
    }

    pub fn emit(&mut self, instr: Instruction<'static>) {
        self.func.emit(instr);
    }

    /// Lower into a scratch buffer; see [`FunctionContext::capture`].
    pub fn capture<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<(T, Vec<Instruction<'static>>)> {
        let saved = std::mem::take(&mut self.func.instructions);
        let result = f(self);
        let captured = std::mem::replace(&mut self.func.instructions, saved);
        result.map(|value| (value, captured))
    }

    /// Append previously captured instructions.
    pub fn splice(&mut self, instructions: Vec<Instruction<'static>>) {
        self.func.instructions.extend(instructions);
    }

    /// Reserve frame storage sized for `ty`.
    pub fn alloc_temp(&mut self, ty: &Type) -> u32 {
        let (size, align) = self.layouts.size_align(ty);
        self.func.alloc_frame(size, align)
    }

    pub fn abi(&self, sig: &crate::symbols::FunctionSig) -> FunctionAbi {
        self.layouts.function_abi(sig)
    }

    /// Resolve a type annotation in the context of this module.
    pub fn resolve_type(&self, ty: &crate::ast::TypeExpr) -> CompileResult<Type> {
        self.symbols.resolve_value_type(ty)
    }

    pub fn mismatch(&self, span: &Span, expected: &Type, found: &Type) -> CompileError {
        CompileError::type_mismatch(span, format!("expected `{}`, found `{}`", expected, found))
    }

    pub fn into_builder(self) -> ModuleBuilder {
        self.builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{FunctionAbi, ReturnPassing};

    fn func() -> FunctionContext {
        let abi = FunctionAbi {
            params: vec![crate::layout::ParamPassing::Direct(ValType::I32)],
            ret: ReturnPassing::Void,
        };
        FunctionContext::new("f", Type::Void, abi, vec!["x".into()])
    }

    #[test]
    fn test_bookkeeping_locals_follow_params() {
        let f = func();
        assert_eq!(f.saved_sp, 1);
        assert_eq!(f.frame_base, 2);
        assert!(f.is_address_taken("x"));
    }

    #[test]
    fn test_frame_slots_aligned() {
        let mut f = func();
        assert_eq!(f.alloc_frame(1, 1), 0);
        assert_eq!(f.alloc_frame(8, 8), 8);
        assert_eq!(f.alloc_frame(4, 4), 16);
        assert_eq!(f.frame_bytes(), 32);
    }

    #[test]
    fn test_lookup_prefers_innermost() {
        let mut f = func();
        f.push_scope();
        f.bind("a", LocalBinding::Local { index: 5, ty: Type::U32 });
        f.push_scope();
        f.bind("a", LocalBinding::Local { index: 6, ty: Type::U8 });
        assert_eq!(f.lookup("a").map(LocalBinding::ty), Some(&Type::U8));
        f.pop_scope();
        assert_eq!(f.lookup("a").map(LocalBinding::ty), Some(&Type::U32));
        assert!(f.lookup("b").is_none());
    }

    #[test]
    fn test_unlabelled_break_skips_plain_blocks() {
        let mut f = func();
        f.loops.push(LoopFrame {
            label: Some("outer".into()),
            scope_depth: 0,
            break_level: 1,
            continue_level: Some(2),
        });
        f.loops.push(LoopFrame {
            label: Some("blk".into()),
            scope_depth: 1,
            break_level: 3,
            continue_level: None,
        });
        assert_eq!(f.find_target(None).map(|l| l.break_level), Some(1));
        assert_eq!(f.find_target(Some("blk")).map(|l| l.break_level), Some(3));
        assert!(f.find_target(Some("nope")).is_none());
    }
}
