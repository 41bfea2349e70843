/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Symbol Tables for the Lo Compiler.
 *
 * Functions, globals and types occupy separate namespaces, so a struct and
 * a function may share a name. Tables are filled in two passes over the
 * top-level items and are read-only once lowering starts.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use crate::ast::{Ast, ExprId, FieldInit, ItemId, ItemKind, Param, Span, TypeExpr};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::types::{Scalar, Type, STR_TYPE};
use std::collections::HashMap;

// =============================================================================
// Declarations
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub span: Span,
}

impl StructDef {
    /// Field lookup by name within this struct only.
    pub fn field(&self, name: &str) -> Option<(usize, &FieldDef)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// A literal must name every field exactly once and nothing else.
    pub fn check_initializer(&self, inits: &[FieldInit], span: &Span) -> CompileResult<()> {
        let mut seen: Vec<&str> = Vec::with_capacity(inits.len());
        for init in inits {
            if self.field(&init.name).is_none() {
                return Err(CompileError::unknown_symbol(
                    &init.span,
                    "field",
                    &format!("{}.{}", self.name, init.name),
                ));
            }
            if seen.contains(&init.name.as_str()) {
                return Err(CompileError::new(
                    ErrorKind::IncompleteInitializer,
                    &init.span,
                    format!("field `{}` of `{}` is initialised twice", init.name, self.name),
                ));
            }
            seen.push(&init.name);
        }
        let missing: Vec<&str> = self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| !seen.contains(name))
            .collect();
        if !missing.is_empty() {
            return Err(CompileError::new(
                ErrorKind::IncompleteInitializer,
                span,
                format!("missing field(s) {} in `{}` literal", missing.join(", "), self.name),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantDef {
    pub name: String,
    pub payload: Option<Type>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<VariantDef>,
    pub span: Span,
}

impl EnumDef {
    /// Variant lookup by name; the tag is the declaration index.
    pub fn variant(&self, name: &str) -> Option<(u32, &VariantDef)> {
        self.variants
            .iter()
            .enumerate()
            .find(|(_, v)| v.name == name)
            .map(|(i, v)| (i as u32, v))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDecl {
    Struct(StructDef),
    Enum(EnumDef),
}

impl TypeDecl {
    pub fn span(&self) -> &Span {
        match self {
            TypeDecl::Struct(s) => &s.span,
            TypeDecl::Enum(e) => &e.span,
        }
    }

    pub fn as_type(&self) -> Type {
        match self {
            TypeDecl::Struct(s) => Type::Struct(s.name.clone()),
            TypeDecl::Enum(e) => Type::Enum(e.name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub params: Vec<(String, Type)>,
    pub ret: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionKind {
    Defined(ItemId),
    Imported { module: String, field: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub sig: FunctionSig,
    pub kind: FunctionKind,
    pub exported: bool,
    /// Index in the WASM function index space (imports come first).
    pub index: u32,
    pub span: Span,
}

impl FunctionDecl {
    /// Methods are functions named `Type::name` whose first parameter is `self`.
    pub fn is_method(&self) -> bool {
        self.sig.params.first().is_some_and(|(name, _)| name == "self")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: Type,
    pub mutable: bool,
    pub init: ExprId,
    pub span: Span,
}

// =============================================================================
// Namespaces
// =============================================================================

/// Append-only name -> declaration map that preserves declaration order.
#[derive(Debug, Clone)]
pub struct Namespace<T> {
    what: &'static str,
    entries: Vec<T>,
    by_name: HashMap<String, usize>,
}

impl<T> Namespace<T> {
    fn new(what: &'static str) -> Self {
        Namespace {
            what,
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Bind `name`, failing with `DuplicateSymbol` if it is already bound.
    pub fn declare(&mut self, name: &str, span: &Span, decl: T) -> CompileResult<usize> {
        if self.by_name.contains_key(name) {
            return Err(CompileError::new(
                ErrorKind::DuplicateSymbol,
                span,
                format!("{} `{}` is already declared", self.what, name),
            ));
        }
        self.entries.push(decl);
        let idx = self.entries.len() - 1;
        self.by_name.insert(name.to_string(), idx);
        Ok(idx)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Look up `name`, failing with `UnknownSymbol` when absent.
    pub fn resolve(&self, name: &str, span: &Span) -> CompileResult<&T> {
        self.get(name)
            .ok_or_else(|| CompileError::unknown_symbol(span, self.what, name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        match self.by_name.get(name) {
            Some(&i) => Some(&mut self.entries[i]),
            None => None,
        }
    }
}

// =============================================================================
// Symbol Table
// =============================================================================

#[derive(Debug, Clone)]
pub struct SymbolTable {
    pub functions: Namespace<FunctionDecl>,
    pub globals: Namespace<GlobalDecl>,
    pub types: Namespace<TypeDecl>,
    pub import_count: u32,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Empty table with the built-in `str` struct registered.
    pub fn new() -> Self {
        let mut types = Namespace::new("type");
        let builtin = Span::module("<builtin>");
        let str_def = StructDef {
            name: STR_TYPE.to_string(),
            fields: vec![
                FieldDef {
                    name: "ptr".into(),
                    ty: Type::pointer_to(Type::U8),
                    span: builtin.clone(),
                },
                FieldDef {
                    name: "len".into(),
                    ty: Type::U32,
                    span: builtin.clone(),
                },
            ],
            span: builtin.clone(),
        };
        // An empty namespace cannot reject the first declaration.
        let _ = types.declare(STR_TYPE, &builtin, TypeDecl::Struct(str_def));
        SymbolTable {
            functions: Namespace::new("function"),
            globals: Namespace::new("global"),
            types,
            import_count: 0,
        }
    }

    /// Build the tables for a whole program.
    ///
    /// Pass 1 registers every top-level name, so functions may call each
    /// other in any order and types may be used before their declaration.
    /// Pass 2 resolves field and payload types.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn collect(ast: &Ast) -> CompileResult<SymbolTable> {
        let mut table = SymbolTable::new();

        // Pass 1a: type names.
        for (_, item) in ast.items() {
            match &item.kind {
                ItemKind::Struct(s) => {
                    let decl = TypeDecl::Struct(StructDef {
                        name: s.name.clone(),
                        fields: Vec::new(),
                        span: item.span.clone(),
                    });
                    table.types.declare(&s.name, &item.span, decl)?;
                }
                ItemKind::Enum(e) => {
                    let decl = TypeDecl::Enum(EnumDef {
                        name: e.name.clone(),
                        variants: Vec::new(),
                        span: item.span.clone(),
                    });
                    table.types.declare(&e.name, &item.span, decl)?;
                }
                _ => {}
            }
        }

        // Pass 1b: functions, imports and globals. Imports take the low
        // function indices, so count them before numbering definitions.
        let import_count: usize = ast
            .items()
            .map(|(_, item)| match &item.kind {
                ItemKind::Import(imp) => imp.functions.len(),
                _ => 0,
            })
            .sum();
        table.import_count = import_count as u32;
        let mut next_import = 0u32;
        let mut next_defined = table.import_count;

        for (id, item) in ast.items() {
            match &item.kind {
                ItemKind::Function(f) => {
                    let sig = table.resolve_signature(&f.params, f.ret.as_ref())?;
                    let decl = FunctionDecl {
                        name: f.name.clone(),
                        sig,
                        kind: FunctionKind::Defined(id),
                        exported: f.exported,
                        index: next_defined,
                        span: item.span.clone(),
                    };
                    table.functions.declare(&f.name, &item.span, decl)?;
                    next_defined += 1;
                }
                ItemKind::Import(imp) => {
                    for func in &imp.functions {
                        let sig = table.resolve_signature(&func.params, func.ret.as_ref())?;
                        let decl = FunctionDecl {
                            name: func.local_name.clone(),
                            sig,
                            kind: FunctionKind::Imported {
                                module: imp.module.clone(),
                                field: func.field.clone(),
                            },
                            exported: false,
                            index: next_import,
                            span: func.span.clone(),
                        };
                        table.functions.declare(&func.local_name, &func.span, decl)?;
                        next_import += 1;
                    }
                }
                ItemKind::Global(g) => {
                    let ty = table.resolve_type(&g.ty)?;
                    if ty.is_void() {
                        return Err(CompileError::type_mismatch(
                            &item.span,
                            format!("global `{}` cannot have type void", g.name),
                        ));
                    }
                    let decl = GlobalDecl {
                        name: g.name.clone(),
                        ty,
                        mutable: g.mutable,
                        init: g.init,
                        span: item.span.clone(),
                    };
                    table.globals.declare(&g.name, &item.span, decl)?;
                }
                ItemKind::Struct(_) | ItemKind::Enum(_) | ItemKind::Include(_) => {}
            }
        }

        // Pass 2: field and payload types.
        for (_, item) in ast.items() {
            match &item.kind {
                ItemKind::Struct(s) => {
                    let mut fields: Vec<FieldDef> = Vec::with_capacity(s.fields.len());
                    for field in &s.fields {
                        if fields.iter().any(|f| f.name == field.name) {
                            return Err(CompileError::new(
                                ErrorKind::DuplicateSymbol,
                                &field.span,
                                format!("field `{}` declared twice in `{}`", field.name, s.name),
                            ));
                        }
                        let ty = table.resolve_value_type(&field.ty)?;
                        fields.push(FieldDef {
                            name: field.name.clone(),
                            ty,
                            span: field.span.clone(),
                        });
                    }
                    if let Some(TypeDecl::Struct(def)) = table.types.get_mut(&s.name) {
                        def.fields = fields;
                    }
                }
                ItemKind::Enum(e) => {
                    let mut variants: Vec<VariantDef> = Vec::with_capacity(e.variants.len());
                    for variant in &e.variants {
                        if variants.iter().any(|v| v.name == variant.name) {
                            return Err(CompileError::new(
                                ErrorKind::DuplicateSymbol,
                                &variant.span,
                                format!("variant `{}` declared twice in `{}`", variant.name, e.name),
                            ));
                        }
                        let payload = match &variant.payload {
                            Some(ty) => Some(table.resolve_value_type(ty)?),
                            None => None,
                        };
                        variants.push(VariantDef {
                            name: variant.name.clone(),
                            payload,
                            span: variant.span.clone(),
                        });
                    }
                    if let Some(TypeDecl::Enum(def)) = table.types.get_mut(&e.name) {
                        def.variants = variants;
                    }
                }
                _ => {}
            }
        }

        tracing::debug!(
            functions = table.functions.len(),
            globals = table.globals.len(),
            types = table.types.len(),
            "symbol tables built"
        );
        Ok(table)
    }

    // =========================================================================
    // Type Resolution
    // =========================================================================

    pub fn resolve_type(&self, ty: &TypeExpr) -> CompileResult<Type> {
        match ty {
            TypeExpr::Pointer(inner, _) => Ok(Type::pointer_to(self.resolve_type(inner)?)),
            TypeExpr::Named(name, span) => {
                if name == "void" {
                    return Ok(Type::Void);
                }
                if let Some(scalar) = Scalar::from_name(name) {
                    return Ok(Type::Scalar(scalar));
                }
                Ok(self.types.resolve(name, span)?.as_type())
            }
        }
    }

    /// Like [`resolve_type`](Self::resolve_type) but rejects `void`.
    pub fn resolve_value_type(&self, ty: &TypeExpr) -> CompileResult<Type> {
        let resolved = self.resolve_type(ty)?;
        if resolved.is_void() {
            return Err(CompileError::type_mismatch(ty.span(), "void is not a value type"));
        }
        Ok(resolved)
    }

    fn resolve_signature(&self, params: &[Param], ret: Option<&TypeExpr>) -> CompileResult<FunctionSig> {
        let mut resolved = Vec::with_capacity(params.len());
        for p in params {
            resolved.push((p.name.clone(), self.resolve_value_type(&p.ty)?));
        }
        let ret = match ret {
            Some(ty) => self.resolve_type(ty)?,
            None => Type::Void,
        };
        Ok(FunctionSig {
            params: resolved,
            ret,
        })
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn struct_def(&self, name: &str) -> Option<&StructDef> {
        match self.types.get(name) {
            Some(TypeDecl::Struct(def)) => Some(def),
            _ => None,
        }
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        match self.types.get(name) {
            Some(TypeDecl::Enum(def)) => Some(def),
            _ => None,
        }
    }

    /// Static method lookup: `Type::method`, decided by the receiver's
    /// declared type only.
    pub fn method(&self, type_name: &str, method: &str) -> Option<&FunctionDecl> {
        self.functions.get(&format!("{}::{}", type_name, method))
    }

    /// Functions in WASM index order: imports, then definitions.
    pub fn functions_by_index(&self) -> Vec<&FunctionDecl> {
        let mut all: Vec<&FunctionDecl> = self.functions.iter().collect();
        all.sort_by_key(|f| f.index);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn collect(src: &str) -> CompileResult<SymbolTable> {
        let ast = parse_program(src, "test.lo").expect("parse failed");
        SymbolTable::collect(&ast)
    }

    #[test]
    fn test_forward_references_resolve() {
        let table = collect(
            "fn a(): u32 { return b(); }\n\
             fn b(): u32 { return 1; }\n\
             fn make(p: &Later): u32 { return 0; }\n\
             struct Later { x: u32 }",
        );
        assert!(table.is_ok(), "forward references failed: {:?}", table.err());
    }

    #[test]
    fn test_duplicate_struct_rejected() {
        let err = collect("struct P { x: u32 }\nstruct P { y: u8 }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol);
        assert_eq!(err.span.line, 2);
    }

    #[test]
    fn test_separate_namespaces() {
        let table = collect("struct Point { x: u32 }\nfn Point(): u32 { return 0; }");
        assert!(table.is_ok(), "struct and function may share a name: {:?}", table.err());
    }

    #[test]
    fn test_unknown_field_type() {
        let err = collect("struct P { next: Missing }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownSymbol);
        assert!(err.message.contains("Missing"), "message was {}", err.message);
    }

    #[test]
    fn test_imports_take_low_indices() {
        let table = collect(
            "fn main() { }\n\
             import from \"utils\" { fn debug(x: u32); fn trace(x: u32) as log; }",
        )
        .unwrap();
        assert_eq!(table.import_count, 2);
        assert_eq!(table.functions.get("debug").unwrap().index, 0);
        assert_eq!(table.functions.get("log").unwrap().index, 1);
        assert_eq!(table.functions.get("main").unwrap().index, 2);
        assert!(table.functions.get("trace").is_none(), "alias replaces the field name");
    }

    #[test]
    fn test_method_lookup_is_by_type() {
        let table = collect(
            "struct Cat { id: u32 }\nstruct Dog { id: u32 }\n\
             fn Cat::speak(self: &Cat): u32 { return 1; }\n\
             fn Dog::speak(self: &Dog): u32 { return 2; }",
        )
        .unwrap();
        let cat = table.method("Cat", "speak").unwrap();
        assert!(cat.is_method());
        assert_eq!(cat.sig.params[0].1, Type::pointer_to(Type::Struct("Cat".into())));
        assert!(table.method("Bird", "speak").is_none());
    }

    #[test]
    fn test_builtin_str_cannot_be_redeclared() {
        let err = collect("struct str { a: u8 }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol);
    }
}
