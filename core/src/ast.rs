/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Lo Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! Arena-owned syntax tree.
//!
//! Every expression, statement and item lives in a flat vector owned by
//! [`Ast`]; children are referenced by index. Indices are stable for the
//! lifetime of a compile, and the tree is acyclic by construction.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Source Spans
// =============================================================================

/// Source range of a node. Rendered as `file:line:col`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub file: Arc<str>,
    pub line: u32,
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(file: Arc<str>, line: u32, col: u32) -> Self {
        Span {
            file,
            line,
            col,
            end_line: line,
            end_col: col,
        }
    }

    /// Span covering `self` through the end of `other`.
    pub fn to(&self, other: &Span) -> Span {
        Span {
            file: self.file.clone(),
            line: self.line,
            col: self.col,
            end_line: other.end_line,
            end_col: other.end_col,
        }
    }

    /// Span used for diagnostics that belong to the module as a whole.
    pub fn module(file: &str) -> Span {
        Span::new(Arc::from(file), 1, 1)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

// =============================================================================
// Node Indices
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId(pub u32);

// =============================================================================
// Type Annotations
// =============================================================================

/// A type as written in source. Resolved against the symbol tables later.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Named(String, Span),
    Pointer(Box<TypeExpr>, Span),
}

impl TypeExpr {
    pub fn span(&self) -> &Span {
        match self {
            TypeExpr::Named(_, span) | TypeExpr::Pointer(_, span) => span,
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeExpr::Named(name, _) => write!(f, "{}", name),
            TypeExpr::Pointer(inner, _) => write!(f, "&{}", inner),
        }
    }
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInit {
    pub name: String,
    pub value: ExprId,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal with an optional width suffix (`7u8`).
    Int { value: u64, suffix: Option<String> },
    Float { value: f64, suffix: Option<String> },
    Bool(bool),
    Char(u8),
    Str(Vec<u8>),
    /// A possibly qualified name: `x`, `heap::alloc`, `Color::Red`.
    Path(String),
    Unary { op: UnaryOp, operand: ExprId },
    Binary { op: BinaryOp, lhs: ExprId, rhs: ExprId },
    Cast { expr: ExprId, ty: TypeExpr },
    Call { callee: String, args: Vec<ExprId> },
    MethodCall { receiver: ExprId, method: String, args: Vec<ExprId> },
    Field { object: ExprId, field: String },
    Index { object: ExprId, index: ExprId },
    StructLit { name: String, fields: Vec<FieldInit> },
    SizeOf(TypeExpr),
    AddrOf(ExprId),
    Deref(ExprId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

// =============================================================================
// Statements
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<StmtId>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElseBranch {
    Block(Block),
    If(StmtId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `Enum::Variant` or `Enum::Variant(binding)`.
    Variant {
        path: String,
        binding: Option<String>,
        span: Span,
    },
    Wildcard(Span),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let {
        name: String,
        mutable: bool,
        ty: Option<TypeExpr>,
        init: ExprId,
    },
    Assign {
        target: ExprId,
        op: Option<BinaryOp>,
        value: ExprId,
    },
    Expr(ExprId),
    Return(Option<ExprId>),
    Break(Option<String>),
    Continue(Option<String>),
    Defer(StmtId),
    If {
        cond: ExprId,
        then_block: Block,
        else_branch: Option<ElseBranch>,
    },
    Loop {
        label: Option<String>,
        body: Block,
    },
    While {
        label: Option<String>,
        cond: ExprId,
        body: Block,
    },
    For {
        label: Option<String>,
        var: String,
        start: ExprId,
        end: ExprId,
        body: Block,
    },
    Match {
        scrutinee: ExprId,
        arms: Vec<MatchArm>,
    },
    Block {
        label: Option<String>,
        body: Block,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

// =============================================================================
// Items
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionItem {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: Block,
    pub exported: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedFunction {
    /// Field name in the host module.
    pub field: String,
    /// Name the program calls it by (the `as` alias, or `field`).
    pub local_name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportItem {
    pub module: String,
    pub functions: Vec<ImportedFunction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructItem {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantDecl {
    pub name: String,
    pub payload: Option<TypeExpr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumItem {
    pub name: String,
    pub variants: Vec<VariantDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalItem {
    pub name: String,
    pub mutable: bool,
    pub ty: TypeExpr,
    pub init: ExprId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Function(FunctionItem),
    Import(ImportItem),
    Struct(StructItem),
    Enum(EnumItem),
    Global(GlobalItem),
    Include(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
}

// =============================================================================
// The Tree
// =============================================================================

/// Owner of every node produced for one compilation.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    items: Vec<Item>,
    /// Top-level items in declaration order, includes already spliced in.
    pub order: Vec<ItemId>,
    /// Name of the entry file, used for module-wide diagnostics.
    pub entry_file: String,
}

impl Ast {
    pub fn new(entry_file: &str) -> Self {
        Ast {
            entry_file: entry_file.to_string(),
            ..Default::default()
        }
    }

    pub fn push_expr(&mut self, kind: ExprKind, span: Span) -> ExprId {
        self.exprs.push(Expr { kind, span });
        ExprId(self.exprs.len() as u32 - 1)
    }

    pub fn push_stmt(&mut self, kind: StmtKind, span: Span) -> StmtId {
        self.stmts.push(Stmt { kind, span });
        StmtId(self.stmts.len() as u32 - 1)
    }

    pub fn push_item(&mut self, kind: ItemKind, span: Span) -> ItemId {
        self.items.push(Item { kind, span });
        ItemId(self.items.len() as u32 - 1)
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize]
    }

    pub fn item(&self, id: ItemId) -> &Item {
        &self.items[id.0 as usize]
    }

    /// Items in declaration order.
    pub fn items(&self) -> impl Iterator<Item = (ItemId, &Item)> + '_ {
        self.order.iter().map(move |&id| (id, self.item(id)))
    }

    /// True when the expression is an integer or float literal without a
    /// suffix, optionally negated. Such literals take their type from context.
    pub fn is_untyped_literal(&self, id: ExprId) -> bool {
        match &self.expr(id).kind {
            ExprKind::Int { suffix: None, .. } | ExprKind::Float { suffix: None, .. } => true,
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => self.is_untyped_literal(*operand),
            _ => false,
        }
    }

    /// Names whose address is taken (`&name`) anywhere inside `block`.
    pub fn address_taken_in(&self, block: &Block, out: &mut Vec<String>) {
        for &stmt in &block.stmts {
            self.address_taken_stmt(stmt, out);
        }
    }

    fn address_taken_stmt(&self, id: StmtId, out: &mut Vec<String>) {
        match &self.stmt(id).kind {
            StmtKind::Let { init, .. } => self.address_taken_expr(*init, out),
            StmtKind::Assign { target, value, .. } => {
                self.address_taken_expr(*target, out);
                self.address_taken_expr(*value, out);
            }
            StmtKind::Expr(e) | StmtKind::Return(Some(e)) => self.address_taken_expr(*e, out),
            StmtKind::Return(None) | StmtKind::Break(_) | StmtKind::Continue(_) => {}
            StmtKind::Defer(inner) => self.address_taken_stmt(*inner, out),
            StmtKind::If {
                cond,
                then_block,
                else_branch,
            } => {
                self.address_taken_expr(*cond, out);
                self.address_taken_in(then_block, out);
                match else_branch {
                    Some(ElseBranch::Block(b)) => self.address_taken_in(b, out),
                    Some(ElseBranch::If(s)) => self.address_taken_stmt(*s, out),
                    None => {}
                }
            }
            StmtKind::Loop { body, .. } | StmtKind::Block { body, .. } => {
                self.address_taken_in(body, out)
            }
            StmtKind::While { cond, body, .. } => {
                self.address_taken_expr(*cond, out);
                self.address_taken_in(body, out);
            }
            StmtKind::For {
                start, end, body, ..
            } => {
                self.address_taken_expr(*start, out);
                self.address_taken_expr(*end, out);
                self.address_taken_in(body, out);
            }
            StmtKind::Match { scrutinee, arms } => {
                self.address_taken_expr(*scrutinee, out);
                for arm in arms {
                    self.address_taken_in(&arm.body, out);
                }
            }
        }
    }

    fn address_taken_expr(&self, id: ExprId, out: &mut Vec<String>) {
        match &self.expr(id).kind {
            ExprKind::AddrOf(inner) => {
                if let ExprKind::Path(name) = &self.expr(*inner).kind {
                    out.push(name.clone());
                }
                self.address_taken_expr(*inner, out);
            }
            ExprKind::Unary { operand, .. } => self.address_taken_expr(*operand, out),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.address_taken_expr(*lhs, out);
                self.address_taken_expr(*rhs, out);
            }
            ExprKind::Cast { expr, .. } | ExprKind::Deref(expr) => {
                self.address_taken_expr(*expr, out)
            }
            ExprKind::Call { args, .. } => {
                for &a in args {
                    self.address_taken_expr(a, out);
                }
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                self.address_taken_expr(*receiver, out);
                for &a in args {
                    self.address_taken_expr(a, out);
                }
            }
            ExprKind::Field { object, .. } => self.address_taken_expr(*object, out),
            ExprKind::Index { object, index } => {
                self.address_taken_expr(*object, out);
                self.address_taken_expr(*index, out);
            }
            ExprKind::StructLit { fields, .. } => {
                for f in fields {
                    self.address_taken_expr(f.value, out);
                }
            }
            ExprKind::Int { .. }
            | ExprKind::Float { .. }
            | ExprKind::Bool(_)
            | ExprKind::Char(_)
            | ExprKind::Str(_)
            | ExprKind::Path(_)
            | ExprKind::SizeOf(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::new(Arc::from("test.lo"), 3, 7)
    }

    #[test]
    fn test_span_display() {
        assert_eq!(span().to_string(), "test.lo:3:7");
    }

    #[test]
    fn test_arena_indices_are_positional() {
        let mut ast = Ast::new("test.lo");
        let a = ast.push_expr(ExprKind::Bool(true), span());
        let b = ast.push_expr(ExprKind::Char(b'x'), span());
        assert_eq!(a, ExprId(0));
        assert_eq!(b, ExprId(1));
        assert_eq!(ast.expr(b).kind, ExprKind::Char(b'x'));
    }

    #[test]
    fn test_untyped_literal_detection() {
        let mut ast = Ast::new("test.lo");
        let lit = ast.push_expr(
            ExprKind::Int {
                value: 1,
                suffix: None,
            },
            span(),
        );
        let neg = ast.push_expr(
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand: lit,
            },
            span(),
        );
        let typed = ast.push_expr(
            ExprKind::Int {
                value: 1,
                suffix: Some("u8".into()),
            },
            span(),
        );
        assert!(ast.is_untyped_literal(lit));
        assert!(ast.is_untyped_literal(neg));
        assert!(!ast.is_untyped_literal(typed));
    }
}
