/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Diagnostics for the Lo Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use crate::ast::Span;
use crate::config::ConfigError;
use crate::loader::LoadError;
use crate::parser::ParseError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Compile Errors
// =============================================================================

/// Classes of fatal compile errors. There is no warning tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    UnknownSymbol,
    DuplicateSymbol,
    TypeMismatch,
    IncompleteInitializer,
    UnknownLabel,
    NonConstantInitializer,
    InfiniteLayout,
    InvalidModule,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::UnknownSymbol => "UnknownSymbol",
            ErrorKind::DuplicateSymbol => "DuplicateSymbol",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::IncompleteInitializer => "IncompleteInitializer",
            ErrorKind::UnknownLabel => "UnknownLabel",
            ErrorKind::NonConstantInitializer => "NonConstantInitializer",
            ErrorKind::InfiniteLayout => "InfiniteLayout",
            ErrorKind::InvalidModule => "InvalidModule",
        };
        f.write_str(name)
    }
}

/// A fatal diagnostic: kind, originating span and message.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{span} - {kind}: {message}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub span: Span,
    pub message: String,
}

impl CompileError {
    pub fn new(kind: ErrorKind, span: &Span, message: impl Into<String>) -> Self {
        CompileError {
            kind,
            span: span.clone(),
            message: message.into(),
        }
    }

    pub fn unknown_symbol(span: &Span, what: &str, name: &str) -> Self {
        Self::new(ErrorKind::UnknownSymbol, span, format!("unknown {}: {}", what, name))
    }

    pub fn type_mismatch(span: &Span, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch, span, message)
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

// =============================================================================
// Crate-Level Error
// =============================================================================

/// Any failure of the `source -> wasm` pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_rendering() {
        let err = CompileError::unknown_symbol(&Span::module("main.lo"), "function", "nope");
        insta::assert_snapshot!(err.to_string(), @"main.lo:1:1 - UnknownSymbol: unknown function: nope");
    }

    #[test]
    fn test_compile_error_serializes_kind_and_span() {
        let err = CompileError::type_mismatch(&Span::module("a.lo"), "expected u32, found bool");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "TypeMismatch");
        assert_eq!(json["span"]["file"], "a.lo");
        assert_eq!(json["span"]["line"], 1);
    }
}
