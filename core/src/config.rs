/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Compile Options for the Lo Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// WASM page size in bytes.
pub const PAGE_SIZE: u32 = 65536;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Knobs for the memory map and the final verification step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileOptions {
    /// First byte of static data. Addresses below it stay unused so that
    /// a null pointer never aliases real data.
    pub data_start: u32,
    /// Bytes reserved for the shadow stack.
    pub stack_size: u32,
    pub min_memory_pages: u32,
    pub max_memory_pages: Option<u32>,
    /// Export name of the linear memory.
    pub memory_export: String,
    /// Run the validator over the finished module.
    pub verify: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            data_start: 8,
            stack_size: PAGE_SIZE,
            min_memory_pages: 1,
            max_memory_pages: None,
            memory_export: "memory".to_string(),
            verify: true,
        }
    }
}

impl CompileOptions {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let options: CompileOptions = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_size % 16 != 0 {
            return Err(ConfigError::Invalid(format!(
                "stack_size must be a multiple of 16, got {}",
                self.stack_size
            )));
        }
        if let Some(max) = self.max_memory_pages {
            if max < self.min_memory_pages {
                return Err(ConfigError::Invalid(format!(
                    "max_memory_pages ({}) is below min_memory_pages ({})",
                    max, self.min_memory_pages
                )));
            }
        }
        if self.memory_export.is_empty() {
            return Err(ConfigError::Invalid("memory_export must not be empty".into()));
        }
        Ok(())
    }
}
