//! Error handling utilities for the Banjo compiler

use thiserror::Error;

/// The main error type for the Banjo compiler
#[derive(Error, Debug, Clone)]
pub enum BanjoError {
    #[error("Semantic error: {message}")]
    SemaError { message: String },

    #[error("SSA lowering error: {message}")]
    SsaError { message: String },

    #[error("Code generation error: {message}")]
    CodegenError { message: String },

    #[error("Encoding error: {message}")]
    EncodeError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Hot-reload error: {message}")]
    ReloadError { message: String },

    #[error("internal compiler error: {message}")]
    Internal { message: String },
}

/// Result type alias for Banjo compiler operations
pub type BanjoResult<T> = Result<T, BanjoError>;

impl BanjoError {
    pub fn sema(message: impl Into<String>) -> Self {
        Self::SemaError { message: message.into() }
    }

    pub fn ssa(message: impl Into<String>) -> Self {
        Self::SsaError { message: message.into() }
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        Self::CodegenError { message: message.into() }
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::EncodeError { message: message.into() }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::IoError { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    pub fn reload(message: impl Into<String>) -> Self {
        Self::ReloadError { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

impl From<std::io::Error> for BanjoError {
    fn from(error: std::io::Error) -> Self {
        Self::IoError { message: error.to_string() }
    }
}
