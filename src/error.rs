use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// I/O errors raised by a raster store while loading or saving images.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// The image does not exist in the store
    #[error("Image not found: {0}")]
    NotFound(PathBuf),

    /// The image bytes could not be decoded
    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// The raster could not be encoded
    #[error("Failed to encode {path}: {message}")]
    Encode { path: PathBuf, message: String },

    /// The encoded bytes could not be written
    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Errors raised while parsing descriptor, stos or transform text.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// A line could not be interpreted
    #[error("{source_name}:{line}: {message}")]
    Syntax {
        source_name: String,
        line: usize,
        message: String,
    },

    /// A required field was never supplied
    #[error("{source_name}: missing field '{field}'")]
    MissingField {
        source_name: String,
        field: &'static str,
    },

    /// The embedded transform is invalid
    #[error("{source_name}:{line}: {error}")]
    Transform {
        source_name: String,
        line: usize,
        error: TransformError,
    },
}

/// Errors related to building or evaluating geometric transforms.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// The transform type tag is not recognized
    #[error("Unknown transform type '{0}'")]
    UnknownType(String),

    /// Wrong number of parameters for the transform type
    #[error("Transform '{tag}' expects {expected} parameters, got {actual}")]
    ParameterCount {
        tag: &'static str,
        expected: String,
        actual: usize,
    },

    /// A parameter is not a finite number
    #[error("Invalid transform parameter '{0}'")]
    InvalidParameter(String),

    /// The linear part of the transform cannot be inverted
    #[error("Transform is singular (determinant {determinant})")]
    Singular { determinant: f64 },
}

/// Errors raised when the slice registration graph does not resolve to one tree.
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    /// A cycle or a slice reachable along more than one path
    #[error("Ambiguous registration: slices {slices:?} are reachable along more than one path")]
    AmbiguousRegistration { slices: Vec<String> },

    /// More than one disconnected group of slices
    #[error("Disjoint registration: {} independent roots {roots:?}", roots.len())]
    DisjointRegistration { roots: Vec<String> },

    /// No tree path connects the two slices
    #[error("No registration path from '{from}' to '{to}'")]
    NoPath { from: String, to: String },

    /// The slice name never appears in any record
    #[error("Unknown slice '{0}'")]
    UnknownSlice(String),
}

/// A single failed tile save, collected by the tile writer.
#[derive(Debug, Clone, Serialize)]
pub struct SaveFailure {
    /// Destination of the failed write
    pub path: PathBuf,

    /// Reason reported by the store
    pub message: String,
}

/// Top-level pipeline errors.
///
/// Configuration and registration errors abort before any pixel work starts.
/// Save failures are collected by the writer and only surface after it has
/// been joined.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid or inconsistent options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input text could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Input file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// The registration graph is not a single tree
    #[error("{0}")]
    Registration(#[from] RegistrationError),

    /// A transform could not be built or inverted
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// The slices share no common region
    #[error("Slices have no common footprint")]
    EmptyFootprint,

    /// One or more output images failed to save
    #[error("{} output image(s) failed to save", failures.len())]
    SaveFailure { failures: Vec<SaveFailure> },

    /// The run was stopped before completion
    #[error("Run cancelled after {completed} output image(s)")]
    Cancelled { completed: usize },
}

/// Non-fatal conditions that degraded the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A source image could not be decoded and contributed nothing
    SourceImageUnreadable { path: PathBuf, message: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::SourceImageUnreadable { path, message } => {
                write!(f, "source image {} unreadable: {}", path.display(), message)
            }
        }
    }
}
