//! The error types of the crate, one per engine boundary

use std::fmt::Display;
use std::io;
use std::path::PathBuf;

/// A fatal error while ingesting a profile
///
/// Only these errors abort the parse. Malformed data rows are skipped and
/// logged instead, see [`crate::parser::ProfileParser`].
#[derive(Debug)]
pub enum ParseError {
    /// The input contained no non-empty line
    EmptyFile,
    /// An I/O error while reading from the input stream
    Io(io::Error),
    /// The input stream exceeded the configured size cap
    ///
    /// `InputTooLarge(cap_in_bytes)`
    InputTooLarge(u64),
    /// A data row with a non-integer field
    ///
    /// `MalformedRow(line)`. This error never aborts the parse, the
    /// offending row is skipped.
    MalformedRow(String),
    /// A data row was consumed before an `events:` header line was seen
    NoVocabulary,
    /// The `version:` header line declared an unsupported format version
    ///
    /// `VersionMismatch(version)`
    VersionMismatch(String),
}

/// The error when source-path resolution misses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No available source file matches the path, which is carried as it
    /// appeared in the profile
    NotFound(String),
}

/// The error when an entry-point string matches nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    /// Neither a function name nor a program counter matched the carried
    /// query string
    NotFound(String),
}

/// A per-call error of the disassembler adapter
#[derive(Debug)]
pub enum DisasmError {
    /// The disassembly tool rejected the object file
    ///
    /// `InvalidObjectFile(object_path)`
    InvalidObjectFile(PathBuf),
    /// Any other I/O failure while running the tool
    Io(io::Error),
    /// The object file was not readable
    ///
    /// `PermissionDenied(object_path)`
    PermissionDenied(PathBuf),
    /// The configured disassembly tool was not found
    ///
    /// `ToolMissing(executable)`
    ToolMissing(String),
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyFile => write!(f, "Empty file"),
            Self::Io(error) => write!(f, "Error reading input: {error}"),
            Self::InputTooLarge(cap) => {
                write!(f, "Input exceeds the size cap of {cap} bytes")
            }
            Self::MalformedRow(line) => write!(f, "Malformed data row: '{line}'"),
            Self::NoVocabulary => {
                write!(f, "Data row before an 'events:' header line")
            }
            Self::VersionMismatch(version) => write!(
                f,
                "Version mismatch: Requires callgrind format version '1' but was '{version}'"
            ),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<io::Error> for ParseError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "No source file found for '{path}'"),
        }
    }
}

impl std::error::Error for ResolveError {}

impl Display for EntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(input) => write!(f, "No entry point matches '{input}'"),
        }
    }
}

impl std::error::Error for EntryError {}

impl Display for DisasmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidObjectFile(path) => {
                write!(f, "File format of '{}' not recognized", path.display())
            }
            Self::Io(error) => write!(f, "Error running disassembler: {error}"),
            Self::PermissionDenied(path) => {
                write!(f, "Object file '{}' is not readable", path.display())
            }
            Self::ToolMissing(executable) => {
                write!(f, "Disassembly tool '{executable}' not found in PATH")
            }
        }
    }
}

impl std::error::Error for DisasmError {}

impl From<io::Error> for DisasmError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}
