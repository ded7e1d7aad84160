//! The disassembler adapter binding profile PCs to external tool output
//!
//! The tool invocation sits behind the [`Disassembler`] trait so tests can
//! inject a fake returning canned instruction sequences. The default
//! implementation shells out to `objdump`.

use std::io;
use std::path::Path;
use std::process::Command;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use which::which;

use crate::error::DisasmError;
use crate::metrics::Metrics;
use crate::profile::FunctionRecord;
use crate::util;

/// The default disassembly executable
pub const DEFAULT_DISASSEMBLER: &str = "objdump";
/// Bytes of padding before the function's first program counter
pub const RANGE_PADDING_BEFORE: u64 = 16;
/// Bytes of padding after the function's last program counter
pub const RANGE_PADDING_AFTER: u64 = 64;

lazy_static! {
    static ref INSTRUCTION_RE: Regex =
        Regex::new(r"^[ ]*([0-9a-f]+):[ \t]+(.+)$").expect("Regex should compile");
}

/// One disassembled instruction joined with the profile's per-PC events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyInstruction {
    /// True if the profile recorded a non-zero event for this PC
    pub executed: bool,
    /// The textual instruction as printed by the tool
    pub instruction: String,
    /// The profile's event counters for this PC, `None` when the PC does
    /// not appear in the function's records
    pub metrics: Option<Metrics>,
    /// The program counter as lowercase hexadecimal with `0x` prefix
    pub pc: String,
}

/// The capability of disassembling an address range of an object file
pub trait Disassembler {
    /// Return the `(pc, instruction)` pairs of the range `[lo..hi]`
    ///
    /// An empty result is not an error, it simply means the tool printed
    /// no instructions for the range.
    fn disassemble(
        &self,
        object: &Path,
        lo: u64,
        hi: u64,
    ) -> Result<Vec<(String, String)>, DisasmError>;
}

/// The `objdump` backed [`Disassembler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Objdump {
    /// The executable name or path, looked up in `PATH`
    pub executable: String,
}

impl Default for Objdump {
    fn default() -> Self {
        Self {
            executable: DEFAULT_DISASSEMBLER.to_owned(),
        }
    }
}

impl Objdump {
    /// Create an adapter for a custom executable
    pub fn new<T>(executable: T) -> Self
    where
        T: Into<String>,
    {
        Self {
            executable: executable.into(),
        }
    }
}

impl Disassembler for Objdump {
    fn disassemble(
        &self,
        object: &Path,
        lo: u64,
        hi: u64,
    ) -> Result<Vec<(String, String)>, DisasmError> {
        let executable = which(&self.executable)
            .map_err(|_| DisasmError::ToolMissing(self.executable.clone()))?;

        debug!(
            "Disassembling '{}' between {} and {}",
            object.display(),
            util::format_pc(lo),
            util::format_pc(hi)
        );
        let output = Command::new(executable)
            .arg("--disassemble")
            .arg("--demangle")
            .arg(format!("--start-address={}", util::format_pc(lo)))
            .arg(format!("--stop-address={}", util::format_pc(hi)))
            .arg(object)
            .output()
            .map_err(|error| classify_io_error(error, object))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(&stderr, object));
        }

        Ok(parse_instructions(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse the instruction lines of a disassembly listing
///
/// Lines not matching the `address: instruction` shape (section headers,
/// symbol labels, the file preamble) are skipped.
pub fn parse_instructions(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            INSTRUCTION_RE.captures(line).map(|captures| {
                let pc = format!("0x{}", &captures[1]);
                (pc, captures[2].trim_end().to_owned())
            })
        })
        .collect()
}

/// The disassembly range of a function, `(min PC - 16, max PC + 64)`
///
/// `None` when the function has no PC records.
pub fn disassembly_range(function: &FunctionRecord) -> Option<(u64, u64)> {
    let mut values = function.pcs.keys().filter_map(|pc| util::parse_pc(pc));
    let first = values.next()?;
    let (min, max) = values.fold((first, first), |(min, max), value| {
        (min.min(value), max.max(value))
    });
    Some((
        min.saturating_sub(RANGE_PADDING_BEFORE),
        max.saturating_add(RANGE_PADDING_AFTER),
    ))
}

/// Join disassembled instructions with the function's per-PC records
///
/// Instructions whose PC is unknown to the profile carry no metrics, PCs
/// outside the requested range are retained as the tool printed them.
pub fn annotate(
    instructions: Vec<(String, String)>,
    function: &FunctionRecord,
) -> Vec<AssemblyInstruction> {
    let by_address = function
        .pcs
        .iter()
        .filter_map(|(pc, record)| util::parse_pc(pc).map(|address| (address, record)))
        .collect::<IndexMap<_, _>>();

    instructions
        .into_iter()
        .map(|(pc, instruction)| {
            let record = util::parse_pc(&pc).and_then(|address| by_address.get(&address));
            AssemblyInstruction {
                executed: record.is_some_and(|record| record.executed),
                instruction,
                metrics: record.map(|record| record.metrics.clone()),
                pc,
            }
        })
        .collect()
}

fn classify_io_error(error: io::Error, object: &Path) -> DisasmError {
    match error.kind() {
        io::ErrorKind::PermissionDenied => DisasmError::PermissionDenied(object.to_owned()),
        _ => DisasmError::Io(error),
    }
}

fn classify_stderr(stderr: &str, object: &Path) -> DisasmError {
    if stderr.contains("File format not recognized") {
        return DisasmError::InvalidObjectFile(object.to_owned());
    }
    if stderr.contains("Permission denied") {
        return DisasmError::PermissionDenied(object.to_owned());
    }
    warn!("Disassembler failed: {}", stderr.trim());
    DisasmError::Io(io::Error::other(stderr.trim().to_owned()))
}

/// A canned disassembler for tests and headless environments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeDisassembler {
    /// The `(pc, instruction)` pairs returned for every request
    pub instructions: Vec<(String, String)>,
}

impl Disassembler for FakeDisassembler {
    fn disassemble(
        &self,
        _object: &Path,
        _lo: u64,
        _hi: u64,
    ) -> Result<Vec<(String, String)>, DisasmError> {
        Ok(self.instructions.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::parser::ProfileParser;

    const LISTING: &str = "\n\
        target/debug/prog:     file format elf64-x86-64\n\
        \n\
        Disassembly of section .text:\n\
        \n\
        0000000000001000 <main>:\n\
        \x20   1000:\t55                   \tpush   %rbp\n\
        \x20   1004:\t48 89 e5             \tmov    %rsp,%rbp\n\
        \x20   1008:\tc3                   \tret\n";

    fn function() -> FunctionRecord {
        let input = "# callgrind format\n\
                     events: Ir\n\
                     positions: instr line\n\
                     fl=a.c\n\
                     fn=main\n\
                     0x1000 1 3\n\
                     0x1004 2 0\n";
        let profile = ProfileParser::default().parse(input.as_bytes()).unwrap();
        profile.function("a.c", "main").unwrap().clone()
    }

    #[test]
    fn test_parse_instructions() {
        let instructions = parse_instructions(LISTING);
        assert_eq!(
            instructions,
            vec![
                ("0x1000".to_owned(), "55                   \tpush   %rbp".to_owned()),
                ("0x1004".to_owned(), "48 89 e5             \tmov    %rsp,%rbp".to_owned()),
                ("0x1008".to_owned(), "c3                   \tret".to_owned()),
            ]
        );
    }

    #[test]
    fn test_parse_instructions_empty_stdout() {
        assert_eq!(parse_instructions(""), vec![]);
    }

    #[test]
    fn test_disassembly_range_applies_padding() {
        assert_eq!(disassembly_range(&function()), Some((0x1000 - 16, 0x1004 + 64)));
    }

    #[test]
    fn test_disassembly_range_saturates_at_zero() {
        let input = "# callgrind format\n\
                     events: Ir\n\
                     positions: instr line\n\
                     fl=a.c\n\
                     fn=f\n\
                     0x8 1 1\n";
        let profile = ProfileParser::default().parse(input.as_bytes()).unwrap();
        let function = profile.function("a.c", "f").unwrap();
        assert_eq!(disassembly_range(function), Some((0, 0x8 + 64)));
    }

    #[test]
    fn test_disassembly_range_without_pcs() {
        assert_eq!(disassembly_range(&FunctionRecord::default()), None);
    }

    #[test]
    fn test_annotate_joins_profile_events() {
        let function = function();
        let annotated = annotate(parse_instructions(LISTING), &function);

        assert_eq!(annotated.len(), 3);
        assert!(annotated[0].executed);
        assert_eq!(
            annotated[0].metrics.as_ref().and_then(|m| m.metric_by_kind(&crate::metrics::EventKind::Ir)),
            Some(3)
        );
        // 0x1004 appears in the profile with zero counts
        assert!(!annotated[1].executed);
        assert!(annotated[1].metrics.is_some());
        // 0x1008 is unknown to the profile and tolerated
        assert!(!annotated[2].executed);
        assert!(annotated[2].metrics.is_none());
    }

    #[rstest]
    #[case::invalid_object(
        "objdump: target/x: File format not recognized",
        DisasmError::InvalidObjectFile(PathBuf::from("target/x"))
    )]
    #[case::permission_denied(
        "objdump: target/x: Permission denied",
        DisasmError::PermissionDenied(PathBuf::from("target/x"))
    )]
    fn test_classify_stderr(#[case] stderr: &str, #[case] expected: DisasmError) {
        let actual = classify_stderr(stderr, Path::new("target/x"));
        assert_eq!(format!("{actual:?}"), format!("{expected:?}"));
    }

    #[test]
    fn test_classify_stderr_other_is_io() {
        let actual = classify_stderr("objdump: something else", Path::new("target/x"));
        assert!(matches!(actual, DisasmError::Io(_)));
    }

    #[test]
    fn test_fake_disassembler_round_trip() {
        let fake = FakeDisassembler {
            instructions: vec![("0x1000".to_owned(), "ret".to_owned())],
        };
        let instructions = fake.disassemble(Path::new("obj"), 0, 0x2000).unwrap();
        assert_eq!(instructions.len(), 1);
    }
}
