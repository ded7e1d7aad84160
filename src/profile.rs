//! The data model built from a parsed profile
//!
//! All entities are constructed by the parser in a single pass over the
//! input and frozen afterwards. Everything observable through the query
//! surface is a read-only view, derived values are computed on demand.

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::metrics::Metrics;
use crate::util;

/// The path callgrind emits for code it cannot attribute to a source file
pub const UNKNOWN_PATH: &str = "???";

/// The flavor of the analyzed profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisKind {
    /// Line-level positions only, as produced by cachegrind
    #[default]
    Cachegrind,
    /// Optionally instruction-level positions, call edges and object files
    Callgrind,
}

/// The header data of a profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileProperties {
    /// The executed command with command-line arguments
    pub command: Option<String>,
    /// The "creator" of the profile
    pub creator: Option<String>,
    /// The `desc:` fields
    pub desc: Vec<String>,
    /// The part number
    pub part: Option<u64>,
    /// The pid
    pub pid: Option<i32>,
    /// The thread
    pub thread: Option<usize>,
}

/// The aggregated event counters of one source line of a function
///
/// When multiple data rows reference the same line (distinct PCs, same
/// line), the counts are summed and `executed` is the logical OR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    /// True if any event counter of this line is non-zero
    pub executed: bool,
    /// The summed event counters
    pub metrics: Metrics,
}

/// The aggregated event counters of one program counter of a function
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcRecord {
    /// True if any event counter of this program counter is non-zero
    pub executed: bool,
    /// The source line this program counter belongs to, 0 when unknown
    pub line: u64,
    /// The summed event counters
    pub metrics: Metrics,
}

/// A call from a function to a target function
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    /// The number of calls, at least 1 in well-formed profiles
    pub count: u64,
    /// The inclusive event counters of the calls, covering the callee and
    /// its transitive callees, when the profile provided them
    pub inclusive: Option<Metrics>,
    /// The source line of the call site
    pub source_line: u64,
    /// The source program counter of the call site, if instruction-level
    /// positions are active
    pub source_pc: Option<String>,
    /// The file of the target function, defaulting to the caller's file
    /// when absent
    pub target_file: Option<String>,
    /// The name of the target function
    pub target_function: String,
}

/// The per-function records of a profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    /// The outgoing calls in first-appearance order
    pub calls: Vec<CallEdge>,
    /// The owning file as referenced by the profile
    pub file: String,
    /// The per-line records in first-appearance order
    pub lines: IndexMap<u64, LineRecord>,
    /// The function name
    pub name: String,
    /// The object file this function was attributed to, if any
    pub object: Option<String>,
    /// The per-PC records in first-appearance order, empty in pure
    /// cachegrind mode
    pub pcs: IndexMap<String, PcRecord>,
    /// The exclusive totals, the sum of all line records per event
    pub totals: Metrics,
}

/// The per-file records of a profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// The functions of this file in first-appearance order
    pub functions: IndexMap<String, FunctionRecord>,
    /// The object file this file was attributed to, if any
    pub object: Option<String>,
    /// The path as referenced by the profile
    pub path: String,
    /// The resolved source text, cached at load time
    pub source: Option<String>,
}

/// The fully parsed and aggregated profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// The zero-filled vocabulary prototype in column order
    pub events: Metrics,
    /// The per-file records in first-appearance order
    pub files: IndexMap<String, FileRecord>,
    /// The profile flavor
    pub kind: AnalysisKind,
    /// The header data
    pub properties: ProfileProperties,
    /// The totals of the `summary:` (or `totals:`) lines, if present
    pub summary: Option<Metrics>,
}

impl LineRecord {
    pub(crate) fn accumulate(&mut self, metrics: &Metrics) {
        self.executed = self.executed || !metrics.is_zero();
        if self.metrics.is_empty() {
            self.metrics = metrics.clone();
        } else {
            self.metrics.add(metrics);
        }
    }
}

impl PcRecord {
    pub(crate) fn accumulate(&mut self, line: u64, metrics: &Metrics) {
        self.executed = self.executed || !metrics.is_zero();
        self.line = line;
        if self.metrics.is_empty() {
            self.metrics = metrics.clone();
        } else {
            self.metrics.add(metrics);
        }
    }
}

impl FunctionRecord {
    /// The lines which were executed at least once, sorted ascending
    pub fn covered_lines(&self) -> Vec<u64> {
        self.lines
            .iter()
            .filter(|(_, record)| record.executed)
            .map(|(line, _)| *line)
            .sorted_unstable()
            .collect()
    }

    /// The compiled but never executed lines, sorted ascending
    pub fn uncovered_lines(&self) -> Vec<u64> {
        self.lines
            .iter()
            .filter(|(_, record)| !record.executed)
            .map(|(line, _)| *line)
            .sorted_unstable()
            .collect()
    }

    /// The first and last program counter ordered as unsigned hexadecimal
    ///
    /// `None` when the function has no PC records.
    pub fn pc_range(&self) -> Option<(String, String)> {
        self.pcs
            .keys()
            .filter_map(|pc| util::parse_pc(pc).map(|value| (value, pc)))
            .minmax_by_key(|(value, _)| *value)
            .into_option()
            .map(|((_, first), (_, last))| (first.clone(), last.clone()))
    }
}

impl FileRecord {
    /// The union of the covered lines of all contained functions
    pub fn covered_lines(&self) -> Vec<u64> {
        self.functions
            .values()
            .flat_map(FunctionRecord::covered_lines)
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// The union of the uncovered lines of all contained functions
    pub fn uncovered_lines(&self) -> Vec<u64> {
        self.functions
            .values()
            .flat_map(FunctionRecord::uncovered_lines)
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// The number of distinct lines appearing in the profile for this file
    ///
    /// Non-compiled source lines (comments, blanks) never appear as data
    /// rows and are excluded by construction.
    pub fn compiled_lines(&self) -> u64 {
        self.covered_lines()
            .into_iter()
            .chain(self.uncovered_lines())
            .sorted_unstable()
            .dedup()
            .count() as u64
    }

    /// The percentage of compiled lines which were executed at least once
    pub fn coverage(&self) -> f64 {
        util::percentage(self.covered_lines().len() as u64, self.compiled_lines())
    }
}

impl Profile {
    /// Look up a file record by its path as referenced in the profile
    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    /// Look up a function record by owning file and name
    pub fn function(&self, file: &str, name: &str) -> Option<&FunctionRecord> {
        self.files.get(file).and_then(|file| file.functions.get(name))
    }

    /// The number of files appearing in the profile
    pub fn files_analyzed(&self) -> u64 {
        self.files.len() as u64
    }

    /// The number of compiled lines across all files
    pub fn total_compiled_lines(&self) -> u64 {
        self.files.values().map(FileRecord::compiled_lines).sum()
    }

    /// The number of covered lines across all files
    pub fn total_covered_lines(&self) -> u64 {
        self.files
            .values()
            .map(|file| file.covered_lines().len() as u64)
            .sum()
    }

    /// The project-wide coverage percentage
    pub fn coverage(&self) -> f64 {
        util::percentage(self.total_covered_lines(), self.total_compiled_lines())
    }

    /// The sum of the exclusive totals of all functions
    ///
    /// Equals the `summary:` totals when the profile carries them.
    pub fn exclusive_totals(&self) -> Metrics {
        let mut totals = self.events.clone();
        for file in self.files.values() {
            for function in file.functions.values() {
                totals.add(&function.totals);
            }
        }
        totals
    }
}
