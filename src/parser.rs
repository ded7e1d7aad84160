//! The streaming parser of the cachegrind/callgrind text format
//!
//! The parser consumes the input line by line and never materializes the
//! whole stream. Auxiliary memory is bounded by the number of distinct
//! (file, function) pairs plus distinct program counters.

use std::io::BufRead;
use std::str::FromStr;

use log::{trace, warn};

use crate::error::ParseError;
use crate::metrics::{EventKind, Metrics};
use crate::profile::{AnalysisKind, CallEdge, FileRecord, FunctionRecord, Profile, UNKNOWN_PATH};
use crate::util;

/// The default cap on the input size in bytes
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 100 * 1024 * 1024;

/// The streaming parser for cachegrind and callgrind output
///
/// ```rust
/// use grindscope::parser::ProfileParser;
///
/// let profile = ProfileParser::default()
///     .parse("events: Ir\nfl=a.c\nfn=main\n1 5\n".as_bytes())
///     .unwrap();
/// assert_eq!(profile.files_analyzed(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileParser {
    /// Abort with [`ParseError::InputTooLarge`] when the stream exceeds
    /// this many bytes
    pub max_input_bytes: u64,
}

/// The position layout of data rows as declared by `positions:`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Positions {
    /// `LINE [counts..]` rows
    #[default]
    Line,
    /// `PC [counts..]` rows without line information
    Instr,
    /// `PC LINE [counts..]` rows
    InstrLine,
}

/// The mutable cursor of the body parse, nothing escapes into the Profile
#[derive(Debug, Default)]
struct BodyState {
    file: Option<String>,
    function: Option<String>,
    object: Option<String>,
    pending_call: Option<PendingCall>,
    skip_jump_row: bool,
}

/// A call target built up by `cob=`/`cfi=`/`cfn=` and armed by `calls=`
#[derive(Debug, Default)]
struct PendingCall {
    count: Option<u64>,
    file: Option<String>,
    function: Option<String>,
    object: Option<String>,
}

#[derive(Debug)]
struct DataRow {
    line: u64,
    metrics: Metrics,
    pc: Option<String>,
}

impl Default for ProfileParser {
    fn default() -> Self {
        Self {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
        }
    }
}

impl ProfileParser {
    /// Create a parser with a custom input size cap
    pub fn with_max_input_bytes(max_input_bytes: u64) -> Self {
        Self { max_input_bytes }
    }

    /// Parse a profile from a buffered reader
    ///
    /// # Errors
    ///
    /// Only fatal errors abort the parse: [`ParseError::EmptyFile`],
    /// [`ParseError::VersionMismatch`], [`ParseError::NoVocabulary`],
    /// [`ParseError::InputTooLarge`] and [`ParseError::Io`]. Malformed data
    /// rows and unknown directives are skipped.
    pub fn parse<R: BufRead>(&self, reader: R) -> Result<Profile, ParseError> {
        let mut profile = Profile::default();
        let mut state = BodyState::default();
        let mut positions = Positions::default();
        let mut vocabulary: Option<Metrics> = None;
        let mut bytes_read = 0u64;
        let mut seen_content = false;

        for line in reader.lines() {
            let line = line?;
            bytes_read += line.len() as u64 + 1;
            if bytes_read > self.max_input_bytes {
                return Err(ParseError::InputTooLarge(self.max_input_bytes));
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(comment) = line.strip_prefix('#') {
                if !seen_content && comment.trim() == "callgrind format" {
                    profile.kind = AnalysisKind::Callgrind;
                }
                seen_content = true;
                continue;
            }
            seen_content = true;

            if line.starts_with(|c: char| c.is_ascii_digit()) {
                let Some(vocabulary) = &vocabulary else {
                    return Err(ParseError::NoVocabulary);
                };
                match parse_data_row(line, positions, vocabulary) {
                    Ok(row) => consume_data_row(&mut profile, &mut state, row),
                    Err(error) => warn!("Skipping row: {error}"),
                }
                continue;
            }

            if let Some(value) = line
                .strip_prefix("summary:")
                .or_else(|| line.strip_prefix("totals:"))
            {
                let Some(vocabulary) = &vocabulary else {
                    warn!("Skipping summary line before 'events:': '{line}'");
                    continue;
                };
                let mut totals = vocabulary.clone();
                match totals.add_iter_str(value.split_ascii_whitespace()) {
                    Ok(()) => match profile.summary.as_mut() {
                        Some(summary) => summary.add(&totals),
                        None => profile.summary = Some(totals),
                    },
                    Err(error) => warn!("Skipping malformed summary line: {error}"),
                }
                continue;
            }

            if let Some((key, value)) = split_header_line(line) {
                match key {
                    "version" if value != "1" => {
                        return Err(ParseError::VersionMismatch(value.to_owned()));
                    }
                    "version" => {}
                    "events" => {
                        if vocabulary.is_some() {
                            warn!("Ignoring repeated 'events:' line: '{line}'");
                        } else {
                            let prototype = value
                                .split_ascii_whitespace()
                                .map(|event| {
                                    EventKind::from_str(event).expect("Parsing is infallible")
                                })
                                .collect::<Metrics>();
                            profile.events = prototype.clone();
                            vocabulary = Some(prototype);
                        }
                    }
                    "positions" => {
                        positions = Positions::from_header(value);
                        profile.kind = AnalysisKind::Callgrind;
                    }
                    "cmd" => profile.properties.command = Some(value.to_owned()),
                    "pid" => match value.parse::<i32>() {
                        Ok(pid) => profile.properties.pid = Some(pid),
                        Err(_) => warn!("Ignoring malformed 'pid:' line: '{line}'"),
                    },
                    "thread" => match value.parse::<usize>() {
                        Ok(thread) => profile.properties.thread = Some(thread),
                        Err(_) => warn!("Ignoring malformed 'thread:' line: '{line}'"),
                    },
                    "part" => match value.parse::<u64>() {
                        Ok(part) => profile.properties.part = Some(part),
                        Err(_) => warn!("Ignoring malformed 'part:' line: '{line}'"),
                    },
                    "creator" => profile.properties.creator = Some(value.to_owned()),
                    "desc" => profile.properties.desc.push(value.to_owned()),
                    _ => unreachable!("Filtered by split_header_line"),
                }
                continue;
            }

            match line.split_once('=') {
                Some(("ob", object)) => {
                    state.object = Some(object.to_owned());
                    profile.kind = AnalysisKind::Callgrind;
                }
                Some(("fl", file)) => {
                    enter_file(&mut profile, &mut state, file);
                }
                Some(("fi" | "fe", inline)) => {
                    // Inlined code stays attributed to the current file
                    trace!("Ignoring inline file directive: '{inline}'");
                }
                Some(("fn", function)) => {
                    enter_function(&mut profile, &mut state, function);
                }
                Some(("cob", object)) => {
                    let call = state.pending_call.get_or_insert_with(PendingCall::default);
                    call.object = Some(object.to_owned());
                }
                Some(("cfi" | "cfl", file)) => {
                    let call = state.pending_call.get_or_insert_with(PendingCall::default);
                    call.file = Some(file.to_owned());
                }
                Some(("cfn", function)) => {
                    let call = state.pending_call.get_or_insert_with(PendingCall::default);
                    call.function = Some(function.to_owned());
                }
                Some(("calls", value)) => {
                    let Some(count) = value
                        .split_ascii_whitespace()
                        .next()
                        .and_then(|count| count.parse::<u64>().ok())
                    else {
                        warn!("Skipping malformed 'calls=' line: '{line}'");
                        continue;
                    };
                    let call = state.pending_call.get_or_insert_with(PendingCall::default);
                    call.count = Some(count);
                }
                Some(("jump" | "jcnd", _)) => {
                    state.skip_jump_row = true;
                }
                Some(("jfi" | "jfn", _)) => {}
                Some((directive, _)) => {
                    trace!("Ignoring unknown directive '{directive}': '{line}'");
                }
                None => {
                    trace!("Ignoring unknown line: '{line}'");
                }
            }
        }

        if !seen_content {
            return Err(ParseError::EmptyFile);
        }

        Ok(profile)
    }
}

impl Positions {
    fn from_header(value: &str) -> Self {
        let mut has_instr = false;
        let mut has_line = false;
        for token in value.split_ascii_whitespace() {
            // "addr" is taken from the callgrind_annotate script although
            // not officially documented
            match token.to_lowercase().as_str() {
                "instr" | "addr" => has_instr = true,
                "line" => has_line = true,
                unknown => trace!("Ignoring unknown position type: '{unknown}'"),
            }
        }
        match (has_instr, has_line) {
            (true, false) => Self::Instr,
            (true, true) => Self::InstrLine,
            _ => Self::Line,
        }
    }
}

/// Split a recognized `key: value` header line
///
/// Directive lines (`fl=...`) and unrecognized keys fall through to the
/// body dispatch, so a `cmd: prog --option=value` line is never mistaken
/// for a directive.
fn split_header_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    matches!(
        key,
        "version" | "events" | "positions" | "cmd" | "pid" | "thread" | "part" | "creator" | "desc"
    )
    .then(|| (key, value.trim()))
}

/// Parse a `(PC SP)? LINE (SP COUNT)*` data row
///
/// A row whose first token is `0x`-prefixed is treated as instruction-level
/// regardless of the declared positions, which covers profiles that omit
/// the `positions:` header.
fn parse_data_row(
    line: &str,
    positions: Positions,
    vocabulary: &Metrics,
) -> Result<DataRow, ParseError> {
    let mut tokens = line.split_ascii_whitespace().peekable();

    let pc = if tokens.peek().is_some_and(|token| token.starts_with("0x")) {
        let token = tokens.next().expect("Peeked token must be present");
        if util::parse_pc(token).is_none() {
            return Err(ParseError::MalformedRow(line.to_owned()));
        }
        Some(token.to_owned())
    } else {
        None
    };

    let source_line = if pc.is_some() && positions == Positions::Instr {
        0
    } else {
        tokens
            .next()
            .and_then(|token| token.parse::<u64>().ok())
            .ok_or_else(|| ParseError::MalformedRow(line.to_owned()))?
    };

    let mut metrics = vocabulary.clone();
    metrics
        .add_iter_str(tokens)
        .map_err(|_| ParseError::MalformedRow(line.to_owned()))?;

    Ok(DataRow {
        line: source_line,
        metrics,
        pc,
    })
}

fn enter_file(profile: &mut Profile, state: &mut BodyState, file: &str) {
    if !profile.files.contains_key(file) {
        profile.files.insert(
            file.to_owned(),
            FileRecord {
                path: file.to_owned(),
                object: state.object.clone(),
                ..FileRecord::default()
            },
        );
    }
    state.file = Some(file.to_owned());
    state.function = None;
}

fn enter_function(profile: &mut Profile, state: &mut BodyState, function: &str) {
    if state.file.is_none() {
        warn!("Function '{function}' appears before any 'fl=' directive");
        enter_file(profile, state, UNKNOWN_PATH);
    }
    let file = state.file.clone().expect("A current file must be present");
    let record = profile
        .files
        .get_mut(&file)
        .expect("The current file record must exist");
    if !record.functions.contains_key(function) {
        record.functions.insert(
            function.to_owned(),
            FunctionRecord {
                name: function.to_owned(),
                file: file.clone(),
                object: state.object.clone(),
                totals: profile.events.clone(),
                ..FunctionRecord::default()
            },
        );
    }
    state.function = Some(function.to_owned());
}

fn consume_data_row(profile: &mut Profile, state: &mut BodyState, row: DataRow) {
    if row.pc.is_some() {
        profile.kind = AnalysisKind::Callgrind;
    }

    if state.skip_jump_row {
        state.skip_jump_row = false;
        if row.pc.is_some() {
            trace!("Skipping branch metadata row");
            return;
        }
    }

    let (Some(file), Some(function)) = (state.file.clone(), state.function.clone()) else {
        warn!("Skipping data row outside of a function scope");
        return;
    };

    let record = profile
        .files
        .get_mut(&file)
        .and_then(|file| file.functions.get_mut(&function))
        .expect("The current function record must exist");

    if let Some(call) = state.pending_call.take() {
        if call.count.is_some() {
            match call.function {
                Some(target_function) => record.calls.push(CallEdge {
                    count: call.count.expect("The call count must be present"),
                    inclusive: Some(row.metrics.clone()),
                    source_line: row.line,
                    source_pc: row.pc.clone(),
                    target_file: call.file,
                    target_function,
                }),
                None => warn!("Skipping 'calls=' without a 'cfn=' target"),
            }
        } else {
            // An unarmed target persists until the next `calls=`
            state.pending_call = Some(call);
        }
    }

    if row.line > 0 {
        record
            .lines
            .entry(row.line)
            .or_default()
            .accumulate(&row.metrics);
    }
    if let Some(pc) = row.pc {
        record
            .pcs
            .entry(pc)
            .or_default()
            .accumulate(row.line, &row.metrics);
    }
    if record.totals.is_empty() {
        record.totals = row.metrics;
    } else {
        record.totals.add(&row.metrics);
    }
}
