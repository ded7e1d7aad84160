//! Query-ready analysis of Cachegrind/Callgrind profile data
//!
//! The crate ingests profiler output in the cachegrind/callgrind textual
//! format and produces an indexed, query-ready model: per-file and
//! per-function event counters, line- and PC-level attribution, a
//! reconstructed call graph with inclusive/exclusive metrics, source-path
//! resolution and disassembly binding.
//!
//! The [`Analysis`] facade runs the whole pipeline, parse, aggregate,
//! graph and index construction, and exposes the frozen model through
//! pure query methods:
//!
//! ```rust
//! use grindscope::{Analysis, LoadOptions};
//! use indexmap::IndexMap;
//!
//! let profile = "\
//! # callgrind format
//! events: Ir
//! fl=src/main.c
//! fn=main
//! 1 5
//! 2 0
//! ";
//!
//! let analysis = Analysis::load(
//!     profile.as_bytes(),
//!     IndexMap::new(),
//!     LoadOptions::default(),
//! )
//! .unwrap();
//!
//! let file = analysis.file("src/main.c").unwrap();
//! assert_eq!(file.compiled_lines(), 2);
//! assert_eq!(analysis.search("main").len(), 1);
//! ```
//!
//! The model is immutable after [`Analysis::load`] returns and safe for
//! unsynchronized shared reads.

pub mod disasm;
pub mod entry;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod parser;
pub mod profile;
pub mod search;
pub mod source;
pub mod util;

use std::fmt;
use std::io::BufRead;
use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};

use crate::disasm::{AssemblyInstruction, Disassembler, Objdump};
use crate::entry::{EntryIndex, EntrySuggestion};
use crate::error::{DisasmError, EntryError, ParseError, ResolveError};
use crate::graph::{CallGraph, CallGraphNode, CallTree, NodeId};
use crate::parser::ProfileParser;
use crate::profile::{FileRecord, FunctionRecord, Profile};
use crate::search::SearchIndex;
use crate::source::SourceTree;

/// The plain-value configuration of [`Analysis::load`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// The disassembly executable, `objdump` by default
    pub disassembler: String,
    /// The input size cap in bytes
    pub max_input_bytes: u64,
    /// An optional subdirectory prefix for source resolution
    pub source_subdir: Option<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            disassembler: disasm::DEFAULT_DISASSEMBLER.to_owned(),
            max_input_bytes: parser::DEFAULT_MAX_INPUT_BYTES,
            source_subdir: None,
        }
    }
}

/// The frozen profile model with its graph and indices
///
/// Constructed by [`Analysis::load`], all query methods are pure and may
/// run concurrently across readers.
pub struct Analysis {
    disassembler: Box<dyn Disassembler + Send + Sync>,
    entries: EntryIndex,
    graph: CallGraph,
    profile: Profile,
    search: SearchIndex,
    sources: SourceTree,
}

impl Analysis {
    /// Run the full pipeline over the profile input
    ///
    /// Parses the stream, resolves and caches source text per file record,
    /// builds the call graph and both indices. The returned model is
    /// frozen.
    ///
    /// # Errors
    ///
    /// The fatal [`ParseError`] kinds of [`ProfileParser::parse`].
    pub fn load<R: BufRead>(
        input: R,
        source_files: IndexMap<String, String>,
        options: LoadOptions,
    ) -> Result<Self, ParseError> {
        let parser = ProfileParser::with_max_input_bytes(options.max_input_bytes);
        let mut profile = parser.parse(input)?;

        let sources = match &options.source_subdir {
            Some(subdir) => SourceTree::with_subdir(source_files, subdir.clone()),
            None => SourceTree::new(source_files),
        };
        for file in profile.files.values_mut() {
            if file.path == profile::UNKNOWN_PATH {
                continue;
            }
            match sources.resolve(&file.path) {
                Ok(content) => file.source = Some(content.to_owned()),
                Err(error) => debug!("{error}"),
            }
        }

        let graph = CallGraph::build(&profile);
        let search = SearchIndex::build(&graph);
        let entries = EntryIndex::build(&graph);
        debug!(
            "Loaded profile: {} files, {} graph nodes",
            profile.files_analyzed(),
            graph.len()
        );

        Ok(Self {
            disassembler: Box::new(Objdump::new(options.disassembler)),
            entries,
            graph,
            profile,
            search,
            sources,
        })
    }

    /// Replace the disassembler, e.g. by a canned one in tests
    pub fn with_disassembler(mut self, disassembler: Box<dyn Disassembler + Send + Sync>) -> Self {
        self.disassembler = disassembler;
        self
    }

    /// The frozen profile
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Look up a file record by profile path
    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.profile.file(path)
    }

    /// Look up a function record by owning file and name
    pub fn function(&self, file: &str, name: &str) -> Option<&FunctionRecord> {
        self.profile.function(file, name)
    }

    /// The source text of a profile path
    ///
    /// Served from the per-file cache when the path belongs to the
    /// profile, resolved against the source tree otherwise.
    pub fn source_for(&self, path: &str) -> Result<&str, ResolveError> {
        if let Some(source) = self.file(path).and_then(|file| file.source.as_deref()) {
            return Ok(source);
        }
        self.sources.resolve(path)
    }

    /// The call graph
    pub fn graph(&self) -> &CallGraph {
        &self.graph
    }

    /// The nodes without incoming edges
    pub fn roots(&self) -> Vec<&CallGraphNode> {
        self.graph.roots()
    }

    /// The finite call tree rooted at `entry`, `None` for unknown entries
    pub fn subtree_from(&self, entry: &NodeId) -> Option<CallTree> {
        self.graph.subtree_from(entry)
    }

    /// The distinct callers of a node
    pub fn callers(&self, id: &NodeId) -> Vec<&CallGraphNode> {
        self.graph.callers(id)
    }

    /// The distinct callees of a node
    pub fn callees(&self, id: &NodeId) -> Vec<&CallGraphNode> {
        self.graph.callees(id)
    }

    /// Find nodes by name fragment, see [`SearchIndex::search`]
    pub fn search(&self, query: &str) -> IndexSet<NodeId> {
        self.search.search(query)
    }

    /// The ancestors of the matches for tree expansion
    pub fn expand_ancestors(&self, matches: &IndexSet<NodeId>) -> IndexSet<NodeId> {
        self.search.expand_ancestors(matches, &self.graph)
    }

    /// Resolve an entry-point string to its node
    ///
    /// # Errors
    ///
    /// [`EntryError::NotFound`] when nothing matches.
    pub fn resolve_entry(&self, input: &str) -> Result<&CallGraphNode, EntryError> {
        let id = self.entries.resolve(input)?;
        self.graph
            .node(id)
            .ok_or_else(|| EntryError::NotFound(input.to_owned()))
    }

    /// Suggest entry points for a query, capped at `limit`
    pub fn suggest_entry(&self, input: &str, limit: usize) -> Vec<EntrySuggestion> {
        self.entries.suggest(input, limit)
    }

    /// Disassemble the function behind a node and join the per-PC events
    ///
    /// Functions without PC data or object-file attribution yield an empty
    /// instruction list.
    ///
    /// # Errors
    ///
    /// The per-call [`DisasmError`] kinds of the configured
    /// [`Disassembler`].
    pub fn disassemble(&self, id: &NodeId) -> Result<Vec<AssemblyInstruction>, DisasmError> {
        let Some(function) = self.function(&id.file, &id.function) else {
            return Ok(vec![]);
        };
        let Some((lo, hi)) = disasm::disassembly_range(function) else {
            return Ok(vec![]);
        };
        let object = function
            .object
            .as_deref()
            .or_else(|| self.file(&id.file).and_then(|file| file.object.as_deref()));
        let Some(object) = object else {
            warn!("Function '{id}' has no object file attribution");
            return Ok(vec![]);
        };

        let instructions = self.disassembler.disassemble(Path::new(object), lo, hi)?;
        Ok(disasm::annotate(instructions, function))
    }
}

impl fmt::Debug for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analysis")
            .field("entries", &self.entries)
            .field("graph", &self.graph)
            .field("profile", &self.profile)
            .field("search", &self.search)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}
