//! The entry-point matcher resolving user input to call-graph nodes
//!
//! Input may be a function name, a name fragment or a program counter.
//! Program counters resolve by exact start address first, then by binary
//! search over the sorted PC ranges.

use indexmap::IndexMap;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::EntryError;
use crate::graph::{CallGraph, NodeId};
use crate::util;

/// Name prefixes are indexed for these lengths
const NAME_PREFIX_LENGTHS: std::ops::RangeInclusive<usize> = 3..=8;
/// Word prefixes are indexed for these lengths
const WORD_PREFIX_LENGTHS: std::ops::RangeInclusive<usize> = 3..=6;
/// Partial lookups require at least this many characters
const MIN_PARTIAL_LEN: usize = 3;
/// The default cap on suggestions
const MAX_SUGGESTIONS: usize = 10;

lazy_static! {
    static ref PC_RE: Regex = Regex::new(r"^(0x)?[0-9a-f]+$").expect("Regex should compile");
}

/// A suggestion for an entry-point query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySuggestion {
    /// The node the suggestion points at
    pub id: NodeId,
    /// The suggested function name
    pub name: String,
    /// The node's first program counter, empty without PC data
    pub pc_start: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PcRange {
    end: u64,
    id: NodeId,
    start: u64,
}

/// The immutable entry-point index over a call graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryIndex {
    by_name: IndexMap<String, NodeId>,
    by_pc_start: IndexMap<u64, NodeId>,
    by_stripped_name: IndexMap<String, NodeId>,
    partial: IndexMap<String, Vec<NodeId>>,
    ranges: Vec<PcRange>,
}

impl EntryIndex {
    /// Index every node of the graph
    pub fn build(graph: &CallGraph) -> Self {
        let mut index = Self::default();

        for node in graph.nodes() {
            let lower = node.id.function.to_lowercase();
            index.by_name.entry(lower.clone()).or_insert_with(|| node.id.clone());

            let stripped = lower.trim_start_matches('_');
            if stripped != lower && !stripped.is_empty() {
                index
                    .by_stripped_name
                    .entry(stripped.to_owned())
                    .or_insert_with(|| node.id.clone());
            }

            for partial in partial_terms(&lower) {
                index.partial.entry(partial).or_default().push(node.id.clone());
            }

            if let (Some(start), Some(end)) = (
                util::parse_pc(&node.pc_start),
                util::parse_pc(&node.pc_end),
            ) {
                index.by_pc_start.entry(start).or_insert_with(|| node.id.clone());
                index.ranges.push(PcRange {
                    end,
                    id: node.id.clone(),
                    start,
                });
            }
        }

        index.ranges.sort_by_key(|range| range.start);
        index
    }

    /// Resolve an entry-point string to a node identity
    ///
    /// Resolution order: exact lowercase name, program counter (exact
    /// start, then range lookup), partial name, starts-with fallback.
    ///
    /// # Errors
    ///
    /// [`EntryError`] when nothing matches.
    pub fn resolve(&self, input: &str) -> Result<&NodeId, EntryError> {
        let query = input.trim().to_lowercase();
        if query.is_empty() {
            return Err(EntryError::NotFound(input.to_owned()));
        }

        if let Some(id) = self
            .by_name
            .get(&query)
            .or_else(|| self.by_stripped_name.get(&query))
        {
            return Ok(id);
        }

        if PC_RE.is_match(&query) {
            if let Some(address) = util::parse_pc(&query) {
                if let Some(id) = self.by_pc_start.get(&address) {
                    return Ok(id);
                }
                if let Some(id) = self.lookup_range(address) {
                    return Ok(id);
                }
            }
        }

        if query.chars().count() >= MIN_PARTIAL_LEN {
            if let Some(id) = self.partial.get(&query).and_then(|ids| ids.first()) {
                return Ok(id);
            }
            if let Some(id) = self
                .by_name
                .iter()
                .find(|(name, _)| name.starts_with(&query))
                .map(|(_, id)| id)
            {
                return Ok(id);
            }
        }

        Err(EntryError::NotFound(input.to_owned()))
    }

    /// Suggest entries for a query, capped at `limit` (0 means the default)
    ///
    /// Names containing the query come first, program-counter suggestions
    /// are appended when the query looks numeric.
    pub fn suggest(&self, input: &str, limit: usize) -> Vec<EntrySuggestion> {
        let limit = if limit == 0 { MAX_SUGGESTIONS } else { limit };
        let query = input.trim().to_lowercase();
        if query.is_empty() {
            return vec![];
        }

        let mut suggestions = self
            .by_name
            .iter()
            .filter(|(name, _)| name.contains(&query))
            .take(limit)
            .map(|(name, id)| EntrySuggestion {
                id: id.clone(),
                name: name.clone(),
                pc_start: self
                    .ranges
                    .iter()
                    .find(|range| range.id == *id)
                    .map(|range| util::format_pc(range.start))
                    .unwrap_or_default(),
            })
            .collect::<Vec<_>>();

        if PC_RE.is_match(&query) && suggestions.len() < limit {
            let normalized = util::parse_pc(&query).map(util::format_pc).unwrap_or(query);
            let remaining = limit - suggestions.len();
            suggestions.extend(
                self.ranges
                    .iter()
                    .filter(|range| util::format_pc(range.start).starts_with(&normalized))
                    .take(remaining)
                    .map(|range| EntrySuggestion {
                        id: range.id.clone(),
                        name: range.id.function.clone(),
                        pc_start: util::format_pc(range.start),
                    }),
            );
        }

        suggestions
            .into_iter()
            .unique_by(|suggestion| suggestion.id.clone())
            .collect()
    }

    fn lookup_range(&self, address: u64) -> Option<&NodeId> {
        let upper = self.ranges.partition_point(|range| range.start <= address);
        self.ranges[..upper]
            .iter()
            .find(|range| range.end >= address)
            .map(|range| &range.id)
    }
}

/// The partial-name terms of a lowercase function name
fn partial_terms(name: &str) -> Vec<String> {
    let chars = name.chars().collect::<Vec<_>>();
    let mut terms = vec![];

    for len in NAME_PREFIX_LENGTHS {
        if len > chars.len() {
            break;
        }
        terms.push(chars[..len].iter().collect());
    }

    for word in name.split(|c: char| !c.is_alphanumeric()).filter(|word| !word.is_empty()) {
        let word_chars = word.chars().collect::<Vec<_>>();
        for len in WORD_PREFIX_LENGTHS {
            if len > word_chars.len() {
                break;
            }
            terms.push(word_chars[..len].iter().collect());
        }
    }

    terms
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::parser::ProfileParser;

    fn index() -> EntryIndex {
        let input = "# callgrind format\n\
                     events: Ir\n\
                     positions: instr line\n\
                     fl=a.c\n\
                     fn=f\n\
                     0x1000 1 1\n\
                     0x1010 2 1\n\
                     fn=g\n\
                     0x2000 3 1\n\
                     0x2040 4 1\n\
                     fl=b.c\n\
                     fn=_start\n\
                     0x3000 1 1\n\
                     fn=handle_timer_interrupt\n\
                     0x4000 1 1\n";
        let profile = ProfileParser::default().parse(input.as_bytes()).unwrap();
        EntryIndex::build(&CallGraph::build(&profile))
    }

    #[rstest]
    #[case::exact_name("f", NodeId::new("a.c", "f"))]
    #[case::exact_name_case_insensitive("F", NodeId::new("a.c", "f"))]
    #[case::stripped_underscore("start", NodeId::new("b.c", "_start"))]
    #[case::pc_start_exact("0x2000", NodeId::new("a.c", "g"))]
    #[case::pc_start_unprefixed("2000", NodeId::new("a.c", "g"))]
    #[case::pc_within_range("0x1008", NodeId::new("a.c", "f"))]
    #[case::pc_range_end("0x2040", NodeId::new("a.c", "g"))]
    #[case::partial_name("handle", NodeId::new("b.c", "handle_timer_interrupt"))]
    #[case::word_prefix("timer", NodeId::new("b.c", "handle_timer_interrupt"))]
    #[case::long_starts_with("handle_timer_int", NodeId::new("b.c", "handle_timer_interrupt"))]
    fn test_resolve(#[case] input: &str, #[case] expected: NodeId) {
        assert_eq!(index().resolve(input), Ok(&expected));
    }

    #[rstest]
    #[case::pc_after_last_range("0x2041")]
    #[case::pc_in_gap("0x1800")]
    #[case::unknown_name("unknown_function")]
    #[case::too_short_partial("ha")]
    #[case::empty("")]
    fn test_resolve_not_found(#[case] input: &str) {
        assert_eq!(index().resolve(input), Err(EntryError::NotFound(input.to_owned())));
    }

    #[test]
    fn test_exact_pc_start_preferred_over_range() {
        // 0x2000 lies within no other range and hits g's start exactly,
        // even though f's range would be probed first in a linear scan
        let index = index();
        assert_eq!(index.resolve("0x2000"), Ok(&NodeId::new("a.c", "g")));
    }

    #[test]
    fn test_suggest_by_name_fragment() {
        let suggestions = index().suggest("timer", 10);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].name, "handle_timer_interrupt");
        assert_eq!(suggestions[0].pc_start, "0x4000");
    }

    #[test]
    fn test_suggest_numeric_includes_pc_entries() {
        let suggestions = index().suggest("0x20", 10);
        assert!(suggestions
            .iter()
            .any(|suggestion| suggestion.pc_start == "0x2000"));
    }

    #[test]
    fn test_suggest_empty_query() {
        assert!(index().suggest("", 10).is_empty());
    }

    #[test]
    fn test_suggest_caps_results() {
        let mut input = String::from("events: Ir\nfl=a.c\n");
        for i in 0..20 {
            input.push_str(&format!("fn=worker_{i}\n1 1\n"));
        }
        let profile = ProfileParser::default().parse(input.as_bytes()).unwrap();
        let index = EntryIndex::build(&CallGraph::build(&profile));

        assert_eq!(index.suggest("worker", 10).len(), 10);
        assert_eq!(index.suggest("worker", 3).len(), 3);
    }
}
