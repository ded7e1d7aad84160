//! The substring/prefix/word search index over call-graph nodes

use indexmap::{IndexMap, IndexSet};
use log::debug;

use crate::graph::{CallGraph, NodeId};

/// Prefixes are indexed up to this length
const MAX_PREFIX_LEN: usize = 12;
/// Suffixes are indexed for these lengths
const SUFFIX_LENGTHS: std::ops::RangeInclusive<usize> = 3..=8;
/// Names up to this length get their internal substrings indexed
const SHORT_NAME_LEN: usize = 8;
/// Internal substrings of short names are indexed for these lengths
const SHORT_SUBSTRING_LENGTHS: std::ops::RangeInclusive<usize> = 2..=4;
/// Below this many exact hits the query widens to prefix matches
const PREFIX_WIDEN_THRESHOLD: usize = 10;
/// Below this many hits the query widens further to substring matches
const SUBSTRING_WIDEN_THRESHOLD: usize = 5;
/// At most this many matches are expanded towards the roots
const MAX_EXPANDED_MATCHES: usize = 30;
/// Ancestor walks stop at this depth
const MAX_ANCESTOR_DEPTH: usize = 20;

/// An inverted index from search terms to call-graph nodes
///
/// Built once over the frozen graph. The reverse node-to-terms map is kept
/// for invalidation and not consulted at query time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchIndex {
    node_terms: IndexMap<NodeId, IndexSet<String>>,
    terms: IndexMap<String, IndexSet<NodeId>>,
}

impl SearchIndex {
    /// Index every node of the graph by name
    pub fn build(graph: &CallGraph) -> Self {
        let mut index = Self::default();
        for node in graph.nodes() {
            let terms = terms_for(&node.id.function);
            for term in &terms {
                index
                    .terms
                    .entry(term.clone())
                    .or_default()
                    .insert(node.id.clone());
            }
            index.node_terms.insert(node.id.clone(), terms);
        }
        debug!(
            "Search index: {} terms over {} nodes",
            index.terms.len(),
            index.node_terms.len()
        );
        index
    }

    /// Find nodes matching the query
    ///
    /// Exact term hits come first. Under [`PREFIX_WIDEN_THRESHOLD`] hits
    /// the result is widened with prefix matches, under
    /// [`SUBSTRING_WIDEN_THRESHOLD`] with substring matches. An empty query
    /// returns the empty set.
    pub fn search(&self, query: &str) -> IndexSet<NodeId> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return IndexSet::new();
        }

        let mut result = self.terms.get(&query).cloned().unwrap_or_default();

        if result.len() < PREFIX_WIDEN_THRESHOLD {
            for (term, nodes) in &self.terms {
                if term.starts_with(&query) {
                    result.extend(nodes.iter().cloned());
                }
            }
        }
        if result.len() < SUBSTRING_WIDEN_THRESHOLD {
            for (term, nodes) in &self.terms {
                if term.contains(&query) {
                    result.extend(nodes.iter().cloned());
                }
            }
        }

        result
    }

    /// Collect the ancestors of the matches for tree expansion
    ///
    /// Builds the graph's parent map once, then walks up from each match,
    /// capped at [`MAX_EXPANDED_MATCHES`] matches and
    /// [`MAX_ANCESTOR_DEPTH`] parents each.
    pub fn expand_ancestors(&self, matches: &IndexSet<NodeId>, graph: &CallGraph) -> IndexSet<NodeId> {
        let parents = graph.parent_map();
        let mut expanded = IndexSet::new();

        for id in matches.iter().take(MAX_EXPANDED_MATCHES) {
            let mut current = id;
            for _ in 0..MAX_ANCESTOR_DEPTH {
                let Some(parent) = parents.get(current) else {
                    break;
                };
                expanded.insert(parent.clone());
                current = parent;
            }
        }

        expanded
    }

    /// The terms a node was indexed under
    pub fn terms_of(&self, id: &NodeId) -> Option<&IndexSet<String>> {
        self.node_terms.get(id)
    }
}

/// The search terms of a function name
fn terms_for(name: &str) -> IndexSet<String> {
    let mut terms = IndexSet::new();
    let lower = name.to_lowercase();
    terms.insert(lower.clone());

    for word in split_words(name) {
        if word.chars().count() >= 2 {
            terms.insert(word.to_lowercase());
        }
    }

    let chars = lower.chars().collect::<Vec<_>>();
    let len = chars.len();

    for prefix_len in 1..=len.min(MAX_PREFIX_LEN) {
        terms.insert(chars[..prefix_len].iter().collect());
    }
    for suffix_len in SUFFIX_LENGTHS {
        if suffix_len > len {
            break;
        }
        terms.insert(chars[len - suffix_len..].iter().collect());
    }
    if len <= SHORT_NAME_LEN {
        for substring_len in SHORT_SUBSTRING_LENGTHS {
            if substring_len > len {
                break;
            }
            for start in 0..=len - substring_len {
                terms.insert(chars[start..start + substring_len].iter().collect());
            }
        }
    }

    terms
}

/// Split a name on non-alphanumerics, underscores and camelCase boundaries
fn split_words(name: &str) -> Vec<String> {
    let mut words = vec![];
    let mut current = String::new();
    let mut previous_lower = false;

    for c in name.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            previous_lower = false;
            continue;
        }
        if c.is_uppercase() && previous_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        previous_lower = c.is_lowercase();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::parser::ProfileParser;

    fn index_of(names: &[&str]) -> (SearchIndex, CallGraph) {
        let mut input = String::from("events: Ir\nfl=a.c\n");
        for name in names {
            input.push_str(&format!("fn={name}\n1 1\n"));
        }
        let profile = ProfileParser::default().parse(input.as_bytes()).unwrap();
        let graph = CallGraph::build(&profile);
        (SearchIndex::build(&graph), graph)
    }

    fn ids(names: &[&str]) -> IndexSet<NodeId> {
        names
            .iter()
            .map(|name| NodeId::new("a.c", *name))
            .collect()
    }

    #[rstest]
    #[case::snake_case("handle_timer_interrupt", &["handle", "timer", "interrupt"])]
    #[case::camel_case("handleTimerInterrupt", &["handle", "Timer", "Interrupt"])]
    #[case::mixed("read_fromBuffer", &["read", "from", "Buffer"])]
    #[case::namespaced("std::io::read", &["std", "io", "read"])]
    #[case::single("main", &["main"])]
    fn test_split_words(#[case] name: &str, #[case] expected: &[&str]) {
        assert_eq!(split_words(name), expected);
    }

    #[test]
    fn test_terms_contain_name_words_prefixes_and_suffixes() {
        let terms = terms_for("handle_timer_interrupt");

        assert!(terms.contains("handle_timer_interrupt"));
        assert!(terms.contains("timer"));
        assert!(terms.contains("handle"));
        // Prefix capped at 12 characters
        assert!(terms.contains("handle_timer"));
        assert!(!terms.contains("handle_timer_"));
        // Suffixes between 3 and 8 characters
        assert!(terms.contains("terrupt"));
        assert!(!terms.contains("er_interrupt"));
    }

    #[test]
    fn test_short_names_index_internal_substrings() {
        let terms = terms_for("memcpy");
        assert!(terms.contains("emc"));
        assert!(terms.contains("mcpy"));

        let terms = terms_for("long_function_name");
        assert!(!terms.contains("ng_f"));
    }

    #[test]
    fn test_search_prefix_and_substring() {
        let (index, _) = index_of(&[
            "handle_timer_interrupt",
            "handle_io_complete",
            "update_system_timers",
        ]);

        assert_eq!(
            index.search("handle"),
            ids(&["handle_timer_interrupt", "handle_io_complete"])
        );
        assert_eq!(
            index.search("timer"),
            ids(&["handle_timer_interrupt", "update_system_timers"])
        );
        assert_eq!(index.search(""), IndexSet::new());
        assert_eq!(index.search("   "), IndexSet::new());
    }

    #[test]
    fn test_search_finds_full_name() {
        let (index, _) = index_of(&["a_rather_long_function_name_indeed"]);
        let result = index.search("a_rather_long_function_name_indeed");
        assert_eq!(result, ids(&["a_rather_long_function_name_indeed"]));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let (index, _) = index_of(&["handleTimerInterrupt"]);
        assert_eq!(index.search("Timer"), ids(&["handleTimerInterrupt"]));
    }

    #[test]
    fn test_expand_ancestors() {
        let input = "# callgrind format\n\
                     events: Ir\n\
                     fl=a.c\n\
                     fn=main\n\
                     1 1\n\
                     cfn=middle\n\
                     calls=1 2\n\
                     2 2\n\
                     fn=middle\n\
                     3 1\n\
                     cfn=leaf\n\
                     calls=1 4\n\
                     4 1\n\
                     fn=leaf\n\
                     5 1\n";
        let profile = ProfileParser::default().parse(input.as_bytes()).unwrap();
        let graph = CallGraph::build(&profile);
        let index = SearchIndex::build(&graph);

        let matches = index.search("leaf");
        let expanded = index.expand_ancestors(&matches, &graph);

        assert_eq!(expanded, ids(&["middle", "main"]));
    }
}
