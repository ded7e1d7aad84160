//! The resolver mapping profile paths to available source files
//!
//! Profiles reference sources by the absolute paths of the build machine.
//! The resolver probes the caller-supplied file map with progressively
//! looser suffix strategies and is pure, callers cache the result per file
//! record.

use indexmap::IndexMap;
use log::trace;

use crate::error::ResolveError;

/// The available source files keyed by relative path
///
/// An optional subdirectory prefix widens the probing for projects whose
/// sources live under a nested directory (with or without a `src/`
/// mirror).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTree {
    files: IndexMap<String, String>,
    subdir: Option<String>,
}

impl SourceTree {
    /// Create a source tree from a path to content mapping
    pub fn new(files: IndexMap<String, String>) -> Self {
        Self {
            files,
            subdir: None,
        }
    }

    /// Create a source tree probing an additional subdirectory prefix
    pub fn with_subdir<T>(files: IndexMap<String, String>, subdir: T) -> Self
    where
        T: Into<String>,
    {
        Self {
            files,
            subdir: Some(subdir.into()),
        }
    }

    /// Return true if no source files are available
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The number of available source files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Resolve a path as referenced in the profile to source text
    ///
    /// Strategies in order, stopping at the first hit: exact match,
    /// subdirectory-prefixed suffix probing (full path down to 2
    /// components, the bare basename, each also under a further `src/`
    /// prefix), then a basename or k-suffix match over all available keys.
    ///
    /// # Errors
    ///
    /// [`ResolveError::NotFound`] when all strategies miss.
    pub fn resolve(&self, path: &str) -> Result<&str, ResolveError> {
        if let Some(content) = self.files.get(path) {
            return Ok(content);
        }

        let parts = split_path(path);

        if let Some(subdir) = &self.subdir {
            for prefix in [subdir.clone(), format!("{subdir}/src")] {
                for k in (2..=parts.len()).rev() {
                    let candidate = format!("{prefix}/{}", suffix_of(&parts, k));
                    if let Some(content) = self.files.get(&candidate) {
                        trace!("Resolved '{path}' as '{candidate}'");
                        return Ok(content);
                    }
                }
                if let Some(basename) = parts.last() {
                    let candidate = format!("{prefix}/{basename}");
                    if let Some(content) = self.files.get(&candidate) {
                        trace!("Resolved '{path}' as '{candidate}'");
                        return Ok(content);
                    }
                }
            }
        }

        if let Some(basename) = parts.last() {
            if let Some((key, content)) = self
                .files
                .iter()
                .find(|(key, _)| split_path(key).last() == Some(basename))
            {
                trace!("Resolved '{path}' by basename as '{key}'");
                return Ok(content);
            }
        }

        for k in (2..=parts.len()).rev() {
            let wanted = suffix_of(&parts, k);
            if let Some((key, content)) = self
                .files
                .iter()
                .find(|(key, _)| suffix_of(&split_path(key), k) == wanted)
            {
                trace!("Resolved '{path}' by {k}-suffix as '{key}'");
                return Ok(content);
            }
        }

        Err(ResolveError::NotFound(path.to_owned()))
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|component| !component.is_empty()).collect()
}

fn suffix_of(components: &[&str], k: usize) -> String {
    components[components.len().saturating_sub(k)..].join("/")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn tree(files: &[(&str, &str)], subdir: Option<&str>) -> SourceTree {
        let files = files
            .iter()
            .map(|(path, content)| ((*path).to_owned(), (*content).to_owned()))
            .collect::<IndexMap<_, _>>();
        match subdir {
            Some(subdir) => SourceTree::with_subdir(files, subdir),
            None => SourceTree::new(files),
        }
    }

    #[test]
    fn test_exact_match() {
        let tree = tree(&[("src/main.c", "int main;")], None);
        assert_eq!(tree.resolve("src/main.c"), Ok("int main;"));
    }

    #[test]
    fn test_subdir_probing() {
        // The concrete scenario: an absolute build path against a checkout
        // with and without a src mirror
        let tree = tree(
            &[("sub/main.c", "a"), ("src/sub/main.c", "b")],
            Some("sub"),
        );
        assert_eq!(tree.resolve("/abs/proj/src/sub/main.c"), Ok("a"));
    }

    #[test]
    fn test_subdir_src_mirror() {
        let tree = tree(&[("proj/src/lib/util.c", "content")], Some("proj"));
        assert_eq!(tree.resolve("/build/lib/util.c"), Ok("content"));
    }

    #[test]
    fn test_subdir_basename() {
        let tree = tree(&[("proj/solo.c", "content")], Some("proj"));
        assert_eq!(tree.resolve("/somewhere/else/solo.c"), Ok("content"));
    }

    #[test]
    fn test_basename_fallback_without_subdir() {
        let tree = tree(&[("deep/nested/dir/file.c", "content")], None);
        assert_eq!(tree.resolve("/build/area/file.c"), Ok("content"));
    }

    #[test]
    fn test_basename_match_takes_precedence_over_suffix() {
        let tree = tree(
            &[("other/lib/file.c", "first"), ("deep/sub/lib/file.c", "second")],
            None,
        );
        // Both keys share the basename, the first key in insertion order
        // wins
        assert_eq!(tree.resolve("/build/sub/lib/file.c"), Ok("first"));
    }

    #[rstest]
    #[case::no_match("/abs/missing.c")]
    #[case::empty_path("")]
    fn test_not_found(#[case] path: &str) {
        let tree = tree(&[("a.c", "content")], Some("sub"));
        assert_eq!(
            tree.resolve(path),
            Err(ResolveError::NotFound(path.to_owned()))
        );
    }

    #[test]
    fn test_empty_tree() {
        let tree = SourceTree::default();
        assert!(tree.is_empty());
        assert!(tree.resolve("a.c").is_err());
    }
}
