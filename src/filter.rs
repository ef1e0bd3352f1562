//! Include/exclude filtering of repository paths.
//!
//! Patterns are shell-style globs matched against the full manifest path
//! (`/pub/scm/*/linux.git`). A path is kept when it matches at least one
//! include pattern and no exclude pattern. `*` crosses `/`, so `*` alone
//! includes everything.
//!
//! Keys that do not name a path strictly below the top-level directory
//! (`/`, `/a/../b.git`, `/a//b.git`) are dropped before any pattern is
//! consulted.

use std::path::{Component, Path};

use glob::{MatchOptions, Pattern};
use log::warn;

use crate::error::Result;
use crate::manifest::Manifest;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Compiled include and exclude patterns.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// A filter that keeps every path.
    pub fn allow_all() -> Self {
        Self {
            include: vec![Pattern::new("*").expect("literal pattern")],
            exclude: Vec::new(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.include.iter().any(|p| p.matches_with(path, MATCH_OPTIONS))
            && !self.exclude.iter().any(|p| p.matches_with(path, MATCH_OPTIONS))
    }

    /// Drops unsafe keys and manifest entries outside the filter. Returns
    /// how many were dropped.
    pub fn apply(&self, manifest: &mut Manifest) -> usize {
        let before = manifest.len();
        manifest.retain(|path, _| {
            if !is_safe_path(path) {
                warn!("Ignoring manifest entry with unsafe path {:?}", path);
                return false;
            }
            self.matches(path)
        });
        before - manifest.len()
    }
}

/// True when `path` is `/`-rooted and every segment is a plain name.
pub fn is_safe_path(path: &str) -> bool {
    let Some(relative) = path.strip_prefix('/') else {
        return false;
    };
    !relative.is_empty()
        && relative.split('/').all(|segment| {
            let mut components = Path::new(segment).components();
            matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(_)), None)
            )
        })
}

/// Compiles a list of glob patterns.
pub fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_star_includes_everything() {
        let filter = PathFilter::new(&strings(&["*"]), &[]).unwrap();
        assert!(filter.matches("/pub/scm/git/git.git"));
        assert!(filter.matches("/a.git"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter =
            PathFilter::new(&strings(&["/pub/*"]), &strings(&["*/private/*"])).unwrap();
        assert!(filter.matches("/pub/scm/linux.git"));
        assert!(!filter.matches("/pub/private/secret.git"));
        assert!(!filter.matches("/other/repo.git"));
    }

    #[test]
    fn test_no_include_keeps_nothing() {
        let filter = PathFilter::new(&[], &[]).unwrap();
        assert!(!filter.matches("/a.git"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(PathFilter::new(&strings(&["[unclosed"]), &[]).is_err());
    }

    #[test]
    fn test_apply_culls_manifest() {
        let mut manifest = Manifest::new();
        manifest.insert("/keep/a.git", ManifestEntry::new(1));
        manifest.insert("/drop/b.git", ManifestEntry::new(1));
        let filter = PathFilter::new(&strings(&["/keep/*"]), &[]).unwrap();

        assert_eq!(filter.apply(&mut manifest), 1);
        assert!(manifest.contains("/keep/a.git"));
        assert!(!manifest.contains("/drop/b.git"));
    }

    #[test]
    fn test_safe_paths() {
        assert!(is_safe_path("/pub/ok.git"));
        assert!(is_safe_path("/a.git"));
        assert!(is_safe_path("/pub/.hidden.git"));
        let unsafe_paths = [
            "", "/", "//", "/x/..", "/../etc", "/a//b.git", "/a/./b.git", "/a/", "a.git",
        ];
        for unsafe_path in unsafe_paths {
            assert!(!is_safe_path(unsafe_path), "{:?} should be unsafe", unsafe_path);
        }
    }

    #[test]
    fn test_apply_drops_unsafe_keys() {
        testing_logger::setup();
        let mut manifest = Manifest::new();
        manifest.insert("/pub/ok.git", ManifestEntry::new(1));
        manifest.insert("/", ManifestEntry::new(1));
        manifest.insert("/pub/../../etc.git", ManifestEntry::new(1));
        manifest.insert("/a//b.git", ManifestEntry::new(1));

        assert_eq!(PathFilter::allow_all().apply(&mut manifest), 3);
        assert_eq!(manifest.paths().collect::<Vec<_>>(), vec!["/pub/ok.git"]);
        testing_logger::validate(|logs| {
            let warnings = logs.iter().filter(|l| l.level == log::Level::Warn).count();
            assert_eq!(warnings, 3);
        });
    }

    #[test]
    fn test_allow_all() {
        assert!(PathFilter::allow_all().matches("/anything/at/all.git"));
    }
}
