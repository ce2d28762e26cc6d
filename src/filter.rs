// Copyright 2024-2025 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Include and exclude rules matched against paths relative to a source root.
//!
//! Each rule is a glob prefixed by `+` (include) or `-` (exclude); a bare
//! pattern is an exclude. Rules are tried in order and the last one that
//! matches decides; a path that matches no rule is not ignored.
//!
//! Patterns are anchored at the root of the tree, so `cache` matches only the
//! top-level `cache` and everything beneath it, while `**/cache` matches it
//! at any depth. `*` does not cross directory separators.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone)]
struct Rule {
    include: bool,
    pattern: String,
    globs: GlobSet,
}

/// An ordered list of include and exclude rules.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    rules: Vec<Rule>,
}

/// The form in which filters are sent to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub filters: Vec<String>,
}

fn glob(pattern: &str) -> Result<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|source| Error::Glob {
            pattern: pattern.to_owned(),
            source,
        })
}

impl Rule {
    fn parse(rule: &str) -> Result<Rule> {
        let (include, pattern) = match rule.as_bytes().first() {
            Some(b'+') => (true, &rule[1..]),
            Some(b'-') => (false, &rule[1..]),
            _ => (false, rule),
        };
        let anchored = pattern.trim_start_matches('/').trim_end_matches('/');
        let mut builder = GlobSetBuilder::new();
        builder.add(glob(anchored)?);
        builder.add(glob(&format!("{anchored}/**"))?);
        let globs = builder.build().map_err(|source| Error::Glob {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(Rule {
            include,
            pattern: pattern.to_owned(),
            globs,
        })
    }

    fn text(&self) -> String {
        format!("{}{}", if self.include { '+' } else { '-' }, self.pattern)
    }
}

impl Filter {
    /// A filter that ignores nothing.
    pub fn nothing() -> Filter {
        Filter::default()
    }

    /// Build from rules like `-*.tmp` and `+important.tmp`.
    pub fn new<S: AsRef<str>>(rules: &[S]) -> Result<Filter> {
        Filter::nothing().with_rules(rules)
    }

    /// Build from separate lists of include and exclude patterns, as given
    /// on the command line. Includes take precedence.
    pub fn from_patterns<S: AsRef<str>>(includes: &[S], excludes: &[S]) -> Result<Filter> {
        let rules = excludes
            .iter()
            .map(|p| format!("-{}", p.as_ref()))
            .chain(includes.iter().map(|p| format!("+{}", p.as_ref())))
            .collect::<Vec<_>>();
        Filter::new(&rules)
    }

    /// Append more rules, which take precedence over the existing ones.
    pub fn with_rules<S: AsRef<str>>(mut self, rules: &[S]) -> Result<Filter> {
        for rule in rules {
            let rule = rule.as_ref();
            if !rule.is_empty() {
                self.rules.push(Rule::parse(rule)?);
            }
        }
        Ok(self)
    }

    /// Append all the rules of another filter.
    pub fn extend(&mut self, other: &Filter) {
        self.rules.extend(other.rules.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn has_includes(&self) -> bool {
        self.rules.iter().any(|r| r.include)
    }

    /// The rules in text form, for sending to a server.
    pub fn rules(&self) -> Vec<String> {
        self.rules.iter().map(Rule::text).collect()
    }

    pub fn to_spec(&self) -> FilterSpec {
        FilterSpec {
            filters: self.rules(),
        }
    }

    /// True if the path, relative to the source root, should be left out.
    pub fn ignores(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/');
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.globs.is_match(path))
            .is_some_and(|rule| !rule.include)
    }
}

impl TryFrom<&FilterSpec> for Filter {
    type Error = Error;

    fn try_from(spec: &FilterSpec) -> Result<Filter> {
        Filter::new(&spec.filters)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_filter_ignores_nothing() {
        let filter = Filter::nothing();
        assert!(!filter.ignores("a"));
        assert!(!filter.ignores(""));
        assert!(!filter.has_includes());
    }

    #[test]
    fn exclude_matches_descendants() {
        let filter = Filter::new(&["-cache"]).unwrap();
        assert!(filter.ignores("cache"));
        assert!(filter.ignores("cache/a/b"));
        assert!(!filter.ignores("src/cache"));
        assert!(!filter.ignores("cachet"));
    }

    #[test]
    fn star_does_not_cross_directories() {
        let filter = Filter::new(&["*.tmp"]).unwrap();
        assert!(filter.ignores("x.tmp"));
        assert!(!filter.ignores("a/x.tmp"));
        let filter = Filter::new(&["**/*.tmp"]).unwrap();
        assert!(filter.ignores("x.tmp"));
        assert!(filter.ignores("a/b/x.tmp"));
    }

    #[test]
    fn last_match_wins() {
        let filter = Filter::new(&["-**/*.log", "+keep/**"]).unwrap();
        assert!(filter.ignores("a.log"));
        assert!(filter.ignores("x/a.log"));
        assert!(!filter.ignores("keep/a.log"));
        let filter = Filter::new(&["+keep/**", "-**/*.log"]).unwrap();
        assert!(filter.ignores("keep/a.log"));
    }

    #[test]
    fn includes_override_excludes() {
        let filter = Filter::from_patterns(&["photos/best"], &["photos"]).unwrap();
        assert!(filter.ignores("photos/other.jpg"));
        assert!(!filter.ignores("photos/best/1.jpg"));
        assert!(filter.has_includes());
        assert_eq!(filter.rules(), ["-photos", "+photos/best"]);
    }

    #[test]
    fn leading_slash_is_anchored() {
        let filter = Filter::new(&["-/target"]).unwrap();
        assert!(filter.ignores("target/debug"));
        assert!(filter.ignores("/target"));
    }

    #[test]
    fn spec_round_trip() {
        let filter = Filter::new(&["-a", "+a/b"]).unwrap();
        let again = Filter::try_from(&filter.to_spec()).unwrap();
        assert_eq!(again.rules(), filter.rules());
    }

    #[test]
    fn bad_pattern() {
        assert_matches!(Filter::new(&["-a[b"]), Err(Error::Glob { .. }));
    }
}
