//! Service name filtering
//!
//! Simple glob matching: `*` matches any run of characters (including none),
//! everything else is literal. `"foo*"`, `"*foo"`, `"foo*bar"` and `"*"` all
//! work as expected; there are no character classes or escapes, so a pattern
//! like `"orders[1]"` simply matches that exact string.

use std::collections::BTreeSet;
use tracing::debug;

/// True if `name` matches `pattern` under simple-glob rules
pub fn simple_match(pattern: &str, name: &str) -> bool {
    let Some(first_star) = pattern.find('*') else {
        return pattern == name;
    };
    if pattern == "*" {
        return true;
    }

    let (prefix, rest) = pattern.split_at(first_star);
    let Some(mut remaining) = name.strip_prefix(prefix) else {
        return false;
    };

    // rest starts with '*'; split the remainder into literal segments
    let segments: Vec<&str> = rest.split('*').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == last {
            return remaining.ends_with(segment);
        }
        match remaining.find(segment) {
            Some(pos) => remaining = &remaining[pos + segment.len()..],
            None => return false,
        }
    }
    // pattern ends with '*'
    true
}

/// True if `name` matches any of `patterns`
pub fn matches_any<'a, I>(name: &str, patterns: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    patterns
        .into_iter()
        .any(|pattern| simple_match(pattern, name))
}

/// Inclusion/exclusion rules deciding which services get registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFilter {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl ServiceFilter {
    /// Filter with explicit include and exclude patterns
    pub fn new<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    /// Include patterns
    pub fn include(&self) -> &BTreeSet<String> {
        &self.include
    }

    /// Exclude patterns
    pub fn exclude(&self) -> &BTreeSet<String> {
        &self.exclude
    }

    /// Included and not excluded
    pub fn should_register(&self, service: &str) -> bool {
        let accepted = matches_any(service, &self.include) && !matches_any(service, &self.exclude);
        if !accepted {
            debug!(service, "Ignoring discovered service");
        }
        accepted
    }
}

impl Default for ServiceFilter {
    /// Everything included, nothing excluded
    fn default() -> Self {
        Self::new(["*"], std::iter::empty::<String>())
    }
}
