//! Path and method matching.
//!
//! # Responsibilities
//! - Match a path against a glob pattern (`*` = any run of characters)
//! - Match a method against an allowed set (`*` = any method)
//!
//! # Design Decisions
//! - Patterns are anchored at both ends
//! - `*` crosses `/` boundaries
//! - Method matching is case-insensitive (both sides uppercased)
//! - No regex to guarantee linear-ish matching with no compilation step

use serde::{Deserialize, Serialize};

/// Glob match of `text` against `pattern`, where `*` matches zero or more
/// characters and everything else matches literally.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    // Position of the last `*` seen and the text index it was anchored at.
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            pi += 1;
            mark = ti;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// A path glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathPattern(String);

impl PathPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn matches(&self, path: &str) -> bool {
        glob_match(&self.0, path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Set of allowed HTTP methods, stored uppercased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodSet(Vec<String>);

impl MethodSet {
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            methods
                .into_iter()
                .map(|m| m.as_ref().trim().to_ascii_uppercase())
                .collect(),
        )
    }

    pub fn any() -> Self {
        Self(vec!["*".to_string()])
    }

    pub fn contains(&self, method: &str) -> bool {
        method_allowed(&self.0, method)
    }
}

/// True when `methods` contains `*` or `method` (case-insensitive).
pub fn method_allowed<S: AsRef<str>>(methods: &[S], method: &str) -> bool {
    methods.iter().any(|m| {
        let m = m.as_ref();
        m == "*" || m.eq_ignore_ascii_case(method)
    })
}
