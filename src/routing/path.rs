//! Path pattern parsing and pathname matching.
//!
//! # Responsibilities
//! - Parse a pattern such as `/blog/[slug]/[...rest]` into a [`PathSpec`]
//! - Match a concrete pathname against a spec and extract parameters
//! - Fill a spec from concrete segments (static generation)
//!
//! # Design Decisions
//! - Pure functions, no allocation beyond the returned values
//! - A wildcard is anchored from both ends: leading segments are matched
//!   forward, trailing segments backward, the remainder is captured
//! - A wildcard captures at least one segment

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing or filling a path spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("pattern `{0}` has more than one wildcard segment")]
    MultipleWildcards(String),

    #[error("pattern `{pattern}` needs {expected} concrete segment(s), got {actual}")]
    Arity {
        pattern: String,
        expected: String,
        actual: usize,
    },
}

/// One segment of a path spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PathSegment {
    Literal { name: String },
    Group { name: Option<String> },
    Wildcard { name: Option<String> },
}

impl PathSegment {
    fn is_variable(&self) -> bool {
        !matches!(self, PathSegment::Literal { .. })
    }
}

/// Structured form of a path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PathSpec {
    segments: Vec<PathSegment>,
}

/// A captured parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    One(String),
    Many(Vec<String>),
}

impl ParamValue {
    /// Render the value the way it appears in a pathname.
    pub fn to_path(&self) -> String {
        match self {
            ParamValue::One(v) => v.clone(),
            ParamValue::Many(vs) => vs.join("/"),
        }
    }
}

/// Parameters extracted by a successful match, keyed by segment name.
pub type Params = BTreeMap<String, ParamValue>;

/// Split a pathname into its non-empty segments.
pub fn split_pathname(pathname: &str) -> Vec<&str> {
    pathname.split('/').filter(|s| !s.is_empty()).collect()
}

/// Parse a path pattern into a [`PathSpec`].
///
/// `[name]` is a group, `[...name]` a wildcard; empty brackets produce
/// unnamed segments that match but are not reported.
pub fn parse_spec(pattern: &str) -> Result<PathSpec, PathError> {
    let segments: Vec<PathSegment> = split_pathname(pattern)
        .into_iter()
        .map(|raw| {
            match raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                Some(inner) => match inner.strip_prefix("...") {
                    Some(name) => PathSegment::Wildcard {
                        name: non_empty(name),
                    },
                    None => PathSegment::Group {
                        name: non_empty(inner),
                    },
                },
                None => PathSegment::Literal {
                    name: raw.to_string(),
                },
            }
        })
        .collect();

    let wildcards = segments
        .iter()
        .filter(|s| matches!(s, PathSegment::Wildcard { .. }))
        .count();
    if wildcards > 1 {
        return Err(PathError::MultipleWildcards(pattern.to_string()));
    }

    Ok(PathSpec { segments })
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

impl PathSpec {
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn wildcard_index(&self) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| matches!(s, PathSegment::Wildcard { .. }))
    }

    pub fn has_wildcard(&self) -> bool {
        self.wildcard_index().is_some()
    }

    /// True when the spec contains only literal segments.
    pub fn is_static(&self) -> bool {
        !self.segments.iter().any(PathSegment::is_variable)
    }

    /// True when `prefix` is a literal prefix of this spec (segment-wise equality).
    pub fn extends(&self, prefix: &PathSpec) -> bool {
        prefix.len() <= self.len() && self.segments[..prefix.len()] == prefix.segments[..]
    }

    /// Ordering key: literal-only specs first, wildcards last.
    pub fn specificity(&self) -> (u8, usize) {
        let rank = if self.has_wildcard() {
            2
        } else if self.is_static() {
            0
        } else {
            1
        };
        (rank, usize::MAX - self.len())
    }

    /// Pathname for a fully literal spec.
    pub fn literal_path(&self) -> Option<String> {
        if !self.is_static() {
            return None;
        }
        Some(join_segments(self.segments.iter().map(|s| match s {
            PathSegment::Literal { name } => name.as_str(),
            _ => "",
        })))
    }

    /// Match a pathname, returning the captured parameters.
    pub fn matches(&self, pathname: &str) -> Option<Params> {
        match_path(self, pathname)
    }

    /// Build a concrete pathname by substituting `values` for the variable
    /// segments in order. A wildcard takes every value not claimed by the
    /// other variable segments (at least one).
    pub fn fill(&self, values: &[String]) -> Result<(String, Params), PathError> {
        let fixed = self
            .segments
            .iter()
            .filter(|s| matches!(s, PathSegment::Group { .. }))
            .count();
        let arity_ok = if self.has_wildcard() {
            values.len() > fixed
        } else {
            values.len() == fixed
        };
        if !arity_ok {
            return Err(PathError::Arity {
                pattern: self.to_string(),
                expected: if self.has_wildcard() {
                    format!("more than {fixed}")
                } else {
                    fixed.to_string()
                },
                actual: values.len(),
            });
        }

        let span = values.len() - fixed;
        let mut params = Params::new();
        let mut parts: Vec<&str> = Vec::with_capacity(self.len() + span);
        let mut cursor = 0;
        for segment in &self.segments {
            match segment {
                PathSegment::Literal { name } => parts.push(name),
                PathSegment::Group { name } => {
                    let value = &values[cursor];
                    cursor += 1;
                    parts.push(value);
                    if let Some(name) = name {
                        params.insert(name.clone(), ParamValue::One(value.clone()));
                    }
                }
                PathSegment::Wildcard { name } => {
                    let captured = &values[cursor..cursor + span];
                    cursor += span;
                    parts.extend(captured.iter().map(String::as_str));
                    if let Some(name) = name {
                        params.insert(name.clone(), ParamValue::Many(captured.to_vec()));
                    }
                }
            }
        }
        Ok((join_segments(parts.into_iter()), params))
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            match segment {
                PathSegment::Literal { name } => write!(f, "/{name}")?,
                PathSegment::Group { name } => {
                    write!(f, "/[{}]", name.as_deref().unwrap_or(""))?
                }
                PathSegment::Wildcard { name } => {
                    write!(f, "/[...{}]", name.as_deref().unwrap_or(""))?
                }
            }
        }
        Ok(())
    }
}

fn join_segments<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

fn match_segment(segment: &PathSegment, part: &str, params: &mut Params) -> bool {
    match segment {
        PathSegment::Literal { name } => name == part,
        PathSegment::Group { name } => {
            if let Some(name) = name {
                params.insert(name.clone(), ParamValue::One(part.to_string()));
            }
            true
        }
        // Only reached for the wildcard position itself, handled by the caller.
        PathSegment::Wildcard { .. } => false,
    }
}

/// Match `pathname` against `spec`.
///
/// Without a wildcard the segment counts must be equal. With a wildcard the
/// spec may not be longer than the pathname, and the wildcard captures the
/// span left between the forward-matched head and backward-matched tail.
pub fn match_path(spec: &PathSpec, pathname: &str) -> Option<Params> {
    let parts = split_pathname(pathname);
    let mut params = Params::new();

    let Some(wild) = spec.wildcard_index() else {
        if spec.len() != parts.len() {
            return None;
        }
        for (segment, part) in spec.segments.iter().zip(&parts) {
            if !match_segment(segment, part, &mut params) {
                return None;
            }
        }
        return Some(params);
    };

    if spec.len() > parts.len() {
        return None;
    }

    for i in 0..wild {
        if !match_segment(&spec.segments[i], parts[i], &mut params) {
            return None;
        }
    }

    let tail = spec.len() - wild - 1;
    for j in 0..tail {
        let segment = &spec.segments[spec.len() - 1 - j];
        let part = parts[parts.len() - 1 - j];
        if !match_segment(segment, part, &mut params) {
            return None;
        }
    }

    if let PathSegment::Wildcard { name: Some(name) } = &spec.segments[wild] {
        let captured = parts[wild..parts.len() - tail]
            .iter()
            .map(|s| s.to_string())
            .collect();
        params.insert(name.clone(), ParamValue::Many(captured));
    }
    Some(params)
}
