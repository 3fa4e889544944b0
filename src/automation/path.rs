//! Path templates with `{name}` placeholders
//!
//! A template is a sequence of segments, each either a literal or a whole-segment
//! placeholder. Matching is segment-wise; empty segments are ignored so that
//! `/api/tasks`, `/api/tasks/` and `//api/tasks` address the same route.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Placeholder(String),
}

impl PathSegment {
    pub fn is_literal(&self) -> bool {
        matches!(self, PathSegment::Literal(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<PathSegment>,
}

impl PathTemplate {
    /// Parse a template such as `/api/tasks/{task_id}`.
    ///
    /// Placeholders must span a whole segment and name a valid identifier.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if !raw.starts_with('/') {
            return Err(format!("path '{raw}' must start with '/'"));
        }

        let mut segments = Vec::new();
        for segment in split_segments(raw) {
            if let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                if !is_identifier(inner) {
                    return Err(format!(
                        "placeholder '{{{inner}}}' must be a letter or underscore followed by letters, digits or underscores"
                    ));
                }
                segments.push(PathSegment::Placeholder(inner.to_string()));
            } else if segment.contains('{') || segment.contains('}') {
                return Err(format!(
                    "segment '{segment}' mixes literal text and a placeholder; placeholders must fill a whole segment"
                ));
            } else if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
            {
                return Err(format!("segment '{segment}' contains characters not allowed in a path"));
            } else {
                segments.push(PathSegment::Literal(segment.to_string()));
            }
        }

        Ok(Self { segments })
    }

    /// Join an automation's `base_path` with an endpoint path and parse the result
    pub fn join(base_path: &str, endpoint_path: &str) -> Result<Self, String> {
        let base = base_path.trim_end_matches('/');
        Self::parse(&format!("{base}{endpoint_path}"))
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            PathSegment::Placeholder(name) => Some(name.as_str()),
            PathSegment::Literal(_) => None,
        })
    }

    /// Template with placeholder names erased. Two templates with the same shape
    /// match exactly the same request paths.
    pub fn shape(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        self.segments
            .iter()
            .map(|s| match s {
                PathSegment::Literal(lit) => format!("/{lit}"),
                PathSegment::Placeholder(_) => "/{}".to_string(),
            })
            .collect()
    }

    /// Literal-ness of each segment, compared lexicographically to rank candidate
    /// routes: the first segment where one is literal and the other is not decides.
    pub fn specificity(&self) -> Vec<bool> {
        self.segments.iter().map(PathSegment::is_literal).collect()
    }

    /// Match already-split request segments, returning captured placeholder values
    pub fn matches(&self, request: &[&str]) -> Option<HashMap<String, String>> {
        if request.len() != self.segments.len() {
            return None;
        }

        let mut captured = HashMap::new();
        for (segment, actual) in self.segments.iter().zip(request) {
            match segment {
                PathSegment::Literal(lit) if lit == actual => {}
                PathSegment::Literal(_) => return None,
                PathSegment::Placeholder(name) => {
                    captured.insert(name.clone(), (*actual).to_string());
                }
            }
        }
        Some(captured)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            match segment {
                PathSegment::Literal(lit) => write!(f, "/{lit}")?,
                PathSegment::Placeholder(name) => write!(f, "/{{{name}}}")?,
            }
        }
        Ok(())
    }
}

/// Split a request path into non-empty segments
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
