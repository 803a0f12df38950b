//! Store URIs: `tfs://authority/path` or a bare absolute path.
//!
//! Pure value type; parsing and normalization only, no I/O. Normalization
//! collapses duplicate separators, resolves `.` and `..` (clamped at the
//! root), and strips trailing slashes, so equal locations compare equal.

use crate::error::{Result, TfsError};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TfsUri {
    scheme: Option<String>,
    authority: Option<String>,
    path: String,
}

impl TfsUri {
    /// Parse a raw string. Fails on empty input, an empty scheme, or a
    /// scheme-less path that is not absolute.
    pub fn parse(raw: &str) -> Result<TfsUri> {
        if raw.is_empty() {
            return Err(TfsError::invalid_argument("empty uri"));
        }
        if let Some((scheme, rest)) = raw.split_once("://") {
            if scheme.is_empty() {
                return Err(TfsError::invalid_argument(format!("empty scheme: {raw}")));
            }
            let (authority, path) = match rest.find('/') {
                Some(0) => (None, rest),
                Some(i) => (Some(&rest[..i]), &rest[i..]),
                None if rest.is_empty() => (None, "/"),
                None => (Some(rest), "/"),
            };
            Ok(TfsUri {
                scheme: Some(scheme.to_string()),
                authority: authority.map(|a| a.to_string()),
                path: normalize_path(path),
            })
        } else if raw.starts_with('/') {
            Ok(TfsUri {
                scheme: None,
                authority: None,
                path: normalize_path(raw),
            })
        } else {
            Err(TfsError::invalid_argument(format!(
                "path must be absolute: {raw}"
            )))
        }
    }

    /// Build from parts without validating the parts themselves; the path is
    /// still normalized (and made absolute) so the invariants hold.
    pub fn from_parts(scheme: Option<&str>, authority: Option<&str>, path: &str) -> TfsUri {
        TfsUri {
            scheme: scheme.map(|s| s.to_string()),
            authority: authority.map(|a| a.to_string()),
            path: normalize_path(path),
        }
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// The normalized absolute path, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Path components, root excluded.
    pub fn components(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// Last path component, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.components().next_back()
    }

    /// Append a child path (relative or absolute) and re-normalize.
    pub fn join(&self, child: &str) -> TfsUri {
        let joined = format!("{}/{}", self.path, child);
        TfsUri {
            scheme: self.scheme.clone(),
            authority: self.authority.clone(),
            path: normalize_path(&joined),
        }
    }
}

fn normalize_path(p: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

impl fmt::Display for TfsUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.scheme, &self.authority) {
            (Some(s), Some(a)) => write!(f, "{s}://{a}{}", self.path),
            (Some(s), None) => write!(f, "{s}://{}", self.path),
            _ => write!(f, "{}", self.path),
        }
    }
}

impl FromStr for TfsUri {
    type Err = TfsError;

    fn from_str(s: &str) -> Result<TfsUri> {
        TfsUri::parse(s)
    }
}
