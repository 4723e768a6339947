//! Absolute prim paths.
//!
//! A `PrimPath` is the stable identity of a description node: absolute,
//! slash-separated, with segments restricted to `[A-Za-z0-9_]`. The restricted
//! alphabet buys an important ordering property: under plain lexicographic
//! `Ord`, every descendant of a path `p` sorts into the contiguous key range
//! immediately following `p` itself (no legal segment byte sorts below `/`).
//! The translator context relies on this for prefix-bounded range queries
//! over its sorted index.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimPath(String);

impl PrimPath {
    /// The absolute root, `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and validate an absolute path.
    pub fn new(path: &str) -> Result<Self, SyncError> {
        if path == "/" {
            return Ok(Self::root());
        }
        let Some(rest) = path.strip_prefix('/') else {
            return Err(invalid(path, "path must be absolute"));
        };
        if rest.is_empty() || rest.ends_with('/') {
            return Err(invalid(path, "trailing slash"));
        }
        for segment in rest.split('/') {
            if segment.is_empty() {
                return Err(invalid(path, "empty segment"));
            }
            if !segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
            {
                return Err(invalid(path, "segment contains illegal characters"));
            }
        }
        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Number of segments; the root has depth 0.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// Final segment, or `""` for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    pub fn parent(&self) -> Option<PrimPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    pub fn child(&self, name: &str) -> Result<PrimPath, SyncError> {
        if self.is_root() {
            Self::new(&format!("/{name}"))
        } else {
            Self::new(&format!("{}/{name}", self.0))
        }
    }

    /// Strict ancestry: `/a` is an ancestor of `/a/b` but not of itself or
    /// of `/ab`.
    pub fn is_ancestor_of(&self, other: &PrimPath) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other
            .0
            .strip_prefix(&self.0)
            .is_some_and(|rest| rest.starts_with('/'))
    }

    pub fn is_self_or_ancestor_of(&self, other: &PrimPath) -> bool {
        self == other || self.is_ancestor_of(other)
    }
}

fn invalid(path: &str, reason: &str) -> SyncError {
    SyncError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for PrimPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PrimPath {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
