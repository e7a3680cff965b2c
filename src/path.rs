//! Content paths: a root CID followed by zero or more segments.

use std::{fmt, str::FromStr};

use cid::Cid;
use nested_enum_utils::common_fields;
use snafu::{Backtrace, ResultExt, Snafu};

use crate::verify::{self, VerifyError};

/// A path into a DAG, `CID[/segment]*`, optionally prefixed with `/ipfs/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentPath {
    root: Cid,
    segments: Vec<String>,
}

/// Errors from parsing a [`ContentPath`].
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum PathError {
    #[snafu(display("path has no root CID"))]
    Empty {},
    #[snafu(display("invalid root CID {root:?}"))]
    InvalidCid { root: String, source: cid::Error },
    #[snafu(transparent)]
    Unsupported { source: VerifyError },
}

impl ContentPath {
    /// A path naming `root` itself.
    pub fn from_cid(root: Cid) -> Self {
        ContentPath {
            root,
            segments: Vec::new(),
        }
    }

    /// Appends a segment.
    pub fn join(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// The CID the path starts at.
    pub fn root(&self) -> &Cid {
        &self.root
    }

    /// The segments below the root.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl FromStr for ContentPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/').filter(|s| !s.is_empty()).peekable();
        if parts
            .peek()
            .is_some_and(|first| first.eq_ignore_ascii_case("ipfs"))
        {
            parts.next();
        }
        let root = parts.next().ok_or_else(|| EmptySnafu.build())?;
        let cid = Cid::from_str(root).context(InvalidCidSnafu { root })?;
        let mh = cid.hash();
        verify::check_format(cid.codec(), mh.code(), mh.digest().len())?;

        Ok(ContentPath {
            root: cid,
            segments: parts.map(Into::into).collect(),
        })
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl From<Cid> for ContentPath {
    fn from(root: Cid) -> Self {
        Self::from_cid(root)
    }
}
