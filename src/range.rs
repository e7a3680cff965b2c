//! Byte ranges over an entity, with negative offsets counted from the end.

use bytes::Bytes;
use nested_enum_utils::common_fields;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, Snafu};

/// A requested byte range.
///
/// A negative `start` counts back from the end of the entity. A negative `end` counts
/// back from the last byte, so `-1` names the byte before the last one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRange {
    /// First byte, defaults to the start of the entity.
    pub start: Option<i64>,
    /// Last byte, inclusive, defaults to the end of the entity.
    pub end: Option<i64>,
}

/// A range resolved against a known size, `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedRange {
    /// First byte.
    pub start: u64,
    /// Last byte, inclusive.
    pub end: u64,
}

/// Errors for ranges that do not select any bytes.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum RangeError {
    #[snafu(display("range start {start} is past the end of {size} bytes"))]
    StartPastEnd { start: i64, size: u64 },
    #[snafu(display("range end {end} is before the start of {size} bytes"))]
    EndBeforeStart { end: i64, size: u64 },
    #[snafu(display("range end {end} is before range start {start}"))]
    Inverted { start: i64, end: i64 },
    #[snafu(display("range counts from the end of content of unknown size"))]
    UnknownSize {},
}

impl ContentRange {
    /// A range from `start` to `end`, inclusive.
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        ContentRange { start, end }
    }

    /// Rejects ranges that cannot be valid for any entity size.
    pub fn validate(&self) -> Result<(), RangeError> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            let inverted = match (start < 0, end < 0) {
                (false, false) => end < start,
                // both count from the end, and `end` one byte further back
                (true, true) => end <= start,
                _ => false,
            };
            snafu::ensure!(!inverted, InvertedSnafu { start, end });
        }
        Ok(())
    }

    /// Resolves the range against an entity of `size` bytes.
    ///
    /// Starts before the beginning and ends past the end are clamped.
    pub fn normalize(&self, size: u64) -> Result<NormalizedRange, RangeError> {
        let isize = i64::try_from(size).unwrap_or(i64::MAX);
        let mut start = self.start.unwrap_or(0);
        if start < 0 {
            start = (start + isize).max(0);
        } else if start > 0 && start >= isize {
            return StartPastEndSnafu { start, size }.fail();
        }

        let mut end = self.end.unwrap_or(isize - 1);
        if end < 0 {
            let requested = end;
            end += isize - 1;
            snafu::ensure!(
                end >= 0,
                EndBeforeStartSnafu {
                    end: requested,
                    size
                }
            );
        } else if end >= isize {
            end = isize - 1;
        }

        snafu::ensure!(end >= start, InvertedSnafu { start, end });
        Ok(NormalizedRange {
            start: start as u64,
            end: end as u64,
        })
    }

    /// Resolves the range without knowing the entity size.
    ///
    /// Only ranges counted from the start can be resolved this way.
    pub fn normalize_unbounded(&self) -> Result<NormalizedRange, RangeError> {
        let start = self.start.unwrap_or(0);
        let end = self.end.unwrap_or(i64::MAX);
        snafu::ensure!(start >= 0 && end >= 0, UnknownSizeSnafu);
        snafu::ensure!(end >= start, InvertedSnafu { start, end });
        Ok(NormalizedRange {
            start: start as u64,
            end: end as u64,
        })
    }
}

impl From<std::ops::RangeInclusive<i64>> for ContentRange {
    fn from(range: std::ops::RangeInclusive<i64>) -> Self {
        ContentRange::new(Some(*range.start()), Some(*range.end()))
    }
}

impl From<std::ops::RangeFrom<i64>> for ContentRange {
    fn from(range: std::ops::RangeFrom<i64>) -> Self {
        ContentRange::new(Some(range.start), None)
    }
}

/// Cuts a sequence of chunks down to a range, tracking the offset of each chunk.
#[derive(Debug, Clone)]
pub struct RangeSlicer {
    range: Option<NormalizedRange>,
    offset: u64,
}

impl RangeSlicer {
    /// A slicer passing through only bytes inside `range`.
    pub fn new(range: NormalizedRange) -> Self {
        RangeSlicer {
            range: Some(range),
            offset: 0,
        }
    }

    /// A slicer passing through everything.
    pub fn full() -> Self {
        RangeSlicer {
            range: None,
            offset: 0,
        }
    }

    /// Returns the part of the next `chunk` inside the range, if any.
    pub fn slice(&mut self, chunk: Bytes) -> Option<Bytes> {
        let chunk_start = self.offset;
        self.offset += chunk.len() as u64;
        let Some(range) = self.range else {
            return (!chunk.is_empty()).then_some(chunk);
        };
        let from = range.start.max(chunk_start);
        let to = (range.end + 1).min(self.offset);
        if from >= to {
            return None;
        }
        Some(chunk.slice((from - chunk_start) as usize..(to - chunk_start) as usize))
    }

    /// Whether no further chunk can contribute bytes.
    pub fn is_done(&self) -> bool {
        self.range.is_some_and(|range| self.offset > range.end)
    }
}
