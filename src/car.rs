//! CARv1 framing: a varint length prefixed DAG-CBOR header followed by
//! length prefixed `CID ++ bytes` sections.

use nested_enum_utils::common_fields;
use snafu::{Backtrace, Snafu};

use crate::verify::VerifyError;

mod header;
mod reader;
mod util;
mod writer;

pub use self::{
    header::{CarHeader, CarHeaderV1},
    reader::CarReader,
    writer::CarWriter,
};

/// Errors from reading or writing CAR streams.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to parse CAR: {message}"))]
    Parsing { message: String },
    #[snafu(display("invalid CAR: {message}"))]
    InvalidFile { message: String },
    #[snafu(display("section of {len} bytes exceeds the maximum section size"))]
    LdReadTooLarge { len: usize },
    #[snafu(display("invalid CID in CAR section"))]
    InvalidCid { source: cid::Error },
    #[snafu(transparent)]
    Verify { source: VerifyError },
    #[snafu(transparent)]
    Io { source: std::io::Error },
}
