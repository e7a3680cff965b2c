//! Verified, in-order access to the blocks of a CAR stream.

use bytes::Bytes;
use cid::Cid;
use n0_future::time::{self, Duration, Elapsed};
use nested_enum_utils::common_fields;
use snafu::{Backtrace, ResultExt, Snafu};
use tokio::io::AsyncRead;
use tracing::trace;

use crate::{
    car::{self, CarReader},
    codec::HashCode,
    verify::{self, VerifyError},
};

/// How long to wait for the next block before giving up on a stream.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// A verified block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The CID the bytes hash to.
    pub cid: Cid,
    /// The block bytes.
    pub data: Bytes,
}

/// Errors from reading blocks.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum BlockError {
    #[snafu(transparent)]
    Car { source: car::Error },
    #[snafu(transparent)]
    Verify { source: VerifyError },
    #[snafu(display("received block with cid {got}, expected {expected}"))]
    UnexpectedBlock { got: Cid, expected: Cid },
    #[snafu(display("CAR file has no more blocks, expected {expected}"))]
    TruncatedStream { expected: Cid },
    #[snafu(display("timed out waiting for the next block"))]
    Timeout { source: Elapsed },
}

/// Hands out blocks of a CAR stream in the order they are needed.
///
/// Every block is verified against its CID. [`BlockSource::get`] additionally checks that
/// the next block in the stream is the one asked for, so a stream that does not follow
/// the traversal order fails instead of being buffered.
#[derive(Debug)]
pub struct BlockSource<R> {
    reader: CarReader<R>,
    block_timeout: Duration,
}

impl<R> BlockSource<R>
where
    R: AsyncRead + Send + Unpin,
{
    /// Reads the CAR header from `reader`.
    pub async fn new(reader: R, block_timeout: Duration) -> Result<Self, BlockError> {
        let reader = time::timeout(block_timeout, CarReader::new(reader))
            .await
            .context(TimeoutSnafu)??;
        Ok(Self::from_reader(reader, block_timeout))
    }

    /// Wraps a reader whose header was already read.
    pub fn from_reader(reader: CarReader<R>, block_timeout: Duration) -> Self {
        BlockSource {
            reader,
            block_timeout,
        }
    }

    /// The roots named in the CAR header.
    pub fn roots(&self) -> &[Cid] {
        self.reader.header().roots()
    }

    /// Reads and verifies the next block, or `None` at the end of the stream.
    pub async fn next_block(&mut self) -> Result<Option<Block>, BlockError> {
        let next = time::timeout(self.block_timeout, self.reader.next_block())
            .await
            .context(TimeoutSnafu)??;
        let Some((cid, data)) = next else {
            return Ok(None);
        };
        verify::verify(&cid, &data)?;
        trace!(%cid, len = data.len(), "verified block");
        Ok(Some(Block {
            cid,
            data: data.into(),
        }))
    }

    /// Returns the bytes of `expected`, which must be the next block in the stream.
    ///
    /// Identity CIDs carry their content and are answered without reading.
    pub async fn get(&mut self, expected: &Cid) -> Result<Bytes, BlockError> {
        let mh = expected.hash();
        if mh.code() == u64::from(HashCode::Identity) {
            verify::verify(expected, mh.digest())?;
            return Ok(Bytes::copy_from_slice(mh.digest()));
        }
        let block = self
            .next_block()
            .await?
            .ok_or_else(|| TruncatedStreamSnafu { expected: *expected }.build())?;
        snafu::ensure!(
            block.cid == *expected,
            UnexpectedBlockSnafu {
                got: block.cid,
                expected: *expected,
            }
        );
        Ok(block.data)
    }
}
