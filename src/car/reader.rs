use cid::Cid;
use futures_util::Stream;
use tokio::io::AsyncRead;

use super::{
    Error, ParsingSnafu,
    header::CarHeader,
    util::{ld_read, read_node},
};

/// Reads `(CID, bytes)` sections from a CAR stream.
///
/// Blocks are returned as found in the stream, without verification.
#[derive(Debug)]
pub struct CarReader<R> {
    reader: R,
    header: CarHeader,
    buffer: Vec<u8>,
}

impl<R> CarReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    /// Creates a new CarReader and parses the CarHeader
    pub async fn new(mut reader: R) -> Result<Self, Error> {
        let mut buffer = Vec::new();

        let header = match ld_read(&mut reader, &mut buffer).await? {
            Some(bytes) => CarHeader::decode(bytes)?,
            None => {
                return ParsingSnafu {
                    message: "failed to parse uvarint for header",
                }
                .fail();
            }
        };

        Ok(CarReader {
            reader,
            header,
            buffer,
        })
    }

    /// Returns the header of this car file.
    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    /// Returns the next section, or `None` at the end of the stream.
    pub async fn next_block(&mut self) -> Result<Option<(Cid, Vec<u8>)>, Error> {
        read_node(&mut self.reader, &mut self.buffer).await
    }

    /// Turns the reader into a stream of sections.
    pub fn stream(self) -> impl Stream<Item = Result<(Cid, Vec<u8>), Error>> {
        futures_util::stream::try_unfold(self, |mut this| async move {
            let maybe_block = read_node(&mut this.reader, &mut this.buffer).await?;
            Ok(maybe_block.map(|b| (b, this)))
        })
    }
}
