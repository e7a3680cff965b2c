use cid::Cid;
use integer_encoding::VarInt;
use snafu::ResultExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{Error, InvalidCidSnafu, header::CarHeader};

/// Writes blocks in CARv1 framing.
#[derive(Debug)]
pub struct CarWriter<W> {
    header: CarHeader,
    writer: W,
    cid_buffer: Vec<u8>,
    is_header_written: bool,
}

impl<W> CarWriter<W>
where
    W: AsyncWrite + Send + Unpin,
{
    /// Creates a writer that emits `header` before the first block.
    pub fn new(header: CarHeader, writer: W) -> Self {
        CarWriter {
            header,
            writer,
            cid_buffer: Vec::new(),
            is_header_written: false,
        }
    }

    /// Writes the header if needed, then one block section.
    pub async fn write<T>(&mut self, cid: Cid, data: T) -> Result<(), Error>
    where
        T: AsRef<[u8]>,
    {
        if !self.is_header_written {
            self.write_header().await?;
        }

        self.cid_buffer.clear();
        cid.write_bytes(&mut self.cid_buffer)
            .context(InvalidCidSnafu)?;

        let data = data.as_ref();
        let len = self.cid_buffer.len() + data.len();

        self.writer.write_all(&len.encode_var_vec()).await?;
        self.writer.write_all(&self.cid_buffer).await?;
        self.writer.write_all(data).await?;

        Ok(())
    }

    async fn write_header(&mut self) -> Result<(), Error> {
        let header_bytes = self.header.encode()?;
        self.writer
            .write_all(&header_bytes.len().encode_var_vec())
            .await?;
        self.writer.write_all(&header_bytes).await?;
        self.is_header_written = true;
        Ok(())
    }

    /// Finishes writing, including flushing and returns the writer.
    ///
    /// A CAR with no blocks still gets its header.
    pub async fn finish(mut self) -> Result<W, Error> {
        if !self.is_header_written {
            self.write_header().await?;
        }
        self.writer.flush().await?;
        Ok(self.writer)
    }
}
