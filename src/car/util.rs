use std::io::Cursor;

use cid::Cid;
use integer_encoding::VarInt;
use snafu::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{Error, InvalidCidSnafu, LdReadTooLargeSnafu, ParsingSnafu};
use crate::verify;

/// Maximum size of a single section.
pub(crate) const MAX_ALLOC: usize = 4 * 1024 * 1024;

/// Largest digest the `cid` crate can hold.
///
/// `Cid` stores its multihash as `Multihash<64>`, so a section whose CID carries a longer
/// digest cannot be parsed at all. Such a digest fails as `Parsing` even when its hash
/// function is supported.
const CID_DIGEST_CAPACITY: usize = 64;

/// Longest varint encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

/// Reads one length prefixed section into `buf`.
///
/// Returns `None` on a clean end of stream before the length prefix.
pub(crate) async fn ld_read<R>(mut reader: R, buf: &mut Vec<u8>) -> Result<Option<&[u8]>, Error>
where
    R: AsyncRead + Send + Unpin,
{
    let Some(length) = read_length(&mut reader).await? else {
        return Ok(None);
    };

    snafu::ensure!(length <= MAX_ALLOC, LdReadTooLargeSnafu { len: length });
    if length > buf.len() {
        buf.resize(length, 0);
    }

    reader.read_exact(&mut buf[..length]).await.map_err(|e| {
        ParsingSnafu {
            message: format!("truncated section: {e}"),
        }
        .build()
    })?;

    Ok(Some(&buf[..length]))
}

/// Reads an unsigned varint one byte at a time.
///
/// Returns `None` on end of stream before the first byte.
async fn read_length<R>(reader: &mut R) -> Result<Option<usize>, Error>
where
    R: AsyncRead + Send + Unpin,
{
    let mut prefix = [0u8; MAX_VARINT_LEN];
    let mut read = 0;
    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && read == 0 => {
                return Ok(None);
            }
            Err(e) => {
                return ParsingSnafu {
                    message: format!("truncated length prefix: {e}"),
                }
                .fail();
            }
        };
        prefix[read] = byte;
        read += 1;
        if byte & 0x80 == 0 {
            break;
        }
        snafu::ensure!(
            read < MAX_VARINT_LEN,
            ParsingSnafu {
                message: "length prefix is too long"
            }
        );
    }
    let (length, _) = usize::decode_var(&prefix[..read]).ok_or_else(|| {
        ParsingSnafu {
            message: "invalid length prefix",
        }
        .build()
    })?;
    Ok(Some(length))
}

/// Reads the next `CID ++ bytes` section.
pub(crate) async fn read_node<R>(
    buf_reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<Option<(Cid, Vec<u8>)>, Error>
where
    R: AsyncRead + Send + Unpin,
{
    if let Some(buf) = ld_read(buf_reader, buf).await? {
        check_oversized_digest(buf)?;
        let mut cursor = Cursor::new(buf);
        let c = Cid::read_bytes(&mut cursor).context(InvalidCidSnafu)?;
        let pos = cursor.position() as usize;

        return Ok(Some((c, buf[pos..].to_vec())));
    }
    Ok(None)
}

/// Rejects sections whose CID carries a digest too large to be parsed.
///
/// These fail with the same error a verifier would give for the CID.
fn check_oversized_digest(section: &[u8]) -> Result<(), Error> {
    // CIDv0 is a bare sha2-256 multihash.
    if section.starts_with(&[0x12, 0x20]) {
        return Ok(());
    }
    let Some((codec, hash_code, len)) = cid_prefix(section) else {
        return Ok(());
    };
    if len > CID_DIGEST_CAPACITY {
        verify::check_format(codec, hash_code, len)?;
        return ParsingSnafu {
            message: format!("digest of {len} bytes is too long to be parsed"),
        }
        .fail();
    }
    Ok(())
}

/// Parses `version, codec, hash code, digest length` from a CIDv1 prefix.
fn cid_prefix(section: &[u8]) -> Option<(u64, u64, usize)> {
    let mut pos = 0;
    let mut next = || {
        let (value, read) = u64::decode_var(&section[pos..])?;
        pos += read;
        Some(value)
    };
    let _version = next()?;
    let codec = next()?;
    let hash_code = next()?;
    let len = next()?;
    Some((codec, hash_code, usize::try_from(len).ok()?))
}
