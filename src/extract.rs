//! Resolving a content path through verified blocks and streaming the bytes it names.
//!
//! Blocks are pulled from a [`BlockSource`] in the order a depth-first traversal needs them:
//! first the blocks along the path, then the blocks of the entity itself. For UnixFS files
//! that is the file root followed by its leaves in order; all of them are read, even those
//! before the start of a requested range.

use std::collections::VecDeque;

use bytes::Bytes;
use cid::Cid;
use futures_util::Stream;
use ipld_core::ipld::Ipld;
use nested_enum_utils::common_fields;
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use tokio::io::AsyncRead;
use tracing::{debug, trace};

use crate::{
    codec::Codec,
    path::ContentPath,
    range::{ContentRange, RangeError, RangeSlicer},
    source::{BlockError, BlockSource},
    unixfs::{DataType, HashBits, PbBlock, ShardStep, UnixfsError, UnixfsNode},
};

/// Errors from extracting content.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ExtractError {
    #[snafu(transparent)]
    Block { source: BlockError },
    #[snafu(transparent)]
    Unixfs { source: UnixfsError },
    #[snafu(display("no entry {segment:?} below {cid}"))]
    PathNotFound { cid: Cid, segment: String },
    #[snafu(display("range does not fit the content"))]
    InvalidRange { source: RangeError },
    #[snafu(display("{codec} codec failed on block {cid}: {message}"))]
    IpldCodec {
        codec: Codec,
        cid: Cid,
        message: String,
    },
    #[snafu(display("cannot read {what}"))]
    Unsupported { what: String },
}

/// What a path resolved to.
#[derive(Debug)]
enum Entity {
    /// Bytes known in full once the path is resolved.
    Bytes(Bytes),
    /// A UnixFS file whose content still needs to be read.
    File(UnixfsNode),
}

impl Entity {
    fn size(&self) -> u64 {
        match self {
            Entity::Bytes(bytes) => bytes.len() as u64,
            Entity::File(node) => node.filesize(),
        }
    }
}

enum Step {
    Done(Entity),
    Next(Cid),
}

/// Streams the bytes named by `path`, restricted to `range`.
///
/// The stream ends after the last byte of the range; remaining blocks are not read.
pub fn extract<R>(
    path: ContentPath,
    mut source: BlockSource<R>,
    range: Option<ContentRange>,
) -> impl Stream<Item = Result<Bytes, ExtractError>> + Send + 'static
where
    R: AsyncRead + Send + Unpin + 'static,
{
    async_stream::try_stream! {
        let entity = resolve(&path, &mut source).await?;
        let mut slicer = match range {
            Some(range) => RangeSlicer::new(range.normalize(entity.size()).context(InvalidRangeSnafu)?),
            None => RangeSlicer::full(),
        };
        match entity {
            Entity::Bytes(bytes) => {
                if let Some(chunk) = slicer.slice(bytes) {
                    yield chunk;
                }
            }
            Entity::File(root) => {
                let mut pending: Vec<VecDeque<Cid>> = Vec::new();
                let mut node = root;
                loop {
                    if let Some(chunk) = slicer.slice(node.data()) {
                        yield chunk;
                    }
                    if slicer.is_done() {
                        trace!("range complete");
                        break;
                    }
                    if !node.links().is_empty() {
                        pending.push(node.links().iter().map(|l| l.cid).collect());
                    }
                    let Some(next) = next_link(&mut pending) else {
                        break;
                    };
                    let data = source.get(&next).await?;
                    node = UnixfsNode::decode(&next, data)?;
                }
            }
        }
    }
}

/// Pops the next link of a depth-first walk.
fn next_link(pending: &mut Vec<VecDeque<Cid>>) -> Option<Cid> {
    while let Some(top) = pending.last_mut() {
        if let Some(cid) = top.pop_front() {
            return Some(cid);
        }
        pending.pop();
    }
    None
}

#[tracing::instrument(skip_all, fields(%path))]
async fn resolve<R>(path: &ContentPath, source: &mut BlockSource<R>) -> Result<Entity, ExtractError>
where
    R: AsyncRead + Send + Unpin,
{
    let mut segments: VecDeque<&str> = path.segments().iter().map(String::as_str).collect();
    let mut cid = *path.root();
    loop {
        let data = source.get(&cid).await?;
        let codec = Codec::try_from(cid.codec()).map_err(|code| {
            UnsupportedSnafu {
                what: format!("codec 0x{code:x}"),
            }
            .build()
        })?;
        let step = match codec {
            Codec::Raw => {
                if let Some(segment) = segments.front() {
                    return PathNotFoundSnafu {
                        cid,
                        segment: *segment,
                    }
                    .fail();
                }
                Step::Done(Entity::Bytes(data))
            }
            Codec::DagPb => resolve_pb(cid, data, &mut segments, source).await?,
            Codec::DagCbor | Codec::DagJson | Codec::Json => {
                resolve_ipld(codec, cid, data, &mut segments)?
            }
        };
        match step {
            Step::Done(entity) => return Ok(entity),
            Step::Next(next) => {
                debug!(from = %cid, to = %next, "following link");
                cid = next;
            }
        }
    }
}

async fn resolve_pb<R>(
    cid: Cid,
    data: Bytes,
    segments: &mut VecDeque<&str>,
    source: &mut BlockSource<R>,
) -> Result<Step, ExtractError>
where
    R: AsyncRead + Send + Unpin,
{
    let block = PbBlock::decode(data.clone())?;
    let Some(inner) = block.unixfs() else {
        // plain dag-pb, links are addressed by name
        let Some(segment) = segments.pop_front() else {
            return Ok(Step::Done(Entity::Bytes(data)));
        };
        let link = block
            .link_named(segment)
            .context(PathNotFoundSnafu { cid, segment })?;
        return Ok(Step::Next(link.cid));
    };

    let node = UnixfsNode::from_parts(block.links, inner)?;
    match node.kind() {
        DataType::Raw | DataType::File | DataType::Symlink => {
            if let Some(segment) = segments.front() {
                return PathNotFoundSnafu {
                    cid,
                    segment: *segment,
                }
                .fail();
            }
            if node.kind() == DataType::Symlink {
                return Ok(Step::Done(Entity::Bytes(node.data())));
            }
            Ok(Step::Done(Entity::File(node)))
        }
        DataType::Directory => {
            let Some(segment) = segments.pop_front() else {
                return Ok(Step::Done(Entity::Bytes(data)));
            };
            let link = node
                .links()
                .iter()
                .find(|link| link.name.as_deref() == Some(segment))
                .context(PathNotFoundSnafu { cid, segment })?;
            Ok(Step::Next(link.cid))
        }
        DataType::HamtShard => {
            let Some(segment) = segments.pop_front() else {
                return Ok(Step::Done(Entity::Bytes(data)));
            };
            let found = hamt_lookup(cid, node, segment, source).await?;
            Ok(Step::Next(found))
        }
        DataType::Metadata => UnsupportedSnafu {
            what: "UnixFS metadata nodes",
        }
        .fail(),
    }
}

async fn hamt_lookup<R>(
    mut shard_cid: Cid,
    mut shard: UnixfsNode,
    name: &str,
    source: &mut BlockSource<R>,
) -> Result<Cid, ExtractError>
where
    R: AsyncRead + Send + Unpin,
{
    let mut bits = HashBits::new(name);
    loop {
        match shard.hamt_step(name, &mut bits)? {
            ShardStep::Found(link) => return Ok(link.cid),
            ShardStep::Descend(link) => {
                let data = source.get(&link.cid).await?;
                shard = UnixfsNode::decode(&link.cid, data)?;
                shard_cid = link.cid;
            }
            ShardStep::Missing => {
                return PathNotFoundSnafu {
                    cid: shard_cid,
                    segment: name,
                }
                .fail();
            }
        }
    }
}

fn resolve_ipld(
    codec: Codec,
    cid: Cid,
    data: Bytes,
    segments: &mut VecDeque<&str>,
) -> Result<Step, ExtractError> {
    let mut current = decode_ipld(codec, cid, &data)?;
    let mut descended = false;
    loop {
        if let Ipld::Link(next) = &current {
            if descended || !segments.is_empty() {
                return Ok(Step::Next(*next));
            }
        }
        let Some(segment) = segments.pop_front() else {
            break;
        };
        current = take(current, segment).context(PathNotFoundSnafu { cid, segment })?;
        descended = true;
    }
    // re-encode if only part of the block was selected
    let bytes = if descended {
        encode_ipld(codec, cid, &current)?
    } else {
        data
    };
    Ok(Step::Done(Entity::Bytes(bytes)))
}

fn take(value: Ipld, segment: &str) -> Option<Ipld> {
    match value {
        Ipld::Map(mut map) => map.remove(segment),
        Ipld::List(mut list) => {
            let index: usize = segment.parse().ok()?;
            (index < list.len()).then(|| list.swap_remove(index))
        }
        _ => None,
    }
}

fn decode_ipld(codec: Codec, cid: Cid, data: &[u8]) -> Result<Ipld, ExtractError> {
    let res = match codec {
        Codec::DagCbor => serde_ipld_dagcbor::from_slice(data).map_err(|e| e.to_string()),
        Codec::DagJson => serde_ipld_dagjson::from_slice(data).map_err(|e| e.to_string()),
        Codec::Json => serde_json::from_slice(data).map_err(|e| e.to_string()),
        Codec::Raw | Codec::DagPb => Err("not an IPLD data model codec".to_string()),
    };
    res.map_err(|message| {
        IpldCodecSnafu {
            codec,
            cid,
            message,
        }
        .build()
    })
}

fn encode_ipld(codec: Codec, cid: Cid, value: &Ipld) -> Result<Bytes, ExtractError> {
    let res = match codec {
        Codec::DagCbor => serde_ipld_dagcbor::to_vec(value).map_err(|e| e.to_string()),
        Codec::DagJson => serde_ipld_dagjson::to_vec(value).map_err(|e| e.to_string()),
        Codec::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
        Codec::Raw | Codec::DagPb => Err("not an IPLD data model codec".to_string()),
    };
    res.map(Bytes::from).map_err(|message| {
        IpldCodecSnafu {
            codec,
            cid,
            message,
        }
        .build()
    })
}
