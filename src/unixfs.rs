//! DAG-PB blocks and the UnixFS nodes they carry.
//!
//! Only the parts needed to walk paths and read file content are decoded: link tables,
//! the UnixFS data type with its inline bytes, and the HAMT parameters of sharded
//! directories.

use bytes::Bytes;
use cid::Cid;
use nested_enum_utils::common_fields;
use prost::Message;
use snafu::{Backtrace, ResultExt, Snafu};

use crate::codec::Codec;

/// murmur3-x64-64, the only hash function used by UnixFS HAMT shards.
pub const HAMT_MURMUR3: u64 = 0x22;
/// Fanout of a HAMT shard that does not state one.
pub const DEFAULT_FANOUT: u64 = 256;
const HASH_BIT_LENGTH: usize = 8;

/// A link in a DAG-PB node.
#[derive(Clone, PartialEq, Message)]
pub struct PbLink {
    #[prost(bytes = "vec", optional, tag = "1")]
    #[allow(missing_docs)]
    pub hash: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    #[allow(missing_docs)]
    pub name: Option<String>,
    #[prost(uint64, optional, tag = "3")]
    #[allow(missing_docs)]
    pub tsize: Option<u64>,
}

/// A DAG-PB node as it is encoded.
#[derive(Clone, PartialEq, Message)]
pub struct PbNode {
    #[prost(bytes = "bytes", optional, tag = "1")]
    #[allow(missing_docs)]
    pub data: Option<Bytes>,
    #[prost(message, repeated, tag = "2")]
    #[allow(missing_docs)]
    pub links: Vec<PbLink>,
}

/// The UnixFS payload of a DAG-PB node.
#[derive(Clone, PartialEq, Message)]
pub struct Data {
    #[prost(enumeration = "DataType", required, tag = "1")]
    #[allow(missing_docs)]
    pub r#type: i32,
    #[prost(bytes = "bytes", optional, tag = "2")]
    #[allow(missing_docs)]
    pub data: Option<Bytes>,
    #[prost(uint64, optional, tag = "3")]
    #[allow(missing_docs)]
    pub filesize: Option<u64>,
    #[prost(uint64, repeated, packed = "false", tag = "4")]
    #[allow(missing_docs)]
    pub blocksizes: Vec<u64>,
    #[prost(uint64, optional, tag = "5")]
    #[allow(missing_docs)]
    pub hash_type: Option<u64>,
    #[prost(uint64, optional, tag = "6")]
    #[allow(missing_docs)]
    pub fanout: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum DataType {
    Raw = 0,
    Directory = 1,
    File = 2,
    Metadata = 3,
    Symlink = 4,
    HamtShard = 5,
}

/// Errors from decoding DAG-PB and UnixFS nodes.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum UnixfsError {
    #[snafu(display("invalid dag-pb block"))]
    InvalidPb { source: prost::DecodeError },
    #[snafu(display("dag-pb link without a hash"))]
    MissingLinkHash {},
    #[snafu(display("invalid CID in dag-pb link"))]
    InvalidLinkCid { source: cid::Error },
    #[snafu(display("block {cid} is not a UnixFS node"))]
    NotUnixfs { cid: Cid },
    #[snafu(display("unknown UnixFS data type {value}"))]
    InvalidType { value: i32 },
    #[snafu(display("invalid HAMT shard: {message}"))]
    InvalidShard { message: String },
}

/// A resolved DAG-PB link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Target of the link.
    pub cid: Cid,
    /// Name of the link, used for directory entries.
    pub name: Option<String>,
    /// Cumulative size of the target DAG.
    pub tsize: Option<u64>,
}

impl TryFrom<&PbLink> for Link {
    type Error = UnixfsError;

    fn try_from(link: &PbLink) -> Result<Self, Self::Error> {
        let hash = link.hash.as_deref().ok_or_else(|| MissingLinkHashSnafu.build())?;
        let cid = Cid::try_from(hash).context(InvalidLinkCidSnafu)?;
        Ok(Link {
            cid,
            name: link.name.clone(),
            tsize: link.tsize,
        })
    }
}

/// A decoded DAG-PB block, which may or may not carry UnixFS data.
#[derive(Debug, Clone, PartialEq)]
pub struct PbBlock {
    /// Links of the node in encoded order.
    pub links: Vec<Link>,
    /// The raw data field.
    pub data: Option<Bytes>,
}

impl PbBlock {
    /// Decodes a DAG-PB block.
    pub fn decode(bytes: Bytes) -> Result<Self, UnixfsError> {
        let node = PbNode::decode(bytes).context(InvalidPbSnafu)?;
        let links = node
            .links
            .iter()
            .map(Link::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PbBlock {
            links,
            data: node.data,
        })
    }

    /// The first link with the given name.
    pub fn link_named(&self, name: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|link| link.name.as_deref() == Some(name))
    }

    /// Interprets the data field as UnixFS, if it is one.
    pub fn unixfs(&self) -> Option<Data> {
        let data = self.data.clone()?;
        Data::decode(data).ok()
    }
}

/// A UnixFS node, from either a raw block or a DAG-PB block.
#[derive(Debug, Clone, PartialEq)]
pub struct UnixfsNode {
    kind: DataType,
    inner: Data,
    links: Vec<Link>,
}

impl UnixfsNode {
    /// Decodes the block `bytes` addressed by `cid`.
    ///
    /// Raw blocks are file leaves.
    pub fn decode(cid: &Cid, bytes: Bytes) -> Result<Self, UnixfsError> {
        if cid.codec() == u64::from(Codec::Raw) {
            let inner = Data {
                r#type: DataType::Raw as i32,
                filesize: Some(bytes.len() as u64),
                data: Some(bytes),
                ..Default::default()
            };
            return Ok(UnixfsNode {
                kind: DataType::Raw,
                inner,
                links: Vec::new(),
            });
        }
        let block = PbBlock::decode(bytes)?;
        let inner = block.unixfs().ok_or_else(|| NotUnixfsSnafu { cid: *cid }.build())?;
        Self::from_parts(block.links, inner)
    }

    /// Builds a node from already decoded parts.
    pub fn from_parts(links: Vec<Link>, inner: Data) -> Result<Self, UnixfsError> {
        let kind = DataType::try_from(inner.r#type).map_err(|_| {
            InvalidTypeSnafu {
                value: inner.r#type,
            }
            .build()
        })?;
        Ok(UnixfsNode { kind, inner, links })
    }

    /// The UnixFS type of the node.
    pub fn kind(&self) -> DataType {
        self.kind
    }

    /// Inline data carried by the node.
    pub fn data(&self) -> Bytes {
        self.inner.data.clone().unwrap_or_default()
    }

    /// Links in encoded order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Size of the file content below this node.
    pub fn filesize(&self) -> u64 {
        self.inner.filesize.unwrap_or_else(|| {
            let inline = self.inner.data.as_ref().map_or(0, |d| d.len() as u64);
            inline + self.inner.blocksizes.iter().sum::<u64>()
        })
    }

    /// Looks `name` up in this HAMT shard, consuming bits of `hash`.
    pub fn hamt_step(&self, name: &str, hash: &mut HashBits) -> Result<ShardStep, UnixfsError> {
        snafu::ensure!(
            self.kind == DataType::HamtShard,
            InvalidShardSnafu {
                message: "not a HAMT shard"
            }
        );
        snafu::ensure!(
            self.inner.hash_type == Some(HAMT_MURMUR3),
            InvalidShardSnafu {
                message: "only murmur3 is supported"
            }
        );
        let fanout = self.inner.fanout.unwrap_or(DEFAULT_FANOUT);
        snafu::ensure!(
            fanout > 1 && fanout.is_power_of_two(),
            InvalidShardSnafu {
                message: format!("invalid fanout {fanout}")
            }
        );
        let bit_width = fanout.trailing_zeros();
        let padding_len = format!("{:X}", fanout - 1).len();
        let bitfield = self.inner.data.as_deref().unwrap_or_default();

        let idx = hash.next(bit_width).ok_or_else(|| {
            InvalidShardSnafu {
                message: "max depth reached",
            }
            .build()
        })?;
        if !bit_is_set(bitfield, idx) {
            return Ok(ShardStep::Missing);
        }
        let link = self.links.get(index_for_bit_pos(bitfield, idx)).ok_or_else(|| {
            InvalidShardSnafu {
                message: "bitfield names a missing link",
            }
            .build()
        })?;
        let link_name = link.name.as_deref().unwrap_or_default();
        if link_name.len() == padding_len {
            return Ok(ShardStep::Descend(link.clone()));
        }
        match link_name.get(padding_len..) {
            Some(entry) if entry == name => Ok(ShardStep::Found(link.clone())),
            _ => Ok(ShardStep::Missing),
        }
    }
}

/// Result of one level of a HAMT lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardStep {
    /// The entry itself.
    Found(Link),
    /// A sub-shard to continue in.
    Descend(Link),
    /// No such entry.
    Missing,
}

/// The hash of a HAMT key, consumed most significant bits first.
#[derive(Debug, Clone)]
pub struct HashBits {
    hash: u64,
    consumed: u32,
}

impl HashBits {
    /// Hashes `key` the way UnixFS shards do.
    pub fn new(key: &str) -> Self {
        HashBits {
            hash: u64::from_be_bytes(hash_key(key.as_bytes())),
            consumed: 0,
        }
    }

    /// Takes the next `bits` bits, or `None` once the hash is used up.
    pub fn next(&mut self, bits: u32) -> Option<u32> {
        if bits == 0 || bits > 32 || self.consumed + bits > u64::BITS {
            return None;
        }
        let value = (self.hash << self.consumed) >> (u64::BITS - bits);
        self.consumed += bits;
        Some(value as u32)
    }
}

/// Hashes with murmur3 x64 and returns the first 64 bits, big endian.
pub fn hash_key(key: &[u8]) -> [u8; HASH_BIT_LENGTH] {
    let h1 = fastmurmur3::hash(key) as u64;
    h1.to_be_bytes()
}

/// Bit `idx` of a big endian bitfield, counted from the least significant bit.
fn bit_is_set(bitfield: &[u8], idx: u32) -> bool {
    let byte = idx as usize / 8;
    if byte >= bitfield.len() {
        return false;
    }
    bitfield[bitfield.len() - 1 - byte] & (1 << (idx % 8)) != 0
}

/// Number of set bits below `idx`, which is the position of its link.
fn index_for_bit_pos(bitfield: &[u8], idx: u32) -> usize {
    (0..idx).filter(|i| bit_is_set(bitfield, *i)).count()
}
