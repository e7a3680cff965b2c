//! Fixtures for unit tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use cid::{Cid, multihash::Multihash};
use futures_util::{StreamExt, stream};
use integer_encoding::VarInt;
use ipld_core::ipld::Ipld;
use prost::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    car::CarHeader,
    codec::{Codec, HashCode},
    fetch::{FetchError, FetchRequest, FetchResponse, Fetcher},
    node::Node,
    unixfs::{Data, DataType, HAMT_MURMUR3, HashBits, PbBlock, PbLink, PbNode},
};

/// CIDv1 with a sha2-256 multihash.
pub(crate) fn cid_of(codec: Codec, bytes: &[u8]) -> Cid {
    let digest = HashCode::Sha2_256.digest(bytes);
    Cid::new_v1(codec.into(), Multihash::wrap(HashCode::Sha2_256.into(), &digest).unwrap())
}

/// CIDv1 carrying `bytes` inline.
pub(crate) fn identity_cid(codec: Codec, bytes: &[u8]) -> Cid {
    Cid::new_v1(codec.into(), Multihash::wrap(HashCode::Identity.into(), bytes).unwrap())
}

pub(crate) fn node(url: &str, weight: f64, distance: f64) -> Node {
    Node {
        id: Some(url.to_string()),
        ip: String::new(),
        weight,
        distance,
        url: url.to_string(),
    }
}

fn pb_link(cid: Cid, name: &str, tsize: u64) -> PbLink {
    PbLink {
        hash: Some(cid.to_bytes()),
        name: Some(name.to_string()),
        tsize: Some(tsize),
    }
}

/// An in memory block store for building DAGs.
#[derive(Debug, Default)]
pub(crate) struct Dag {
    blocks: HashMap<Cid, Bytes>,
}

impl Dag {
    pub(crate) fn put(&mut self, codec: Codec, data: impl Into<Bytes>) -> Cid {
        let data = data.into();
        let cid = cid_of(codec, &data);
        self.blocks.insert(cid, data);
        cid
    }

    pub(crate) fn get(&self, cid: &Cid) -> Bytes {
        self.blocks[cid].clone()
    }

    /// Replaces the bytes stored for `cid` without changing the CID.
    pub(crate) fn tamper(&mut self, cid: &Cid, data: &'static [u8]) {
        self.blocks.insert(*cid, Bytes::from_static(data));
    }

    pub(crate) fn raw(&mut self, data: &[u8]) -> Cid {
        self.put(Codec::Raw, data.to_vec())
    }

    pub(crate) fn pb(&mut self, data: Data, links: Vec<PbLink>) -> Cid {
        let node = PbNode {
            data: Some(data.encode_to_vec().into()),
            links,
        };
        self.put(Codec::DagPb, node.encode_to_vec())
    }

    /// A UnixFS file node with all content inline.
    pub(crate) fn inline_file(&mut self, content: &[u8]) -> Cid {
        self.pb(
            Data {
                r#type: DataType::File as i32,
                data: Some(Bytes::copy_from_slice(content)),
                filesize: Some(content.len() as u64),
                ..Default::default()
            },
            vec![],
        )
    }

    /// A file of raw leaves of `chunk` bytes under one root.
    pub(crate) fn file(&mut self, content: &[u8], chunk: usize) -> Cid {
        self.file_tree(content, chunk, usize::MAX)
    }

    /// A file of raw leaves, with at most `width` links per node.
    pub(crate) fn file_tree(&mut self, content: &[u8], chunk: usize, width: usize) -> Cid {
        let mut level: Vec<(Cid, u64)> = content
            .chunks(chunk)
            .map(|c| (self.raw(c), c.len() as u64))
            .collect();
        loop {
            let groups: Vec<Vec<(Cid, u64)>> =
                level.chunks(width.max(2)).map(|g| g.to_vec()).collect();
            let parents: Vec<(Cid, u64)> = groups
                .into_iter()
                .map(|group| {
                    let size: u64 = group.iter().map(|(_, s)| s).sum();
                    let data = Data {
                        r#type: DataType::File as i32,
                        filesize: Some(size),
                        blocksizes: group.iter().map(|(_, s)| *s).collect(),
                        ..Default::default()
                    };
                    let links = group.iter().map(|(c, s)| pb_link(*c, "", *s)).collect();
                    (self.pb(data, links), size)
                })
                .collect();
            if parents.len() <= 1 {
                return match parents.first() {
                    Some((cid, _)) => *cid,
                    None => self.inline_file(b""),
                };
            }
            level = parents;
        }
    }

    pub(crate) fn directory(&mut self, entries: &[(&str, Cid)]) -> Cid {
        let links = entries
            .iter()
            .map(|(name, cid)| pb_link(*cid, name, 0))
            .collect();
        self.pb(
            Data {
                r#type: DataType::Directory as i32,
                ..Default::default()
            },
            links,
        )
    }

    /// A HAMT sharded directory with fanout 256.
    pub(crate) fn hamt(&mut self, entries: &[(&str, Cid)]) -> Cid {
        let entries = entries
            .iter()
            .map(|(name, cid)| (name.to_string(), *cid, HashBits::new(name)))
            .collect();
        self.hamt_level(entries)
    }

    fn hamt_level(&mut self, entries: Vec<(String, Cid, HashBits)>) -> Cid {
        let mut buckets: BTreeMap<u32, Vec<(String, Cid, HashBits)>> = BTreeMap::new();
        for (name, cid, mut bits) in entries {
            let idx = bits.next(8).expect("hash exhausted");
            buckets.entry(idx).or_default().push((name, cid, bits));
        }
        let mut bitfield = [0u8; 32];
        let mut links = Vec::new();
        for (idx, mut bucket) in buckets {
            bitfield[31 - idx as usize / 8] |= 1 << (idx % 8);
            if bucket.len() == 1 {
                let (name, cid, _) = bucket.remove(0);
                links.push(pb_link(cid, &format!("{idx:02X}{name}"), 0));
            } else {
                let child = self.hamt_level(bucket);
                links.push(pb_link(child, &format!("{idx:02X}"), 0));
            }
        }
        self.pb(
            Data {
                r#type: DataType::HamtShard as i32,
                data: Some(Bytes::copy_from_slice(&bitfield)),
                hash_type: Some(HAMT_MURMUR3),
                fanout: Some(256),
                ..Default::default()
            },
            links,
        )
    }

    pub(crate) fn ipld(&mut self, codec: Codec, value: &Ipld) -> Cid {
        let bytes = match codec {
            Codec::DagCbor => serde_ipld_dagcbor::to_vec(value).unwrap(),
            Codec::DagJson => serde_ipld_dagjson::to_vec(value).unwrap(),
            Codec::Json => serde_json::to_vec(value).unwrap(),
            other => panic!("not an ipld codec: {other}"),
        };
        self.put(codec, bytes)
    }

    /// All blocks below `root` in depth first order, without identity blocks.
    pub(crate) fn dfs(&self, root: Cid) -> Vec<Cid> {
        let mut out = Vec::new();
        self.dfs_into(root, &mut out);
        out
    }

    fn dfs_into(&self, cid: Cid, out: &mut Vec<Cid>) {
        if cid.hash().code() == u64::from(HashCode::Identity) {
            return;
        }
        out.push(cid);
        let data = self.get(&cid);
        let children: Vec<Cid> = match Codec::try_from(cid.codec()) {
            Ok(Codec::DagPb) => PbBlock::decode(data)
                .unwrap()
                .links
                .into_iter()
                .map(|l| l.cid)
                .collect(),
            Ok(Codec::DagCbor) => ipld_links(&serde_ipld_dagcbor::from_slice(&data).unwrap()),
            Ok(Codec::DagJson) => ipld_links(&serde_ipld_dagjson::from_slice(&data).unwrap()),
            _ => Vec::new(),
        };
        for child in children {
            self.dfs_into(child, out);
        }
    }

    /// A CARv1 stream with `root` in its header and `blocks` in the given order.
    pub(crate) fn car(&self, root: Cid, blocks: &[Cid]) -> Bytes {
        let header = CarHeader::new_v1(vec![root]).encode().unwrap();
        let mut out = header.len().encode_var_vec();
        out.extend_from_slice(&header);
        for cid in blocks {
            let cid_bytes = cid.to_bytes();
            let data = self.get(cid);
            out.extend((cid_bytes.len() + data.len()).encode_var_vec());
            out.extend_from_slice(&cid_bytes);
            out.extend_from_slice(&data);
        }
        out.into()
    }

    /// A CAR of the whole DAG below `root`.
    pub(crate) fn car_of(&self, root: Cid) -> Bytes {
        self.car(root, &self.dfs(root))
    }
}

fn ipld_links(value: &Ipld) -> Vec<Cid> {
    match value {
        Ipld::Link(cid) => vec![*cid],
        Ipld::List(items) => items.iter().flat_map(ipld_links).collect(),
        Ipld::Map(map) => map.values().flat_map(ipld_links).collect(),
        _ => Vec::new(),
    }
}

/// How a scripted node answers.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// The full body.
    Body(Bytes),
    /// The first `after` bytes of the body, then a transport error.
    Broken { body: Bytes, after: usize },
    /// An error status.
    Status(u16),
    /// Never answers until cancelled.
    Hang,
    /// Answers after a delay.
    Delayed(Duration, Box<Reply>),
}

/// A [`Fetcher`] answering per host from a script.
#[derive(Debug)]
pub(crate) struct ScriptedFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<FetchRequest>>,
    chunk: usize,
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        ScriptedFetcher {
            replies: Default::default(),
            calls: Default::default(),
            chunk: 16,
        }
    }
}

impl ScriptedFetcher {
    pub(crate) fn reply(self, host: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(host.to_string(), reply);
        self
    }

    pub(crate) fn set_reply(&self, host: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert(host.to_string(), reply);
    }

    /// Hosts in the order they were asked.
    pub(crate) fn hosts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.host_str().unwrap_or_default().to_string())
            .collect()
    }

    pub(crate) fn urls(&self) -> Vec<Url> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }

    pub(crate) fn tokens(&self) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.token.clone())
            .collect()
    }

    /// Whether the request to `host` was cancelled.
    pub(crate) fn was_cancelled(&self, host: &str) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.host_str() == Some(host))
            .any(|r| r.cancel.is_cancelled())
    }

    fn body(&self, bytes: Bytes, fail_at: Option<usize>) -> FetchResponse {
        let len = fail_at.unwrap_or(bytes.len()).min(bytes.len());
        let mut chunks: Vec<Result<Bytes, FetchError>> = Vec::new();
        let mut pos = 0;
        while pos < len {
            let end = (pos + self.chunk).min(len);
            chunks.push(Ok(bytes.slice(pos..end)));
            pos = end;
        }
        if fail_at.is_some() {
            chunks.push(Err(FetchError::other("connection reset")));
        }
        let mut response = FetchResponse::new(stream::iter(chunks).boxed());
        response.content_length = Some(bytes.len() as u64);
        response
    }
}

async fn wait_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), FetchError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(FetchError::cancelled()),
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.calls.lock().unwrap().push(request.clone());
        let host = request.url.host_str().unwrap_or_default().to_string();
        let mut reply = self
            .replies
            .lock()
            .unwrap()
            .get(&host)
            .cloned()
            .unwrap_or(Reply::Status(404));
        loop {
            match reply {
                Reply::Body(bytes) => return Ok(self.body(bytes, None)),
                Reply::Broken { body, after } => return Ok(self.body(body, Some(after))),
                Reply::Status(status) => return Err(FetchError::status(status)),
                Reply::Hang => {
                    request.cancel.cancelled().await;
                    return Err(FetchError::cancelled());
                }
                Reply::Delayed(delay, next) => {
                    wait_or_cancel(delay, &request.cancel).await?;
                    reply = *next;
                }
            }
        }
    }
}
