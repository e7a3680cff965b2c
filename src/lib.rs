//! Verified retrieval of content addressed data from a fleet of edge caches.
//!
//! A retrieval takes a content path (`CID[/segment]*`), asks one or more edge nodes for a
//! CAR stream of the addressed entity, verifies every block against the CID it was requested
//! under and streams the bytes of the entity back to the caller. Nodes are tried in ranked
//! order, optionally racing several at once, and bytes already handed to the caller are never
//! repeated when a later node takes over.
//!
//! The entry point is [`Client::retrieve`].

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]
#![cfg_attr(iroh_docsrs, feature(doc_auto_cfg))]

pub mod auth;
pub mod car;
pub mod client;
pub mod codec;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod node;
pub mod path;
pub mod range;
pub mod source;
pub mod store;
pub mod unixfs;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_utils;

pub use cid::Cid;

pub use self::{
    client::{Client, Mode, RetrieveError, RetrieveOptions},
    config::Config,
    node::{Node, NodeSelector},
    path::ContentPath,
    range::ContentRange,
};
