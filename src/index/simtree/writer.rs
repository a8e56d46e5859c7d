//! Depth-first page writer
//!
//! A tree is written as one page: payloads first, then the contiguous run
//! of records, then (for [`ColumnWriter`]) the page table entry. Nothing
//! already on disk is rewritten.

use super::encoding::{encode_payload, NodeRecord, Terminator, NO_POSTING, RECORD_SIZE};
use super::node::VectorNode;
use super::page_index::{Page, PageIndexWriter};
use crate::config::Durability;
use crate::error::{IndexError, Result};
use crate::storage::{open_append, ColumnFiles};
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::debug;

/// Serializes trees onto an index stream and a payload stream
pub struct TreeSerializer<I: Write, P: Write> {
    index: I,
    index_pos: u64,
    payload: P,
    payload_pos: u64,
}

impl<I: Write, P: Write> TreeSerializer<I, P> {
    /// `index_pos` / `payload_pos` are the current lengths of the streams.
    pub fn new(index: I, index_pos: u64, payload: P, payload_pos: u64) -> Self {
        Self {
            index,
            index_pos,
            payload,
            payload_pos,
        }
    }

    /// Write the tree under `root` as one page and flush both streams.
    ///
    /// An empty tree writes nothing and returns `None`.
    pub fn write(&mut self, root: &VectorNode) -> Result<Option<Page>> {
        let first = match root.left() {
            Some(first) => first,
            None => return Ok(None),
        };

        let mut records = Vec::new();
        let mut payload = Vec::new();
        emit_tree(first, self.payload_pos, &mut records, &mut payload)?;

        let length = records
            .len()
            .checked_mul(RECORD_SIZE)
            .filter(|len| *len <= i32::MAX as usize)
            .ok_or_else(|| {
                IndexError::InvalidArgument(format!(
                    "page of {} records does not fit a 32-bit length",
                    records.len()
                ))
            })?;
        let offset = i64::try_from(self.index_pos)
            .map_err(|_| IndexError::InvalidArgument("index stream too large".into()))?;

        let mut bytes = Vec::with_capacity(length);
        for record in &records {
            bytes.extend_from_slice(&record.encode());
        }

        self.payload.write_all(&payload)?;
        self.index.write_all(&bytes)?;
        self.payload_pos += payload.len() as u64;
        self.index_pos += length as u64;
        self.flush()?;

        Ok(Some(Page {
            offset,
            length: length as i32,
        }))
    }

    fn flush(&mut self) -> Result<()> {
        self.payload.flush()?;
        self.index.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> (&I, &P) {
        (&self.index, &self.payload)
    }

    pub fn into_inner(self) -> (I, P) {
        (self.index, self.payload)
    }
}

/// Emit the tree in pre-order: node, left subtree, then sibling chain.
///
/// Walks with an explicit stack; a `Close` frame sits under a node's left
/// subtree and patches its `subtree_size` once that subtree is out.
fn emit_tree(
    first: &VectorNode,
    payload_base: u64,
    records: &mut Vec<NodeRecord>,
    payload: &mut Vec<u8>,
) -> Result<()> {
    enum Frame<'a> {
        Visit(&'a VectorNode),
        Close(usize),
    }

    let mut stack = vec![Frame::Visit(first)];
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Visit(node) => {
                let payload_offset = i64::try_from(payload_base + payload.len() as u64)
                    .map_err(|_| IndexError::InvalidArgument("payload stream too large".into()))?;
                let payload_len = i32::try_from(encode_payload(node, payload))
                    .map_err(|_| IndexError::InvalidArgument("vector payload too large".into()))?;

                let idx = records.len();
                records.push(NodeRecord {
                    posting_ref: node.posting_refs().first().copied().unwrap_or(NO_POSTING),
                    payload_offset,
                    payload_len,
                    subtree_size: 0,
                    terminator: Terminator::from_links(node.has_child(), node.has_sibling()),
                });

                if let Some(sibling) = node.sibling() {
                    stack.push(Frame::Visit(sibling));
                }
                if let Some(left) = node.left() {
                    stack.push(Frame::Close(idx));
                    stack.push(Frame::Visit(left));
                }
            }
            Frame::Close(idx) => {
                let below = records.len() - idx - 1;
                records[idx].subtree_size = i32::try_from(below)
                    .map_err(|_| IndexError::InvalidArgument(format!("subtree of {} nodes", below)))?;
            }
        }
    }
    Ok(())
}

/// File-backed writer for one column: appends pages and publishes them
pub struct ColumnWriter {
    serializer: TreeSerializer<BufWriter<File>, BufWriter<File>>,
    pages: PageIndexWriter,
    durability: Durability,
}

impl ColumnWriter {
    pub fn open(files: &ColumnFiles, durability: Durability) -> Result<Self> {
        let (index, index_pos) = open_append(&files.index)?;
        let (payload, payload_pos) = open_append(&files.payload)?;
        let pages = PageIndexWriter::open(&files.page_index, durability)?;

        Ok(Self {
            serializer: TreeSerializer::new(index, index_pos, payload, payload_pos),
            pages,
            durability,
        })
    }

    /// Serialize `root` as a new page and publish it.
    ///
    /// Records and payloads reach the file (and disk, when synchronous)
    /// before the page table entry does.
    pub fn write_page(&mut self, root: &VectorNode) -> Result<Option<Page>> {
        let page = match self.serializer.write(root)? {
            Some(page) => page,
            None => return Ok(None),
        };
        if self.durability.requires_sync() {
            let (index, payload) = self.serializer.get_ref();
            payload.get_ref().sync_all()?;
            index.get_ref().sync_all()?;
        }
        self.pages.append(page)?;

        debug!(offset = page.offset, length = page.length, "published page");
        Ok(Some(page))
    }
}
