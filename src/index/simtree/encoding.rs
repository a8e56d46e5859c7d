//! Node record layout and page decoding
//!
//! ## Record (`.ix`, 25 bytes, little-endian)
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ posting_ref     u64   (u64::MAX = none)  │
//! │ payload_offset  i64   (in .vec)          │
//! │ payload_len     i32   (vector bytes)     │
//! │ subtree_size    i32   (left subtree)     │
//! │ terminator      u8                       │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Records of a page are in depth-first order: a node, then its left
//! subtree, then its sibling chain. `subtree_size` lets a reader jump
//! straight to the sibling without decoding the left subtree.
//!
//! ## Payload (`.vec`)
//!
//! ```text
//! vector: (u16 dim, u8 weight) × n      ← payload_len bytes
//! weight: u32                           ← node annex
//! extra:  u32 count, then u64 × count   ← posting refs after the first
//! ```

use super::node::VectorNode;
use super::page_index::Page;
use crate::error::{IndexError, Result};
use crate::types::{PostingRef, Vector};

pub const RECORD_SIZE: usize = 25;

/// `posting_ref` of a node without postings
pub const NO_POSTING: u64 = u64::MAX;

const ANNEX_HEADER_SIZE: usize = 8;

/// Which links follow a record
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Both = 0,
    ChildOnly = 1,
    SiblingOnly = 2,
    Leaf = 3,
}

impl Terminator {
    pub fn from_links(has_child: bool, has_sibling: bool) -> Self {
        match (has_child, has_sibling) {
            (true, true) => Terminator::Both,
            (true, false) => Terminator::ChildOnly,
            (false, true) => Terminator::SiblingOnly,
            (false, false) => Terminator::Leaf,
        }
    }

    pub fn has_child(self) -> bool {
        matches!(self, Terminator::Both | Terminator::ChildOnly)
    }

    pub fn has_sibling(self) -> bool {
        matches!(self, Terminator::Both | Terminator::SiblingOnly)
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Terminator::Both),
            1 => Ok(Terminator::ChildOnly),
            2 => Ok(Terminator::SiblingOnly),
            3 => Ok(Terminator::Leaf),
            other => Err(IndexError::corruption(format!("invalid terminator {}", other))),
        }
    }
}

/// Fixed-size index record of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    pub posting_ref: u64,
    pub payload_offset: i64,
    pub payload_len: i32,
    pub subtree_size: i32,
    pub terminator: Terminator,
}

impl NodeRecord {
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.posting_ref.to_le_bytes());
        buf[8..16].copy_from_slice(&self.payload_offset.to_le_bytes());
        buf[16..20].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[20..24].copy_from_slice(&self.subtree_size.to_le_bytes());
        buf[24] = self.terminator as u8;
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RECORD_SIZE {
            return Err(IndexError::corruption(format!(
                "record is {} bytes, expected {}",
                bytes.len(),
                RECORD_SIZE
            )));
        }
        let record = NodeRecord {
            posting_ref: u64::from_le_bytes(le_array(&bytes[0..8])),
            payload_offset: i64::from_le_bytes(le_array(&bytes[8..16])),
            payload_len: i32::from_le_bytes(le_array(&bytes[16..20])),
            subtree_size: i32::from_le_bytes(le_array(&bytes[20..24])),
            terminator: Terminator::from_byte(bytes[24])?,
        };
        if record.payload_offset < 0 || record.payload_len < 0 || record.subtree_size < 0 {
            return Err(IndexError::corruption(format!(
                "negative field in record: offset {}, len {}, subtree {}",
                record.payload_offset, record.payload_len, record.subtree_size
            )));
        }
        Ok(record)
    }

    pub fn primary_posting(&self) -> Option<PostingRef> {
        (self.posting_ref != NO_POSTING).then_some(self.posting_ref)
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Append a node's payload (vector bytes, then annex) to `out`.
///
/// Returns the vector byte length, which is what `payload_len` records.
pub(crate) fn encode_payload(node: &VectorNode, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    node.vector.encode_into(out);
    let vector_len = out.len() - start;

    let extra = node.posting_refs().get(1..).unwrap_or(&[]);
    out.extend_from_slice(&node.weight.to_le_bytes());
    out.extend_from_slice(&(extra.len() as u32).to_le_bytes());
    for r in extra {
        out.extend_from_slice(&r.to_le_bytes());
    }
    vector_len
}

/// Bounds-checked view over a payload snapshot
#[derive(Debug, Clone, Copy)]
pub(crate) struct PayloadView<'a> {
    bytes: &'a [u8],
}

impl<'a> PayloadView<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn slice(&self, start: i64, len: usize) -> Result<&'a [u8]> {
        let start = usize::try_from(start)
            .map_err(|_| IndexError::corruption(format!("negative payload offset {}", start)))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                IndexError::corruption(format!(
                    "payload [{}, +{}) outside stream of {} bytes",
                    start,
                    len,
                    self.bytes.len()
                ))
            })?;
        Ok(&self.bytes[start..end])
    }

    pub(crate) fn vector(&self, record: &NodeRecord) -> Result<Vector> {
        Vector::decode(self.slice(record.payload_offset, record.payload_len as usize)?)
    }

    /// Weight and full posting-ref list (primary first).
    pub(crate) fn annex(&self, record: &NodeRecord) -> Result<(u32, Vec<PostingRef>)> {
        let start = record.payload_offset + i64::from(record.payload_len);
        let header = self.slice(start, ANNEX_HEADER_SIZE)?;
        let weight = u32::from_le_bytes(le_array(&header[0..4]));
        let count = u32::from_le_bytes(le_array(&header[4..8])) as usize;

        let extra_len = count
            .checked_mul(8)
            .ok_or_else(|| IndexError::corruption(format!("posting count {} overflows", count)))?;
        let extra = self.slice(start + ANNEX_HEADER_SIZE as i64, extra_len)?;

        let mut refs = Vec::with_capacity(count + 1);
        refs.extend(record.primary_posting());
        refs.extend(extra.chunks_exact(8).map(|c| u64::from_le_bytes(le_array(c))));
        Ok((weight, refs))
    }

    pub(crate) fn node(&self, record: &NodeRecord) -> Result<VectorNode> {
        let vector = self.vector(record)?;
        let (weight, refs) = self.annex(record)?;
        Ok(VectorNode::with_postings(vector, weight, refs))
    }
}

/// Sequential reader over the records of one page
#[derive(Debug, Clone)]
pub struct PageCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> PageCursor<'a> {
    /// Position at the first record of `page` inside an index snapshot.
    pub fn open(index: &'a [u8], page: Page) -> Result<Self> {
        if page.offset < 0 || page.length < 0 {
            return Err(IndexError::corruption(format!(
                "negative page: offset {}, length {}",
                page.offset, page.length
            )));
        }
        let (start, end) = (page.offset as u64, page.end() as u64);
        if end > index.len() as u64 {
            return Err(IndexError::MissingPage {
                offset: page.offset,
                length: page.length,
            });
        }
        Ok(Self {
            bytes: index,
            pos: start as usize,
            end: end as usize,
        })
    }

    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.end
    }

    /// Next record, or `None` exactly at the page end.
    pub fn next_record(&mut self) -> Result<Option<NodeRecord>> {
        if self.is_exhausted() {
            return Ok(None);
        }
        if self.remaining() < RECORD_SIZE {
            return Err(IndexError::corruption(format!(
                "truncated record at {}: {} bytes left in page",
                self.pos,
                self.remaining()
            )));
        }
        let record = NodeRecord::decode(&self.bytes[self.pos..self.pos + RECORD_SIZE])?;
        self.pos += RECORD_SIZE;
        Ok(Some(record))
    }

    /// Next record where a terminator promised one.
    pub fn expect_record(&mut self) -> Result<NodeRecord> {
        let pos = self.pos;
        self.next_record()?.ok_or_else(|| {
            IndexError::corruption(format!("linked record at {} is past the page end", pos))
        })
    }

    /// Jump over `records` records without decoding them.
    pub fn skip(&mut self, records: i32) -> Result<()> {
        let bytes = usize::try_from(records)
            .ok()
            .and_then(|n| n.checked_mul(RECORD_SIZE))
            .filter(|bytes| *bytes <= self.remaining())
            .ok_or_else(|| {
                IndexError::corruption(format!(
                    "skip of {} records from {} leaves the page",
                    records, self.pos
                ))
            })?;
        self.pos += bytes;
        Ok(())
    }

    /// Consume one subtree record by record, following terminators.
    ///
    /// Returns the number of records consumed.
    pub fn walk_subtree(&mut self) -> Result<usize> {
        let mut open = 1usize;
        let mut consumed = 0usize;
        while open > 0 {
            let record = self.expect_record()?;
            consumed += 1;
            open -= 1;
            if record.terminator.has_child() {
                open += 1;
            }
            if record.terminator.has_sibling() {
                open += 1;
            }
        }
        Ok(consumed)
    }
}

/// Decode one page back into a tree (root sentinel + decoded nodes).
///
/// Stored subtree sizes are checked against what was actually decoded.
/// The walk keeps its own stack, so page depth is bounded by memory only.
pub fn decode_page(index: &[u8], payload: &[u8], page: Page) -> Result<VectorNode> {
    enum Frame {
        /// Read the next record and link it from `parent`
        Expect(Option<(usize, Link)>),
        /// Left subtree of record `idx` is complete
        Close(usize),
    }
    #[derive(Clone, Copy)]
    enum Link {
        Left,
        Sibling,
    }

    let mut cursor = PageCursor::open(index, page)?;
    let payload = PayloadView::new(payload);
    let mut root = VectorNode::root();
    if cursor.is_exhausted() {
        return Ok(root);
    }

    let mut nodes: Vec<Option<VectorNode>> = Vec::new();
    let mut sizes: Vec<i32> = Vec::new();
    let mut left_of: Vec<Option<usize>> = Vec::new();
    let mut sibling_of: Vec<Option<usize>> = Vec::new();
    let mut stack = vec![Frame::Expect(None)];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Expect(parent) => {
                let record = cursor.expect_record()?;
                let idx = nodes.len();
                nodes.push(Some(payload.node(&record)?));
                sizes.push(record.subtree_size);
                left_of.push(None);
                sibling_of.push(None);

                match parent {
                    Some((p, Link::Left)) => left_of[p] = Some(idx),
                    Some((p, Link::Sibling)) => sibling_of[p] = Some(idx),
                    None => {}
                }

                if record.terminator.has_sibling() {
                    stack.push(Frame::Expect(Some((idx, Link::Sibling))));
                }
                if record.terminator.has_child() {
                    stack.push(Frame::Close(idx));
                    stack.push(Frame::Expect(Some((idx, Link::Left))));
                } else if record.subtree_size != 0 {
                    return Err(IndexError::corruption(format!(
                        "childless record with subtree size {}",
                        record.subtree_size
                    )));
                }
            }
            Frame::Close(idx) => {
                let below = nodes.len() - idx - 1;
                if below != sizes[idx] as usize {
                    return Err(IndexError::corruption(format!(
                        "subtree size {} does not match {} decoded records",
                        sizes[idx], below
                    )));
                }
            }
        }
    }

    if !cursor.is_exhausted() {
        return Err(IndexError::corruption(format!(
            "{} trailing bytes after tree in page at {}",
            cursor.remaining(),
            page.offset
        )));
    }

    // links always point forward in pre-order: build from the back
    let mut built: Vec<Option<Box<VectorNode>>> = Vec::with_capacity(nodes.len());
    built.resize_with(nodes.len(), || None);
    for idx in (0..nodes.len()).rev() {
        let mut node = nodes[idx]
            .take()
            .ok_or_else(|| IndexError::corruption("record decoded twice"))?;
        node.left = left_of[idx].and_then(|i| built[i].take());
        node.sibling = sibling_of[idx].and_then(|i| built[i].take());
        built[idx] = Some(Box::new(node));
    }
    root.left = built.first_mut().and_then(Option::take);
    Ok(root)
}
