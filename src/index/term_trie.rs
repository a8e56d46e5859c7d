//! Term trie - char-keyed left-child / right-sibling prefix trie
//!
//! Exact-term and prefix lookup over a vocabulary. Same depth-first skip
//! layout as the similarity trie, keyed by character instead of angle:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ value         u32   (char code point)    │
//! │ posting_ref   u64   (u64::MAX = none)    │
//! │ subtree_size  i32   (left subtree)       │
//! │ end_of_word   u8                         │
//! │ terminator    u8                         │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The root sentinel is never written; the stream starts with the
//! first-character chain.

use super::simtree::{Terminator, NO_POSTING};
use crate::error::{IndexError, Result};
use crate::types::PostingRef;

pub const TERM_RECORD_SIZE: usize = 18;

/// Result of an exact lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermMatch {
    pub posting_ref: Option<PostingRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TermNode {
    value: char,
    end_of_word: bool,
    posting_ref: Option<PostingRef>,
    /// Times a word ending here was added
    weight: u32,
    left: Option<Box<TermNode>>,
    sibling: Option<Box<TermNode>>,
}

impl TermNode {
    fn new(value: char) -> Self {
        Self {
            value,
            end_of_word: false,
            posting_ref: None,
            weight: 0,
            left: None,
            sibling: None,
        }
    }

    fn child(&self, c: char) -> Option<&TermNode> {
        let mut cursor = self.left.as_deref();
        while let Some(node) = cursor {
            if node.value == c {
                return Some(node);
            }
            cursor = node.sibling.as_deref();
        }
        None
    }

    /// Child with value `c`, appended to the end of the chain if absent.
    fn child_or_insert(&mut self, c: char) -> &mut TermNode {
        let mut slot = &mut self.left;
        while slot.as_ref().map_or(false, |node| node.value != c) {
            if let Some(node) = slot {
                slot = &mut node.sibling;
            }
        }
        slot.get_or_insert_with(|| Box::new(TermNode::new(c)))
    }
}

/// In-memory term trie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermTrie {
    root: TermNode,
    words: usize,
}

impl Default for TermTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl TermTrie {
    pub fn new() -> Self {
        Self {
            root: TermNode::new('\0'),
            words: 0,
        }
    }

    /// Number of distinct words.
    pub fn len(&self) -> usize {
        self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words == 0
    }

    /// Add `word`. A posting ref replaces the one already stored for it.
    pub fn add(&mut self, word: &str, posting_ref: Option<PostingRef>) -> Result<()> {
        if word.is_empty() {
            return Err(IndexError::InvalidArgument("cannot add an empty term".into()));
        }
        if posting_ref == Some(NO_POSTING) {
            return Err(IndexError::InvalidArgument(format!(
                "posting ref {} is reserved",
                NO_POSTING
            )));
        }

        let mut node = &mut self.root;
        for c in word.chars() {
            node = node.child_or_insert(c);
        }
        if !node.end_of_word {
            node.end_of_word = true;
            self.words += 1;
        }
        node.weight = node.weight.saturating_add(1);
        if posting_ref.is_some() {
            node.posting_ref = posting_ref;
        }
        Ok(())
    }

    fn node(&self, prefix: &str) -> Option<&TermNode> {
        let mut node = &self.root;
        for c in prefix.chars() {
            node = node.child(c)?;
        }
        Some(node)
    }

    pub fn find(&self, word: &str) -> Option<TermMatch> {
        if word.is_empty() {
            return None;
        }
        self.node(word)
            .filter(|n| n.end_of_word)
            .map(|n| TermMatch {
                posting_ref: n.posting_ref,
            })
    }

    /// How many times `word` was added (0 if absent).
    pub fn weight(&self, word: &str) -> u32 {
        match self.node(word) {
            Some(n) if n.end_of_word && !word.is_empty() => n.weight,
            _ => 0,
        }
    }

    /// Every word starting with `prefix`, depth-first in insertion order.
    pub fn starts_with(&self, prefix: &str) -> Vec<String> {
        let mut out = Vec::new();
        let start = match self.node(prefix) {
            Some(node) => node,
            None => return out,
        };
        if start.end_of_word && !prefix.is_empty() {
            out.push(prefix.to_string());
        }

        let mut stack: Vec<(&TermNode, String)> = Vec::new();
        if let Some(first) = start.left.as_deref() {
            stack.push((first, prefix.to_string()));
        }
        while let Some((node, base)) = stack.pop() {
            let mut word = base.clone();
            word.push(node.value);

            if let Some(sibling) = node.sibling.as_deref() {
                stack.push((sibling, base));
            }
            if let Some(left) = node.left.as_deref() {
                stack.push((left, word.clone()));
            }
            if node.end_of_word {
                out.push(word);
            }
        }
        out
    }

    /// Depth-first record stream of the whole trie.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(first) = self.root.left.as_deref() {
            emit_chain(first, &mut out)?;
        }
        Ok(out)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut trie = TermTrie::new();
        if bytes.is_empty() {
            return Ok(trie);
        }
        let mut pos = 0usize;
        let (chain, _) = decode_chain(bytes, &mut pos, &mut trie.words)?;
        if pos != bytes.len() {
            return Err(IndexError::corruption(format!(
                "{} trailing bytes after term trie",
                bytes.len() - pos
            )));
        }
        trie.root.left = Some(chain);
        Ok(trie)
    }
}

#[derive(Debug, Clone, Copy)]
struct TermRecord {
    value: char,
    posting_ref: u64,
    subtree_size: i32,
    end_of_word: bool,
    terminator: Terminator,
}

impl TermRecord {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.value as u32).to_le_bytes());
        out.extend_from_slice(&self.posting_ref.to_le_bytes());
        out.extend_from_slice(&self.subtree_size.to_le_bytes());
        out.push(self.end_of_word as u8);
        out.push(self.terminator as u8);
    }

    /// Record at `pos`, or `None` exactly at the end of the stream.
    fn read(bytes: &[u8], pos: usize) -> Result<Option<Self>> {
        if pos == bytes.len() {
            return Ok(None);
        }
        let raw = bytes
            .get(pos..pos + TERM_RECORD_SIZE)
            .ok_or_else(|| IndexError::corruption(format!("truncated term record at {}", pos)))?;

        let mut value = [0u8; 4];
        value.copy_from_slice(&raw[0..4]);
        let mut posting = [0u8; 8];
        posting.copy_from_slice(&raw[4..12]);
        let mut subtree = [0u8; 4];
        subtree.copy_from_slice(&raw[12..16]);

        let code = u32::from_le_bytes(value);
        let value = char::from_u32(code)
            .ok_or_else(|| IndexError::corruption(format!("invalid char {:#x}", code)))?;
        let subtree_size = i32::from_le_bytes(subtree);
        if subtree_size < 0 {
            return Err(IndexError::corruption(format!(
                "negative subtree size {}",
                subtree_size
            )));
        }
        let end_of_word = match raw[16] {
            0 => false,
            1 => true,
            other => {
                return Err(IndexError::corruption(format!("invalid end-of-word flag {}", other)))
            }
        };

        Ok(Some(Self {
            value,
            posting_ref: u64::from_le_bytes(posting),
            subtree_size,
            end_of_word,
            terminator: Terminator::from_byte(raw[17])?,
        }))
    }

    fn expect(bytes: &[u8], pos: usize) -> Result<Self> {
        Self::read(bytes, pos)?
            .ok_or_else(|| IndexError::corruption(format!("linked term record at {} missing", pos)))
    }

    fn term_match(&self) -> TermMatch {
        TermMatch {
            posting_ref: (self.posting_ref != NO_POSTING).then_some(self.posting_ref),
        }
    }
}

fn emit_chain(first: &TermNode, out: &mut Vec<u8>) -> Result<usize> {
    let mut emitted = 0usize;
    let mut cursor = Some(first);

    while let Some(node) = cursor {
        let at = out.len();
        TermRecord {
            value: node.value,
            posting_ref: node.posting_ref.unwrap_or(NO_POSTING),
            subtree_size: 0,
            end_of_word: node.end_of_word,
            terminator: Terminator::from_links(node.left.is_some(), node.sibling.is_some()),
        }
        .encode(out);
        emitted += 1;

        if let Some(left) = node.left.as_deref() {
            let below = emit_chain(left, out)?;
            let size = i32::try_from(below)
                .map_err(|_| IndexError::InvalidArgument(format!("subtree of {} terms", below)))?;
            out[at + 12..at + 16].copy_from_slice(&size.to_le_bytes());
            emitted += below;
        }
        cursor = node.sibling.as_deref();
    }
    Ok(emitted)
}

fn decode_chain(bytes: &[u8], pos: &mut usize, words: &mut usize) -> Result<(Box<TermNode>, usize)> {
    let mut chain: Vec<TermNode> = Vec::new();
    let mut total = 0usize;

    loop {
        let record = TermRecord::expect(bytes, *pos)?;
        *pos += TERM_RECORD_SIZE;
        total += 1;

        let mut node = TermNode::new(record.value);
        node.end_of_word = record.end_of_word;
        node.posting_ref = record.term_match().posting_ref;
        if record.end_of_word {
            // per-word counts are not persisted
            node.weight = 1;
            *words += 1;
        }

        if record.terminator.has_child() {
            let (left, below) = decode_chain(bytes, pos, words)?;
            if below != record.subtree_size as usize {
                return Err(IndexError::corruption(format!(
                    "term subtree size {} does not match {} decoded records",
                    record.subtree_size, below
                )));
            }
            node.left = Some(left);
            total += below;
        }

        chain.push(node);
        if !record.terminator.has_sibling() {
            break;
        }
    }

    let mut next: Option<Box<TermNode>> = None;
    for mut node in chain.into_iter().rev() {
        node.sibling = next;
        next = Some(Box::new(node));
    }
    let head = next.ok_or_else(|| IndexError::corruption("empty term chain"))?;
    Ok((head, total))
}

/// Exact lookup straight from a serialized trie
#[derive(Debug, Clone, Copy)]
pub struct TermTrieReader<'a> {
    bytes: &'a [u8],
}

impl<'a> TermTrieReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Walk the stream; a mismatching char jumps over its left subtree.
    pub fn find(&self, word: &str) -> Result<Option<TermMatch>> {
        let mut chars = word.chars().peekable();
        let mut pos = 0usize;
        let mut wanted = match chars.next() {
            Some(c) => c,
            None => return Ok(None),
        };

        while let Some(record) = TermRecord::read(self.bytes, pos)? {
            pos += TERM_RECORD_SIZE;

            if record.value == wanted {
                if chars.peek().is_none() {
                    return Ok(record.end_of_word.then(|| record.term_match()));
                }
                if !record.terminator.has_child() {
                    return Ok(None);
                }
                // the left child record follows immediately
                wanted = match chars.next() {
                    Some(c) => c,
                    None => return Ok(None),
                };
                continue;
            }

            match record.terminator {
                Terminator::Both => {
                    pos = (record.subtree_size as usize)
                        .checked_mul(TERM_RECORD_SIZE)
                        .and_then(|skip| pos.checked_add(skip))
                        .filter(|p| *p < self.bytes.len())
                        .ok_or_else(|| {
                            IndexError::corruption(format!(
                                "term skip of {} records from {} leaves the stream",
                                record.subtree_size, pos
                            ))
                        })?;
                }
                Terminator::SiblingOnly => {}
                Terminator::ChildOnly | Terminator::Leaf => return Ok(None),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TermTrie {
        let mut trie = TermTrie::new();
        for (i, w) in ["tree", "trie", "tried", "tank", "apple", "trees"].iter().enumerate() {
            trie.add(w, Some(i as u64)).unwrap();
        }
        trie
    }

    #[test]
    fn test_add_and_find() {
        let mut trie = sample();
        assert_eq!(trie.len(), 6);
        assert_eq!(trie.find("trie"), Some(TermMatch { posting_ref: Some(1) }));
        assert_eq!(trie.find("tri"), None);
        assert_eq!(trie.find("trees"), Some(TermMatch { posting_ref: Some(5) }));
        assert_eq!(trie.find("banana"), None);
        assert_eq!(trie.find(""), None);

        trie.add("tree", None).unwrap();
        assert_eq!(trie.len(), 6);
        assert_eq!(trie.weight("tree"), 2);
        assert_eq!(trie.find("tree"), Some(TermMatch { posting_ref: Some(0) }));
    }

    #[test]
    fn test_sibling_chain_keeps_insertion_order() {
        let mut trie = TermTrie::new();
        for (i, w) in ["b", "a", "c", "ab", "a"].iter().enumerate() {
            trie.add(w, Some(i as u64)).unwrap();
        }
        assert_eq!(trie.len(), 4);
        assert_eq!(trie.starts_with(""), vec!["b", "a", "ab", "c"]);
        assert_eq!(trie.find("a"), Some(TermMatch { posting_ref: Some(4) }));
        assert_eq!(trie.weight("a"), 2);
    }

    #[test]
    fn test_rejects_empty_and_reserved() {
        let mut trie = TermTrie::new();
        assert!(trie.add("", Some(1)).is_err());
        assert!(trie.add("x", Some(NO_POSTING)).is_err());
        assert!(trie.is_empty());
    }

    #[test]
    fn test_starts_with() {
        let trie = sample();
        let mut words = trie.starts_with("tri");
        words.sort();
        assert_eq!(words, vec!["trie", "tried"]);

        let mut words = trie.starts_with("tree");
        words.sort();
        assert_eq!(words, vec!["tree", "trees"]);

        assert_eq!(trie.starts_with("").len(), 6);
        assert!(trie.starts_with("q").is_empty());
    }

    #[test]
    fn test_round_trip() {
        let trie = sample();
        let bytes = trie.serialize().unwrap();
        assert_eq!(bytes.len() % TERM_RECORD_SIZE, 0);

        let decoded = TermTrie::deserialize(&bytes).unwrap();
        assert_eq!(decoded.len(), trie.len());
        for w in ["tree", "trie", "tried", "tank", "apple", "trees"] {
            assert_eq!(decoded.find(w), trie.find(w));
        }
        assert_eq!(decoded.starts_with("t"), trie.starts_with("t"));
    }

    #[test]
    fn test_reader_exact_lookup() {
        let trie = sample();
        let bytes = trie.serialize().unwrap();
        let reader = TermTrieReader::new(&bytes);

        for w in ["tree", "trie", "tried", "tank", "apple", "trees"] {
            assert_eq!(reader.find(w).unwrap(), trie.find(w), "{}", w);
        }
        for w in ["tr", "treez", "apples", "b", "", "tan"] {
            assert_eq!(reader.find(w).unwrap(), None, "{}", w);
        }
    }

    #[test]
    fn test_reader_unicode() {
        let mut trie = TermTrie::new();
        trie.add("über", Some(1)).unwrap();
        trie.add("ü", Some(2)).unwrap();
        trie.add("日本", Some(3)).unwrap();
        let bytes = trie.serialize().unwrap();
        let reader = TermTrieReader::new(&bytes);
        assert_eq!(reader.find("ü").unwrap(), Some(TermMatch { posting_ref: Some(2) }));
        assert_eq!(reader.find("日本").unwrap(), Some(TermMatch { posting_ref: Some(3) }));
    }

    #[test]
    fn test_corrupt_streams() {
        let bytes = sample().serialize().unwrap();

        let truncated = &bytes[..bytes.len() - 5];
        assert!(matches!(
            TermTrie::deserialize(truncated),
            Err(IndexError::Corruption(_))
        ));

        let mut bad_terminator = bytes.clone();
        bad_terminator[17] = 7;
        assert!(matches!(
            TermTrieReader::new(&bad_terminator).find("tree"),
            Err(IndexError::Corruption(_))
        ));
    }

    #[test]
    fn test_empty_trie() {
        let trie = TermTrie::new();
        let bytes = trie.serialize().unwrap();
        assert!(bytes.is_empty());
        assert!(TermTrie::deserialize(&bytes).unwrap().is_empty());
        assert_eq!(TermTrieReader::new(&bytes).find("a").unwrap(), None);
    }
}
