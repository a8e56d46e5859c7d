//! In-memory similarity trie
//!
//! Left-child / right-sibling encoding of an n-ary trie. Shape is decided
//! by similarity and insertion order, never by a sort key:
//!
//! - `left`: the new vector was similar enough to refine under this node
//! - `sibling`: it was not; try the alternative branch
//!
//! A tree is held through a root sentinel (empty vector, never compared).
//! The first real node is the sentinel's left child.

use super::{BestMatch, Hit, RefSet, Verdict};
use crate::config::TreeConfig;
use crate::types::{PostingRef, Vector};

/// Node of the similarity trie
#[derive(Debug)]
pub struct VectorNode {
    pub(crate) vector: Vector,
    pub(crate) weight: u32,
    pub(crate) posting_refs: RefSet,
    pub(crate) left: Option<Box<VectorNode>>,
    pub(crate) sibling: Option<Box<VectorNode>>,
}

/// What `add` did with the incoming node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Identical to an existing node: weight and posting refs merged
    Merged,
    /// Near-duplicate: posting refs unioned, weight unchanged
    Folded,
    /// Linked in as a new node
    Inserted,
}

/// Shape statistics, logged when a page is flushed
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TreeShape {
    /// Number of nodes (sentinel excluded)
    pub nodes: usize,
    /// Sum of node weights
    pub weight: u64,
    /// Longest path counted in left hops (first node = 1)
    pub depth: usize,
    /// Most nodes at a single depth
    pub width: usize,
    pub avg_depth: f64,
}

impl VectorNode {
    /// Empty tree (root sentinel)
    pub fn root() -> Self {
        Self {
            vector: Vector::empty(),
            weight: 0,
            posting_refs: RefSet::new(),
            left: None,
            sibling: None,
        }
    }

    pub fn new(vector: Vector, posting_ref: Option<PostingRef>) -> Self {
        Self {
            vector,
            weight: 1,
            posting_refs: posting_ref.into_iter().collect(),
            left: None,
            sibling: None,
        }
    }

    pub fn with_postings(vector: Vector, weight: u32, posting_refs: Vec<PostingRef>) -> Self {
        Self {
            vector,
            weight,
            posting_refs: posting_refs.into_iter().collect(),
            left: None,
            sibling: None,
        }
    }

    pub fn vector(&self) -> &Vector {
        &self.vector
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn posting_refs(&self) -> &[PostingRef] {
        self.posting_refs.as_slice()
    }

    pub fn left(&self) -> Option<&VectorNode> {
        self.left.as_deref()
    }

    pub fn sibling(&self) -> Option<&VectorNode> {
        self.sibling.as_deref()
    }

    pub fn has_child(&self) -> bool {
        self.left.is_some()
    }

    pub fn has_sibling(&self) -> bool {
        self.sibling.is_some()
    }

    /// True for a sentinel with nothing under it.
    pub fn is_empty(&self) -> bool {
        self.left.is_none()
    }

    /// Insert `node` into the tree rooted at this sentinel.
    ///
    /// Links carried by `node` are dropped; only its vector, weight and
    /// posting refs are inserted.
    pub fn add(&mut self, mut node: VectorNode, config: &TreeConfig) -> AddOutcome {
        node.left = None;
        node.sibling = None;

        let mut slot: &mut Option<Box<VectorNode>> = &mut self.left;
        while let Some(current) = slot {
            let angle = current.vector.cosine(&node.vector);

            if angle >= config.identical_threshold {
                current.merge(node);
                return AddOutcome::Merged;
            }
            if angle >= config.fold_threshold {
                current.fold(node);
                return AddOutcome::Folded;
            }

            slot = if angle > config.relevance_floor {
                &mut current.left
            } else {
                &mut current.sibling
            };
        }

        *slot = Some(Box::new(node));
        AddOutcome::Inserted
    }

    /// Convenience for `add(VectorNode::new(vector, posting_ref), config)`.
    pub fn add_vector(
        &mut self,
        vector: Vector,
        posting_ref: Option<PostingRef>,
        config: &TreeConfig,
    ) -> AddOutcome {
        self.add(VectorNode::new(vector, posting_ref), config)
    }

    fn merge(&mut self, mut other: VectorNode) {
        self.weight = self.weight.saturating_add(other.weight);
        self.posting_refs
            .extend(std::mem::take(&mut other.posting_refs).into_vec());
    }

    fn fold(&mut self, mut other: VectorNode) {
        self.posting_refs
            .extend(std::mem::take(&mut other.posting_refs).into_vec());
    }

    /// Closest match under this sentinel.
    ///
    /// Descends left while the angle is at or above `fold_threshold`,
    /// otherwise follows the sibling chain. Same walk as a page scan.
    pub fn closest_match(&self, query: &Vector, fold_threshold: f32) -> Option<Hit> {
        let mut best = BestMatch::default();
        let mut cursor = self.left.as_deref();

        while let Some(node) = cursor {
            let angle = node.vector.cosine(query);
            match best.judge(angle) {
                Verdict::Replace => best.replace(node.to_hit(angle)),
                Verdict::Tie => best.tie(node.posting_refs().iter().copied()),
                Verdict::Ignore => {}
            }

            cursor = if angle >= fold_threshold {
                node.left.as_deref()
            } else {
                node.sibling.as_deref()
            };
        }
        best.into_hit()
    }

    fn to_hit(&self, score: f32) -> Hit {
        Hit {
            score,
            vector: self.vector.clone(),
            weight: self.weight,
            posting_refs: self.posting_refs().to_vec(),
        }
    }

    /// Pre-order walk of everything reachable from `left`: the left
    /// child, its descendants and its siblings' subtrees.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.left.as_deref().into_iter().collect(),
        }
    }

    /// Nodes in the left subtree. This is the on-disk skip distance in records.
    pub fn subtree_size(&self) -> usize {
        self.descendants().count()
    }

    /// Detach every node under this sentinel, in pre-order.
    pub fn into_nodes(mut self) -> Vec<VectorNode> {
        let mut out = Vec::new();
        let mut stack: Vec<Box<VectorNode>> = self.left.take().into_iter().collect();

        while let Some(mut node) = stack.pop() {
            stack.extend(node.sibling.take());
            stack.extend(node.left.take());
            out.push(*node);
        }
        out
    }

    pub fn shape(&self) -> TreeShape {
        let mut shape = TreeShape::default();
        let mut per_depth: Vec<usize> = Vec::new();
        let mut depth_sum = 0usize;
        let mut stack: Vec<(&VectorNode, usize)> =
            self.left.as_deref().map(|n| (n, 1)).into_iter().collect();

        while let Some((node, depth)) = stack.pop() {
            shape.nodes += 1;
            shape.weight += u64::from(node.weight);
            shape.depth = shape.depth.max(depth);
            depth_sum += depth;

            if per_depth.len() < depth {
                per_depth.resize(depth, 0);
            }
            per_depth[depth - 1] += 1;

            if let Some(sibling) = node.sibling.as_deref() {
                stack.push((sibling, depth));
            }
            if let Some(left) = node.left.as_deref() {
                stack.push((left, depth + 1));
            }
        }

        shape.width = per_depth.into_iter().max().unwrap_or(0);
        if shape.nodes > 0 {
            shape.avg_depth = depth_sum as f64 / shape.nodes as f64;
        }
        shape
    }
}

impl PartialEq for VectorNode {
    /// Structural equality, compared node by node without recursion.
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.vector != b.vector || a.weight != b.weight || a.posting_refs != b.posting_refs {
                return false;
            }
            match (a.left.as_deref(), b.left.as_deref()) {
                (Some(x), Some(y)) => stack.push((x, y)),
                (None, None) => {}
                _ => return false,
            }
            match (a.sibling.as_deref(), b.sibling.as_deref()) {
                (Some(x), Some(y)) => stack.push((x, y)),
                (None, None) => {}
                _ => return false,
            }
        }
        true
    }
}

impl Drop for VectorNode {
    // Sibling chains get long; unlink iteratively instead of recursing.
    fn drop(&mut self) {
        let mut stack: Vec<Box<VectorNode>> = Vec::new();
        stack.extend(self.left.take());
        stack.extend(self.sibling.take());

        while let Some(mut node) = stack.pop() {
            stack.extend(node.left.take());
            stack.extend(node.sibling.take());
        }
    }
}

/// Pre-order iterator, see [`VectorNode::descendants`]
pub struct Descendants<'a> {
    stack: Vec<&'a VectorNode>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a VectorNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        if let Some(sibling) = node.sibling.as_deref() {
            self.stack.push(sibling);
        }
        if let Some(left) = node.left.as_deref() {
            self.stack.push(left);
        }
        Some(node)
    }
}
