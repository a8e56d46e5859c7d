//! Index configuration and durability levels
//!
//! Thresholds that shape the similarity trie, flush durability, and the
//! on-disk location of a collection. Loadable from / savable to JSON.

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 持久性级别（Durability Level）
///
/// Controls what happens when a page is flushed:
/// - Synchronous: 每个 page 写完立即 fsync（最安全）
/// - NoSync: 只写入 OS 缓冲区（仅测试 / 批量导入）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Durability {
    /// fsync index, payload and page-index files before a page is published.
    #[default]
    Synchronous,

    /// Flush to the OS only. A crash may lose the last pages.
    NoSync,
}

impl Durability {
    /// 判断是否需要立即刷盘
    pub fn requires_sync(&self) -> bool {
        matches!(self, Self::Synchronous)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Synchronous => "同步模式（最安全）",
            Self::NoSync => "不刷盘（仅测试）",
        }
    }
}

/// Similarity thresholds of one tree.
///
/// Must satisfy `0 <= relevance_floor <= fold_threshold <= identical_threshold <= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// At or above this cosine two vectors are the same entry: weights merge.
    pub identical_threshold: f32,

    /// At or above this cosine two vectors tie: posting refs are unioned
    /// without a new node. Traversal descends left at or above it.
    pub fold_threshold: f32,

    /// Insertion refines (goes left) above this cosine, otherwise it
    /// branches to the sibling chain.
    pub relevance_floor: f32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self::for_terms()
    }
}

impl TreeConfig {
    pub fn new(identical_threshold: f32, fold_threshold: f32, relevance_floor: f32) -> Result<Self> {
        let config = Self {
            identical_threshold,
            fold_threshold,
            relevance_floor,
        };
        config.validate()?;
        Ok(config)
    }

    /// Term vectors (character bags): short, noisy, near-duplicates common.
    pub fn for_terms() -> Self {
        Self {
            identical_threshold: 0.97,
            fold_threshold: 0.85,
            relevance_floor: 0.55,
        }
    }

    /// Document vectors: long and sparse.
    pub fn for_documents() -> Self {
        Self {
            identical_threshold: 0.98,
            fold_threshold: 0.80,
            relevance_floor: 0.40,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let values = [self.relevance_floor, self.fold_threshold, self.identical_threshold];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0 || *v > 1.0) {
            return Err(IndexError::Config(format!(
                "thresholds must lie in [0, 1]: {:?}",
                self
            )));
        }
        if !(self.relevance_floor <= self.fold_threshold
            && self.fold_threshold <= self.identical_threshold)
        {
            return Err(IndexError::Config(format!(
                "expected relevance_floor <= fold_threshold <= identical_threshold: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// 索引配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding `.ix`, `.ixp` and `.vec` files.
    pub data_dir: PathBuf,

    /// Thresholds for every tree of the collection.
    pub tree: TreeConfig,

    pub durability: Durability,

    /// Number of per-field readers kept open (LRU).
    pub reader_cache_size: usize,

    /// Worker threads for page folding. None = rayon's global pool.
    pub optimizer_threads: Option<usize>,
}

impl IndexConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            tree: TreeConfig::default(),
            durability: Durability::default(),
            reader_cache_size: 64,
            optimizer_threads: None,
        }
    }

    /// 创建测试用配置（最快）
    pub fn for_testing(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            durability: Durability::NoSync,
            ..Self::new(data_dir)
        }
    }

    pub fn with_tree(mut self, tree: TreeConfig) -> Self {
        self.tree = tree;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.tree.validate()?;
        if self.reader_cache_size == 0 {
            return Err(IndexError::Config("reader_cache_size must be > 0".into()));
        }
        if self.optimizer_threads == Some(0) {
            return Err(IndexError::Config("optimizer_threads must be > 0".into()));
        }
        Ok(())
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_presets_are_valid() {
        TreeConfig::for_terms().validate().unwrap();
        TreeConfig::for_documents().validate().unwrap();
        assert!(Durability::Synchronous.requires_sync());
        assert!(!Durability::NoSync.requires_sync());
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        assert!(TreeConfig::new(0.8, 0.9, 0.1).is_err());
        assert!(TreeConfig::new(0.9, 0.8, 0.85).is_err());
        assert!(TreeConfig::new(1.2, 0.8, 0.1).is_err());
        assert!(TreeConfig::new(f32::NAN, 0.8, 0.1).is_err());
        assert!(TreeConfig::new(0.98, 0.80, 0.0).is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");

        let config = IndexConfig::for_testing(dir.path()).with_tree(TreeConfig::for_documents());
        config.save(&path).unwrap();

        let loaded = IndexConfig::load(&path).unwrap();
        assert_eq!(loaded.tree, TreeConfig::for_documents());
        assert_eq!(loaded.durability, Durability::NoSync);
        assert_eq!(loaded.data_dir, dir.path());
    }

    #[test]
    fn test_load_rejects_bad_thresholds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");

        let mut config = IndexConfig::new(dir.path());
        config.tree.fold_threshold = 0.99;
        config.save(&path).unwrap();

        assert!(matches!(IndexConfig::load(&path), Err(IndexError::Config(_))));
    }
}
