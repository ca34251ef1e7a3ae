//! Free-list of recycled trace nodes
//!
//! Frames that turn out to be insignificant are cleaned and kept here so the
//! next `enter` can reuse them instead of allocating. Discarded subtrees are
//! taken apart and their nodes reclaimed as well, as long as nobody else
//! holds them (a submitted trace is shared with sinks and is left alone).

use crate::node::TraceNode;
use std::sync::Arc;

/// Configuration for the node pool
#[derive(Debug, Clone)]
pub struct NodePoolConfig {
    /// Maximum number of idle nodes retained
    pub capacity: usize,
    /// Whether pooling is enabled
    pub enabled: bool,
}

impl Default for NodePoolConfig {
    fn default() -> Self {
        NodePoolConfig {
            capacity: 1024,
            enabled: true,
        }
    }
}

impl NodePoolConfig {
    pub fn new(capacity: usize) -> Self {
        NodePoolConfig {
            capacity,
            enabled: capacity > 0,
        }
    }

    /// Disable pooling (for debugging)
    pub fn disabled() -> Self {
        NodePoolConfig {
            capacity: 0,
            enabled: false,
        }
    }
}

/// Per-assembler node free-list. Not shared between threads.
#[derive(Debug)]
pub struct NodePool {
    pool: Vec<TraceNode>,
    config: NodePoolConfig,
    hits: u64,
    misses: u64,
    released: u64,
}

impl NodePool {
    /// Create an empty pool; nodes are added as frames get discarded.
    pub fn new(config: NodePoolConfig) -> Self {
        NodePool {
            pool: Vec::with_capacity(config.capacity.min(64)),
            config,
            hits: 0,
            misses: 0,
            released: 0,
        }
    }

    /// Take a clean node, allocating only if the pool is empty.
    pub fn acquire(&mut self) -> TraceNode {
        match self.pool.pop() {
            Some(node) => {
                self.hits += 1;
                node
            }
            None => {
                self.misses += 1;
                TraceNode::new()
            }
        }
    }

    /// Return a node (and whatever part of its subtree is not shared).
    pub fn release(&mut self, node: TraceNode) {
        let mut pending = vec![node];
        while let Some(mut node) = pending.pop() {
            for child in node.children.drain(..) {
                if let Ok(child) = Arc::try_unwrap(child) {
                    pending.push(child);
                }
            }
            node.clean();
            self.released += 1;

            // Only pool if we have capacity
            if self.config.enabled && self.pool.len() < self.config.capacity {
                self.pool.push(node);
            }
        }
    }

    /// Clean a node that stays in place, reclaiming its children.
    pub fn clean_in_place(&mut self, node: &mut TraceNode) {
        let children: Vec<Arc<TraceNode>> = node.children.drain(..).collect();
        for child in children {
            if let Ok(child) = Arc::try_unwrap(child) {
                self.release(child);
            }
        }
        node.clean();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.config.capacity,
            available: self.pool.len(),
            hits: self.hits,
            misses: self.misses,
            released: self.released,
            enabled: self.config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Idle nodes currently held
    pub fn available(&self) -> usize {
        self.pool.len()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    /// Acquires served from the pool
    pub hits: u64,
    /// Acquires that had to allocate
    pub misses: u64,
    /// Nodes handed back (pooled or dropped)
    pub released: u64,
    pub enabled: bool,
}

impl PoolStats {
    /// Percentage of acquires served from the pool
    pub fn hit_rate(&self) -> f64 {
        let acquired = self.hits + self.misses;
        if acquired == 0 {
            return 0.0;
        }
        (self.hits as f64 / acquired as f64) * 100.0
    }

    /// Percentage of capacity currently idle in the pool
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.available as f64 / self.capacity as f64) * 100.0
    }
}
