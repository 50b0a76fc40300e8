//! # Red-Black Tree Engine
//!
//! Classical red-black tree (insertion's five-case fix-up, deletion's
//! six-case fix-up, leftmost/successor in-order traversal), grounded in
//! `examples/original_source/src/model/self_balancing_binary_search_tree/`.
//!
//! Nodes live in a `Vec<Option<Node>>` arena addressed by [`NodeId`] rather
//! than owning pointers with raw parent back-edges: safe Rust cannot express
//! an intrusive parent-pointer tree through ownership alone, so the
//! back-edges become arena indices instead, the same trick the teacher's
//! `memory.rs` uses for its intrusive LRU list. A deleted node's slot is
//! pushed onto a free list and reused by the next insertion, so the arena
//! never grows past the tree's high-water mark.
//!
//! A single `parking_lot::Mutex` around the whole arena matches the "one
//! engine-wide lock, no reader/writer split" rule the hash engine also
//! follows — rotations touch three pointers at once and are not safely
//! expressible under a reader lock anyway.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use kv_common::{Key, ParamMask, StoreError, StoreResult, Value};

use crate::clock::now_secs;
use crate::engine::{apply_mask, entry_matches, next_engine_id, Entry, EngineId, StorageEngine};
use crate::ttl_manager::TtlManager;

type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

struct Node {
    key: Key,
    value: Value,
    expire_at: Option<u64>,
    color: Color,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

struct Tree {
    arena: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    size: usize,
}

impl Tree {
    fn new() -> Self {
        Tree {
            arena: Vec::new(),
            free: Vec::new(),
            root: None,
            size: 0,
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        self.arena[id].as_ref().expect("dangling NodeId")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.arena[id].as_mut().expect("dangling NodeId")
    }

    fn color_of(&self, id: Option<NodeId>) -> Color {
        match id {
            Some(id) => self.node(id).color,
            None => Color::Black,
        }
    }

    fn set_color(&mut self, id: NodeId, color: Color) {
        self.node_mut(id).color = color;
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.arena[id] = Some(node);
            id
        } else {
            self.arena.push(Some(node));
            self.arena.len() - 1
        }
    }

    fn free(&mut self, id: NodeId) {
        self.arena[id] = None;
        self.free.push(id);
    }

    fn find_node(&self, key: &str) -> Option<NodeId> {
        let mut cur = self.root;
        while let Some(n) = cur {
            cur = match key.cmp(self.node(n).key.as_str()) {
                std::cmp::Ordering::Less => self.node(n).left,
                std::cmp::Ordering::Greater => self.node(n).right,
                std::cmp::Ordering::Equal => return Some(n),
            };
        }
        None
    }

    fn leftmost(&self, mut n: NodeId) -> NodeId {
        while let Some(l) = self.node(n).left {
            n = l;
        }
        n
    }

    fn successor(&self, n: NodeId) -> Option<NodeId> {
        if let Some(r) = self.node(n).right {
            return Some(self.leftmost(r));
        }
        let mut n = n;
        let mut parent = self.node(n).parent;
        while let Some(p) = parent {
            if self.node(p).left == Some(n) {
                return Some(p);
            }
            n = p;
            parent = self.node(p).parent;
        }
        None
    }

    fn in_order(&self) -> Vec<NodeId> {
        let mut result = Vec::with_capacity(self.size);
        let mut cur = self.root.map(|r| self.leftmost(r));
        while let Some(n) = cur {
            result.push(n);
            cur = self.successor(n);
        }
        result
    }

    fn rotate_left(&mut self, x: NodeId) {
        let y = self.node(x).right.expect("rotate_left requires a right child");
        let y_left = self.node(y).left;
        self.node_mut(x).right = y_left;
        if let Some(yl) = y_left {
            self.node_mut(yl).parent = Some(x);
        }
        let x_parent = self.node(x).parent;
        self.node_mut(y).parent = x_parent;
        match x_parent {
            None => self.root = Some(y),
            Some(p) if self.node(p).left == Some(x) => self.node_mut(p).left = Some(y),
            Some(p) => self.node_mut(p).right = Some(y),
        }
        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    fn rotate_right(&mut self, x: NodeId) {
        let y = self.node(x).left.expect("rotate_right requires a left child");
        let y_right = self.node(y).right;
        self.node_mut(x).left = y_right;
        if let Some(yr) = y_right {
            self.node_mut(yr).parent = Some(x);
        }
        let x_parent = self.node(x).parent;
        self.node_mut(y).parent = x_parent;
        match x_parent {
            None => self.root = Some(y),
            Some(p) if self.node(p).left == Some(x) => self.node_mut(p).left = Some(y),
            Some(p) => self.node_mut(p).right = Some(y),
        }
        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    fn insert(&mut self, key: Key, value: Value, expire_at: Option<u64>) -> StoreResult<()> {
        let mut parent = None;
        let mut cur = self.root;
        let mut goes_left = false;
        while let Some(n) = cur {
            parent = Some(n);
            match key.as_str().cmp(self.node(n).key.as_str()) {
                std::cmp::Ordering::Less => {
                    goes_left = true;
                    cur = self.node(n).left;
                }
                std::cmp::Ordering::Greater => {
                    goes_left = false;
                    cur = self.node(n).right;
                }
                std::cmp::Ordering::Equal => return Err(StoreError::KeyAlreadyExists),
            }
        }

        let id = self.alloc(Node {
            key,
            value,
            expire_at,
            color: Color::Red,
            parent,
            left: None,
            right: None,
        });
        match parent {
            None => self.root = Some(id),
            Some(p) if goes_left => self.node_mut(p).left = Some(id),
            Some(p) => self.node_mut(p).right = Some(id),
        }
        self.fix_insert(id);
        self.size += 1;
        Ok(())
    }

    /// Five-case insertion fix-up (CLRS RB-INSERT-FIXUP).
    fn fix_insert(&mut self, mut z: NodeId) {
        loop {
            let Some(p) = self.node(z).parent else { break };
            if self.color_of(Some(p)) != Color::Red {
                break;
            }
            let gp = self
                .node(p)
                .parent
                .expect("a red node's parent always has a parent: the root is always black");

            if Some(p) == self.node(gp).left {
                let uncle = self.node(gp).right;
                if self.color_of(uncle) == Color::Red {
                    self.set_color(p, Color::Black);
                    self.set_color(uncle.unwrap(), Color::Black);
                    self.set_color(gp, Color::Red);
                    z = gp;
                } else {
                    let mut z2 = z;
                    if Some(z2) == self.node(p).right {
                        z2 = p;
                        self.rotate_left(z2);
                    }
                    let p2 = self.node(z2).parent.unwrap();
                    let gp2 = self.node(p2).parent.unwrap();
                    self.set_color(p2, Color::Black);
                    self.set_color(gp2, Color::Red);
                    self.rotate_right(gp2);
                    break;
                }
            } else {
                let uncle = self.node(gp).left;
                if self.color_of(uncle) == Color::Red {
                    self.set_color(p, Color::Black);
                    self.set_color(uncle.unwrap(), Color::Black);
                    self.set_color(gp, Color::Red);
                    z = gp;
                } else {
                    let mut z2 = z;
                    if Some(z2) == self.node(p).left {
                        z2 = p;
                        self.rotate_right(z2);
                    }
                    let p2 = self.node(z2).parent.unwrap();
                    let gp2 = self.node(p2).parent.unwrap();
                    self.set_color(p2, Color::Black);
                    self.set_color(gp2, Color::Red);
                    self.rotate_left(gp2);
                    break;
                }
            }
        }
        if let Some(root) = self.root {
            self.set_color(root, Color::Black);
        }
    }

    fn transplant(&mut self, u: NodeId, v: Option<NodeId>) {
        let u_parent = self.node(u).parent;
        match u_parent {
            None => self.root = v,
            Some(p) if self.node(p).left == Some(u) => self.node_mut(p).left = v,
            Some(p) => self.node_mut(p).right = v,
        }
        if let Some(v) = v {
            self.node_mut(v).parent = u_parent;
        }
    }

    /// Removes the node identified by `key`, returning its entry. The two
    /// children case swaps the in-order predecessor's key/value into the
    /// target node and unlinks the predecessor instead, per the deletion
    /// rule that favors a predecessor swap over CLRS's successor swap.
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let z = self.find_node(key)?;
        let removed = Entry {
            value: self.node(z).value.clone(),
            expire_at: self.node(z).expire_at,
        };

        let target = if self.node(z).left.is_some() && self.node(z).right.is_some() {
            let mut pred = self.node(z).left.unwrap();
            while let Some(r) = self.node(pred).right {
                pred = r;
            }
            let pred_key = self.node(pred).key.clone();
            let pred_value = self.node(pred).value.clone();
            let pred_expire_at = self.node(pred).expire_at;
            let z_node = self.node_mut(z);
            z_node.key = pred_key;
            z_node.value = pred_value;
            z_node.expire_at = pred_expire_at;
            pred
        } else {
            z
        };

        let child = self.node(target).left.or(self.node(target).right);
        let target_color = self.color_of(Some(target));
        let target_parent = self.node(target).parent;
        let target_is_left = target_parent
            .map(|p| self.node(p).left == Some(target))
            .unwrap_or(true);

        self.transplant(target, child);

        if target_color == Color::Black {
            if self.color_of(child) == Color::Red {
                self.set_color(child.unwrap(), Color::Black);
            } else {
                self.fix_delete(target_parent, target_is_left, child);
            }
        }

        self.free(target);
        self.size -= 1;
        Some(removed)
    }

    /// Six-case deletion fix-up (CLRS RB-DELETE-FIXUP), expressed over
    /// `(parent, is_left, x)` instead of a sentinel NIL node since the
    /// "double black" position can legitimately have no node of its own.
    fn fix_delete(&mut self, mut parent: Option<NodeId>, mut is_left: bool, mut x: Option<NodeId>) {
        while let Some(p) = parent {
            if self.color_of(x) != Color::Black {
                break;
            }
            if is_left {
                let mut sibling = self.node(p).right.expect("x has a black sibling by the black-height invariant");
                if self.color_of(Some(sibling)) == Color::Red {
                    self.set_color(sibling, Color::Black);
                    self.set_color(p, Color::Red);
                    self.rotate_left(p);
                    sibling = self.node(p).right.expect("sibling survives rotation");
                }
                let outer_black = self.color_of(self.node(sibling).right) == Color::Black;
                let inner_black = self.color_of(self.node(sibling).left) == Color::Black;
                if outer_black && inner_black {
                    self.set_color(sibling, Color::Red);
                    x = Some(p);
                    parent = self.node(p).parent;
                    is_left = parent.map(|gp| self.node(gp).left == Some(p)).unwrap_or(true);
                } else {
                    if outer_black {
                        if let Some(sl) = self.node(sibling).left {
                            self.set_color(sl, Color::Black);
                        }
                        self.set_color(sibling, Color::Red);
                        self.rotate_right(sibling);
                        sibling = self.node(p).right.unwrap();
                    }
                    self.set_color(sibling, self.color_of(Some(p)));
                    self.set_color(p, Color::Black);
                    if let Some(sr) = self.node(sibling).right {
                        self.set_color(sr, Color::Black);
                    }
                    self.rotate_left(p);
                    x = self.root;
                    parent = None;
                }
            } else {
                let mut sibling = self.node(p).left.expect("x has a black sibling by the black-height invariant");
                if self.color_of(Some(sibling)) == Color::Red {
                    self.set_color(sibling, Color::Black);
                    self.set_color(p, Color::Red);
                    self.rotate_right(p);
                    sibling = self.node(p).left.expect("sibling survives rotation");
                }
                let outer_black = self.color_of(self.node(sibling).left) == Color::Black;
                let inner_black = self.color_of(self.node(sibling).right) == Color::Black;
                if outer_black && inner_black {
                    self.set_color(sibling, Color::Red);
                    x = Some(p);
                    parent = self.node(p).parent;
                    is_left = parent.map(|gp| self.node(gp).left == Some(p)).unwrap_or(true);
                } else {
                    if outer_black {
                        if let Some(sr) = self.node(sibling).right {
                            self.set_color(sr, Color::Black);
                        }
                        self.set_color(sibling, Color::Red);
                        self.rotate_left(sibling);
                        sibling = self.node(p).left.unwrap();
                    }
                    self.set_color(sibling, self.color_of(Some(p)));
                    self.set_color(p, Color::Black);
                    if let Some(sl) = self.node(sibling).left {
                        self.set_color(sl, Color::Black);
                    }
                    self.rotate_right(p);
                    x = self.root;
                    parent = None;
                }
            }
        }
        if let Some(x) = x {
            self.set_color(x, Color::Black);
        }
    }
}

/// Red-black tree engine. Construct with [`RbTreeEngine::new`]; every
/// instance registers itself with the process-wide [`TtlManager`] and
/// deregisters on drop.
pub struct RbTreeEngine {
    id: EngineId,
    tree: Mutex<Tree>,
}

impl RbTreeEngine {
    pub fn new() -> Arc<RbTreeEngine> {
        let id = next_engine_id();
        let engine = Arc::new(RbTreeEngine {
            id,
            tree: Mutex::new(Tree::new()),
        });
        let weak: std::sync::Weak<dyn StorageEngine> = Arc::downgrade(&engine);
        TtlManager::handle().register(id, weak);
        engine
    }

    /// Removes `key`'s node if it is present and past its deadline.
    fn evict_if_expired(tree: &mut Tree, key: &str) {
        let Some(n) = tree.find_node(key) else { return };
        if matches!(tree.node(n).expire_at, Some(expire_at) if expire_at <= now_secs()) {
            tree.remove(key);
        }
    }
}

impl Drop for RbTreeEngine {
    fn drop(&mut self) {
        TtlManager::handle().unregister(self.id);
    }
}

impl StorageEngine for RbTreeEngine {
    fn id(&self) -> EngineId {
        self.id
    }

    fn set(&self, key: Key, value: Value, ttl: i64) -> StoreResult<()> {
        let expire_at = if ttl > 0 { Some(now_secs() + ttl as u64) } else { None };

        {
            let mut tree = self.tree.lock();
            Self::evict_if_expired(&mut tree, &key);
            tree.insert(key.clone(), value, expire_at)?;
        }

        if let Some(expire_at) = expire_at {
            TtlManager::handle().arm(self.id, key, expire_at - now_secs());
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Value> {
        let mut tree = self.tree.lock();
        Self::evict_if_expired(&mut tree, key);
        tree.find_node(key).map(|n| tree.node(n).value.clone())
    }

    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn del(&self, key: &str) -> StoreResult<()> {
        let had_deadline = {
            let mut tree = self.tree.lock();
            let Some(entry) = tree.remove(key) else {
                return Err(StoreError::KeyNotFound);
            };
            entry.expire_at.is_some()
        };
        if had_deadline {
            TtlManager::handle().disarm(self.id, key);
        }
        Ok(())
    }

    fn update(&self, key: &str, value: &Value, ttl: i64, mask: ParamMask) -> StoreResult<()> {
        let new_expire_at = {
            let mut tree = self.tree.lock();
            Self::evict_if_expired(&mut tree, key);
            let Some(n) = tree.find_node(key) else {
                return Err(StoreError::KeyNotFound);
            };
            let node = tree.node_mut(n);
            apply_mask(&mut node.value, value, mask);
            if mask.contains(ParamMask::TTL) {
                node.expire_at = if ttl > 0 { Some(now_secs() + ttl as u64) } else { None };
            }
            node.expire_at
        };

        if mask.contains(ParamMask::TTL) {
            match new_expire_at {
                Some(expire_at) => {
                    TtlManager::handle().arm(self.id, key.to_string(), expire_at.saturating_sub(now_secs()));
                }
                None => TtlManager::handle().disarm(self.id, key),
            }
        }
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> StoreResult<()> {
        let entry = {
            let mut tree = self.tree.lock();
            Self::evict_if_expired(&mut tree, old);
            let Some(n) = tree.find_node(old) else {
                return Err(StoreError::KeyNotFound);
            };
            if tree.find_node(new).is_some() {
                return Err(StoreError::KeyAlreadyExists);
            }
            let value = tree.node(n).value.clone();
            let expire_at = tree.node(n).expire_at;
            tree.remove(old);
            tree.insert(new.to_string(), value.clone(), expire_at)
                .expect("new key was just checked absent under the same lock");
            Entry { value, expire_at }
        };

        if let Some(expire_at) = entry.expire_at {
            TtlManager::handle().disarm(self.id, old);
            TtlManager::handle().arm(self.id, new.to_string(), expire_at.saturating_sub(now_secs()));
        }
        Ok(())
    }

    fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut tree = self.tree.lock();
        Self::evict_if_expired(&mut tree, key);
        let n = tree.find_node(key).ok_or(StoreError::KeyNotFound)?;
        match tree.node(n).expire_at {
            Some(expire_at) => Ok(expire_at.saturating_sub(now_secs()) as i64),
            None => Err(StoreError::HasNoTtl),
        }
    }

    fn keys(&self) -> Vec<Key> {
        let tree = self.tree.lock();
        tree.in_order().into_iter().map(|n| tree.node(n).key.clone()).collect()
    }

    fn find(&self, value: &Value, ttl: i64, mask: ParamMask) -> Vec<Key> {
        let now = now_secs();
        let tree = self.tree.lock();
        tree.in_order()
            .into_iter()
            .filter(|&n| {
                let node = tree.node(n);
                entry_matches(
                    &Entry {
                        value: node.value.clone(),
                        expire_at: node.expire_at,
                    },
                    value,
                    ttl,
                    mask,
                    now,
                )
            })
            .map(|n| tree.node(n).key.clone())
            .collect()
    }

    fn showall(&self) -> Vec<(Key, Value)> {
        let tree = self.tree.lock();
        tree.in_order()
            .into_iter()
            .map(|n| (tree.node(n).key.clone(), tree.node(n).value.clone()))
            .collect()
    }

    fn import(&self, path: &Path) -> StoreResult<usize> {
        let records = kv_codec::load(path)?;
        let mut inserted = 0;
        for (key, value) in records {
            if self.set(key, value, 0).is_ok() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn export(&self, path: &Path) -> StoreResult<usize> {
        let records = self.showall();
        kv_codec::save(path, &records)
    }

    fn size(&self) -> usize {
        self.tree.lock().size
    }
}
