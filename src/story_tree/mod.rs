//! Branching story tree: an arena of nodes keyed by id, never owning
//! references. Every mutating operation emits a [`DeltaPair`] over the
//! tree's own `{nodes, root_node_id}` document shape so tree edits are as
//! undoable as any other state change.

pub mod error;

pub use error::{Result, TreeError};

use crate::delta::{diff, DeltaPair};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Player,
    Writer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub actor: Actor,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director_thinking: Option<String>,
}

/// The world/memory delta bundle required to reach this node from its
/// parent. Distinct from the `DeltaPair` a tree *operation* itself returns:
/// this one is replayed during navigation/undo over the *game* documents,
/// not over the tree's own structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryNode {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub children_ids: Vec<Uuid>,
    pub turn: Turn,
    pub deltas: Vec<DeltaPair>,
}

impl Default for Turn {
    fn default() -> Self {
        Turn {
            actor: Actor::Player,
            text: String::new(),
            director_thinking: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct StoryTree {
    nodes: HashMap<Uuid, StoryNode>,
    root_id: Option<Uuid>,
}

impl StoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_id(&self) -> Option<Uuid> {
        self.root_id
    }

    pub fn get_node(&self, id: Uuid) -> Option<&StoryNode> {
        self.nodes.get(&id)
    }

    pub fn get_root_node(&self) -> Result<&StoryNode> {
        let id = self.root_id.ok_or(TreeError::EmptyTree)?;
        Ok(self.nodes.get(&id).expect("root id always resolves"))
    }

    fn to_doc(&self) -> Value {
        serde_json::json!({
            "nodes": serde_json::to_value(&self.nodes).unwrap_or(Value::Null),
            "root_node_id": self.root_id.map(|id| id.to_string()),
        })
    }

    fn delta_between(before: &Value, after: &Value) -> DeltaPair {
        DeltaPair {
            apply: diff(before, after, ""),
            revert: diff(after, before, ""),
        }
    }

    /// Appends `node`. If `node.parent_id` is `None` this becomes the root
    /// (fails if a root already exists); otherwise it is appended to the
    /// parent's `children_ids`.
    pub fn add_node(&mut self, node: StoryNode) -> Result<DeltaPair> {
        if self.nodes.contains_key(&node.id) {
            return Err(TreeError::WouldCreateCycle(node.id));
        }
        match node.parent_id {
            None => {
                if self.root_id.is_some() {
                    return Err(TreeError::RootAlreadyExists);
                }
            }
            Some(pid) => {
                if !self.nodes.contains_key(&pid) {
                    return Err(TreeError::NotFound(pid));
                }
            }
        }

        let before = self.to_doc();
        let id = node.id;
        let parent_id = node.parent_id;
        self.nodes.insert(id, node);
        if let Some(pid) = parent_id {
            self.nodes.get_mut(&pid).unwrap().children_ids.push(id);
        } else {
            self.root_id = Some(id);
        }
        let after = self.to_doc();
        Ok(Self::delta_between(&before, &after))
    }

    /// Replaces only the `turn` payload of `id`; children and carried
    /// deltas are untouched.
    pub fn edit_node(&mut self, id: Uuid, new_turn: Turn) -> Result<DeltaPair> {
        if !self.nodes.contains_key(&id) {
            return Err(TreeError::NotFound(id));
        }
        let before = self.to_doc();
        self.nodes.get_mut(&id).unwrap().turn = new_turn;
        let after = self.to_doc();
        Ok(Self::delta_between(&before, &after))
    }

    /// Replaces both `turn` and `deltas` of `id`.
    pub fn update_node(&mut self, id: Uuid, new_turn: Turn, new_deltas: Vec<DeltaPair>) -> Result<DeltaPair> {
        if !self.nodes.contains_key(&id) {
            return Err(TreeError::NotFound(id));
        }
        let before = self.to_doc();
        {
            let n = self.nodes.get_mut(&id).unwrap();
            n.turn = new_turn;
            n.deltas = new_deltas;
        }
        let after = self.to_doc();
        Ok(Self::delta_between(&before, &after))
    }

    /// Deletes `id` and every descendant. Forbidden on the root. Returns the
    /// deleted nodes in leaf-first order (so undo can re-insert
    /// parent-first) plus the delta pair restoring the exact prior state,
    /// `children_ids` order included.
    pub fn delete_branch(&mut self, id: Uuid) -> Result<(Vec<StoryNode>, DeltaPair)> {
        if Some(id) == self.root_id {
            return Err(TreeError::CannotDeleteRoot);
        }
        if !self.nodes.contains_key(&id) {
            return Err(TreeError::NotFound(id));
        }
        let before = self.to_doc();

        let parent_id = self.nodes.get(&id).unwrap().parent_id;
        if let Some(pid) = parent_id {
            if let Some(parent) = self.nodes.get_mut(&pid) {
                parent.children_ids.retain(|&c| c != id);
            }
        }

        // Depth-first collect descendants, leaf-first.
        let mut to_visit = vec![id];
        let mut order = Vec::new();
        while let Some(cur) = to_visit.pop() {
            order.push(cur);
            if let Some(n) = self.nodes.get(&cur) {
                to_visit.extend(n.children_ids.iter().copied());
            }
        }
        // `order` is currently root-of-branch-first (pre-order-ish); reverse
        // so descendants come out before their ancestors.
        order.reverse();
        let removed: Vec<StoryNode> = order
            .into_iter()
            .filter_map(|nid| self.nodes.remove(&nid))
            .collect();

        let after = self.to_doc();
        Ok((removed, Self::delta_between(&before, &after)))
    }

    /// Root-first path from the root to `id`.
    pub fn get_path_to_node(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let mut path = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let node = self.nodes.get(&c).ok_or(TreeError::NotFound(c))?;
            path.push(c);
            cur = node.parent_id;
        }
        path.reverse();
        Ok(path)
    }

    /// 1 at the root, incrementing per generation.
    pub fn get_depth(&self, id: Uuid) -> Result<usize> {
        Ok(self.get_path_to_node(id)?.len())
    }

    /// The lowest common ancestor of two nodes, found by walking both
    /// root-prefixed paths to their longest common prefix.
    pub fn lowest_common_ancestor(&self, a: Uuid, b: Uuid) -> Result<Uuid> {
        let path_a = self.get_path_to_node(a)?;
        let path_b = self.get_path_to_node(b)?;
        let mut lca = path_a[0];
        for (x, y) in path_a.iter().zip(path_b.iter()) {
            if x == y {
                lca = *x;
            } else {
                break;
            }
        }
        Ok(lca)
    }

    /// The last `n` turns on the root-to-`id` path, in narrative order.
    pub fn get_recent_turns(&self, id: Uuid, n: usize) -> Result<Vec<Turn>> {
        let path = self.get_path_to_node(id)?;
        let start = path.len().saturating_sub(n);
        Ok(path[start..]
            .iter()
            .map(|nid| self.nodes.get(nid).unwrap().turn.clone())
            .collect())
    }

    /// Breadth-first frontier of node ids at depth `d` (root is depth 1).
    pub fn get_nodes_at_turn(&self, d: usize) -> Vec<Uuid> {
        let Some(root) = self.root_id else { return Vec::new() };
        let mut frontier = vec![root];
        let mut depth = 1;
        while depth < d {
            let mut next = Vec::new();
            for nid in &frontier {
                if let Some(n) = self.nodes.get(nid) {
                    next.extend(n.children_ids.iter().copied());
                }
            }
            if next.is_empty() {
                return Vec::new();
            }
            frontier = next;
            depth += 1;
        }
        frontier
    }

    /// The deepest node reachable from the root; ties broken by first
    /// discovery in breadth-first order.
    pub fn get_deepest_node(&self) -> Option<Uuid> {
        let root = self.root_id?;
        let mut frontier = vec![root];
        let mut deepest = root;
        while !frontier.is_empty() {
            deepest = frontier[0];
            let mut next = Vec::new();
            for nid in &frontier {
                if let Some(n) = self.nodes.get(nid) {
                    next.extend(n.children_ids.iter().copied());
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Some(deepest)
    }

    /// Every tree invariant currently holds: at most one root, every
    /// `children_ids` reference resolves, every non-root `parent_id`
    /// resolves, no cycles.
    pub fn check_invariants(&self) -> Result<()> {
        if let Some(root) = self.root_id {
            if !self.nodes.contains_key(&root) {
                return Err(TreeError::NotFound(root));
            }
        }
        for node in self.nodes.values() {
            for child in &node.children_ids {
                if !self.nodes.contains_key(child) {
                    return Err(TreeError::NotFound(*child));
                }
            }
            if let Some(pid) = node.parent_id {
                if !self.nodes.contains_key(&pid) {
                    return Err(TreeError::NotFound(pid));
                }
            } else if Some(node.id) != self.root_id {
                return Err(TreeError::EmptyTree);
            }
        }
        let mut seen = std::collections::HashSet::new();
        for mut cur in self.nodes.keys().copied() {
            let mut path = std::collections::HashSet::new();
            while let Some(n) = self.nodes.get(&cur) {
                if !path.insert(cur) {
                    return Err(TreeError::WouldCreateCycle(cur));
                }
                if seen.contains(&cur) {
                    break;
                }
                match n.parent_id {
                    Some(p) => cur = p,
                    None => break,
                }
            }
            seen.extend(path);
        }
        Ok(())
    }

    pub fn serialize(&self) -> Value {
        self.to_doc()
    }

    pub fn deserialize(value: &Value) -> Result<Self> {
        let nodes: HashMap<Uuid, StoryNode> = serde_json::from_value(
            value.get("nodes").cloned().unwrap_or(Value::Null),
        )
        .map_err(|_| TreeError::EmptyTree)?;
        let root_id = value
            .get("root_node_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        Ok(Self { nodes, root_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(parent: Option<Uuid>, text: &str) -> StoryNode {
        StoryNode {
            id: Uuid::new_v4(),
            parent_id: parent,
            children_ids: Vec::new(),
            turn: Turn {
                actor: Actor::Player,
                text: text.to_string(),
                director_thinking: None,
            },
            deltas: Vec::new(),
        }
    }

    #[test]
    fn add_root_then_children_builds_valid_tree() {
        let mut tree = StoryTree::new();
        let root = leaf(None, "start");
        let root_id = root.id;
        tree.add_node(root).unwrap();
        let child = leaf(Some(root_id), "turn 1");
        let child_id = child.id;
        tree.add_node(child).unwrap();
        tree.check_invariants().unwrap();
        assert_eq!(tree.get_path_to_node(child_id).unwrap(), vec![root_id, child_id]);
        assert_eq!(tree.get_depth(child_id).unwrap(), 2);
    }

    #[test]
    fn second_root_is_rejected() {
        let mut tree = StoryTree::new();
        tree.add_node(leaf(None, "a")).unwrap();
        let err = tree.add_node(leaf(None, "b"));
        assert!(matches!(err, Err(TreeError::RootAlreadyExists)));
    }

    #[test]
    fn deleting_root_is_rejected() {
        let mut tree = StoryTree::new();
        let root = leaf(None, "a");
        let root_id = root.id;
        tree.add_node(root).unwrap();
        assert!(matches!(tree.delete_branch(root_id), Err(TreeError::CannotDeleteRoot)));
    }

    #[test]
    fn delete_branch_removes_descendants_leaf_first_and_is_undoable() {
        let mut tree = StoryTree::new();
        let root = leaf(None, "root");
        let root_id = root.id;
        tree.add_node(root).unwrap();
        let a = leaf(Some(root_id), "a");
        let a_id = a.id;
        tree.add_node(a).unwrap();
        let b = leaf(Some(a_id), "b");
        let b_id = b.id;
        tree.add_node(b).unwrap();

        let (removed, delta) = tree.delete_branch(a_id).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].id, b_id); // leaf first
        assert_eq!(removed[1].id, a_id);
        assert!(tree.get_node(a_id).is_none());
        assert!(tree.get_node(b_id).is_none());

        let mut doc = tree.serialize();
        crate::delta::apply_ops(&mut doc, &delta.revert).unwrap();
        let restored = StoryTree::deserialize(&doc).unwrap();
        assert!(restored.get_node(a_id).is_some());
        assert!(restored.get_node(b_id).is_some());
        assert_eq!(
            restored.get_root_node().unwrap().children_ids,
            vec![a_id]
        );
    }

    #[test]
    fn lca_of_two_siblings_is_their_parent() {
        let mut tree = StoryTree::new();
        let root = leaf(None, "root");
        let root_id = root.id;
        tree.add_node(root).unwrap();
        let a = leaf(Some(root_id), "a");
        let a_id = a.id;
        tree.add_node(a).unwrap();
        let b = leaf(Some(root_id), "b");
        let b_id = b.id;
        tree.add_node(b).unwrap();
        assert_eq!(tree.lowest_common_ancestor(a_id, b_id).unwrap(), root_id);
    }

    #[test]
    fn nodes_at_turn_returns_breadth_first_frontier() {
        let mut tree = StoryTree::new();
        let root = leaf(None, "root");
        let root_id = root.id;
        tree.add_node(root).unwrap();
        let a = leaf(Some(root_id), "a");
        let a_id = a.id;
        tree.add_node(a).unwrap();
        let b = leaf(Some(root_id), "b");
        let b_id = b.id;
        tree.add_node(b).unwrap();
        let frontier = tree.get_nodes_at_turn(2);
        assert_eq!(frontier.len(), 2);
        assert!(frontier.contains(&a_id));
        assert!(frontier.contains(&b_id));
    }
}
