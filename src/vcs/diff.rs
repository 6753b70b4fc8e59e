//! Showing what a sync would do, without doing it

use crate::error::{CatfsError, Result};
use crate::linker::Linker;
use crate::nodes::{Commit, Node};
use crate::vcs::change::ChangeType;
use crate::vcs::resolve::{Executor, Resolver};
use crate::vcs::sync::SyncConfig;
use serde::Serialize;

/// Two nodes and what happened to them on either side
#[derive(Debug, Clone, PartialEq)]
pub struct DiffPair {
    pub src: Node,
    pub dst: Node,
    pub src_mask: ChangeType,
    pub dst_mask: ChangeType,
}

/// Outcome of a dry-run sync, grouped by decision
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    /// Remote nodes we do not have yet
    pub added: Vec<Node>,
    /// Our nodes that were removed remotely
    pub removed: Vec<Node>,
    /// Nodes a sync would leave alone
    pub ignored: Vec<Node>,
    /// Our nodes the remote never had
    pub missing: Vec<Node>,
    pub moved: Vec<DiffPair>,
    /// Changes on both sides that can be combined
    pub merged: Vec<DiffPair>,
    pub conflict: Vec<DiffPair>,
}

#[derive(Serialize)]
struct NodeView {
    path: String,
    #[serde(rename = "type")]
    node_type: String,
    content: String,
}

impl From<&Node> for NodeView {
    fn from(nd: &Node) -> Self {
        Self {
            path: nd.path(),
            node_type: nd.node_type().to_string(),
            content: nd.content_hash().to_hex(),
        }
    }
}

#[derive(Serialize)]
struct PairView {
    src: NodeView,
    dst: NodeView,
    src_mask: String,
    dst_mask: String,
}

impl From<&DiffPair> for PairView {
    fn from(pair: &DiffPair) -> Self {
        Self {
            src: NodeView::from(&pair.src),
            dst: NodeView::from(&pair.dst),
            src_mask: pair.src_mask.to_string(),
            dst_mask: pair.dst_mask.to_string(),
        }
    }
}

#[derive(Serialize)]
struct DiffView {
    added: Vec<NodeView>,
    removed: Vec<NodeView>,
    ignored: Vec<NodeView>,
    missing: Vec<NodeView>,
    moved: Vec<PairView>,
    merged: Vec<PairView>,
    conflict: Vec<PairView>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.ignored.is_empty()
            && self.missing.is_empty()
            && self.moved.is_empty()
            && self.merged.is_empty()
            && self.conflict.is_empty()
    }

    /// Render as JSON, with nodes reduced to path, type and content hash
    pub fn to_json(&self) -> Result<String> {
        let nodes = |list: &[Node]| -> Vec<NodeView> { list.iter().map(NodeView::from).collect() };
        let pairs = |list: &[DiffPair]| -> Vec<PairView> { list.iter().map(PairView::from).collect() };

        let view = DiffView {
            added: nodes(&self.added),
            removed: nodes(&self.removed),
            ignored: nodes(&self.ignored),
            missing: nodes(&self.missing),
            moved: pairs(&self.moved),
            merged: pairs(&self.merged),
            conflict: pairs(&self.conflict),
        };

        serde_json::to_string_pretty(&view)
            .map_err(|err| CatfsError::InvalidOperation(format!("diff to json: {}", err)))
    }
}

struct Differ<'a> {
    cfg: &'a SyncConfig,
    diff: Diff,
}

impl Executor for Differ<'_> {
    fn handle_add(&mut self, src: &Node) -> Result<()> {
        self.diff.added.push(src.clone());
        Ok(())
    }

    fn handle_remove(&mut self, dst: &Node) -> Result<()> {
        if self.cfg.ignore_deletes {
            self.diff.ignored.push(dst.clone());
        } else {
            self.diff.removed.push(dst.clone());
        }
        Ok(())
    }

    fn handle_missing(&mut self, dst: &Node) -> Result<()> {
        self.diff.missing.push(dst.clone());
        Ok(())
    }

    fn handle_move(&mut self, src: &Node, dst: &Node) -> Result<()> {
        self.diff.moved.push(DiffPair {
            src: src.clone(),
            dst: dst.clone(),
            src_mask: ChangeType::MOVE,
            dst_mask: ChangeType::NONE,
        });
        Ok(())
    }

    fn handle_merge(
        &mut self,
        src: &Node,
        dst: &Node,
        src_mask: ChangeType,
        dst_mask: ChangeType,
    ) -> Result<()> {
        self.diff.merged.push(DiffPair {
            src: src.clone(),
            dst: dst.clone(),
            src_mask,
            dst_mask,
        });
        Ok(())
    }

    fn handle_conflict(
        &mut self,
        src: &Node,
        dst: &Node,
        src_mask: ChangeType,
        dst_mask: ChangeType,
    ) -> Result<()> {
        self.diff.conflict.push(DiffPair {
            src: src.clone(),
            dst: dst.clone(),
            src_mask,
            dst_mask,
        });
        Ok(())
    }

    fn handle_type_conflict(&mut self, _src: &Node, dst: &Node) -> Result<()> {
        self.diff.ignored.push(dst.clone());
        Ok(())
    }

    fn handle_conflict_node(&mut self, _nd: &Node) -> Result<()> {
        Ok(())
    }
}

/// Compute what syncing `src_head` of `lkr_src` into `dst_head` of `lkr_dst`
/// would do. Heads default to HEAD; nothing is written.
pub fn diff(
    lkr_src: &Linker,
    lkr_dst: &Linker,
    src_head: Option<Commit>,
    dst_head: Option<Commit>,
    cfg: &SyncConfig,
) -> Result<Diff> {
    let mut differ = Differ {
        cfg,
        diff: Diff::default(),
    };

    Resolver::new(lkr_src, lkr_dst, src_head, dst_head)?.resolve(&mut differ)?;
    Ok(differ.diff)
}
