//! Pulling the changes of a remote linker into our own
//!
//! The syncer is the writing [`Executor`]: it stages everything the resolver
//! decided on and, if anything changed, finalizes it into a merge commit that
//! remembers which remote state was merged.

use crate::error::{CatfsError, Result};
use crate::linker::coreutils::{self, StageInfo};
use crate::linker::Linker;
use crate::nodes::{path, Commit, File, Node};
use crate::vcs::change::ChangeType;
use crate::vcs::resolve::{conflict_name, Executor, Resolver, MAX_CONFLICT_COPIES};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// What to do with incompatible changes on both sides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Keep our version and put the remote one next to it as `<name>.conflict.<n>`
    #[default]
    Marker,
    /// Keep our version, drop the remote one
    Ignore,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub conflict_strategy: ConflictStrategy,
    /// Do not propagate remote removals
    pub ignore_deletes: bool,
}

pub struct Syncer<'a> {
    cfg: &'a SyncConfig,
    lkr_src: &'a Linker,
    lkr_dst: &'a Linker,
}

fn lookup_optional(lkr: &Linker, repo_path: &str) -> Result<Option<Node>> {
    match lkr.lookup_node(repo_path) {
        Ok(nd) => Ok(Some(nd)),
        Err(err) if err.is_no_such_file() => Ok(None),
        Err(err) => Err(err),
    }
}

fn stage_info(file: &File) -> StageInfo {
    StageInfo {
        content: file.content_hash(),
        backend: file.backend_hash(),
        size: file.size(),
        cached_size: file.cached_size(),
        key: file.key().to_vec(),
        mod_time: file.base.mod_time,
    }
}

impl<'a> Syncer<'a> {
    pub fn new(lkr_src: &'a Linker, lkr_dst: &'a Linker, cfg: &'a SyncConfig) -> Self {
        Self { cfg, lkr_src, lkr_dst }
    }

    /// Our current version of `nd`, skipping ghosts.
    /// Earlier decisions of the same run may have changed it.
    fn current(&self, nd: &Node) -> Result<Option<Node>> {
        match lookup_optional(self.lkr_dst, &nd.path())? {
            Some(Node::Ghost(_)) | None => Ok(None),
            Some(current) => Ok(Some(current)),
        }
    }

    fn is_free(&self, repo_path: &str) -> Result<bool> {
        Ok(matches!(lookup_optional(self.lkr_dst, repo_path)?, None | Some(Node::Ghost(_))))
    }

    /// Copy `src` (recursively, for directories) to `<parent>/<name>` on our side
    fn add(&self, src: &Node, parent: &str, name: &str) -> Result<()> {
        let dst_path = path::join(parent, name);

        match src {
            Node::File(file) => {
                coreutils::stage_with_full_info(self.lkr_dst, &dst_path, stage_info(file))?;
            }
            Node::Directory(dir) => {
                coreutils::mkdir(self.lkr_dst, &dst_path, true)?;
                for child in dir.children_sorted(self.lkr_src)? {
                    if child.is_ghost() {
                        continue;
                    }

                    self.add(&child, &dst_path, child.name())?;
                }
            }
            Node::Ghost(_) => {}
            Node::Commit(_) => {
                return Err(CatfsError::bad_node(format!("cannot add commit at {}", dst_path)))
            }
        }

        debug!(src = %src.path(), dst = %dst_path, "Added");
        Ok(())
    }

    /// Move our `dst` to `target`, if nothing lives there yet
    fn move_to(&self, dst: &Node, target: &str) -> Result<Option<Node>> {
        if !self.is_free(target)? {
            debug!(dst = %dst.path(), target, "Move target is taken");
            return Ok(None);
        }

        coreutils::mkdir(self.lkr_dst, &path::dirname(target), true)?;
        coreutils::move_node(self.lkr_dst, dst, target).map(Some)
    }

    /// Resolve and apply every decision, then commit if anything changed.
    /// Returns the merge commit, if one was made.
    #[instrument(skip(self))]
    pub fn sync(&mut self) -> Result<Option<Commit>> {
        let start = Instant::now();
        let src_owner = self.lkr_src.owner()?;
        let mut resolver = Resolver::new(self.lkr_src, self.lkr_dst, None, None)?;
        let src_head = resolver.src_head().tree_hash();
        let lkr_dst = self.lkr_dst;

        let merge = lkr_dst.atomic(|| {
            resolver.resolve(self)?;

            if !lkr_dst.have_staged_changes()? {
                return Ok(None);
            }

            lkr_dst.set_merge_marker(&src_owner, src_head)?;
            let message = format!("merge with {}", src_owner);
            lkr_dst.make_commit(&src_owner, &message).map(Some)
        })?;

        info!(
            with = %src_owner,
            merged = merge.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Sync finished"
        );
        Ok(merge)
    }
}

impl Executor for Syncer<'_> {
    fn handle_add(&mut self, src: &Node) -> Result<()> {
        let src_path = src.path();
        self.add(src, &path::dirname(&src_path), src.name())
    }

    fn handle_remove(&mut self, dst: &Node) -> Result<()> {
        if self.cfg.ignore_deletes {
            debug!(dst = %dst.path(), "Ignoring remote removal");
            return Ok(());
        }

        if let Some(current) = self.current(dst)? {
            coreutils::remove(self.lkr_dst, &current, true, true)?;
        }

        Ok(())
    }

    fn handle_missing(&mut self, dst: &Node) -> Result<()> {
        debug!(dst = %dst.path(), "Only present on our side");
        Ok(())
    }

    fn handle_move(&mut self, src: &Node, dst: &Node) -> Result<()> {
        let src_path = src.path();
        if src_path == dst.path() {
            return Ok(());
        }

        if let Some(current) = self.current(dst)? {
            self.move_to(&current, &src_path)?;
        }

        Ok(())
    }

    fn handle_merge(
        &mut self,
        src: &Node,
        dst: &Node,
        src_mask: ChangeType,
        dst_mask: ChangeType,
    ) -> Result<()> {
        let Some(mut target) = self.current(dst)? else {
            return Ok(());
        };

        // Follow the remote move unless we moved it ourselves.
        let src_path = src.path();
        if src_path != target.path()
            && src_mask.intersects(ChangeType::MOVE)
            && !dst_mask.intersects(ChangeType::MOVE)
        {
            if let Some(moved) = self.move_to(&target, &src_path)? {
                target = moved;
            }
        }

        if !src_mask.intersects(ChangeType::ADD | ChangeType::MODIFY) {
            return Ok(());
        }

        let (Some(src_file), Some(_)) = (src.as_file(), target.as_file()) else {
            return Err(CatfsError::bad_node(format!(
                "cannot merge {} {} into {} {}",
                src.node_type(),
                src_path,
                target.node_type(),
                target.path()
            )));
        };

        coreutils::stage_with_full_info(self.lkr_dst, &target.path(), stage_info(src_file))?;
        debug!(src = %src_path, dst = %target.path(), "Merged content");
        Ok(())
    }

    fn handle_conflict(
        &mut self,
        src: &Node,
        dst: &Node,
        src_mask: ChangeType,
        dst_mask: ChangeType,
    ) -> Result<()> {
        if self.cfg.conflict_strategy == ConflictStrategy::Ignore {
            debug!(dst = %dst.path(), "Ignoring conflict");
            return Ok(());
        }

        let dir = path::dirname(&dst.path());
        for n in 0..MAX_CONFLICT_COPIES {
            let name = conflict_name(dst.name(), n);
            if !self.is_free(&path::join(&dir, &name))? {
                continue;
            }

            info!(
                dst = %dst.path(),
                copy = %name,
                src_mask = %src_mask,
                dst_mask = %dst_mask,
                "Writing conflict copy"
            );
            return self.add(src, &dir, &name);
        }

        warn!(dst = %dst.path(), "Too many conflict copies, keeping our version only");
        Ok(())
    }

    fn handle_type_conflict(&mut self, src: &Node, dst: &Node) -> Result<()> {
        warn!(
            src = %src.path(),
            src_type = %src.node_type(),
            dst_type = %dst.node_type(),
            "Type conflict, leaving both alone"
        );
        Ok(())
    }

    fn handle_conflict_node(&mut self, nd: &Node) -> Result<()> {
        debug!(path = %nd.path(), "Skipping conflict copy");
        Ok(())
    }
}

/// Pull every change of `lkr_src` into `lkr_dst`
pub fn sync(lkr_src: &Linker, lkr_dst: &Linker, cfg: &SyncConfig) -> Result<Option<Commit>> {
    Syncer::new(lkr_src, lkr_dst, cfg).sync()
}
