//! The host's canonical, versioned view of a single workspace root.

use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    descriptor::Descriptor,
    interface::{ChangeDescriptor, ChangesResponse, DeltaBatch, FullSnapshot, RawEvent, RootInfo},
    merge::{apply_change, ApplyResult},
    reconstruct::reconstruct,
    scan::{describe_path, ScanError, ScanRules},
    sorting::{sort_recursive, SortConfig},
};

/// Owns the canonical tree of one root together with the log of changes that
/// produced it.
///
/// Every recorded change bumps the version by exactly one, so the retained log
/// always covers a contiguous range ending at the current version. Clients
/// that fall behind that range get a full snapshot instead of a delta.
#[derive(Debug)]
pub struct ChangeLogRoot {
    root_path: PathBuf,
    tree: Descriptor,
    version: u64,
    log: VecDeque<ChangeDescriptor>,
    log_capacity: usize,
    rules: Arc<ScanRules>,
    sort: SortConfig,
}

impl ChangeLogRoot {
    /// Scans `root_path` from disk and starts a log at version 0.
    pub fn open(
        root_path: &Path,
        rules: Arc<ScanRules>,
        log_capacity: usize,
    ) -> Result<Self, ScanError> {
        log::trace!("Scanning root {}", root_path.display());

        let tree = describe_path(root_path, &rules)?;
        if !tree.is_dir() {
            return Err(ScanError::Io {
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not a directory", root_path.display()),
                ),
            });
        }

        Ok(Self::from_tree(tree, rules, log_capacity))
    }

    /// Starts a log at version 0 on top of an already built tree.
    pub fn from_tree(mut tree: Descriptor, rules: Arc<ScanRules>, log_capacity: usize) -> Self {
        let sort = SortConfig::default();
        reconstruct(&mut tree);
        sort_recursive(&mut tree, &sort);

        Self {
            root_path: tree.path.clone(),
            tree,
            version: 0,
            log: VecDeque::new(),
            log_capacity,
            rules,
            sort,
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn tree(&self) -> &Descriptor {
        &self.tree
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn retained_changes(&self) -> usize {
        self.log.len()
    }

    pub fn info(&self) -> RootInfo {
        RootInfo {
            root_path: self.root_path.clone(),
            version: self.version,
            retained_changes: self.log.len(),
        }
    }

    /// Answers a client that last saw `since`.
    pub fn changes_since(&self, since: Option<u64>) -> ChangesResponse {
        // The retained log covers (oldest_known, version].
        let oldest_known = self.version - self.log.len() as u64;

        match since {
            Some(since) if since >= oldest_known && since <= self.version => {
                let skip = (since - oldest_known) as usize;

                ChangesResponse::Delta(DeltaBatch {
                    changes: self.log.iter().skip(skip).cloned().collect(),
                    current_version: self.version,
                })
            }
            _ => {
                log::debug!(
                    "Sending full snapshot of {} at version {} (client had {:?})",
                    self.root_path.display(),
                    self.version,
                    since
                );

                ChangesResponse::Snapshot(FullSnapshot {
                    descriptor: self.tree.clone(),
                    current_version: self.version,
                })
            }
        }
    }

    /// Turns one raw filesystem event into zero or more recorded changes and
    /// applies them to the canonical tree. Returns what was recorded.
    pub fn record(&mut self, event: &RawEvent) -> Vec<ChangeDescriptor> {
        let mut recorded = Vec::new();

        match event {
            RawEvent::Create { path } | RawEvent::Write { path } => {
                recorded.extend(self.record_upsert(path));
            }
            RawEvent::Remove { path } => {
                recorded.extend(self.record_remove(path));
            }
            RawEvent::Rename { from, to } => {
                recorded.extend(self.record_remove(from));
                recorded.extend(self.record_upsert(to));
            }
        }

        recorded
    }

    /// Whether events for `path` belong to this root at all.
    fn is_tracked(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root_path) {
            Ok(relative) => !self.rules.is_ignored(relative),
            Err(_) => false,
        }
    }

    fn record_upsert(&mut self, path: &Path) -> Option<ChangeDescriptor> {
        if !self.is_tracked(path) {
            log::trace!("Dropping event for untracked path {}", path.display());
            return None;
        }

        // Watchers may report a file before the directory that holds it. The
        // outermost directory we don't know yet is added in one piece.
        let mut target = path;
        while target != self.root_path {
            match target.parent() {
                Some(parent) if self.tree.find(parent).is_none() => target = parent,
                _ => break,
            }
        }

        // A file we know about has turned into a directory without telling us.
        if let Some(parent) = target.parent() {
            let parent_is_file = self.tree.find(parent).is_some_and(Descriptor::is_file);
            if target != self.root_path && parent_is_file {
                target = parent;
            }
        }

        let descriptor = match describe_path(target, &self.rules) {
            Ok(descriptor) => descriptor,
            Err(ScanError::Io { source }) if source.kind() == io::ErrorKind::NotFound => {
                log::debug!("{} is already gone, nothing to record", target.display());
                return None;
            }
            Err(err) => {
                log::warn!("Could not describe {}: {}", target.display(), err);
                return None;
            }
        };

        let change = if self.tree.find(target).is_some() {
            ChangeDescriptor::change(descriptor, 0)
        } else {
            ChangeDescriptor::add(descriptor, 0)
        };

        self.push(change)
    }

    fn record_remove(&mut self, path: &Path) -> Option<ChangeDescriptor> {
        if !self.is_tracked(path) {
            log::trace!("Dropping event for untracked path {}", path.display());
            return None;
        }

        if self.tree.find(path).is_none() {
            log::debug!("Remove for unknown path {}, ignoring", path.display());
            return None;
        }

        self.push(ChangeDescriptor::remove(path, 0))
    }

    /// Applies `change` to the canonical tree and, if it took, logs it under
    /// the next version.
    fn push(&mut self, mut change: ChangeDescriptor) -> Option<ChangeDescriptor> {
        change.version = self.version + 1;

        if apply_change(&mut self.tree, &change, &self.sort) == ApplyResult::Skipped {
            log::warn!(
                "Change for {} did not apply to the canonical tree, not recording it",
                change.path.display()
            );
            return None;
        }

        self.version = change.version;

        log::trace!(
            "{} v{}: {:?} {}",
            self.root_path.display(),
            self.version,
            change.event,
            change.path.display()
        );

        self.log.push_back(change.clone());
        while self.log.len() > self.log_capacity {
            self.log.pop_front();
        }

        Some(change)
    }
}
