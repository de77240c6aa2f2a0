//! Applies ordered batches of [`ChangeDescriptor`]s to a descriptor tree.
//!
//! The same code path runs on both sides of the connection: the host applies
//! each change to its canonical tree as it is recorded, and clients apply the
//! batches they pull to their replicas. That keeps a replayed log and a
//! snapshot taken at the same version structurally identical.

use std::path::Path;

use crate::{
    descriptor::Descriptor,
    interface::{ChangeDescriptor, ChangeEvent},
    reconstruct::reconstruct_under,
    sorting::{sort_children, sort_recursive, SortConfig},
};

/// What happened to a single change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    Applied,
    /// The change could not be applied against this tree and was dropped.
    Skipped,
    /// The change removed the root itself. Dropping the root is up to the
    /// owner of the tree.
    RootRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub tree: Descriptor,
    pub root_removed: bool,
    pub applied: usize,
    pub skipped: usize,
}

/// Applies `changes` in order to a copy of `base` and returns the result.
/// `base` is left untouched.
///
/// Changes that reference paths this tree doesn't know about are skipped with
/// a warning; the rest of the batch still applies. Processing stops at a
/// change that removes the root.
pub fn merge_changes(
    changes: &[ChangeDescriptor],
    base: &Descriptor,
    config: &SortConfig,
) -> MergeOutcome {
    let mut outcome = MergeOutcome {
        tree: base.clone(),
        root_removed: false,
        applied: 0,
        skipped: 0,
    };

    for change in changes {
        match apply_change(&mut outcome.tree, change, config) {
            ApplyResult::Applied => outcome.applied += 1,
            ApplyResult::Skipped => outcome.skipped += 1,
            ApplyResult::RootRemoved => {
                outcome.root_removed = true;
                break;
            }
        }
    }

    outcome
}

/// Applies one change to `tree` in place.
pub fn apply_change(
    tree: &mut Descriptor,
    change: &ChangeDescriptor,
    config: &SortConfig,
) -> ApplyResult {
    match change.event {
        ChangeEvent::Add => apply_add(tree, change, config),
        ChangeEvent::Change => apply_update(tree, change, config),
        ChangeEvent::Remove => apply_remove(tree, &change.path),
    }
}

fn fresh_descriptor(change: &ChangeDescriptor) -> Option<&Descriptor> {
    let Some(descriptor) = &change.descriptor else {
        log::warn!(
            "Skipping {:?} for {}: no descriptor was sent",
            change.event,
            change.path.display()
        );
        return None;
    };

    if descriptor.path != change.path {
        log::warn!(
            "Skipping {:?} for {}: descriptor is for {}",
            change.event,
            change.path.display(),
            descriptor.path.display()
        );
        return None;
    }

    Some(descriptor)
}

fn apply_add(
    tree: &mut Descriptor,
    change: &ChangeDescriptor,
    config: &SortConfig,
) -> ApplyResult {
    let Some(descriptor) = fresh_descriptor(change) else {
        return ApplyResult::Skipped;
    };

    // A redelivered Add must not create a second node for the same path.
    if tree.find(&change.path).is_some() {
        log::debug!(
            "Add for already known path {}, applying as a change",
            change.path.display()
        );
        return apply_update(tree, change, config);
    }

    let Some(parent_path) = change.path.parent() else {
        log::warn!("Skipping add of {}: path has no parent", change.path.display());
        return ApplyResult::Skipped;
    };

    let Some(parent) = tree.find_mut(parent_path) else {
        log::warn!(
            "Skipping add of {}: parent directory {} is not known yet",
            change.path.display(),
            parent_path.display()
        );
        return ApplyResult::Skipped;
    };

    let mut node = descriptor.clone();
    reconstruct_under(&mut node, Some(parent_path.to_path_buf()));
    sort_recursive(&mut node, config);

    match parent.children_mut() {
        Some(children) => children.push(node),
        None => {
            log::warn!(
                "Skipping add of {}: {} is not a directory",
                change.path.display(),
                parent_path.display()
            );
            return ApplyResult::Skipped;
        }
    }

    sort_children(parent, config);
    ApplyResult::Applied
}

fn apply_update(
    tree: &mut Descriptor,
    change: &ChangeDescriptor,
    config: &SortConfig,
) -> ApplyResult {
    let Some(descriptor) = fresh_descriptor(change) else {
        return ApplyResult::Skipped;
    };

    let Some(existing) = tree.find_mut(&change.path) else {
        log::warn!(
            "Skipping change of {}: path is not known",
            change.path.display()
        );
        return ApplyResult::Skipped;
    };

    let mut reorder = existing.name != descriptor.name
        || existing.modified_time != descriptor.modified_time
        || existing.created_time != descriptor.created_time;

    if !existing.copy_metadata_from(descriptor) {
        // A file became a directory or the other way around.
        let parent = existing.parent.clone();
        *existing = descriptor.clone();
        reconstruct_under(existing, parent);
        sort_recursive(existing, config);
        reorder = true;
    }

    if reorder && change.path != tree.path {
        if let Some(parent) = change.path.parent().and_then(|path| tree.find_mut(path)) {
            sort_children(parent, config);
        }
    }

    ApplyResult::Applied
}

fn apply_remove(tree: &mut Descriptor, path: &Path) -> ApplyResult {
    if path == tree.path {
        return ApplyResult::RootRemoved;
    }

    let children = path
        .parent()
        .and_then(|parent_path| tree.find_mut(parent_path))
        .and_then(Descriptor::children_mut);

    let Some(children) = children else {
        log::debug!("Ignoring removal of {}: parent is not known", path.display());
        return ApplyResult::Skipped;
    };

    let before = children.len();
    children.retain(|child| child.path != path);

    if children.len() == before {
        log::debug!("Ignoring removal of unknown path {}", path.display());
        return ApplyResult::Skipped;
    }

    ApplyResult::Applied
}
