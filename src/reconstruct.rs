//! Rebuilds the `parent` back-references of a descriptor tree.
//!
//! The wire format has no way to express the parent relation, so every tree
//! that crosses it (a full snapshot, or the descriptor of an `Add` change)
//! arrives with `parent` unset and has to go through [`reconstruct`] before it
//! is attached to a replica.

use std::path::PathBuf;

use crate::descriptor::Descriptor;

/// Marks `tree` as a root and points every descendant at its directory.
/// Running it more than once changes nothing.
pub fn reconstruct(tree: &mut Descriptor) {
    tree.parent = None;
    reconstruct_children(tree);
}

/// Like [`reconstruct`], but for a subtree that hangs below `parent`.
pub fn reconstruct_under(subtree: &mut Descriptor, parent: Option<PathBuf>) {
    subtree.parent = parent;
    reconstruct_children(subtree);
}

fn reconstruct_children(directory: &mut Descriptor) {
    let path = directory.path.clone();

    if let Some(children) = directory.children_mut() {
        for child in children {
            child.parent = Some(path.clone());
            reconstruct_children(child);
        }
    }
}

/// Checks that every `parent` in the tree agrees with the `children` edges.
pub fn is_consistent(tree: &Descriptor) -> bool {
    tree.descendants().all(|directory| {
        directory
            .children()
            .iter()
            .all(|child| child.parent.as_deref() == Some(directory.path.as_path()))
    })
}
