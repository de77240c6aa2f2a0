//! Defines the descriptor tree: the in-memory representation of a workspace
//! root and everything under it.
//!
//! Directories own their children. The `parent` relation is a derived,
//! non-owning back-reference stored as the parent's path; it is never
//! serialized and can always be rebuilt with [`crate::reconstruct`].

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// One filesystem entity (directory or file) plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Absolute path. Unique among the live descriptors of a root.
    pub path: PathBuf,

    pub name: String,

    /// Milliseconds since the Unix epoch.
    pub modified_time: u64,

    /// Milliseconds since the Unix epoch.
    pub created_time: u64,

    /// Path of the enclosing directory, or `None` for a root. Not part of the
    /// wire format.
    #[serde(skip)]
    pub parent: Option<PathBuf>,

    #[serde(flatten)]
    pub kind: DescriptorKind,
}

/// The variant-specific part of a [`Descriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DescriptorKind {
    /// Children are kept in display order, see [`crate::sorting`].
    Directory {
        #[serde(default)]
        children: Vec<Descriptor>,
    },

    MarkdownFile {
        size: u64,
    },

    CodeFile {
        size: u64,
        /// Language tag derived from the file extension, e.g. `rust`.
        language: String,
    },

    OtherFile {
        size: u64,
        extension: String,
    },
}

impl Descriptor {
    pub fn directory<P: Into<PathBuf>>(path: P, children: Vec<Descriptor>) -> Self {
        Self::new(path.into(), DescriptorKind::Directory { children })
    }

    pub fn markdown_file<P: Into<PathBuf>>(path: P, size: u64) -> Self {
        Self::new(path.into(), DescriptorKind::MarkdownFile { size })
    }

    pub fn code_file<P: Into<PathBuf>, S: Into<String>>(path: P, size: u64, language: S) -> Self {
        Self::new(
            path.into(),
            DescriptorKind::CodeFile {
                size,
                language: language.into(),
            },
        )
    }

    pub fn other_file<P: Into<PathBuf>>(path: P, size: u64) -> Self {
        let path = path.into();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_owned();

        Self::new(path, DescriptorKind::OtherFile { size, extension })
    }

    fn new(path: PathBuf, kind: DescriptorKind) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            path,
            name,
            modified_time: 0,
            created_time: 0,
            parent: None,
            kind,
        }
    }

    pub fn with_times(mut self, modified_time: u64, created_time: u64) -> Self {
        self.modified_time = modified_time;
        self.created_time = created_time;
        self
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, DescriptorKind::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// The immediate children of a directory. Files have none.
    pub fn children(&self) -> &[Descriptor] {
        match &self.kind {
            DescriptorKind::Directory { children } => children,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Descriptor>> {
        match &mut self.kind {
            DescriptorKind::Directory { children } => Some(children),
            _ => None,
        }
    }

    /// File size in bytes, or `None` for directories.
    pub fn size(&self) -> Option<u64> {
        match &self.kind {
            DescriptorKind::Directory { .. } => None,
            DescriptorKind::MarkdownFile { size }
            | DescriptorKind::CodeFile { size, .. }
            | DescriptorKind::OtherFile { size, .. } => Some(*size),
        }
    }

    /// Finds the descriptor with exactly the given path in this subtree.
    ///
    /// Only descends into children whose path is an ancestor of `path`, so a
    /// lookup costs one step per path component.
    pub fn find(&self, path: &Path) -> Option<&Descriptor> {
        let mut current = self;

        loop {
            if current.path == path {
                return Some(current);
            }

            if !path.starts_with(&current.path) {
                return None;
            }

            current = current
                .children()
                .iter()
                .find(|child| path.starts_with(&child.path))?;
        }
    }

    pub fn find_mut(&mut self, path: &Path) -> Option<&mut Descriptor> {
        if self.path == path {
            return Some(self);
        }

        if !path.starts_with(&self.path) {
            return None;
        }

        self.children_mut()?
            .iter_mut()
            .find(|child| path.starts_with(&child.path))?
            .find_mut(path)
    }

    /// Copies the mutable metadata of `other` onto this descriptor. Never
    /// touches `parent` or `children`, so subtrees stay attached.
    ///
    /// Returns `false` without changing anything if `other` is of a different
    /// shape (directory versus file); the caller has to replace the node.
    pub fn copy_metadata_from(&mut self, other: &Descriptor) -> bool {
        match (&mut self.kind, &other.kind) {
            (DescriptorKind::Directory { .. }, DescriptorKind::Directory { .. }) => {}
            (DescriptorKind::Directory { .. }, _) | (_, DescriptorKind::Directory { .. }) => {
                return false;
            }
            (kind, other_kind) => *kind = other_kind.clone(),
        }

        self.name.clone_from(&other.name);
        self.modified_time = other.modified_time;
        self.created_time = other.created_time;
        true
    }

    /// Iterates over this descriptor and all of its descendants, breadth
    /// first.
    pub fn descendants(&self) -> Descendants<'_> {
        let mut queue = VecDeque::new();
        queue.push_back(self);

        Descendants { queue }
    }
}

pub struct Descendants<'a> {
    queue: VecDeque<&'a Descriptor>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Descriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let descriptor = self.queue.pop_front()?;
        self.queue.extend(descriptor.children());

        Some(descriptor)
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use super::{Descriptor, DescriptorKind};

    fn sample_tree() -> Descriptor {
        Descriptor::directory(
            "/ws",
            vec![
                Descriptor::directory(
                    "/ws/notes",
                    vec![Descriptor::markdown_file("/ws/notes/today.md", 12)],
                ),
                Descriptor::code_file("/ws/main.rs", 40, "rust"),
            ],
        )
    }

    #[test]
    fn find_resolves_nested_paths() {
        let tree = sample_tree();

        let found = tree.find(Path::new("/ws/notes/today.md")).unwrap();
        assert_eq!(found.name, "today.md");
        assert_eq!(found.size(), Some(12));

        assert!(tree.find(Path::new("/ws/notes/missing.md")).is_none());
        assert!(tree.find(Path::new("/elsewhere/today.md")).is_none());
    }

    #[test]
    fn find_does_not_match_name_prefixes() {
        let tree = Descriptor::directory(
            "/ws",
            vec![Descriptor::directory("/ws/note", Vec::new())],
        );

        assert!(tree.find(Path::new("/ws/notes")).is_none());
    }

    #[test]
    fn copy_metadata_keeps_children() {
        let mut tree = sample_tree();
        let replacement = Descriptor::directory("/ws/notes", Vec::new()).with_times(99, 1);

        let notes = tree.find_mut(Path::new("/ws/notes")).unwrap();
        assert!(notes.copy_metadata_from(&replacement));

        assert_eq!(notes.modified_time, 99);
        assert_eq!(notes.children().len(), 1);
    }

    #[test]
    fn copy_metadata_refuses_shape_changes() {
        let mut file = Descriptor::markdown_file("/ws/a.md", 1);
        let dir = Descriptor::directory("/ws/a.md", Vec::new());

        assert!(!file.copy_metadata_from(&dir));
        assert_eq!(file.kind, DescriptorKind::MarkdownFile { size: 1 });
    }

    #[test]
    fn descendants_visits_every_node() {
        let tree = sample_tree();
        let paths: Vec<_> = tree.descendants().map(|d| d.path.clone()).collect();

        assert_eq!(paths.len(), 4);
        assert_eq!(paths[0], Path::new("/ws"));
    }

    #[test]
    fn parent_is_not_serialized() {
        let mut file = Descriptor::markdown_file("/ws/a.md", 3).with_times(5, 4);
        file.parent = Some("/ws".into());

        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "path": "/ws/a.md",
                "name": "a.md",
                "modifiedTime": 5,
                "createdTime": 4,
                "type": "markdownFile",
                "size": 3,
            })
        );

        let decoded: Descriptor = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.parent, None);
    }
}
