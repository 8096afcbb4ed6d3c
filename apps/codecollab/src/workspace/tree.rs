use collab_proto::{FileId, FileKind, FileRecord};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("parent {0} does not exist")]
    UnknownParent(FileId),
    #[error("parent {0} is not a folder")]
    ParentNotFolder(FileId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub id: FileId,
    pub name: String,
    pub kind: FileKind,
    pub parent: Option<FileId>,
    pub language: Option<String>,
}

impl FileNode {
    pub fn is_folder(&self) -> bool {
        self.kind == FileKind::Folder
    }
}

impl From<FileRecord> for FileNode {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            kind: record.kind,
            parent: record.parent,
            language: record.language,
        }
    }
}

/// Project files keyed by id. Every parent is an existing folder, and since
/// a node can only hang off something already present the tree stays acyclic.
#[derive(Debug, Clone, Default)]
pub struct FileTree {
    nodes: HashMap<FileId, FileNode>,
}

impl FileTree {
    /// Builds the tree, discarding records whose parent chain never resolves.
    pub fn from_records(records: Vec<FileRecord>) -> Self {
        let mut tree = FileTree::default();
        let mut pending: Vec<FileNode> = records.into_iter().map(FileNode::from).collect();
        loop {
            let before = pending.len();
            pending.retain(|node| tree.insert(node.clone()).is_err());
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }
        for orphan in pending {
            warn!(target: "codecollab::workspace", file = %orphan.id, name = %orphan.name, "dropping file with unresolvable parent");
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &FileId) -> Option<&FileNode> {
        self.nodes.get(id)
    }

    /// Checks that `parent` can hold children.
    pub fn validate_parent(&self, parent: Option<&FileId>) -> Result<(), TreeError> {
        let Some(parent) = parent else {
            return Ok(());
        };
        match self.nodes.get(parent) {
            None => Err(TreeError::UnknownParent(parent.clone())),
            Some(node) if !node.is_folder() => Err(TreeError::ParentNotFolder(parent.clone())),
            Some(_) => Ok(()),
        }
    }

    /// Adds a node. A node whose id is already present keeps its place and
    /// only takes the new name and language.
    pub fn insert(&mut self, node: FileNode) -> Result<(), TreeError> {
        if let Some(existing) = self.nodes.get_mut(&node.id) {
            existing.name = node.name;
            existing.language = node.language.or(existing.language.take());
            return Ok(());
        }
        self.validate_parent(node.parent.as_ref())?;
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn rename(&mut self, id: &FileId, name: String, language: Option<String>) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.name = name;
                if language.is_some() {
                    node.language = language;
                }
                true
            }
            None => false,
        }
    }

    /// Removes `id` and everything beneath it. Returns the removed ids.
    pub fn remove(&mut self, id: &FileId) -> Vec<FileId> {
        if !self.nodes.contains_key(id) {
            return Vec::new();
        }
        let mut removed = vec![id.clone()];
        let mut cursor = 0;
        while cursor < removed.len() {
            let parent = removed[cursor].clone();
            removed.extend(
                self.nodes
                    .values()
                    .filter(|node| node.parent.as_ref() == Some(&parent))
                    .map(|node| node.id.clone()),
            );
            cursor += 1;
        }
        for gone in &removed {
            self.nodes.remove(gone);
        }
        removed
    }

    /// Children of `parent` (root when `None`): folders first, then by name.
    pub fn children(&self, parent: Option<&FileId>) -> Vec<&FileNode> {
        let mut children: Vec<&FileNode> = self
            .nodes
            .values()
            .filter(|node| node.parent.as_ref() == parent)
            .collect();
        children.sort_by(|a, b| display_order(a, b));
        children
    }

    /// Depth-first listing in display order with nesting depth.
    pub fn walk(&self) -> Vec<(usize, &FileNode)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.walk_into(None, 0, &mut out);
        out
    }

    fn walk_into<'a>(
        &'a self,
        parent: Option<&FileId>,
        depth: usize,
        out: &mut Vec<(usize, &'a FileNode)>,
    ) {
        for child in self.children(parent) {
            out.push((depth, child));
            if child.is_folder() {
                self.walk_into(Some(&child.id), depth + 1, out);
            }
        }
    }

    /// Slash-separated path from the root.
    pub fn path(&self, id: &FileId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = self.nodes.get(id)?;
        loop {
            segments.push(current.name.as_str());
            match current.parent.as_ref().and_then(|parent| self.nodes.get(parent)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        segments.reverse();
        Some(segments.join("/"))
    }
}

fn display_order(a: &FileNode, b: &FileNode) -> Ordering {
    b.is_folder()
        .cmp(&a.is_folder())
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str, kind: FileKind, parent: Option<&str>) -> FileRecord {
        FileRecord {
            id: id.into(),
            name: name.into(),
            kind,
            parent: parent.map(FileId::from),
            content: None,
            language: None,
        }
    }

    fn sample() -> FileTree {
        FileTree::from_records(vec![
            record("f-main", "main.js", FileKind::File, Some("d-src")),
            record("f-readme", "README.md", FileKind::File, None),
            record("d-src", "src", FileKind::Folder, None),
            record("d-lib", "lib", FileKind::Folder, Some("d-src")),
            record("f-util", "util.js", FileKind::File, Some("d-lib")),
            record("d-assets", "Assets", FileKind::Folder, None),
        ])
    }

    #[test_timeout::timeout]
    fn builds_out_of_order_records_and_sorts_folders_first() {
        let tree = sample();
        assert_eq!(tree.len(), 6);
        let root: Vec<_> = tree.children(None).iter().map(|n| n.name.as_str()).collect();
        assert_eq!(root, ["Assets", "src", "README.md"]);

        let walk: Vec<_> = tree
            .walk()
            .into_iter()
            .map(|(depth, node)| format!("{depth}:{}", node.name))
            .collect();
        assert_eq!(
            walk,
            ["0:Assets", "0:src", "1:lib", "2:util.js", "1:main.js", "0:README.md"]
        );
        assert_eq!(tree.path(&"f-util".into()).as_deref(), Some("src/lib/util.js"));
    }

    #[test_timeout::timeout]
    fn orphans_and_file_parents_are_rejected() {
        let tree = FileTree::from_records(vec![
            record("a", "a.js", FileKind::File, None),
            record("b", "b.js", FileKind::File, Some("a")),
            record("c", "c.js", FileKind::File, Some("missing")),
        ]);
        assert_eq!(tree.len(), 1);

        let mut tree = tree;
        assert_eq!(
            tree.insert(record("d", "d.js", FileKind::File, Some("a")).into()),
            Err(TreeError::ParentNotFolder("a".into()))
        );
    }

    #[test_timeout::timeout]
    fn removing_a_folder_takes_descendants() {
        let mut tree = sample();
        let mut removed = tree.remove(&"d-src".into());
        removed.sort();
        assert_eq!(
            removed,
            vec![
                FileId::new("d-lib"),
                FileId::new("d-src"),
                FileId::new("f-main"),
                FileId::new("f-util"),
            ]
        );
        assert_eq!(tree.len(), 2);
        assert!(tree.remove(&"d-src".into()).is_empty());
    }

    #[test_timeout::timeout]
    fn reinsert_with_same_id_only_renames() {
        let mut tree = sample();
        tree.insert(record("f-main", "index.js", FileKind::File, None).into())
            .unwrap();
        let node = tree.get(&"f-main".into()).unwrap();
        assert_eq!(node.name, "index.js");
        assert_eq!(node.parent, Some("d-src".into()));
    }
}
