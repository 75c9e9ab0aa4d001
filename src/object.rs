//! Git object types and serialization
//!
//! The object store holds three object types: blob, tree, and commit.
//! Each is content-addressed by the SHA-1 of `"{type} {size}\0{content}"`.

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use std::fmt;

/// Regular-file mode for tree entries
pub const MODE_FILE: u32 = 0o100644;

/// Author/committer identity for everything this server writes
pub const SIGNATURE: &str = "Infinite Git <infinite@example.com>";

/// The three git object types this server produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "blob" => Some(ObjectType::Blob),
            "tree" => Some(ObjectType::Tree),
            "commit" => Some(ObjectType::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A 20-byte SHA-1 object ID
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 20 {
            let mut arr = [0u8; 20];
            arr.copy_from_slice(bytes);
            Some(ObjectId(arr))
        } else {
            None
        }
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 40 {
            return None;
        }
        let bytes = hex::decode(hex).ok()?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Compute the object ID of typed content
    pub fn hash_object(obj_type: ObjectType, content: &[u8]) -> Self {
        let header = format!("{} {}\0", obj_type.as_str(), content.len());
        let mut hasher = Sha1::new();
        hasher.update(header.as_bytes());
        hasher.update(content);
        let result = hasher.finalize();
        let mut id = [0u8; 20];
        id.copy_from_slice(&result);
        ObjectId(id)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A git object: its type plus serialized content
#[derive(Debug, Clone)]
pub struct GitObject {
    pub obj_type: ObjectType,
    pub content: Vec<u8>,
}

impl GitObject {
    pub fn new(obj_type: ObjectType, content: Vec<u8>) -> Self {
        Self { obj_type, content }
    }

    pub fn blob(content: Vec<u8>) -> Self {
        Self::new(ObjectType::Blob, content)
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::hash_object(self.obj_type, &self.content)
    }

    /// Serialize to loose object framing: `{type} {size}\0{content}`
    pub fn to_loose_format(&self) -> Vec<u8> {
        let header = format!("{} {}\0", self.obj_type.as_str(), self.content.len());
        let mut data = header.into_bytes();
        data.extend_from_slice(&self.content);
        data
    }

    /// Parse loose object framing back into type and content
    pub fn from_loose_format(data: &[u8]) -> crate::Result<Self> {
        let null_pos = data
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| crate::Error::InvalidObjectFormat("missing null byte".into()))?;

        let header = std::str::from_utf8(&data[..null_pos])
            .map_err(|_| crate::Error::InvalidObjectFormat("invalid header".into()))?;

        let mut parts = header.split(' ');
        let type_str = parts
            .next()
            .ok_or_else(|| crate::Error::InvalidObjectFormat("missing type".into()))?;
        let size_str = parts
            .next()
            .ok_or_else(|| crate::Error::InvalidObjectFormat("missing size".into()))?;

        let obj_type = ObjectType::from_str(type_str)
            .ok_or_else(|| crate::Error::InvalidObjectFormat(format!("unknown type: {}", type_str)))?;
        let size: usize = size_str
            .parse()
            .map_err(|_| crate::Error::InvalidObjectFormat("invalid size".into()))?;

        let content = data[null_pos + 1..].to_vec();
        if content.len() != size {
            return Err(crate::Error::InvalidObjectFormat(format!(
                "size mismatch: expected {}, got {}",
                size,
                content.len()
            )));
        }

        Ok(Self { obj_type, content })
    }
}

/// Tree entry (mode, name, object id)
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub mode: u32,
    pub name: String,
    pub oid: ObjectId,
}

/// A tree object under construction
#[derive(Debug, Clone, Default)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, mode: u32, name: impl Into<String>, oid: ObjectId) {
        self.entries.push(TreeEntry {
            mode,
            name: name.into(),
            oid,
        });
    }

    /// Serialize into a tree object, entries in bytewise name order
    pub fn to_object(&self) -> GitObject {
        let mut entries: Vec<&TreeEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut content = Vec::new();
        for entry in entries {
            // Format: <octal mode> <name>\0<20-byte SHA-1>
            content.extend_from_slice(format!("{:o}", entry.mode).as_bytes());
            content.push(b' ');
            content.extend_from_slice(entry.name.as_bytes());
            content.push(0);
            content.extend_from_slice(entry.oid.as_bytes());
        }
        GitObject::new(ObjectType::Tree, content)
    }
}

/// Parse raw tree content into entries
pub fn parse_tree(content: &[u8]) -> crate::Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < content.len() {
        let space_pos = content[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| crate::Error::InvalidObjectFormat("tree: missing space".into()))?;
        let mode_str = std::str::from_utf8(&content[pos..pos + space_pos])
            .map_err(|_| crate::Error::InvalidObjectFormat("tree: invalid mode".into()))?;
        let mode = u32::from_str_radix(mode_str, 8)
            .map_err(|_| crate::Error::InvalidObjectFormat("tree: invalid mode octal".into()))?;
        pos += space_pos + 1;

        let null_pos = content[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| crate::Error::InvalidObjectFormat("tree: missing null".into()))?;
        let name = std::str::from_utf8(&content[pos..pos + null_pos])
            .map_err(|_| crate::Error::InvalidObjectFormat("tree: invalid name".into()))?
            .to_string();
        pos += null_pos + 1;

        if pos + 20 > content.len() {
            return Err(crate::Error::InvalidObjectFormat("tree: truncated sha".into()));
        }
        let oid = ObjectId::from_bytes(&content[pos..pos + 20])
            .ok_or_else(|| crate::Error::InvalidObjectFormat("tree: invalid sha".into()))?;
        pos += 20;

        entries.push(TreeEntry { mode, name, oid });
    }

    Ok(entries)
}

/// A commit object under construction
#[derive(Debug, Clone)]
pub struct Commit {
    pub tree: ObjectId,
    /// None for the root commit
    pub parent: Option<ObjectId>,
    pub author: String,
    pub committer: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl Commit {
    pub fn new(
        tree: ObjectId,
        parent: Option<ObjectId>,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tree,
            parent,
            author: SIGNATURE.to_string(),
            committer: SIGNATURE.to_string(),
            timestamp,
            message: message.into(),
        }
    }

    /// Serialize into a commit object in git's text format
    pub fn to_object(&self) -> GitObject {
        let ts = self.timestamp.timestamp();
        let tz = self.timestamp.format("%z");

        let mut content = format!("tree {}\n", self.tree);
        if let Some(parent) = &self.parent {
            content.push_str(&format!("parent {}\n", parent));
        }
        content.push_str(&format!("author {} {} {}\n", self.author, ts, tz));
        content.push_str(&format!("committer {} {} {}\n", self.committer, ts, tz));
        content.push('\n');
        content.push_str(&self.message);
        if !self.message.ends_with('\n') {
            content.push('\n');
        }

        GitObject::new(ObjectType::Commit, content.into_bytes())
    }
}

/// Extract the `tree` header from raw commit content
pub fn commit_tree(content: &[u8]) -> Option<ObjectId> {
    let text = std::str::from_utf8(content).ok()?;
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if let Some(hex) = line.strip_prefix("tree ") {
            return ObjectId::from_hex(hex.trim());
        }
    }
    None
}

/// Extract the `parent` header from raw commit content, if any
pub fn commit_parent(content: &[u8]) -> Option<ObjectId> {
    let text = std::str::from_utf8(content).ok()?;
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if let Some(hex) = line.strip_prefix("parent ") {
            return ObjectId::from_hex(hex.trim());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_object_id_hex() {
        let hex = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        let oid = ObjectId::from_hex(hex).unwrap();
        assert_eq!(oid.to_hex(), hex);
    }

    #[test]
    fn test_empty_blob_hash() {
        // Empty blob has a well-known hash
        let oid = ObjectId::hash_object(ObjectType::Blob, &[]);
        assert_eq!(oid.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_hello_world_blob_hash() {
        let oid = ObjectId::hash_object(ObjectType::Blob, b"hello world\n");
        assert_eq!(oid.to_hex(), "3b18e512dba79e4c8300dd08aeb37f8e728b8dad");
    }

    #[test]
    fn test_loose_format_roundtrip() {
        let obj = GitObject::blob(b"test content".to_vec());
        let loose = obj.to_loose_format();
        let parsed = GitObject::from_loose_format(&loose).unwrap();
        assert_eq!(parsed.obj_type, ObjectType::Blob);
        assert_eq!(parsed.content, b"test content");
    }

    #[test]
    fn test_loose_format_rejects_bad_size() {
        assert!(GitObject::from_loose_format(b"blob 5\0abc").is_err());
        assert!(GitObject::from_loose_format(b"blob 3 abc").is_err());
        assert!(GitObject::from_loose_format(b"tag 3\0abc").is_err());
    }

    #[test]
    fn test_tree_serialization_sorts_entries() {
        let blob = ObjectId::hash_object(ObjectType::Blob, b"x");
        let mut tree = Tree::new();
        tree.add_entry(MODE_FILE, "zzz.txt", blob);
        tree.add_entry(MODE_FILE, "aaa.txt", blob);

        let obj = tree.to_object();
        let entries = parse_tree(&obj.content).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "aaa.txt");
        assert_eq!(entries[1].name, "zzz.txt");
        assert_eq!(entries[0].mode, MODE_FILE);
        assert_eq!(entries[0].oid, blob);
    }

    #[test]
    fn test_tree_entry_layout() {
        let blob = ObjectId::hash_object(ObjectType::Blob, b"x");
        let mut tree = Tree::new();
        tree.add_entry(MODE_FILE, "README.md", blob);

        let obj = tree.to_object();
        let mut expected = b"100644 README.md\0".to_vec();
        expected.extend_from_slice(blob.as_bytes());
        assert_eq!(obj.content, expected);
    }

    #[test]
    fn test_commit_serialization() {
        let tree = ObjectId::hash_object(ObjectType::Tree, b"");
        let parent = ObjectId::hash_object(ObjectType::Blob, b"p");
        let ts = Utc.with_ymd_and_hms(2024, 1, 20, 10, 0, 0).unwrap();

        let commit = Commit::new(tree, Some(parent), ts, "Pull #1 at 2024-01-20 10:00:00");
        let obj = commit.to_object();
        let text = String::from_utf8(obj.content.clone()).unwrap();

        assert!(text.starts_with(&format!("tree {}\nparent {}\n", tree, parent)));
        assert!(text.contains(&format!("author {} 1705744800 +0000\n", SIGNATURE)));
        assert!(text.contains(&format!("committer {} 1705744800 +0000\n", SIGNATURE)));
        assert!(text.ends_with("\nPull #1 at 2024-01-20 10:00:00\n"));

        assert_eq!(commit_tree(&obj.content), Some(tree));
        assert_eq!(commit_parent(&obj.content), Some(parent));
    }

    #[test]
    fn test_root_commit_has_no_parent_line() {
        let tree = ObjectId::hash_object(ObjectType::Tree, b"");
        let ts = Utc.with_ymd_and_hms(2024, 1, 20, 10, 0, 0).unwrap();

        let commit = Commit::new(tree, None, ts, "Initial commit");
        let obj = commit.to_object();
        let text = String::from_utf8(obj.content.clone()).unwrap();

        assert!(!text.contains("parent "));
        assert_eq!(commit_parent(&obj.content), None);
    }
}
