//! Git packfile generation
//!
//! Version-2 packfiles only: "PACK" header, N objects as a varint type+size
//! header followed by zlib-compressed payload, then a SHA-1 trailer over
//! everything before it. Only base object types are emitted; deltas are
//! never produced even though ofs-delta is advertised.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::io::Write;

use crate::object::{parse_tree, GitObject, ObjectId, ObjectType};
use crate::storage::GitStorage;
use crate::Result;

/// Pack object type codes (tag = 4 and the delta types are never written)
fn pack_type_code(obj_type: ObjectType) -> u8 {
    match obj_type {
        ObjectType::Commit => 1,
        ObjectType::Tree => 2,
        ObjectType::Blob => 3,
    }
}

/// Assemble a packfile containing the given objects in order
pub fn generate_packfile(storage: &GitStorage, oids: &[ObjectId]) -> Result<Vec<u8>> {
    let mut pack = Vec::new();

    pack.extend_from_slice(b"PACK");
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&(oids.len() as u32).to_be_bytes());

    for oid in oids {
        let obj = storage.read_object(oid)?;
        write_pack_object(&mut pack, &obj)?;
    }

    let mut hasher = Sha1::new();
    hasher.update(&pack);
    let checksum = hasher.finalize();
    pack.extend_from_slice(&checksum);

    Ok(pack)
}

/// Append one object: varint header then zlib-compressed content
fn write_pack_object(pack: &mut Vec<u8>, obj: &GitObject) -> Result<()> {
    let size = obj.content.len();

    // First byte: 1-bit continuation, 3-bit type, 4 low size bits;
    // further bytes carry 7 size bits each, little-endian.
    let mut byte = (pack_type_code(obj.obj_type) << 4) | ((size & 0x0f) as u8);
    let mut remaining = size >> 4;

    if remaining > 0 {
        byte |= 0x80;
    }
    pack.push(byte);

    while remaining > 0 {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining > 0 {
            byte |= 0x80;
        }
        pack.push(byte);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&obj.content)?;
    let compressed = encoder.finish()?;
    pack.extend_from_slice(&compressed);

    Ok(())
}

/// Builds a packfile by walking the object graph from a set of wants
pub struct PackBuilder<'a> {
    storage: &'a GitStorage,
    wants: Vec<ObjectId>,
}

impl<'a> PackBuilder<'a> {
    pub fn new(storage: &'a GitStorage) -> Self {
        Self {
            storage,
            wants: Vec::new(),
        }
    }

    pub fn want(&mut self, oid: ObjectId) {
        self.wants.push(oid);
    }

    /// Walk the graph from every want and assemble the packfile
    pub fn build(self) -> Result<Vec<u8>> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();

        for oid in &self.wants {
            walk_object(self.storage, *oid, &mut visited, &mut order)?;
        }

        generate_packfile(self.storage, &order)
    }
}

/// Depth-first walk; an object's dependencies precede it in the order
fn walk_object(
    storage: &GitStorage,
    oid: ObjectId,
    visited: &mut HashSet<ObjectId>,
    order: &mut Vec<ObjectId>,
) -> Result<()> {
    if visited.contains(&oid) {
        return Ok(());
    }
    if !storage.has_object(&oid) {
        // The walk is generic over missing links even though this server
        // only produces complete linear histories.
        return Ok(());
    }
    visited.insert(oid);

    let obj = storage.read_object(&oid)?;
    match obj.obj_type {
        ObjectType::Commit => {
            let content = String::from_utf8_lossy(&obj.content);
            for line in content.lines() {
                if line.is_empty() {
                    break;
                }
                if let Some(hex) = line.strip_prefix("tree ") {
                    if let Some(tree_oid) = ObjectId::from_hex(hex.trim()) {
                        walk_object(storage, tree_oid, visited, order)?;
                    }
                } else if let Some(hex) = line.strip_prefix("parent ") {
                    if let Some(parent_oid) = ObjectId::from_hex(hex.trim()) {
                        walk_object(storage, parent_oid, visited, order)?;
                    }
                }
            }
        }
        ObjectType::Tree => {
            for entry in parse_tree(&obj.content)? {
                walk_object(storage, entry.oid, visited, order)?;
            }
        }
        ObjectType::Blob => {}
    }

    order.push(oid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MAIN_REF;
    use tempfile::tempdir;

    fn pack_object_count(pack: &[u8]) -> u32 {
        u32::from_be_bytes([pack[8], pack[9], pack[10], pack[11]])
    }

    #[test]
    fn test_pack_header_and_trailer() {
        let dir = tempdir().unwrap();
        let storage = GitStorage::open(dir.path().join("repo")).unwrap();

        let blob = storage
            .write_object(&GitObject::blob(b"hello".to_vec()))
            .unwrap();
        let pack = generate_packfile(&storage, &[blob]).unwrap();

        assert_eq!(&pack[0..4], b"PACK");
        assert_eq!(u32::from_be_bytes([pack[4], pack[5], pack[6], pack[7]]), 2);
        assert_eq!(pack_object_count(&pack), 1);

        // Trailer is the SHA-1 of everything before it
        let body = &pack[..pack.len() - 20];
        let mut hasher = Sha1::new();
        hasher.update(body);
        assert_eq!(&pack[pack.len() - 20..], hasher.finalize().as_slice());
    }

    #[test]
    fn test_small_object_header() {
        let dir = tempdir().unwrap();
        let storage = GitStorage::open(dir.path().join("repo")).unwrap();

        // 5 bytes fits in the first header byte: type blob (3), size 5
        let blob = storage
            .write_object(&GitObject::blob(b"hello".to_vec()))
            .unwrap();
        let pack = generate_packfile(&storage, &[blob]).unwrap();
        assert_eq!(pack[12], 0x35);
    }

    #[test]
    fn test_varint_size_header() {
        let dir = tempdir().unwrap();
        let storage = GitStorage::open(dir.path().join("repo")).unwrap();

        // 100 bytes: first byte 0x80 | (3 << 4) | (100 & 0xf), then 100 >> 4
        let blob = storage
            .write_object(&GitObject::blob(vec![b'a'; 100]))
            .unwrap();
        let pack = generate_packfile(&storage, &[blob]).unwrap();
        assert_eq!(pack[12], 0xb4);
        assert_eq!(pack[13], 0x06);
    }

    #[test]
    fn test_builder_walks_full_graph() {
        let dir = tempdir().unwrap();
        let storage = GitStorage::open(dir.path().join("repo")).unwrap();

        let refs = storage.get_refs().unwrap();
        let tip = ObjectId::from_hex(refs.get(MAIN_REF).unwrap()).unwrap();

        let mut builder = PackBuilder::new(&storage);
        builder.want(tip);
        let pack = builder.build().unwrap();

        // Initial commit reaches exactly one commit, one tree, one blob
        assert_eq!(pack_object_count(&pack), 3);
    }

    #[test]
    fn test_builder_dedups_wants() {
        let dir = tempdir().unwrap();
        let storage = GitStorage::open(dir.path().join("repo")).unwrap();

        let refs = storage.get_refs().unwrap();
        let tip = ObjectId::from_hex(refs.get(MAIN_REF).unwrap()).unwrap();

        let mut builder = PackBuilder::new(&storage);
        builder.want(tip);
        builder.want(tip);
        let pack = builder.build().unwrap();
        assert_eq!(pack_object_count(&pack), 3);
    }

    #[test]
    fn test_builder_skips_missing_objects() {
        let dir = tempdir().unwrap();
        let storage = GitStorage::open(dir.path().join("repo")).unwrap();

        let missing = ObjectId::from_hex("1111111111111111111111111111111111111111").unwrap();
        let mut builder = PackBuilder::new(&storage);
        builder.want(missing);
        let pack = builder.build().unwrap();
        assert_eq!(pack_object_count(&pack), 0);
    }
}
