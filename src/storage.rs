//! On-disk git object and ref storage
//!
//! Standard loose-object layout under `<repo>/.git`:
//!
//!   objects/<2-hex>/<38-hex>   zlib(type len\0payload)
//!   refs/heads/main            "<hex>\n"
//!   refs/tags/                 (empty)
//!   HEAD                       "ref: refs/heads/main\n"
//!   config                     minimal ini
//!
//! Object writes need no lock: the filename is a function of content, so
//! concurrent writers race to produce identical files. Ref reads and writes
//! go through a single lock.

use chrono::Utc;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::object::{Commit, GitObject, ObjectId, Tree, MODE_FILE};
use crate::{Error, Result};

/// Branch advanced by the commit generator; the only mutable ref
pub const MAIN_REF: &str = "refs/heads/main";

const README_CONTENT: &[u8] =
    b"# Infinite Git Repository\n\nThis repository generates a new commit every time you pull.\n";

const CONFIG_CONTENT: &str = "[core]\n\
\trepositoryformatversion = 0\n\
\tfilemode = true\n\
\tbare = false\n\
\tlogallrefupdates = true\n";

/// Loose object store plus ref files for a single repository
pub struct GitStorage {
    path: PathBuf,
    git_dir: PathBuf,
    ref_lock: Mutex<()>,
}

impl GitStorage {
    /// Open or create a repository at the given path
    ///
    /// Initialization is idempotent: directories, HEAD and config are
    /// ensured on every open, and the fixed initial commit is only written
    /// when `refs/heads/main` does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let git_dir = path.join(".git");

        let storage = Self {
            path,
            git_dir,
            ref_lock: Mutex::new(()),
        };

        storage.init()?;
        if !storage.git_dir.join(MAIN_REF).exists() {
            storage.create_initial_commit()?;
        }

        Ok(storage)
    }

    fn init(&self) -> Result<()> {
        for dir in [
            self.git_dir.join("objects"),
            self.git_dir.join("refs/heads"),
            self.git_dir.join("refs/tags"),
        ] {
            fs::create_dir_all(dir)?;
        }

        let head = self.git_dir.join("HEAD");
        if !head.exists() {
            fs::write(head, "ref: refs/heads/main\n")?;
        }

        let config = self.git_dir.join("config");
        if !config.exists() {
            fs::write(config, CONFIG_CONTENT)?;
        }

        Ok(())
    }

    fn create_initial_commit(&self) -> Result<()> {
        let blob = self.write_object(&GitObject::blob(README_CONTENT.to_vec()))?;

        let mut tree = Tree::new();
        tree.add_entry(MODE_FILE, "README.md", blob);
        let tree_oid = self.write_object(&tree.to_object())?;

        let commit = Commit::new(tree_oid, None, Utc::now(), "Initial commit");
        let commit_oid = self.write_object(&commit.to_object())?;

        self.update_ref(MAIN_REF, &commit_oid)?;

        // Materialize the README in the working directory. Purely cosmetic;
        // clients only ever see the object store.
        fs::write(self.path.join("README.md"), README_CONTENT)?;

        Ok(())
    }

    /// Repository root (the working directory)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `.git` directory
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn object_path(&self, oid: &ObjectId) -> PathBuf {
        let hex = oid.to_hex();
        self.git_dir.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    /// Check whether an object exists
    pub fn has_object(&self, oid: &ObjectId) -> bool {
        self.object_path(oid).exists()
    }

    /// Read an object, decompressing and stripping the loose header
    pub fn read_object(&self, oid: &ObjectId) -> Result<GitObject> {
        let path = self.object_path(oid);
        let compressed = fs::read(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::ObjectNotFound(oid.to_hex())
            } else {
                Error::Io(e)
            }
        })?;

        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut data = Vec::new();
        decoder.read_to_end(&mut data)?;

        GitObject::from_loose_format(&data)
    }

    /// Write an object as a zlib-framed loose file, returning its ID
    pub fn write_object(&self, obj: &GitObject) -> Result<ObjectId> {
        let oid = obj.id();
        let path = self.object_path(&oid);

        // Content-addressed, so an existing file is already correct.
        if path.exists() {
            return Ok(oid);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&obj.to_loose_format())?;
        let compressed = encoder.finish()?;
        fs::write(path, compressed)?;

        Ok(oid)
    }

    /// All refs, keyed by name relative to the git dir (`refs/heads/main`),
    /// plus the resolved `HEAD`
    pub fn get_refs(&self) -> Result<BTreeMap<String, String>> {
        let _guard = self
            .ref_lock
            .lock()
            .map_err(|e| Error::StorageError(format!("lock: {}", e)))?;

        let mut refs = BTreeMap::new();
        collect_refs(&self.git_dir.join("refs"), "refs", &mut refs)?;

        let head = fs::read_to_string(self.git_dir.join("HEAD"))?;
        let head = head.trim();
        if let Some(target) = head.strip_prefix("ref: ") {
            if let Some(hash) = refs.get(target) {
                let hash = hash.clone();
                refs.insert("HEAD".to_string(), hash);
            }
        } else {
            refs.insert("HEAD".to_string(), head.to_string());
        }

        Ok(refs)
    }

    /// Point a ref at a new object
    pub fn update_ref(&self, name: &str, oid: &ObjectId) -> Result<()> {
        let _guard = self
            .ref_lock
            .lock()
            .map_err(|e| Error::StorageError(format!("lock: {}", e)))?;

        let ref_path = self.git_dir.join(name);
        if let Some(parent) = ref_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(ref_path, format!("{}\n", oid.to_hex()))?;

        Ok(())
    }
}

fn collect_refs(dir: &Path, prefix: &str, refs: &mut BTreeMap<String, String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let full_name = format!("{}/{}", prefix, name);

        if entry.file_type()?.is_dir() {
            collect_refs(&entry.path(), &full_name, refs)?;
        } else {
            let content = fs::read_to_string(entry.path())?;
            refs.insert(full_name, content.trim().to_string());
        }
    }
    Ok(())
}
