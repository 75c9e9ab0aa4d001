//! Commit generation
//!
//! Every invocation extends `refs/heads/main` by one commit whose tree is the
//! parent's tree plus a single new `pull_<k>.txt` file. The dispatcher holds
//! a mutex across the whole call, so ref advances are totally ordered.

use chrono::{SecondsFormat, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::object::{commit_tree, parse_tree, Commit, GitObject, ObjectId, Tree, MODE_FILE};
use crate::storage::{GitStorage, MAIN_REF};
use crate::{Error, Result};

/// Creates new commits on demand
pub struct CommitGenerator {
    storage: Arc<GitStorage>,
    /// Process-lifetime sequence number; not persisted, restarts at zero
    counter: AtomicU64,
}

impl CommitGenerator {
    pub fn new(storage: Arc<GitStorage>) -> Self {
        Self {
            storage,
            counter: AtomicU64::new(0),
        }
    }

    /// Create a new commit on main and return its ID
    ///
    /// Any failure aborts before the ref update and leaves the branch
    /// unchanged; the consumed sequence number is not rolled back.
    pub fn generate(&self) -> Result<ObjectId> {
        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;

        let refs = self.storage.get_refs()?;
        let parent_hex = refs
            .get(MAIN_REF)
            .ok_or_else(|| Error::RefNotFound(MAIN_REF.into()))?;
        let parent = ObjectId::from_hex(parent_hex)
            .ok_or_else(|| Error::InvalidObjectFormat(format!("bad ref value: {}", parent_hex)))?;

        let parent_commit = self.storage.read_object(&parent)?;
        let parent_tree_oid = commit_tree(&parent_commit.content)
            .ok_or_else(|| Error::InvalidObjectFormat("parent commit has no tree".into()))?;
        let parent_tree = self.storage.read_object(&parent_tree_oid)?;
        let entries = parse_tree(&parent_tree.content)?;

        let now = Utc::now();
        let filename = format!("pull_{}.txt", count);
        let content = format!(
            "Pull request #{}\nTimestamp: {}\n",
            count,
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let blob = self.storage.write_object(&GitObject::blob(content.into_bytes()))?;

        // New tree keeps every parent entry and gains the pull file
        let mut tree = Tree::new();
        for entry in entries {
            tree.add_entry(entry.mode, entry.name, entry.oid);
        }
        tree.add_entry(MODE_FILE, filename, blob);
        let tree_oid = self.storage.write_object(&tree.to_object())?;

        let message = format!("Pull #{} at {}", count, now.format("%Y-%m-%d %H:%M:%S"));
        let commit = Commit::new(tree_oid, Some(parent), now, message);
        let commit_oid = self.storage.write_object(&commit.to_object())?;

        self.storage.update_ref(MAIN_REF, &commit_oid)?;

        debug!(sha = %commit_oid, count, "advanced main");
        Ok(commit_oid)
    }

    /// Number of generator invocations so far in this process
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}
