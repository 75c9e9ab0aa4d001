//! Git smart HTTP server whose history grows on every fetch
//!
//! Every reference discovery (`GET /info/refs?service=git-upload-pack`)
//! generates a new commit on `refs/heads/main` before the refs are
//! advertised, so no two fetches ever observe the same tip. The object
//! store, pkt-line codec and packfile writer are bit-faithful to git,
//! which lets stock clients clone and pull normally.

pub mod error;
pub mod generator;
pub mod http;
pub mod object;
pub mod pack;
pub mod protocol;
pub mod storage;

pub use error::{Error, Result};
pub use storage::GitStorage;
