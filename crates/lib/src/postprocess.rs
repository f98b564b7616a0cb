//! Commit-log folding
//!
//! The interceptor runs in the build's children and can only talk back
//! through the filesystem: one `<url> <commit>` line per observed clone.
//! After the build, those lines move into the record and the transient log
//! is removed.

use std::fs;
use std::io;

use tracing::{debug, warn};

use crate::info::BuildInfo;

/// Fold the interceptor's clone log into the record and delete it.
///
/// A missing log simply means the build cloned nothing.
pub fn fold_commit_log(info: &mut BuildInfo) {
    let log_path = info.commit_log_path.clone();

    let content = match fs::read_to_string(&log_path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!(path = %log_path.display(), error = %e, "could not read clone log");
            return;
        }
    };

    for line in content.lines() {
        let Some((url, commit)) = line.split_once(' ') else {
            continue;
        };
        let (url, commit) = (url.trim(), commit.trim());
        if url.is_empty() || commit.is_empty() {
            continue;
        }
        debug!(url, commit, "recorded clone commit");
        info.record.add_git_commit_id(url, commit);
    }

    if let Err(e) = fs::remove_file(&log_path) {
        warn!(path = %log_path.display(), error = %e, "could not remove clone log");
    }
}
