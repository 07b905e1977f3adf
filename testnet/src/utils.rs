use crate::Error;
use futures::{stream::FuturesUnordered, StreamExt};
use rand::{distributions::Uniform, Rng};
use sha2::{Digest, Sha256};
use std::{future::Future, path::Path};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Hex-encoded SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Random lowercase name of `len` letters.
pub(crate) fn random_name(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(Uniform::new_inclusive(b'a', b'z'))
        .take(len)
        .map(char::from)
        .collect()
}

/// Create the host root directory of a chain under `parent` (defaults to `<cwd>/tmp`).
///
/// The directory name starts with the creation time so runs sort chronologically.
pub(crate) fn create_root(parent: Option<&Path>, keep: bool) -> Result<TempDir, Error> {
    let parent = match parent {
        Some(parent) => parent.to_path_buf(),
        None => std::env::current_dir()
            .map_err(|e| Error::Resource(format!("failed to resolve working directory: {e}")))?
            .join("tmp"),
    };
    std::fs::create_dir_all(&parent)
        .map_err(|e| Error::Resource(format!("failed to create {parent:?}: {e}")))?;
    let prefix = chrono::Local::now()
        .format("%Y-%m-%d-%H-%M-%S-%f-")
        .to_string();
    tempfile::Builder::new()
        .prefix(&prefix)
        .disable_cleanup(keep)
        .tempdir_in(&parent)
        .map_err(|e| Error::Resource(format!("failed to create root directory in {parent:?}: {e}")))
}

/// Drive every task to completion and return the first error encountered.
///
/// When a task fails, `token` is canceled so the remaining tasks stop retrying, but they are
/// still awaited (never dropped mid-operation) and their results are discarded.
pub(crate) async fn join_all<F>(
    token: &CancellationToken,
    tasks: impl IntoIterator<Item = F>,
) -> Result<(), Error>
where
    F: Future<Output = Result<(), Error>>,
{
    let mut pending: FuturesUnordered<F> = tasks.into_iter().collect();
    let mut first = None;
    while let Some(result) = pending.next().await {
        if let Err(err) = result {
            if first.is_none() {
                token.cancel();
                first = Some(err);
            }
        }
    }
    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::time::sleep;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_random_name() {
        let name = random_name(8);
        assert_eq!(name.len(), 8);
        assert!(name.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_create_root() {
        let parent = tempfile::tempdir().unwrap();
        let root = create_root(Some(parent.path()), false).unwrap();
        assert!(root.path().is_dir());
        assert_eq!(root.path().parent(), Some(parent.path()));
        let path = root.path().to_path_buf();
        drop(root);
        assert!(!path.exists());
    }

    #[test]
    fn test_create_root_kept() {
        let parent = tempfile::tempdir().unwrap();
        let root = create_root(Some(parent.path()), true).unwrap();
        let path = root.path().to_path_buf();
        drop(root);
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_join_all_success() {
        let counter = AtomicUsize::new(0);
        let completed = &counter;
        let token = CancellationToken::new();
        let tasks = (0..4).map(|_| async move {
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        join_all(&token, tasks).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_all_first_error_wins() {
        let counter = AtomicUsize::new(0);
        let completed = &counter;
        let token = CancellationToken::new();
        let tasks = (0..4u64).map(|i| async move {
            sleep(Duration::from_secs(i)).await;
            completed.fetch_add(1, Ordering::SeqCst);
            if i > 0 {
                return Err(Error::InvalidInput(format!("task {i}")));
            }
            Ok(())
        });
        let err = join_all(&token, tasks).await.unwrap_err();

        // Siblings are not dropped after the first failure
        assert!(matches!(err, Error::InvalidInput(ref msg) if msg == "task 1"));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(token.is_cancelled());
    }
}
