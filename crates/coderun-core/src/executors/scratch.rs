//! Single-use scratch directories holding the submitted source

use std::path::Path;
use tempfile::{Builder, TempDir};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::language::RuntimeProfile;

/// Create a fresh directory under `root` containing the source file.
///
/// The directory is removed when the returned `TempDir` drops, on every path.
pub(crate) async fn materialize(
    root: &Path,
    profile: &RuntimeProfile,
    source: &str,
) -> std::io::Result<TempDir> {
    fs::create_dir_all(root).await?;
    let dir = Builder::new().prefix("coderun-").tempdir_in(root)?;

    // Containers may run as a non-root user; the mount must stay readable.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).await?;
    }

    let mut file = fs::File::create(dir.path().join(&profile.source_filename)).await?;
    file.write_all(source.as_bytes()).await?;
    file.flush().await?;

    Ok(dir)
}
