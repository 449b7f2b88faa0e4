//! Pool seed artifact: one 32-byte seed per artifacts directory, created
//! on first use. Every key in the pool is derived from it, which is what
//! makes re-running generation after a partial failure safe.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use stakeops_crypto::PoolSeed;
use stakeops_types::{KeyOpsError, KeyOpsResult};

const SEED_FILE: &str = "pool_seed";

pub fn seed_path(artifacts_dir: &Path) -> PathBuf {
    artifacts_dir.join(SEED_FILE)
}

/// Load the pool seed, generating and persisting a fresh one if the
/// artifacts directory has none yet.
pub fn load_or_create_seed(artifacts_dir: &Path) -> KeyOpsResult<PoolSeed> {
    let path = seed_path(artifacts_dir);
    if path.exists() {
        let contents = fs::read_to_string(&path).map_err(|e| artifact_io(&path, e))?;
        return PoolSeed::from_hex(contents.trim()).map_err(|e| KeyOpsError::InvalidConfig {
            reason: format!("pool seed file {} is invalid: {}", path.display(), e),
        });
    }

    fs::create_dir_all(artifacts_dir).map_err(|e| artifact_io(artifacts_dir, e))?;
    let seed = PoolSeed::generate();
    fs::write(&path, seed.to_hex()).map_err(|e| artifact_io(&path, e))?;
    restrict_permissions(&path)?;
    info!(path = %path.display(), "generated new pool seed");
    Ok(seed)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> KeyOpsResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| artifact_io(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> KeyOpsResult<()> {
    Ok(())
}

fn artifact_io(path: &Path, source: std::io::Error) -> KeyOpsError {
    KeyOpsError::ArtifactIo {
        path: path.display().to_string(),
        source,
    }
}
