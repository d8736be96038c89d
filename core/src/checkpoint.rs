use std::path::{Path, PathBuf};

/// Weights file written after `epoch` (zero-based), e.g. `weights.03.safetensors`
pub fn checkpoint_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("weights.{epoch:02}.safetensors"))
}

/// Training history written next to the final artifacts
pub const HISTORY_FILE: &str = "history.json";
