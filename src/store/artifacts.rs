use fs_err as fs;
use serde::Serialize;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};

pub fn generation_dir(data_dir: &Path, generation_id: &str) -> PathBuf {
    data_dir.join("generations").join(generation_id)
}

/// Write a stage's request JSON and its generated text next to each other
/// under `<data_dir>/generations/<id>/`.
pub fn save_stage<R: Serialize>(
    data_dir: &Path,
    generation_id: &str,
    stage: &str,
    req: &R,
    output: &str,
) -> anyhow::Result<()> {
    let dir = generation_dir(data_dir, generation_id);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(format!("{stage}.request.json")), to_string_pretty(req)?)?;
    fs::write(dir.join(format!("{stage}.md")), output)?;
    tracing::debug!(stage, dir = %dir.display(), "stage artifacts saved");
    Ok(())
}
