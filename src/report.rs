use anyhow::{Context, Result};
use convergence::RunReport;
use std::fs;
use std::path::Path;

/// Write the run report as pretty JSON, creating parent directories
pub fn write(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(report)?;
    fs::write(path, content + "\n")
        .with_context(|| format!("Could not write {}", path.display()))?;
    log::info!("wrote run report to {}", path.display());
    Ok(())
}
