use crate::{
    flow::{parse_flows, Flow},
    k8s::{parse_documents, Resource},
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Reads resources from files. Directories are read one level deep, including only files with a
/// `.yaml`, `.yml` or `.json` extension, in name order.
pub async fn load_resources(paths: &[PathBuf]) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for (path, input) in read_all(paths).await? {
        let parsed = parse_documents(&input)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        tracing::debug!(path = %path.display(), resources = parsed.len(), "Loaded resources");
        resources.extend(parsed);
    }
    Ok(resources)
}

/// Reads flows from files, as [`load_resources`] reads resources.
pub async fn load_flows(paths: &[PathBuf]) -> Result<Vec<Flow>> {
    let mut flows = Vec::new();
    for (path, input) in read_all(paths).await? {
        let parsed =
            parse_flows(&input).with_context(|| format!("failed to parse {}", path.display()))?;
        tracing::debug!(path = %path.display(), flows = parsed.len(), "Loaded flows");
        flows.extend(parsed);
    }
    Ok(flows)
}

async fn read_all(paths: &[PathBuf]) -> Result<Vec<(PathBuf, String)>> {
    let mut inputs = Vec::new();
    for path in paths {
        for file in files(path).await? {
            let input = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            inputs.push((file, input));
        }
    }
    Ok(inputs)
}

async fn files(path: &Path) -> Result<Vec<PathBuf>> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    if !meta.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("failed to list {}", path.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && is_manifest(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml" | "json")
    )
}
