//! Zip packaging of a flowchart: `flowchart.json`, the asset files named by
//! registered asset fields, and an `assets.json` manifest mapping each
//! (node, field) pair to its entry.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use weft_core::error::{Result, WeftError};
use weft_core::types::NodeId;

use crate::graph::{Flowchart, FlowchartRecord, NodeRegistry};

pub const FLOWCHART_ENTRY: &str = "flowchart.json";
pub const MANIFEST_ENTRY: &str = "assets.json";

/// Where one node field's asset lives inside the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AssetEntry {
    node: NodeId,
    field: String,
    entry: String,
}

fn archive_err(e: zip::result::ZipError) -> WeftError {
    WeftError::Archive(e.to_string())
}

/// Final component of an asset path.
fn entry_name(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// `name`, or `<stem>-<n>.<ext>` for the first `n` not already taken.
fn unique_entry(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let mut n = 1;
    loop {
        let candidate = match &ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Write `chart` to `path` and clear its dirty flag.
pub fn save(chart: &mut Flowchart, path: &Path) -> Result<()> {
    let record = chart.serialize();
    let tmp = path.with_extension("tmp");
    write_archive(chart.registry(), &record, &tmp)?;
    std::fs::rename(&tmp, path)?;
    chart.mark_saved();
    info!(path = %path.display(), nodes = record.nodes.len(), "Flowchart saved");
    Ok(())
}

fn write_archive(registry: &NodeRegistry, record: &FlowchartRecord, path: &Path) -> Result<()> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(File::create(path)?);

    zip.start_file(FLOWCHART_ENTRY, options).map_err(archive_err)?;
    zip.write_all(serde_json::to_string_pretty(record)?.as_bytes())?;

    let mut taken: HashSet<String> = [FLOWCHART_ENTRY, MANIFEST_ENTRY].map(String::from).into();
    // The same source file is packed once, however many fields name it
    let mut packed: HashMap<&str, String> = HashMap::new();
    let mut manifest = Vec::new();
    for node in &record.nodes {
        for field in registry.asset_fields(&node.classname) {
            let Some(asset) = node.str_field(field).filter(|p| !p.is_empty()) else {
                continue;
            };
            if let Some(entry) = packed.get(asset) {
                manifest.push(AssetEntry {
                    node: node.id.clone(),
                    field: field.clone(),
                    entry: entry.clone(),
                });
                continue;
            }
            let Some(name) = entry_name(asset) else {
                return Err(WeftError::Archive(format!("bad asset path `{asset}`")));
            };
            let entry = unique_entry(&name, &taken);
            let mut source = File::open(asset).map_err(|e| {
                WeftError::Archive(format!("{} `{}`: asset {asset}: {e}", node.classname, node.label))
            })?;
            zip.start_file(entry.as_str(), options).map_err(archive_err)?;
            std::io::copy(&mut source, &mut zip)?;
            debug!(asset, entry = %entry, "Packed asset");

            taken.insert(entry.clone());
            packed.insert(asset, entry.clone());
            manifest.push(AssetEntry {
                node: node.id.clone(),
                field: field.clone(),
                entry,
            });
        }
    }

    zip.start_file(MANIFEST_ENTRY, options).map_err(archive_err)?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;
    zip.finish().map_err(archive_err)?;
    Ok(())
}

/// Read an archive. Asset entries are extracted into `extract_dir` and the
/// node fields naming them are rewritten to the extracted paths. Nothing is
/// extracted unless the flowchart itself loads.
pub fn load(registry: Arc<NodeRegistry>, path: &Path, extract_dir: &Path) -> Result<Flowchart> {
    let mut zip = ZipArchive::new(File::open(path)?).map_err(archive_err)?;

    let mut json = String::new();
    zip.by_name(FLOWCHART_ENTRY)
        .map_err(|_| WeftError::MalformedFile(format!("{} has no {FLOWCHART_ENTRY}", path.display())))?
        .read_to_string(&mut json)?;
    let mut record: FlowchartRecord =
        serde_json::from_str(&json).map_err(|e| WeftError::MalformedFile(e.to_string()))?;

    // Archives without a manifest fall back to the file name of each field
    let manifest: Option<HashMap<(NodeId, String), String>> = match zip.by_name(MANIFEST_ENTRY) {
        Ok(mut file) => {
            let mut text = String::new();
            file.read_to_string(&mut text)?;
            let entries: Vec<AssetEntry> =
                serde_json::from_str(&text).map_err(|e| WeftError::MalformedFile(e.to_string()))?;
            Some(entries.into_iter().map(|a| ((a.node, a.field), a.entry)).collect())
        }
        Err(_) => None,
    };

    let entries: HashSet<String> = zip.file_names().map(String::from).collect();
    let mut pending: Vec<(String, PathBuf)> = Vec::new();
    for node in &mut record.nodes {
        for field in registry.asset_fields(&node.classname) {
            let name = match &manifest {
                Some(map) => map.get(&(node.id.clone(), field.clone())).cloned(),
                None => node.str_field(field).and_then(entry_name),
            };
            let Some(name) = name else {
                continue;
            };
            if !entries.contains(&name) {
                warn!(node = %node.label, asset = %name, "Asset missing from archive");
                continue;
            }
            let dest = extract_dir.join(&name);
            node.fields.insert(
                field.clone(),
                serde_json::Value::String(dest.to_string_lossy().into_owned()),
            );
            if !pending.iter().any(|(n, _)| n == &name) {
                pending.push((name, dest));
            }
        }
    }

    let chart = Flowchart::deserialize(registry, &record)?;

    if !pending.is_empty() {
        std::fs::create_dir_all(extract_dir)?;
    }
    for (name, dest) in pending {
        let mut entry = zip.by_name(&name).map_err(archive_err)?;
        if entry.enclosed_name().is_none() {
            return Err(WeftError::Archive(format!("unsafe entry name `{name}`")));
        }
        let mut out = File::create(&dest)?;
        std::io::copy(&mut entry, &mut out)?;
        debug!(entry = %name, dest = %dest.display(), "Extracted asset");
    }

    info!(path = %path.display(), "Flowchart archive loaded");
    Ok(chart)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name() {
        assert_eq!(entry_name("data/index.json").as_deref(), Some("index.json"));
        assert_eq!(entry_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(entry_name(".."), None);
    }

    #[test]
    fn test_unique_entry_avoids_taken_names() {
        let mut taken: HashSet<String> = [FLOWCHART_ENTRY, MANIFEST_ENTRY].map(String::from).into();
        assert_eq!(unique_entry("data.txt", &taken), "data.txt");
        taken.insert("data.txt".into());
        assert_eq!(unique_entry("data.txt", &taken), "data-1.txt");
        taken.insert("data-1.txt".into());
        assert_eq!(unique_entry("data.txt", &taken), "data-2.txt");
        assert_eq!(unique_entry("flowchart.json", &taken), "flowchart-1.json");
        taken.insert("notes".into());
        assert_eq!(unique_entry("notes", &taken), "notes-1");
    }

    #[test]
    fn test_missing_flowchart_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.zip");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("other.txt", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"hi").unwrap();
        zip.finish().unwrap();

        let err = load(Arc::new(NodeRegistry::new()), &path, dir.path()).unwrap_err();
        assert!(matches!(err, WeftError::MalformedFile(_)));
    }
}
