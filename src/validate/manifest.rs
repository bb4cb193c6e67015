/// Dependency manifest validation
///
/// The manifest kind is decided by file name, never by sniffing content.
/// Unknown kinds pass through unvalidated.
use crate::config::types::{DependencyFile, Result, SandboxError};
use std::path::Path;

/// Manifest families understood by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// go.mod
    ModuleDescriptor,
    /// package.json
    PackageDescriptor,
    /// requirements.txt
    FlatList,
    Other,
}

impl ManifestKind {
    pub fn from_path(path: &str) -> Self {
        let file_name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        match file_name {
            "go.mod" => ManifestKind::ModuleDescriptor,
            "package.json" => ManifestKind::PackageDescriptor,
            "requirements.txt" => ManifestKind::FlatList,
            _ => ManifestKind::Other,
        }
    }
}

/// Validate one dependency file, returning a descriptive reason on failure
pub fn validate_manifest(dep: &DependencyFile) -> Result<()> {
    let outcome = match ManifestKind::from_path(&dep.path) {
        ManifestKind::ModuleDescriptor => check_module_descriptor(&dep.content),
        ManifestKind::PackageDescriptor => check_package_descriptor(&dep.content),
        ManifestKind::FlatList => check_flat_list(&dep.content),
        ManifestKind::Other => Ok(()),
    };

    outcome.map_err(|reason| {
        SandboxError::Validation(format!("invalid dependency file {}: {}", dep.path, reason))
    })
}

fn check_module_descriptor(content: &str) -> std::result::Result<(), String> {
    // Leading blank lines and // comments are legal before the declaration
    let first = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("//"));

    match first {
        Some(line) if line.starts_with("module ") || line.starts_with("module\t") => Ok(()),
        _ => Err("missing module declaration".to_string()),
    }
}

fn check_package_descriptor(content: &str) -> std::result::Result<(), String> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| format!("malformed JSON: {}", e))?;

    if !value.is_object() {
        return Err("top-level value must be an object".to_string());
    }
    Ok(())
}

fn check_flat_list(content: &str) -> std::result::Result<(), String> {
    if content.is_empty() {
        return Err("file is empty".to_string());
    }

    let has_declaration = content
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with('#'));

    if !has_declaration {
        return Err("no package declarations".to_string());
    }
    Ok(())
}
