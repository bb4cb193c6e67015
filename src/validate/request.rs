/// Request validation
///
/// Runs before any filesystem or container work. A request that passes comes
/// out as a `ValidatedRequest`, the only input the assembler accepts.
use crate::config::presets::Language;
use crate::config::settings::UnknownLanguagePolicy;
use crate::config::types::{ExecutionRequest, Result, SandboxError};
use crate::validate::manifest::validate_manifest;
use std::path::{Component, Path};

/// Names owned by the generated build context
const RESERVED_NAMES: &[&str] = &["Dockerfile", ".dockerignore"];

/// Request that passed validation, with its language resolved and duplicate
/// dependency paths collapsed
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub language: Language,
    pub request: ExecutionRequest,
}

impl ValidatedRequest {
    pub fn has_dependencies(&self) -> bool {
        !self.request.dependencies.is_empty()
    }
}

pub fn validate_request(
    request: &ExecutionRequest,
    policy: UnknownLanguagePolicy,
) -> Result<ValidatedRequest> {
    if request.owner_id.trim().is_empty() {
        return Err(SandboxError::Validation("ownerId is required".to_string()));
    }
    if request.language.trim().is_empty() {
        return Err(SandboxError::Validation("language is required".to_string()));
    }
    if request.test_files.is_empty() {
        return Err(SandboxError::Validation("testFiles are required".to_string()));
    }

    let language = Language::resolve(&request.language, policy)?;

    for file in request.source_files.iter().chain(&request.test_files) {
        validate_relative_path(&file.path)?;
    }

    let dependencies = request.effective_dependencies();
    for dep in &dependencies {
        validate_relative_path(&dep.path)?;
        validate_manifest(dep)?;
    }

    if let Some(command) = &request.custom_command {
        if command.trim().is_empty() {
            return Err(SandboxError::Validation(
                "customCommand cannot be blank".to_string(),
            ));
        }
        if command.contains('\0') {
            return Err(SandboxError::Validation(
                "customCommand contains a NUL byte".to_string(),
            ));
        }
    }

    let mut request = request.clone();
    request.dependencies = dependencies;

    Ok(ValidatedRequest { language, request })
}

/// Path must stay inside the build context root
pub fn validate_relative_path(path: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(SandboxError::Validation(format!(
            "invalid file path '{}': {}",
            path.escape_debug(),
            reason
        )))
    };

    if path.trim().is_empty() {
        return reject("path is empty");
    }
    if path.contains(['\0', '\n', '\r']) {
        return reject("control characters are not allowed");
    }
    if path.contains('\\') {
        return reject("backslashes are not allowed");
    }

    let parsed = Path::new(path);
    for component in parsed.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => {}
            Component::ParentDir => return reject("path traversal is not allowed"),
            Component::RootDir | Component::Prefix(_) => {
                return reject("absolute paths are not allowed")
            }
        }
    }

    if parsed.components().all(|c| matches!(c, Component::CurDir)) {
        return reject("path does not name a file");
    }

    let normalized: Vec<_> = parsed
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if let [Component::Normal(name)] = normalized.as_slice() {
        if RESERVED_NAMES.iter().any(|reserved| *name == *reserved) {
            return reject("name is reserved for the generated build script");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{DependencyFile, ExecutionKind, SourceFile};

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            owner_id: "project-1".to_string(),
            execution_kind: ExecutionKind::Validation,
            language: "go".to_string(),
            test_files: vec![SourceFile::new("main_test.go", "package main")],
            source_files: vec![SourceFile::new("pkg/util/util.go", "package util")],
            dependencies: Vec::new(),
            custom_command: None,
        }
    }

    #[test]
    fn test_valid_request() {
        let validated = validate_request(&request(), UnknownLanguagePolicy::Reject).unwrap();
        assert_eq!(validated.language, Language::Go);
        assert!(!validated.has_dependencies());
    }

    #[test]
    fn test_required_fields() {
        let mut req = request();
        req.owner_id = " ".to_string();
        assert!(validate_request(&req, UnknownLanguagePolicy::Reject)
            .unwrap_err()
            .to_string()
            .contains("ownerId"));

        let mut req = request();
        req.language.clear();
        assert!(validate_request(&req, UnknownLanguagePolicy::Reject).is_err());

        let mut req = request();
        req.test_files.clear();
        assert!(validate_request(&req, UnknownLanguagePolicy::Reject)
            .unwrap_err()
            .to_string()
            .contains("testFiles"));
    }

    #[test]
    fn test_malformed_manifest_rejected() {
        let mut req = request();
        req.dependencies = vec![DependencyFile::new("go.mod", "not a module")];
        let err = validate_request(&req, UnknownLanguagePolicy::Reject).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("go.mod"));
    }

    #[test]
    fn test_duplicate_manifest_last_wins_before_validation() {
        let mut req = request();
        req.dependencies = vec![
            DependencyFile::new("go.mod", "broken"),
            DependencyFile::new("go.mod", "module fixed"),
        ];
        let validated = validate_request(&req, UnknownLanguagePolicy::Reject).unwrap();
        assert_eq!(validated.request.dependencies.len(), 1);
        assert_eq!(validated.request.dependencies[0].content, "module fixed");
    }

    #[test]
    fn test_path_traversal_rejected() {
        for bad in [
            "../escape.go",
            "a/../../b.go",
            "/etc/passwd",
            "",
            ".",
            "a\nRUN rm -rf /",
            "dir\\file.go",
            "Dockerfile",
            "./Dockerfile",
            ".dockerignore",
        ] {
            assert!(validate_relative_path(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_nested_paths_accepted() {
        for good in ["a.go", "./a.go", "pkg/sub/a_test.go", "docker/Dockerfile", ".env"] {
            assert!(validate_relative_path(good).is_ok(), "rejected {:?}", good);
        }
    }

    #[test]
    fn test_traversal_in_test_file_rejected() {
        let mut req = request();
        req.test_files.push(SourceFile::new("../../outside_test.go", ""));
        assert!(validate_request(&req, UnknownLanguagePolicy::Reject).is_err());
    }

    #[test]
    fn test_blank_custom_command_rejected() {
        let mut req = request();
        req.custom_command = Some("   ".to_string());
        assert!(validate_request(&req, UnknownLanguagePolicy::Reject).is_err());
    }
}
