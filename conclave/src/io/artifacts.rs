//! Artifact reference validation with path-traversal containment.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::core::model::Envelope;

/// Validate an envelope's artifact references against `base_dir`.
///
/// Returns warnings for references that resolve outside `base_dir` or do
/// not exist; warnings never block progress. Containment is decided
/// lexically (`..` components are folded before comparison) so a
/// traversal is rejected whether or not the target exists on disk.
pub fn validate_artifacts(envelope: &Envelope, base_dir: &Path) -> Vec<String> {
    let mut warnings = Vec::new();

    for artifact in &envelope.artifacts {
        if artifact.path.is_empty() {
            warnings.push("Artifact with empty path".to_string());
            continue;
        }
        match contain(base_dir, Path::new(&artifact.path)) {
            Some(resolved) => {
                if !resolved.exists() {
                    warnings.push(format!("Artifact not found: {}", artifact.path));
                }
            }
            None => {
                warn!(path = %artifact.path, "artifact path escapes base directory");
                warnings.push(format!(
                    "Artifact path escapes base directory: {}",
                    artifact.path
                ));
            }
        }
    }

    warnings
}

/// Resolve `candidate` under `base`, folding `.`/`..` lexically.
///
/// `None` when the candidate escapes `base` (absolute path outside it, or
/// more `..` components than depth).
fn contain(base: &Path, candidate: &Path) -> Option<PathBuf> {
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            other => normalized.push(other),
        }
    }

    normalized.starts_with(base).then_some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ArtifactRef;
    use crate::core::types::EnvelopeStatus;

    fn envelope_with(paths: &[&str]) -> Envelope {
        Envelope {
            status: EnvelopeStatus::Ok,
            artifacts: paths
                .iter()
                .map(|p| ArtifactRef {
                    path: p.to_string(),
                    description: String::new(),
                })
                .collect(),
            ..Envelope::default()
        }
    }

    #[test]
    fn traversal_is_rejected_even_when_target_exists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let env = envelope_with(&["../../etc/passwd"]);
        let warnings = validate_artifacts(&env, temp.path());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("escapes base directory"));
    }

    #[test]
    fn existing_relative_artifact_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("report.md"), "x").expect("write");
        let env = envelope_with(&["report.md"]);
        assert!(validate_artifacts(&env, temp.path()).is_empty());
    }

    #[test]
    fn missing_artifact_warns_but_contained() {
        let temp = tempfile::tempdir().expect("tempdir");
        let env = envelope_with(&["not-written-yet.md"]);
        let warnings = validate_artifacts(&env, temp.path());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("not found"));
    }

    #[test]
    fn dotdot_inside_base_is_allowed() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(temp.path().join("sub")).expect("mkdir");
        std::fs::write(temp.path().join("report.md"), "x").expect("write");
        let env = envelope_with(&["sub/../report.md"]);
        assert!(validate_artifacts(&env, temp.path()).is_empty());
    }

    #[test]
    fn absolute_path_outside_base_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let env = envelope_with(&["/etc/hostname"]);
        let warnings = validate_artifacts(&env, temp.path());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("escapes base directory"));
    }
}
