use std::path::PathBuf;

use thiserror::Error;

/// The error taxonomy shared by every resolver and the orchestrator.
///
/// Each variant carries a short machine-oriented message (via `#[error]`) and,
/// where it makes sense, a human `solution` hint and an optional `docs` link.
/// [`HermetoError::friendly_message`] renders all three the way a CLI should
/// present them to a user.
#[derive(Debug, Error)]
pub enum HermetoError {
    /// The input package fails a precondition: missing lockfile, unpinned
    /// version, bad hash, invalid sdist, etc. User-fixable.
    #[error("{reason}")]
    PackageRejected {
        reason: String,
        solution: Option<String>,
        docs: Option<String>,
    },

    /// The input uses a feature this tool deliberately does not implement.
    #[error("{reason}")]
    UnsupportedFeature {
        reason: String,
        solution: Option<String>,
    },

    /// A required subprocess (go, cargo, createrepo_c, ...) exited non-zero,
    /// or the upstream tool returned malformed data.
    #[error("{reason}")]
    PackageManagerError { reason: String },

    /// Network-level failure after retries.
    #[error("{reason}")]
    FetchError { reason: String },

    /// Input superficially parses but violates the format's grammar in a
    /// specific, documented way.
    #[error("{reason}")]
    UnexpectedFormat { reason: String },

    /// CLI or config input fails schema validation.
    #[error("{reason}")]
    InvalidInput { reason: String },

    /// A `RootedPath::join_within_root` call would escape its root.
    #[error("path '{attempted}' escapes root '{root}'", attempted = attempted.display(), root = root.display())]
    PathOutsideRoot {
        root: PathBuf,
        attempted: PathBuf,
        solution: String,
    },
}

impl HermetoError {
    pub fn package_rejected(reason: impl Into<String>, solution: Option<String>) -> Self {
        Self::PackageRejected {
            reason: reason.into(),
            solution,
            docs: None,
        }
    }

    pub fn package_rejected_with_docs(
        reason: impl Into<String>,
        solution: impl Into<String>,
        docs: impl Into<String>,
    ) -> Self {
        Self::PackageRejected {
            reason: reason.into(),
            solution: Some(solution.into()),
            docs: Some(docs.into()),
        }
    }

    pub fn unsupported_feature(reason: impl Into<String>, solution: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            reason: reason.into(),
            solution: Some(solution.into()),
        }
    }

    pub fn unexpected_format(reason: impl Into<String>) -> Self {
        Self::UnexpectedFormat {
            reason: reason.into(),
        }
    }

    pub fn package_manager_error(reason: impl Into<String>) -> Self {
        Self::PackageManagerError {
            reason: reason.into(),
        }
    }

    pub fn fetch_error(reason: impl Into<String>) -> Self {
        Self::FetchError {
            reason: reason.into(),
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn path_outside_root(root: PathBuf, attempted: PathBuf) -> Self {
        Self::PathOutsideRoot {
            root,
            attempted,
            solution:
                "Check that the path doesn't contain unexpected '..' components or symlinks that \
                 lead outside the expected root."
                    .to_string(),
        }
    }

    /// Exit code this error should map to at the CLI boundary: 2 for
    /// "invalid usage / input validation", 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput { .. } | Self::PackageRejected { .. } => 2,
            _ => 1,
        }
    }

    /// Render the message, solution and docs link the way a terminal user
    /// should see them.
    pub fn friendly_message(&self) -> String {
        let (reason, solution, docs) = match self {
            Self::PackageRejected {
                reason,
                solution,
                docs,
            } => (reason.clone(), solution.clone(), docs.clone()),
            Self::UnsupportedFeature { reason, solution } => {
                (reason.clone(), solution.clone(), None)
            }
            Self::PathOutsideRoot { solution, .. } => (self.to_string(), Some(solution.clone()), None),
            other => (other.to_string(), None, None),
        };

        let mut msg = reason;
        if let Some(solution) = solution {
            msg.push('\n');
            for line in solution.lines() {
                msg.push_str("  ");
                msg.push_str(line);
                msg.push('\n');
            }
            msg = msg.trim_end().to_string();
        }
        if let Some(docs) = docs {
            msg.push_str(&format!("\n  Docs: {docs}"));
        }
        msg
    }
}

pub type Result<T> = std::result::Result<T, HermetoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_for_invalid_input_is_two() {
        let err = HermetoError::invalid_input("bad packages field");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn exit_code_for_fetch_error_is_one() {
        let err = HermetoError::fetch_error("connection reset");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn friendly_message_includes_solution_and_docs() {
        let err = HermetoError::package_rejected_with_docs(
            "go.sum is missing",
            "run 'go mod tidy' to regenerate it",
            "https://example.invalid/docs/gomod",
        );
        let rendered = err.friendly_message();
        assert!(rendered.contains("go.sum is missing"));
        assert!(rendered.contains("run 'go mod tidy'"));
        assert!(rendered.contains("Docs: https://example.invalid/docs/gomod"));
    }
}
