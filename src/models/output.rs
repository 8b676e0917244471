use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{HermetoError, Result};
use crate::models::sbom::{merge_component_properties, Component};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnvironmentVariableKind {
    Literal,
    Path,
}

/// A single environment variable a resolver contributes to the build
/// environment, e.g. `GOMODCACHE=${output_dir}/deps/gomod`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
    pub kind: EnvironmentVariableKind,
}

impl EnvironmentVariable {
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: EnvironmentVariableKind::Literal,
        }
    }

    pub fn path(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: EnvironmentVariableKind::Path,
        }
    }
}

/// A file a resolver wants written or patched under `output_dir`, keyed by
/// its absolute destination path (e.g. `.cargo/config.toml`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectFile {
    pub abspath: PathBuf,
    pub template: String,
}

impl ProjectFile {
    pub fn new(abspath: impl Into<PathBuf>, template: impl Into<String>) -> Self {
        Self {
            abspath: abspath.into(),
            template: template.into(),
        }
    }

    /// Render `template`, substituting the literal token `${output_dir}`
    /// with `output_dir`. No other substitution is performed; this mirrors
    /// the narrow, intentional template language resolvers are allowed to
    /// use when writing build configuration.
    pub fn render(&self, output_dir: &std::path::Path) -> String {
        self.template
            .replace("${output_dir}", &output_dir.to_string_lossy())
    }
}

/// The aggregate result of resolving every package in a `Request`: the
/// components destined for the SBOM, the environment variables to export,
/// and the project files to write, each merged and conflict-checked.
#[derive(Clone, Debug, Default)]
pub struct RequestOutput {
    pub components: Vec<Component>,
    pub environment_variables: BTreeMap<String, (String, EnvironmentVariableKind)>,
    pub project_files: BTreeMap<PathBuf, String>,
}

impl RequestOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge another package's partial output into this one. Components are
    /// merged by purl (see `models::sbom::merge_component_properties`);
    /// environment variables and project files must be disjoint across
    /// packages, since two resolvers proposing different values for the
    /// same name/path is a real configuration conflict, not something a
    /// merge law can paper over.
    pub fn merge(&mut self, other: PackageOutput) -> Result<()> {
        self.components.extend(other.components);

        for env_var in other.environment_variables {
            match self.environment_variables.get(&env_var.name) {
                Some((existing_value, _)) if existing_value == &env_var.value => {}
                Some((existing_value, _)) => {
                    return Err(HermetoError::unexpected_format(format!(
                        "conflicting values for environment variable {}: '{existing_value}' vs '{}'",
                        env_var.name, env_var.value
                    )));
                }
                None => {
                    self.environment_variables
                        .insert(env_var.name, (env_var.value, env_var.kind));
                }
            }
        }

        for project_file in other.project_files {
            match self.project_files.get(&project_file.abspath) {
                Some(existing) if existing == &project_file.template => {}
                Some(_) => {
                    return Err(HermetoError::unexpected_format(format!(
                        "conflicting content proposed for project file {}",
                        project_file.abspath.display()
                    )));
                }
                None => {
                    self.project_files
                        .insert(project_file.abspath, project_file.template);
                }
            }
        }

        Ok(())
    }

    /// Sort and de-duplicate the accumulated components by purl, merging
    /// their properties. Call once after all packages have been merged in.
    pub fn finalize_components(&mut self) {
        let components = std::mem::take(&mut self.components);
        self.components = merge_component_properties(components);
    }
}

/// The partial output a single package resolver contributes before it is
/// folded into a `RequestOutput`.
#[derive(Clone, Debug, Default)]
pub struct PackageOutput {
    pub components: Vec<Component>,
    pub environment_variables: Vec<EnvironmentVariable>,
    pub project_files: Vec<ProjectFile>,
}

impl PackageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_environment_variable(mut self, env_var: EnvironmentVariable) -> Self {
        self.environment_variables.push(env_var);
        self
    }

    pub fn with_project_file(mut self, project_file: ProjectFile) -> Self {
        self.project_files.push(project_file);
        self
    }
}
