use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "hermeto",
    version,
    about = "Prefetches project dependencies for hermetic, network-isolated builds"
)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum EnvFormat {
    Env,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    #[value(name = "export")]
    Export,
    #[value(name = "json")]
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch dependency sources for one or more package managers and write
    /// a CycloneDX SBOM plus build configuration to the output directory.
    FetchDeps {
        /// JSON array of package inputs, e.g. '[{"type": "pip"}]', or a bare
        /// package manager name as shorthand for '[{"type": "<name>"}]'.
        packages: String,

        /// Project source directory. Defaults to the current directory.
        #[arg(long, default_value = ".")]
        source: PathBuf,

        /// Directory to write prefetched sources and output files into.
        #[arg(long, default_value = "./hermeto-output")]
        output: PathBuf,

        /// Opt-in flags, comma separated (cgo-disable, force-gomod-tidy,
        /// gomod-vendor, gomod-vendor-check, dev-package-managers).
        #[arg(long, value_delimiter = ',')]
        flags: Vec<String>,
    },

    /// Render the environment variables from a previous fetch-deps run.
    GenerateEnv {
        /// Output directory produced by a prior `fetch-deps` run.
        output: PathBuf,

        /// Destination file for the rendered environment. Prints to stdout
        /// when omitted.
        #[arg(long)]
        for_output_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = EnvFormat::Env)]
        format: EnvFormat,

        #[arg(long, value_enum, default_value_t = OutputFormat::Export)]
        output_format: OutputFormat,
    },

    /// Write or patch project files (e.g. `.cargo/config.toml`) recorded by
    /// a previous fetch-deps run into a project checkout.
    InjectFiles {
        /// Output directory produced by a prior `fetch-deps` run.
        output: PathBuf,

        /// Project directory the files should be written relative to.
        #[arg(long, default_value = ".")]
        for_output_dir: PathBuf,
    },

    /// Merge two or more SBOMs produced by separate fetch-deps invocations.
    MergeSboms {
        /// Paths to CycloneDX SBOM JSON files. At least two are required.
        #[arg(required = true, num_args = 2..)]
        sboms: Vec<PathBuf>,

        /// Destination file. Prints to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

impl std::fmt::Display for EnvFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Env => "env",
            Self::Json => "json",
        })
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Export => "export",
            Self::Json => "json",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fetch_deps_with_flags() {
        let cli = Cli::try_parse_from([
            "hermeto",
            "fetch-deps",
            "--source",
            "/src",
            "--output",
            "/out",
            "--flags",
            "gomod-vendor,cgo-disable",
            "gomod",
        ])
        .expect("parse");
        match cli.command {
            Command::FetchDeps {
                packages,
                source,
                output,
                flags,
            } => {
                assert_eq!(packages, "gomod");
                assert_eq!(source, PathBuf::from("/src"));
                assert_eq!(output, PathBuf::from("/out"));
                assert_eq!(flags, vec!["gomod-vendor", "cgo-disable"]);
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn parses_generate_env_defaults() {
        let cli = Cli::try_parse_from(["hermeto", "generate-env", "/out"]).expect("parse");
        match cli.command {
            Command::GenerateEnv {
                output,
                for_output_dir,
                ..
            } => {
                assert_eq!(output, PathBuf::from("/out"));
                assert!(for_output_dir.is_none());
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn merge_sboms_requires_at_least_two_paths() {
        let result = Cli::try_parse_from(["hermeto", "merge-sboms", "one.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_inject_files() {
        let cli = Cli::try_parse_from([
            "hermeto",
            "inject-files",
            "/out",
            "--for-output-dir",
            "/project",
        ])
        .expect("parse");
        match cli.command {
            Command::InjectFiles {
                output,
                for_output_dir,
            } => {
                assert_eq!(output, PathBuf::from("/out"));
                assert_eq!(for_output_dir, PathBuf::from("/project"));
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn parses_verbose_flag() {
        let cli = Cli::try_parse_from(["hermeto", "--verbose", "merge-sboms", "a.json", "b.json"])
            .expect("parse");
        assert!(cli.verbose);
    }
}
