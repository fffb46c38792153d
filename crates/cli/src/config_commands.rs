use std::path::PathBuf;

use {
    anyhow::{Context, Result, bail},
    clap::Subcommand,
};

use parley_config::{Severity, find_config_file, validate_file, write_default_config};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate a configuration file and report errors/warnings.
    Check {
        /// File to check. Defaults to the first `parley.{toml,yaml,yml,json}` found.
        path: Option<PathBuf>,
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Write a documented default configuration.
    Init {
        /// Destination file.
        #[arg(default_value = "parley.toml")]
        path: PathBuf,
    },
}

pub fn handle_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check { path, verbose } => check(path, verbose),
        ConfigAction::Init { path } => {
            write_default_config(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(path: Option<PathBuf>, verbose: bool) -> Result<()> {
    let Some(path) = path.or_else(find_config_file) else {
        bail!("no configuration file found; pass a path or run `parley config init`");
    };
    eprintln!("Checking {}\n", path.display());

    let result = validate_file(&path);
    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}
