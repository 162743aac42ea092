//! `graft run`: bootstrap the loader in a fresh host.

use crate::output::StyledOutput;
use anyhow::Context;
use graft_core::{Bootstrap, BootstrapConfig, Host, Outcome, Report};
use std::path::{Path, PathBuf};
use termcolor::ColorChoice;

const DEFAULT_CONFIG: &str = "graft.toml";

pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub modules_dir: Option<PathBuf>,
    pub wrapper: Option<PathBuf>,
    pub json: bool,
    pub color: ColorChoice,
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    log::debug!(
        "Using wrapper {} and modules from {}",
        config.wrapper.display(),
        config.modules_dir.display()
    );

    let host = Host::new();
    let outcome = Bootstrap::new(&host, config)
        .run()
        .context("Bootstrap failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let mut out = StyledOutput::new(args.color);
    match &outcome {
        Outcome::Completed(report) => print_report(&mut out, report),
        Outcome::MissingDependency { path } => {
            out.warning("Skipped", "the loader is not installed");
            out.field("missing file", &path.display().to_string());
        }
    }
    Ok(())
}

/// File config (explicit, or ./graft.toml when present) with flag overrides
///
/// Relative paths in a config file are relative to the file; flag paths are
/// relative to the working directory.
fn load_config(args: &RunArgs) -> anyhow::Result<BootstrapConfig> {
    let file = match &args.config {
        Some(path) => Some(path.clone()),
        None => Some(PathBuf::from(DEFAULT_CONFIG)).filter(|p| p.is_file()),
    };

    let mut config = match file {
        Some(path) => {
            let root = path.parent().unwrap_or(Path::new("")).to_path_buf();
            BootstrapConfig::from_file(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?
                .rooted_at(&root)
        }
        None => BootstrapConfig::default(),
    };

    if let Some(dir) = &args.modules_dir {
        config.modules_dir = dir.clone();
    }
    if let Some(wrapper) = &args.wrapper {
        config.wrapper = wrapper.clone();
    }
    Ok(config)
}

fn print_report(out: &mut StyledOutput, report: &Report) {
    out.success("Done!", &format!("{} started", report.wrapper));
    out.field("patched", &report.patched_method);
    out.field("preloaded", &join_or_none(&report.preloaded));
    out.field("already loaded", &join_or_none(&report.already_loaded));
    out.field(
        "redirects",
        &format!(
            "{} load call(s), {} abort site(s)",
            report.redirected_loads, report.abort_sites
        ),
    );
    out.field(
        "resolver",
        &format!(
            "{} on {} module(s){}",
            report.resolver.method,
            report.resolver.installed.len(),
            if report.resolver.global { " + default" } else { "" }
        ),
    );
    out.field("modules", &format!("{} loaded, {} load(s)", report.modules, report.loads));
}

fn join_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}
