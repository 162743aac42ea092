//! Bootstrap sequence
//!
//! Runs once per host, strictly in order:
//!
//! 1. **preload**: the wrapper module, then every candidate not already loaded
//! 2. **patch**: rewrite the wrapper's startup method and hook the file loader
//! 3. **invoke**: run the wrapper's entry point until the injected abort
//! 4. **forward**: hand the subsystem's native resolver to the loaded modules
//!
//! A missing file during preload ends the sequence quietly. Any other failure
//! is logged with a short diagnostic for its phase and returned.

use crate::config::BootstrapConfig;
use crate::host::intrinsics::{LOAD_CONTEXT_LOAD_FROM_PATH, METHOD_BASE_INVOKE};
use crate::host::{Fault, Host, HostError, LoadError, ModuleHandle};
use crate::redirect::{LoadRedirector, REDIRECT_LOAD_FROM_PATH};
use crate::registry::{logical_name, ModuleRegistry};
use crate::resolver::{self, ForwardReport, ResolverError};
use crate::scan::{CandidateSource, DirectoryScan};
use graft_bytecode::{
    abort_after_null_receiver_call, rewrite, substitute_call, PatchError, TypeDef,
};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why patch installation failed
#[derive(Debug, Error)]
pub enum PatchFailure {
    /// The wrapper declares no entry point
    #[error("Wrapper module '{0}' has no entry point")]
    NoEntryPoint(String),

    /// A required type is not loaded
    #[error("Type not found: {0}")]
    TypeNotFound(String),

    /// A required method is not declared
    #[error("Method '{name}' not found on '{owner}'")]
    MethodNotFound {
        /// Type searched
        owner: String,
        /// Method searched
        name: String,
    },

    /// The startup body did not match the expected shape
    #[error(transparent)]
    Rewrite(#[from] PatchError),

    /// The host refused an installation
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Fatal bootstrap errors
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Preloading failed for a reason other than a missing file
    #[error("Preload failed: {0}")]
    Preload(#[source] LoadError),

    /// Locating or patching the subsystem failed
    #[error("Patching failed: {0}")]
    Patch(#[from] PatchFailure),

    /// The entry point raised something other than the abort signal
    #[error("Entry point failed: {0}")]
    Invocation(#[source] Fault),

    /// Forwarding the native resolver failed
    #[error("Native resolver forwarding failed: {0}")]
    Resolver(#[from] ResolverError),

    /// A bootstrap already ran on this host
    #[error("Bootstrap already ran on this host")]
    AlreadyRan,
}

/// Summary of a completed bootstrap
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    /// Wrapper module name
    pub wrapper: String,
    /// Candidates loaded during preload
    pub preloaded: Vec<String>,
    /// Candidates skipped because a module with that name was loaded
    pub already_loaded: Vec<String>,
    /// Patched startup method
    pub patched_method: String,
    /// Abort sites injected
    pub abort_sites: usize,
    /// Real loader calls redirected
    pub redirected_loads: usize,
    /// Whether the entry point ended with the abort signal
    pub aborted: bool,
    /// Native resolver forwarding
    pub resolver: ForwardReport,
    /// Modules loaded when the bootstrap finished
    pub modules: usize,
    /// Real loads performed, including the wrapper
    pub loads: usize,
}

/// How a bootstrap ended
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Every phase ran
    Completed(Report),
    /// A required file is missing; nothing was patched or invoked
    MissingDependency {
        /// The missing file
        path: PathBuf,
    },
}

enum PreloadFailure {
    Missing(PathBuf),
    Failed(LoadError),
}

impl From<LoadError> for PreloadFailure {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::NotFound { path } => PreloadFailure::Missing(path),
            other => PreloadFailure::Failed(other),
        }
    }
}

/// One bootstrap run against a host
pub struct Bootstrap<'h> {
    host: &'h Host,
    config: BootstrapConfig,
    source: Box<dyn CandidateSource + 'h>,
}

impl<'h> Bootstrap<'h> {
    /// Bootstrap that scans the configured modules directory
    pub fn new(host: &'h Host, config: BootstrapConfig) -> Self {
        let source = DirectoryScan::new(config.modules_dir.clone(), config.extension.clone());
        Self {
            host,
            config,
            source: Box::new(source),
        }
    }

    /// Use a different candidate source
    pub fn with_source(mut self, source: impl CandidateSource + 'h) -> Self {
        self.source = Box::new(source);
        self
    }

    /// Run every phase
    pub fn run(self) -> Result<Outcome, BootstrapError> {
        if !self.host.mark_bootstrapped() {
            log::error!("Bootstrap already ran on this host.");
            return Err(BootstrapError::AlreadyRan);
        }
        log::info!("Starting bootstrap with wrapper {}", self.config.wrapper.display());

        let mut report = Report::default();

        let wrapper = match self.preload(&mut report) {
            Ok(wrapper) => wrapper,
            Err(PreloadFailure::Missing(path)) => {
                log::error!(
                    "Could not find a required loader file!\nThe loader will not be started.\nMissing file: {}",
                    path.display()
                );
                return Ok(Outcome::MissingDependency { path });
            }
            Err(PreloadFailure::Failed(err)) => {
                log::error!("Error occurred when preloading modules.");
                return Err(BootstrapError::Preload(err));
            }
        };

        let entry_type = match self.patch(&wrapper, &mut report) {
            Ok(entry_type) => entry_type,
            Err(err) => {
                log::error!("Error occurred when patching.");
                return Err(err.into());
            }
        };

        log::debug!("Invoking wrapper entry point");
        match self.host.invoke_entry_point(&wrapper) {
            Ok(_) => log::warn!("Entry point returned without reaching the abort site"),
            Err(fault) if fault.is_abort_signal() => report.aborted = true,
            Err(fault) => {
                log::error!("Error occurred in loader code.");
                return Err(BootstrapError::Invocation(fault));
            }
        }

        report.resolver = match resolver::forward(
            self.host,
            entry_type,
            &self.config.targets.resolver_method,
            &self.config.resolver_exclusions,
            self.config.resolver_scope,
        ) {
            Ok(forwarded) => forwarded,
            Err(err) => {
                log::error!("Error occurred in loader code.");
                return Err(err.into());
            }
        };

        report.modules = self.host.modules().len();
        report.loads = self.host.load_count();
        log::info!("Done!");
        Ok(Outcome::Completed(report))
    }

    fn preload(&self, report: &mut Report) -> Result<ModuleHandle, PreloadFailure> {
        let wrapper = self.host.load_from_path(&self.config.wrapper)?;
        report.wrapper = wrapper.name().to_string();

        let candidates = self.source.candidates().map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                PreloadFailure::Missing(self.config.modules_dir.clone())
            } else {
                PreloadFailure::Failed(LoadError::Io {
                    path: self.config.modules_dir.clone(),
                    source: err,
                })
            }
        })?;

        let registry = ModuleRegistry::new(self.host);
        for path in candidates {
            let name = logical_name(&path);
            if registry.contains_name(&name) {
                log::debug!("Already loaded: {}", name);
                report.already_loaded.push(name);
                continue;
            }
            log::debug!("Preloading: {}", name);
            self.host.load_from_path(&path)?;
            report.preloaded.push(name);
        }

        Ok(wrapper)
    }

    /// Returns the wrapper's own declaring type of the entry point
    fn patch<'w>(
        &self,
        wrapper: &'w ModuleHandle,
        report: &mut Report,
    ) -> Result<&'w TypeDef, PatchFailure> {
        let targets = &self.config.targets;

        let (entry_type, _) = wrapper
            .image()
            .entry_point()
            .ok_or_else(|| PatchFailure::NoEntryPoint(wrapper.name().to_string()))?;

        let startup = entry_type
            .methods
            .iter()
            .find(|m| m.name == targets.entry_method && m.returns == targets.entry_returns)
            .ok_or_else(|| PatchFailure::MethodNotFound {
                owner: entry_type.name.clone(),
                name: targets.entry_method.clone(),
            })?;
        let signature = entry_type.signature(startup);

        let rules = [
            abort_after_null_receiver_call(METHOD_BASE_INVOKE.clone()),
            substitute_call(
                LOAD_CONTEXT_LOAD_FROM_PATH.clone(),
                REDIRECT_LOAD_FROM_PATH.clone(),
            ),
        ];
        let rewritten = rewrite(&startup.body, &rules)?;
        report.abort_sites = rewritten.matches[0];
        report.redirected_loads = rewritten.matches[1];
        self.host.install_body(&signature, rewritten.body)?;
        log::debug!(
            "Patched {} ({} abort site, {} redirected load(s))",
            signature,
            report.abort_sites,
            report.redirected_loads
        );
        report.patched_method = signature.to_string();

        if self.host.find_type(&targets.load_strategy_type).is_none() {
            return Err(PatchFailure::TypeNotFound(targets.load_strategy_type.clone()));
        }
        let load_file = self
            .host
            .find_method(&targets.load_strategy_type, &targets.load_file_method)
            .ok_or_else(|| PatchFailure::MethodNotFound {
                owner: targets.load_strategy_type.clone(),
                name: targets.load_file_method.clone(),
            })?;
        LoadRedirector::new(self.config.reserved_module.clone())
            .with_miss_policy(self.config.miss_policy)
            .install(self.host, &load_file)?;

        Ok(entry_type)
    }
}
