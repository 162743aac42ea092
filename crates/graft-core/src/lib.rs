//! Graft Core Runtime
//!
//! This crate provides the in-process side of Graft:
//! - Module host (loaded-module set, real loader, method dispatch)
//! - Module registry over the loaded set
//! - Load redirection for both loader entry points
//! - Native resolver forwarding
//! - The bootstrap sequence tying them together

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod host;
pub mod registry;
pub mod redirect;
pub mod resolver;
pub mod scan;
pub mod config;
pub mod bootstrap;

pub use host::{
    CallContext, Fault, Host, HostError, HostOptions, Intrinsic, LoadError, LoadedModule,
    ModuleHandle, ModuleId, Prefix, PrefixFn, Value,
};
pub use registry::{logical_name, ModuleRegistry, ModuleSet};
pub use redirect::{LoadRedirector, MissPolicy, Redirect, REDIRECT_LOAD_FROM_PATH};
pub use resolver::{
    forward, ForwardReport, MethodResolver, NativeResolver, ResolverError, ResolverScope,
};
pub use scan::{CandidateSource, DirectoryScan};
pub use config::{BootstrapConfig, ConfigError, TargetNames};
pub use bootstrap::{Bootstrap, BootstrapError, Outcome, PatchFailure, Report};
