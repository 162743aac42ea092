//! Native Resolver Forwarder
//!
//! Finds the subsystem's native library resolver method after its startup has
//! run and installs it for the other loaded modules.

use crate::host::intrinsics::incompatible;
use crate::host::{Fault, Host, HostError, ModuleHandle, Value};
use graft_bytecode::{MethodRef, TypeDef};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Answers "where is native library L for module M"
pub trait NativeResolver: Send + Sync {
    /// Resolve `library` as requested by `module`
    ///
    /// `None` means this resolver has no answer and default resolution applies.
    fn resolve(
        &self,
        host: &Host,
        library: &str,
        module: &ModuleHandle,
    ) -> Result<Option<String>, Fault>;
}

impl<F> NativeResolver for F
where
    F: Fn(&Host, &str, &ModuleHandle) -> Result<Option<String>, Fault> + Send + Sync,
{
    fn resolve(
        &self,
        host: &Host,
        library: &str,
        module: &ModuleHandle,
    ) -> Result<Option<String>, Fault> {
        self(host, library, module)
    }
}

/// Shape a resolver method must have
const RESOLVER_SHAPE: &str = "static (string, module) -> string";

/// A resolver backed by a method in a loaded module
#[derive(Debug, Clone)]
pub struct MethodResolver {
    method: MethodRef,
}

impl MethodResolver {
    /// Wrap a method with signature `static (string, module) -> string`
    pub fn new(method: MethodRef) -> Result<Self, HostError> {
        if !Self::fits(&method) {
            return Err(incompatible(method, RESOLVER_SHAPE));
        }
        Ok(Self { method })
    }

    fn fits(method: &MethodRef) -> bool {
        !method.has_this
            && method.params.len() == 2
            && method.params[0] == "string"
            && method.params[1] == "module"
            && method.returns == "string"
    }

    /// The wrapped method
    pub fn method(&self) -> &MethodRef {
        &self.method
    }
}

impl NativeResolver for MethodResolver {
    fn resolve(
        &self,
        host: &Host,
        library: &str,
        module: &ModuleHandle,
    ) -> Result<Option<String>, Fault> {
        let result = host.invoke(
            &self.method,
            vec![Value::str(library), Value::Module(module.clone())],
        )?;
        match result {
            Value::Str(path) => Ok(Some(path.to_string())),
            Value::Null => Ok(None),
            other => Err(Fault::TypeMismatch {
                method: self.method.to_string(),
                expected: "string",
                actual: other.type_name(),
            }),
        }
    }
}

/// A resolver that stays silent for a set of module names
struct Excluding {
    inner: Arc<dyn NativeResolver>,
    excluded: FxHashSet<String>,
}

impl NativeResolver for Excluding {
    fn resolve(
        &self,
        host: &Host,
        library: &str,
        module: &ModuleHandle,
    ) -> Result<Option<String>, Fault> {
        if self.excluded.contains(module.name()) {
            return Ok(None);
        }
        self.inner.resolve(host, library, module)
    }
}

/// Which modules receive the forwarded resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverScope {
    /// Only modules loaded when forwarding runs
    Loaded,
    /// Loaded modules, plus the host default for modules loaded later
    #[default]
    Global,
}

/// Errors from forwarding the resolver
#[derive(Debug, Error)]
pub enum ResolverError {
    /// The entry type declares no method with the resolver's name
    #[error("Resolver method '{name}' not found on '{owner}'")]
    MethodNotFound {
        /// Type searched
        owner: String,
        /// Method name searched
        name: String,
    },

    /// Installing the resolver failed
    #[error(transparent)]
    Host(#[from] HostError),
}

/// What forwarding did
#[derive(Debug, Clone, Default, Serialize)]
pub struct ForwardReport {
    /// Resolver method signature
    pub method: String,
    /// Modules that received the resolver
    pub installed: Vec<String>,
    /// Excluded modules that were loaded
    pub skipped: Vec<String>,
    /// Whether the resolver also became the host default
    pub global: bool,
}

/// Install the resolver method `name` declared on `entry` on every loaded
/// module not in `excluded`
///
/// Among overloads of `name`, the one shaped `static (string, module) -> string`
/// is used.
pub fn forward(
    host: &Host,
    entry: &TypeDef,
    name: &str,
    excluded: &[String],
    scope: ResolverScope,
) -> Result<ForwardReport, ResolverError> {
    let resolver = select(entry, name)?;
    let method = resolver.method().clone();
    let resolver: Arc<dyn NativeResolver> = Arc::new(resolver);

    let mut report = ForwardReport {
        method: method.to_string(),
        ..ForwardReport::default()
    };

    for module in host.modules() {
        if excluded.iter().any(|e| e == module.name()) {
            log::debug!("Skipping native resolver for '{}'", module.name());
            report.skipped.push(module.name().to_string());
            continue;
        }
        host.set_native_resolver(&module, resolver.clone())?;
        report.installed.push(module.name().to_string());
    }

    if scope == ResolverScope::Global {
        host.set_default_resolver(Arc::new(Excluding {
            inner: resolver,
            excluded: excluded.iter().cloned().collect(),
        }));
        report.global = true;
    }

    log::debug!(
        "Forwarded native resolver {} to {} module(s)",
        report.method,
        report.installed.len()
    );
    Ok(report)
}

fn select(entry: &TypeDef, name: &str) -> Result<MethodResolver, ResolverError> {
    let mut named = entry
        .methods
        .iter()
        .filter(|m| m.name == name)
        .map(|m| entry.signature(m))
        .peekable();
    let first = named.peek().cloned().ok_or_else(|| ResolverError::MethodNotFound {
        owner: entry.name.clone(),
        name: name.to_string(),
    })?;
    match named.find(MethodResolver::fits) {
        Some(method) => Ok(MethodResolver { method }),
        None => Err(incompatible(first, RESOLVER_SHAPE).into()),
    }
}
