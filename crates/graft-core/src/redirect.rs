//! Load Redirector
//!
//! Two loader entry points converge on one [`ModuleRegistry`]:
//!
//! - the subsystem's file loader strategy (`load_file`), hooked with a host
//!   prefix. A reserved module name is always rejected there.
//! - the low-level `load_from_path` on the load context, which the patched
//!   startup body calls through [`REDIRECT_LOAD_FROM_PATH`] instead. A miss
//!   falls through to the real loader.

use crate::host::intrinsics::{incompatible, LOAD_CONTEXT_LOAD_FROM_PATH};
use crate::host::{CallContext, Fault, Host, HostError, ModuleHandle, Prefix, Value};
use crate::registry::{logical_name, ModuleRegistry, ModuleSet};
use graft_bytecode::MethodRef;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// `Graft.Redirect::load_from_path(Runtime.LoadContext, string) -> module`
///
/// Same stack shape as [`LOAD_CONTEXT_LOAD_FROM_PATH`], so calls to the real
/// loader can be substituted with it in place.
pub static REDIRECT_LOAD_FROM_PATH: Lazy<MethodRef> = Lazy::new(|| {
    MethodRef::new_static(
        "Graft.Redirect",
        "load_from_path",
        &["Runtime.LoadContext", "string"],
        "module",
    )
});

/// What the file loader entry point does when no loaded module matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissPolicy {
    /// Report not-found to the caller
    #[default]
    Reject,
    /// Let the subsystem's own loader run
    Passthrough,
}

/// Decision of the file loader entry point
#[derive(Debug, Clone)]
pub enum Redirect {
    /// Return this already-loaded module
    Existing(ModuleHandle),
    /// Report not-found; the caller skips the file
    Reject,
    /// Run the original loader
    Passthrough,
}

/// Deduplicating front for both loader entry points
#[derive(Debug, Clone)]
pub struct LoadRedirector {
    reserved_name: String,
    miss: MissPolicy,
}

impl LoadRedirector {
    /// Create a redirector that never loads `reserved_name` through the file loader
    pub fn new(reserved_name: impl Into<String>) -> Self {
        Self {
            reserved_name: reserved_name.into(),
            miss: MissPolicy::default(),
        }
    }

    /// Set the miss policy of the file loader entry point
    pub fn with_miss_policy(mut self, miss: MissPolicy) -> Self {
        self.miss = miss;
        self
    }

    /// Reserved module name
    pub fn reserved_name(&self) -> &str {
        &self.reserved_name
    }

    /// Miss policy of the file loader entry point
    pub fn miss_policy(&self) -> MissPolicy {
        self.miss
    }

    /// Entry point 1: the subsystem's file loader
    pub fn load_file<S: ModuleSet + ?Sized>(&self, set: &S, path: &Path) -> Redirect {
        if logical_name(path) == self.reserved_name {
            log::debug!("Refusing to load reserved module {}", path.display());
            return Redirect::Reject;
        }

        match ModuleRegistry::new(set).lookup(path) {
            Some(module) => {
                log::debug!("Reusing loaded module '{}' for {}", module.name(), path.display());
                Redirect::Existing(module)
            }
            None => match self.miss {
                MissPolicy::Reject => {
                    log::debug!("No loaded module for {}, rejecting", path.display());
                    Redirect::Reject
                }
                MissPolicy::Passthrough => Redirect::Passthrough,
            },
        }
    }

    /// Hook the file loader method and register the low-level redirect
    ///
    /// The loader method must take the path as a `string` parameter.
    pub fn install(&self, host: &Host, load_file: &MethodRef) -> Result<(), HostError> {
        let slot = load_file
            .params
            .iter()
            .position(|p| p == "string")
            .map(|index| index + usize::from(load_file.has_this))
            .ok_or_else(|| incompatible(load_file.clone(), "a loader taking a string path"))?;

        let redirector = self.clone();
        host.install_prefix(
            load_file.clone(),
            Arc::new(move |ctx: &CallContext<'_>, args: &[Value]| {
                let path = match args.get(slot) {
                    Some(Value::Str(path)) => path.clone(),
                    _ => return Ok(Prefix::Continue),
                };
                Ok(match redirector.load_file(ctx.host(), Path::new(&*path)) {
                    Redirect::Existing(module) => Prefix::Skip(Value::Module(module)),
                    Redirect::Reject => Prefix::Skip(Value::Null),
                    Redirect::Passthrough => Prefix::Continue,
                })
            }),
        );

        host.register_intrinsic(
            REDIRECT_LOAD_FROM_PATH.clone(),
            Arc::new(|ctx: &CallContext<'_>, args: Vec<Value>| {
                let path = match args.get(1) {
                    Some(Value::Str(path)) => path.clone(),
                    other => {
                        return Err(Fault::TypeMismatch {
                            method: REDIRECT_LOAD_FROM_PATH.to_string(),
                            expected: "string",
                            actual: other.map_or("null", Value::type_name),
                        })
                    }
                };
                load_from_path(ctx.host(), Path::new(&*path)).map(Value::Module)
            }),
        );

        log::debug!("Load redirection installed on {}", load_file);
        Ok(())
    }
}

/// Entry point 2: the load context's low-level loader
///
/// Returns the loaded module for the path if there is one, otherwise loads it
/// with the real loader.
pub fn load_from_path(host: &Host, path: &Path) -> Result<ModuleHandle, Fault> {
    if let Some(module) = ModuleRegistry::new(host).lookup(path) {
        log::debug!("Reusing loaded module '{}' for {}", module.name(), path.display());
        return Ok(module);
    }

    // Unreachable once everything is preloaded
    log::warn!(
        "No loaded module for {}, falling back to {}",
        path.display(),
        *LOAD_CONTEXT_LOAD_FROM_PATH
    );
    Ok(host.load_from_path(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_bytecode::{Instruction, MethodDef, ModuleImage, Opcode, TypeDef};

    fn strategy() -> MethodRef {
        MethodRef::new_instance("Loader.FileLoadStrategy", "load_file", &["string"], "module")
    }

    /// A loader strategy whose own body always throws
    fn loader_image() -> ModuleImage {
        let mut image = ModuleImage::new("Loader");
        let mut ty = TypeDef::new("Loader.FileLoadStrategy");
        let mut load_file = MethodDef::new_static(
            "load_file",
            &["string"],
            "module",
            vec![
                Instruction::const_str("original loader ran"),
                Instruction::simple(Opcode::Throw),
            ],
        );
        load_file.has_this = true;
        ty.methods.push(load_file);
        image.add_type(ty);
        image
    }

    fn host() -> Host {
        let host = Host::new();
        host.load_image(ModuleImage::new("Core"), "/game/loader/Core.gbc").unwrap();
        host.load_image(ModuleImage::new("Host"), "/game/Host.gbc").unwrap();
        host.load_image(loader_image(), "/game/loader/Loader.gbc").unwrap();
        host
    }

    #[test]
    fn test_reserved_name_always_rejected() {
        let host = host();
        let redirector = LoadRedirector::new("Host").with_miss_policy(MissPolicy::Passthrough);

        // Loaded, but reserved
        for path in ["/game/Host.gbc", "/anywhere/Host.gbc", "Host"] {
            assert!(matches!(redirector.load_file(&host, Path::new(path)), Redirect::Reject));
        }
    }

    #[test]
    fn test_hit_returns_existing_handle() {
        let host = host();
        let redirector = LoadRedirector::new("Host");
        match redirector.load_file(&host, Path::new("/mods/Core.gbc")) {
            Redirect::Existing(module) => assert_eq!(module.name(), "Core"),
            other => panic!("expected existing module, got {:?}", other),
        }
    }

    #[test]
    fn test_miss_policy() {
        let host = host();
        let path = Path::new("/mods/Unknown.gbc");

        let reject = LoadRedirector::new("Host");
        assert_eq!(reject.miss_policy(), MissPolicy::Reject);
        assert!(matches!(reject.load_file(&host, path), Redirect::Reject));

        let pass = LoadRedirector::new("Host").with_miss_policy(MissPolicy::Passthrough);
        assert!(matches!(pass.load_file(&host, path), Redirect::Passthrough));
    }

    #[test]
    fn test_installed_prefix_short_circuits_original() {
        let host = host();
        LoadRedirector::new("Host").install(&host, &strategy()).unwrap();

        let hit = host
            .invoke(&strategy(), vec![Value::Null, Value::str("/x/Core.gbc")])
            .unwrap();
        assert_eq!(hit.as_module().map(|m| m.name().to_string()), Some("Core".to_string()));

        let reserved = host
            .invoke(&strategy(), vec![Value::Null, Value::str("/game/Host.gbc")])
            .unwrap();
        assert!(reserved.is_null());
        assert_eq!(host.load_count(), 3);
    }

    #[test]
    fn test_passthrough_runs_original() {
        let host = host();
        LoadRedirector::new("Host")
            .with_miss_policy(MissPolicy::Passthrough)
            .install(&host, &strategy())
            .unwrap();

        let err = host
            .invoke(&strategy(), vec![Value::Null, Value::str("/x/Unknown.gbc")])
            .unwrap_err();
        assert!(matches!(err, Fault::Thrown(ref m) if m == "original loader ran"));
    }

    #[test]
    fn test_install_requires_path_parameter() {
        let host = host();
        let no_path = MethodRef::new_instance("Loader.FileLoadStrategy", "load_file", &["i32"], "module");
        let err = LoadRedirector::new("Host").install(&host, &no_path).unwrap_err();
        assert!(matches!(err, HostError::IncompatibleSignature { .. }));
    }

    #[test]
    fn test_low_level_entry_point_deduplicates() {
        let host = host();
        LoadRedirector::new("Host").install(&host, &strategy()).unwrap();

        let module = host
            .invoke(
                &REDIRECT_LOAD_FROM_PATH,
                vec![Value::Null, Value::str("/somewhere/else/Core.gbc")],
            )
            .unwrap();
        assert_eq!(module.as_module().unwrap().name(), "Core");
        // Reserved name is only special for the file loader
        let reserved = load_from_path(&host, Path::new("/x/Host.gbc")).unwrap();
        assert_eq!(reserved.name(), "Host");
        assert_eq!(host.load_count(), 3);
    }

    #[test]
    fn test_low_level_miss_falls_back_to_real_loader() {
        let host = host();
        let err = load_from_path(&host, Path::new("/nowhere/Missing.gbc")).unwrap_err();
        assert!(matches!(err, Fault::Load(_)));
    }

    #[test]
    fn test_miss_policy_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            miss: MissPolicy,
        }
        let parsed: Wrapper = toml::from_str("miss = \"passthrough\"").unwrap();
        assert_eq!(parsed.miss, MissPolicy::Passthrough);
    }
}
