//! Module Host
//!
//! The host owns the process-wide set of loaded modules and dispatches
//! method calls into them. A call to a method is resolved in this order:
//!
//! 1. an installed prefix, which may skip the method with its own result
//! 2. a host intrinsic (native implementation)
//! 3. a patched body installed with [`Host::install_body`]
//! 4. the body declared in the first loaded module that defines the method
//!
//! Lock guards are never held across a call, so bodies, prefixes and
//! intrinsics may freely re-enter the host (load modules, install resolvers).

pub mod intrinsics;
mod interpreter;
pub mod value;

pub use value::{Fault, Value};

use crate::resolver::NativeResolver;
use graft_bytecode::{
    verify_body, verify_module, Instruction, MethodDef, MethodRef, ModuleError, ModuleImage,
    TypeDef, VerifyError,
};
use interpreter::Frame;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Unique identifier of a loaded module within one host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A module image that has been loaded into the host
#[derive(Debug)]
pub struct LoadedModule {
    id: ModuleId,
    name: String,
    origin: PathBuf,
    digest: String,
    image: ModuleImage,
}

impl LoadedModule {
    /// Load-order identifier
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Module name from the image metadata
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the module was loaded from
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Hex SHA-256 of the loaded bytes
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The decoded image
    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    /// Declared type by name
    pub fn find_type(&self, name: &str) -> Option<&TypeDef> {
        self.image.find_type(name)
    }

    /// Declared method matching a full signature
    pub fn find_method(&self, method: &MethodRef) -> Option<&MethodDef> {
        self.image
            .find_type(&method.owner)?
            .methods
            .iter()
            .find(|m| m.signature(&method.owner) == *method)
    }
}

/// Shared handle to a loaded module
pub type ModuleHandle = Arc<LoadedModule>;

/// Errors from the real module loader
#[derive(Debug, Error)]
pub enum LoadError {
    /// The module file does not exist
    #[error("Module file not found: {}", path.display())]
    NotFound {
        /// Requested path
        path: PathBuf,
    },

    /// The module file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// Requested path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid module image
    #[error("Invalid module image {}: {source}", path.display())]
    Image {
        /// Requested path
        path: PathBuf,
        /// Decode failure
        #[source]
        source: ModuleError,
    },

    /// The image decoded but failed verification
    #[error("Module {} failed verification: {source}", path.display())]
    Verify {
        /// Requested path
        path: PathBuf,
        /// Verifier failure
        #[source]
        source: VerifyError,
    },
}

/// Errors from host operations other than loading
#[derive(Debug, Error)]
pub enum HostError {
    /// The method already has a patched body
    #[error("Method already patched: {0}")]
    AlreadyPatched(MethodRef),

    /// No loaded module declares the method
    #[error("Method not found: {0}")]
    MethodNotFound(MethodRef),

    /// A replacement body failed verification
    #[error("Patched body for {method} is invalid: {source}")]
    InvalidPatch {
        /// Patched method
        method: MethodRef,
        /// Verifier failure
        #[source]
        source: VerifyError,
    },

    /// The module already has a native resolver
    #[error("Native resolver already set for module '{0}'")]
    ResolverAlreadySet(String),

    /// The module declares no entry point
    #[error("Module '{0}' has no entry point")]
    NoEntryPoint(String),

    /// A located method does not have the required shape
    #[error("Method {method} is not compatible with {expected}")]
    IncompatibleSignature {
        /// Located method
        method: MethodRef,
        /// Required shape
        expected: String,
    },
}

/// Result of running a prefix
#[derive(Debug, Clone)]
pub enum Prefix {
    /// Run the method normally
    Continue,
    /// Skip the method and return this value instead
    Skip(Value),
}

/// Native implementation of a method
pub type Intrinsic =
    Arc<dyn Fn(&CallContext<'_>, Vec<Value>) -> Result<Value, Fault> + Send + Sync>;

/// Hook run before a method
pub type PrefixFn =
    Arc<dyn Fn(&CallContext<'_>, &[Value]) -> Result<Prefix, Fault> + Send + Sync>;

/// The host as seen from inside a running call
///
/// Nested calls made through the context count against the host's call depth.
pub struct CallContext<'a> {
    host: &'a Host,
    depth: usize,
}

impl<'a> CallContext<'a> {
    /// The host executing the call
    pub fn host(&self) -> &'a Host {
        self.host
    }

    /// Call another method one level deeper
    pub fn invoke(&self, method: &MethodRef, args: Vec<Value>) -> Result<Value, Fault> {
        self.host.call_at_depth(method, args, self.depth + 1)
    }
}

/// Host configuration
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Maximum nesting of method calls
    pub max_call_depth: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self { max_call_depth: 256 }
    }
}

/// A patched method body together with its frame size
struct PatchedBody {
    frame_size: usize,
    body: Vec<Instruction>,
}

/// The module host
pub struct Host {
    options: HostOptions,
    modules: RwLock<Vec<ModuleHandle>>,
    intrinsics: RwLock<FxHashMap<MethodRef, Intrinsic>>,
    prefixes: RwLock<FxHashMap<MethodRef, PrefixFn>>,
    patched: RwLock<FxHashMap<MethodRef, Arc<PatchedBody>>>,
    resolvers: RwLock<FxHashMap<ModuleId, Arc<dyn NativeResolver>>>,
    default_resolver: RwLock<Option<Arc<dyn NativeResolver>>>,
    next_id: AtomicU64,
    load_count: AtomicUsize,
    bootstrapped: AtomicBool,
}

impl Host {
    /// Create a host with default options and the built-in intrinsics
    pub fn new() -> Self {
        Self::with_options(HostOptions::default())
    }

    /// Create a host with custom options
    pub fn with_options(options: HostOptions) -> Self {
        let host = Self {
            options,
            modules: RwLock::new(Vec::new()),
            intrinsics: RwLock::new(FxHashMap::default()),
            prefixes: RwLock::new(FxHashMap::default()),
            patched: RwLock::new(FxHashMap::default()),
            resolvers: RwLock::new(FxHashMap::default()),
            default_resolver: RwLock::new(None),
            next_id: AtomicU64::new(1),
            load_count: AtomicUsize::new(0),
            bootstrapped: AtomicBool::new(false),
        };
        intrinsics::register_builtins(&host);
        host
    }

    // ===== Loading =====

    /// Load a module file
    ///
    /// This is the real loader: every call reads, decodes and appends a new
    /// module, even when a module with the same name is already loaded.
    pub fn load_from_path(&self, path: impl AsRef<Path>) -> Result<ModuleHandle, LoadError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(LoadError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let image = ModuleImage::decode(&bytes).map_err(|source| LoadError::Image {
            path: path.to_path_buf(),
            source,
        })?;

        let origin = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.insert(image, origin, &bytes)
    }

    /// Load an in-memory image under the given origin path
    pub fn load_image(
        &self,
        image: ModuleImage,
        origin: impl Into<PathBuf>,
    ) -> Result<ModuleHandle, LoadError> {
        let origin = origin.into();
        let bytes = image.encode().map_err(|source| LoadError::Image {
            path: origin.clone(),
            source,
        })?;
        self.insert(image, origin, &bytes)
    }

    fn insert(
        &self,
        image: ModuleImage,
        origin: PathBuf,
        bytes: &[u8],
    ) -> Result<ModuleHandle, LoadError> {
        verify_module(&image).map_err(|source| LoadError::Verify {
            path: origin.clone(),
            source,
        })?;

        let module = Arc::new(LoadedModule {
            id: ModuleId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            name: image.name().to_string(),
            origin,
            digest: hex::encode(Sha256::digest(bytes)),
            image,
        });

        self.modules.write().push(module.clone());
        self.load_count.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Loaded module '{}' from {} ({})",
            module.name,
            module.origin.display(),
            &module.digest[..12]
        );
        Ok(module)
    }

    /// Snapshot of the loaded modules, in load order
    pub fn modules(&self) -> Vec<ModuleHandle> {
        self.modules.read().clone()
    }

    /// Number of real loads performed so far
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::Relaxed)
    }

    // ===== Lookup =====

    /// First loaded module declaring a type with this name
    pub fn find_type(&self, name: &str) -> Option<ModuleHandle> {
        self.modules
            .read()
            .iter()
            .find(|m| m.find_type(name).is_some())
            .cloned()
    }

    /// Signature of the first method named `name` on type `owner`
    pub fn find_method(&self, owner: &str, name: &str) -> Option<MethodRef> {
        let module = self.find_type(owner)?;
        let ty = module.find_type(owner)?;
        ty.method(name).map(|m| ty.signature(m))
    }

    /// All signatures declared on type `owner`
    pub fn declared_methods(&self, owner: &str) -> Vec<MethodRef> {
        match self.find_type(owner) {
            Some(module) => module
                .find_type(owner)
                .map(|ty| ty.methods.iter().map(|m| ty.signature(m)).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Module declaring a method with exactly this signature
    pub fn method(&self, method: &MethodRef) -> Option<ModuleHandle> {
        self.modules
            .read()
            .iter()
            .find(|m| m.find_method(method).is_some())
            .cloned()
    }

    // ===== Patching =====

    /// Register a native implementation for a method signature
    pub fn register_intrinsic(&self, method: MethodRef, intrinsic: Intrinsic) {
        self.intrinsics.write().insert(method, intrinsic);
    }

    /// Whether a native implementation exists for this signature
    pub fn has_intrinsic(&self, method: &MethodRef) -> bool {
        self.intrinsics.read().contains_key(method)
    }

    /// Replace the body of a declared method
    ///
    /// The body is verified against the declared method's frame. A method can
    /// be patched once.
    pub fn install_body(&self, method: &MethodRef, body: Vec<Instruction>) -> Result<(), HostError> {
        let module = self
            .method(method)
            .ok_or_else(|| HostError::MethodNotFound(method.clone()))?;
        let frame_size = module
            .find_method(method)
            .map(MethodDef::frame_size)
            .ok_or_else(|| HostError::MethodNotFound(method.clone()))?;

        verify_body(&method.to_string(), frame_size, &body).map_err(|source| {
            HostError::InvalidPatch {
                method: method.clone(),
                source,
            }
        })?;

        let mut patched = self.patched.write();
        if patched.contains_key(method) {
            return Err(HostError::AlreadyPatched(method.clone()));
        }
        patched.insert(method.clone(), Arc::new(PatchedBody { frame_size, body }));
        log::debug!("Installed patched body for {}", method);
        Ok(())
    }

    /// Whether a patched body is installed for this signature
    pub fn is_patched(&self, method: &MethodRef) -> bool {
        self.patched.read().contains_key(method)
    }

    /// Install a hook that runs before the method
    pub fn install_prefix(&self, method: MethodRef, prefix: PrefixFn) {
        log::debug!("Installed prefix for {}", method);
        self.prefixes.write().insert(method, prefix);
    }

    // ===== Execution =====

    /// Invoke a method with the given arguments
    pub fn invoke(&self, method: &MethodRef, args: Vec<Value>) -> Result<Value, Fault> {
        self.call_at_depth(method, args, 0)
    }

    /// Invoke a module's entry point with no arguments
    pub fn invoke_entry_point(&self, module: &LoadedModule) -> Result<Value, Fault> {
        let (ty, method) = module
            .image()
            .entry_point()
            .ok_or_else(|| HostError::NoEntryPoint(module.name().to_string()))?;
        let signature = ty.signature(method);
        log::debug!("Invoking entry point {}", signature);
        self.invoke(&signature, Vec::new())
    }

    pub(crate) fn call_at_depth(
        &self,
        method: &MethodRef,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, Fault> {
        if depth >= self.options.max_call_depth {
            return Err(Fault::CallDepthExceeded(self.options.max_call_depth));
        }
        let ctx = CallContext { host: self, depth };

        let prefix = self.prefixes.read().get(method).cloned();
        if let Some(prefix) = prefix {
            if let Prefix::Skip(result) = prefix(&ctx, &args)? {
                return Ok(result);
            }
        }

        let intrinsic = self.intrinsics.read().get(method).cloned();
        if let Some(intrinsic) = intrinsic {
            return intrinsic(&ctx, args);
        }

        let name = method.to_string();
        let patched = self.patched.read().get(method).cloned();
        if let Some(patched) = patched {
            return Frame::new(self, &name, patched.frame_size, &patched.body, args, depth).run();
        }

        let module = self
            .method(method)
            .ok_or_else(|| Fault::MissingMethod(method.clone()))?;
        let declared = module
            .find_method(method)
            .ok_or_else(|| Fault::MissingMethod(method.clone()))?;
        Frame::new(self, &name, declared.frame_size(), &declared.body, args, depth).run()
    }

    // ===== Native resolution =====

    /// Set the native library resolver for one module
    pub fn set_native_resolver(
        &self,
        module: &LoadedModule,
        resolver: Arc<dyn NativeResolver>,
    ) -> Result<(), HostError> {
        let mut resolvers = self.resolvers.write();
        if resolvers.contains_key(&module.id()) {
            return Err(HostError::ResolverAlreadySet(module.name().to_string()));
        }
        resolvers.insert(module.id(), resolver);
        Ok(())
    }

    /// Whether a module has its own native resolver
    pub fn has_native_resolver(&self, module: &LoadedModule) -> bool {
        self.resolvers.read().contains_key(&module.id())
    }

    /// Set the resolver used for modules without their own
    pub fn set_default_resolver(&self, resolver: Arc<dyn NativeResolver>) {
        *self.default_resolver.write() = Some(resolver);
    }

    /// Resolve a native library requested by a module
    ///
    /// Returns `None` when no resolver applies, in which case the caller falls
    /// back to default resolution.
    pub fn resolve_native(
        &self,
        module: &ModuleHandle,
        library: &str,
    ) -> Result<Option<String>, Fault> {
        let resolver = self
            .resolvers
            .read()
            .get(&module.id())
            .cloned()
            .or_else(|| self.default_resolver.read().clone());
        match resolver {
            Some(resolver) => resolver.resolve(self, library, module),
            None => Ok(None),
        }
    }

    // ===== Lifecycle =====

    /// Mark the host as bootstrapped; returns false if it already was
    pub(crate) fn mark_bootstrapped(&self) -> bool {
        !self.bootstrapped.swap(true, Ordering::SeqCst)
    }

    /// Whether a bootstrap has run on this host
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("modules", &self.modules.read().len())
            .field("load_count", &self.load_count())
            .field("bootstrapped", &self.is_bootstrapped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_bytecode::{Opcode, ABORT_SIGNAL};
    use std::sync::atomic::AtomicUsize;

    fn greeter() -> ModuleImage {
        let mut image = ModuleImage::new("Greeter");
        let mut ty = TypeDef::new("Greeter.Api");
        ty.methods.push(MethodDef::new_static(
            "greet",
            &["string"],
            "string",
            vec![
                Instruction::const_str("hello "),
                Instruction::local(Opcode::LoadLocal, 0),
                Instruction::simple(Opcode::Sconcat),
                Instruction::simple(Opcode::Return),
            ],
        ));
        ty.methods.push(MethodDef::new_static(
            "recurse",
            &[],
            "void",
            vec![
                Instruction::call(MethodRef::new_static("Greeter.Api", "recurse", &[], "void")),
                Instruction::simple(Opcode::ReturnVoid),
            ],
        ));
        image.add_type(ty);
        image
    }

    fn greet() -> MethodRef {
        MethodRef::new_static("Greeter.Api", "greet", &["string"], "string")
    }

    #[test]
    fn test_load_image_and_invoke() {
        let host = Host::new();
        let module = host.load_image(greeter(), "/mods/Greeter.gbc").unwrap();
        assert_eq!(module.name(), "Greeter");
        assert_eq!(module.digest().len(), 64);
        assert_eq!(host.load_count(), 1);

        let result = host.invoke(&greet(), vec![Value::str("world")]).unwrap();
        assert_eq!(result, Value::str("hello world"));
    }

    #[test]
    fn test_real_loader_never_deduplicates() {
        let host = Host::new();
        let a = host.load_image(greeter(), "/mods/Greeter.gbc").unwrap();
        let b = host.load_image(greeter(), "/mods/Greeter.gbc").unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(host.modules().len(), 2);
        assert_eq!(host.load_count(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let host = Host::new();
        let err = host.load_from_path("/definitely/not/here.gbc").unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }));
        assert_eq!(host.load_count(), 0);
    }

    #[test]
    fn test_install_body_once() {
        let host = Host::new();
        host.load_image(greeter(), "/mods/Greeter.gbc").unwrap();

        let body = vec![Instruction::const_str("patched"), Instruction::simple(Opcode::Return)];
        host.install_body(&greet(), body.clone()).unwrap();
        assert!(host.is_patched(&greet()));
        assert_eq!(
            host.invoke(&greet(), vec![Value::str("x")]).unwrap(),
            Value::str("patched")
        );

        let err = host.install_body(&greet(), body).unwrap_err();
        assert!(matches!(err, HostError::AlreadyPatched(_)));
    }

    #[test]
    fn test_install_body_is_verified() {
        let host = Host::new();
        host.load_image(greeter(), "/mods/Greeter.gbc").unwrap();

        let body = vec![Instruction::local(Opcode::LoadLocal, 5), Instruction::simple(Opcode::Return)];
        let err = host.install_body(&greet(), body).unwrap_err();
        assert!(matches!(err, HostError::InvalidPatch { .. }));
        assert!(!host.is_patched(&greet()));

        let missing = MethodRef::new_static("Greeter.Api", "nope", &[], "void");
        let err = host
            .install_body(&missing, vec![Instruction::simple(Opcode::ReturnVoid)])
            .unwrap_err();
        assert!(matches!(err, HostError::MethodNotFound(_)));
    }

    #[test]
    fn test_prefix_runs_before_body() {
        let host = Host::new();
        host.load_image(greeter(), "/mods/Greeter.gbc").unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        host.install_prefix(
            greet(),
            Arc::new(move |_: &CallContext<'_>, args: &[Value]| {
                counter.fetch_add(1, Ordering::SeqCst);
                if args[0].as_str() == Some("skip") {
                    Ok(Prefix::Skip(Value::str("skipped")))
                } else {
                    Ok(Prefix::Continue)
                }
            }),
        );

        assert_eq!(host.invoke(&greet(), vec![Value::str("skip")]).unwrap(), Value::str("skipped"));
        assert_eq!(host.invoke(&greet(), vec![Value::str("you")]).unwrap(), Value::str("hello you"));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_intrinsic_takes_precedence_over_body() {
        let host = Host::new();
        host.load_image(greeter(), "/mods/Greeter.gbc").unwrap();
        host.register_intrinsic(greet(), Arc::new(|_: &CallContext<'_>, _: Vec<Value>| {
            Err(Fault::Trap(ABORT_SIGNAL))
        }));

        let err = host.invoke(&greet(), vec![Value::str("x")]).unwrap_err();
        assert!(err.is_abort_signal());
    }

    #[test]
    fn test_call_depth_is_bounded() {
        let host = Host::with_options(HostOptions { max_call_depth: 16 });
        host.load_image(greeter(), "/mods/Greeter.gbc").unwrap();

        let recurse = MethodRef::new_static("Greeter.Api", "recurse", &[], "void");
        let err = host.invoke(&recurse, Vec::new()).unwrap_err();
        assert!(matches!(err, Fault::CallDepthExceeded(16)));
    }

    #[test]
    fn test_entry_point_required() {
        let host = Host::new();
        let module = host.load_image(greeter(), "/mods/Greeter.gbc").unwrap();
        let err = host.invoke_entry_point(&module).unwrap_err();
        assert!(matches!(err, Fault::Host(HostError::NoEntryPoint(_))));
    }

    #[test]
    fn test_lookup_helpers() {
        let host = Host::new();
        host.load_image(greeter(), "/mods/Greeter.gbc").unwrap();

        assert!(host.find_type("Greeter.Api").is_some());
        assert!(host.find_type("Other").is_none());
        assert_eq!(host.find_method("Greeter.Api", "greet"), Some(greet()));
        assert_eq!(host.declared_methods("Greeter.Api").len(), 2);
        assert!(host.method(&greet()).is_some());
    }

    #[test]
    fn test_bootstrap_flag() {
        let host = Host::new();
        assert!(!host.is_bootstrapped());
        assert!(host.mark_bootstrapped());
        assert!(!host.mark_bootstrapped());
        assert!(host.is_bootstrapped());
    }
}
