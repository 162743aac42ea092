//! End-to-end bootstrap scenarios against on-disk module directories

use graft_bytecode::{EntryPoint, Instruction, MethodDef, MethodRef, ModuleImage, Opcode, TypeDef};
use graft_core::host::intrinsics::{
    LOAD_CONTEXT_LOAD_FROM_PATH, METHOD_BASE_FIND, METHOD_BASE_INVOKE, RUNTIME_MODULE_NAME,
};
use graft_core::{
    Bootstrap, BootstrapConfig, BootstrapError, Fault, Host, ModuleHandle, Outcome, ResolverError,
    ResolverScope, Value,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn load_file() -> MethodRef {
    MethodRef::new_instance("Loader.FileLoadStrategy", "load_file", &["string"], "module")
}

fn main_task() -> MethodRef {
    MethodRef::new_static("Wrapper.Program", "Main", &[], "task")
}

/// Startup routine of the wrapper: loads two modules through the two loader
/// entry points, asks for the reserved module, then starts the game by
/// reflection.
fn startup_body(root: &Path) -> Vec<Instruction> {
    let loader_dir = root.join("Loader");
    vec![
        // 0: load_context.load_from_path("Loader/Core.gbc")
        Instruction::simple(Opcode::ConstNull),
        Instruction::const_str(loader_dir.join("Core.gbc").to_string_lossy()),
        Instruction::call_method(LOAD_CONTEXT_LOAD_FROM_PATH.clone()),
        Instruction::simple(Opcode::Pop),
        // 4: strategy.load_file("Loader/Extras.gbc")
        Instruction::simple(Opcode::ConstNull),
        Instruction::const_str(loader_dir.join("Extras.gbc").to_string_lossy()),
        Instruction::call_method(load_file()),
        Instruction::simple(Opcode::Pop),
        // 8: strategy.load_file("Host.gbc") must come back null
        Instruction::simple(Opcode::ConstNull),
        Instruction::const_str(root.join("Host.gbc").to_string_lossy()),
        Instruction::call_method(load_file()),
        Instruction::jump(Opcode::JmpIfNull, 14),
        Instruction::const_str("reserved module was loaded"),
        Instruction::simple(Opcode::Throw),
        // 14: MethodBase.find("Game.Entry::start").invoke(null, null)
        Instruction::const_str("Game.Entry::start"),
        Instruction::call(METHOD_BASE_FIND.clone()),
        Instruction::simple(Opcode::ConstNull),
        Instruction::simple(Opcode::ConstNull),
        Instruction::call_method(METHOD_BASE_INVOKE.clone()),
        Instruction::simple(Opcode::Pop),
        // 20: never reached once patched
        Instruction::const_str("game kept running"),
        Instruction::simple(Opcode::Throw),
    ]
}

fn wrapper_image(root: &Path, with_resolver: bool) -> ModuleImage {
    let mut image = ModuleImage::new("LoaderWrapper");
    let mut ty = TypeDef::new("Wrapper.Program");
    ty.methods.push(MethodDef::new_static("Main", &[], "task", startup_body(root)));
    ty.methods.push(MethodDef::new_static(
        "main",
        &["string[]"],
        "void",
        vec![
            Instruction::call(main_task()),
            Instruction::simple(Opcode::Pop),
            Instruction::simple(Opcode::ReturnVoid),
        ],
    ));
    if with_resolver {
        ty.methods.push(MethodDef::new_static(
            "resolve_native_library",
            &["string", "module"],
            "string",
            vec![
                Instruction::const_str("natives/"),
                Instruction::local(Opcode::LoadLocal, 1),
                Instruction::call_method(RUNTIME_MODULE_NAME.clone()),
                Instruction::simple(Opcode::Sconcat),
                Instruction::const_str("/"),
                Instruction::simple(Opcode::Sconcat),
                Instruction::local(Opcode::LoadLocal, 0),
                Instruction::simple(Opcode::Sconcat),
                Instruction::simple(Opcode::Return),
            ],
        ));
    }
    let type_index = image.add_type(ty);
    image.entry_point = Some(EntryPoint {
        type_index,
        method_index: 1,
    });
    image
}

fn core_image(start_body: Vec<Instruction>) -> ModuleImage {
    let mut image = ModuleImage::new("Core");
    let mut ty = TypeDef::new("Game.Entry");
    ty.methods.push(MethodDef::new_static("start", &[], "object", start_body));
    image.add_type(ty);
    image
}

/// The subsystem's own file loader, which would load a second copy
fn loader_image() -> ModuleImage {
    let mut image = ModuleImage::new("Loader");
    let mut ty = TypeDef::new("Loader.FileLoadStrategy");
    let mut method = MethodDef::new_static(
        "load_file",
        &["string"],
        "module",
        vec![
            Instruction::simple(Opcode::ConstNull),
            Instruction::local(Opcode::LoadLocal, 1),
            Instruction::call_method(LOAD_CONTEXT_LOAD_FROM_PATH.clone()),
            Instruction::simple(Opcode::Return),
        ],
    );
    method.has_this = true;
    ty.methods.push(method);
    image.add_type(ty);
    image
}

fn write(path: &Path, image: &ModuleImage) {
    std::fs::write(path, image.encode().unwrap()).unwrap();
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self::with_start(vec![Instruction::const_str("started"), Instruction::simple(Opcode::Return)])
    }

    fn with_start(start_body: Vec<Instruction>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("Loader")).unwrap();

        write(&root.join("LoaderWrapper.gbc"), &wrapper_image(root, true));
        write(&root.join("Loader").join("Core.gbc"), &core_image(start_body));
        write(&root.join("Loader").join("Extras.gbc"), &ModuleImage::new("Extras"));
        write(&root.join("Loader").join("Loader.gbc"), &loader_image());
        write(&root.join("Host.gbc"), &ModuleImage::new("Host"));
        std::fs::write(root.join("Loader").join("README.txt"), "not a module").unwrap();

        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self) -> BootstrapConfig {
        BootstrapConfig::default().rooted_at(self.root())
    }

    fn module_path(&self, name: &str) -> PathBuf {
        self.root().join("Loader").join(format!("{}.gbc", name))
    }
}

fn module(host: &Host, name: &str) -> ModuleHandle {
    host.modules()
        .into_iter()
        .find(|m| m.name() == name)
        .unwrap_or_else(|| panic!("module {} not loaded", name))
}

#[test]
fn test_bootstrap_completes_without_duplicate_loads() {
    let fixture = Fixture::new();
    let host = Host::new();

    let report = match Bootstrap::new(&host, fixture.config()).run().unwrap() {
        Outcome::Completed(report) => report,
        other => panic!("expected completion, got {:?}", other),
    };

    assert_eq!(report.wrapper, "LoaderWrapper");
    assert_eq!(report.preloaded, vec!["Core", "Extras", "Loader"]);
    assert!(report.already_loaded.is_empty());
    assert_eq!(report.abort_sites, 1);
    assert_eq!(report.redirected_loads, 1);
    assert!(report.aborted);

    // Wrapper + 3 candidates, and the startup routine's own loads reused them
    assert_eq!(report.modules, 4);
    assert_eq!(report.loads, 4);
    assert_eq!(host.modules().len(), 4);
    assert_eq!(host.load_count(), 4);
    assert!(host.is_bootstrapped());
    assert!(host.is_patched(&main_task()));
}

#[test]
fn test_reload_through_either_entry_point_returns_existing_module() {
    let fixture = Fixture::new();
    let host = Host::new();
    Bootstrap::new(&host, fixture.config()).run().unwrap();

    let core = module(&host, "Core");
    for name in ["Core", "Extras", "Loader"] {
        let path = Value::str(&fixture.module_path(name).to_string_lossy());

        let via_strategy = host.invoke(&load_file(), vec![Value::Null, path.clone()]).unwrap();
        assert_eq!(via_strategy, Value::Module(module(&host, name)));

        let via_context = host
            .invoke(&graft_core::REDIRECT_LOAD_FROM_PATH, vec![Value::Null, path])
            .unwrap();
        assert_eq!(via_context, Value::Module(module(&host, name)));
    }

    // By logical name from an unrelated directory
    let elsewhere = Value::str("/some/other/place/Core.gbc");
    let result = host.invoke(&load_file(), vec![Value::Null, elsewhere]).unwrap();
    assert_eq!(result, Value::Module(core));

    assert_eq!(host.load_count(), 4);
}

#[test]
fn test_reserved_module_never_loaded() {
    let fixture = Fixture::new();
    let host = Host::new();
    Bootstrap::new(&host, fixture.config()).run().unwrap();

    for path in [fixture.root().join("Host.gbc"), PathBuf::from("Host.gbc"), PathBuf::from("/x/y/Host")] {
        let result = host
            .invoke(&load_file(), vec![Value::Null, Value::str(&path.to_string_lossy())])
            .unwrap();
        assert!(result.is_null());
    }
    assert!(host.modules().iter().all(|m| m.name() != "Host"));
}

#[test]
fn test_forwarded_resolver_matches_resolver_method() {
    let fixture = Fixture::new();
    let host = Host::new();
    let report = match Bootstrap::new(&host, fixture.config()).run().unwrap() {
        Outcome::Completed(report) => report,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(report.resolver.installed.len(), 4);
    assert!(report.resolver.skipped.is_empty());

    let resolver = MethodRef::new_static(
        "Wrapper.Program",
        "resolve_native_library",
        &["string", "module"],
        "string",
    );
    for name in ["Core", "Extras", "Loader", "LoaderWrapper"] {
        let handle = module(&host, name);
        let direct = host
            .invoke(&resolver, vec![Value::str("libaudio.so"), Value::Module(handle.clone())])
            .unwrap();
        let resolved = host.resolve_native(&handle, "libaudio.so").unwrap();
        assert_eq!(resolved.as_deref(), direct.as_str());
        assert_eq!(resolved, Some(format!("natives/{}/libaudio.so", name)));
    }
}

#[test]
fn test_excluded_modules_keep_default_resolution() {
    let fixture = Fixture::new();
    write(&fixture.module_path("SoundFlow"), &ModuleImage::new("SoundFlow"));

    let host = Host::new();
    let report = match Bootstrap::new(&host, fixture.config()).run().unwrap() {
        Outcome::Completed(report) => report,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(report.resolver.skipped, vec!["SoundFlow"]);

    let sound = module(&host, "SoundFlow");
    assert!(!host.has_native_resolver(&sound));
    assert_eq!(host.resolve_native(&sound, "libsoundflow.so").unwrap(), None);
}

#[test]
fn test_resolver_scope_for_late_modules() {
    for (scope, expected) in [
        (ResolverScope::Global, Some("natives/Late/libz.so".to_string())),
        (ResolverScope::Loaded, None),
    ] {
        let fixture = Fixture::new();
        let host = Host::new();
        let config = BootstrapConfig {
            resolver_scope: scope,
            ..fixture.config()
        };
        Bootstrap::new(&host, config).run().unwrap();

        let late = host.load_image(ModuleImage::new("Late"), "/late/Late.gbc").unwrap();
        assert_eq!(host.resolve_native(&late, "libz.so").unwrap(), expected);
    }
}

#[test]
fn test_already_loaded_modules_are_not_preloaded_again() {
    let fixture = Fixture::new();
    let host = Host::new();
    let elsewhere = tempfile::tempdir().unwrap();
    let early_path = elsewhere.path().join("Core.gbc");
    write(&early_path, &core_image(vec![Instruction::const_str("early"), Instruction::simple(Opcode::Return)]));
    let early = host.load_from_path(&early_path).unwrap();

    let report = match Bootstrap::new(&host, fixture.config()).run().unwrap() {
        Outcome::Completed(report) => report,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(report.already_loaded, vec!["Core"]);
    assert_eq!(report.preloaded, vec!["Extras", "Loader"]);
    assert_eq!(report.modules, 4);

    // The startup routine's load of Loader/Core.gbc got the early copy
    assert_eq!(module(&host, "Core").id(), early.id());
}

#[test]
fn test_resolver_comes_from_wrapper_entry_type() {
    let fixture = Fixture::new();
    let host = Host::new();
    let mut shim = ModuleImage::new("Shim");
    let mut ty = TypeDef::new("Wrapper.Program");
    ty.methods.push(MethodDef::new_static(
        "helper",
        &[],
        "void",
        vec![Instruction::simple(Opcode::ReturnVoid)],
    ));
    shim.add_type(ty);
    host.load_image(shim, "/elsewhere/Shim.gbc").unwrap();

    let report = match Bootstrap::new(&host, fixture.config()).run().unwrap() {
        Outcome::Completed(report) => report,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(
        report.resolver.method,
        "string Wrapper.Program::resolve_native_library(string, module)"
    );
    assert_eq!(report.resolver.installed.len(), 5);

    let shim = module(&host, "Shim");
    assert_eq!(
        host.resolve_native(&shim, "libaudio.so").unwrap(),
        Some("natives/Shim/libaudio.so".to_string())
    );
}

#[test]
fn test_missing_file_stops_before_patching() {
    let fixture = Fixture::new();
    let host = Host::new();
    let missing = fixture.module_path("Missing");
    let candidates = vec![fixture.module_path("Core"), missing.clone(), fixture.module_path("Extras")];

    let outcome = Bootstrap::new(&host, fixture.config())
        .with_source(candidates)
        .run()
        .unwrap();
    match outcome {
        Outcome::MissingDependency { path } => assert_eq!(path, missing),
        other => panic!("expected missing dependency, got {:?}", other),
    }

    // Wrapper and Core only; no patches, no redirect, no invocation
    assert_eq!(host.load_count(), 2);
    assert!(!host.is_patched(&main_task()));
    assert!(!host.has_intrinsic(&graft_core::REDIRECT_LOAD_FROM_PATH));
    let core = module(&host, "Core");
    assert!(!host.has_native_resolver(&core));
}

#[test]
fn test_failure_in_started_code_propagates_unchanged() {
    let fixture = Fixture::with_start(vec![
        Instruction::const_str("game crashed"),
        Instruction::simple(Opcode::Throw),
    ]);
    let host = Host::new();

    let err = Bootstrap::new(&host, fixture.config()).run().unwrap_err();
    match err {
        BootstrapError::Invocation(Fault::Thrown(message)) => assert_eq!(message, "game crashed"),
        other => panic!("expected invocation failure, got {:?}", other),
    }
    let core = module(&host, "Core");
    assert!(!host.has_native_resolver(&core));
}

#[test]
fn test_missing_resolver_method_is_fatal() {
    let fixture = Fixture::new();
    write(&fixture.root().join("LoaderWrapper.gbc"), &wrapper_image(fixture.root(), false));
    let host = Host::new();

    let err = Bootstrap::new(&host, fixture.config()).run().unwrap_err();
    assert!(matches!(
        err,
        BootstrapError::Resolver(ResolverError::MethodNotFound { .. })
    ));
    // Fails after the loader code ran, not before
    assert!(host.is_patched(&main_task()));
    assert!(host.modules().iter().any(|m| m.name() == "Core"));
}

#[test]
fn test_missing_load_strategy_is_a_patch_failure() {
    let fixture = Fixture::new();
    std::fs::remove_file(fixture.module_path("Loader")).unwrap();
    let host = Host::new();

    let err = Bootstrap::new(&host, fixture.config()).run().unwrap_err();
    assert!(matches!(err, BootstrapError::Patch(_)));
}

#[test]
fn test_outcome_serializes_for_reporting() {
    let fixture = Fixture::new();
    let host = Host::new();
    let outcome = Bootstrap::new(&host, fixture.config()).run().unwrap();

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["outcome"], "completed");
    assert_eq!(json["modules"], 4);
    assert_eq!(json["aborted"], true);
}
