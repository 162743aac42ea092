//! Built-in runtime methods
//!
//! Well-known signatures that module code calls into and that the host
//! implements natively: the real module loader, reflective method lookup and
//! reflective invocation.

use super::{CallContext, Fault, Host, HostError, Value};
use graft_bytecode::MethodRef;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// `Runtime.LoadContext::load_from_path(string) -> module`, the real loader
pub static LOAD_CONTEXT_LOAD_FROM_PATH: Lazy<MethodRef> = Lazy::new(|| {
    MethodRef::new_instance("Runtime.LoadContext", "load_from_path", &["string"], "module")
});

/// `Runtime.MethodBase::find(string) -> Runtime.MethodBase`
///
/// Takes `"Type::method"` and yields the first method with that name, or null.
pub static METHOD_BASE_FIND: Lazy<MethodRef> = Lazy::new(|| {
    MethodRef::new_static("Runtime.MethodBase", "find", &["string"], "Runtime.MethodBase")
});

/// `Runtime.MethodBase::invoke(object, object[]) -> object`
pub static METHOD_BASE_INVOKE: Lazy<MethodRef> = Lazy::new(|| {
    MethodRef::new_instance("Runtime.MethodBase", "invoke", &["object", "object[]"], "object")
});

/// `Runtime.Module::name() -> string`
pub static RUNTIME_MODULE_NAME: Lazy<MethodRef> =
    Lazy::new(|| MethodRef::new_instance("Runtime.Module", "name", &[], "string"));

pub(super) fn register_builtins(host: &Host) {
    host.register_intrinsic(LOAD_CONTEXT_LOAD_FROM_PATH.clone(), Arc::new(load_from_path));
    host.register_intrinsic(METHOD_BASE_FIND.clone(), Arc::new(method_find));
    host.register_intrinsic(METHOD_BASE_INVOKE.clone(), Arc::new(method_invoke));
    host.register_intrinsic(RUNTIME_MODULE_NAME.clone(), Arc::new(module_name));
}

fn expect_str<'v>(method: &MethodRef, value: &'v Value) -> Result<&'v str, Fault> {
    value.as_str().ok_or_else(|| Fault::TypeMismatch {
        method: method.to_string(),
        expected: "string",
        actual: value.type_name(),
    })
}

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Null)
}

fn load_from_path(ctx: &CallContext<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    // args[0] is the load context receiver
    let path = expect_str(&LOAD_CONTEXT_LOAD_FROM_PATH, arg(&args, 1))?;
    let module = ctx.host().load_from_path(path)?;
    Ok(Value::Module(module))
}

fn method_find(ctx: &CallContext<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    let qualified = expect_str(&METHOD_BASE_FIND, arg(&args, 0))?;
    let found = qualified
        .rsplit_once("::")
        .and_then(|(owner, name)| ctx.host().find_method(owner, name));
    Ok(found.map(Value::Method).unwrap_or(Value::Null))
}

/// Reflective call: `method.invoke(target, args)`
///
/// A null argument list means no arguments; anything else is passed as the
/// single argument. Missing arguments are filled with null.
fn method_invoke(ctx: &CallContext<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    let callee = match arg(&args, 0) {
        Value::Method(method) => method.clone(),
        other => {
            return Err(Fault::TypeMismatch {
                method: METHOD_BASE_INVOKE.to_string(),
                expected: "Runtime.MethodBase",
                actual: other.type_name(),
            })
        }
    };

    let mut call_args = Vec::with_capacity(callee.arg_count());
    if callee.has_this {
        call_args.push(arg(&args, 1).clone());
    }
    let forwarded = arg(&args, 2);
    if !forwarded.is_null() {
        call_args.push(forwarded.clone());
    }
    if call_args.len() < callee.arg_count() {
        call_args.resize(callee.arg_count(), Value::Null);
    }

    ctx.invoke(&callee, call_args)
}

fn module_name(_ctx: &CallContext<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    match arg(&args, 0) {
        Value::Module(module) => Ok(Value::str(module.name())),
        Value::Null => Err(Fault::Thrown("null module reference".to_string())),
        other => Err(Fault::TypeMismatch {
            method: RUNTIME_MODULE_NAME.to_string(),
            expected: "module",
            actual: other.type_name(),
        }),
    }
}

/// Error raised when reflection finds a method with the wrong shape
pub(crate) fn incompatible(method: MethodRef, expected: &str) -> HostError {
    HostError::IncompatibleSignature {
        method,
        expected: expected.to_string(),
    }
}
