//! Module Registry
//!
//! A read-through view over the modules loaded into a process. The registry
//! keeps no state of its own: anything that loads a module (the bootstrap, a
//! loader entry point, another component entirely) makes it visible here.

use crate::host::{Host, ModuleHandle};
use std::path::Path;

/// Live enumeration of loaded modules
pub trait ModuleSet {
    /// Modules loaded right now, in load order
    fn loaded(&self) -> Vec<ModuleHandle>;
}

impl ModuleSet for Host {
    fn loaded(&self) -> Vec<ModuleHandle> {
        self.modules()
    }
}

impl ModuleSet for [ModuleHandle] {
    fn loaded(&self) -> Vec<ModuleHandle> {
        self.to_vec()
    }
}

impl ModuleSet for Vec<ModuleHandle> {
    fn loaded(&self) -> Vec<ModuleHandle> {
        self.clone()
    }
}

/// Logical module name for a path: the file name without directory or extension
pub fn logical_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lookup view over a [`ModuleSet`]
pub struct ModuleRegistry<'a, S: ModuleSet + ?Sized> {
    set: &'a S,
}

impl<'a, S: ModuleSet + ?Sized> ModuleRegistry<'a, S> {
    /// Create a view over a module set
    pub fn new(set: &'a S) -> Self {
        Self { set }
    }

    /// Find a loaded module for a path
    ///
    /// Matches when a module was loaded from exactly this path, or when its
    /// name equals the path's logical name. The first match in load order wins.
    pub fn lookup(&self, path: &Path) -> Option<ModuleHandle> {
        let name = logical_name(path);
        let canonical = path.canonicalize().ok();
        self.set.loaded().into_iter().find(|module| {
            module.origin() == path
                || canonical.as_deref() == Some(module.origin())
                || module.name() == name
        })
    }

    /// Find a loaded module by logical name
    pub fn lookup_name(&self, name: &str) -> Option<ModuleHandle> {
        self.set.loaded().into_iter().find(|module| module.name() == name)
    }

    /// Whether a module with this name is loaded
    pub fn contains_name(&self, name: &str) -> bool {
        self.lookup_name(name).is_some()
    }
}
