//! `graft disasm`: print a module image's types and method bodies.

use anyhow::Context;
use graft_bytecode::{verify_module, ModuleImage};
use std::fmt::Write as _;
use std::path::Path;

pub fn execute(file: &Path, method: Option<&str>) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let image = ModuleImage::decode(&bytes)
        .with_context(|| format!("{} is not a module image", file.display()))?;
    if let Err(err) = verify_module(&image) {
        log::warn!("{}", err);
    }
    print!("{}", render(&image, method));
    Ok(())
}

fn render(image: &ModuleImage, only: Option<&str>) -> String {
    let mut out = String::new();
    let _ = write!(out, "module {}", image.name());
    if let Some(version) = &image.metadata.version {
        let _ = write!(out, " {}", version);
    }
    let _ = writeln!(out, " (format v{}, flags {:#x})", image.version, image.flags);

    let entry = image.entry_point.map(|e| (e.type_index as usize, e.method_index as usize));

    for (type_index, ty) in image.types.iter().enumerate() {
        let _ = writeln!(out, "\ntype {}", ty.name);
        for (method_index, method) in ty.methods.iter().enumerate() {
            if only.is_some_and(|name| name != method.name) {
                continue;
            }
            let marker = if entry == Some((type_index, method_index)) {
                " [entry]"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "  {} (locals {}){}",
                ty.signature(method),
                method.local_count,
                marker
            );
            for (index, instruction) in method.body.iter().enumerate() {
                let _ = writeln!(out, "    {:04}  {}", index, instruction);
            }
        }
    }
    out
}
