//! ImpHash: deterministic MD5 fingerprint over an image's import table
//! (spec §4.3, §8 scenario 1). A widely used malware-clustering primitive;
//! the exact token format below reproduces the convention the wild-spread
//! tooling settled on, so fingerprints from this crate agree with it.

use md5::{Digest, Md5};

use crate::imports::descriptor::ImportModule;
use crate::imports::ordinals;

const STRIPPABLE_EXTENSIONS: [&str; 3] = ["ocx", "sys", "dll"];

fn module_stem(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    match lower.rsplit_once('.') {
        Some((stem, ext)) if STRIPPABLE_EXTENSIONS.contains(&ext) => stem.to_string(),
        _ => lower,
    }
}

fn function_token(stem: &str, by_ordinal: bool, ordinal: u16, name: &str) -> String {
    let resolved = if by_ordinal {
        ordinals::resolve(stem, ordinal)
            .map(str::to_string)
            .unwrap_or_else(|| format!("ord{ordinal}"))
    } else {
        name.to_string()
    };
    resolved.to_ascii_lowercase()
}

/// Compute the ImpHash over `modules` in their on-disk order. An image
/// with no imports hashes the empty string, matching tools that treat
/// "no imports" as a distinct, but still deterministic, fingerprint.
pub fn compute(modules: &[ImportModule]) -> String {
    let mut tokens = Vec::new();
    for module in modules {
        let stem = module_stem(&module.name);
        for function in &module.functions {
            let token = function_token(&stem, function.by_ordinal, function.ordinal, &function.name);
            if token.is_empty() {
                continue;
            }
            tokens.push(format!("{stem}.{token}"));
        }
    }

    let joined = tokens.join(",");
    let mut hasher = Md5::new();
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imports::descriptor::ImportFunction;

    fn module(name: &str, functions: Vec<ImportFunction>) -> ImportModule {
        ImportModule {
            name: name.to_string(),
            time_date_stamp: 0,
            forwarder_chain: 0,
            original_first_thunk: 0,
            first_thunk: 0,
            functions,
        }
    }

    fn named(name: &str) -> ImportFunction {
        ImportFunction {
            name: name.to_string(),
            hint: 0,
            by_ordinal: false,
            ordinal: 0,
            original_thunk_value: 0,
            thunk_value: 0,
            thunk_rva: 0,
            original_thunk_rva: 0,
        }
    }

    #[test]
    fn deterministic_and_order_sensitive() {
        let a = vec![module("KERNEL32.dll", vec![named("GetProcAddress"), named("LoadLibraryA")])];
        let b = vec![module("KERNEL32.dll", vec![named("GetProcAddress"), named("LoadLibraryA")])];
        assert_eq!(compute(&a), compute(&b));
    }

    #[test]
    fn differing_imports_differ() {
        let a = vec![module("kernel32.dll", vec![named("GetProcAddress")])];
        let b = vec![module("kernel32.dll", vec![named("VirtualAlloc")])];
        assert_ne!(compute(&a), compute(&b));
    }

    #[test]
    fn strips_known_extension_only() {
        assert_eq!(module_stem("KERNEL32.DLL"), "kernel32");
        assert_eq!(module_stem("my.custom.ext"), "my.custom.ext");
    }
}
