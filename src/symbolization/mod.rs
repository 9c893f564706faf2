//! Address-to-function resolution via the platform symbolizer.
//!
//! Resolution shells out to `addr2line` once, with every accumulated
//! instruction pointer in the batch. Each address yields a function line
//! and a `file:line` line; they join as `function at file`. Failures are
//! never fatal: if the subprocess cannot run, the hex address stands in
//! for the function name, and an address the symbolizer cannot place
//! keeps its literal `??` form.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;

use log::warn;
use rustc_demangle::demangle;

pub struct Symbolizer {
    binary: PathBuf,
}

impl Symbolizer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// Resolve every address in one symbolizer invocation.
    pub fn resolve_all(&self, addresses: &[u64]) -> HashMap<u64, String> {
        if addresses.is_empty() {
            return HashMap::new();
        }

        let output = Command::new("addr2line")
            .arg("-f")
            .arg("-s")
            .arg("-C")
            .arg("-e")
            .arg(&self.binary)
            .args(addresses.iter().map(|addr| format!("{addr:#x}")))
            .output();

        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                warn!("addr2line exited with {}; falling back to raw addresses", output.status);
                return hex_fallback(addresses);
            }
            Err(err) => {
                warn!("failed to run addr2line: {err}; falling back to raw addresses");
                return hex_fallback(addresses);
            }
        };

        let text = String::from_utf8_lossy(&output.stdout);
        let mut lines = text.lines();
        let mut resolved = HashMap::with_capacity(addresses.len());
        for &addr in addresses {
            match (lines.next(), lines.next()) {
                (Some(function), Some(location)) => {
                    resolved.insert(addr, join_frame(function, location));
                }
                _ => {
                    resolved.insert(addr, format!("{addr:#x}"));
                }
            }
        }
        resolved
    }
}

fn hex_fallback(addresses: &[u64]) -> HashMap<u64, String> {
    addresses.iter().map(|&addr| (addr, format!("{addr:#x}"))).collect()
}

/// Join a function/location pair into `function at file`, dropping the
/// line number and any trailing bracketed annotation.
fn join_frame(function: &str, location: &str) -> String {
    let function = strip_annotation(function.trim());
    let function = demangle_leftovers(function);
    let file = location.trim().split(':').next().unwrap_or("??");
    format!("{function} at {file}")
}

/// `"frob [clone .cold]"` becomes `"frob"`.
fn strip_annotation(name: &str) -> &str {
    match name.find(" [") {
        Some(index) => &name[..index],
        None => name,
    }
}

/// The symbolizer demangles most names itself; Rust v0 symbols sometimes
/// survive and get a second chance here.
fn demangle_leftovers(name: &str) -> String {
    if name.starts_with("_Z") || name.starts_with("_R") {
        format!("{:#}", demangle(name))
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_strips_line_number() {
        assert_eq!(join_frame("spin", "hog.c:42"), "spin at hog.c");
    }

    #[test]
    fn test_join_strips_clone_annotation() {
        assert_eq!(join_frame("worker [clone ._omp_fn.0]", "loop.c:7"), "worker at loop.c");
    }

    #[test]
    fn test_unresolved_address_keeps_question_marks() {
        assert_eq!(join_frame("??", "??:0"), "?? at ??");
    }

    #[test]
    fn test_mangled_rust_symbol_is_demangled() {
        let joined = join_frame("_ZN4core3ptr13drop_in_place17h1234567890abcdefE", "ptr.rs:1");
        assert!(joined.starts_with("core::ptr::drop_in_place"));
        assert!(joined.ends_with(" at ptr.rs"));
    }

    #[test]
    fn test_missing_symbolizer_falls_back_to_hex() {
        let symbolizer = Symbolizer::new("/nonexistent/binary");
        // addr2line exits nonzero for a missing binary; every address must
        // still resolve to something printable.
        let resolved = symbolizer.resolve_all(&[0x1000, 0x2000]);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[&0x1000], "0x1000");
    }

    #[test]
    fn test_empty_batch_spawns_nothing() {
        let symbolizer = Symbolizer::new("/bin/true");
        assert!(symbolizer.resolve_all(&[]).is_empty());
    }
}
