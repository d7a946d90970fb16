//! Platform builtin detection.
//!
//! A specifier is a builtin when it carries the `node:` namespace prefix or
//! names one of the known Node.js core modules (optionally with a subpath).

/// Known Node.js core module names
const NODE_BUILTINS: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "sys",
    "timers",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

/// Namespace prefix for platform builtins
pub const BUILTIN_PREFIX: &str = "node:";

/// Normalize a builtin specifier to its bare name.
///
/// Any `node:`-prefixed specifier is a builtin even when the name is not in
/// the known list, so a declaration against `node:anything` is keyed the
/// same way the host would key it.
///
/// - `node:fs` -> Some("fs")
/// - `fs/promises` -> Some("fs/promises")
/// - `node:test` -> Some("test")
/// - `lodash` -> None
pub fn normalize_builtin(specifier: &str) -> Option<&str> {
    if let Some(name) = specifier.strip_prefix(BUILTIN_PREFIX) {
        return (!name.is_empty()).then_some(name);
    }

    let base = specifier.split('/').next()?;
    if NODE_BUILTINS.contains(&base) {
        Some(specifier)
    } else {
        None
    }
}

/// Whether the specifier names a platform builtin.
pub fn is_builtin(specifier: &str) -> bool {
    normalize_builtin(specifier).is_some()
}

/// Canonical module id of a builtin (`node:<name>`).
pub fn builtin_id(specifier: &str) -> Option<String> {
    normalize_builtin(specifier).map(|name| format!("{BUILTIN_PREFIX}{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_builtin() {
        assert_eq!(normalize_builtin("node:fs"), Some("fs"));
        assert_eq!(normalize_builtin("fs"), Some("fs"));
        assert_eq!(normalize_builtin("node:fs/promises"), Some("fs/promises"));
        assert_eq!(normalize_builtin("fs/promises"), Some("fs/promises"));
        assert_eq!(normalize_builtin("unknown"), None);
        assert_eq!(normalize_builtin("./fs"), None);
        assert_eq!(normalize_builtin("node:"), None);
    }

    #[test]
    fn test_prefixed_unknown_name_is_builtin() {
        assert_eq!(normalize_builtin("node:test"), Some("test"));
        assert!(is_builtin("node:sqlite"));
        assert!(!is_builtin("sqlite"));
    }

    #[test]
    fn test_builtin_id_is_prefixed() {
        assert_eq!(builtin_id("path").as_deref(), Some("node:path"));
        assert_eq!(builtin_id("node:path").as_deref(), Some("node:path"));
        assert_eq!(builtin_id("lodash"), None);
    }
}
