//! Built-in module names.

/// Bridging modules every generated program registers. A `require` of one of
/// these names is left for the interpreter to resolve at run time.
pub const BUILTIN_MODULES: &[&str] = &["tui", "http", "websocket", "kv", "crypto"];

/// Returns true if `name` is a built-in bridging module.
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_MODULES.contains(&name)
}

/// Built-in module names as owned strings, for seeding an available-module set.
pub fn builtin_module_names() -> impl Iterator<Item = String> {
    BUILTIN_MODULES.iter().map(|name| name.to_string())
}
