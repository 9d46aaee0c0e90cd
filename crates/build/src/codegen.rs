//! Source generation for the host program.
//!
//! The generated crate is a single binary that creates a `HostState`,
//! registers bridge modules and plugins into it, then runs the bundled script.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use luapack_core::{DependencySource, NativeDependency, to_identifier};
use luapack_plugin::DYLIB_CFG;

use crate::config::BridgeConfig;

/// Package and binary name of every generated program.
pub const HOST_BINARY: &str = "luapack-app";

/// Crate name of the runtime library in generated manifests.
pub const RUNTIME_CRATE: &str = "luapack-runtime";

/// Directory under `src/` holding copied native plugin sources.
pub const PLUGINS_DIR: &str = "plugins";

/// An interpreted plugin embedded as source text.
#[derive(Debug, Clone)]
pub struct EmbeddedPlugin {
    pub name: String,
    pub source: String,
    ident: String,
}

/// A native plugin compiled into the program as a module.
#[derive(Debug, Clone)]
pub struct NativeSource {
    /// Name scripts require the plugin by.
    pub name: String,

    /// Name the plugin registers itself under.
    pub module: String,

    /// The plugin's entry file, copied into the generated crate.
    pub entry: PathBuf,

    ident: String,
}

impl NativeSource {
    /// Path of the copied entry file, relative to `src/`.
    pub fn relative_path(&self) -> PathBuf {
        Path::new(PLUGINS_DIR).join(format!("{}.rs", self.ident))
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }
}

/// A plugin registration, in load order.
#[derive(Debug, Clone)]
pub enum ProgramPlugin {
    Interpreted(EmbeddedPlugin),
    Native(NativeSource),
}

/// Everything needed to render the generated crate.
#[derive(Debug, Clone)]
pub struct HostProgram {
    script_name: String,
    script: String,
    runtime: DependencySource,
    bridges: Option<BridgeConfig>,
    plugins: Vec<ProgramPlugin>,
    dependencies: Vec<NativeDependency>,
    idents: HashSet<String>,
}

impl HostProgram {
    pub fn new(
        script_name: impl Into<String>,
        script: impl Into<String>,
        runtime: DependencySource,
    ) -> Self {
        Self {
            script_name: script_name.into(),
            script: script.into(),
            runtime,
            bridges: None,
            plugins: Vec::new(),
            dependencies: Vec::new(),
            idents: HashSet::new(),
        }
    }

    pub fn with_bridges(mut self, bridges: Option<BridgeConfig>) -> Self {
        self.bridges = bridges;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<NativeDependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Embeds an interpreted plugin, registered lazily under `name`.
    pub fn add_interpreted(&mut self, name: impl Into<String>, source: impl Into<String>) {
        let name = name.into();
        let ident = self.unique_ident(&name);
        self.plugins.push(ProgramPlugin::Interpreted(EmbeddedPlugin {
            name,
            source: source.into(),
            ident,
        }));
    }

    /// Compiles a native plugin's entry file into the program.
    pub fn add_native(
        &mut self,
        name: impl Into<String>,
        module: impl Into<String>,
        entry: impl Into<PathBuf>,
    ) {
        let name = name.into();
        let ident = self.unique_ident(&name);
        self.plugins.push(ProgramPlugin::Native(NativeSource {
            name,
            module: module.into(),
            entry: entry.into(),
            ident,
        }));
    }

    pub fn plugins(&self) -> &[ProgramPlugin] {
        &self.plugins
    }

    pub fn native(&self) -> impl Iterator<Item = &NativeSource> {
        self.plugins.iter().filter_map(|p| match p {
            ProgramPlugin::Native(plugin) => Some(plugin),
            ProgramPlugin::Interpreted(_) => None,
        })
    }

    pub fn interpreted(&self) -> impl Iterator<Item = &EmbeddedPlugin> {
        self.plugins.iter().filter_map(|p| match p {
            ProgramPlugin::Interpreted(plugin) => Some(plugin),
            ProgramPlugin::Native(_) => None,
        })
    }

    fn unique_ident(&mut self, name: &str) -> String {
        let base = to_identifier(name);
        let mut ident = base.clone();
        let mut n = 1;
        while !self.idents.insert(ident.clone()) {
            n += 1;
            ident = format!("{base}_{n}");
        }
        ident
    }

    /// Renders `Cargo.toml`.
    pub fn cargo_toml(&self) -> Result<String, toml::ser::Error> {
        let mut package = toml::Table::new();
        package.insert("name".into(), HOST_BINARY.into());
        package.insert("version".into(), "0.0.0".into());
        package.insert("edition".into(), "2024".into());
        package.insert("publish".into(), false.into());

        let mut deps = toml::Table::new();
        for dep in &self.dependencies {
            deps.insert(dep.name.clone(), dep.to_toml());
        }
        if let Some(bridges) = &self.bridges {
            deps.insert(bridges.krate.clone(), bridges.source.to_toml());
        }
        deps.insert(RUNTIME_CRATE.into(), self.runtime.to_toml());

        let mut release = toml::Table::new();
        release.insert("lto".into(), true.into());
        release.insert("strip".into(), true.into());
        release.insert("codegen-units".into(), toml::Value::Integer(1));
        let mut profile = toml::Table::new();
        profile.insert("release".into(), release.into());

        // Copied plugin sources carry the cfg-gated dylib exports.
        let mut check_cfg = toml::Table::new();
        check_cfg.insert("level".into(), "warn".into());
        check_cfg.insert(
            "check-cfg".into(),
            toml::Value::Array(vec![format!("cfg({DYLIB_CFG})").into()]),
        );
        let mut rust_lints = toml::Table::new();
        rust_lints.insert("unexpected_cfgs".into(), check_cfg.into());
        let mut lints = toml::Table::new();
        lints.insert("rust".into(), rust_lints.into());

        let mut doc = toml::Table::new();
        doc.insert("package".into(), package.into());
        doc.insert("dependencies".into(), deps.into());
        doc.insert("profile".into(), profile.into());
        doc.insert("lints".into(), lints.into());
        doc.insert("workspace".into(), toml::Table::new().into());

        toml::to_string(&doc)
    }

    /// Renders `src/main.rs`.
    pub fn main_rs(&self) -> String {
        let mut out = String::from("// Generated by luapack. Do not edit.\n\n");
        out.push_str("use std::process::ExitCode;\n\n");
        out.push_str("use luapack_runtime::HostState;\n\n");

        for plugin in self.native() {
            out.push_str(&format!(
                "#[path = \"{}\"]\nmod plugin_{};\n\n",
                plugin.relative_path().to_string_lossy().replace('\\', "/"),
                plugin.ident
            ));
        }

        out.push_str(&format!(
            "const SCRIPT_NAME: &str = {:?};\n\n",
            self.script_name
        ));
        out.push_str(&format!(
            "const SCRIPT: &str = {};\n\n",
            raw_string_literal(&self.script)
        ));
        for plugin in self.interpreted() {
            out.push_str(&format!(
                "const PLUGIN_{}: &str = {};\n\n",
                plugin.ident.to_uppercase(),
                raw_string_literal(&plugin.source)
            ));
        }

        out.push_str("fn run() -> Result<(), Box<dyn std::error::Error>> {\n");
        if self.native().next().is_none() {
            out.push_str("    let host = HostState::new();\n");
        } else {
            out.push_str("    let mut host = HostState::new();\n");
        }
        if let Some(bridges) = &self.bridges {
            out.push_str(&format!(
                "    {}::register_all(&host)?;\n",
                bridges.crate_ident()
            ));
        }
        for plugin in &self.plugins {
            match plugin {
                ProgramPlugin::Interpreted(plugin) => out.push_str(&format!(
                    "    host.preload_source({:?}, PLUGIN_{})?;\n",
                    plugin.name,
                    plugin.ident.to_uppercase()
                )),
                ProgramPlugin::Native(plugin) => {
                    out.push_str(&format!(
                        "    host.register_plugin(plugin_{}::luapack_plugin())?;\n",
                        plugin.ident
                    ));
                    if plugin.module != plugin.name {
                        out.push_str(&format!(
                            "    host.alias({:?}, {:?})?;\n",
                            plugin.module, plugin.name
                        ));
                    }
                }
            }
        }
        out.push_str("    host.exec(SCRIPT_NAME, SCRIPT)?;\n");
        out.push_str("    Ok(())\n}\n\n");

        out.push_str(
            "fn main() -> ExitCode {\n    \
             match run() {\n        \
             Ok(()) => ExitCode::SUCCESS,\n        \
             Err(e) => {\n            \
             eprintln!(\"error: {e}\");\n            \
             ExitCode::FAILURE\n        \
             }\n    \
             }\n}\n",
        );
        out
    }
}

/// Quotes `text` as a Rust string literal, preferring a raw literal with
/// enough `#`s to contain it.
pub fn raw_string_literal(text: &str) -> String {
    // A lone CR is rejected inside any literal and must be escaped.
    let bytes = text.as_bytes();
    let lone_cr = bytes
        .iter()
        .enumerate()
        .any(|(i, &b)| b == b'\r' && bytes.get(i + 1) != Some(&b'\n'));
    if lone_cr {
        return format!("{text:?}");
    }

    let mut longest = 0;
    let mut run: Option<usize> = None;
    for c in text.chars() {
        run = match (c, run) {
            ('"', _) => Some(0),
            ('#', Some(n)) => {
                longest = longest.max(n + 1);
                Some(n + 1)
            }
            _ => None,
        };
    }

    let hashes = "#".repeat(longest + 1);
    format!("r{hashes}\"{text}\"{hashes}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> HostProgram {
        HostProgram::new(
            "main.lua",
            "print(require('greeter').hello())",
            DependencySource::version("0.1.0"),
        )
    }

    #[test]
    fn test_raw_string_literal() {
        assert_eq!(raw_string_literal("print('hi')"), "r#\"print('hi')\"#");
        assert_eq!(
            raw_string_literal("s = \"#\" .. x"),
            "r##\"s = \"#\" .. x\"##"
        );
        assert_eq!(raw_string_literal("a\"##b"), "r###\"a\"##b\"###");
        assert_eq!(raw_string_literal("x = 1\r\ny = 2"), "r#\"x = 1\r\ny = 2\"#");
        assert_eq!(raw_string_literal("x\ry"), "\"x\\ry\"");
    }

    #[test]
    fn test_main_without_plugins() {
        let main = program().main_rs();
        assert!(main.contains("let host = HostState::new();"));
        assert!(main.contains("const SCRIPT_NAME: &str = \"main.lua\";"));
        assert!(main.contains("const SCRIPT: &str = r#\"print(require('greeter').hello())\"#;"));
        assert!(main.contains("host.exec(SCRIPT_NAME, SCRIPT)?;"));
        assert!(!main.contains("register_all"));
        assert!(!main.contains("mod plugin_"));
    }

    #[test]
    fn test_main_registers_plugins_in_order() {
        let mut program = program().with_bridges(Some(BridgeConfig {
            krate: "luapack-bridges".to_string(),
            source: DependencySource::version("0.1"),
        }));
        program.add_native("myfs", "fs", "/tmp/fs/plugin.rs");
        program.add_interpreted("greeter", "return { hello = function() return 'hi' end }");
        program.add_native("db", "db", "/tmp/db/plugin.rs");

        let main = program.main_rs();
        let bridges = main.find("luapack_bridges::register_all(&host)?;").unwrap();
        let greeter = main.find("host.preload_source(\"greeter\", PLUGIN_GREETER)?;").unwrap();
        let fs = main.find("host.register_plugin(plugin_myfs::luapack_plugin())?;").unwrap();
        let db = main.find("host.register_plugin(plugin_db::luapack_plugin())?;").unwrap();
        let exec = main.find("host.exec(SCRIPT_NAME, SCRIPT)?;").unwrap();
        assert!(bridges < fs && fs < greeter && greeter < db && db < exec);

        assert!(main.contains("let mut host"));
        assert!(main.contains("#[path = \"plugins/myfs.rs\"]\nmod plugin_myfs;"));
        assert!(main.contains("host.alias(\"fs\", \"myfs\")?;"));
        assert!(!main.contains("host.alias(\"db\""));
    }

    #[test]
    fn test_idents_are_unique() {
        let mut program = program();
        program.add_native("my-fs", "fs", "a.rs");
        program.add_native("my_fs", "fs", "b.rs");
        program.add_interpreted("2d", "return {}");

        let idents: Vec<_> = program.native().map(NativeSource::ident).collect();
        assert_eq!(idents, ["my_fs", "my_fs_2"]);
        assert_eq!(
            program.native().nth(1).unwrap().relative_path(),
            Path::new("plugins").join("my_fs_2.rs")
        );
        assert!(program.main_rs().contains("const PLUGIN__2D: &str"));
    }

    #[test]
    fn test_cargo_toml() {
        let program = program()
            .with_dependencies(vec![
                NativeDependency::parse("regex@1").unwrap(),
                NativeDependency::parse("walkdir").unwrap(),
            ])
            .with_bridges(Some(BridgeConfig {
                krate: "luapack-bridges".to_string(),
                source: DependencySource::path("/opt/bridges"),
            }));

        let rendered = program.cargo_toml().unwrap();
        let doc: toml::Table = toml::from_str(&rendered).unwrap();

        assert_eq!(doc["package"]["name"].as_str(), Some(HOST_BINARY));
        assert_eq!(doc["dependencies"]["regex"].as_str(), Some("1"));
        assert_eq!(doc["dependencies"]["walkdir"].as_str(), Some("*"));
        assert_eq!(doc["dependencies"][RUNTIME_CRATE].as_str(), Some("0.1.0"));
        assert_eq!(
            doc["dependencies"]["luapack-bridges"]["path"].as_str(),
            Some("/opt/bridges")
        );
        assert_eq!(doc["profile"]["release"]["lto"].as_bool(), Some(true));
        assert_eq!(doc["profile"]["release"]["strip"].as_bool(), Some(true));
        assert!(doc["workspace"].as_table().unwrap().is_empty());
    }
}
