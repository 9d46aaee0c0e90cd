//! Bundling of a multi-file script project into one source text.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BundleError, Result};
use crate::graph::{ModuleGraph, ModuleNode};
use crate::resolver::{canonical, module_id, resolve_reference};
use crate::scanner::{RequireCall, scan_requires};

/// Standard library modules of the interpreter, always left to the runtime.
pub const LUA_STANDARD_LIBRARIES: &[&str] = &[
    "_G",
    "coroutine",
    "debug",
    "io",
    "math",
    "os",
    "package",
    "string",
    "table",
    "utf8",
];

/// How resolved modules are laid out in the bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleMode {
    /// Every `require` call site is replaced by the module body wrapped in an
    /// immediately invoked function. A module required twice runs twice.
    #[default]
    Inline,

    /// Each module is emitted once into a module table and initialized on first use.
    Shared,
}

/// The result of bundling an entry script.
#[derive(Debug)]
pub struct Bundle {
    /// Canonical path of the entry script.
    pub entry: PathBuf,

    /// The self-contained source text.
    pub source: String,

    /// Every script file that was pulled in, in first-require order, entry first.
    pub modules: Vec<PathBuf>,

    /// The module reference graph.
    pub graph: ModuleGraph,
}

/// Resolves and inlines every local `require` of `entry`.
///
/// References named in `available` are left for the runtime.
pub fn resolve<I, S>(entry: &Path, available: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Ok(Bundler::new(available).bundle(entry)?.source)
}

/// Module graph resolver.
#[derive(Debug, Clone, Default)]
pub struct Bundler {
    available: HashSet<String>,
    mode: BundleMode,
}

/// A parsed script with its `require` calls classified.
#[derive(Debug)]
struct Module {
    source: String,
    /// Leading `#` line, kept apart so it never ends up inside a function body.
    shebang: Option<String>,
    requires: Vec<(RequireCall, Dependency)>,
}

#[derive(Debug, Clone)]
enum Dependency {
    Script(PathBuf),
    External,
}

/// State of one depth-first walk.
struct Walk<'a> {
    bundler: &'a Bundler,
    stack: Vec<PathBuf>,
    modules: HashMap<PathBuf, Module>,
    order: Vec<PathBuf>,
    graph: ModuleGraph,
}

impl Bundler {
    pub fn new<I, S>(available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available: available.into_iter().map(Into::into).collect(),
            mode: BundleMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: BundleMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> BundleMode {
        self.mode
    }

    /// Returns true when `reference` is resolved by the runtime rather than bundled.
    pub fn is_available(&self, reference: &str) -> bool {
        self.available.contains(reference) || LUA_STANDARD_LIBRARIES.contains(&reference)
    }

    /// Bundles `entry` and everything it requires.
    pub fn bundle(&self, entry: &Path) -> Result<Bundle> {
        let entry = canonical(entry);
        let mut walk = Walk {
            bundler: self,
            stack: Vec::new(),
            modules: HashMap::new(),
            order: Vec::new(),
            graph: ModuleGraph::new(),
        };
        walk.graph.add_node(ModuleNode::Script(entry.clone()));
        walk.visit(&entry)?;

        debug!(
            entry = %entry.display(),
            modules = walk.order.len(),
            mode = ?self.mode,
            "resolved module graph"
        );

        let source = if walk.order.len() == 1 {
            // Nothing local was required; the entry is already self-contained.
            walk.original_entry_source(&entry)
        } else {
            match self.mode {
                BundleMode::Inline => walk.emit_inline(&entry),
                BundleMode::Shared => walk.emit_shared(&entry),
            }
        };

        Ok(Bundle {
            entry,
            source,
            modules: walk.order,
            graph: walk.graph,
        })
    }
}

impl Walk<'_> {
    fn visit(&mut self, path: &Path) -> Result<()> {
        if let Some(pos) = self.stack.iter().position(|p| p == path) {
            let mut cycle = self.stack[pos..].to_vec();
            cycle.push(path.to_path_buf());
            return Err(BundleError::CircularDependency { cycle });
        }
        if self.modules.contains_key(path) {
            return Ok(());
        }

        let module = self.load(path)?;
        let children: Vec<PathBuf> = module
            .requires
            .iter()
            .filter_map(|(_, dep)| match dep {
                Dependency::Script(p) => Some(p.clone()),
                Dependency::External => None,
            })
            .collect();

        for (call, dep) in &module.requires {
            let to = match dep {
                Dependency::Script(p) => ModuleNode::Script(p.clone()),
                Dependency::External => ModuleNode::External(call.reference.clone()),
            };
            self.graph.add_edge(ModuleNode::Script(path.to_path_buf()), to);
        }

        self.order.push(path.to_path_buf());
        self.stack.push(path.to_path_buf());
        for child in &children {
            self.visit(child)?;
        }
        self.stack.pop();

        self.modules.insert(path.to_path_buf(), module);
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Module> {
        let text = std::fs::read_to_string(path).map_err(|source| BundleError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let (shebang, source) = split_shebang(text);

        let base_dir = path.parent().unwrap_or(Path::new("."));
        let mut requires = Vec::new();
        for call in scan_requires(&source) {
            let dep = if self.bundler.is_available(&call.reference) {
                Dependency::External
            } else {
                match resolve_reference(&call.reference, base_dir) {
                    Ok(resolved) => {
                        debug!(reference = %call.reference, resolved = %resolved.display(), "resolved require");
                        Dependency::Script(resolved)
                    }
                    Err(searched) => {
                        return Err(BundleError::module_not_found(
                            &call.reference,
                            path,
                            &searched,
                            &source,
                            call.start,
                            call.len(),
                        ));
                    }
                }
            };
            requires.push((call, dep));
        }

        Ok(Module {
            source,
            shebang,
            requires,
        })
    }

    fn original_entry_source(&self, entry: &Path) -> String {
        let module = &self.modules[entry];
        let mut out = module.shebang.clone().unwrap_or_default();
        out.push_str(&module.source);
        out
    }

    fn emit_inline(&self, entry: &Path) -> String {
        let mut rendered: HashMap<&Path, String> = HashMap::new();
        let body = self.render_inline(entry, &mut rendered);
        let mut out = self.modules[entry].shebang.clone().unwrap_or_default();
        out.push_str(&body);
        out
    }

    fn render_inline<'p>(&'p self, path: &'p Path, rendered: &mut HashMap<&'p Path, String>) -> String {
        if let Some(text) = rendered.get(path) {
            return text.clone();
        }

        let module = &self.modules[path];
        let text = rewrite(module, |call, target| {
            let body = self.render_inline(target, rendered);
            let lead = if call.statement { ";" } else { "" };
            format!("{lead}(function(...)\n{body}\nend)()")
        });
        rendered.insert(path, text.clone());
        text
    }

    fn emit_shared(&self, entry: &Path) -> String {
        let root = entry.parent().unwrap_or(Path::new(""));
        let mut out = self.modules[entry].shebang.clone().unwrap_or_default();

        out.push_str("local __luapack_modules = {}\n");
        out.push_str("local __luapack_loaded = {}\n");
        out.push_str("local function __luapack_load(id)\n");
        out.push_str("  local cached = __luapack_loaded[id]\n");
        out.push_str("  if cached == nil then\n");
        out.push_str("    cached = { value = __luapack_modules[id](id) }\n");
        out.push_str("    __luapack_loaded[id] = cached\n");
        out.push_str("  end\n");
        out.push_str("  return cached.value\n");
        out.push_str("end\n");

        let load_call = |_: &RequireCall, target: &Path| {
            format!("__luapack_load({:?})", module_id(root, target))
        };

        for path in self.graph.scripts_dependencies_first() {
            if path == entry {
                continue;
            }
            let body = rewrite(&self.modules[path], load_call);
            let _ = write!(
                out,
                "__luapack_modules[{:?}] = function(...)\n{}\nend\n",
                module_id(root, path),
                body
            );
        }

        out.push_str(&rewrite(&self.modules[entry], load_call));
        out
    }
}

/// Rebuilds a module's source with every local `require` call replaced.
fn rewrite<'m, F>(module: &'m Module, mut replace: F) -> String
where
    F: FnMut(&'m RequireCall, &'m Path) -> String,
{
    let mut out = String::with_capacity(module.source.len());
    let mut cursor = 0;
    for (call, dep) in &module.requires {
        if let Dependency::Script(target) = dep {
            out.push_str(&module.source[cursor..call.start]);
            out.push_str(&replace(call, target));
            cursor = call.end;
        }
    }
    out.push_str(&module.source[cursor..]);
    out
}

/// Splits off a leading `#!` line.
fn split_shebang(text: String) -> (Option<String>, String) {
    if !text.starts_with('#') {
        return (None, text);
    }
    match text.find('\n') {
        Some(end) => (Some(text[..=end].to_string()), text[end + 1..].to_string()),
        None => (Some(text), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use mlua::Lua;
    use tempfile::{TempDir, tempdir};

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn run(source: &str) -> Lua {
        let lua = Lua::new();
        lua.load(source).exec().unwrap();
        lua
    }

    #[test]
    fn test_inlines_relative_module() {
        let dir = project(&[
            ("main.lua", "local util = require(\"./util\")\nresult = util.add(2, 3)\n"),
            ("util.lua", "local M = {}\nfunction M.add(a, b) return a + b end\nreturn M\n"),
        ]);

        let bundled = resolve(&dir.path().join("main.lua"), Vec::<String>::new()).unwrap();

        assert!(!bundled.contains("require(\"./util\")"));
        assert!(bundled.contains("(function(...)\nlocal M = {}"));
        assert!(bundled.contains("return M\n\nend)()"));

        let lua = run(&bundled);
        assert_eq!(lua.globals().get::<i64>("result").unwrap(), 5);
    }

    #[test]
    fn test_nested_and_bare_references() {
        let dir = project(&[
            ("main.lua", "local a = require('lib.a')\nvalue = a\n"),
            ("lib/a.lua", "return require('./b') .. 'a'\n"),
            ("lib/b.lua", "return 'b'\n"),
        ]);

        let bundle = Bundler::new(Vec::<String>::new())
            .bundle(&dir.path().join("main.lua"))
            .unwrap();

        assert_eq!(bundle.modules.len(), 3);
        assert!(scan_requires(&bundle.source).is_empty());

        let lua = run(&bundle.source);
        assert_eq!(lua.globals().get::<String>("value").unwrap(), "ba");
    }

    #[test]
    fn test_circular_dependency() {
        let dir = project(&[
            ("main.lua", "require('./a')\n"),
            ("a.lua", "require('./b')\nreturn 1\n"),
            ("b.lua", "require('./a')\nreturn 2\n"),
        ]);

        let err = resolve(&dir.path().join("main.lua"), Vec::<String>::new()).unwrap_err();
        let message = err.to_string();

        assert!(matches!(err, BundleError::CircularDependency { .. }));
        assert!(message.starts_with("Circular dependency detected:"));
        assert!(message.contains("a.lua"));
        assert!(message.contains("b.lua"));
    }

    #[test]
    fn test_self_require_is_a_cycle() {
        let dir = project(&[("main.lua", "require('./main')\n")]);
        let err = resolve(&dir.path().join("main.lua"), Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, BundleError::CircularDependency { ref cycle } if cycle.len() == 2));
    }

    #[test]
    fn test_available_modules_untouched() {
        let source = "local http = require(\"http\")\nlocal fs = require('fs')\nlocal s = require('string')\n";
        let dir = project(&[("main.lua", source)]);

        let bundled = resolve(&dir.path().join("main.lua"), ["http", "fs"]).unwrap();
        assert_eq!(bundled, source);
    }

    #[test]
    fn test_available_modules_survive_inlining() {
        let dir = project(&[
            ("main.lua", "local u = require('./u')\n"),
            ("u.lua", "local http = require(\"http\")\nreturn {}\n"),
        ]);

        let bundled = resolve(&dir.path().join("main.lua"), ["http"]).unwrap();
        assert!(bundled.contains("require(\"http\")"));
        assert!(!bundled.contains("require('./u')"));
    }

    #[test]
    fn test_single_file_round_trip() {
        let source = "#!/usr/bin/env lua\n-- require('./nothing')\nprint(\"hello\")\n";
        let dir = project(&[("main.lua", source)]);

        for mode in [BundleMode::Inline, BundleMode::Shared] {
            let bundle = Bundler::new(Vec::<String>::new())
                .with_mode(mode)
                .bundle(&dir.path().join("main.lua"))
                .unwrap();
            assert_eq!(bundle.source, source);
        }
    }

    #[test]
    fn test_idempotent() {
        let dir = project(&[
            ("main.lua", "local a = require('./a')\nlocal b = require('./b')\n"),
            ("a.lua", "return require('./c')\n"),
            ("b.lua", "return require('./c')\n"),
            ("c.lua", "return {}\n"),
        ]);
        let entry = dir.path().join("main.lua");

        for mode in [BundleMode::Inline, BundleMode::Shared] {
            let bundler = Bundler::new(["http"]).with_mode(mode);
            let first = bundler.bundle(&entry).unwrap().source;
            let second = bundler.bundle(&entry).unwrap().source;
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_module_not_found() {
        let dir = project(&[("main.lua", "local x = 1\nlocal m = require('./missing')\n")]);

        let err = resolve(&dir.path().join("main.lua"), Vec::<String>::new()).unwrap_err();
        match &err {
            BundleError::ModuleNotFound {
                reference, span, searched, ..
            } => {
                assert_eq!(reference, "./missing");
                assert_eq!(span.offset(), 22);
                assert!(searched.contains("missing.lua"));
                assert!(searched.contains("init.lua"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("'./missing'"));
    }

    #[test]
    fn test_statement_call_does_not_chain() {
        let dir = project(&[
            ("main.lua", "count = 0\nprint(\"start\")\nrequire('./side')\n"),
            ("side.lua", "count = count + 1\n"),
        ]);

        let bundled = resolve(&dir.path().join("main.lua"), Vec::<String>::new()).unwrap();
        assert!(bundled.contains(";(function(...)"));

        let lua = run(&bundled);
        assert_eq!(lua.globals().get::<i64>("count").unwrap(), 1);
    }

    #[test]
    fn test_inline_runs_shared_module_per_call_site() {
        let dir = project(&[
            ("main.lua", "counter = 0\nlocal a = require('./a')\nlocal b = require('./b')\n"),
            ("a.lua", "return require('./counter')\n"),
            ("b.lua", "return require('./counter')\n"),
            ("counter.lua", "counter = counter + 1\nreturn counter\n"),
        ]);

        let bundled = resolve(&dir.path().join("main.lua"), Vec::<String>::new()).unwrap();
        let lua = run(&bundled);
        assert_eq!(lua.globals().get::<i64>("counter").unwrap(), 2);
    }

    #[test]
    fn test_shared_mode_runs_module_once() {
        let dir = project(&[
            (
                "main.lua",
                "counter = 0\nlocal a = require('./a')\nlocal b = require('./b')\nsame = a == b\n",
            ),
            ("a.lua", "return require('./lib/counter')\n"),
            ("b.lua", "return require('./lib/counter')\n"),
            ("lib/counter.lua", "counter = counter + 1\nreturn { n = counter }\n"),
        ]);

        let bundle = Bundler::new(Vec::<String>::new())
            .with_mode(BundleMode::Shared)
            .bundle(&dir.path().join("main.lua"))
            .unwrap();

        assert_eq!(bundle.source.matches("__luapack_modules[\"lib/counter.lua\"] =").count(), 1);
        assert!(bundle.source.contains("__luapack_load(\"lib/counter.lua\")"));

        let lua = run(&bundle.source);
        assert_eq!(lua.globals().get::<i64>("counter").unwrap(), 1);
        assert!(lua.globals().get::<bool>("same").unwrap());
    }

    #[test]
    fn test_shebang_stripped_from_required_modules() {
        let dir = project(&[
            ("main.lua", "#!/usr/bin/env lua\nvalue = require('./tool')\n"),
            ("tool.lua", "#!/usr/bin/env lua\nreturn 42\n"),
        ]);

        let bundled = resolve(&dir.path().join("main.lua"), Vec::<String>::new()).unwrap();
        assert!(bundled.starts_with("#!/usr/bin/env lua\n"));
        assert_eq!(bundled.matches("#!").count(), 1);

        let body = bundled.trim_start_matches("#!/usr/bin/env lua\n");
        let lua = run(body);
        assert_eq!(lua.globals().get::<i64>("value").unwrap(), 42);
    }

    #[test]
    fn test_graph_records_externals() {
        let dir = project(&[
            ("main.lua", "local u = require('./u')\nlocal t = require('tui')\n"),
            ("u.lua", "return {}\n"),
        ]);

        let bundle = Bundler::new(["tui"]).bundle(&dir.path().join("main.lua")).unwrap();
        assert_eq!(bundle.graph.len(), 3);
        assert_eq!(bundle.graph.externals(), vec!["tui"]);
        assert_eq!(
            bundle.graph.root(),
            Some(&ModuleNode::Script(bundle.entry.clone()))
        );
    }
}
