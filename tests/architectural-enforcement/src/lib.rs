//! Architectural enforcement helpers
//!
//! Lexical scanners shared by the tests in `tests/`. Each source line is
//! tagged with the function it sits in (async or not) and whether it is test
//! code, by tracking braces over rustfmt-formatted source.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Source trees the rules apply to, relative to the workspace root
pub const SOURCE_ROOTS: &[&str] = &["orchestra/core/src", "orchestra/cli/src"];

/// Workspace root, resolved from this crate's manifest
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every `.rs` file under [`SOURCE_ROOTS`]
///
/// # Panics
///
/// Panics when a root is missing, so a moved crate cannot make the rules
/// pass vacuously.
#[must_use]
pub fn rust_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in SOURCE_ROOTS {
        let path = root.join(dir);
        assert!(path.is_dir(), "source root {} does not exist", path.display());

        for entry in WalkDir::new(&path).into_iter().filter_map(Result::ok) {
            if entry.path().extension().is_some_and(|ext| ext == "rs") {
                files.push(entry.path().to_path_buf());
            }
        }
    }

    files.sort();
    files
}

/// Where a line sits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineContext {
    /// Inside a `#[cfg(test)]` module or a test function
    pub in_test: bool,
    /// Innermost enclosing function (or block) is async
    pub in_async: bool,
    /// Inside any function body
    pub in_function: bool,
}

#[derive(Clone, Copy, Debug)]
enum Scope {
    Function { is_async: bool, test: bool },
    TestModule,
    Block,
}

/// Kind of item a signature line opens
fn signature(trimmed: &str) -> Option<bool> {
    let mut rest = trimmed;
    loop {
        let stripped = ["pub(crate) ", "pub(super) ", "pub ", "const ", "unsafe "]
            .iter()
            .find_map(|prefix| rest.strip_prefix(prefix));
        match stripped {
            Some(next) => rest = next,
            None => break,
        }
    }

    if rest.starts_with("async fn ") {
        Some(true)
    } else if rest.starts_with("fn ") {
        Some(false)
    } else {
        None
    }
}

fn is_test_attribute(trimmed: &str) -> bool {
    trimmed.starts_with("#[test")
        || trimmed.starts_with("#[tokio::test")
        || trimmed.starts_with("#[cfg(test)")
}

/// Remove string/char literal contents and line comments
///
/// `in_string` carries an open (possibly raw) string across lines.
fn strip_literals(line: &str, in_string: &mut Option<usize>) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;

    while i < chars.len() {
        if let Some(hashes) = *in_string {
            if chars[i] == '\\' && hashes == 0 {
                i += 2;
                continue;
            }
            let closes = chars[i + 1..].iter().take(hashes).filter(|c| **c == '#').count() == hashes;
            if chars[i] == '"' && closes {
                *in_string = None;
                out.push('"');
                i += 1 + hashes;
                continue;
            }
            i += 1;
            continue;
        }

        match chars[i] {
            '/' if chars.get(i + 1) == Some(&'/') => break,
            '"' => {
                *in_string = Some(0);
                out.push('"');
                i += 1;
            }
            'r' if matches!(chars.get(i + 1), Some('"' | '#'))
                && (i == 0 || !chars[i - 1].is_alphanumeric()) =>
            {
                let hashes = chars[i + 1..].iter().take_while(|c| **c == '#').count();
                if chars.get(i + 1 + hashes) == Some(&'"') {
                    *in_string = Some(hashes);
                    out.push('"');
                    i += 2 + hashes;
                } else {
                    out.push('r');
                    i += 1;
                }
            }
            '\'' => {
                // 'x' and '\x' are literals; 'a is a lifetime
                if chars.get(i + 1) == Some(&'\\') {
                    let close = chars[i + 2..].iter().position(|c| *c == '\'');
                    i += close.map_or(1, |p| p + 3);
                } else if chars.get(i + 2) == Some(&'\'') {
                    i += 3;
                } else {
                    out.push('\'');
                    i += 1;
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn context_of(stack: &[Scope]) -> LineContext {
    let in_test = stack.iter().any(|scope| match scope {
        Scope::Function { test, .. } => *test,
        Scope::TestModule => true,
        Scope::Block => false,
    });
    let innermost = stack.iter().rev().find_map(|scope| match scope {
        Scope::Function { is_async, .. } => Some(*is_async),
        _ => None,
    });

    LineContext {
        in_test,
        in_async: innermost == Some(true),
        in_function: innermost.is_some(),
    }
}

/// Tag every line of a source file
#[must_use]
pub fn analyze(source: &str) -> Vec<LineContext> {
    let mut contexts = Vec::new();
    let mut stack: Vec<Scope> = Vec::new();
    let mut pending: Option<Scope> = None;
    let mut test_attribute = false;
    let mut in_string = None;

    for line in source.lines() {
        let code = strip_literals(line, &mut in_string);
        let trimmed = code.trim();
        let mut line_context = context_of(&stack);

        if is_test_attribute(trimmed) {
            test_attribute = true;
        } else if trimmed.starts_with("#[") || trimmed.is_empty() {
            // Other attributes and comments keep a pending test attribute
        } else if let Some(is_async) = signature(trimmed) {
            pending = Some(Scope::Function {
                is_async,
                test: test_attribute,
            });
            test_attribute = false;
        } else if trimmed.starts_with("mod ") || trimmed.starts_with("pub mod ") {
            if test_attribute {
                pending = Some(Scope::TestModule);
            }
            test_attribute = false;
        } else {
            test_attribute = false;
        }

        for (idx, ch) in code.char_indices() {
            match ch {
                '{' => {
                    let scope = pending.take().unwrap_or_else(|| {
                        let before = code[..idx].trim_end();
                        if before.ends_with("async") || before.ends_with("async move") {
                            Scope::Function {
                                is_async: true,
                                test: false,
                            }
                        } else {
                            Scope::Block
                        }
                    });
                    stack.push(scope);
                    let deeper = context_of(&stack);
                    line_context = LineContext {
                        in_test: line_context.in_test || deeper.in_test,
                        ..deeper
                    };
                }
                '}' => {
                    stack.pop();
                }
                // Declaration without a body (`fn f();`, `mod m;`)
                ';' => pending = None,
                _ => {}
            }
        }

        contexts.push(line_context);
    }

    contexts
}

/// A rule violation at a source location
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File, relative to the workspace root
    pub file: String,
    /// 1-based line number
    pub line: usize,
    /// Offending source line, trimmed
    pub code: String,
    /// What the rule matched
    pub rule: &'static str,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} [{}] {}", self.file, self.line, self.rule, self.code)
    }
}

/// Path relative to the workspace root, for messages
#[must_use]
pub fn display_path(path: &Path) -> String {
    let root = workspace_root();
    path.strip_prefix(&root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_and_sync_functions() {
        let source = "\
pub fn load() {
    read();
}

pub(crate) async fn fetch() {
    get().await;
}
";
        let ctx = analyze(source);
        assert!(ctx[1].in_function && !ctx[1].in_async);
        assert!(ctx[5].in_async);
        assert!(!ctx[3].in_function);
    }

    #[test]
    fn test_cfg_test_module_is_test_code() {
        let source = "\
fn real() {}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_thing() {
        work().await;
    }
}
";
        let ctx = analyze(source);
        assert!(!ctx[0].in_test);
        assert!(ctx[6].in_test && ctx[6].in_async);
    }

    #[test]
    fn test_async_block_inside_sync_function() {
        let source = "\
fn spawn_it() {
    tokio::spawn(async move {
        go().await;
    });
}
";
        let ctx = analyze(source);
        assert!(!ctx[0].in_async);
        assert!(ctx[2].in_async);
    }

    #[test]
    fn test_braces_in_literals_are_ignored() {
        let source = "\
fn fmt() {
    let s = format!(\"{{ {x}\");
    let c = '{';
}
fn after() {
    ok();
}
";
        let ctx = analyze(source);
        assert!(ctx[5].in_function);
        assert!(!ctx[5].in_async);
    }

    #[test]
    fn test_trait_declaration_does_not_open_scope() {
        let source = "\
trait Check {
    async fn check(&self) -> bool;
    fn name(&self) -> &str;
}
fn plain() {
    x();
}
";
        let ctx = analyze(source);
        assert!(ctx[5].in_function && !ctx[5].in_async);
    }
}
