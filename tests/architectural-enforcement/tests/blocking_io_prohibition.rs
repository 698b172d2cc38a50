//! Architectural Enforcement: Blocking I/O Prohibition
//!
//! Async code must not block the runtime. Every stream session, the run
//! supervisor and the CLI update loop share one executor; a blocking call in
//! any of them stalls all the others.
//!
//! ## Prohibited in async functions
//!
//! - `std::fs::` (use `tokio::fs`)
//! - `std::net::` (use `tokio::net`)
//! - `std::process::Command` (use `tokio::process::Command`)
//! - `reqwest::blocking` (use async `reqwest`)
//! - `std::thread::sleep` (use `tokio::time`)
//! - `std::io::stdin` / `std::io::stdout` (use `tokio::io`)
//!
//! ## Allowed
//!
//! - Non-async functions (configuration is loaded before the runtime starts)
//! - Test code

use architectural_enforcement::{analyze, display_path, rust_sources, Violation};

const PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "blocking filesystem"),
    ("std::net::", "blocking network"),
    ("std::process::Command", "blocking process"),
    ("reqwest::blocking", "blocking http"),
    ("std::thread::sleep", "thread sleep"),
    ("std::io::stdin", "blocking stdin"),
    ("std::io::stdout", "blocking stdout"),
];

fn scan(file: &str, source: &str) -> Vec<Violation> {
    let contexts = analyze(source);
    let mut violations = Vec::new();

    for (idx, (line, ctx)) in source.lines().zip(contexts).enumerate() {
        if ctx.in_test || !ctx.in_async {
            continue;
        }
        let trimmed = line.trim();
        if trimmed.starts_with("//") {
            continue;
        }
        for &(pattern, rule) in PATTERNS {
            if trimmed.contains(pattern) {
                violations.push(Violation {
                    file: file.to_string(),
                    line: idx + 1,
                    code: trimmed.to_string(),
                    rule,
                });
            }
        }
    }

    violations
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let mut violations = Vec::new();

    for path in rust_sources() {
        let source = std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
        violations.extend(scan(&display_path(&path), &source));
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking I/O in async code:\n");
        for violation in &violations {
            eprintln!("   {violation}");
        }
        eprintln!("\nUse the tokio equivalents, or move the call out of async code.\n");
        panic!("{} blocking I/O violation(s)", violations.len());
    }
}

#[test]
fn test_detects_blocking_read_in_async_fn() {
    let source = "\
pub async fn load(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}
";
    let violations = scan("x.rs", source);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].line, 2);
    assert_eq!(violations[0].rule, "blocking filesystem");
}

#[test]
fn test_sync_function_is_allowed() {
    let source = "\
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<Config, Error> {
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}

async fn later() {
    work().await;
}
";
    assert!(scan("x.rs", source).is_empty());
}

#[test]
fn test_test_module_is_exempt() {
    let source = "\
#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_reads_fixture() {
        let text = std::fs::read_to_string(\"fixture.toml\").unwrap();
        check(&text).await;
    }
}
";
    assert!(scan("x.rs", source).is_empty());
}

#[test]
fn test_async_block_in_sync_function_is_checked() {
    let source = "\
fn spawn_reader() {
    tokio::spawn(async move {
        let _ = std::fs::read(\"data\");
    });
}
";
    assert_eq!(scan("x.rs", source).len(), 1);
}
