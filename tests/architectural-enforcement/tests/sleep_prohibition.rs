//! Architectural Enforcement: Sleep Prohibition
//!
//! Sessions wait on events (chunks, cancellation tokens, deadlines), never on
//! fixed sleeps. A sleep in the streaming path delays every chunk behind it
//! and makes cancellation lag by the sleep duration.
//!
//! ## Allowed
//!
//! - Exponential backoff in retry loops
//! - `tokio::time::interval` ticks for periodic work
//! - Test code

use architectural_enforcement::{analyze, display_path, rust_sources, Violation};

fn is_sleep_call(line: &str) -> bool {
    line.contains("::sleep(") || line.contains(".sleep(") || line.trim_start().starts_with("sleep(")
}

/// Backoff needs both a growing delay and a retry context nearby
fn is_backoff_context(lines: &[&str], idx: usize) -> bool {
    let start = idx.saturating_sub(10);
    let end = (idx + 3).min(lines.len());
    let window: Vec<String> = lines[start..end].iter().map(|l| l.to_lowercase()).collect();

    let growing = window
        .iter()
        .any(|l| l.contains("<<") || l.contains("pow") || l.contains("* 2"));
    let retrying = window.iter().any(|l| {
        l.contains("retry") || l.contains("reconnect") || l.contains("backoff") || l.contains("attempt")
    });

    growing && retrying
}

fn is_interval_pattern(lines: &[&str], idx: usize) -> bool {
    let start = idx.saturating_sub(20);
    let end = (idx + 5).min(lines.len());
    lines[start..end]
        .iter()
        .any(|l| l.contains("interval.tick()") || l.contains("tokio::time::interval"))
}

fn scan(file: &str, source: &str) -> Vec<Violation> {
    let lines: Vec<&str> = source.lines().collect();
    let contexts = analyze(source);
    let mut violations = Vec::new();

    for (idx, (line, ctx)) in lines.iter().zip(contexts).enumerate() {
        let trimmed = line.trim();
        if ctx.in_test || trimmed.starts_with("//") || !is_sleep_call(trimmed) {
            continue;
        }
        if is_backoff_context(&lines, idx) || is_interval_pattern(&lines, idx) {
            continue;
        }
        violations.push(Violation {
            file: file.to_string(),
            line: idx + 1,
            code: trimmed.to_string(),
            rule: "sleep",
        });
    }

    violations
}

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for path in rust_sources() {
        let source = std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
        violations.extend(scan(&display_path(&path), &source));
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls in production code:\n");
        for violation in &violations {
            eprintln!("   {violation}");
        }
        eprintln!("\nWait on a channel, token, or deadline instead.\n");
        panic!("{} sleep violation(s)", violations.len());
    }
}

#[test]
fn test_detects_plain_sleep() {
    let source = "\
async fn pace() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
";
    assert_eq!(scan("x.rs", source).len(), 1);
}

#[test]
fn test_backoff_is_allowed() {
    let source = "\
async fn reconnect() {
    for attempt in 0..5 {
        let delay = base_delay * (1 << attempt);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
";
    assert!(scan("x.rs", source).is_empty());
}

#[test]
fn test_sleep_in_tests_is_allowed() {
    let source = "\
#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_slow() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
";
    assert!(scan("x.rs", source).is_empty());
}
