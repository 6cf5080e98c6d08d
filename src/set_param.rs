//! Output parameter extraction.
//!
//! Scripts feed values back into the run by printing markers on stdout:
//!
//! ```text
//! :::setParam CLUSTER_ID="aks-1234"
//! ```
//!
//! `NAME` matches `[A-Za-z_]+`; `VALUE` runs up to the next unescaped double
//! quote on the same line. Inside `VALUE`, `\"` stands for `"` and `\\` for
//! `\`; any other backslash is kept as written. Markers may appear anywhere in
//! the output, several per line, and are applied in order of appearance.

use regex::Regex;
use std::sync::LazyLock;

use crate::action_runner::ActionOutput;

/// Source of parameters produced by a finished action
pub trait ParamChannel {
    /// Name/value pairs in the order they should be applied
    fn extract(&self, output: &ActionOutput) -> Vec<(String, String)>;
}

/// Reads `:::setParam NAME="VALUE"` markers from captured stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerChannel;

impl ParamChannel for MarkerChannel {
    fn extract(&self, output: &ActionOutput) -> Vec<(String, String)> {
        extract(&output.stdout)
    }
}

/// `:::setParam NAME="VALUE"`, VALUE stopping at the first unescaped quote
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#":::setParam ([A-Za-z_]+)="((?:[^"\\\n]|\\.)*)""#).unwrap()
});

/// Every `:::setParam` marker in `stdout`, in order of appearance.
pub fn extract(stdout: &str) -> Vec<(String, String)> {
    MARKER_RE
        .captures_iter(stdout)
        .map(|caps| (caps[1].to_string(), unescape(&caps[2])))
        .collect()
}

/// Resolve `\"` and `\\`; other escapes pass through untouched
fn unescape(raw: &str) -> String {
    let mut value = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some(next @ ('"' | '\\')) => value.push(next),
            Some(other) => {
                value.push('\\');
                value.push(other);
            }
            None => value.push('\\'),
        }
    }
    value
}
