use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Knobs for one compilation. Loadable from RON, e.g.
/// `(code_origin: 0x8000, collect_trace: false)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompileOptions {
    /// Code section base when no `section code at ..` directive sets one.
    #[serde(default)]
    pub code_origin: u16,
    #[serde(default = "default_true")]
    pub collect_trace: bool,
    #[serde(default = "default_true")]
    pub collect_segments: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            code_origin: 0,
            collect_trace: true,
            collect_segments: true,
        }
    }
}

impl CompileOptions {
    pub fn from_ron_str(text: &str) -> Result<Self> {
        ron::from_str(text).context("failed to parse compile options")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read compile options '{}'", path.display()))?;
        Self::from_ron_str(&text)
            .with_context(|| format!("invalid compile options in '{}'", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let options = CompileOptions::from_ron_str("(code_origin: 0x8000)").expect("parse");
        assert_eq!(options.code_origin, 0x8000);
        assert!(options.collect_trace);
        assert!(options.collect_segments);
    }

    #[test]
    fn empty_struct_matches_default() {
        let options = CompileOptions::from_ron_str("()").expect("parse");
        assert_eq!(options, CompileOptions::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = CompileOptions::from_ron_str("(origin: 1)").expect_err("should fail");
        assert!(error.to_string().contains("failed to parse compile options"));
    }
}
