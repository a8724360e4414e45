//! Tool-access preamble prepended to user code
//!
//! The auth token never appears in the generated source. It reaches the
//! interpreter as an environment variable, which the preamble moves into a
//! constant and then deletes so that child processes cannot inherit it.

use handlebars::Handlebars;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::sandbox::AUTH_TOKEN_ENV;

const TEMPLATE_NAME: &str = "preamble";

const TEMPLATE: &str = r#"// Tool access
const __TOKEN__ = process.env.{{auth_env}} ?? '';
delete process.env.{{auth_env}};
const __TOOLS__ = new Set({{{tools_json}}});

async function callInternalTool(name, params) {
  if (!__TOOLS__.has(name)) {
    throw new Error(`Tool not found: ${name}`);
  }
  throw new Error(`Tool ${name} is not reachable from the sandbox network`);
}

"#;

#[derive(Serialize)]
struct PreambleData<'a> {
    auth_env: &'a str,
    tools_json: String,
}

/// Renders the preamble for a set of tool names
pub struct Preamble {
    registry: Handlebars<'static>,
}

impl std::fmt::Debug for Preamble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preamble").finish_non_exhaustive()
    }
}

impl Preamble {
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry
            .register_template_string(TEMPLATE_NAME, TEMPLATE)
            .map_err(|e| Error::Internal(format!("Invalid preamble template: {}", e)))?;

        Ok(Preamble { registry })
    }

    /// Preamble text only
    pub fn render(&self, tool_names: &[String]) -> Result<String> {
        // JSON string literals are valid JavaScript string literals
        let data = PreambleData {
            auth_env: AUTH_TOKEN_ENV,
            tools_json: serde_json::to_string(tool_names)?,
        };

        self.registry
            .render(TEMPLATE_NAME, &data)
            .map_err(|e| Error::Internal(format!("Preamble render error: {}", e)))
    }

    /// Preamble followed by `code`
    pub fn inject(&self, code: &str, tool_names: &[String]) -> Result<String> {
        let mut source = self.render(tool_names)?;
        source.push_str(code);
        source.push('\n');
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_lists_tools_and_reads_env() {
        let preamble = Preamble::new().unwrap();
        let text = preamble
            .render(&["getTasks".to_string(), "createTask".to_string()])
            .unwrap();

        assert!(text.contains(r#"new Set(["getTasks","createTask"])"#));
        assert!(text.contains("process.env.EXECBOX_AUTH_TOKEN ?? ''"));
        assert!(text.contains("delete process.env.EXECBOX_AUTH_TOKEN;"));
        assert!(text.contains("Tool not found: ${name}"));
    }

    #[test]
    fn test_inject_keeps_code_after_preamble() {
        let preamble = Preamble::new().unwrap();
        let source = preamble.inject("console.log('hi')", &[]).unwrap();

        assert!(source.contains("new Set([])"));
        assert!(source.ends_with("console.log('hi')\n"));
    }

    #[test]
    fn test_tool_names_are_escaped() {
        let preamble = Preamble::new().unwrap();
        let text = preamble.render(&[r#"a"b"#.to_string()]).unwrap();
        assert!(text.contains(r#"["a\"b"]"#));
    }
}
