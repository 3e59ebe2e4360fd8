//! Minimal Graphviz DOT text builder.

use std::fmt::Write;

/// Accumulates statements of a `digraph` and renders them as DOT text
#[derive(Debug, Clone)]
pub struct DotGraph {
    name: String,
    body: String,
    indent: usize,
}

impl DotGraph {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            body: String::new(),
            indent: 1,
        }
    }

    /// Raw statement, written on its own line with a trailing `;`
    pub fn statement(&mut self, stmt: &str) -> &mut Self {
        let _ = writeln!(self.body, "{}{};", "  ".repeat(self.indent), stmt);
        self
    }

    pub fn node(&mut self, id: &str, attrs: &[(&str, &str)]) -> &mut Self {
        let stmt = format!("{}{}", quote(id), format_attrs(attrs));
        self.statement(&stmt)
    }

    pub fn edge(&mut self, from: &str, to: &str, attrs: &[(&str, &str)]) -> &mut Self {
        let stmt = format!("{} -> {}{}", quote(from), quote(to), format_attrs(attrs));
        self.statement(&stmt)
    }

    /// Open a `subgraph` block; close it with [`DotGraph::end_subgraph`]
    pub fn begin_subgraph(&mut self, name: &str) -> &mut Self {
        let _ = writeln!(self.body, "{}subgraph {} {{", "  ".repeat(self.indent), quote(name));
        self.indent += 1;
        self
    }

    pub fn end_subgraph(&mut self) -> &mut Self {
        self.indent = self.indent.saturating_sub(1).max(1);
        let _ = writeln!(self.body, "{}}}", "  ".repeat(self.indent));
        self
    }

    pub fn render(&self) -> String {
        format!("digraph {} {{\n{}}}\n", quote(&self.name), self.body)
    }
}

fn quote(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\\\""))
}

fn format_attrs(attrs: &[(&str, &str)]) -> String {
    if attrs.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = attrs
        .iter()
        .map(|(k, v)| format!("{k}={}", quote(v)))
        .collect();
    format!(" [{}]", parts.join(", "))
}
