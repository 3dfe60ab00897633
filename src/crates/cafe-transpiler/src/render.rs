//! Flow graph visualization
//!
//! Renders a [`FlowGraph`] to Mermaid or DOT for debugging and
//! documentation. Purely cosmetic: nothing here feeds back into analysis or
//! lowering.
//!
//! # Example
//!
//! ```rust
//! use cafe_core::builder::FlowGraphBuilder;
//! use cafe_core::model::{ActionData, NodeData, TriggerData};
//! use cafe_transpiler::render::{render, RenderOptions};
//!
//! let graph = FlowGraphBuilder::new("demo")
//!     .node("t1", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
//!     .node("a1", 0.0, 1.0, NodeData::Action(ActionData::default()))
//!     .edge("e1", "t1", "a1")
//!     .build();
//!
//! let mermaid = render(&graph, &RenderOptions::mermaid());
//! assert!(mermaid.starts_with("flowchart TD"));
//! ```

use cafe_core::model::{FlowGraph, NodeKind};

/// Output format for [`render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderFormat {
    #[default]
    Mermaid,
    Dot,
}

/// Rendering configuration.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub format: RenderFormat,
    pub title: Option<String>,
}

impl RenderOptions {
    pub fn mermaid() -> Self {
        Self {
            format: RenderFormat::Mermaid,
            title: None,
        }
    }

    pub fn dot() -> Self {
        Self {
            format: RenderFormat::Dot,
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Render the graph in the requested format.
pub fn render(graph: &FlowGraph, options: &RenderOptions) -> String {
    match options.format {
        RenderFormat::Mermaid => render_mermaid(graph, options),
        RenderFormat::Dot => render_dot(graph, options),
    }
}

fn label(graph: &FlowGraph, id: &str) -> String {
    graph
        .node(id)
        .and_then(|n| n.data.alias().map(str::to_string))
        .unwrap_or_else(|| id.to_string())
}

fn safe_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn render_mermaid(graph: &FlowGraph, options: &RenderOptions) -> String {
    let mut out = String::new();
    if let Some(title) = &options.title {
        out.push_str(&format!("---\ntitle: {title}\n---\n"));
    }
    out.push_str("flowchart TD\n");

    for node in &graph.nodes {
        let id = safe_id(&node.id);
        let text = label(graph, &node.id).replace('"', "'");
        match node.data.kind() {
            NodeKind::Condition => out.push_str(&format!("    {id}{{\"{text}\"}}\n")),
            NodeKind::Trigger => out.push_str(&format!("    {id}([\"{text}\"])\n")),
            _ => out.push_str(&format!("    {id}[\"{text}\"]\n")),
        }
    }

    for edge in &graph.edges {
        let source = safe_id(&edge.source);
        let target = safe_id(&edge.target);
        match edge.source_handle {
            Some(handle) => {
                out.push_str(&format!("    {source} -->|{}| {target}\n", handle.as_str()))
            }
            None => out.push_str(&format!("    {source} --> {target}\n")),
        }
    }

    out
}

fn render_dot(graph: &FlowGraph, options: &RenderOptions) -> String {
    let name = options.title.as_deref().unwrap_or("flow");
    let mut out = format!("digraph \"{name}\" {{\n");
    out.push_str("    rankdir=TB;\n");

    for node in &graph.nodes {
        let id = safe_id(&node.id);
        let text = label(graph, &node.id).replace('"', "'");
        let shape = match node.data.kind() {
            NodeKind::Condition => "diamond",
            NodeKind::Trigger => "ellipse",
            _ => "box",
        };
        out.push_str(&format!("    {id} [label=\"{text}\", shape={shape}];\n"));
    }

    for edge in &graph.edges {
        let source = safe_id(&edge.source);
        let target = safe_id(&edge.target);
        match edge.source_handle {
            Some(handle) => out.push_str(&format!(
                "    {source} -> {target} [label=\"{}\"];\n",
                handle.as_str()
            )),
            None => out.push_str(&format!("    {source} -> {target};\n")),
        }
    }

    out.push_str("}\n");
    out
}
