//! Tool registry the assistant consults while answering.
use std::sync::Arc;
use tracing::debug;

use carassist_hybrid::KnowledgeBase;

pub const KNOWLEDGE_TOOL_NAME: &str = "PDF_Knowledge_Base";

const KNOWLEDGE_TOOL_DESCRIPTION: &str = "Use this tool ONLY for structured, text-based automotive knowledge. \
Best for car maintenance guides and step-by-step instructions, troubleshooting and repair manuals, \
technical specifications, features and comparisons, general automotive knowledge and how things work, \
and safety tips. Do NOT use it for videos, visual demonstrations, prices, news or dealerships. \
Input: a clear technical or how-to question.";

/// A callable tool: text in, text out. Tools report failures as text.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn call(&self, input: &str) -> String;
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self { Self::default() }

    /// Register `tool`, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn call(&self, name: &str, input: &str) -> Option<String> {
        let tool = self.get(name)?;
        debug!(tool = name, input, "calling tool");
        Some(tool.call(input))
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// `name: description` lines for prompting.
    pub fn describe(&self) -> String {
        self.tools.iter().map(|t| format!("{}: {}", t.name(), t.description())).collect::<Vec<_>>().join("\n")
    }

    pub fn is_empty(&self) -> bool { self.tools.is_empty() }
}

/// The knowledge search service exposed as a tool.
pub struct KnowledgeTool {
    knowledge: Arc<KnowledgeBase>,
}

impl KnowledgeTool {
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Self { Self { knowledge } }
}

impl Tool for KnowledgeTool {
    fn name(&self) -> &str { KNOWLEDGE_TOOL_NAME }
    fn description(&self) -> &str { KNOWLEDGE_TOOL_DESCRIPTION }
    fn call(&self, input: &str) -> String { self.knowledge.search_pdf_knowledge(input) }
}
