use serde_json::Value;
use std::collections::HashMap;

mod compile;

pub use compile::CompileTestContract;

pub type ToolResult = Result<Value, String>;

pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> Value;
    fn call(&self, args: Value) -> ToolResult;
}

pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(list: Vec<Box<dyn Tool>>) -> Self {
        let mut tools: HashMap<&'static str, Box<dyn Tool>> = HashMap::new();

        for tool in list {
            tools.insert(tool.name(), tool);
        }

        Self { tools }
    }

    pub fn call(&self, name: &str, args: Value) -> ToolResult {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| format!("unknown tool: {}", name))?;

        tool.call(args)
    }

    pub fn schema(&self) -> Vec<Value> {
        self.tools.values().map(|t| t.schema()).collect()
    }
}
