//! 进程内执行端：把 ToolRegistry 暴露为 ExecutionSession

use async_trait::async_trait;
use serde_json::Value;

use crate::session::{ExecutionSession, SessionError, ToolDescriptor};
use crate::tools::ToolRegistry;

pub struct LocalSession {
    registry: ToolRegistry,
}

impl LocalSession {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ExecutionSession for LocalSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        Ok(self.registry.descriptors())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, SessionError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| SessionError::UnknownTool(name.to_string()))?;
        tool.execute(arguments).await.map_err(SessionError::ToolReported)
    }
}
