//! 沙箱文件读取
//!
//! SafeFs 绑定工作目录与其下的数据目录，所有路径经 resolve 校验必须落在数据目录内（禁止 ../ 逃逸）。
//! ReadFileTool 的参数名为 "filepath"，与 Argument Sanitizer 的改写约定一致。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::registry::schema_of;
use crate::tools::Tool;

/// 沙箱文件系统：相对 workspace 解析路径，结果必须位于 workspace/data_dir 下
#[derive(Debug, Clone)]
pub struct SafeFs {
    workspace: PathBuf,
    data_dir: PathBuf,
}

impl SafeFs {
    pub fn new(workspace: impl AsRef<Path>, data_dir: impl AsRef<Path>) -> Self {
        let root = workspace.as_ref().to_path_buf();
        let workspace = root.canonicalize().unwrap_or(root);
        let data_dir = workspace.join(data_dir);
        Self {
            workspace,
            data_dir,
        }
    }

    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim_start_matches("./");
        let canonical = self
            .workspace
            .join(path)
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {}", path)))?;
        let jail = self
            .data_dir
            .canonicalize()
            .unwrap_or_else(|_| self.data_dir.clone());
        if canonical.starts_with(jail) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string()))
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))
    }
}

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct ReadFileArgs {
    /// 数据目录下的文件路径，如 data/real_crypto_2024.csv
    filepath: String,
}

/// 读取数据目录下的文本文件，超长时截断
pub struct ReadFileTool {
    fs: SafeFs,
    max_chars: usize,
}

impl ReadFileTool {
    pub fn new(workspace: impl AsRef<Path>, data_dir: impl AsRef<Path>, max_chars: usize) -> Self {
        Self {
            fs: SafeFs::new(workspace, data_dir),
            max_chars,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file (e.g. a CSV) from the data directory."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ReadFileArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args
            .get("filepath")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing required argument: filepath".to_string())?;
        tracing::info!(path = %path, "read_file tool execute");
        let content = self.fs.read_file(path).map_err(|e| e.to_string())?;
        if content.chars().count() > self.max_chars {
            let head: String = content.chars().take(self.max_chars).collect();
            Ok(format!("{}\n...(truncated)", head))
        } else {
            Ok(content)
        }
    }
}
