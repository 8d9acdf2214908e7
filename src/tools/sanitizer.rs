//! Argument Sanitizer：把 "filepath" 参数限制在数据目录下
//!
//! 不拒绝调用，只改写路径：去掉一个前导分隔符，不以 `data/` 开头则补上。

use serde_json::{Map, Value};

/// 需要改写的参数名
pub const FILEPATH_KEY: &str = "filepath";

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone)]
pub struct ArgumentSanitizer {
    data_dir: String,
}

impl Default for ArgumentSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

impl ArgumentSanitizer {
    pub fn new(data_dir: impl Into<String>) -> Self {
        let data_dir: String = data_dir.into();
        Self {
            data_dir: data_dir.trim_end_matches(|c: char| c == '/' || c == '\\').to_string(),
        }
    }

    pub fn data_dir(&self) -> &str {
        &self.data_dir
    }

    /// 改写单个路径
    pub fn sanitize_path(&self, raw: &str) -> String {
        let relative = raw
            .strip_prefix(|c: char| c == '/' || c == '\\')
            .unwrap_or(raw);
        let prefix = format!("{}/", self.data_dir);
        if relative.starts_with(&prefix) {
            relative.to_string()
        } else {
            format!("{}/{}", self.data_dir, relative)
        }
    }

    /// 返回改写后的参数副本；只动字符串类型的 "filepath"，其余键原样保留
    pub fn sanitize(&self, arguments: &Map<String, Value>) -> Map<String, Value> {
        let mut out = arguments.clone();
        if let Some(Value::String(path)) = out.get_mut(FILEPATH_KEY) {
            let rewritten = self.sanitize_path(path);
            if rewritten != *path {
                tracing::debug!(from = %path, to = %rewritten, "filepath confined to data dir");
                *path = rewritten;
            }
        }
        out
    }
}
