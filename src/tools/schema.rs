//! 工具参数 JSON Schema 生成（schemars）
//!
//! 工具用一个参数结构体描述入参，既用于生成传给模型的 schema，也用于反序列化 args。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 返回参数类型 T 的 JSON Schema（serde_json::Value）
pub fn args_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 将模型给出的 args 解析为参数结构体
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments for {tool}: {e}"))
}
