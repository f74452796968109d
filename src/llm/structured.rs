//! 结构化输出
//!
//! 用 schemars 生成目标类型的 JSON Schema 写入 system prompt，再从回复中提取 JSON 并反序列化。
//! 解码失败统一返回 ResearchError::StructuredDecode，由调用方给出自己的默认值。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::core::ResearchError;
use crate::llm::LlmClient;
use crate::memory::Message;

/// 提取 JSON 片段：优先 ```json 代码块，其次 ``` 代码块，最后取首个 `{` 到最后一个 `}`
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 返回类型 T 的 JSON Schema 字符串
pub fn schema_json<T: JsonSchema>() -> String {
    let schema = schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

fn structured_instruction<T: JsonSchema>() -> String {
    format!(
        "Respond ONLY with a single JSON object that conforms to this JSON Schema. \
         Do not add any explanation outside the JSON.\n\n{}",
        schema_json::<T>()
    )
}

/// 以结构化输出方式调用模型，messages 之前自动插入 schema 指令
pub async fn invoke_structured<T>(llm: &dyn LlmClient, messages: &[Message]) -> Result<T, ResearchError>
where
    T: DeserializeOwned + JsonSchema,
{
    let mut prompt = Vec::with_capacity(messages.len() + 1);
    prompt.push(Message::system(structured_instruction::<T>()));
    prompt.extend_from_slice(messages);

    let raw = llm.complete(&prompt).await?;
    decode_structured(&raw)
}

/// 单条 user prompt 的便捷形式；取消时立即返回 ResearchError::Cancelled，不等模型回复
pub async fn invoke_structured_prompt<T>(
    llm: &dyn LlmClient,
    prompt: &str,
    cancel: &CancellationToken,
) -> Result<T, ResearchError>
where
    T: DeserializeOwned + JsonSchema,
{
    let messages = [Message::user(prompt)];
    tokio::select! {
        _ = cancel.cancelled() => Err(ResearchError::Cancelled),
        r = invoke_structured(llm, &messages) => r,
    }
}

pub fn decode_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ResearchError> {
    let json = extract_json_block(raw)
        .ok_or_else(|| ResearchError::StructuredDecode(format!("no JSON object in output: {}", preview(raw))))?;
    serde_json::from_str(json).map_err(|e| ResearchError::StructuredDecode(format!("{}: {}", e, preview(json))))
}

fn preview(s: &str) -> String {
    s.chars().take(200).collect()
}
