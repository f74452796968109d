//! 研究循环的控制工具
//!
//! - research_complete：保留的完成信号，工具循环检测到即结束（不会真正经由执行器执行）
//! - think：只记录思考内容，不结束循环

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

pub const RESEARCH_COMPLETE: &str = "research_complete";
pub const THINK: &str = "think";

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct ResearchCompleteArgs {
    /// 已收集信息的简要总结
    summary: String,
    /// 对结论的信心：high / medium / low
    #[serde(default)]
    confidence: Option<String>,
}

/// 完成信号工具
pub struct ResearchCompleteTool;

#[async_trait]
impl Tool for ResearchCompleteTool {
    fn name(&self) -> &str {
        RESEARCH_COMPLETE
    }

    fn description(&self) -> &str {
        "Call this when you have gathered enough information for the current task. Args: {\"summary\": \"what you found\", \"confidence\": \"high|medium|low\"}"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ResearchCompleteArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ResearchCompleteArgs = parse_args(RESEARCH_COMPLETE, args)?;
        Ok(format!("Research marked complete: {}", args.summary))
    }
}

#[derive(Deserialize, JsonSchema)]
struct ThinkArgs {
    /// 对当前进展与下一步的思考
    thought: String,
}

/// 反思工具：把思考写回对话，不做任何外部操作
pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        THINK
    }

    fn description(&self) -> &str {
        "Record a reflection about progress, gaps and next steps. Does not end the research. Args: {\"thought\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ThinkArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ThinkArgs = parse_args(THINK, args)?;
        Ok(format!("Reflection recorded: {}", args.thought))
    }
}
