//! 各阶段结构化输出类型（schemars 生成 schema 写入 prompt）

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::state::{DiscoveredItem, OutputFormat, QueryType};

/// 澄清决定
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ClarifyWithUser {
    /// 是否需要向用户提问
    pub need_clarification: bool,
    /// 要问用户的问题（need_clarification 为 true 时必填）
    #[serde(default)]
    pub question: String,
    /// 不需要澄清时，向用户确认将要研究的内容
    #[serde(default)]
    pub verification: String,
}

/// 查询分析结果
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryAnalysis {
    pub query_type: QueryType,
    pub output_format: OutputFormat,
    /// 是否需要先做探索（仅 list 类型生效）
    #[serde(default)]
    pub needs_discovery: bool,
    /// 要探索的实体类型
    #[serde(default)]
    pub discovery_target: String,
    #[serde(default)]
    pub reasoning: String,
}

/// 探索提取结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DiscoveryResult {
    #[serde(default)]
    pub entities: Vec<DiscoveredItem>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub total_found: usize,
    #[serde(default)]
    pub categories: Vec<String>,
    /// 搜索覆盖情况说明
    #[serde(default)]
    pub search_coverage: String,
}

/// 单个章节规划
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SectionPlan {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// 研究简报（默认规划路径）
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResearchBrief {
    pub title: String,
    #[serde(default)]
    pub objective: String,
    /// 3 到 7 个章节
    pub sections: Vec<SectionPlan>,
    #[serde(default)]
    pub scope: String,
}

/// 章节压缩结果
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SectionContent {
    #[serde(default)]
    pub title: String,
    /// 章节正文（markdown，不含一级标题）
    pub content: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
}

/// 章节覆盖度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CoverageStatus {
    Sufficient,
    Partial,
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SectionCoverage {
    pub title: String,
    pub status: CoverageStatus,
    #[serde(default)]
    pub notes: String,
}

/// 评审结果
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReviewResult {
    pub is_sufficient: bool,
    /// 1 到 10
    #[serde(default)]
    pub overall_score: u8,
    #[serde(default)]
    pub section_coverage: Vec<SectionCoverage>,
    #[serde(default)]
    pub gaps: Vec<String>,
    /// 需要重新研究的章节标题（必须与现有标题完全一致）
    #[serde(default)]
    pub sections_to_retry: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}
