//! 研究工作流提示词
//!
//! 每个阶段一个模板，`{name}` 占位符在渲染时替换；未提供的占位符原样保留。
//! 可通过覆盖目录中的 `<name>.txt` 替换内置模板。

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// 模板种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Clarify,
    ClarifySearch,
    Analyze,
    Discover,
    ExtractEntities,
    Plan,
    BriefFromPlan,
    BriefFromDiscovery,
    Researcher,
    Compress,
    Review,
    FinalReport,
}

impl PromptKind {
    pub const ALL: [PromptKind; 12] = [
        PromptKind::Clarify,
        PromptKind::ClarifySearch,
        PromptKind::Analyze,
        PromptKind::Discover,
        PromptKind::ExtractEntities,
        PromptKind::Plan,
        PromptKind::BriefFromPlan,
        PromptKind::BriefFromDiscovery,
        PromptKind::Researcher,
        PromptKind::Compress,
        PromptKind::Review,
        PromptKind::FinalReport,
    ];

    /// 覆盖文件名（不含扩展名）
    pub fn name(self) -> &'static str {
        match self {
            PromptKind::Clarify => "clarify",
            PromptKind::ClarifySearch => "clarify_search",
            PromptKind::Analyze => "analyze",
            PromptKind::Discover => "discover",
            PromptKind::ExtractEntities => "extract_entities",
            PromptKind::Plan => "plan",
            PromptKind::BriefFromPlan => "brief_from_plan",
            PromptKind::BriefFromDiscovery => "brief_from_discovery",
            PromptKind::Researcher => "researcher",
            PromptKind::Compress => "compress",
            PromptKind::Review => "review",
            PromptKind::FinalReport => "final_report",
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            PromptKind::Clarify => CLARIFY,
            PromptKind::ClarifySearch => CLARIFY_SEARCH,
            PromptKind::Analyze => ANALYZE,
            PromptKind::Discover => DISCOVER,
            PromptKind::ExtractEntities => EXTRACT_ENTITIES,
            PromptKind::Plan => PLAN,
            PromptKind::BriefFromPlan => BRIEF_FROM_PLAN,
            PromptKind::BriefFromDiscovery => BRIEF_FROM_DISCOVERY,
            PromptKind::Researcher => RESEARCHER,
            PromptKind::Compress => COMPRESS,
            PromptKind::Review => REVIEW,
            PromptKind::FinalReport => FINAL_REPORT,
        }
    }
}

/// 提示词来源：阶段只消费渲染好的字符串
pub trait PromptSource: Send + Sync {
    fn render(&self, kind: PromptKind, vars: &[(&str, &str)]) -> String;
}

/// 内置模板，可选目录覆盖
#[derive(Debug, Default, Clone)]
pub struct BuiltinPrompts {
    overrides: HashMap<PromptKind, String>,
}

impl BuiltinPrompts {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从目录加载覆盖模板；不存在的文件使用内置版本
    pub fn with_override_dir(dir: &Path) -> Self {
        let mut overrides = HashMap::new();
        for kind in PromptKind::ALL {
            let path = dir.join(format!("{}.txt", kind.name()));
            match std::fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => {
                    tracing::debug!(path = %path.display(), "Loaded prompt override");
                    overrides.insert(kind, text);
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to read prompt override"),
            }
        }
        Self { overrides }
    }

    pub fn template(&self, kind: PromptKind) -> &str {
        self.overrides.get(&kind).map(String::as_str).unwrap_or(kind.builtin())
    }
}

impl PromptSource for BuiltinPrompts {
    fn render(&self, kind: PromptKind, vars: &[(&str, &str)]) -> String {
        fill(self.template(kind), vars)
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder regex"))
}

/// 单遍替换 `{name}` 占位符
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// 今天的日期（注入澄清、规划与报告提示词）
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

const CLARIFY: &str = r#"You are a research assistant preparing to run a deep research task. Today's date is {date}.

Conversation so far:
{messages}

{search_context}

Decide whether you need to ask the user ONE clarifying question before starting the research.
Ask only if the request is genuinely ambiguous (unclear acronym, missing time range or scope that changes the answer).
Do not ask if you have already asked a clarifying question in this conversation and the user answered it.

If you need clarification, set need_clarification=true and put the question in "question".
Otherwise set need_clarification=false and put a short confirmation of what you will research in "verification"."#;

const CLARIFY_SEARCH: &str = r#"You are helping to understand a user's research request before asking clarifying questions. Today's date is {date}.

User request:
{messages}

Use the available tools to quickly look up unfamiliar terms, products or names in the request.
When you understand the request well enough, call research_complete with a short summary of what you learned."#;

const ANALYZE: &str = r#"Analyze the following research request and classify it.

Conversation:
{messages}

query_type:
- list: the user wants an enumeration of many items (e.g. "what open-source vector databases exist")
- comparison: the user wants a comparison between named options
- deep_dive: the user wants an in-depth study of one subject
- general: anything else

output_format: table, list or prose, whichever suits the request best.
needs_discovery: true only if the items to research are not named by the user and must be found first.
discovery_target: what kind of entities to discover (empty if needs_discovery is false)."#;

const DISCOVER: &str = r#"You are in the discovery phase of a research task.

User request: {query}
Discovery target: {discovery_target}

Search broadly to enumerate as many relevant candidates as possible. Cover different categories and sources.
You have at most {max_iterations} rounds of tool calls. Call research_complete when the list is reasonably complete."#;

const EXTRACT_ENTITIES: &str = r#"Extract the discovered entities from the research notes below.

User request: {query}
Discovery target: {discovery_target}

Research notes:
{raw_content}

For every distinct entity give its name, category, a one-sentence brief, the source where it was found and a priority
(high for well-known or highly relevant entities, medium by default, low for marginal ones).
Also give a short summary, the total number found, the list of categories and a note on search coverage."#;

const PLAN: &str = r#"You are planning a research report. Today's date is {date}.

Conversation:
{messages}

Produce a research brief with a title, the research objective, the scope, and between 3 and 7 sections.
Each section needs a unique title and a description of what must be researched for it."#;

const BRIEF_FROM_PLAN: &str = r#"# {title}

## Objective
{objective}

## Scope
{scope}

## Query type
{query_type} (output format: {output_format})

## Sections
{sections_text}"#;

const BRIEF_FROM_DISCOVERY: &str = r#"# Research brief

## Original request
{original_query}

## Discovery result
{total_items} candidates found across categories: {categories_text}

## Query type
{query_type} (output format: {output_format})

## Sections
{sections_text}"#;

const RESEARCHER: &str = r#"You are a researcher responsible for ONE section of a larger report. Today's date is {date}.

Research brief:
{research_brief}

Section to research: {section_title}
What this section must cover: {section_description}

Use the tools to gather facts, figures and sources for this section only.
Use think to reflect on what is still missing. You have at most {max_tool_calls} rounds of tool calls.
When you have enough material, call research_complete."#;

const COMPRESS: &str = r#"Condense the research notes below into the content of one report section.

Section: {section_title}
Section goal: {section_description}

Research notes:
{raw_content}

Write well-organized markdown content for this section (no top-level heading), keep concrete facts and numbers,
list the source URLs you relied on, and extract the key findings."#;

const REVIEW: &str = r#"You are reviewing the coverage of a research report before it is written.

Research brief:
{research_brief}

This is review round {iteration} of at most {max_iterations}.

Sections:
{sections_summary}

For every section give its coverage status (sufficient, partial or missing) with short notes.
Give an overall score from 1 to 10, list the remaining gaps, and list the exact titles of sections that should be researched again.
Set is_sufficient=true if the report can be written as is."#;

const FINAL_REPORT: &str = r#"Write the final research report. Today's date is {date}.

Original request:
{query}

Research brief:
{research_brief}

Preferred output format: {output_format}

Research findings by section:
{gathered_info}

Write a complete, well-structured markdown report with a title, an executive summary, one part per section,
and a conclusion. Cite sources inline as links where available. Use tables where the output format asks for them."#;
