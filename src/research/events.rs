//! 研究过程事件：供传输层（CLI / WebSocket）展示进度

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 单个进度事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    /// 进入某个阶段
    StageStarted { stage: String },
    /// 需要用户回答澄清问题，运行已挂起
    ClarificationRequested { question: String },
    /// 规划完成，列出章节标题
    PlanReady { sections: Vec<String> },
    /// 章节任务已派发
    SectionDispatched { title: String },
    /// 工具调用（参数预览）
    ToolCall { section: Option<String>, tool: String, args_preview: String },
    /// 章节完成
    SectionCompleted { title: String, sources: usize },
    /// 评审结论
    ReviewDecision {
        iteration: u32,
        sufficient: bool,
        score: u8,
        retry: Vec<String>,
    },
    /// 最终报告已生成
    ReportReady { chars: usize },
    Error { text: String },
}

/// 事件发送器；接收端关闭时静默丢弃
pub type EventSender = UnboundedSender<ResearchEvent>;

pub(crate) fn send_event(tx: &Option<EventSender>, ev: ResearchEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
