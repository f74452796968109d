//! 汇总：并行章节全部返回后记录覆盖情况，进入评审。章节合并本身由 reducer 完成。

use crate::core::state::{ResearchState, StateUpdate};
use crate::research::{Stage, StageOutcome};

pub fn run(state: &ResearchState) -> StageOutcome {
    let completed = state.completed_count();
    let total = state.sections.len();
    if completed < total {
        let missing: Vec<_> = state
            .sections
            .iter()
            .filter(|s| !s.is_completed())
            .map(|s| s.title.as_str())
            .collect();
        tracing::warn!(thread_id = %state.thread_id, completed, total, missing = ?missing, "Some sections are not completed");
    } else {
        tracing::info!(thread_id = %state.thread_id, completed, total, "All sections completed");
    }
    StageOutcome::goto(Stage::Review, StateUpdate::default())
}
