//! Summarizing：把本轮结果组织成自然语言回复
//!
//! 逐个列出动作结局（成功 / 拒绝 / 失败 / 跳过）与返回值，涉及的研究的最终状态，
//! 修订号变化，以及（如有）漂移校正与重新同步建议。

use std::collections::BTreeSet;

use crate::actions::{ActionResult, ActionStatus};
use crate::snapshot::ModelSnapshot;

/// 组织回复所需的输入
#[derive(Debug, Clone, Copy)]
pub struct TurnSummary<'a> {
    pub reply: Option<&'a str>,
    pub results: &'a [ActionResult],
    pub snapshot: &'a ModelSnapshot,
    pub revision_before: u64,
    pub revision_after: u64,
    /// 自动重新同步时校正的差异
    pub corrections: &'a [String],
    /// 无法自动校正的漂移
    pub drift: Option<&'a str>,
}

fn status_tag(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Succeeded => "ok",
        ActionStatus::FailedValidation => "rejected",
        ActionStatus::FailedExecution => "failed",
        ActionStatus::Skipped => "skipped",
    }
}

/// 单个结果的一行描述
pub fn describe_result(result: &ActionResult) -> String {
    let detail = match result.status {
        ActionStatus::Succeeded => match (&result.message, &result.value) {
            (Some(m), _) => m.clone(),
            (None, Some(v)) => format!("= {v}"),
            (None, None) => "done".to_string(),
        },
        _ => result.error.clone().unwrap_or_else(|| "no detail".to_string()),
    };
    let mut line = format!("- [{}] {}: {}", status_tag(result.status), result.label, detail);
    if result.attempts > 1 {
        line.push_str(&format!(" (after {} attempts)", result.attempts));
    }
    line
}

pub fn narrate(summary: &TurnSummary<'_>) -> String {
    let mut out = Vec::new();
    if let Some(reply) = summary.reply.map(str::trim).filter(|r| !r.is_empty()) {
        out.push(reply.to_string());
    }
    if summary.results.is_empty() {
        return out.join("\n");
    }

    let ok = summary.results.iter().filter(|r| r.is_success()).count();
    let total = summary.results.len();
    out.push(if ok == total {
        format!("Completed {total} action(s):")
    } else if ok == 0 {
        format!("None of the {total} action(s) succeeded:")
    } else {
        format!("{ok} of {total} action(s) succeeded; the rest were not applied:")
    });
    out.extend(summary.results.iter().map(describe_result));

    let studies: BTreeSet<&str> = summary
        .results
        .iter()
        .filter(|r| r.action == "solve_study" || r.action == "clear_solution")
        .filter_map(|r| r.study.as_deref())
        .collect();
    for study in studies {
        if let Some(status) = summary.snapshot.study_status(study) {
            out.push(format!("{study} is now: {status}."));
        }
    }

    let delta = summary.revision_after.saturating_sub(summary.revision_before);
    out.push(format!(
        "Model revision: {} (+{} this turn).",
        summary.revision_after, delta
    ));

    if !summary.corrections.is_empty() {
        out.push(format!(
            "The tracked model state was re-synchronised with the live session: {}.",
            summary.corrections.join("; ")
        ));
    }
    if let Some(drift) = summary.drift {
        out.push(format!(
            "Warning: the live model may differ from what I am tracking ({drift}). Run /resync to re-synchronise before continuing."
        ));
    }
    out.join("\n")
}
