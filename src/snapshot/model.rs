//! 模型快照：编排器对外部仿真模型状态的「信念」
//!
//! 参数表、几何特征集合、物理场标签、各研究（Study）状态，以及几何/网格是否已构建。
//! StateDelta 描述一次成功动作带来的变化；StateKey 用于判断同一提案内动作之间的依赖。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 研究运行状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyStatus {
    #[default]
    NotRun,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for StudyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StudyStatus::NotRun => "not run",
            StudyStatus::Running => "running",
            StudyStatus::Completed => "completed",
            StudyStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 单个研究：状态 + 求解前必须已定义的参数
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyState {
    #[serde(default)]
    pub status: StudyStatus,
    #[serde(default)]
    pub required_parameters: BTreeSet<String>,
}

impl StudyState {
    pub fn requiring<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status: StudyStatus::NotRun,
            required_parameters: params.into_iter().map(Into::into).collect(),
        }
    }
}

/// 编排器持有的外部模型快照
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSnapshot {
    /// 参数名 -> 表达式（如 "10[mm]"）
    pub parameters: BTreeMap<String, String>,
    /// 几何特征标识
    pub features: BTreeSet<String>,
    /// 物理场接口标签（spf、ht ...）
    pub physics: BTreeSet<String>,
    pub studies: BTreeMap<String, StudyState>,
    pub geometry_built: bool,
    pub mesh_built: bool,
}

impl ModelSnapshot {
    /// 参数存在且表达式非空
    pub fn is_parameter_defined(&self, name: &str) -> bool {
        self.parameters
            .get(name)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }

    /// 指定研究尚未定义的必需参数（研究不存在时返回 None）
    pub fn undefined_parameters(&self, study: &str) -> Option<Vec<String>> {
        let state = self.studies.get(study)?;
        Some(
            state
                .required_parameters
                .iter()
                .filter(|p| !self.is_parameter_defined(p))
                .cloned()
                .collect(),
        )
    }

    pub fn study_status(&self, study: &str) -> Option<StudyStatus> {
        self.studies.get(study).map(|s| s.status)
    }

    /// 是否至少有一个已完成的研究（可用于结果评估）
    pub fn has_solution(&self) -> bool {
        self.studies
            .values()
            .any(|s| s.status == StudyStatus::Completed)
    }

    /// 合并一次成功动作的变化
    pub fn apply(&mut self, delta: &StateDelta) {
        let mut invalidated = false;
        for (name, value) in &delta.parameters {
            if self.parameters.get(name) != Some(value) {
                invalidated = true;
            }
            self.parameters.insert(name.clone(), value.clone());
        }
        for feature in &delta.removed_features {
            invalidated |= self.features.remove(feature);
        }
        for feature in &delta.added_features {
            invalidated |= self.features.insert(feature.clone());
        }
        self.physics.extend(delta.added_physics.iter().cloned());
        for (study, status) in &delta.studies {
            self.studies.entry(study.clone()).or_default().status = *status;
        }
        // 参数或特征变化后几何与网格均过期，除非本次变化显式给出
        if invalidated {
            self.geometry_built = false;
            self.mesh_built = false;
        }
        if let Some(built) = delta.geometry_built {
            self.geometry_built = built;
        }
        if let Some(built) = delta.mesh_built {
            self.mesh_built = built;
        }
    }

    /// 与另一快照逐项比较，返回可读的差异描述（reconcile 时报告漂移）
    pub fn diff(&self, other: &ModelSnapshot) -> Vec<String> {
        let mut out = Vec::new();
        let names: BTreeSet<&String> = self.parameters.keys().chain(other.parameters.keys()).collect();
        for name in names {
            match (self.parameters.get(name), other.parameters.get(name)) {
                (Some(a), Some(b)) if a != b => {
                    out.push(format!("parameter {name}: {a} -> {b}"))
                }
                (Some(a), None) => out.push(format!("parameter {name} ({a}) no longer exists")),
                (None, Some(b)) => out.push(format!("parameter {name} = {b} appeared")),
                _ => {}
            }
        }
        for f in other.features.difference(&self.features) {
            out.push(format!("feature {f} appeared"));
        }
        for f in self.features.difference(&other.features) {
            out.push(format!("feature {f} no longer exists"));
        }
        for p in other.physics.difference(&self.physics) {
            out.push(format!("physics {p} appeared"));
        }
        for p in self.physics.difference(&other.physics) {
            out.push(format!("physics {p} no longer exists"));
        }
        let studies: BTreeSet<&String> = self.studies.keys().chain(other.studies.keys()).collect();
        for study in studies {
            match (self.study_status(study), other.study_status(study)) {
                (Some(a), Some(b)) if a != b => out.push(format!("study {study}: {a} -> {b}")),
                (Some(_), None) => out.push(format!("study {study} no longer exists")),
                (None, Some(b)) => out.push(format!("study {study} ({b}) appeared")),
                _ => {}
            }
        }
        if self.geometry_built != other.geometry_built {
            out.push(format!("geometry built: {} -> {}", self.geometry_built, other.geometry_built));
        }
        if self.mesh_built != other.mesh_built {
            out.push(format!("mesh built: {} -> {}", self.mesh_built, other.mesh_built));
        }
        out
    }

    /// 供 LLM 提示词使用的模型概览
    pub fn summary(&self) -> String {
        let mut s = String::from("=== Model Overview ===\n");
        s.push_str(&format!("Geometry features: {}\n", join_or_none(&self.features)));
        s.push_str(&format!(
            "Geometry built: {}, mesh built: {}\n",
            self.geometry_built, self.mesh_built
        ));
        s.push_str(&format!("Physics: {}\n", join_or_none(&self.physics)));
        s.push_str("\n=== Parameters ===\n");
        if self.parameters.is_empty() {
            s.push_str("(none)\n");
        }
        for (name, value) in &self.parameters {
            let shown = if value.trim().is_empty() { "(undefined)" } else { value.as_str() };
            s.push_str(&format!("{name} = {shown}\n"));
        }
        s.push_str("\n=== Studies ===\n");
        if self.studies.is_empty() {
            s.push_str("(none)\n");
        }
        for (name, study) in &self.studies {
            if study.required_parameters.is_empty() {
                s.push_str(&format!("{name}: {}\n", study.status));
            } else {
                s.push_str(&format!(
                    "{name}: {} (requires {})\n",
                    study.status,
                    join_or_none(&study.required_parameters)
                ));
            }
        }
        s
    }
}

fn join_or_none(set: &BTreeSet<String>) -> String {
    if set.is_empty() {
        "(none)".to_string()
    } else {
        set.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// 一次成功动作引起的状态变化
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDelta {
    pub parameters: BTreeMap<String, String>,
    pub added_features: BTreeSet<String>,
    pub removed_features: BTreeSet<String>,
    pub added_physics: BTreeSet<String>,
    pub studies: BTreeMap<String, StudyStatus>,
    pub geometry_built: Option<bool>,
    pub mesh_built: Option<bool>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self == &StateDelta::default()
    }

    pub fn parameter(name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut d = Self::default();
        d.parameters.insert(name.into(), value.into());
        d
    }

    pub fn study(name: impl Into<String>, status: StudyStatus) -> Self {
        let mut d = Self::default();
        d.studies.insert(name.into(), status);
        d
    }
}

/// 快照中可被动作「产生」或「依赖」的字段
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Parameter(String),
    Feature(String),
    Physics(String),
    Geometry,
    Mesh,
    Study(String),
    /// 任意一个已完成研究的解
    Solution,
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKey::Parameter(p) => write!(f, "parameter {p}"),
            StateKey::Feature(x) => write!(f, "feature {x}"),
            StateKey::Physics(t) => write!(f, "physics {t}"),
            StateKey::Geometry => f.write_str("built geometry"),
            StateKey::Mesh => f.write_str("built mesh"),
            StateKey::Study(s) => write!(f, "study {s}"),
            StateKey::Solution => f.write_str("a solution"),
        }
    }
}

fn quantity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*(?:\[\s*([^\]]*?)\s*\])?\s*$")
            .expect("quantity pattern is valid")
    })
}

/// 解析 "10[mm]" / "0.5" 形式的量：返回 (数值, 单位)；表达式（如 "2*L"）返回 None
pub fn parse_quantity(expr: &str) -> Option<(f64, Option<String>)> {
    let caps = quantity_re().captures(expr)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_string())
        .filter(|u| !u.is_empty());
    Some((value, unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> ModelSnapshot {
        let mut s = ModelSnapshot::default();
        s.parameters.insert("U_in".into(), "0.1[m/s]".into());
        s.parameters.insert("L".into(), "".into());
        s.features.insert("blk1".into());
        s.studies
            .insert("Study 1".into(), StudyState::requiring(["L", "U_in"]));
        s.geometry_built = true;
        s
    }

    #[test]
    fn test_undefined_parameters() {
        let s = demo();
        assert!(!s.is_parameter_defined("L"));
        assert!(s.is_parameter_defined("U_in"));
        assert_eq!(s.undefined_parameters("Study 1"), Some(vec!["L".to_string()]));
        assert_eq!(s.undefined_parameters("Study 9"), None);
    }

    #[test]
    fn test_apply_parameter_invalidates_geometry() {
        let mut s = demo();
        s.apply(&StateDelta::parameter("L", "10[mm]"));
        assert!(s.is_parameter_defined("L"));
        assert!(!s.geometry_built);
        assert!(!s.mesh_built);
    }

    #[test]
    fn test_apply_same_value_keeps_geometry() {
        let mut s = demo();
        s.apply(&StateDelta::parameter("U_in", "0.1[m/s]"));
        assert!(s.geometry_built);
    }

    #[test]
    fn test_apply_study_status() {
        let mut s = demo();
        s.apply(&StateDelta::study("Study 1", StudyStatus::Completed));
        assert_eq!(s.study_status("Study 1"), Some(StudyStatus::Completed));
        assert!(s.has_solution());
        // 必需参数声明保持不变
        assert!(s.studies["Study 1"].required_parameters.contains("L"));
    }

    #[test]
    fn test_diff_reports_changes() {
        let a = demo();
        let mut b = demo();
        b.features.remove("blk1");
        b.parameters.insert("L".into(), "5[mm]".into());
        let diff = a.diff(&b);
        assert!(diff.iter().any(|d| d.contains("feature blk1 no longer exists")));
        assert!(diff.iter().any(|d| d.starts_with("parameter L")));
        assert!(a.diff(&a.clone()).is_empty());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("10[mm]"), Some((10.0, Some("mm".to_string()))));
        assert_eq!(parse_quantity(" 0.5 "), Some((0.5, None)));
        assert_eq!(parse_quantity("1e-3[m/s]"), Some((0.001, Some("m/s".to_string()))));
        assert_eq!(parse_quantity("2*L"), None);
    }

    #[test]
    fn test_summary_marks_undefined() {
        let text = demo().summary();
        assert!(text.contains("L = (undefined)"));
        assert!(text.contains("Study 1: not run (requires L, U_in)"));
    }
}
