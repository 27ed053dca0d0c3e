//! 内置动作目录与各动作语义
//!
//! ActionKind 是封闭的动作集合；每种动作声明前置条件、预期状态变化（用于提案内投影校验）、
//! 以及依赖/产出的快照字段（执行阶段据此跳过依赖失败动作的后续动作）。

use serde_json::Value;

use crate::actions::physics;
use crate::actions::{ActionRequest, ActionSpec, EffectClass, ParamConstraint, ParamSpec, ParamType};
use crate::snapshot::{ModelSnapshot, StateDelta, StateKey, StudyStatus};

/// 封闭的动作种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SetParameter,
    BuildGeometry,
    BuildMesh,
    SolveStudy,
    EvaluateExpression,
    SaveModel,
    RefreshContext,
    AddPhysics,
    DeleteFeature,
    ClearSolution,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SetParameter => "set_parameter",
            ActionKind::BuildGeometry => "build_geometry",
            ActionKind::BuildMesh => "build_mesh",
            ActionKind::SolveStudy => "solve_study",
            ActionKind::EvaluateExpression => "evaluate_expression",
            ActionKind::SaveModel => "save_model",
            ActionKind::RefreshContext => "refresh_context",
            ActionKind::AddPhysics => "add_physics",
            ActionKind::DeleteFeature => "delete_feature",
            ActionKind::ClearSolution => "clear_solution",
        }
    }

    /// 针对快照检查前置条件，返回第一条不满足的原因
    pub fn check_preconditions(
        &self,
        request: &ActionRequest,
        snapshot: &ModelSnapshot,
    ) -> Result<(), String> {
        match self {
            ActionKind::BuildGeometry if snapshot.features.is_empty() => {
                Err("the model has no geometry features to build".to_string())
            }
            ActionKind::BuildMesh if !snapshot.geometry_built => {
                Err("geometry is not built (run build_geometry first)".to_string())
            }
            ActionKind::SolveStudy => {
                let study = request.str_arg("study").unwrap_or_default();
                let Some(state) = snapshot.studies.get(study) else {
                    return Err(format!(
                        "study `{study}` does not exist (available: {})",
                        list_or_none(snapshot.studies.keys())
                    ));
                };
                if state.status == StudyStatus::Running {
                    return Err(format!("study `{study}` is already running"));
                }
                let missing = snapshot.undefined_parameters(study).unwrap_or_default();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(format!("{} undefined", missing.join(", ")))
                }
            }
            ActionKind::EvaluateExpression if !snapshot.has_solution() => {
                Err("no solutions available to evaluate; run a study first".to_string())
            }
            ActionKind::AddPhysics => {
                let tag = physics_tag(request);
                if snapshot.physics.contains(&tag) {
                    Err(format!("physics `{tag}` already exists"))
                } else {
                    Ok(())
                }
            }
            ActionKind::DeleteFeature => {
                let feature = request.str_arg("feature").unwrap_or_default();
                if snapshot.features.contains(feature) {
                    Ok(())
                } else {
                    Err(format!(
                        "feature `{feature}` does not exist (available: {})",
                        list_or_none(snapshot.features.iter())
                    ))
                }
            }
            ActionKind::ClearSolution => {
                let study = request.str_arg("study").unwrap_or_default();
                if snapshot.studies.contains_key(study) {
                    Ok(())
                } else {
                    Err(format!("study `{study}` does not exist"))
                }
            }
            _ => Ok(()),
        }
    }

    /// 动作成功后的预期变化；外部会话未返回 delta 时以此为准
    pub fn expected_delta(&self, request: &ActionRequest) -> StateDelta {
        let mut delta = StateDelta::default();
        match self {
            ActionKind::SetParameter => {
                let name = request.str_arg("name").unwrap_or_default();
                let value = match request.args.get("value") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                delta.parameters.insert(name.to_string(), value);
            }
            ActionKind::BuildGeometry => {
                delta.geometry_built = Some(true);
                delta.mesh_built = Some(false);
            }
            ActionKind::BuildMesh => delta.mesh_built = Some(true),
            ActionKind::SolveStudy => {
                let study = request.str_arg("study").unwrap_or_default();
                delta.studies.insert(study.to_string(), StudyStatus::Completed);
                delta.geometry_built = Some(true);
                delta.mesh_built = Some(true);
            }
            ActionKind::AddPhysics => {
                delta.added_physics.insert(physics_tag(request));
            }
            ActionKind::DeleteFeature => {
                let feature = request.str_arg("feature").unwrap_or_default();
                delta.removed_features.insert(feature.to_string());
            }
            ActionKind::ClearSolution => {
                let study = request.str_arg("study").unwrap_or_default();
                delta.studies.insert(study.to_string(), StudyStatus::NotRun);
            }
            ActionKind::EvaluateExpression | ActionKind::SaveModel | ActionKind::RefreshContext => {}
        }
        delta
    }

    /// 该动作依赖的快照字段（若同一提案内的前序动作本应产出它们）
    pub fn requires(&self, request: &ActionRequest, snapshot: &ModelSnapshot) -> Vec<StateKey> {
        match self {
            ActionKind::BuildMesh => vec![StateKey::Geometry],
            ActionKind::SolveStudy => {
                let study = request.str_arg("study").unwrap_or_default();
                let mut keys = vec![StateKey::Geometry, StateKey::Mesh];
                if let Some(state) = snapshot.studies.get(study) {
                    keys.extend(
                        state
                            .required_parameters
                            .iter()
                            .map(|p| StateKey::Parameter(p.clone())),
                    );
                }
                keys
            }
            ActionKind::EvaluateExpression => vec![StateKey::Solution],
            ActionKind::DeleteFeature => {
                vec![StateKey::Feature(request.str_arg("feature").unwrap_or_default().to_string())]
            }
            _ => Vec::new(),
        }
    }

    /// 该动作产出的快照字段
    pub fn produces(&self, request: &ActionRequest) -> Vec<StateKey> {
        match self {
            ActionKind::SetParameter => {
                vec![StateKey::Parameter(request.str_arg("name").unwrap_or_default().to_string())]
            }
            ActionKind::BuildGeometry => vec![StateKey::Geometry],
            ActionKind::BuildMesh => vec![StateKey::Mesh],
            ActionKind::SolveStudy => vec![
                StateKey::Study(request.str_arg("study").unwrap_or_default().to_string()),
                StateKey::Solution,
            ],
            ActionKind::AddPhysics => vec![StateKey::Physics(physics_tag(request))],
            ActionKind::DeleteFeature => {
                vec![StateKey::Feature(request.str_arg("feature").unwrap_or_default().to_string())]
            }
            ActionKind::ClearSolution => {
                vec![StateKey::Study(request.str_arg("study").unwrap_or_default().to_string())]
            }
            ActionKind::EvaluateExpression | ActionKind::SaveModel | ActionKind::RefreshContext => {
                Vec::new()
            }
        }
    }
}

/// add_physics 的目标标签：显式 tag > 映射表默认标签 > 接口名小写
pub fn physics_tag(request: &ActionRequest) -> String {
    if let Some(tag) = request.str_arg("tag").filter(|t| !t.trim().is_empty()) {
        return tag.trim().to_string();
    }
    let interface = request.str_arg("interface").unwrap_or_default();
    match physics::lookup(interface) {
        (_, Some(tag)) => tag,
        (id, None) => id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase(),
    }
}

fn list_or_none<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let items: Vec<&str> = items.map(String::as_str).collect();
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// 内置动作声明
pub fn builtin_specs() -> Vec<ActionSpec> {
    vec![
        ActionSpec::new(
            ActionKind::SetParameter,
            EffectClass::Mutate,
            "Sets a global parameter in the model.",
        )
        .param(ParamSpec::required("name", ParamType::Symbol, "The name of the parameter."))
        .param(
            ParamSpec::required(
                "value",
                ParamType::Quantity,
                "The value/expression (e.g., '10[m/s]').",
            )
            .with(ParamConstraint::NonEmpty),
        ),
        ActionSpec::new(
            ActionKind::BuildGeometry,
            EffectClass::Mutate,
            "Builds the model geometry. Run this after changing geometric parameters.",
        ),
        ActionSpec::new(
            ActionKind::BuildMesh,
            EffectClass::Mutate,
            "Builds the mesh. Run this after geometry changes or mesh setting changes.",
        ),
        ActionSpec::new(
            ActionKind::SolveStudy,
            EffectClass::Mutate,
            "Runs a study to solve the physics.",
        )
        .param(
            ParamSpec::required(
                "study",
                ParamType::String,
                "The name of the study to run (e.g., 'Study 1').",
            )
            .with(ParamConstraint::NonEmpty),
        ),
        ActionSpec::new(
            ActionKind::EvaluateExpression,
            EffectClass::Query,
            "Evaluates a numerical expression from the results.",
        )
        .param(
            ParamSpec::required(
                "expression",
                ParamType::String,
                "The expression to evaluate (e.g., 'spf.U', 'T').",
            )
            .with(ParamConstraint::NonEmpty),
        )
        .param(ParamSpec::optional(
            "unit",
            ParamType::String,
            "The unit to evaluate in (e.g., 'm/s', 'degC').",
        )),
        ActionSpec::new(ActionKind::SaveModel, EffectClass::Mutate, "Saves the model to disk.")
            .param(
                ParamSpec::required(
                    "filename",
                    ParamType::String,
                    "The filename to save as (e.g., 'Test_v2.mph').",
                )
                .with(ParamConstraint::FileExtension(".mph".to_string())),
            ),
        ActionSpec::new(
            ActionKind::RefreshContext,
            EffectClass::Query,
            "Re-reads the live model (parameters, features, studies) and corrects the tracked state.",
        ),
        ActionSpec::new(
            ActionKind::AddPhysics,
            EffectClass::Mutate,
            "Adds a physics interface to the model.",
        )
        .param(
            ParamSpec::required(
                "interface",
                ParamType::String,
                "Physics interface name or ID (e.g., 'Laminar Flow', 'HeatTransfer').",
            )
            .with(ParamConstraint::NonEmpty),
        )
        .param(ParamSpec::optional(
            "tag",
            ParamType::Symbol,
            "Optional tag for the new interface (defaults to the interface's usual tag).",
        )),
        ActionSpec::new(
            ActionKind::DeleteFeature,
            EffectClass::Destructive,
            "Deletes a geometry feature. Cannot be undone; requires user confirmation.",
        )
        .param(
            ParamSpec::required("feature", ParamType::String, "The geometry feature tag (e.g., 'blk1').")
                .with(ParamConstraint::NonEmpty),
        ),
        ActionSpec::new(
            ActionKind::ClearSolution,
            EffectClass::Destructive,
            "Discards the stored solution of a study. Cannot be undone; requires user confirmation.",
        )
        .param(
            ParamSpec::required("study", ParamType::String, "The name of the study (e.g., 'Study 1').")
                .with(ParamConstraint::NonEmpty),
        ),
    ]
}
