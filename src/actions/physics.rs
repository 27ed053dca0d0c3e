//! 物理场接口名称映射
//!
//! 常用显示名 -> (接口 ID, 默认标签)。查找顺序：精确显示名、大小写不敏感显示名、接口 ID；
//! 都找不到时回退为 (原名, None)，由调用方直接使用原名。

/// (显示名, 接口 ID, 默认标签)
const PHYSICS_TABLE: &[(&str, &str, &str)] = &[
    // 流体
    ("Laminar Flow", "LaminarFlow", "spf"),
    ("Turbulent Flow, k-e", "TurbulentFlowKE", "spf"),
    ("Turbulent Flow, k-w", "TurbulentFlowKO", "spf"),
    ("Rotating Machinery, Laminar Flow", "RotatingMachineryLaminarFlow", "rml"),
    ("Multiphase Flow, Level Set", "MultiphaseLevelSet", "mls"),
    ("Two-Phase Flow, Phase Field", "TwoPhaseFlowPhaseField", "tpf"),
    // 传热
    ("Heat Transfer in Solids", "HeatTransfer", "ht"),
    ("Heat Transfer in Fluids", "HeatTransferFluids", "ht"),
    ("Nonisothermal Flow", "NonisothermalFlow", "nitf"),
    // 结构力学
    ("Solid Mechanics", "SolidMechanics", "solid"),
    ("Shell", "Shell", "shell"),
    ("Beam", "Beam", "beam"),
    ("Multibody Dynamics", "MultibodyDynamics", "mbd"),
    // AC/DC
    ("Magnetic Fields", "MagneticFields", "mf"),
    ("Electric Currents", "ElectricCurrents", "ec"),
    ("Electrostatics", "Electrostatics", "es"),
    ("Magnetic and Electric Fields", "MagneticElectricFields", "mef"),
    // 射频 / 光学
    ("Electromagnetic Waves, Frequency Domain", "ElectromagneticWavesFrequencyDomain", "ewfd"),
    ("Electromagnetic Waves, Transient", "ElectromagneticWavesTransient", "ewft"),
    ("Ray Optics", "RayOptics", "ro"),
    // 化学
    ("Transport of Diluted Species", "TransportDilutedSpecies", "tds"),
    ("Transport of Concentrated Species", "TransportConcentratedSpecies", "tcs"),
    // 其它
    ("Electrochemistry", "Electrochemistry", "echem"),
    ("Plasma", "Plasma", "plas"),
    ("Pressure Acoustics", "PressureAcoustics", "acpr"),
    ("Coefficient Form PDE", "CoefficientFormPDE", "c"),
];

/// 解析物理场名称，返回 (接口 ID, 默认标签)
pub fn lookup(name: &str) -> (String, Option<String>) {
    let name = name.trim();
    let found = PHYSICS_TABLE
        .iter()
        .find(|(display, _, _)| *display == name)
        .or_else(|| {
            PHYSICS_TABLE
                .iter()
                .find(|(display, _, _)| display.eq_ignore_ascii_case(name))
        })
        .or_else(|| PHYSICS_TABLE.iter().find(|(_, id, _)| *id == name));
    match found {
        Some((_, id, tag)) => (id.to_string(), Some(tag.to_string())),
        None => (name.to_string(), None),
    }
}

/// 所有已知显示名（用于提示词）
pub fn known_names() -> Vec<&'static str> {
    PHYSICS_TABLE.iter().map(|(display, _, _)| *display).collect()
}
