//! The ordered registry of adjustable parameters.

use crate::error::ControlError;
use crate::symmetry::{Structure, UnitCell};
use serde::{Deserialize, Serialize};

/// Table entry that expands into the `a`, `b`, `c` cell lengths. Its bounds
/// and steps are scale factors of the loaded cell.
pub const CELL_SCALE: &str = "ucell_scale";
pub const CELL_AXES: [&str; 3] = ["a", "b", "c"];

/// `(name, value)` pairs in registry order.
pub type ParamSnapshot = Vec<(String, f64)>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    /// Feeds the simulation engine; a change needs a new image.
    #[default]
    Simulation,
    /// Only affects how images are composed for display.
    Display,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Magnitude {
    Normal,
    Large,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub big_step: f64,
    pub default: f64,
    pub enabled: bool,
    pub kind: ParamKind,
}

impl Parameter {
    pub fn new(name: &str, min: f64, max: f64, step: f64, big_step: f64, default: f64) -> Self {
        let default = default.clamp(min, max);
        Self {
            name: name.to_string(),
            value: default,
            min,
            max,
            step,
            big_step,
            default,
            enabled: true,
            kind: ParamKind::Simulation,
        }
    }

    pub fn display_only(mut self) -> Self {
        self.kind = ParamKind::Display;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Configuration data for one parameter: `[min, max, step, big_step, default]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub big_step: f64,
    pub default: f64,
    #[serde(default)]
    pub kind: ParamKind,
}

impl ParamSpec {
    fn sim(name: &str, min: f64, max: f64, step: f64, big_step: f64, default: f64) -> Self {
        Self {
            name: name.to_string(),
            min,
            max,
            step,
            big_step,
            default,
            kind: ParamKind::Simulation,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamTable {
    pub entries: Vec<ParamSpec>,
}

impl Default for ParamTable {
    fn default() -> Self {
        let mut entries = vec![
            ParamSpec::sim("DomainSize", 6.0, 200.0, 2.0, 10.0, 30.0),
            ParamSpec::sim("MosAngDeg", 0.01, 5.0, 0.01, 0.1, 0.1001),
            ParamSpec::sim(CELL_SCALE, 0.5, 2.0, 0.05, 0.1, 1.0),
            ParamSpec::sim("Diff_gamma", 1.0, 1000.0, 1.0, 10.0, 50.0),
            ParamSpec::sim("Diff_sigma", 0.001, 5.0, 0.1, 1.0, 0.3001),
            ParamSpec::sim("Aniso", 0.01, 10.0, 0.01, 0.1, 1.0),
            ParamSpec::sim("Energy", 6500.0, 12000.0, 10.0, 30.0, 9500.0),
            ParamSpec::sim("Bandwidth", 0.01, 5.01, 0.1, 1.0, 0.31),
            ParamSpec::sim("RotX", -180.0, 180.0, 0.01, 0.1, 0.0),
            ParamSpec::sim("RotY", -180.0, 180.0, 0.01, 0.1, 0.0),
            ParamSpec::sim("RotZ", -180.0, 180.0, 0.01, 0.1, 0.0),
            // binary switch
            ParamSpec::sim("Fhkl", 0.0, 1.0, 1.0, 1.0, 1.0),
        ];
        entries.push(ParamSpec {
            kind: ParamKind::Display,
            ..ParamSpec::sim("Brightness", 0.0, 2.0, 0.01, 0.1, 0.5)
        });
        Self { entries }
    }
}

impl ParamTable {
    /// Reject entries whose bounds, steps or default make no sense, and
    /// duplicate names.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for e in &self.entries {
            if !seen.insert(e.name.as_str()) {
                return Err(format!("duplicate parameter {:?}", e.name));
            }
            let finite = [e.min, e.max, e.step, e.big_step, e.default]
                .iter()
                .all(|v| v.is_finite());
            if !finite || e.min > e.max {
                return Err(format!("{}: bad bounds [{}, {}]", e.name, e.min, e.max));
            }
            if e.step <= 0.0 || e.big_step <= 0.0 {
                return Err(format!("{}: steps must be positive", e.name));
            }
            if e.default < e.min || e.default > e.max {
                return Err(format!("{}: default {} out of bounds", e.name, e.default));
            }
        }
        Ok(())
    }
}

/// `dependent = independent * ratio`, re-evaluated whenever the independent
/// axis moves.
#[derive(Clone, Debug, PartialEq)]
struct Coupling {
    independent: usize,
    dependent: usize,
    ratio: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSet {
    params: Vec<Parameter>,
    couplings: Vec<Coupling>,
    base_cell: Option<UnitCell>,
    layout_generation: u64,
}

impl ParameterSet {
    pub fn new(params: Vec<Parameter>) -> Self {
        Self {
            params,
            couplings: Vec::new(),
            base_cell: None,
            layout_generation: 0,
        }
    }

    /// Build the registry for a loaded structure. Cell axes that the crystal
    /// system ties to another axis are disabled and follow it.
    pub fn initialize(structure: &Structure, table: &ParamTable) -> Self {
        let couplings = structure.system.axis_couplings();
        let is_dependent = |axis: &str| couplings.iter().any(|(_, dep)| *dep == axis);
        let lengths = structure.cell.lengths();

        let mut params = Vec::with_capacity(table.entries.len() + 2);
        for spec in &table.entries {
            if spec.name == CELL_SCALE {
                for (&axis, len) in CELL_AXES.iter().zip(lengths) {
                    let mut p = Parameter::new(
                        axis,
                        spec.min * len,
                        spec.max * len,
                        spec.step * len,
                        spec.big_step * len,
                        spec.default * len,
                    );
                    p.enabled = !is_dependent(axis);
                    params.push(p);
                }
            } else {
                let mut p = Parameter::new(
                    &spec.name,
                    spec.min,
                    spec.max,
                    spec.step,
                    spec.big_step,
                    spec.default,
                );
                p.kind = spec.kind;
                params.push(p);
            }
        }

        let mut set = Self::new(params);
        set.base_cell = Some(structure.cell);
        for &(indep, dep) in couplings {
            set.couple(indep, dep);
        }
        set
    }

    /// Tie `dependent` to `independent` at the ratio of their defaults. Both
    /// must exist; unknown names are ignored.
    pub fn couple(&mut self, independent: &str, dependent: &str) {
        let (Some(i), Some(d)) = (self.position(independent), self.position(dependent)) else {
            return;
        };
        let base = self.params[i].default;
        let ratio = if base == 0.0 {
            1.0
        } else {
            self.params[d].default / base
        };
        self.couplings.push(Coupling {
            independent: i,
            dependent: d,
            ratio,
        });
        self.propagate(i);
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).map(|p| p.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    /// Parameter by registry position.
    pub fn at(&self, index: usize) -> Option<&Parameter> {
        self.params.get(index)
    }

    /// Bumped whenever an `enabled` flag changes.
    pub fn layout_generation(&self) -> u64 {
        self.layout_generation
    }

    pub fn enabled_indices(&self) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.enabled)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), ControlError> {
        let i = self
            .position(name)
            .ok_or_else(|| ControlError::InvalidParameter(name.to_string()))?;
        if self.params[i].enabled != enabled {
            self.params[i].enabled = enabled;
            self.layout_generation += 1;
        }
        Ok(())
    }

    /// Apply one step to an enabled parameter, clamped to its bounds.
    /// Returns whether the value moved.
    pub fn step(
        &mut self,
        name: &str,
        direction: Direction,
        magnitude: Magnitude,
    ) -> Result<bool, ControlError> {
        let i = self
            .position(name)
            .filter(|&i| self.params[i].enabled)
            .ok_or_else(|| ControlError::InvalidParameter(name.to_string()))?;

        let p = &mut self.params[i];
        let delta = match magnitude {
            Magnitude::Normal => p.step,
            Magnitude::Large => p.big_step,
        };
        let target = match direction {
            Direction::Up => p.value + delta,
            Direction::Down => p.value - delta,
        };
        let clamped = target.clamp(p.min, p.max);
        if clamped == p.value {
            return Ok(false);
        }
        p.value = clamped;
        self.propagate(i);
        Ok(true)
    }

    fn propagate(&mut self, independent: usize) {
        let value = self.params[independent].value;
        for c in self.couplings.iter().filter(|c| c.independent == independent) {
            let dep = &mut self.params[c.dependent];
            dep.value = (value * c.ratio).clamp(dep.min, dep.max);
        }
    }

    /// Every value back to its default. Enabled flags and bounds untouched.
    pub fn reset(&mut self) {
        for p in &mut self.params {
            p.value = p.default;
        }
    }

    pub fn snapshot(&self) -> ParamSnapshot {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.value))
            .collect()
    }

    /// Values of the parameters that feed the engine.
    pub fn simulation_snapshot(&self) -> ParamSnapshot {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::Simulation)
            .map(|p| (p.name.clone(), p.value))
            .collect()
    }

    /// The loaded cell with the current (possibly scaled) lengths.
    pub fn unit_cell(&self) -> Option<UnitCell> {
        let base = self.base_cell?;
        let len = |axis: &str, fallback: f64| self.value(axis).unwrap_or(fallback);
        Some(base.with_lengths(len("a", base.a), len("b", base.b), len("c", base.c)))
    }

    pub fn is_dependent(&self, name: &str) -> bool {
        self.position(name)
            .map(|i| self.couplings.iter().any(|c| c.dependent == i))
            .unwrap_or(false)
    }
}
