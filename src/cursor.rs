use crate::error::ControlError;
use crate::params::ParameterSet;

/// Selection over the enabled parameters of a [`ParameterSet`], in registry
/// order, wrapping at both ends.
#[derive(Clone, Debug)]
pub struct ParameterCursor {
    enabled: Vec<usize>,
    generation: Option<u64>,
    pos: usize,
}

impl ParameterCursor {
    pub fn new(set: &ParameterSet) -> Self {
        let mut cursor = Self {
            enabled: Vec::new(),
            generation: None,
            pos: 0,
        };
        cursor.sync(set);
        cursor
    }

    /// Rebuild the enabled index only when the set's layout changed. Keeps the
    /// same parameter selected when it is still enabled.
    fn sync(&mut self, set: &ParameterSet) {
        let generation = set.layout_generation();
        if self.generation == Some(generation) {
            return;
        }
        let selected = self.enabled.get(self.pos).copied();
        self.enabled = set.enabled_indices();
        self.generation = Some(generation);
        self.pos = selected
            .and_then(|idx| self.enabled.iter().position(|&e| e == idx))
            .unwrap_or(0);
    }

    fn name<'a>(&self, set: &'a ParameterSet) -> Result<&'a str, ControlError> {
        self.enabled
            .get(self.pos)
            .and_then(|&i| set.at(i))
            .map(|p| p.name.as_str())
            .ok_or(ControlError::NoSelectableParameter)
    }

    pub fn current<'a>(&mut self, set: &'a ParameterSet) -> Result<&'a str, ControlError> {
        self.sync(set);
        self.name(set)
    }

    pub fn next<'a>(&mut self, set: &'a ParameterSet) -> Result<&'a str, ControlError> {
        self.sync(set);
        if self.enabled.is_empty() {
            return Err(ControlError::NoSelectableParameter);
        }
        self.pos = (self.pos + 1) % self.enabled.len();
        self.name(set)
    }

    pub fn previous<'a>(&mut self, set: &'a ParameterSet) -> Result<&'a str, ControlError> {
        self.sync(set);
        if self.enabled.is_empty() {
            return Err(ControlError::NoSelectableParameter);
        }
        let n = self.enabled.len();
        self.pos = (self.pos + n - 1) % n;
        self.name(set)
    }

    /// Jump straight to an enabled parameter by name.
    pub fn select<'a>(
        &mut self,
        set: &'a ParameterSet,
        name: &str,
    ) -> Result<&'a str, ControlError> {
        self.sync(set);
        let pos = self
            .enabled
            .iter()
            .position(|&i| set.at(i).map(|p| p.name == name).unwrap_or(false))
            .ok_or_else(|| ControlError::InvalidParameter(name.to_string()))?;
        self.pos = pos;
        self.name(set)
    }
}
