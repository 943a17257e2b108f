//! The event-driven state machine tying the registry, cursor, bridge and
//! image buffers together. One event is handled to completion before the
//! next; renders block.

use crate::bridge::SimulationBridge;
use crate::cursor::ParameterCursor;
use crate::engine::Orientation;
use crate::error::ControlError;
use crate::images::{brightness_percentile, DisplayMode, DualImageState, Palette, RenderableFrame};
use crate::params::{Direction, Magnitude, ParamKind, ParameterSet};
use crate::spectrum::SpectrumMode;
use rand::{rngs::StdRng, SeedableRng};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    PreviousParameter,
    NextParameter,
    SelectParameter(String),
    Increase(Magnitude),
    Decrease(Magnitude),
    NewPulse,
    ResetAll,
    ToggleDisplayMode,
    TogglePalette,
    ToggleSpectrumShape,
    ToggleDiffuse,
    RandomizeOrientation,
    UpdateReference,
}

/// What an event did to the picture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Images and composition untouched (the status text may still differ).
    Unchanged,
    /// Same images, new composition.
    Recomposed,
    /// The engine ran.
    Rendered,
}

#[derive(Clone, Copy, Debug)]
pub struct ControllerOptions {
    pub spectrum: SpectrumMode,
    pub display: DisplayMode,
    pub palette: Palette,
    pub diffuse: bool,
    pub seed: u64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            spectrum: SpectrumMode::Gaussian,
            display: DisplayMode::Overlaid,
            palette: Palette::Magma,
            diffuse: false,
            seed: 0xC0FFEE,
        }
    }
}

pub struct Controller {
    params: ParameterSet,
    cursor: ParameterCursor,
    bridge: SimulationBridge,
    images: DualImageState,
    spectrum: SpectrumMode,
    diffuse: bool,
    orientation: Orientation,
    start_orientation: Orientation,
    rng: StdRng,
}

impl Controller {
    /// Render the starting image into both buffers. Fails if that first
    /// render fails; there is no half-built controller.
    pub fn new(
        params: ParameterSet,
        mut bridge: SimulationBridge,
        options: ControllerOptions,
    ) -> Result<Self, ControlError> {
        let orientation = Orientation::default();
        let first = bridge.render(&params, options.spectrum, &orientation, options.diffuse, false)?;
        let cursor = ParameterCursor::new(&params);
        Ok(Self {
            params,
            cursor,
            bridge,
            images: DualImageState::new(first, options.display, options.palette),
            spectrum: options.spectrum,
            diffuse: options.diffuse,
            orientation,
            start_orientation: orientation,
            rng: StdRng::seed_from_u64(options.seed),
        })
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn images(&self) -> &DualImageState {
        &self.images
    }

    pub fn spectrum(&self) -> SpectrumMode {
        self.spectrum
    }

    pub fn diffuse(&self) -> bool {
        self.diffuse
    }

    pub fn orientation(&self) -> &Orientation {
        &self.orientation
    }

    pub fn engine_calls(&self) -> u64 {
        self.bridge.engine_calls()
    }

    pub fn selected(&mut self) -> Result<&str, ControlError> {
        self.cursor.current(&self.params)
    }

    pub fn handle(&mut self, event: &ControlEvent) -> Result<Outcome, ControlError> {
        let outcome = match event {
            ControlEvent::PreviousParameter => {
                self.cursor.previous(&self.params)?;
                Outcome::Unchanged
            }
            ControlEvent::NextParameter => {
                self.cursor.next(&self.params)?;
                Outcome::Unchanged
            }
            ControlEvent::SelectParameter(name) => {
                self.cursor.select(&self.params, name)?;
                Outcome::Unchanged
            }
            ControlEvent::Increase(m) => self.step_selected(Direction::Up, *m)?,
            ControlEvent::Decrease(m) => self.step_selected(Direction::Down, *m)?,
            ControlEvent::NewPulse => self.refresh(true)?,
            ControlEvent::ResetAll => {
                self.params.reset();
                self.orientation = self.start_orientation;
                self.refresh(false)?
            }
            ControlEvent::ToggleDisplayMode => {
                self.images.toggle_mode();
                Outcome::Recomposed
            }
            ControlEvent::TogglePalette => {
                self.images.palette = self.images.palette.toggled();
                Outcome::Recomposed
            }
            ControlEvent::ToggleSpectrumShape => {
                let previous = self.spectrum;
                self.spectrum = previous.next();
                self.refresh(false).inspect_err(|_| self.spectrum = previous)?
            }
            ControlEvent::ToggleDiffuse => {
                self.diffuse = !self.diffuse;
                if self.diffuse && self.spectrum != SpectrumMode::Monochromatic {
                    log::info!("diffuse scattering is much cheaper with a monochromatic spectrum");
                }
                self.refresh(false).inspect_err(|_| self.diffuse = !self.diffuse)?
            }
            ControlEvent::RandomizeOrientation => {
                let (params, bridge) = (&self.params, &mut self.bridge);
                let (spectrum, diffuse) = (self.spectrum, self.diffuse);
                self.orientation = self.images.randomize_orientation(&mut self.rng, |o| {
                    bridge.render(params, spectrum, o, diffuse, false)
                })?;
                Outcome::Rendered
            }
            ControlEvent::UpdateReference => {
                self.images.update_reference();
                Outcome::Recomposed
            }
        };
        log::debug!("{event:?} -> {outcome:?}");
        Ok(outcome)
    }

    fn step_selected(
        &mut self,
        direction: Direction,
        magnitude: Magnitude,
    ) -> Result<Outcome, ControlError> {
        let name = self.cursor.current(&self.params)?.to_string();
        if !self.params.step(&name, direction, magnitude)? {
            log::debug!("{name} already at its bound");
            return Ok(Outcome::Unchanged);
        }
        match self.params.get(&name).map(|p| p.kind) {
            Some(ParamKind::Display) => Ok(Outcome::Recomposed),
            _ => self.refresh(false),
        }
    }

    /// Bring `current` up to date with the parameters. The bridge decides
    /// whether the engine actually has to run.
    fn refresh(&mut self, force: bool) -> Result<Outcome, ControlError> {
        let calls = self.bridge.engine_calls();
        let image = self.bridge.render(
            &self.params,
            self.spectrum,
            &self.orientation,
            self.diffuse,
            force,
        )?;
        self.images.update_current(image);
        if self.bridge.engine_calls() > calls {
            Ok(Outcome::Rendered)
        } else {
            Ok(Outcome::Recomposed)
        }
    }

    pub fn percentile(&self) -> f64 {
        brightness_percentile(self.params.value("Brightness").unwrap_or(0.5))
    }

    pub fn frame(&self) -> RenderableFrame {
        self.images.compose(self.percentile())
    }

    /// The four-line parameter summary shown under the image.
    pub fn status_lines(&self) -> Vec<String> {
        let label = |name: &str| {
            self.params
                .value(name)
                .map(|v| format_value(name, v))
                .unwrap_or_else(|| "N/A".to_string())
        };
        let diffuse = |name: &str| {
            if self.diffuse {
                label(name)
            } else {
                "N/A".to_string()
            }
        };
        let energy = if self.spectrum.uses_energy() {
            label("Energy")
        } else {
            "N/A".to_string()
        };
        let bandwidth = if self.spectrum.uses_bandwidth() {
            label("Bandwidth")
        } else {
            "N/A".to_string()
        };
        let ucell = match self.params.unit_cell() {
            Some(c) => format!("{:.2}, {:.2}, {:.2}", c.a, c.b, c.c),
            None => "N/A".to_string(),
        };

        vec![
            format!(
                "Domain size: {}; Mosaic angle: {}; a,b,c = {}",
                label("DomainSize"),
                label("MosAngDeg"),
                ucell
            ),
            format!(
                "Missetting angles in degrees (X,Y,Z) = ({}, {}, {})",
                label("RotX"),
                label("RotY"),
                label("RotZ")
            ),
            format!(
                "Diffuse gamma: {}, sigma: {}, anisotropy factor: {}",
                diffuse("Diff_gamma"),
                diffuse("Diff_sigma"),
                diffuse("Aniso")
            ),
            format!(
                "Energy/Bandwidth = {}/{}; Spectra: {}; {}; Brightness: {}",
                energy,
                bandwidth,
                self.spectrum.label(),
                label("Fhkl"),
                label("Brightness")
            ),
        ]
    }
}

/// Human-readable value for a named parameter.
pub fn format_value(name: &str, v: f64) -> String {
    match name {
        "DomainSize" => format!("{v:.0}x{v:.0}x{v:.0}"),
        "MosAngDeg" => format!("{v:.2}º"),
        "Diff_gamma" | "Energy" => format!("{v:.0}"),
        "Diff_sigma" | "Aniso" | "Brightness" | "a" | "b" | "c" => format!("{v:.2}"),
        "Bandwidth" => format!("{v:.2}%"),
        "RotX" | "RotY" | "RotZ" => format!("{v:+.2}"),
        "Fhkl" => format!("SFs {}", if v >= 0.5 { "on" } else { "off" }),
        _ => format!("{v:.3}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, ImageBuffer, SimConfig};
    use crate::error::EngineError;
    use crate::params::{ParamTable, Parameter};
    use crate::spectrum::SaseGenerator;
    use crate::symmetry::{Structure, UnitCell};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Each call returns a distinct one-pixel image; can be switched to fail.
    struct Counting {
        calls: Rc<Cell<u32>>,
        fail: Rc<Cell<bool>>,
    }

    impl Engine for Counting {
        fn simulate(&self, _: &SimConfig) -> Result<ImageBuffer, EngineError> {
            if self.fail.get() {
                return Err(EngineError("engine offline".into()));
            }
            self.calls.set(self.calls.get() + 1);
            Ok(ImageBuffer::from_data(1, 1, vec![self.calls.get() as f32]))
        }
    }

    struct Rig {
        ctl: Controller,
        fail: Rc<Cell<bool>>,
    }

    fn rig(params: ParameterSet, options: ControllerOptions) -> Rig {
        let calls = Rc::new(Cell::new(0));
        let fail = Rc::new(Cell::new(false));
        let engine = Counting {
            calls,
            fail: fail.clone(),
        };
        let bridge = SimulationBridge::new(Box::new(engine), Box::new(SaseGenerator::new(5, 9500.0)));
        Rig {
            ctl: Controller::new(params, bridge, options).unwrap(),
            fail,
        }
    }

    fn lysozyme() -> ParameterSet {
        let s = Structure::new(
            UnitCell {
                a: 79.1,
                b: 79.1,
                c: 37.9,
                alpha: 90.0,
                beta: 90.0,
                gamma: 90.0,
            },
            "P 43 21 2",
        );
        ParameterSet::initialize(&s, &ParamTable::default())
    }

    #[test]
    fn start_renders_once_into_both_buffers() {
        let r = rig(lysozyme(), ControllerOptions::default());
        assert_eq!(r.ctl.engine_calls(), 1);
        assert_eq!(r.ctl.images().current(), r.ctl.images().reference());
    }

    #[test]
    fn navigation_never_renders() {
        let mut r = rig(lysozyme(), ControllerOptions::default());
        for _ in 0..20 {
            assert_eq!(r.ctl.handle(&ControlEvent::NextParameter), Ok(Outcome::Unchanged));
        }
        assert_eq!(r.ctl.handle(&ControlEvent::PreviousParameter), Ok(Outcome::Unchanged));
        assert_eq!(r.ctl.engine_calls(), 1);
    }

    #[test]
    fn navigation_skips_symmetry_locked_axes() {
        let mut r = rig(lysozyme(), ControllerOptions::default());
        let mut seen = Vec::new();
        for _ in 0..r.ctl.params().len() {
            r.ctl.handle(&ControlEvent::NextParameter).unwrap();
            seen.push(r.ctl.selected().unwrap().to_string());
        }
        assert!(seen.contains(&"a".to_string()));
        assert!(seen.contains(&"c".to_string()));
        assert!(!seen.contains(&"b".to_string()));
    }

    #[test]
    fn brightness_recomposes_without_rendering() {
        let mut r = rig(lysozyme(), ControllerOptions::default());
        r.ctl
            .handle(&ControlEvent::SelectParameter("Brightness".into()))
            .unwrap();
        let before = r.ctl.percentile();
        assert_eq!(
            r.ctl.handle(&ControlEvent::Increase(Magnitude::Large)),
            Ok(Outcome::Recomposed)
        );
        assert!(r.ctl.percentile() < before);
        assert_eq!(r.ctl.engine_calls(), 1);
    }

    #[test]
    fn reset_restores_orientation_and_parameters() {
        let mut r = rig(lysozyme(), ControllerOptions::default());
        r.ctl.handle(&ControlEvent::RandomizeOrientation).unwrap();
        r.ctl.handle(&ControlEvent::Increase(Magnitude::Large)).unwrap();
        let name = r.ctl.selected().unwrap().to_string();
        r.ctl.handle(&ControlEvent::ResetAll).unwrap();
        assert_eq!(r.ctl.orientation(), &Orientation::default());
        let p = r.ctl.params().get(&name).unwrap();
        assert_eq!(p.value, p.default);
        assert_eq!(r.ctl.selected().unwrap(), name);
    }

    #[test]
    fn failed_spectrum_toggle_is_rolled_back() {
        let mut r = rig(lysozyme(), ControllerOptions::default());
        let before = r.ctl.images().current().clone();
        r.fail.set(true);
        let err = r.ctl.handle(&ControlEvent::ToggleSpectrumShape).unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(r.ctl.spectrum(), SpectrumMode::Gaussian);
        assert_eq!(r.ctl.images().current(), &before);

        r.fail.set(false);
        assert_eq!(
            r.ctl.handle(&ControlEvent::ToggleSpectrumShape),
            Ok(Outcome::Rendered)
        );
        assert_eq!(r.ctl.spectrum(), SpectrumMode::Sase);
    }

    #[test]
    fn diffuse_toggle_renders_and_shows_values() {
        let mut r = rig(lysozyme(), ControllerOptions::default());
        assert!(r.ctl.status_lines()[2].contains("N/A"));
        assert_eq!(r.ctl.handle(&ControlEvent::ToggleDiffuse), Ok(Outcome::Rendered));
        assert!(r.ctl.diffuse());
        assert_eq!(
            r.ctl.status_lines()[2],
            "Diffuse gamma: 50, sigma: 0.30, anisotropy factor: 1.00"
        );
    }

    #[test]
    fn status_hides_unused_spectrum_fields() {
        let options = ControllerOptions {
            spectrum: SpectrumMode::Sase,
            ..ControllerOptions::default()
        };
        let r = rig(lysozyme(), options);
        let line = &r.ctl.status_lines()[3];
        assert!(line.starts_with("Energy/Bandwidth = N/A/N/A; Spectra: SASE; SFs on"));
        assert_eq!(
            r.ctl.status_lines()[0],
            "Domain size: 30x30x30; Mosaic angle: 0.10º; a,b,c = 79.10, 79.10, 37.90"
        );
    }

    #[test]
    fn empty_registry_reports_no_selection() {
        let set = ParameterSet::new(vec![Parameter::new("x", 0.0, 1.0, 0.1, 0.5, 0.5).disabled()]);
        let mut r = rig(set, ControllerOptions::default());
        assert_eq!(
            r.ctl.handle(&ControlEvent::Increase(Magnitude::Normal)),
            Err(ControlError::NoSelectableParameter)
        );
        assert_eq!(
            r.ctl.handle(&ControlEvent::NextParameter),
            Err(ControlError::NoSelectableParameter)
        );
        assert_eq!(r.ctl.engine_calls(), 1);
    }

    #[test]
    fn value_formats_match_the_status_panel() {
        assert_eq!(format_value("RotX", 0.0), "+0.00");
        assert_eq!(format_value("RotZ", -1.5), "-1.50");
        assert_eq!(format_value("Bandwidth", 0.31), "0.31%");
        assert_eq!(format_value("Fhkl", 0.0), "SFs off");
        assert_eq!(format_value("Energy", 9500.0), "9500");
    }
}
