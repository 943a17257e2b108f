use simview::bridge::SimulationBridge;
use simview::engine::{Engine, ImageBuffer, SimConfig};
use simview::images::{DisplayMode, RenderableFrame};
use simview::params::{Magnitude, ParamTable, Parameter, ParameterSet};
use simview::spectrum::{SaseGenerator, SpectrumMode};
use simview::symmetry::{BuiltinLysozyme, StructureSource};
use simview::{ControlError, ControlEvent, Controller, ControllerOptions, EngineError, Outcome};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Counts calls, remembers configs, and returns an image holding the call number.
#[derive(Clone, Default)]
struct Tally {
    calls: Rc<Cell<u32>>,
    configs: Rc<RefCell<Vec<SimConfig>>>,
    offline: Rc<Cell<bool>>,
}

impl Engine for Tally {
    fn simulate(&self, config: &SimConfig) -> Result<ImageBuffer, EngineError> {
        if self.offline.get() {
            return Err(EngineError("detector offline".into()));
        }
        self.calls.set(self.calls.get() + 1);
        self.configs.borrow_mut().push(config.clone());
        Ok(ImageBuffer::from_data(2, 1, vec![self.calls.get() as f32, 0.0]))
    }
}

fn controller(params: ParameterSet) -> (Controller, Tally) {
    controller_with(params, ControllerOptions::default())
}

fn controller_with(params: ParameterSet, options: ControllerOptions) -> (Controller, Tally) {
    let tally = Tally::default();
    let bridge = SimulationBridge::new(Box::new(tally.clone()), Box::new(SaseGenerator::new(3, 9500.0)));
    let ctl = Controller::new(params, bridge, options).unwrap();
    (ctl, tally)
}

fn big_domain() -> ParameterSet {
    ParameterSet::new(vec![
        Parameter::new("DomainSize", 100.0, 10_000.0, 100.0, 500.0, 2000.0),
        Parameter::new("Energy", 6500.0, 12000.0, 10.0, 30.0, 9500.0),
        Parameter::new("Brightness", 0.0, 2.0, 0.01, 0.1, 0.5).display_only(),
    ])
}

fn lysozyme() -> ParameterSet {
    let structure = BuiltinLysozyme.load().unwrap();
    ParameterSet::initialize(&structure, &ParamTable::default())
}

#[test]
fn one_step_one_render_reference_untouched() {
    let (mut ctl, tally) = controller(big_domain());
    assert_eq!(tally.calls.get(), 1);
    let reference = ctl.images().reference().clone();

    let out = ctl.handle(&ControlEvent::Increase(Magnitude::Normal)).unwrap();

    assert_eq!(out, Outcome::Rendered);
    assert_eq!(ctl.params().value("DomainSize"), Some(2100.0));
    assert_eq!(tally.calls.get(), 2);
    assert_eq!(tally.configs.borrow()[1].domain_size, 2100.0);
    assert_eq!(ctl.images().reference(), &reference);
    assert_ne!(ctl.images().current(), &reference);

    ctl.handle(&ControlEvent::Decrease(Magnitude::Large)).unwrap();
    assert_eq!(ctl.params().value("DomainSize"), Some(1600.0));
    ctl.handle(&ControlEvent::Decrease(Magnitude::Large)).unwrap();
    assert_eq!(ctl.params().value("DomainSize"), Some(1100.0));
    assert_eq!(tally.calls.get(), 4);
}

#[test]
fn big_steps_clamp_at_the_minimum() {
    let (mut ctl, tally) = controller(big_domain());
    for _ in 0..4 {
        ctl.handle(&ControlEvent::Decrease(Magnitude::Large)).unwrap();
    }
    assert_eq!(ctl.params().value("DomainSize"), Some(100.0));
    let calls = tally.calls.get();

    let out = ctl.handle(&ControlEvent::Decrease(Magnitude::Large)).unwrap();
    assert_eq!(out, Outcome::Unchanged);
    assert_eq!(tally.calls.get(), calls);
}

#[test]
fn spectrum_cycle_returns_to_start_with_one_render_each() {
    let (mut ctl, tally) = controller(lysozyme());
    let start = ctl.spectrum();
    let mut seen = Vec::new();
    for _ in 0..3 {
        assert_eq!(ctl.handle(&ControlEvent::ToggleSpectrumShape).unwrap(), Outcome::Rendered);
        seen.push(ctl.spectrum());
    }
    assert_eq!(
        seen,
        vec![SpectrumMode::Sase, SpectrumMode::Monochromatic, SpectrumMode::Gaussian]
    );
    assert_eq!(ctl.spectrum(), start);
    assert_eq!(tally.calls.get(), 4);
}

#[test]
fn randomizing_resets_the_comparison() {
    let (mut ctl, tally) = controller(lysozyme());
    ctl.handle(&ControlEvent::Increase(Magnitude::Large)).unwrap();
    let calls = tally.calls.get();

    ctl.handle(&ControlEvent::RandomizeOrientation).unwrap();

    assert_eq!(tally.calls.get(), calls + 1);
    assert_eq!(ctl.images().current(), ctl.images().reference());
    let configs = tally.configs.borrow();
    assert_ne!(configs[configs.len() - 1].orientation, configs[0].orientation);
}

#[test]
fn reference_follows_update_then_diverges() {
    let (mut ctl, _) = controller(big_domain());
    ctl.handle(&ControlEvent::Increase(Magnitude::Normal)).unwrap();
    ctl.handle(&ControlEvent::UpdateReference).unwrap();
    let frozen = ctl.images().current().clone();
    assert_eq!(ctl.images().reference(), &frozen);

    ctl.handle(&ControlEvent::Increase(Magnitude::Normal)).unwrap();
    assert_eq!(ctl.images().reference(), &frozen);
    assert_ne!(ctl.images().current(), &frozen);
}

#[test]
fn brightness_and_display_mode_never_render() {
    let (mut ctl, tally) = controller(big_domain());
    ctl.handle(&ControlEvent::SelectParameter("Brightness".into()))
        .unwrap();
    assert_eq!(
        ctl.handle(&ControlEvent::Increase(Magnitude::Large)).unwrap(),
        Outcome::Recomposed
    );
    assert_eq!(ctl.handle(&ControlEvent::ToggleDisplayMode).unwrap(), Outcome::Recomposed);
    assert_eq!(ctl.images().mode, DisplayMode::CurrentOnly);
    assert!(matches!(ctl.frame(), RenderableFrame::Single { .. }));
    assert_eq!(tally.calls.get(), 1);
}

#[test]
fn symmetry_locked_axes_are_skipped_by_the_cursor() {
    let (mut ctl, _) = controller(lysozyme());
    let first = ctl.selected().unwrap().to_string();
    let mut visited = vec![first.clone()];
    loop {
        ctl.handle(&ControlEvent::NextParameter).unwrap();
        let name = ctl.selected().unwrap().to_string();
        if name == first {
            break;
        }
        visited.push(name);
    }
    assert!(visited.iter().any(|n| n == "a"));
    assert!(visited.iter().any(|n| n == "c"));
    assert!(!visited.iter().any(|n| n == "b"), "b follows a in a tetragonal cell");

    let err = ctl
        .handle(&ControlEvent::SelectParameter("b".into()))
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidParameter(_)));
    assert!(err.is_recoverable());
}

#[test]
fn engine_failure_keeps_the_last_good_image() {
    let (mut ctl, tally) = controller(big_domain());
    let before = ctl.images().current().clone();
    tally.offline.set(true);

    let err = ctl
        .handle(&ControlEvent::Increase(Magnitude::Normal))
        .unwrap_err();
    assert!(matches!(err, ControlError::Engine(_)));
    assert!(!err.is_recoverable());
    assert_eq!(ctl.images().current(), &before);

    tally.offline.set(false);
    assert_eq!(ctl.handle(&ControlEvent::NewPulse).unwrap(), Outcome::Rendered);
}

#[test]
fn reset_renders_current_and_keeps_reference() {
    let (mut ctl, tally) = controller(big_domain());
    let reference = ctl.images().reference().clone();
    ctl.handle(&ControlEvent::Increase(Magnitude::Large)).unwrap();
    let stepped = ctl.images().current().clone();
    let calls = tally.calls.get();

    let out = ctl.handle(&ControlEvent::ResetAll).unwrap();

    assert_eq!(out, Outcome::Rendered);
    assert_eq!(tally.calls.get(), calls + 1);
    assert_eq!(ctl.params().value("DomainSize"), Some(2000.0));
    assert_ne!(ctl.images().current(), &stepped);
    assert_eq!(ctl.images().reference(), &reference);
}

#[test]
fn bandwidth_steps_do_not_render_a_monochromatic_beam() {
    let options = ControllerOptions {
        spectrum: SpectrumMode::Monochromatic,
        ..ControllerOptions::default()
    };
    let (mut ctl, tally) = controller_with(lysozyme(), options);
    ctl.handle(&ControlEvent::SelectParameter("Bandwidth".into()))
        .unwrap();

    let out = ctl.handle(&ControlEvent::Increase(Magnitude::Normal)).unwrap();

    assert_ne!(out, Outcome::Rendered);
    assert_eq!(tally.calls.get(), 1);
    assert!((ctl.params().value("Bandwidth").unwrap() - 0.41).abs() < 1e-9);
}

#[test]
fn diffuse_steps_do_not_render_while_diffuse_is_off() {
    let (mut ctl, tally) = controller(lysozyme());
    assert!(!ctl.diffuse());
    for name in ["Diff_gamma", "Diff_sigma", "Aniso"] {
        ctl.handle(&ControlEvent::SelectParameter(name.into()))
            .unwrap();
        let out = ctl.handle(&ControlEvent::Increase(Magnitude::Large)).unwrap();
        assert_ne!(out, Outcome::Rendered, "{name}");
    }
    assert_eq!(tally.calls.get(), 1);

    assert_eq!(ctl.handle(&ControlEvent::ToggleDiffuse).unwrap(), Outcome::Rendered);
    assert_eq!(tally.calls.get(), 2);
}
