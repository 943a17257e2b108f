use crate::engine::{DiffuseModel, Engine, ImageBuffer, Orientation, SimConfig};
use crate::error::EngineError;
use crate::params::ParameterSet;
use crate::spectrum::{PulseSource, Spectrum, SpectrumMode};
use crate::symmetry::UnitCell;

/// Cell used when the parameter set was not built from a structure.
const FALLBACK_CELL: UnitCell = UnitCell {
    a: 50.0,
    b: 50.0,
    c: 50.0,
    alpha: 90.0,
    beta: 90.0,
    gamma: 90.0,
};

/// Turns a parameter set into engine calls and remembers the last result.
pub struct SimulationBridge {
    engine: Box<dyn Engine>,
    pulses: Box<dyn PulseSource>,
    cache: Option<(SimConfig, ImageBuffer)>,
    engine_calls: u64,
}

impl SimulationBridge {
    pub fn new(engine: Box<dyn Engine>, pulses: Box<dyn PulseSource>) -> Self {
        Self {
            engine,
            pulses,
            cache: None,
            engine_calls: 0,
        }
    }

    /// Number of times the engine has actually been called.
    pub fn engine_calls(&self) -> u64 {
        self.engine_calls
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Render the current configuration. The engine is skipped when the
    /// configuration it would see equals the last one, unless `force` is set
    /// or the spectrum is SASE, where every call draws a new pulse.
    pub fn render(
        &mut self,
        set: &ParameterSet,
        mode: SpectrumMode,
        orientation: &Orientation,
        diffuse: bool,
        force: bool,
    ) -> Result<ImageBuffer, EngineError> {
        let config = self.build_config(set, mode, orientation, diffuse);
        if !force && !mode.is_stochastic() {
            if let Some((cached, image)) = &self.cache {
                if *cached == config {
                    log::debug!("render skipped, configuration unchanged");
                    let mut image = image.clone();
                    image.snapshot = set.snapshot();
                    return Ok(image);
                }
            }
        }

        self.engine_calls += 1;
        let mut image = self.engine.simulate(&config)?;
        if image.data.len() != image.width * image.height {
            return Err(EngineError(format!(
                "image of {}x{} pixels carries {} values",
                image.width,
                image.height,
                image.data.len()
            )));
        }
        image.snapshot = set.snapshot();
        log::debug!(
            "engine call #{} ({} spectrum, diffuse {})",
            self.engine_calls,
            mode.label(),
            if diffuse { "on" } else { "off" }
        );
        self.cache = Some((config, image.clone()));
        Ok(image)
    }

    /// Only SASE draws from the pulse source, so non-stochastic configs can
    /// be built and compared freely.
    fn build_config(
        &mut self,
        set: &ParameterSet,
        mode: SpectrumMode,
        orientation: &Orientation,
        diffuse: bool,
    ) -> SimConfig {
        let v = |name: &str, fallback: f64| set.value(name).unwrap_or(fallback);
        let energy = v("Energy", 9500.0);

        let spectrum = match mode {
            SpectrumMode::Monochromatic => Spectrum::monochromatic(energy),
            SpectrumMode::Gaussian => Spectrum::gaussian(energy, v("Bandwidth", 0.31)),
            SpectrumMode::Sase => self.pulses.next_pulse(),
        };
        let diffuse = diffuse.then(|| {
            DiffuseModel::anisotropic(v("Diff_gamma", 50.0), v("Diff_sigma", 0.3), v("Aniso", 1.0))
        });

        SimConfig {
            cell: set.unit_cell().unwrap_or(FALLBACK_CELL),
            domain_size: v("DomainSize", 30.0),
            mosaic_deg: v("MosAngDeg", 0.1),
            missetting_deg: [v("RotX", 0.0), v("RotY", 0.0), v("RotZ", 0.0)],
            orientation: *orientation,
            spectrum,
            structure_factors: v("Fhkl", 1.0) >= 0.5,
            diffuse,
        }
    }
}
