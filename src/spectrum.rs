use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// hc in eV·Å
pub const HC_EV_ANGSTROM: f64 = 12398.0;
pub const TOTAL_FLUX: f64 = 1e12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectrumMode {
    Monochromatic,
    Gaussian,
    Sase,
}

impl SpectrumMode {
    /// Toggle order: Gaussian -> SASE -> monochromatic -> Gaussian.
    pub fn next(self) -> Self {
        match self {
            SpectrumMode::Gaussian => SpectrumMode::Sase,
            SpectrumMode::Sase => SpectrumMode::Monochromatic,
            SpectrumMode::Monochromatic => SpectrumMode::Gaussian,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpectrumMode::Monochromatic => "monochromatic",
            SpectrumMode::Gaussian => "Gaussian",
            SpectrumMode::Sase => "SASE",
        }
    }

    /// Whether a fresh random spectrum is drawn for every simulation.
    pub fn is_stochastic(self) -> bool {
        self == SpectrumMode::Sase
    }

    pub fn uses_energy(self) -> bool {
        self != SpectrumMode::Sase
    }

    pub fn uses_bandwidth(self) -> bool {
        self == SpectrumMode::Gaussian
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectralLine {
    /// Å
    pub wavelength: f64,
    pub flux: f64,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Spectrum {
    pub lines: Vec<SpectralLine>,
}

impl Spectrum {
    pub fn monochromatic(energy_ev: f64) -> Self {
        Self {
            lines: vec![SpectralLine {
                wavelength: HC_EV_ANGSTROM / energy_ev,
                flux: TOTAL_FLUX,
            }],
        }
    }

    /// Sampled at 1 eV from E-50 to E+50 with FWHM = bandwidth% of E.
    pub fn gaussian(energy_ev: f64, bandwidth_pct: f64) -> Self {
        let fwhm = (0.01 * bandwidth_pct * energy_ev).max(1e-6);
        let k = 4.0 * std::f64::consts::LN_2 / (fwhm * fwhm);
        let lines = (-50..=50)
            .map(|de| {
                let de = de as f64;
                SpectralLine {
                    wavelength: HC_EV_ANGSTROM / (energy_ev + de),
                    flux: TOTAL_FLUX * (-k * de * de).exp(),
                }
            })
            .collect();
        Self { lines }
    }

    pub fn total_flux(&self) -> f64 {
        self.lines.iter().map(|l| l.flux).sum()
    }

    pub fn mean_wavelength(&self) -> Option<f64> {
        let total = self.total_flux();
        if total <= 0.0 {
            return None;
        }
        Some(self.lines.iter().map(|l| l.wavelength * l.flux).sum::<f64>() / total)
    }

    /// Merge lines into at most `max_lines` flux-weighted bins of equal
    /// wavelength width. Lines carrying no flux are dropped.
    pub fn condensed(&self, max_lines: usize) -> Vec<SpectralLine> {
        let live: Vec<SpectralLine> = self.lines.iter().copied().filter(|l| l.flux > 0.0).collect();
        if live.len() <= max_lines.max(1) {
            return live;
        }
        let lo = live.iter().map(|l| l.wavelength).fold(f64::INFINITY, f64::min);
        let hi = live.iter().map(|l| l.wavelength).fold(f64::NEG_INFINITY, f64::max);
        let width = ((hi - lo) / max_lines as f64).max(1e-12);

        let mut bins = vec![(0.0f64, 0.0f64); max_lines];
        for l in &live {
            let i = (((l.wavelength - lo) / width) as usize).min(max_lines - 1);
            bins[i].0 += l.wavelength * l.flux;
            bins[i].1 += l.flux;
        }
        bins.into_iter()
            .filter(|(_, f)| *f > 0.0)
            .map(|(wf, f)| SpectralLine {
                wavelength: wf / f,
                flux: f,
            })
            .collect()
    }
}

/// Source of stochastic XFEL pulses.
pub trait PulseSource {
    fn next_pulse(&mut self) -> Spectrum;
}

/// Spiky SASE-like pulses: a handful of narrow random spikes under a
/// Gaussian envelope, renormalized to the total flux.
pub struct SaseGenerator {
    rng: StdRng,
    central_ev: f64,
    envelope_fwhm_ev: f64,
    spike_fwhm_ev: f64,
}

impl SaseGenerator {
    pub fn new(seed: u64, central_ev: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            central_ev,
            envelope_fwhm_ev: 20.0,
            spike_fwhm_ev: 1.5,
        }
    }

    fn gauss(&mut self) -> f64 {
        // Box-Muller
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}

impl PulseSource for SaseGenerator {
    fn next_pulse(&mut self) -> Spectrum {
        let sigma = self.envelope_fwhm_ev / 2.355;
        let jitter = self.gauss() * 3.0;
        let n_spikes = self.rng.gen_range(5..=20);

        let spikes: Vec<(f64, f64)> = (0..n_spikes)
            .map(|_| {
                let offset = jitter + self.gauss() * sigma;
                let u: f64 = self.rng.gen_range(f64::EPSILON..1.0);
                (offset, -u.ln())
            })
            .collect();

        let k = 4.0 * std::f64::consts::LN_2 / (self.spike_fwhm_ev * self.spike_fwhm_ev);
        let mut lines: Vec<SpectralLine> = (-50..=50)
            .map(|de| {
                let de = de as f64;
                let flux: f64 = spikes
                    .iter()
                    .map(|(mu, amp)| amp * (-k * (de - mu) * (de - mu)).exp())
                    .sum();
                SpectralLine {
                    wavelength: HC_EV_ANGSTROM / (self.central_ev + de),
                    flux,
                }
            })
            .collect();

        let total: f64 = lines.iter().map(|l| l.flux).sum();
        if total > 0.0 {
            for l in &mut lines {
                l.flux *= TOTAL_FLUX / total;
            }
        }
        Spectrum { lines }
    }
}
