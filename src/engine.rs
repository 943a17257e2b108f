//! Boundary to the diffraction engine, plus a cheap preview engine so the
//! viewer runs without the real one.

use crate::error::EngineError;
use crate::params::ParamSnapshot;
use crate::spectrum::Spectrum;
use crate::symmetry::UnitCell;
use rand::Rng;
use std::f64::consts::TAU;

pub type Mat3 = [[f64; 3]; 3];

const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

fn mat_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn mat_vec(m: &Mat3, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Crystal rotation as a 3x3 rotation matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Orientation {
    pub matrix: Mat3,
}

impl Default for Orientation {
    fn default() -> Self {
        Self { matrix: IDENTITY }
    }
}

impl Orientation {
    /// Uniformly distributed over SO(3) (Shoemake's random unit quaternion).
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let u1: f64 = rng.gen();
        let u2: f64 = rng.gen();
        let u3: f64 = rng.gen();
        let (s1, s2) = ((1.0 - u1).sqrt(), u1.sqrt());
        let (x, y) = (s1 * (TAU * u2).sin(), s1 * (TAU * u2).cos());
        let (z, w) = (s2 * (TAU * u3).sin(), s2 * (TAU * u3).cos());
        Self::from_quaternion(w, x, y, z)
    }

    fn from_quaternion(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self {
            matrix: [
                [
                    1.0 - 2.0 * (y * y + z * z),
                    2.0 * (x * y - z * w),
                    2.0 * (x * z + y * w),
                ],
                [
                    2.0 * (x * y + z * w),
                    1.0 - 2.0 * (x * x + z * z),
                    2.0 * (y * z - x * w),
                ],
                [
                    2.0 * (x * z - y * w),
                    2.0 * (y * z + x * w),
                    1.0 - 2.0 * (x * x + y * y),
                ],
            ],
        }
    }

    /// Rotation about X, then Y, then Z (degrees).
    pub fn from_missetting(deg: [f64; 3]) -> Self {
        let [x, y, z] = deg.map(f64::to_radians);
        let rx = [[1.0, 0.0, 0.0], [0.0, x.cos(), -x.sin()], [0.0, x.sin(), x.cos()]];
        let ry = [[y.cos(), 0.0, y.sin()], [0.0, 1.0, 0.0], [-y.sin(), 0.0, y.cos()]];
        let rz = [[z.cos(), -z.sin(), 0.0], [z.sin(), z.cos(), 0.0], [0.0, 0.0, 1.0]];
        Self {
            matrix: mat_mul(&rz, &mat_mul(&ry, &rx)),
        }
    }

    /// `self` applied after `first`.
    pub fn compose(&self, first: &Orientation) -> Self {
        Self {
            matrix: mat_mul(&self.matrix, &first.matrix),
        }
    }

    pub fn apply(&self, v: [f64; 3]) -> [f64; 3] {
        mat_vec(&self.matrix, v)
    }
}

/// Diffuse scattering model: per-axis correlation length (gamma) and
/// displacement (sigma), both in Å.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiffuseModel {
    pub gamma: [f64; 3],
    pub sigma: [f64; 3],
}

impl DiffuseModel {
    pub fn anisotropic(gamma: f64, sigma: f64, aniso: f64) -> Self {
        let aniso = if aniso > 0.0 { aniso } else { 1.0 };
        Self {
            gamma: [gamma, gamma * aniso, gamma / aniso],
            sigma: [sigma, sigma * aniso, sigma / aniso],
        }
    }
}

/// Everything the engine needs for one still.
#[derive(Clone, Debug, PartialEq)]
pub struct SimConfig {
    pub cell: UnitCell,
    /// unit cells per mosaic domain edge
    pub domain_size: f64,
    pub mosaic_deg: f64,
    pub missetting_deg: [f64; 3],
    pub orientation: Orientation,
    pub spectrum: Spectrum,
    pub structure_factors: bool,
    pub diffuse: Option<DiffuseModel>,
}

/// Non-negative intensities, row-major, plus the parameter values that
/// produced them.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageBuffer {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
    pub snapshot: ParamSnapshot,
}

impl ImageBuffer {
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
            snapshot: Vec::new(),
        }
    }

    pub fn from_data(width: usize, height: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
            snapshot: Vec::new(),
        }
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Intensity at the given percentile (0..=100), nearest rank.
    pub fn percentile(&self, pct: f64) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mut sorted = self.data.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = (pct.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank]
    }
}

/// The diffraction engine seen by the controller. Implementations should be
/// pure apart from stochastic inputs already carried in the config.
pub trait Engine {
    fn simulate(&self, config: &SimConfig) -> Result<ImageBuffer, EngineError>;
}

/// Approximate kinematic stills: reciprocal lattice points near the Ewald
/// sphere are projected onto a flat detector normal to the beam.
pub struct PreviewEngine {
    pub width: usize,
    pub height: usize,
    pub distance_mm: f64,
    pub pixel_mm: f64,
    pub d_min: f64,
    pub max_spectral_lines: usize,
}

impl PreviewEngine {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            distance_mm: 100.0,
            pixel_mm: 0.5,
            d_min: 2.0,
            max_spectral_lines: 6,
        }
    }

    /// Detector pixel hit by a scattered ray, if any.
    fn project(&self, s1: [f64; 3]) -> Option<(f64, f64)> {
        if s1[2] <= 0.0 {
            return None;
        }
        let px = self.distance_mm * s1[0] / s1[2] / self.pixel_mm + self.width as f64 / 2.0;
        let py = self.distance_mm * s1[1] / s1[2] / self.pixel_mm + self.height as f64 / 2.0;
        if px < 0.0 || py < 0.0 || px >= self.width as f64 || py >= self.height as f64 {
            return None;
        }
        Some((px, py))
    }

    fn splat(&self, data: &mut [f32], px: f64, py: f64, value: f64) {
        let (cx, cy) = (px.floor() as i64, py.floor() as i64);
        for dy in -1..=1i64 {
            for dx in -1..=1i64 {
                let (x, y) = (cx + dx, cy + dy);
                if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
                    continue;
                }
                let w = if dx == 0 && dy == 0 {
                    1.0
                } else if dx == 0 || dy == 0 {
                    0.35
                } else {
                    0.15
                };
                data[y as usize * self.width + x as usize] += (value * w) as f32;
            }
        }
    }

    fn bragg(&self, config: &SimConfig, data: &mut [f32]) {
        let lines = config.spectrum.condensed(self.max_spectral_lines);
        let total: f64 = lines.iter().map(|l| l.flux).sum();
        if total <= 0.0 {
            return;
        }
        let lam_min = lines.iter().map(|l| l.wavelength).fold(f64::INFINITY, f64::min);
        let lam_max = lines.iter().map(|l| l.wavelength).fold(0.0, f64::max);

        let rot = Orientation::from_missetting(config.missetting_deg).compose(&config.orientation);
        let basis = config.cell.reciprocal_basis();
        let mean_len = (config.cell.a + config.cell.b + config.cell.c) / 3.0;
        let domain_width = 1.0 / (config.domain_size.max(1.0) * mean_len);
        let eta = config.mosaic_deg.to_radians();
        let q_max = 1.0 / self.d_min;

        let hmax = [config.cell.a, config.cell.b, config.cell.c].map(|l| (l / self.d_min).ceil() as i64);
        for h in -hmax[0]..=hmax[0] {
            for k in -hmax[1]..=hmax[1] {
                for l in -hmax[2]..=hmax[2] {
                    if h == 0 && k == 0 && l == 0 {
                        continue;
                    }
                    let hkl = [h as f64, k as f64, l as f64];
                    let q0 = [0, 1, 2].map(|i| {
                        hkl[0] * basis[0][i] + hkl[1] * basis[1][i] + hkl[2] * basis[2][i]
                    });
                    let q = rot.apply(q0);
                    let qlen = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2]).sqrt();
                    if qlen > q_max {
                        continue;
                    }
                    // reflections with q_z > 0 can never meet the sphere
                    if q[2] > 0.0 {
                        continue;
                    }
                    let sigma = (domain_width * domain_width + (qlen * eta).powi(2)).sqrt();

                    // quick reject against the whole wavelength range
                    let reach = |lam: f64| {
                        let s = [q[0], q[1], q[2] + 1.0 / lam];
                        (s[0] * s[0] + s[1] * s[1] + s[2] * s[2]).sqrt() - 1.0 / lam
                    };
                    let (e_lo, e_hi) = (reach(lam_min), reach(lam_max));
                    if e_lo.min(e_hi) > 5.0 * sigma || e_lo.max(e_hi) < -5.0 * sigma {
                        continue;
                    }

                    let f2 = if config.structure_factors {
                        pseudo_f2(h, k, l) * (-10.0 * qlen * qlen).exp()
                    } else {
                        1.0
                    };

                    for line in &lines {
                        let inv = 1.0 / line.wavelength;
                        let s1 = [q[0], q[1], q[2] + inv];
                        let s1len = (s1[0] * s1[0] + s1[1] * s1[1] + s1[2] * s1[2]).sqrt();
                        let e = s1len - inv;
                        if e.abs() > 5.0 * sigma {
                            continue;
                        }
                        let partiality = (-0.5 * (e / sigma).powi(2)).exp();
                        if let Some((px, py)) = self.project(s1) {
                            let value = f2 * partiality * (line.flux / total) * (domain_width / sigma);
                            self.splat(data, px, py, value);
                        }
                    }
                }
            }
        }
    }

    fn diffuse(&self, config: &SimConfig, model: &DiffuseModel, data: &mut [f32]) {
        let Some(lam) = config.spectrum.mean_wavelength() else {
            return;
        };
        let inv = 1.0 / lam;
        let rot = Orientation::from_missetting(config.missetting_deg).compose(&config.orientation);
        let [a, b, c] = config.cell.lengths();

        for y in 0..self.height {
            for x in 0..self.width {
                let dx = (x as f64 + 0.5 - self.width as f64 / 2.0) * self.pixel_mm;
                let dy = (y as f64 + 0.5 - self.height as f64 / 2.0) * self.pixel_mm;
                let r = (dx * dx + dy * dy + self.distance_mm * self.distance_mm).sqrt();
                let lab = [dx / r * inv, dy / r * inv, self.distance_mm / r * inv - inv];
                // back into crystal frame (rotation inverse = transpose)
                let m = &rot.matrix;
                let qc = [0, 1, 2].map(|i| m[0][i] * lab[0] + m[1][i] * lab[1] + m[2][i] * lab[2]);
                let frac = [qc[0] * a, qc[1] * b, qc[2] * c];

                let mut value = 1.0;
                for axis in 0..3 {
                    let dh = (frac[axis] - frac[axis].round()) / [a, b, c][axis];
                    let g = model.gamma[axis] * TAU * dh;
                    let s2 = (model.sigma[axis] * TAU * qc[axis]).powi(2);
                    value *= s2 * (-s2).exp() / (1.0 + g * g);
                }
                data[y * self.width + x] += (value.cbrt() * 1e-3) as f32;
            }
        }
    }
}

/// Deterministic stand-in for |F(hkl)|^2, exponentially distributed.
fn pseudo_f2(h: i64, k: i64, l: i64) -> f64 {
    let mut z = (h as u64)
        .wrapping_mul(0x9E3779B97F4A7C15)
        .wrapping_add((k as u64).wrapping_mul(0xBF58476D1CE4E5B9))
        .wrapping_add((l as u64).wrapping_mul(0x94D049BB133111EB));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^= z >> 31;
    let u = ((z >> 11) as f64 + 0.5) / (1u64 << 53) as f64;
    -u.ln()
}

impl Engine for PreviewEngine {
    fn simulate(&self, config: &SimConfig) -> Result<ImageBuffer, EngineError> {
        if self.width == 0 || self.height == 0 {
            return Err(EngineError("detector has no pixels".to_string()));
        }
        if config.spectrum.lines.is_empty() {
            return Err(EngineError("empty spectrum".to_string()));
        }
        let mut data = vec![0.0f32; self.width * self.height];
        self.bragg(config, &mut data);
        if let Some(model) = &config.diffuse {
            self.diffuse(config, model, &mut data);
        }
        Ok(ImageBuffer::from_data(self.width, self.height, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn config() -> SimConfig {
        SimConfig {
            cell: UnitCell {
                a: 40.0,
                b: 40.0,
                c: 40.0,
                alpha: 90.0,
                beta: 90.0,
                gamma: 90.0,
            },
            domain_size: 30.0,
            mosaic_deg: 0.5,
            missetting_deg: [0.0; 3],
            orientation: Orientation::default(),
            spectrum: Spectrum::gaussian(9500.0, 1.0),
            structure_factors: false,
            diffuse: None,
        }
    }

    fn is_rotation(m: &Mat3) -> bool {
        let t = [0, 1, 2].map(|i| [0, 1, 2].map(|j| m[j][i]));
        let p = mat_mul(m, &t);
        (0..3).all(|i| (0..3).all(|j| (p[i][j] - IDENTITY[i][j]).abs() < 1e-9))
    }

    #[test]
    fn random_orientations_are_rotations() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let o = Orientation::random(&mut rng);
            assert!(is_rotation(&o.matrix));
        }
    }

    #[test]
    fn missetting_about_z_rotates_the_x_axis() {
        let o = Orientation::from_missetting([0.0, 0.0, 90.0]);
        let v = o.apply([1.0, 0.0, 0.0]);
        assert!(v[0].abs() < 1e-12 && (v[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn preview_produces_spots_deterministically() {
        let engine = PreviewEngine::new(64, 32);
        let a = engine.simulate(&config()).unwrap();
        let b = engine.simulate(&config()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.data.len(), 64 * 32);
        assert!(a.data.iter().all(|v| *v >= 0.0));
        assert!(a.data.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn empty_spectrum_is_an_engine_error() {
        let engine = PreviewEngine::new(8, 8);
        let mut cfg = config();
        cfg.spectrum = Spectrum::default();
        assert!(engine.simulate(&cfg).is_err());
    }

    #[test]
    fn diffuse_adds_background() {
        let engine = PreviewEngine::new(32, 16);
        let mut cfg = config();
        let plain = engine.simulate(&cfg).unwrap();
        cfg.diffuse = Some(DiffuseModel::anisotropic(50.0, 0.3, 1.0));
        let diffuse = engine.simulate(&cfg).unwrap();
        let sum = |img: &ImageBuffer| img.data.iter().map(|v| *v as f64).sum::<f64>();
        assert!(sum(&diffuse) > sum(&plain));
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        let img = ImageBuffer::from_data(5, 1, vec![4.0, 0.0, 2.0, 1.0, 3.0]);
        assert_eq!(img.percentile(0.0), 0.0);
        assert_eq!(img.percentile(50.0), 2.0);
        assert_eq!(img.percentile(100.0), 4.0);
    }
}
