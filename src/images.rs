//! Current vs. reference image buffers and how they are composed for display.

use crate::engine::{ImageBuffer, Orientation};
use crate::error::EngineError;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayMode {
    /// reference in red, current in blue; overlap reads grey/white
    Overlaid,
    CurrentOnly,
}

impl DisplayMode {
    pub fn toggled(self) -> Self {
        match self {
            DisplayMode::Overlaid => DisplayMode::CurrentOnly,
            DisplayMode::CurrentOnly => DisplayMode::Overlaid,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DisplayMode::Overlaid => "overlay",
            DisplayMode::CurrentOnly => "current",
        }
    }
}

/// Colouring of the single-channel frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Palette {
    Magma,
    Greys,
}

impl Palette {
    pub fn toggled(self) -> Self {
        match self {
            Palette::Magma => Palette::Greys,
            Palette::Greys => Palette::Magma,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Palette::Magma => "magma",
            Palette::Greys => "greys",
        }
    }

    /// `t` in [0, 1].
    pub fn map(self, t: f32) -> [u8; 3] {
        let t = t.clamp(0.0, 1.0);
        match self {
            Palette::Greys => {
                let v = to_u8(t);
                [v, v, v]
            }
            Palette::Magma => {
                // piecewise-linear through a few magma stops
                const STOPS: [(f32, [f32; 3]); 5] = [
                    (0.00, [0.0, 0.0, 0.02]),
                    (0.25, [0.23, 0.06, 0.44]),
                    (0.50, [0.55, 0.16, 0.51]),
                    (0.75, [0.90, 0.35, 0.38]),
                    (1.00, [0.99, 0.99, 0.75]),
                ];
                let mut out = STOPS[STOPS.len() - 1].1;
                for pair in STOPS.windows(2) {
                    let ((t0, c0), (t1, c1)) = (pair[0], pair[1]);
                    if t <= t1 {
                        let f = (t - t0) / (t1 - t0);
                        out = [0, 1, 2].map(|i| c0[i] + (c1[i] - c0[i]) * f);
                        break;
                    }
                }
                out.map(to_u8)
            }
        }
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// Brightness dial -> intensity percentile that saturates to white.
pub fn brightness_percentile(brightness: f64) -> f64 {
    (100.0 - 10f64.powf(brightness * 2.0 - 2.0)).clamp(0.0, 100.0)
}

/// Scale so the `percentile` intensity maps to 1, clipping above.
pub fn normalize(data: &[f32], percentile: f64) -> Vec<f32> {
    let flat = ImageBuffer::from_data(data.len(), 1, data.to_vec());
    let scale = 1.0 / flat.percentile(percentile).max(1e-30);
    data.iter().map(|v| (v * scale).min(1.0)).collect()
}

/// What the render sink receives. Channel values are in [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub enum RenderableFrame {
    Overlay {
        width: usize,
        height: usize,
        rgb: Vec<[f32; 3]>,
    },
    Single {
        width: usize,
        height: usize,
        values: Vec<f32>,
        palette: Palette,
    },
}

impl RenderableFrame {
    pub fn size(&self) -> (usize, usize) {
        match self {
            RenderableFrame::Overlay { width, height, .. }
            | RenderableFrame::Single { width, height, .. } => (*width, *height),
        }
    }

    /// Brightest channel at a pixel.
    pub fn level(&self, x: usize, y: usize) -> f32 {
        match self {
            RenderableFrame::Overlay { width, rgb, .. } => {
                let [r, g, b] = rgb[y * width + x];
                r.max(g).max(b)
            }
            RenderableFrame::Single { width, values, .. } => values[y * width + x],
        }
    }

    pub fn color(&self, x: usize, y: usize) -> [u8; 3] {
        match self {
            RenderableFrame::Overlay { width, rgb, .. } => rgb[y * width + x].map(to_u8),
            RenderableFrame::Single {
                width,
                values,
                palette,
                ..
            } => palette.map(values[y * width + x]),
        }
    }
}

/// The live simulation next to a frozen reference.
#[derive(Clone, Debug)]
pub struct DualImageState {
    current: ImageBuffer,
    reference: ImageBuffer,
    pub mode: DisplayMode,
    pub palette: Palette,
}

impl DualImageState {
    /// Both buffers start from the same first render.
    pub fn new(initial: ImageBuffer, mode: DisplayMode, palette: Palette) -> Self {
        Self {
            current: initial.clone(),
            reference: initial,
            mode,
            palette,
        }
    }

    pub fn current(&self) -> &ImageBuffer {
        &self.current
    }

    pub fn reference(&self) -> &ImageBuffer {
        &self.reference
    }

    pub fn update_current(&mut self, image: ImageBuffer) {
        self.current = image;
    }

    /// Freeze a copy of the current image as the reference.
    pub fn update_reference(&mut self) {
        self.reference = self.current.clone();
    }

    pub fn toggle_mode(&mut self) -> DisplayMode {
        self.mode = self.mode.toggled();
        self.mode
    }

    /// Draw a uniformly random rotation, render it once, and put the result
    /// in both buffers. Nothing changes if the render fails.
    pub fn randomize_orientation<R, F>(
        &mut self,
        rng: &mut R,
        render: F,
    ) -> Result<Orientation, EngineError>
    where
        R: Rng,
        F: FnOnce(&Orientation) -> Result<ImageBuffer, EngineError>,
    {
        let orientation = Orientation::random(rng);
        let image = render(&orientation)?;
        self.current = image.clone();
        self.reference = image;
        Ok(orientation)
    }

    pub fn compose(&self, percentile: f64) -> RenderableFrame {
        let (width, height) = (self.current.width, self.current.height);
        match self.mode {
            DisplayMode::CurrentOnly => RenderableFrame::Single {
                width,
                height,
                values: normalize(&self.current.data, percentile),
                palette: self.palette,
            },
            DisplayMode::Overlaid => {
                let reference: &[f32] = if self.reference.data.len() == self.current.data.len() {
                    &self.reference.data
                } else {
                    &[]
                };
                let sum: Vec<f32> = self
                    .current
                    .data
                    .iter()
                    .enumerate()
                    .map(|(i, c)| c + reference.get(i).copied().unwrap_or(0.0))
                    .collect();
                let red = if reference.is_empty() {
                    vec![0.0; self.current.data.len()]
                } else {
                    normalize(reference, percentile)
                };
                let green = normalize(&sum, percentile);
                let blue = normalize(&self.current.data, percentile);
                let rgb = red
                    .into_iter()
                    .zip(green)
                    .zip(blue)
                    .map(|((r, g), b)| [r, g, b])
                    .collect();
                RenderableFrame::Overlay { width, height, rgb }
            }
        }
    }
}
