mod app;
mod config;
mod input;
mod render;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

const LONG_ABOUT: &str = "\
Explore simulated diffraction stills interactively.

The image compares the live simulation (blue) with a frozen reference (red);
where they coincide the overlay turns white. Pick a parameter with the left
and right arrows and step it with up and down (shift for a big step). Every
change that affects the physics triggers one simulation; brightness only
changes how the image is drawn.

Unit-cell lengths come from the CRYST1 record of the given PDB file, or from
tetragonal lysozyme when none is given. Axes fixed by the crystal symmetry
follow the axis they are tied to.

Parameters:
  DomainSize   edge of a mosaic domain, in unit cells
  MosAngDeg    mosaic spread in degrees
  a, b, c      unit-cell lengths in angstrom
  Diff_gamma   diffuse correlation length (diffuse on)
  Diff_sigma   diffuse displacement amplitude (diffuse on)
  Aniso        anisotropy of the diffuse correlation length
  Energy       photon energy in eV
  Bandwidth    Gaussian bandwidth in percent of the energy
  RotX/Y/Z     missetting angles in degrees
  Fhkl         structure factors on (1) or unit (0)
  Brightness   display saturation; never re-simulates";

#[derive(Parser, Debug)]
#[command(name = "simview", version, about = "Interactive diffraction still viewer", long_about = LONG_ABOUT)]
pub(crate) struct Args {
    /// PDB file whose CRYST1 record provides the unit cell and space group
    pub(crate) structure: Option<PathBuf>,

    /// RNG seed for random orientations and SASE pulses
    #[arg(long)]
    pub(crate) seed: Option<u64>,

    /// JSON parameter table replacing the built-in bounds and steps
    #[arg(long)]
    pub(crate) params: Option<PathBuf>,

    /// Draw without colour
    #[arg(long, default_value_t = false)]
    pub(crate) mono: bool,

    /// Start with diffuse scattering enabled
    #[arg(long, default_value_t = false)]
    pub(crate) diffuse: bool,

    /// Detector width in pixels
    #[arg(long)]
    pub(crate) width: Option<usize>,

    /// Detector height in pixels
    #[arg(long)]
    pub(crate) height: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let paths = config::project_paths()?;
    config::init_logging(&paths.log_path)?;
    app::run(args, paths)
}
