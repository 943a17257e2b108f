//! Interactive controller for exploring simulated diffraction stills: an
//! ordered registry of crystal and beam parameters, a cursor over them, a
//! caching bridge to the diffraction engine, and a current/reference image
//! pair with overlay and single-image display modes.

pub mod bridge;
pub mod controller;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod images;
pub mod params;
pub mod spectrum;
pub mod symmetry;

pub use controller::{ControlEvent, Controller, ControllerOptions, Outcome};
pub use error::{ControlError, EngineError, StructureLoadError};
