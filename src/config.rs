use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use simview::images::{DisplayMode, Palette};
use simview::params::ParamTable;
use simview::spectrum::SpectrumMode;
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub(crate) seed: u64,
    pub(crate) enable_color: bool,
    pub(crate) palette: Palette,
    pub(crate) display_mode: DisplayMode,
    pub(crate) spectrum: SpectrumMode,
    pub(crate) detector_width: usize,
    pub(crate) detector_height: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            seed: 0xC0FFEE_u64,
            enable_color: true,
            palette: Palette::Magma,
            display_mode: DisplayMode::Overlaid,
            spectrum: SpectrumMode::Gaussian,
            detector_width: 192,
            detector_height: 96,
        }
    }
}

pub(crate) struct Paths {
    pub(crate) settings_path: PathBuf,
    pub(crate) params_path: PathBuf,
    pub(crate) log_path: PathBuf,
}

pub(crate) fn project_paths() -> Result<Paths> {
    let proj = ProjectDirs::from("org", "simview", "SimView")
        .context("could not resolve project directories")?;
    let dir = proj.data_local_dir().to_path_buf();
    fs::create_dir_all(&dir).ok();
    Ok(Paths {
        settings_path: dir.join("settings.json"),
        params_path: dir.join("params.json"),
        log_path: dir.join("simview.log"),
    })
}

/// The terminal is in raw mode while we run, so log records go to a file.
/// `RUST_LOG` picks the level, `info` by default.
pub(crate) fn init_logging(path: &Path) -> Result<()> {
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("could not open log file {}", path.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()
        .context("logger already initialized")?;
    Ok(())
}

pub(crate) fn load_settings(path: &Path) -> Settings {
    if let Ok(s) = fs::read_to_string(path) {
        match serde_json::from_str::<Settings>(&s) {
            Ok(v) => return v,
            Err(e) => log::warn!("ignoring unreadable settings {}: {e}", path.display()),
        }
    }
    Settings::default()
}

/// An explicitly requested table must load; the one in the data directory is
/// optional and falls back to the built-in table.
pub(crate) fn load_param_table(path: &Path, required: bool) -> Result<ParamTable> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) if !required => return Ok(ParamTable::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("could not read {}", path.display()));
        }
    };
    let parsed = serde_json::from_str::<ParamTable>(&text)
        .map_err(anyhow::Error::from)
        .and_then(|t| {
            t.validate().map_err(anyhow::Error::msg)?;
            Ok(t)
        });
    match parsed {
        Ok(t) => {
            log::info!("parameter table from {}", path.display());
            Ok(t)
        }
        Err(e) if !required => {
            log::warn!("ignoring parameter table {}: {e}", path.display());
            Ok(ParamTable::default())
        }
        Err(e) => Err(e).with_context(|| format!("bad parameter table {}", path.display())),
    }
}

pub(crate) fn save_settings_atomic(path: &Path, s: &Settings) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(s)?;
    fs::write(&tmp, data)?;
    // rename replaces an existing target in one step
    fs::rename(&tmp, path)
        .with_context(|| format!("could not replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("simview-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn settings_round_trip() {
        let path = scratch("settings.json");
        let s = Settings {
            palette: Palette::Greys,
            spectrum: SpectrumMode::Sase,
            ..Settings::default()
        };
        save_settings_atomic(&path, &s).unwrap();
        let back = load_settings(&path);
        assert_eq!(back.palette, Palette::Greys);
        assert_eq!(back.spectrum, SpectrumMode::Sase);
        assert_eq!(back.detector_width, 192);
    }

    #[test]
    fn saving_over_existing_settings_replaces_them() {
        let path = scratch("replace.json");
        save_settings_atomic(&path, &Settings::default()).unwrap();
        let s = Settings {
            seed: 42,
            ..Settings::default()
        };
        save_settings_atomic(&path, &s).unwrap();
        assert_eq!(load_settings(&path).seed, 42);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn partial_settings_fill_in_defaults() {
        let path = scratch("partial.json");
        fs::write(&path, r#"{"enable_color": false}"#).unwrap();
        let s = load_settings(&path);
        assert!(!s.enable_color);
        assert_eq!(s.display_mode, DisplayMode::Overlaid);
    }

    #[test]
    fn missing_optional_table_falls_back() {
        let path = scratch("no-such-params.json");
        let t = load_param_table(&path, false).unwrap();
        assert_eq!(t, ParamTable::default());
        assert!(load_param_table(&path, true).is_err());
    }

    #[test]
    fn invalid_required_table_is_an_error() {
        let path = scratch("bad-params.json");
        fs::write(
            &path,
            r#"[{"name":"x","min":5,"max":1,"step":1,"big_step":1,"default":3}]"#,
        )
        .unwrap();
        assert!(load_param_table(&path, true).is_err());
        assert_eq!(load_param_table(&path, false).unwrap(), ParamTable::default());
    }
}
