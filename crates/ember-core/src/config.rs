// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("max_frames_in_flight must be at least 1")]
    NoFramesInFlight,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub assets: AssetCfg,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "ember".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderCfg {
    pub max_frames_in_flight: usize,
    pub msaa: bool,
    pub clear_color: [f32; 4],
    pub validation: bool,
    /// Instance layers enabled when `validation` is on.
    pub validation_layers: Vec<String>,
    pub pipeline_cache: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            max_frames_in_flight: 2,
            msaa: true,
            clear_color: default_clear(),
            validation: cfg!(debug_assertions),
            validation_layers: vec!["VK_LAYER_KHRONOS_validation".to_owned()],
            pipeline_cache: true,
        }
    }
}

/// Optional asset paths; anything left unset falls back to the built-in
/// quad, checkerboard and embedded shaders.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AssetCfg {
    pub model: Option<PathBuf>,
    pub texture: Option<PathBuf>,
    pub vertex_shader: Option<PathBuf>,
    pub fragment_shader: Option<PathBuf>,
}

fn default_clear() -> [f32; 4] {
    [100.0 / 255.0, 149.0 / 255.0, 237.0 / 255.0, 1.0]
}

impl AppCfg {
    pub fn from_toml_str(path: &Path, s: &str) -> Result<Self, ConfigError> {
        let cfg: AppCfg = toml::from_str(s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render.max_frames_in_flight == 0 {
            return Err(ConfigError::NoFramesInFlight);
        }
        Ok(())
    }
}

/// Reads `path`; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<AppCfg, ConfigError> {
    match fs::read_to_string(path) {
        Ok(s) => AppCfg::from_toml_str(path, &s),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("no config at {} → defaults", path.display());
            Ok(AppCfg::default())
        }
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let cfg = AppCfg::default();
        assert_eq!(cfg.render.max_frames_in_flight, 2);
        assert!(cfg.render.msaa);
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(
            cfg.render.validation_layers,
            vec!["VK_LAYER_KHRONOS_validation".to_owned()]
        );
        assert!(cfg.assets.model.is_none());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let src = r#"
            [render]
            max_frames_in_flight = 3
            validation_layers = []

            [assets]
            model = "assets/dragon.obj"
        "#;
        let cfg = AppCfg::from_toml_str(Path::new("ember.toml"), src).unwrap();
        assert_eq!(cfg.render.max_frames_in_flight, 3);
        assert!(cfg.render.validation_layers.is_empty());
        assert!(cfg.render.msaa);
        assert_eq!(cfg.window.title, "ember");
        assert_eq!(
            cfg.assets.model.as_deref(),
            Some(Path::new("assets/dragon.obj"))
        );
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let src = "[render]\nmax_frames_in_flight = 0\n";
        let err = AppCfg::from_toml_str(Path::new("ember.toml"), src).unwrap_err();
        assert!(matches!(err, ConfigError::NoFramesInFlight));
    }

    #[test]
    fn malformed_toml_reports_path() {
        let err = AppCfg::from_toml_str(Path::new("bad.toml"), "[render\n").unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load_config(Path::new("definitely/not/here/ember.toml")).unwrap();
        assert_eq!(cfg.render.max_frames_in_flight, 2);
    }
}
