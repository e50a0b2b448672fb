//! JSON configuration for the render drivers.

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use surgsynth_core::{CameraIntrinsics, CoreIoError};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("camera parameters {path}: {source}")]
    Camera {
        path: PathBuf,
        #[source]
        source: CoreIoError,
    },
    #[error("{mode:?} mode needs {needs}")]
    NoTargets { mode: DriverMode, needs: &'static str },
    #[error("the data path does not exist: {0}")]
    HavenMissing(PathBuf),
    #[error("the folder {0} is missing its `hdris` directory")]
    HdriDirMissing(PathBuf),
    #[error("no .hdr files found under {0}")]
    NoHdris(PathBuf),
}

/// Unit of work the driver iterates over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverMode {
    /// One tool at a time, free camera on a shell around it.
    Single,
    /// Every (needle holder, tweezers) pair, fixed camera.
    #[default]
    Paired,
}

/// What to do when a unit ends with fewer accepted poses than its quota.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallPolicy {
    /// Log a warning and continue with the next unit.
    #[default]
    Warn,
    /// Continue silently.
    Ignore,
    /// Abort the run once the short unit's frames have been written.
    Error,
}

fn default_camera_params() -> PathBuf {
    PathBuf::from("camera.json")
}

fn default_num_images() -> usize {
    50
}

fn default_occluder_mesh() -> PathBuf {
    PathBuf::from("Hand_LowPoly.obj")
}

fn default_seed() -> u64 {
    43
}

fn default_max_pose_tries() -> usize {
    300
}

/// Render run configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub needle_holders: Vec<PathBuf>,
    #[serde(default)]
    pub tweezers: Vec<PathBuf>,
    /// Camera intrinsics JSON (`fx, fy, cx, cy, width, height`).
    #[serde(default = "default_camera_params")]
    pub camera_params: PathBuf,
    /// Annotations go to `<output_dir>/coco_data`.
    #[serde(default)]
    pub output_dir: PathBuf,
    #[serde(default = "default_num_images")]
    pub num_images: usize,
    /// Poly Haven style download directory; enables HDRI world backgrounds.
    #[serde(default)]
    pub haven_path: Option<PathBuf>,
    /// Block at startup until Enter is pressed so a debugger can attach.
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_occluder_mesh")]
    pub occluder_mesh: PathBuf,
    #[serde(default)]
    pub mode: DriverMode,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Pose samples per unit in single mode.
    #[serde(default = "default_max_pose_tries")]
    pub max_pose_tries: usize,
    #[serde(default)]
    pub shortfall_policy: ShortfallPolicy,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            needle_holders: Vec::new(),
            tweezers: Vec::new(),
            camera_params: default_camera_params(),
            output_dir: PathBuf::new(),
            num_images: default_num_images(),
            haven_path: None,
            debug: false,
            occluder_mesh: default_occluder_mesh(),
            mode: DriverMode::default(),
            seed: default_seed(),
            max_pose_tries: default_max_pose_tries(),
            shortfall_policy: ShortfallPolicy::default(),
        }
    }
}

impl RenderConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Directory the COCO store lives in.
    pub fn coco_dir(&self) -> PathBuf {
        self.output_dir.join("coco_data")
    }

    /// Images requested per unit: per mesh in single mode, per pair in
    /// paired mode. Integer division, so the total may fall short of
    /// `num_images`.
    pub fn images_per_unit(&self) -> Result<usize, ConfigError> {
        let (nh, tw) = (self.needle_holders.len(), self.tweezers.len());
        match self.mode {
            DriverMode::Single if nh + tw == 0 => Err(ConfigError::NoTargets {
                mode: self.mode,
                needs: "at least one needle holder or tweezers mesh",
            }),
            DriverMode::Single => Ok(self.num_images / (nh + tw)),
            DriverMode::Paired if nh == 0 || tw == 0 => Err(ConfigError::NoTargets {
                mode: self.mode,
                needs: "at least one needle holder and one tweezers mesh",
            }),
            DriverMode::Paired => Ok(self.num_images / (nh * tw)),
        }
    }

    pub fn build_intrinsics(&self) -> Result<CameraIntrinsics, ConfigError> {
        CameraIntrinsics::load_json(&self.camera_params).map_err(|source| ConfigError::Camera {
            path: self.camera_params.clone(),
            source,
        })
    }

    /// HDRI files of the configured haven, or an empty list without one.
    pub fn build_hdris(&self) -> Result<Vec<PathBuf>, ConfigError> {
        match &self.haven_path {
            Some(haven) => find_hdr_files(haven),
            None => Ok(Vec::new()),
        }
    }
}

/// Collect `<haven>/hdris/*/*.hdr`, sorted so runs are reproducible.
pub fn find_hdr_files(haven: impl AsRef<Path>) -> Result<Vec<PathBuf>, ConfigError> {
    let haven = haven.as_ref();
    if !haven.exists() {
        return Err(ConfigError::HavenMissing(haven.to_path_buf()));
    }
    let hdris = haven.join("hdris");
    if !hdris.is_dir() {
        return Err(ConfigError::HdriDirMissing(haven.to_path_buf()));
    }

    let read = |dir: &Path| {
        fs::read_dir(dir).map_err(|source| ConfigError::Read {
            path: dir.to_path_buf(),
            source,
        })
    };

    let mut files = Vec::new();
    for entry in read(&hdris)?.flatten() {
        let sub = entry.path();
        if !sub.is_dir() {
            continue;
        }
        for file in read(&sub)?.flatten() {
            let path = file.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "hdr") {
                files.push(path);
            }
        }
    }
    if files.is_empty() {
        return Err(ConfigError::NoHdris(hdris));
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg: RenderConfig =
            serde_json::from_str(r#"{ "needle_holders": ["a.obj"], "tweezers": ["b.obj"] }"#)
                .unwrap();
        assert_eq!(cfg.num_images, 50);
        assert_eq!(cfg.camera_params, PathBuf::from("camera.json"));
        assert_eq!(cfg.mode, DriverMode::Paired);
        assert_eq!(cfg.seed, 43);
        assert_eq!(cfg.max_pose_tries, 300);
        assert_eq!(cfg.shortfall_policy, ShortfallPolicy::Warn);
        assert!(!cfg.debug);
        assert!(cfg.haven_path.is_none());
    }

    #[test]
    fn quotas_use_integer_division_per_mode() {
        let mut cfg = RenderConfig {
            needle_holders: vec!["n1".into(), "n2".into()],
            tweezers: vec!["t1".into(), "t2".into(), "t3".into()],
            num_images: 64,
            ..RenderConfig::default()
        };
        assert_eq!(cfg.images_per_unit().unwrap(), 10);
        cfg.mode = DriverMode::Single;
        assert_eq!(cfg.images_per_unit().unwrap(), 12);

        cfg.tweezers.clear();
        assert_eq!(cfg.images_per_unit().unwrap(), 32);
        cfg.mode = DriverMode::Paired;
        assert!(matches!(
            cfg.images_per_unit(),
            Err(ConfigError::NoTargets { .. })
        ));
    }

    #[test]
    fn hdr_discovery_is_sorted_and_reports_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_hdr_files(dir.path().join("nope")),
            Err(ConfigError::HavenMissing(_))
        ));
        assert!(matches!(
            find_hdr_files(dir.path()),
            Err(ConfigError::HdriDirMissing(_))
        ));

        for (sub, file) in [("zeta", "b.hdr"), ("alpha", "a.hdr"), ("alpha", "notes.txt")] {
            let d = dir.path().join("hdris").join(sub);
            fs::create_dir_all(&d).unwrap();
            fs::write(d.join(file), b"").unwrap();
        }
        let files = find_hdr_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("hdris/alpha/a.hdr"),
                PathBuf::from("hdris/zeta/b.hdr")
            ]
        );
    }

    #[test]
    fn config_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.json");
        let cfg = RenderConfig {
            mode: DriverMode::Single,
            shortfall_policy: ShortfallPolicy::Error,
            ..RenderConfig::default()
        };
        cfg.write_json(&path).unwrap();
        let back = RenderConfig::load_json(&path).unwrap();
        assert_eq!(back.mode, DriverMode::Single);
        assert_eq!(back.shortfall_policy, ShortfallPolicy::Error);
    }
}
