//! Directory-level compositing run.

use image::DynamicImage;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::blend::composite;

/// Chance that a chosen background is darkened.
pub const DARKEN_PROBABILITY: f64 = 0.3;
/// Range the darkening factor is drawn from.
pub const DARKEN_RANGE: (f64, f64) = (0.4, 0.9);
/// Output directory name that resolves inside the images directory.
pub const DEFAULT_OUTPUT: &str = "output";

#[derive(thiserror::Error, Debug)]
pub enum CompositeError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("foreground {0} has no alpha channel")]
    MissingAlpha(PathBuf),
    #[error("no background images with a matching extension in {0}")]
    NoBackgrounds(PathBuf),
}

pub fn default_types() -> Vec<String> {
    ["jpg", "jpeg", "png"].map(String::from).to_vec()
}

fn default_output() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT)
}

/// Options of one compositing run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompositeOptions {
    /// Directory of foreground cutouts with alpha.
    pub images: PathBuf,
    pub backgrounds: PathBuf,
    /// File extensions to consider, matched case-insensitively.
    #[serde(default = "default_types")]
    pub types: Vec<String>,
    /// Write composites over the source files.
    #[serde(default)]
    pub overwrite: bool,
    /// Output directory; the default `output` means `<images>/output`.
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl CompositeOptions {
    pub fn new(images: impl Into<PathBuf>, backgrounds: impl Into<PathBuf>) -> Self {
        Self {
            images: images.into(),
            backgrounds: backgrounds.into(),
            types: default_types(),
            overwrite: false,
            output: default_output(),
            seed: None,
        }
    }

    /// Where composites are written, or `None` when overwriting in place.
    pub fn output_dir(&self) -> Option<PathBuf> {
        if self.overwrite {
            None
        } else if self.output == Path::new(DEFAULT_OUTPUT) {
            Some(self.images.join(DEFAULT_OUTPUT))
        } else {
            Some(self.output.clone())
        }
    }
}

/// Files in `dir` whose extension is one of `types`, sorted by path.
pub fn collect_images(dir: &Path, types: &[String]) -> Result<Vec<PathBuf>, CompositeError> {
    let types: Vec<String> = types
        .iter()
        .map(|t| t.trim_start_matches('.').to_ascii_lowercase())
        .collect();
    let entries = fs::read_dir(dir).map_err(|source| CompositeError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .is_some_and(|e| types.contains(&e))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn open_image(path: &Path) -> Result<DynamicImage, CompositeError> {
    image::open(path).map_err(|source| CompositeError::Image {
        path: path.to_path_buf(),
        source,
    })
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| e == "jpg" || e == "jpeg")
}

/// One written composite.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeRecord {
    pub foreground: PathBuf,
    pub background: PathBuf,
    pub darken_factor: Option<f64>,
    pub output: PathBuf,
}

pub struct Compositor {
    options: CompositeOptions,
    backgrounds: Vec<PathBuf>,
    rng: StdRng,
}

impl Compositor {
    /// List the background pool and prepare the output directory.
    pub fn new(options: CompositeOptions) -> Result<Self, CompositeError> {
        let backgrounds = collect_images(&options.backgrounds, &options.types)?;
        if backgrounds.is_empty() {
            return Err(CompositeError::NoBackgrounds(options.backgrounds.clone()));
        }
        if let Some(dir) = options.output_dir() {
            fs::create_dir_all(&dir).map_err(|source| CompositeError::Io { path: dir, source })?;
        }
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        log::debug!("{} candidate backgrounds", backgrounds.len());
        Ok(Self {
            options,
            backgrounds,
            rng,
        })
    }

    pub fn options(&self) -> &CompositeOptions {
        &self.options
    }

    /// Foreground files this run will process.
    pub fn foregrounds(&self) -> Result<Vec<PathBuf>, CompositeError> {
        collect_images(&self.options.images, &self.options.types)
    }

    /// Composite a single foreground onto a random background and write it.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    pub fn process(&mut self, foreground: &Path) -> Result<CompositeRecord, CompositeError> {
        let fg = open_image(foreground)?;
        if !fg.color().has_alpha() {
            return Err(CompositeError::MissingAlpha(foreground.to_path_buf()));
        }

        let background = self
            .backgrounds
            .choose(&mut self.rng)
            .cloned()
            .ok_or_else(|| CompositeError::NoBackgrounds(self.options.backgrounds.clone()))?;
        let bg = open_image(&background)?;

        let darken_factor = if self.rng.gen::<f64>() < DARKEN_PROBABILITY {
            Some(self.rng.gen_range(DARKEN_RANGE.0..DARKEN_RANGE.1))
        } else {
            None
        };

        let out = composite(&fg, &bg, darken_factor);
        let output = match self.options.output_dir() {
            None => foreground.to_path_buf(),
            Some(dir) => dir.join(foreground.file_name().unwrap_or_default()),
        };

        let saved = if is_jpeg(&output) {
            DynamicImage::ImageRgba8(out).to_rgb8().save(&output)
        } else {
            out.save(&output)
        };
        saved.map_err(|source| CompositeError::Image {
            path: output.clone(),
            source,
        })?;
        log::trace!(
            "{} over {} (darken {:?}) -> {}",
            foreground.display(),
            background.display(),
            darken_factor,
            output.display()
        );

        Ok(CompositeRecord {
            foreground: foreground.to_path_buf(),
            background,
            darken_factor,
            output,
        })
    }

    /// Process every foreground in order, calling `progress` after each one.
    pub fn run(
        &mut self,
        mut progress: impl FnMut(&CompositeRecord),
    ) -> Result<Vec<CompositeRecord>, CompositeError> {
        let foregrounds = self.foregrounds()?;
        log::info!(
            "compositing {} images from {}",
            foregrounds.len(),
            self.options.images.display()
        );
        let mut records = Vec::with_capacity(foregrounds.len());
        for fg in &foregrounds {
            let record = self.process(fg)?;
            progress(&record);
            records.push(record);
        }
        Ok(records)
    }
}
