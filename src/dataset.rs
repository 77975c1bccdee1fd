//! Face images with per-part label masks stored on disk.
//!
//! Directory layout under `root`:
//!
//! ```text
//! <list file>                       one "id, name" pair per line
//! images/<name>.jpg                 RGB face image
//! labels/<name>/<name>_lbl00.png    grayscale mask of source label 0
//! labels/<name>/<name>_lbl01.png    ...
//! ```
//!
//! Source labels are numbered `0..NUM_SOURCE_LABELS`. A dataset keeps a
//! sorted subset of them as foreground channels and appends one residual
//! channel, `255 - sum(foreground)`, so the label volume has
//! `foreground.len() + 1` channels.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array2, Array3, Axis};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::transforms::Transform;
use crate::types::Sample;

/// Number of label masks stored per image.
pub const NUM_SOURCE_LABELS: usize = 11;

/// Full-intensity value of a label mask pixel.
pub const LABEL_FULL: f32 = 255.0;

/// Which source labels become foreground channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartSelection {
    /// Every source label except these.
    Background(BTreeSet<usize>),
    /// Exactly these source labels.
    Foreground(Vec<usize>),
}

impl PartSelection {
    /// Sorted foreground source label indices.
    pub fn foreground(&self) -> Result<Vec<usize>> {
        let fg: BTreeSet<usize> = match self {
            PartSelection::Background(bg) => (0..NUM_SOURCE_LABELS)
                .filter(|i| !bg.contains(i))
                .collect(),
            PartSelection::Foreground(fg) => fg.iter().copied().collect(),
        };
        if let Some(i) = fg.iter().find(|&&i| i >= NUM_SOURCE_LABELS) {
            return Err(Error::Config(format!(
                "label index {} is outside 0..{}",
                i, NUM_SOURCE_LABELS
            )));
        }
        if fg.is_empty() {
            return Err(Error::Config("no foreground labels selected".into()));
        }
        Ok(fg.into_iter().collect())
    }
}

impl Default for PartSelection {
    fn default() -> Self {
        PartSelection::Background([0, 1, 10].into_iter().collect())
    }
}

/// One line of the dataset list file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    pub id: String,
    pub name: String,
}

/// Parse `id, name` lines. Blank lines are ignored.
pub fn parse_list(text: &str, path: &Path) -> Result<Vec<DatasetEntry>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            let mut fields = line.splitn(2, ',');
            match (fields.next(), fields.next()) {
                (Some(id), Some(name)) if !name.trim().is_empty() => Ok(DatasetEntry {
                    id: id.trim().to_string(),
                    name: name.trim().to_string(),
                }),
                _ => Err(Error::data_load(
                    path,
                    format!("line {}: expected 'id, name', got '{}'", n + 1, line),
                )),
            }
        })
        .collect()
}

/// Indexed access to face samples on disk.
pub struct ImageDataset {
    root: PathBuf,
    entries: Vec<DatasetEntry>,
    foreground: Vec<usize>,
    transform: Option<Arc<dyn Transform>>,
}

impl ImageDataset {
    /// Open the dataset listed in `root/list_file`.
    pub fn open<P: AsRef<Path>>(
        root: P,
        list_file: &str,
        selection: &PartSelection,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let list_path = root.join(list_file);
        let text = fs::read_to_string(&list_path).map_err(|e| Error::data_load(&list_path, e))?;
        let entries = parse_list(&text, &list_path)?;
        let foreground = selection.foreground()?;

        debug!(
            root = %root.display(),
            samples = entries.len(),
            ?foreground,
            "opened dataset"
        );

        Ok(Self {
            root,
            entries,
            foreground,
            transform: None,
        })
    }

    /// Apply `transform` to every sample returned by [`get`](Self::get).
    pub fn with_transform<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry(&self, index: usize) -> Option<&DatasetEntry> {
        self.entries.get(index)
    }

    /// File stem of sample `index`.
    pub fn name(&self, index: usize) -> Result<&str> {
        self.entries
            .get(index)
            .map(|e| e.name.as_str())
            .ok_or_else(|| {
                Error::data_load(
                    &self.root,
                    format!("index {} out of range for {} samples", index, self.len()),
                )
            })
    }

    /// Sorted foreground source labels, in channel order.
    pub fn foreground(&self) -> &[usize] {
        &self.foreground
    }

    /// The transform applied by [`get`](Self::get), if any.
    pub fn transform(&self) -> Option<Arc<dyn Transform>> {
        self.transform.clone()
    }

    /// Channels per label volume, residual channel included.
    pub fn num_labels(&self) -> usize {
        self.foreground.len() + 1
    }

    pub fn image_path(&self, name: &str) -> PathBuf {
        self.root.join("images").join(format!("{}.jpg", name))
    }

    pub fn label_path(&self, name: &str, label: usize) -> PathBuf {
        label_path(&self.root.join("labels"), name, label)
    }

    /// Load sample `index` without applying the transform.
    pub fn load_raw(&self, index: usize) -> Result<Sample> {
        let name = self.name(index)?;
        let image = load_rgb(&self.image_path(name))?;
        let (h, w, _) = image.dim();
        let labels_dir = self.root.join("labels");
        let labels = load_label_volume(&labels_dir, name, &self.foreground, Some((h, w)))?;
        Sample::new(image, labels, index)
    }

    /// Load sample `index` and run it through the dataset's transform.
    pub fn get(&self, index: usize, rng: &mut dyn RngCore) -> Result<Sample> {
        let sample = self.load_raw(index)?;
        match &self.transform {
            Some(t) => t.apply(sample, rng),
            None => Ok(sample),
        }
    }
}

impl std::fmt::Debug for ImageDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDataset")
            .field("root", &self.root)
            .field("samples", &self.entries.len())
            .field("foreground", &self.foreground)
            .finish()
    }
}

/// `dir/<name>/<name>_lblNN.png`
pub fn label_path(dir: &Path, name: &str, label: usize) -> PathBuf {
    dir.join(name).join(format!("{}_lbl{:02}.png", name, label))
}

/// Read an RGB image as an `(H, W, 3)` array of 0-255 values.
pub fn load_rgb(path: &Path) -> Result<Array3<f32>> {
    let img = image::open(path)
        .map_err(|e| Error::data_load(path, e))?
        .to_rgb8();
    let (w, h) = img.dimensions();
    let data: Vec<f32> = img.into_raw().into_iter().map(f32::from).collect();
    Ok(Array3::from_shape_vec((h as usize, w as usize, 3), data)?)
}

/// Read a grayscale mask as an `(H, W)` array of 0-255 values.
pub fn load_mask(path: &Path) -> Result<Array2<f32>> {
    let img = image::open(path)
        .map_err(|e| Error::data_load(path, e))?
        .to_luma8();
    let (w, h) = img.dimensions();
    let data: Vec<f32> = img.into_raw().into_iter().map(f32::from).collect();
    Ok(Array2::from_shape_vec((h as usize, w as usize), data)?)
}

/// Stack the selected masks of `name` and append the residual channel.
///
/// Every mask must be `dims = (H, W)`; with `None` the first mask sets it.
pub fn load_label_volume(
    dir: &Path,
    name: &str,
    foreground: &[usize],
    dims: Option<(usize, usize)>,
) -> Result<Array3<f32>> {
    let mut dims = dims;
    let mut planes = Vec::with_capacity(foreground.len() + 1);
    for &label in foreground {
        let path = label_path(dir, name, label);
        let mask = load_mask(&path)?;
        let expected = *dims.get_or_insert(mask.dim());
        if mask.dim() != expected {
            return Err(Error::data_load(
                &path,
                format!("mask is {:?}, expected {:?}", mask.dim(), expected),
            ));
        }
        planes.push(mask);
    }
    let dims = dims.ok_or_else(|| Error::data_load(dir.join(name), "no foreground labels"))?;

    let mut residual = Array2::from_elem(dims, LABEL_FULL);
    for plane in &planes {
        residual -= plane;
    }
    planes.push(residual);

    let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}
