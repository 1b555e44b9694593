use crate::{
    config::{LabelsConfig, Validatable},
    error::ModelLoadError,
};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Fixed class index to name mapping of the loaded model.
#[derive(Debug, Clone)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn load(labels_cfg: &LabelsConfig) -> Result<Self, ModelLoadError> {
        let path = labels_cfg.get_path();
        let labels = load_yolo_labels(&path).map_err(|source| ModelLoadError::Labels {
            path: path.clone(),
            source,
        })?;

        if labels.is_empty() {
            return Err(ModelLoadError::EmptyLabels(path));
        }

        tracing::info!("Loaded {} class labels from {:?}", labels.len(), path);
        Ok(Self { labels })
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// One label per line, line order is class order. Blank lines and `#`
/// comments are skipped.
pub fn load_yolo_labels(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.trim();

        if label.is_empty() || label.starts_with('#') {
            continue;
        }

        labels.push(label.to_string());
    }

    Ok(labels)
}
