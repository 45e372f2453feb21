use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::err::{OsrError, OsrResult};
use crate::video::is_video_file_name;

/// A label together with the directory holding its videos
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingClass {
    pub label: String,
    pub source_directory: PathBuf,
}

impl TrainingClass {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(label: S, source_directory: P) -> Self {
        Self {
            label: label.into(),
            source_directory: source_directory.into(),
        }
    }

    /// Regular files of the class directory that look like videos, ordered by file name
    pub fn video_files(&self) -> OsrResult<Vec<PathBuf>> {
        let mut files = Vec::new();

        for entry in fs::read_dir(&self.source_directory)? {
            let entry = entry?;

            if entry.file_type()?.is_file() && is_video_file_name(&entry.path()) {
                files.push(entry.path());
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Ok(files)
    }
}

/// Classes sorted by label, the position in the result being the class index
pub fn classes_from_map(map: BTreeMap<String, PathBuf>) -> Vec<TrainingClass> {
    map.into_iter()
        .map(|(label, dir)| TrainingClass::new(label, dir))
        .collect()
}

/// Reads a JSON object mapping class labels to source directories
pub fn load_training_classes(path: &Path) -> OsrResult<Vec<TrainingClass>> {
    let cfg_str = fs::read_to_string(path)?;
    let map: BTreeMap<String, PathBuf> = serde_json::from_str(&cfg_str)?;

    if map.is_empty() {
        return Err(OsrError::InvalidConfig(format!(
            "{} declares no training classes",
            path.display()
        )));
    }

    let classes = classes_from_map(map);

    for (idx, c) in classes.iter().enumerate() {
        info!("Class {} : {} <= {}", idx, c.label, c.source_directory.display());
    }

    Ok(classes)
}

pub fn joined_labels(classes: &[TrainingClass]) -> String {
    classes
        .iter()
        .map(|c| c.label.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn one_hot(class_idx: usize, num_classes: usize) -> Vec<i32> {
    let mut v = vec![0; num_classes];
    v[class_idx] = 1;
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("osr_classes_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_classes_are_sorted_by_label() {
        let mut map = BTreeMap::new();
        map.insert("world".to_owned(), PathBuf::from("/w"));
        map.insert("hello".to_owned(), PathBuf::from("/h"));
        map.insert("bye".to_owned(), PathBuf::from("/b"));

        let classes = classes_from_map(map);

        assert_eq!(joined_labels(&classes), "bye,hello,world");
        assert_eq!(classes[1].source_directory, PathBuf::from("/h"));
    }

    #[test]
    fn test_one_hot() {
        assert_eq!(one_hot(0, 2), vec![1, 0]);
        assert_eq!(one_hot(2, 4), vec![0, 0, 1, 0]);
    }

    #[test]
    fn test_video_files_filtered_and_ordered() {
        let dir = scratch_dir("scan");
        for name in ["b.mov", "a.MP4", "notes.txt", "c.avi"] {
            fs::write(dir.join(name), b"").unwrap();
        }
        fs::create_dir_all(dir.join("d.mov")).unwrap();

        let files = TrainingClass::new("x", &dir).video_files().unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();

        assert_eq!(names, vec!["a.MP4", "b.mov", "c.avi"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_training_classes_from_json() {
        let dir = scratch_dir("json");
        let cfg = dir.join("training_config.json");
        fs::write(&cfg, r#"{"yes": "/data/yes", "no": "/data/no"}"#).unwrap();

        let classes = load_training_classes(&cfg).unwrap();

        assert_eq!(classes[0], TrainingClass::new("no", "/data/no"));
        assert_eq!(classes[1], TrainingClass::new("yes", "/data/yes"));

        fs::write(&cfg, "{}").unwrap();
        assert!(matches!(load_training_classes(&cfg), Err(OsrError::InvalidConfig(_))));

        fs::remove_dir_all(&dir).unwrap();
    }
}
