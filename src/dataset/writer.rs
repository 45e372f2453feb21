use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::dataset::classes::{joined_labels, one_hot, TrainingClass};
use crate::dataset::table::{DatasetHeader, TableWriter};
use crate::err::{OsrError, OsrResult};
use crate::sequence::SequenceBuilder;
use crate::util::CHANNELS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub classes: Vec<String>,
    pub videos_per_class: Vec<usize>,
    pub sample_count: usize,
    pub skipped: Vec<PathBuf>,
}

struct VideoJob {
    video_index: u64,
    class_idx: usize,
    path: PathBuf,
}

/// Runs every class video through a [`SequenceBuilder`] and stores the
/// resulting sample groups, class by class, into a dataset table
pub struct DatasetWriter {
    builder: SequenceBuilder,
    seed: u64,
}

impl DatasetWriter {
    pub fn new(builder: SequenceBuilder) -> Self {
        Self { builder, seed: 0 }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn builder(&self) -> &SequenceBuilder {
        &self.builder
    }

    /// Builds the videos on the rayon pool, at most two per worker in flight,
    /// and writes their rows strictly in job order
    fn write_jobs(
        &self,
        jobs: &[VideoJob],
        classes: &[TrainingClass],
        videos_per_class: &[usize],
        table: &mut TableWriter,
        skipped: &mut Vec<PathBuf>,
    ) -> OsrResult<()> {
        let max_pending = rayon::current_num_threads().max(1) * 2;
        let mut done_per_class = vec![0usize; classes.len()];

        rayon::scope(|s| -> OsrResult<()> {
            let mut pending = VecDeque::with_capacity(max_pending);
            let mut next_job = 0;

            loop {
                while pending.len() < max_pending && next_job < jobs.len() {
                    let job = &jobs[next_job];
                    let (tx, rx) = mpsc::sync_channel(1);

                    s.spawn(move |_| {
                        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(job.video_index));
                        // receiver is gone once a fatal error ended the run
                        let _ = tx.send(self.builder.build_sequences(&job.path, &mut rng));
                    });

                    pending.push_back((job, rx));
                    next_job += 1;
                }

                let (job, rx) = match pending.pop_front() {
                    Some(p) => p,
                    None => break,
                };

                let res = rx.recv().unwrap_or_else(|_| {
                    Err(OsrError::VideoDecode {
                        path: job.path.clone(),
                        reason: "preprocessing worker died".to_owned(),
                    })
                });

                done_per_class[job.class_idx] += 1;

                match res {
                    Ok(seqs) => {
                        let label = one_hot(job.class_idx, classes.len());
                        for seq in seqs.iter() {
                            table.write_row(seq.view(), &label)?;
                        }
                    }
                    Err(OsrError::NoUsableFrames(p)) => {
                        warn!("Skipping {} : no usable frames", p.display());
                        skipped.push(p);
                    }
                    Err(e) => return Err(e),
                }

                info!(
                    "{} : {}/{} videos processed",
                    classes[job.class_idx].label,
                    done_per_class[job.class_idx],
                    videos_per_class[job.class_idx]
                );
            }

            Ok(())
        })
    }

    pub fn process(&self, classes: &[TrainingClass], path: &Path) -> OsrResult<DatasetSummary> {
        let mut jobs = Vec::new();
        let mut videos_per_class = Vec::with_capacity(classes.len());

        for (class_idx, class) in classes.iter().enumerate() {
            let files = class.video_files()?;

            info!("Class {} : {} videos", class.label, files.len());
            videos_per_class.push(files.len());

            for path in files {
                jobs.push(VideoJob {
                    video_index: jobs.len() as u64,
                    class_idx,
                    path,
                });
            }
        }

        if jobs.is_empty() {
            return Err(OsrError::InvalidConfig(
                "training classes contain no video files".to_owned(),
            ));
        }

        let per_video = self.builder.samples_generated_per_sample();
        let (rows, columns) = self.builder.frame_shape();

        info!("Dataset classes : {}", joined_labels(classes));

        let header = DatasetHeader {
            training_classes: classes.iter().map(|c| c.label.clone()).collect(),
            frames_per_sequence: self.builder.frames_per_sequence(),
            channels: CHANNELS,
            rows,
            columns,
        };

        let mut table = TableWriter::create(path, header, per_video * jobs.len())?;
        let mut skipped = Vec::new();

        if let Err(e) = self.write_jobs(&jobs, classes, &videos_per_class, &mut table, &mut skipped) {
            drop(table);
            warn!("Removing unfinished dataset {}", path.display());
            fs::remove_file(path)?;
            return Err(e);
        }

        let sample_count = table.finish()?;

        info!(
            "Dataset {} : {} samples, {} videos skipped",
            path.display(),
            sample_count,
            skipped.len()
        );

        Ok(DatasetSummary {
            classes: classes.iter().map(|c| c.label.clone()).collect(),
            videos_per_class,
            sample_count,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::Duration;

    use image::{GrayImage, Luma};

    use crate::video::{FrameStream, VideoDecoder};
    use crate::vision::{BoundingBox, RegionDetector, RegionLocalizer};

    // `vN.mov` decodes to one frame of level 10 * (N + 1), `slow` clips
    // take a while, `broken` clips fail with an io error
    struct NamedDecoder;

    impl VideoDecoder for NamedDecoder {
        fn open<'a>(&'a self, path: &Path) -> OsrResult<FrameStream<'a>> {
            let name = path.file_stem().and_then(|n| n.to_str()).unwrap_or_default().to_owned();

            if name.contains("broken") {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into());
            }
            if name.contains("slow") {
                thread::sleep(Duration::from_millis(80));
            }

            let digits: String = name.chars().filter(|c| c.is_ascii_digit()).collect();
            let idx: u8 = digits.parse().unwrap_or(0);
            let frame = GrayImage::from_pixel(4, 4, Luma([10 * (idx + 1)]));

            Ok(Box::new(std::iter::once(Ok(frame))))
        }
    }

    fn whole() -> Box<dyn RegionDetector> {
        Box::new(|img: &GrayImage| vec![BoundingBox::new(0, 0, img.width(), img.height())])
    }

    fn writer() -> DatasetWriter {
        let localizer = RegionLocalizer::new(whole(), whole(), 4, 4);
        DatasetWriter::new(SequenceBuilder::new(Box::new(NamedDecoder), localizer, 1, 1))
    }

    fn class_dir(name: &str, files: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("osr_writer_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        for f in files {
            fs::write(dir.join(f), b"").unwrap();
        }

        dir
    }

    #[test]
    fn test_rows_keep_job_order_behind_slow_video() {
        let files = ["v0_slow.mov", "v1.mov", "v2.mov", "v3_slow.mov", "v4.mov", "v5.mov", "v6.mov"];
        let dir = class_dir("order", &files);
        let path = dir.join("order.osr");

        let summary = writer()
            .process(&[TrainingClass::new("only", &dir)], &path)
            .unwrap();
        assert_eq!(summary.sample_count, files.len());

        let table = crate::dataset::TableReader::open(&path).unwrap();
        let (x, _) = table.read_rows(&(0..files.len()).collect::<Vec<_>>()).unwrap();

        for i in 0..files.len() {
            let level = 10.0 * (i + 1) as f32;
            assert!((x[[i, 0, 0, 1, 1]] - level / 255.0).abs() < 5e-3, "row {}", i);
        }

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_fatal_error_leaves_no_dataset_behind() {
        let dir = class_dir("fatal", &["v0.mov", "v1.mov", "v2_broken.mov", "v3.mov"]);
        let path = dir.join("fatal.osr");

        let res = writer().process(&[TrainingClass::new("only", &dir)], &path);

        assert!(matches!(res, Err(OsrError::Io(_))));
        assert!(!path.exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
