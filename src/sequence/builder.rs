use std::path::Path;

use ndarray::{stack, ArrayView2, Axis};
use rand::Rng;

use log::{debug, warn};

use crate::err::{OsrError, OsrResult, RegionMiss};
use crate::sequence::augment::{apply_to_sequence, AugmentParams};
use crate::util::{expand_channels, FrameSequence, GrayFrame, GraySequence};
use crate::video::VideoDecoder;
use crate::vision::RegionLocalizer;

/// Turns one video into `samples_generated_per_sample` fixed-length,
/// normalized oral-region sequences.
pub struct SequenceBuilder {
    decoder: Box<dyn VideoDecoder>,
    localizer: RegionLocalizer,
    frames_per_sequence: usize,
    samples_generated_per_sample: usize,
    augment: AugmentParams,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub decoded: usize,
    pub kept: usize,
    pub no_face: usize,
    pub many_faces: usize,
    pub no_mouth: usize,
}

impl SequenceBuilder {
    pub fn new(
        decoder: Box<dyn VideoDecoder>,
        localizer: RegionLocalizer,
        frames_per_sequence: usize,
        samples_generated_per_sample: usize,
    ) -> Self {
        Self {
            decoder,
            localizer,
            frames_per_sequence: frames_per_sequence.max(1),
            samples_generated_per_sample: samples_generated_per_sample.max(1),
            augment: AugmentParams::default(),
        }
    }

    pub fn augment(mut self, params: AugmentParams) -> Self {
        self.augment = params;
        self
    }

    pub fn frames_per_sequence(&self) -> usize {
        self.frames_per_sequence
    }

    pub fn samples_generated_per_sample(&self) -> usize {
        self.samples_generated_per_sample
    }

    pub fn frame_shape(&self) -> (usize, usize) {
        (self.localizer.rows() as usize, self.localizer.columns() as usize)
    }

    /// Decodes the whole video and keeps, in order, the frames where an oral
    /// region was found
    pub fn kept_frames(&self, path: &Path) -> OsrResult<(Vec<GrayFrame>, FrameStats)> {
        let frames = match self.decoder.open(path) {
            Ok(frames) => frames,
            Err(OsrError::VideoDecode { path, reason }) => {
                warn!("Unreadable video {} : {}", path.display(), reason);
                return Err(OsrError::NoUsableFrames(path));
            }
            Err(e) => return Err(e),
        };

        let mut stats = FrameStats::default();
        let mut kept = Vec::new();

        for frame in frames {
            let frame = match frame {
                Ok(frame) => frame,
                Err(OsrError::VideoDecode { path, reason }) => {
                    warn!("Video {} broke off after {} frames : {}", path.display(), stats.decoded, reason);
                    return Err(OsrError::NoUsableFrames(path));
                }
                Err(e) => return Err(e),
            };
            stats.decoded += 1;

            match self.localizer.locate_oral_region(&frame) {
                Ok(oral) => {
                    kept.push(oral);
                    stats.kept += 1;
                }
                Err(RegionMiss::AmbiguousOrNoFace { count: 0 }) => stats.no_face += 1,
                Err(RegionMiss::AmbiguousOrNoFace { .. }) => stats.many_faces += 1,
                Err(RegionMiss::NoMouthDetected) => stats.no_mouth += 1,
            }
        }

        debug!("{} : {:?}", path.display(), stats);

        Ok((kept, stats))
    }

    pub fn build_sequences<R: Rng + ?Sized>(&self, path: &Path, rng: &mut R) -> OsrResult<Vec<FrameSequence>> {
        let (kept, _) = self.kept_frames(path)?;

        self.sequences_from_frames(kept, rng)
            .ok_or_else(|| OsrError::NoUsableFrames(path.to_path_buf()))?
    }

    /// Equalizes `kept` and expands it into the augmented sample group.
    /// None when `kept` is empty.
    pub fn sequences_from_frames<R: Rng + ?Sized>(
        &self,
        kept: Vec<GrayFrame>,
        rng: &mut R,
    ) -> Option<OsrResult<Vec<FrameSequence>>> {
        let frames = equalize_length(kept, self.frames_per_sequence)?;

        Some(stack_frames(&frames).map(|seq| {
            expand_samples(&seq, self.samples_generated_per_sample, &self.augment, rng)
        }))
    }
}

/// Fits `frames` to exactly `target` entries: short inputs are left-padded
/// with copies of the first frame, long ones keep their last `target` frames.
/// None when `frames` is empty.
pub fn equalize_length<T: Clone>(mut frames: Vec<T>, target: usize) -> Option<Vec<T>> {
    let first = frames.first()?.clone();

    if frames.len() < target {
        let mut out = vec![first; target - frames.len()];
        out.append(&mut frames);
        return Some(out);
    }

    Some(frames.split_off(frames.len() - target))
}

pub fn stack_frames(frames: &[GrayFrame]) -> OsrResult<GraySequence> {
    let views: Vec<ArrayView2<f32>> = frames.iter().map(|f| f.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

/// The unmodified sequence followed by `count - 1` independently transformed copies
pub fn expand_samples<R: Rng + ?Sized>(
    seq: &GraySequence,
    count: usize,
    params: &AugmentParams,
    rng: &mut R,
) -> Vec<FrameSequence> {
    let (_, rows, cols) = seq.dim();
    let mut out = Vec::with_capacity(count);

    out.push(expand_channels(seq));

    for _ in 1..count {
        let t = params.sample_transform(rows, cols, rng);
        out.push(expand_channels(&apply_to_sequence(seq, &t)));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use image::{GrayImage, Luma};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::video::FrameStream;
    use crate::vision::{BoundingBox, RegionDetector};

    struct ScriptedDecoder {
        frames: Vec<GrayImage>,
    }

    impl VideoDecoder for ScriptedDecoder {
        fn open<'a>(&'a self, _path: &Path) -> OsrResult<FrameStream<'a>> {
            Ok(Box::new(self.frames.iter().cloned().map(Ok)))
        }
    }

    struct BrokenDecoder;

    impl VideoDecoder for BrokenDecoder {
        fn open<'a>(&'a self, path: &Path) -> OsrResult<FrameStream<'a>> {
            Err(OsrError::VideoDecode {
                path: path.to_path_buf(),
                reason: "moov atom not found".to_owned(),
            })
        }
    }

    // Two good frames, then the decoder gives up
    struct TruncatedDecoder;

    impl VideoDecoder for TruncatedDecoder {
        fn open<'a>(&'a self, path: &Path) -> OsrResult<FrameStream<'a>> {
            let broken = OsrError::VideoDecode {
                path: path.to_path_buf(),
                reason: "ffmpeg exited with exit status: 1".to_owned(),
            };
            Ok(Box::new(vec![Ok(textured(50)), Ok(textured(90)), Err(broken)].into_iter()))
        }
    }

    // Frames with a zero top-left pixel carry no face
    fn face_when_marked() -> Box<dyn RegionDetector> {
        Box::new(|img: &GrayImage| {
            if img.get_pixel(0, 0)[0] == 0 {
                vec![]
            } else {
                vec![BoundingBox::new(0, 0, img.width(), img.height())]
            }
        })
    }

    fn whole_image() -> Box<dyn RegionDetector> {
        Box::new(|img: &GrayImage| vec![BoundingBox::new(0, 0, img.width(), img.height())])
    }

    fn textured(level: u8) -> GrayImage {
        GrayImage::from_fn(8, 8, |x, y| Luma([level.saturating_add(((x * 7 + y * 3) % 40) as u8)]))
    }

    fn builder(frames: Vec<GrayImage>, l: usize, n: usize) -> SequenceBuilder {
        SequenceBuilder::new(
            Box::new(ScriptedDecoder { frames }),
            RegionLocalizer::new(face_when_marked(), whole_image(), 8, 8),
            l,
            n,
        )
    }

    #[test]
    fn test_equalize_pads_with_first_frame() {
        assert_eq!(equalize_length(vec![1, 2, 3], 5), Some(vec![1, 1, 1, 2, 3]));
        assert_eq!(equalize_length(vec![7], 3), Some(vec![7, 7, 7]));
    }

    #[test]
    fn test_equalize_keeps_last_frames() {
        assert_eq!(equalize_length(vec![1, 2, 3, 4, 5, 6], 4), Some(vec![3, 4, 5, 6]));
        assert_eq!(equalize_length(vec![1, 2, 3], 3), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_equalize_empty_is_none() {
        assert_eq!(equalize_length(Vec::<u8>::new(), 4), None);
    }

    #[test]
    fn test_equalized_length_for_any_kept_count() {
        for k in 1..12 {
            let out = equalize_length((0..k).collect::<Vec<_>>(), 6).unwrap();
            assert_eq!(out.len(), 6);
        }
    }

    #[test]
    fn test_build_drops_faceless_frames_and_pads() {
        let frames = vec![
            textured(60),
            GrayImage::new(8, 8),
            textured(120),
            textured(180),
        ];
        let b = builder(frames, 5, 3);
        let mut rng = StdRng::seed_from_u64(3);

        let (kept, stats) = b.kept_frames(Path::new("a.mov")).unwrap();
        assert_eq!(stats.decoded, 4);
        assert_eq!(stats.kept, 3);
        assert_eq!(stats.no_face, 1);

        let seqs = b.build_sequences(Path::new("a.mov"), &mut rng).unwrap();
        assert_eq!(seqs.len(), 3);

        let first = &seqs[0];
        assert_eq!(first.dim(), (5, 3, 8, 8));
        for f in 0..3 {
            assert_eq!(first.index_axis(Axis(0), f), first.index_axis(Axis(0), 0));
        }
        assert!((first[[3, 1, 0, 0]] - kept[1][[0, 0]] / 255.0).abs() < 1e-6);
        assert!((first[[4, 2, 0, 0]] - kept[2][[0, 0]] / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_first_sample_is_deterministic_and_variants_vary() {
        let frames = (0..6).map(|i| textured(20 * i as u8)).collect::<Vec<_>>();
        let b = builder(frames, 4, 4);

        let a = b.build_sequences(Path::new("v.mov"), &mut StdRng::seed_from_u64(1)).unwrap();
        let c = b.build_sequences(Path::new("v.mov"), &mut StdRng::seed_from_u64(2)).unwrap();

        assert_eq!(a.len(), 4);
        assert_eq!(a[0], c[0]);
        assert!(a.iter().all(|s| s.dim() == (4, 3, 8, 8)));
        assert!(a[1..].iter().zip(c[1..].iter()).any(|(x, y)| x != y));
    }

    #[test]
    fn test_same_seed_reproduces_variants() {
        let frames = (0..3).map(|i| textured(30 * i as u8)).collect::<Vec<_>>();
        let b = builder(frames, 3, 3);

        let a = b.build_sequences(Path::new("v.mov"), &mut StdRng::seed_from_u64(9)).unwrap();
        let c = b.build_sequences(Path::new("v.mov"), &mut StdRng::seed_from_u64(9)).unwrap();

        assert_eq!(a, c);
    }

    #[test]
    fn test_no_usable_frames_is_an_error() {
        let b = builder(vec![GrayImage::new(8, 8); 3], 4, 2);
        let res = b.build_sequences(Path::new("dark.mov"), &mut StdRng::seed_from_u64(0));

        assert!(matches!(res, Err(OsrError::NoUsableFrames(_))));
    }

    #[test]
    fn test_unreadable_video_has_no_usable_frames() {
        let b = SequenceBuilder::new(
            Box::new(BrokenDecoder),
            RegionLocalizer::new(whole_image(), whole_image(), 8, 8),
            4,
            2,
        );
        let res = b.build_sequences(Path::new("broken.mov"), &mut StdRng::seed_from_u64(0));

        assert!(matches!(res, Err(OsrError::NoUsableFrames(_))));
    }

    #[test]
    fn test_decode_failure_mid_stream_drops_whole_video() {
        let b = SequenceBuilder::new(
            Box::new(TruncatedDecoder),
            RegionLocalizer::new(whole_image(), whole_image(), 8, 8),
            4,
            2,
        );

        let res = b.build_sequences(Path::new("cut.mov"), &mut StdRng::seed_from_u64(0));
        assert!(matches!(res, Err(OsrError::NoUsableFrames(p)) if p == Path::new("cut.mov")));
    }
}
