use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::GrayImage;
use log::{debug, warn};
use serde::Deserialize;

use crate::err::{OsrError, OsrResult};

/// Lazily decoded frames of one video. Dropping the stream releases the
/// underlying decoder.
pub type FrameStream<'a> = Box<dyn Iterator<Item = OsrResult<GrayImage>> + 'a>;

pub trait VideoDecoder: Send + Sync {
    /// Opens `path` and returns its frames in presentation order
    fn open<'a>(&'a self, path: &Path) -> OsrResult<FrameStream<'a>>;
}

#[derive(Deserialize, Default)]
struct StreamTags {
    rotate: Option<String>,
}

#[derive(Deserialize)]
struct StreamSideData {
    rotation: Option<f64>,
}

#[derive(Deserialize)]
struct StreamInfo {
    width: u32,
    height: u32,
    #[serde(default)]
    tags: StreamTags,
    #[serde(default)]
    side_data_list: Vec<StreamSideData>,
}

impl StreamInfo {
    /// Rotation in degrees, display matrix first, then the legacy `rotate` tag
    fn rotation(&self) -> i64 {
        let from_matrix = self.side_data_list.iter().find_map(|sd| sd.rotation);
        let from_tag = || {
            self.tags
                .rotate
                .as_deref()
                .and_then(|r| r.trim().parse::<f64>().ok())
        };

        from_matrix.or_else(from_tag).map(|r| r.round() as i64).unwrap_or(0)
    }

    /// Size of the frames ffmpeg emits, which applies the rotation by default
    fn display_dimensions(&self) -> (u32, u32) {
        if self.rotation().rem_euclid(180) == 90 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

#[derive(Deserialize)]
struct StreamReport {
    #[serde(default)]
    streams: Vec<StreamInfo>,
}

/// Output frame size from the JSON printed by `ffprobe`
fn frame_dimensions(json: &[u8]) -> OsrResult<Option<(u32, u32)>> {
    let report: StreamReport = serde_json::from_slice(json)?;

    Ok(match report.streams.first() {
        Some(s) if s.width > 0 && s.height > 0 => Some(s.display_dimensions()),
        _ => None,
    })
}

/// Decodes through the `ffmpeg` command line tools: `ffprobe` for frame
/// dimensions, `ffmpeg` streaming 8-bit gray rawvideo over a pipe.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegDecoder {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(ffmpeg: P, ffprobe: Q) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn decode_err(path: &Path, reason: impl Into<String>) -> OsrError {
        OsrError::VideoDecode {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn stream_dimensions(&self, path: &Path) -> OsrResult<(u32, u32)> {
        let out = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height:stream_tags=rotate:stream_side_data=rotation",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()?;

        if !out.status.success() {
            return Err(Self::decode_err(
                path,
                String::from_utf8_lossy(&out.stderr).trim().to_owned(),
            ));
        }

        frame_dimensions(&out.stdout)?.ok_or_else(|| Self::decode_err(path, "no video stream"))
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn open<'a>(&'a self, path: &Path) -> OsrResult<FrameStream<'a>> {
        let (width, height) = self.stream_dimensions(path)?;

        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "gray", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Self::decode_err(path, "ffmpeg stdout isn't captured"));
            }
        };

        debug!("Decoding {} ({}x{})", path.display(), width, height);

        Ok(Box::new(RawFrames {
            path: path.to_path_buf(),
            child,
            reader: BufReader::new(stdout),
            width,
            height,
            done: false,
        }))
    }
}

struct RawFrames {
    path: PathBuf,
    child: Child,
    reader: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    done: bool,
}

impl RawFrames {
    /// Reaps ffmpeg once its output ended, a failed exit means a broken video
    fn finish(&mut self) -> OsrResult<()> {
        let status = self.child.wait()?;

        if status.success() {
            Ok(())
        } else {
            Err(OsrError::VideoDecode {
                path: self.path.clone(),
                reason: format!("ffmpeg exited with {}", status),
            })
        }
    }

    fn read_frame(&mut self) -> OsrResult<Option<GrayImage>> {
        let frame_len = self.width as usize * self.height as usize;
        let mut buf = vec![0u8; frame_len];
        let mut filled = 0;

        while filled < frame_len {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }

        if filled < frame_len {
            warn!(
                "Truncated trailing frame in {} ({} of {} bytes)",
                self.path.display(),
                filled,
                frame_len
            );
            return Ok(None);
        }

        Ok(GrayImage::from_raw(self.width, self.height, buf))
    }
}

impl Iterator for RawFrames {
    type Item = OsrResult<GrayImage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                self.finish().err().map(Err)
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for RawFrames {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}
