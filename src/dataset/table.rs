//! Fixed-row binary table holding the preprocessed dataset.
//!
//! Layout: magic `OSRDSET1`, `u64 LE` sample count (`u64::MAX` until the
//! writer finishes), `u64 LE` header length,
//! protobuf header, then `sample_count` rows. Each row is the `X` sequence as
//! `f32 LE` values immediately followed by its one-hot `Y` as `i32 LE`, so
//! any row is reachable with one seek.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info, warn};
use ndarray::{Array2, Array5, ArrayView4};
use prost::Message;

use crate::err::{OsrError, OsrResult};

pub const MAGIC: &[u8; 8] = b"OSRDSET1";

const COUNT_OFFSET: u64 = 8;
// count slot of a table whose writer never finished
const UNFINISHED: u64 = u64::MAX;
const HEADER_OFFSET: u64 = 24;

#[derive(Clone, PartialEq, Message)]
pub struct PbDatasetHeader {
    #[prost(string, tag = "1")]
    pub training_classes: String,
    #[prost(uint64, tag = "2")]
    pub frames_per_sequence: u64,
    #[prost(uint64, tag = "3")]
    pub channels: u64,
    #[prost(uint64, tag = "4")]
    pub rows: u64,
    #[prost(uint64, tag = "5")]
    pub columns: u64,
    #[prost(uint64, tag = "6")]
    pub num_classes: u64,
}

/// Shape and class metadata shared by every row of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHeader {
    pub training_classes: Vec<String>,
    pub frames_per_sequence: usize,
    pub channels: usize,
    pub rows: usize,
    pub columns: usize,
}

impl DatasetHeader {
    pub fn num_classes(&self) -> usize {
        self.training_classes.len()
    }

    pub fn sample_shape(&self) -> (usize, usize, usize, usize) {
        (self.frames_per_sequence, self.channels, self.rows, self.columns)
    }

    pub fn x_len(&self) -> usize {
        self.frames_per_sequence * self.channels * self.rows * self.columns
    }

    pub fn row_bytes(&self) -> u64 {
        ((self.x_len() + self.num_classes()) * 4) as u64
    }

    fn to_pb(&self) -> PbDatasetHeader {
        PbDatasetHeader {
            training_classes: self.training_classes.join(","),
            frames_per_sequence: self.frames_per_sequence as u64,
            channels: self.channels as u64,
            rows: self.rows as u64,
            columns: self.columns as u64,
            num_classes: self.num_classes() as u64,
        }
    }

    fn from_pb(pb: PbDatasetHeader) -> OsrResult<Self> {
        let training_classes: Vec<String> = if pb.training_classes.is_empty() {
            Vec::new()
        } else {
            pb.training_classes.split(',').map(str::to_owned).collect()
        };

        if training_classes.len() as u64 != pb.num_classes || training_classes.is_empty() {
            return Err(OsrError::InvalidDataset(format!(
                "header lists {} classes but declares {}",
                training_classes.len(),
                pb.num_classes
            )));
        }

        let header = Self {
            training_classes,
            frames_per_sequence: pb.frames_per_sequence as usize,
            channels: pb.channels as usize,
            rows: pb.rows as usize,
            columns: pb.columns as usize,
        };

        if header.x_len() == 0 {
            return Err(OsrError::InvalidDataset("empty sample shape".to_owned()));
        }

        Ok(header)
    }
}

/// Appends rows into a table pre-sized for `capacity` samples
pub struct TableWriter {
    file: File,
    path: PathBuf,
    header: DatasetHeader,
    data_offset: u64,
    capacity: usize,
    written: usize,
}

impl TableWriter {
    /// Replaces any file at `path` with a zero-filled table of `capacity` rows
    pub fn create(path: &Path, header: DatasetHeader, capacity: usize) -> OsrResult<Self> {
        if path.exists() {
            warn!("Dataset {} already exists, overwriting", path.display());
            fs::remove_file(path)?;
        }

        let pb_header = header.to_pb().encode_to_vec();
        let data_offset = HEADER_OFFSET + pb_header.len() as u64;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        file.write_all(MAGIC)?;
        file.write_all(&UNFINISHED.to_le_bytes())?;
        file.write_all(&(pb_header.len() as u64).to_le_bytes())?;
        file.write_all(&pb_header)?;
        file.set_len(data_offset + capacity as u64 * header.row_bytes())?;

        info!(
            "Allocated {} for {} samples of {:?}",
            path.display(),
            capacity,
            header.sample_shape()
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            data_offset,
            capacity,
            written: 0,
        })
    }

    pub fn header(&self) -> &DatasetHeader {
        &self.header
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Writes the next row
    pub fn write_row(&mut self, x: ArrayView4<f32>, y: &[i32]) -> OsrResult<()> {
        if self.written >= self.capacity {
            return Err(OsrError::InvalidDataset(format!(
                "table {} is full ({} rows)",
                self.path.display(),
                self.capacity
            )));
        }

        if x.dim() != self.header.sample_shape() || y.len() != self.header.num_classes() {
            return Err(OsrError::InvalidDataset(format!(
                "row shape {:?}/{} doesn't match table shape {:?}/{}",
                x.dim(),
                y.len(),
                self.header.sample_shape(),
                self.header.num_classes()
            )));
        }

        let mut buf = Vec::with_capacity(self.header.row_bytes() as usize);
        for v in x.iter() {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for v in y {
            buf.extend_from_slice(&v.to_le_bytes());
        }

        let offset = self.data_offset + self.written as u64 * self.header.row_bytes();
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&buf)?;

        self.written += 1;

        Ok(())
    }

    /// Records the final sample count and drops the unused tail rows.
    /// Until then readers refuse the file.
    pub fn finish(mut self) -> OsrResult<usize> {
        if self.written < self.capacity {
            info!(
                "Compacting {} : {} of {} rows used",
                self.path.display(),
                self.written,
                self.capacity
            );

            self.file
                .set_len(self.data_offset + self.written as u64 * self.header.row_bytes())?;
        }

        self.file.sync_all()?;

        self.file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        self.file.write_all(&(self.written as u64).to_le_bytes())?;
        self.file.sync_all()?;

        Ok(self.written)
    }
}

/// Read-only random access to the rows of a finished table. Safe to share
/// between generators, reads are serialized on the inner file handle.
pub struct TableReader {
    file: Mutex<File>,
    path: PathBuf,
    header: DatasetHeader,
    data_offset: u64,
    sample_count: usize,
}

fn read_u64(file: &mut File) -> OsrResult<u64> {
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn le_word(c: &[u8]) -> [u8; 4] {
    [c[0], c[1], c[2], c[3]]
}

impl TableReader {
    pub fn open(path: &Path) -> OsrResult<Self> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;

        if &magic != MAGIC {
            return Err(OsrError::InvalidDataset(format!(
                "{} isn't a dataset file",
                path.display()
            )));
        }

        let sample_count = read_u64(&mut file)?;
        if sample_count == UNFINISHED {
            return Err(OsrError::InvalidDataset(format!(
                "{} was never finished, rebuild it",
                path.display()
            )));
        }
        let sample_count = sample_count as usize;
        let header_len = read_u64(&mut file)?;

        let file_len = file.metadata()?.len();
        if HEADER_OFFSET + header_len > file_len {
            return Err(OsrError::InvalidDataset(format!(
                "{} has a truncated header",
                path.display()
            )));
        }

        let mut pb_buf = vec![0u8; header_len as usize];
        file.seek(SeekFrom::Start(HEADER_OFFSET))?;
        file.read_exact(&mut pb_buf)?;

        let header = DatasetHeader::from_pb(PbDatasetHeader::decode(pb_buf.as_slice())?)?;
        let data_offset = HEADER_OFFSET + header_len;

        if data_offset + sample_count as u64 * header.row_bytes() > file_len {
            return Err(OsrError::InvalidDataset(format!(
                "{} is shorter than its {} rows",
                path.display(),
                sample_count
            )));
        }

        debug!(
            "Opened {} : {} samples of {:?}, classes {:?}",
            path.display(),
            sample_count,
            header.sample_shape(),
            header.training_classes
        );

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            header,
            data_offset,
            sample_count,
        })
    }

    pub fn header(&self) -> &DatasetHeader {
        &self.header
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the rows at `indices`, in the given order
    pub fn read_rows(&self, indices: &[usize]) -> OsrResult<(Array5<f32>, Array2<i32>)> {
        let (l, ch, r, c) = self.header.sample_shape();
        let x_len = self.header.x_len();
        let num_classes = self.header.num_classes();
        let row_bytes = self.header.row_bytes() as usize;

        let mut xs = Vec::with_capacity(indices.len() * x_len);
        let mut ys = Vec::with_capacity(indices.len() * num_classes);
        let mut buf = vec![0u8; row_bytes];

        {
            let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());

            for &idx in indices {
                if idx >= self.sample_count {
                    return Err(OsrError::InvalidDataset(format!(
                        "row {} out of range, {} holds {} rows",
                        idx,
                        self.path.display(),
                        self.sample_count
                    )));
                }

                file.seek(SeekFrom::Start(self.data_offset + (idx * row_bytes) as u64))?;
                file.read_exact(&mut buf)?;

                let (x_bytes, y_bytes) = buf.split_at(x_len * 4);
                xs.extend(x_bytes.chunks_exact(4).map(|w| f32::from_le_bytes(le_word(w))));
                ys.extend(y_bytes.chunks_exact(4).map(|w| i32::from_le_bytes(le_word(w))));
            }
        }

        let x = Array5::from_shape_vec((indices.len(), l, ch, r, c), xs)?;
        let y = Array2::from_shape_vec((indices.len(), num_classes), ys)?;

        Ok((x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array4, Axis};

    fn header() -> DatasetHeader {
        DatasetHeader {
            training_classes: vec!["no".to_owned(), "yes".to_owned()],
            frames_per_sequence: 2,
            channels: 3,
            rows: 2,
            columns: 3,
        }
    }

    fn sample(seed: f32) -> Array4<f32> {
        Array4::from_shape_fn((2, 3, 2, 3), |(f, ch, r, c)| {
            seed + (f * 1000 + ch * 100 + r * 10 + c) as f32 / 10000.0
        })
    }

    fn table_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("osr_table_{}_{}.bin", name, std::process::id()))
    }

    #[test]
    fn test_write_then_random_access() {
        let path = table_path("rw");
        let mut w = TableWriter::create(&path, header(), 3).unwrap();

        w.write_row(sample(1.0).view(), &[1, 0]).unwrap();
        w.write_row(sample(2.0).view(), &[0, 1]).unwrap();
        w.write_row(sample(3.0).view(), &[0, 1]).unwrap();
        assert_eq!(w.finish().unwrap(), 3);

        let r = TableReader::open(&path).unwrap();
        assert_eq!(r.sample_count(), 3);
        assert_eq!(r.header(), &header());

        let (x, y) = r.read_rows(&[2, 0]).unwrap();
        assert_eq!(x.dim(), (2, 2, 3, 2, 3));
        assert_eq!(x.index_axis(Axis(0), 0), sample(3.0));
        assert_eq!(x.index_axis(Axis(0), 1), sample(1.0));
        assert_eq!(y, ndarray::arr2(&[[0, 1], [1, 0]]));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unused_rows_are_compacted() {
        let path = table_path("compact");
        let mut w = TableWriter::create(&path, header(), 4).unwrap();
        let full_len = fs::metadata(&path).unwrap().len();

        w.write_row(sample(5.0).view(), &[0, 1]).unwrap();
        w.finish().unwrap();

        let r = TableReader::open(&path).unwrap();
        assert_eq!(r.sample_count(), 1);
        assert_eq!(
            fs::metadata(&path).unwrap().len(),
            full_len - 3 * header().row_bytes()
        );
        assert!(r.read_rows(&[1]).is_err());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_create_replaces_existing_file() {
        let path = table_path("replace");
        fs::write(&path, b"stale content").unwrap();

        let mut w = TableWriter::create(&path, header(), 1).unwrap();
        w.write_row(sample(0.5).view(), &[1, 0]).unwrap();
        w.finish().unwrap();

        let r = TableReader::open(&path).unwrap();
        assert_eq!(r.sample_count(), 1);
        let (x, _) = r.read_rows(&[0]).unwrap();
        assert_eq!(x.index_axis(Axis(0), 0), sample(0.5));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_rejects_bad_rows_and_overflow() {
        let path = table_path("bad_rows");
        let mut w = TableWriter::create(&path, header(), 1).unwrap();

        let wrong = Array4::<f32>::zeros((1, 3, 2, 3));
        assert!(w.write_row(wrong.view(), &[1, 0]).is_err());
        assert!(w.write_row(sample(0.0).view(), &[1, 0, 0]).is_err());

        w.write_row(sample(0.0).view(), &[1, 0]).unwrap();
        assert!(w.write_row(sample(0.0).view(), &[1, 0]).is_err());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_non_standard_layout_rows_keep_logical_order() {
        let path = table_path("layout");
        let mut w = TableWriter::create(&path, header(), 1).unwrap();

        let wide = Array4::from_shape_fn((2, 3, 2, 6), |(f, ch, r, c)| (f * 100 + ch * 10 + r) as f32 + c as f32 / 10.0);
        let view = wide.slice(s![.., .., .., ..;2]);
        w.write_row(view, &[0, 1]).unwrap();
        w.finish().unwrap();

        let (x, _) = TableReader::open(&path).unwrap().read_rows(&[0]).unwrap();
        assert_eq!(x.index_axis(Axis(0), 0), view);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unfinished_table_is_refused() {
        let path = table_path("unfinished");

        {
            let mut w = TableWriter::create(&path, header(), 4).unwrap();
            w.write_row(sample(1.0).view(), &[1, 0]).unwrap();
        }

        assert!(matches!(TableReader::open(&path), Err(OsrError::InvalidDataset(_))));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_empty_finished_table_opens() {
        let path = table_path("empty");
        TableWriter::create(&path, header(), 2).unwrap().finish().unwrap();

        let r = TableReader::open(&path).unwrap();
        assert_eq!(r.sample_count(), 0);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_rejects_foreign_file() {
        let path = table_path("foreign");
        fs::write(&path, b"NOTADATASETFILE_________________").unwrap();

        assert!(matches!(TableReader::open(&path), Err(OsrError::InvalidDataset(_))));

        fs::remove_file(&path).unwrap();
    }
}
