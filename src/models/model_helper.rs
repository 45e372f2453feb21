use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use log::warn;
use ndarray::{Array1, Array2};
use prost::Message;

use crate::err::{OsrError, OsrResult};
use crate::models::pb::PbBuf;
use crate::util::{Array1D, Array2D};

pub fn convert_buf_2d_to_pb(buf: &Array2D, id: i32) -> PbBuf {
    PbBuf {
        buf_id: id,
        shape: buf.shape().iter().map(|s| *s as i32).collect(),
        vals: buf.iter().cloned().collect(),
    }
}

pub fn convert_buf_1d_to_pb(buf: &Array1D, id: i32) -> PbBuf {
    PbBuf {
        buf_id: id,
        shape: vec![buf.len() as i32],
        vals: buf.to_vec(),
    }
}

fn find_buf(bufs: &[PbBuf], id: i32) -> OsrResult<&PbBuf> {
    bufs.iter()
        .find(|b| b.buf_id == id)
        .ok_or_else(|| OsrError::ModelMismatch(format!("buffer {} missing from state", id)))
}

pub fn convert_pb_to_buf_2d(bufs: &[PbBuf], id: i32, shape: (usize, usize)) -> OsrResult<Array2D> {
    let pb_buf = find_buf(bufs, id)?;

    if pb_buf.shape != [shape.0 as i32, shape.1 as i32] {
        return Err(OsrError::ModelMismatch(format!(
            "buffer {} has shape {:?}, expected {:?}",
            id, pb_buf.shape, shape
        )));
    }

    Ok(Array2::from_shape_vec(shape, pb_buf.vals.clone())?)
}

pub fn convert_pb_to_buf_1d(bufs: &[PbBuf], id: i32, len: usize) -> OsrResult<Array1D> {
    let pb_buf = find_buf(bufs, id)?;

    if pb_buf.shape != [len as i32] {
        return Err(OsrError::ModelMismatch(format!(
            "buffer {} has shape {:?}, expected [{}]",
            id, pb_buf.shape, len
        )));
    }

    Ok(Array1::from_shape_vec(len, pb_buf.vals.clone())?)
}

/// Writes an encoded message, replacing any previous file
pub fn write_message<M: Message>(msg: &M, path: &Path) -> OsrResult<()> {
    if path.exists() {
        warn!("Model file {} already exists, overwriting", path.display());
        fs::remove_file(path)?;
    }

    let mut file = File::create(path)?;
    file.write_all(msg.encode_to_vec().as_slice())?;

    Ok(())
}
