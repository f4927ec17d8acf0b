//! Hierarchical scan store: JSON manifest plus one memory-mapped blob.
//!
//! A store directory holds `manifest.json` describing every array (group
//! path, name, dtype, shape, byte offset) and `arrays.bin` with the
//! little-endian payloads. Groups form a `/`-separated hierarchy; a leaf
//! group is one that directly owns at least one array and stands for a named
//! scan sample exposing `data` and `labels` arrays that share a leading day
//! axis.

use crate::types::{DatasetError, DatasetResult};
use memmap2::{Mmap, MmapOptions};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const BLOB_FILE: &str = "arrays.bin";

pub const DATA_ARRAY: &str = "data";
pub const LABELS_ARRAY: &str = "labels";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayDType {
    F32,
    I64,
}

impl ArrayDType {
    pub fn byte_size(self) -> usize {
        match self {
            ArrayDType::F32 => 4,
            ArrayDType::I64 => 8,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ArrayDType::F32 => "f32",
            ArrayDType::I64 => "i64",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayMeta {
    /// `/`-separated group path owning this array.
    pub group: String,
    pub name: String,
    pub dtype: ArrayDType,
    pub shape: Vec<usize>,
    /// Byte offset of the payload inside the blob.
    pub offset: usize,
}

impl ArrayMeta {
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    fn byte_len(&self) -> usize {
        self.num_elements() * self.dtype.byte_size()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreManifest {
    pub version: u32,
    pub arrays: Vec<ArrayMeta>,
}

/// Read-only handle on a scan store.
///
/// Opening reads the manifest, validates every array against the blob
/// length, and maps the blob. A failed open is fatal to the caller; there is
/// no retry path.
#[derive(Debug)]
pub struct ArrayStore {
    dir: PathBuf,
    manifest: StoreManifest,
    blob: Mmap,
}

impl ArrayStore {
    pub fn open(dir: &Path) -> DatasetResult<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let raw = fs::read(&manifest_path).map_err(|e| DatasetError::Io {
            path: manifest_path.clone(),
            source: e,
        })?;
        let manifest: StoreManifest =
            serde_json::from_slice(&raw).map_err(|e| DatasetError::Json {
                path: manifest_path.clone(),
                source: e,
            })?;

        let blob_path = dir.join(BLOB_FILE);
        let file = File::open(&blob_path).map_err(|e| DatasetError::Io {
            path: blob_path.clone(),
            source: e,
        })?;
        // Readers never write; a shared read-only map is safe across threads.
        let blob = unsafe { MmapOptions::new().map(&file) }.map_err(|e| DatasetError::Io {
            path: blob_path,
            source: e,
        })?;

        for meta in &manifest.arrays {
            let end = meta.offset + meta.byte_len();
            if end > blob.len() {
                return Err(DatasetError::Manifest {
                    path: manifest_path,
                    msg: format!(
                        "array `{}/{}` spans bytes {}..{} but blob has {}",
                        meta.group,
                        meta.name,
                        meta.offset,
                        end,
                        blob.len()
                    ),
                });
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            blob,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sorted paths of all groups that directly own at least one array.
    pub fn leaf_groups(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .manifest
            .arrays
            .iter()
            .map(|m| m.group.as_str())
            .collect();
        set.into_iter().map(String::from).collect()
    }

    pub fn array_meta(&self, group: &str, name: &str) -> DatasetResult<&ArrayMeta> {
        self.manifest
            .arrays
            .iter()
            .find(|m| m.group == group && m.name == name)
            .ok_or_else(|| DatasetError::MissingArray {
                group: group.to_string(),
                name: name.to_string(),
            })
    }

    /// Leading dimension of a sample's `data` array (its day count).
    pub fn day_count(&self, group: &str) -> DatasetResult<usize> {
        let meta = self.array_meta(group, DATA_ARRAY)?;
        Ok(meta.shape.first().copied().unwrap_or(0))
    }

    /// One day slab of the `data` array: shape is the array shape minus the
    /// leading day axis.
    pub fn read_data_day(&self, group: &str, day: usize) -> DatasetResult<ArrayD<f32>> {
        let meta = self.expect_dtype(group, DATA_ARRAY, ArrayDType::F32)?;
        let (shape, bytes) = self.day_slab(meta, group, day)?;
        let mut values = Vec::with_capacity(shape.iter().product());
        for chunk in bytes.chunks_exact(4) {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(chunk);
            values.push(f32::from_le_bytes(buf));
        }
        ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| DatasetError::Other(format!("bad slab shape for `{group}/data`: {e}")))
    }

    /// One day slab of the `labels` array (integer class indices).
    pub fn read_labels_day(&self, group: &str, day: usize) -> DatasetResult<ArrayD<i64>> {
        let meta = self.expect_dtype(group, LABELS_ARRAY, ArrayDType::I64)?;
        let (shape, bytes) = self.day_slab(meta, group, day)?;
        let mut values = Vec::with_capacity(shape.iter().product());
        for chunk in bytes.chunks_exact(8) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            values.push(i64::from_le_bytes(buf));
        }
        ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| DatasetError::Other(format!("bad slab shape for `{group}/labels`: {e}")))
    }

    fn expect_dtype(
        &self,
        group: &str,
        name: &str,
        dtype: ArrayDType,
    ) -> DatasetResult<&ArrayMeta> {
        let meta = self.array_meta(group, name)?;
        if meta.dtype != dtype {
            return Err(DatasetError::DtypeMismatch {
                group: group.to_string(),
                name: name.to_string(),
                expected: dtype.name(),
                found: meta.dtype.name(),
            });
        }
        Ok(meta)
    }

    fn day_slab<'a>(
        &'a self,
        meta: &ArrayMeta,
        group: &str,
        day: usize,
    ) -> DatasetResult<(Vec<usize>, &'a [u8])> {
        let days = meta.shape.first().copied().unwrap_or(0);
        if day >= days {
            return Err(DatasetError::DayOutOfRange {
                group: group.to_string(),
                day,
                days,
            });
        }
        let slab_shape: Vec<usize> = meta.shape[1..].to_vec();
        let slab_elems: usize = slab_shape.iter().product();
        let slab_bytes = slab_elems * meta.dtype.byte_size();
        let start = meta.offset + day * slab_bytes;
        Ok((slab_shape, &self.blob[start..start + slab_bytes]))
    }
}

/// Builds a store on disk: register arrays, then `finish` to write the
/// manifest. Used by tooling and the test suites.
pub struct StoreWriter {
    dir: PathBuf,
    blob: File,
    arrays: Vec<ArrayMeta>,
    offset: usize,
}

impl StoreWriter {
    pub fn create(dir: &Path) -> DatasetResult<Self> {
        fs::create_dir_all(dir).map_err(|e| DatasetError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let blob_path = dir.join(BLOB_FILE);
        let blob = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&blob_path)
            .map_err(|e| DatasetError::Io {
                path: blob_path,
                source: e,
            })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            blob,
            arrays: Vec::new(),
            offset: 0,
        })
    }

    pub fn put_f32(
        &mut self,
        group: &str,
        name: &str,
        shape: &[usize],
        values: &[f32],
    ) -> DatasetResult<()> {
        self.check_len(group, name, shape, values.len())?;
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        self.append(group, name, ArrayDType::F32, shape, &bytes)
    }

    pub fn put_i64(
        &mut self,
        group: &str,
        name: &str,
        shape: &[usize],
        values: &[i64],
    ) -> DatasetResult<()> {
        self.check_len(group, name, shape, values.len())?;
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        self.append(group, name, ArrayDType::I64, shape, &bytes)
    }

    pub fn finish(self) -> DatasetResult<()> {
        let manifest = StoreManifest {
            version: 1,
            arrays: self.arrays,
        };
        let manifest_path = self.dir.join(MANIFEST_FILE);
        let data = serde_json::to_vec_pretty(&manifest).map_err(|e| DatasetError::Json {
            path: manifest_path.clone(),
            source: e,
        })?;
        fs::write(&manifest_path, data).map_err(|e| DatasetError::Io {
            path: manifest_path,
            source: e,
        })
    }

    fn check_len(
        &self,
        group: &str,
        name: &str,
        shape: &[usize],
        len: usize,
    ) -> DatasetResult<()> {
        let expected: usize = shape.iter().product();
        if expected != len {
            return Err(DatasetError::Other(format!(
                "array `{group}/{name}`: shape {shape:?} wants {expected} values, got {len}"
            )));
        }
        Ok(())
    }

    fn append(
        &mut self,
        group: &str,
        name: &str,
        dtype: ArrayDType,
        shape: &[usize],
        bytes: &[u8],
    ) -> DatasetResult<()> {
        self.blob.write_all(bytes).map_err(|e| DatasetError::Io {
            path: self.dir.join(BLOB_FILE),
            source: e,
        })?;
        self.arrays.push(ArrayMeta {
            group: group.to_string(),
            name: name.to_string(),
            dtype,
            shape: shape.to_vec(),
            offset: self.offset,
        });
        self.offset += bytes.len();
        Ok(())
    }
}
