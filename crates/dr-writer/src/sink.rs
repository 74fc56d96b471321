//! Format sinks: where sliced spectra end up.
//!
//! A sink receives timestamps and one 2-D `[record][channel]` field per
//! polarization as separate appends at an explicit record offset. Appends
//! are not atomic across fields; a failure between them leaves the sink with
//! a partially written record range.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arrow::array::{ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, UInt64Array};
use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{WriterProperties, WriterVersion};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from sink operations.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sink is closed")]
    Closed,

    #[error("no field {field} (sink has {nfields})")]
    UnknownField { field: usize, nfields: usize },

    #[error("field data of {len} values is not a whole number of {nchan}-channel records")]
    RaggedRows { len: usize, nchan: usize },
}

/// Layout and metadata of a spectra output.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSchema {
    pub beam: u32,
    /// Channel centre frequencies in Hz.
    pub frequencies: Vec<f64>,
    /// Integration time in seconds.
    pub integration_time: f64,
    /// One field per polarization product.
    pub pols: Vec<String>,
    /// Expected number of records, used to pre-size storage.
    pub capacity: usize,
}

impl SinkSchema {
    pub fn nchan(&self) -> usize {
        self.frequencies.len()
    }
}

/// An open output being filled record by record.
pub trait FormatSink: Send {
    /// Store time tags for records `offset..offset + tags.len()`.
    fn append_time(&mut self, offset: usize, tags: &[u64]) -> Result<(), SinkError>;

    /// Store `rows` (record-major, `nchan` values per record) for one field.
    fn append_field(&mut self, field: usize, offset: usize, rows: &[f32]) -> Result<(), SinkError>;

    /// Flush and close. Closing an already closed sink is a no-op.
    fn close(&mut self) -> Result<(), SinkError>;

    fn is_closed(&self) -> bool;
}

/// Creates sinks for windows as they start.
pub trait SinkFactory: Send + Sync {
    fn create(&self, path: &Path, schema: &SinkSchema) -> Result<Box<dyn FormatSink>, SinkError>;
}

/// Record storage shared by the in-memory and Parquet sinks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBuffer {
    nchan: usize,
    times: Vec<u64>,
    fields: Vec<Vec<f32>>,
    records: usize,
}

impl RecordBuffer {
    fn new(schema: &SinkSchema) -> Self {
        let nchan = schema.nchan();
        Self {
            nchan,
            times: Vec::with_capacity(schema.capacity),
            fields: schema
                .pols
                .iter()
                .map(|_| Vec::with_capacity(schema.capacity * nchan))
                .collect(),
            records: 0,
        }
    }

    fn put_times(&mut self, offset: usize, tags: &[u64]) {
        let end = offset + tags.len();
        if self.times.len() < end {
            self.times.resize(end, 0);
        }
        self.times[offset..end].copy_from_slice(tags);
        self.records = self.records.max(end);
    }

    fn put_field(&mut self, field: usize, offset: usize, rows: &[f32]) -> Result<(), SinkError> {
        let nfields = self.fields.len();
        let nchan = self.nchan;
        if nchan == 0 || rows.len() % nchan != 0 {
            return Err(SinkError::RaggedRows {
                len: rows.len(),
                nchan,
            });
        }
        let data = self
            .fields
            .get_mut(field)
            .ok_or(SinkError::UnknownField { field, nfields })?;

        let start = offset * nchan;
        let end = start + rows.len();
        if data.len() < end {
            data.resize(end, f32::NAN);
        }
        data[start..end].copy_from_slice(rows);
        self.records = self.records.max(end / nchan);
        Ok(())
    }

    /// Number of records touched so far.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn times(&self) -> &[u64] {
        &self.times
    }

    pub fn field(&self, field: usize) -> Option<&[f32]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    fn padded(&self) -> (Vec<u64>, Vec<Vec<f32>>) {
        let mut times = self.times.clone();
        times.resize(self.records, 0);
        let fields = self
            .fields
            .iter()
            .map(|f| {
                let mut f = f.clone();
                f.resize(self.records * self.nchan, f32::NAN);
                f
            })
            .collect();
        (times, fields)
    }
}

/// In-memory sink whose contents stay inspectable after close.
#[derive(Debug, Clone)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySinkState {
    pub path: PathBuf,
    pub buffer: RecordBuffer,
    pub close_count: usize,
}

impl MemorySink {
    pub fn new(path: &Path, schema: &SinkSchema) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemorySinkState {
                path: path.to_path_buf(),
                buffer: RecordBuffer::new(schema),
                close_count: 0,
            })),
        }
    }

    /// Copy of the current contents.
    pub fn state(&self) -> MemorySinkState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemorySinkState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}

impl FormatSink for MemorySink {
    fn append_time(&mut self, offset: usize, tags: &[u64]) -> Result<(), SinkError> {
        self.with_state(|s| {
            if s.close_count > 0 {
                return Err(SinkError::Closed);
            }
            s.buffer.put_times(offset, tags);
            Ok(())
        })
    }

    fn append_field(&mut self, field: usize, offset: usize, rows: &[f32]) -> Result<(), SinkError> {
        self.with_state(|s| {
            if s.close_count > 0 {
                return Err(SinkError::Closed);
            }
            s.buffer.put_field(field, offset, rows)
        })
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.with_state(|s| s.close_count += 1);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.with_state(|s| s.close_count > 0)
    }
}

/// Factory that hands out [`MemorySink`]s and remembers every one created.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkFactory {
    created: Arc<Mutex<Vec<MemorySink>>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sinks(&self) -> Vec<MemorySink> {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SinkFactory for MemorySinkFactory {
    fn create(&self, path: &Path, schema: &SinkSchema) -> Result<Box<dyn FormatSink>, SinkError> {
        let sink = MemorySink::new(path, schema);
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sink.clone());
        Ok(Box::new(sink))
    }
}

/// Column name of the time tag column.
pub const TIME_COLUMN: &str = "time_tag";

/// Schema metadata keys.
pub const META_FREQUENCIES: &str = "frequencies";
pub const META_INTEGRATION_TIME: &str = "integration_time";
pub const META_BEAM: &str = "beam";

/// Build the Arrow schema for a spectra output.
///
/// One `time_tag` column plus one `FixedSizeList<Float32>[nchan]` column
/// per polarization; frequencies, integration time and beam ride along
/// as schema metadata.
pub fn spectra_schema(schema: &SinkSchema) -> Result<Schema, SinkError> {
    let item = channel_item_field();
    let mut fields = vec![Field::new(TIME_COLUMN, DataType::UInt64, false)];
    for pol in &schema.pols {
        fields.push(Field::new(
            pol,
            DataType::FixedSizeList(item.clone(), schema.nchan() as i32),
            false,
        ));
    }

    let metadata = HashMap::from([
        (
            META_FREQUENCIES.to_string(),
            serde_json::to_string(&schema.frequencies)?,
        ),
        (
            META_INTEGRATION_TIME.to_string(),
            schema.integration_time.to_string(),
        ),
        (META_BEAM.to_string(), schema.beam.to_string()),
    ]);

    Ok(Schema::new(fields).with_metadata(metadata))
}

fn channel_item_field() -> FieldRef {
    Arc::new(Field::new("item", DataType::Float32, false))
}

/// Spectra sink backed by a Parquet file.
///
/// Records accumulate in memory; `close` writes them in one row group to
/// `<path>.tmp` and renames it into place, so the final path only ever
/// holds a complete file.
pub struct ParquetSink {
    path: PathBuf,
    temp_path: PathBuf,
    schema: SinkSchema,
    buffer: RecordBuffer,
    file: Option<File>,
    compression: Compression,
}

impl ParquetSink {
    pub fn create(path: &Path, schema: &SinkSchema) -> Result<Self, SinkError> {
        Self::create_with_compression(path, schema, default_compression())
    }

    pub fn create_with_compression(
        path: &Path,
        schema: &SinkSchema,
        compression: Compression,
    ) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = temp_path_for(path);
        let file = File::create(&temp_path)?;

        debug!(
            path = %path.display(),
            nchan = schema.nchan(),
            npol = schema.pols.len(),
            capacity = schema.capacity,
            "Parquet sink opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            temp_path,
            schema: schema.clone(),
            buffer: RecordBuffer::new(schema),
            file: Some(file),
            compression,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn build_batch(&self, schema: Arc<Schema>) -> Result<RecordBatch, SinkError> {
        let (times, fields) = self.buffer.padded();
        let item = channel_item_field();
        let nchan = self.schema.nchan() as i32;

        let mut columns: Vec<ArrayRef> = vec![Arc::new(UInt64Array::from(times))];
        for values in fields {
            let list = FixedSizeListArray::try_new(
                item.clone(),
                nchan,
                Arc::new(Float32Array::from(values)),
                None,
            )?;
            columns.push(Arc::new(list));
        }

        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

impl FormatSink for ParquetSink {
    fn append_time(&mut self, offset: usize, tags: &[u64]) -> Result<(), SinkError> {
        if self.file.is_none() {
            return Err(SinkError::Closed);
        }
        self.buffer.put_times(offset, tags);
        Ok(())
    }

    fn append_field(&mut self, field: usize, offset: usize, rows: &[f32]) -> Result<(), SinkError> {
        if self.file.is_none() {
            return Err(SinkError::Closed);
        }
        self.buffer.put_field(field, offset, rows)
    }

    fn close(&mut self) -> Result<(), SinkError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        let schema = Arc::new(spectra_schema(&self.schema)?);
        let batch = self.build_batch(schema.clone())?;

        let props = WriterProperties::builder()
            .set_writer_version(WriterVersion::PARQUET_2_0)
            .set_compression(self.compression)
            .build();
        let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        atomic_rename(&self.temp_path, &self.path)?;

        info!(
            path = %self.path.display(),
            records = self.buffer.records(),
            "Parquet sink closed"
        );
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

/// Factory producing [`ParquetSink`]s.
#[derive(Debug, Clone)]
pub struct ParquetSinkFactory {
    compression: Compression,
}

impl Default for ParquetSinkFactory {
    fn default() -> Self {
        Self {
            compression: default_compression(),
        }
    }
}

impl ParquetSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use snappy compression instead of zstd.
    pub fn with_snappy(mut self) -> Self {
        self.compression = Compression::SNAPPY;
        self
    }
}

impl SinkFactory for ParquetSinkFactory {
    fn create(&self, path: &Path, schema: &SinkSchema) -> Result<Box<dyn FormatSink>, SinkError> {
        Ok(Box::new(ParquetSink::create_with_compression(
            path,
            schema,
            self.compression,
        )?))
    }
}

fn default_compression() -> Compression {
    ZstdLevel::try_new(3)
        .map(Compression::ZSTD)
        .unwrap_or(Compression::SNAPPY)
}

/// `<path>.tmp`, keeping the original extension intact.
pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Rename a finished temp file onto its final path.
pub(crate) fn atomic_rename(temp_path: &Path, final_path: &Path) -> Result<(), std::io::Error> {
    fs::rename(temp_path, final_path)
}
