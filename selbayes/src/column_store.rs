//! Columnar, chunked, disk-backed store of recoding indices.
//!
//! The store materializes, for every training instance, one recoding index
//! per used attribute plus a target index. Columns are grouped into chunks;
//! when the whole store does not fit in the configured memory budget, each
//! chunk is written to its own temp file and chunks are loaded and evicted
//! under an LRU policy backed by a shared pool of free index vectors.

use crate::error::{Error, Result};
use crate::preparation::DataPreparationClass;
use crate::progress::{CancelToken, TrainProgress};
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::mem;
use std::path::{Path, PathBuf};

// one memory segment worth of 4-byte integers per chunk file buffer
const FILE_BUFFER_BYTES: usize = 64 * 1024;

// number of chunks targeted to be simultaneously resident
const TARGET_RESIDENT_CHUNKS: usize = 3;

// fraction of a partially allocated pool that is kept
const POOL_SHRINK_FACTOR: f64 = 0.9;

const CHUNK_FILE_BASE_NAME: &str = "DataChunk";

/// Source of training records.
///
/// Each record holds one 1-based recoding index per used attribute, in the
/// order the used attributes were registered, followed by one 1-based target
/// index. The store subtracts 1 to obtain 0-based internal indices.
pub trait RecordSource {
    /// Number of records the source will yield.
    fn instance_count(&self) -> usize;

    /// Opens or rewinds the source.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data cannot be opened.
    fn open(&mut self) -> Result<()>;

    /// Reads the next record into `record`, whose length must be the used
    /// attribute count plus one. Returns `Ok(false)` at the end of data.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data cannot be read.
    fn next_record(&mut self, record: &mut [i32]) -> Result<bool>;
}

/// In-memory record source over a vector of records.
#[derive(Clone, Debug, Default)]
pub struct VecRecordSource {
    records: Vec<Vec<i32>>,
    cursor: usize,
}

impl VecRecordSource {
    /// Wraps the given records.
    #[must_use]
    pub fn new(records: Vec<Vec<i32>>) -> Self {
        Self { records, cursor: 0 }
    }
}

impl RecordSource for VecRecordSource {
    fn instance_count(&self) -> usize {
        self.records.len()
    }

    fn open(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next_record(&mut self, record: &mut [i32]) -> Result<bool> {
        if self.cursor == self.records.len() {
            return Ok(false);
        }
        record.copy_from_slice(&self.records[self.cursor]);
        self.cursor += 1;
        Ok(true)
    }
}

/// Resource configuration of the column store.
#[derive(Clone, Debug)]
pub struct ColumnStoreConfig {
    /// Memory budget for the recoding vectors, in bytes.
    pub memory_limit: usize,
    /// Free space available on the temp directory, in bytes; 0 disables the
    /// disk check.
    pub disk_limit: u64,
    /// Directory the chunk files are created in.
    pub temp_dir: PathBuf,
    /// Chunk management trace level, 0 (silent) to 3 (every column access).
    pub trace_level: u8,
}

impl Default for ColumnStoreConfig {
    fn default() -> Self {
        Self {
            memory_limit: 256 << 20,
            disk_limit: 0,
            temp_dir: std::env::temp_dir(),
            trace_level: 0,
        }
    }
}

#[derive(Debug)]
struct Column {
    attribute: usize,
    chunk: usize,
    column_index: usize,
    recoding: Option<Vec<i32>>,
}

#[derive(Debug, Default)]
struct Chunk {
    columns: Vec<usize>,
    loaded: bool,
    load_freshness: u64,
    file_name: Option<PathBuf>,
    is_error: bool,
}

/// Columnar store of per-instance recoding indices with chunk-grained disk
/// residency.
#[derive(Debug)]
pub struct PreparedColumnStore {
    preparation: DataPreparationClass,
    config: ColumnStoreConfig,
    used_attributes: Vec<usize>,
    columns: Vec<Column>,
    attribute_columns: FxHashMap<usize, usize>,
    chunks: Vec<Chunk>,
    memory_chunks: Vec<usize>,
    free_vectors: Vec<Vec<i32>>,
    target_indexes: Vec<i32>,
    line_count: usize,
    freshness: u64,
    is_fill_error: bool,
    prepared: bool,
}

impl PreparedColumnStore {
    /// Constructs a store over `preparation` with the given resource
    /// configuration.
    #[must_use]
    pub fn new(preparation: DataPreparationClass, config: ColumnStoreConfig) -> Self {
        Self {
            preparation,
            config,
            used_attributes: Vec::new(),
            columns: Vec::new(),
            attribute_columns: FxHashMap::default(),
            chunks: Vec::new(),
            memory_chunks: Vec::new(),
            free_vectors: Vec::new(),
            target_indexes: Vec::new(),
            line_count: 0,
            freshness: 0,
            is_fill_error: false,
            prepared: false,
        }
    }

    /// The preparation class the store was built over.
    #[must_use]
    pub const fn preparation(&self) -> &DataPreparationClass {
        &self.preparation
    }

    /// Registers the prepared attributes to materialize, in evaluation
    /// order. One-shot, before [`Self::compute_prepared_data`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] once data has been computed or
    /// on an out-of-range attribute index.
    pub fn set_used_attributes(&mut self, used_attributes: Vec<usize>) -> Result<()> {
        if self.prepared {
            return Err(Error::InvariantViolation(
                "used attributes are fixed once data is computed".into(),
            ));
        }
        if used_attributes
            .iter()
            .any(|&attribute| attribute >= self.preparation.attribute_count())
        {
            return Err(Error::InvariantViolation(
                "used attribute index out of range".into(),
            ));
        }
        self.used_attributes = used_attributes;
        Ok(())
    }

    /// Used attributes in their current (possibly shuffled) order.
    #[must_use]
    pub fn used_attributes(&self) -> &[usize] {
        &self.used_attributes
    }

    /// Returns `true` once [`Self::compute_prepared_data`] has succeeded.
    #[must_use]
    pub const fn is_prepared_data_computed(&self) -> bool {
        self.prepared
    }

    /// Per-instance 0-based target indices.
    #[must_use]
    pub fn target_indexes(&self) -> &[i32] {
        &self.target_indexes
    }

    /// Number of materialized instances.
    #[must_use]
    pub const fn instance_count(&self) -> usize {
        self.line_count
    }

    /// Number of chunks the columns were split into.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunk indices currently resident in memory.
    #[must_use]
    pub fn resident_chunks(&self) -> Vec<usize> {
        let mut resident = self.memory_chunks.clone();
        resident.sort_unstable();
        resident
    }

    /// Chunk hosting the column of `attribute`.
    #[must_use]
    pub fn chunk_of_attribute(&self, attribute: usize) -> usize {
        self.columns[self.attribute_columns[&attribute]].chunk
    }

    /// Latched error flag of the fill methods. Only reset by a new
    /// preparation.
    #[must_use]
    pub const fn is_fill_error(&self) -> bool {
        self.is_fill_error
    }

    /// Streams every record of `source` once, materializing one column per
    /// used attribute and the target index vector.
    ///
    /// Columns are grouped into chunks sized from the memory budget; with
    /// more than one chunk each chunk is spilled to its own temp file while
    /// streaming.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientMemory`] when the recoding-vector pool
    /// cannot hold a single column, [`Error::InsufficientDiskSpace`] when
    /// the configured disk budget cannot hold the chunk files,
    /// [`Error::Cancelled`] on interruption, and [`Error::Io`] on a chunk
    /// write failure. On error the store is left clean.
    pub fn compute_prepared_data(
        &mut self,
        source: &mut dyn RecordSource,
        token: &CancelToken,
        progress: &mut dyn TrainProgress,
    ) -> Result<()> {
        if self.prepared {
            return Err(Error::InvariantViolation(
                "prepared data is already computed".into(),
            ));
        }
        if self.used_attributes.is_empty() {
            return Err(Error::Configuration(
                "no used attribute to materialize".into(),
            ));
        }
        progress.main_label("Database recoding");

        let result = self.try_compute_prepared_data(source, token, progress);
        if result.is_err() {
            self.clean_prepared_data();
        }
        result
    }

    /// Drops every materialized structure, removing the chunk files.
    pub fn clean_prepared_data(&mut self) {
        for chunk in &self.chunks {
            if let Some(file_name) = &chunk.file_name {
                let _ = std::fs::remove_file(file_name);
            }
        }
        self.columns.clear();
        self.attribute_columns.clear();
        self.chunks.clear();
        self.memory_chunks.clear();
        self.free_vectors.clear();
        self.target_indexes.clear();
        self.line_count = 0;
        self.is_fill_error = false;
        self.prepared = false;
    }

    /// Copies the recoding-index column of `attribute` into `recodings`,
    /// loading its chunk if needed. An I/O failure latches
    /// [`Self::is_fill_error`]; the copied bits are then the last known
    /// content.
    pub fn fill_recoding_indexes_at(&mut self, attribute: usize, recodings: &mut Vec<i32>) {
        let column = self.attribute_columns[&attribute];
        self.load_column(column);
        recodings.clear();
        recodings.extend_from_slice(
            self.columns[column]
                .recoding
                .as_ref()
                .expect("loaded column holds a vector"),
        );
    }

    /// Fills `ln_probs` with, per instance, log P(attribute part | target
    /// part `target`).
    pub fn fill_target_conditional_ln_probs_at(
        &mut self,
        attribute: usize,
        target: usize,
        ln_probs: &mut Vec<f64>,
    ) {
        let column = self.attribute_columns[&attribute];
        self.load_column(column);
        let recoding = self.columns[column]
            .recoding
            .as_ref()
            .expect("loaded column holds a vector");
        let prepared = self.preparation.attribute_at(attribute);
        ln_probs.clear();
        ln_probs.extend(
            recoding
                .iter()
                .map(|&index| prepared.ln_source_conditional_prob(index as usize, target)),
        );
    }

    /// Accumulates `weight * log P(attribute part | target part)` into
    /// `scores`, in place.
    pub fn upgrade_target_conditional_ln_probs_at(
        &mut self,
        attribute: usize,
        target: usize,
        weight: f64,
        scores: &mut [f64],
    ) {
        assert_eq!(scores.len(), self.line_count);
        let column = self.attribute_columns[&attribute];
        self.load_column(column);
        let recoding = self.columns[column]
            .recoding
            .as_ref()
            .expect("loaded column holds a vector");
        let prepared = self.preparation.attribute_at(attribute);
        for (score, &index) in scores.iter_mut().zip(recoding) {
            *score += weight * prepared.ln_source_conditional_prob(index as usize, target);
        }
    }

    /// Permutes the external order of the used attributes without moving any
    /// data: chunks are shuffled, then columns inside each chunk, so a
    /// traversal in the new order still visits whole chunks consecutively.
    pub fn shuffle_used_attributes(&mut self, rng: &mut impl Rng) {
        assert!(self.prepared, "shuffle requires computed data");
        let mut shuffled_chunks: Vec<usize> = (0..self.chunks.len()).collect();
        shuffled_chunks.shuffle(rng);
        let mut position = 0;
        for &chunk_index in &shuffled_chunks {
            let mut shuffled_columns = self.chunks[chunk_index].columns.clone();
            shuffled_columns.shuffle(rng);
            for column in shuffled_columns {
                self.used_attributes[position] = self.columns[column].attribute;
                position += 1;
            }
        }
        debug_assert_eq!(position, self.used_attributes.len());
    }

    /// Restores the initial order of the used attributes.
    pub fn restore_used_attributes(&mut self) {
        assert!(self.prepared, "restore requires computed data");
        let mut position = 0;
        for chunk in &self.chunks {
            for &column in &chunk.columns {
                self.used_attributes[position] = self.columns[column].attribute;
                position += 1;
            }
        }
        debug_assert_eq!(position, self.used_attributes.len());
    }

    /// Writes the recoded matrix to a tab-separated file with a header line:
    /// one index column per used attribute plus the target index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be written.
    pub fn write_indexed_prepared_data_file(&mut self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for position in 0..self.used_attributes.len() {
            let attribute = self.used_attributes[position];
            write!(
                writer,
                "{}Index\t",
                self.preparation.attribute_at(attribute).name()
            )?;
        }
        writeln!(writer, "TargetIndex")?;

        let mut column_data = vec![Vec::new(); self.used_attributes.len()];
        for (position, buffer) in column_data.iter_mut().enumerate() {
            let attribute = self.used_attributes[position];
            self.fill_recoding_indexes_at(attribute, buffer);
        }
        for line in 0..self.line_count {
            for buffer in &column_data {
                write!(writer, "{}\t", buffer[line])?;
            }
            writeln!(writer, "{}", self.target_indexes[line])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Writes per-instance conditional log-probabilities to a tab-separated
    /// file: one column per used attribute and target part, plus the target
    /// index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be written.
    pub fn write_scored_prepared_data_file(&mut self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for &attribute in &self.used_attributes.clone() {
            let name = self.preparation.attribute_at(attribute).name().to_string();
            for target in 0..self.preparation.attribute_at(attribute).target_part_count() {
                write!(writer, "{name}LnProb{}\t", target + 1)?;
            }
        }
        writeln!(writer, "TargetIndex")?;

        let mut score_columns = Vec::new();
        for &attribute in &self.used_attributes.clone() {
            for target in 0..self.preparation.attribute_at(attribute).target_part_count() {
                let mut buffer = Vec::new();
                self.fill_target_conditional_ln_probs_at(attribute, target, &mut buffer);
                score_columns.push(buffer);
            }
        }
        for line in 0..self.line_count {
            for buffer in &score_columns {
                write!(writer, "{}\t", buffer[line])?;
            }
            writeln!(writer, "{}", self.target_indexes[line])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn try_compute_prepared_data(
        &mut self,
        source: &mut dyn RecordSource,
        token: &CancelToken,
        progress: &mut dyn TrainProgress,
    ) -> Result<()> {
        source.open()?;
        self.line_count = source.instance_count();

        self.target_indexes = Vec::new();
        self.target_indexes
            .try_reserve_exact(self.line_count)
            .map_err(|_| {
                Error::InsufficientMemory(format!(
                    "target index vector of size {}",
                    self.line_count
                ))
            })?;

        // chunk layout from the memory budget
        let mut max_memory_columns = self.compute_max_memory_columns();
        let (mut chunk_count, mut memory_chunk_count, mut chunk_columns) =
            compute_chunk_parameters(self.used_attributes.len(), max_memory_columns);
        let mut memory_columns = memory_chunk_count * chunk_columns;
        if self.config.trace_level >= 1 {
            log::debug!(
                "chunk layout: {chunk_count} chunks, {memory_chunk_count} resident, \
                 {chunk_columns} columns per chunk"
            );
        }

        // recoding-vector pool, shrinking the layout if allocation stalls
        self.free_vectors = allocate_recoding_vectors(memory_columns, self.line_count);
        if self.free_vectors.is_empty() {
            return Err(Error::InsufficientMemory(format!(
                "recoding index vectors of size {}",
                self.line_count
            )));
        }
        if self.free_vectors.len() < memory_columns {
            max_memory_columns =
                (((self.free_vectors.len() as f64) * POOL_SHRINK_FACTOR).floor() as usize).max(1);
            (chunk_count, memory_chunk_count, chunk_columns) =
                compute_chunk_parameters(self.used_attributes.len(), max_memory_columns);
            memory_columns = memory_chunk_count * chunk_columns;
            self.free_vectors.truncate(memory_columns);
            if self.config.trace_level >= 1 {
                log::debug!(
                    "shrunk chunk layout: {chunk_count} chunks, {memory_chunk_count} resident, \
                     {chunk_columns} columns per chunk"
                );
            }
        }

        // disk budget for the spilled chunks
        if chunk_count > 1 && self.config.disk_limit > 0 {
            let needed = self.used_attributes.len() as u64 * self.line_count as u64 * 4
                + chunk_count as u64 * FILE_BUFFER_BYTES as u64;
            if needed > self.config.disk_limit {
                return Err(Error::InsufficientDiskSpace {
                    needed,
                    available: self.config.disk_limit,
                });
            }
        }

        // chunk and column descriptors
        self.chunks = (0..chunk_count).map(|_| Chunk::default()).collect();
        for (position, &attribute) in self.used_attributes.iter().enumerate() {
            let chunk = position / chunk_columns;
            let column = Column {
                attribute,
                chunk,
                column_index: self.chunks[chunk].columns.len(),
                recoding: None,
            };
            self.columns.push(column);
            self.chunks[chunk].columns.push(position);
            self.attribute_columns.insert(attribute, position);
        }

        let in_memory = chunk_count == 1;
        let mut writers: Vec<Option<BufWriter<File>>> = Vec::new();
        if in_memory {
            self.set_chunk_memory(0);
            self.freshness += 1;
            self.chunks[0].load_freshness = self.freshness;
            self.memory_chunks.push(0);
        } else {
            for chunk_index in 0..chunk_count {
                let file_name = self
                    .config
                    .temp_dir
                    .join(format!("{CHUNK_FILE_BASE_NAME}{chunk_index}.dat"));
                let file = File::create(&file_name)?;
                self.chunks[chunk_index].file_name = Some(file_name);
                writers.push(Some(BufWriter::with_capacity(FILE_BUFFER_BYTES, file)));
            }
        }

        // single streaming pass over the records
        let mut record = vec![0i32; self.used_attributes.len() + 1];
        let mut lines_read = 0usize;
        while source.next_record(&mut record)? {
            if token.is_interruption_requested() {
                return Err(Error::Cancelled);
            }
            self.target_indexes.push(record[record.len() - 1] - 1);
            for (position, &raw_index) in record[..record.len() - 1].iter().enumerate() {
                let recoding_index = raw_index - 1;
                if in_memory {
                    let vector = self.columns[position]
                        .recoding
                        .as_mut()
                        .expect("in-memory column holds a vector");
                    vector[lines_read] = recoding_index;
                } else {
                    let writer = writers[self.columns[position].chunk]
                        .as_mut()
                        .expect("writer is open while streaming");
                    writer.write_all(&recoding_index.to_le_bytes())?;
                }
            }
            lines_read += 1;
            if self.line_count > 0 && lines_read % (self.line_count / 100 + 1) == 0 {
                progress.progress((lines_read * 100 / self.line_count) as u32);
            }
        }
        if lines_read != self.line_count {
            return Err(Error::InvariantViolation(format!(
                "read {lines_read} records instead of {}",
                self.line_count
            )));
        }

        for writer in writers.iter_mut().filter_map(Option::as_mut) {
            writer.flush()?;
        }
        drop(writers);

        self.prepared = true;
        progress.progress(100);
        Ok(())
    }

    // memory cost of one resident column, file buffer included
    fn column_memory(&self) -> usize {
        mem::size_of::<Column>()
            + mem::size_of::<Vec<i32>>()
            + 2 * mem::size_of::<usize>()
            + self.line_count * mem::size_of::<i32>()
            + FILE_BUFFER_BYTES
    }

    fn compute_max_memory_columns(&self) -> usize {
        let column_memory = self.column_memory();
        let descriptor_memory = self.used_attributes.len()
            * (mem::size_of::<Column>() + mem::size_of::<Chunk>() + 2 * mem::size_of::<usize>());
        // the target index column is always resident
        let mut available = self
            .config
            .memory_limit
            .saturating_sub(descriptor_memory)
            .saturating_sub(column_memory);
        // keep half as a safety margin
        available /= 2;
        available / column_memory
    }

    fn set_chunk_memory(&mut self, chunk_index: usize) {
        let columns = self.chunks[chunk_index].columns.clone();
        for column in columns {
            let mut vector = self
                .free_vectors
                .pop()
                .expect("free vector available for a loading chunk");
            vector.resize(self.line_count, 0);
            self.columns[column].recoding = Some(vector);
        }
        self.chunks[chunk_index].loaded = true;
    }

    fn unset_chunk_memory(&mut self, chunk_index: usize) {
        let columns = self.chunks[chunk_index].columns.clone();
        for column in columns {
            let vector = self.columns[column]
                .recoding
                .take()
                .expect("loaded column holds a vector");
            self.free_vectors.push(vector);
        }
        self.chunks[chunk_index].loaded = false;
    }

    fn load_column(&mut self, column: usize) {
        let chunk_index = self.columns[column].chunk;
        if self.config.trace_level >= 3 {
            log::trace!("load column of attribute {}", self.columns[column].attribute);
        }
        if self.chunks[chunk_index].loaded {
            return;
        }

        // evict the least recently loaded chunk when the pool runs dry
        if self.free_vectors.len() < self.chunks[chunk_index].columns.len() {
            let (position, &oldest) = self
                .memory_chunks
                .iter()
                .enumerate()
                .min_by_key(|(_, &resident)| self.chunks[resident].load_freshness)
                .expect("a resident chunk exists when the pool is dry");
            self.memory_chunks.swap_remove(position);
            self.unset_chunk_memory(oldest);
            if self.config.trace_level >= 2 {
                log::debug!("unload chunk {oldest}");
            }
        }

        self.freshness += 1;
        self.chunks[chunk_index].load_freshness = self.freshness;
        self.set_chunk_memory(chunk_index);
        self.memory_chunks.push(chunk_index);
        if self.config.trace_level >= 2 {
            log::debug!("load chunk {chunk_index}");
        }

        if let Err(error) = self.read_chunk_file(chunk_index) {
            log::warn!("chunk {chunk_index} read failed: {error}");
            self.chunks[chunk_index].is_error = true;
            self.is_fill_error = true;
        }
    }

    fn read_chunk_file(&mut self, chunk_index: usize) -> Result<()> {
        let file_name = self.chunks[chunk_index]
            .file_name
            .clone()
            .expect("spilled chunk has a file");
        let column_count = self.chunks[chunk_index].columns.len();
        let mut reader = BufReader::with_capacity(FILE_BUFFER_BYTES, File::open(&file_name)?);

        let mut raw = [0u8; 4];
        let mut offset = 0usize;
        loop {
            match reader.read_exact(&mut raw) {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(error) => return Err(error.into()),
            }
            let line = offset / column_count;
            let column = self.chunks[chunk_index].columns[offset % column_count];
            self.columns[column]
                .recoding
                .as_mut()
                .expect("loading chunk holds vectors")[line] = i32::from_le_bytes(raw);
            offset += 1;
        }
        if offset != column_count * self.line_count {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("chunk file {} is truncated", file_name.display()),
            )));
        }
        Ok(())
    }
}

impl Drop for PreparedColumnStore {
    fn drop(&mut self) {
        for chunk in &self.chunks {
            if let Some(file_name) = &chunk.file_name {
                let _ = std::fs::remove_file(file_name);
            }
        }
    }
}

// pool allocation that degrades gracefully when memory runs out
fn allocate_recoding_vectors(count: usize, line_count: usize) -> Vec<Vec<i32>> {
    let mut vectors = Vec::with_capacity(count);
    for _ in 0..count {
        let mut vector: Vec<i32> = Vec::new();
        if vector.try_reserve_exact(line_count).is_err() {
            break;
        }
        vector.resize(line_count, 0);
        vectors.push(vector);
    }
    vectors
}

fn compute_chunk_parameters(
    used_columns: usize,
    max_memory_columns: usize,
) -> (usize, usize, usize) {
    let max_memory_columns = max_memory_columns.max(1);

    // everything fits: a single, never-spilled chunk
    if used_columns <= max_memory_columns {
        return (1, 1, used_columns.max(1));
    }

    let mut chunk_columns = (max_memory_columns / TARGET_RESIDENT_CHUNKS).max(1);
    let mut chunk_count = used_columns / chunk_columns;
    if chunk_count * chunk_columns < used_columns {
        chunk_count += 1;
    }
    // rebalance so chunks are near-equal
    chunk_columns = used_columns / chunk_count;
    if chunk_count * chunk_columns < used_columns {
        chunk_columns += 1;
    }
    let memory_chunk_count = (max_memory_columns / chunk_columns).clamp(1, chunk_count);
    (chunk_count, memory_chunk_count, chunk_columns)
}
