//! The pipeline orchestrator: source → map → build → (validate) → sink.
//! The default model is single-threaded cooperative streaming — one record
//! is consumed, mapped, built, and emitted before the next is requested,
//! which gives constant memory and intrinsic backpressure. Only the Cosmos
//! path fans out, with a bounded worker pool.

use crate::dead_letter::DeadLetterWriter;
use crate::progress::{Progress, ProgressFn};
use crate::result::{PipelineResult, RunState};
use crate::{PipelineError, RecordError};
use cosmos::{BulkError, BulkResult, DocumentStore};
use document::{mask_pii, DocumentBuilder};
use mapping::{FieldMapper, RawRecord, TransformRegistry};
use serde_json::Value;
use shapes::ShapeDefinition;
use sources::{RecordIter, SourceAdapter};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use validation::{PreBuildValidator, Severity, ShaclValidator, ValidationMode, ValidationReport};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Run the pre-build tier on every record.
    pub validate: bool,
    /// Run the full-SHACL tier on every built document.
    pub shacl: bool,
    /// Failure routing: strict aborts, report dead-letters and continues.
    pub validation_mode: ValidationMode,
    pub dead_letter_path: Option<PathBuf>,
    /// Progress callback cadence, in records.
    pub progress_every: u64,
    /// Pretty-print JSON array output.
    pub pretty: bool,
}

impl Default for PipelineOptions {
    fn default() -> PipelineOptions {
        PipelineOptions {
            validate: false,
            shacl: false,
            validation_mode: ValidationMode::Report,
            dead_letter_path: None,
            progress_every: 1000,
            pretty: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CosmosOptions {
    pub concurrency: usize,
    pub partition_value: Option<String>,
}

impl Default for CosmosOptions {
    fn default() -> CosmosOptions {
        CosmosOptions {
            concurrency: cosmos::DEFAULT_CONCURRENCY,
            partition_value: None,
        }
    }
}

/// One configured run over one source. The pipeline exclusively owns its
/// source, dead-letter writer, and progress reporter; the shape definition
/// is shared read-only.
pub struct Pipeline {
    definition: Arc<ShapeDefinition>,
    mapper: FieldMapper,
    builder: DocumentBuilder,
    prebuild: Option<PreBuildValidator>,
    shacl: Option<ShaclValidator>,
    source: Box<dyn SourceAdapter>,
    options: PipelineOptions,
    progress: Option<ProgressFn>,
    dead_letter: Option<DeadLetterWriter>,
    cancel: CancellationToken,
    state: RunState,
}

impl Pipeline {
    /// Builds a pipeline, sealing the transform registry: user transforms
    /// must be registered before this point.
    pub fn new(
        definition: Arc<ShapeDefinition>,
        source: Box<dyn SourceAdapter>,
        transforms: TransformRegistry,
        options: PipelineOptions,
    ) -> Result<Pipeline, PipelineError> {
        transforms.seal();
        let transforms = Arc::new(transforms);
        let mapper = FieldMapper::new(definition.mapping.clone(), transforms.clone())?;
        let builder =
            DocumentBuilder::new(&definition.mapping, Some(&definition.context), &transforms)?;
        let prebuild = if options.validate {
            Some(PreBuildValidator::from_shape(&definition, &transforms)?)
        } else {
            None
        };
        let shacl = options.shacl.then(|| ShaclValidator::new(&definition));
        Ok(Pipeline {
            definition,
            mapper,
            builder,
            prebuild,
            shacl,
            source,
            options,
            progress: None,
            dead_letter: None,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
        })
    }

    pub fn set_progress(&mut self, callback: ProgressFn) {
        self.progress = Some(callback);
    }

    /// Token observed between records (and between upserts on the Cosmos
    /// path). In-flight work completes; the result is `Cancelled` with
    /// accurate partial counts.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn definition(&self) -> &Arc<ShapeDefinition> {
        &self.definition
    }

    fn begin(&mut self) -> Result<(), PipelineError> {
        match self.state {
            RunState::Idle => {}
            _ if self.source.restartable() => {}
            _ => return Err(PipelineError::NotRestartable),
        }
        self.state = RunState::Running;
        if self.dead_letter.is_none() {
            if let Some(path) = &self.options.dead_letter_path {
                self.dead_letter = Some(DeadLetterWriter::create(path)?);
            }
        }
        Ok(())
    }

    /// The per-record hot path: validate (fast tier), map, build, validate
    /// (SHACL tier).
    fn process(&self, record: &RawRecord) -> Result<Value, RecordError> {
        if let Some(validator) = &self.prebuild {
            let mut report = ValidationReport::new();
            if validator.validate_record(record, &mut report) > 0 {
                return Err(RecordError::Validation(first_error(&report)));
            }
        }
        let mapped = self.mapper.map(record)?;
        let built = self.builder.build(&mapped)?;
        if let Some(validator) = &self.shacl {
            let mut report = ValidationReport::new();
            if validator.validate_document(&built, &mut report) > 0 {
                return Err(RecordError::Validation(first_error(&report)));
            }
        }
        Ok(built)
    }

    /// Routes one failed record: to the DLQ when configured (counts as
    /// failed), otherwise dropped with a warning (counts as filtered).
    fn divert(&self, record: &RawRecord, error: &RecordError, result: &mut PipelineResult) {
        let row = Value::Object(record.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        tracing::warn!(
            kind = error.kind(),
            error = %error,
            row = %mask_pii(&row),
            "record failed"
        );
        match &self.dead_letter {
            Some(writer) => {
                if let Err(e) = writer.write("record failed", error.kind(), &error.to_string(), &row)
                {
                    tracing::error!(error = %e, "could not write dead-letter entry");
                }
                result.records_failed += 1;
            }
            None => result.records_filtered += 1,
        }
    }

    fn close_dead_letter(&mut self, result: &mut PipelineResult) -> Result<(), PipelineError> {
        if let Some(writer) = self.dead_letter.take() {
            result.dead_letter_path = Some(writer.finish()?);
        }
        Ok(())
    }

    /// Shared driver for every sink-shaped run. `emit` returns the bytes it
    /// wrote for the document.
    fn run_records<F>(&mut self, mut emit: F) -> Result<PipelineResult, PipelineError>
    where
        F: FnMut(&Value) -> Result<u64, PipelineError>,
    {
        self.begin()?;
        let start = Instant::now();
        let total = self.source.count();
        let records = match self.source.read() {
            Ok(records) => records,
            Err(e) => {
                self.state = RunState::Failed;
                return Err(e.into());
            }
        };
        let mut progress = Progress::new(self.progress.take(), self.options.progress_every, total);
        let strict = self.options.validation_mode == ValidationMode::Strict;
        let mut result = PipelineResult::default();
        let mut run_error: Option<PipelineError> = None;
        let mut cancelled = false;

        for record in records {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    run_error = Some(e.into());
                    break;
                }
            };
            result.records_in += 1;
            progress.tick();
            match self.process(&record) {
                Ok(built) => match emit(&built) {
                    Ok(bytes) => {
                        result.records_out += 1;
                        result.bytes_written += bytes;
                    }
                    Err(e) => {
                        run_error = Some(e);
                        break;
                    }
                },
                Err(record_error) if strict => {
                    run_error = Some(record_error.into());
                    break;
                }
                Err(record_error) => self.divert(&record, &record_error, &mut result),
            }
        }

        progress.finish();
        self.progress = progress.into_callback();
        self.close_dead_letter(&mut result)?;

        if let Some(e) = run_error {
            self.state = RunState::Failed;
            return Err(e);
        }
        self.state = if cancelled {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        let result = result.finish(start.elapsed());
        tracing::info!(
            records_in = result.records_in,
            records_out = result.records_out,
            records_failed = result.records_failed,
            records_filtered = result.records_filtered,
            elapsed_seconds = result.elapsed_seconds,
            "pipeline run finished"
        );
        Ok(result)
    }

    /// Lazy stream of built documents: finite, non-restartable within a
    /// run, constant memory with respect to input size.
    pub fn stream(&mut self) -> Result<DocumentStream<'_>, PipelineError> {
        self.begin()?;
        let records = self.source.read()?;
        Ok(DocumentStream {
            records,
            pipeline: self,
            counters: PipelineResult::default(),
        })
    }

    /// Materializes every document. Bounded by input size.
    pub fn build_all(&mut self) -> Result<(Vec<Value>, PipelineResult), PipelineError> {
        let mut documents = Vec::new();
        let result = self.run_records(|built| {
            documents.push(built.clone());
            Ok(0)
        })?;
        Ok((documents, result))
    }

    /// Writes a JSON array to `path`.
    pub fn to_json(&mut self, path: impl AsRef<Path>) -> Result<PipelineResult, PipelineError> {
        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = std::io::BufWriter::new(file);
        let pretty = self.options.pretty;
        writer.write_all(b"[")?;
        let mut first = true;
        let mut result = self.run_records(|built| {
            let bytes = if pretty {
                document::to_bytes_pretty(built)
            } else {
                document::to_bytes(built)
            }
            .map_err(|e| PipelineError::Record(RecordError::Serialization(e)))?;
            let mut written = 0u64;
            if !first {
                writer.write_all(b",")?;
                written += 1;
            }
            if pretty {
                writer.write_all(b"\n")?;
                written += 1;
            }
            writer.write_all(&bytes)?;
            first = false;
            Ok(written + bytes.len() as u64)
        })?;
        writer.write_all(if pretty { b"\n]" } else { b"]" })?;
        writer.flush()?;
        result.bytes_written += 2;
        Ok(result)
    }

    /// Writes newline-delimited JSON to `path`: one document per line,
    /// streaming, constant memory.
    pub fn to_ndjson(&mut self, path: impl AsRef<Path>) -> Result<PipelineResult, PipelineError> {
        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = std::io::BufWriter::new(file);
        let result = self.write_ndjson(&mut writer)?;
        writer.flush()?;
        Ok(result)
    }

    /// NDJSON to an arbitrary byte sink (stdout, a socket). One write per
    /// document.
    pub fn write_ndjson(
        &mut self,
        writer: &mut impl Write,
    ) -> Result<PipelineResult, PipelineError> {
        self.run_records(|built| {
            let mut bytes = document::to_bytes(built)
                .map_err(|e| PipelineError::Record(RecordError::Serialization(e)))?;
            bytes.push(b'\n');
            writer.write_all(&bytes)?;
            Ok(bytes.len() as u64)
        })
    }

    /// Validation-only run: no build output, no side effects beyond the
    /// report. With `shacl`, records that pass the fast tier are built and
    /// round-tripped through RDF.
    pub fn validate(
        &mut self,
        mode: ValidationMode,
        shacl: bool,
    ) -> Result<ValidationReport, PipelineError> {
        self.begin()?;
        let records = self.source.read()?;
        let prebuild = PreBuildValidator::from_shape(&self.definition, self.mapper.transforms())?;
        let shacl_validator = shacl.then(|| ShaclValidator::new(&self.definition));

        let mut report = ValidationReport::new();
        let mut sampler = Sampler::new(mode);
        let mut cancelled = false;
        for record in records {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    self.state = RunState::Failed;
                    return Err(e.into());
                }
            };
            if !sampler.selected() {
                continue;
            }
            let errors = prebuild.validate_record(&record, &mut report);
            if errors == 0 {
                if let Some(validator) = &shacl_validator {
                    if let Ok(mapped) = self.mapper.map(&record) {
                        if let Ok(built) = self.builder.build(&mapped) {
                            validator.validate_document(&built, &mut report);
                        }
                    }
                }
            }
            if mode == ValidationMode::Strict && report.errors > 0 {
                self.state = RunState::Failed;
                return Err(validation::ValidationError { report }.into());
            }
        }
        self.state = if cancelled {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        Ok(report)
    }

    /// Bulk upsert into a document store with bounded concurrency. Records
    /// stream through map/build/prepare in chunks of `2 × concurrency`, so
    /// the producer never runs more than one chunk ahead of the workers.
    pub fn to_cosmos(
        &mut self,
        store: &dyn DocumentStore,
        options: CosmosOptions,
    ) -> Result<BulkResult, PipelineError> {
        self.begin()?;
        let records = self.source.read()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let cancel = self.cancel.clone();
        let strict = self.options.validation_mode == ValidationMode::Strict;
        let chunk_size = options.concurrency.max(1) * 2;

        let mut bulk = BulkResult::default();
        let mut chunk: Vec<Value> = Vec::with_capacity(chunk_size);
        let mut scratch = PipelineResult::default();
        let mut run_error: Option<PipelineError> = None;
        let mut cancelled = false;

        for record in records {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    run_error = Some(e.into());
                    break;
                }
            };
            match self.process(&record) {
                Ok(built) => match cosmos::prepare(&built, options.partition_value.as_deref()) {
                    Ok(prepared) => chunk.push(prepared),
                    Err(e) if strict => {
                        run_error = Some(e.into());
                        break;
                    }
                    Err(e) => {
                        bulk.failed += 1;
                        bulk.errors.push(BulkError {
                            id: built
                                .get("@id")
                                .and_then(Value::as_str)
                                .unwrap_or("")
                                .to_string(),
                            kind: e.kind(),
                            message: e.to_string(),
                            retryable: false,
                        });
                    }
                },
                Err(record_error) if strict => {
                    run_error = Some(record_error.into());
                    break;
                }
                Err(record_error) => self.divert(&record, &record_error, &mut scratch),
            }

            if chunk.len() >= chunk_size {
                let batch = std::mem::take(&mut chunk);
                match runtime.block_on(cosmos::upsert_many(
                    store,
                    batch,
                    options.concurrency,
                    &cancel,
                )) {
                    Ok(outcome) => bulk.merge(outcome),
                    Err(e) => {
                        run_error = Some(e.into());
                        break;
                    }
                }
            }
        }

        if run_error.is_none() && !chunk.is_empty() {
            match runtime.block_on(cosmos::upsert_many(
                store,
                std::mem::take(&mut chunk),
                options.concurrency,
                &cancel,
            )) {
                Ok(outcome) => bulk.merge(outcome),
                Err(e) => run_error = Some(e.into()),
            }
        }

        let mut close_result = PipelineResult::default();
        self.close_dead_letter(&mut close_result)?;

        if let Some(e) = run_error {
            self.state = RunState::Failed;
            return Err(e);
        }
        self.state = if cancelled || cancel.is_cancelled() {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        tracing::info!(
            succeeded = bulk.succeeded,
            failed = bulk.failed,
            total_ru = bulk.total_ru,
            "bulk upsert run finished"
        );
        Ok(bulk)
    }
}

/// Deterministic record selector for sample-mode validation.
struct Sampler {
    rng: Option<(rand::rngs::SmallRng, f64)>,
}

impl Sampler {
    fn new(mode: ValidationMode) -> Sampler {
        use rand::SeedableRng;
        let rng = match mode {
            ValidationMode::Sample { rate, seed } => {
                Some((rand::rngs::SmallRng::seed_from_u64(seed), rate))
            }
            _ => None,
        };
        Sampler { rng }
    }

    fn selected(&mut self) -> bool {
        use rand::Rng;
        match &mut self.rng {
            Some((rng, rate)) => rng.gen_bool(rate.clamp(0.0, 1.0)),
            None => true,
        }
    }
}

fn first_error(report: &ValidationReport) -> String {
    report
        .issues
        .iter()
        .find(|issue| issue.severity == Severity::Error)
        .map(|issue| format!("{}: {}", issue.field_path, issue.message))
        .unwrap_or_else(|| "validation failed".to_string())
}

/// Iterator returned by [`Pipeline::stream`]. Failed records are diverted
/// (dead-letter or filtered) and the stream continues; adapter failures and
/// strict-mode record failures end the stream with an error.
pub struct DocumentStream<'p> {
    records: RecordIter,
    pipeline: &'p mut Pipeline,
    counters: PipelineResult,
}

impl DocumentStream<'_> {
    /// Counters accumulated so far (final once the stream is exhausted).
    pub fn counters(&self) -> &PipelineResult {
        &self.counters
    }
}

impl Iterator for DocumentStream<'_> {
    type Item = Result<Value, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let strict = self.pipeline.options.validation_mode == ValidationMode::Strict;
        loop {
            if self.pipeline.cancel.is_cancelled() {
                self.pipeline.state = RunState::Cancelled;
                return None;
            }
            match self.records.next() {
                None => {
                    self.pipeline.state = RunState::Completed;
                    if let Err(e) = self.pipeline.close_dead_letter(&mut self.counters) {
                        return Some(Err(e));
                    }
                    return None;
                }
                Some(Err(e)) => {
                    self.pipeline.state = RunState::Failed;
                    return Some(Err(e.into()));
                }
                Some(Ok(record)) => {
                    self.counters.records_in += 1;
                    match self.pipeline.process(&record) {
                        Ok(built) => {
                            self.counters.records_out += 1;
                            return Some(Ok(built));
                        }
                        Err(record_error) if strict => {
                            self.pipeline.state = RunState::Failed;
                            return Some(Err(record_error.into()));
                        }
                        Err(record_error) => {
                            self.pipeline
                                .divert(&record, &record_error, &mut self.counters);
                        }
                    }
                }
            }
        }
    }
}
