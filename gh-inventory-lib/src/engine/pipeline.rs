//! Bounded fan-out/fan-in over work items.
//!
//! A [`Pipeline`] runs one or more stages. Each stage spawns a fixed set of workers that pull
//! items from a shared queue, wait for an [`ItemLimiter`] token, and run the processing
//! function. Successful results flow to the next stage or to a single consumer that owns the
//! [`RowSink`]. Failed items are logged and dropped; a fatal failure aborts the whole run.

use super::{CsvSink, InventoryError, ItemLimiter, RowSink, RunContext};
use camino::Utf8Path;
use core::fmt::Display;
use core::num::{NonZeroU32, NonZeroUsize};
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "  pipeline";

/// One output row.
pub type Row = Vec<String>;

/// Outcome of a completed report run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    /// Data rows written, excluding the header.
    pub rows_written: u64,

    /// Items whose processing failed and that were omitted.
    pub items_failed: u64,
}

/// The output queue of one pipeline stage.
#[derive(Debug)]
pub struct FanOut<T> {
    rx: mpsc::Receiver<T>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T> FanOut<T> {
    /// Receive the next result. Returns `None` once the stage and all stages feeding it are done.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Drain every remaining result.
    pub async fn collect(mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(item) = self.rx.recv().await {
            out.push(item);
        }
        self.join().await;
        out
    }

    /// Wait for the tasks behind this queue to finish.
    pub async fn join(self) {
        drop(self.rx);
        for task in self.tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                log::error!(target: LOG_TARGET, "Pipeline task panicked: {e}");
            }
        }
    }
}

/// Worker pool shared by the stages of one report.
#[derive(Debug)]
pub struct Pipeline {
    name: &'static str,
    workers: usize,
    limiter: Arc<ItemLimiter>,
    ctx: RunContext,
    failed: Arc<AtomicU64>,
}

impl Pipeline {
    /// Create a pipeline with `workers` workers per stage, admitting `per_second` items per second.
    ///
    /// The pipeline runs in a child of `ctx`: a sink failure stops only this pipeline, while a
    /// fatal item failure aborts the whole run.
    #[must_use]
    pub fn new(name: &'static str, ctx: &RunContext, workers: NonZeroUsize, per_second: NonZeroU32) -> Self {
        let burst = NonZeroU32::try_from(workers).unwrap_or(NonZeroU32::MAX);
        Self {
            name,
            workers: workers.get(),
            limiter: Arc::new(ItemLimiter::new(per_second, burst)),
            ctx: ctx.child(),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Number of items that failed so far across all stages.
    #[must_use]
    pub fn items_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> usize {
        self.workers * 2
    }

    fn track_queued(&self) -> impl Fn() + Send + 'static {
        let tracker = self.ctx.tracker().cloned();
        let topic = self.name;
        move || {
            if let Some(tracker) = &tracker {
                tracker.add_requests(topic, 1);
            }
        }
    }

    /// Turn a list of items into a stage input.
    pub fn feed<I>(&self, items: impl IntoIterator<Item = I, IntoIter: Send + 'static>) -> FanOut<I>
    where
        I: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.capacity());
        let cancel = self.ctx.token().clone();
        let queued = self.track_queued();
        let items = items.into_iter();

        let task = tokio::spawn(async move {
            for item in items {
                queued();
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    sent = tx.send(item) => if sent.is_err() { break },
                }
            }
        });

        FanOut { rx, tasks: vec![task] }
    }

    /// Flatten a stage whose results are collections into a stage input of their elements.
    pub fn flatten<O, T>(&self, stage: FanOut<O>) -> FanOut<T>
    where
        O: IntoIterator<Item = T, IntoIter: Send> + Send + 'static,
        T: Send + 'static,
    {
        let FanOut { rx: mut upstream, mut tasks } = stage;
        let (tx, rx) = mpsc::channel(self.capacity());
        let cancel = self.ctx.token().clone();
        let queued = self.track_queued();

        let task = tokio::spawn(async move {
            'outer: loop {
                let batch = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    batch = upstream.recv() => batch,
                };
                let Some(batch) = batch else { break };

                for item in batch {
                    queued();
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break 'outer,
                        sent = tx.send(item) => if sent.is_err() { break 'outer },
                    }
                }
            }
        });

        tasks.push(task);
        FanOut { rx, tasks }
    }

    /// Run `process` over every item of `input` on this pipeline's workers.
    ///
    /// Items are admitted through the limiter one at a time. A failing item is logged with
    /// its key and error kind and omitted from the output; a fatal failure aborts the run.
    /// Nothing is retried here: `process` applies its own retry policy.
    pub fn fan_out<I, O, P, Fut>(&self, input: FanOut<I>, process: P) -> FanOut<O>
    where
        I: Display + Send + 'static,
        O: Send + 'static,
        P: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, InventoryError>> + Send + 'static,
    {
        let FanOut { rx: input, mut tasks } = input;
        let input = Arc::new(Mutex::new(input));
        let process = Arc::new(process);
        let (tx, rx) = mpsc::channel(self.capacity());

        for _ in 0..self.workers {
            let worker = Worker {
                name: self.name,
                input: Arc::clone(&input),
                output: tx.clone(),
                limiter: Arc::clone(&self.limiter),
                ctx: self.ctx.clone(),
                failed: Arc::clone(&self.failed),
            };
            tasks.push(tokio::spawn(worker.run(Arc::clone(&process))));
        }

        FanOut { rx, tasks }
    }

    /// Process `items` and stream the formatted rows to a CSV file at `sink_path`.
    ///
    /// The file is created and its header written before any item is processed, so an
    /// unwritable destination fails the report without a single remote call.
    pub async fn run_report<I, O, P, Fut, F>(
        &self,
        items: impl IntoIterator<Item = I, IntoIter: Send + 'static>,
        process: P,
        format: F,
        sink_path: &Utf8Path,
        header: &[&str],
    ) -> Result<ReportSummary, InventoryError>
    where
        I: Display + Send + 'static,
        O: Send + 'static,
        P: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, InventoryError>> + Send + 'static,
        F: FnMut(O) -> Vec<Row>,
    {
        let sink = CsvSink::create(sink_path)?;
        self.run_report_into(items, process, format, sink, header).await
    }

    /// Like [`run_report`](Self::run_report), writing to any [`RowSink`].
    pub async fn run_report_into<I, O, P, Fut, F, S>(
        &self,
        items: impl IntoIterator<Item = I, IntoIter: Send + 'static>,
        process: P,
        format: F,
        mut sink: S,
        header: &[&str],
    ) -> Result<ReportSummary, InventoryError>
    where
        I: Display + Send + 'static,
        O: Send + 'static,
        P: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, InventoryError>> + Send + 'static,
        F: FnMut(O) -> Vec<Row>,
        S: RowSink,
    {
        let header: Row = header.iter().map(ToString::to_string).collect();
        sink.write_row(&header)?;

        let results = self.fan_out(self.feed(items), process);
        self.drain_into(results, format, sink).await
    }

    /// Consume the results of a (possibly multi-stage) fan-out into `sink`, whose header
    /// has already been written.
    pub async fn drain_into<O, F, S>(&self, mut results: FanOut<O>, mut format: F, mut sink: S) -> Result<ReportSummary, InventoryError>
    where
        F: FnMut(O) -> Vec<Row>,
        S: RowSink,
    {
        let mut rows_written = 0u64;
        let mut sink_error = None;

        'drain: while let Some(result) = results.recv().await {
            for row in format(result) {
                if let Err(e) = sink.write_row(&row) {
                    log::error!(target: LOG_TARGET, "{}: could not write row: {e}", self.name);
                    self.ctx.cancel();
                    sink_error = Some(e);
                    break 'drain;
                }
                rows_written += 1;
            }
        }

        results.join().await;

        let flushed = sink.finish();
        if let Some(e) = sink_error {
            return Err(e);
        }
        flushed?;

        if let Some(fatal) = self.ctx.take_fatal() {
            return Err(fatal);
        }

        let summary = ReportSummary {
            rows_written,
            items_failed: self.items_failed(),
        };

        log::info!(
            target: LOG_TARGET,
            "{}: wrote {} row(s), {} item(s) failed{}",
            self.name,
            summary.rows_written,
            summary.items_failed,
            if self.ctx.is_cancelled() { " (cancelled)" } else { "" }
        );

        Ok(summary)
    }
}

struct Worker<I, O> {
    name: &'static str,
    input: Arc<Mutex<mpsc::Receiver<I>>>,
    output: mpsc::Sender<O>,
    limiter: Arc<ItemLimiter>,
    ctx: RunContext,
    failed: Arc<AtomicU64>,
}

impl<I: Display, O> Worker<I, O> {
    async fn run<P, Fut>(self, process: Arc<P>)
    where
        P: Fn(I) -> Fut,
        Fut: Future<Output = Result<O, InventoryError>>,
    {
        let cancel = self.ctx.token();

        loop {
            let item = {
                let mut input = self.input.lock().await;
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    item = input.recv() => item,
                }
            };
            let Some(item) = item else { break };

            if !self.limiter.acquire(cancel).await {
                break;
            }

            let key = item.to_string();
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                outcome = process(item) => outcome,
            };

            if let Some(tracker) = self.ctx.tracker() {
                tracker.complete_request(self.name);
            }

            match outcome {
                Ok(result) => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        sent = self.output.send(result) => if sent.is_err() { break },
                    }
                }

                Err(e) if e.kind().is_fatal() => {
                    let _ = self.failed.fetch_add(1, Ordering::Relaxed);
                    self.ctx.abort(e.context(format!("{}: '{key}'", self.name)));
                    break;
                }

                Err(e) => {
                    let _ = self.failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!(target: LOG_TARGET, "{}: skipping '{key}' after {} error: {e}", self.name, e.kind());
                }
            }
        }
    }
}
