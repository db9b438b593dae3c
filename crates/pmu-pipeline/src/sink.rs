//! Writer stage: one task per persisted signal.

use pmu_core::{Measurement, PmuError, PmuResult, SignalKey};
use pmu_storage::{DataSignalWriter, EventSignalWriter, SignalKind, WriterStats};
use std::path::Path;
use tokio::sync::mpsc;

use crate::cancel::CancelSignal;
use crate::config::OutputSignal;

/// Most measurements written per trip to the blocking pool.
const WRITE_BATCH: usize = 512;

/// A data or event writer behind one interface.
#[derive(Debug)]
pub enum SignalSink {
    /// Continuous values.
    Data(DataSignalWriter),
    /// Events.
    Event(EventSignalWriter),
}

impl SignalSink {
    /// Writer for `output` under `storage_root`. Nothing touches the disk until
    /// the first measurement arrives.
    pub fn for_output(
        output: &OutputSignal,
        storage_root: &Path,
        out_of_order_capacity: usize,
    ) -> Self {
        let root = output.root(storage_root);
        let mut metadata = output.metadata.clone();
        if metadata.name.is_empty() {
            metadata.name = output.key.to_string();
        }
        match output.kind {
            SignalKind::Data => SignalSink::Data(
                DataSignalWriter::new(root, metadata)
                    .with_out_of_order_capacity(out_of_order_capacity),
            ),
            SignalKind::Event => SignalSink::Event(
                EventSignalWriter::new(root, metadata)
                    .with_out_of_order_capacity(out_of_order_capacity),
            ),
        }
    }

    /// Store layout of this writer.
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalSink::Data(_) => SignalKind::Data,
            SignalSink::Event(_) => SignalKind::Event,
        }
    }

    /// Write one measurement.
    pub fn write(&mut self, measurement: &Measurement) -> PmuResult<()> {
        match self {
            SignalSink::Data(writer) => writer.write_measurement(measurement),
            SignalSink::Event(writer) => writer.write_measurement(measurement),
        }
    }

    /// Flush and rebuild the index.
    pub fn finish(&mut self) -> PmuResult<WriterStats> {
        match self {
            SignalSink::Data(writer) => writer.finish(),
            SignalSink::Event(writer) => writer.finish(),
        }
    }

    /// Drain `queue` until it closes, then flush and rebuild the index.
    ///
    /// Waiting happens on the async side. Each batch of queued measurements is
    /// written on the blocking pool, so a writer holds a blocking thread only
    /// while it touches the disk. After cancellation remaining queued
    /// measurements are discarded, but the accepted ones are still finalized.
    pub async fn drain(
        mut self,
        key: SignalKey,
        mut queue: mpsc::UnboundedReceiver<Measurement>,
        mut cancel: CancelSignal,
    ) -> PmuResult<WriterStats> {
        let span = tracing::info_span!("writer", signal = %key, kind = %self.kind());
        let mut batch = Vec::with_capacity(WRITE_BATCH);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    span.in_scope(|| tracing::debug!("cancelled; discarding queued measurements"));
                    break;
                }
                next = queue.recv() => next,
            };
            let Some(first) = next else { break };
            batch.push(first);
            while batch.len() < WRITE_BATCH {
                match queue.try_recv() {
                    Ok(measurement) => batch.push(measurement),
                    Err(_) => break,
                }
            }
            let (sink, written) = self.offload(&span, batch, |sink, batch| {
                for measurement in &batch {
                    sink.write(measurement)?;
                }
                Ok(batch)
            })
            .await?;
            self = sink;
            batch = written;
            batch.clear();
        }
        queue.close();
        let (_, stats) = self.offload(&span, (), |sink, ()| sink.finish()).await?;
        Ok(stats)
    }

    /// Run `work` against the writer on the blocking pool and hand it back.
    async fn offload<A, T, F>(self, span: &tracing::Span, arg: A, work: F) -> PmuResult<(Self, T)>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: FnOnce(&mut Self, A) -> PmuResult<T> + Send + 'static,
    {
        let span = span.clone();
        let mut sink = self;
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let out = work(&mut sink, arg)?;
            Ok((sink, out))
        })
        .await
        .map_err(|e| PmuError::TaskFailed(format!("writer: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;
    use pmu_core::{Event, TimeSeriesValue, TICKS_PER_SECOND};
    use pmu_storage::{DataSignalReader, EventSignalReader, SignalMetadata};

    fn output(key: &str, kind: SignalKind) -> OutputSignal {
        OutputSignal {
            key: SignalKey::new(key),
            kind,
            directory: None,
            metadata: SignalMetadata::default(),
        }
    }

    #[tokio::test]
    async fn drain_persists_until_the_queue_closes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SignalSink::for_output(&output("F/avg", SignalKind::Data), dir.path(), 16);
        let (tx, rx) = mpsc::unbounded_channel();
        for i in 0..45 {
            let ts = i * TICKS_PER_SECOND / 30;
            tx.send(TimeSeriesValue::new("F/avg", i as f64, ts).into()).unwrap();
        }
        drop(tx);

        let cancel = CancelHandle::new();
        let signal = cancel.signal();
        let stats = sink.drain(SignalKey::new("F/avg"), rx, signal).await.unwrap();
        assert_eq!(stats.points_written, 45);
        assert_eq!(stats.leaf_files, 2);

        let reader = DataSignalReader::open(dir.path().join("F_avg")).unwrap();
        assert_eq!(reader.metadata().name, "F/avg");
        assert_eq!(reader.read_samples(0, 2 * TICKS_PER_SECOND).unwrap().len(), 45);
    }

    #[tokio::test]
    async fn event_sink_rejects_plain_values() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SignalSink::for_output(&output("trip", SignalKind::Event), dir.path(), 16);
        assert_eq!(sink.kind(), SignalKind::Event);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Event::new("trip", 1.0, 0, 0.25).with_parameter("peak", 2.0).into()).unwrap();
        tx.send(TimeSeriesValue::new("trip", 3.0, 10).into()).unwrap();
        drop(tx);

        let signal = CancelHandle::new().signal();
        let stats = sink.drain(SignalKey::new("trip"), rx, signal).await.unwrap();
        assert_eq!(stats.points_written, 1);
        assert_eq!(stats.kind_mismatch, 1);

        let reader = EventSignalReader::open(dir.path().join("trip")).unwrap();
        assert_eq!(reader.parameter_names().to_vec(), vec!["peak".to_string()]);
    }
}
