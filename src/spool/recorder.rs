//! Immediate telemetry delivery with spool fallback.

use std::sync::Arc;
use std::time::Duration;

use crate::resilience::timeouts::with_timeout;
use crate::spool::retry_spool::RetrySpool;
use crate::spool::sink::{SinkError, TelemetryRecord, TelemetrySink};

#[derive(Clone)]
pub struct TelemetryRecorder {
    sink: Arc<dyn TelemetrySink>,
    spool: Arc<RetrySpool>,
    timeout: Duration,
}

impl TelemetryRecorder {
    pub fn new(sink: Arc<dyn TelemetrySink>, spool: Arc<RetrySpool>, timeout: Duration) -> Self {
        Self {
            sink,
            spool,
            timeout,
        }
    }

    pub fn spool(&self) -> &Arc<RetrySpool> {
        &self.spool
    }

    pub fn sink(&self) -> &Arc<dyn TelemetrySink> {
        &self.sink
    }

    /// Deliver now; spool the record if the sink fails or times out.
    ///
    /// Returns `true` if the record reached the sink on this attempt.
    pub async fn record(&self, record: TelemetryRecord) -> bool {
        let batch = [record];
        let result: Result<(), SinkError> =
            with_timeout(self.timeout, self.sink.deliver(&batch)).await;
        match result {
            Ok(()) => true,
            Err(e) => {
                let [record] = batch;
                tracing::debug!(error = %e, route = %record.route, "Telemetry delivery failed, spooling");
                self.spool.enqueue(record);
                false
            }
        }
    }

    /// Fire-and-forget variant used on the request path.
    pub fn dispatch(&self, record: TelemetryRecord) {
        let recorder = self.clone();
        tokio::spawn(async move {
            recorder.record(record).await;
        });
    }
}
