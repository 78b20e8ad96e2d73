//! One-shot batch runner on top of [`ConcurrentProcessor`].

use std::fmt;

use rowtrack_core::{ProgressSink, TaskPriority};
use serde::Serialize;
use tracing::info;

use crate::processor::{
    ConcurrentProcessor, ProcessorConfig, ProcessorError, ProcessorStatus,
};

/// Aggregate outcome of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Fraction of items that completed, 0.0 for an empty batch.
    pub success_rate: f64,
    pub final_status: ProcessorStatus,
}

/// Run every `(task_id, body)` item as a channel task and tear down.
///
/// Builds a processor from `config`, waits for all items up to the
/// configured task timeout, and always stops the processor before
/// returning. The queue limit is raised to fit the whole batch.
pub async fn process_batch_with_resource_management<T, E, F>(
    items: Vec<(String, F)>,
    config: ProcessorConfig,
    sink: Box<dyn ProgressSink>,
) -> Result<BatchSummary, ProcessorError>
where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    let config = ProcessorConfig {
        max_queue_size: config.max_queue_size.max(items.len()),
        ..config
    };
    let processor = ConcurrentProcessor::new(config, sink);
    run_batch(&processor, items).await
}

/// Same as [`process_batch_with_resource_management`] on a caller-built processor.
///
/// The processor is started if needed and stopped afterwards.
pub async fn run_batch<T, E, F>(
    processor: &ConcurrentProcessor,
    items: Vec<(String, F)>,
) -> Result<BatchSummary, ProcessorError>
where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    processor.start()?;

    let mut handles = Vec::with_capacity(items.len());
    let mut submit_error = None;
    for (task_id, body) in items {
        match processor.submit_channel_task(task_id, TaskPriority::Normal, body) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                submit_error = Some(e);
                break;
            }
        }
    }

    let timeout = processor.config().task_timeout;
    let report = processor.wait_for_completion(handles, timeout).await;
    processor.stop().await;

    if let Some(e) = submit_error {
        return Err(e);
    }

    info!(
        total = report.total,
        completed = report.completed,
        failed = report.failed,
        "Batch finished"
    );
    Ok(BatchSummary {
        total: report.total,
        completed: report.completed,
        failed: report.failed,
        success_rate: report.success_rate,
        final_status: processor.get_status(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{ResourceMonitor, tests::FixedProbe};
    use rowtrack_core::NoopProgressSink;
    use std::time::Duration;

    type Job = Box<dyn FnOnce() -> Result<u32, String> + Send>;

    fn jobs() -> Vec<(String, Job)> {
        (0..6u32)
            .map(|i| {
                let job: Job = Box::new(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    if i % 3 == 0 { Err(format!("item {i} failed")) } else { Ok(i) }
                });
                (format!("item-{i}"), job)
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batch_counts_successes_and_failures() {
        let config = ProcessorConfig {
            max_concurrent_channels: 2,
            ..ProcessorConfig::default()
        };
        let monitor = ResourceMonitor::new(config.limits.clone(), Box::new(FixedProbe::new(5.0, 5.0)));
        let processor = ConcurrentProcessor::with_monitor(config, monitor, Box::new(NoopProgressSink::new()));

        let summary = run_batch(&processor, jobs()).await.unwrap();
        assert_eq!(summary.total, 6);
        assert_eq!(summary.completed, 4);
        assert_eq!(summary.failed, 2);
        assert!((summary.success_rate - 4.0 / 6.0).abs() < 1e-9);
        assert_eq!(summary.final_status.failed_tasks, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_batch() {
        let summary = process_batch_with_resource_management(
            Vec::<(String, Job)>::new(),
            ProcessorConfig::default(),
            Box::new(NoopProgressSink::new()),
        )
        .await
        .unwrap();
        assert_eq!(summary.total, 0);
        assert!(summary.success_rate.abs() < f64::EPSILON);
    }
}
