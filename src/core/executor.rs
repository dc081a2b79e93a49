//! Job execution trait.

use async_trait::async_trait;

pub use tokio_util::sync::CancellationToken;

use crate::core::{JobEntry, JobFailure, JobResult};

/// The unit of work: renders one job's entry into a report.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use report_scheduler::core::{CancellationToken, JobEntry, JobExecutor, JobFailure, JobResult};
///
/// struct PdfRenderer;
///
/// #[async_trait]
/// impl JobExecutor for PdfRenderer {
///     async fn execute(&self, entry: JobEntry, cancel: CancellationToken) -> Result<JobResult, JobFailure> {
///         for page in pages(&entry.params) {
///             if cancel.is_cancelled() {
///                 return Err(JobFailure::new("cancelled between pages"));
///             }
///             render(page).await?;
///         }
///         Ok(JobResult::new(format!("/reports/{}", entry.reference_id), "report.pdf", "application/pdf"))
///     }
/// }
/// ```
///
/// # Threading
///
/// Called from a dedicated worker thread with its own single-threaded tokio
/// runtime, so CPU-heavy rendering does not starve the caller's runtime.
/// The future is dropped at its next `.await` once `cancel` fires;
/// synchronous sections should poll `cancel.is_cancelled()` themselves.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    /// Run the job and return its result, or the failure that stopped it.
    async fn execute(
        &self,
        entry: JobEntry,
        cancel: CancellationToken,
    ) -> Result<JobResult, JobFailure>;
}
