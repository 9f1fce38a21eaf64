/// How many queued jobs may start right now given the configured parallel
/// limit and the number of currently running encodes.
///
/// Pure arithmetic; the orchestrator recomputes this whenever a job is added,
/// a job finishes, or the limit changes, and admits queued jobs FIFO up to the
/// returned count. A limit lowered below the active count yields 0 and never
/// preempts running jobs.
pub fn available(parallel_limit: usize, active: usize) -> usize {
    parallel_limit.saturating_sub(active)
}
