use std::future::Future;

pub mod job_queue;
pub mod object_store;
pub mod process;
pub mod runpod;
pub mod s3;

/// Drives an async operation to completion from synchronous adapter code.
/// Requires a multi-threaded tokio runtime.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
