use std::future::Future;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::TaskClass;

/// Errors from scheduling work on the ambient runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpawnError {
	/// No Tokio runtime is entered on the calling thread.
	#[error("no tokio runtime is active on this thread")]
	NoRuntime,
}

/// Returns the handle of the runtime the caller is running on.
///
/// The network never owns an executor; all spawned work lands on the
/// caller's runtime.
pub fn ambient_handle() -> Result<Handle, SpawnError> {
	Handle::try_current().map_err(|_| SpawnError::NoRuntime)
}

/// Spawns an async task on the ambient runtime.
pub fn spawn<F>(class: TaskClass, fut: F) -> Result<JoinHandle<F::Output>, SpawnError>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	Ok(spawn_on(&ambient_handle()?, class, fut))
}

/// Spawns an async task on an explicit runtime handle.
pub fn spawn_on<F>(handle: &Handle, class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	handle.spawn(fut)
}
