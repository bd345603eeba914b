use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

/// Spawns an async task that runs in the background.
///
/// Inside a tokio runtime the task goes to the current runtime. Otherwise it goes to a
/// process-wide background runtime, so futures that need a reactor (reqwest, timers) can be
/// awaited from any executor through a channel.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    use tokio::runtime::{Builder, Handle, Runtime};

    static BACKGROUND_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
        Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("dl-api-background")
            .enable_all()
            .build()
            .map_err(|err| {
                log::error!(target: "@dl-api/runtime", "failed to build background runtime: {err}")
            })
            .ok()
    });

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    } else if let Some(runtime) = BACKGROUND_RUNTIME.as_ref() {
        runtime.spawn(future);
    }
}

/// Asynchronously waits for the provided duration.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    tokio::time::sleep(duration).await;
}

/// Runs `job` to completion on a fresh OS thread and blocks the caller until it returns.
///
/// Blocking I/O must never run on a reactor thread; a scoped thread keeps it off the
/// async workers even when the caller is itself inside a runtime.
pub fn block_on_thread<T, F>(job: F) -> Option<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    std::thread::scope(|scope| scope.spawn(job).join().ok())
}
