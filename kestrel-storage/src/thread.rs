use std::panic::{catch_unwind, UnwindSafe};
use std::thread::{self, JoinHandle};

/// Spawn a named background thread.
/// Panic of the thread is caught and logged, start and exit are
/// also logged so lifecycle of background workers can be traced.
#[inline]
pub fn spawn_named<S, F>(name: S, f: F) -> JoinHandle<()>
where
    String: From<S>,
    F: FnOnce() + UnwindSafe + Send + 'static,
{
    let thread_name = String::from(name);
    thread::Builder::new()
        .name(thread_name)
        .spawn(|| {
            let thd = thread::current();
            let name = thd.name().unwrap_or("unknown");
            log::debug!("thread[{:?}:{}] start", thd.id(), name);
            if catch_unwind(f).is_err() {
                log::error!("thread[{:?}:{}] panic", thd.id(), name);
                return;
            }
            log::debug!("thread[{:?}:{}] exit", thd.id(), name);
        })
        .expect("spawn background thread")
}
