//! Fixtures shared by the test modules of this crate.

pub(crate) type LogConfig = tracing_subscriber::fmt::SubscriberBuilder<
    tracing_subscriber::fmt::format::DefaultFields,
    tracing_subscriber::fmt::format::Format<tracing_subscriber::fmt::format::Full, ()>,
    tracing_subscriber::EnvFilter,
>;

#[rstest::fixture]
pub(crate) fn log_conf() -> LogConfig {
    let env = tracing_subscriber::EnvFilter::from_default_env();
    tracing_subscriber::fmt::Subscriber::builder().with_env_filter(env).without_time()
}

#[rstest::fixture]
pub(crate) fn log_stdout(log_conf: LogConfig) {
    let _ = log_conf.with_test_writer().try_init();
}

#[cfg(feature = "loom")]
#[rstest::fixture]
pub(crate) fn model(#[default("loomtest")] path: &str, #[allow(unused)] log_stdout: ()) -> loom::model::Builder {
    let mut model = loom::model::Builder::new();
    model.checkpoint_interval = 1;
    model.checkpoint_file = Some(std::path::PathBuf::from(format!("{path}.json")));
    model.location = true;
    model
}

/// Counts how many times a payload has been dropped, to check the ring and broker release
/// evicted or undelivered payloads exactly once.
#[derive(Clone)]
pub(crate) struct DropCounter<T> {
    elem: T,
    counter: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for DropCounter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropCounter").field("elem", &self.elem).finish()
    }
}

impl<T> Drop for DropCounter<T> {
    fn drop(&mut self) {
        self.counter.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }
}

impl<T> DropCounter<T> {
    pub(crate) fn new(elem: T, counter: std::sync::Arc<std::sync::atomic::AtomicUsize>) -> Self {
        Self { elem, counter }
    }
}

impl<T: Copy> DropCounter<T> {
    pub(crate) fn get(&self) -> T {
        self.elem
    }
}
