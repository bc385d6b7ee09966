use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use log::debug;
use tokio::sync::oneshot;

use misekit_core::{CommandError, SingleFlightCache};

/// What the calling thread is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerContext {
    /// The caller is the UI thread and must not be blocked without a modal.
    pub on_ui_thread: bool,
    /// The caller may read editor state without first switching threads.
    pub has_read_access: bool,
}

impl CallerContext {
    pub const BACKGROUND: CallerContext = CallerContext {
        on_ui_thread: false,
        has_read_access: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A cached value is returned without any scheduling.
    FastPathHit,
    /// Computed under a modal progress scope on the calling (UI) thread.
    ModalBlocking,
    /// Marshalled onto the UI thread and computed under a modal scope there.
    NeedsUiMarshal,
    /// Computed under a background progress scope.
    NeedsBackgroundSchedule,
}

#[must_use]
pub fn plan(cached: bool, caller: CallerContext) -> Dispatch {
    if cached {
        Dispatch::FastPathHit
    } else if caller.on_ui_thread {
        Dispatch::ModalBlocking
    } else if !caller.has_read_access {
        Dispatch::NeedsUiMarshal
    } else {
        Dispatch::NeedsBackgroundSchedule
    }
}

/// The editor's progress and threading facilities.
#[async_trait]
pub trait ProgressHost: Send + Sync {
    fn caller_context(&self) -> CallerContext;

    /// Runs `task` to completion under a modal progress indicator on the
    /// current thread.
    async fn run_modal(&self, label: &str, task: BoxFuture<'static, ()>);

    /// Switches to the UI thread and runs `task` under a modal progress
    /// indicator there; resolves once it finished.
    async fn run_on_ui_modal(&self, label: &str, task: BoxFuture<'static, ()>);

    /// Schedules `task` under a background progress indicator.
    async fn run_background(&self, label: &str, task: BoxFuture<'static, ()>);
}

/// Host for callers without a UI thread: modal scopes run inline and
/// background work goes to the tokio runtime.
#[derive(Debug, Clone, Copy)]
pub struct TokioProgressHost {
    caller: CallerContext,
}

impl Default for TokioProgressHost {
    fn default() -> Self {
        Self {
            caller: CallerContext::BACKGROUND,
        }
    }
}

#[async_trait]
impl ProgressHost for TokioProgressHost {
    fn caller_context(&self) -> CallerContext {
        self.caller
    }

    async fn run_modal(&self, label: &str, task: BoxFuture<'static, ()>) {
        debug!("{label}");
        task.await;
    }

    async fn run_on_ui_modal(&self, label: &str, task: BoxFuture<'static, ()>) {
        debug!("{label}");
        task.await;
    }

    async fn run_background(&self, label: &str, task: BoxFuture<'static, ()>) {
        debug!("{label} (background)");
        tokio::spawn(task);
    }
}

/// Runs cached lookups in the scope the calling context allows.
#[derive(Clone)]
pub struct Orchestrator {
    host: Arc<dyn ProgressHost>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(host: Arc<dyn ProgressHost>) -> Self {
        Self { host }
    }

    /// Returns `peek()` when it has a value; otherwise runs `compute` in the
    /// scope chosen by [`plan`] and waits for its result.
    pub async fn run<V, P, F, Fut>(
        &self,
        label: &str,
        peek: P,
        compute: F,
    ) -> Result<V, CommandError>
    where
        V: Send + 'static,
        P: FnOnce() -> Option<Result<V, CommandError>>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CommandError>> + Send + 'static,
    {
        let cached = peek();
        let dispatch = plan(cached.is_some(), self.host.caller_context());
        debug!("{label}: {dispatch:?}");

        let (sender, receiver) = oneshot::channel();
        let scoped = move || -> BoxFuture<'static, ()> {
            let computation = compute();
            Box::pin(async move {
                let _ = sender.send(computation.await);
            })
        };

        match dispatch {
            Dispatch::FastPathHit => return cached.unwrap_or(Err(CommandError::Cancelled)),
            Dispatch::ModalBlocking => self.host.run_modal(label, scoped()).await,
            Dispatch::NeedsUiMarshal => self.host.run_on_ui_modal(label, scoped()).await,
            Dispatch::NeedsBackgroundSchedule => {
                self.host.run_background(label, scoped()).await;
            }
        }

        receiver.await.unwrap_or(Err(CommandError::Cancelled))
    }

    /// [`Orchestrator::run`] over a single-flight cache entry.
    pub async fn get_with_threading_policy<K, V, F, Fut>(
        &self,
        cache: &SingleFlightCache<K, Result<V, CommandError>>,
        key: K,
        label: &str,
        compute: F,
    ) -> Result<V, CommandError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, CommandError>> + Send + 'static,
    {
        let peek_key = key.clone();
        let cache = cache.clone();
        let peek_cache = cache.clone();
        self.run(
            label,
            move || peek_cache.peek(&peek_key),
            move || async move { cache.get(key, compute).await },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::future::BoxFuture;

    use misekit_core::{CommandError, SingleFlightCache};

    use super::{CallerContext, Dispatch, Orchestrator, ProgressHost, TokioProgressHost, plan};

    struct RecordingHost {
        caller: CallerContext,
        scopes: Mutex<Vec<&'static str>>,
        drop_tasks: bool,
    }

    impl RecordingHost {
        fn new(caller: CallerContext) -> Arc<Self> {
            Arc::new(Self {
                caller,
                scopes: Mutex::new(Vec::new()),
                drop_tasks: false,
            })
        }

        fn scopes(&self) -> Vec<&'static str> {
            self.scopes.lock().expect("scopes lock").clone()
        }
    }

    #[async_trait]
    impl ProgressHost for RecordingHost {
        fn caller_context(&self) -> CallerContext {
            self.caller
        }

        async fn run_modal(&self, _label: &str, task: BoxFuture<'static, ()>) {
            self.scopes.lock().expect("scopes lock").push("modal");
            if !self.drop_tasks {
                task.await;
            }
        }

        async fn run_on_ui_modal(&self, _label: &str, task: BoxFuture<'static, ()>) {
            self.scopes.lock().expect("scopes lock").push("ui-modal");
            if !self.drop_tasks {
                task.await;
            }
        }

        async fn run_background(&self, _label: &str, task: BoxFuture<'static, ()>) {
            self.scopes.lock().expect("scopes lock").push("background");
            if !self.drop_tasks {
                tokio::spawn(task);
            }
        }
    }

    const UI: CallerContext = CallerContext {
        on_ui_thread: true,
        has_read_access: true,
    };
    const NO_ACCESS: CallerContext = CallerContext {
        on_ui_thread: false,
        has_read_access: false,
    };

    #[test]
    fn plan_covers_every_state() {
        assert_eq!(plan(true, UI), Dispatch::FastPathHit);
        assert_eq!(plan(true, NO_ACCESS), Dispatch::FastPathHit);
        assert_eq!(plan(false, UI), Dispatch::ModalBlocking);
        assert_eq!(plan(false, NO_ACCESS), Dispatch::NeedsUiMarshal);
        assert_eq!(
            plan(false, CallerContext::BACKGROUND),
            Dispatch::NeedsBackgroundSchedule
        );
    }

    #[tokio::test]
    async fn each_context_uses_its_scope() {
        for (caller, scope) in [
            (UI, "modal"),
            (NO_ACCESS, "ui-modal"),
            (CallerContext::BACKGROUND, "background"),
        ] {
            let host = RecordingHost::new(caller);
            let orchestrator = Orchestrator::new(host.clone());

            let value = orchestrator
                .run("Loading", || None, || async { Ok::<_, CommandError>(7) })
                .await;

            assert_eq!(value, Ok(7));
            assert_eq!(host.scopes(), vec![scope]);
        }
    }

    #[tokio::test]
    async fn cached_value_skips_scheduling() {
        let host = RecordingHost::new(UI);
        let orchestrator = Orchestrator::new(host.clone());
        let computed = Arc::new(AtomicUsize::new(0));
        let counter = computed.clone();

        let value = orchestrator
            .run("Loading", || Some(Ok(1)), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await;

        assert_eq!(value, Ok(1));
        assert!(host.scopes().is_empty());
        assert_eq!(computed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropped_task_reports_cancellation() {
        let host = Arc::new(RecordingHost {
            caller: CallerContext::BACKGROUND,
            scopes: Mutex::new(Vec::new()),
            drop_tasks: true,
        });
        let orchestrator = Orchestrator::new(host);

        let value = orchestrator
            .run("Loading", || None, || async { Ok::<_, CommandError>(()) })
            .await;

        assert_eq!(value, Err(CommandError::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cache_backed_lookup_computes_once() {
        let orchestrator = Orchestrator::new(Arc::new(TokioProgressHost::default()));
        let cache: SingleFlightCache<String, Result<u32, CommandError>> = SingleFlightCache::new();
        let computed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let orchestrator = orchestrator.clone();
            let cache = cache.clone();
            let computed = computed.clone();
            handles.push(tokio::spawn(async move {
                orchestrator
                    .get_with_threading_policy(&cache, "env".to_string(), "Loading env", move || async move {
                        computed.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(42)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.expect("task join"), Ok(42));
        }

        assert_eq!(computed.load(Ordering::SeqCst), 1);
        let hit = orchestrator
            .get_with_threading_policy(&cache, "env".to_string(), "Loading env", || async {
                Ok(0)
            })
            .await;
        assert_eq!(hit, Ok(42));
    }
}
