use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use misekit::{
    AppSettings, CallerContext, CommandError, ExecutableSource, FileEventKind, Notifier,
    Operation, ProgressHost, ProjectSettings, Session, ToolErrorKind,
};
use misekit_core::{ProcessOutput, ProcessRunner, ProcessSpec, RunError};

#[derive(Default)]
struct FakeRunner {
    replies: Mutex<Vec<(String, ProcessOutput)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    fn reply(&self, needle: &str, output: ProcessOutput) -> &Self {
        let mut replies = self.replies.lock().expect("replies lock");
        match replies.iter_mut().find(|(existing, _)| existing == needle) {
            Some(entry) => entry.1 = output,
            None => replies.push((needle.to_string(), output)),
        }
        self
    }

    fn stdout(&self, needle: &str, stdout: &str) -> &Self {
        self.reply(needle, ProcessOutput::success(stdout))
    }

    fn count(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, RunError> {
        let command_line = spec.command_line();
        self.calls
            .lock()
            .expect("calls lock")
            .push(command_line.clone());
        let reply = self
            .replies
            .lock()
            .expect("replies lock")
            .iter()
            .find(|(needle, _)| command_line.contains(needle.as_str()))
            .map(|(_, output)| output.clone());
        reply.ok_or_else(|| RunError::Launch {
            program: spec.program.clone(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, _title: &str, message: &str) {
        self.messages
            .lock()
            .expect("messages lock")
            .push(message.to_string());
    }
}

struct UiThreadHost {
    scopes: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl ProgressHost for UiThreadHost {
    fn caller_context(&self) -> CallerContext {
        CallerContext {
            on_ui_thread: true,
            has_read_access: true,
        }
    }

    async fn run_modal(&self, _label: &str, task: BoxFuture<'static, ()>) {
        self.scopes.lock().expect("scopes lock").push("modal");
        task.await;
    }

    async fn run_on_ui_modal(&self, _label: &str, task: BoxFuture<'static, ()>) {
        self.scopes.lock().expect("scopes lock").push("ui-modal");
        task.await;
    }

    async fn run_background(&self, _label: &str, task: BoxFuture<'static, ()>) {
        self.scopes.lock().expect("scopes lock").push("background");
        tokio::spawn(task);
    }
}

fn with_global_executable(config_environment: Option<&str>) -> AppSettings {
    AppSettings {
        executable_path: Some("mise".to_string()),
        config_environment: config_environment.map(str::to_string),
        ..AppSettings::default()
    }
}

fn session(dir: &tempfile::TempDir, runner: Arc<FakeRunner>, app: AppSettings) -> Session {
    Session::builder()
        .project_dir(dir.path())
        .settings(app, ProjectSettings::default())
        .runner(runner)
        .search_paths(Vec::new())
        .build()
}

fn dir_string(dir: &tempfile::TempDir) -> String {
    dir.path().to_string_lossy().to_string()
}

async fn next_signal(receiver: &mut mpsc::UnboundedReceiver<()>) {
    tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("listener should be notified")
        .expect("listener channel open");
}

#[tokio::test]
async fn project_override_wins_then_falls_through() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let runner = Arc::new(FakeRunner::default());
    runner
        .stdout("mise version -v", "DEBUG ARGS: /usr/local/bin/mise version -v")
        .stdout("/usr/local/bin/mise version", "2025.1.0");
    let app = AppSettings {
        executable_path: Some("/opt/global/mise".to_string()),
        ..AppSettings::default()
    };
    let project = ProjectSettings {
        executable_path: Some("/opt/project/mise".to_string()),
        ..ProjectSettings::default()
    };
    let session = Session::builder()
        .project_dir(dir.path())
        .settings(app, project)
        .runner(runner)
        .search_paths(Vec::new())
        .build();

    assert_eq!(session.resolve_executable_path().await, "/opt/project/mise");

    session
        .settings()
        .update_project(|project| project.executable_path = None)
        .expect("in-memory update");
    assert_eq!(session.resolve_executable_path().await, "/opt/global/mise");

    session
        .settings()
        .update_app(|app| app.executable_path = None)
        .expect("in-memory update");
    let location = session.resolve_executable(&dir_string(&dir)).await;
    assert_eq!(location.command, "/usr/local/bin/mise");
    assert_eq!(location.source, ExecutableSource::AutoDetected);
}

#[tokio::test]
async fn cold_detection_without_install_falls_back_silently() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let notifier = Arc::new(RecordingNotifier::default());
    let session = Session::builder()
        .project_dir(dir.path())
        .settings(AppSettings::default(), ProjectSettings::default())
        .runner(Arc::new(FakeRunner::default()))
        .notifier(notifier.clone())
        .search_paths(vec!["/definitely/missing/mise".to_string()])
        .build();

    assert_eq!(session.resolve_executable_path().await, "mise");

    let error = session
        .env(&dir_string(&dir))
        .await
        .expect_err("mise is not installed");
    assert!(matches!(error, CommandError::ExecutableNotFound { .. }));
    assert!(!session.report("env", &error));
    assert!(notifier.messages.lock().expect("messages lock").is_empty());
}

#[tokio::test]
async fn config_environment_flag_follows_tool_version() {
    for (version, expected) in [
        ("2024.12.1 linux-x64 (2024-12-01)", "mise --profile ci env --json"),
        ("2024.12.2 linux-x64 (2024-12-04)", "mise --env ci env --json"),
    ] {
        let dir = tempfile::tempdir().expect("create temp dir");
        let runner = Arc::new(FakeRunner::default());
        runner.stdout("mise version", version).stdout("env --json", "{}");
        let session = session(&dir, runner.clone(), with_global_executable(Some("ci")));

        session.env(&dir_string(&dir)).await.expect("env should succeed");

        assert_eq!(runner.count(expected), 1, "{version}");
    }
}

#[tokio::test]
async fn known_failure_is_classified_and_reported() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let runner = Arc::new(FakeRunner::default());
    runner.stdout("mise version", "2025.1.0").reply(
        "tasks ls --json",
        ProcessOutput::failure(1, "mise ERROR Config file /srv/app/mise.toml is not trusted."),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let session = Session::builder()
        .project_dir(dir.path())
        .settings(with_global_executable(None), ProjectSettings::default())
        .runner(runner)
        .notifier(notifier.clone())
        .build();

    let error = session
        .tasks(&dir_string(&dir))
        .await
        .expect_err("untrusted config should fail");

    assert_eq!(
        error.tool_kind(),
        Some(&ToolErrorKind::UntrustedConfig {
            path: "/srv/app/mise.toml".to_string()
        })
    );
    assert!(session.report("tasks", &error));
    assert_eq!(
        notifier.messages.lock().expect("messages lock").as_slice(),
        &["Config file /srv/app/mise.toml is not trusted.".to_string()]
    );
}

#[tokio::test]
async fn invalidation_is_visible_to_the_next_lookup() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let runner = Arc::new(FakeRunner::default());
    runner
        .stdout("mise version", "2025.1.0")
        .stdout("env --json", r#"{"STAGE":"old"}"#);
    let session = session(&dir, runner.clone(), with_global_executable(None));
    let working_dir = dir_string(&dir);

    let before = session.env(&working_dir).await.expect("env");
    runner.stdout("env --json", r#"{"STAGE":"new"}"#);
    let cached = session.env(&working_dir).await.expect("env");
    session.invalidate();
    let after = session.env(&working_dir).await.expect("env");

    assert_eq!(before["STAGE"], "old");
    assert_eq!(cached["STAGE"], "old");
    assert_eq!(after["STAGE"], "new");
}

#[tokio::test]
async fn config_file_event_notifies_and_refreshes() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let runner = Arc::new(FakeRunner::default());
    runner
        .stdout("mise version", "2025.1.0")
        .stdout("env --json", r#"{"STAGE":"old"}"#);
    let session = session(&dir, runner.clone(), with_global_executable(None));
    let working_dir = dir_string(&dir);
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let _subscription = session.on_config_changed(move || {
        let _ = sender.send(());
    });

    session.env(&working_dir).await.expect("env");
    runner.stdout("env --json", r#"{"STAGE":"new"}"#);

    assert!(!session.on_file_event(&format!("{working_dir}/README.md"), FileEventKind::Modified));
    assert!(session.on_file_event(&format!("{working_dir}/mise.toml"), FileEventKind::Modified));

    next_signal(&mut receiver).await;
    let vars = session.env(&working_dir).await.expect("env");
    assert_eq!(vars["STAGE"], "new");
}

#[tokio::test]
async fn executable_change_notifies_listeners() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let runner = Arc::new(FakeRunner::default());
    let app = AppSettings {
        executable_path: Some("/opt/tools/mise".to_string()),
        ..AppSettings::default()
    };
    let session = session(&dir, runner, app);
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let _subscription = session.on_executable_changed(move || {
        let _ = sender.send(());
    });

    assert!(!session.on_file_event("/opt/tools/mise", FileEventKind::Created));
    assert!(session.on_file_event("/opt/tools/mise", FileEventKind::Deleted));

    next_signal(&mut receiver).await;
}

#[tokio::test]
async fn settings_change_reaches_executable_listeners() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let session = session(&dir, Arc::new(FakeRunner::default()), with_global_executable(None));
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let _subscription = session.on_executable_changed(move || {
        let _ = sender.send(());
    });

    session
        .settings()
        .update_app(|app| app.executable_path = Some("/opt/other/mise".to_string()))
        .expect("in-memory update");

    next_signal(&mut receiver).await;
    assert_eq!(session.resolve_executable_path().await, "/opt/other/mise");
}

#[tokio::test]
async fn trust_notifies_config_listeners() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let runner = Arc::new(FakeRunner::default());
    runner.stdout("mise version", "2025.1.0").stdout("mise trust", "");
    let session = session(&dir, runner.clone(), with_global_executable(None));
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let _subscription = session.on_config_changed(move || {
        let _ = sender.send(());
    });

    session
        .trust(&dir_string(&dir), "/srv/app/mise.toml")
        .await
        .expect("trust should succeed");

    next_signal(&mut receiver).await;
    assert_eq!(runner.count("mise trust /srv/app/mise.toml"), 1);
}

#[tokio::test]
async fn ui_thread_lookup_is_modal_once_then_cached() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let runner = Arc::new(FakeRunner::default());
    runner
        .stdout("mise version", "2025.1.0")
        .stdout("ls --current --json", r#"{"node":[{"version":"22.1.0","active":true}]}"#);
    let host = Arc::new(UiThreadHost {
        scopes: Mutex::new(Vec::new()),
    });
    let session = Session::builder()
        .project_dir(dir.path())
        .settings(with_global_executable(None), ProjectSettings::default())
        .runner(runner.clone())
        .progress_host(host.clone())
        .build();

    for _ in 0..2 {
        let tools = session
            .installed_tools(&dir_string(&dir))
            .await
            .expect("ls should succeed");
        assert!(tools["node"][0].active);
    }

    assert_eq!(host.scopes.lock().expect("scopes lock").as_slice(), &["modal"]);
    assert_eq!(runner.count("ls --current --json"), 1);
}

#[tokio::test]
async fn padded_environment_names_stay_on_the_fast_path() {
    for (configured, requested) in [
        (None, Some("ci ")),
        (None, Some("")),
        (Some(" ci"), None),
    ] {
        let dir = tempfile::tempdir().expect("create temp dir");
        let runner = Arc::new(FakeRunner::default());
        runner.stdout("mise version", "2025.1.0").stdout("env --json", "{}");
        let host = Arc::new(UiThreadHost {
            scopes: Mutex::new(Vec::new()),
        });
        let session = Session::builder()
            .project_dir(dir.path())
            .settings(with_global_executable(configured), ProjectSettings::default())
            .runner(runner.clone())
            .progress_host(host.clone())
            .build();

        for _ in 0..3 {
            session
                .run_and_cache(Operation::Env, &dir_string(&dir), requested)
                .await
                .expect("env should succeed");
        }

        assert_eq!(
            host.scopes.lock().expect("scopes lock").as_slice(),
            &["modal"],
            "configured {configured:?}, requested {requested:?}"
        );
        assert_eq!(runner.count("env --json"), 1);
    }
}

#[tokio::test]
async fn shutdown_stops_listeners() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let session = session(&dir, Arc::new(FakeRunner::default()), with_global_executable(None));

    tokio::time::timeout(Duration::from_secs(2), session.shutdown())
        .await
        .expect("shutdown should finish");
}
