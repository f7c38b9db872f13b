// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{ClientAction, FailureBudget, ForkClient, ForkConfiguration, ForkMode, TestQueue};
use crate::{
    booter::{BooterConfiguration, BooterSerializer, MIN_PING_INTERVAL},
    channel::Command,
    dump::DumpWriter,
    errors::{DisplayErrorChain, ForkStartError},
    provider::{ProviderParameters, ProviderRegistry, SkipFlag, load_run_history},
    reporter::{
        OutputStream, ReportEntry, ReporterFactory, RunListener, RunResult, TestCounts,
        TestOutcome,
    },
};
use std::{fs, pin::pin, process::Stdio, sync::Arc, time::Duration};
use surefire_metadata::{RunHistory, RunSummary};
use swrite::{SWrite, swrite};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{ChildStdin, Command as ProcessCommand},
    sync::watch,
    task::JoinSet,
    time::{Instant, interval_at, sleep},
};
use tracing::{debug, error, info, warn};

const CRASH_MESSAGE: &str = "The forked VM terminated without properly saying goodbye.";

/// Runs a test run: decides the classes, runs them in process or in forks and merges the
/// results.
#[derive(Debug)]
pub struct ForkStarter {
    booter: BooterConfiguration,
    fork: ForkConfiguration,
    factory: Arc<ReporterFactory>,
    providers: ProviderRegistry,
    ppid: String,
}

impl ForkStarter {
    /// Creates a starter. `booter` is the configuration every fork starts from.
    pub fn new(
        booter: BooterConfiguration,
        fork: ForkConfiguration,
        factory: Arc<ReporterFactory>,
    ) -> Self {
        Self {
            booter,
            fork,
            factory,
            providers: ProviderRegistry::default(),
            ppid: std::process::id().to_string(),
        }
    }

    /// Replaces the providers used to find and run tests.
    pub fn with_provider_registry(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Runs every test, prints the summary and writes [`RunSummary::FILE_NAME`] and
    /// [`RunHistory::FILE_NAME`].
    pub fn run(&self) -> Result<RunResult, ForkStartError> {
        let classes = self.test_classes()?;
        debug!(
            mode = %self.fork.mode,
            classes = classes.len(),
            "starting test run"
        );
        let result = match self.fork.mode {
            ForkMode::Never => self.run_in_process(classes)?,
            ForkMode::Once | ForkMode::Always => self.run_forked(classes)?,
        };
        self.factory.run_completed(&result);
        self.write_summary(&result);
        self.write_history();
        Ok(result)
    }

    fn test_classes(&self) -> Result<Vec<String>, ForkStartError> {
        let params = ProviderParameters::from_config(&self.booter, SkipFlag::new());
        let provider = self
            .providers
            .create(&self.booter.provider, params)
            .map_err(ForkStartError::Suites)?;
        provider.suites().map_err(ForkStartError::Suites)
    }

    fn run_in_process(&self, classes: Vec<String>) -> Result<RunResult, ForkStartError> {
        self.factory.run_starting();
        let skip = SkipFlag::new();
        let params = ProviderParameters::from_config(&self.booter, skip.clone());
        let mut provider = self.providers.create(&self.booter.provider, params)?;
        let mut manager = self
            .factory
            .create_reporter_manager()
            .map_err(|err| ForkStartError::CreateReporters {
                fork_number: 0,
                err,
            })?;

        let budget = FailureBudget::new(self.booter.skip_after_failure_count);
        let mut listener = BudgetListener {
            inner: &mut manager,
            budget: budget.as_ref(),
            skip,
        };
        provider.invoke(&mut classes.into_iter(), &mut listener)?;
        Ok(self.factory.run_result())
    }

    fn run_forked(&self, classes: Vec<String>) -> Result<RunResult, ForkStartError> {
        self.factory.run_starting();
        if classes.is_empty() {
            return Ok(RunResult::default());
        }

        let workers = self.fork.fork_count.clamp(1, classes.len());
        let shared = Arc::new(Shared {
            booter: self.booter.clone(),
            fork: self.fork.clone(),
            factory: self.factory.clone(),
            queue: TestQueue::new(classes),
            budget: FailureBudget::new(self.booter.skip_after_failure_count).map(Arc::new),
            skip: watch::Sender::new(false),
            ppid: self.ppid.clone(),
        });

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(ForkStartError::Runtime)?;
        runtime.block_on(async move {
            let mut tasks = JoinSet::new();
            for fork_number in 1..=workers {
                let shared = shared.clone();
                // Fork numbers start at 1 and fit comfortably in a u32.
                let fork_number = u32::try_from(fork_number).unwrap_or(u32::MAX);
                tasks.spawn(shared.worker(fork_number));
            }

            let mut result = RunResult::default();
            let mut first_error = None;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(fork_result)) => result = result.aggregate(&fork_result),
                    Ok(Err(error)) => {
                        shared.queue.close();
                        first_error.get_or_insert(error);
                    }
                    Err(error) => {
                        result = result
                            .aggregate(&RunResult::failure(format!("fork task failed: {error}")));
                    }
                }
            }
            match first_error {
                Some(error) => Err(error),
                None => Ok(result),
            }
        })
    }

    fn write_summary(&self, result: &RunResult) {
        let dir = &self.booter.reports_dir;
        let path = dir.join(RunSummary::FILE_NAME);
        let written = result
            .to_summary()
            .to_json()
            .map_err(std::io::Error::other)
            .and_then(|json| {
                fs::create_dir_all(dir)?;
                fs::write(&path, json)
            });
        match written {
            Ok(()) => debug!(%path, "wrote run summary"),
            Err(error) => warn!(%path, %error, "failed to write run summary"),
        }
    }

    fn write_history(&self) {
        let latest = self.factory.run_history();
        if latest.classes.is_empty() {
            return;
        }
        let dir = &self.booter.reports_dir;
        let path = dir.join(RunHistory::FILE_NAME);
        let mut history = load_run_history(dir);
        history.merge(&latest);
        let written = history
            .to_json()
            .map_err(std::io::Error::other)
            .and_then(|json| {
                fs::create_dir_all(dir)?;
                fs::write(&path, json)
            });
        match written {
            Ok(()) => debug!(%path, "wrote run history"),
            Err(error) => warn!(%path, %error, "failed to write run history"),
        }
    }
}

/// State shared by the tasks driving forks.
#[derive(Debug)]
struct Shared {
    booter: BooterConfiguration,
    fork: ForkConfiguration,
    factory: Arc<ReporterFactory>,
    queue: TestQueue,
    budget: Option<Arc<FailureBudget>>,
    skip: watch::Sender<bool>,
    ppid: String,
}

struct ForkOutcome {
    said_goodbye: bool,
    timed_out: bool,
    status: std::process::ExitStatus,
}

impl Shared {
    async fn worker(self: Arc<Self>, fork_number: u32) -> Result<RunResult, ForkStartError> {
        match self.fork.mode {
            ForkMode::Always => {
                let mut result = RunResult::default();
                while let Some(class_name) = self.queue.next_class() {
                    let queue = TestQueue::new([class_name]);
                    result = result.aggregate(&self.run_fork(fork_number, &queue).await?);
                }
                Ok(result)
            }
            ForkMode::Once | ForkMode::Never => self.run_fork(fork_number, &self.queue).await,
        }
    }

    async fn run_fork(
        &self,
        fork_number: u32,
        queue: &TestQueue,
    ) -> Result<RunResult, ForkStartError> {
        let factory = self.factory.for_fork();
        let manager = factory
            .create_reporter_manager()
            .map_err(|err| ForkStartError::CreateReporters { fork_number, err })?;
        let mut client = ForkClient::new(fork_number, manager, self.budget.clone());

        let config = self.booter.for_fork(fork_number);
        let booter_file = BooterSerializer::new(&config).write_temp_file(&config.reports_dir)?;
        let outcome = self
            .drive_fork(fork_number, &config, booter_file.as_str(), &mut client, queue)
            .await?;

        let crash = (!outcome.said_goodbye && !outcome.timed_out)
            .then(|| self.crash_message(&config, &outcome, client.current_test_set()));
        if outcome.timed_out {
            client.close_incomplete("There was a timeout in the fork");
        } else if let Some(message) = &crash {
            error!(fork_number, "{message}");
            client.close_incomplete(message);
        }

        let mut result = factory.close();
        if let Some(message) = crash {
            result = result.aggregate(&RunResult::failure(message));
        }
        if outcome.timed_out {
            result = result.aggregate(&RunResult::timeout(TestCounts::default()));
        }
        for error in client.errors() {
            let message = error.message().unwrap_or_else(|| error.full_trace());
            result = result.aggregate(&RunResult::failure(format!(
                "ExecutionException in fork {fork_number}: {message}"
            )));
        }

        if self.fork.keep_booter_files {
            match booter_file.keep() {
                Ok(path) => info!(fork_number, %path, "kept booter configuration"),
                Err(error) => warn!(fork_number, %error, "failed to keep booter configuration"),
            }
        }
        Ok(result)
    }

    async fn drive_fork(
        &self,
        fork_number: u32,
        config: &BooterConfiguration,
        booter_file: &str,
        client: &mut ForkClient,
        queue: &TestQueue,
    ) -> Result<ForkOutcome, ForkStartError> {
        let mut child = ProcessCommand::new(&self.fork.executable)
            .arg(ForkConfiguration::BOOTER_SUBCOMMAND)
            .arg(booter_file)
            .arg(&self.ppid)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ForkStartError::Spawn {
                program: self.fork.executable.clone(),
                err,
            })?;
        debug!(fork_number, pid = ?child.id(), "started fork");

        let missing = |stream| ForkStartError::MissingPipe {
            fork_number,
            stream,
        };
        let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut skip_rx = self.skip.subscribe();
        let mut skip_sent = false;
        if *skip_rx.borrow_and_update() {
            skip_sent = true;
            send(&mut stdin, &Command::SKIP_SINCE_NEXT_TEST, fork_number).await;
        }

        let period = self.fork.ping_interval.max(MIN_PING_INTERVAL);
        let mut ping = interval_at(Instant::now() + period, period);
        let mut timeout_sleep = pin!(sleep(self.fork.timeout.unwrap_or(Duration::MAX)));
        let mut kill_sleep = pin!(sleep(Duration::MAX));
        let (mut stdout_done, mut stderr_done) = (false, false);
        let (mut timed_out, mut killed) = (false, false);

        let status = loop {
            tokio::select! {
                line = stdout_lines.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => {
                        let action = client.consume_line(&line);
                        self.answer(action, &mut stdin, queue, fork_number).await;
                    }
                    Ok(None) => stdout_done = true,
                    Err(error) => {
                        warn!(fork_number, %error, "failed to read from fork");
                        stdout_done = true;
                    }
                },
                line = stderr_lines.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => client.consume_stderr_line(&line),
                    Ok(None) | Err(_) => stderr_done = true,
                },
                _ = ping.tick() => send(&mut stdin, &Command::NOOP, fork_number).await,
                changed = skip_rx.changed(), if !skip_sent => {
                    skip_sent = true;
                    if changed.is_ok() && *skip_rx.borrow_and_update() {
                        send(&mut stdin, &Command::SKIP_SINCE_NEXT_TEST, fork_number).await;
                    }
                }
                () = &mut timeout_sleep, if self.fork.timeout.is_some() && !timed_out => {
                    timed_out = true;
                    warn!(fork_number, "fork timed out, shutting it down");
                    send(&mut stdin, &Command::shutdown(config.shutdown), fork_number).await;
                    kill_sleep.as_mut().reset(Instant::now() + self.fork.exit_timeout);
                }
                () = &mut kill_sleep, if timed_out && !killed => {
                    killed = true;
                    if let Err(error) = child.start_kill() {
                        debug!(fork_number, %error, "failed to kill fork");
                    }
                }
                status = child.wait() => {
                    break status.map_err(|err| ForkStartError::Wait { fork_number, err })?;
                }
            }
        };
        debug!(fork_number, %status, "fork exited");

        // The fork is gone, but its last lines may still be buffered.
        let drain = async {
            if !stdout_done {
                while let Ok(Some(line)) = stdout_lines.next_line().await {
                    let action = client.consume_line(&line);
                    if action == ClientAction::Bye {
                        send(&mut stdin, &Command::BYE_ACK, fork_number).await;
                    }
                }
            }
            if !stderr_done {
                while let Ok(Some(line)) = stderr_lines.next_line().await {
                    client.consume_stderr_line(&line);
                }
            }
        };
        if tokio::time::timeout(self.fork.exit_timeout, drain).await.is_err() {
            warn!(fork_number, "fork output was not closed after it exited");
        }

        Ok(ForkOutcome {
            said_goodbye: client.said_goodbye(),
            timed_out,
            status,
        })
    }

    async fn answer(
        &self,
        action: ClientAction,
        stdin: &mut ChildStdin,
        queue: &TestQueue,
        fork_number: u32,
    ) {
        let command = match action {
            ClientAction::None => return,
            ClientAction::NextTest => match queue.next_class() {
                Some(class_name) => Command::run_class(class_name),
                None => Command::TEST_SET_FINISHED,
            },
            ClientAction::Bye => Command::BYE_ACK,
            ClientAction::SkipRemaining => {
                warn!(
                    threshold = self.booter.skip_after_failure_count,
                    "too many failures, skipping the remaining tests"
                );
                self.queue.close();
                queue.close();
                self.skip.send_replace(true);
                return;
            }
        };
        send(stdin, &command, fork_number).await;
    }

    fn crash_message(
        &self,
        config: &BooterConfiguration,
        outcome: &ForkOutcome,
        crashed_set: Option<&str>,
    ) -> String {
        let mut message = format!(
            "{CRASH_MESSAGE}\nCommand was {} {} <booter properties> {}\nProcess exit status: {}",
            self.fork.executable,
            ForkConfiguration::BOOTER_SUBCOMMAND,
            self.ppid,
            outcome.status,
        );
        if let Some(set) = crashed_set {
            swrite!(message, "\nCrashed tests:\n{set}");
        }
        let dump = DumpWriter::new(&config.reports_dir, &config.dump_stamp, config.fork_number);
        if let Some(path) = dump.dump_path().filter(|path| path.exists()) {
            swrite!(message, "\nSee {path} for details.");
        }
        message
    }
}

async fn send(stdin: &mut ChildStdin, command: &Command, fork_number: u32) {
    let line = command.to_line();
    let result = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }
    .await;
    if let Err(error) = result {
        // The fork may already be gone; its exit is handled separately.
        debug!(fork_number, %command, "failed to send command: {}", DisplayErrorChain::new(&error));
    }
}

/// Raises the skip flag of an in-process run once the failure budget is exhausted.
struct BudgetListener<'a, L: ?Sized> {
    inner: &'a mut L,
    budget: Option<&'a FailureBudget>,
    skip: SkipFlag,
}

impl<L: RunListener + ?Sized> RunListener for BudgetListener<'_, L> {
    fn test_set_starting(&mut self, entry: &dyn ReportEntry) {
        self.inner.test_set_starting(entry);
    }

    fn test_set_completed(&mut self, entry: &dyn ReportEntry) {
        self.inner.test_set_completed(entry);
    }

    fn test_starting(&mut self, entry: &dyn ReportEntry) {
        self.inner.test_starting(entry);
    }

    fn test_finished(&mut self, outcome: TestOutcome, entry: &dyn ReportEntry) {
        self.inner.test_finished(outcome, entry);
        if matches!(outcome, TestOutcome::Failed | TestOutcome::Error)
            && self.budget.is_some_and(FailureBudget::record)
            && self.skip.raise()
        {
            self.inner.test_execution_skipped_by_user();
        }
    }

    fn write_test_output(&mut self, stream: OutputStream, text: &str) {
        self.inner.write_test_output(stream, text);
    }

    fn test_execution_skipped_by_user(&mut self) {
        self.inner.test_execution_skipped_by_user();
    }

    fn info(&mut self, message: &str) {
        self.inner.info(message);
    }

    fn warning(&mut self, message: &str) {
        self.inner.warning(message);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        booter::{ComponentDefinition, TypedParam},
        reporter::{ConsoleWriter, ReporterContext, ReporterRegistry, test_helpers::SharedBuffer},
    };
    use camino::Utf8Path;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;
    use test_case::test_case;

    fn script(path: &Utf8Path, body: &str) {
        fs::write(path, body).expect("wrote script");
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("made executable");
    }

    fn starter(
        dir: &Utf8TempDir,
        mode: ForkMode,
        executable: &Utf8Path,
    ) -> (ForkStarter, SharedBuffer) {
        let mut booter = BooterConfiguration::default();
        booter.reports_dir = dir.path().join("reports");
        booter.classpath.test_classpath = crate::classpath::Classpath::new([dir.path().as_str()]);
        booter.test_suites = vec![ComponentDefinition::new("classes").with_param(
            TypedParam::StringList(vec!["org.x.ATest".to_owned(), "org.x.BTest".to_owned()]),
        )];

        let mut fork = ForkConfiguration::new(mode, executable);
        fork.timeout = Some(Duration::from_secs(30));
        fork.exit_timeout = Duration::from_millis(500);
        fork.ping_interval = Duration::from_secs(60);

        let buffer = SharedBuffer::default();
        let context = ReporterContext {
            reports_dir: booter.reports_dir.clone(),
            trim_stack_trace: true,
            redirect_test_output_to_file: false,
            console: ConsoleWriter::new(buffer.clone()),
        };
        let factory = ReporterFactory::new(
            context,
            vec![ComponentDefinition::new("console")],
            Arc::new(ReporterRegistry::default()),
        );
        (ForkStarter::new(booter, fork, Arc::new(factory)), buffer)
    }

    /// A fork that runs every class it's handed as one test. `*FailTest` classes fail and
    /// `*SlowTest` classes take a second. Every command read is appended to
    /// `<script>.<fork number>.log`.
    const FAKE_FORK: &str = indoc! {r#"
        #!/bin/sh
        log="$0.$(sed -n 's/^forkNumber=//p' "$1").log"
        printf 'N,1,\n'
        while IFS= read -r cmd; do
          printf '%s\n' "$cmd" >> "$log"
          case "$cmd" in
            RUN_CLASS,0,*)
              class=${cmd#RUN_CLASS,0,}
              printf '1,1,%s,\\N,\\N,\\N,\\N,\\N,\\N,\\N,\\N\n' "$class"
              printf '5,1,%s,\\N,ok,\\N,\\N,\\N,\\N,\\N,\\N\n' "$class"
              case "$class" in
                *FailTest)
                  sleep 0.3
                  printf '8,1,%s,\\N,ok,\\N,\\N,\\N,3,\\N,\\N\n' "$class"
                  ;;
                *SlowTest)
                  sleep 1
                  printf '6,1,%s,\\N,ok,\\N,\\N,\\N,3,\\N,\\N\n' "$class"
                  ;;
                *) printf '6,1,%s,\\N,ok,\\N,\\N,\\N,3,\\N,\\N\n' "$class" ;;
              esac
              printf '2,1,%s,\\N,\\N,\\N,\\N,\\N,\\N,\\N,\\N\n' "$class"
              printf 'N,1,\n'
              ;;
            TEST_SET_FINISHED*) break ;;
          esac
        done
        printf 'Z,1,\n'
        IFS= read -r ack
        exit 0
    "#};

    /// A fork that says goodbye as soon as it's pinged.
    const PINGED_FORK: &str = indoc! {r#"
        #!/bin/sh
        while IFS= read -r cmd; do
          printf '%s\n' "$cmd" >> "$0.log"
          case "$cmd" in
            NOOP,*) break ;;
          esac
        done
        printf 'Z,1,\n'
        IFS= read -r ack
        exit 0
    "#};

    fn fork_logs(dir: &Utf8TempDir) -> Vec<String> {
        (1..=2)
            .map(|n| fs::read_to_string(dir.path().join(format!("fork.sh.{n}.log"))))
            .filter_map(Result::ok)
            .collect()
    }

    #[test]
    fn classes_are_streamed_to_a_fork() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let fork = dir.path().join("fork.sh");
        script(&fork, FAKE_FORK);
        let (starter, console) = starter(&dir, ForkMode::Once, &fork);

        let result = starter.run().expect("run succeeded");
        assert_eq!(result.counts.completed, 2);
        assert!(result.is_success(), "result: {result:?}");
        let console = console.contents();
        assert!(console.contains("Running org.x.ATest"), "console: {console}");
        assert!(console.contains("Running org.x.BTest"), "console: {console}");
        assert!(console.contains("Results :"), "console: {console}");

        let summary = fs::read_to_string(dir.path().join("reports").join(RunSummary::FILE_NAME))
            .expect("summary written");
        let summary = RunSummary::from_json(&summary).expect("valid summary");
        assert_eq!(summary.completed, 2);

        let history = fs::read_to_string(dir.path().join("reports").join(RunHistory::FILE_NAME))
            .expect("history written");
        let history = RunHistory::from_json(&history).expect("valid history");
        assert_eq!(
            history.classes.keys().collect::<Vec<_>>(),
            vec!["org.x.ATest", "org.x.BTest"]
        );
        assert!(history.classes.values().all(|class| class.successful_runs == 1));
    }

    #[test]
    fn always_starts_a_fork_per_class() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let fork = dir.path().join("fork.sh");
        script(&fork, FAKE_FORK);
        let (starter, _) = starter(&dir, ForkMode::Always, &fork);
        let result = starter.run().expect("run succeeded");
        assert_eq!(result.counts.completed, 2);
        assert!(result.is_success(), "result: {result:?}");
    }

    #[test]
    fn crashed_fork_fails_the_run() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let fork = dir.path().join("fork.sh");
        script(&fork, "#!/bin/sh\nexit 3\n");
        let (starter, _) = starter(&dir, ForkMode::Once, &fork);
        let result = starter.run().expect("run finished");
        let failure = result.failure.clone().expect("crash recorded");
        assert!(failure.starts_with(CRASH_MESSAGE), "failure: {failure}");
        assert_eq!(result.exit_code(false), surefire_metadata::SurefireExitCode::FAILURE);
    }

    #[test]
    fn hanging_fork_times_out() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let fork = dir.path().join("fork.sh");
        script(&fork, "#!/bin/sh\nexec sleep 30\n");
        let (mut starter, _) = starter(&dir, ForkMode::Once, &fork);
        starter.fork.timeout = Some(Duration::from_millis(200));
        starter.fork.exit_timeout = Duration::from_millis(200);
        let result = starter.run().expect("run finished");
        assert!(result.timeout);
        assert_eq!(result.failure, None);
    }

    #[test]
    fn runs_in_process() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        fs::create_dir_all(dir.path().join("org/x")).expect("created dirs");
        script(&dir.path().join("org/x/ATest"), "#!/bin/sh\nexit 0\n");
        script(&dir.path().join("org/x/BTest"), "#!/bin/sh\nexit 1\n");
        let (mut starter, _) = starter(&dir, ForkMode::Never, Utf8Path::new("unused"));
        starter.booter.skip_after_failure_count = 1;

        let result = starter.run().expect("run finished");
        assert_eq!(result.counts.completed, 2);
        assert_eq!(result.failure_sources, vec!["org.x.BTest.BTest"]);
    }

    #[test]
    fn failure_budget_skips_in_every_fork() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let fork = dir.path().join("fork.sh");
        script(&fork, FAKE_FORK);
        let (mut starter, _) = starter(&dir, ForkMode::Once, &fork);
        starter.fork.fork_count = 2;
        starter.booter.skip_after_failure_count = 1;
        starter.booter.test_suites = vec![ComponentDefinition::new("classes").with_param(
            TypedParam::StringList(
                ["org.x.AFailTest", "org.x.BSlowTest", "org.x.CTest", "org.x.DTest"]
                    .map(str::to_owned)
                    .to_vec(),
            ),
        )];

        let result = starter.run().expect("run finished");
        assert_eq!(result.counts.completed, 2);
        assert_eq!(result.counts.failures, 1);

        let logs = fork_logs(&dir);
        assert_eq!(logs.len(), 2, "logs: {logs:?}");
        for log in &logs {
            assert!(!log.contains("RUN_CLASS,0,org.x.CTest"), "log: {log}");
            assert!(!log.contains("RUN_CLASS,0,org.x.DTest"), "log: {log}");
            if let Some((_, after_skip)) = log.split_once("SKIP_SINCE_NEXT_TEST,0,") {
                assert!(!after_skip.contains("RUN_CLASS"), "log: {log}");
            }
        }
        let slow = logs
            .iter()
            .find(|log| log.contains("RUN_CLASS,0,org.x.BSlowTest"))
            .expect("a fork ran the slow test");
        assert!(slow.contains("SKIP_SINCE_NEXT_TEST,0,"), "log: {slow}");
    }

    #[test_case(Duration::from_millis(20) ; "short interval")]
    #[test_case(Duration::ZERO ; "zero interval")]
    fn forks_are_pinged(interval: Duration) {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let fork = dir.path().join("fork.sh");
        script(&fork, PINGED_FORK);
        let (mut starter, _) = starter(&dir, ForkMode::Once, &fork);
        starter.fork.ping_interval = interval;

        let result = starter.run().expect("run finished");
        assert_eq!(result.failure, None);
        let log = fs::read_to_string(dir.path().join("fork.sh.log")).expect("fork read stdin");
        assert!(log.starts_with("NOOP,0,\n"), "log: {log}");
    }
}
