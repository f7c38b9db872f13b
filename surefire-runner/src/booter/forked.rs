// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! The entry point of a forked process.
//!
//! The parent writes a booter properties file and starts the fork with its path and the parent's
//! PID. The fork reads commands from stdin and writes events to stdout, so nothing else may write
//! to stdout while it runs.

use super::{BooterConfiguration, BooterDeserializer, MIN_PING_INTERVAL, keys};
use crate::{
    channel::{EventEncoder, Shutdown},
    command_reader::CommandReader,
    dump::DumpWriter,
    errors::{DisplayErrorChain, ForkedBooterError},
    process_checker::{ProcessChecker, ProcessCheckerType, process_checker},
    provider::{ProviderParameters, ProviderRegistry, SkipFlag},
    reporter::{ForkingRunListener, StackTraceWriter},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    io::{self, BufRead, Write},
    sync::{
        Arc, Mutex,
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::{Duration, Instant},
};
use surefire_metadata::SurefireExitCode;
use tracing::{debug, error, warn};

/// Ends the process with the given exit code.
pub type Halt = Arc<dyn Fn(i32) + Send + Sync>;

/// A fork that's missed this many pings considers its parent gone.
const MISSED_PINGS: u32 = 3;

/// Runs the tests handed to a forked process.
pub struct ForkedBooter {
    config: BooterConfiguration,
    ppid: String,
    dump: DumpWriter,
    registry: ProviderRegistry,
    halt: Halt,
}

impl std::fmt::Debug for ForkedBooter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkedBooter")
            .field("config", &self.config)
            .field("ppid", &self.ppid)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ForkedBooter {
    /// Creates a booter for `config` whose parent is `ppid`.
    pub fn new(config: BooterConfiguration, ppid: impl Into<String>) -> Self {
        let dump = DumpWriter::new(&config.reports_dir, &config.dump_stamp, config.fork_number);
        Self {
            config,
            ppid: ppid.into(),
            dump,
            registry: ProviderRegistry::default(),
            halt: Arc::new(|code| std::process::exit(code)),
        }
    }

    /// Reads the configuration written by the parent.
    pub fn from_properties_file(
        path: &Utf8Path,
        ppid: impl Into<String>,
    ) -> Result<Self, ForkedBooterError> {
        let config = BooterDeserializer::from_file(path)?.deserialize()?;
        Ok(Self::new(config, ppid))
    }

    /// Replaces the providers the booter can instantiate.
    pub fn with_provider_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces how the process is ended by the `exit` and `kill` shutdown policies.
    pub fn with_halt(mut self, halt: Halt) -> Self {
        self.halt = halt;
        self
    }

    /// The configuration.
    pub fn config(&self) -> &BooterConfiguration {
        &self.config
    }

    /// Runs the tests, reading commands from `input` and writing events to `output`.
    ///
    /// Returns the exit code of the fork.
    pub fn run<R, W>(self, input: R, output: W) -> i32
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let config = &self.config;
        let encoder = Arc::new(EventEncoder::new(output, config.fork_number));
        let reader = Arc::new(CommandReader::new(config.shutdown, self.dump.clone()));
        let skip = SkipFlag::new();
        let last_ping = Arc::new(Mutex::new(Instant::now()));
        let (bye_ack_tx, bye_ack_rx) = mpsc::channel();

        {
            let halt = self.halt.clone();
            let dump = self.dump.clone();
            reader.add_shutdown_listener(move |policy| apply_shutdown(policy, &dump, &halt));
        }
        {
            let skip = skip.clone();
            let encoder = encoder.clone();
            let dump = self.dump.clone();
            reader.add_skip_next_tests_listener(move || {
                if skip.raise()
                    && let Err(error) = encoder.stop_on_next_test()
                {
                    dump.dump_stream_exception(Some("failed to acknowledge skip request"), &error);
                }
            });
        }
        {
            let last_ping = last_ping.clone();
            reader.add_noop_listener(move || {
                *last_ping.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
            });
        }
        reader.add_bye_ack_listener(move || {
            _ = bye_ack_tx.send(());
        });
        reader.start(input);

        let _watchdog = Watchdog::start(WatchdogParams {
            ppid: self.ppid.clone(),
            checker_type: config.process_checker,
            interval: config.ping_interval,
            last_ping,
            on_parent_dead: {
                let reader = reader.clone();
                let dump = self.dump.clone();
                let halt = self.halt.clone();
                let shutdown = config.shutdown;
                let ppid = self.ppid.clone();
                Box::new(move || {
                    error!(ppid, "parent process is gone, stopping this fork");
                    dump.dump_text(&format!(
                        "Killing self fork. Parent process {ppid} is not alive."
                    ));
                    reader.make_queue_full();
                    apply_shutdown(shutdown, &dump, &halt);
                })
            },
        });

        for (key, value) in config.system_properties.iter() {
            if let Err(error) = encoder.system_property(key, value) {
                self.dump
                    .dump_stream_exception(Some("failed to send system property"), &error);
            }
        }

        let mut listener = ForkingRunListener::new(encoder.clone(), self.dump.clone());
        let exit_code = match self.run_provider(&reader, &encoder, skip, &mut listener) {
            Ok(()) => {
                let counts = listener.counts();
                SurefireExitCode::for_run(
                    counts.completed,
                    counts.errors,
                    counts.failures,
                    config.fail_if_no_tests,
                )
            }
            Err(error) => {
                self.report_error(&encoder, &error);
                SurefireExitCode::BOOTER_ERROR
            }
        };

        self.say_goodbye(&encoder, &bye_ack_rx);
        reader.stop();
        exit_code
    }

    fn run_provider<W: Write + Send + 'static>(
        &self,
        reader: &CommandReader,
        encoder: &Arc<EventEncoder<W>>,
        skip: SkipFlag,
        listener: &mut ForkingRunListener<W>,
    ) -> Result<(), ForkedBooterError> {
        let params = ProviderParameters::from_config(&self.config, skip);
        let mut provider = self.registry.create(&self.config.provider, params)?;

        let request_encoder = encoder.clone();
        let dump = self.dump.clone();
        let mut classes = reader.iterated(move || {
            if let Err(error) = request_encoder.next_test() {
                dump.dump_stream_exception(Some("failed to request the next test"), &error);
            }
        });
        provider.invoke(&mut classes, listener)?;
        Ok(())
    }

    fn report_error<W: Write>(&self, encoder: &EventEncoder<W>, error: &ForkedBooterError) {
        let rendered = DisplayErrorChain::new(error).to_string();
        error!("{rendered}");
        self.dump.dump_exception(None, error);
        let trace = StackTraceWriter::new(None::<String>, Some(error.to_string()), rendered);
        if let Err(error) = encoder.error(&trace) {
            self.dump
                .dump_stream_exception(Some("failed to report an error"), &error);
        }
    }

    fn say_goodbye<W: Write>(&self, encoder: &EventEncoder<W>, bye_ack: &mpsc::Receiver<()>) {
        if let Err(error) = encoder.bye() {
            self.dump
                .dump_stream_exception(Some("failed to say goodbye"), &error);
            return;
        }
        match bye_ack.recv_timeout(self.config.exit_timeout) {
            Ok(()) => debug!("parent acknowledged goodbye"),
            Err(_) => {
                warn!(
                    timeout = ?self.config.exit_timeout,
                    "parent did not acknowledge goodbye, exiting anyway"
                );
                self.dump.dump_text("timed out waiting for BYE_ACK from the parent");
            }
        }
    }
}

fn apply_shutdown(policy: Shutdown, dump: &DumpWriter, halt: &Halt) {
    match policy {
        Shutdown::Default => {
            debug!("shutdown requested, no more test classes will run");
        }
        Shutdown::Exit => {
            dump.dump_text("Exiting self fork because of a shutdown request.");
            halt(SurefireExitCode::BOOTER_ERROR);
        }
        Shutdown::Kill => halt(SurefireExitCode::BOOTER_ERROR),
    }
}

/// Runs a forked process over the real stdin and stdout.
///
/// Configuration errors are reported as an error event and through the dump file, since the
/// parent can't see anything else.
pub fn run_forked_booter(properties_file: &Utf8Path, ppid: &str) -> i32 {
    let input = io::BufReader::new(io::stdin());
    match ForkedBooter::from_properties_file(properties_file, ppid) {
        Ok(booter) => booter.run(input, io::stdout()),
        Err(error) => {
            report_startup_failure(properties_file, &error, io::stdout());
            SurefireExitCode::BOOTER_ERROR
        }
    }
}

fn report_startup_failure<W: Write>(
    properties_file: &Utf8Path,
    error: &ForkedBooterError,
    output: W,
) {
    let deserializer = BooterDeserializer::from_file(properties_file).ok();
    let get = |key: &'static str| deserializer.as_ref().and_then(|d| d.properties().get(key));
    let reports_dir = get(keys::REPORTS_DIRECTORY)
        .map(Utf8PathBuf::from)
        .or_else(|| properties_file.parent().map(Utf8Path::to_path_buf))
        .unwrap_or_default();
    let stamp = get(keys::DUMP_STAMP).map_or_else(DumpWriter::new_stamp, str::to_owned);
    let fork_number = get(keys::FORK_NUMBER)
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);

    let rendered = DisplayErrorChain::new(error).to_string();
    error!("{rendered}");
    DumpWriter::new(&reports_dir, &stamp, fork_number).dump_exception(None, error);
    let encoder = EventEncoder::new(output, fork_number);
    let trace = StackTraceWriter::new(None::<String>, Some(error.to_string()), rendered);
    // The parent notices the missing goodbye if this fails too.
    _ = encoder.error(&trace);
    _ = encoder.bye();
}

struct WatchdogParams {
    ppid: String,
    checker_type: ProcessCheckerType,
    interval: Duration,
    last_ping: Arc<Mutex<Instant>>,
    on_parent_dead: Box<dyn FnOnce() + Send>,
}

/// Watches the parent process on a background thread until dropped.
struct Watchdog {
    _stop: mpsc::Sender<()>,
}

impl Watchdog {
    fn start(params: WatchdogParams) -> Option<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let spawned = thread::Builder::new()
            .name("surefire-ping-watchdog".to_owned())
            .spawn(move || watch(params, stop_rx));
        match spawned {
            Ok(_) => Some(Self { _stop: stop_tx }),
            Err(error) => {
                warn!(%error, "failed to start the parent watchdog");
                None
            }
        }
    }
}

fn watch(params: WatchdogParams, stop: mpsc::Receiver<()>) {
    let WatchdogParams {
        ppid,
        checker_type,
        interval,
        last_ping,
        on_parent_dead,
    } = params;
    let interval = interval.max(MIN_PING_INTERVAL);

    let mut checker: Option<Box<dyn ProcessChecker>> =
        process_checker(&ppid, checker_type).filter(|checker| checker.can_use());
    if checker.is_none() {
        debug!(ppid, "supervising the parent through pings");
    }

    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let alive = match &checker {
            Some(active) => match active.is_process_alive() {
                Ok(alive) => alive,
                Err(error) => {
                    warn!(
                        ppid,
                        "cannot determine whether the parent is alive, falling back to pings: {}",
                        DisplayErrorChain::new(&error),
                    );
                    active.stop();
                    checker = None;
                    continue;
                }
            },
            None => {
                let since = last_ping.lock().unwrap_or_else(|e| e.into_inner()).elapsed();
                since < interval * MISSED_PINGS
            }
        };

        if !alive {
            if let Some(active) = &checker {
                active.stop();
            }
            on_parent_dead();
            break;
        }
    }
}
