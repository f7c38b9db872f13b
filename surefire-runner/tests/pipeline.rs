// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Drives a forked booter and the parent side of the channel end to end, over in-memory pipes.

use camino_tempfile::Utf8TempDir;
use pretty_assertions::assert_eq;
use std::{
    io::{self, BufRead, BufReader, Cursor, Write},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};
use surefire_metadata::SurefireExitCode;
use surefire_runner::{
    booter::{BooterConfiguration, ComponentDefinition, ForkedBooter},
    channel::{Command, Shutdown},
    command_reader::CommandReader,
    dump::DumpWriter,
    errors::ProviderError,
    fork::{ClientAction, ForkClient},
    provider::{Provider, ProviderParameters, ProviderRegistry},
    reporter::{
        ConsoleWriter, ReporterContext, ReporterFactory, ReporterRegistry, RunListener,
        SimpleReportEntry, StackTraceWriter,
    },
};

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("lock not poisoned")).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("lock not poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Every class has a passing test, and a failing one if its name contains "Broken".
struct InMemoryProvider;

impl InMemoryProvider {
    fn create(_params: ProviderParameters) -> Result<Box<dyn Provider>, ProviderError> {
        Ok(Box::new(Self))
    }
}

impl Provider for InMemoryProvider {
    fn suites(&self) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    fn invoke(
        &mut self,
        classes: &mut dyn Iterator<Item = String>,
        listener: &mut dyn RunListener,
    ) -> Result<(), ProviderError> {
        for class_name in classes {
            let set = SimpleReportEntry::test_set(&class_name);
            listener.test_set_starting(&set);

            let passes = SimpleReportEntry::test(&class_name, "passes").with_elapsed(3);
            listener.test_starting(&passes);
            listener.test_succeeded(&passes);

            if class_name.contains("Broken") {
                let trace = StackTraceWriter::new(
                    Some(class_name.clone()),
                    Some("expected 1 but was 2"),
                    format!("expected 1 but was 2\n  at {class_name}.breaks"),
                );
                let breaks = SimpleReportEntry::test(&class_name, "breaks")
                    .with_elapsed(5)
                    .with_message("expected 1 but was 2")
                    .with_stack_trace(trace);
                listener.test_starting(&breaks);
                listener.test_failed(&breaks);
            }

            listener.test_set_completed(&set.with_elapsed(8));
        }
        Ok(())
    }
}

#[test]
fn command_reader_hands_out_classes_in_order() {
    let reader = CommandReader::new(Shutdown::Default, DumpWriter::disabled());
    let input = [
        Command::run_class("org.x.ATest").to_line(),
        Command::run_class("org.x.BTest").to_line(),
        "NOOP,0,\n".to_owned(),
        "TEST_SET_FINISHED,0,\n".to_owned(),
    ]
    .concat();

    let noops = Arc::new(AtomicUsize::new(0));
    let counted = noops.clone();
    reader.add_noop_listener(move || {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    reader.start(Cursor::new(input));

    let classes: Vec<String> = reader.iterated(|| {}).collect();
    assert_eq!(classes, vec!["org.x.ATest", "org.x.BTest"]);

    reader.join();
    assert_eq!(noops.load(Ordering::SeqCst), 1);
    assert!(reader.is_queue_full());
}

#[test]
fn forked_booter_reports_to_the_parent() {
    let dir = Utf8TempDir::new().expect("created temp dir");
    let reports_dir = dir.path().join("reports");

    let mut config = BooterConfiguration::default();
    config.provider = "in-memory".to_owned();
    config.reports_dir = reports_dir.clone();
    config.exit_timeout = Duration::from_secs(5);
    config.fork_number = 1;
    config.system_properties.set("user.language", "en");

    let mut providers = ProviderRegistry::default();
    providers.register("in-memory", InMemoryProvider::create);

    let (command_rx, mut command_tx) = io::pipe().expect("created command pipe");
    let (event_rx, event_tx) = io::pipe().expect("created event pipe");
    let booter = ForkedBooter::new(config, std::process::id().to_string())
        .with_provider_registry(providers);
    let fork = thread::spawn(move || booter.run(BufReader::new(command_rx), event_tx));

    let console = SharedBuffer::default();
    let factory = ReporterFactory::new(
        ReporterContext {
            reports_dir: reports_dir.clone(),
            trim_stack_trace: true,
            redirect_test_output_to_file: false,
            console: ConsoleWriter::new(console.clone()),
        },
        vec![
            ComponentDefinition::new("console"),
            ComponentDefinition::new("xml"),
        ],
        Arc::new(ReporterRegistry::with_builtins()),
    );
    let manager = factory
        .create_reporter_manager()
        .expect("created reporter manager");
    let mut client = ForkClient::new(1, manager, None);

    let mut classes = vec!["org.x.BrokenTest", "org.x.ATest"].into_iter();
    for line in BufReader::new(event_rx).lines() {
        let line = line.expect("read event line");
        let reply = match client.consume_line(&line) {
            ClientAction::NextTest => match classes.next() {
                Some(class_name) => Command::run_class(class_name).to_line(),
                None => "TEST_SET_FINISHED,0,\n".to_owned(),
            },
            ClientAction::Bye => "BYE_ACK,0,\n".to_owned(),
            ClientAction::None | ClientAction::SkipRemaining => continue,
        };
        command_tx
            .write_all(reply.as_bytes())
            .expect("wrote command");
    }

    let code = fork.join().expect("fork thread didn't panic");
    assert_eq!(code, SurefireExitCode::FAILURE);
    assert!(client.said_goodbye());
    assert!(client.errors().is_empty());
    assert_eq!(
        client.system_properties().get("user.language").map(String::as_str),
        Some("en")
    );

    drop(client);
    let result = factory.close();
    assert_eq!(result.counts.completed, 3);
    assert_eq!(result.counts.failures, 1);
    assert_eq!(result.failure_sources.len(), 1);

    let console = console.contents();
    assert!(
        console.contains("Running org.x.BrokenTest"),
        "console output: {console}"
    );
    assert!(console.contains("Tests run: 3, Failures: 1, Errors: 0, Skipped: 0"));
    assert!(reports_dir.join("TEST-org.x.ATest.xml").is_file());
    assert!(reports_dir.join("TEST-org.x.BrokenTest.xml").is_file());
}
