#![allow(dead_code)]

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use mcgate_host::{
    ContainerRuntime, DaemonSupervisor, Gateway, GatewayConfig, ObjectContext, RuntimeError,
    SandboxSpec, StartOutcome,
};
use mcgate_sbus::{Command, FdTag, SbusListener};
use mcgate_store::MemObjectStore;
use tempfile::TempDir;

pub const ACCOUNT: &str = "AUTH_bd34c4073b65412ab";
pub const SCOPE: &str = "bd34c4073b654";
pub const MAIN_HEADER: &str = "X-Object-Meta-Handler-Main";

/// Runtime that remembers which sandboxes it has started.
#[derive(Default)]
pub struct CountingRuntime {
    started: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl CountingRuntime {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.lock().unwrap().len()
    }
}

#[async_trait]
impl ContainerRuntime for CountingRuntime {
    async fn start(&self, spec: &SandboxSpec) -> Result<StartOutcome, RuntimeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.started.lock().unwrap().insert(spec.name.clone()) {
            Ok(StartOutcome::Started)
        } else {
            Ok(StartOutcome::AlreadyExists)
        }
    }
}

pub struct Fixture {
    pub tmp: TempDir,
    pub store: Arc<MemObjectStore>,
    pub runtime: Arc<CountingRuntime>,
    pub gateway: Gateway<MemObjectStore, CountingRuntime>,
    pub data_file: PathBuf,
}

impl Fixture {
    pub fn new(timeout: Duration) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = GatewayConfig {
            handler_timeout: timeout,
            pipes_dir: tmp.path().join("pipes"),
            cache_dir: tmp.path().join("cache"),
            log_dir: tmp.path().join("logs"),
            ..GatewayConfig::default()
        };
        let store = Arc::new(MemObjectStore::new());
        let runtime = Arc::new(CountingRuntime::default());
        let gateway = Gateway::with_supervisor(
            config,
            store.clone(),
            runtime.clone(),
            Arc::new(DaemonSupervisor::new()),
        );

        let objects = tmp.path().join("objects");
        fs::create_dir_all(&objects).unwrap();
        let data_file = objects.join("photo.jpg");
        fs::write(&data_file, b"jpeg-bytes").unwrap();

        Self {
            tmp,
            store,
            runtime,
            gateway,
            data_file,
        }
    }

    pub fn add_handler(&self, name: &str, main: &str) {
        self.store
            .insert(ACCOUNT, "handler", name, format!("code of {name}"), [(MAIN_HEADER, main)]);
    }

    pub fn object(&self) -> ObjectContext<'_> {
        ObjectContext {
            account: ACCOUNT,
            container: "photos",
            object: "photo.jpg",
            data_file: &self.data_file,
        }
    }

    pub fn channel_path(&self) -> PathBuf {
        self.tmp.path().join("pipes").join(SCOPE).join("mc_pipe")
    }

    pub fn spawn_sandbox(&self, reply: Reply) -> FakeSandbox {
        FakeSandbox::spawn(self.channel_path(), reply)
    }
}

pub fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in pairs {
        map.append(
            HeaderName::from_bytes(k.as_bytes()).unwrap(),
            HeaderValue::from_str(v).unwrap(),
        );
    }
    map
}

/// How the fake sandbox answers an `execute`.
#[derive(Debug, Clone)]
pub enum Reply {
    Bytes(Vec<u8>),
    /// Never answer; wait for the cancel, then keep writing until the pipe breaks.
    HoldUntilCancel,
}

/// What the fake sandbox saw for one `execute` datagram.
#[derive(Debug)]
pub struct Observed {
    pub command: Command,
    pub task_id: Option<String>,
    pub tags: Vec<FdTag>,
    pub input: Vec<u8>,
    pub cancel_task_id: Option<String>,
    pub output_broken: bool,
    /// Datagrams that arrived after the answered `execute`.
    pub extra_datagrams: usize,
}

/// Stand-in for the in-sandbox daemon, listening on the scope's channel.
pub struct FakeSandbox {
    observed: mpsc::Receiver<Observed>,
    _thread: JoinHandle<()>,
}

impl FakeSandbox {
    fn spawn(channel: PathBuf, reply: Reply) -> Self {
        fs::create_dir_all(channel.parent().unwrap()).unwrap();
        let listener = SbusListener::bind(&channel).unwrap();
        listener.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let (tx, rx) = mpsc::channel();

        let thread = std::thread::spawn(move || {
            let Ok(mut received) = listener.recv() else {
                return;
            };
            let tags: Vec<FdTag> = received.tags().cloned().collect();

            let mut input = Vec::new();
            if let Some((fd, _)) = received.take(|t| matches!(t, FdTag::InputObject { .. })) {
                let _ = File::from(fd).read_to_end(&mut input);
            }
            let output = received
                .take(|t| matches!(t, FdTag::OutputObject))
                .map(|(fd, _)| File::from(fd));

            let mut observed = Observed {
                command: received.command,
                task_id: received.task_id.clone(),
                tags,
                input,
                cancel_task_id: None,
                output_broken: false,
                extra_datagrams: 0,
            };

            match reply {
                Reply::Bytes(bytes) => {
                    if let Some(mut output) = output {
                        let _ = output.write_all(&bytes);
                    }
                    let _ = listener.set_read_timeout(Some(Duration::from_millis(300)));
                    while listener.recv().is_ok() {
                        observed.extra_datagrams += 1;
                    }
                }
                Reply::HoldUntilCancel => {
                    if let Ok(cancel) = listener.recv() {
                        if cancel.command == Command::Cancel {
                            observed.cancel_task_id = cancel.task_id;
                        }
                    }
                    if let Some(mut output) = output {
                        for _ in 0..100 {
                            if let Err(err) = output.write_all(b"late") {
                                observed.output_broken = err.kind() == ErrorKind::BrokenPipe;
                                break;
                            }
                            std::thread::sleep(Duration::from_millis(20));
                        }
                    }
                }
            }
            // Release the received copies before reporting, so callers can check which
            // descriptors the gateway itself still holds.
            drop(received);
            let _ = tx.send(observed);
        });

        Self {
            observed: rx,
            _thread: thread,
        }
    }

    pub fn next(&self, wait: Duration) -> Option<Observed> {
        self.observed.recv_timeout(wait).ok()
    }
}
