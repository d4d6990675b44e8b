//! Shared fixtures for the integration tests: an in-memory USB/IP host that
//! answers `usbip` commands and the bound-state probe, plus a harness that
//! wires it into a real registry, dispatcher, orchestrator and config store.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lib_usbctl::{
    BindOrchestrator, BindProbe, BusId, CommandOutput, CommandRunner, CommandSet, CommandSpec,
    ConfigRecord, ConfigStore, DeviceRegistry, Dispatcher, Gateway, GatewayError, Platform,
};
use tempfile::TempDir;

#[derive(Debug, Default)]
struct HostState {
    /// `(busid, description)` in listing order.
    devices: Vec<(String, String)>,
    bound: HashSet<String>,
    tools_missing: bool,
    hang_listing: bool,
    hang_mutations: bool,
    mutation_delay: Duration,
}

/// # Fake Host
///
/// Plays the part of the kernel USB/IP tools and sysfs. Every command it is
/// asked to run is recorded in order.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
    calls: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device that shows up in listings.
    pub fn with_device(self, busid: &str, info: &str) -> Self {
        self.state.lock().unwrap().devices.push((busid.to_string(), info.to_string()));
        self
    }

    /// Adds a device that is already exported.
    pub fn with_bound_device(self, busid: &str, info: &str) -> Self {
        self.state.lock().unwrap().bound.insert(busid.to_string());
        self.with_device(busid, info)
    }

    pub fn set_tools_missing(&self, missing: bool) {
        self.state.lock().unwrap().tools_missing = missing;
    }

    pub fn set_hang_listing(&self, hang: bool) {
        self.state.lock().unwrap().hang_listing = hang;
    }

    pub fn set_hang_mutations(&self, hang: bool) {
        self.state.lock().unwrap().hang_mutations = hang;
    }

    pub fn set_mutation_delay(&self, delay: Duration) {
        self.state.lock().unwrap().mutation_delay = delay;
    }

    /// Flips a device's bound state behind the service's back.
    pub fn set_bound(&self, busid: &str, bound: bool) {
        let mut state = self.state.lock().unwrap();
        if bound {
            state.bound.insert(busid.to_string());
        } else {
            state.bound.remove(busid);
        }
    }

    pub fn is_bound(&self, busid: &str) -> bool {
        self.state.lock().unwrap().bound.contains(busid)
    }

    /// Every command line run so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Only the bind/unbind command lines.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(" bind ") || c.contains(" unbind "))
            .collect()
    }

    fn listing(&self) -> String {
        let state = self.state.lock().unwrap();
        let mut out = String::from("Local USB devices\n=================\n");
        for (busid, info) in &state.devices {
            out.push_str(&format!(" - busid {} (046d:c52b)\n   {}\n\n", busid, info));
        }
        out
    }

    fn mutate(&self, verb: &str, busid: &str) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        if !state.devices.iter().any(|(id, _)| id == busid) {
            return CommandOutput {
                status: 1,
                output: format!("usbip: error: device with the specified bus ID does not exist: {busid}\n"),
            };
        }
        let changed = match verb {
            "bind" => state.bound.insert(busid.to_string()),
            _ => state.bound.remove(busid),
        };
        if !changed {
            return CommandOutput {
                status: 1,
                output: format!("usbip: error: {verb}: device {busid} is already in that state\n"),
            };
        }
        CommandOutput::success(format!("usbip: info: {verb} device on busid {busid}: complete\n"))
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run(&self, command: &CommandSpec, limit: Duration) -> Result<CommandOutput, GatewayError> {
        self.calls.lock().unwrap().push(command.to_string());

        let (missing, hang_listing, hang_mutations, delay) = {
            let state = self.state.lock().unwrap();
            (state.tools_missing, state.hang_listing, state.hang_mutations, state.mutation_delay)
        };
        if missing {
            return Err(GatewayError::Launch {
                program: command.program.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            });
        }

        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["list", ..] => {
                if hang_listing {
                    tokio::time::sleep(limit).await;
                    return Err(GatewayError::Timeout {
                        program: command.program.clone(),
                        limit,
                    });
                }
                Ok(CommandOutput::success(self.listing()))
            }
            [verb @ ("bind" | "unbind"), "-b", busid] => {
                if hang_mutations {
                    tokio::time::sleep(limit).await;
                    return Err(GatewayError::Timeout {
                        program: command.program.clone(),
                        limit,
                    });
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(self.mutate(verb, busid))
            }
            _ => Ok(CommandOutput {
                status: 2,
                output: format!("usbip: unknown command: {}\n", command),
            }),
        }
    }
}

impl BindProbe for FakeHost {
    fn is_bound(&self, busid: &BusId) -> bool {
        FakeHost::is_bound(self, busid.as_str())
    }
}

/// Gateway timeout used by every harness.
pub const TEST_COMMAND_TIMEOUT: Duration = Duration::from_millis(300);

/// # Harness
///
/// A fully wired core on top of a [`FakeHost`], with its config file in a
/// private temp directory.
pub struct Harness {
    pub host: Arc<FakeHost>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<DeviceRegistry>,
    pub orchestrator: Arc<BindOrchestrator>,
    pub store: Arc<ConfigStore>,
    pub config_path: PathBuf,
    _dir: TempDir,
}

impl Harness {
    pub fn new(host: FakeHost) -> Self {
        Self::with_record(host, ConfigRecord::default())
    }

    pub fn with_record(host: FakeHost, record: ConfigRecord) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("usbctl").join("config");
        Self::build(host, record, config_path, dir)
    }

    /// Harness whose config store can never write.
    pub fn with_unwritable_config(host: FakeHost) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        Self::build(host, ConfigRecord::default(), blocker.join("config"), dir)
    }

    fn build(host: FakeHost, record: ConfigRecord, config_path: PathBuf, dir: TempDir) -> Self {
        let host = Arc::new(host);
        let gateway = Gateway::new(host.clone()).with_timeout(TEST_COMMAND_TIMEOUT);
        let commands = CommandSet::new(Platform::Linux);
        let dispatcher = Arc::new(Dispatcher::new());
        let registry = Arc::new(DeviceRegistry::new(
            gateway.clone(),
            commands,
            host.clone(),
            dispatcher.clone(),
        ));
        let store = Arc::new(ConfigStore::with_record(&config_path, record));
        let orchestrator = Arc::new(BindOrchestrator::new(gateway, commands, registry.clone(), store.clone()));

        Self {
            host,
            dispatcher,
            registry,
            orchestrator,
            store,
            config_path,
            _dir: dir,
        }
    }

    /// `(busid, bound)` pairs of the current snapshot.
    pub fn state(&self) -> Vec<(String, bool)> {
        self.registry
            .snapshot()
            .devices()
            .iter()
            .map(|d| (d.busid.to_string(), d.bound))
            .collect()
    }
}

/// Shorthand for a validated bus ID.
pub fn busid(raw: &str) -> BusId {
    BusId::parse(raw).unwrap()
}
