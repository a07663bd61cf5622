//! Mock appliance manager and remote shell.
//!
//! `MockShell` understands the handful of commands the VM node sends
//! (launch via `nohup`, `kill -0/-TERM/-KILL`, `cat`, `rm -rf`) and keeps one
//! simulated server process per host.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use universe::params::VmBinding;
use universe::substrate::vm::{ApplianceManager, CommandOutput, PowerState, RemoteShell};
use universe::{Result, UniverseError};

#[derive(Debug, Default)]
struct AppliancesState {
    vms: HashMap<String, (String, PowerState)>,
    deploy_calls: usize,
    power_off_calls: usize,
}

/// Appliance manager over an in-memory inventory.
#[derive(Debug, Clone, Default)]
pub struct MockAppliances {
    inner: Arc<Mutex<AppliancesState>>,
}

impl MockAppliances {
    /// `count` powered-off VMs named `vm-{i}` at `10.0.0.{i+1}`.
    pub fn with_vms(count: usize) -> Self {
        let appliances = Self::default();
        {
            let mut state = appliances.lock();
            for i in 0..count {
                state.vms.insert(
                    format!("vm-{i}"),
                    (format!("10.0.0.{}", i + 1), PowerState::Off),
                );
            }
        }
        appliances
    }

    pub fn vm_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().vms.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn power(&self, vm_name: &str) -> Option<PowerState> {
        self.lock().vms.get(vm_name).map(|(_, p)| *p)
    }

    pub fn deploy_calls(&self) -> usize {
        self.lock().deploy_calls
    }

    pub fn power_off_calls(&self) -> usize {
        self.lock().power_off_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AppliancesState> {
        self.inner.lock().expect("appliance state poisoned")
    }

    fn set_power(&self, vm_name: &str, power: PowerState) -> Result<()> {
        let mut state = self.lock();
        let vm = state
            .vms
            .get_mut(vm_name)
            .ok_or_else(|| UniverseError::substrate(vm_name, "unknown VM"))?;
        vm.1 = power;
        Ok(())
    }
}

#[async_trait]
impl ApplianceManager for MockAppliances {
    async fn deploy(&self, vms: &[VmBinding]) -> Result<()> {
        let mut state = self.lock();
        state.deploy_calls += 1;
        for vm in vms {
            if !state.vms.contains_key(&vm.vm_name) {
                return Err(UniverseError::Configuration(format!(
                    "unknown appliance {}",
                    vm.vm_name
                )));
            }
        }
        Ok(())
    }

    async fn address(&self, vm_name: &str) -> Result<String> {
        self.lock()
            .vms
            .get(vm_name)
            .map(|(address, _)| address.clone())
            .ok_or_else(|| UniverseError::Configuration(format!("unknown appliance {vm_name}")))
    }

    async fn power_on(&self, vm_name: &str) -> Result<()> {
        self.set_power(vm_name, PowerState::On)
    }

    async fn power_off(&self, vm_name: &str) -> Result<()> {
        self.lock().power_off_calls += 1;
        self.set_power(vm_name, PowerState::Off)
    }

    async fn power_state(&self, vm_name: &str) -> Result<PowerState> {
        self.power(vm_name)
            .ok_or_else(|| UniverseError::substrate(vm_name, "unknown VM"))
    }
}

#[derive(Debug, Default)]
struct ShellState {
    running: HashSet<String>,
    ignores_term: HashSet<String>,
    unreachable: HashSet<String>,
    commands: Vec<(String, String)>,
}

/// Remote shell simulating one server process per host.
#[derive(Debug, Clone, Default)]
pub struct MockShell {
    inner: Arc<Mutex<ShellState>>,
}

impl MockShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// The server on `host` ignores SIGTERM.
    pub fn ignore_term(&self, host: &str) {
        self.lock().ignores_term.insert(host.to_string());
    }

    /// Commands to `host` fail to deliver.
    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        let mut state = self.lock();
        if unreachable {
            state.unreachable.insert(host.to_string());
        } else {
            state.unreachable.remove(host);
        }
    }

    pub fn is_running(&self, host: &str) -> bool {
        self.lock().running.contains(host)
    }

    /// Commands sent to `host`, in order.
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ShellState> {
        self.inner.lock().expect("shell state poisoned")
    }
}

fn output(exit_code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    async fn execute(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let mut state = self.lock();
        state.commands.push((host.to_string(), command.to_string()));

        if state.unreachable.contains(host) {
            return Err(UniverseError::substrate(host, "ssh: connect to host: No route to host"));
        }

        let running = state.running.contains(host);
        let result = if command.contains("nohup") {
            state.running.insert(host.to_string());
            output(0, "")
        } else if command.starts_with("kill -0") {
            output(if running { 0 } else { 1 }, "")
        } else if command.starts_with("kill -TERM") {
            if !state.ignores_term.contains(host) {
                state.running.remove(host);
            }
            output(if running { 0 } else { 1 }, "")
        } else if command.starts_with("kill -KILL") {
            state.running.remove(host);
            output(if running { 0 } else { 1 }, "")
        } else if command.starts_with("cat ") {
            output(0, &format!("server log on {host}\n"))
        } else if command.starts_with("rm -rf") {
            output(0, "")
        } else {
            output(127, "")
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_process_simulation() {
        let shell = MockShell::new();
        shell.execute("h", "cd /w && nohup server &").await.unwrap();
        assert!(shell.is_running("h"));
        assert!(shell.execute("h", "kill -0 $(cat p)").await.unwrap().success());

        shell.execute("h", "kill -TERM $(cat p)").await.unwrap();
        assert!(!shell.is_running("h"));
        assert!(!shell.execute("h", "kill -0 $(cat p)").await.unwrap().success());
    }

    #[tokio::test]
    async fn test_shell_ignore_term_and_unreachable() {
        let shell = MockShell::new();
        shell.ignore_term("h");
        shell.execute("h", "nohup server &").await.unwrap();
        shell.execute("h", "kill -TERM 1").await.unwrap();
        assert!(shell.is_running("h"));

        shell.set_unreachable("h", true);
        assert!(shell.execute("h", "kill -KILL 1").await.is_err());
        assert_eq!(shell.commands_for("h").len(), 3);
    }

    #[tokio::test]
    async fn test_appliances_power() {
        let appliances = MockAppliances::with_vms(2);
        assert_eq!(appliances.vm_names(), vec!["vm-0", "vm-1"]);
        assert_eq!(appliances.address("vm-1").await.unwrap(), "10.0.0.2");
        assert_eq!(appliances.power("vm-0"), Some(PowerState::Off));

        appliances.power_on("vm-0").await.unwrap();
        assert_eq!(appliances.power_state("vm-0").await.unwrap(), PowerState::On);
        assert!(appliances.power_on("vm-9").await.is_err());
    }
}
