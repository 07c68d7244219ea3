use crate::backend::ControlPlane;
use crate::lease::{parse_lease_table, DhcpLease};
use crate::live::descriptor_name;
use crate::RuntimeError;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::debug;

/// libvirt driven through the `virsh` client.
#[derive(Debug, Clone)]
pub struct Virsh {
    uri: String,
    program: PathBuf,
}

impl Virsh {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_owned(),
            program: PathBuf::from("virsh"),
        }
    }

    pub fn with_program(uri: &str, program: impl Into<PathBuf>) -> Self {
        Self {
            uri: uri.to_owned(),
            program: program.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-c").arg(&self.uri).args(args);
        cmd
    }

    /// Run a virsh subcommand. A non-zero exit is a control-plane rejection
    /// of `operation` on `name`.
    fn run(
        &self,
        operation: &'static str,
        name: &str,
        mut cmd: Command,
    ) -> Result<String, RuntimeError> {
        debug!("running {cmd:?}");
        let output = cmd.output().map_err(|source| RuntimeError::Spawn {
            tool: "virsh",
            source,
        })?;
        if !output.status.success() {
            return Err(RuntimeError::Rejected {
                operation,
                name: name.to_owned(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn submit(
        &self,
        operation: &'static str,
        subcommand: &str,
        descriptor: &str,
    ) -> Result<(), RuntimeError> {
        let name = descriptor_name(descriptor)?;
        let mut file = NamedTempFile::new()?;
        file.write_all(descriptor.as_bytes())?;
        file.flush()?;

        let mut cmd = self.command(&[subcommand]);
        cmd.arg(file.path());
        self.run(operation, &name, cmd)?;
        Ok(())
    }
}

impl ControlPlane for Virsh {
    fn name(&self) -> &'static str {
        "virsh"
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn available(&self) -> bool {
        matches!(self.command(&["uri"]).output(), Ok(o) if o.status.success())
    }

    fn create_domain(&self, descriptor: &str) -> Result<(), RuntimeError> {
        self.submit("create", "create", descriptor)
    }

    fn create_network(&self, descriptor: &str) -> Result<(), RuntimeError> {
        self.submit("net-create", "net-create", descriptor)
    }

    fn domain_descriptor(&self, domain: &str) -> Result<String, RuntimeError> {
        self.run("dumpxml", domain, self.command(&["dumpxml", domain]))
    }

    fn destroy_domain(&self, domain: &str) -> Result<(), RuntimeError> {
        self.run("destroy", domain, self.command(&["destroy", domain]))?;
        Ok(())
    }

    fn destroy_network(&self, network: &str) -> Result<(), RuntimeError> {
        self.run("net-destroy", network, self.command(&["net-destroy", network]))?;
        Ok(())
    }

    fn network_leases(&self, network: &str) -> Result<Vec<DhcpLease>, RuntimeError> {
        let table = self.run(
            "net-dhcp-leases",
            network,
            self.command(&["net-dhcp-leases", network]),
        )?;
        parse_lease_table(network, &table)
    }

    fn send_key(&self, domain: &str, keycode: u16) -> Result<(), RuntimeError> {
        let code = keycode.to_string();
        self.run(
            "send-key",
            domain,
            self.command(&["send-key", domain, "--codeset", "linux", &code]),
        )?;
        Ok(())
    }

    fn list_domains(&self) -> Result<Vec<String>, RuntimeError> {
        let out = self.run("list", &self.uri, self.command(&["list", "--name"]))?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }
}
