use std::fmt;
use std::process::Command;

/// A missing host tool with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

pub fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

struct Tool {
    name: &'static str,
    purpose: &'static str,
    install_hint: &'static str,
}

const CORE_TOOLS: &[Tool] = &[
    Tool {
        name: "virsh",
        purpose: "creating and destroying machines and networks",
        install_hint: "zypper install libvirt-client | apt install libvirt-clients | dnf install libvirt-client | pacman -S libvirt",
    },
    Tool {
        name: "qemu-img",
        purpose: "linked clones of disk images",
        install_hint: "zypper install qemu-tools | apt install qemu-utils | dnf install qemu-img | pacman -S qemu-img",
    },
    Tool {
        name: "ip",
        purpose: "host route lookup for subnet allocation",
        install_hint: "part of iproute2 (usually pre-installed)",
    },
];

const INTERACTIVE_TOOLS: &[Tool] = &[
    Tool {
        name: "virt-manager",
        purpose: "graphical machine console",
        install_hint: "zypper install virt-manager | apt install virt-manager | dnf install virt-manager | pacman -S virt-manager",
    },
    Tool {
        name: "picocom",
        purpose: "serial port terminal",
        install_hint: "zypper install picocom | apt install picocom | dnf install picocom | pacman -S picocom",
    },
    Tool {
        name: "wireshark",
        purpose: "packet capture on lab networks",
        install_hint: "zypper install wireshark | apt install wireshark | dnf install wireshark | pacman -S wireshark-qt",
    },
];

fn missing_from(tools: &[Tool], exists: impl Fn(&str) -> bool) -> Vec<MissingPrereq> {
    tools
        .iter()
        .filter(|t| !exists(t.name))
        .map(|t| MissingPrereq {
            name: t.name,
            purpose: t.purpose,
            install_hint: t.install_hint,
        })
        .collect()
}

/// Tools every lab needs. Empty means all are present.
pub fn check_core_prereqs() -> Vec<MissingPrereq> {
    missing_from(CORE_TOOLS, command_exists)
}

/// Tools needed only for consoles, terminals and packet capture.
pub fn check_tool_prereqs() -> Vec<MissingPrereq> {
    missing_from(INTERACTIVE_TOOLS, command_exists)
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nvmlab drives libvirt and qemu-img through these tools.");
    msg
}
