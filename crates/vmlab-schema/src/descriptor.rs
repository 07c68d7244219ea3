//! libvirt domain and network descriptors.
//!
//! Devices render their own fragments; `render_domain` embeds the fragments in
//! the hardware profile's platform description (controllers, display, input)
//! and the machine identity. `render_network` produces a NAT-less or NAT
//! bridge with a DHCP range covering `.2`..`.254` of the lab subnet.

use crate::devices::{disk_target_name, AdapterModel, DiskBus};
use crate::hardware::HardwareProfile;
use crate::subnet::LabSubnet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name and UUID assigned to a machine or network for one creation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uuid: Uuid,
    pub name: String,
}

/// Escape text for use in XML attribute values and element content.
pub fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn path_text(path: &Path) -> String {
    xml_escape(&path.to_string_lossy())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskFragment {
    pub live_path: PathBuf,
    pub bus: DiskBus,
    pub slot: usize,
    pub boot_order: u32,
}

pub fn render_disk(disk: &DiskFragment) -> String {
    format!(
        "<disk type='file' device='disk'>\
<driver name='qemu' type='qcow2'/>\
<source file='{source}'/>\
<target dev='{dev}' bus='{bus}'/>\
<boot order='{boot}'/>\
</disk>",
        source = path_text(&disk.live_path),
        dev = disk_target_name(disk.bus, disk.slot),
        bus = disk.bus.as_str(),
        boot = disk.boot_order,
    )
}

pub fn render_serial(slot: usize) -> String {
    format!(
        "<serial type='pty'>\
<target type='isa-serial' port='{slot}'>\
<model name='isa-serial'/>\
</target>\
</serial>"
    )
}

pub fn render_interface(network: &str, model: AdapterModel, boot_order: Option<u32>) -> String {
    let mut xml = format!(
        "<interface type='network'>\
<source network='{}'/>\
<model type='{}'/>",
        xml_escape(network),
        model.as_str()
    );
    if let Some(order) = boot_order {
        let _ = write!(xml, "<boot order='{order}'/>");
    }
    xml.push_str("</interface>");
    xml
}

const PLATFORM_DEVICES: &str = "<video><model type='vga'/></video>\
<graphics type='vnc' port='-1'/>\
<controller type='sata' index='0'>\
<address type='pci' domain='0x0000' bus='0x00' slot='0x1f' function='0x2'/>\
</controller>\
<controller type='pci' index='0' model='pcie-root'/>\
<input type='mouse' bus='ps2'/>\
<input type='keyboard' bus='ps2'/>";

const ROOT_PORTS: u32 = 5;

fn root_ports() -> String {
    let mut xml = String::new();
    for index in 1..=ROOT_PORTS {
        let function = index - 1;
        let multifunction = if index == 1 { " multifunction='on'" } else { "" };
        let _ = write!(
            xml,
            "<controller type='pci' index='{index}' model='pcie-root-port'>\
<model name='pcie-root-port'/>\
<target chassis='{index}' port='0x{port:x}'/>\
<address type='pci' domain='0x0000' bus='0x00' slot='0x02' function='0x{function:x}'{multifunction}/>\
</controller>",
            port = 0x10 + function,
        );
    }
    xml
}

/// Full domain descriptor for a machine.
///
/// `nvram` is the live path of the machine's firmware variable store, if any.
pub fn render_domain(
    identity: &Identity,
    profile: &HardwareProfile,
    nvram: Option<&Path>,
    devices_xml: &str,
) -> String {
    let mut firmware = String::new();
    if let Some(ref efi) = profile.efi_image {
        let _ = write!(
            firmware,
            "<loader readonly='yes' type='pflash'>{}</loader>",
            path_text(efi)
        );
    }
    if let Some(nvram) = nvram {
        let _ = write!(firmware, "<nvram>{}</nvram>", path_text(nvram));
    }

    let arch = xml_escape(&profile.arch);
    format!(
        "<domain type='kvm'>\
<name>{name}</name>\
<uuid>{uuid}</uuid>\
<memory unit='MiB'>{ram}</memory>\
<currentMemory unit='MiB'>{ram}</currentMemory>\
<vcpu placement='static'>{cpus}</vcpu>\
<os><type arch='{arch}' machine='{chipset}'>hvm</type>{firmware}</os>\
<features><acpi/><apic/><vmport state='off'/></features>\
<cpu mode='host-passthrough' check='none' migratable='on'/>\
<clock offset='utc'>\
<timer name='rtc' tickpolicy='catchup'/>\
<timer name='pit' tickpolicy='delay'/>\
<timer name='hpet' present='no'/>\
</clock>\
<devices>\
<emulator>/usr/bin/qemu-system-{arch}</emulator>\
{devices_xml}{platform}{ports}\
</devices>\
</domain>",
        name = xml_escape(&identity.name),
        uuid = identity.uuid,
        ram = profile.ram_mib,
        cpus = profile.cpu_count,
        chipset = xml_escape(&profile.chipset),
        platform = PLATFORM_DEVICES,
        ports = root_ports(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetbootConfig {
    pub root: PathBuf,
    pub boot_file: String,
}

#[derive(Debug, Clone)]
pub struct NetworkDescriptor<'a> {
    pub identity: &'a Identity,
    pub subnet: LabSubnet,
    pub internet: bool,
    pub netboot: Option<&'a NetbootConfig>,
}

/// Network descriptor for a lab bridge.
///
/// dnsmasq normally pings an address before leasing it; the lab owns the
/// whole subnet so `no-ping` is always set.
pub fn render_network(net: &NetworkDescriptor<'_>) -> String {
    let name = xml_escape(&net.identity.name);
    let forward = if net.internet {
        "<forward mode='nat'/>"
    } else {
        ""
    };
    let (tftp, bootp) = match net.netboot {
        Some(boot) => (
            format!("<tftp root='{}'/>", path_text(&boot.root)),
            format!("<bootp file='{}'/>", xml_escape(&boot.boot_file)),
        ),
        None => (String::new(), String::new()),
    };

    format!(
        "<network xmlns:dnsmasq='http://libvirt.org/schemas/network/dnsmasq/1.0'>\
<name>{name}</name>\
<uuid>{uuid}</uuid>\
<bridge name='{name}' stp='off' delay='0'/>\
{forward}\
<ip address='{gateway}' netmask='255.255.255.0'>\
{tftp}\
<dhcp><range start='{start}' end='{end}'/>{bootp}</dhcp>\
</ip>\
<dnsmasq:options><dnsmasq:option value='no-ping'/></dnsmasq:options>\
</network>",
        uuid = net.identity.uuid,
        gateway = net.subnet.gateway(),
        start = net.subnet.dhcp_start(),
        end = net.subnet.dhcp_end(),
    )
}
