//! Queries over live domain descriptors returned by the control-plane.

use crate::RuntimeError;
use roxmltree::{Document, Node};
use std::path::PathBuf;

fn parse(xml: &str) -> Result<Document<'_>, RuntimeError> {
    Document::parse(xml).map_err(|e| RuntimeError::DescriptorParse(e.to_string()))
}

fn child<'a, 'i>(node: Node<'a, 'i>, tag: &str) -> Option<Node<'a, 'i>> {
    node.children().find(|n| n.has_tag_name(tag))
}

/// Text of the top-level `<name>` element.
pub fn descriptor_name(xml: &str) -> Result<String, RuntimeError> {
    let doc = parse(xml)?;
    child(doc.root_element(), "name")
        .and_then(|n| n.text())
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RuntimeError::DescriptorParse("descriptor has no <name>".to_owned()))
}

/// MAC address of the interface attached to `network`.
pub fn interface_mac(xml: &str, network: &str) -> Result<Option<String>, RuntimeError> {
    let doc = parse(xml)?;
    let mac = doc
        .descendants()
        .filter(|n| n.has_tag_name("interface"))
        .find(|iface| {
            child(*iface, "source").and_then(|s| s.attribute("network")) == Some(network)
        })
        .and_then(|iface| child(iface, "mac"))
        .and_then(|mac| mac.attribute("address"))
        .map(str::to_ascii_lowercase);
    Ok(mac)
}

/// Host PTY backing the serial port whose target port is `port`.
pub fn serial_pty(xml: &str, port: usize) -> Result<Option<PathBuf>, RuntimeError> {
    let doc = parse(xml)?;
    let port = port.to_string();
    let path = doc
        .descendants()
        .filter(|n| n.has_tag_name("serial"))
        .find(|serial| {
            child(*serial, "target").and_then(|t| t.attribute("port")) == Some(port.as_str())
        })
        .and_then(|serial| child(serial, "source"))
        .and_then(|source| source.attribute("path"))
        .map(PathBuf::from);
    Ok(path)
}
