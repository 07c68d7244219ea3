//! Orchestration of vmlab machines and networks.
//!
//! This crate ties the schema, clone store and control-plane together: a
//! `Session` holds one connection per endpoint plus the identity, route and
//! retry configuration; `Machine` and `VirtualNetwork` are reference-counted
//! handles whose first acquisition creates the resource (with bounded retry
//! and rollback of partially materialized devices) and whose last release
//! tears it down. `Lab` assembles both from a TOML manifest.

pub mod component;
pub mod device;
pub mod identity;
pub mod keys;
pub mod lab;
pub mod lifecycle;
pub mod machine;
pub mod network;
pub mod resolve;
pub mod retry;
pub mod session;
pub mod signal;

pub use component::{all_of, by_label, first_of, slot_of, Component, ComponentKind, Kind};
pub use device::{Materialized, NetworkInterface};
pub use identity::{
    allocate, IdentitySource, RandomIdentity, MACHINE_PREFIX, MAX_NAME_LEN, NETWORK_PREFIX,
};
pub use keys::{encode_text, send_text};
pub use lab::{InterfaceSummary, Lab, MachineSummary, NetworkSummary};
pub use lifecycle::{validate_transition, ResourceState};
pub use machine::Machine;
pub use network::{NetworkConfig, VirtualNetwork};
pub use retry::RetryPolicy;
pub use session::Session;
pub use signal::{install_signal_handler, shutdown_requested};

use thiserror::Error;
use vmlab_schema::LabSubnet;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] vmlab_schema::ManifestError),
    #[error("invalid component: {0}")]
    Schema(#[from] vmlab_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] vmlab_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] vmlab_runtime::RuntimeError),
    #[error("subnet {0} overlaps a host route")]
    SubnetConflict(LabSubnet),
    #[error("network for interface could not be created: {0}")]
    NetworkUnavailable(Box<CoreError>),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("'{0}' is not live")]
    NotLive(String),
    #[error("component does not belong to machine {0}")]
    ForeignComponent(String),
    #[error("no {what} found for {owner}")]
    NotAttached { what: &'static str, owner: String },
    #[error("interrupted")]
    Interrupted,
    #[error("character {0:?} has no keycode")]
    UnmappedKey(char),
}

impl CoreError {
    /// Whether a creation attempt that failed with this error should be
    /// retried with a fresh identity.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Runtime(e) => e.is_transient(),
            Self::SubnetConflict(_) => true,
            _ => false,
        }
    }
}
