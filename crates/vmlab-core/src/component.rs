//! Typed queries over a machine's component list.
//!
//! Components are compared by identity, not value: two disks built from the
//! same image are still two components. Every query preserves list order and
//! never mutates the list.

use crate::device::NetworkInterface;
use std::fmt;
use vmlab_schema::{Disk, FirmwareImage, HardwareProfile, SerialPort};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Hardware,
    Disk,
    Firmware,
    Serial,
    Interface,
}

#[derive(Debug, Clone)]
pub enum Component {
    Hardware(HardwareProfile),
    Disk(Disk),
    Firmware(FirmwareImage),
    Serial(SerialPort),
    Interface(NetworkInterface),
}

impl Component {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Hardware(_) => Kind::Hardware,
            Self::Disk(_) => Kind::Disk,
            Self::Firmware(_) => Kind::Firmware,
            Self::Serial(_) => Kind::Serial,
            Self::Interface(_) => Kind::Interface,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Hardware(c) => c.label.as_deref(),
            Self::Disk(c) => c.label(),
            Self::Firmware(c) => c.label(),
            Self::Serial(c) => c.label(),
            Self::Interface(c) => c.label(),
        }
    }

    /// Devices take part in materialization; the hardware profile does not.
    pub fn is_device(&self) -> bool {
        !matches!(self, Self::Hardware(_))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware(c) => fmt::Display::fmt(c, f),
            Self::Disk(c) => fmt::Display::fmt(c, f),
            Self::Firmware(c) => fmt::Display::fmt(c, f),
            Self::Serial(c) => fmt::Display::fmt(c, f),
            Self::Interface(c) => fmt::Display::fmt(c, f),
        }
    }
}

/// A concrete component type that can be pulled out of a `Component`.
pub trait ComponentKind {
    const KIND: Kind;

    fn from_component(component: &Component) -> Option<&Self>;
}

macro_rules! component_kind {
    ($ty:ty, $variant:ident) => {
        impl ComponentKind for $ty {
            const KIND: Kind = Kind::$variant;

            fn from_component(component: &Component) -> Option<&Self> {
                match component {
                    Component::$variant(c) => Some(c),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Component {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        }
    };
}

component_kind!(HardwareProfile, Hardware);
component_kind!(Disk, Disk);
component_kind!(FirmwareImage, Firmware);
component_kind!(SerialPort, Serial);
component_kind!(NetworkInterface, Interface);

pub fn all_of<T: ComponentKind>(components: &(impl AsRef<[Component]> + ?Sized)) -> Vec<&T> {
    components
        .as_ref()
        .iter()
        .filter_map(T::from_component)
        .collect()
}

pub fn first_of<T: ComponentKind>(components: &(impl AsRef<[Component]> + ?Sized)) -> Option<&T> {
    components.as_ref().iter().find_map(T::from_component)
}

/// First component of kind `T` carrying `label`.
pub fn by_label<'a, T: ComponentKind>(
    components: &'a (impl AsRef<[Component]> + ?Sized),
    label: &str,
) -> Option<&'a T> {
    components
        .as_ref()
        .iter()
        .filter(|c| c.label() == Some(label))
        .find_map(T::from_component)
}

/// Zero-based position of `item` among the components of its kind.
///
/// `item` must be the very component stored in the list; an equal copy is
/// not found.
pub fn slot_of<T: ComponentKind>(
    components: &(impl AsRef<[Component]> + ?Sized),
    item: &T,
) -> Option<usize> {
    all_of::<T>(components)
        .into_iter()
        .position(|c| std::ptr::eq(c, item))
}
