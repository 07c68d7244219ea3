//! Reference-counted virtual machines.
//!
//! A `Machine` is an ordered list of components. The first `acquire` creates
//! the domain: every attempt draws a fresh identity, materializes the devices
//! in component order and submits the rendered descriptor. A transient
//! rejection rolls back that attempt's devices before the next one starts, so
//! a failed acquisition leaves no clones and no extra network references.
//! The last `release` destroys the domain and releases its devices.

use crate::component::{first_of, slot_of, Component, ComponentKind};
use crate::device::{release_all, Materialized, Materializer};
use crate::identity::{allocate, MACHINE_PREFIX};
use crate::keys::send_text;
use crate::lifecycle::{validate_transition, ResourceState};
use crate::session::Session;
use crate::CoreError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vmlab_runtime::{tools, ControlPlane};
use vmlab_schema::{render_domain, HardwareProfile, Identity, SerialPort};

#[derive(Debug)]
struct MachineState {
    uri: Option<String>,
    label: Option<String>,
    refcount: usize,
    state: ResourceState,
    identity: Option<Identity>,
    devices: Vec<Materialized>,
}

#[derive(Debug)]
struct Shared {
    components: Vec<Component>,
    state: Mutex<MachineState>,
}

/// Shared handle to one machine. Clones refer to the same machine.
#[derive(Debug, Clone)]
pub struct Machine {
    shared: Arc<Shared>,
}

impl Machine {
    /// A machine built from `components`. A default hardware profile is
    /// added when none is given; any profile after the first is ignored.
    pub fn new(components: impl IntoIterator<Item = Component>) -> Self {
        let mut components: Vec<Component> = components.into_iter().collect();
        if first_of::<HardwareProfile>(&components).is_none() {
            components.push(HardwareProfile::default().into());
        }
        Self {
            shared: Arc::new(Shared {
                components,
                state: Mutex::new(MachineState {
                    uri: None,
                    label: None,
                    refcount: 0,
                    state: ResourceState::Defined,
                    identity: None,
                    devices: Vec::new(),
                }),
            }),
        }
    }

    /// Endpoint to create the domain on instead of the session default.
    #[must_use]
    pub fn with_uri(self, uri: &str) -> Self {
        self.lock().uri = Some(uri.to_owned());
        self
    }

    #[must_use]
    pub fn with_label(self, label: &str) -> Self {
        self.lock().label = Some(label.to_owned());
        self
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn components(&self) -> &[Component] {
        &self.shared.components
    }

    pub fn hardware(&self) -> Option<&HardwareProfile> {
        first_of(self)
    }

    pub fn label(&self) -> Option<String> {
        self.lock().label.clone()
    }

    pub fn uri(&self) -> Option<String> {
        self.lock().uri.clone()
    }

    pub fn refcount(&self) -> usize {
        self.lock().refcount
    }

    pub fn state(&self) -> ResourceState {
        self.lock().state
    }

    pub fn is_live(&self) -> bool {
        self.state() == ResourceState::Live
    }

    /// Domain name while live.
    pub fn name(&self) -> Option<String> {
        self.live_identity().map(|id| id.name)
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.live_identity().map(|id| id.uuid)
    }

    fn live_identity(&self) -> Option<Identity> {
        let state = self.lock();
        if state.state == ResourceState::Live {
            state.identity.clone()
        } else {
            None
        }
    }

    /// Identity and endpoint of the live domain.
    pub(crate) fn require_live(&self) -> Result<(Identity, Option<String>), CoreError> {
        let state = self.lock();
        match state.identity {
            Some(ref id) if state.state == ResourceState::Live => {
                Ok((id.clone(), state.uri.clone()))
            }
            _ => Err(CoreError::NotLive(display_name(&state))),
        }
    }

    pub(crate) fn owns<T: ComponentKind>(&self, item: &T) -> Result<usize, CoreError> {
        slot_of(self, item).ok_or_else(|| CoreError::ForeignComponent(self.to_string()))
    }

    /// Take a reference, creating the domain if this is the first one.
    pub fn acquire(&self, session: &Session) -> Result<(), CoreError> {
        let mut state = self.lock();
        state.refcount += 1;
        if state.refcount > 1 {
            debug!(
                "machine {} acquired (refs={})",
                display_name(&state),
                state.refcount
            );
            return Ok(());
        }

        let created = validate_transition(state.state, ResourceState::Live)
            .and_then(|()| self.create(session, state.uri.as_deref()));
        match created {
            Ok((identity, devices)) => {
                info!("machine {} is live", identity.name);
                state.identity = Some(identity);
                state.devices = devices;
                state.state = ResourceState::Live;
                Ok(())
            }
            Err(e) => {
                state.refcount -= 1;
                Err(e)
            }
        }
    }

    fn create(
        &self,
        session: &Session,
        uri: Option<&str>,
    ) -> Result<(Identity, Vec<Materialized>), CoreError> {
        let control_plane = session.connect(uri)?;
        // Held across retries so clone collection never sees a clone whose
        // domain is not live yet.
        let _store = session.clones().lock()?;
        session.retry().run("machine creation", |attempt| {
            let identity = allocate(session.identities(), MACHINE_PREFIX);
            let mut devices = Vec::new();
            match self.submit(session, control_plane.as_ref(), &identity, &mut devices) {
                Ok(()) => {
                    debug!("attempt {attempt}: created domain {}", identity.name);
                    Ok((identity, devices))
                }
                Err(e) => {
                    debug!(
                        "attempt {attempt}: rolling back {} devices of {}",
                        devices.len(),
                        identity.name
                    );
                    release_all(session, devices);
                    Err(e)
                }
            }
        })
    }

    /// One creation attempt. Devices materialized so far are left in
    /// `devices` for the caller to roll back on failure.
    fn submit(
        &self,
        session: &Session,
        control_plane: &dyn ControlPlane,
        identity: &Identity,
        devices: &mut Vec<Materialized>,
    ) -> Result<(), CoreError> {
        let components = self.components();
        let mut materializer = Materializer::new(session, &identity.name, components);
        for component in components {
            if let Some(device) = materializer.materialize(component)? {
                devices.push(device);
            }
        }

        let fragments: String = devices.iter().map(Materialized::render).collect();
        let nvram = devices.iter().find_map(Materialized::nvram);
        let profile = self.hardware().cloned().unwrap_or_default();
        let xml = render_domain(identity, &profile, nvram, &fragments);
        control_plane.create_domain(&xml)?;
        Ok(())
    }

    /// Drop a reference, destroying the domain and releasing its devices
    /// when none remain.
    ///
    /// Releasing an unheld machine does nothing. Teardown failures are
    /// logged, not returned.
    pub fn release(&self, session: &Session) {
        let mut state = self.lock();
        if state.refcount == 0 {
            debug!("release of unheld machine {} ignored", display_name(&state));
            return;
        }
        state.refcount -= 1;
        if state.refcount > 0 {
            debug!(
                "machine {} released (refs={})",
                display_name(&state),
                state.refcount
            );
            return;
        }
        if let Err(e) = validate_transition(state.state, ResourceState::TornDown) {
            warn!("machine {}: {e}", display_name(&state));
            return;
        }

        let name = display_name(&state);
        let destroyed = session
            .connect(state.uri.as_deref())
            .and_then(|cp| cp.destroy_domain(&name).map_err(CoreError::from));
        if let Err(e) = destroyed {
            warn!("failed to destroy domain {name}: {e}");
        }
        release_all(session, std::mem::take(&mut state.devices));
        state.state = ResourceState::TornDown;
        info!("machine {name} torn down");
    }

    /// Type `text` into the guest console using the session's keystroke
    /// delay.
    pub fn type_text(&self, session: &Session, text: &str) -> Result<(), CoreError> {
        let (identity, uri) = self.require_live()?;
        let control_plane = session.connect(uri.as_deref())?;
        send_text(
            control_plane.as_ref(),
            &identity.name,
            text,
            session.keystroke_delay(),
        )
    }

    /// Open the graphical console in the background and return its process
    /// id.
    pub fn console(&self, session: &Session) -> Result<u32, CoreError> {
        let (identity, uri) = self.require_live()?;
        let uri = uri.unwrap_or_else(|| session.default_uri().to_owned());
        let pid = tools::spawn_detached(tools::console_viewer(
            &uri,
            &identity.uuid.to_string(),
        ))?;
        info!("opened console for {} (pid {pid})", identity.name);
        Ok(pid)
    }

    /// Attach a terminal to a serial port and wait for it to exit.
    pub fn serial_terminal(&self, session: &Session, port: &SerialPort) -> Result<(), CoreError> {
        let pty = self.serial_pty(session, port)?;
        tools::run_interactive(tools::serial_terminal(&pty))?;
        Ok(())
    }
}

impl AsRef<[Component]> for Machine {
    fn as_ref(&self) -> &[Component] {
        self.components()
    }
}

impl PartialEq for Machine {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Machine {}

fn display_name(state: &MachineState) -> String {
    match (&state.identity, &state.label) {
        (Some(id), _) if state.state == ResourceState::Live => id.name.clone(),
        (_, Some(label)) => label.clone(),
        _ => "(unallocated)".to_owned(),
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, state) = {
            let state = self.lock();
            (display_name(&state), state.state)
        };
        write!(f, "Machine({name}, {state}) [")?;
        for (i, component) in self.components().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{component}")?;
        }
        f.write_str("]")
    }
}
