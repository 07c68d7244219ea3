use crate::identity::{IdentitySource, RandomIdentity};
use crate::retry::RetryPolicy;
use crate::CoreError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;
use vmlab_runtime::{
    select_backend, ControlPlane, IpRoute, RouteSource, RuntimeError, StaticRoutes,
};
use vmlab_schema::Settings;
use vmlab_store::{CloneLayout, CloneStore, ImageTool, QemuImg, RecordingImageTool};

type Connector = Box<dyn Fn(&str) -> Result<Arc<dyn ControlPlane>, RuntimeError> + Send + Sync>;

/// Context every orchestration call runs in.
///
/// Holds at most one control-plane connection per endpoint URI, opened on
/// first use and closed when the session is dropped, along with the clone
/// store, the retry policy and the sources of identities and host routes.
pub struct Session {
    default_uri: String,
    connector: Connector,
    connections: Mutex<HashMap<String, Arc<dyn ControlPlane>>>,
    identities: Arc<dyn IdentitySource>,
    routes: Arc<dyn RouteSource>,
    clones: CloneStore,
    retry: RetryPolicy,
    keystroke_delay: Duration,
}

impl Session {
    /// Session for a named backend (`virsh` or `mock`) configured from
    /// manifest settings.
    ///
    /// The mock backend also swaps `qemu-img` and the host route table for
    /// in-process stand-ins, so nothing on the host is touched.
    pub fn new(backend: &str, settings: &Settings) -> Result<Self, CoreError> {
        // Reject unknown backends before any connection is attempted.
        select_backend(backend, &settings.uri)?;

        let (tool, routes): (Arc<dyn ImageTool>, Arc<dyn RouteSource>) =
            if backend == "mock" {
                (
                    Arc::new(RecordingImageTool::new()),
                    Arc::new(StaticRoutes::default()),
                )
            } else {
                (Arc::new(QemuImg::new()), Arc::new(IpRoute))
            };

        let backend = backend.to_owned();
        let connector: Connector =
            Box::new(move |uri| select_backend(&backend, uri).map(Arc::from));
        Ok(Self {
            default_uri: settings.uri.clone(),
            connector,
            connections: Mutex::new(HashMap::new()),
            identities: Arc::new(RandomIdentity),
            routes,
            clones: CloneStore::new(CloneLayout::new(&settings.clone_dir), tool),
            retry: RetryPolicy::from_settings(settings),
            keystroke_delay: Duration::from_millis(settings.keystroke_delay_ms),
        })
    }

    /// Session whose every endpoint resolves to `control_plane`.
    pub fn with_control_plane(
        control_plane: Arc<dyn ControlPlane>,
        clone_dir: impl Into<PathBuf>,
        tool: Arc<dyn ImageTool>,
    ) -> Self {
        let settings = Settings::default();
        let default_uri = control_plane.uri().to_owned();
        Self {
            default_uri,
            connector: Box::new(move |_| Ok(Arc::clone(&control_plane))),
            connections: Mutex::new(HashMap::new()),
            identities: Arc::new(RandomIdentity),
            routes: Arc::new(StaticRoutes::default()),
            clones: CloneStore::new(CloneLayout::new(clone_dir), tool),
            retry: RetryPolicy::from_settings(&settings),
            keystroke_delay: Duration::from_millis(settings.keystroke_delay_ms),
        }
    }

    #[must_use]
    pub fn with_identities(mut self, identities: Arc<dyn IdentitySource>) -> Self {
        self.identities = identities;
        self
    }

    #[must_use]
    pub fn with_routes(mut self, routes: Arc<dyn RouteSource>) -> Self {
        self.routes = routes;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_keystroke_delay(mut self, delay: Duration) -> Self {
        self.keystroke_delay = delay;
        self
    }

    pub fn default_uri(&self) -> &str {
        &self.default_uri
    }

    /// Connection to `uri` (or the default endpoint), opened on first use.
    pub fn connect(&self, uri: Option<&str>) -> Result<Arc<dyn ControlPlane>, CoreError> {
        let uri = uri.unwrap_or(&self.default_uri);
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = connections.get(uri) {
            return Ok(Arc::clone(conn));
        }

        let conn = (self.connector)(uri)?;
        if !conn.available() {
            return Err(RuntimeError::BackendUnavailable(uri.to_owned()).into());
        }
        debug!("opened {} connection to {uri}", conn.name());
        connections.insert(uri.to_owned(), Arc::clone(&conn));
        Ok(conn)
    }

    pub fn open_connections(&self) -> usize {
        self.connections
            .lock()
            .map(|c| c.len())
            .unwrap_or_default()
    }

    pub fn identities(&self) -> &dyn IdentitySource {
        self.identities.as_ref()
    }

    pub fn routes(&self) -> &dyn RouteSource {
        self.routes.as_ref()
    }

    pub fn clones(&self) -> &CloneStore {
        &self.clones
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn keystroke_delay(&self) -> Duration {
        self.keystroke_delay
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("default_uri", &self.default_uri)
            .field("clones", &self.clones)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmlab_runtime::MockControlPlane;

    #[test]
    fn connections_are_cached_per_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            clone_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let session = Session::new("mock", &settings).unwrap();
        let a = session.connect(None).unwrap();
        let b = session.connect(Some("qemu:///system")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = session.connect(Some("test:///other")).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(session.open_connections(), 2);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(matches!(
            Session::new("hyperv", &Settings::default()),
            Err(CoreError::Runtime(RuntimeError::BackendUnavailable(_)))
        ));
    }

    #[test]
    fn settings_flow_into_session() {
        let settings = Settings {
            retry_attempts: 4,
            retry_interval_secs: 0,
            keystroke_delay_ms: 5,
            ..Settings::default()
        };
        let session = Session::new("mock", &settings).unwrap();
        assert_eq!(session.retry(), RetryPolicy::immediate(4));
        assert_eq!(session.keystroke_delay(), Duration::from_millis(5));
        assert_eq!(session.default_uri(), "qemu:///system");
    }

    #[test]
    fn injected_control_plane_serves_every_uri() {
        let dir = tempfile::tempdir().unwrap();
        let mock: Arc<dyn ControlPlane> = Arc::new(MockControlPlane::new());
        let session = Session::with_control_plane(
            Arc::clone(&mock),
            dir.path(),
            Arc::new(RecordingImageTool::new()),
        );
        let conn = session.connect(Some("anything:///")).unwrap();
        assert!(Arc::ptr_eq(&conn, &mock));
        assert_eq!(session.default_uri(), "test:///default");
    }
}
