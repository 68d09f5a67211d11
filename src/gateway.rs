//! Loopback transport gateway.
//!
//! The gateway owns three listeners: static assets, the push channel and the
//! request/response API. It moves Disabled → Starting → Listening and back.
//! Each endpoint binds independently; one that fails to bind stays down while
//! the others serve.

use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::activity::SharedActivityLog;
use crate::config::{Config, PortConfig, Settings, SettingsStore};
use crate::core::{HistoryStore, SharedBroadcaster};
use crate::error::GatewayError;
use crate::server;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listener host and ports
    pub ports: PortConfig,
    /// Shared secret for the API and push channel
    pub token: String,
    /// Directory served by the static endpoint
    pub web_root: Option<PathBuf>,
}

impl GatewayConfig {
    pub fn new(ports: PortConfig, token: impl Into<String>) -> Self {
        Self {
            ports,
            token: token.into(),
            web_root: None,
        }
    }

    pub fn with_web_root(mut self, web_root: Option<PathBuf>) -> Self {
        self.web_root = web_root;
        self
    }

    /// Build from the app config, creating the token file on first use.
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let token = load_or_create_token(&config.token_path())?;
        Ok(Self::new(config.gateway.clone(), token).with_web_root(config.web_root.clone()))
    }

    /// Base URL of one endpoint on its configured port.
    pub fn url(&self, kind: EndpointKind) -> String {
        format!("http://{}:{}", self.ports.host, kind.port(&self.ports))
    }
}

/// Read the token at `path`, or write a fresh one there.
pub fn load_or_create_token(path: &Path) -> Result<String, GatewayError> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let token = existing.trim();
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }

    let token = uuid::Uuid::new_v4().simple().to_string();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            GatewayError::Config(format!("Failed to create {parent:?}: {e}"))
        })?;
    }
    std::fs::write(path, &token)
        .map_err(|e| GatewayError::Config(format!("Failed to write token to {path:?}: {e}")))?;
    info!("Generated new gateway token at {:?}", path);
    Ok(token)
}

/// The three gateway listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Static,
    Push,
    Api,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 3] = [EndpointKind::Static, EndpointKind::Push, EndpointKind::Api];

    pub fn name(self) -> &'static str {
        match self {
            EndpointKind::Static => "static",
            EndpointKind::Push => "push",
            EndpointKind::Api => "api",
        }
    }

    pub fn port(self, ports: &PortConfig) -> u16 {
        match self {
            EndpointKind::Static => ports.static_port,
            EndpointKind::Push => ports.push_port,
            EndpointKind::Api => ports.api_port,
        }
    }
}

/// Lifecycle state of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayState {
    Disabled,
    Starting,
    Listening,
}

/// Outcome for one endpoint after `enable`.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub kind: EndpointKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub state: GatewayState,
    pub endpoints: Vec<EndpointStatus>,
    pub remote_subscribers: usize,
}

impl GatewayStatus {
    pub fn addr(&self, kind: EndpointKind) -> Option<SocketAddr> {
        self.endpoints
            .iter()
            .find(|e| e.kind == kind)
            .and_then(|e| e.addr)
    }
}

/// Shared services the endpoints serve from.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<HistoryStore>,
    pub broadcaster: SharedBroadcaster,
    pub settings: Arc<SettingsStore>,
    pub activity: SharedActivityLog,
}

struct RunningEndpoint {
    kind: EndpointKind,
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    state: GatewayState,
    running: Vec<RunningEndpoint>,
    failures: Vec<(EndpointKind, String)>,
}

/// Toggle-able HTTP/WebSocket surface over the store and broadcaster.
pub struct TransportGateway {
    config: GatewayConfig,
    services: Services,
    inner: Mutex<Inner>,
    /// Serializes enable/disable. `inner` is only held briefly.
    transition: Mutex<()>,
    this: Weak<TransportGateway>,
}

impl TransportGateway {
    pub fn new(config: GatewayConfig, services: Services) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            services,
            inner: Mutex::new(Inner {
                state: GatewayState::Disabled,
                running: Vec::new(),
                failures: Vec::new(),
            }),
            transition: Mutex::new(()),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub async fn state(&self) -> GatewayState {
        self.inner.lock().await.state
    }

    pub async fn status(&self) -> GatewayStatus {
        let inner = self.inner.lock().await;
        self.status_locked(&inner)
    }

    fn status_locked(&self, inner: &Inner) -> GatewayStatus {
        let mut endpoints: Vec<EndpointStatus> = inner
            .running
            .iter()
            .map(|r| EndpointStatus {
                kind: r.kind,
                addr: Some(r.addr),
                error: None,
            })
            .collect();
        endpoints.extend(inner.failures.iter().map(|(kind, reason)| EndpointStatus {
            kind: *kind,
            addr: None,
            error: Some(reason.clone()),
        }));
        endpoints.sort_by_key(|e| EndpointKind::ALL.iter().position(|k| *k == e.kind));

        GatewayStatus {
            state: inner.state,
            endpoints,
            remote_subscribers: self
                .services
                .broadcaster
                .count(crate::core::SubscriberKind::Remote),
        }
    }

    /// Bind all three endpoints. Returns the current status when already
    /// listening. Fails only when no endpoint could be bound.
    pub async fn enable(&self) -> Result<GatewayStatus, GatewayError> {
        let _transition = self.transition.lock().await;
        {
            let mut inner = self.inner.lock().await;
            if inner.state == GatewayState::Listening {
                return Ok(self.status_locked(&inner));
            }
            inner.state = GatewayState::Starting;
            inner.failures.clear();
        }

        let state = Arc::new(server::ServerState::new(
            self.services.clone(),
            self.config.token.clone(),
            self.this.clone(),
        ));

        let mut running = Vec::new();
        let mut failures = Vec::new();
        for kind in EndpointKind::ALL {
            let bound = self.bind(kind).await.and_then(|listener| {
                let addr = listener.local_addr().map_err(|e| GatewayError::Bind {
                    endpoint: kind.name(),
                    port: kind.port(&self.config.ports),
                    reason: e.to_string(),
                })?;
                Ok((listener, addr))
            });
            match bound {
                Ok((listener, addr)) => {
                    let app = server::router(kind, state.clone(), self.config.web_root.as_deref());
                    let (shutdown, shutdown_rx) = oneshot::channel();
                    let task = tokio::spawn(server::serve(kind, listener, app, shutdown_rx));
                    info!("Gateway {} endpoint listening on http://{}", kind.name(), addr);
                    running.push(RunningEndpoint {
                        kind,
                        addr,
                        shutdown,
                        task,
                    });
                }
                Err(e) => {
                    warn!("{}", e);
                    failures.push((kind, e.to_string()));
                }
            }
        }

        let mut inner = self.inner.lock().await;
        inner.failures = failures;
        if running.is_empty() {
            inner.state = GatewayState::Disabled;
            return Err(GatewayError::NoEndpoints);
        }
        inner.running = running;
        inner.state = GatewayState::Listening;
        Ok(self.status_locked(&inner))
    }

    async fn bind(&self, kind: EndpointKind) -> Result<TcpListener, GatewayError> {
        let port = kind.port(&self.config.ports);
        TcpListener::bind((self.config.ports.host.as_str(), port))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AddrInUse => GatewayError::PortInUse {
                    endpoint: kind.name(),
                    port,
                },
                _ => GatewayError::Bind {
                    endpoint: kind.name(),
                    port,
                    reason: e.to_string(),
                },
            })
    }

    /// Close every endpoint and drop remote subscribers. Returns whether the
    /// gateway was running.
    pub async fn disable(&self) -> bool {
        let _transition = self.transition.lock().await;
        let running = {
            let mut inner = self.inner.lock().await;
            if inner.state == GatewayState::Disabled {
                return false;
            }
            inner.state = GatewayState::Disabled;
            inner.failures.clear();
            std::mem::take(&mut inner.running)
        };

        let mut tasks = Vec::with_capacity(running.len());
        for endpoint in running {
            let _ = endpoint.shutdown.send(());
            tasks.push((endpoint.kind, endpoint.task));
        }

        // Closing the queues ends every push connection, which lets the
        // push listener finish its graceful shutdown.
        let dropped = self.services.broadcaster.drop_remote();
        debug!(dropped, "Remote subscribers dropped");

        for (kind, mut task) in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("{} endpoint did not stop in time, aborting", kind.name());
                task.abort();
            }
        }
        self.services.broadcaster.drop_remote();

        info!("Gateway disabled");
        true
    }

    /// Persist the web-access flag, announce the new settings and drive the
    /// gateway to match.
    ///
    /// Disabling runs on its own task: the caller may be a request served by
    /// one of the listeners being torn down. Await [`disable`](Self::disable)
    /// afterwards to wait for it.
    pub async fn set_web_access(&self, enabled: bool) -> Result<Settings, GatewayError> {
        let settings = self.services.settings.set_web_access(enabled)?;
        self.services.broadcaster.publish_settings(settings.clone());

        if enabled {
            self.enable().await?;
        } else if let Some(gateway) = self.this.upgrade() {
            tokio::spawn(async move {
                gateway.disable().await;
            });
        }
        Ok(settings)
    }
}
