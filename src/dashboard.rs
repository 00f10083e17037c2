//! Dashboard session: wires the registry client, history loader, mutation
//! gateway, stream manager and operator session around one shared view.
//!
//! Every method takes `&self`, so one `Arc<Dashboard>` can be shared by the
//! view server's handlers.

use std::sync::{Arc, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::gateway::{DeviceList, MutationError, MutationGateway, MutationStatus, SharedDevices};
use crate::history::{BackfillOutcome, HistoryLoader};
use crate::merge::MergeRow;
use crate::models::{Device, DevicePatch, LatestSample, NewDevice, Reading};
use crate::registry::{RegistryClient, RegistryError};
use crate::session::{Session, SessionStore, SharedSession};
use crate::stream::{ConnectionManager, ConnectionState, Transport, WsTransport};
use crate::view::{lock_view, SharedView, ViewState};

// ---

pub struct Dashboard<T: Transport = WsTransport> {
    view: SharedView,
    registry: RegistryClient,
    history: HistoryLoader,
    gateway: MutationGateway,
    devices: SharedDevices,
    stream: ConnectionManager<T>,
    session: SharedSession,
    sessions: SessionStore,
}

impl Dashboard<WsTransport> {
    // ---
    pub fn new(cfg: &Config) -> Result<Self, RegistryError> {
        Self::with_transport(WsTransport::default(), cfg)
    }
}

impl<T: Transport> Dashboard<T> {
    // ---
    pub fn with_transport(transport: T, cfg: &Config) -> Result<Self, RegistryError> {
        // ---
        let registry = RegistryClient::new(&cfg.registry_url)?;
        let view = ViewState::shared(cfg.series_capacity);
        let devices = SharedDevices::default();
        let session = SharedSession::default();

        Ok(Self {
            history: HistoryLoader::new(registry.clone(), Arc::clone(&view), cfg.history_limit),
            gateway: MutationGateway::new(
                registry.clone(),
                Arc::clone(&session),
                Arc::clone(&devices),
            ),
            stream: ConnectionManager::new(transport, cfg.stream_settings(), Arc::clone(&view)),
            sessions: SessionStore::new(&cfg.session_file),
            registry,
            view,
            devices,
            session,
        })
    }

    pub fn view(&self) -> &SharedView {
        &self.view
    }

    // --- stream lifecycle

    /// Arm the stream manager.
    pub fn start(&self) {
        self.stream.start();
    }

    /// Disarm the stream manager. No reading is applied after this returns.
    pub fn shutdown(&self) {
        self.stream.stop();
    }

    pub fn stream_state(&self) -> ConnectionState {
        self.stream.state()
    }

    pub fn subscribe_latest(&self) -> watch::Receiver<Option<LatestSample>> {
        self.stream.subscribe_latest()
    }

    /// Reconnect so the new selection starts from a fresh connection.
    /// Nothing to do while the stream is not armed.
    fn restart_stream(&self) {
        if self.stream.is_armed() {
            self.stream.restart();
        }
    }

    // --- selection

    /// Add a device to the selection and backfill its history in the
    /// background. The handle resolves to the backfill outcome.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn select(&self, dev_eui: &str) -> JoinHandle<BackfillOutcome> {
        // ---
        let ticket = lock_view(&self.view).select(dev_eui);
        info!("Selected {}", dev_eui);
        self.restart_stream();

        let loader = self.history.clone();
        tokio::spawn(async move { loader.backfill(ticket).await })
    }

    /// Make `dev_eui` the only selected device.
    pub fn select_only(&self, dev_eui: &str) -> JoinHandle<BackfillOutcome> {
        // ---
        lock_view(&self.view).clear_selection();
        self.select(dev_eui)
    }

    /// Drop a device from the selection along with its series. Any backfill
    /// still in flight for it will be discarded.
    pub fn deselect(&self, dev_eui: &str) -> bool {
        // ---
        let was_selected = lock_view(&self.view).deselect(dev_eui);
        if was_selected {
            info!("Deselected {}", dev_eui);
            self.restart_stream();
        }
        was_selected
    }

    pub fn selected(&self) -> Vec<String> {
        lock_view(&self.view).selected()
    }

    // --- presentation

    pub fn chart(&self) -> Vec<MergeRow> {
        lock_view(&self.view).chart()
    }

    pub fn series(&self, dev_eui: &str) -> Vec<Reading> {
        lock_view(&self.view).series.get(dev_eui)
    }

    pub fn latest(&self, dev_eui: &str) -> Option<Reading> {
        lock_view(&self.view).latest(dev_eui)
    }

    /// Latest stored reading as reported by the registry.
    pub async fn latest_reading(&self, dev_eui: &str) -> Result<Option<Value>, RegistryError> {
        self.registry.latest_reading(dev_eui).await
    }

    pub async fn export_csv(&self, dev_eui: &str) -> Result<Vec<u8>, RegistryError> {
        // ---
        let csv = self.registry.export_csv(dev_eui).await?;
        debug!("Exported {} bytes of CSV for {}", csv.len(), dev_eui);
        Ok(csv)
    }

    // --- devices

    fn device_list(&self) -> MutexGuard<'_, DeviceList> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn devices(&self) -> Vec<Device> {
        self.device_list().all()
    }

    pub fn device_status(&self, dev_eui: &str) -> Option<MutationStatus> {
        self.device_list().status(dev_eui).cloned()
    }

    /// Reload the device list from the registry. Returns the device count.
    pub async fn refresh_devices(&self) -> Result<usize, RegistryError> {
        // ---
        let devices = self.registry.list_devices().await?;
        let count = devices.len();
        self.device_list().replace_all(devices);
        info!("Loaded {} devices", count);
        Ok(count)
    }

    pub async fn add_device(&self, payload: &NewDevice) -> Result<Device, MutationError> {
        self.gateway.add_device(payload).await
    }

    pub async fn update_device(
        &self,
        dev_eui: &str,
        patch: &DevicePatch,
    ) -> Result<Device, MutationError> {
        self.gateway.update_device(dev_eui, patch).await
    }

    /// Delete a device; on success its selection and series go with it.
    pub async fn delete_device(&self, dev_eui: &str) -> Result<Option<Device>, MutationError> {
        // ---
        let removed = self.gateway.delete_device(dev_eui).await?;

        let was_selected = {
            let mut view = lock_view(&self.view);
            let was_selected = view.deselect(dev_eui);
            view.series.clear(dev_eui);
            was_selected
        };
        if was_selected {
            self.restart_stream();
        }
        Ok(removed)
    }

    // --- session

    pub fn session(&self) -> Session {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session(&self, session: Session) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Load the persisted session, if any. Returns whether it is signed in.
    pub fn restore_session(&self) -> bool {
        // ---
        let session = self.sessions.load();
        let signed_in = session.is_authenticated();
        if signed_in {
            info!("Restored session from {}", self.sessions.path().display());
        }
        self.set_session(session);
        signed_in
    }

    /// Exchange an identity-provider ID token for a registry session.
    pub async fn login(&self, id_token: &str) -> Result<Session, RegistryError> {
        // ---
        let auth = self.registry.exchange_google_token(id_token).await?;
        let session = Session::from_auth(auth);

        if let Err(e) = self.sessions.save(&session) {
            warn!("Session not persisted: {:#}", e);
        }
        self.set_session(session.clone());

        let who = session
            .identity
            .as_ref()
            .map(|i| i.email.as_str())
            .unwrap_or("unknown user");
        info!("Signed in as {} (admin: {})", who, session.is_admin);
        Ok(session)
    }

    pub fn logout(&self) {
        // ---
        self.set_session(Session::default());
        if let Err(e) = self.sessions.clear() {
            warn!("Session file not removed: {:#}", e);
        }
        info!("Signed out");
    }
}
