//! Live telemetry dashboard core for soil-moisture sensor fleets.
//!
//! Live readings arrive over a WebSocket stream and are kept in bounded
//! per-device series, seeded from the registry's history when a device is
//! selected, merged into chart rows on demand, and exposed to a UI layer by a
//! small local view server. Device mutations go through an authenticated
//! gateway with explicit per-device outcomes.
//!
//! Module boundaries follow the same gateway pattern as `routes`: each module
//! exports a small surface and the re-exports below are the public API.

pub mod config;
pub mod dashboard;
pub mod gateway;
pub mod history;
pub mod merge;
pub mod models;
pub mod registry;
pub mod routes;
pub mod session;
pub mod store;
pub mod stream;
pub mod timestamp;
pub mod view;

pub use config::Config;
pub use dashboard::Dashboard;
pub use gateway::{MutationError, MutationGateway, MutationStatus};
pub use history::{BackfillOutcome, HistoryLoader};
pub use merge::{merge_series, MergeRow};
pub use models::{Device, DevicePatch, DeviceStatus, LatestSample, NewDevice, Reading};
pub use registry::{RegistryClient, RegistryError};
pub use session::{Session, SessionStore};
pub use store::SeriesStore;
pub use stream::{ConnectionManager, ConnectionState, StreamSettings, Transport, WsTransport};
