pub mod capture;
pub mod config;
pub mod error;
pub mod negotiation;
pub mod orchestrator;
pub mod presentation;
mod registry;
pub mod relay_link;
pub mod session;
pub mod telemetry;

pub use capture::{CaptureDevice, CaptureError, LocalStream, MediaConstraints, SyntheticCapture};
pub use config::PeerConfig;
pub use error::MeshError;
pub use negotiation::{ConnectivityStatus, Negotiator, NegotiatorFactory};
pub use orchestrator::{acquire_local_media, Mesh, MeshBuilder};
pub use presentation::{ChannelPresenter, LogPresenter, Presenter, PresenterEvent};
pub use relay_link::RelayLink;
pub use session::{NegotiationState, Role, SessionSnapshot};
