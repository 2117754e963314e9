pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod session;

pub use audio::{
    export_wav, import_wav, AudioBackend, AudioBackendConfig, AudioBackendFactory, BackendKind,
    BackingStore, InputStream, OutputStream, PcmFormat, SimulatedBackend,
};
pub use config::Config;
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use session::{AudioSession, SessionConfig, SessionEvent, SessionState, SessionStats};
