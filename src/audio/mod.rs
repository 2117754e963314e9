pub mod backend;
pub mod file;
pub mod format;
pub mod simulated;
pub mod store;

#[cfg(feature = "backend-cpal")]
pub mod cpal_backend;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, BackendKind, InputStream, OutputStream,
};
pub use file::{export_wav, import_wav};
pub use format::PcmFormat;
pub use simulated::SimulatedBackend;
pub use store::{BackingStore, StoreReader, StoreWriter};
