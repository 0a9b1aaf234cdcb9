pub mod cluster;
pub mod config;
pub mod error;
pub mod features;
pub mod geometry;
pub mod io;
pub mod matching;
pub mod pipeline;
pub mod raster;
pub mod reference;
pub mod registry;
pub mod result;
pub mod segmentation;
pub mod session;

pub use config::LocatorConfig;
pub use error::{LocateError, Result};
pub use pipeline::FramePipeline;
pub use reference::ReferenceIndex;
pub use registry::{InMemoryReferenceStore, ReferenceRegistry, ReferenceStore};
pub use result::{MatchCandidate, MatchResult};
pub use session::{FrameOutcome, Session, SessionState};
