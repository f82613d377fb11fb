//! doorlock-core: Recognition gate contract and the pieces behind it.
//!
//! The control loop only knows [`RecognitionGate`]. The shipped gallery gate
//! embeds each frame, compares it against enrolled faces with a cosine
//! matcher and draws the examined region onto the frame.

pub mod gallery;
pub mod gate;
pub mod thumbnail;
pub mod types;

pub use gate::{
    Detection, Embedder, FnGate, GalleryGate, GateError, Recognition, RecognitionGate,
    UnavailableGate,
};
pub use thumbnail::ThumbnailEmbedder;
pub use types::{Embedding, EnrolledFace, RecognitionOutcome, Region, Verdict};
