//! Facial animation: viseme shapes, mood, idle motion and runtime state.

pub mod blend;
pub mod mood;
pub mod shapes;
pub mod state;

pub use blend::{BlendShapeFrame, FacialBlender, HeadPose};
pub use mood::Mood;
pub use state::AvatarRuntimeState;
