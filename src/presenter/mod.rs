//! Secondary visual representations, each owning its own position map.

pub mod effect;
pub mod label;

pub use effect::EffectPresenter;
pub use label::{DefaultLabelText, LabelContext, LabelPresenter, LabelText};
