pub mod adjustments;
pub mod clipboard;
pub mod transform;
