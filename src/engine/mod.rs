pub mod pipeline;
pub mod reaper;
pub mod walker;
