//! Chat-bot funnel: flow graph compilation, navigation and text rendering.

pub mod flow;
pub mod render;

pub use flow::{
    compile_flow, normalize_navigation, CompiledFlow, CompiledQuestion, EditorEdge, EditorNode,
    FlowError,
};
pub use render::{extract_destinations, RenderContext, ANONYMOUS_USER_NAME};
