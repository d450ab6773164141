//! 渲染器
//!
//! - TuiRenderer: ratatui 全屏频谱
//! - StatusRenderer: 单行状态

mod controller;
pub mod model;
mod status;
pub mod view;

pub use controller::TuiRenderer;
pub use status::StatusRenderer;
