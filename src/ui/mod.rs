//! 交互层入口。
//!
//! 三套前端共用同一条下载流程：TUI、逐行提问的 CLI、axum Web 界面。

pub mod noui;
pub mod tui;
pub mod web;
