#![allow(async_fn_in_trait)]
pub mod batch;
pub mod config;
pub mod credentials;
pub mod download_plan;
pub mod downloader;
pub mod error;
pub mod extract;
pub mod resolver;
pub mod retry;
pub mod scene;
pub mod scene_index;
pub mod scene_selection;
pub mod session;
