pub mod prelude {
    pub use chrono::prelude::*;

    pub use futures_util::StreamExt;
    pub use kube::{
        api::{Api, ListParams, Patch, PatchParams, PostParams},
        runtime::{controller::Action, watcher, Controller},
        Client, CustomResource, Resource, ResourceExt,
    };
    pub use serde::{Deserialize, Serialize};
    pub use std::sync::Arc;
    pub use std::time::Duration;

    pub use crate::config::{AgentConfig, ControllerConfig};
    pub use crate::crd::*;

    // Error handling
    pub use crate::error::{format_error_chain, FleetError, FleetResult};
}

pub mod agent;
pub mod apply;
pub mod bundlereader;
pub mod config;
pub mod content;
pub mod controllers;
pub mod crd;
pub mod election;
pub mod error;
pub mod planner;
pub mod scheduler;
pub mod source;
pub mod status;
pub mod target;

/// Shared logger setup for both binaries: Info by default, the chatty
/// dependencies quieted, `RUST_LOG` wins.
pub fn init_logging(binary: &str) {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info) // Set default level to Info for most modules
        .filter_module("kube_runtime::controller", log::LevelFilter::Warn) // Kubernetes controller logs every reconciliation at info level
        .filter_module("tower::buffer::worker", log::LevelFilter::Warn)
        .filter_module("fleet::controllers", log::LevelFilter::Info)
        .filter_module("fleet::agent", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("{} starting", binary);
}
