use std::sync::Arc;

pub mod archive;
pub mod config;
pub mod db;
pub mod grading;
pub mod html;
pub mod listing;
pub mod models;
pub mod records;
pub mod report;
pub mod routes;
pub mod runtime;
pub mod store;
pub mod strings;
pub mod uploads;

use archive::ProjectFiles;
use grading::Gradebook;
use store::Store;
use uploads::FsDraftArea;

/// Shared handles passed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gradebook: Arc<dyn Gradebook>,
    pub drafts: Arc<FsDraftArea>,
    pub files: Arc<ProjectFiles>,
}
