use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::archive::ProjectFiles;

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` runs on the in-memory store.
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    pub www_dir: PathBuf,
    pub public_url: String,
    pub scripts_dir: PathBuf,
    pub gradebook_url: Option<String>,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Reads the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self> {
        let port: u16 = match env::var("PORT") {
            Ok(p) => p.parse().with_context(|| format!("invalid PORT {p:?}"))?,
            Err(_) => 8081,
        };
        let max_upload_mb: usize = match env::var("MAX_UPLOAD_MB") {
            Ok(v) => v.parse().with_context(|| format!("invalid MAX_UPLOAD_MB {v:?}"))?,
            Err(_) => 200,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or("./data".into())),
            www_dir: PathBuf::from(env::var("WWW_DIR").unwrap_or("./www".into())),
            public_url: non_empty("PUBLIC_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}/content")),
            scripts_dir: PathBuf::from(env::var("SCRIPTS_DIR").unwrap_or("./assets/scripts".into())),
            gradebook_url: non_empty("GRADEBOOK_URL"),
            port,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
        })
    }

    pub fn project_files(&self) -> ProjectFiles {
        ProjectFiles {
            data_root: self.data_dir.clone(),
            www_root: self.www_dir.clone(),
            public_url: self.public_url.clone(),
            scripts_dir: self.scripts_dir.clone(),
        }
    }

    pub fn drafts_dir(&self) -> PathBuf {
        self.data_dir.join("drafts")
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
