#![allow(dead_code)]

use async_trait::async_trait;
use axum::{Router, http::StatusCode, routing::get};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use simple_site_deploy::builder::{BuildOutput, SiteBuilder};
use simple_site_deploy::config::DeployConfig;
use simple_site_deploy::error::{DeployError, Result};
use simple_site_deploy::fetch::ARCHIVE_PREFIX;
use simple_site_deploy::pipeline::Pipeline;
use simple_site_deploy::storage::MemoryStore;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use zip::write::FileOptions;

pub const SECRET: &str = "hunter2";
pub const BUCKET: &str = "www.example.com";

pub const PUSH_BODY: &str = r#"{
    "ref": "refs/heads/master",
    "after": "59b20b8d5c6ff8d09518454d4dd8b7b30f095ab5",
    "repository": {"name": "ebfe_site", "full_name": "santrancisco/ebfe_site"},
    "pusher": {"name": "santrancisco"},
    "head_commit": {"id": "59b20b8d", "message": "add second post"}
}"#;

/// A GitHub-style archive: everything under `ebfe_site-master/`.
pub fn site_archive() -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.add_directory("ebfe_site-master/", FileOptions::default())
        .unwrap();
    for (name, contents) in [
        ("ebfe_site-master/config.toml", "title = 'ebfe'"),
        ("ebfe_site-master/content/first.md", "# First"),
        ("ebfe_site-master/content/second.md", "# Second"),
    ] {
        zip.start_file(name, FileOptions::default().unix_permissions(0o644))
            .unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Serve `/site.zip` with `archive` and `/missing.zip` as a 404.
pub async fn serve_archive(archive: Vec<u8>) -> String {
    let archive = Arc::new(archive);
    let app = Router::new()
        .route(
            "/site.zip",
            get(move || {
                let archive = Arc::clone(&archive);
                async move { archive.as_ref().clone() }
            }),
        )
        .route("/missing.zip", get(|| async { StatusCode::NOT_FOUND }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Stands in for hugo: renders each `content/*.md` to
/// `public/posts/<name>/index.html` plus a `public/index.html`.
#[derive(Default)]
pub struct FakeBuilder {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub delay: Duration,
    in_flight: AtomicBool,
    pub overlapped: AtomicBool,
}

impl FakeBuilder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SiteBuilder for FakeBuilder {
    async fn build(&self, source_dir: &Path) -> Result<BuildOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(self.delay).await;
        let result = if self.fail {
            Err(DeployError::Build("template 'single.html' not found".to_string()))
        } else {
            render(source_dir)
        };
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }
}

fn render(source_dir: &Path) -> Result<BuildOutput> {
    let public = source_dir.join("public");
    fs::create_dir_all(&public)?;
    fs::write(public.join("index.html"), "<h1>ebfe</h1>")?;

    let mut entries: Vec<_> = fs::read_dir(source_dir.join("content"))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = public.join("posts").join(&stem);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("index.html"), fs::read(&path)?)?;
    }
    Ok(BuildOutput {
        dir: public,
        log: "rendered".to_string(),
    })
}

pub fn config(work_dir: &Path, archive_url: String) -> DeployConfig {
    DeployConfig {
        bucket: BUCKET.to_string(),
        webhook_secret: Some(SECRET.to_string()),
        work_dir: work_dir.to_path_buf(),
        archive_url: Some(archive_url),
        ..DeployConfig::default()
    }
}

pub fn pipeline(
    config: DeployConfig,
    builder: Arc<FakeBuilder>,
    store: Arc<MemoryStore>,
) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(Arc::new(config), builder, store))
}

/// Downloaded archives still lying around in `dir`.
pub fn leftover_archives(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(ARCHIVE_PREFIX) && name.ends_with(".zip"))
        .collect()
}

pub fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
