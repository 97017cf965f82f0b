#![allow(dead_code)]
//! In-process stand-in for the archive: login form, download endpoint and FGDC
//! metadata pages.
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Router};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::stream;
use tokio::net::TcpListener;
use url::Url;

use landsat_pull::config::{Endpoints, FetchConfig};
use landsat_pull::retry::RetryPolicy;
use landsat_pull::session::LOGIN_FAILURE_MARKER;

pub const ACCOUNT: &str = "landsat_user";
pub const PASSWORD: &str = "s3cret";
const TOKEN: &str = "9f8e7d6c5b4a";
const SESSION_COOKIE: &str = "EROS_SSO";

pub enum Product {
    Archive(Vec<u8>),
    Status(u16),
    Page(String),
    /// Answers `status` for the first `failures` requests, then the archive.
    Flaky {
        failures: usize,
        status: u16,
        bytes: Vec<u8>,
    },
    /// Declares the full length but drops the connection after `cut_at` bytes for the
    /// first `failures` requests.
    Truncated {
        failures: usize,
        cut_at: usize,
        bytes: Vec<u8>,
    },
}

pub struct MockArchive {
    with_token: bool,
    products: HashMap<String, Product>,
    existing: HashSet<String>,
    hits: Mutex<HashMap<String, usize>>,
    ranges: Mutex<HashMap<String, Vec<Option<String>>>>,
    logins: AtomicUsize,
    /// Archives a session may fetch before the archive stops honouring it.
    revoke_after: Option<usize>,
    deliveries: Mutex<HashMap<String, usize>>,
}

impl MockArchive {
    pub fn new() -> Self {
        Self {
            with_token: true,
            products: HashMap::new(),
            existing: HashSet::new(),
            hits: Mutex::new(HashMap::new()),
            ranges: Mutex::new(HashMap::new()),
            logins: AtomicUsize::new(0),
            revoke_after: None,
            deliveries: Mutex::new(HashMap::new()),
        }
    }

    pub fn revoke_sessions_after(mut self, downloads: usize) -> Self {
        self.revoke_after = Some(downloads);
        self
    }

    pub fn without_token(mut self) -> Self {
        self.with_token = false;
        self
    }

    pub fn with_product(mut self, scene_id: &str, product: Product) -> Self {
        self.products.insert(scene_id.to_string(), product);
        self
    }

    pub fn with_existing(mut self, scene_id: &str) -> Self {
        self.existing.insert(scene_id.to_string());
        self
    }

    pub fn hits(&self, scene_id: &str) -> usize {
        self.hits.lock().unwrap().get(scene_id).copied().unwrap_or(0)
    }

    /// `Range` headers received for a scene, in request order.
    pub fn ranges(&self, scene_id: &str) -> Vec<Option<String>> {
        self.ranges
            .lock()
            .unwrap()
            .get(scene_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    /// Serve on an ephemeral port, returning the base url.
    pub async fn serve(self) -> (Url, Arc<MockArchive>) {
        let archive = Arc::new(self);
        let app = Router::new()
            .route("/login/", get(login_page).post(login))
            .route("/download/:family/:scene/STANDARD/EE", get(download))
            .route("/fgdc/:dataset/:scene/", get(metadata))
            .with_state(archive.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let base = Url::parse(&format!("http://{}", addr)).unwrap();
        (base, archive)
    }
}

async fn login_page(State(archive): State<Arc<MockArchive>>) -> Html<String> {
    let token_input = if archive.with_token {
        format!(
            r#"<input type="hidden" name="csrf_token" id="csrf_token" value="{}" />"#,
            TOKEN
        )
    } else {
        String::new()
    };
    Html(format!(
        r#"<html><body>
<form id="loginForm" method="post">
<input type="text" name="username" id="username" />
<input type="password" name="password" id="password" />
{}
</form>
</body></html>"#,
        token_input
    ))
}

async fn login(
    State(archive): State<Arc<MockArchive>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let login = archive.logins.fetch_add(1, Ordering::SeqCst) + 1;
    let field = |name: &str| form.get(name).map(String::as_str).unwrap_or_default();
    if field("username") == ACCOUNT && field("password") == PASSWORD && field("csrf_token") == TOKEN
    {
        (
            StatusCode::OK,
            [(
                header::SET_COOKIE,
                format!("{}=granted-{}; Path=/", SESSION_COOKIE, login),
            )],
            Html("<html><body>Welcome back</body></html>".to_string()),
        )
            .into_response()
    } else {
        Html(format!("<html><body><p>{}</p></body></html>", LOGIN_FAILURE_MARKER)).into_response()
    }
}

fn session_of(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn range_start(headers: &HeaderMap) -> Option<usize> {
    let range = headers.get(header::RANGE)?.to_str().ok()?;
    range.strip_prefix("bytes=")?.strip_suffix('-')?.parse().ok()
}

fn archive_response(bytes: &[u8], headers: &HeaderMap) -> Response {
    let Some(start) = range_start(headers) else {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-gzip")],
            bytes.to_vec(),
        )
            .into_response();
    };
    if start >= bytes.len() {
        return (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{}", bytes.len()))],
        )
            .into_response();
    }
    (
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, "application/x-gzip".to_string()),
            (
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, bytes.len() - 1, bytes.len()),
            ),
        ],
        bytes[start..].to_vec(),
    )
        .into_response()
}

/// Full headers, then the body stops after `cut_at` bytes of the product.
fn cut_response(bytes: &[u8], cut_at: usize, headers: &HeaderMap) -> Response {
    let start = range_start(headers).unwrap_or(0);
    let sent = Bytes::copy_from_slice(&bytes[start..cut_at.max(start)]);
    let body = Body::from_stream(stream::iter(vec![
        Ok(sent),
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection dropped",
        )),
    ]));
    let status = if start > 0 {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    (
        status,
        [
            (header::CONTENT_TYPE, "application/x-gzip".to_string()),
            (header::CONTENT_LENGTH, (bytes.len() - start).to_string()),
        ],
        body,
    )
        .into_response()
}

async fn download(
    State(archive): State<Arc<MockArchive>>,
    Path((_family, scene)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let hit = {
        let mut hits = archive.hits.lock().unwrap();
        let count = hits.entry(scene.clone()).or_insert(0);
        *count += 1;
        *count
    };
    archive
        .ranges
        .lock()
        .unwrap()
        .entry(scene.clone())
        .or_default()
        .push(
            headers
                .get(header::RANGE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        );

    let Some(session) = session_of(&headers) else {
        return Html(format!("<p>{}</p>", LOGIN_FAILURE_MARKER)).into_response();
    };
    {
        let mut deliveries = archive.deliveries.lock().unwrap();
        let delivered = deliveries.entry(session).or_insert(0);
        if archive.revoke_after.is_some_and(|limit| *delivered >= limit) {
            return Html(format!("<p>{}</p>", LOGIN_FAILURE_MARKER)).into_response();
        }
        *delivered += 1;
    }

    match archive.products.get(&scene) {
        Some(Product::Archive(bytes)) => archive_response(bytes, &headers),
        Some(Product::Status(code)) => StatusCode::from_u16(*code).unwrap().into_response(),
        Some(Product::Page(body)) => Html(body.clone()).into_response(),
        Some(Product::Flaky {
            failures,
            status,
            bytes,
        }) => {
            if hit <= *failures {
                StatusCode::from_u16(*status).unwrap().into_response()
            } else {
                archive_response(bytes, &headers)
            }
        }
        Some(Product::Truncated {
            failures,
            cut_at,
            bytes,
        }) => {
            if hit <= *failures {
                cut_response(bytes, *cut_at, &headers)
            } else {
                archive_response(bytes, &headers)
            }
        }
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn metadata(
    State(archive): State<Arc<MockArchive>>,
    Path((_dataset, scene)): Path<(String, String)>,
) -> Response {
    if archive.existing.contains(&scene) {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata><idinfo><citation><citeinfo><title>{}</title></citeinfo></citation></idinfo></metadata>"#,
            scene
        );
        (StatusCode::OK, [(header::CONTENT_TYPE, "text/xml")], xml).into_response()
    } else {
        Html("<html><body>Scene not found</body></html>").into_response()
    }
}

/// Patterned bytes that gzip barely shrinks.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 251) as u8).collect()
}

/// An uncompressed-deflate tarball comfortably above the minimum archive size.
pub fn scene_tgz(scene_id: &str) -> Vec<u8> {
    let band: Vec<u8> = (0..60_000u32).map(|i| (i % 251) as u8).collect();
    let mtl = format!("GROUP = L1_METADATA_FILE\n  LANDSAT_SCENE_ID = \"{}\"\n", scene_id);

    let encoder = GzEncoder::new(Vec::new(), Compression::none());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in [
        (format!("{}_B1.TIF", scene_id), band.as_slice()),
        (format!("{}_MTL.txt", scene_id), mtl.as_bytes()),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }
    let mut encoder = builder.into_inner().unwrap();
    encoder.flush().unwrap();
    encoder.finish().unwrap()
}

pub fn test_config(base: &Url) -> FetchConfig {
    FetchConfig {
        endpoints: Endpoints::rooted_at(base).unwrap(),
        request_timeout_secs: 10,
        connect_timeout_secs: 5,
        retry: RetryPolicy {
            max_retries: 1,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            ..RetryPolicy::default()
        },
        workers: 1,
        proxy: None,
    }
}
