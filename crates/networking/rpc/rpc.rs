//! Pull service: the HTTP/JSON surface remote agents use to fetch processed
//! children with at-most-once delivery. Lease and confirm go through the
//! store's single lock; a background sweep returns timed-out leases to
//! pending, so a crashed agent never strands a file.

use axum::routing::{get, post};
use axum::Router;
use rede_splitter_storage::Store;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info};

mod indexer;
mod lease;
mod scan;
pub mod utils;

pub use indexer::index_output;
pub use lease::{FileDescriptor, LeaseResponse};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub output_root: PathBuf,
    pub input_dir: Option<PathBuf>,
    /// Static bearer token; unauthenticated when absent.
    pub api_key: Option<String>,
    /// TTL sweep period. Must stay well under the smallest lease TTL in
    /// use; the 5 s default is far below the protocol's 900 s default.
    pub sweep_interval: Duration,
}

impl ApiConfig {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        ApiConfig {
            output_root: output_root.into(),
            input_dir: None,
            api_key: None,
            sweep_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct ApiContext {
    pub store: Store,
    pub config: Arc<ApiConfig>,
}

impl ApiContext {
    pub fn new(store: Store, config: ApiConfig) -> Self {
        ApiContext {
            store,
            config: Arc::new(config),
        }
    }
}

pub fn router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/lease-files", post(lease::lease_files))
        .route("/confirm-download", post(lease::confirm_download))
        .route("/pull-batch", post(lease::pull_batch))
        .route("/files/:id", get(lease::download_file))
        .route("/scan", get(scan::scan))
        .with_state(ctx)
}

/// Indexes the output tree, starts the TTL sweep and serves the API until
/// ctrl-c.
pub async fn start_api(addr: SocketAddr, ctx: ApiContext) {
    if let Err(err) = indexer::index_output(&ctx.store, &ctx.config.output_root) {
        error!(%err, "initial output indexing failed");
    }

    let sweep_store = ctx.store.clone();
    let sweep_interval = ctx.config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match sweep_store.expire_leases(Instant::now()) {
                Ok(0) => {}
                Ok(released) => info!(released, "expired leases swept"),
                Err(err) => error!(%err, "lease sweep failed"),
            }
        }
    });

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, %err, "cannot bind pull service");
            return;
        }
    };
    info!("Starting pull service at {addr}");
    let _ = axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| info!("Error shutting down pull service: {:?}", e));
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::Json;
    use lease::{ConfirmRequest, LeaseRequest, PullBatchRequest};
    use rede_splitter_storage::{EngineType, FileStatus};
    use std::fs;
    use utils::RpcErr;

    fn seeded_context() -> (tempfile::TempDir, ApiContext) {
        let dir = tempfile::tempdir().unwrap();
        let lote = dir.path().join("output").join("NSA_041");
        fs::create_dir_all(&lote).unwrap();
        for (pv, body) in [("A", "aaa\n"), ("B", "bbb\n"), ("C", "ccc\n")] {
            fs::write(lote.join(format!("{pv}_051025_041_EEVD.txt")), body).unwrap();
        }
        let ctx = ApiContext::new(
            Store::new(EngineType::InMemory),
            ApiConfig::new(dir.path().join("output")),
        );
        indexer::index_output(&ctx.store, &ctx.config.output_root).unwrap();
        (dir, ctx)
    }

    fn lease_req(limit: usize) -> Json<LeaseRequest> {
        Json(LeaseRequest {
            limit: Some(limit),
            lotes: Vec::new(),
            ttl_seconds: Some(60),
        })
    }

    #[tokio::test]
    async fn lease_then_confirm_reaches_downloaded() {
        let (_dir, ctx) = seeded_context();
        let Json(leased) = lease::lease_files(State(ctx.clone()), None, lease_req(10))
            .await
            .unwrap();
        assert_eq!(leased.files.len(), 3);
        let names: Vec<_> = leased.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "A_051025_041_EEVD.txt",
                "B_051025_041_EEVD.txt",
                "C_051025_041_EEVD.txt"
            ]
        );

        let ids: Vec<_> = leased.files.iter().map(|f| f.id).collect();
        let Json(confirmed) = lease::confirm_download(
            State(ctx.clone()),
            None,
            Json(ConfirmRequest {
                lease_id: leased.lease_id,
                ok_ids: ids,
                fail_ids: Vec::new(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(confirmed.confirmed, 3);

        // nothing left to lease
        let Json(again) = lease::lease_files(State(ctx.clone()), None, lease_req(10))
            .await
            .unwrap();
        assert!(again.files.is_empty());
        for entry in ctx.store.snapshot().unwrap() {
            assert_eq!(entry.status, FileStatus::Downloaded);
        }
    }

    #[tokio::test]
    async fn lease_rejects_bad_params() {
        let (_dir, ctx) = seeded_context();
        let err = lease::lease_files(
            State(ctx.clone()),
            None,
            Json(LeaseRequest {
                limit: None,
                lotes: Vec::new(),
                ttl_seconds: Some(60),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RpcErr::BadParams(_)));

        let err = lease::lease_files(
            State(ctx),
            None,
            Json(LeaseRequest {
                limit: Some(10),
                lotes: Vec::new(),
                ttl_seconds: Some(0),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RpcErr::BadParams(_)));
    }

    #[tokio::test]
    async fn confirm_of_unknown_lease_is_a_conflict() {
        let (_dir, ctx) = seeded_context();
        let err = lease::confirm_download(
            State(ctx),
            None,
            Json(ConfirmRequest {
                lease_id: "deadbeef".to_string(),
                ok_ids: Vec::new(),
                fail_ids: Vec::new(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RpcErr::UnknownLease(_)));
    }

    #[tokio::test]
    async fn pull_batch_marks_downloaded_immediately() {
        let (_dir, ctx) = seeded_context();
        let Json(batch) = lease::pull_batch(
            State(ctx.clone()),
            None,
            Json(PullBatchRequest {
                limit: Some(2),
                lotes: Vec::new(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(batch.files.len(), 2);
        for f in &batch.files {
            assert_eq!(
                ctx.store.get_file(f.id).unwrap().unwrap().status,
                FileStatus::Downloaded
            );
        }
    }

    #[tokio::test]
    async fn download_streams_the_child_bytes() {
        let (_dir, ctx) = seeded_context();
        let Json(leased) = lease::lease_files(State(ctx.clone()), None, lease_req(1))
            .await
            .unwrap();
        let file = &leased.files[0];
        let response = lease::download_file(State(ctx.clone()), None, Path(file.id))
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"aaa\n");

        let err = lease::download_file(State(ctx), None, Path(999_999))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcErr::NotFound(_)));
    }

    #[tokio::test]
    async fn bearer_auth_gates_every_route_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ApiConfig::new(dir.path().join("output"));
        config.api_key = Some("segredo".to_string());
        let ctx = ApiContext::new(Store::new(EngineType::InMemory), config);

        let err = lease::lease_files(State(ctx.clone()), None, lease_req(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcErr::Unauthorized));

        let err = scan::scan(State(ctx), None).await.unwrap_err();
        assert!(matches!(err, RpcErr::Unauthorized));
    }

    #[tokio::test]
    async fn scan_lists_lotes_and_reindexes() {
        let (dir, ctx) = seeded_context();
        // a child written after the first indexing pass
        fs::write(
            dir.path()
                .join("output")
                .join("NSA_041")
                .join("D_051025_041_EEVD.txt"),
            b"ddd\n",
        )
        .unwrap();

        let Json(snapshot) = scan::scan(State(ctx), None).await.unwrap();
        assert!(snapshot.input.is_empty());
        assert_eq!(snapshot.output.len(), 4);
        assert!(snapshot
            .output
            .iter()
            .all(|entry| entry.lote == "NSA_041" && entry.mtime > 0));
    }
}
