// src/runtime/remote.rs
//! Remote runtime: PUT the run struct to an HTTP function endpoint
//!
//! The runtime's `command` is the function URL. Secrets are resolved from
//! `spec.secret_sources` and sent back as descriptors only. A non-success
//! status is a soft failure; a network failure is a [`EngineError::Transport`].

use crate::run::outcome::{RunOutcome, SoftFailure};
use crate::run::run_struct::RunStruct;
use crate::run::secrets::SecretsStore;
use crate::rundb::get_run_db;
use crate::runtime::base::RuntimeBase;
use crate::runtime::kind::RuntimeKind;
use crate::utils::config::RemoteConfig;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LOG_LEVEL_HEADER: &str = "x-nuclio-log-level";
pub const LOGS_HEADER: &str = "x-nuclio-logs";

#[derive(Clone)]
pub struct RemoteRuntime {
    pub base: RuntimeBase,
    config: RemoteConfig,
    http_client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl std::fmt::Debug for RemoteRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRuntime")
            .field("base", &self.base)
            .field("config", &self.config)
            .finish()
    }
}

impl RemoteRuntime {
    pub fn new(command: Option<String>, args: Vec<String>, config: RemoteConfig) -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let http_client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            base: RuntimeBase::new(command, args),
            config,
            http_client,
        }
    }

    pub fn process_struct(&mut self, run: &mut RunStruct) {
        self.base.process_struct(RuntimeKind::Remote, run);
    }

    pub async fn run(&mut self, run: &mut RunStruct) -> Result<RunOutcome> {
        let url = self.base.command.clone().ok_or_else(|| {
            EngineError::ConfigError("remote runtime needs a function url".into())
        })?;
        let uri: hyper::Uri = url
            .parse()
            .map_err(|e| EngineError::ConfigError(format!("invalid function url {}: {}", url, e)))?;

        let secrets = SecretsStore::from_dict(run.spec_mut())?;
        run.spec_mut()
            .insert("secret_sources".into(), secrets.to_serial_value());

        let log_level = run
            .log_level()
            .unwrap_or(self.config.default_log_level.as_str())
            .to_string();

        let request = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .header(LOG_LEVEL_HEADER, log_level)
            .body(Full::new(Bytes::from(run.to_json()?)))
            .map_err(|e| EngineError::ConfigError(format!("cannot build request: {}", e)))?;

        debug!("PUT {}", url);
        let exchange = self.exchange(request);
        let (status, logs, body) = match self.config.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), exchange)
                .await
                .map_err(|_| EngineError::transport(&url, format!("timed out after {}s", secs)))?,
            None => exchange.await,
        }
        .map_err(|reason| EngineError::transport(&url, reason))?;

        if !status.is_success() {
            warn!("Function at {} returned {}", url, status);
            return Ok(RunOutcome::Failed(SoftFailure::HttpStatus {
                status: status.as_u16(),
            }));
        }

        if let Some(logs) = logs {
            let emitted = emit_logs(&logs);
            debug!("Function at {} sent {} log lines", url, emitted);
        }

        let record: Value = match serde_json::from_slice(&body) {
            Ok(record) => record,
            Err(e) => {
                warn!("Function at {} returned a non-JSON body: {}", url, e);
                return Ok(RunOutcome::Failed(SoftFailure::InvalidResponse {
                    reason: e.to_string(),
                }));
            }
        };

        if let Some(target) = &self.base.rundb {
            let mut db = get_run_db(target)?;
            db.connect(&secrets)?;
            db.store_run(&record, true)?;
            info!("Committed remote run record to {}", target);
        }

        Ok(RunOutcome::Completed(record))
    }

    /// Send the request and collect status, log header and body
    async fn exchange(
        &self,
        request: Request<Full<Bytes>>,
    ) -> std::result::Result<(StatusCode, Option<String>, Bytes), String> {
        let response = self
            .http_client
            .request(request)
            .await
            .map_err(|e| e.to_string())?;

        let (parts, body) = response.into_parts();
        let logs = parts
            .headers
            .get(LOGS_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = body
            .collect()
            .await
            .map_err(|e| format!("response body error: {}", e))?
            .to_bytes();

        Ok((parts.status, logs, body))
    }
}

/// Emit each line of a JSON-array log header, returning how many were emitted
fn emit_logs(header: &str) -> usize {
    match serde_json::from_str::<Vec<Value>>(header) {
        Ok(lines) => {
            for line in &lines {
                match line {
                    Value::String(text) => info!(target: "mlrun_engine::remote", "{}", text),
                    other => info!(target: "mlrun_engine::remote", "{}", other),
                }
            }
            lines.len()
        }
        Err(e) => {
            warn!("Undecodable {} header: {}", LOGS_HEADER, e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rundb::{MemoryRunDb, RunDb};
    use http_body_util::Full;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::Response;
    use hyper_util::rt::TokioIo;
    use serde_json::json;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Seen {
        body: Option<Value>,
        log_level: Option<String>,
        method: Option<Method>,
    }

    /// Stub function endpoint answering every request with `status`/`body`
    async fn stub_server(
        status: u16,
        body: &'static str,
        logs: Option<&'static str>,
    ) -> (SocketAddr, Arc<Mutex<Seen>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Seen::default()));
        let seen_server = Arc::clone(&seen);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let seen = Arc::clone(&seen_server);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let seen = Arc::clone(&seen);
                        async move {
                            let method = req.method().clone();
                            let log_level = req
                                .headers()
                                .get(LOG_LEVEL_HEADER)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            let bytes = req.into_body().collect().await.unwrap().to_bytes();
                            {
                                let mut seen = seen.lock().await;
                                seen.body = serde_json::from_slice(&bytes).ok();
                                seen.log_level = log_level;
                                seen.method = Some(method);
                            }

                            let mut builder = Response::builder().status(status);
                            if let Some(logs) = logs {
                                builder = builder.header(LOGS_HEADER, logs);
                            }
                            Ok::<_, Infallible>(
                                builder.body(Full::new(Bytes::from_static(body.as_bytes()))).unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        (addr, seen)
    }

    fn runtime_for(addr: SocketAddr) -> RemoteRuntime {
        RemoteRuntime::new(
            Some(format!("http://{}/fn", addr)),
            vec![],
            RemoteConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_success_returns_record() {
        let (addr, seen) = stub_server(
            200,
            r#"{"metadata": {"uid": "r-1"}, "status": {"state": "completed"}}"#,
            Some(r#"["loading data", "training done"]"#),
        )
        .await;

        let mut runtime = runtime_for(addr);
        let mut run = RunStruct::from_value(json!({
            "metadata": {"uid": "r-1"},
            "spec": {"log_level": "debug", "secret_sources": [{"kind": "inline", "source": {"K": "v"}}]}
        }))
        .unwrap();
        runtime.process_struct(&mut run);

        let outcome = runtime.run(&mut run).await.unwrap();
        assert_eq!(outcome.record().unwrap()["status"]["state"], "completed");

        let seen = seen.lock().await;
        assert_eq!(seen.method, Some(Method::PUT));
        assert_eq!(seen.log_level.as_deref(), Some("debug"));
        let body = seen.body.as_ref().unwrap();
        assert_eq!(body["spec"]["runtime"]["kind"], "remote");
        assert_eq!(body["spec"]["secret_sources"][0]["kind"], "inline");
    }

    #[tokio::test]
    async fn test_default_log_level_header() {
        let (addr, seen) = stub_server(200, r#"{"ok": true}"#, None).await;
        let mut runtime = runtime_for(addr);
        let mut run = RunStruct::new();
        runtime.process_struct(&mut run);

        runtime.run(&mut run).await.unwrap();
        assert_eq!(seen.lock().await.log_level.as_deref(), Some("info"));
    }

    #[tokio::test]
    async fn test_server_error_is_soft_failure() {
        let (addr, _) = stub_server(500, "boom", None).await;
        let mut runtime = runtime_for(addr);
        let mut run = RunStruct::new();
        runtime.process_struct(&mut run);

        let outcome = runtime.run(&mut run).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed(SoftFailure::HttpStatus { status: 500 }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut runtime = runtime_for(addr);
        let mut run = RunStruct::new();
        runtime.process_struct(&mut run);

        match runtime.run(&mut run).await {
            Err(EngineError::Transport { url, .. }) => assert!(url.contains(&addr.to_string())),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commits_record_to_rundb() {
        let (addr, _) = stub_server(
            200,
            r#"{"metadata": {"uid": "remote-commit"}, "status": {"state": "completed"}}"#,
            None,
        )
        .await;

        let mut runtime = runtime_for(addr);
        runtime.base.rundb = Some("memory://remote-commit".into());
        let mut run = RunStruct::from_value(json!({
            "spec": {"secret_sources": [{"kind": "inline", "source": {"DB_USER": "u"}}]}
        }))
        .unwrap();
        runtime.process_struct(&mut run);
        runtime.run(&mut run).await.unwrap();

        let db = MemoryRunDb::named("remote-commit");
        assert!(db.read_run("remote-commit", "default", 0).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_non_json_body() {
        let (addr, _) = stub_server(200, "<html>", None).await;
        let mut runtime = runtime_for(addr);
        let mut run = RunStruct::new();
        runtime.process_struct(&mut run);

        let outcome = runtime.run(&mut run).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failed(SoftFailure::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_https_url_reaches_connector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&accepted);
        tokio::spawn(async move {
            // accept and hang up without a TLS handshake
            if let Ok((stream, _)) = listener.accept().await {
                flag.store(true, Ordering::SeqCst);
                drop(stream);
            }
        });

        let mut runtime = RemoteRuntime::new(
            Some(format!("https://{}/fn", addr)),
            vec![],
            RemoteConfig::default(),
        );
        let mut run = RunStruct::new();
        runtime.process_struct(&mut run);

        match runtime.run(&mut run).await {
            Err(EngineError::Transport { url, .. }) => assert!(url.starts_with("https://")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(accepted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_emit_logs_counts_lines() {
        assert_eq!(emit_logs("not json"), 0);
        assert_eq!(emit_logs(r#"{"level": "info"}"#), 0);
        assert_eq!(emit_logs("[]"), 0);
        assert_eq!(emit_logs(r#"["a", {"level": "info"}]"#), 2);
    }
}
