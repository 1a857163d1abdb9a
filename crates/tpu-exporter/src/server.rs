//! HTTP endpoint serving the Prometheus registry.
//!
//! `GET /metrics` returns the text exposition, `GET /healthz` returns `ok`,
//! anything else is a 404 (or 405 for non-GET methods on known paths).

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tpu_metrics::GaugeRegistry;
use tpu_metrics::prometheus::MetricsHandler;
use tracing::{debug, error, info, warn};

use crate::error::ExporterError;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// A bound metrics endpoint, ready to serve.
#[derive(Debug)]
pub struct MetricsServer {
    listener: TcpListener,
    handler: MetricsHandler,
}

impl MetricsServer {
    /// Binds the endpoint to `addr`.
    ///
    /// Port 0 picks a free port; use [`MetricsServer::local_addr`] to find it.
    pub async fn bind(addr: SocketAddr, registry: GaugeRegistry) -> Result<Self, ExporterError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ExporterError::Server(format!("failed to bind {addr}: {e}")))?;
        Ok(Self {
            listener,
            handler: MetricsHandler::new(registry),
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, ExporterError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until `shutdown` flips to `true` or its sender
    /// is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ExporterError> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "metrics endpoint listening");

        loop {
            tokio::select! {
                accept = self.listener.accept() => {
                    match accept {
                        Ok((stream, peer_addr)) => {
                            let handler = self.handler.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let svc = service_fn(move |req| {
                                    let handler = handler.clone();
                                    async move { Ok::<_, Infallible>(route(&req, &handler)) }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, svc)
                                    .await
                                {
                                    if !e.is_incomplete_message() {
                                        warn!(peer = %peer_addr, error = %e, "connection error");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("metrics endpoint shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

fn route(req: &Request<Incoming>, handler: &MetricsHandler) -> Response<Full<Bytes>> {
    let path = req.uri().path();
    debug!(method = %req.method(), path, "request");

    match (req.method(), path) {
        (&Method::GET, "/metrics") => {
            let response = handler.handle();
            text_response(StatusCode::OK, response.content_type, response.body)
        }
        (&Method::GET, "/healthz") => text_response(StatusCode::OK, TEXT_PLAIN, "ok"),
        (_, "/metrics" | "/healthz") => text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            TEXT_PLAIN,
            "method not allowed",
        ),
        _ => text_response(StatusCode::NOT_FOUND, TEXT_PLAIN, "not found"),
    }
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
