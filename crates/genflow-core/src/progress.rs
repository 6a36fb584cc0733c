//! Progress monitor: follows one job over the server's WebSocket stream.
//!
//! `monitor_job` connects synchronously (a dial or handshake failure is
//! returned from the call) and then hands the socket to a background task
//! that forwards decoded frames into a channel. The stream ends after:
//!
//! - a terminal status or a frame carrying an `error` field (frame emitted),
//! - a malformed payload (final `"error"` frame with a decode error),
//! - a transport read error (final `"error"` frame),
//! - cancellation (final `"cancelled"` frame),
//! - a normal close from the server (no trailing frame).

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::transport::HttpClient;
use crate::workflow::model::{JobProgress, ProgressFrame};

/// Ordered progress updates for one job; the last item is the terminal one.
pub type ProgressStream = ReceiverStream<JobProgress>;

const CHANNEL_CAPACITY: usize = 16;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl HttpClient {
    /// Open a progress stream for `job_id`.
    pub async fn monitor_job(&self, job_id: &str, cancel: &CancellationToken) -> Result<ProgressStream> {
        if job_id.is_empty() {
            return Err(ClientError::Validation("job id required".to_string()).context("monitor job"));
        }
        let context = format!("monitor job {}", job_id);
        let url = stream_url(&self.config, job_id).map_err(|e| e.context(context.clone()))?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Config(format!("invalid stream URL '{}': {}", url, e)).context(context.clone()))?;
        if let Some(token) = self.config.bearer_token() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ClientError::Config(format!("invalid API key header: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        tracing::debug!("[Progress] Connecting to {}", url);
        let connect = tokio::time::timeout(self.config.timeout, connect_async(request));
        let socket = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled.context(context)),
            res = connect => match res {
                Err(_) => {
                    return Err(ClientError::Transport {
                        message: format!("handshake timeout after {:?}", self.config.timeout),
                        retryable: true,
                    }
                    .context(context));
                }
                Ok(Err(e)) => return Err(connect_error(e).context(context)),
                Ok(Ok((socket, _response))) => socket,
            },
        };
        tracing::info!("[Progress] Streaming progress for job {}", job_id);

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(pump(socket, job_id.to_string(), tx, cancel.clone()));
        Ok(ReceiverStream::new(rx))
    }
}

/// `http(s)://host[:port]/...` → `ws(s)://host[:port]{stream_path}?job_id={id}`.
pub(crate) fn stream_url(config: &ClientConfig, job_id: &str) -> Result<Url> {
    let mut url = Url::parse(config.base_url())
        .map_err(|e| ClientError::Config(format!("invalid server URL '{}': {}", config.server_url, e)))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(ClientError::Config(format!("unsupported server URL scheme '{}'", other)));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Config(format!("cannot derive stream URL from '{}'", config.server_url)))?;

    if config.stream_path.starts_with('/') {
        url.set_path(&config.stream_path);
    } else {
        url.set_path(&format!("/{}", config.stream_path));
    }
    url.query_pairs_mut().clear().append_pair("job_id", job_id);
    Ok(url)
}

/// Decode one frame, tagging it with `job_id` when the server omitted it.
pub(crate) fn parse_progress(payload: &[u8], job_id: &str) -> Result<JobProgress> {
    let frame: ProgressFrame = serde_json::from_slice(payload)
        .map_err(|e| ClientError::Decode(format!("decode progress for job {}: {}", job_id, e)))?;
    Ok(JobProgress::from_frame(frame, job_id))
}

fn connect_error(e: WsError) -> ClientError {
    match e {
        WsError::Http(response) => ClientError::Transport {
            message: format!("stream handshake rejected with status {}", response.status()),
            retryable: response.status().is_server_error(),
        },
        WsError::Io(io) => ClientError::Transport {
            message: io.to_string(),
            retryable: true,
        },
        other => ClientError::Transport {
            message: other.to_string(),
            retryable: false,
        },
    }
}

async fn pump(mut socket: Socket, job_id: String, tx: mpsc::Sender<JobProgress>, cancel: CancellationToken) {
    let cancelled = |job_id: &str| {
        JobProgress::failure(
            job_id,
            "cancelled",
            ClientError::Cancelled.context(format!("monitor job {}", job_id)),
        )
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("[Progress] Monitoring of job {} cancelled", job_id);
                let _ = tx.send(cancelled(&job_id)).await;
                return;
            }
            msg = socket.next() => msg,
        };

        let parsed = match next {
            None | Some(Ok(Message::Close(_))) => {
                tracing::info!("[Progress] Stream for job {} closed by server", job_id);
                return;
            }
            Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => return,
            Some(Err(e)) => {
                let frame = if cancel.is_cancelled() {
                    cancelled(&job_id)
                } else {
                    tracing::warn!("[Progress] Read error on job {}: {}", job_id, e);
                    JobProgress::failure(
                        &job_id,
                        "error",
                        ClientError::Transport {
                            message: format!("read progress: {}", e),
                            retryable: false,
                        }
                        .context(format!("monitor job {}", job_id)),
                    )
                };
                let _ = tx.send(frame).await;
                return;
            }
            Some(Ok(Message::Text(text))) => parse_progress(text.as_bytes(), &job_id),
            Some(Ok(Message::Binary(data))) => parse_progress(&data, &job_id),
            Some(Ok(_)) => continue,
        };

        match parsed {
            Ok(progress) => {
                tracing::debug!(
                    "[Progress] Job {}: {} ({:.0}%)",
                    progress.job_id,
                    progress.status,
                    progress.progress * 100.0
                );
                let terminal = progress.is_terminal();
                if tx.send(progress).await.is_err() {
                    tracing::debug!("[Progress] Receiver for job {} dropped", job_id);
                    return;
                }
                if terminal {
                    tracing::info!("[Progress] Job {} reached a terminal state", job_id);
                    return;
                }
            }
            Err(err) => {
                tracing::warn!("[Progress] {}", err);
                let context = format!("monitor job {}", job_id);
                let _ = tx.send(JobProgress::failure(&job_id, "error", err.context(context))).await;
                return;
            }
        }
    }
}
