use crate::router::{self, Connection};
use crate::service::SessionService;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::path::Path;
use switchboard_core::error::ErrorKind;
use switchboard_core::ipc::{RealtimeRequest, RealtimeResponse};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Responses and pushes queued per connection before the writer applies backpressure.
const OUTBOUND_BUFFER: usize = 256;

pub async fn run_realtime_server(
    socket_path: &str,
    service: SessionService,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("Realtime socket listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let service = service.clone();
                tokio::spawn(serve_connection(stream, service));
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down realtime socket...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}

async fn serve_connection(stream: UnixStream, service: SessionService) {
    let (read, write) = stream.into_split();
    // 4-byte little-endian length prefix + MessagePack payload
    let le_codec = || LengthDelimitedCodec::builder().little_endian().new_codec();
    let mut framed_read = FramedRead::new(read, le_codec());
    let mut framed_write = FramedWrite::new(write, le_codec());

    // Replies and topic pushes share one ordered writer.
    let (tx, mut rx) = mpsc::channel::<RealtimeResponse>(OUTBOUND_BUFFER);
    tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            match rmp_serde::to_vec_named(&response) {
                Ok(resp_bytes) => {
                    if let Err(e) = framed_write.send(Bytes::from(resp_bytes)).await {
                        tracing::debug!("Realtime client went away: {}", e);
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to serialize response: {}", e),
            }
        }
    });

    let mut conn = Connection::new(tx.clone());
    while let Some(frame) = framed_read.next().await {
        let response = match frame {
            Ok(bytes_mut) => match rmp_serde::from_slice::<RealtimeRequest>(&bytes_mut) {
                Ok(request) => router::handle_request(request, &mut conn, &service).await,
                Err(e) => RealtimeResponse::err(
                    Some(ErrorKind::Invalid),
                    format!("Deserialization error: {}", e),
                ),
            },
            Err(e) => {
                tracing::error!("Frame error: {}", e);
                break;
            }
        };
        if tx.send(response).await.is_err() {
            break;
        }
    }

    conn.close();
    if let Some(caller) = conn.caller() {
        tracing::debug!(caller_id = %caller.id, "Realtime client disconnected");
    }
}
