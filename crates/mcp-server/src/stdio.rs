use std::sync::Arc;

use common::RpcRequest;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{dispatch::dispatch, state::CoreContext};

/// JSON-RPC over stdio: one request per line on stdin, one response per
/// line on stdout, logs on stderr. Requests run concurrently; responses
/// may interleave out of order, correlated by id.
pub async fn serve_stdio(ctx: Arc<CoreContext>) -> anyhow::Result<()> {
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(line) = reply_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let shutdown = CancellationToken::new();
    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => request,
            Err(_) => {
                let _ = reply_tx.send(
                    "{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{\"code\":-32700,\"message\":\"invalid request\"}}"
                        .to_string(),
                );
                continue;
            }
        };

        let ctx = ctx.clone();
        let reply_tx = reply_tx.clone();
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            let response = dispatch(&ctx, request, &cancel).await;
            let _ = reply_tx.send(response.to_string());
        });
    }

    ctx.begin_shutdown();
    shutdown.cancel();
    if let Err(err) = ctx.persist_runtime_state() {
        tracing::warn!(error = %err, "failed persisting runtime state during shutdown");
    }
    drop(reply_tx);
    let _ = writer.await;
    Ok(())
}
