//! Newline-delimited JSON-RPC over a byte stream.
//!
//! Logs go to stderr; stdout carries only protocol messages.

use crate::error::{ServerError, ServerResult};
use crate::protocol::{JsonRpcResponse, Payload};
use crate::session::{CloseReason, Session, SessionStore, TransportKind};
use crate::shutdown::ShutdownSignal;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

enum Exit {
    EndOfInput,
    Shutdown,
}

/// Serve one session over `reader`/`writer` until end of input or shutdown.
///
/// Lines that are not valid UTF-8 or JSON are answered with a parse error
/// and reading continues. Only I/O failures end the transport.
pub async fn serve<R, W>(
    store: &SessionStore,
    reader: R,
    mut writer: W,
    mut shutdown: ShutdownSignal,
) -> ServerResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session = store.create(TransportKind::Stdio);
    info!("stdio transport ready");

    match read_loop(&session, reader, &mut writer, &mut shutdown).await {
        Ok(Exit::EndOfInput) => {
            store.close(session.id(), CloseReason::EndOfInput);
            Ok(())
        }
        // Left open for the shutdown sequence to close.
        Ok(Exit::Shutdown) => Ok(()),
        Err(e) => {
            warn!("stdio transport failed: {}", e);
            store.close(session.id(), CloseReason::TransportClosed);
            Err(e)
        }
    }
}

async fn read_loop<R, W>(
    session: &Session,
    mut reader: R,
    writer: &mut W,
    shutdown: &mut ShutdownSignal,
) -> ServerResult<Exit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => read?,
            _ = shutdown.recv() => {
                debug!("stdio transport stopping for shutdown");
                return Ok(Exit::Shutdown);
            }
        };
        if read == 0 {
            return Ok(Exit::EndOfInput);
        }

        let decoded = std::str::from_utf8(&buf)
            .map_err(|e| ServerError::parse(format!("Input is not valid UTF-8: {}", e)))
            .and_then(|line| {
                if line.trim().is_empty() {
                    Ok(None)
                } else {
                    Payload::parse(line).map(Some)
                }
            });

        let reply = match decoded {
            Ok(None) => continue,
            Ok(Some(payload)) => {
                session.touch();
                session
                    .handler()
                    .handle_payload(payload, Some(session.id()))
                    .await
            }
            Err(e) => {
                session.touch();
                debug!("Undecodable input line: {}", e);
                Some(JsonRpcResponse::from_error(None, &e).to_value())
            }
        };

        if let Some(reply) = reply {
            write_message(writer, &reply).await?;
        }
    }
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> ServerResult<()> {
    let mut text = serde_json::to_string(message)?;
    text.push('\n');
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::McpServer;
    use crate::shutdown::ShutdownController;
    use std::time::Duration;
    use tokio::io::BufReader;

    async fn run_lines(input: &str) -> (Vec<Value>, SessionStore) {
        let store = SessionStore::new(McpServer::new(Config::default()));
        let controller = ShutdownController::new(Duration::from_secs(1));
        let mut output = Vec::new();
        serve(
            &store,
            BufReader::new(input.as_bytes()),
            &mut output,
            controller.signal(),
        )
        .await
        .unwrap();

        let replies = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (replies, store)
    }

    #[tokio::test]
    async fn test_initialize_then_list() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let (replies, store) = run_lines(input).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[0]["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(replies[1]["id"], 2);
        assert!(store.is_empty(), "session closes at end of input");
    }

    #[tokio::test]
    async fn test_parse_error_keeps_going() {
        let input = concat!(
            "{not json\n",
            r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#,
            "\n",
        );
        let (replies, _) = run_lines(input).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["error"]["code"], -32700);
        assert!(replies[0]["id"].is_null());
        assert_eq!(replies[1]["id"], "p");
        assert_eq!(replies[1]["result"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_keeps_going() {
        let mut input = b"\xff\xfe\n".to_vec();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#);
        input.push(b'\n');

        let store = SessionStore::new(McpServer::new(Config::default()));
        let controller = ShutdownController::new(Duration::from_secs(1));
        let mut output = Vec::new();
        serve(&store, BufReader::new(&input[..]), &mut output, controller.signal())
            .await
            .unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["error"]["code"], -32700);
        assert!(replies[0]["id"].is_null());
        assert_eq!(replies[1]["id"], 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_closes_session() {
        let store = SessionStore::new(McpServer::new(Config::default()));
        let controller = ShutdownController::new(Duration::from_secs(1));
        let reader = BufReader::new(FailingReader);
        let result = serve(&store, reader, tokio::io::sink(), controller.signal()).await;
        assert!(result.is_err());
        assert!(store.is_empty());
        assert_eq!(store.server().metrics().snapshot().sessions_closed, 1);
    }

    struct FailingReader;

    impl tokio::io::AsyncRead for FailingReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pipe closed",
            )))
        }
    }

    #[tokio::test]
    async fn test_batch_over_stdio() {
        let input = concat!(
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","id":2,"method":"nope"}]"#,
            "\n",
        );
        let (replies, _) = run_lines(input).await;
        let batch = replies[0].as_array().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1]["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_duplex_session_until_eof() {
        let store = SessionStore::new(McpServer::new(Config::default()));
        let controller = ShutdownController::new(Duration::from_secs(1));
        let (client, server_side) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_side);
        let (client_read, mut client_write) = tokio::io::split(client);

        let serve_task = {
            let signal = controller.signal();
            async move {
                let result = serve(&store, BufReader::new(server_read), server_write, signal).await;
                result.map(|_| store)
            }
        };
        let client_task = async move {
            client_write
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\"}\n")
                .await
                .unwrap();
            let mut lines = BufReader::new(client_read).lines();
            let reply = lines.next_line().await.unwrap().unwrap();
            client_write.shutdown().await.unwrap();
            reply
        };

        let (store, reply) = tokio::join!(serve_task, client_task);
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["id"], 7);

        let store = store.unwrap();
        let sessions = store.server().metrics().snapshot();
        assert_eq!(sessions.sessions_opened, 1);
        assert_eq!(sessions.sessions_closed, 1);
        assert!(store.list().is_empty());
    }
}
