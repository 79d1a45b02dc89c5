use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bridge::{Action, AnalysisComplete, Request, SandboxMessage};
use crate::sandbox::EmbeddingEngine;

/// Owning handle of a running sandbox task.
///
/// The sandbox shares nothing with the rest of the process: requests go in
/// through `inbox` and every reply comes back on the outbound channel given
/// to [`spawn`]. Dropping the handle stops the task.
pub struct SandboxHandle {
    inbox: mpsc::UnboundedSender<Request>,
    task: JoinHandle<()>,
}

impl SandboxHandle {
    pub fn is_alive(&self) -> bool {
        !self.inbox.is_closed() && !self.task.is_finished()
    }

    /// Posts a request, handing it back when the sandbox is gone.
    pub fn post(&self, request: Request) -> Result<(), Request> {
        self.inbox.send(request).map_err(|e| e.0)
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts a sandbox that owns `engine`. The model is preloaded before the
/// first request is served; requests are handled one at a time.
pub fn spawn(
    engine: EmbeddingEngine,
    outbound: mpsc::UnboundedSender<SandboxMessage>,
) -> SandboxHandle {
    let (inbox, mut requests) = mpsc::unbounded_channel::<Request>();

    let task = tokio::spawn(async move {
        if let Err(reason) = engine.preload().await {
            let _ = outbound.send(SandboxMessage::LogError {
                error: format!("embedding model unavailable, using fallback vectors: {reason}"),
            });
        }

        while let Some(request) = requests.recv().await {
            let reply = handle(&engine, request).await;
            if outbound.send(reply).is_err() {
                break;
            }
        }

        log::debug!("sandbox stopped");
    });

    SandboxHandle { inbox, task }
}

async fn handle(engine: &EmbeddingEngine, request: Request) -> SandboxMessage {
    let Request {
        action,
        correlation_id,
        generation,
    } = request;

    match action {
        Action::Ping => SandboxMessage::Result {
            correlation_id,
            generation,
            result: json!({"status": "alive"}),
        },

        Action::EmbedQuery { text } => match engine.embed(&text).await {
            Ok(vector) => SandboxMessage::Result {
                correlation_id,
                generation,
                result: json!({ "vector": vector }),
            },
            Err(e) => SandboxMessage::Error {
                correlation_id,
                generation,
                error: e.to_string(),
            },
        },

        Action::AnalyzeCapture { id, text } => match engine.embed(&text).await {
            Ok(vector) => {
                let embedding = vector.iter().any(|x| *x != 0.0).then_some(vector);
                SandboxMessage::AnalysisComplete {
                    correlation_id,
                    generation,
                    result: AnalysisComplete { id, embedding },
                }
            }
            // capture stays unprocessed and is picked up by the next back-fill
            Err(e) => SandboxMessage::LogError {
                error: format!("analysis of capture {id} failed: {e}"),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eid::Eid;
    use crate::sandbox::EMBEDDING_DIM;

    fn request(action: Action) -> Request {
        Request {
            action,
            correlation_id: Eid::new(),
            generation: 1,
        }
    }

    async fn next_reply(rx: &mut mpsc::UnboundedReceiver<SandboxMessage>) -> SandboxMessage {
        loop {
            match rx.recv().await.unwrap() {
                SandboxMessage::LogError { .. } => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn test_ping_and_embed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sandbox = spawn(EmbeddingEngine::fallback_only(), tx);
        assert!(sandbox.is_alive());

        sandbox.post(request(Action::Ping)).unwrap();
        match next_reply(&mut rx).await {
            SandboxMessage::Result { result, .. } => assert_eq!(result["status"], "alive"),
            other => panic!("unexpected reply {other:?}"),
        }

        sandbox
            .post(request(Action::EmbedQuery {
                text: "lions".to_string(),
            }))
            .unwrap();
        match next_reply(&mut rx).await {
            SandboxMessage::Result { result, .. } => {
                assert_eq!(result["vector"].as_array().unwrap().len(), EMBEDDING_DIM)
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fallback_is_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sandbox = spawn(EmbeddingEngine::fallback_only(), tx);

        match rx.recv().await.unwrap() {
            SandboxMessage::LogError { error } => assert!(error.contains("fallback")),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_text_has_no_embedding() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sandbox = spawn(EmbeddingEngine::fallback_only(), tx);

        sandbox
            .post(request(Action::AnalyzeCapture {
                id: 4,
                text: "  ".to_string(),
            }))
            .unwrap();

        match next_reply(&mut rx).await {
            SandboxMessage::AnalysisComplete { result, .. } => {
                assert_eq!(result.id, 4);
                assert!(result.embedding.is_none());
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_task() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sandbox = spawn(EmbeddingEngine::fallback_only(), tx);
        let inbox = sandbox.inbox.clone();
        drop(sandbox);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(inbox.is_closed());
    }
}
