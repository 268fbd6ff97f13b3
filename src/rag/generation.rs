//! Streaming answer generation.
//!
//! Each request gets its own worker task that polls the model stream and
//! pushes [`StreamChunk`]s into a bounded channel. The response side drains
//! the channel, so a slow client applies backpressure to the model instead of
//! buffering tokens without limit.
//!
//! Guarantees of the returned stream:
//! - the sources chunk, when present, comes first;
//! - tokens follow in generation order;
//! - a backend failure or worker panic yields one `{error}` chunk;
//! - exactly one `{content: "", done: true}` chunk ends every stream.
//!
//! When the client disconnects the response stream is dropped with the
//! receiver. The worker notices the closed channel, stops polling and drops
//! the model stream, which aborts the backend request.

use crate::llm::LLMClient;
use crate::rag::retrieval::build_context;
use crate::types::{AppError, Message, MessageRole, Result, RetrievalResult, StreamChunk};
use async_stream::stream;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Chunks of one generation, ready for the SSE layer.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Wrap the latest user message around the retrieved context.
pub fn render_prompt(query: &str, context: &str) -> String {
    format!(
        "User Query: {query}\n\nReference Documents:\n{context}\n\n\
         Please answer the query based on the reference documents above."
    )
}

/// Streams grounded answers from a chat model.
pub struct StreamingGenerator {
    llm: Arc<dyn LLMClient>,
    system_prompt: Option<String>,
    channel_capacity: usize,
}

impl StreamingGenerator {
    /// Wrap a chat client.
    pub fn new(
        llm: Arc<dyn LLMClient>,
        system_prompt: Option<String>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            llm,
            system_prompt,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Model the client talks to.
    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Messages sent to the model: optional system prompt, then the
    /// conversation with its last user turn rewritten around `context`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the conversation is empty or has no user message.
    pub fn build_messages(&self, messages: &[Message], context: &str) -> Result<Vec<Message>> {
        if messages.is_empty() {
            return Err(AppError::InvalidInput(
                "At least one message is required".to_string(),
            ));
        }
        let last_user = messages
            .iter()
            .rposition(|m| m.role == MessageRole::User)
            .ok_or_else(|| AppError::InvalidInput("No user message found".to_string()))?;

        let mut out = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = self.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            out.push(Message::system(system));
        }
        for (idx, message) in messages.iter().enumerate() {
            if idx == last_user && !context.is_empty() {
                out.push(Message::user(render_prompt(&message.content, context)));
            } else {
                out.push(message.clone());
            }
        }
        Ok(out)
    }

    /// Start generating an answer to `messages` grounded in `sources`.
    ///
    /// `announce` controls whether a sources chunk opens the stream; when it
    /// is set the chunk is sent even if `sources` is empty.
    pub fn stream(
        &self,
        messages: &[Message],
        sources: Vec<RetrievalResult>,
        announce: bool,
    ) -> Result<ChunkStream> {
        let context = build_context(&sources);
        let prompt = self.build_messages(messages, &context)?;

        let (tx, mut rx) = mpsc::channel(self.channel_capacity);
        let worker = tokio::spawn(run_worker(Arc::clone(&self.llm), prompt, tx));

        tracing::debug!(
            model = self.llm.model_name(),
            sources = sources.len(),
            context_chars = context.len(),
            "Generation started"
        );

        let output = stream! {
            if announce {
                yield StreamChunk::Sources { sources };
            }

            while let Some(chunk) = rx.recv().await {
                yield chunk;
            }

            if let Err(e) = worker.await {
                if e.is_panic() {
                    tracing::error!("Generation worker panicked");
                    yield StreamChunk::error("Generation failed unexpectedly");
                }
            }

            yield StreamChunk::done();
        };

        Ok(Box::pin(output))
    }
}

/// Poll the model and forward tokens until it finishes, fails, or the
/// receiver goes away.
async fn run_worker(llm: Arc<dyn LLMClient>, messages: Vec<Message>, tx: mpsc::Sender<StreamChunk>) {
    let start = Instant::now();

    let opened = tokio::select! {
        _ = tx.closed() => {
            tracing::debug!("Client disconnected before generation started");
            return;
        }
        opened = llm.stream_chat(&messages) => opened,
    };

    let mut tokens = match opened {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to start generation");
            let _ = tx.send(StreamChunk::error(e.to_string())).await;
            return;
        }
    };

    let mut count = 0usize;
    loop {
        tokio::select! {
            _ = tx.closed() => {
                tracing::info!(tokens = count, "Client disconnected, generation cancelled");
                return;
            }
            next = tokens.next() => match next {
                Some(Ok(token)) => {
                    count += 1;
                    if tx.send(StreamChunk::token(token)).await.is_err() {
                        tracing::info!(tokens = count, "Client disconnected, generation cancelled");
                        return;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, tokens = count, "Generation failed mid-stream");
                    let _ = tx.send(StreamChunk::error(e.to_string())).await;
                    return;
                }
                None => break,
            }
        }
    }

    tracing::info!(
        model = llm.model_name(),
        tokens = count,
        duration_ms = start.elapsed().as_millis() as u64,
        "Generation completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LLMStream;
    use crate::types::SourceKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    enum Script {
        Tokens(Vec<&'static str>),
        FailToStart,
        FailAfter(Vec<&'static str>),
        Panic,
        Endless,
    }

    struct ScriptedLLM {
        script: Script,
        produced: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
        seen: parking_lot::Mutex<Vec<Message>>,
    }

    impl ScriptedLLM {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                produced: Arc::new(AtomicUsize::new(0)),
                dropped: Arc::new(AtomicBool::new(false)),
                seen: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    /// Flags the owning stream as dropped.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedLLM {
        async fn stream_chat(&self, messages: &[Message]) -> Result<LLMStream> {
            *self.seen.lock() = messages.to_vec();
            let produced = Arc::clone(&self.produced);
            let flag = DropFlag(Arc::clone(&self.dropped));

            match &self.script {
                Script::FailToStart => Err(AppError::LLM("connection refused".to_string())),
                Script::Tokens(tokens) => {
                    let tokens = tokens.clone();
                    Ok(Box::new(Box::pin(stream! {
                        let _flag = flag;
                        for t in tokens {
                            produced.fetch_add(1, Ordering::SeqCst);
                            yield Ok(t.to_string());
                        }
                    })))
                }
                Script::FailAfter(tokens) => {
                    let tokens = tokens.clone();
                    Ok(Box::new(Box::pin(stream! {
                        let _flag = flag;
                        for t in tokens {
                            yield Ok(t.to_string());
                        }
                        yield Err(AppError::LLM("model crashed".to_string()));
                    })))
                }
                Script::Panic => Ok(Box::new(Box::pin(stream! {
                    let _flag = flag;
                    yield Ok("partial".to_string());
                    panic!("boom");
                }))),
                Script::Endless => Ok(Box::new(Box::pin(stream! {
                    let _flag = flag;
                    loop {
                        produced.fetch_add(1, Ordering::SeqCst);
                        yield Ok("tok ".to_string());
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                }))),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn source(id: &str) -> RetrievalResult {
        RetrievalResult {
            id: id.to_string(),
            doc_path: format!("{}.txt", id),
            text: format!("text of {}", id),
            score: Some(0.5),
            source: SourceKind::Text,
        }
    }

    async fn collect(stream: ChunkStream) -> Vec<StreamChunk> {
        stream.collect().await
    }

    #[test]
    fn test_prompt_template() {
        assert_eq!(
            render_prompt("Why?", "[Document: a]\nx"),
            "User Query: Why?\n\nReference Documents:\n[Document: a]\nx\n\n\
             Please answer the query based on the reference documents above."
        );
    }

    #[test]
    fn test_build_messages_rewrites_last_user_turn() {
        let generator =
            StreamingGenerator::new(ScriptedLLM::new(Script::Tokens(vec![])), None, 4);
        let messages = vec![
            Message::user("first"),
            Message::assistant("answer"),
            Message::user("second"),
        ];

        let out = generator.build_messages(&messages, "CTX").unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].content, "first");
        assert_eq!(out[1].content, "answer");
        assert!(out[2].content.starts_with("User Query: second"));
        assert!(out[2].content.contains("CTX"));

        let untouched = generator.build_messages(&messages, "").unwrap();
        assert_eq!(untouched[2].content, "second");
    }

    #[test]
    fn test_build_messages_prepends_system_prompt() {
        let generator = StreamingGenerator::new(
            ScriptedLLM::new(Script::Tokens(vec![])),
            Some("Be brief.".to_string()),
            4,
        );
        let out = generator
            .build_messages(&[Message::user("hi")], "")
            .unwrap();
        assert_eq!(out[0].role, MessageRole::System);
        assert_eq!(out[0].content, "Be brief.");
        assert_eq!(out[1].content, "hi");
    }

    #[test]
    fn test_build_messages_requires_user_turn() {
        let generator =
            StreamingGenerator::new(ScriptedLLM::new(Script::Tokens(vec![])), None, 4);
        assert!(matches!(
            generator.build_messages(&[], ""),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            generator.build_messages(&[Message::assistant("hello")], ""),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_sources_then_tokens_then_done() {
        let llm = ScriptedLLM::new(Script::Tokens(vec!["Hel", "lo"]));
        let generator = StreamingGenerator::new(llm.clone(), None, 4);

        let chunks = collect(
            generator
                .stream(&[Message::user("q")], vec![source("a")], true)
                .unwrap(),
        )
        .await;

        assert_eq!(chunks.len(), 4);
        assert!(matches!(&chunks[0], StreamChunk::Sources { sources } if sources.len() == 1));
        assert_eq!(chunks[1], StreamChunk::token("Hel"));
        assert_eq!(chunks[2], StreamChunk::token("lo"));
        assert_eq!(chunks[3], StreamChunk::done());

        let seen = llm.seen.lock().clone();
        assert!(seen[0].content.contains("[Document: a.txt]"));
    }

    #[tokio::test]
    async fn test_no_sources_chunk_unless_announced() {
        let generator =
            StreamingGenerator::new(ScriptedLLM::new(Script::Tokens(vec!["x"])), None, 4);
        let chunks = collect(
            generator
                .stream(&[Message::user("q")], Vec::new(), false)
                .unwrap(),
        )
        .await;
        assert_eq!(chunks, vec![StreamChunk::token("x"), StreamChunk::done()]);
    }

    #[tokio::test]
    async fn test_start_failure_yields_error_then_done() {
        let generator = StreamingGenerator::new(ScriptedLLM::new(Script::FailToStart), None, 4);
        let chunks = collect(
            generator
                .stream(&[Message::user("q")], Vec::new(), false)
                .unwrap(),
        )
        .await;

        assert_eq!(chunks.len(), 2);
        assert!(matches!(&chunks[0], StreamChunk::Error { error } if error.contains("connection refused")));
        assert!(chunks[1].is_done());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_tokens() {
        let generator =
            StreamingGenerator::new(ScriptedLLM::new(Script::FailAfter(vec!["a", "b"])), None, 4);
        let chunks = collect(
            generator
                .stream(&[Message::user("q")], Vec::new(), false)
                .unwrap(),
        )
        .await;

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], StreamChunk::token("a"));
        assert_eq!(chunks[1], StreamChunk::token("b"));
        assert!(matches!(&chunks[2], StreamChunk::Error { .. }));
        assert_eq!(chunks.iter().filter(|c| c.is_done()).count(), 1);
        assert!(chunks[3].is_done());
    }

    #[tokio::test]
    async fn test_worker_panic_still_terminates() {
        let generator = StreamingGenerator::new(ScriptedLLM::new(Script::Panic), None, 4);
        let chunks = collect(
            generator
                .stream(&[Message::user("q")], Vec::new(), false)
                .unwrap(),
        )
        .await;

        assert_eq!(chunks.first(), Some(&StreamChunk::token("partial")));
        assert!(chunks.iter().any(|c| matches!(c, StreamChunk::Error { .. })));
        assert_eq!(chunks.iter().filter(|c| c.is_done()).count(), 1);
        assert!(chunks.last().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_dropping_consumer_cancels_worker() {
        let llm = ScriptedLLM::new(Script::Endless);
        let generator = StreamingGenerator::new(llm.clone(), None, 2);

        let mut stream = generator
            .stream(&[Message::user("q")], Vec::new(), false)
            .unwrap();
        assert!(matches!(stream.next().await, Some(StreamChunk::Token { .. })));
        assert!(matches!(stream.next().await, Some(StreamChunk::Token { .. })));
        drop(stream);

        let mut waited = 0;
        while !llm.dropped.load(Ordering::SeqCst) && waited < 200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert!(llm.dropped.load(Ordering::SeqCst), "model stream was not dropped");

        let produced = llm.produced.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(llm.produced.load(Ordering::SeqCst), produced);
    }

    #[tokio::test]
    async fn test_invalid_messages_fail_before_streaming() {
        let generator =
            StreamingGenerator::new(ScriptedLLM::new(Script::Tokens(vec![])), None, 4);
        assert!(generator.stream(&[], Vec::new(), true).is_err());
    }
}
