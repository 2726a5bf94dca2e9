//! The core streaming reasoning loop.
//!
//! One `process_llm_stream` turn: call the provider, forward display blocks
//! to the responder while collecting the assistant message, then either
//! dispatch tool calls and re-enter, continue after a length cutoff, retry a
//! transient failure, or return. The stream-reply forwarder for turn N is
//! always drained before turn N+1 begins, which is what keeps per-session
//! transport ordering intact.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use ariadne_config::{AppConfig, SystemConfig};
use ariadne_core::{
    ChatRequest, ContentBlock, InboundMessage, Message, ProviderClient, ProviderError, Responder,
    SessionContext, StreamChunk, Tool, ToolCall, ToolOutput, ToolRegistry, Usage,
    SIGNAL_ROLE_SYSTEM, SIGNAL_THINKING, STOP_REASON_LENGTH, STOP_REASON_STOP,
};
use ariadne_sessions::{ChatHistory, SessionManager};

const UNKNOWN_REASON: &str = "UNKNOWN";
const PREVIEW_CHARS: usize = 100;

const SUMMARIZE_SYSTEM_PROMPT: &str = "You are a conversation analyst. Given the previous summary \
and the newly occurred conversation segment, produce an updated concise summary. Include important \
facts, user preferences, and discussion conclusions. Output only the updated summary text, with no \
preamble or explanation.";

/// Orchestrates LLM communication, tool execution and recursive turn
/// handling for one session at a time.
pub struct AgentEngine {
    client: Arc<dyn ProviderClient>,
    responder: RwLock<Option<Arc<dyn Responder>>>,
    app_cfg: AppConfig,
    sys_cfg: SystemConfig,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionManager>,
}

impl AgentEngine {
    pub fn new(
        client: Arc<dyn ProviderClient>,
        app_cfg: AppConfig,
        sys_cfg: SystemConfig,
        sessions: Arc<SessionManager>,
    ) -> Self {
        client.set_debug(sys_cfg.debug_chunks);
        Self {
            client,
            responder: RwLock::new(None),
            app_cfg,
            sys_cfg,
            tools: Arc::new(ToolRegistry::new()),
            sessions,
        }
    }

    /// Inject the responder the engine replies through. Called once by the
    /// gateway builder before any channel starts.
    pub fn set_responder(&self, responder: Arc<dyn Responder>) {
        *self.responder.write().expect("responder lock poisoned") = Some(responder);
    }

    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.tools.register(tool);
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Primary entry point for one user message.
    pub async fn handle_message(
        &self,
        inbound: &mut InboundMessage,
        history: &Arc<ChatHistory>,
    ) -> Message {
        let session_id = inbound.session.session_id();

        self.ensure_system_prompt(history);

        if inbound.content.starts_with('/') {
            return self.handle_slash_command(inbound, history).await;
        }

        let mut user_msg = Message::user(inbound.content.clone());
        user_msg.content.retain(|b| !matches!(b, ContentBlock::Text { text } if text.is_empty()));
        for file in &inbound.files {
            if let Some(path) = &file.path {
                user_msg.push_block(ContentBlock::image_from_file(path, &file.mime_type));
                info!(name = %file.filename, mime = %file.mime_type, path = %path.display(), "Attached file from disk");
            } else if let Some(data) = &file.data {
                user_msg.push_block(ContentBlock::image(data.clone(), &file.mime_type));
                info!(name = %file.filename, mime = %file.mime_type, bytes = data.len(), "Attached file inline");
            }
        }

        history.append(user_msg);
        self.persist(&session_id);

        let assistant = self.process_llm_stream(inbound, history).await;

        if !assistant.content.is_empty() {
            history.append(assistant.clone());
            self.persist(&session_id);
        }

        self.maybe_summarize(&session_id, history, assistant.usage.as_ref())
            .await;

        assistant
    }

    /// The agentic loop. Each iteration is one provider turn; tool dispatch,
    /// length continuation and transient-error retry all re-enter the loop.
    pub async fn process_llm_stream(
        &self,
        inbound: &mut InboundMessage,
        history: &Arc<ChatHistory>,
    ) -> Message {
        loop {
            let tools = if self.sys_cfg.enable_tools && !inbound.no_tools {
                self.tools.definitions()
            } else {
                Vec::new()
            };
            let request = ChatRequest {
                messages: history.snapshot(),
                tools,
                debug_id: (!inbound.debug_id.is_empty()).then(|| inbound.debug_id.clone()),
            };

            let chunks = match self.client.stream_chat(request).await {
                Ok(rx) => rx,
                Err(e) => {
                    error!(error = %e, "LLM stream init failed");
                    let err_text = format!("Error during stream initiation: {e}");
                    self.reply(&inbound.session, &format!("❌ {err_text}")).await;
                    let mut msg = Message::assistant_empty();
                    msg.push_block(ContentBlock::error(err_text));
                    return msg;
                }
            };

            // Forwarder task: re-enters the originating adapter's stream via
            // the responder while we collect chunks.
            let (block_tx, block_rx) = mpsc::channel(self.sys_cfg.internal_channel_buffer);
            let responder = self.responder();
            let session = inbound.session.clone();
            let stream_task = tokio::spawn(async move {
                match responder {
                    Some(r) => {
                        if let Err(e) = r.stream_reply(&session, block_rx).await {
                            error!(error = %e, "Failed to stream reply");
                        }
                    }
                    None => {
                        let mut rx = block_rx;
                        while rx.recv().await.is_some() {}
                    }
                }
            });

            let deadline = tokio::time::Instant::now()
                + Duration::from_millis(self.sys_cfg.llm_timeout_ms);
            let (assistant, stream_err) = self
                .collect_chunks(&inbound.session, chunks, block_tx, deadline)
                .await;

            // The forwarder must drain before any recursion or return, or
            // turn N+1 output could overtake turn N on the transport.
            let _ = stream_task.await;

            if !assistant.tool_calls.is_empty() {
                if inbound.tool_turn_count >= self.sys_cfg.max_tool_turns {
                    warn!(max = self.sys_cfg.max_tool_turns, "Tool turn limit reached");
                    self.reply(
                        &inbound.session,
                        "❌ Tool turn limit reached, stopping this request.",
                    )
                    .await;
                    let mut msg = assistant;
                    msg.push_block(ContentBlock::error("\n❌ Tool turn limit reached."));
                    return msg;
                }
                inbound.tool_turn_count += 1;

                let session_id = inbound.session.session_id();
                history.append(assistant.clone());
                self.persist(&session_id);

                for tc in &assistant.tool_calls {
                    self.resolve_and_commit_tool_call(tc, inbound, history).await;
                }
                self.persist(&session_id);
                continue;
            }

            let reason = assistant
                .usage
                .as_ref()
                .map(|u| u.stop_reason.clone())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| UNKNOWN_REASON.to_string());
            let (has_text, has_thinking, preview) = summarize_content(&assistant);
            let is_normal = stream_err.is_none()
                && (has_text || has_thinking)
                && (reason == STOP_REASON_STOP || reason == UNKNOWN_REASON);

            if is_normal {
                return assistant;
            }

            if reason == STOP_REASON_LENGTH {
                if (has_text || has_thinking)
                    && inbound.continue_count < self.sys_cfg.max_continuations
                {
                    inbound.continue_count += 1;
                    info!(
                        continuation = %format!(
                            "{}/{}",
                            inbound.continue_count, self.sys_cfg.max_continuations
                        ),
                        preview = %preview,
                        "Truncation detected, continuing"
                    );
                    self.reply(
                        &inbound.session,
                        &format!(
                            "⚠️ Content truncated due to length, attempting to continue ({}/{})...",
                            inbound.continue_count, self.sys_cfg.max_continuations
                        ),
                    )
                    .await;

                    // Commit the partial response so the continuation call
                    // sees it as context.
                    history.append(assistant);
                    self.persist(&inbound.session.session_id());
                    tokio::time::sleep(Duration::from_millis(self.sys_cfg.retry_delay_ms)).await;
                    continue;
                }

                info!(thinking = has_thinking, content = has_text, "Response truncated by length limit");
                self.reply(&inbound.session, "⚠️ Response truncated due to length limit.")
                    .await;
                return assistant;
            }

            if self
                .attempt_retry(inbound, &reason, stream_err.as_ref(), &preview)
                .await
            {
                continue;
            }

            let mut assistant = assistant;
            if let Some(err) = stream_err {
                assistant.push_block(ContentBlock::error(format!("\n❌ Stream error: {err}")));
            } else if !has_text && !has_thinking {
                assistant.push_block(ContentBlock::error(format!(
                    "\n❌ Abnormal response: {reason}"
                )));
            }
            return assistant;
        }
    }

    /// Consume the provider's chunk sequence into an assistant message while
    /// forwarding user-visible blocks. Dispatches the "thinking" signal at
    /// most once, only if the first chunk is slower than the configured
    /// delay.
    async fn collect_chunks(
        &self,
        session: &SessionContext,
        mut chunks: mpsc::Receiver<StreamChunk>,
        block_tx: mpsc::Sender<ContentBlock>,
        deadline: tokio::time::Instant,
    ) -> (Message, Option<ProviderError>) {
        let mut msg = Message::assistant_empty();

        let thinking_timer =
            tokio::time::sleep(Duration::from_millis(self.sys_cfg.thinking_init_delay_ms));
        tokio::pin!(thinking_timer);
        let mut thinking_armed = true;

        loop {
            tokio::select! {
                chunk = chunks.recv() => {
                    let Some(chunk) = chunk else {
                        return (msg, None);
                    };
                    thinking_armed = false;

                    if let Some(err) = chunk.raw_error {
                        return (msg, Some(err));
                    }

                    let is_final = chunk.is_final;
                    let stop_reason = chunk.stop_reason.clone();
                    self.process_chunk(chunk, &mut msg, &block_tx).await;
                    if is_final {
                        if let Some(usage) = msg.usage.as_mut() {
                            if usage.stop_reason.is_empty() {
                                usage.stop_reason = stop_reason;
                            }
                        } else if !stop_reason.is_empty() {
                            msg.usage = Some(Usage {
                                stop_reason,
                                ..Default::default()
                            });
                        }
                        return (msg, None);
                    }
                }
                _ = &mut thinking_timer, if thinking_armed => {
                    self.signal(session, SIGNAL_THINKING).await;
                    thinking_armed = false;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(timeout_ms = self.sys_cfg.llm_timeout_ms, "LLM call deadline exceeded");
                    return (msg, Some(ProviderError::Timeout(
                        "LLM call exceeded configured timeout".into(),
                    )));
                }
            }
        }
    }

    /// Fold one chunk into the assistant message and forward display blocks.
    /// Thinking blocks are always recorded but only forwarded when enabled.
    async fn process_chunk(
        &self,
        chunk: StreamChunk,
        msg: &mut Message,
        block_tx: &mpsc::Sender<ContentBlock>,
    ) {
        if !chunk.error_text.is_empty() {
            let block = ContentBlock::error(format!("\n❌ {}", chunk.error_text));
            msg.push_block(block.clone());
            let _ = block_tx.send(block).await;
        }

        for block in chunk.content_blocks {
            let forward = match &block {
                ContentBlock::Thinking { .. } => self.sys_cfg.show_thinking,
                _ => true,
            };
            msg.push_block(block.clone());
            if forward {
                let _ = block_tx.send(block).await;
            }
        }

        if !chunk.tool_calls.is_empty() {
            msg.tool_calls.extend(chunk.tool_calls);
        }
        if let Some(usage) = chunk.usage {
            msg.usage = Some(usage);
        }
    }

    /// Resolve and execute one tool call, then append the tool message — on
    /// every path, including argument, lookup, execution and panic failures.
    /// An unmatched tool call would fail the provider's next turn outright.
    async fn resolve_and_commit_tool_call(
        &self,
        tc: &ToolCall,
        inbound: &InboundMessage,
        history: &Arc<ChatHistory>,
    ) {
        let result_blocks = self.handle_tool_call(tc).await;

        let tool_msg = Message::tool_result(tc.id.clone(), tc.name.clone(), result_blocks.clone());
        history.append(tool_msg);

        self.signal(&inbound.session, SIGNAL_ROLE_SYSTEM).await;
        self.stream_blocks(&inbound.session, result_blocks).await;
    }

    async fn handle_tool_call(&self, tc: &ToolCall) -> Vec<ContentBlock> {
        let args: serde_json::Map<String, Value> = match serde_json::from_str(&tc.arguments) {
            Ok(args) => args,
            Err(e) => {
                error!(name = %tc.name, error = %e, "Failed to parse tool args");
                return vec![ContentBlock::text(format!(
                    "Error: Failed to parse tool arguments: {e}"
                ))];
            }
        };

        // Some providers prefix tool names with a "functions." namespace.
        let clean_name = tc.name.strip_prefix("functions.").unwrap_or(&tc.name);
        let Some(tool) = self.tools.get(clean_name) else {
            error!(name = %tc.name, clean_name, "Unknown tool call");
            return vec![ContentBlock::text(format!(
                "Error: Unknown tool '{}'",
                tc.name
            ))];
        };

        info!(name = %tc.name, "Executing tool");
        let handle = tokio::spawn(async move { tool.execute(args).await });
        match handle.await {
            Ok(Ok(output)) => convert_tool_output(output),
            Ok(Err(e)) => {
                error!(name = %tc.name, error = %e, "Tool execution error");
                vec![ContentBlock::text(format!(
                    "Error: Tool execution failed: {e}"
                ))]
            }
            Err(join_err) => {
                error!(name = %tc.name, error = %join_err, "Tool execution panicked");
                vec![ContentBlock::text("Error: Internal processing panic")]
            }
        }
    }

    /// Decide whether the current abnormal turn should be retried. Increments
    /// the counter, notifies the user and waits out the delay when it should.
    async fn attempt_retry(
        &self,
        inbound: &mut InboundMessage,
        reason: &str,
        stream_err: Option<&ProviderError>,
        preview: &str,
    ) -> bool {
        if let Some(err) = stream_err {
            if !self.client.is_transient_error(err) {
                error!(error = %err, "Non-transient error, skipping retry");
                self.reply(&inbound.session, &format!("❌ {err}")).await;
                return false;
            }
        }

        let max_retries = self.sys_cfg.max_retries;
        if inbound.retry_count >= max_retries {
            error!(max = max_retries, reason, "Max retries reached");
            self.reply(
                &inbound.session,
                "❌ AI response remains abnormal, please try rephrasing or restarting the conversation.",
            )
            .await;
            return false;
        }

        inbound.retry_count += 1;
        warn!(
            reason,
            error = %stream_err.map(|e| e.to_string()).unwrap_or_default(),
            preview,
            retry = %format!("{}/{}", inbound.retry_count, max_retries),
            "Abnormal response, retrying"
        );

        let notice = match stream_err {
            Some(err) => format!(
                "⚠️ Connection error ({err}), attempting automatic recovery ({}/{})...",
                inbound.retry_count, max_retries
            ),
            None => format!(
                "⚠️ Abnormal response ({reason}), attempting automatic fix ({}/{})...",
                inbound.retry_count, max_retries
            ),
        };
        self.reply(&inbound.session, &notice).await;

        tokio::time::sleep(Duration::from_millis(self.sys_cfg.retry_delay_ms)).await;
        true
    }

    /// Manual slash commands: `/<tool> <action> [params]`. Executes the tool
    /// directly, bypassing both history and the LLM. `/notools` is a virtual
    /// command re-entering the normal flow with tools disabled.
    async fn handle_slash_command(
        &self,
        inbound: &mut InboundMessage,
        history: &Arc<ChatHistory>,
    ) -> Message {
        let content = inbound
            .content
            .trim_start_matches('/')
            .to_string();
        let parts: Vec<&str> = content.splitn(3, ' ').collect();
        if parts.len() < 2 {
            self.reply(
                &inbound.session,
                "❌ Format error. Please use: /[tool_name] [action] [JSON_params(optional)]\nExample: `/os list_directory` or `/os run_command {\"command\":\"ls\"}`",
            )
            .await;
            return Message::assistant_empty();
        }

        let tool_name = parts[0].to_string();
        let action = parts[1].to_string();

        if tool_name == "notools" {
            inbound.no_tools = true;
            inbound.content = match parts.get(2) {
                Some(rest) => format!("{action} {rest}"),
                None => action,
            };

            let assistant = self.process_llm_stream(inbound, history).await;
            if !assistant.content.is_empty() {
                history.append(assistant.clone());
                self.persist(&inbound.session.session_id());
            }
            return assistant;
        }

        let params: serde_json::Map<String, Value> = match parts.get(2) {
            Some(rest) => match serde_json::from_str(rest) {
                Ok(p) => p,
                Err(e) => {
                    // Bare strings are accepted where a single obvious
                    // parameter exists.
                    if (tool_name == "os" || tool_name == "os_control") && action == "run_command" {
                        let mut p = serde_json::Map::new();
                        p.insert("command".into(), Value::String((*rest).to_string()));
                        p
                    } else {
                        self.reply(
                            &inbound.session,
                            &format!("❌ Parameter parsing failed: {e}"),
                        )
                        .await;
                        return Message::assistant_empty();
                    }
                }
            },
            None => serde_json::Map::new(),
        };

        let mut args = serde_json::Map::new();
        args.insert("action".into(), Value::String(action.clone()));
        args.extend(params);

        let tool = match self.tools.get(&tool_name) {
            Some(t) => t,
            None => match self.tools.get(&format!("{tool_name}_control")) {
                Some(t) => t,
                None => {
                    self.reply(&inbound.session, &format!("❌ Tool not found: {tool_name}"))
                        .await;
                    return Message::assistant_empty();
                }
            },
        };

        self.reply(
            &inbound.session,
            &format!("🛠️ Manually executing tool: {tool_name}/{action}..."),
        )
        .await;

        let result = match tool.execute(args).await {
            Ok(res) => res,
            Err(e) => {
                self.reply(&inbound.session, &format!("❌ Execution error: {e}"))
                    .await;
                return Message::assistant_empty();
            }
        };

        let blocks = convert_tool_output(result);
        self.stream_blocks(&inbound.session, blocks.clone()).await;

        let mut msg = Message::assistant_empty();
        msg.content = blocks;
        msg
    }

    /// Trigger sliding-window summarization when the history outgrows any of
    /// the configured budgets. Failures leave the history untouched; the next
    /// turn re-attempts.
    async fn maybe_summarize(
        &self,
        session_id: &str,
        history: &Arc<ChatHistory>,
        usage: Option<&Usage>,
    ) {
        let keep = self.sys_cfg.history_keep_recent_count;
        let threshold = self.sys_cfg.history_summarize_threshold;
        let max_chars = self.sys_cfg.history_max_chars;
        let max_tokens = self.sys_cfg.history_max_tokens;

        let msgs = history.snapshot();
        if msgs.len() <= keep {
            return;
        }

        let over_tokens = usage
            .map(|u| u.total_tokens > 0 && max_tokens > 0 && u.total_tokens >= max_tokens)
            .unwrap_or(false);

        let total_chars: usize = if over_tokens {
            0
        } else {
            msgs.iter().map(|m| m.text_content().len()).sum()
        };

        let over_count = threshold > 0 && msgs.len() >= threshold;
        let over_size = max_chars > 0 && total_chars >= max_chars;

        if !over_tokens && !over_count && !over_size {
            return;
        }

        info!(session = session_id, "Triggering sliding window summarization");

        match self.summarize_session(history).await {
            Ok(summary) => {
                history.set_summary(summary);
                history.truncate_keep(keep);
                self.persist(session_id);
                info!(session = session_id, "Session summarized successfully");
            }
            Err(e) => {
                error!(session = session_id, error = %e, "Failed to summarize session");
            }
        }
    }

    /// Nested LLM call producing the merged summary of everything between
    /// the system message and the kept recent tail.
    async fn summarize_session(
        &self,
        history: &Arc<ChatHistory>,
    ) -> Result<String, ProviderError> {
        let msgs = history.snapshot();
        let keep = self.sys_cfg.history_keep_recent_count;
        let existing = history.summary();

        if msgs.len() <= keep + 1 {
            return Ok(existing);
        }

        let prior = if existing.is_empty() {
            "(no summary yet)".to_string()
        } else {
            existing
        };

        let mut formatted = String::new();
        for msg in &msgs[1..msgs.len() - keep] {
            let text = msg.text_content();
            let text = text.trim();
            if !text.is_empty() {
                formatted.push_str(&format!("[{}]: {text}\n", role_label(&msg.role)));
            }
        }

        let request = ChatRequest::new(vec![
            Message::system(SUMMARIZE_SYSTEM_PROMPT),
            Message::user(format!(
                "[Previous summary]:\n{prior}\n\n[New conversation segment to summarize]:\n{formatted}\nProvide the updated merged summary:"
            )),
        ]);

        let mut chunks = self.client.stream_chat(request).await?;
        let mut summary = String::new();
        while let Some(chunk) = chunks.recv().await {
            if let Some(err) = chunk.raw_error {
                return Err(err);
            }
            for block in chunk.content_blocks {
                if let ContentBlock::Text { text } = block {
                    summary.push_str(&text);
                }
            }
        }

        Ok(summary)
    }

    /// Ensure the system-prompt slot is populated, folding in the current
    /// summary to maintain contextual continuity.
    fn ensure_system_prompt(&self, history: &Arc<ChatHistory>) {
        let mut prompt = self.app_cfg.system_prompt.clone();

        let summary = history.summary();
        if !summary.is_empty() {
            prompt = format!("{prompt}\n\n[CONVERSATION SUMMARY]\n{summary}");
        }

        if !prompt.is_empty() {
            history.ensure_system_message(prompt);
        }
    }

    fn persist(&self, session_id: &str) {
        if let Err(e) = self.sessions.save_session(session_id) {
            error!(session = session_id, error = %e, "Failed to persist session");
        }
    }

    fn responder(&self) -> Option<Arc<dyn Responder>> {
        self.responder
            .read()
            .expect("responder lock poisoned")
            .clone()
    }

    async fn reply(&self, session: &SessionContext, text: &str) {
        if let Some(responder) = self.responder() {
            if let Err(e) = responder.send_reply(session, text).await {
                error!(error = %e, "Failed to send reply");
            }
        }
    }

    async fn signal(&self, session: &SessionContext, signal: &str) {
        if let Some(responder) = self.responder() {
            if let Err(e) = responder.send_signal(session, signal).await {
                debug!(error = %e, signal, "Failed to send signal");
            }
        }
    }

    /// Pipe a finished slice of blocks through the responder as one stream.
    async fn stream_blocks(&self, session: &SessionContext, blocks: Vec<ContentBlock>) {
        if blocks.is_empty() {
            return;
        }
        let Some(responder) = self.responder() else {
            return;
        };
        let (tx, rx) = mpsc::channel(blocks.len());
        for block in blocks {
            let _ = tx.send(block).await;
        }
        drop(tx);
        if let Err(e) = responder.stream_reply(session, rx).await {
            error!(error = %e, "Failed to stream blocks");
        }
    }
}

impl ariadne_core::ResponderAware for AgentEngine {
    fn set_responder(&self, responder: Arc<dyn Responder>) {
        AgentEngine::set_responder(self, responder);
    }
}

fn role_label(role: &ariadne_core::Role) -> &'static str {
    match role {
        ariadne_core::Role::User => "user",
        ariadne_core::Role::Assistant => "assistant",
        ariadne_core::Role::Tool => "tool",
        ariadne_core::Role::System => "system",
    }
}

/// One pass over an assistant message: whether it has text, whether it has
/// thinking, and a short text preview for logs.
pub(crate) fn summarize_content(msg: &Message) -> (bool, bool, String) {
    let mut has_text = false;
    let mut has_thinking = false;
    let mut preview = String::new();

    for block in &msg.content {
        match block {
            ContentBlock::Thinking { text, .. } if !text.is_empty() => has_thinking = true,
            ContentBlock::Text { text } if !text.is_empty() => {
                has_text = true;
                if preview.chars().count() < PREVIEW_CHARS {
                    let remaining = PREVIEW_CHARS - preview.chars().count();
                    preview.extend(text.chars().take(remaining));
                }
            }
            _ => {}
        }
    }

    if preview.chars().count() >= PREVIEW_CHARS {
        preview.push_str("...");
    }
    (has_text, has_thinking, preview)
}

/// Map a tool's structured output onto history content blocks. Decode
/// failures degrade to a text notice and an empty result synthesizes
/// "(No output)" — providers reject empty tool messages.
pub(crate) fn convert_tool_output(output: ToolOutput) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    for block in output.content {
        match block {
            ariadne_core::ToolBlock::Text { text } => blocks.push(ContentBlock::text(text)),
            ariadne_core::ToolBlock::Image { data, mime_type } => {
                match BASE64.decode(data.as_bytes()) {
                    Ok(bytes) => {
                        let mime = mime_type.unwrap_or_else(|| "image/png".into());
                        blocks.push(ContentBlock::image(bytes, mime));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to decode image data");
                        blocks.push(ContentBlock::text(format!(
                            "Error: Failed to decode image: {e}"
                        )));
                    }
                }
            }
        }
    }
    if blocks.is_empty() {
        blocks.push(ContentBlock::text("(No output)"));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use ariadne_core::ToolBlock;

    #[test]
    fn summarize_content_flags_and_preview() {
        let mut msg = Message::assistant_empty();
        msg.push_block(ContentBlock::thinking("deliberating"));
        msg.push_block(ContentBlock::text("a".repeat(150)));

        let (has_text, has_thinking, preview) = summarize_content(&msg);
        assert!(has_text);
        assert!(has_thinking);
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn summarize_content_empty_message() {
        let msg = Message::assistant_empty();
        let (has_text, has_thinking, preview) = summarize_content(&msg);
        assert!(!has_text);
        assert!(!has_thinking);
        assert!(preview.is_empty());
    }

    #[test]
    fn convert_tool_output_text_and_image() {
        let output = ToolOutput {
            content: vec![
                ToolBlock::Text {
                    text: "listing".into(),
                },
                ToolBlock::Image {
                    data: BASE64.encode([1, 2, 3]),
                    mime_type: Some("image/jpeg".into()),
                },
            ],
            details: serde_json::Map::new(),
        };
        let blocks = convert_tool_output(output);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "listing"));
        let ContentBlock::Image { source } = &blocks[1] else {
            panic!("expected image");
        };
        assert_eq!(source.media_type, "image/jpeg");
        assert_eq!(source.data.as_deref(), Some([1u8, 2, 3].as_slice()));
    }

    #[test]
    fn convert_tool_output_bad_image_degrades() {
        let output = ToolOutput {
            content: vec![ToolBlock::Image {
                data: "!!not-base64!!".into(),
                mime_type: None,
            }],
            details: serde_json::Map::new(),
        };
        let blocks = convert_tool_output(output);
        assert!(
            matches!(&blocks[0], ContentBlock::Text { text } if text.starts_with("Error: Failed to decode image"))
        );
    }

    #[test]
    fn convert_tool_output_empty_synthesizes_placeholder() {
        let blocks = convert_tool_output(ToolOutput::default());
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "(No output)"));
    }
}
