//! Session orchestrator: the entry point for every host event.
//!
//! A single orchestrator owns the authoritative state of every dialogue —
//! sessions, batches, outstanding calls, cooldowns — and is mutated only
//! from the event path. The host (or the [`crate::runtime`] actor standing
//! in for it) delivers one event at a time; nothing here blocks, and every
//! external call is dispatched fire-and-forget with its continuation parked
//! in the correlation table.

pub mod batch;
pub mod cooldown;
pub mod pending;
pub mod report;
pub mod session;
pub mod triage;

use crate::config::Config;
use crate::error::Result;
use crate::normalize::{normalize_message, summarize_mentions};
use crate::ports::{ChatMessage, ChatRole, ModelOptions, Ports};
use crate::{HostEvent, InboundMessage, RequestId, RoomInfoKind, SessionKey};

use crate::orchestrator::batch::{BatchItem, MessageBatcher, render_evidence};
use crate::orchestrator::cooldown::CooldownManager;
use crate::orchestrator::pending::{
    ContextStage, PendingCall, PendingCalls, RequestKind, RequestPayload, RequestTimeouts,
};
use crate::orchestrator::session::{RoomContext, Session, SessionState, SessionStore};

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Token budget for the cheap triage call. The verdict is one line.
const TRIAGE_MAX_TOKENS: u32 = 256;

/// Trailing user turn appended to the transcript when asking for a report.
const REPORT_REQUEST: &str = "Write the report now, exactly as instructed.";

/// The facade invoked on every inbound message and every periodic tick.
pub struct Orchestrator {
    config: Arc<Config>,
    ports: Ports,
    timeouts: RequestTimeouts,
    sessions: SessionStore,
    batches: MessageBatcher,
    pending: PendingCalls,
    cooldowns: CooldownManager,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, ports: Ports) -> Self {
        let timeouts = RequestTimeouts {
            triage: Duration::seconds(config.triage_timeout_secs as i64),
            context_fetch: Duration::seconds(config.context_timeout_secs as i64),
            reply: Duration::seconds(config.reply_timeout_secs as i64),
            report: Duration::seconds(config.report_timeout_secs as i64),
        };
        Self {
            config,
            ports,
            timeouts,
            sessions: SessionStore::new(),
            batches: MessageBatcher::new(),
            pending: PendingCalls::new(),
            cooldowns: CooldownManager::new(),
        }
    }

    /// Top-level dispatch. The caller logs and discards the result; one
    /// failing conversation must never block event processing for another.
    pub fn handle_event(&mut self, event: HostEvent, now: DateTime<Utc>) -> Result<()> {
        match event {
            HostEvent::Message(message) => self.on_message(message, now),
            HostEvent::Tick => self.on_tick(now),
            HostEvent::ModelResult {
                request_id,
                success,
                content,
            } => self.on_model_result(request_id, success, content, now),
            HostEvent::RoomInfo {
                request_id,
                kind,
                success,
                content,
            } => self.on_room_info(request_id, kind, success, content, now),
        }
    }

    // -----------------------------------------------------------------------
    // inbound messages
    // -----------------------------------------------------------------------

    fn on_message(&mut self, message: InboundMessage, now: DateTime<Utc>) -> Result<()> {
        let assistant = self.config.assistant();
        if message.sender == assistant {
            return Ok(());
        }

        let key = message.key();
        let summary = summarize_mentions(&message, assistant);
        let text = normalize_message(&message, assistant);

        if self.sessions.contains(&key) {
            return self.on_session_message(key, text, now);
        }

        // No active session: this message is triage evidence, or nothing.
        if summary.mentions_other && !summary.mentions_assistant {
            // Addressed at someone else; the assistant stays out of it.
            return Ok(());
        }
        if text.is_empty() {
            return Ok(());
        }
        if self.cooldowns.is_cooling(&key, self.config.cooldown(), now) {
            tracing::debug!(key = %key, "message dropped, key is on cooldown");
            return Ok(());
        }

        let count = self.batches.offer(
            key,
            BatchItem {
                at: message.timestamp,
                text,
                mentioned: summary.mentions_assistant,
            },
        );

        if summary.mentions_assistant {
            // Urgent: an explicit mention bypasses the merge window.
            self.flush_batch(key, now);
        } else if count >= self.config.batch_cap {
            // Overflow valve: bound memory even if the key never goes due.
            self.flush_batch(key, now);
        }
        Ok(())
    }

    fn on_session_message(
        &mut self,
        key: SessionKey,
        text: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(state) = self.sessions.get(&key).map(|session| session.state) else {
            return Ok(());
        };

        if state == SessionState::GeneratingReport {
            // The report in flight covers the transcript at issuance time;
            // late input is recorded but triggers nothing.
            if let Some(session) = self.sessions.get_mut(&key) {
                if text.is_empty() {
                    session.touch(now);
                } else {
                    session.push_user(text, now);
                }
            }
            return Ok(());
        }

        if matches_keyword(&text, &self.config.interrupt_keywords) {
            let notice = self.config.notices.interrupt_ack.clone();
            self.end_session(&key, now, Some(&notice));
            return Ok(());
        }

        if matches_keyword(&text, &self.config.report_keywords) {
            let reply_outstanding = self
                .sessions
                .get(&key)
                .is_some_and(|session| session.pending_call.is_some());
            if let Some(session) = self.sessions.get_mut(&key) {
                session.touch(now);
                if reply_outstanding {
                    session.report_requested = true;
                }
            }
            if !reply_outstanding {
                self.begin_report(&key, now);
            }
            return Ok(());
        }

        if text.is_empty() {
            if let Some(session) = self.sessions.get_mut(&key) {
                session.touch(now);
            }
            return Ok(());
        }

        let reply_outstanding = {
            let Some(session) = self.sessions.get_mut(&key) else {
                return Ok(());
            };
            session.push_user(text, now);
            if session.pending_call.is_some() {
                // At most one in-flight reply per session; drain on resolve.
                session.needs_reply = true;
                true
            } else {
                false
            }
        };
        if !reply_outstanding {
            self.issue_reply(&key, now);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // triage pipeline
    // -----------------------------------------------------------------------

    fn flush_batch(&mut self, key: SessionKey, now: DateTime<Utc>) {
        if self.pending.has_pipeline(&key) {
            // At most one triage/context pipeline per key: put the built
            // payload back at the front instead of issuing twice.
            if let Some(payload) = self.batches.take_payload(&key, self.config.batch_cap) {
                self.batches.requeue_front(key, payload.items);
            }
            tracing::debug!(key = %key, "flush skipped, pipeline already outstanding");
            return;
        }

        let Some(payload) = self.batches.take_payload(&key, self.config.batch_cap) else {
            return;
        };

        match key.room {
            Some(room) => {
                // Room sessions gather announcements + recent history first;
                // the snapshot seeds both triage and the first reply.
                let id = RequestId::new();
                self.pending.insert(PendingCall {
                    id,
                    kind: RequestKind::ContextFetch,
                    key,
                    created_at: now,
                    payload: RequestPayload::ContextFetch {
                        stage: ContextStage::Announcements,
                        items: payload.items,
                        any_mentioned: payload.any_mentioned,
                        partial: RoomContext::default(),
                    },
                });
                self.ports.room.fetch_announcements(id, room);
            }
            None => self.issue_triage(key, payload.items, payload.any_mentioned, None, now),
        }
    }

    fn issue_triage(
        &mut self,
        key: SessionKey,
        items: Vec<BatchItem>,
        any_mentioned: bool,
        context: Option<RoomContext>,
        now: DateTime<Utc>,
    ) {
        let evidence = render_evidence(&items);
        let context_text = context
            .as_ref()
            .map(|context| context.render())
            .unwrap_or_default();
        let prompt =
            self.config
                .prompts
                .render_triage(&self.config.assistant_name, &evidence, &context_text);

        let id = RequestId::new();
        self.pending.insert(PendingCall {
            id,
            kind: RequestKind::Triage,
            key,
            created_at: now,
            payload: RequestPayload::Triage {
                items,
                any_mentioned,
                context,
            },
        });

        let messages = vec![ChatMessage::new(ChatRole::User, prompt)];
        let options = ModelOptions {
            model: self.config.triage_model.clone(),
            max_tokens: TRIAGE_MAX_TOKENS,
            enable_search: false,
        };
        self.ports.model.call_model(id, &messages, &options);
        tracing::debug!(key = %key, request_id = %id, "triage issued");
    }

    fn on_room_info(
        &mut self,
        request_id: RequestId,
        kind: RoomInfoKind,
        success: bool,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(call) = self.pending.resolve(request_id) else {
            tracing::debug!(request_id = %request_id, "room info for unknown request id, ignoring");
            return Ok(());
        };
        let key = call.key;
        let RequestPayload::ContextFetch {
            stage,
            items,
            any_mentioned,
            mut partial,
        } = call.payload
        else {
            tracing::warn!(key = %key, "room info delivered for a non-context call, dropping");
            return Ok(());
        };

        match stage {
            ContextStage::Announcements => {
                if kind != RoomInfoKind::Announcements {
                    tracing::debug!(key = %key, "room info kind mismatch, continuing by stage");
                }
                if success && !content.trim().is_empty() {
                    partial.announcements = Some(content.trim().to_string());
                }
                let Some(room) = key.room else {
                    // A context fetch was somehow issued for a DM; degrade to
                    // triage with whatever we have.
                    self.issue_triage(key, items, any_mentioned, none_if_empty(partial), now);
                    return Ok(());
                };
                let id = RequestId::new();
                self.pending.insert(PendingCall {
                    id,
                    kind: RequestKind::ContextFetch,
                    key,
                    created_at: now,
                    payload: RequestPayload::ContextFetch {
                        stage: ContextStage::History,
                        items,
                        any_mentioned,
                        partial,
                    },
                });
                self.ports.room.fetch_history(id, room, self.config.history_count);
            }
            ContextStage::History => {
                if success && !content.trim().is_empty() {
                    partial.recent_history = Some(content.trim().to_string());
                }
                self.issue_triage(key, items, any_mentioned, none_if_empty(partial), now);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // model results
    // -----------------------------------------------------------------------

    fn on_model_result(
        &mut self,
        request_id: RequestId,
        success: bool,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(call) = self.pending.resolve(request_id) else {
            // Not every completion the host sees belongs to this subsystem.
            tracing::debug!(request_id = %request_id, "model result for unknown request id, ignoring");
            return Ok(());
        };
        match call.kind {
            RequestKind::Triage => return self.finish_triage(call, success, content, now),
            RequestKind::Reply => self.finish_reply(call, success, content, now),
            RequestKind::Report => self.finish_report(call, success, content, now),
            RequestKind::ContextFetch => {
                tracing::warn!(key = %call.key, "model result delivered for a context fetch, dropping");
            }
        }
        Ok(())
    }

    fn finish_triage(
        &mut self,
        call: PendingCall,
        success: bool,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let key = call.key;
        let RequestPayload::Triage {
            items,
            any_mentioned,
            context,
        } = call.payload
        else {
            tracing::warn!(key = %key, "triage result without triage payload, dropping");
            return Ok(());
        };

        if !success {
            // Retry on the next due cycle; the evidence is not lost.
            tracing::debug!(key = %key, "triage call failed, evidence re-queued");
            self.batches.requeue_front(key, items);
            return Ok(());
        }

        let decision = triage::parse_decision(&content, self.config.min_confidence);
        if !decision.engage {
            tracing::debug!(
                key = %key,
                confidence = decision.confidence,
                "triage declined"
            );
            return Ok(());
        }

        if self.sessions.contains(&key) {
            return Err(crate::ParleyError::SessionExists { key });
        }
        if self.cooldowns.is_cooling(&key, self.config.cooldown(), now) {
            tracing::debug!(key = %key, "triage affirmed but key is on cooldown");
            return Ok(());
        }

        let mut session = Session::new(key, any_mentioned, context, now);
        let opener = items
            .iter()
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        session.push_user(opener, now);
        // Fragments that raced the triage call are appended immediately so
        // nothing is lost between issuance and this result.
        for late in self.batches.drain_all(&key) {
            session.push_user(late.text, now);
        }
        self.sessions.insert(session);
        tracing::info!(key = %key, confidence = decision.confidence, "session started");

        self.issue_reply(&key, now);
        Ok(())
    }

    fn issue_reply(&mut self, key: &SessionKey, now: DateTime<Utc>) {
        let (id, messages) = {
            let Some(session) = self.sessions.get_mut(key) else {
                return;
            };
            if session.pending_call.is_some() {
                session.needs_reply = true;
                return;
            }
            session.needs_reply = false;
            let id = RequestId::new();
            session.pending_call = Some(id);
            (id, build_reply_messages(&self.config, session))
        };

        self.pending.insert(PendingCall {
            id,
            kind: RequestKind::Reply,
            key: *key,
            created_at: now,
            payload: RequestPayload::Reply,
        });
        let options = ModelOptions {
            model: self.config.chat_model.clone(),
            max_tokens: self.config.max_tokens,
            enable_search: self.config.enable_search,
        };
        self.ports.model.call_model(id, &messages, &options);
        tracing::debug!(key = %key, request_id = %id, "reply issued");
    }

    fn finish_reply(
        &mut self,
        call: PendingCall,
        success: bool,
        content: String,
        now: DateTime<Utc>,
    ) {
        let key = call.key;
        let accepted = match self.sessions.get_mut(&key) {
            Some(session) if session.pending_call == Some(call.id) => {
                session.pending_call = None;
                if success {
                    session.push_assistant(content.clone(), now);
                }
                true
            }
            Some(_) => {
                tracing::debug!(key = %key, "stale reply result, dropping");
                false
            }
            None => {
                tracing::debug!(key = %key, "reply result for a removed session, dropping");
                false
            }
        };
        if !accepted {
            return;
        }

        if !success {
            let notice = self.config.notices.reply_failed.clone();
            self.ports.chat.send_reply(key.user, key.room, &notice);
            self.end_session(&key, now, None);
            return;
        }

        self.ports.chat.send_reply(key.user, key.room, &content);

        let Some(session) = self.sessions.get(&key) else {
            return;
        };
        let turn_limit_reached = session.turn_count >= self.config.max_turns;
        let report_requested = session.report_requested;
        let needs_reply = session.needs_reply;

        if turn_limit_reached || report_requested {
            self.begin_report(&key, now);
        } else if needs_reply {
            self.issue_reply(&key, now);
        }
    }

    // -----------------------------------------------------------------------
    // reports
    // -----------------------------------------------------------------------

    fn begin_report(&mut self, key: &SessionKey, now: DateTime<Utc>) {
        let issued = {
            let Some(session) = self.sessions.get_mut(key) else {
                return;
            };
            if session.pending_call.is_some() {
                session.report_requested = true;
                return;
            }
            if session.transcript.len() < 2 {
                None
            } else {
                session.state = SessionState::GeneratingReport;
                session.report_requested = false;
                session.touch(now);
                let id = RequestId::new();
                session.pending_call = Some(id);
                Some((id, build_report_messages(&self.config, session)))
            }
        };

        let Some((id, messages)) = issued else {
            // Fewer than two transcript entries: nothing worth writing up.
            let notice = self.config.notices.nothing_to_report.clone();
            self.end_session(key, now, Some(&notice));
            return;
        };

        self.pending.insert(PendingCall {
            id,
            kind: RequestKind::Report,
            key: *key,
            created_at: now,
            payload: RequestPayload::Report,
        });
        let options = ModelOptions {
            model: self.config.chat_model.clone(),
            max_tokens: self.config.max_tokens,
            enable_search: false,
        };
        self.ports.model.call_model(id, &messages, &options);
        tracing::info!(key = %key, request_id = %id, "report requested");
    }

    fn finish_report(
        &mut self,
        call: PendingCall,
        success: bool,
        content: String,
        now: DateTime<Utc>,
    ) {
        let key = call.key;
        let accepted = match self.sessions.get_mut(&key) {
            Some(session) if session.pending_call == Some(call.id) => {
                session.pending_call = None;
                true
            }
            _ => {
                tracing::debug!(key = %key, "report result without a matching session, dropping");
                false
            }
        };
        if !accepted {
            return;
        }

        if !success {
            let notice = self.config.notices.report_failed.clone();
            self.end_session(&key, now, Some(&notice));
            return;
        }

        let (long_form, summary) = report::split_sections(&content);
        if long_form.is_empty() && summary.is_none() {
            let notice = self.config.notices.report_failed.clone();
            self.end_session(&key, now, Some(&notice));
            return;
        }

        let parts = report::build_forward_parts(
            &long_form,
            summary.as_deref(),
            self.ports.renderer.as_deref(),
            self.config.forward_chunk_chars,
        );
        self.ports.chat.send_forward_bundle(key.user, key.room, &parts);
        self.end_session(&key, now, None);
    }

    // -----------------------------------------------------------------------
    // the reaper
    // -----------------------------------------------------------------------

    fn on_tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.sweep_pending(now);

        for key in self.batches.due_keys(self.config.merge_window(), now) {
            self.flush_batch(key, now);
        }

        for key in self.sessions.idle_keys(self.config.session_timeout(), now) {
            tracing::info!(key = %key, "session idle past timeout");
            let notice = self.config.notices.session_timed_out.clone();
            self.end_session(&key, now, Some(&notice));
        }

        self.cooldowns.cleanup_expired(self.config.cooldown(), now);
        Ok(())
    }

    /// Expire outstanding calls and synthesize their failure continuations.
    fn sweep_pending(&mut self, now: DateTime<Utc>) {
        for call in self.pending.sweep_expired(&self.timeouts, now) {
            let key = call.key;
            match call.kind {
                RequestKind::Triage => {
                    tracing::warn!(key = %key, "triage call timed out, evidence re-queued");
                    if let RequestPayload::Triage { items, .. } = call.payload {
                        self.batches.requeue_front(key, items);
                    }
                }
                RequestKind::ContextFetch => {
                    // Proceed without the missing context rather than stall.
                    tracing::warn!(key = %key, "context fetch timed out, continuing to triage");
                    if let RequestPayload::ContextFetch {
                        items,
                        any_mentioned,
                        partial,
                        ..
                    } = call.payload
                    {
                        self.issue_triage(key, items, any_mentioned, none_if_empty(partial), now);
                    }
                }
                RequestKind::Reply => {
                    let Some(session) = self.sessions.get(&key) else {
                        continue;
                    };
                    if session.pending_call != Some(call.id) {
                        continue;
                    }
                    if session.started_by_mention {
                        tracing::warn!(key = %key, "reply timed out for mention-started session");
                        let notice = self.config.notices.reply_timed_out.clone();
                        self.end_session(&key, now, Some(&notice));
                    } else {
                        // The user never asked for this dialogue; end it
                        // without a notice.
                        tracing::info!(key = %key, "reply timed out, auto session ends silently");
                        self.end_session(&key, now, None);
                    }
                }
                RequestKind::Report => {
                    if self.sessions.contains(&key) {
                        tracing::warn!(key = %key, "report call timed out");
                        let notice = self.config.notices.report_failed.clone();
                        self.end_session(&key, now, Some(&notice));
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // teardown
    // -----------------------------------------------------------------------

    /// Remove a session, start its cooldown, drop its outstanding calls, and
    /// optionally tell the user why.
    fn end_session(&mut self, key: &SessionKey, now: DateTime<Utc>, notice: Option<&str>) {
        if self.sessions.remove(key).is_none() {
            return;
        }
        self.cooldowns.record_end(*key, now);
        let purged = self.pending.purge_key(key);
        if purged > 0 {
            tracing::debug!(key = %key, purged, "dropped outstanding calls with the session");
        }
        if let Some(text) = notice {
            self.ports.chat.send_reply(key.user, key.room, text);
        }
        tracing::info!(key = %key, "session ended");
    }
}

/// Exact match against a configured keyword list, after trimming.
fn matches_keyword(text: &str, keywords: &[String]) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && keywords
            .iter()
            .any(|keyword| trimmed.eq_ignore_ascii_case(keyword.trim()))
}

fn none_if_empty(context: RoomContext) -> Option<RoomContext> {
    if context.is_empty() { None } else { Some(context) }
}

/// System prompt plus the verbatim transcript. Room context seeds only the
/// first reply.
fn build_reply_messages(config: &Config, session: &Session) -> Vec<ChatMessage> {
    let context_text = if session.turn_count == 0 {
        session
            .room_context
            .as_ref()
            .map(|context| context.render())
            .unwrap_or_default()
    } else {
        String::new()
    };
    let system = config
        .prompts
        .render_reply_system(&config.assistant_name, &context_text);

    let mut messages = Vec::with_capacity(session.transcript.len() + 1);
    messages.push(ChatMessage::new(ChatRole::System, system));
    messages.extend(session.transcript.iter().cloned());
    messages
}

fn build_report_messages(config: &Config, session: &Session) -> Vec<ChatMessage> {
    let system = config.prompts.render_report_system(report::SECTION_DIVIDER);
    let mut messages = Vec::with_capacity(session.transcript.len() + 2);
    messages.push(ChatMessage::new(ChatRole::System, system));
    messages.extend(session.transcript.iter().cloned());
    messages.push(ChatMessage::new(ChatRole::User, REPORT_REQUEST));
    messages
}
