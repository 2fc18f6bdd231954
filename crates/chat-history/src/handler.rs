//! Chat history IQ handler.
//!
//! Answers `otavanopisto:chat:history` queries from the direct message
//! archive or a room's transcript log. Every request produces exactly one
//! response element: a result IQ, or an error IQ carrying the original query.

use std::sync::Arc;
use std::time::Instant;

use jid::BareJid;
use minidom::Element;
use tracing::{debug, error, instrument, warn};
use xmpp_parsers::iq::Iq;

use crate::assembler::{
    build_empty_result, build_error_response, build_history_result, collect_page, ResultPage,
};
use crate::error::HistoryError;
use crate::metrics;
use crate::planner::{plan_direct, plan_group, Plan};
use crate::query::{parse_history_query, query_element, NS_CHAT_HISTORY, QUERY_ELEMENT};
use crate::stanza::{self, StanzaParseError};
use crate::store::HistoryBackend;
use crate::types::{ConversationMode, HistoryConfig, HistoryQuery, HistoryVariant};

/// Handler for chat history queries.
pub struct ChatHistoryHandler<S: HistoryBackend> {
    store: Arc<S>,
    config: HistoryConfig,
}

impl<S: HistoryBackend> ChatHistoryHandler<S> {
    /// Create a handler over the given store.
    pub fn new(store: Arc<S>, config: HistoryConfig) -> Self {
        Self { store, config }
    }

    /// Element name and namespace this handler answers.
    pub fn info(&self) -> (&'static str, &'static str) {
        (QUERY_ELEMENT, NS_CHAT_HISTORY)
    }

    /// Handler configuration.
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Answer a chat history IQ from an authenticated requester.
    #[instrument(skip(self, iq), fields(iq_id = %iq.id, variant = %self.config.variant))]
    pub async fn handle(&self, requester: &BareJid, iq: &Iq) -> Element {
        let start = Instant::now();
        let query_elem = query_element(iq);
        let mut mode = "unknown";

        let outcome = match query_elem {
            Some(elem) => match self.validate(requester, elem) {
                Ok(query) => {
                    mode = query.mode.as_str();
                    self.answer(iq, query).await
                }
                Err(e) => Err(e),
            },
            None => Err(HistoryError::bad_request("Not a chat history query")),
        };

        let (response, label) = match outcome {
            Ok((result, returned)) => {
                metrics::record_messages_returned(returned, mode);
                let element: Element = result.into();
                (element, "success")
            }
            Err(e) => {
                match &e {
                    HistoryError::BadRequest(reason) => {
                        warn!(requester = %requester, reason = %reason, "Rejected chat history query");
                    }
                    HistoryError::Store(source) => {
                        error!(requester = %requester, error = %source, "Failed to fetch chat history");
                    }
                    HistoryError::StanzaParse(source) => {
                        error!(requester = %requester, error = %source, "Failed to parse archived stanza");
                    }
                }
                (build_error_response(iq, query_elem, &e), e.condition().as_str())
            }
        };

        metrics::record_query(mode, label, start.elapsed().as_secs_f64() * 1000.0);
        response
    }

    /// Parse the query and apply the handler's capability rules.
    ///
    /// Runs before any store access.
    fn validate(&self, requester: &BareJid, elem: &Element) -> Result<HistoryQuery, HistoryError> {
        let mut query = parse_history_query(requester, elem)?;

        match self.config.variant {
            HistoryVariant::SequenceIds => {
                if query.include_stanza_ids {
                    return Err(HistoryError::bad_request(
                        "includeStanzaIds is not supported by this server",
                    ));
                }
            }
            HistoryVariant::StanzaIds => {
                query.before_id = None;
            }
        }

        query.max = self.config.effective_max(query.max);
        Ok(query)
    }

    /// Execute a validated query and build the result IQ.
    ///
    /// Returns the IQ together with the number of messages it carries.
    async fn answer(&self, iq: &Iq, query: HistoryQuery) -> Result<(Iq, usize), HistoryError> {
        let plan = match query.mode {
            ConversationMode::Direct => Plan::Fetch(plan_direct(&query)),
            ConversationMode::Group => plan_group(self.store.as_ref(), &query).await?,
        };

        let archive_query = match plan {
            Plan::Fetch(archive_query) => archive_query,
            Plan::NoHistory => {
                return Ok((build_empty_result(iq, query.query_id.as_deref()), 0));
            }
        };

        let rows = self.store.fetch(&archive_query).await?;
        debug!(rows = rows.len(), mode = %query.mode, "Fetched history rows");

        let mut page = collect_page(rows, query.max);
        if query.include_stanza_ids {
            attach_stanza_fields(&mut page)?;
        }

        let returned = page.messages.len();
        let result = build_history_result(iq, query.query_id.as_deref(), &page, self.config.variant);
        Ok((result, returned))
    }
}

/// Fill in stanza ids and body attributes from each message's archived stanza.
fn attach_stanza_fields(page: &mut ResultPage) -> Result<(), StanzaParseError> {
    for message in &mut page.messages {
        let raw = message
            .stanza
            .as_deref()
            .ok_or(StanzaParseError::MissingStanza)?;
        let fields = stanza::extract(raw)?;
        message.stanza_id = fields.stanza_id;
        message.body_attributes = fields.body_attributes;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::NS_STANZA_ERRORS;
    use crate::error::FETCH_FAILED_TEXT;
    use crate::store::MemoryHistoryStore;
    use crate::types::{Address, ArchivedMessage, TranscriptEntry};
    use chrono::{DateTime, Utc};
    use jid::Jid;
    use xmpp_parsers::iq::IqType;

    const ALICE: &str = "alice@example.org";
    const BOB: &str = "bob@example.org";
    const ROOM: &str = "r1@muc1.example.org";

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn alice() -> BareJid {
        BareJid::new(ALICE).unwrap()
    }

    fn build_query(children: &[(&str, &str)], flags: &[&str]) -> Element {
        let mut query = Element::builder(QUERY_ELEMENT, NS_CHAT_HISTORY)
            .attr("queryId", "q-1")
            .build();
        for (name, text) in children {
            query.append_child(
                Element::builder(*name, NS_CHAT_HISTORY)
                    .append(text.to_string())
                    .build(),
            );
        }
        for flag in flags {
            query.append_child(Element::builder(*flag, NS_CHAT_HISTORY).build());
        }
        query
    }

    fn history_iq(query: Element) -> Iq {
        Iq {
            from: Some(Jid::new("alice@example.org/laptop").unwrap()),
            to: Some(Jid::new("example.org").unwrap()),
            id: "hist-1".to_string(),
            payload: IqType::Get(query),
        }
    }

    fn handler(store: Arc<MemoryHistoryStore>, variant: HistoryVariant) -> ChatHistoryHandler<MemoryHistoryStore> {
        ChatHistoryHandler::new(
            store,
            HistoryConfig {
                variant,
                ..Default::default()
            },
        )
    }

    /// Messages at t=100, 200, 300 between alice and bob.
    fn direct_store() -> Arc<MemoryHistoryStore> {
        let store = Arc::new(MemoryHistoryStore::new());
        for (millis, from, to) in [(100, ALICE, BOB), (200, BOB, ALICE), (300, ALICE, BOB)] {
            store.insert_direct_message(ArchivedMessage {
                from: Address::with_resource(from, "phone"),
                to: Address::bare(to),
                timestamp: at(millis),
                body: format!("at {}", millis),
                ..Default::default()
            });
        }
        store
    }

    fn result_query(response: &Element) -> &Element {
        assert_eq!(response.attr("type"), Some("result"), "response: {:?}", response);
        response.get_child(QUERY_ELEMENT, NS_CHAT_HISTORY).unwrap()
    }

    fn timestamps(query: &Element) -> Vec<String> {
        query
            .children()
            .map(|m| m.get_child("timestamp", NS_CHAT_HISTORY).unwrap().text())
            .collect()
    }

    fn error_condition(response: &Element) -> (String, String, String) {
        assert_eq!(response.attr("type"), Some("error"), "response: {:?}", response);
        let error = response.get_child("error", "jabber:client").unwrap();
        let condition = error
            .children()
            .find(|c| c.ns() == NS_STANZA_ERRORS && c.name() != "text")
            .unwrap();
        let text = error
            .get_child("text", NS_STANZA_ERRORS)
            .map(|t| t.text())
            .unwrap_or_default();
        (
            error.attr("type").unwrap_or_default().to_string(),
            condition.name().to_string(),
            text,
        )
    }

    #[tokio::test]
    async fn test_direct_page_and_next_page() {
        let store = direct_store();
        let handler = handler(store, HistoryVariant::StanzaIds);

        let iq = history_iq(build_query(&[("type", "chat"), ("with", BOB), ("max", "2")], &[]));
        let response = handler.handle(&alice(), &iq).await;
        let query = result_query(&response);
        assert_eq!(
            timestamps(query),
            vec!["1970-01-01T00:00:00.200Z", "1970-01-01T00:00:00.300Z"]
        );
        assert_eq!(query.attr("complete"), None);
        assert_eq!(query.attr("queryId"), Some("q-1"));

        let iq = history_iq(build_query(
            &[
                ("type", "chat"),
                ("with", BOB),
                ("max", "2"),
                ("before", "1970-01-01T00:00:00.300Z"),
            ],
            &[],
        ));
        let response = handler.handle(&alice(), &iq).await;
        let query = result_query(&response);
        assert_eq!(
            timestamps(query),
            vec!["1970-01-01T00:00:00.100Z", "1970-01-01T00:00:00.200Z"]
        );
        assert_eq!(query.attr("complete"), Some("true"));
    }

    #[tokio::test]
    async fn test_response_is_addressed_to_requester() {
        let handler = handler(direct_store(), HistoryVariant::StanzaIds);
        let iq = history_iq(build_query(&[("type", "chat"), ("with", BOB)], &[]));

        let response = handler.handle(&alice(), &iq).await;
        assert_eq!(response.attr("id"), Some("hist-1"));
        assert_eq!(response.attr("to"), Some("alice@example.org/laptop"));
        assert_eq!(response.attr("from"), Some("example.org"));

        let query = result_query(&response);
        let first = query.children().next().unwrap();
        assert_eq!(
            first.get_child("fromJID", NS_CHAT_HISTORY).unwrap().text(),
            "alice@example.org/phone"
        );
        assert_eq!(first.get_child("toJID", NS_CHAT_HISTORY).unwrap().text(), BOB);
    }

    #[tokio::test]
    async fn test_sequence_ids_variant() {
        let store = direct_store();
        let handler = handler(store, HistoryVariant::SequenceIds);

        let iq = history_iq(build_query(&[("type", "chat"), ("with", BOB)], &[]));
        let response = handler.handle(&alice(), &iq).await;
        let query = result_query(&response);
        let ids: Vec<String> = query
            .children()
            .map(|m| m.get_child("id", NS_CHAT_HISTORY).unwrap().text())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let iq = history_iq(build_query(
            &[("type", "chat"), ("with", BOB), ("before-id", "3")],
            &[],
        ));
        let response = handler.handle(&alice(), &iq).await;
        assert_eq!(result_query(&response).children().count(), 2);
    }

    #[tokio::test]
    async fn test_stanza_ids_variant_ignores_before_id() {
        let handler = handler(direct_store(), HistoryVariant::StanzaIds);
        let iq = history_iq(build_query(
            &[("type", "chat"), ("with", BOB), ("before-id", "2")],
            &[],
        ));

        let response = handler.handle(&alice(), &iq).await;
        let query = result_query(&response);
        assert_eq!(query.children().count(), 3);
        assert!(query
            .children()
            .all(|m| m.get_child("id", NS_CHAT_HISTORY).is_none()));
    }

    #[tokio::test]
    async fn test_page_size_cap() {
        let handler = ChatHistoryHandler::new(
            direct_store(),
            HistoryConfig {
                variant: HistoryVariant::StanzaIds,
                max_page_size: 1,
            },
        );
        let iq = history_iq(build_query(&[("type", "chat"), ("with", BOB)], &[]));

        let response = handler.handle(&alice(), &iq).await;
        let query = result_query(&response);
        assert_eq!(timestamps(query), vec!["1970-01-01T00:00:00.300Z"]);
        assert_eq!(query.attr("complete"), None);
    }

    #[tokio::test]
    async fn test_group_history_bounded_by_room_creation() {
        let store = Arc::new(MemoryHistoryStore::new());
        store.set_domain("example.org");
        let room = store.insert_room("muc1", "r1", at(50));
        for (millis, nickname) in [(40, Some("alice")), (60, Some("bob")), (70, None)] {
            store.insert_transcript_entry(TranscriptEntry {
                room_id: room.room_id,
                sender: BOB.to_string(),
                nickname: nickname.map(str::to_string),
                logged_at: at(millis),
                body: format!("at {}", millis),
                stanza: None,
            });
        }

        let handler = handler(store, HistoryVariant::StanzaIds);
        let iq = history_iq(build_query(&[("type", "groupchat"), ("with", ROOM)], &[]));
        let response = handler.handle(&alice(), &iq).await;
        let query = result_query(&response);

        assert_eq!(timestamps(query), vec!["1970-01-01T00:00:00.060Z"]);
        assert_eq!(query.attr("complete"), Some("true"));
        let message = query.children().next().unwrap();
        assert_eq!(message.get_child("fromJID", NS_CHAT_HISTORY).unwrap().text(), BOB);
        assert_eq!(
            message.get_child("toJID", NS_CHAT_HISTORY).unwrap().text(),
            "r1@muc1.example.org/bob"
        );
    }

    #[tokio::test]
    async fn test_group_without_room_or_domain_is_empty_and_complete() {
        let store = Arc::new(MemoryHistoryStore::new());
        let handler = handler(store.clone(), HistoryVariant::StanzaIds);
        let iq = history_iq(build_query(&[("type", "groupchat"), ("with", ROOM)], &[]));

        let response = handler.handle(&alice(), &iq).await;
        let query = result_query(&response);
        assert_eq!(query.children().count(), 0);
        assert_eq!(query.attr("complete"), Some("true"));

        store.set_domain("example.org");
        let response = handler.handle(&alice(), &iq).await;
        let query = result_query(&response);
        assert_eq!(query.children().count(), 0);
        assert_eq!(query.attr("complete"), Some("true"));
    }

    #[tokio::test]
    async fn test_group_stanza_ids() {
        let store = Arc::new(MemoryHistoryStore::new());
        store.set_domain("example.org");
        let room = store.insert_room("muc1", "r1", at(50));
        store.insert_transcript_entry(TranscriptEntry {
            room_id: room.room_id,
            sender: BOB.to_string(),
            nickname: Some("bob".to_string()),
            logged_at: at(60),
            body: "Moi!".to_string(),
            stanza: Some(
                "<message type='groupchat'><body lang='fi'>Moi!</body>\
                 <stanza-id xmlns='urn:xmpp:sid:0' id='sid-60' by='r1@muc1.example.org'/></message>"
                    .to_string(),
            ),
        });

        let handler = handler(store, HistoryVariant::StanzaIds);
        let iq = history_iq(build_query(
            &[("type", "groupchat"), ("with", ROOM)],
            &["includeStanzaIds"],
        ));
        let response = handler.handle(&alice(), &iq).await;
        let query = result_query(&response);
        let message = query.children().next().unwrap();

        assert_eq!(message.get_child("stanzaId", NS_CHAT_HISTORY).unwrap().text(), "sid-60");
        let body = message.get_child("message", NS_CHAT_HISTORY).unwrap();
        assert_eq!(body.attr("lang"), Some("fi"));
        assert_eq!(body.text(), "Moi!");
    }

    #[tokio::test]
    async fn test_malformed_archived_stanza_fails_request() {
        let store = Arc::new(MemoryHistoryStore::new());
        store.set_domain("example.org");
        let room = store.insert_room("muc1", "r1", at(50));
        store.insert_transcript_entry(TranscriptEntry {
            room_id: room.room_id,
            sender: BOB.to_string(),
            nickname: Some("bob".to_string()),
            logged_at: at(60),
            body: "broken".to_string(),
            stanza: Some("<message><body>broken</message>".to_string()),
        });

        let handler = handler(store, HistoryVariant::StanzaIds);
        let iq = history_iq(build_query(
            &[("type", "groupchat"), ("with", ROOM)],
            &["includeStanzaIds"],
        ));
        let response = handler.handle(&alice(), &iq).await;

        let (error_type, condition, text) = error_condition(&response);
        assert_eq!(error_type, "wait");
        assert_eq!(condition, "internal-server-error");
        assert!(text.starts_with("Unable to parse message stanza: "));
    }

    #[tokio::test]
    async fn test_validation_happens_before_store_access() {
        let store = Arc::new(MemoryHistoryStore::new());
        let handler = handler(store.clone(), HistoryVariant::StanzaIds);

        let iq = history_iq(build_query(&[("type", "chat"), ("with", BOB)], &["includeStanzaIds"]));
        let response = handler.handle(&alice(), &iq).await;
        let (error_type, condition, text) = error_condition(&response);
        assert_eq!(error_type, "modify");
        assert_eq!(condition, "bad-request");
        assert_eq!(text, "includeStanzaIds is only valid with type groupchat, was chat");

        let iq = history_iq(build_query(&[("type", "headline"), ("with", BOB)], &[]));
        let response = handler.handle(&alice(), &iq).await;
        let (_, condition, text) = error_condition(&response);
        assert_eq!(condition, "bad-request");
        assert_eq!(text, "type needs to be chat|groupchat, was headline");

        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_sequence_ids_variant_rejects_stanza_ids() {
        let store = Arc::new(MemoryHistoryStore::new());
        let handler = handler(store.clone(), HistoryVariant::SequenceIds);

        let iq = history_iq(build_query(
            &[("type", "groupchat"), ("with", ROOM)],
            &["includeStanzaIds"],
        ));
        let response = handler.handle(&alice(), &iq).await;
        let (_, condition, _) = error_condition(&response);
        assert_eq!(condition, "bad-request");
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_error_response_copies_query() {
        let handler = handler(Arc::new(MemoryHistoryStore::new()), HistoryVariant::StanzaIds);
        let query = build_query(&[("type", "headline"), ("with", BOB)], &[]);
        let iq = history_iq(query.clone());

        let response = handler.handle(&alice(), &iq).await;
        assert_eq!(response.get_child(QUERY_ELEMENT, NS_CHAT_HISTORY), Some(&query));
    }

    #[tokio::test]
    async fn test_store_failure_text_is_generic() {
        let store = direct_store();
        store.fail_with("database is locked at /var/lib/history.db");
        let handler = handler(store, HistoryVariant::StanzaIds);

        let iq = history_iq(build_query(&[("type", "chat"), ("with", BOB)], &[]));
        let response = handler.handle(&alice(), &iq).await;
        let (error_type, condition, text) = error_condition(&response);
        assert_eq!(error_type, "wait");
        assert_eq!(condition, "internal-server-error");
        assert_eq!(text, FETCH_FAILED_TEXT);
    }

    #[tokio::test]
    async fn test_room_lookup_failure_is_store_error() {
        let store = Arc::new(MemoryHistoryStore::new());
        store.fail_with("connection reset");
        let handler = handler(store, HistoryVariant::StanzaIds);

        let iq = history_iq(build_query(&[("type", "groupchat"), ("with", ROOM)], &[]));
        let response = handler.handle(&alice(), &iq).await;
        let (_, condition, text) = error_condition(&response);
        assert_eq!(condition, "internal-server-error");
        assert_eq!(text, FETCH_FAILED_TEXT);
    }

    #[test]
    fn test_info() {
        let handler = handler(Arc::new(MemoryHistoryStore::new()), HistoryVariant::StanzaIds);
        assert_eq!(handler.info(), ("query", "otavanopisto:chat:history"));
    }
}
