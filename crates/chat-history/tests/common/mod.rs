//! Test utilities for chat history integration tests.
//!
//! Provides a libSQL-backed store seeded with a small conversation and a room,
//! plus helpers for building query IQs from raw XML.

#![allow(dead_code)]

use std::sync::Arc;

use chat_history::{
    Address, ArchivedMessage, ChatHistoryHandler, HistoryConfig, HistoryVariant,
    LibSqlHistoryStore, RoomScope, TranscriptEntry,
};
use chrono::{DateTime, Utc};
use minidom::Element;
use xmpp_parsers::iq::Iq;

pub const DOMAIN: &str = "example.org";
pub const ALICE: &str = "alice@example.org";
pub const BOB: &str = "bob@example.org";
pub const CAROL: &str = "carol@example.org";
pub const ROOM: &str = "lobby@muc1.example.org";

/// Timestamp from epoch milliseconds.
pub fn at(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap()
}

/// Fresh in-memory store with the schema created and the domain set.
pub async fn create_store() -> Arc<LibSqlHistoryStore> {
    let db = libsql::Builder::new_local(":memory:")
        .build()
        .await
        .unwrap();
    let conn = db.connect().unwrap();
    let store = LibSqlHistoryStore::new(conn);
    store.initialize().await.unwrap();
    store.set_domain(DOMAIN).await.unwrap();
    Arc::new(store)
}

/// Archive one direct message per timestamp, alternating between alice and
/// bob. Alice sends the first one.
pub async fn seed_conversation(store: &LibSqlHistoryStore, timestamps: &[i64]) {
    for (i, millis) in timestamps.iter().enumerate() {
        let (from, to) = if i % 2 == 0 { (ALICE, BOB) } else { (BOB, ALICE) };
        store
            .insert_direct_message(&ArchivedMessage {
                from: Address::with_resource(from, "laptop"),
                to: Address::bare(to),
                timestamp: at(*millis),
                body: format!("message {}", millis),
                ..Default::default()
            })
            .await
            .unwrap();
    }
}

/// Create the `lobby` room under `muc1`.
pub async fn create_room(store: &LibSqlHistoryStore, created_at: i64) -> RoomScope {
    store
        .insert_room("muc1", "lobby", at(created_at))
        .await
        .unwrap()
}

/// Log a group chat message as the room broadcast it.
pub async fn log_room_message(
    store: &LibSqlHistoryStore,
    room: &RoomScope,
    nickname: &str,
    millis: i64,
    stanza_id: &str,
) {
    let body = format!("hello at {}", millis);
    let stanza = format!(
        "<message from='{room}/{nick}' type='groupchat'>\
         <body lang='en'>{body}</body>\
         <stanza-id xmlns='urn:xmpp:sid:0' id='{id}' by='{room}'/>\
         </message>",
        room = ROOM,
        nick = nickname,
        body = body,
        id = stanza_id,
    );
    store
        .insert_transcript_entry(&TranscriptEntry {
            room_id: room.room_id,
            sender: format!("{}@example.org", nickname),
            nickname: Some(nickname.to_string()),
            logged_at: at(millis),
            body,
            stanza: Some(stanza),
        })
        .await
        .unwrap();
}

pub fn handler(
    store: Arc<LibSqlHistoryStore>,
    variant: HistoryVariant,
) -> ChatHistoryHandler<LibSqlHistoryStore> {
    ChatHistoryHandler::new(
        store,
        HistoryConfig {
            variant,
            ..Default::default()
        },
    )
}

/// Parse a raw IQ sent by alice's laptop.
pub fn parse_iq(xml: &str) -> Iq {
    let elem: Element = xml.parse().unwrap();
    Iq::try_from(elem).unwrap()
}

/// Build a history query IQ with the given query children.
pub fn history_iq(query_id: &str, children: &str) -> Iq {
    parse_iq(&format!(
        "<iq xmlns='jabber:client' type='get' id='hist-{id}' from='{from}/laptop' to='{to}'>\
         <query xmlns='otavanopisto:chat:history' queryId='{id}'>{children}</query>\
         </iq>",
        id = query_id,
        from = ALICE,
        to = DOMAIN,
        children = children,
    ))
}

/// The `<query/>` payload of a result response.
pub fn result_query(response: &Element) -> &Element {
    assert_eq!(
        response.attr("type"),
        Some("result"),
        "unexpected response: {}",
        String::from(response)
    );
    response
        .get_child("query", chat_history::NS_CHAT_HISTORY)
        .unwrap()
}

/// Text of a child of every `<historyMessage/>`, in order.
pub fn field(query: &Element, name: &str) -> Vec<String> {
    query
        .children()
        .filter_map(|m| m.get_child(name, chat_history::NS_CHAT_HISTORY))
        .map(|c| c.text())
        .collect()
}
