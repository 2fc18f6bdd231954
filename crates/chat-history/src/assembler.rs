//! Response assembly for chat history queries.
//!
//! A result page looks like:
//! ```xml
//! <iq type='result' id='hist1'>
//!   <query xmlns='otavanopisto:chat:history' queryId='q7' complete='true'>
//!     <historyMessage>
//!       <fromJID>juliet@capulet.lit</fromJID>
//!       <toJID>romeo@montague.lit</toJID>
//!       <timestamp>2024-01-15T10:30:00.000Z</timestamp>
//!       <message>Art thou not Romeo?</message>
//!     </historyMessage>
//!   </query>
//! </iq>
//! ```

use chrono::{DateTime, Utc};
use minidom::{Element, ElementBuilder};
use xmpp_parsers::iq::{Iq, IqType};

use crate::error::HistoryError;
use crate::query::{NS_CHAT_HISTORY, QUERY_ELEMENT};
use crate::types::{ArchivedMessage, HistoryVariant};

/// Namespace of stanza error conditions (RFC 6120).
pub const NS_STANZA_ERRORS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

const NS_JABBER_CLIENT: &str = "jabber:client";

/// Timestamp format used in history messages.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// One page of history, oldest message first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    /// Messages in chronological order
    pub messages: Vec<ArchivedMessage>,
    /// Whether older messages exist beyond this page
    pub has_more: bool,
}

/// Turn newest-first store rows into a page.
///
/// The store is asked for one row more than `max`; if that row arrives it is
/// dropped and the page is marked incomplete.
pub fn collect_page(rows: Vec<ArchivedMessage>, max: Option<u64>) -> ResultPage {
    let mut messages = rows;
    let mut has_more = false;

    if let Some(max) = max {
        let max = usize::try_from(max).unwrap_or(usize::MAX);
        if messages.len() > max {
            messages.truncate(max);
            has_more = true;
        }
    }

    messages.reverse();
    ResultPage { messages, has_more }
}

/// Join a bare JID and an optional resource.
pub fn full_jid(bare: &str, resource: Option<&str>) -> String {
    match resource {
        Some(resource) if !resource.is_empty() => format!("{}/{}", bare, resource),
        _ => bare.to_string(),
    }
}

/// Format a timestamp as `YYYY-MM-DDTHH:MM:SS.sssZ`.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn text_element(name: &str, text: impl Into<String>) -> Element {
    Element::builder(name, NS_CHAT_HISTORY)
        .append(text.into())
        .build()
}

/// Build a `<historyMessage/>` element.
pub fn build_history_message(message: &ArchivedMessage, variant: HistoryVariant) -> Element {
    let mut builder = Element::builder("historyMessage", NS_CHAT_HISTORY);

    if variant == HistoryVariant::SequenceIds {
        if let Some(id) = message.sequence_id {
            builder = builder.append(text_element("id", id.to_string()));
        }
    }

    if let Some(ref stanza_id) = message.stanza_id {
        builder = builder.append(text_element("stanzaId", stanza_id.clone()));
    }

    let mut body = Element::builder("message", NS_CHAT_HISTORY);
    for (name, value) in &message.body_attributes {
        body = body.attr(name.clone(), value.clone());
    }

    builder
        .append(text_element("fromJID", message.from.full()))
        .append(text_element("toJID", message.to.full()))
        .append(text_element("timestamp", format_timestamp(&message.timestamp)))
        .append(body.append(message.body.clone()).build())
        .build()
}

fn query_wrapper(query_id: Option<&str>, complete: bool) -> ElementBuilder {
    let mut builder = Element::builder(QUERY_ELEMENT, NS_CHAT_HISTORY);
    if let Some(query_id) = query_id.filter(|id| !id.is_empty()) {
        builder = builder.attr("queryId", query_id);
    }
    if complete {
        builder = builder.attr("complete", "true");
    }
    builder
}

fn result_iq(original_iq: &Iq, payload: Element) -> Iq {
    Iq {
        from: original_iq.to.clone(),
        to: original_iq.from.clone(),
        id: original_iq.id.clone(),
        payload: IqType::Result(Some(payload)),
    }
}

/// Build the result IQ for a page of history.
pub fn build_history_result(
    original_iq: &Iq,
    query_id: Option<&str>,
    page: &ResultPage,
    variant: HistoryVariant,
) -> Iq {
    let query = query_wrapper(query_id, !page.has_more)
        .append_all(
            page.messages
                .iter()
                .map(|message| build_history_message(message, variant)),
        )
        .build();

    result_iq(original_iq, query)
}

/// Build a complete result IQ with no messages.
pub fn build_empty_result(original_iq: &Iq, query_id: Option<&str>) -> Iq {
    result_iq(original_iq, query_wrapper(query_id, true).build())
}

/// Build the error IQ for a failed query.
///
/// The response carries a copy of the original query element followed by the
/// stanza error. It is built as a raw element since an error IQ payload cannot
/// carry the query alongside the error.
pub fn build_error_response(
    original_iq: &Iq,
    query: Option<&Element>,
    error: &HistoryError,
) -> Element {
    let mut builder = Element::builder("iq", NS_JABBER_CLIENT)
        .attr("type", "error")
        .attr("id", original_iq.id.clone());

    if let Some(ref to) = original_iq.to {
        builder = builder.attr("from", to.to_string());
    }
    if let Some(ref from) = original_iq.from {
        builder = builder.attr("to", from.to_string());
    }

    if let Some(query) = query {
        builder = builder.append(query.clone());
    }

    let mut error_elem = Element::builder("error", NS_JABBER_CLIENT)
        .attr("type", error.error_type().as_str())
        .append(Element::builder(error.condition().as_str(), NS_STANZA_ERRORS).build());

    let text = error.client_text();
    if !text.is_empty() {
        error_elem = error_elem.append(
            Element::builder("text", NS_STANZA_ERRORS)
                .append(text)
                .build(),
        );
    }

    builder.append(error_elem.build()).build()
}
