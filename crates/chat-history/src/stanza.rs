//! Extraction of stable ids and body attributes from archived stanzas.
//!
//! Group transcript rows keep the stanza the room broadcast. When a client
//! asks for stanza ids, each row's stanza is parsed and two things are read
//! from it:
//!
//! - the `id` of the `<stanza-id/>` element, when exactly one exists
//! - the attributes of the `<body/>` element, when exactly one exists
//!
//! ```xml
//! <message from='room@conference.example.org/alice' type='groupchat'>
//!   <body xml:lang='fi'>Moi!</body>
//!   <stanza-id xmlns='urn:xmpp:sid:0' id='5f3c-11' by='room@conference.example.org'/>
//! </message>
//! ```

use minidom::Element;
use thiserror::Error;

/// Default namespace for archived stanzas that do not declare one.
const JABBER_CLIENT_NS: &str = "jabber:client";

/// Errors raised while reading an archived stanza.
#[derive(Debug, Error)]
pub enum StanzaParseError {
    /// The row has no stanza stored
    #[error("no stanza stored for message")]
    MissingStanza,

    /// The stored text is not a single well-formed element
    #[error("{0}")]
    Malformed(String),

    /// The single stanza-id element carries no id
    #[error("stanza-id element has no id attribute")]
    MissingStanzaId,
}

/// Fields read from an archived stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    /// Stable message id
    pub stanza_id: Option<String>,
    /// Attributes of the body element
    pub body_attributes: Vec<(String, String)>,
}

/// Parse an archived stanza and extract its stable id and body attributes.
pub fn extract(raw: &str) -> Result<ExtractedFields, StanzaParseError> {
    let root = parse_stanza(raw)?;

    let stanza_ids = descendants_named(&root, "stanza-id");
    let stanza_id = match stanza_ids.as_slice() {
        [only] => Some(
            only.attr("id")
                .ok_or(StanzaParseError::MissingStanzaId)?
                .to_string(),
        ),
        _ => None,
    };

    let bodies = descendants_named(&root, "body");
    let body_attributes = match bodies.as_slice() {
        [only] => only
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        _ => Vec::new(),
    };

    Ok(ExtractedFields {
        stanza_id,
        body_attributes,
    })
}

/// Parse raw stanza text into its root element.
///
/// Stanzas are often logged without a namespace declaration, so the text is
/// parsed inside a wrapper that supplies `jabber:client` as the default.
fn parse_stanza(raw: &str) -> Result<Element, StanzaParseError> {
    let body = strip_xml_declaration(raw);
    let wrapped = format!("<archived xmlns='{}'>{}</archived>", JABBER_CLIENT_NS, body);
    let wrapper: Element = wrapped
        .parse()
        .map_err(|e: minidom::Error| StanzaParseError::Malformed(e.to_string()))?;

    if wrapper.texts().any(|text| !text.trim().is_empty()) {
        return Err(StanzaParseError::Malformed(
            "text content outside the stanza element".to_string(),
        ));
    }

    let mut roots = wrapper.children();
    match (roots.next(), roots.next()) {
        (Some(root), None) => Ok(root.clone()),
        (None, _) => Err(StanzaParseError::Malformed("no stanza element".to_string())),
        (Some(_), Some(_)) => Err(StanzaParseError::Malformed(
            "more than one root element".to_string(),
        )),
    }
}

fn strip_xml_declaration(raw: &str) -> &str {
    let trimmed = raw.trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return &trimmed[end + 2..];
        }
    }
    trimmed
}

/// All descendants (not the element itself) with the given local name, in
/// document order.
fn descendants_named<'a>(elem: &'a Element, name: &str) -> Vec<&'a Element> {
    let mut found = Vec::new();
    collect_descendants(elem, name, &mut found);
    found
}

fn collect_descendants<'a>(elem: &'a Element, name: &str, found: &mut Vec<&'a Element>) {
    for child in elem.children() {
        if child.name() == name {
            found.push(child);
        }
        collect_descendants(child, name, found);
    }
}
