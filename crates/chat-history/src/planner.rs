//! Translation of parsed history queries into scoped archive queries.

use tracing::debug;

use crate::store::{ArchiveQuery, DomainProperties, RoomDirectory, StoreError, UpperBound};
use crate::types::HistoryQuery;

/// What the handler should do for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Execute the archive query.
    Fetch(ArchiveQuery),
    /// The conversation cannot be resolved; answer with an empty, complete page.
    NoHistory,
}

/// Rows to request from the store: one more than the page so that a further
/// page can be detected.
fn sentinel_limit(max: Option<u64>) -> Option<u64> {
    max.map(|m| m.saturating_add(1))
}

/// Plan a direct conversation query.
///
/// `before` takes precedence over `before_id` when both are given.
pub fn plan_direct(query: &HistoryQuery) -> ArchiveQuery {
    let bound = match (query.before, query.before_id) {
        (Some(before), _) => UpperBound::Before(before),
        (None, Some(id)) => UpperBound::BeforeId(id),
        (None, None) => UpperBound::Latest,
    };

    ArchiveQuery::Direct {
        requester: query.requester.to_string(),
        with: query.with.clone(),
        bound,
        limit: sentinel_limit(query.max),
    }
}

/// Split a room address into its service scope and room name.
///
/// `room@muc1.example.org` with domain `example.org` gives
/// `("muc1", "room")`. Without `@` the whole string is the room name and the
/// scope is empty.
pub fn split_room_address<'a>(target: &'a str, domain: &str) -> (&'a str, &'a str) {
    match target.split_once('@') {
        Some((name, service)) => {
            let scope = service
                .strip_suffix(domain)
                .and_then(|rest| rest.strip_suffix('.'))
                .unwrap_or(service);
            (scope, name)
        }
        None => ("", target),
    }
}

/// Plan a group conversation query.
///
/// Resolves the server domain and the room. Either being unknown is not an
/// error, the query simply has no history.
pub async fn plan_group<S>(store: &S, query: &HistoryQuery) -> Result<Plan, StoreError>
where
    S: RoomDirectory + DomainProperties + ?Sized,
{
    let domain = match store.lookup_domain().await? {
        Some(domain) if !domain.is_empty() => domain,
        _ => {
            debug!("No XMPP domain configured, group history unavailable");
            return Ok(Plan::NoHistory);
        }
    };

    let (scope, name) = split_room_address(&query.with, &domain);

    let Some(room) = store.lookup_room(scope, name).await? else {
        debug!(scope = %scope, room = %name, "Room not found");
        return Ok(Plan::NoHistory);
    };

    Ok(Plan::Fetch(ArchiveQuery::Group {
        room_jid: query.with.clone(),
        room_id: room.room_id,
        since: room.created_at,
        before: query.before,
        limit: sentinel_limit(query.max),
    }))
}
