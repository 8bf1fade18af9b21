//! Request-boundary parsing: trigger assignment/deletion headers and header sanitizing.

use std::collections::BTreeMap;

use http::HeaderMap;
use mcgate_store::{HandlerList, Trigger, TriggerMap};

use crate::error::{GatewayError, GatewayResult};

const HEADER_PREFIX: &str = "x-mcgate-";
const DELETE_SUFFIX: &str = "-delete";
const DELETE_ALL: &str = "x-mcgate-delete";

/// Headers that identify the caller to the storage service and never reach a sandbox.
const STRIPPED_HEADERS: [&str; 2] = ["x-service-catalog", "cookie"];
pub const CURRENT_SERVER_HEADER: &str = "X-Current-Server";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    Assign {
        trigger: Trigger,
        handlers: HandlerList,
    },
    Delete(DeleteTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    /// Remove the named handlers from one trigger; an empty list clears the trigger.
    Trigger {
        trigger: Trigger,
        handlers: HandlerList,
    },
    All,
}

#[derive(Debug, Clone, Copy)]
enum HeaderKind {
    Assign(Trigger),
    Delete(Trigger),
    DeleteAll,
}

fn assign_header(trigger: Trigger) -> String {
    format!("{HEADER_PREFIX}{}", trigger.as_str())
}

fn delete_header(trigger: Trigger) -> String {
    format!("{HEADER_PREFIX}{}{DELETE_SUFFIX}", trigger.as_str())
}

impl TriggerAction {
    /// Extracts the single trigger action carried by a request, if any.
    ///
    /// More than one recognized header (or one header repeated) is rejected before any
    /// header value is looked at.
    pub fn from_headers(headers: &HeaderMap) -> GatewayResult<Option<Self>> {
        let mut found: Vec<(String, HeaderKind, &http::HeaderValue)> = Vec::new();
        for trigger in Trigger::ALL {
            let name = assign_header(trigger);
            for value in headers.get_all(name.as_str()) {
                found.push((name.clone(), HeaderKind::Assign(trigger), value));
            }
            let name = delete_header(trigger);
            for value in headers.get_all(name.as_str()) {
                found.push((name.clone(), HeaderKind::Delete(trigger), value));
            }
        }
        for value in headers.get_all(DELETE_ALL) {
            found.push((DELETE_ALL.into(), HeaderKind::DeleteAll, value));
        }

        if found.len() > 1 {
            let names: Vec<_> = found.into_iter().map(|(name, _, _)| name).collect();
            return Err(GatewayError::AuthorizationConflict(names.join(", ")));
        }
        let Some((name, kind, value)) = found.pop() else {
            return Ok(None);
        };

        let action = match kind {
            HeaderKind::Assign(trigger) => {
                let handlers = HandlerList::parse(header_str(&name, value)?);
                if handlers.is_empty() {
                    return Err(GatewayError::InvalidRequest(format!(
                        "{name} names no handlers"
                    )));
                }
                TriggerAction::Assign { trigger, handlers }
            }
            HeaderKind::Delete(trigger) => TriggerAction::Delete(DeleteTarget::Trigger {
                trigger,
                handlers: HandlerList::parse(header_str(&name, value)?),
            }),
            HeaderKind::DeleteAll => TriggerAction::Delete(DeleteTarget::All),
        };
        Ok(Some(action))
    }

    /// Applies the action to a trigger record.
    pub fn apply(&self, map: &mut TriggerMap) {
        match self {
            TriggerAction::Assign { trigger, handlers } => map.set(*trigger, handlers.clone()),
            TriggerAction::Delete(DeleteTarget::Trigger { trigger, handlers }) => {
                if handlers.is_empty() {
                    map.clear(*trigger);
                } else {
                    map.get_mut(*trigger).remove_all(handlers);
                }
            }
            TriggerAction::Delete(DeleteTarget::All) => *map = TriggerMap::default(),
        }
    }
}

fn header_str<'a>(name: &str, value: &'a http::HeaderValue) -> GatewayResult<&'a str> {
    value
        .to_str()
        .map_err(|_| GatewayError::InvalidRequest(format!("{name} is not valid text")))
}

/// Request headers as handed to the sandbox: transport identity stripped, repeated
/// headers joined, the execution server label added.
pub fn sanitize_headers(headers: &HeaderMap, execution_server: &str) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        if STRIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let Ok(value) = value.to_str() else {
            continue;
        };
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out.insert(
        CURRENT_SERVER_HEADER.to_ascii_lowercase(),
        execution_server.to_string(),
    );
    out
}
