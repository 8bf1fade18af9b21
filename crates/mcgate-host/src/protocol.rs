//! One invocation round trip over a tenant's control-plane channel.
//!
//! The request is consumed by [`InvocationProtocol::invoke`]. Every descriptor it owns is
//! closed right after the datagram is handed to the kernel, whether the send succeeded or
//! not; the response pipe's read end lives until `invoke` returns.

use std::collections::BTreeMap;
use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;
use std::time::Duration;

use mcgate_sbus::{Command, Datagram, FdTag};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;

use crate::cache::HandlerDescriptor;
use crate::error::{GatewayError, GatewayResult, io_error};
use crate::handle::HandlerHandle;

/// Everything one invocation hands to the sandbox.
#[derive(Debug)]
pub struct InvocationRequest {
    pub task_id: String,
    /// Handlers in trigger-list order; `handles` pairs with it by position.
    pub handlers: Vec<HandlerDescriptor>,
    pub handles: Vec<HandlerHandle>,
    pub request_headers: BTreeMap<String, String>,
    pub object_headers: BTreeMap<String, String>,
    /// Object bytes for the handler chain. `None` hands over an already-closed pipe.
    pub input: Option<OwnedFd>,
}

#[derive(Debug, Clone)]
pub struct InvocationProtocol {
    channel: PathBuf,
    timeout: Duration,
    chunk_bytes: usize,
}

impl InvocationProtocol {
    pub fn new(channel: impl Into<PathBuf>, timeout: Duration, chunk_bytes: usize) -> Self {
        Self {
            channel: channel.into(),
            timeout,
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    /// Sends the request and waits for the sandbox's single response.
    ///
    /// `Ok(None)` means the handlers completed with an empty result (`{}`).
    pub async fn invoke(&self, request: InvocationRequest) -> GatewayResult<Option<Value>> {
        let InvocationRequest {
            task_id,
            handlers,
            handles,
            request_headers,
            object_headers,
            input,
        } = request;

        let input = match input {
            Some(fd) => fd,
            None => {
                let (reader, writer) = io::pipe().map_err(|e| io_error(&self.channel, e))?;
                drop(writer);
                OwnedFd::from(reader)
            }
        };
        let (reader, writer) = io::pipe().map_err(|e| io_error(&self.channel, e))?;

        let sent = {
            let mut datagram = Datagram::new(Command::Execute).with_task_id(task_id.as_str());
            datagram.push(
                input.as_fd(),
                FdTag::InputObject {
                    headers: json!({
                        "request_headers": request_headers,
                        "object_headers": object_headers,
                    }),
                },
            );
            datagram.push(writer.as_fd(), FdTag::OutputObject);
            for handle in &handles {
                datagram.push(
                    handle.log_fd(),
                    FdTag::Logger {
                        handler: handle.name().to_string(),
                    },
                );
            }
            for (handle, descriptor) in handles.iter().zip(&handlers) {
                datagram.push(
                    handle.metadata_fd(),
                    FdTag::Metadata {
                        handler: descriptor.name.clone(),
                        main: descriptor.main.clone(),
                        dependencies: descriptor.dependencies.clone(),
                    },
                );
            }
            mcgate_sbus::send(&self.channel, &datagram)
        };

        drop(writer);
        drop(input);
        for handle in handles {
            handle.close();
        }
        let bytes = sent.map_err(GatewayError::ProtocolSendFailure)?;
        tracing::debug!(
            task_id = %task_id,
            handlers = handlers.len(),
            bytes,
            channel = %self.channel.display(),
            "invocation sent"
        );

        let mut receiver =
            pipe::Receiver::from_owned_fd(OwnedFd::from(reader)).map_err(|e| io_error(&self.channel, e))?;
        let mut buf = vec![0u8; self.chunk_bytes];
        let read = match tokio::time::timeout(self.timeout, receiver.read(&mut buf)).await {
            Ok(read) => read.map_err(|e| io_error(&self.channel, e))?,
            Err(_) => {
                self.cancel(&task_id);
                return Err(GatewayError::Timeout {
                    task_id,
                    after: self.timeout,
                });
            }
        };
        parse_response(&buf[..read])
    }

    /// Fire-and-forget cancel for a task the sandbox did not answer in time.
    fn cancel(&self, task_id: &str) {
        let datagram = Datagram::new(Command::Cancel).with_task_id(task_id);
        match mcgate_sbus::send(&self.channel, &datagram) {
            Ok(_) => tracing::info!(task_id, "invocation timed out; cancel sent"),
            Err(err) => tracing::warn!(task_id, error = %err, "failed to send cancel"),
        }
    }
}

fn parse_response(bytes: &[u8]) -> GatewayResult<Option<Value>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(GatewayError::MalformedResponse("empty response".into()));
    }
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
    match &value {
        Value::Object(map) if map.is_empty() => Ok(None),
        _ => Ok(Some(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parsing() {
        assert_eq!(parse_response(b"{}").unwrap(), None);
        assert_eq!(
            parse_response(br#"{"status":"ok"}"#).unwrap(),
            Some(json!({"status": "ok"}))
        );
        assert!(matches!(
            parse_response(b""),
            Err(GatewayError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_response(b"{\"trunc"),
            Err(GatewayError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn send_failure_is_reported() {
        let tmp = tempfile::TempDir::new().unwrap();
        let protocol = InvocationProtocol::new(tmp.path().join("absent"), Duration::from_secs(1), 64);
        let err = protocol
            .invoke(InvocationRequest {
                task_id: "t-1".into(),
                handlers: vec![],
                handles: vec![],
                request_headers: BTreeMap::new(),
                object_headers: BTreeMap::new(),
                input: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolSendFailure(_)), "{err:?}");
    }
}
