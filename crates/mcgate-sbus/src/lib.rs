//! Control-plane channel between the gateway and a tenant's sandbox daemon.
//!
//! One datagram on a Unix datagram socket carries a JSON header (command, task id, one tag
//! per descriptor, free-form params) and the descriptors themselves as `SCM_RIGHTS`
//! ancillary data. Descriptors and tags are paired by position.

use std::collections::BTreeMap;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{
    ControlMessage, ControlMessageOwned, MsgFlags, UnixAddr, recvmsg, sendmsg,
};
use serde::{Deserialize, Serialize};

/// Kernel limit on descriptors in one `SCM_RIGHTS` message.
pub const MAX_DESCRIPTORS: usize = 253;
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Execute,
    Cancel,
}

/// Routing tag attached to every descriptor in a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FdTag {
    /// Object input; `headers` holds the request and object headers.
    InputObject { headers: serde_json::Value },
    /// Write end of the response pipe.
    OutputObject,
    Logger {
        handler: String,
    },
    Metadata {
        handler: String,
        main: String,
        dependencies: Vec<String>,
    },
}

impl FdTag {
    pub fn handler(&self) -> Option<&str> {
        match self {
            FdTag::Logger { handler } | FdTag::Metadata { handler, .. } => Some(handler),
            FdTag::InputObject { .. } | FdTag::OutputObject => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
    #[serde(default)]
    files: Vec<FdTag>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, String>,
}

/// Outgoing datagram. Borrows the descriptors it carries; the kernel duplicates them into
/// the receiver on send.
#[derive(Debug)]
pub struct Datagram<'fd> {
    command: Command,
    task_id: Option<String>,
    params: BTreeMap<String, String>,
    files: Vec<(BorrowedFd<'fd>, FdTag)>,
}

impl<'fd> Datagram<'fd> {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            task_id: None,
            params: BTreeMap::new(),
            files: Vec::new(),
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn push(&mut self, fd: BorrowedFd<'fd>, tag: FdTag) {
        self.files.push((fd, tag));
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn tags(&self) -> impl Iterator<Item = &FdTag> {
        self.files.iter().map(|(_, tag)| tag)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn header(&self) -> Header {
        Header {
            command: self.command,
            task_id: self.task_id.clone(),
            files: self.files.iter().map(|(_, tag)| tag.clone()).collect(),
            params: self.params.clone(),
        }
    }
}

/// Incoming datagram. Owns the descriptors the kernel installed for this process.
#[derive(Debug)]
pub struct ReceivedDatagram {
    pub command: Command,
    pub task_id: Option<String>,
    pub params: BTreeMap<String, String>,
    pub files: Vec<(OwnedFd, FdTag)>,
}

impl ReceivedDatagram {
    pub fn tags(&self) -> impl Iterator<Item = &FdTag> {
        self.files.iter().map(|(_, tag)| tag)
    }

    /// Removes and returns the first descriptor whose tag matches.
    pub fn take(&mut self, mut matches: impl FnMut(&FdTag) -> bool) -> Option<(OwnedFd, FdTag)> {
        let idx = self.files.iter().position(|(_, tag)| matches(tag))?;
        Some(self.files.remove(idx))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SbusError {
    #[error("datagram carries {0} descriptors (max {MAX_DESCRIPTORS})")]
    TooManyDescriptors(usize),
    #[error("datagram header is {0} bytes (max {MAX_HEADER_BYTES})")]
    HeaderTooLarge(usize),
    #[error("failed to encode datagram header: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode datagram header: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("invalid channel path {path:?}: {source}")]
    Address {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("send to {path:?} failed: {source}")]
    Send {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("receive on {path:?} failed: {source}")]
    Recv {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("channel socket error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("datagram or its descriptors were truncated")]
    Truncated,
    #[error("datagram declares {declared} descriptors but carried {received}")]
    DescriptorMismatch { declared: usize, received: usize },
}

impl SbusError {
    /// True when a receive gave up because the socket read timeout expired.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SbusError::Recv {
                source: Errno::EAGAIN,
                ..
            }
        )
    }
}

/// Sends one datagram to the channel bound at `path`. Returns the number of header bytes
/// the kernel accepted.
pub fn send(path: &Path, datagram: &Datagram<'_>) -> Result<usize, SbusError> {
    if datagram.files.len() > MAX_DESCRIPTORS {
        return Err(SbusError::TooManyDescriptors(datagram.files.len()));
    }
    let payload = serde_json::to_vec(&datagram.header()).map_err(SbusError::Encode)?;
    if payload.len() > MAX_HEADER_BYTES {
        return Err(SbusError::HeaderTooLarge(payload.len()));
    }
    let addr = UnixAddr::new(path).map_err(|source| SbusError::Address {
        path: path.to_path_buf(),
        source,
    })?;
    let socket = UnixDatagram::unbound().map_err(|source| SbusError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let fds: Vec<RawFd> = datagram.files.iter().map(|(fd, _)| fd.as_raw_fd()).collect();
    let iov = [IoSlice::new(&payload)];
    let rights = [ControlMessage::ScmRights(&fds)];
    let cmsgs: &[ControlMessage<'_>] = if fds.is_empty() { &[] } else { &rights };

    let sent = sendmsg(socket.as_raw_fd(), &iov, cmsgs, MsgFlags::empty(), Some(&addr))
        .map_err(|source| SbusError::Send {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::trace!(
        path = %path.display(),
        command = ?datagram.command,
        descriptors = fds.len(),
        bytes = sent,
        "datagram sent"
    );
    Ok(sent)
}

/// Receiving end of a channel, as run by a sandbox daemon.
#[derive(Debug)]
pub struct SbusListener {
    socket: UnixDatagram,
    path: PathBuf,
}

impl SbusListener {
    /// Binds the channel, replacing a stale socket file left at `path`.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, SbusError> {
        let path = path.into();
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }
        let socket = UnixDatagram::bind(&path).map_err(|source| SbusError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self { socket, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SbusError> {
        self.socket
            .set_read_timeout(timeout)
            .map_err(|source| SbusError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Blocks until one datagram arrives.
    pub fn recv(&self) -> Result<ReceivedDatagram, SbusError> {
        let mut payload = vec![0u8; MAX_HEADER_BYTES];
        let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_DESCRIPTORS]);

        let (len, flags, fds) = {
            let mut iov = [IoSliceMut::new(&mut payload)];
            let msg = recvmsg::<UnixAddr>(
                self.socket.as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_buffer),
                MsgFlags::empty(),
            )
            .map_err(|source| self.recv_error(source))?;
            let mut fds = Vec::new();
            for cmsg in msg.cmsgs().map_err(|source| self.recv_error(source))? {
                if let ControlMessageOwned::ScmRights(raw) = cmsg {
                    // SAFETY: the kernel just installed these descriptors in this process
                    // and nothing else holds them.
                    fds.extend(raw.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
                }
            }
            (msg.bytes, msg.flags, fds)
        };

        if flags.intersects(MsgFlags::MSG_TRUNC | MsgFlags::MSG_CTRUNC) {
            return Err(SbusError::Truncated);
        }
        let header: Header = serde_json::from_slice(&payload[..len]).map_err(SbusError::Decode)?;
        if header.files.len() != fds.len() {
            return Err(SbusError::DescriptorMismatch {
                declared: header.files.len(),
                received: fds.len(),
            });
        }
        Ok(ReceivedDatagram {
            command: header.command,
            task_id: header.task_id,
            params: header.params,
            files: fds.into_iter().zip(header.files).collect(),
        })
    }

    fn recv_error(&self, source: Errno) -> SbusError {
        SbusError::Recv {
            path: self.path.clone(),
            source,
        }
    }
}

impl Drop for SbusListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
