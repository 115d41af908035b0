//! Messages exchanged between clients, proxies and vault groups.

use crate::data::{AppendWrapper, Data, DataIdentifier, IdAndVersion};
use crate::error::{GetError, MutationError};
use crate::xor_name::XorName;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub Ulid);

impl MessageId {
    pub fn new() -> Self {
        MessageId(Ulid::new())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role a message is sent from or to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Authority {
    /// A client, reachable through the vault it sent its request to.
    Client { client_name: XorName, proxy: XorName },
    /// The close group of vaults responsible for a name.
    NaeManager(XorName),
    /// A single vault.
    ManagedNode(XorName),
}

impl Authority {
    pub fn name(&self) -> XorName {
        match *self {
            Authority::Client { client_name, .. } => client_name,
            Authority::NaeManager(name) | Authority::ManagedNode(name) => name,
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Authority::Client { .. })
    }
}

/// Refresh traffic between vaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshPayload {
    /// The sender holds these data items.
    Holdings(Vec<IdAndVersion>),
    /// A group member's vote to commit a pending write.
    GroupWrite(RefreshData),
}

/// A vote to commit the pending write of `id_and_version` whose content hashes to `hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefreshData {
    pub id_and_version: IdAndVersion,
    pub hash: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Get(DataIdentifier),
    Put(Data),
    Post(Data),
    Delete(Data),
    Append(AppendWrapper),
    Refresh(RefreshPayload),
}

impl Request {
    /// The data name this request is about, if any.
    pub fn data_identifier(&self) -> Option<DataIdentifier> {
        match self {
            Request::Get(data_id) => Some(*data_id),
            Request::Put(data) | Request::Post(data) | Request::Delete(data) => {
                Some(data.identifier())
            }
            Request::Append(wrapper) => Some(wrapper.identifier()),
            Request::Refresh(_) => None,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Request::Put(_) | Request::Post(_) | Request::Delete(_) | Request::Append(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    GetSuccess(Data),
    GetFailure {
        data_id: DataIdentifier,
        error: GetError,
    },
    PutSuccess(DataIdentifier),
    PutFailure {
        data_id: DataIdentifier,
        error: MutationError,
    },
    PostSuccess(DataIdentifier),
    PostFailure {
        data_id: DataIdentifier,
        error: MutationError,
    },
    DeleteSuccess(DataIdentifier),
    DeleteFailure {
        data_id: DataIdentifier,
        error: MutationError,
    },
    AppendSuccess(DataIdentifier),
    AppendFailure {
        data_id: DataIdentifier,
        error: MutationError,
    },
}

impl Response {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Response::GetSuccess(_)
                | Response::PutSuccess(_)
                | Response::PostSuccess(_)
                | Response::DeleteSuccess(_)
                | Response::AppendSuccess(_)
        )
    }

    pub fn data_identifier(&self) -> DataIdentifier {
        match self {
            Response::GetSuccess(data) => data.identifier(),
            Response::GetFailure { data_id, .. }
            | Response::PutFailure { data_id, .. }
            | Response::PostFailure { data_id, .. }
            | Response::DeleteFailure { data_id, .. }
            | Response::AppendFailure { data_id, .. } => *data_id,
            Response::PutSuccess(data_id)
            | Response::PostSuccess(data_id)
            | Response::DeleteSuccess(data_id)
            | Response::AppendSuccess(data_id) => *data_id,
        }
    }

    /// The failure response matching `request` with the given reason.
    pub fn failure_for(request: &Request, reason: String) -> Option<Response> {
        let data_id = request.data_identifier()?;
        let error = MutationError::NetworkOther(reason.clone());
        Some(match request {
            Request::Get(_) => Response::GetFailure {
                data_id,
                error: GetError::NetworkOther(reason),
            },
            Request::Put(_) => Response::PutFailure { data_id, error },
            Request::Post(_) => Response::PostFailure { data_id, error },
            Request::Delete(_) => Response::DeleteFailure { data_id, error },
            Request::Append(_) => Response::AppendFailure { data_id, error },
            Request::Refresh(_) => return None,
        })
    }
}

/// Contact details of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: XorName,
    /// Address of the vault's peer listener, `host:port`.
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipMessage {
    /// The sender wants to be part of the receiver's routing table.
    Join(PeerInfo),
    /// Reply to `Join` listing the peers the receiver knows, itself included.
    Welcome(Vec<PeerInfo>),
    Heartbeat,
    /// The sender is shutting down.
    Leave(XorName),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Request {
        src: Authority,
        dst: Authority,
        request: Request,
        message_id: MessageId,
    },
    Response {
        src: Authority,
        dst: Authority,
        response: Response,
        message_id: MessageId,
    },
    Membership(MembershipMessage),
}

/// A message to deliver to a single vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub target: XorName,
    pub message: Message,
}

/// A request submitted on the client port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    #[serde(default)]
    pub client_name: Option<XorName>,
    pub request: Request,
}

/// The outcome of a client request as returned on the client port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientReply {
    pub message_id: MessageId,
    pub response: Response,
}
