//! Client requests on the vault that received them.
//!
//! The proxy forwards each request to the close group of its data and turns the members'
//! individual responses into a single reply for the client.

use crate::error::{Result, VaultError};
use crate::messages::{Authority, ClientReply, MessageId, Request, Response};
use crate::routing_node::RoutingNode;
use crate::xor_name::XorName;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

struct PendingRequest {
    /// Group members that have not answered yet.
    awaiting: HashSet<XorName>,
    /// Successes needed before we reply with success.
    quorum: usize,
    successes: usize,
    failures: Vec<Response>,
    timeout_reply: Response,
    created_at: Instant,
}

impl PendingRequest {
    fn is_hopeless(&self) -> bool {
        self.successes + self.awaiting.len() < self.quorum
    }

    /// The failure reported by most members, or the timeout reply if nobody failed.
    fn most_common_failure(&self) -> Response {
        let mut counts: Vec<(&Response, usize)> = Vec::new();
        for failure in &self.failures {
            match counts.iter_mut().find(|(response, _)| *response == failure) {
                Some((_, count)) => *count += 1,
                None => counts.push((failure, 1)),
            }
        }
        let mut best: Option<(&Response, usize)> = None;
        for (response, count) in counts {
            if best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((response, count));
            }
        }
        best.map_or_else(|| self.timeout_reply.clone(), |(response, _)| response.clone())
    }
}

pub struct Proxy {
    pending: HashMap<MessageId, PendingRequest>,
    request_timeout: Duration,
}

impl Proxy {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            request_timeout,
        }
    }

    /// Forwards `request` to the close group of its data name.
    pub fn handle_client_request(
        &mut self,
        routing_node: &mut RoutingNode,
        client_name: XorName,
        request: Request,
    ) -> Result<MessageId> {
        let (Some(data_id), Some(timeout_reply)) = (
            request.data_identifier(),
            Response::failure_for(&request, "Request timed out.".to_string()),
        ) else {
            return Err(VaultError::InvalidMessage(
                "clients may not send refresh requests".to_string(),
            ));
        };

        let name = data_id.name();
        let table = routing_node.routing_table();
        let awaiting: HashSet<XorName> = table
            .closest_names(&name, table.group_size())
            .into_iter()
            .collect();
        let quorum = if request.is_mutation() {
            table.group_quorum(&name)
        } else {
            1
        };

        let message_id = MessageId::new();
        let src = Authority::Client {
            client_name,
            proxy: routing_node.name(),
        };
        tracing::debug!(
            "Proxying {:?} for client {:?} to {} group members ({:?})",
            data_id,
            client_name,
            awaiting.len(),
            message_id
        );
        routing_node.send_request(src, Authority::NaeManager(name), request, message_id);

        let _ = self.pending.insert(
            message_id,
            PendingRequest {
                awaiting,
                quorum,
                successes: 0,
                failures: Vec::new(),
                timeout_reply,
                created_at: Instant::now(),
            },
        );
        Ok(message_id)
    }

    /// Records the response of group member `src`. Returns the client reply once decided.
    pub fn handle_response(
        &mut self,
        src: XorName,
        response: Response,
        message_id: MessageId,
    ) -> Option<ClientReply> {
        let Some(pending) = self.pending.get_mut(&message_id) else {
            tracing::trace!("Response for finished request {:?} from {:?}", message_id, src);
            return None;
        };
        if !pending.awaiting.remove(&src) {
            tracing::debug!("Unexpected response for {:?} from {:?}", message_id, src);
            return None;
        }

        let decided = if response.is_success() {
            pending.successes += 1;
            (pending.successes >= pending.quorum).then_some(response)
        } else {
            pending.failures.push(response);
            None
        };
        let decided =
            decided.or_else(|| pending.is_hopeless().then(|| pending.most_common_failure()));

        decided.map(|response| {
            let _ = self.pending.remove(&message_id);
            ClientReply {
                message_id,
                response,
            }
        })
    }

    /// Stops waiting for `name` and returns the requests that can no longer succeed.
    pub fn handle_node_lost(&mut self, name: &XorName) -> Vec<ClientReply> {
        let mut replies = Vec::new();
        self.pending.retain(|message_id, pending| {
            if !pending.awaiting.remove(name) || !pending.is_hopeless() {
                return true;
            }
            replies.push(ClientReply {
                message_id: *message_id,
                response: pending.most_common_failure(),
            });
            false
        });
        replies
    }

    /// Answers requests the group did not decide within the request timeout.
    pub fn check_timeouts(&mut self) -> Vec<ClientReply> {
        let timeout = self.request_timeout;
        let mut replies = Vec::new();
        self.pending.retain(|message_id, pending| {
            if pending.created_at.elapsed() <= timeout {
                return true;
            }
            tracing::debug!("Request {:?} timed out", message_id);
            replies.push(ClientReply {
                message_id: *message_id,
                response: pending.timeout_reply.clone(),
            });
            false
        });
        replies
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Data, DataIdentifier, ImmutableData};
    use crate::error::{GetError, MutationError};
    use crate::messages::PeerInfo;
    use crate::routing_table::RoutingTable;
    use bytes::Bytes;

    fn info(byte: u8) -> PeerInfo {
        PeerInfo {
            name: XorName([byte; 32]),
            address: format!("10.0.0.{}:5100", byte),
        }
    }

    fn node_with_peers(peers: &[u8]) -> RoutingNode {
        let mut table = RoutingTable::new(info(1), 8);
        for peer in peers {
            let _ = table.add_peer(info(*peer));
        }
        RoutingNode::new(table)
    }

    fn data() -> Data {
        Data::Immutable(ImmutableData::new(Bytes::from_static(b"proxied")))
    }

    fn put_failure(error: MutationError) -> Response {
        Response::PutFailure {
            data_id: data().identifier(),
            error,
        }
    }

    #[test]
    fn test_get_first_success_wins() {
        let mut node = node_with_peers(&[2, 3]);
        let mut proxy = Proxy::new(Duration::from_secs(30));
        let data_id = data().identifier();
        let message_id = proxy
            .handle_client_request(&mut node, XorName([9; 32]), Request::Get(data_id))
            .unwrap();

        let failure = Response::GetFailure {
            data_id,
            error: GetError::NoSuchData,
        };
        assert!(proxy.handle_response(info(2).name, failure, message_id).is_none());
        let reply = proxy
            .handle_response(info(3).name, Response::GetSuccess(data()), message_id)
            .unwrap();
        assert_eq!(reply.response, Response::GetSuccess(data()));
        assert_eq!(proxy.pending_count(), 0);
        assert!(proxy
            .handle_response(info(1).name, Response::GetSuccess(data()), message_id)
            .is_none());
    }

    #[test]
    fn test_mutation_needs_group_quorum() {
        let mut node = node_with_peers(&[2, 3, 4]);
        let mut proxy = Proxy::new(Duration::from_secs(30));
        let message_id = proxy
            .handle_client_request(&mut node, XorName([9; 32]), Request::Put(data()))
            .unwrap();
        let success = Response::PutSuccess(data().identifier());

        // Four members: three successes needed.
        assert!(proxy.handle_response(info(1).name, success.clone(), message_id).is_none());
        assert!(proxy.handle_response(info(1).name, success.clone(), message_id).is_none());
        assert!(proxy.handle_response(info(2).name, success.clone(), message_id).is_none());
        let reply = proxy.handle_response(info(3).name, success.clone(), message_id).unwrap();
        assert_eq!(reply.response, success);
    }

    #[test]
    fn test_mutation_fails_with_most_common_failure() {
        let mut node = node_with_peers(&[2, 3, 4]);
        let mut proxy = Proxy::new(Duration::from_secs(30));
        let message_id = proxy
            .handle_client_request(&mut node, XorName([9; 32]), Request::Put(data()))
            .unwrap();

        assert!(proxy
            .handle_response(info(1).name, put_failure(MutationError::NetworkFull), message_id)
            .is_none());
        let reply = proxy
            .handle_response(info(2).name, put_failure(MutationError::NetworkFull), message_id)
            .unwrap();
        assert_eq!(reply.response, put_failure(MutationError::NetworkFull));
    }

    #[test]
    fn test_lost_members_and_timeouts() {
        let mut node = node_with_peers(&[2]);
        let mut proxy = Proxy::new(Duration::ZERO);
        let put_id = proxy
            .handle_client_request(&mut node, XorName([9; 32]), Request::Put(data()))
            .unwrap();
        assert!(proxy
            .handle_response(info(1).name, put_failure(MutationError::DataExists), put_id)
            .is_some());

        let get_id = proxy
            .handle_client_request(&mut node, XorName([9; 32]), Request::Get(data().identifier()))
            .unwrap();
        assert!(proxy.handle_node_lost(&info(2).name).is_empty());
        std::thread::sleep(Duration::from_millis(5));

        let replies = proxy.check_timeouts();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message_id, get_id);
        assert_eq!(
            replies[0].response,
            Response::GetFailure {
                data_id: data().identifier(),
                error: GetError::NetworkOther("Request timed out.".to_string()),
            }
        );
    }

    #[test]
    fn test_refresh_is_not_a_client_request() {
        let mut node = node_with_peers(&[]);
        let mut proxy = Proxy::new(Duration::from_secs(30));
        let request = Request::Refresh(crate::messages::RefreshPayload::Holdings(vec![(
            DataIdentifier::Immutable(XorName([4; 32])),
            0,
        )]));
        assert!(proxy
            .handle_client_request(&mut node, XorName([9; 32]), request)
            .is_err());
        assert!(!node.has_pending());
    }
}
