use crate::messages::{
    Authority, Envelope, MembershipMessage, Message, MessageId, PeerInfo, Request, Response,
};
use crate::routing_table::RoutingTable;
use crate::xor_name::XorName;
use std::collections::VecDeque;

/// Outbox shared by the personas of a vault.
///
/// Sending never performs I/O: messages are resolved to the vaults that should receive them and
/// queued as envelopes until the dispatcher drains them.
pub struct RoutingNode {
    table: RoutingTable,
    outbox: VecDeque<Envelope>,
}

impl RoutingNode {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table,
            outbox: VecDeque::new(),
        }
    }

    pub fn name(&self) -> XorName {
        self.table.our_name()
    }

    pub fn our_info(&self) -> &PeerInfo {
        self.table.our_info()
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn routing_table_mut(&mut self) -> &mut RoutingTable {
        &mut self.table
    }

    pub fn close_group(&self, name: &XorName) -> Option<Vec<XorName>> {
        self.table.close_group(name)
    }

    pub fn send_request(
        &mut self,
        src: Authority,
        dst: Authority,
        request: Request,
        message_id: MessageId,
    ) {
        for target in self.targets(&dst) {
            self.outbox.push_back(Envelope {
                target,
                message: Message::Request {
                    src,
                    dst,
                    request: request.clone(),
                    message_id,
                },
            });
        }
    }

    pub fn send_response(
        &mut self,
        src: Authority,
        dst: Authority,
        response: Response,
        message_id: MessageId,
    ) {
        for target in self.targets(&dst) {
            self.outbox.push_back(Envelope {
                target,
                message: Message::Response {
                    src,
                    dst,
                    response: response.clone(),
                    message_id,
                },
            });
        }
    }

    pub fn send_membership(&mut self, target: XorName, message: MembershipMessage) {
        self.outbox.push_back(Envelope {
            target,
            message: Message::Membership(message),
        });
    }

    pub fn pop_envelope(&mut self) -> Option<Envelope> {
        self.outbox.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// The vaults a message to `dst` is delivered to.
    fn targets(&self, dst: &Authority) -> Vec<XorName> {
        match *dst {
            Authority::NaeManager(name) => self.table.closest_names(&name, self.table.group_size()),
            Authority::ManagedNode(name) => vec![name],
            Authority::Client { proxy, .. } => vec![proxy],
        }
    }
}
