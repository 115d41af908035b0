//! Request dispatcher of a vault.

use crate::config::VaultConfig;
use crate::data::IdAndVersion;
use crate::data_manager::{DataManager, DataManagerStats};
use crate::error::{Result, VaultError};
use crate::messages::{
    Authority, ClientReply, ClientRequest, Envelope, MembershipMessage, Message, MessageId,
    PeerInfo, RefreshPayload, Request, Response,
};
use crate::proxy::Proxy;
use crate::routing_node::RoutingNode;
use crate::routing_table::RoutingTable;
use crate::xor_name::XorName;
use serde::Serialize;

/// Snapshot served on the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct VaultStats {
    pub name: XorName,
    pub peer_count: usize,
    pub pending_client_requests: usize,
    pub data: DataManagerStats,
}

/// A vault: routing table, data manager and proxy behind a single message entry point.
///
/// `Vault` performs no network I/O. Handlers queue outgoing messages and `pump` delivers the
/// ones addressed to ourselves, returning the rest for the transport.
pub struct Vault {
    routing_node: RoutingNode,
    data_manager: DataManager,
    proxy: Proxy,
    config: VaultConfig,
    client_replies: Vec<ClientReply>,
}

impl Vault {
    pub fn new(config: VaultConfig, our_info: PeerInfo) -> Result<Self> {
        let data_manager = DataManager::new(&config)?;
        let table = RoutingTable::new(our_info, config.group_size);
        tracing::info!(
            "Created vault {} with chunk store at {:?}",
            table.our_name(),
            config.chunk_store_root
        );
        Ok(Self {
            routing_node: RoutingNode::new(table),
            data_manager,
            proxy: Proxy::new(config.request_timeout),
            config,
            client_replies: Vec::new(),
        })
    }

    pub fn name(&self) -> XorName {
        self.routing_node.name()
    }

    pub fn our_info(&self) -> &PeerInfo {
        self.routing_node.our_info()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.routing_node.routing_table().peers()
    }

    pub fn peer_address(&self, name: &XorName) -> Option<String> {
        self.routing_node
            .routing_table()
            .peer_address(name)
            .map(str::to_string)
    }

    pub fn routing_table(&self) -> &RoutingTable {
        self.routing_node.routing_table()
    }

    /// Data this vault holds as a member of the responsible close group.
    pub fn stored_names(&self) -> Vec<IdAndVersion> {
        self.data_manager.stored_names()
    }

    pub fn stats(&self) -> VaultStats {
        VaultStats {
            name: self.name(),
            peer_count: self.routing_node.routing_table().len(),
            pending_client_requests: self.proxy.pending_count(),
            data: self.data_manager.stats(),
        }
    }

    /// Starts joining the network through `contact`.
    pub async fn bootstrap(&mut self, contact: PeerInfo) {
        if contact.name == self.name() {
            return;
        }
        let contact_name = contact.name;
        let _ = self.add_peer(contact).await;
        let join = MembershipMessage::Join(self.our_info().clone());
        self.routing_node.send_membership(contact_name, join);
    }

    /// Handles a message received from `sender`.
    pub async fn handle_wire_message(&mut self, sender: PeerInfo, message: Message) -> Result<()> {
        let sender_name = sender.name;
        if sender_name == self.name() {
            return Err(VaultError::InvalidMessage(
                "received a message carrying our own name".to_string(),
            ));
        }
        if let Message::Membership(MembershipMessage::Leave(name)) = &message {
            if *name == sender_name {
                self.peer_lost(&sender_name);
            }
            return Ok(());
        }
        if !self.add_peer(sender).await {
            let _ = self.routing_node.routing_table_mut().touch(&sender_name);
        }
        self.dispatch(sender_name, message).await
    }

    /// Accepts a request from a client of this vault. The reply shows up in `take_client_replies`.
    pub fn handle_client_request(&mut self, request: ClientRequest) -> Result<MessageId> {
        let client_name = request.client_name.unwrap_or_else(XorName::random);
        self.proxy
            .handle_client_request(&mut self.routing_node, client_name, request.request)
    }

    /// Processes messages addressed to ourselves until none are left and returns the envelopes
    /// for other vaults.
    pub async fn pump(&mut self) -> Vec<Envelope> {
        let our_name = self.name();
        let mut remote = Vec::new();
        while let Some(envelope) = self.routing_node.pop_envelope() {
            if envelope.target != our_name {
                remote.push(envelope);
                continue;
            }
            if let Err(error) = self.dispatch(our_name, envelope.message).await {
                tracing::warn!("Failed to handle local message: {}", error);
            }
        }
        remote
    }

    pub fn take_client_replies(&mut self) -> Vec<ClientReply> {
        std::mem::take(&mut self.client_replies)
    }

    pub fn heartbeat(&mut self) {
        for peer in self.peers() {
            self.routing_node
                .send_membership(peer.name, MembershipMessage::Heartbeat);
        }
    }

    /// Tells every peer that we are shutting down.
    pub fn leave(&mut self) {
        let our_name = self.name();
        for peer in self.peers() {
            self.routing_node
                .send_membership(peer.name, MembershipMessage::Leave(our_name));
        }
    }

    /// Drops peers we have not heard from within the peer timeout.
    pub fn expire_peers(&mut self) -> Vec<XorName> {
        let expired = self
            .routing_node
            .routing_table()
            .expired_peers(self.config.peer_timeout);
        for name in &expired {
            tracing::info!("Peer {:?} timed out", name);
            self.peer_lost(name);
        }
        expired
    }

    /// Removes `name` from the routing table and repairs the groups it was part of.
    pub fn peer_lost(&mut self, name: &XorName) {
        if self
            .routing_node
            .routing_table_mut()
            .remove_peer(name)
            .is_none()
        {
            return;
        }
        tracing::info!(
            "Lost peer {:?}, {} peers left",
            name,
            self.routing_node.routing_table().len()
        );
        self.data_manager
            .handle_node_lost(&mut self.routing_node, name);
        let replies = self.proxy.handle_node_lost(name);
        self.client_replies.extend(replies);
    }

    pub fn check_timeouts(&mut self) {
        self.data_manager.check_timeouts(&mut self.routing_node);
        let replies = self.proxy.check_timeouts();
        self.client_replies.extend(replies);
    }

    async fn add_peer(&mut self, info: PeerInfo) -> bool {
        let name = info.name;
        if !self.routing_node.routing_table_mut().add_peer(info) {
            return false;
        }
        tracing::info!(
            "Added peer {:?}, {} peers known",
            name,
            self.routing_node.routing_table().len()
        );
        self.data_manager
            .handle_node_added(&mut self.routing_node, &name)
            .await;
        true
    }

    async fn dispatch(&mut self, sender: XorName, message: Message) -> Result<()> {
        match message {
            Message::Membership(message) => {
                self.handle_membership(message).await;
                Ok(())
            }
            Message::Request {
                src,
                dst,
                request,
                message_id,
            } => self.handle_request(sender, src, dst, request, message_id).await,
            Message::Response {
                dst,
                response,
                message_id,
                ..
            } => self.handle_response(sender, dst, response, message_id).await,
        }
    }

    async fn handle_membership(&mut self, message: MembershipMessage) {
        match message {
            MembershipMessage::Join(info) => {
                let joiner = info.name;
                let _ = self.add_peer(info).await;
                let mut peers = self.peers();
                peers.push(self.our_info().clone());
                self.routing_node
                    .send_membership(joiner, MembershipMessage::Welcome(peers));
            }
            MembershipMessage::Welcome(peers) => {
                let our_name = self.name();
                for peer in peers {
                    let peer_name = peer.name;
                    if peer_name != our_name && self.add_peer(peer).await {
                        let join = MembershipMessage::Join(self.our_info().clone());
                        self.routing_node.send_membership(peer_name, join);
                    }
                }
            }
            MembershipMessage::Heartbeat => {}
            MembershipMessage::Leave(name) => {
                if name != self.name() {
                    self.peer_lost(&name);
                }
            }
        }
    }

    async fn handle_request(
        &mut self,
        sender: XorName,
        src: Authority,
        dst: Authority,
        request: Request,
        message_id: MessageId,
    ) -> Result<()> {
        let routing_node = &mut self.routing_node;
        let data_manager = &mut self.data_manager;
        match (request, dst) {
            (Request::Get(data_id), _) => {
                data_manager
                    .handle_get(routing_node, src, dst, data_id, message_id)
                    .await
            }
            (Request::Put(data), Authority::NaeManager(_)) => {
                data_manager
                    .handle_put(routing_node, src, dst, data, message_id)
                    .await
            }
            (Request::Post(data), Authority::NaeManager(_)) => {
                data_manager
                    .handle_post(routing_node, src, dst, data, message_id)
                    .await
            }
            (Request::Delete(data), Authority::NaeManager(_)) => {
                data_manager
                    .handle_delete(routing_node, src, dst, data, message_id)
                    .await
            }
            (Request::Append(wrapper), Authority::NaeManager(_)) => {
                data_manager
                    .handle_append(routing_node, src, dst, wrapper, message_id)
                    .await
            }
            (Request::Refresh(RefreshPayload::Holdings(data_list)), _) => {
                // Our own announcements to a group we are part of.
                if sender == routing_node.name() {
                    return Ok(());
                }
                data_manager
                    .handle_refresh(routing_node, sender, data_list)
                    .await
            }
            (Request::Refresh(RefreshPayload::GroupWrite(vote)), Authority::NaeManager(_)) => {
                data_manager
                    .handle_group_write(routing_node, sender, vote)
                    .await
            }
            (request, dst) => Err(VaultError::InvalidMessage(format!(
                "unexpected request {:?} for {:?}",
                request.data_identifier(),
                dst
            ))),
        }
    }

    async fn handle_response(
        &mut self,
        sender: XorName,
        dst: Authority,
        response: Response,
        message_id: MessageId,
    ) -> Result<()> {
        let our_name = self.name();
        match dst {
            Authority::Client { proxy, .. } if proxy == our_name => {
                if let Some(reply) = self.proxy.handle_response(sender, response, message_id) {
                    tracing::debug!(
                        "Request {:?} resolved, success: {}",
                        message_id,
                        reply.response.is_success()
                    );
                    self.client_replies.push(reply);
                }
                Ok(())
            }
            Authority::ManagedNode(name) if name == our_name => match response {
                Response::GetSuccess(data) => {
                    self.data_manager
                        .handle_get_success(&mut self.routing_node, sender, data)
                        .await
                }
                Response::GetFailure { data_id, .. } => self
                    .data_manager
                    .handle_get_failure(&mut self.routing_node, sender, data_id),
                other => {
                    tracing::debug!("Ignoring response {:?} from {:?}", other, sender);
                    Ok(())
                }
            },
            dst => Err(VaultError::InvalidMessage(format!(
                "response {:?} not meant for us but for {:?}",
                message_id, dst
            ))),
        }
    }
}
