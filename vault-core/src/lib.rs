//! Vault Core - storage peer of a distributed, content-addressed storage network
//!
//! A vault keeps the data whose names are XOR-closest to its own name:
//! - SHA256 content-addressed names in a 256-bit XOR space
//! - close groups of vaults jointly responsible for each name
//! - group-quorum commits of mutations
//! - replica repair through refresh messages as vaults join and leave
//! - chunk files with a SQLite index for local storage

pub mod accumulator;
pub mod codec;
pub mod config;
pub mod data;
pub mod data_manager;
pub mod error;
pub mod messages;
pub mod proxy;
pub mod routing_node;
pub mod routing_table;
pub mod storage;
pub mod vault;
pub mod xor_name;

pub use accumulator::Accumulator;
pub use codec::{
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION, WireMessage, decode_client_reply, decode_client_request,
    decode_wire, encode_client_reply, encode_client_request, encode_wire,
};
pub use config::VaultConfig;
pub use data::{
    AppendWrapper, AppendableData, AppendedItem, Data, DataIdentifier, Filter, IdAndVersion,
    ImmutableData, StructuredData,
};
pub use data_manager::{DataManager, DataManagerStats};
pub use error::{GetError, MutationError, Result, VaultError};
pub use messages::{
    Authority, ClientReply, ClientRequest, Envelope, MembershipMessage, Message, MessageId,
    PeerInfo, RefreshData, RefreshPayload, Request, Response,
};
pub use proxy::Proxy;
pub use routing_node::RoutingNode;
pub use routing_table::{DEFAULT_GROUP_SIZE, RoutingTable};
pub use storage::{ChunkEntry, ChunkIndex, ChunkStore, compute_hash, verify_hash};
pub use vault::{Vault, VaultStats};
pub use xor_name::XorName;
