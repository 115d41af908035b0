//! Vaults wired together through in-memory message passing.

use bytes::Bytes;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tempfile::TempDir;
use safe_vault::{
    AppendWrapper, AppendableData, AppendedItem, ClientRequest, Data, DataIdentifier, Filter,
    GetError, ImmutableData, MutationError, PeerInfo, Request, Response, StructuredData, Vault,
    VaultConfig, XorName,
};

const GROUP_SIZE: usize = 4;
const NETWORK_SIZE: usize = 10;
const MAX_ROUNDS: usize = 1000;

struct TestNode {
    vault: Vault,
    _chunk_store_root: TempDir,
}

struct TestNetwork {
    nodes: Vec<TestNode>,
    next_address: usize,
    client_name: XorName,
}

impl TestNetwork {
    async fn new(size: usize) -> Self {
        let mut network = TestNetwork {
            nodes: Vec::new(),
            next_address: 0,
            client_name: XorName::random(),
        };
        let seed = network.create_node();
        network.nodes.push(seed);
        for _ in 1..size {
            network.add_node(0).await;
        }
        network
    }

    fn create_node(&mut self) -> TestNode {
        let chunk_store_root = tempfile::tempdir().unwrap();
        let config = VaultConfig {
            chunk_store_root: chunk_store_root.path().to_path_buf(),
            max_capacity: 64 * 1024 * 1024,
            group_size: GROUP_SIZE,
            ..VaultConfig::default()
        };
        self.next_address += 1;
        let info = PeerInfo {
            name: XorName::random(),
            address: format!("sim-{}:5100", self.next_address),
        };
        TestNode {
            vault: Vault::new(config, info).unwrap(),
            _chunk_store_root: chunk_store_root,
        }
    }

    /// Adds a vault that joins through the vault at `contact_index`.
    async fn add_node(&mut self, contact_index: usize) {
        let mut node = self.create_node();
        let contact = self.nodes[contact_index].vault.our_info().clone();
        node.vault.bootstrap(contact).await;
        self.nodes.push(node);
        let _ = self.poll().await;
    }

    /// Removes a vault as if its connections dropped.
    async fn drop_node(&mut self, index: usize) {
        let node = self.nodes.remove(index);
        let name = node.vault.name();
        for other in &mut self.nodes {
            other.vault.peer_lost(&name);
        }
        let _ = self.poll().await;
    }

    /// Delivers messages until every vault is idle. Returns the number of delivered messages.
    async fn poll(&mut self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_ROUNDS {
            let mut queue: VecDeque<(PeerInfo, safe_vault::Envelope)> = VecDeque::new();
            for node in &mut self.nodes {
                let sender = node.vault.our_info().clone();
                for envelope in node.vault.pump().await {
                    queue.push_back((sender.clone(), envelope));
                }
            }
            if queue.is_empty() {
                return delivered;
            }

            let index_of: HashMap<XorName, usize> = self
                .nodes
                .iter()
                .enumerate()
                .map(|(index, node)| (node.vault.name(), index))
                .collect();
            while let Some((sender, envelope)) = queue.pop_front() {
                // Messages to dropped vaults are lost.
                let Some(&index) = index_of.get(&envelope.target) else {
                    continue;
                };
                delivered += 1;
                let _ = self.nodes[index]
                    .vault
                    .handle_wire_message(sender, envelope.message)
                    .await;
            }
        }
        panic!("network did not settle within {} rounds", MAX_ROUNDS);
    }

    /// Sends `request` through the vault at `proxy_index` and waits for the reply.
    async fn request(&mut self, proxy_index: usize, request: Request) -> Response {
        let message_id = tokio_test::assert_ok!(self.nodes[proxy_index]
            .vault
            .handle_client_request(ClientRequest {
                client_name: Some(self.client_name),
                request,
            }));
        let _ = self.poll().await;
        self.nodes[proxy_index]
            .vault
            .take_client_replies()
            .into_iter()
            .find(|reply| reply.message_id == message_id)
            .map(|reply| reply.response)
            .expect("no reply for client request")
    }

    fn names(&self) -> Vec<XorName> {
        self.nodes.iter().map(|node| node.vault.name()).collect()
    }

    fn close_group(&self, name: &XorName) -> Vec<XorName> {
        let mut names = self.names();
        names.sort_by(|lhs, rhs| name.cmp_distance(lhs, rhs));
        names.truncate(GROUP_SIZE);
        names
    }

    /// Index of a vault outside the close group of `name`, skipping the first `skip` of them.
    fn proxy_outside_group(&self, name: &XorName, skip: usize) -> usize {
        let group = self.close_group(name);
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !group.contains(&node.vault.name()))
            .map(|(index, _)| index)
            .nth(skip)
            .unwrap()
    }

    /// Every item is held by exactly the vaults of its close group, at the expected version.
    fn check_data(&self, all_data: &[Data]) {
        for data in all_data {
            let group = self.close_group(&data.name());
            for node in &self.nodes {
                let holds = node
                    .vault
                    .stored_names()
                    .contains(&data.id_and_version());
                let in_group = group.contains(&node.vault.name());
                assert_eq!(
                    holds,
                    in_group,
                    "{:?} on vault {:?}: held {}, in close group {}",
                    data.identifier(),
                    node.vault.name(),
                    holds,
                    in_group
                );
            }
        }
    }

    fn verify_full_mesh(&self) {
        for node in &self.nodes {
            assert_eq!(node.vault.peers().len(), self.nodes.len() - 1);
        }
    }
}

fn random_immutable() -> Data {
    let content: Vec<u8> = XorName::random().0.to_vec();
    Data::Immutable(ImmutableData::new(Bytes::from(content)))
}

fn structured(owner: XorName, name: XorName, version: u64, content: &str) -> StructuredData {
    StructuredData::new(
        10_001,
        name,
        version,
        Bytes::from(content.to_string()),
        [owner].into_iter().collect(),
        Some(owner),
    )
}

#[tokio::test]
async fn test_network_forms_full_mesh() {
    let network = TestNetwork::new(NETWORK_SIZE).await;
    network.verify_full_mesh();
}

#[tokio::test]
async fn test_immutable_put_get() {
    let mut network = TestNetwork::new(NETWORK_SIZE).await;
    let data = random_immutable();

    let response = network.request(3, Request::Put(data.clone())).await;
    assert_eq!(response, Response::PutSuccess(data.identifier()));
    network.check_data(std::slice::from_ref(&data));

    let response = network.request(7, Request::Get(data.identifier())).await;
    assert_eq!(response, Response::GetSuccess(data.clone()));

    // Putting the same chunk again is not an error.
    let response = network.request(5, Request::Put(data.clone())).await;
    assert_eq!(response, Response::PutSuccess(data.identifier()));

    let missing = random_immutable();
    let response = network.request(1, Request::Get(missing.identifier())).await;
    assert_eq!(
        response,
        Response::GetFailure {
            data_id: missing.identifier(),
            error: GetError::NoSuchData,
        }
    );
}

#[tokio::test]
async fn test_immutable_data_survives_churn() {
    let mut network = TestNetwork::new(NETWORK_SIZE).await;
    let mut all_data = Vec::new();

    for iteration in 0..6 {
        for i in 0..3 {
            let data = random_immutable();
            let proxy = (iteration + i) % network.nodes.len();
            let response = network.request(proxy, Request::Put(data.clone())).await;
            assert_eq!(response, Response::PutSuccess(data.identifier()));
            all_data.push(data);
        }

        if iteration % 2 == 0 {
            let contact = 1 + iteration % (network.nodes.len() - 1);
            network.add_node(contact).await;
        } else {
            let index = 1 + (iteration * 3) % (network.nodes.len() - 1);
            network.drop_node(index).await;
        }

        network.verify_full_mesh();
        network.check_data(&all_data);
    }

    for data in &all_data {
        let response = network.request(0, Request::Get(data.identifier())).await;
        assert_eq!(response, Response::GetSuccess(data.clone()));
    }
}

#[tokio::test]
async fn test_structured_data_post_and_delete() {
    let mut network = TestNetwork::new(NETWORK_SIZE).await;
    let owner = network.client_name;
    let name = XorName::random();

    let v0 = Data::Structured(structured(owner, name, 0, "v0"));
    let data_id = v0.identifier();
    assert_eq!(
        network.request(2, Request::Put(v0.clone())).await,
        Response::PutSuccess(data_id)
    );
    assert_eq!(
        network.request(4, Request::Put(v0.clone())).await,
        Response::PutFailure {
            data_id,
            error: MutationError::DataExists,
        }
    );

    let v1 = Data::Structured(structured(owner, name, 1, "v1"));
    assert_eq!(
        network.request(2, Request::Post(v1.clone())).await,
        Response::PostSuccess(data_id)
    );
    network.check_data(std::slice::from_ref(&v1));
    assert_eq!(
        network.request(6, Request::Get(data_id)).await,
        Response::GetSuccess(v1.clone())
    );

    // Wrong version and foreign signer are both rejected.
    let skipped = Data::Structured(structured(owner, name, 5, "v5"));
    assert_eq!(
        network.request(3, Request::Post(skipped)).await,
        Response::PostFailure {
            data_id,
            error: MutationError::InvalidSuccessor,
        }
    );
    let mut forged = structured(owner, name, 2, "forged");
    forged.signed_by = Some(XorName::random());
    assert_eq!(
        network.request(3, Request::Post(Data::Structured(forged))).await,
        Response::PostFailure {
            data_id,
            error: MutationError::InvalidSuccessor,
        }
    );

    let delete = Data::Structured(structured(owner, name, 2, ""));
    assert_eq!(
        network.request(5, Request::Delete(delete)).await,
        Response::DeleteSuccess(data_id)
    );
    let mut tombstone = structured(owner, name, 2, "");
    tombstone.deleted = true;
    let tombstone = Data::Structured(tombstone);
    network.check_data(std::slice::from_ref(&tombstone));

    let after_delete = Data::Structured(structured(owner, name, 3, "v3"));
    assert_eq!(
        network.request(5, Request::Post(after_delete)).await,
        Response::PostFailure {
            data_id,
            error: MutationError::InvalidOperation,
        }
    );

    // A tombstone can be replaced by a put of its successor.
    let reborn = Data::Structured(structured(owner, name, 3, "reborn"));
    assert_eq!(
        network.request(1, Request::Put(reborn.clone())).await,
        Response::PutSuccess(data_id)
    );
    network.check_data(std::slice::from_ref(&reborn));
}

#[tokio::test]
async fn test_structured_data_survives_churn() {
    let mut network = TestNetwork::new(NETWORK_SIZE).await;
    let owner = network.client_name;
    let mut all_data = Vec::new();

    for i in 0..4 {
        let data = Data::Structured(structured(owner, XorName::random(), 0, "v0"));
        assert!(network.request(i, Request::Put(data.clone())).await.is_success());
        all_data.push(data);
    }

    for iteration in 0..4 {
        if iteration % 2 == 0 {
            network.add_node(iteration + 1).await;
        } else {
            network.drop_node(iteration + 2).await;
        }
        network.check_data(&all_data);

        // Bump one item to a new version after each churn event.
        let index = iteration % all_data.len();
        let (name, version) = match &all_data[index] {
            Data::Structured(sd) => (sd.name, sd.version + 1),
            _ => unreachable!(),
        };
        let next = Data::Structured(structured(owner, name, version, &format!("v{}", version)));
        assert!(network.request(0, Request::Post(next.clone())).await.is_success());
        all_data[index] = next;
        network.check_data(&all_data);
    }
}

#[tokio::test]
async fn test_concurrent_posts_have_one_winner() {
    let mut network = TestNetwork::new(NETWORK_SIZE).await;
    let owner = network.client_name;
    let name = XorName::random();
    let v0 = Data::Structured(structured(owner, name, 0, "v0"));
    assert!(network.request(0, Request::Put(v0.clone())).await.is_success());

    let group_name = v0.name();
    let mut submitted = Vec::new();
    for client in 0..3 {
        let proxy = network.proxy_outside_group(&group_name, client);
        let candidate = Data::Structured(structured(owner, name, 1, &format!("client {}", client)));
        let message_id = network.nodes[proxy]
            .vault
            .handle_client_request(ClientRequest {
                client_name: Some(owner),
                request: Request::Post(candidate.clone()),
            })
            .unwrap();
        submitted.push((proxy, message_id, candidate));
    }
    let _ = network.poll().await;

    let mut winners = Vec::new();
    for (proxy, message_id, candidate) in submitted {
        let response = network.nodes[proxy]
            .vault
            .take_client_replies()
            .into_iter()
            .find(|reply| reply.message_id == message_id)
            .map(|reply| reply.response)
            .unwrap();
        if response.is_success() {
            winners.push(candidate);
        } else {
            assert!(matches!(response, Response::PostFailure { .. }));
        }
    }

    assert_eq!(winners.len(), 1);
    network.check_data(&winners);
}

#[tokio::test]
async fn test_appendable_data_flow() {
    let mut network = TestNetwork::new(NETWORK_SIZE).await;
    let owner = network.client_name;
    let name = XorName::random();
    let blocked = XorName::random();

    let owners: BTreeSet<XorName> = [owner].into_iter().collect();
    let filter = Filter::BlackList([blocked].into_iter().collect());
    let ad = Data::Appendable(AppendableData::new(name, 0, owners, filter));
    let data_id = ad.identifier();
    assert_eq!(
        network.request(0, Request::Put(ad)).await,
        Response::PutSuccess(data_id)
    );

    let append = |appender: XorName| AppendWrapper {
        name,
        version: 0,
        item: AppendedItem {
            appender,
            payload: Bytes::from_static(b"hello"),
        },
    };
    let appender = XorName::random();
    assert_eq!(
        network.request(1, Request::Append(append(appender))).await,
        Response::AppendSuccess(data_id)
    );
    assert_eq!(
        network.request(2, Request::Append(append(blocked))).await,
        Response::AppendFailure {
            data_id,
            error: MutationError::InvalidSuccessor,
        }
    );

    match network.request(3, Request::Get(data_id)).await {
        Response::GetSuccess(Data::Appendable(stored)) => {
            assert_eq!(stored.items.len(), 1);
            assert!(stored.items.iter().all(|item| item.appender == appender));
        }
        other => panic!("unexpected response {:?}", other),
    }

    let missing = DataIdentifier::Appendable(XorName::random());
    assert!(matches!(
        network
            .request(
                4,
                Request::Append(AppendWrapper {
                    name: missing.name(),
                    version: 0,
                    item: AppendedItem {
                        appender,
                        payload: Bytes::new(),
                    },
                })
            )
            .await,
        Response::AppendFailure {
            error: MutationError::NoSuchData,
            ..
        }
    ));
}
