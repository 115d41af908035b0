use crate::config::RuntimeConfig;
use crate::transport::{HttpTransport, PeerTransport};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use safe_vault::{
    ClientReply, ClientRequest, Data, DataIdentifier, Envelope, GetError, ImmutableData,
    MessageId, MutationError, PeerInfo, Request, Result, Vault, VaultError, XorName,
    decode_client_request, decode_wire, encode_client_reply, encode_wire,
};

/// Extra time a client handler waits beyond the vault's own request timeout.
const REPLY_GRACE: Duration = Duration::from_secs(5);

pub struct ServerState {
    pub vault: Mutex<Vault>,
    pub transport: Arc<dyn PeerTransport>,
    pub pending_replies: Mutex<HashMap<MessageId, oneshot::Sender<ClientReply>>>,
    pub config: RuntimeConfig,
}

impl ServerState {
    pub fn new(config: RuntimeConfig, transport: Arc<dyn PeerTransport>) -> Result<Arc<Self>> {
        let vault = Vault::new(config.vault.clone(), config.our_info.clone())?;
        Ok(Arc::new(Self {
            vault: Mutex::new(vault),
            transport,
            pending_replies: Mutex::new(HashMap::new()),
            config,
        }))
    }
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Errors returned by the HTTP handlers.
#[derive(Debug)]
enum ApiError {
    Vault(VaultError),
    Get(GetError),
    Mutation(MutationError),
    Timeout,
}

impl From<VaultError> for ApiError {
    fn from(error: VaultError) -> Self {
        ApiError::Vault(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Vault(error) => {
                let status = match &error {
                    VaultError::Codec(_) | VaultError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
                    VaultError::ChunkNotFound(_) => StatusCode::NOT_FOUND,
                    VaultError::NotEnoughSpace { .. } => StatusCode::INSUFFICIENT_STORAGE,
                    VaultError::Routing(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, error.to_string())
            }
            ApiError::Get(error) => {
                let status = match &error {
                    GetError::NoSuchData => StatusCode::NOT_FOUND,
                    GetError::NetworkOther(_) => StatusCode::BAD_GATEWAY,
                };
                (status, format!("{:?}", error))
            }
            ApiError::Mutation(error) => {
                let status = match &error {
                    MutationError::NoSuchData => StatusCode::NOT_FOUND,
                    MutationError::DataExists => StatusCode::CONFLICT,
                    MutationError::NetworkFull => StatusCode::INSUFFICIENT_STORAGE,
                    MutationError::DataTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                    MutationError::InvalidSuccessor | MutationError::InvalidOperation => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    MutationError::NetworkOther(_) => StatusCode::BAD_GATEWAY,
                };
                (status, format!("{:?}", error))
            }
            ApiError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "no reply from the network".to_string(),
            ),
        };

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

pub async fn run_server(config: RuntimeConfig) -> Result<()> {
    let transport = Arc::new(HttpTransport::new(config.vault.request_timeout)?);
    let state = ServerState::new(config, transport)?;

    let client_listener = tokio::net::TcpListener::bind(&state.config.client_bind_addr).await?;
    let peer_listener = tokio::net::TcpListener::bind(&state.config.peer_bind_addr).await?;
    tracing::info!(
        "Vault {} listening for clients on {} and peers on {}",
        state.config.our_info.name,
        state.config.client_bind_addr,
        state.config.peer_bind_addr
    );

    // Start background tasks
    let maintenance_state = state.clone();
    tokio::spawn(async move {
        maintenance_loop(maintenance_state).await;
    });
    let heartbeat_state = state.clone();
    tokio::spawn(async move {
        heartbeat_loop(heartbeat_state).await;
    });

    let bootstrap_state = state.clone();
    tokio::spawn(async move {
        bootstrap(&bootstrap_state).await;
    });

    let client_app = client_router(state.clone());
    let peer_app = peer_router(state.clone());
    tokio::select! {
        result = axum::serve(client_listener, client_app).into_future() => result?,
        result = axum::serve(peer_listener, peer_app).into_future() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down vault {}", state.config.our_info.name);
        }
    }

    leave(&state).await;
    Ok(())
}

pub fn client_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/requests", post(client_request_handler))
        .route("/v1/immutable", put(put_immutable))
        .route("/v1/immutable/:name", get(get_immutable))
        .route("/v1/peers", get(list_peers))
        .route("/v1/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn peer_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/v1/message", post(peer_message_handler))
        .route("/v1/identity", get(identity_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Joins the network through the configured contacts.
async fn bootstrap(state: &Arc<ServerState>) {
    if state.config.contacts.is_empty() {
        tracing::info!("No contacts configured, starting as the first vault of a new network");
        return;
    }

    for address in &state.config.contacts {
        match state.transport.identity(address).await {
            Ok(mut contact) => {
                // The contact may advertise an unroutable address; use the one that worked.
                contact.address = address.clone();
                tracing::info!("Bootstrapping through {} at {}", contact.name, address);
                state.vault.lock().await.bootstrap(contact).await;
                let _ = flush(state).await;
            }
            Err(error) => {
                tracing::warn!("Failed to contact {}: {}", address, error);
            }
        }
    }
}

async fn maintenance_loop(state: Arc<ServerState>) {
    let mut interval = tokio::time::interval(state.config.maintenance_interval);

    loop {
        interval.tick().await;
        {
            let mut vault = state.vault.lock().await;
            vault.check_timeouts();
            let expired = vault.expire_peers();
            if !expired.is_empty() {
                tracing::info!("Dropped {} unresponsive peers", expired.len());
            }
        }
        let _ = flush(&state).await;
    }
}

async fn heartbeat_loop(state: Arc<ServerState>) {
    let mut interval = tokio::time::interval(state.config.heartbeat_interval);

    loop {
        interval.tick().await;
        state.vault.lock().await.heartbeat();
        let _ = flush(&state).await;
    }
}

async fn leave(state: &Arc<ServerState>) {
    state.vault.lock().await.leave();
    for handle in flush(state).await {
        let _ = handle.await;
    }
}

/// Runs local deliveries, completes waiting client handlers and sends the remaining envelopes.
/// Returns the handles of the spawned sends.
async fn flush(state: &Arc<ServerState>) -> Vec<JoinHandle<()>> {
    let (our_info, envelopes, replies) = {
        let mut vault = state.vault.lock().await;
        let envelopes: Vec<(Option<String>, Envelope)> = vault
            .pump()
            .await
            .into_iter()
            .map(|envelope| (vault.peer_address(&envelope.target), envelope))
            .collect();
        (vault.our_info().clone(), envelopes, vault.take_client_replies())
    };

    if !replies.is_empty() {
        let mut pending = state.pending_replies.lock().await;
        for reply in replies {
            match pending.remove(&reply.message_id) {
                Some(sender) => {
                    let _ = sender.send(reply);
                }
                None => tracing::debug!("No client waiting for reply {}", reply.message_id),
            }
        }
    }

    let mut handles = Vec::with_capacity(envelopes.len());
    for (address, envelope) in envelopes {
        let Some(address) = address else {
            tracing::debug!("Dropping message for unknown peer {}", envelope.target);
            continue;
        };
        let body = match encode_wire(&our_info, &envelope.message) {
            Ok(body) => body,
            Err(error) => {
                tracing::warn!("Failed to encode message for {}: {}", envelope.target, error);
                continue;
            }
        };
        let transport = state.transport.clone();
        handles.push(tokio::spawn(async move {
            if let Err(error) = transport.send(&address, body).await {
                tracing::warn!("Failed to deliver message to {}: {}", address, error);
            }
        }));
    }
    handles
}

/// Hands `request` to the vault's proxy and waits for the close group's answer.
async fn submit(state: &Arc<ServerState>, request: ClientRequest) -> std::result::Result<ClientReply, ApiError> {
    let (sender, receiver) = oneshot::channel();
    let message_id = {
        let mut vault = state.vault.lock().await;
        let message_id = vault.handle_client_request(request)?;
        let _ = state.pending_replies.lock().await.insert(message_id, sender);
        message_id
    };
    let _ = flush(state).await;

    let wait = state.config.vault.request_timeout + REPLY_GRACE;
    match tokio::time::timeout(wait, receiver).await {
        Ok(Ok(reply)) => Ok(reply),
        _ => {
            let _ = state.pending_replies.lock().await.remove(&message_id);
            Err(ApiError::Timeout)
        }
    }
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let vault = state.vault.lock().await;
    let response = serde_json::json!({
        "name": vault.name(),
        "status": "ok",
        "peer_count": vault.peers().len(),
    });

    (StatusCode::OK, Json(response))
}

async fn client_request_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let request = decode_client_request(&body)?;
    let reply = submit(&state, request).await?;
    let body = encode_client_reply(&reply)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

#[derive(Debug, Serialize)]
struct StoredChunk {
    name: String,
    size: usize,
}

async fn put_immutable(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let size = body.len();
    let data = ImmutableData::new(body);
    let name = data.name();
    let request = ClientRequest {
        client_name: None,
        request: Request::Put(Data::Immutable(data)),
    };

    match submit(&state, request).await?.response {
        safe_vault::Response::PutSuccess(_) => Ok((
            StatusCode::CREATED,
            ApiResponse::ok(StoredChunk {
                name: name.to_hex(),
                size,
            }),
        )),
        safe_vault::Response::PutFailure { error, .. } => Err(ApiError::Mutation(error)),
        other => Err(ApiError::Vault(VaultError::Internal(format!(
            "unexpected reply {:?}",
            other
        )))),
    }
}

async fn get_immutable(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let name = XorName::from_hex(&name)?;
    let request = ClientRequest {
        client_name: None,
        request: Request::Get(DataIdentifier::Immutable(name)),
    };

    match submit(&state, request).await?.response {
        safe_vault::Response::GetSuccess(Data::Immutable(data)) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data.value().clone(),
        )
            .into_response()),
        safe_vault::Response::GetFailure { error, .. } => Err(ApiError::Get(error)),
        other => Err(ApiError::Vault(VaultError::Internal(format!(
            "unexpected reply {:?}",
            other
        )))),
    }
}

async fn list_peers(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let peers = state.vault.lock().await.peers();
    ApiResponse::ok(peers)
}

async fn stats_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let stats = state.vault.lock().await.stats();
    ApiResponse::ok(stats)
}

async fn peer_message_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> std::result::Result<StatusCode, ApiError> {
    let wire = decode_wire(&body)?;
    let sender = wire.sender.name;
    let result = state
        .vault
        .lock()
        .await
        .handle_wire_message(wire.sender, wire.message)
        .await;
    let _ = flush(&state).await;

    if let Err(error) = result {
        tracing::debug!("Rejected message from {}: {}", sender, error);
        return Err(error.into());
    }
    Ok(StatusCode::OK)
}

async fn identity_handler(State(state): State<Arc<ServerState>>) -> Json<PeerInfo> {
    Json(state.config.our_info.clone())
}
