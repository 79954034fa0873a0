//! Guard and bookkeeping for one request/response round-trip.
//!
//! The store records exchanges in any session state. Refusing new requests
//! against a closed session happens here, before anything is sent to the
//! backend.

use chrono::{DateTime, Utc};
use parley_types::chat::{ChatExchange, SessionId, SessionState};
use parley_types::error::StoreError;
use parley_types::params::ChatSessionParameters;
use thiserror::Error;
use tracing::{debug, warn};

use crate::chat::prompt::PromptBuilder;
use crate::chat::ChatSessionHandle;
use crate::repository::Repositories;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("chat session {0} is closed")]
    SessionClosed(SessionId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything the network client needs to send one request.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub session_id: SessionId,
    pub settings: ChatSessionParameters,
    pub request: String,
    pub prompt: String,
    pub requested_at: DateTime<Utc>,
}

/// Re-read the session and, if it is still open, snapshot its settings and
/// build the prompt from its history.
pub async fn prepare_request<R, P>(
    session: &mut ChatSessionHandle<R>,
    builder: &P,
    request: &str,
) -> Result<PreparedRequest, DispatchError>
where
    R: Repositories,
    P: PromptBuilder + ?Sized,
{
    session.refresh().await?;
    if session.session_state() != SessionState::Open {
        warn!(session_id = %session.session_id(), "Refusing request for closed chat session");
        return Err(DispatchError::SessionClosed(session.session_id().clone()));
    }

    let history = session.exchanges().await?;
    let prompt = builder.build(&history, request);
    debug!(
        session_id = %session.session_id(),
        history = history.len(),
        prompt_len = prompt.len(),
        "Prepared request"
    );

    Ok(PreparedRequest {
        session_id: session.session_id().clone(),
        settings: session.settings().clone(),
        request: request.to_string(),
        prompt,
        requested_at: Utc::now(),
    })
}

/// Record the completed round-trip as exactly one exchange.
pub async fn complete_request<R: Repositories>(
    session: &ChatSessionHandle<R>,
    prepared: PreparedRequest,
    response: String,
) -> Result<ChatExchange, DispatchError> {
    let exchange = ChatExchange {
        request_timestamp: prepared.requested_at,
        request: prepared.request,
        response_timestamp: Utc::now(),
        response,
    };
    session.record_one_exchange(&exchange).await?;
    Ok(exchange)
}
