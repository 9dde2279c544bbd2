//! Gateway Errors

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The gateway answered but refused the request
    #[error("Gateway rejected request ({code}): {description}")]
    Rejected { code: String, description: String },

    #[error("Invalid response from gateway: {0}")]
    InvalidResponse(String),

    /// The access token could not be obtained; the payment request was never sent
    #[error("Could not obtain gateway access token: {0}")]
    Token(Box<GatewayError>),
}

impl GatewayError {
    /// Check if a retry of the same request could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Transport(e) => e.is_timeout() || e.is_connect(),
            GatewayError::Status { status, .. } => *status >= 500,
            GatewayError::Token(inner) => inner.is_transient(),
            _ => false,
        }
    }

    /// Check if the gateway may have acted on the request even though no
    /// acknowledgement came back. Only a refusal, a 4xx, a failed connect
    /// or a missing token prove that nothing happened.
    pub fn outcome_unknown(&self) -> bool {
        match self {
            GatewayError::Transport(e) => !(e.is_connect() || e.is_builder()),
            GatewayError::Status { status, .. } => *status >= 500,
            GatewayError::InvalidResponse(_) => true,
            GatewayError::Rejected { .. } | GatewayError::Token(_) => false,
        }
    }
}
