use thiserror::Error;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("billing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("billing service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid billing response: {0}")]
    InvalidResponse(String),
}
