use snafu::Snafu;

use crate::store::{ChangeIndex, Snapshot};

/// etcd error code returned when the requested watch index has already been
/// compacted away.
pub const EVENT_INDEX_CLEARED: u64 = 401;

/// etcd error codes signalling transient raft trouble (leader election,
/// internal timeouts). Retrying these is safe.
const RAFT_TRANSIENT_CODES: [u64; 2] = [300, 301];

/// Read side of a hierarchical key-value store.
///
/// All calls block the calling thread; the watch loop runs them on a
/// dedicated worker.
pub trait KeysApi {
    /// Verifies connectivity and returns the client URLs of the cluster members.
    fn sync(&self) -> Result<Vec<String>, StoreError>;

    /// Reads the whole subtree rooted at `prefix`.
    fn get_recursive(&self, prefix: &str) -> Result<Snapshot, StoreError>;

    /// Blocks until something below `prefix` changes after `after` and returns
    /// the index of that change.
    fn wait_for_change(
        &self,
        prefix: &str,
        after: ChangeIndex,
    ) -> Result<ChangeIndex, StoreError>;
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("Failed to build the HTTP client"))]
    ClientBuildError { source: reqwest::Error },
    #[snafu(display("Invalid store endpoint '{}': {}", endpoint, reason))]
    InvalidEndpoint { endpoint: String, reason: String },
    #[snafu(display("Request to {} failed", url))]
    TransportError { url: String, source: reqwest::Error },
    #[snafu(display(
        "Store rejected the request ({}): [{}] {} {}",
        status,
        error_code,
        message,
        cause
    ))]
    ApiError {
        status: u16,
        error_code: u64,
        message: String,
        cause: String,
    },
    #[snafu(display("Unexpected status {} from {}: {}", status, url, body))]
    UnexpectedStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[snafu(display("Failed to decode the response from {}", url))]
    DecodeError {
        url: String,
        source: serde_json::Error,
    },
    #[snafu(display("Response from {} carries no usable change index", url))]
    MissingIndex { url: String },
    #[snafu(display("Failed to hand the request to the store worker: {}", reason))]
    DispatchError { reason: String },
    #[snafu(display("Store worker dropped the request"))]
    WorkerCanceled {
        source: futures_channel::oneshot::Canceled,
    },
}

impl StoreError {
    /// Whether the failure may go away on its own (network trouble, overloaded
    /// or electing cluster). Anything else points at configuration or data.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::TransportError { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            StoreError::ApiError {
                status, error_code, ..
            } => *status >= 500 || RAFT_TRANSIENT_CODES.contains(error_code),
            StoreError::UnexpectedStatus { status, .. } => *status >= 500,
            StoreError::ClientBuildError { .. }
            | StoreError::InvalidEndpoint { .. }
            | StoreError::DecodeError { .. }
            | StoreError::MissingIndex { .. }
            | StoreError::DispatchError { .. }
            | StoreError::WorkerCanceled { .. } => false,
        }
    }

    /// The watch index fell out of the store's event history.
    pub fn is_index_cleared(&self) -> bool {
        matches!(
            self,
            StoreError::ApiError {
                error_code: EVENT_INDEX_CLEARED,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn api_error(status: u16, error_code: u64) -> StoreError {
        StoreError::ApiError {
            status,
            error_code,
            message: "message".into(),
            cause: "/conf".into(),
        }
    }

    #[rstest]
    #[case(404, 100, false)]
    #[case(400, 401, false)]
    #[case(500, 300, true)]
    #[case(400, 301, true)]
    #[case(503, 0, true)]
    fn api_errors_are_classified(#[case] status: u16, #[case] code: u64, #[case] transient: bool) {
        assert_eq!(api_error(status, code).is_transient(), transient);
    }

    #[test]
    fn unexpected_status_is_transient_only_for_server_errors() {
        let server = StoreError::UnexpectedStatus {
            status: 502,
            url: "http://127.0.0.1:2379/v2/keys/conf".into(),
            body: String::new(),
        };
        let client = StoreError::UnexpectedStatus {
            status: 403,
            url: "http://127.0.0.1:2379/v2/keys/conf".into(),
            body: String::new(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
    }

    #[test]
    fn index_cleared_is_detected() {
        assert!(api_error(400, EVENT_INDEX_CLEARED).is_index_cleared());
        assert!(!api_error(404, 100).is_index_cleared());
        assert!(
            !StoreError::MissingIndex {
                url: "x".into()
            }
            .is_index_cleared()
        );
    }

    #[test]
    fn api_error_display_mentions_code_and_cause() {
        let message = api_error(404, 100).to_string();
        assert!(message.contains("404"));
        assert!(message.contains("[100]"));
        assert!(message.contains("/conf"));
    }
}
