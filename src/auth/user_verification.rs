//! gRPC client for the auth service's `UserVerification` service.
//!
//! Messages and the client stub are generated from
//! `proto/user_verification.proto` at build time.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::{debug, warn};

use super::UserVerifier;
use crate::error::Result;

pub mod proto {
    tonic::include_proto!("user_verification");
}

use proto::user_verification_client::UserVerificationClient;
pub use proto::{UserRequest, UserResponse};

/// User verification over a lazily connected gRPC channel.
///
/// Cheap to clone; clones share the underlying channel.
#[derive(Debug, Clone)]
pub struct GrpcUserVerifier {
    client: UserVerificationClient<Channel>,
    endpoint: String,
}

impl GrpcUserVerifier {
    /// Build a client for `uri` (e.g. `http://auth-service:50051`).
    ///
    /// No connection is made until the first call. Must be called inside a
    /// Tokio runtime.
    pub fn new(uri: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(uri.to_string())?
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .connect_lazy();

        debug!(endpoint = %uri, "Created user verification client");

        Ok(Self {
            client: UserVerificationClient::new(channel),
            endpoint: uri.to_string(),
        })
    }

    /// Unary `VerifyUser` call.
    pub async fn call_verify_user(&self, username: &str) -> std::result::Result<UserResponse, Status> {
        let mut client = self.client.clone();
        let response = client
            .verify_user(UserRequest {
                username: username.to_string(),
            })
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl UserVerifier for GrpcUserVerifier {
    async fn verify_user(&self, username: &str) -> bool {
        match self.call_verify_user(username).await {
            Ok(response) => response.exists,
            Err(status) => {
                warn!(
                    endpoint = %self.endpoint,
                    username = %username,
                    code = ?status.code(),
                    error = %status.message(),
                    "gRPC user verification failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::proto::user_verification_server::{UserVerification, UserVerificationServer};
    use super::*;
    use crate::error::RelayError;
    use prost::Message;
    use tokio::net::TcpListener;
    use tonic::{Request, Response};

    /// Knows exactly one user.
    struct KnownUsers;

    #[tonic::async_trait]
    impl UserVerification for KnownUsers {
        async fn verify_user(
            &self,
            request: Request<UserRequest>,
        ) -> std::result::Result<Response<UserResponse>, Status> {
            let username = request.into_inner().username;
            if username == "blocked" {
                return Err(Status::unavailable("lookup backend down"));
            }
            Ok(Response::new(UserResponse {
                exists: username == "alice",
            }))
        }
    }

    async fn serve_known_users() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let incoming = Box::pin(futures::stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await.map(|(stream, _)| stream);
            Some((accepted, listener))
        }));

        tokio::spawn(
            tonic::transport::Server::builder()
                .add_service(UserVerificationServer::new(KnownUsers))
                .serve_with_incoming(incoming),
        );
        format!("http://{}", addr)
    }

    #[test]
    fn test_request_wire_encoding() {
        let bytes = UserRequest {
            username: "bob".to_string(),
        }
        .encode_to_vec();
        assert_eq!(bytes, vec![0x0a, 3, b'b', b'o', b'b']);

        let response = UserResponse::decode(&[0x08, 0x01][..]).unwrap();
        assert!(response.exists);
    }

    #[tokio::test]
    async fn test_verify_user_against_live_service() {
        let verifier = GrpcUserVerifier::new(&serve_known_users().await).unwrap();

        assert!(verifier.verify_user("alice").await);
        assert!(!verifier.verify_user("mallory").await);
        assert!(!verifier.verify_user("blocked").await);
    }

    #[tokio::test]
    async fn test_unreachable_service_reports_missing_user() {
        let verifier = GrpcUserVerifier::new("http://127.0.0.1:1").unwrap();
        assert!(!verifier.verify_user("alice").await);
    }

    #[test]
    fn test_invalid_uri_is_rejected() {
        assert!(matches!(
            GrpcUserVerifier::new("not a uri"),
            Err(RelayError::GrpcTransport(_))
        ));
    }
}
