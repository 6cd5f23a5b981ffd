//! SOCKS5 Handshake Session
//!
//! Drives one hop's handshake over a stream that is already open. The session
//! borrows the stream and never closes it; whoever opened the transport decides
//! what happens to it after a failure.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::codec::{self, Decoded};
use super::{AddressSpec, AuthMethod, ConnectReply, ConnectionType, Credentials};
use crate::error::{Error, Result};

/// Where a session is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    GreetingSent,
    MethodChosen(AuthMethod),
    Authenticating,
    Authenticated,
    ConnectSent,
    Established,
    Failed,
}

/// Client-side handshake with a single proxy.
pub struct HandshakeSession<'a, S> {
    stream: &'a mut S,
    state: SessionState,
    offered: Vec<AuthMethod>,
}

impl<'a, S> HandshakeSession<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: &'a mut S) -> Self {
        Self {
            stream,
            state: SessionState::Idle,
            offered: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Send the greeting and read the proxy's method choice.
    pub async fn negotiate(&mut self, offered: &[AuthMethod]) -> Result<AuthMethod> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState("negotiate called twice"));
        }
        let result = self.negotiate_inner(offered).await;
        self.track(result)
    }

    async fn negotiate_inner(&mut self, offered: &[AuthMethod]) -> Result<AuthMethod> {
        let greeting = codec::encode_greeting(offered)?;
        self.offered = offered.to_vec();
        self.send(&greeting).await?;
        self.state = SessionState::GreetingSent;

        let method = self
            .receive(codec::decode_method_selection, "method selection")
            .await?;
        if !self.offered.contains(&method) {
            return Err(Error::protocol(format!(
                "proxy selected {:?}, which was not offered",
                method
            )));
        }

        debug!(?method, "Proxy selected authentication method");
        self.state = SessionState::MethodChosen(method);
        Ok(method)
    }

    /// Run RFC 1929 username/password sub-negotiation.
    pub async fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        if self.state != SessionState::MethodChosen(AuthMethod::UsernamePassword) {
            return Err(Error::InvalidState(
                "authenticate requires negotiated username/password method",
            ));
        }
        let result = self.authenticate_inner(credentials).await;
        self.track(result)
    }

    async fn authenticate_inner(&mut self, credentials: &Credentials) -> Result<()> {
        let request = codec::encode_userpass(&credentials.username, &credentials.password)?;
        self.send(&request).await?;
        self.state = SessionState::Authenticating;

        let accepted = self
            .receive(codec::decode_userpass_reply, "auth reply")
            .await?;
        if !accepted {
            return Err(Error::Auth);
        }

        debug!(username = %credentials.username, "Authenticated with proxy");
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// Ask the proxy to CONNECT to `target:port`. On success the stream now
    /// carries bytes to and from the target.
    pub async fn request_connect(&mut self, target: &AddressSpec, port: u16) -> Result<ConnectReply> {
        match self.state {
            SessionState::MethodChosen(AuthMethod::NoAuth) | SessionState::Authenticated => {}
            SessionState::MethodChosen(AuthMethod::UsernamePassword) => {
                return Err(Error::InvalidState(
                    "request_connect before required authentication",
                ))
            }
            _ => return Err(Error::InvalidState("request_connect before negotiate")),
        }
        let result = self.request_connect_inner(target, port).await;
        self.track(result)
    }

    async fn request_connect_inner(&mut self, target: &AddressSpec, port: u16) -> Result<ConnectReply> {
        let request = codec::encode_connect_request(ConnectionType::Connect, target, port)?;
        self.send(&request).await?;
        self.state = SessionState::ConnectSent;

        let reply = self
            .receive(codec::decode_connect_reply, "connect reply")
            .await?;
        if !reply.code.is_success() {
            return Err(Error::ConnectReply(reply.code));
        }

        debug!(
            dest = %target,
            port,
            bound = %reply.bound_address,
            bound_port = reply.bound_port,
            "Proxy accepted connect request"
        );
        self.state = SessionState::Established;
        Ok(reply)
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.state = SessionState::Failed;
        }
        result
    }

    /// One message, one write.
    async fn send(&mut self, message: &[u8]) -> Result<()> {
        self.stream.write_all(message).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read exactly as many bytes as the decoder asks for, never more, so no
    /// tunneled payload is swallowed after the final reply.
    async fn receive<T>(
        &mut self,
        decode: fn(&[u8]) -> Result<Decoded<T>>,
        what: &str,
    ) -> Result<T> {
        let mut buf = Vec::with_capacity(16);
        loop {
            match decode(&buf)? {
                Decoded::Complete { value, .. } => return Ok(value),
                Decoded::Incomplete { needed } => {
                    let have = buf.len();
                    buf.resize(needed, 0);
                    self.stream
                        .read_exact(&mut buf[have..])
                        .await
                        .map_err(|e| match e.kind() {
                            std::io::ErrorKind::UnexpectedEof => Error::protocol(format!(
                                "proxy closed connection during {} ({} of {} bytes)",
                                what, have, needed
                            )),
                            _ => Error::Io(e),
                        })?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ReplyCode;
    use std::net::Ipv4Addr;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_no_auth_handshake() {
        let (mut client, mut proxy) = duplex(256);

        let server = tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x01, 0x00]);
            proxy.write_all(&[0x05, 0x00]).await.unwrap();

            let mut request = [0u8; 10];
            proxy.read_exact(&mut request).await.unwrap();
            assert_eq!(request, [0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50]);
            proxy
                .write_all(&[0x05, 0x00, 0x00, 0x01, 10, 0, 0, 9, 0x30, 0x39])
                .await
                .unwrap();
            proxy
        });

        let mut session = HandshakeSession::new(&mut client);
        assert_eq!(session.negotiate(&[AuthMethod::NoAuth]).await.unwrap(), AuthMethod::NoAuth);
        let reply = session
            .request_connect(&AddressSpec::Ipv4(Ipv4Addr::LOCALHOST), 80)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Established);
        assert_eq!(reply.bound_address, AddressSpec::Ipv4(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(reply.bound_port, 12345);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_rejected() {
        let (mut client, mut proxy) = duplex(256);

        tokio::spawn(async move {
            let mut greeting = [0u8; 4];
            proxy.read_exact(&mut greeting).await.unwrap();
            proxy.write_all(&[0x05, 0x02]).await.unwrap();
            let mut auth = [0u8; 11];
            proxy.read_exact(&mut auth).await.unwrap();
            proxy.write_all(&[0x01, 0x01]).await.unwrap();
        });

        let mut session = HandshakeSession::new(&mut client);
        let method = session
            .negotiate(&[AuthMethod::NoAuth, AuthMethod::UsernamePassword])
            .await
            .unwrap();
        assert_eq!(method, AuthMethod::UsernamePassword);

        let err = session
            .authenticate(&Credentials::new("user", "pass"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_method_not_offered_is_protocol_error() {
        let (mut client, mut proxy) = duplex(64);

        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).await.unwrap();
            proxy.write_all(&[0x05, 0x02]).await.unwrap();
        });

        let mut session = HandshakeSession::new(&mut client);
        let err = session.negotiate(&[AuthMethod::NoAuth]).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_failure_reply_code() {
        let (mut client, mut proxy) = duplex(64);

        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).await.unwrap();
            proxy.write_all(&[0x05, 0x00]).await.unwrap();
            let mut request = [0u8; 10];
            proxy.read_exact(&mut request).await.unwrap();
            proxy
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let mut session = HandshakeSession::new(&mut client);
        session.negotiate(&[AuthMethod::NoAuth]).await.unwrap();
        let err = session
            .request_connect(&AddressSpec::Ipv4(Ipv4Addr::LOCALHOST), 22)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectReply(ReplyCode::ConnectionRefused)));
    }

    #[tokio::test]
    async fn test_truncated_reply_is_protocol_error() {
        let (mut client, mut proxy) = duplex(64);

        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).await.unwrap();
            proxy.write_all(&[0x05]).await.unwrap();
        });

        let mut session = HandshakeSession::new(&mut client);
        let err = session.negotiate(&[AuthMethod::NoAuth]).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_domain_request_leaves_payload_unread() {
        let mut request = vec![0x05, 0x01, 0x00, 0x03, 11];
        request.extend_from_slice(b"example.com");
        request.extend_from_slice(&[0x01, 0xBB]);

        let mut stream = tokio_test::io::Builder::new()
            .write(&[0x05, 0x01, 0x00])
            .read(&[0x05, 0x00])
            .write(&request)
            .read(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .read(b"payload")
            .build();

        let mut session = HandshakeSession::new(&mut stream);
        session.negotiate(&[AuthMethod::NoAuth]).await.unwrap();
        session
            .request_connect(&AddressSpec::Domain("example.com".into()), 443)
            .await
            .unwrap();

        let mut rest = [0u8; 7];
        stream.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"payload");
    }

    #[tokio::test]
    async fn test_out_of_order_calls() {
        let (mut client, _proxy) = duplex(64);
        let mut session = HandshakeSession::new(&mut client);

        let err = session
            .request_connect(&AddressSpec::Ipv4(Ipv4Addr::LOCALHOST), 80)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let err = session
            .authenticate(&Credentials::new("a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(session.state(), SessionState::Idle);
    }
}
