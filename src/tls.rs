//! TLS bridge: a sans-io ciphertext/plaintext pump for stream
//! connections.
//!
//! The bridge owns a TLS session and exposes four data movements: peer
//! bytes in (`put_ciphertext`), decrypted bytes out (`get_plaintext`),
//! application bytes in (`put_plaintext`), and wire bytes out
//! (`take_ciphertext`). The connection descriptor overlays these on its
//! raw read/write paths; the bridge itself never touches a socket.
//!
//! Peer-certificate adjudication is deferred: the TLS layer accepts and
//! captures the end-entity certificate, and the descriptor asks user
//! code for a verdict before the handshake is signalled as complete.

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    ClientConfig, ClientConnection, Connection, DigitallySignedStruct, DistinguishedName,
    ServerConfig, ServerConnection, SignatureScheme,
};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Plaintext is fed through the bridge in pieces of this size, flushing
/// ciphertext between pieces so the raw queue fills incrementally.
pub const TLS_INPUT_CHUNK: usize = 2048;
/// Buffer size for pulling decrypted bytes out of the bridge.
pub const TLS_PLAIN_CHUNK: usize = 2048;

/// TLS settings, supplied before `start_tls`.
///
/// Key and chain accept a file path or inline PEM; both or neither must
/// be present. Servers require them, clients may supply them for client
/// authentication.
#[derive(Debug, Clone, Default)]
pub struct TlsParams {
    pub private_key_file: Option<PathBuf>,
    pub private_key_pem: Option<String>,
    pub cert_chain_file: Option<PathBuf>,
    pub cert_chain_pem: Option<String>,
    /// Ask user code to adjudicate the peer certificate.
    pub verify_peer: bool,
    /// Servers only: reject handshakes where the client presents no
    /// certificate. Enforced at the TLS layer.
    pub fail_if_no_peer_cert: bool,
    /// Client: name sent in SNI and session lookup. Server: unused.
    pub sni_hostname: Option<String>,
    pub min_version: TlsVersionFloor,
}

/// Oldest protocol version the bridge will negotiate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsVersionFloor {
    #[default]
    Tls12,
    Tls13,
}

/// Result of one plaintext pull.
#[derive(Debug)]
pub enum Plaintext {
    /// Bytes were decrypted into the buffer.
    Data(usize),
    /// Nothing decryptable yet; feed more ciphertext.
    WouldBlock,
    /// The peer closed the TLS session cleanly.
    Closed,
}

#[derive(Debug)]
pub struct TlsBridge {
    conn: Connection,
    captured_peer: Arc<Mutex<Option<Vec<u8>>>>,
    verify_peer: bool,
    verify_consumed: bool,
}

impl TlsBridge {
    /// Client-mode bridge for an outbound connection.
    pub fn client(params: &TlsParams) -> Result<TlsBridge> {
        let captured = Arc::new(Mutex::new(None));
        let builder = ClientConfig::builder_with_provider(provider())
            .with_protocol_versions(versions(params.min_version))
            .map_err(|e| Error::TlsConfig(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PeerCaptureVerifier::new(
                captured.clone(),
            )));

        let config = match (load_cert_chain(params)?, load_key(params)?) {
            (Some(chain), Some(key)) => builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| Error::TlsConfig(e.to_string()))?,
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(Error::TlsConfig(
                    "certificate chain and private key must both be supplied".into(),
                ))
            }
        };

        let name = params
            .sni_hostname
            .clone()
            .unwrap_or_else(|| String::from("localhost"));
        let server_name = ServerName::try_from(name)
            .map_err(|e| Error::TlsConfig(format!("SNI hostname: {e}")))?;
        let conn = ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| Error::TlsConfig(e.to_string()))?;

        Ok(TlsBridge {
            conn: Connection::Client(conn),
            captured_peer: captured,
            verify_peer: params.verify_peer,
            verify_consumed: false,
        })
    }

    /// Server-mode bridge for an accepted connection. Certificate chain
    /// and private key are mandatory.
    pub fn server(params: &TlsParams) -> Result<TlsBridge> {
        let captured = Arc::new(Mutex::new(None));
        let builder = ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(versions(params.min_version))
            .map_err(|e| Error::TlsConfig(e.to_string()))?;

        let builder = if params.verify_peer {
            builder.with_client_cert_verifier(Arc::new(ClientCaptureVerifier::new(
                captured.clone(),
                params.fail_if_no_peer_cert,
            )))
        } else {
            builder.with_no_client_auth()
        };

        let chain = load_cert_chain(params)?
            .ok_or_else(|| Error::TlsConfig("server TLS requires a certificate chain".into()))?;
        let key = load_key(params)?
            .ok_or_else(|| Error::TlsConfig("server TLS requires a private key".into()))?;
        let config = builder
            .with_single_cert(chain, key)
            .map_err(|e| Error::TlsConfig(e.to_string()))?;
        let conn = ServerConnection::new(Arc::new(config))
            .map_err(|e| Error::TlsConfig(e.to_string()))?;

        Ok(TlsBridge {
            conn: Connection::Server(conn),
            captured_peer: captured,
            verify_peer: params.verify_peer,
            verify_consumed: false,
        })
    }

    /// Feeds peer bytes into the session and processes every complete
    /// record. A fatal error here poisons the handshake.
    pub fn put_ciphertext(&mut self, data: &[u8]) -> Result<()> {
        let mut cursor = io::Cursor::new(data);
        while (cursor.position() as usize) < data.len() {
            match self.conn.read_tls(&mut cursor) {
                Ok(0) => break,
                Ok(_) => {
                    self.conn
                        .process_new_packets()
                        .map_err(|e| Error::Tls(e.to_string()))?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(Error::Tls(e.to_string())),
            }
        }
        Ok(())
    }

    /// Pulls decrypted bytes.
    pub fn get_plaintext(&mut self, buf: &mut [u8]) -> Result<Plaintext> {
        match self.conn.reader().read(buf) {
            Ok(0) => Ok(Plaintext::Closed),
            Ok(n) => Ok(Plaintext::Data(n)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Plaintext::WouldBlock),
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(Plaintext::Closed),
            Err(e) => Err(Error::Tls(e.to_string())),
        }
    }

    /// Absorbs application bytes for encryption. Returns how many were
    /// taken; 0 means the internal buffer is full and ciphertext must be
    /// drained first.
    pub fn put_plaintext(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        match self.conn.writer().write(data) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::Tls(e.to_string())),
        }
    }

    /// Whether wire bytes are waiting to be sent.
    pub fn can_get_ciphertext(&self) -> bool {
        self.conn.wants_write()
    }

    /// Drains all pending wire bytes.
    pub fn take_ciphertext(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            if self.conn.write_tls(&mut out).is_err() {
                break;
            }
        }
        out
    }

    pub fn is_handshake_completed(&self) -> bool {
        !self.conn.is_handshaking()
    }

    /// The captured peer certificate awaiting user adjudication, handed
    /// out at most once and only when verification was requested.
    pub fn take_pending_verify(&mut self) -> Option<Vec<u8>> {
        if !self.verify_peer || self.verify_consumed {
            return None;
        }
        let cert = self.captured_peer.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if cert.is_some() {
            self.verify_consumed = true;
        }
        cert
    }

    /// The peer's end-entity certificate, DER-encoded.
    pub fn peer_cert_der(&self) -> Option<Vec<u8>> {
        self.conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| cert.as_ref().to_vec())
    }

    pub fn cipher_name(&self) -> Option<String> {
        self.conn
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()))
    }

    /// Symmetric key strength of the negotiated suite.
    pub fn cipher_bits(&self) -> Option<u32> {
        let name = self.cipher_name()?;
        if name.contains("_256") || name.contains("CHACHA20") {
            Some(256)
        } else if name.contains("_128") {
            Some(128)
        } else {
            None
        }
    }

    pub fn cipher_protocol(&self) -> Option<String> {
        self.conn.protocol_version().map(|v| format!("{v:?}"))
    }

    /// Server side: the hostname the client asked for in SNI.
    pub fn sni_hostname(&self) -> Option<String> {
        match &self.conn {
            Connection::Server(server) => server.server_name().map(str::to_string),
            Connection::Client(_) => None,
        }
    }
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn versions(floor: TlsVersionFloor) -> &'static [&'static rustls::SupportedProtocolVersion] {
    static TLS12_AND_UP: &[&rustls::SupportedProtocolVersion] =
        &[&rustls::version::TLS13, &rustls::version::TLS12];
    static TLS13_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];
    match floor {
        TlsVersionFloor::Tls12 => TLS12_AND_UP,
        TlsVersionFloor::Tls13 => TLS13_ONLY,
    }
}

fn load_pem_source(
    inline: &Option<String>,
    file: &Option<PathBuf>,
    what: &str,
) -> Result<Option<String>> {
    if let Some(pem) = inline {
        return Ok(Some(pem.clone()));
    }
    if let Some(path) = file {
        return std::fs::read_to_string(path)
            .map(Some)
            .map_err(|e| Error::TlsConfig(format!("{what} {}: {e}", path.display())));
    }
    Ok(None)
}

fn load_cert_chain(params: &TlsParams) -> Result<Option<Vec<CertificateDer<'static>>>> {
    let Some(pem) = load_pem_source(&params.cert_chain_pem, &params.cert_chain_file, "certificate chain")?
    else {
        return Ok(None);
    };
    let mut reader = pem.as_bytes();
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| Error::TlsConfig(format!("certificate chain: {e}")))?;
    if certs.is_empty() {
        return Err(Error::TlsConfig("no certificates in chain".into()));
    }
    Ok(Some(certs))
}

fn load_key(params: &TlsParams) -> Result<Option<PrivateKeyDer<'static>>> {
    let Some(pem) = load_pem_source(&params.private_key_pem, &params.private_key_file, "private key")?
    else {
        return Ok(None);
    };
    let mut reader = pem.as_bytes();
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::TlsConfig(format!("private key: {e}")))?
        .map(Some)
        .ok_or_else(|| Error::TlsConfig("no private key in PEM".into()))
}

/// Accepts and records the server certificate; real adjudication happens
/// in user code through the verify event.
#[derive(Debug)]
struct PeerCaptureVerifier {
    captured: Arc<Mutex<Option<Vec<u8>>>>,
    schemes: Vec<SignatureScheme>,
}

impl PeerCaptureVerifier {
    fn new(captured: Arc<Mutex<Option<Vec<u8>>>>) -> PeerCaptureVerifier {
        PeerCaptureVerifier {
            captured,
            schemes: provider().signature_verification_algorithms.supported_schemes(),
        }
    }
}

impl ServerCertVerifier for PeerCaptureVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        *self.captured.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(end_entity.as_ref().to_vec());
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

/// Server-side counterpart: requests a client certificate, records it,
/// and optionally makes its presence mandatory.
#[derive(Debug)]
struct ClientCaptureVerifier {
    captured: Arc<Mutex<Option<Vec<u8>>>>,
    schemes: Vec<SignatureScheme>,
    mandatory: bool,
}

impl ClientCaptureVerifier {
    fn new(captured: Arc<Mutex<Option<Vec<u8>>>>, mandatory: bool) -> ClientCaptureVerifier {
        ClientCaptureVerifier {
            captured,
            schemes: provider().signature_verification_algorithms.supported_schemes(),
            mandatory,
        }
    }
}

impl ClientCertVerifier for ClientCaptureVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        *self.captured.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(end_entity.as_ref().to_vec());
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }
}
