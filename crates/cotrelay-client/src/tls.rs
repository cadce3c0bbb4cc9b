use crate::error::TransportError;
use crate::tcp;
use cotrelay_core::types::TlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig as RustlsConfig, RootCertStore};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

/// Ready-to-use TLS client side: rustls config plus the name to verify.
#[derive(Clone)]
pub struct TlsSettings {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsSettings {
    /// Loads the PEM material and prepares a connector for `host`.
    ///
    /// Runs once at startup so bad material fails the process instead of
    /// every reconnect attempt.
    pub fn from_config(config: &TlsConfig, host: &str) -> Result<Self, TransportError> {
        let tls_config = build_tls_config(config)?;
        Ok(Self {
            connector: TlsConnector::from(Arc::new(tls_config)),
            server_name: server_name_for(config, host)?,
        })
    }

    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    /// TCP connect plus handshake, both inside one `connect_timeout`.
    pub async fn connect(
        &self,
        addr: &str,
        connect_timeout: Duration,
    ) -> Result<TlsStream<TcpStream>, TransportError> {
        let handshake = async {
            let stream = tcp::connect(addr, connect_timeout).await?;
            self.connector
                .connect(self.server_name.clone(), stream)
                .await
                .map_err(|source| TransportError::Handshake {
                    addr: addr.to_string(),
                    source,
                })
        };

        let stream = timeout(connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr: addr.to_string(),
                timeout: connect_timeout,
            })??;

        debug!("TLS handshake successful");
        Ok(stream)
    }
}

/// Builds the rustls client config with the CA bundle as the only trust
/// roots and the client certificate for mutual auth.
pub fn build_tls_config(config: &TlsConfig) -> Result<RustlsConfig, TransportError> {
    info!("Building TLS configuration");

    let ca_certs = load_certificates(&config.ca_cert_path)?;
    let mut root_store = RootCertStore::empty();
    for cert in ca_certs {
        root_store.add(cert).map_err(|e| {
            TransportError::TlsMaterial(format!("Failed to add CA certificate to root store: {}", e))
        })?;
    }
    info!("Loaded {} CA certificate(s)", root_store.len());

    let certs = load_certificates(&config.client_cert_path)?;
    let private_key = load_private_key(&config.client_key_path)?;
    info!("Loaded {} client certificate(s)", certs.len());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    RustlsConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::TlsMaterial(format!("Unsupported protocol versions: {}", e)))?
        .with_root_certificates(root_store)
        .with_client_auth_cert(certs, private_key)
        .map_err(|e| {
            TransportError::TlsMaterial(format!("Failed to build TLS config with client auth: {}", e))
        })
}

fn open(path: &Path) -> Result<BufReader<std::fs::File>, TransportError> {
    std::fs::File::open(path)
        .map(BufReader::new)
        .map_err(|e| TransportError::TlsMaterial(format!("Failed to open {}: {}", path.display(), e)))
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let mut reader = open(path)?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            TransportError::TlsMaterial(format!("Failed to parse certificates in {}: {}", path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(TransportError::TlsMaterial(format!(
            "No certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let mut reader = open(path)?;

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            TransportError::TlsMaterial(format!("Failed to read private key {}: {}", path.display(), e))
        })?
        .ok_or_else(|| {
            TransportError::TlsMaterial(format!("No private key found in {}", path.display()))
        })
}

/// Name presented for SNI and certificate verification.
fn server_name_for(config: &TlsConfig, host: &str) -> Result<ServerName<'static>, TransportError> {
    let name = config.server_name.as_deref().unwrap_or(host);

    ServerName::try_from(name.to_string())
        .map_err(|e| TransportError::TlsMaterial(format!("Invalid server name '{}': {}", name, e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rcgen::{
        BasicConstraints, CertificateParams, ExtendedKeyUsagePurpose, IsCa, KeyPair,
        KeyUsagePurpose,
    };
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Instant;
    use tempfile::NamedTempFile;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    fn temp_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    /// A throwaway CA with a `localhost` server certificate and a client
    /// certificate, all written to PEM files.
    pub(crate) struct TestPki {
        ca: NamedTempFile,
        server_cert: NamedTempFile,
        server_key: NamedTempFile,
        client_cert: NamedTempFile,
        client_key: NamedTempFile,
    }

    impl TestPki {
        pub(crate) fn generate() -> Self {
            let ca_key = KeyPair::generate().unwrap();
            let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
            ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            ca_params.key_usages = vec![
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
                KeyUsagePurpose::DigitalSignature,
            ];
            let ca_cert = ca_params.self_signed(&ca_key).unwrap();

            let server_key = KeyPair::generate().unwrap();
            let mut server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
            server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
            let server_cert = server_params
                .signed_by(&server_key, &ca_cert, &ca_key)
                .unwrap();

            let client_key = KeyPair::generate().unwrap();
            let mut client_params = CertificateParams::new(Vec::<String>::new()).unwrap();
            client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
            let client_cert = client_params
                .signed_by(&client_key, &ca_cert, &ca_key)
                .unwrap();

            Self {
                ca: temp_file(&ca_cert.pem()),
                server_cert: temp_file(&server_cert.pem()),
                server_key: temp_file(&server_key.serialize_pem()),
                client_cert: temp_file(&client_cert.pem()),
                client_key: temp_file(&client_key.serialize_pem()),
            }
        }

        /// Client-side material, verifying the server as `localhost`.
        pub(crate) fn client_config(&self) -> TlsConfig {
            TlsConfig::new(
                self.ca.path().to_path_buf(),
                self.client_cert.path().to_path_buf(),
                self.client_key.path().to_path_buf(),
            )
            .with_server_name("localhost")
        }

        /// Server side that requires a client certificate from the CA.
        pub(crate) fn acceptor(&self) -> TlsAcceptor {
            let provider = Arc::new(rustls::crypto::ring::default_provider());

            let mut roots = RootCertStore::empty();
            for cert in load_certificates(self.ca.path()).unwrap() {
                roots.add(cert).unwrap();
            }
            let verifier = rustls::server::WebPkiClientVerifier::builder_with_provider(
                Arc::new(roots),
                provider.clone(),
            )
            .build()
            .unwrap();

            let config = rustls::ServerConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .unwrap()
                .with_client_cert_verifier(verifier)
                .with_single_cert(
                    load_certificates(self.server_cert.path()).unwrap(),
                    load_private_key(self.server_key.path()).unwrap(),
                )
                .unwrap();

            TlsAcceptor::from(Arc::new(config))
        }
    }

    #[tokio::test]
    async fn test_mutual_tls_round_trip() {
        let pki = TestPki::generate();
        let acceptor = pki.acceptor();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let tls = acceptor.accept(stream).await.unwrap();
            let mut line = String::new();
            BufReader::new(tls).read_line(&mut line).await.unwrap();
            line
        });

        let settings = TlsSettings::from_config(&pki.client_config(), "127.0.0.1").unwrap();
        let mut stream = settings
            .connect(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        stream.write_all(b"<event/>\n").await.unwrap();
        stream.flush().await.unwrap();

        let line = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "<event/>\n");
    }

    #[tokio::test]
    async fn test_handshake_with_unknown_client_is_rejected() {
        let pki = TestPki::generate();
        let other = TestPki::generate();
        let acceptor = pki.acceptor();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = acceptor.accept(stream).await;
        });

        // Trusts a different CA, so the server certificate fails verification
        let settings = TlsSettings::from_config(&other.client_config(), "127.0.0.1").unwrap();
        let err = settings
            .connect(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Handshake { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        let pki = TestPki::generate();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accepts the TCP connection and never answers the ClientHello
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let settings = TlsSettings::from_config(&pki.client_config(), "127.0.0.1").unwrap();
        let started = Instant::now();
        let err = settings
            .connect(&addr.to_string(), Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::ConnectTimeout { .. }), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(2));
        server.abort();
    }

    fn config(ca: PathBuf, cert: PathBuf, key: PathBuf) -> TlsConfig {
        TlsConfig::new(ca, cert, key)
    }

    #[test]
    fn test_missing_ca_file() {
        let cfg = config(
            PathBuf::from("/nonexistent/ca.pem"),
            PathBuf::from("/nonexistent/client.pem"),
            PathBuf::from("/nonexistent/client.key"),
        );

        let err = build_tls_config(&cfg).unwrap_err();
        assert!(matches!(err, TransportError::TlsMaterial(ref msg) if msg.contains("ca.pem")));
    }

    #[test]
    fn test_ca_file_without_certificates() {
        let ca = temp_file("not a certificate\n");
        let cfg = config(
            ca.path().to_path_buf(),
            PathBuf::from("/nonexistent/client.pem"),
            PathBuf::from("/nonexistent/client.key"),
        );

        let err = build_tls_config(&cfg).unwrap_err();
        assert!(matches!(err, TransportError::TlsMaterial(ref msg) if msg.starts_with("No certificates")));
    }

    #[test]
    fn test_key_file_without_key() {
        let empty = temp_file("");
        let err = load_private_key(empty.path()).unwrap_err();
        assert!(matches!(err, TransportError::TlsMaterial(ref msg) if msg.starts_with("No private key")));
    }

    #[test]
    fn test_server_name_resolution() {
        let cfg = config(PathBuf::new(), PathBuf::new(), PathBuf::new());
        let name = server_name_for(&cfg, "tak.example.com").unwrap();
        assert_eq!(name.to_str(), "tak.example.com");

        let name = server_name_for(&cfg, "10.0.0.7").unwrap();
        assert!(matches!(name, ServerName::IpAddress(_)));

        let cfg = cfg.with_server_name("takserver");
        let name = server_name_for(&cfg, "10.0.0.7").unwrap();
        assert_eq!(name.to_str(), "takserver");

        let cfg = config(PathBuf::new(), PathBuf::new(), PathBuf::new()).with_server_name("bad name!");
        assert!(server_name_for(&cfg, "x").is_err());
    }
}
