use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::{Response, Uri};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tracing::debug;

use crate::Result;
use crate::body::{ReqBody, build_http_request};
use crate::error::Error;
use crate::options::{AddressFamily, RestOptions};
use crate::request::RestRequest;
use crate::resolve::{GuardedResolver, find_blocked_address, internal_range};
use crate::util::{classify_transport_error, lock_unpoisoned, redact_uri_for_logs};

pub(crate) type TransportClient = Client<HttpsConnector<HttpConnector<GuardedResolver>>, ReqBody>;

/// Socket options that select a pooled connection agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct AgentKey {
    idle_timeout: Duration,
    max_sockets: usize,
    family: AddressFamily,
    allow_internal_ips: bool,
    reject_unauthorized: bool,
}

impl AgentKey {
    pub(crate) fn from_options(options: &RestOptions) -> Self {
        let keep_alive = options.get_keep_alive();
        Self {
            idle_timeout: keep_alive.idle_timeout,
            max_sockets: keep_alive.max_sockets,
            family: options.get_family(),
            allow_internal_ips: options.get_allow_internal_ips(),
            reject_unauthorized: options.get_reject_unauthorized(),
        }
    }
}

/// Append-only map of connection agents, shared by every client derived
/// from the same root options.
#[derive(Default)]
pub(crate) struct AgentCache {
    agents: Mutex<HashMap<AgentKey, TransportClient>>,
}

impl std::fmt::Debug for AgentCache {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AgentCache")
            .field("agents", &self.len())
            .finish()
    }
}

impl AgentCache {
    pub(crate) fn len(&self) -> usize {
        lock_unpoisoned(&self.agents).len()
    }

    pub(crate) fn agent(&self, key: AgentKey) -> Result<TransportClient> {
        let mut agents = lock_unpoisoned(&self.agents);
        if let Some(agent) = agents.get(&key) {
            return Ok(agent.clone());
        }
        let agent = build_agent(key)?;
        debug!(?key, "restline created connection agent");
        agents.insert(key, agent.clone());
        Ok(agent)
    }
}

fn build_agent(key: AgentKey) -> Result<TransportClient> {
    let mut connector =
        HttpConnector::new_with_resolver(GuardedResolver::new(key.family, key.allow_internal_ips));
    connector.enforce_http(false);
    let https = HttpsConnectorBuilder::new()
        .with_tls_config(build_tls_config(key.reject_unauthorized)?)
        .https_or_http()
        .enable_http1()
        .wrap_connector(connector);
    Ok(Client::builder(TokioExecutor::new())
        .pool_idle_timeout(key.idle_timeout)
        .pool_max_idle_per_host(key.max_sockets)
        .build(https))
}

fn build_tls_config(reject_unauthorized: bool) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config_builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|source| Error::TlsConfig {
            message: source.to_string(),
        })?;

    if reject_unauthorized {
        let root_store = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        return Ok(config_builder
            .with_root_certificates(root_store)
            .with_no_client_auth());
    }

    Ok(config_builder
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
        .with_no_client_auth())
}

/// Skips certificate validation while still checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Validates the request target and builds the fetch future the reader
/// drives. Internal IP literals are refused here because the connector
/// skips DNS for them.
pub(crate) fn prepare(
    request: &RestRequest,
) -> Result<impl Future<Output = Result<Response<Incoming>>> + Send + 'static> {
    let options = request.options();
    let url = url::Url::parse(request.url()).map_err(|_| Error::InvalidUri {
        uri: request.url().to_owned(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidUri {
            uri: request.url().to_owned(),
        });
    }
    if !options.get_allow_internal_ips() {
        check_ip_literal(&url)?;
    }

    let uri: Uri = url.as_str().parse().map_err(|_| Error::InvalidUri {
        uri: request.url().to_owned(),
    })?;
    let method = request.method().clone();
    let redacted_uri = redact_uri_for_logs(request.url());
    let body = request.body().to_req_body(&method, &redacted_uri)?;
    let http_request = build_http_request(method.clone(), uri, request.headers(), body)?;
    let agent = options.agents().agent(AgentKey::from_options(options))?;

    Ok(async move {
        agent.request(http_request).await.map_err(|source| {
            if let Some(blocked) = find_blocked_address(&source) {
                return Error::InternalAddress {
                    host: blocked.host.clone(),
                    address: blocked.address,
                    range: blocked.range,
                };
            }
            Error::Transport {
                kind: classify_transport_error(&source),
                method,
                uri: redacted_uri,
                source: Box::new(source),
            }
        })
    })
}

fn check_ip_literal(url: &url::Url) -> Result<()> {
    let address = match url.host() {
        Some(url::Host::Ipv4(address)) => IpAddr::V4(address),
        Some(url::Host::Ipv6(address)) => IpAddr::V6(address),
        _ => return Ok(()),
    };
    match internal_range(address) {
        Some(range) => Err(Error::InternalAddress {
            host: url.host_str().unwrap_or_default().to_owned(),
            address,
            range,
        }),
        None => Ok(()),
    }
}
