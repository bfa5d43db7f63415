use anyhow::{bail, Context, Result};
use openssl::ssl::{SslAcceptor, SslAcceptorBuilder, SslFiletype, SslMethod};

pub const HTTP_1_1: &str = "http/1.1";

/// TLS material of the ingress listener.
pub struct TlsSettings {
    cert_file: String,
    key_file: String,
    alpn: Vec<String>,

    /// Acceptor provided by the caller instead of files on disk.
    injected: Option<SslAcceptorBuilder>,
}

impl TlsSettings {
    pub fn new(cert_file: &str, key_file: &str, alpn: &[String]) -> Self {
        Self {
            cert_file: cert_file.to_string(),
            key_file: key_file.to_string(),
            alpn: alpn.to_vec(),
            injected: None,
        }
    }

    pub fn with_acceptor(acceptor: SslAcceptorBuilder, alpn: &[String]) -> Self {
        Self {
            cert_file: String::new(),
            key_file: String::new(),
            alpn: alpn.to_vec(),
            injected: Some(acceptor),
        }
    }

    /// The ALPN protocols announced, `http/1.1` always among them.
    pub fn next_protos(&self) -> Vec<String> {
        let mut protos = self.alpn.clone();
        if !protos.iter().any(|p| p == HTTP_1_1) {
            protos.push(String::from(HTTP_1_1));
        }
        protos
    }

    /// Build the acceptor: the injected one if any, otherwise a key pair
    /// loaded from `cert_file` and `key_file`.
    pub fn build(self) -> Result<SslAcceptorBuilder> {
        let protos = self.next_protos();

        let mut builder = match self.injected {
            Some(builder) => builder,
            None => Self::load_key_pair(&self.cert_file, &self.key_file)?,
        };
        builder
            .set_alpn_protos(&encode_alpn(&protos)?)
            .context("set alpn protocols")?;

        Ok(builder)
    }

    fn load_key_pair(cert_file: &str, key_file: &str) -> Result<SslAcceptorBuilder> {
        if cert_file.is_empty() || key_file.is_empty() {
            bail!("both cert_file and key_file are required to serve https");
        }

        let mut builder =
            SslAcceptor::mozilla_intermediate(SslMethod::tls()).context("init ssl acceptor")?;
        builder
            .set_private_key_file(key_file, SslFiletype::PEM)
            .with_context(|| format!("load ssl key file '{key_file}'"))?;
        builder
            .set_certificate_chain_file(cert_file)
            .with_context(|| format!("load ssl cert file '{cert_file}'"))?;
        builder
            .check_private_key()
            .context("ssl key does not match cert")?;

        Ok(builder)
    }
}

/// Encode protocols in the ALPN wire format: each name prefixed by its
/// length.
fn encode_alpn(protos: &[String]) -> Result<Vec<u8>> {
    let mut wire = Vec::with_capacity(protos.iter().map(|p| p.len() + 1).sum());
    for proto in protos {
        let len = u8::try_from(proto.len())
            .ok()
            .filter(|len| *len > 0)
            .with_context(|| format!("invalid alpn protocol '{proto}'"))?;
        wire.push(len);
        wire.extend_from_slice(proto.as_bytes());
    }
    Ok(wire)
}
