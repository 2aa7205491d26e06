// [security] CSR parsing - PEM or DER, self-signature checked, requested names extracted

use crate::error::{EnrollError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use time::OffsetDateTime;
use x509_parser::{
    certification_request::X509CertificationRequest,
    extensions::{GeneralName, ParsedExtension},
    pem::parse_x509_pem,
    prelude::{FromDer, X509Certificate},
};

const CSR_PEM_LABELS: [&str; 2] = ["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

#[derive(Debug, Clone)]
pub struct ParsedCsr {
    /// Canonical `CERTIFICATE REQUEST` PEM of the submitted DER.
    pub pem: String,
    pub common_names: Vec<String>,
    pub emails: Vec<String>,
}

impl ParsedCsr {
    /// Every identity the request names, in subject-then-SAN order.
    pub fn requested_names(&self) -> impl Iterator<Item = &str> {
        self.common_names
            .iter()
            .chain(self.emails.iter())
            .map(String::as_str)
    }
}

fn malformed(what: impl std::fmt::Display) -> EnrollError {
    EnrollError::MalformedRequest(what.to_string())
}

pub fn parse(input: &[u8]) -> Result<ParsedCsr> {
    let der = to_der(input)?;

    let (rest, csr) = X509CertificationRequest::from_der(&der)
        .map_err(|e| malformed(format!("unparsable certificate request: {}", e)))?;
    if !rest.is_empty() {
        return Err(malformed("trailing data after certificate request"));
    }
    // [security] Proof of possession of the private key
    csr.verify_signature()
        .map_err(|_| malformed("certificate request signature does not verify"))?;

    let common_names = csr
        .certification_request_info
        .subject
        .iter_common_name()
        .map(|cn| cn.as_str().map(String::from))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| malformed("common name is not a string"))?;

    let mut emails = Vec::new();
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for name in &san.general_names {
                    if let GeneralName::RFC822Name(email) = name {
                        emails.push(email.to_string());
                    }
                }
            }
        }
    }

    Ok(ParsedCsr {
        pem: to_pem("CERTIFICATE REQUEST", &der),
        common_names,
        emails,
    })
}

fn to_der(input: &[u8]) -> Result<Vec<u8>> {
    let start = input
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| malformed("empty certificate request"))?;
    let trimmed = &input[start..];
    if !trimmed.starts_with(b"-----BEGIN") {
        return Ok(input.to_vec());
    }

    let (_, pem) = parse_x509_pem(trimmed).map_err(|e| malformed(format!("bad PEM: {}", e)))?;
    if !CSR_PEM_LABELS.contains(&pem.label.as_str()) {
        return Err(malformed(format!("unexpected PEM block {}", pem.label)));
    }
    Ok(pem.contents)
}

fn to_pem(label: &str, der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {}-----\n", label);
    // base64 output is ASCII, so byte chunks are valid str
    for line in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}

/// Expiry of a PEM certificate; used to cap issued validity at the realm CA's own.
pub fn ca_not_after(certificate_pem: &str) -> Result<OffsetDateTime> {
    let (_, pem) = parse_x509_pem(certificate_pem.as_bytes())
        .map_err(|e| EnrollError::Config(format!("bad CA certificate PEM: {}", e)))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| EnrollError::Config(format!("bad CA certificate: {}", e)))?;
    OffsetDateTime::from_unix_timestamp(cert.validity().not_after.timestamp())
        .map_err(|e| EnrollError::Config(format!("bad CA certificate validity: {}", e)))
}
