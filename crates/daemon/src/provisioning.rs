// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! One-shot enrollment with the cloud control plane.
//!
//! The state machine is `Unprovisioned → Enrolled`, transitioning exactly
//! once. Network and parse failures leave the state untouched so the
//! operation is safely retriable.

use std::time::Duration;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{info, warn};
use wendy_core::{Enrolled, ErrorKind};
use wendy_wire::{read_message, write_message, CloudRequest, CloudResponse, CLOUD_PORT};

use crate::config_store::{ConfigStore, StoreError};

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("agent is already provisioned")]
    AlreadyProvisioned,

    #[error("could not build certificate request: {0}")]
    Csr(String),

    #[error("could not reach cloud at {0}: {1}")]
    Connect(String, String),

    #[error("cloud protocol error: {0}")]
    Protocol(#[from] wendy_wire::ProtocolError),

    #[error("certificate issuance failed: {0}")]
    Issuance(String),

    #[error("cloud returned a malformed certificate: {0}")]
    MalformedCertificate(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProvisioningError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisioningError::AlreadyProvisioned => ErrorKind::PermissionDenied,
            ProvisioningError::Issuance(_) | ProvisioningError::MalformedCertificate(_) => {
                ErrorKind::Aborted
            }
            _ => ErrorKind::Internal,
        }
    }
}

/// The provisioning state machine. Single-writer: the identity mutex
/// serializes the enrollment transition.
pub struct Provisioning {
    store: ConfigStore,
    identity: tokio::sync::Mutex<wendy_core::AgentIdentity>,
}

impl Provisioning {
    pub fn new(store: ConfigStore, identity: wendy_core::AgentIdentity) -> Self {
        Self { store, identity: tokio::sync::Mutex::new(identity) }
    }

    /// The enrollment record, if this agent is enrolled.
    pub async fn enrolled(&self) -> Option<Enrolled> {
        self.identity.lock().await.enrolled.clone()
    }

    /// Enroll with the cloud at `cloud_host`.
    ///
    /// Issues a CSR signed by the agent key, exchanges it for a
    /// certificate chain, validates the chain, and commits the enrollment
    /// under the identity mutex.
    pub async fn start_provisioning(
        &self,
        cloud_host: &str,
        organization_id: u64,
        asset_id: u64,
        enrollment_token: &str,
        timeout: Duration,
    ) -> Result<(), ProvisioningError> {
        let private_key_pem = {
            let identity = self.identity.lock().await;
            if identity.is_enrolled() {
                return Err(ProvisioningError::AlreadyProvisioned);
            }
            identity.private_key_pem.clone()
        };

        let pem_csr = build_csr(&private_key_pem, organization_id, asset_id)?;
        let response =
            issue_certificate(cloud_host, pem_csr, enrollment_token, timeout).await?;

        let (leaf, chain) = match response {
            CloudResponse::Certificate { pem_certificate, pem_certificate_chain } => {
                (pem_certificate, pem_certificate_chain)
            }
            CloudResponse::Error { message } => {
                warn!(cloud_host, %message, "certificate issuance refused");
                return Err(ProvisioningError::Issuance(message));
            }
        };

        let mut certificate_chain_pem = Vec::with_capacity(1 + chain.len());
        certificate_chain_pem.push(leaf);
        certificate_chain_pem.extend(chain);
        validate_pem_chain(&certificate_chain_pem)?;

        let mut identity = self.identity.lock().await;
        // Re-check under the mutex: a concurrent enrollment may have won.
        if identity.is_enrolled() {
            return Err(ProvisioningError::AlreadyProvisioned);
        }
        let enrolled = Enrolled {
            cloud_host: cloud_host.to_string(),
            organization_id,
            asset_id,
            certificate_chain_pem,
        };
        *identity = self.store.save_enrolled(&identity, &enrolled)?;
        info!(cloud_host, organization_id, asset_id, "agent enrolled");
        Ok(())
    }
}

/// CSR with the agent's distinguished name:
/// C=sh, O=wendy, OU=<organization>, CN=<asset>.
fn build_csr(
    private_key_pem: &str,
    organization_id: u64,
    asset_id: u64,
) -> Result<String, ProvisioningError> {
    let key = KeyPair::from_pem(private_key_pem)
        .map_err(|e| ProvisioningError::Csr(e.to_string()))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, "sh");
    dn.push(DnType::OrganizationName, "wendy");
    dn.push(DnType::OrganizationalUnitName, organization_id.to_string());
    dn.push(DnType::CommonName, asset_id.to_string());
    params.distinguished_name = dn;

    let csr = params
        .serialize_request(&key)
        .map_err(|e| ProvisioningError::Csr(e.to_string()))?;
    csr.pem().map_err(|e| ProvisioningError::Csr(e.to_string()))
}

/// Plaintext framed RPC to the cloud certificate service.
async fn issue_certificate(
    cloud_host: &str,
    pem_csr: String,
    enrollment_token: &str,
    timeout: Duration,
) -> Result<CloudResponse, ProvisioningError> {
    // Hosts may carry an explicit port (tests, non-standard deployments).
    let addr = if cloud_host.contains(':') {
        cloud_host.to_string()
    } else {
        format!("{cloud_host}:{CLOUD_PORT}")
    };

    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| ProvisioningError::Connect(addr.clone(), "connect timed out".into()))?
        .map_err(|e| ProvisioningError::Connect(addr.clone(), e.to_string()))?;
    let (mut reader, mut writer) = stream.into_split();

    let request = CloudRequest::IssueCertificate {
        pem_csr,
        enrollment_token: enrollment_token.to_string(),
    };
    write_message(&mut writer, &request, Some(timeout)).await?;
    Ok(read_message(&mut reader, Some(timeout)).await?)
}

/// Every PEM block must parse as an X.509 certificate.
fn validate_pem_chain(pems: &[String]) -> Result<(), ProvisioningError> {
    if pems.is_empty() {
        return Err(ProvisioningError::MalformedCertificate("empty chain".to_string()));
    }
    for pem in pems {
        let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
            .map_err(|e| ProvisioningError::MalformedCertificate(e.to_string()))?;
        parsed
            .parse_x509()
            .map_err(|e| ProvisioningError::MalformedCertificate(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "provisioning_tests.rs"]
mod tests;
