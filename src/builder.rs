//! Build Orchestrator
//!
//! Recursive, depth-first walk over the authority forest that decides which
//! artifacts are stale or missing and regenerates them in dependency
//! order. Every step is independently idempotent; a freshly produced
//! upstream artifact cascades a force-regenerate flag into the steps
//! derived from it. Freshness is local to each node: children inherit
//! nothing from their parent's flags.

use crate::configs::AppConfig;
use crate::errors::Result;
use crate::store::AuthorityStore;
use crate::toolkit::Toolkit;
use tracing::info;

pub struct TreeBuilder<'a> {
    toolkit: &'a Toolkit,
    config: &'a AppConfig,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(toolkit: &'a Toolkit, config: &'a AppConfig) -> Self {
        TreeBuilder { toolkit, config }
    }

    /// Build the whole forest starting at the root authority.
    pub fn build_forest(&self, store: &mut AuthorityStore) -> Result<()> {
        let root = store.root_name().to_string();
        self.build_authority(store, None, &root)
    }

    /// Build one authority node, then recurse into its child authorities
    /// and leaf certificates.
    pub fn build_authority(
        &self,
        store: &mut AuthorityStore,
        parent: Option<&str>,
        name: &str,
    ) -> Result<()> {
        info!("building {}", name);
        {
            let ca = store.authority_mut(name)?;
            if ca.password.is_none() {
                ca.password = Some(self.config.default_password.clone());
            }
            ca.host = Some(self.config.hostname.clone());
            ca.port = Some(self.config.server_port);
            ca.ocsp_port = Some(self.config.ocsp_port);
            ca.signing_ca_name = parent.map(str::to_string);
        }
        let ca = store.authority(name)?.clone();
        let parent_ca = match parent {
            Some(parent) => Some(store.authority(parent)?.clone()),
            None => None,
        };

        if self.config.recreate {
            self.toolkit.clean_up(&ca)?;
        }
        let key = self.toolkit.generate_private_key(&ca)?;
        let cert = match &parent_ca {
            // root: self-sign, and only roots produce a trust bundle
            None => {
                let cert = self.toolkit.generate_self_signed_cert(&ca, key.is_fresh())?;
                self.toolkit.generate_truststore(&ca, cert.is_fresh())?;
                cert
            }
            Some(parent_ca) => {
                let csr = self.toolkit.generate_csr(&ca, key.is_fresh())?;
                self.toolkit.sign_cert(parent_ca, &ca, csr.is_fresh())?
            }
        };
        self.toolkit.create_index_files(&ca, cert.is_fresh())?;
        // always rewritten: driven by configuration, not by artifact state
        self.toolkit.write_ca_config(&ca)?;
        let crl = self.toolkit.generate_crl(&ca, cert.is_fresh())?;
        self.toolkit
            .generate_chain(&ca, parent_ca.as_ref(), cert.is_fresh() || crl.is_fresh())?;
        self.toolkit.generate_ocsp_signer(&ca, cert.is_fresh())?;

        for child in store.authority(name)?.authority_names.clone() {
            self.build_authority(store, Some(name), &child)?;
        }
        let cert_names: Vec<String> = store
            .authority(name)?
            .certs
            .iter()
            .map(|c| c.name.clone())
            .collect();
        for cert_name in cert_names {
            self.build_certificate(store, name, &cert_name)?;
        }
        Ok(())
    }

    /// Build one leaf certificate under its signing authority.
    pub fn build_certificate(
        &self,
        store: &mut AuthorityStore,
        ca_name: &str,
        cert_name: &str,
    ) -> Result<()> {
        {
            let cert = store.certificate_mut(ca_name, cert_name)?;
            if cert.password.is_none() {
                cert.password = Some(self.config.default_password.clone());
            }
            cert.signing_ca_name = Some(ca_name.to_string());
        }
        let cert = store.certificate(ca_name, cert_name)?.clone();
        let ca = store.authority(ca_name)?.clone();
        let root = store.authority(store.root_name())?.clone();

        let key = self.toolkit.generate_private_key(&cert)?;
        let csr = self.toolkit.generate_csr(&cert, key.is_fresh())?;
        let signed = self.toolkit.sign_cert(&ca, &cert, csr.is_fresh())?;
        self.toolkit.copy_chain(&ca, &cert, signed.is_fresh())?;
        if cert.revoked {
            self.toolkit.revoke_cert(&ca, &cert)?;
        }
        self.toolkit.verify_cert(&ca, &cert)?;
        self.toolkit.generate_keystore(&cert, signed.is_fresh())?;
        self.toolkit.copy_truststore(&root, &cert)?;
        Ok(())
    }
}
