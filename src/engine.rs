//! The serialized mutation surface over the authority forest.
//!
//! Each operation is one critical section: mutate the tree, run the
//! orchestrator over the affected subtree, flush the durable document,
//! restart the responder. A single store lock serializes concurrent
//! callers. Persistence writes to a temporary file and atomically renames
//! it over the database path, so a crash mid-flush cannot lose the
//! previous durable state.

use crate::builder::TreeBuilder;
use crate::configs::AppConfig;
use crate::errors::{Error, Result};
use crate::ocsp::OcspResponder;
use crate::store::{AuthorityRecord, AuthorityStore, Certificate};
use crate::toolkit::Toolkit;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// The root authority's name is fixed; everything else hangs below it.
const ROOT_NAME: &str = "rootca";

/// Durable document shape: one top-level root-authority record.
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    rootca: AuthorityRecord,
}

pub struct Engine {
    config: AppConfig,
    toolkit: Toolkit,
    responder: OcspResponder,
    store: Mutex<AuthorityStore>,
}

impl Engine {
    /// Load the forest (from the durable database if present, else from
    /// the configured root definition), build every artifact, flush, and
    /// start the OCSP responder.
    pub fn bootstrap(config: AppConfig) -> Result<Self> {
        fs::create_dir_all(&config.ca_path)?;
        let mut record = if config.db_path.exists() {
            info!("loading authority tree from {}", config.db_path.display());
            let text = fs::read_to_string(&config.db_path)?;
            let doc: StoreDocument = toml::from_str(&text).map_err(|source| Error::Load {
                path: config.db_path.clone(),
                source,
            })?;
            doc.rootca
        } else {
            config.rootca.clone()
        };
        record.name = ROOT_NAME.to_string();

        let mut store = AuthorityStore::from_root(record)?;
        let toolkit = Toolkit::new(&config.ca_path, config.openssl_bin());
        TreeBuilder::new(&toolkit, &config).build_forest(&mut store)?;

        let responder = OcspResponder::new(&config.ca_path);
        let engine = Engine {
            config,
            toolkit,
            responder,
            store: Mutex::new(store),
        };
        {
            let store = engine.store.lock().unwrap();
            engine.flush(&store)?;
            engine.start_responder(&store)?;
        }
        Ok(engine)
    }

    /// Attach and build a new authority under `signing_ca`. A name that
    /// already exists anywhere in the forest makes this a no-op.
    pub fn insert_authority(&self, signing_ca: &str, record: AuthorityRecord) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        let name = record.name.clone();
        if !store.insert_authority(signing_ca, record)? {
            return Ok(());
        }
        TreeBuilder::new(&self.toolkit, &self.config).build_authority(
            &mut store,
            Some(signing_ca),
            &name,
        )?;
        self.flush(&store)?;
        self.restart_responder(&store)
    }

    /// Attach and build a new leaf certificate under `signing_ca`. A name
    /// that already exists anywhere in the forest makes this a no-op.
    pub fn insert_certificate(&self, signing_ca: &str, cert: Certificate) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        let name = cert.name.clone();
        if !store.insert_certificate(signing_ca, cert)? {
            return Ok(());
        }
        TreeBuilder::new(&self.toolkit, &self.config).build_certificate(
            &mut store,
            signing_ca,
            &name,
        )?;
        self.flush(&store)?;
        self.restart_responder(&store)
    }

    /// Revoke a leaf certificate. The flag is monotonic: revoking an
    /// already-revoked certificate returns without touching the toolkit.
    pub fn revoke_certificate(&self, signing_ca: &str, cert_name: &str) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        if store.certificate(signing_ca, cert_name)?.revoked {
            info!("{} is already revoked", cert_name);
            return Ok(());
        }
        store.certificate_mut(signing_ca, cert_name)?.revoked = true;
        TreeBuilder::new(&self.toolkit, &self.config).build_certificate(
            &mut store,
            signing_ca,
            cert_name,
        )?;
        self.flush(&store)?;
        self.restart_responder(&store)
    }

    /// Revocation status of a leaf as reported by the external verifier
    /// against the authority's CRL chain.
    pub fn is_certificate_revoked(&self, signing_ca: &str, cert_name: &str) -> Result<bool> {
        let store = self.store.lock().unwrap();
        let ca = store.authority(signing_ca)?;
        let cert = store.certificate(signing_ca, cert_name)?;
        self.toolkit.is_cert_revoked(ca, cert)
    }

    /// Outward projection of one authority (secrets and children
    /// stripped).
    pub fn clean_authority(&self, name: &str) -> Option<AuthorityRecord> {
        self.store.lock().unwrap().clean_view(name)
    }

    /// Outward projection of every authority in the forest.
    pub fn clean_forest(&self) -> Vec<AuthorityRecord> {
        self.store.lock().unwrap().clean_forest()
    }

    pub fn responder(&self) -> &OcspResponder {
        &self.responder
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn shutdown(&self) {
        self.responder.stop();
    }

    fn start_responder(&self, store: &AuthorityStore) -> Result<()> {
        let cmd = self
            .toolkit
            .responder_command(&store.all_authorities(), self.config.ocsp_port)?;
        self.responder.start(&cmd)
    }

    fn restart_responder(&self, store: &AuthorityStore) -> Result<()> {
        let cmd = self
            .toolkit
            .responder_command(&store.all_authorities(), self.config.ocsp_port)?;
        self.responder.restart(&cmd)
    }

    /// Rewrite the durable document. Temp-file + rename keeps the previous
    /// state intact if the process dies mid-write.
    fn flush(&self, store: &AuthorityStore) -> Result<()> {
        let doc = StoreDocument {
            rootca: store.to_record()?,
        };
        let text = toml::to_string_pretty(&doc)?;
        let dir = self
            .config
            .db_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.persist(&self.config.db_path)
            .map_err(|e| Error::Io(e.error))?;
        info!("done flushing database file");
        Ok(())
    }
}
