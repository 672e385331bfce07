//! Authority Tree Store
//!
//! In-memory forest of certificate authorities and leaf certificates, plus
//! the durable record form it is loaded from and flushed to.
//!
//! Nodes live in an arena keyed by name; parent/child linkage is stored as
//! names, never as owning back-references, so the forest stays acyclic by
//! construction. Every name (authority or certificate) is unique across the
//! whole forest and doubles as the lookup key. A node's `relative_path` is
//! fixed when it enters the store and never recomputed.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Common surface of the two node kinds, as seen by the toolkit steps
/// (key generation, CSR generation, signing).
pub trait PkiNode {
    fn name(&self) -> &str;
    fn key_size(&self) -> u32;
    fn subject(&self) -> &str;
    fn password(&self) -> Option<&str>;
    fn relative_path(&self) -> &str;
}

/// A certificate authority node of the in-memory forest.
///
/// `host`, `port` and `ocsp_port` are stamped by the builder from process
/// configuration right before config-file assembly; they are never
/// persisted.
#[derive(Debug, Clone)]
pub struct Authority {
    pub name: String,
    pub key_size: u32,
    pub days: u32,
    pub subject: String,
    pub relative_path: String,
    pub path_len_constraint: Option<u32>,
    pub ca_constraint: bool,
    pub client_auth: bool,
    pub key_usage: Option<String>,
    pub password: Option<String>,
    pub signing_ca_name: Option<String>,
    pub subject_alt_name: Vec<String>,
    pub certs: Vec<Certificate>,
    pub authority_names: Vec<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ocsp_port: Option<u16>,
}

impl Authority {
    /// `basicConstraints` value for the config file, e.g.
    /// `critical,CA:TRUE,pathlen:0`.
    pub fn basic_constraints(&self) -> String {
        let mut value = String::from("critical");
        if self.ca_constraint {
            value.push_str(",CA:TRUE");
        } else {
            value.push_str(",CA:FALSE");
        }
        if let Some(pathlen) = self.path_len_constraint {
            value.push_str(&format!(",pathlen:{}", pathlen));
        }
        value
    }

    /// `extendedKeyUsage` value for the config file.
    pub fn extended_key_usage(&self) -> String {
        if self.client_auth {
            "serverAuth,clientAuth".to_string()
        } else {
            "serverAuth".to_string()
        }
    }
}

impl PkiNode for Authority {
    fn name(&self) -> &str {
        &self.name
    }
    fn key_size(&self) -> u32 {
        self.key_size
    }
    fn subject(&self) -> &str {
        &self.subject
    }
    fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
    fn relative_path(&self) -> &str {
        &self.relative_path
    }
}

/// A leaf certificate, signed by exactly one authority and never itself a
/// signer. `revoked` is monotonic: once true it stays true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub name: String,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub revoked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(skip)]
    pub signing_ca_name: Option<String>,
}

fn default_key_size() -> u32 {
    4096
}

impl PkiNode for Certificate {
    fn name(&self) -> &str {
        &self.name
    }
    fn key_size(&self) -> u32 {
        self.key_size
    }
    fn subject(&self) -> &str {
        &self.subject
    }
    fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
    fn relative_path(&self) -> &str {
        self.relative_path.as_deref().unwrap_or(&self.name)
    }
}

/// Durable / outward form of an authority subtree.
///
/// Field order is the serialization order: identity and crypto attributes
/// first, then the certificate list, then the child-authority list. Empty
/// and absent optionals are omitted from the serialized document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityRecord {
    pub name: String,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    #[serde(default = "default_days")]
    pub days: u32,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_len_constraint: Option<u32>,
    #[serde(default = "default_ca_constraint")]
    pub ca_constraint: bool,
    #[serde(default)]
    pub client_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_usage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_ca_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subject_alt_name: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certs: Vec<Certificate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ca: Vec<AuthorityRecord>,
}

fn default_days() -> u32 {
    730
}

fn default_ca_constraint() -> bool {
    true
}

/// The single source of truth for identity and relationships.
///
/// Loaded once at startup, mutated only through the insertion and
/// revocation operations, flushed as one nested document rooted at the
/// root authority.
pub struct AuthorityStore {
    authorities: HashMap<String, Authority>,
    cert_names: HashSet<String>,
    root: String,
}

impl AuthorityStore {
    /// Build the arena from a nested root record (configured tree or
    /// previously flushed database).
    pub fn from_root(record: AuthorityRecord) -> Result<Self> {
        let mut store = AuthorityStore {
            authorities: HashMap::new(),
            cert_names: HashSet::new(),
            root: record.name.clone(),
        };
        store.register(None, record)?;
        Ok(store)
    }

    fn register(&mut self, parent: Option<&str>, record: AuthorityRecord) -> Result<()> {
        let AuthorityRecord {
            name,
            key_size,
            days,
            subject,
            relative_path,
            path_len_constraint,
            ca_constraint,
            client_auth,
            key_usage,
            password,
            signing_ca_name: _,
            subject_alt_name,
            certs,
            ca,
        } = record;

        if self.contains_name(&name) {
            warn!("{} already exists, skipping duplicate definition", name);
            return Ok(());
        }

        let relative_path = relative_path.unwrap_or_else(|| name.clone());
        let mut authority = Authority {
            name: name.clone(),
            key_size,
            days,
            subject,
            relative_path,
            path_len_constraint,
            ca_constraint,
            client_auth,
            key_usage,
            password,
            signing_ca_name: parent.map(str::to_string),
            subject_alt_name,
            certs: Vec::new(),
            authority_names: Vec::new(),
            host: None,
            port: None,
            ocsp_port: None,
        };
        for mut cert in certs {
            if self.contains_name(&cert.name) {
                warn!("{} already exists, skipping duplicate definition", cert.name);
                continue;
            }
            if cert.relative_path.is_none() {
                cert.relative_path = Some(cert.name.clone());
            }
            cert.signing_ca_name = Some(name.clone());
            self.cert_names.insert(cert.name.clone());
            authority.certs.push(cert);
        }
        self.authorities.insert(name.clone(), authority);
        if let Some(parent) = parent {
            if let Some(parent_authority) = self.authorities.get_mut(parent) {
                parent_authority.authority_names.push(name.clone());
            }
        }
        for child in ca {
            self.register(Some(&name), child)?;
        }
        Ok(())
    }

    pub fn root_name(&self) -> &str {
        &self.root
    }

    /// True when `name` is taken anywhere in the forest, by an authority
    /// or by a certificate.
    pub fn contains_name(&self, name: &str) -> bool {
        self.authorities.contains_key(name) || self.cert_names.contains(name)
    }

    pub fn authority(&self, name: &str) -> Result<&Authority> {
        self.authorities
            .get(name)
            .ok_or_else(|| Error::validation(format!("unknown authority: {}", name)))
    }

    pub fn authority_mut(&mut self, name: &str) -> Result<&mut Authority> {
        self.authorities
            .get_mut(name)
            .ok_or_else(|| Error::validation(format!("unknown authority: {}", name)))
    }

    pub fn certificate(&self, authority: &str, name: &str) -> Result<&Certificate> {
        self.authority(authority)?
            .certs
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                Error::validation(format!(
                    "certificate {} not found under authority {}",
                    name, authority
                ))
            })
    }

    pub fn certificate_mut(&mut self, authority: &str, name: &str) -> Result<&mut Certificate> {
        self.authority_mut(authority)?
            .certs
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                Error::validation(format!(
                    "certificate {} not found under authority {}",
                    name, authority
                ))
            })
    }

    /// Attach a new authority under `signing_ca`. Returns false (leaving
    /// the forest untouched) when the name is already taken.
    pub fn insert_authority(&mut self, signing_ca: &str, record: AuthorityRecord) -> Result<bool> {
        if !record.ca.is_empty() || !record.certs.is_empty() {
            return Err(Error::validation(format!(
                "new authority {} must not carry child authorities or certificates",
                record.name
            )));
        }
        self.authority(signing_ca)?;
        if self.contains_name(&record.name) {
            warn!("{} already exists, insertion is a no-op", record.name);
            return Ok(false);
        }
        self.register(Some(signing_ca), record)?;
        Ok(true)
    }

    /// Attach a new leaf certificate under `signing_ca`. Returns false
    /// when the name is already taken anywhere in the forest.
    pub fn insert_certificate(&mut self, signing_ca: &str, mut cert: Certificate) -> Result<bool> {
        self.authority(signing_ca)?;
        if self.contains_name(&cert.name) {
            warn!("{} already exists, insertion is a no-op", cert.name);
            return Ok(false);
        }
        if cert.relative_path.is_none() {
            cert.relative_path = Some(cert.name.clone());
        }
        cert.signing_ca_name = Some(signing_ca.to_string());
        self.cert_names.insert(cert.name.clone());
        self.authority_mut(signing_ca)?.certs.push(cert);
        Ok(true)
    }

    /// Every authority of the forest in depth-first pre-order from the
    /// root. The responder command is assembled from this order.
    pub fn all_authorities(&self) -> Vec<&Authority> {
        let mut out = Vec::with_capacity(self.authorities.len());
        self.collect(&self.root, &mut out);
        out
    }

    fn collect<'a>(&'a self, name: &str, out: &mut Vec<&'a Authority>) {
        if let Some(authority) = self.authorities.get(name) {
            out.push(authority);
            for child in &authority.authority_names {
                self.collect(child, out);
            }
        }
    }

    /// Outward projection of one authority: password, relative path and
    /// the child/certificate collections are stripped; the signing parent
    /// is reduced to its name.
    pub fn clean_view(&self, name: &str) -> Option<AuthorityRecord> {
        self.authorities.get(name).map(|ca| AuthorityRecord {
            name: ca.name.clone(),
            key_size: ca.key_size,
            days: ca.days,
            subject: ca.subject.clone(),
            relative_path: None,
            path_len_constraint: ca.path_len_constraint,
            ca_constraint: ca.ca_constraint,
            client_auth: ca.client_auth,
            key_usage: ca.key_usage.clone(),
            password: None,
            signing_ca_name: ca.signing_ca_name.clone(),
            subject_alt_name: ca.subject_alt_name.clone(),
            certs: Vec::new(),
            ca: Vec::new(),
        })
    }

    /// Outward projection of the whole forest.
    pub fn clean_forest(&self) -> Vec<AuthorityRecord> {
        self.all_authorities()
            .iter()
            .filter_map(|ca| self.clean_view(&ca.name))
            .collect()
    }

    /// Nested durable form of the forest, rooted at the root authority.
    pub fn to_record(&self) -> Result<AuthorityRecord> {
        self.record_of(&self.root)
    }

    fn record_of(&self, name: &str) -> Result<AuthorityRecord> {
        let ca = self.authority(name)?;
        let mut children = Vec::with_capacity(ca.authority_names.len());
        for child in &ca.authority_names {
            children.push(self.record_of(child)?);
        }
        Ok(AuthorityRecord {
            name: ca.name.clone(),
            key_size: ca.key_size,
            days: ca.days,
            subject: ca.subject.clone(),
            relative_path: Some(ca.relative_path.clone()),
            path_len_constraint: ca.path_len_constraint,
            ca_constraint: ca.ca_constraint,
            client_auth: ca.client_auth,
            key_usage: ca.key_usage.clone(),
            password: ca.password.clone(),
            signing_ca_name: ca.signing_ca_name.clone(),
            subject_alt_name: ca.subject_alt_name.clone(),
            certs: ca.certs.clone(),
            ca: children,
        })
    }
}
