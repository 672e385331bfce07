//! Per-step invocations of the external crypto toolkit, plus the chain and
//! revocation file management built on top of them.
//!
//! Every step works inside the node's working directory (created on first
//! use) and reports [`Freshness`] so the orchestrator can cascade
//! regeneration. Steps that take a `force` flag delete their outputs first
//! and therefore regenerate even when reruns would otherwise skip.

use crate::errors::{Error, Result};
use crate::executor::{Executor, Freshness};
use crate::store::{Authority, Certificate, PkiNode};
use crate::templates;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub struct Toolkit {
    executor: Executor,
    openssl: String,
}

impl Toolkit {
    pub fn new(base_path: impl Into<PathBuf>, openssl_bin: impl Into<PathBuf>) -> Self {
        Toolkit {
            executor: Executor::new(base_path),
            openssl: openssl_bin.into().to_string_lossy().into_owned(),
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Purge every regenerable file under the node's working directory.
    /// Private keys survive; everything else is rebuilt on the next pass.
    pub fn clean_up(&self, ca: &Authority) -> Result<()> {
        let dir = self.executor.working_dir(ca.relative_path())?;
        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().is_some_and(|ext| ext == "key") {
                continue;
            }
            info!("deleting {}", entry.path().display());
            fs::remove_file(entry.path())?;
        }
        Ok(())
    }

    /// `genrsa`, skip-if-exists. Keys are never force-recreated.
    pub fn generate_private_key(&self, node: &dyn PkiNode) -> Result<Freshness> {
        let password = required_password(node)?;
        let cmd = vec![
            self.openssl.clone(),
            "genrsa".to_string(),
            "-aes256".to_string(),
            "-passout".to_string(),
            format!("pass:{}", password),
            "-out".to_string(),
            format!("{}.key", node.name()),
            node.key_size().to_string(),
        ];
        self.executor
            .ensure(node.relative_path(), &cmd, &[format!("{}.key", node.name())])
    }

    /// Self-signed certificate for a root authority.
    pub fn generate_self_signed_cert(&self, ca: &Authority, force: bool) -> Result<Freshness> {
        let password = required_password(ca)?;
        if force {
            self.delete_old_files(ca, &[&format!("{}.crt", ca.name)])?;
        }
        let cmd = vec![
            self.openssl.clone(),
            "req".to_string(),
            "-sha256".to_string(),
            "-new".to_string(),
            "-x509".to_string(),
            "-days".to_string(),
            ca.days.to_string(),
            "-key".to_string(),
            format!("{}.key", ca.name),
            "-out".to_string(),
            format!("{}.crt", ca.name),
            "-subj".to_string(),
            ca.subject.clone(),
            "-passin".to_string(),
            format!("pass:{}", password),
        ];
        self.executor
            .ensure(ca.relative_path(), &cmd, &[format!("{}.crt", ca.name)])
    }

    /// Certificate signing request for a non-root node.
    pub fn generate_csr(&self, node: &dyn PkiNode, force: bool) -> Result<Freshness> {
        let password = required_password(node)?;
        if force {
            self.delete_old_files(node, &[&format!("{}.csr", node.name())])?;
        }
        let cmd = vec![
            self.openssl.clone(),
            "req".to_string(),
            "-sha256".to_string(),
            "-new".to_string(),
            "-key".to_string(),
            format!("{}.key", node.name()),
            "-out".to_string(),
            format!("{}.csr", node.name()),
            "-subj".to_string(),
            node.subject().to_string(),
            "-passin".to_string(),
            format!("pass:{}", password),
        ];
        self.executor
            .ensure(node.relative_path(), &cmd, &[format!("{}.csr", node.name())])
    }

    /// Have `parent` sign the node's request. Runs in the parent's working
    /// directory against the parent's `ca.conf`; the issued certificate is
    /// also copied into the node's own directory.
    pub fn sign_cert(
        &self,
        parent: &Authority,
        node: &dyn PkiNode,
        force: bool,
    ) -> Result<Freshness> {
        let password = required_password(node)?;
        let parent_dir = self.executor.working_dir(parent.relative_path())?;
        let node_dir = self.executor.working_dir(node.relative_path())?;
        fs::create_dir_all(parent_dir.join("certs"))?;
        let issued = parent_dir.join("certs").join(format!("{}.crt", node.name()));
        let copied = node_dir.join(format!("{}.crt", node.name()));
        if force {
            remove_if_exists(&issued)?;
            remove_if_exists(&copied)?;
        }
        let cmd = vec![
            self.openssl.clone(),
            "ca".to_string(),
            "-batch".to_string(),
            "-config".to_string(),
            "ca.conf".to_string(),
            "-notext".to_string(),
            "-in".to_string(),
            node_dir
                .join(format!("{}.csr", node.name()))
                .to_string_lossy()
                .into_owned(),
            "-out".to_string(),
            issued.to_string_lossy().into_owned(),
            "-passin".to_string(),
            format!("pass:{}", password),
        ];
        let result = self.executor.ensure(
            parent.relative_path(),
            &cmd,
            &[format!("certs/{}.crt", node.name())],
        )?;
        fs::copy(&issued, &copied)?;
        Ok(result)
    }

    /// Reset the serial/index/CRL-number bookkeeping used for sequential
    /// serial issuance. Rebuilt from scratch, never merged.
    pub fn create_index_files(&self, ca: &Authority, force: bool) -> Result<()> {
        self.create_index_file("certindex", ca, None, force)?;
        self.create_index_file("certserial", ca, Some("1000"), force)?;
        self.create_index_file("crlnumber", ca, Some("1000"), force)?;
        Ok(())
    }

    fn create_index_file(
        &self,
        name: &str,
        ca: &Authority,
        initial_content: Option<&str>,
        force: bool,
    ) -> Result<()> {
        let dir = self.executor.working_dir(ca.relative_path())?;
        if force {
            self.delete_old_files(
                ca,
                &[name, &format!("{}.old", name), &format!("{}.attr", name)],
            )?;
        }
        let index_file = dir.join(name);
        if !index_file.exists() {
            fs::write(&index_file, initial_content.unwrap_or(""))?;
            info!("{} for {} created", name, ca.name);
        } else {
            info!("{} for {} already existed", name, ca.name);
        }
        Ok(())
    }

    /// Write the authority's `ca.conf`, unconditionally: it is cheap,
    /// textual, and must always reflect the current in-memory attributes.
    pub fn write_ca_config(&self, ca: &Authority) -> Result<()> {
        let dir = self.executor.working_dir(ca.relative_path())?;
        let config_file = dir.join("ca.conf");
        if config_file.exists() {
            info!("ca.conf for {} already existed, regenerate it anyway", ca.name);
        }
        fs::write(&config_file, templates::render_ca_config(ca)?)?;
        info!("ca.conf for {} created", ca.name);
        Ok(())
    }

    /// Generate the PEM CRL and convert it to DER. A freshly generated PEM
    /// CRL forces the DER conversion.
    pub fn generate_crl(&self, ca: &Authority, force: bool) -> Result<Freshness> {
        let password = required_password(ca)?;
        if force {
            self.delete_old_files(
                ca,
                &[&format!("{}.crl.pem", ca.name), &format!("{}.crl", ca.name)],
            )?;
        }
        let gencrl = vec![
            self.openssl.clone(),
            "ca".to_string(),
            "-config".to_string(),
            "ca.conf".to_string(),
            "-gencrl".to_string(),
            "-keyfile".to_string(),
            format!("{}.key", ca.name),
            "-cert".to_string(),
            format!("{}.crt", ca.name),
            "-out".to_string(),
            format!("{}.crl.pem", ca.name),
            "-passin".to_string(),
            format!("pass:{}", password),
        ];
        let pem = self
            .executor
            .ensure(ca.relative_path(), &gencrl, &[format!("{}.crl.pem", ca.name)])?;
        if pem.is_fresh() {
            self.delete_old_files(ca, &[&format!("{}.crl", ca.name)])?;
        }
        let convert = vec![
            self.openssl.clone(),
            "crl".to_string(),
            "-inform".to_string(),
            "PEM".to_string(),
            "-in".to_string(),
            format!("{}.crl.pem", ca.name),
            "-outform".to_string(),
            "DER".to_string(),
            "-out".to_string(),
            format!("{}.crl", ca.name),
        ];
        self.executor
            .ensure(ca.relative_path(), &convert, &[format!("{}.crl", ca.name)])
    }

    /// Concatenated trust chain: ancestor certificates root-first, this
    /// authority's certificate last. Also refreshes the CRL-augmented
    /// chain file.
    pub fn generate_chain(
        &self,
        ca: &Authority,
        parent: Option<&Authority>,
        force: bool,
    ) -> Result<()> {
        if force {
            self.delete_old_files(ca, &["certs/chain.crt"])?;
        }
        let dir = self.executor.working_dir(ca.relative_path())?;
        let certs_dir = dir.join("certs");
        fs::create_dir_all(&certs_dir)?;
        let chain_file = certs_dir.join("chain.crt");
        if !chain_file.exists() {
            let mut chain = Vec::new();
            if let Some(parent) = parent {
                let parent_chain = self
                    .executor
                    .working_dir(parent.relative_path())?
                    .join("certs")
                    .join("chain.crt");
                chain.extend_from_slice(&fs::read(parent_chain)?);
            }
            chain.extend_from_slice(&fs::read(dir.join(format!("{}.crt", ca.name)))?);
            fs::write(&chain_file, chain)?;
            info!("{} created", chain_file.display());
        }
        self.generate_crl_chain(ca, force)
    }

    /// CRL-augmented chain: this authority's PEM CRL followed by its trust
    /// chain. Consumed by revocation-status checks.
    pub fn generate_crl_chain(&self, ca: &Authority, force: bool) -> Result<()> {
        if force {
            self.delete_old_files(ca, &["certs/crl-chain.crt"])?;
        }
        let dir = self.executor.working_dir(ca.relative_path())?;
        let crl_chain_file = dir.join("certs").join("crl-chain.crt");
        if !crl_chain_file.exists() {
            let mut bytes = fs::read(dir.join(format!("{}.crl.pem", ca.name)))?;
            bytes.extend_from_slice(&fs::read(dir.join("certs").join("chain.crt"))?);
            fs::write(&crl_chain_file, bytes)?;
            info!("{} created", crl_chain_file.display());
        }
        Ok(())
    }

    /// Copy the authority's trust chain into the leaf's directory.
    pub fn copy_chain(&self, ca: &Authority, cert: &Certificate, force: bool) -> Result<()> {
        if force {
            self.delete_old_files(cert, &["chain.crt"])?;
        }
        let from = self
            .executor
            .working_dir(ca.relative_path())?
            .join("certs")
            .join("chain.crt");
        let to = self
            .executor
            .working_dir(cert.relative_path())?
            .join("chain.crt");
        if !to.exists() {
            fs::copy(&from, &to)?;
        }
        Ok(())
    }

    /// Validate the leaf against the authority's trust chain. Fatal when
    /// verification fails.
    pub fn verify_cert(&self, ca: &Authority, cert: &Certificate) -> Result<()> {
        let cert_path = self
            .executor
            .working_dir(cert.relative_path())?
            .join(format!("{}.crt", cert.name));
        let chain_path = self
            .executor
            .working_dir(ca.relative_path())?
            .join("certs")
            .join("chain.crt");
        if !cert_path.exists() || !chain_path.exists() {
            return Err(Error::validation(format!(
                "cannot verify {}: certificate or chain file missing",
                cert.name
            )));
        }
        let cmd = vec![
            self.openssl.clone(),
            "verify".to_string(),
            "-CAfile".to_string(),
            chain_path.to_string_lossy().into_owned(),
            cert_path.to_string_lossy().into_owned(),
        ];
        self.executor.run(cert.relative_path(), &cmd)
    }

    /// On-disk revocation status, decided by the external verifier with
    /// CRL checking enabled: a failing verification means revoked.
    pub fn is_cert_revoked(&self, ca: &Authority, cert: &Certificate) -> Result<bool> {
        let crl_chain = self
            .executor
            .working_dir(ca.relative_path())?
            .join("certs")
            .join("crl-chain.crt");
        let cert_path = self
            .executor
            .working_dir(cert.relative_path())?
            .join(format!("{}.crt", cert.name));
        let cmd = vec![
            self.openssl.clone(),
            "verify".to_string(),
            "-crl_check".to_string(),
            "-CAfile".to_string(),
            crl_chain.to_string_lossy().into_owned(),
            cert_path.to_string_lossy().into_owned(),
        ];
        match self.executor.run(ca.relative_path(), &cmd) {
            Ok(()) => Ok(false),
            Err(Error::CommandFailed { .. }) => Ok(true),
            Err(other) => Err(other),
        }
    }

    /// Revoke the leaf through the authority. No-op when the verifier
    /// already reports it revoked; otherwise the CRL and CRL-chain are
    /// force-regenerated. Returns whether a revocation actually happened.
    pub fn revoke_cert(&self, ca: &Authority, cert: &Certificate) -> Result<bool> {
        if self.is_cert_revoked(ca, cert)? {
            info!("{} is already revoked", cert.name);
            return Ok(false);
        }
        let password = required_password(ca)?;
        let ca_dir = self.executor.working_dir(ca.relative_path())?;
        let cert_dir = self.executor.working_dir(cert.relative_path())?;
        let cmd = vec![
            self.openssl.clone(),
            "ca".to_string(),
            "-config".to_string(),
            ca_dir.join("ca.conf").to_string_lossy().into_owned(),
            "-revoke".to_string(),
            cert_dir
                .join(format!("{}.crt", cert.name))
                .to_string_lossy()
                .into_owned(),
            "-keyfile".to_string(),
            ca_dir
                .join(format!("{}.key", ca.name))
                .to_string_lossy()
                .into_owned(),
            "-cert".to_string(),
            ca_dir
                .join(format!("{}.crt", ca.name))
                .to_string_lossy()
                .into_owned(),
            "-passin".to_string(),
            format!("pass:{}", password),
        ];
        self.executor.run(ca.relative_path(), &cmd)?;
        info!("{} revoked", cert.name);
        self.generate_crl(ca, true)?;
        self.generate_crl_chain(ca, true)?;
        Ok(true)
    }

    /// Export the leaf's private keystore bundle (key + certificate +
    /// chain).
    pub fn generate_keystore(&self, cert: &Certificate, force: bool) -> Result<Freshness> {
        let password = required_password(cert)?;
        if force {
            self.delete_old_files(cert, &["keystore.p12"])?;
        }
        let cmd = vec![
            self.openssl.clone(),
            "pkcs12".to_string(),
            "-export".to_string(),
            "-out".to_string(),
            "keystore.p12".to_string(),
            "-inkey".to_string(),
            format!("{}.key", cert.name),
            "-in".to_string(),
            format!("{}.crt", cert.name),
            "-certfile".to_string(),
            "chain.crt".to_string(),
            "-passin".to_string(),
            format!("pass:{}", password),
            "-passout".to_string(),
            format!("pass:{}", password),
        ];
        self.executor
            .ensure(cert.relative_path(), &cmd, &["keystore.p12".to_string()])
    }

    /// Trust bundle holding the root certificate. Only roots produce one.
    pub fn generate_truststore(&self, ca: &Authority, force: bool) -> Result<Freshness> {
        let password = required_password(ca)?;
        let dir = self.executor.working_dir(ca.relative_path())?;
        fs::create_dir_all(dir.join("certs"))?;
        if force {
            self.delete_old_files(ca, &["certs/truststore.p12"])?;
        }
        let cmd = vec![
            self.openssl.clone(),
            "pkcs12".to_string(),
            "-export".to_string(),
            "-nokeys".to_string(),
            "-in".to_string(),
            format!("{}.crt", ca.name),
            "-out".to_string(),
            "certs/truststore.p12".to_string(),
            "-passout".to_string(),
            format!("pass:{}", password),
        ];
        self.executor.ensure(
            ca.relative_path(),
            &cmd,
            &["certs/truststore.p12".to_string()],
        )
    }

    /// Copy the forest root's trust bundle into the leaf's directory.
    pub fn copy_truststore(&self, root: &Authority, cert: &Certificate) -> Result<()> {
        let from = self
            .executor
            .working_dir(root.relative_path())?
            .join("certs")
            .join("truststore.p12");
        if !from.exists() {
            return Err(Error::validation(format!(
                "trust bundle of root {} is missing",
                root.name
            )));
        }
        let to = self
            .executor
            .working_dir(cert.relative_path())?
            .join("truststore.p12");
        fs::copy(&from, &to)?;
        info!("{} created", to.display());
        Ok(())
    }

    /// OCSP signer key/CSR/certificate for this authority, signed by
    /// itself. The signer key is reused; the signer certificate is
    /// re-issued whenever the authority's own certificate was fresh.
    pub fn generate_ocsp_signer(&self, ca: &Authority, force_cert: bool) -> Result<()> {
        required_password(ca)?;
        let subject = ocsp_subject(&ca.subject, &ca.name);
        let request = vec![
            self.openssl.clone(),
            "req".to_string(),
            "-new".to_string(),
            "-nodes".to_string(),
            "-subj".to_string(),
            subject,
            "-out".to_string(),
            format!("{}-ocsp-signer.csr", ca.name),
            "-keyout".to_string(),
            format!("{}-ocsp-signer.key", ca.name),
        ];
        self.executor.ensure(
            ca.relative_path(),
            &request,
            &[
                format!("{}-ocsp-signer.key", ca.name),
                format!("{}-ocsp-signer.csr", ca.name),
            ],
        )?;
        if force_cert {
            self.delete_old_files(ca, &[&format!("{}-ocsp-signer.crt", ca.name)])?;
        }
        let password = required_password(ca)?;
        let issue = vec![
            self.openssl.clone(),
            "ca".to_string(),
            "-batch".to_string(),
            "-keyfile".to_string(),
            format!("{}.key", ca.name),
            "-cert".to_string(),
            format!("{}.crt", ca.name),
            "-in".to_string(),
            format!("{}-ocsp-signer.csr", ca.name),
            "-out".to_string(),
            format!("{}-ocsp-signer.crt", ca.name),
            "-passin".to_string(),
            format!("pass:{}", password),
            "-config".to_string(),
            "ca.conf".to_string(),
        ];
        self.executor.ensure(
            ca.relative_path(),
            &issue,
            &[format!("{}-ocsp-signer.crt", ca.name)],
        )?;
        Ok(())
    }

    /// Argument list for the single responder process covering the whole
    /// forest: one (index, CA cert, signer cert, signer key) quadruple per
    /// authority plus the fixed listening port.
    pub fn responder_command(&self, cas: &[&Authority], port: u16) -> Result<Vec<String>> {
        let mut cmd = vec![self.openssl.clone(), "ocsp".to_string()];
        for ca in cas {
            let dir = self.executor.working_dir(ca.relative_path())?;
            cmd.push("-index".to_string());
            cmd.push(dir.join("certindex").to_string_lossy().into_owned());
            cmd.push("-CA".to_string());
            cmd.push(dir.join(format!("{}.crt", ca.name)).to_string_lossy().into_owned());
            cmd.push("-rsigner".to_string());
            cmd.push(
                dir.join(format!("{}-ocsp-signer.crt", ca.name))
                    .to_string_lossy()
                    .into_owned(),
            );
            cmd.push("-rkey".to_string());
            cmd.push(
                dir.join(format!("{}-ocsp-signer.key", ca.name))
                    .to_string_lossy()
                    .into_owned(),
            );
        }
        cmd.push("-port".to_string());
        cmd.push(port.to_string());
        cmd.push("-text".to_string());
        Ok(cmd)
    }

    /// Delete named files under the node's working directory, logging each
    /// one actually removed.
    pub fn delete_old_files(&self, node: &dyn PkiNode, names: &[&str]) -> Result<()> {
        let dir = self.executor.working_dir(node.relative_path())?;
        for name in names {
            let path = dir.join(name);
            if remove_if_exists(&path)? {
                info!("{} is deleted", path.display());
            }
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn required_password<'a>(node: &'a dyn PkiNode) -> Result<&'a str> {
    node.password()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::validation(format!("no password available for {}", node.name())))
}

/// Subject for the OCSP signer: the authority's subject with the CN
/// component replaced by `CN=<name> OCSP`.
fn ocsp_subject(subject: &str, name: &str) -> String {
    subject
        .split('/')
        .map(|part| {
            if part.starts_with("CN=") {
                format!("CN={} OCSP", name)
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
