//! Authority configuration-file templates.
//!
//! Renders the `ca.conf` consumed by the external toolkit's `ca`
//! subcommand (signing, CRL generation, revocation). The rendered text is
//! cheap and always reflects the current in-memory attributes of the
//! authority, including the network endpoints stamped at build time.

use crate::errors::{Error, Result};
use crate::store::Authority;

/// Render the `ca.conf` body for one authority.
///
/// Fails when the transient network fields have not been stamped yet; the
/// builder always stamps them before config-file assembly.
pub fn render_ca_config(ca: &Authority) -> Result<String> {
    let host = ca
        .host
        .as_deref()
        .ok_or_else(|| Error::validation(format!("network context not stamped for {}", ca.name)))?;
    let (port, ocsp_port) = match (ca.port, ca.ocsp_port) {
        (Some(port), Some(ocsp_port)) => (port, ocsp_port),
        _ => {
            return Err(Error::validation(format!(
                "network context not stamped for {}",
                ca.name
            )))
        }
    };

    let key_usage = match ca.key_usage.as_deref() {
        Some(usage) => format!("keyUsage = {}\n", usage),
        None => String::new(),
    };
    let (subject_alt_name, alt_names) = if ca.subject_alt_name.is_empty() {
        (String::new(), String::new())
    } else {
        let mut block = String::from("[alt_names]\n");
        for alt_name in &ca.subject_alt_name {
            block.push_str(&format!(" {}\n", alt_name));
        }
        ("subjectAltName = @alt_names\n".to_string(), block)
    };

    Ok(format!(
        "[ca]\n\
         default_ca = {name}\n\
         \n\
         [{name}]\n\
         dir = .\n\
         unique_subject = no\n\
         new_certs_dir = ./certs\n\
         certificate = ./{name}.crt\n\
         database = ./certindex\n\
         private_key = ./{name}.key\n\
         serial = ./certserial\n\
         default_days = {days}\n\
         default_md = sha256\n\
         policy = {name}_policy\n\
         x509_extensions = {name}_extensions\n\
         crlnumber = ./crlnumber\n\
         default_crl_days = {days}\n\
         \n\
         [{name}_policy]\n\
         commonName = supplied\n\
         stateOrProvinceName = optional\n\
         countryName = optional\n\
         emailAddress = optional\n\
         organizationName = optional\n\
         organizationalUnitName = optional\n\
         \n\
         [{name}_extensions]\n\
         basicConstraints = {basic_constraints}\n\
         {key_usage}\
         subjectKeyIdentifier = hash\n\
         authorityKeyIdentifier = keyid:always\n\
         {subject_alt_name}\
         extendedKeyUsage = {extended_key_usage}\n\
         crlDistributionPoints = URI:http://{host}:{port}/ca/{name}/{name}.crl\n\
         authorityInfoAccess = OCSP;URI:http://{host}:{ocsp_port}\n\
         \n\
         {alt_names}",
        name = ca.name,
        days = ca.days,
        basic_constraints = ca.basic_constraints(),
        key_usage = key_usage,
        subject_alt_name = subject_alt_name,
        extended_key_usage = ca.extended_key_usage(),
        host = host,
        port = port,
        ocsp_port = ocsp_port,
        alt_names = alt_names,
    ))
}
