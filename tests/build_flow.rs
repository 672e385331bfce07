//! End-to-end orchestration tests against a scripted stand-in for the
//! external toolkit. The stand-in logs every invocation, creates the
//! artifacts the real toolkit would create, and models revocation with a
//! marker file so `verify -crl_check` fails exactly for revoked
//! certificates.

#![cfg(unix)]

use certforge::configs::AppConfig;
use certforge::engine::Engine;
use certforge::store::{AuthorityRecord, Certificate};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

struct Harness {
    #[allow(dead_code)]
    dir: tempfile::TempDir,
    base: PathBuf,
    log: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_path_buf();
        let bin = base.join("bin");
        fs::create_dir_all(&bin).unwrap();
        let log = base.join("invocations.log");
        let state = base.join("state");
        fs::create_dir_all(&state).unwrap();

        let script = format!(
            r#"#!/bin/sh
log="{log}"
state="{state}"
echo "$@" >> "$log"
cmd="$1"
out=""; keyout=""; revoke=""; crlcheck=0; last=""
prev=""
for a in "$@"; do
  case "$prev" in
    -out) out="$a" ;;
    -keyout) keyout="$a" ;;
    -revoke) revoke="$a" ;;
  esac
  case "$a" in
    -crl_check) crlcheck=1 ;;
  esac
  prev="$a"
  last="$a"
done
case "$cmd" in
  genrsa)
    echo "KEY" > "$out"
    ;;
  req)
    if [ -n "$keyout" ]; then echo "KEY" > "$keyout"; fi
    if [ -n "$out" ]; then echo "PEM $(basename "$out")" > "$out"; fi
    ;;
  ca)
    if [ -n "$revoke" ]; then
      touch "$state/revoked-$(basename "$revoke")"
    elif [ -n "$out" ]; then
      echo "PEM $(basename "$out")" > "$out"
    fi
    ;;
  crl)
    echo "DER" > "$out"
    ;;
  verify)
    if [ "$crlcheck" = "1" ] && [ -e "$state/revoked-$(basename "$last")" ]; then
      echo "lookup: certificate revoked" >&2
      exit 2
    fi
    ;;
  pkcs12)
    echo "P12" > "$out"
    ;;
  ocsp)
    exec sleep 600
    ;;
esac
exit 0
"#,
            log = log.display(),
            state = state.display(),
        );
        let script_path = bin.join("openssl");
        fs::write(&script_path, script).unwrap();
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755)).unwrap();

        Harness { dir, base, log }
    }

    fn config(&self) -> AppConfig {
        AppConfig {
            hostname: "localhost".to_string(),
            ca_path: self.base.join("ca"),
            openssl_path: self.base.join("bin"),
            default_password: "changeit".to_string(),
            server_port: 8080,
            ocsp_port: 8181,
            recreate: false,
            db_path: self.base.join("certforge-db.toml"),
            rootca: root_record(),
        }
    }

    fn invocations(&self) -> Vec<String> {
        match fs::read_to_string(&self.log) {
            Ok(text) => text.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn ca_file(&self, relative: &str) -> PathBuf {
        self.base.join("ca").join(relative)
    }
}

fn root_record() -> AuthorityRecord {
    AuthorityRecord {
        name: "rootca".to_string(),
        key_size: 8192,
        days: 1826,
        subject: "/C=US/ST=California/L=San Francisco/O=Test/CN=Root CA".to_string(),
        relative_path: None,
        path_len_constraint: Some(1),
        ca_constraint: true,
        client_auth: false,
        key_usage: None,
        password: None,
        signing_ca_name: None,
        subject_alt_name: Vec::new(),
        certs: Vec::new(),
        ca: Vec::new(),
    }
}

fn intermediate_record(name: &str) -> AuthorityRecord {
    AuthorityRecord {
        name: name.to_string(),
        key_size: 4096,
        days: 730,
        subject: format!("/C=US/O=Test/CN={} CA", name),
        relative_path: None,
        path_len_constraint: Some(0),
        ca_constraint: true,
        client_auth: false,
        key_usage: None,
        password: None,
        signing_ca_name: None,
        subject_alt_name: Vec::new(),
        certs: Vec::new(),
        ca: Vec::new(),
    }
}

fn leaf_cert(name: &str) -> Certificate {
    Certificate {
        name: name.to_string(),
        key_size: 2048,
        subject: format!("/CN={}.example.com", name),
        password: None,
        revoked: false,
        relative_path: None,
        signing_ca_name: None,
    }
}

fn producing(lines: &[String]) -> Vec<&String> {
    // `verify` checks and the responder launch produce no files
    lines
        .iter()
        .filter(|l| !l.starts_with("verify") && !l.starts_with("ocsp"))
        .collect()
}

#[test]
fn test_bootstrap_builds_the_root() {
    let harness = Harness::new();
    let engine = Engine::bootstrap(harness.config()).unwrap();

    assert!(harness.ca_file("rootca/rootca.key").exists());
    assert!(harness.ca_file("rootca/rootca.crt").exists());
    assert!(harness.ca_file("rootca/certs/truststore.p12").exists());
    assert!(harness.ca_file("rootca/rootca.crl.pem").exists());
    assert!(harness.ca_file("rootca/rootca.crl").exists());
    assert!(harness.ca_file("rootca/certs/chain.crt").exists());
    assert!(harness.ca_file("rootca/certs/crl-chain.crt").exists());
    assert!(harness.ca_file("rootca/rootca-ocsp-signer.key").exists());
    assert!(harness.ca_file("rootca/rootca-ocsp-signer.crt").exists());
    assert!(harness.config().db_path.exists());

    // sequential-serial bookkeeping starts from scratch
    assert_eq!(
        fs::read_to_string(harness.ca_file("rootca/certindex")).unwrap(),
        ""
    );
    assert_eq!(
        fs::read_to_string(harness.ca_file("rootca/certserial")).unwrap(),
        "1000"
    );
    assert_eq!(
        fs::read_to_string(harness.ca_file("rootca/crlnumber")).unwrap(),
        "1000"
    );

    let conf = fs::read_to_string(harness.ca_file("rootca/ca.conf")).unwrap();
    assert!(conf.contains("default_ca = rootca"));
    assert!(conf.contains("authorityInfoAccess = OCSP;URI:http://localhost:8181"));

    assert!(engine.responder().is_running());
    engine.shutdown();
}

#[test]
fn test_second_run_produces_nothing() {
    let harness = Harness::new();
    {
        let engine = Engine::bootstrap(harness.config()).unwrap();
        engine
            .insert_authority("rootca", intermediate_record("mid"))
            .unwrap();
        engine.insert_certificate("mid", leaf_cert("leaf")).unwrap();
        engine.shutdown();
    }
    let first_run = harness.invocations();

    let engine = Engine::bootstrap(harness.config()).unwrap();
    engine.shutdown();
    let all = harness.invocations();
    let second_run = &all[first_run.len()..];

    assert!(
        producing(second_run).is_empty(),
        "unexpected producing invocations on rerun: {:?}",
        producing(second_run)
    );
}

#[test]
fn test_chain_is_ancestor_first_self_last() {
    let harness = Harness::new();
    let engine = Engine::bootstrap(harness.config()).unwrap();
    engine
        .insert_authority("rootca", intermediate_record("mid"))
        .unwrap();
    engine.insert_certificate("mid", leaf_cert("leaf")).unwrap();
    engine.shutdown();

    let root_crt = fs::read(harness.ca_file("rootca/rootca.crt")).unwrap();
    let mid_crt = fs::read(harness.ca_file("mid/mid.crt")).unwrap();

    let mut expected = root_crt.clone();
    expected.extend_from_slice(&mid_crt);
    assert_eq!(
        fs::read(harness.ca_file("mid/certs/chain.crt")).unwrap(),
        expected
    );
    // the leaf receives its authority's chain verbatim
    assert_eq!(fs::read(harness.ca_file("leaf/chain.crt")).unwrap(), expected);
    // and the forest root's trust bundle
    assert_eq!(
        fs::read(harness.ca_file("leaf/truststore.p12")).unwrap(),
        fs::read(harness.ca_file("rootca/certs/truststore.p12")).unwrap()
    );
}

#[test]
fn test_fresh_key_cascades_without_touching_neighbors() {
    let harness = Harness::new();
    {
        let engine = Engine::bootstrap(harness.config()).unwrap();
        engine
            .insert_authority("rootca", intermediate_record("mid"))
            .unwrap();
        engine
            .insert_authority("rootca", intermediate_record("sibling"))
            .unwrap();
        engine.shutdown();
    }
    let before = harness.invocations();

    // a vanished key forces the whole dependent artifact column
    fs::remove_file(harness.ca_file("mid/mid.key")).unwrap();
    let engine = Engine::bootstrap(harness.config()).unwrap();
    engine.shutdown();
    let after = harness.invocations();
    // the responder launch names every authority; only producing
    // invocations are relevant to the cascade
    let fresh = producing(&after[before.len()..]);

    let hits = |needle: &str| {
        fresh
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    };
    assert_eq!(hits("mid.key 4096"), 1, "key must be regenerated");
    assert_eq!(hits("-out mid.csr"), 1, "csr must be regenerated");
    assert_eq!(hits("mid.crl.pem"), 2, "crl must be regenerated (gencrl + der)");
    assert!(
        fresh.iter().any(|l| l.contains("certs/mid.crt")),
        "certificate must be re-signed"
    );
    assert!(
        fresh.iter().any(|l| l.contains("mid-ocsp-signer.crt") && l.starts_with("ca")),
        "ocsp signer certificate must be re-issued"
    );
    // neither the parent nor the sibling regenerates anything
    assert_eq!(hits("rootca.key"), 0);
    assert_eq!(hits("-x509"), 0);
    assert_eq!(hits("sibling."), 0);
}

#[test]
fn test_revocation_flow() {
    let harness = Harness::new();
    let engine = Engine::bootstrap(harness.config()).unwrap();
    engine
        .insert_authority("rootca", intermediate_record("mid"))
        .unwrap();
    engine.insert_certificate("mid", leaf_cert("leaf")).unwrap();

    assert!(!engine.is_certificate_revoked("mid", "leaf").unwrap());
    let before = harness.invocations();

    engine.revoke_certificate("mid", "leaf").unwrap();
    let after = harness.invocations();
    let revocation_lines = &after[before.len()..];
    let gencrl_count = revocation_lines
        .iter()
        .filter(|l| l.contains("-gencrl"))
        .count();
    assert_eq!(gencrl_count, 1, "CRL regenerated exactly once");
    assert!(revocation_lines.iter().any(|l| l.contains("-revoke")));
    assert!(engine.is_certificate_revoked("mid", "leaf").unwrap());

    // revoking again is a no-op: no further toolkit invocations at all
    let before_second = harness.invocations();
    engine.revoke_certificate("mid", "leaf").unwrap();
    assert_eq!(harness.invocations().len(), before_second.len());

    // revoking an unknown certificate is a caller error
    assert!(engine.revoke_certificate("mid", "ghost").is_err());
    engine.shutdown();
}

#[test]
fn test_duplicate_insert_is_noop() {
    let harness = Harness::new();
    let engine = Engine::bootstrap(harness.config()).unwrap();
    engine
        .insert_authority("rootca", intermediate_record("mid"))
        .unwrap();
    let before = harness.invocations();

    let mut dup = intermediate_record("mid");
    dup.subject = "/CN=impostor".to_string();
    engine.insert_authority("rootca", dup).unwrap();
    // nothing rebuilt, nothing restarted
    assert_eq!(harness.invocations().len(), before.len());
    assert_eq!(
        engine.clean_authority("mid").unwrap().subject,
        "/C=US/O=Test/CN=mid CA"
    );
    engine.shutdown();
}

#[test]
fn test_clean_projection_over_live_engine() {
    let harness = Harness::new();
    let engine = Engine::bootstrap(harness.config()).unwrap();
    engine
        .insert_authority("rootca", intermediate_record("mid"))
        .unwrap();
    engine.insert_certificate("mid", leaf_cert("leaf")).unwrap();

    let forest = engine.clean_forest();
    assert_eq!(forest.len(), 2);
    for view in &forest {
        assert!(view.password.is_none());
        assert!(view.relative_path.is_none());
        assert!(view.certs.is_empty());
        assert!(view.ca.is_empty());
    }
    let mid = engine.clean_authority("mid").unwrap();
    assert_eq!(mid.signing_ca_name.as_deref(), Some("rootca"));
    engine.shutdown();
}

#[test]
fn test_recreate_purges_everything_but_keys() {
    let harness = Harness::new();
    {
        let engine = Engine::bootstrap(harness.config()).unwrap();
        engine.shutdown();
    }
    let key_before = fs::read(harness.ca_file("rootca/rootca.key")).unwrap();
    let before = harness.invocations();

    let mut config = harness.config();
    config.recreate = true;
    let engine = Engine::bootstrap(config).unwrap();
    engine.shutdown();

    let fresh = &harness.invocations()[before.len()..];
    // the self-signed certificate came back, the key did not move
    assert!(fresh.iter().any(|l| l.contains("-x509")));
    assert!(!fresh.iter().any(|l| l.starts_with("genrsa")));
    assert_eq!(
        fs::read(harness.ca_file("rootca/rootca.key")).unwrap(),
        key_before
    );
    assert!(harness.ca_file("rootca/certs/truststore.p12").exists());
}

#[test]
fn test_database_round_trips_the_tree() {
    let harness = Harness::new();
    {
        let engine = Engine::bootstrap(harness.config()).unwrap();
        engine
            .insert_authority("rootca", intermediate_record("mid"))
            .unwrap();
        engine.insert_certificate("mid", leaf_cert("leaf")).unwrap();
        engine.revoke_certificate("mid", "leaf").unwrap();
        engine.shutdown();
    }

    let db = fs::read_to_string(harness.config().db_path).unwrap();
    assert!(db.contains("name = \"rootca\""));
    assert!(db.contains("name = \"mid\""));
    assert!(db.contains("revoked = true"));

    // a fresh engine reloads the tree from the database
    let engine = Engine::bootstrap(harness.config()).unwrap();
    let mid = engine.clean_authority("mid").unwrap();
    assert_eq!(mid.signing_ca_name.as_deref(), Some("rootca"));
    // and still considers the leaf revoked without re-revoking it
    assert!(engine.is_certificate_revoked("mid", "leaf").unwrap());
    engine.shutdown();
}
