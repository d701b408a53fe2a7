//! Vault loading tests

use auth::{AuthError, Signer};
use std::io::Write;
use std::path::Path;

fn write_vault(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(contents.as_bytes()).expect("write vault");
    file
}

#[test]
fn loads_complete_vault() {
    let file = write_vault(
        r#"{
            "binance_testnet": {
                "api_key": "test-key",
                "secret_key": "test-secret",
                "use_testnet": false
            }
        }"#,
    );
    let signer = Signer::from_vault(file.path()).expect("load");
    assert_eq!(signer.api_key(), "test-key");
    assert!(!signer.is_testnet());
    assert_eq!(signer.rest_base(), "api.binance.com");
}

#[test]
fn use_testnet_defaults_to_true() {
    let file = write_vault(
        r#"{
            "binance_testnet": {
                "api_key": "k",
                "secret_key": "s"
            }
        }"#,
    );
    let signer = Signer::from_vault(file.path()).expect("load");
    assert!(signer.is_testnet());
}

#[test]
fn missing_file_is_credentials_unavailable() {
    let err = Signer::from_vault(Path::new("/nonexistent/vault.json")).unwrap_err();
    assert!(matches!(err, AuthError::CredentialsUnavailable { .. }));
}

#[test]
fn malformed_vault_is_credentials_unavailable() {
    let file = write_vault("{ nope");
    let err = Signer::from_vault(file.path()).unwrap_err();
    assert!(matches!(err, AuthError::CredentialsUnavailable { .. }));
}

#[test]
fn missing_entry_is_credentials_unavailable() {
    let file = write_vault(r#"{ "other_venue": {} }"#);
    let err = Signer::from_vault(file.path()).unwrap_err();
    assert!(matches!(err, AuthError::CredentialsUnavailable { .. }));
}

#[test]
fn empty_keys_are_rejected() {
    let file = write_vault(
        r#"{
            "binance_testnet": { "api_key": "", "secret_key": "s" }
        }"#,
    );
    let err = Signer::from_vault(file.path()).unwrap_err();
    assert!(matches!(err, AuthError::CredentialsUnavailable { .. }));
}
