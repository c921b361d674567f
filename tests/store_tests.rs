//! Tests for the credential store.
//!
//! Tests cover: CRUD scenarios, partial updates, error kinds, persistence,
//! and id stability under arbitrary updates.

#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use sshelf::store::Database;
use sshelf::{CredentialStore, ErrorKind, NewProfile, ProfileUpdate, ServerProfile};

fn store() -> CredentialStore {
    CredentialStore::open_in_memory().unwrap()
}

/// Test the basic add/get scenario on an empty store.
#[test]
fn test_add_then_get_returns_all_fields() {
    let store = store();
    let id = store
        .add(NewProfile::new("db1", 22, "admin").with_password("secret"))
        .unwrap();
    assert_eq!(id, 1, "First id in an empty store should be 1");

    let profile = store.get(1).unwrap();
    assert_eq!(
        profile,
        ServerProfile {
            id: 1,
            hostname: "db1".to_string(),
            port: 22,
            username: "admin".to_string(),
            password: Some("secret".to_string()),
            private_key_path: None,
        }
    );
}

/// Test that a partial update changes only the named field.
#[test]
fn test_update_port_only() {
    let store = store();
    let id = store
        .add(NewProfile::new("db1", 22, "admin").with_password("secret"))
        .unwrap();

    let update = ProfileUpdate {
        port: Some(2222),
        ..ProfileUpdate::default()
    };
    store.update(id, &update).unwrap();

    let profile = store.get(id).unwrap();
    assert_eq!(profile.port, 2222);
    assert_eq!(profile.hostname, "db1");
    assert_eq!(profile.username, "admin");
    assert_eq!(profile.password.as_deref(), Some("secret"));
}

/// Test that renaming a host leaves every other field untouched.
#[test]
fn test_update_hostname_only() {
    let store = store();
    let id = store
        .add(NewProfile::new("db1", 22, "admin").with_password("secret"))
        .unwrap();
    let before = store.get(id).unwrap();

    let update = ProfileUpdate {
        hostname: Some("db1.local".to_string()),
        ..ProfileUpdate::default()
    };
    store.update(id, &update).unwrap();

    let after = store.get(id).unwrap();
    assert_eq!(
        after,
        ServerProfile {
            hostname: "db1.local".to_string(),
            ..before
        }
    );
}

/// Test that repeated list calls agree when nothing is written in between.
#[test]
fn test_list_is_stable() {
    let store = store();
    for host in ["a", "b", "c"] {
        store.add(NewProfile::new(host, 22, "u")).unwrap();
    }
    assert_eq!(store.list().unwrap(), store.list().unwrap());
}

/// Test that an update with no fields is rejected and changes nothing.
#[test]
fn test_empty_update_is_validation_error() {
    let store = store();
    let id = store.add(NewProfile::new("db1", 22, "admin")).unwrap();
    let before = store.get(id).unwrap();

    let err = store.update(id, &ProfileUpdate::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(store.get(id).unwrap(), before);
}

/// Test get/update/delete on unknown ids.
#[test]
fn test_unknown_id_is_not_found() {
    let store = store();
    assert_eq!(store.get(99).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(store.delete(99).unwrap_err().kind(), ErrorKind::NotFound);

    let update = ProfileUpdate {
        hostname: Some("x".to_string()),
        ..ProfileUpdate::default()
    };
    assert_eq!(
        store.update(99, &update).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

/// Test that a deleted profile is gone and its id is not reused by list.
#[test]
fn test_delete_removes_profile() {
    let store = store();
    let a = store.add(NewProfile::new("a", 22, "u")).unwrap();
    let b = store.add(NewProfile::new("b", 22, "u")).unwrap();

    store.delete(a).unwrap();

    assert_eq!(store.get(a).unwrap_err().kind(), ErrorKind::NotFound);
    let ids: Vec<i64> = store.list().unwrap().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![b]);
}

/// Test that list is empty on a fresh store and ordered by id otherwise.
#[test]
fn test_list_in_id_order() {
    let store = store();
    assert!(store.list().unwrap().is_empty());

    for host in ["c", "a", "b"] {
        store.add(NewProfile::new(host, 22, "u")).unwrap();
    }
    let hosts: Vec<String> = store
        .list()
        .unwrap()
        .into_iter()
        .map(|p| p.hostname)
        .collect();
    assert_eq!(hosts, vec!["c", "a", "b"]);
}

/// Test required-field validation on add.
#[test]
fn test_add_rejects_missing_fields() {
    let store = store();
    let cases = [
        NewProfile::new("", 22, "admin"),
        NewProfile::new("db1", 22, "  "),
        NewProfile::new("db1", 0, "admin"),
    ];
    for case in cases {
        let err = store.add(case.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "case {:?}", case);
    }
    assert!(store.list().unwrap().is_empty());
}

/// Test that strict mode refuses dual credentials and default mode keeps both.
#[test]
fn test_dual_credentials_policy() {
    let both = NewProfile::new("db1", 22, "admin")
        .with_password("pw")
        .with_key("/home/admin/.ssh/id_ed25519");

    let lenient = store();
    let id = lenient.add(both.clone()).unwrap();
    let stored = lenient.get(id).unwrap();
    assert!(stored.has_dual_credentials());
    assert_eq!(stored.auth_label(), "password");

    let strict = store().strict_credentials(true);
    assert_eq!(
        strict.add(both).unwrap_err().kind(),
        ErrorKind::Validation
    );
}

/// Test that surrounding whitespace is rejected on add and update, not trimmed.
#[test]
fn test_surrounding_whitespace_is_rejected() {
    let store = store();
    let err = store.add(NewProfile::new(" db1", 22, "admin")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(store.list().unwrap().is_empty());

    let id = store.add(NewProfile::new("db1", 22, "admin")).unwrap();
    let update = ProfileUpdate {
        username: Some("admin\n".to_string()),
        ..ProfileUpdate::default()
    };
    assert_eq!(
        store.update(id, &update).unwrap_err().kind(),
        ErrorKind::Validation
    );
    assert_eq!(store.get(id).unwrap().username, "admin");
}

/// Test that an id column in update pairs is ignored.
#[test]
fn test_update_pairs_ignore_id() {
    let store = store();
    let id = store.add(NewProfile::new("db1", 22, "admin")).unwrap();

    let update = ProfileUpdate::from_pairs([("id", "500"), ("hostname", "db2")]).unwrap();
    store.update(id, &update).unwrap();

    let profile = store.get(id).unwrap();
    assert_eq!(profile.id, id);
    assert_eq!(profile.hostname, "db2");
    assert_eq!(store.get(500).unwrap_err().kind(), ErrorKind::NotFound);
}

/// Test that profiles survive reopening an on-disk store.
#[test]
fn test_file_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profiles").join("servers.db");

    let id = {
        let store = CredentialStore::open(&path).unwrap();
        store
            .add(NewProfile::new("web", 2200, "deploy").with_key("/keys/deploy"))
            .unwrap()
    };

    let reopened = CredentialStore::with_database(Database::open(&path).unwrap()).unwrap();
    let profile = reopened.get(id).unwrap();
    assert_eq!(profile.connection_string(), "deploy@web:2200");
    assert_eq!(profile.private_key_path.as_deref(), Some("/keys/deploy"));
}

fn hostname() -> impl Strategy<Value = String> {
    "[a-z]([a-z0-9. -]{0,29}[a-z0-9])?"
}

fn username() -> impl Strategy<Value = String> {
    "[a-z_]([a-z0-9_ ]{0,14}[a-z0-9_])?"
}

fn credential() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[ -~]{1,24}")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any valid profile reads back exactly as written.
    #[test]
    fn test_prop_add_get_round_trip(
        host in hostname(),
        port in 1u16..,
        user in username(),
        password in credential(),
        key in credential(),
    ) {
        let store = store();
        let new = NewProfile {
            hostname: host,
            port,
            username: user,
            password,
            private_key_path: key,
        };
        let id = store.add(new.clone()).unwrap();
        let got = store.get(id).unwrap();
        prop_assert_eq!(got.id, id);
        prop_assert_eq!(got.fields(), new);
    }

    /// No sequence of updates changes a profile's id.
    #[test]
    fn test_prop_update_never_changes_id(
        hosts in proptest::collection::vec(hostname(), 1..5),
        ports in proptest::collection::vec(1u16.., 1..5),
    ) {
        let store = store();
        let id = store.add(NewProfile::new("origin", 22, "root")).unwrap();
        for (host, port) in hosts.iter().zip(ports.iter()) {
            let port = port.to_string();
            let update = ProfileUpdate::from_pairs([
                ("id", "0"),
                ("hostname", host.as_str()),
                ("port", port.as_str()),
            ])
            .unwrap();
            store.update(id, &update).unwrap();
        }
        let all = store.list().unwrap();
        prop_assert_eq!(all.len(), 1);
        prop_assert_eq!(all[0].id, id);
    }
}
