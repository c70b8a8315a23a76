//! Persistence for the opaque credential bundle of the network session.
//!
//! Layout: one JSON document per entry (`creds.json`, key files, ...) inside
//! a single directory. Documents are never interpreted here. Names are opaque
//! too: characters that cannot appear in a file name are percent-encoded, so
//! `app-state-sync-key-AB/cd==` is stored as `app-state-sync-key-AB%2Fcd==.json`.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{errors::Error, Result};

const DOC_EXT: &str = "json";

/// Credential bundle needed to reconnect without re-pairing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthSession {
    docs: BTreeMap<String, Value>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.docs.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, doc: Value) {
        self.docs.insert(name.into(), doc);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.docs.keys().map(String::as_str)
    }

    /// Remove entries whose name can never be stored and return those names.
    pub fn drop_unstorable(&mut self) -> Vec<String> {
        let bad: Vec<String> = self
            .docs
            .keys()
            .filter(|n| encode_name(n).is_none())
            .cloned()
            .collect();
        for name in &bad {
            self.docs.remove(name);
        }
        bad
    }

    /// Apply a partial update in place. A `null` document deletes the entry.
    pub fn merge(&mut self, update: AuthSession) {
        for (name, doc) in update.docs {
            if doc.is_null() {
                self.docs.remove(&name);
            } else {
                self.docs.insert(name, doc);
            }
        }
    }
}

/// Directory-backed store for [`AuthSession`].
#[derive(Clone, Debug)]
pub struct AuthStore {
    dir: PathBuf,
}

impl AuthStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read the persisted bundle. `None` means the gateway needs pairing.
    pub async fn load(&self) -> Result<Option<AuthSession>> {
        let mut session = AuthSession::new();
        for (name, path) in self.doc_files().await? {
            let raw = tokio::fs::read(&path).await?;
            let doc: Value = serde_json::from_slice(&raw).map_err(|e| Error::InvalidPath {
                path: path.clone(),
                reason: format!("corrupt auth document: {e}"),
            })?;
            session.insert(name, doc);
        }

        if session.is_empty() {
            Ok(None)
        } else {
            Ok(Some(session))
        }
    }

    /// Overwrite persisted material so the directory mirrors `session` exactly.
    ///
    /// Each document goes through a temp file + rename; documents on disk that
    /// are no longer part of the session are removed afterwards. A document
    /// that cannot be written does not stop the others: every storable
    /// document is written and stale ones pruned before the first error is
    /// returned.
    pub async fn save(&self, session: &AuthSession) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut first_err = None;
        for (name, doc) in &session.docs {
            if let Err(e) = self.write_doc(name, doc).await {
                tracing::warn!(doc = %name, error = %e, "auth document not saved");
                first_err.get_or_insert(e);
            }
        }

        for (name, path) in self.doc_files().await? {
            if !session.docs.contains_key(&name) {
                remove_if_exists(&path).await?;
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => {
                tracing::debug!(docs = session.len(), dir = %self.dir.display(), "auth session saved");
                Ok(())
            }
        }
    }

    /// Remove every persisted document (used after a logout).
    pub async fn clear(&self) -> Result<()> {
        for (_, path) in self.doc_files().await? {
            remove_if_exists(&path).await?;
        }
        Ok(())
    }

    async fn write_doc(&self, name: &str, doc: &Value) -> Result<()> {
        let file = encode_name(name).ok_or_else(|| Error::InvalidPath {
            path: self.dir.clone(),
            reason: "empty document name".to_string(),
        })?;
        let path = self.dir.join(format!("{file}.{DOC_EXT}"));
        let tmp = self.dir.join(format!(".{file}.{DOC_EXT}.tmp"));
        tokio::fs::write(&tmp, serde_json::to_vec(doc)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn doc_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut rd = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        while let Some(ent) = rd.next_entry().await? {
            let path = ent.path();
            if !ent.file_type().await?.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            let Some(name) = file_name
                .strip_suffix(&format!(".{DOC_EXT}"))
                .and_then(decode_name)
            else {
                continue;
            };
            out.push((name, path.clone()));
        }
        Ok(out)
    }
}

/// File stem for a document name. `None` only for the empty name.
fn encode_name(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.char_indices() {
        match c {
            '%' | '/' | '\\' | ':' | '\0' => out.push_str(&format!("%{:02X}", c as u32)),
            '.' if i == 0 => out.push_str("%2E"),
            c => out.push(c),
        }
    }
    Some(out)
}

fn decode_name(stem: &str) -> Option<String> {
    let mut out = String::with_capacity(stem.len());
    let mut rest = stem;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let hex = rest.get(pos + 1..pos + 3)?;
        out.push(char::from(u8::from_str_radix(hex, 16).ok()?));
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    (!out.is_empty()).then_some(out)
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(pairs: &[(&str, Value)]) -> AuthSession {
        let mut s = AuthSession::new();
        for (k, v) in pairs {
            s.insert(*k, v.clone());
        }
        s
    }

    #[tokio::test]
    async fn missing_directory_means_no_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStore::new(tmp.path().join("never-created"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load_returns_the_same_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStore::new(tmp.path());
        let s = session(&[
            ("creds", json!({"me": {"id": "5511@s.whatsapp.net"}})),
            ("pre-key-1", json!({"private": "AAAA"})),
        ]);

        store.save(&s).await.unwrap();
        assert!(tmp.path().join("creds.json").is_file());
        assert_eq!(store.load().await.unwrap(), Some(s));
    }

    #[tokio::test]
    async fn save_removes_documents_dropped_from_the_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStore::new(tmp.path());
        let mut s = session(&[("creds", json!(1)), ("pre-key-7", json!(2))]);
        store.save(&s).await.unwrap();

        s.merge(session(&[("pre-key-7", Value::Null), ("creds", json!(3))]));
        store.save(&s).await.unwrap();

        assert!(!tmp.path().join("pre-key-7.json").exists());
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("creds"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn clear_leaves_an_unpaired_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStore::new(tmp.path());
        store
            .save(&session(&[("creds", json!({"k": "v"}))]))
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn document_names_cannot_escape_the_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStore::new(tmp.path().join("auth"));
        let s = session(&[("../evil", json!(true))]);
        store.save(&s).await.unwrap();

        assert!(!tmp.path().join("evil.json").exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
        assert_eq!(store.load().await.unwrap(), Some(s));
    }

    #[tokio::test]
    async fn key_ids_with_slashes_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStore::new(tmp.path());
        let s = session(&[
            ("app-state-sync-key-AB/cd==", json!({"keyData": "x"})),
            ("session-5511:2", json!({"n": 1})),
            ("100%", json!(2)),
        ]);
        store.save(&s).await.unwrap();

        assert!(tmp.path().join("app-state-sync-key-AB%2Fcd==.json").is_file());
        assert_eq!(store.load().await.unwrap(), Some(s));
    }

    #[tokio::test]
    async fn one_unstorable_document_does_not_block_the_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStore::new(tmp.path());
        store.save(&session(&[("old", json!(0))])).await.unwrap();

        let s = session(&[("", json!("nameless")), ("creds", json!({"me": "latest"}))]);
        let err = store.save(&s).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.get("creds"), Some(&json!({"me": "latest"})));
        assert_eq!(loaded.get("old"), None);
    }

    #[test]
    fn unstorable_names_are_dropped_from_a_session() {
        let mut s = session(&[("", json!(1)), ("creds", json!(2))]);
        assert_eq!(s.drop_unstorable(), vec![String::new()]);
        assert_eq!(s.names().collect::<Vec<_>>(), vec!["creds"]);
    }

    #[tokio::test]
    async fn corrupt_documents_are_reported() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("creds.json"), b"{not json").unwrap();
        let err = AuthStore::new(tmp.path()).load().await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
    }
}
