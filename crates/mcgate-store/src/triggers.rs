//! Trigger metadata attached out-of-band to a stored object.
//!
//! The record lives in a sidecar file next to the object's data file and maps each of the
//! four trigger kinds to an ordered, comma-separated handler list. Unset triggers are
//! persisted as the literal `"None"`.

use std::{
    fmt,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{StoreError, StoreResult, io_error};

const SIDECAR_SUFFIX: &str = ".triggers";
const UNSET: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    OnGet,
    OnPut,
    OnDelete,
    OnTimer,
}

impl Trigger {
    pub const ALL: [Trigger; 4] = [
        Trigger::OnGet,
        Trigger::OnPut,
        Trigger::OnDelete,
        Trigger::OnTimer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::OnGet => "onget",
            Trigger::OnPut => "onput",
            Trigger::OnDelete => "ondelete",
            Trigger::OnTimer => "ontimer",
        }
    }

    /// Trigger fired by a storage request method. Timers have no request method.
    pub fn from_method(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(Trigger::OnGet),
            "PUT" => Some(Trigger::OnPut),
            "DELETE" => Some(Trigger::OnDelete),
            _ => None,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Trigger::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown trigger '{s}'"))
    }
}

/// Ordered handler names bound to one trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct HandlerList(Vec<String>);

impl HandlerList {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Parses a comma-separated list; `"None"` and blank input mean no handlers.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == UNSET {
            return Self::default();
        }
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Drops every occurrence of the given names, keeping the order of the rest.
    pub fn remove_all(&mut self, names: &HandlerList) {
        self.0.retain(|name| !names.0.contains(name));
    }
}

impl fmt::Display for HandlerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str(UNSET)
        } else {
            f.write_str(&self.0.join(","))
        }
    }
}

impl From<String> for HandlerList {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<HandlerList> for String {
    fn from(list: HandlerList) -> Self {
        list.to_string()
    }
}

/// The four-trigger record. `Default` is every trigger unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMap {
    #[serde(default)]
    pub onget: HandlerList,
    #[serde(default)]
    pub onput: HandlerList,
    #[serde(default)]
    pub ondelete: HandlerList,
    #[serde(default)]
    pub ontimer: HandlerList,
}

impl TriggerMap {
    pub fn get(&self, trigger: Trigger) -> &HandlerList {
        match trigger {
            Trigger::OnGet => &self.onget,
            Trigger::OnPut => &self.onput,
            Trigger::OnDelete => &self.ondelete,
            Trigger::OnTimer => &self.ontimer,
        }
    }

    pub fn get_mut(&mut self, trigger: Trigger) -> &mut HandlerList {
        match trigger {
            Trigger::OnGet => &mut self.onget,
            Trigger::OnPut => &mut self.onput,
            Trigger::OnDelete => &mut self.ondelete,
            Trigger::OnTimer => &mut self.ontimer,
        }
    }

    pub fn set(&mut self, trigger: Trigger, handlers: HandlerList) {
        *self.get_mut(trigger) = handlers;
    }

    pub fn clear(&mut self, trigger: Trigger) {
        self.set(trigger, HandlerList::default());
    }

    pub fn is_unset(&self) -> bool {
        Trigger::ALL.into_iter().all(|t| self.get(t).is_empty())
    }
}

/// Location of the trigger record for an object's data file.
pub fn sidecar_path(data_file: &Path) -> PathBuf {
    let mut raw = data_file.as_os_str().to_owned();
    raw.push(SIDECAR_SUFFIX);
    PathBuf::from(raw)
}

/// Reads the trigger record of an object. A missing or empty record yields `None`.
pub fn read_triggers(data_file: &Path) -> StoreResult<Option<TriggerMap>> {
    let path = sidecar_path(data_file);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(path, err)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Metadata { path, source })
}

/// Replaces the trigger record of an object.
///
/// The record is written to a temporary file in the same directory and renamed over the
/// sidecar, so readers observe either the old or the new mapping.
pub fn write_triggers(data_file: &Path, map: &TriggerMap) -> StoreResult<()> {
    let path = sidecar_path(data_file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let bytes = serde_json::to_vec(map).map_err(|source| StoreError::Metadata {
        path: path.clone(),
        source,
    })?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;
    tmp.write_all(&bytes).map_err(|e| io_error(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(tmp.path(), e))?;
    tmp.persist(&path).map_err(|e| io_error(&path, e.error))?;
    tracing::debug!(path = %path.display(), "trigger metadata written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_record_reads_as_none() {
        let dir = TempDir::new().expect("tmp");
        let data = dir.path().join("obj.data");
        assert_eq!(read_triggers(&data).expect("read"), None);
    }

    #[test]
    fn round_trip_keeps_unset_triggers() {
        let dir = TempDir::new().expect("tmp");
        let data = dir.path().join("obj.data");
        let mut map = TriggerMap::default();
        map.set(Trigger::OnPut, HandlerList::parse("a.mc, b.mc"));

        write_triggers(&data, &map).expect("write");
        let raw = fs::read_to_string(sidecar_path(&data)).expect("raw");
        assert!(raw.contains(r#""onget":"None""#), "{raw}");
        assert!(raw.contains(r#""onput":"a.mc,b.mc""#), "{raw}");

        let loaded = read_triggers(&data).expect("read").expect("present");
        assert_eq!(loaded, map);
        assert!(loaded.ontimer.is_empty());
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let dir = TempDir::new().expect("tmp");
        let data = dir.path().join("obj.data");
        fs::write(sidecar_path(&data), b"{not json").expect("write");
        let err = read_triggers(&data).expect_err("should fail");
        assert!(matches!(err, StoreError::Metadata { .. }), "{err:?}");
    }

    #[test]
    fn handler_list_parsing() {
        assert!(HandlerList::parse("None").is_empty());
        assert!(HandlerList::parse("  ").is_empty());
        let list = HandlerList::parse("resize.mc,,watermark.mc ");
        assert_eq!(list.names(), ["resize.mc", "watermark.mc"]);
        assert_eq!(list.to_string(), "resize.mc,watermark.mc");

        let mut list = HandlerList::parse("a.mc,b.mc,a.mc,c.mc");
        list.remove_all(&HandlerList::parse("a.mc"));
        assert_eq!(list.names(), ["b.mc", "c.mc"]);
    }

    #[test]
    fn trigger_names() {
        assert_eq!("OnGet".parse::<Trigger>(), Ok(Trigger::OnGet));
        assert_eq!(Trigger::from_method("delete"), Some(Trigger::OnDelete));
        assert_eq!(Trigger::from_method("POST"), None);
        assert!("onpost".parse::<Trigger>().is_err());
    }
}
