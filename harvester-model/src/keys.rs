use crate::ids::ItemId;

/// Key naming for one feed inside the shared store.
///
/// Items live under `<prefix>:<id>` and the backfill watermark under
/// `max:ID:<prefix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new("hn")
    }
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn item_key(&self, id: ItemId) -> String {
        format!("{}:{}", self.prefix, id)
    }

    /// Returns `None` for keys belonging to another prefix or with a
    /// non-numeric suffix.
    pub fn parse_item_key(&self, key: &str) -> Option<ItemId> {
        key.strip_prefix(self.prefix.as_str())?
            .strip_prefix(':')?
            .parse()
            .ok()
    }

    pub fn scan_pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }

    pub fn watermark_key(&self) -> String {
        format!("max:ID:{}", self.prefix)
    }
}
