use std::collections::BTreeMap;

/// Lifecycle state of a catalogue entry, driving the reconciler's action
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Unconfirmed,
    Confirmed,
    ToBeCreated,
    BrowsePacketReceived,
    Disappeared,
}

/// What the reconciler should hand the local print service when it creates or
/// modifies this entry's queue.
#[derive(Debug, Clone)]
pub enum DescriptionSource {
    Raw,
    DescriptionFile(std::path::PathBuf),
    InterfaceScript(std::path::PathBuf),
}

/// Identity a service-discovery REMOVE event is matched against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub service_name: String,
    pub service_type: String,
    pub service_domain: String,
}

impl ServiceIdentity {
    pub fn is_empty(&self) -> bool {
        self.service_name.is_empty() && self.service_type.is_empty() && self.service_domain.is_empty()
    }

    pub fn matches_ci(&self, other: &ServiceIdentity) -> bool {
        self.service_name.eq_ignore_ascii_case(&other.service_name)
            && self.service_type.eq_ignore_ascii_case(&other.service_type)
            && self.service_domain.eq_ignore_ascii_case(&other.service_domain)
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityHints {
    pub pdl: Vec<String>,
    pub make_and_model: Option<String>,
}

/// One printer the daemon is tracking on behalf of the local print service.
#[derive(Debug, Clone)]
pub struct RemotePrinterEntry {
    pub name: String,
    pub uri: String,
    pub host: String,
    pub identity: ServiceIdentity,
    pub status: EntryStatus,
    /// `None` means "no action scheduled" (steady state).
    pub deadline: Option<u64>,
    pub duplicate: bool,
    pub description_source: DescriptionSource,
    pub capability_hints: Option<CapabilityHints>,
}

impl RemotePrinterEntry {
    pub fn is_due(&self, now: u64) -> bool {
        matches!(self.deadline, Some(d) if d <= now)
    }
}

/// The authoritative in-memory set of printer entries, ordered by name. Lives
/// entirely on the loop task — no internal locking (exclusion comes
/// from single-threaded ownership, not a mutex).
#[derive(Debug, Default)]
pub struct Catalogue {
    // Keyed by an opaque id rather than name, since duplicates share a name.
    entries: BTreeMap<u64, RemotePrinterEntry>,
    next_id: u64,
}

pub type EntryId = u64;

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: RemotePrinterEntry) -> EntryId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, entry);
        id
    }

    pub fn get(&self, id: EntryId) -> Option<&RemotePrinterEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut RemotePrinterEntry> {
        self.entries.get_mut(&id)
    }

    pub fn remove(&mut self, id: EntryId) -> Option<RemotePrinterEntry> {
        self.entries.remove(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &RemotePrinterEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.entries.keys().copied().collect()
    }

    /// Find the entry matching a service-discovery REMOVE event.
    pub fn find_by_identity(&self, identity: &ServiceIdentity) -> Option<EntryId> {
        self.entries
            .iter()
            .find(|(_, e)| !e.identity.is_empty() && e.identity.matches_ci(identity))
            .map(|(id, _)| *id)
    }

    /// Intake lookup: name matches case-insensitively and
    /// host matches, or host is empty, or the entry is in a state that is
    /// still eligible for rediscovery.
    pub fn find_for_intake(&self, name: &str, host: &str) -> Option<EntryId> {
        self.entries
            .iter()
            .find(|(_, e)| {
                e.name.eq_ignore_ascii_case(name)
                    && (e.host.is_empty()
                        || e.host.eq_ignore_ascii_case(host)
                        || matches!(e.status, EntryStatus::Unconfirmed | EntryStatus::Disappeared))
            })
            .map(|(id, _)| *id)
    }

    /// Any other non-duplicate entry already using this name, for dedup.
    pub fn find_primary_by_name(&self, name: &str, exclude: Option<EntryId>) -> Option<EntryId> {
        self.entries
            .iter()
            .find(|(id, e)| {
                Some(**id) != exclude && !e.duplicate && e.name.eq_ignore_ascii_case(name)
            })
            .map(|(id, _)| *id)
    }

    /// The standby duplicate for `name`, if any: a removed primary is
    /// replaced by the duplicate sharing its name, if one exists.
    pub fn find_duplicate_by_name(&self, name: &str, exclude: Option<EntryId>) -> Option<EntryId> {
        self.entries
            .iter()
            .find(|(id, e)| Some(**id) != exclude && e.duplicate && e.name.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
    }

    /// Minimum future deadline across the catalogue, used to re-arm the
    /// reconciler timer after a pass.
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.values().filter_map(|e| e.deadline).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, host: &str, status: EntryStatus) -> RemotePrinterEntry {
        RemotePrinterEntry {
            name: name.to_string(),
            uri: format!("ipp://{host}:631/printers/{name}"),
            host: host.to_string(),
            identity: ServiceIdentity::default(),
            status,
            deadline: None,
            duplicate: false,
            description_source: DescriptionSource::Raw,
            capability_hints: None,
        }
    }

    #[test]
    fn find_for_intake_matches_case_insensitively() {
        let mut cat = Catalogue::new();
        cat.insert(entry("HPLJ", "printer", EntryStatus::Confirmed));
        assert!(cat.find_for_intake("hplj", "printer").is_some());
    }

    #[test]
    fn find_primary_by_name_skips_duplicates() {
        let mut cat = Catalogue::new();
        let mut dup = entry("hplj", "b", EntryStatus::Confirmed);
        dup.duplicate = true;
        cat.insert(dup);
        assert!(cat.find_primary_by_name("hplj", None).is_none());
        let primary = cat.insert(entry("hplj", "a", EntryStatus::Confirmed));
        assert_eq!(cat.find_primary_by_name("hplj", None), Some(primary));
    }

    #[test]
    fn find_duplicate_by_name_finds_only_duplicates() {
        let mut cat = Catalogue::new();
        let primary = cat.insert(entry("hplj", "a", EntryStatus::Confirmed));
        assert!(cat.find_duplicate_by_name("hplj", Some(primary)).is_none());
        let mut dup = entry("hplj", "b", EntryStatus::ToBeCreated);
        dup.duplicate = true;
        let dup_id = cat.insert(dup);
        assert_eq!(cat.find_duplicate_by_name("hplj", Some(primary)), Some(dup_id));
    }

    #[test]
    fn next_deadline_ignores_steady_state_entries() {
        let mut cat = Catalogue::new();
        cat.insert(entry("a", "h", EntryStatus::Confirmed));
        let mut due = entry("b", "h2", EntryStatus::ToBeCreated);
        due.deadline = Some(42);
        cat.insert(due);
        assert_eq!(cat.next_deadline(), Some(42));
    }
}
