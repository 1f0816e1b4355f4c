//! Link status view shared between controllers.
//!
//! The controller never owns link identity. It reads up/down state and roles
//! through [`LinkStatusView`] and only writes back failure markers and QoS
//! admission bookkeeping.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Small integer identifying a link (connection id).
pub type LinkId = u8;

/// Minimum time between two admission tests after a failed one.
pub const MIN_QOS_RETEST_INTERVAL: Duration = Duration::from_secs(10);
/// How long a passed admission test is trusted.
pub const MAX_QOS_VALID_DURATION: Duration = Duration::from_secs(30);

/// Per-link QoS admission bookkeeping.
///
/// `last_test_failed_at` doubles as "probe outstanding since": the admission
/// gate stamps it when a probe starts and the QoS algorithm clears it when the
/// probe passes or the link goes idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosAdmission {
    pub last_test_failed_at: BTreeMap<LinkId, Duration>,
    pub valid_until: BTreeMap<LinkId, Duration>,
    pub min_retest_interval: Duration,
    pub max_valid_duration: Duration,
}

impl Default for QosAdmission {
    fn default() -> Self {
        Self {
            last_test_failed_at: BTreeMap::new(),
            valid_until: BTreeMap::new(),
            min_retest_interval: MIN_QOS_RETEST_INTERVAL,
            max_valid_duration: MAX_QOS_VALID_DURATION,
        }
    }
}

impl QosAdmission {
    pub fn record_failure(&mut self, link: LinkId, now: Duration) {
        self.last_test_failed_at.insert(link, now);
        self.valid_until.remove(&link);
    }

    /// Forget a link's failure so it can be probed again right away.
    pub fn clear_failure(&mut self, link: LinkId) {
        self.last_test_failed_at.remove(&link);
    }

    pub fn record_pass(&mut self, link: LinkId, now: Duration) {
        self.last_test_failed_at.remove(&link);
        self.valid_until.insert(link, now + self.max_valid_duration);
    }
}

/// Contract the controller needs from the link status owner.
pub trait LinkStatusView {
    fn is_link_up(&self, id: LinkId) -> bool;
    fn default_link(&self) -> LinkId;
    fn backup_link(&self) -> LinkId;
    /// Link ids in measurement-array order.
    fn ordered_link_ids(&self) -> Vec<LinkId>;
    fn index_of(&self, id: LinkId) -> Option<usize>;
    /// Mark a link down because it stopped carrying traffic.
    fn mark_inferred_down(&mut self, id: LinkId);
    fn qos(&self) -> &QosAdmission;
    fn qos_mut(&mut self) -> &mut QosAdmission;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub id: LinkId,
    pub up: bool,
    /// Set when the controller inferred the failure from missing traffic.
    #[serde(default)]
    pub inferred_down: bool,
}

/// Reference implementation of [`LinkStatusView`].
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    links: Vec<LinkEntry>,
    default_link: LinkId,
    backup_link: LinkId,
    qos: QosAdmission,
}

impl LinkTable {
    /// Create a table with every link up; the first id is the default link and
    /// the second (if any) the backup link.
    pub fn new(ids: &[LinkId]) -> Self {
        let links = ids
            .iter()
            .map(|&id| LinkEntry {
                id,
                up: true,
                inferred_down: false,
            })
            .collect();
        let default_link = ids.first().copied().unwrap_or_default();
        let backup_link = ids.get(1).copied().unwrap_or(default_link);
        Self {
            links,
            default_link,
            backup_link,
            qos: QosAdmission::default(),
        }
    }

    pub fn add_link(&mut self, id: LinkId) {
        if self.index_of(id).is_none() {
            self.links.push(LinkEntry {
                id,
                up: true,
                inferred_down: false,
            });
        }
    }

    pub fn set_link_up(&mut self, id: LinkId, up: bool) {
        if let Some(entry) = self.links.iter_mut().find(|l| l.id == id) {
            entry.up = up;
            if up {
                entry.inferred_down = false;
            }
        }
    }

    pub fn set_default_link(&mut self, id: LinkId) {
        self.default_link = id;
    }

    pub fn set_backup_link(&mut self, id: LinkId) {
        self.backup_link = id;
    }

    pub fn is_inferred_down(&self, id: LinkId) -> bool {
        self.links
            .iter()
            .any(|l| l.id == id && l.inferred_down)
    }

    pub fn links(&self) -> &[LinkEntry] {
        &self.links
    }

    /// Replace the admission timing constants.
    pub fn with_qos_intervals(mut self, min_retest: Duration, max_valid: Duration) -> Self {
        self.qos.min_retest_interval = min_retest;
        self.qos.max_valid_duration = max_valid;
        self
    }
}

impl LinkStatusView for LinkTable {
    fn is_link_up(&self, id: LinkId) -> bool {
        self.links.iter().any(|l| l.id == id && l.up)
    }

    fn default_link(&self) -> LinkId {
        self.default_link
    }

    fn backup_link(&self) -> LinkId {
        self.backup_link
    }

    fn ordered_link_ids(&self) -> Vec<LinkId> {
        self.links.iter().map(|l| l.id).collect()
    }

    fn index_of(&self, id: LinkId) -> Option<usize> {
        self.links.iter().position(|l| l.id == id)
    }

    fn mark_inferred_down(&mut self, id: LinkId) {
        if let Some(entry) = self.links.iter_mut().find(|l| l.id == id) {
            if entry.up {
                info!(link = id, "no data received, marking link down");
            }
            entry.up = false;
            entry.inferred_down = true;
        }
    }

    fn qos(&self) -> &QosAdmission {
        &self.qos
    }

    fn qos_mut(&mut self) -> &mut QosAdmission {
        &mut self.qos
    }
}

/// Link table shared by several controllers.
#[derive(Debug, Clone, Default)]
pub struct SharedLinkTable {
    inner: Arc<Mutex<LinkTable>>,
}

impl SharedLinkTable {
    pub fn new(table: LinkTable) -> Self {
        Self {
            inner: Arc::new(Mutex::new(table)),
        }
    }

    /// Run `f` with exclusive access to the table.
    pub fn with<R>(&self, f: impl FnOnce(&mut LinkTable) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    pub fn snapshot(&self) -> LinkTable {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_table_assigns_roles_in_order() {
        let table = LinkTable::new(&[3, 7, 9]);
        assert_eq!(table.default_link(), 3);
        assert_eq!(table.backup_link(), 7);
        assert_eq!(table.ordered_link_ids(), vec![3, 7, 9]);
        assert_eq!(table.index_of(9), Some(2));
        assert_eq!(table.index_of(4), None);
    }

    #[test]
    fn inferred_down_clears_on_recovery() {
        let mut table = LinkTable::new(&[0, 1]);
        table.mark_inferred_down(1);
        assert!(!table.is_link_up(1));
        assert!(table.is_inferred_down(1));
        table.set_link_up(1, true);
        assert!(table.is_link_up(1));
        assert!(!table.is_inferred_down(1));
    }

    #[test]
    fn shared_table_mutations_are_visible_to_clones() {
        let shared = SharedLinkTable::new(LinkTable::new(&[0, 1]));
        let other = shared.clone();
        other.with(|t| t.set_link_up(0, false));
        assert!(!shared.snapshot().is_link_up(0));
    }

    #[test]
    fn record_pass_opens_validity_window() {
        let mut qos = QosAdmission::default();
        qos.record_failure(2, Duration::from_secs(1));
        qos.record_pass(2, Duration::from_secs(5));
        assert!(!qos.last_test_failed_at.contains_key(&2));
        assert_eq!(
            qos.valid_until.get(&2),
            Some(&(Duration::from_secs(5) + MAX_QOS_VALID_DURATION))
        );
    }
}
