//! Per-approver ordered queues of pending approval requests.
//!
//! Each approver owns an independently locked list, so two approvers never
//! contend while the same approver's mutations are serialized. Entries are
//! kept sorted by `(active step, request id)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::domain::approval::RequestId;
use crate::domain::employee::EmployeeId;
use crate::transport::ApprovalRequest;

type Slot = Arc<Mutex<Vec<ApprovalRequest>>>;

#[derive(Debug, Default)]
pub struct ApprovalQueue {
    slots: RwLock<HashMap<EmployeeId, Slot>>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts `request` into its active approver's queue and returns that
    /// approver. Requests without an active step are ignored.
    pub fn enqueue(&self, request: ApprovalRequest) -> Option<EmployeeId> {
        let active = request.active_step()?;
        let approver = active.approver_id;
        let key = (active.step, request.request_id);

        let slot = self.slot(approver);
        let mut entries = lock(&slot);
        entries.retain(|entry| entry.request_id != request.request_id);
        let position = entries.partition_point(|entry| sort_key(entry) <= key);
        entries.insert(position, request);
        Some(approver)
    }

    /// Ordered copy of one approver's queue.
    pub fn snapshot(&self, approver: EmployeeId) -> Vec<ApprovalRequest> {
        match self.existing(approver) {
            Some(slot) => lock(&slot).clone(),
            None => Vec::new(),
        }
    }

    pub fn remove(&self, approver: EmployeeId, request_id: RequestId) -> Option<ApprovalRequest> {
        let slot = self.existing(approver)?;
        let mut entries = lock(&slot);
        let position = entries.iter().position(|entry| entry.request_id == request_id)?;
        Some(entries.remove(position))
    }

    /// Removes the entry only while its active step is still `step`, so a
    /// newer copy of the request queued for a later step survives.
    pub fn remove_at_step(
        &self,
        approver: EmployeeId,
        request_id: RequestId,
        step: u32,
    ) -> Option<ApprovalRequest> {
        let slot = self.existing(approver)?;
        let mut entries = lock(&slot);
        let position = entries.iter().position(|entry| {
            entry.request_id == request_id
                && entry.active_step().map(|active| active.step) == Some(step)
        })?;
        Some(entries.remove(position))
    }

    pub fn len(&self, approver: EmployeeId) -> usize {
        self.existing(approver).map(|slot| lock(&slot).len()).unwrap_or(0)
    }

    fn existing(&self, approver: EmployeeId) -> Option<Slot> {
        let slots = match self.slots.read() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.get(&approver).cloned()
    }

    fn slot(&self, approver: EmployeeId) -> Slot {
        if let Some(slot) = self.existing(approver) {
            return slot;
        }
        let mut slots = match self.slots.write() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.entry(approver).or_default().clone()
    }
}

fn sort_key(entry: &ApprovalRequest) -> (u32, RequestId) {
    let step = entry.active_step().map(|step| step.step).unwrap_or(u32::MAX);
    (step, entry.request_id)
}

fn lock(slot: &Slot) -> MutexGuard<'_, Vec<ApprovalRequest>> {
    match slot.lock() {
        Ok(entries) => entries,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ApprovalQueue;
    use crate::domain::approval::{ApprovalStatus, RequestId};
    use crate::domain::employee::EmployeeId;
    use crate::transport::{ApprovalRequest, StepMessage};

    fn request(id: i64, steps: &[(i64, ApprovalStatus)]) -> ApprovalRequest {
        ApprovalRequest {
            request_id: RequestId(id),
            requester_id: EmployeeId(1),
            title: format!("request {id}"),
            content: String::new(),
            steps: steps
                .iter()
                .enumerate()
                .map(|(index, (approver, status))| StepMessage {
                    step: index as u32 + 1,
                    approver_id: EmployeeId(*approver),
                    status: *status,
                })
                .collect(),
        }
    }

    fn ids(entries: &[ApprovalRequest]) -> Vec<i64> {
        entries.iter().map(|entry| entry.request_id.0).collect()
    }

    #[test]
    fn enqueue_targets_the_active_approver() {
        let queue = ApprovalQueue::new();
        let approver = queue.enqueue(request(
            1,
            &[(10, ApprovalStatus::Approved), (20, ApprovalStatus::Pending)],
        ));

        assert_eq!(approver, Some(EmployeeId(20)));
        assert_eq!(queue.len(EmployeeId(10)), 0);
        assert_eq!(queue.len(EmployeeId(20)), 1);
    }

    #[test]
    fn enqueue_ignores_requests_without_active_step() {
        let queue = ApprovalQueue::new();
        assert_eq!(queue.enqueue(request(1, &[(10, ApprovalStatus::Approved)])), None);
        assert_eq!(
            queue.enqueue(request(2, &[(10, ApprovalStatus::Rejected), (20, ApprovalStatus::Pending)])),
            None
        );
        assert!(queue.snapshot(EmployeeId(10)).is_empty());
        assert!(queue.snapshot(EmployeeId(20)).is_empty());
    }

    #[test]
    fn enqueue_is_an_upsert() {
        let queue = ApprovalQueue::new();
        let mut first = request(5, &[(10, ApprovalStatus::Pending)]);
        queue.enqueue(first.clone());
        first.title = "updated".to_string();
        queue.enqueue(first);

        let entries = queue.snapshot(EmployeeId(10));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "updated");
    }

    #[test]
    fn snapshot_orders_by_active_step_then_request_id() {
        let queue = ApprovalQueue::new();
        queue.enqueue(request(9, &[(10, ApprovalStatus::Pending)]));
        queue.enqueue(request(3, &[(30, ApprovalStatus::Approved), (10, ApprovalStatus::Pending)]));
        queue.enqueue(request(4, &[(10, ApprovalStatus::Pending)]));
        queue.enqueue(request(1, &[(30, ApprovalStatus::Approved), (10, ApprovalStatus::Pending)]));

        assert_eq!(ids(&queue.snapshot(EmployeeId(10))), vec![4, 9, 1, 3]);
    }

    #[test]
    fn remove_returns_entry_once() {
        let queue = ApprovalQueue::new();
        queue.enqueue(request(7, &[(10, ApprovalStatus::Pending)]));

        assert!(queue.remove(EmployeeId(10), RequestId(7)).is_some());
        assert!(queue.remove(EmployeeId(10), RequestId(7)).is_none());
        assert!(queue.remove(EmployeeId(99), RequestId(7)).is_none());
    }

    #[test]
    fn concurrent_enqueues_for_one_approver_never_duplicate() {
        let queue = Arc::new(ApprovalQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for id in 0..50 {
                        queue.enqueue(request(id, &[(10, ApprovalStatus::Pending)]));
                        if worker % 2 == 0 {
                            queue.enqueue(request(id + 1000, &[(20, ApprovalStatus::Pending)]));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread");
        }

        let entries = ids(&queue.snapshot(EmployeeId(10)));
        assert_eq!(entries, (0..50).collect::<Vec<_>>());
        assert_eq!(queue.len(EmployeeId(20)), 50);
    }
}
