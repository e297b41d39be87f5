use super::{TeardownMode, TombstoneManager};
use crate::codec::{self, TombstoneItem};
use crate::core::{Millis, OwnerId, Position, RecordId};
use crate::outcome::{AccessOutcome, WithdrawOutcome, Withdrawn};
use crate::storage::TombstoneStore;
use crate::world::World;

impl<S: TombstoneStore + 'static, W: World + 'static> TombstoneManager<S, W> {
    /// Contents of the tombstone at `pos` if `accessor` may see them.
    /// Rows that fail to decode are logged and left out.
    pub async fn open(&self, pos: &Position, accessor: OwnerId, is_admin: bool) -> AccessOutcome {
        let now = self.now();
        let Some(instance) = self.instances.get(pos) else {
            return AccessOutcome::NotFound;
        };
        if !instance.can_access(accessor, is_admin, now) {
            return AccessOutcome::Protected {
                remaining_ms: instance.remaining_protection(now),
            };
        }
        let id = instance.record_id();
        let experience = instance.experience();

        match self.store.load_items(id).await {
            Ok(entries) => AccessOutcome::Granted {
                items: codec::decode_entries(&entries),
                experience,
            },
            Err(err) => {
                log::error!("failed to load items of tombstone {}: {}", id, err);
                AccessOutcome::Failed
            }
        }
    }

    /// Withdraw the item stored under `slot_index`. The tombstone is torn
    /// down when nothing is left afterwards.
    pub async fn take_item(
        &mut self,
        pos: &Position,
        accessor: OwnerId,
        is_admin: bool,
        slot_index: u32,
    ) -> WithdrawOutcome {
        let id = match self.authorize(pos, accessor, is_admin) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let entries = match self.store.load_items(id).await {
            Ok(entries) => entries,
            Err(err) => {
                log::error!("failed to load items of tombstone {}: {}", id, err);
                return WithdrawOutcome::Failed;
            }
        };
        let Some(entry) = entries.into_iter().find(|e| e.slot_index == slot_index) else {
            return WithdrawOutcome::AlreadyEmpty;
        };
        let item = match codec::decode_item(&entry.payload) {
            Ok(item) => item,
            Err(err) => {
                log::error!("slot {} of tombstone {} is unreadable: {}", slot_index, id, err);
                return WithdrawOutcome::Failed;
            }
        };

        match self.store.remove_item(id, slot_index).await {
            Ok(true) => {}
            Ok(false) => return WithdrawOutcome::AlreadyEmpty,
            Err(err) => {
                log::error!("failed to remove slot {} of tombstone {}: {}", slot_index, id, err);
                return WithdrawOutcome::Failed;
            }
        }
        self.finish_withdrawal(pos, id, Withdrawn::Item(TombstoneItem { slot_index, item }))
            .await
    }

    /// Withdraw all stored experience at once.
    pub async fn take_experience(
        &mut self,
        pos: &Position,
        accessor: OwnerId,
        is_admin: bool,
    ) -> WithdrawOutcome {
        let id = match self.authorize(pos, accessor, is_admin) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        let experience = self.instances.get(pos).map_or(0, |i| i.experience());
        if experience == 0 {
            return WithdrawOutcome::AlreadyEmpty;
        }

        match self.store.zero_experience(id).await {
            Ok(true) => {}
            Ok(false) => return WithdrawOutcome::NotFound,
            Err(err) => {
                log::error!("failed to zero experience of tombstone {}: {}", id, err);
                return WithdrawOutcome::Failed;
            }
        }
        if let Some(instance) = self.instances.get_mut(pos) {
            instance.set_experience(0);
        }
        self.finish_withdrawal(pos, id, Withdrawn::Experience(experience))
            .await
    }

    fn authorize(
        &self,
        pos: &Position,
        accessor: OwnerId,
        is_admin: bool,
    ) -> Result<RecordId, WithdrawOutcome> {
        let now: Millis = self.now();
        let Some(instance) = self.instances.get(pos) else {
            return Err(WithdrawOutcome::NotFound);
        };
        if !instance.can_access(accessor, is_admin, now) {
            return Err(WithdrawOutcome::Denied {
                remaining_ms: instance.remaining_protection(now),
            });
        }
        Ok(instance.record_id())
    }

    async fn finish_withdrawal(
        &mut self,
        pos: &Position,
        id: RecordId,
        withdrawn: Withdrawn,
    ) -> WithdrawOutcome {
        match self.store.is_empty(id).await {
            Ok(true) => {
                if let Some(teardown) = self.teardown(pos, TeardownMode::Full).await {
                    if !teardown.clean {
                        log::warn!("emptied tombstone {} at {} was not torn down cleanly", id, pos);
                    }
                }
                WithdrawOutcome::Removed(withdrawn)
            }
            Ok(false) => WithdrawOutcome::Taken(withdrawn),
            Err(err) => {
                log::warn!("emptiness check of tombstone {} failed: {}", id, err);
                WithdrawOutcome::Taken(withdrawn)
            }
        }
    }
}
