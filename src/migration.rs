//! Cart migration and ownership swap
//!
//! Two named carts take part, "source" (guest) and "target" (user), for one
//! instance. `migrate` merges and is never destructive for an empty source;
//! `swap` transfers ownership unconditionally, empty carts included, so a
//! freshly logged-in user always ends up with an active record.

use std::sync::Arc;
use tracing::info;

use crate::config::{CartConfig, MergeStrategy};
use crate::domain::aggregates::cart::CartState;
use crate::domain::aggregates::item::CartItem;
use crate::domain::conditions::Condition;
use crate::domain::events::{CartEvent, EventSink};
use crate::storage::CartStorage;
use crate::Result;

pub struct MigrationService {
    storage: Arc<dyn CartStorage>,
    config: Arc<CartConfig>,
    events: Arc<dyn EventSink>,
}

impl MigrationService {
    pub(crate) fn new(
        storage: Arc<dyn CartStorage>,
        config: Arc<CartConfig>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            storage,
            config,
            events,
        }
    }

    /// Merges the source cart into the target using the configured merge
    /// strategy, then forgets the source. Returns false without touching
    /// anything when the source is absent or empty, so an empty guest cart
    /// never overwrites a populated user cart.
    ///
    /// The write-target-then-forget-source sequence is not atomic on
    /// backends without transactions; a crash between the two steps leaves
    /// the guest cart duplicated (never lost). A concurrent write to the
    /// target surfaces as a version conflict for the caller to retry.
    pub async fn migrate(&self, source: &str, target: &str, instance: &str) -> Result<bool> {
        let Some(source_record) = self.storage.load(source, instance).await? else {
            return Ok(false);
        };
        if source_record.state.is_empty() {
            return Ok(false);
        }

        let strategy = MergeStrategy::resolve(&self.config.merge_strategy);
        let (target_state, target_version) = match self.storage.load(target, instance).await? {
            Some(record) => (record.state, Some(record.version)),
            None => (CartState::default(), None),
        };

        let items_merged = source_record.state.items().len();
        let items = merge_items(
            strategy,
            source_record.state.items(),
            target_state.items().to_vec(),
        );
        let (conditions, conditions_merged) = merge_conditions(
            source_record.state.conditions(),
            target_state.conditions().to_vec(),
        );

        self.storage
            .put_both(target, instance, items, conditions, target_version)
            .await?;
        self.storage.forget(source, instance).await?;

        info!(
            source,
            target,
            instance,
            ?strategy,
            items_merged,
            conditions_merged,
            "guest cart merged into user cart"
        );
        self.events.publish(CartEvent::Merged {
            source: source.to_string(),
            target: target.to_string(),
            instance: instance.to_string(),
            items_merged,
            conditions_merged,
        });
        Ok(true)
    }

    /// Unconditional ownership transfer: the source record, even an empty
    /// one, replaces whatever the target held. Returns false only when no
    /// source record exists at all ("no record" is distinct from "record
    /// with zero items"), and the target is untouched in that case.
    ///
    /// The destructive replace happens inside the backend's atomic
    /// `swap_identifier` step, so a source vanishing under a concurrent
    /// login cannot leave the target deleted with nothing moved in.
    pub async fn swap(&self, source: &str, target: &str, instance: &str) -> Result<bool> {
        let swapped = self.storage.swap_identifier(source, target, instance).await?;
        if swapped {
            info!(source, target, instance, "cart ownership swapped");
            self.events.publish(CartEvent::Migrated {
                source: source.to_string(),
                target: target.to_string(),
                instance: instance.to_string(),
            });
        }
        Ok(swapped)
    }

    /// Formats the canonical user identifier and swaps the guest cart onto
    /// it.
    pub async fn swap_guest_cart_to_user(
        &self,
        user_id: &str,
        instance: &str,
        guest_identifier: &str,
    ) -> Result<bool> {
        let target = Self::user_identifier(user_id);
        self.swap(guest_identifier, &target, instance).await
    }

    /// Canonical identifier for an authenticated user's cart.
    pub fn user_identifier(user_id: &str) -> String {
        format!("user-{user_id}")
    }

    /// Login hook: runs `migrate` for the default instance when
    /// `auto_migrate_on_login` is enabled. Concurrent logins from several
    /// devices resolve last-write-wins through the version check; a loser
    /// sees `ConcurrencyConflict` and retries against the merged cart.
    pub async fn handle_login(&self, guest_identifier: &str, user_id: &str) -> Result<bool> {
        if !self.config.auto_migrate_on_login {
            return Ok(false);
        }
        let target = Self::user_identifier(user_id);
        self.migrate(guest_identifier, &target, &self.config.default_instance)
            .await
    }
}

/// Reconciles item lists per strategy. Target lines keep their position;
/// source-only lines append in source order.
fn merge_items(
    strategy: MergeStrategy,
    source: &[CartItem],
    mut target: Vec<CartItem>,
) -> Vec<CartItem> {
    for incoming in source {
        match target.iter_mut().find(|t| t.id() == incoming.id()) {
            Some(existing) => match strategy {
                MergeStrategy::AddQuantities => {
                    existing.quantity = existing.quantity.saturating_add(incoming.quantity);
                }
                MergeStrategy::KeepHighestQuantity => {
                    existing.quantity = existing.quantity.max(incoming.quantity);
                }
                MergeStrategy::KeepUserCart => {}
                MergeStrategy::ReplaceWithGuest => {
                    existing.quantity = incoming.quantity;
                }
            },
            None => target.push(incoming.clone()),
        }
    }
    target
}

/// Target conditions win on name collision; source conditions with unused
/// names are copied. Returns the merged list and how many were copied.
fn merge_conditions(
    source: &[Condition],
    mut target: Vec<Condition>,
) -> (Vec<Condition>, usize) {
    let mut copied = 0;
    for condition in source {
        if target.iter().all(|t| t.name() != condition.name()) {
            target.push(condition.clone());
            copied += 1;
        }
    }
    (target, copied)
}
