//! Handle registry: `alice@minipay` style aliases mapped one-to-one to wallets.
//!
//! Registration is local-first. The device cache is written synchronously and
//! the durable store is updated by a background task that claims both the
//! `handles` row and the `handle_owners` row of the address. When either
//! direction is already taken in the durable store, the durable binding wins:
//! the claim is withdrawn and the device cache is overwritten.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{ConflictKind, HandleRule, MiniPayResult, ValidationKind};
use crate::keys::{is_valid_address, shorten_address, validate_address};
use crate::storage::keys::{HANDLE_OWNER_PREFIX, HANDLE_PREFIX};
use crate::storage::{DurableStore, InsertOutcome, KeyValueStore, Table};
use crate::utils::{decode_record, now_unix};

/// Suffix shown after handles.
pub const HANDLE_SUFFIX: &str = "@minipay";

const MIN_HANDLE_LEN: usize = 3;
const MAX_HANDLE_LEN: usize = 20;

/// A handle and the wallet it points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct HandleBinding {
    /// Normalized handle (`[a-z0-9_]{3,20}`).
    pub handle: String,
    /// The `G...` address.
    pub wallet_address: String,
    /// Unix seconds of the registration.
    #[serde(default)]
    pub registered_at: u64,
}

/// Outcome of a successful [`HandleRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The handle was claimed.
    Registered,
    /// This exact pair already existed.
    AlreadyRegistered,
}

/// Normalizes `raw` (trim, lowercase) and checks the handle syntax.
///
/// # Errors
///
/// Returns a [`ValidationKind::Handle`] naming the broken rule.
pub fn validate_handle(raw: &str) -> MiniPayResult<String> {
    let handle = raw.trim().to_lowercase();
    let rule = if handle.is_empty() {
        Some(HandleRule::Empty)
    } else if handle.chars().count() < MIN_HANDLE_LEN {
        Some(HandleRule::TooShort)
    } else if handle.chars().count() > MAX_HANDLE_LEN {
        Some(HandleRule::TooLong)
    } else if !handle
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        Some(HandleRule::Charset)
    } else {
        None
    };

    match rule {
        Some(rule) => Err(ValidationKind::Handle { handle, rule }.into()),
        None => Ok(handle),
    }
}

/// Lookup form of a handle: trimmed, lowercased, `@minipay` suffix removed.
#[must_use]
pub fn normalize_handle(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    lowered
        .strip_suffix(HANDLE_SUFFIX)
        .map_or_else(|| lowered.clone(), str::to_string)
}

/// Whether `input` should be treated as a handle rather than an address.
#[must_use]
pub fn is_handle(input: &str) -> bool {
    !is_valid_address(input.trim())
}

/// Handle registry over an on-device cache and a durable store.
pub struct HandleRegistry {
    cache: Arc<dyn KeyValueStore>,
    durable: Arc<dyn DurableStore>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl HandleRegistry {
    /// Creates a registry over the given stores.
    #[must_use]
    pub fn new(cache: Arc<dyn KeyValueStore>, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            cache,
            durable,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Claims `handle` for `wallet_address`.
    ///
    /// Both directions of the bijection are checked against the device cache
    /// before anything is written. The durable write runs in the background on
    /// the ambient tokio runtime; see [`Self::wait_for_sync`].
    ///
    /// # Errors
    ///
    /// - a validation error for a malformed handle or address
    /// - [`ConflictKind::HandleTaken`] if the handle belongs to another address
    /// - [`ConflictKind::AddressHasHandle`] if the address owns another handle
    pub fn register(&self, handle: &str, wallet_address: &str) -> MiniPayResult<RegisterOutcome> {
        let handle = validate_handle(handle)?;
        validate_address(wallet_address)?;

        if let Some(existing) = self.cached(&handle)? {
            if existing.wallet_address.eq_ignore_ascii_case(wallet_address) {
                return Ok(RegisterOutcome::AlreadyRegistered);
            }
            return Err(ConflictKind::HandleTaken { handle }.into());
        }
        if let Some(existing) = self.reverse_lookup(wallet_address)? {
            if existing != handle {
                return Err(ConflictKind::AddressHasHandle { existing }.into());
            }
        }

        let binding = HandleBinding {
            handle,
            wallet_address: wallet_address.to_string(),
            registered_at: now_unix(),
        };
        write_binding(self.cache.as_ref(), &binding)?;
        log::info!(
            "[HANDLE] registered {}{HANDLE_SUFFIX} -> {}",
            binding.handle,
            shorten_address(wallet_address)
        );

        self.sync_in_background(binding);
        Ok(RegisterOutcome::Registered)
    }

    /// Address of `handle` from the device cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read.
    pub fn resolve(&self, handle: &str) -> MiniPayResult<Option<String>> {
        Ok(self
            .cached(&normalize_handle(handle))?
            .map(|binding| binding.wallet_address))
    }

    /// Address of `handle`, asking the durable store on a cache miss.
    ///
    /// A durable hit is written into the device cache so later [`Self::resolve`]
    /// calls see it.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read or the durable store fails.
    pub async fn resolve_durable(&self, handle: &str) -> MiniPayResult<Option<String>> {
        let handle = normalize_handle(handle);
        if let Some(binding) = self.cached(&handle)? {
            return Ok(Some(binding.wallet_address));
        }

        let Some(record) = self.durable.get(Table::Handles, &handle).await? else {
            return Ok(None);
        };
        let binding: HandleBinding = decode_record(record)?;
        write_binding(self.cache.as_ref(), &binding)?;
        log::debug!("[HANDLE] back-filled {}{HANDLE_SUFFIX}", binding.handle);
        Ok(Some(binding.wallet_address))
    }

    /// Handle owned by `wallet_address`, from the device cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read.
    pub fn reverse_lookup(&self, wallet_address: &str) -> MiniPayResult<Option<String>> {
        Ok(self.cache.get(&owner_key(wallet_address))?)
    }

    /// Display form of a recipient: `alice@minipay` when a handle is known,
    /// otherwise the shortened address.
    #[must_use]
    pub fn format_recipient(&self, address_or_handle: &str) -> String {
        if is_handle(address_or_handle) {
            return format!("{}{HANDLE_SUFFIX}", normalize_handle(address_or_handle));
        }
        match self.reverse_lookup(address_or_handle.trim()) {
            Ok(Some(handle)) => format!("{handle}{HANDLE_SUFFIX}"),
            _ => shorten_address(address_or_handle.trim()),
        }
    }

    /// Waits for every background durable write started so far.
    pub async fn wait_for_sync(&self) {
        loop {
            let tasks = self
                .pending
                .lock()
                .map(|mut pending| std::mem::take(&mut *pending))
                .unwrap_or_default();
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(err) = task.await {
                    log::warn!("[HANDLE] background sync task failed: {err}");
                }
            }
        }
    }

    fn cached(&self, handle: &str) -> MiniPayResult<Option<HandleBinding>> {
        self.cache
            .get(&handle_key(handle))?
            .map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }

    fn sync_in_background(&self, binding: HandleBinding) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!(
                "[HANDLE] no async runtime, {}{HANDLE_SUFFIX} kept on device only",
                binding.handle
            );
            return;
        };

        let cache = Arc::clone(&self.cache);
        let durable = Arc::clone(&self.durable);
        let task = runtime.spawn(async move {
            sync_binding(cache.as_ref(), durable.as_ref(), binding).await;
        });
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|task| !task.is_finished());
            pending.push(task);
        }
    }
}

async fn sync_binding(cache: &dyn KeyValueStore, durable: &dyn DurableStore, binding: HandleBinding) {
    let record = match serde_json::to_value(&binding) {
        Ok(record) => record,
        Err(err) => {
            log::error!("[HANDLE] failed to encode {}: {err}", binding.handle);
            return;
        }
    };

    let inserted_handle = match durable
        .insert_unique(Table::Handles, &binding.handle, record.clone())
        .await
    {
        Ok(InsertOutcome::Inserted) => true,
        Ok(InsertOutcome::AlreadyExists) => {
            if !reconcile_handle(cache, durable, &binding).await {
                return;
            }
            false
        }
        Err(err) => {
            log::warn!(
                "[HANDLE] durable sync of {}{HANDLE_SUFFIX} failed: {err}",
                binding.handle
            );
            return;
        }
    };

    match durable
        .insert_unique(Table::HandleOwners, &owner_id(&binding.wallet_address), record)
        .await
    {
        Ok(InsertOutcome::Inserted) => {
            log::debug!("[HANDLE] synced {}{HANDLE_SUFFIX}", binding.handle);
        }
        Ok(InsertOutcome::AlreadyExists) => {
            reconcile_owner(cache, durable, &binding, inserted_handle).await;
        }
        Err(err) => {
            log::warn!(
                "[HANDLE] durable owner index for {}{HANDLE_SUFFIX} failed: {err}",
                binding.handle
            );
        }
    }
}

/// Settles a claim on a handle that already has a durable row.
///
/// Returns `true` if the durable row belongs to the same address, so the
/// claim stands. Otherwise the durable owner overwrites the device cache.
async fn reconcile_handle(
    cache: &dyn KeyValueStore,
    durable: &dyn DurableStore,
    local: &HandleBinding,
) -> bool {
    let owner = match durable.get(Table::Handles, &local.handle).await {
        Ok(Some(record)) => decode_record::<HandleBinding>(record),
        Ok(None) => return false,
        Err(err) => {
            log::warn!("[HANDLE] could not read durable owner of {}: {err}", local.handle);
            return false;
        }
    };

    match owner {
        Ok(owner) if owner.wallet_address.eq_ignore_ascii_case(&local.wallet_address) => true,
        Ok(owner) => {
            log::warn!(
                "[HANDLE] {}{HANDLE_SUFFIX} is owned by {} in the durable store, dropping local claim",
                owner.handle,
                shorten_address(&owner.wallet_address)
            );
            if let Err(err) = write_binding(cache, &owner) {
                log::error!("[HANDLE] failed to overwrite cache: {err}");
            }
            false
        }
        Err(err) => {
            log::warn!("[HANDLE] corrupt durable record for {}: {err}", local.handle);
            false
        }
    }
}

/// Settles a claim whose address already owns a handle in the durable store.
///
/// If that handle differs, the handle row written for this claim is removed
/// and the durable binding overwrites the device cache.
async fn reconcile_owner(
    cache: &dyn KeyValueStore,
    durable: &dyn DurableStore,
    local: &HandleBinding,
    inserted_handle: bool,
) {
    let owner = match durable
        .get(Table::HandleOwners, &owner_id(&local.wallet_address))
        .await
    {
        Ok(Some(record)) => match decode_record::<HandleBinding>(record) {
            Ok(owner) => owner,
            Err(err) => {
                log::warn!("[HANDLE] corrupt durable owner record: {err}");
                return;
            }
        },
        Ok(None) => return,
        Err(err) => {
            log::warn!("[HANDLE] could not read durable handle of address: {err}");
            return;
        }
    };
    if owner.handle == local.handle {
        return;
    }

    log::warn!(
        "[HANDLE] {} already owns {}{HANDLE_SUFFIX} in the durable store, dropping {}{HANDLE_SUFFIX}",
        shorten_address(&local.wallet_address),
        owner.handle,
        local.handle
    );
    if inserted_handle {
        if let Err(err) = durable.delete(Table::Handles, &local.handle).await {
            log::error!("[HANDLE] failed to release {}{HANDLE_SUFFIX}: {err}", local.handle);
        }
    }
    if let Err(err) = write_binding(cache, &owner) {
        log::error!("[HANDLE] failed to overwrite cache: {err}");
    }
}

/// Writes `binding` into the cache, dropping entries it supersedes in either direction.
fn write_binding(cache: &dyn KeyValueStore, binding: &HandleBinding) -> MiniPayResult<()> {
    let handle_entry = handle_key(&binding.handle);
    let owner_entry = owner_key(&binding.wallet_address);

    if let Some(raw) = cache.get(&handle_entry)? {
        let previous: HandleBinding = serde_json::from_str(&raw)?;
        let previous_owner = owner_key(&previous.wallet_address);
        if previous_owner != owner_entry {
            cache.delete(&previous_owner)?;
        }
    }
    if let Some(previous_handle) = cache.get(&owner_entry)? {
        if previous_handle != binding.handle {
            cache.delete(&handle_key(&previous_handle))?;
        }
    }

    cache.put(&handle_entry, &serde_json::to_string(binding)?)?;
    cache.put(&owner_entry, &binding.handle)?;
    Ok(())
}

fn handle_key(handle: &str) -> String {
    format!("{HANDLE_PREFIX}{handle}")
}

fn owner_key(wallet_address: &str) -> String {
    format!("{HANDLE_OWNER_PREFIX}{}", wallet_address.trim().to_lowercase())
}

/// Key of the durable reverse index: the address in canonical StrKey case.
fn owner_id(wallet_address: &str) -> String {
    wallet_address.trim().to_ascii_uppercase()
}
