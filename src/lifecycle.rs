//! Swap request state machine rules, shared by every repository backend.
//!
//! PENDING -> ACCEPTED | REJECTED | COUNTERED | CANCELLED | EXPIRED
//! COUNTERED -> ACCEPTED | REJECTED | EXPIRED   (responder role flipped)
//! ACCEPTED -> COMPLETED                        (after both confirmations)
//!
//! Terminal states (REJECTED, CANCELLED, EXPIRED, COMPLETED, DISPUTED) are
//! immutable; any further action conflicts and leaves the row unchanged.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Id, SwapRequest, SwapStatus, WardrobeItem};

pub const REQUEST_TTL_DAYS: i64 = 7;
pub const RETRY_COOLDOWN_HOURS: i64 = 24;
/// Threads archive this long after the parent swap goes terminal.
pub const THREAD_ARCHIVE_DAYS: i64 = 30;
/// Archived threads stay readable another 90 days, then may be deleted.
pub const THREAD_PURGE_DAYS: i64 = THREAD_ARCHIVE_DAYS + 90;
pub const RATING_PROMPT_DELAY_HOURS: i64 = 24;
pub const MAX_RATING_REMINDERS: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("{0}")]
    Conflict(&'static str),
    #[error("forbidden")]
    Forbidden,
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: &'static str,
    },
}

pub fn expires_at(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at + Duration::days(REQUEST_TTL_DAYS)
}

/// Rules for creating a request, given both resolved items.
pub fn validate_create(
    requester_id: Id,
    requester_item: &WardrobeItem,
    target_item: &WardrobeItem,
) -> Result<(), TransitionError> {
    if requester_item.owner_id != requester_id {
        return Err(TransitionError::Forbidden);
    }
    if target_item.owner_id == requester_id {
        return Err(TransitionError::Validation {
            field: "target_item_id",
            message: "cannot request a swap against your own item",
        });
    }
    if !requester_item.available_for_swap || requester_item.deleted_at.is_some() {
        return Err(TransitionError::Conflict("offered item is not available for swap"));
    }
    if !target_item.available_for_swap || target_item.deleted_at.is_some() {
        return Err(TransitionError::Conflict("target item is not available for swap"));
    }
    Ok(())
}

/// Uniqueness + cooldown over all prior requests for the same ordered pair.
pub fn validate_pair_history(
    prior: &[SwapRequest],
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    for req in prior {
        if !req.status.is_terminal() {
            return Err(TransitionError::Conflict(
                "an active swap request already exists for this item pair",
            ));
        }
        if matches!(
            req.status,
            SwapStatus::Rejected | SwapStatus::Cancelled | SwapStatus::Expired
        ) {
            if let Some(t) = req.terminated_at {
                if now - t < Duration::hours(RETRY_COOLDOWN_HOURS) {
                    return Err(TransitionError::Conflict(
                        "identical request was recently closed; retry later",
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Accept/reject: only the current responder, only from PENDING or COUNTERED.
pub fn validate_accept_or_reject(swap: &SwapRequest, actor: Id) -> Result<(), TransitionError> {
    if swap.status.is_terminal() {
        return Err(TransitionError::Conflict("request is already closed"));
    }
    if !matches!(swap.status, SwapStatus::Pending | SwapStatus::Countered) {
        return Err(TransitionError::Conflict("request is not awaiting a response"));
    }
    if swap.responder_id() != actor {
        return Err(TransitionError::Forbidden);
    }
    Ok(())
}

/// Counter: only the target owner, only from PENDING.
pub fn validate_counter(
    swap: &SwapRequest,
    actor: Id,
    counter_item: &WardrobeItem,
) -> Result<(), TransitionError> {
    if swap.status.is_terminal() {
        return Err(TransitionError::Conflict("request is already closed"));
    }
    if swap.status != SwapStatus::Pending {
        return Err(TransitionError::Conflict("only a pending request can be countered"));
    }
    if swap.target_id != actor {
        return Err(TransitionError::Forbidden);
    }
    if counter_item.owner_id != swap.target_id {
        return Err(TransitionError::Validation {
            field: "counter_item_id",
            message: "counter item must belong to the responding owner",
        });
    }
    if !counter_item.available_for_swap || counter_item.deleted_at.is_some() {
        return Err(TransitionError::Conflict("counter item is not available for swap"));
    }
    Ok(())
}

/// Cancel: only the original requester, only from PENDING.
pub fn validate_cancel(swap: &SwapRequest, actor: Id) -> Result<(), TransitionError> {
    if swap.status.is_terminal() {
        return Err(TransitionError::Conflict("request is already closed"));
    }
    if swap.status != SwapStatus::Pending {
        return Err(TransitionError::Conflict("only a pending request can be cancelled"));
    }
    if swap.requester_id != actor {
        return Err(TransitionError::Forbidden);
    }
    Ok(())
}

/// Completion confirmation: participants only, from ACCEPTED, once each.
/// Returns true when this confirmation is the second one and the swap
/// should complete atomically.
pub fn validate_confirm(swap: &SwapRequest, actor: Id) -> Result<bool, TransitionError> {
    if swap.status.is_terminal() {
        return Err(TransitionError::Conflict("request is already closed"));
    }
    if swap.status != SwapStatus::Accepted {
        return Err(TransitionError::Conflict("request has not been accepted"));
    }
    if !swap.is_participant(actor) {
        return Err(TransitionError::Forbidden);
    }
    let already = if actor == swap.requester_id {
        swap.requester_confirmed
    } else {
        swap.target_confirmed
    };
    if already {
        return Err(TransitionError::Conflict("completion already confirmed"));
    }
    let other_confirmed = if actor == swap.requester_id {
        swap.target_confirmed
    } else {
        swap.requester_confirmed
    };
    Ok(other_confirmed)
}

/// Hours between creation and the first response; trust score input.
pub fn response_latency_hours(swap: &SwapRequest, now: DateTime<Utc>) -> f64 {
    (now - swap.created_at).num_seconds().max(0) as f64 / 3600.0
}

pub fn should_expire(swap: &SwapRequest, now: DateTime<Utc>) -> bool {
    matches!(swap.status, SwapStatus::Pending | SwapStatus::Countered) && swap.expires_at < now
}

pub fn thread_archived(swap: &SwapRequest, now: DateTime<Utc>) -> bool {
    swap.terminated_at
        .map(|t| now - t >= Duration::days(THREAD_ARCHIVE_DAYS))
        .unwrap_or(false)
}

pub fn thread_purgeable(swap: &SwapRequest, now: DateTime<Utc>) -> bool {
    swap.terminated_at
        .map(|t| now - t >= Duration::days(THREAD_PURGE_DAYS))
        .unwrap_or(false)
}
