//! Voucher aggregate.
//!
//! Governs a voucher's lifecycle and who may move it:
//!
//! ```text
//!            ┌──────────► claimed   (staff/admin, inside the claim window)
//!   active ──┼──────────► expired   (sweep after the scheduled date, or admin)
//!            └──────────► cancelled (staff/admin, or the requesting student)
//! ```
//!
//! All three targets are terminal. A command against a terminal voucher is
//! refused with [`VoucherError::InvalidTransition`] and changes nothing, so a
//! second staff member scanning an already-claimed voucher sees "already
//! processed" and the original claim timestamp and staff are kept.

use crate::error::{ValidationErrors, VoucherError};
use crate::roles::{Actor, Capability};
use crate::types::{UserId, Voucher, VoucherStatus};
use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use mealshare_core::environment::Clock;
use mealshare_core::reducer::{Events, Reducer};
use mealshare_core::smallvec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// Claim window
// ============================================================================

/// Which days, relative to its scheduled date, a voucher may be claimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimWindow {
    /// Any day
    AnyDay,
    /// Only on the scheduled date
    SameDay,
    /// From `days_before` days before to `days_after` days after the scheduled date
    Grace {
        /// Days allowed before the scheduled date
        days_before: u32,
        /// Days allowed after the scheduled date
        days_after: u32,
    },
}

impl ClaimWindow {
    /// Whether a voucher scheduled for `scheduled` may be claimed on `today`.
    #[must_use]
    pub fn allows(&self, scheduled: NaiveDate, today: NaiveDate) -> bool {
        match *self {
            Self::AnyDay => true,
            Self::SameDay => scheduled == today,
            Self::Grace {
                days_before,
                days_after,
            } => {
                let earliest = scheduled
                    .checked_sub_days(Days::new(u64::from(days_before)))
                    .unwrap_or(NaiveDate::MIN);
                let latest = scheduled
                    .checked_add_days(Days::new(u64::from(days_after)))
                    .unwrap_or(NaiveDate::MAX);
                (earliest..=latest).contains(&today)
            }
        }
    }
}

impl fmt::Display for ClaimWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyDay => f.write_str("any_day"),
            Self::SameDay => f.write_str("same_day"),
            Self::Grace {
                days_before,
                days_after,
            } => write!(f, "grace:{days_before}:{days_after}"),
        }
    }
}

impl FromStr for ClaimWindow {
    type Err = String;

    /// Parses `any_day`, `same_day` or `grace:<days_before>:<days_after>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "any_day" | "any" => Ok(Self::AnyDay),
            "same_day" => Ok(Self::SameDay),
            other => {
                let mut parts = other.split(':');
                match (parts.next(), parts.next(), parts.next(), parts.next()) {
                    (Some("grace"), Some(before), Some(after), None) => Ok(Self::Grace {
                        days_before: before.parse().map_err(|_| format!("bad days_before: {before}"))?,
                        days_after: after.parse().map_err(|_| format!("bad days_after: {after}"))?,
                    }),
                    _ => Err(format!("unknown claim window: {other}")),
                }
            }
        }
    }
}

// ============================================================================
// Commands and events
// ============================================================================

/// Requests against a voucher
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoucherCommand {
    /// Redeem the voucher at distribution
    Claim {
        /// Staff member scanning the voucher
        staff: Actor,
    },
    /// Mark an unclaimed voucher as lapsed
    Expire {
        /// Admin expiring by hand, or `None` for the scheduled sweep
        actor: Option<Actor>,
    },
    /// Void the voucher
    Cancel {
        /// Who is cancelling
        actor: Actor,
    },
}

/// Facts recorded against a voucher
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoucherEvent {
    /// Voucher was redeemed
    Claimed {
        /// Staff who redeemed it
        staff_id: UserId,
        /// When
        claimed_at: DateTime<Utc>,
    },
    /// Voucher lapsed unclaimed
    Expired {
        /// When
        expired_at: DateTime<Utc>,
    },
    /// Voucher was voided
    Cancelled {
        /// Who voided it
        cancelled_by: UserId,
        /// When
        cancelled_at: DateTime<Utc>,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of [`VoucherReducer`]
#[derive(Clone)]
pub struct VoucherEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Claim policy
    pub claim_window: ClaimWindow,
    /// Offset used to decide what "today" is
    pub offset: FixedOffset,
}

impl VoucherEnvironment {
    /// Creates a new environment
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, claim_window: ClaimWindow, offset: FixedOffset) -> Self {
        Self {
            clock,
            claim_window,
            offset,
        }
    }

    /// Today's date in the configured offset
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.offset).date_naive()
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the voucher lifecycle
#[derive(Clone, Copy, Debug, Default)]
pub struct VoucherReducer;

impl VoucherReducer {
    /// Creates a new `VoucherReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn ensure_active(voucher: &Voucher, action: &'static str) -> Result<(), VoucherError> {
        if voucher.status.is_terminal() {
            return Err(VoucherError::InvalidTransition {
                action,
                from: voucher.status.to_string(),
            });
        }
        Ok(())
    }
}

impl Reducer for VoucherReducer {
    type State = Voucher;
    type Command = VoucherCommand;
    type Event = VoucherEvent;
    type Error = VoucherError;
    type Environment = VoucherEnvironment;

    fn handle(
        &self,
        voucher: &Voucher,
        command: VoucherCommand,
        env: &VoucherEnvironment,
    ) -> Result<Events<VoucherEvent>, VoucherError> {
        let now = env.clock.now();
        match command {
            VoucherCommand::Claim { staff } => {
                staff.require(Capability::ClaimVoucher)?;
                Self::ensure_active(voucher, "claim")?;
                let today = env.today();
                if !env.claim_window.allows(voucher.scheduled_date, today) {
                    return Err(VoucherError::Validation(ValidationErrors::single(
                        "scheduled_date",
                        format!(
                            "voucher is for {} and cannot be claimed on {today} ({})",
                            voucher.scheduled_date, env.claim_window
                        ),
                    )));
                }
                Ok(smallvec![VoucherEvent::Claimed {
                    staff_id: staff.user_id,
                    claimed_at: now,
                }])
            }
            VoucherCommand::Expire { actor } => {
                if let Some(actor) = actor {
                    actor.require(Capability::ExpireVoucher)?;
                }
                Self::ensure_active(voucher, "expire")?;
                if actor.is_none() && voucher.scheduled_date >= env.today() {
                    return Err(VoucherError::Validation(ValidationErrors::single(
                        "scheduled_date",
                        "voucher is not past its scheduled date",
                    )));
                }
                Ok(smallvec![VoucherEvent::Expired { expired_at: now }])
            }
            VoucherCommand::Cancel { actor } => {
                let allowed = actor.role.can(Capability::CancelAnyVoucher)
                    || (actor.role.can(Capability::CancelOwnVoucher)
                        && voucher.requested_by == actor.user_id);
                if !allowed {
                    return Err(VoucherError::forbidden(format!(
                        "{} cannot cancel voucher {}",
                        actor.role, voucher.reference_number
                    )));
                }
                Self::ensure_active(voucher, "cancel")?;
                Ok(smallvec![VoucherEvent::Cancelled {
                    cancelled_by: actor.user_id,
                    cancelled_at: now,
                }])
            }
        }
    }

    fn apply(&self, voucher: &mut Voucher, event: &VoucherEvent) {
        match event {
            VoucherEvent::Claimed {
                staff_id,
                claimed_at,
            } => {
                voucher.status = VoucherStatus::Claimed;
                voucher.claimed_at = Some(*claimed_at);
                voucher.claimed_by = Some(*staff_id);
            }
            VoucherEvent::Expired { .. } => {
                voucher.status = VoucherStatus::Expired;
            }
            VoucherEvent::Cancelled {
                cancelled_by,
                cancelled_at,
            } => {
                voucher.status = VoucherStatus::Cancelled;
                voucher.cancelled_at = Some(*cancelled_at);
                voucher.cancelled_by = Some(*cancelled_by);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::{RequesterSnapshot, StudentId, TimeSlotId, VoucherId};
    use chrono::Offset;
    use mealshare_testing::{assertions, test_clock, ReducerTest};

    // test_clock() is 2024-01-15T08:00:00Z
    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn env(window: ClaimWindow) -> VoucherEnvironment {
        VoucherEnvironment::new(Arc::new(test_clock()), window, Utc.fix())
    }

    fn voucher(status: VoucherStatus, scheduled: NaiveDate, requested_by: UserId) -> Voucher {
        Voucher {
            id: VoucherId::new(),
            reference_number: "BB-240115-AB12".to_string(),
            student_id: StudentId::new(),
            requested_by,
            unit_id: None,
            meal_id: None,
            time_slot_id: TimeSlotId::new(),
            scheduled_date: scheduled,
            status,
            claimed_at: None,
            claimed_by: None,
            cancelled_at: None,
            cancelled_by: None,
            requester: RequesterSnapshot {
                full_name: "Juan Dela Cruz".to_string(),
                course: "BSCS".to_string(),
                year_level: 2,
                phone: "09171234567".to_string(),
            },
            created_at: test_clock().now(),
        }
    }

    fn active(scheduled: NaiveDate) -> Voucher {
        voucher(VoucherStatus::Active, scheduled, UserId::new())
    }

    #[test]
    fn staff_claims_active_voucher() {
        let staff = Actor::staff();
        ReducerTest::new(VoucherReducer::new())
            .with_env(env(ClaimWindow::AnyDay))
            .given_state(active(date(16)))
            .when_command(VoucherCommand::Claim { staff })
            .then_events(|events| assertions::assert_events_count(events, 1))
            .then_state(move |v| {
                assert_eq!(v.status, VoucherStatus::Claimed);
                assert_eq!(v.claimed_by, Some(staff.user_id));
                assert_eq!(v.claimed_at, Some(test_clock().now()));
            })
            .run();
    }

    #[test]
    fn second_claim_is_an_invalid_transition() {
        let first = Actor::staff();
        let mut claimed = active(date(15));
        claimed.status = VoucherStatus::Claimed;
        claimed.claimed_by = Some(first.user_id);
        let claimed_at = test_clock().now() - chrono::Duration::minutes(5);
        claimed.claimed_at = Some(claimed_at);

        ReducerTest::new(VoucherReducer::new())
            .with_env(env(ClaimWindow::AnyDay))
            .given_state(claimed)
            .when_command(VoucherCommand::Claim {
                staff: Actor::staff(),
            })
            .then_error(|e| {
                assert!(matches!(e, VoucherError::InvalidTransition { action: "claim", .. }));
            })
            .then_state(move |v| {
                assert_eq!(v.claimed_by, Some(first.user_id));
                assert_eq!(v.claimed_at, Some(claimed_at));
            })
            .run();
    }

    #[test]
    fn terminal_states_refuse_every_command() {
        for status in [VoucherStatus::Claimed, VoucherStatus::Expired, VoucherStatus::Cancelled] {
            for command in [
                VoucherCommand::Claim {
                    staff: Actor::staff(),
                },
                VoucherCommand::Expire { actor: None },
                VoucherCommand::Cancel {
                    actor: Actor::admin(),
                },
            ] {
                let reducer = VoucherReducer::new();
                let mut state = voucher(status, date(10), UserId::new());
                let before = state.clone();
                let result = reducer.reduce(&mut state, command, &env(ClaimWindow::AnyDay));
                assert!(matches!(result, Err(VoucherError::InvalidTransition { .. })));
                assert_eq!(state, before);
            }
        }
    }

    #[test]
    fn students_cannot_claim() {
        ReducerTest::new(VoucherReducer::new())
            .with_env(env(ClaimWindow::AnyDay))
            .given_state(active(date(15)))
            .when_command(VoucherCommand::Claim {
                staff: Actor::student(),
            })
            .then_error(|e| assert!(matches!(e, VoucherError::Forbidden { .. })))
            .then_state(|v| assert_eq!(v.status, VoucherStatus::Active))
            .run();
    }

    #[test]
    fn same_day_window_rejects_other_days() {
        ReducerTest::new(VoucherReducer::new())
            .with_env(env(ClaimWindow::SameDay))
            .given_state(active(date(16)))
            .when_command(VoucherCommand::Claim {
                staff: Actor::staff(),
            })
            .then_error(|e| match e {
                VoucherError::Validation(errors) => assert!(errors.has("scheduled_date")),
                other => panic!("expected validation error, got {other:?}"),
            })
            .run();

        ReducerTest::new(VoucherReducer::new())
            .with_env(env(ClaimWindow::SameDay))
            .given_state(active(date(15)))
            .when_command(VoucherCommand::Claim {
                staff: Actor::staff(),
            })
            .then_state(|v| assert_eq!(v.status, VoucherStatus::Claimed))
            .run();
    }

    #[test]
    fn grace_window_bounds() {
        let window = ClaimWindow::Grace {
            days_before: 1,
            days_after: 2,
        };
        assert!(window.allows(date(16), date(15)));
        assert!(!window.allows(date(17), date(15)));
        assert!(window.allows(date(13), date(15)));
        assert!(!window.allows(date(12), date(15)));
    }

    #[test]
    fn claim_window_parsing() {
        assert_eq!("any_day".parse(), Ok(ClaimWindow::AnyDay));
        assert_eq!("same_day".parse(), Ok(ClaimWindow::SameDay));
        assert_eq!(
            "grace:0:1".parse(),
            Ok(ClaimWindow::Grace {
                days_before: 0,
                days_after: 1
            })
        );
        assert!("grace:x:1".parse::<ClaimWindow>().is_err());
        assert!("sometimes".parse::<ClaimWindow>().is_err());
    }

    #[test]
    fn sweep_expires_only_overdue_vouchers() {
        ReducerTest::new(VoucherReducer::new())
            .with_env(env(ClaimWindow::AnyDay))
            .given_state(active(date(14)))
            .when_command(VoucherCommand::Expire { actor: None })
            .then_state(|v| assert_eq!(v.status, VoucherStatus::Expired))
            .run();

        ReducerTest::new(VoucherReducer::new())
            .with_env(env(ClaimWindow::AnyDay))
            .given_state(active(date(15)))
            .when_command(VoucherCommand::Expire { actor: None })
            .then_error(|e| assert!(matches!(e, VoucherError::Validation(_))))
            .then_state(|v| assert_eq!(v.status, VoucherStatus::Active))
            .run();
    }

    #[test]
    fn admin_may_expire_early_but_staff_may_not() {
        ReducerTest::new(VoucherReducer::new())
            .with_env(env(ClaimWindow::AnyDay))
            .given_state(active(date(20)))
            .when_command(VoucherCommand::Expire {
                actor: Some(Actor::admin()),
            })
            .then_state(|v| assert_eq!(v.status, VoucherStatus::Expired))
            .run();

        ReducerTest::new(VoucherReducer::new())
            .with_env(env(ClaimWindow::AnyDay))
            .given_state(active(date(10)))
            .when_command(VoucherCommand::Expire {
                actor: Some(Actor::staff()),
            })
            .then_error(|e| assert!(matches!(e, VoucherError::Forbidden { .. })))
            .run();
    }

    #[test]
    fn student_cancels_only_own_voucher() {
        let owner = Actor::student();
        ReducerTest::new(VoucherReducer::new())
            .with_env(env(ClaimWindow::AnyDay))
            .given_state(voucher(VoucherStatus::Active, date(20), owner.user_id))
            .when_command(VoucherCommand::Cancel { actor: owner })
            .then_state(move |v| {
                assert_eq!(v.status, VoucherStatus::Cancelled);
                assert_eq!(v.cancelled_by, Some(owner.user_id));
            })
            .run();

        ReducerTest::new(VoucherReducer::new())
            .with_env(env(ClaimWindow::AnyDay))
            .given_state(voucher(VoucherStatus::Active, date(20), owner.user_id))
            .when_command(VoucherCommand::Cancel {
                actor: Actor::student(),
            })
            .then_error(|e| assert!(matches!(e, VoucherError::Forbidden { .. })))
            .run();
    }

    #[test]
    fn today_follows_configured_offset() {
        // 08:00 UTC on the 15th is still the 14th at UTC-10.
        let offset = FixedOffset::west_opt(10 * 3600).unwrap();
        let env = VoucherEnvironment::new(Arc::new(test_clock()), ClaimWindow::AnyDay, offset);
        assert_eq!(env.today(), date(14));
    }
}
