//! Canonical tenant status resolution.
//!
//! A tenant lives in three systems that can disagree: the identity
//! provider's organization, the local workspace row, and the billing
//! provider's customer and subscription. [`resolve`] folds their presence
//! plus the native subscription state into one [`CanonicalStatus`] and a set
//! of [`SyncFacets`] that show which link is broken.
//!
//! Every caller (tenant settings, admin tools, drift reports) goes through
//! this module. Nothing here performs I/O; callers fetch the inputs first.

use crate::providers::NativeSubscriptionStatus;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    AdminSuspended,
    NoDbRecord,
    NoBilling,
    NoSubscription,
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
    Incomplete,
}

impl From<NativeSubscriptionStatus> for CanonicalStatus {
    fn from(status: NativeSubscriptionStatus) -> Self {
        match status {
            NativeSubscriptionStatus::Active => CanonicalStatus::Active,
            NativeSubscriptionStatus::Trialing => CanonicalStatus::Trialing,
            NativeSubscriptionStatus::PastDue => CanonicalStatus::PastDue,
            NativeSubscriptionStatus::Canceled => CanonicalStatus::Canceled,
            NativeSubscriptionStatus::Unpaid => CanonicalStatus::Unpaid,
            NativeSubscriptionStatus::Paused => CanonicalStatus::Paused,
            NativeSubscriptionStatus::Incomplete => CanonicalStatus::Incomplete,
        }
    }
}

/// Presence of each record plus the billing state needed to resolve status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusInputs {
    pub has_org: bool,
    pub has_workspace_row: bool,
    pub has_billing_customer: bool,
    pub has_billing_subscription: bool,
    pub native_status: Option<NativeSubscriptionStatus>,
    pub cancel_at_period_end: bool,
    pub admin_suspended: bool,
}

/// Pairwise link health between the three systems.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SyncFacets {
    /// Organization exists and a workspace row references it.
    pub org_db: bool,
    /// Workspace row carries a billing customer reference.
    pub db_customer: bool,
    /// Billing customer has a linked subscription.
    pub customer_subscription: bool,
    /// Subscription is scheduled to cancel at period end.
    pub canceling: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Resolution {
    pub status: CanonicalStatus,
    pub facets: SyncFacets,
}

pub fn resolve_status(inputs: &StatusInputs) -> CanonicalStatus {
    if inputs.admin_suspended {
        return CanonicalStatus::AdminSuspended;
    }
    if !inputs.has_workspace_row {
        return CanonicalStatus::NoDbRecord;
    }
    if !inputs.has_billing_customer {
        return CanonicalStatus::NoBilling;
    }
    if !inputs.has_billing_subscription {
        return CanonicalStatus::NoSubscription;
    }

    // A linked subscription whose state we never learned is not usable yet.
    inputs
        .native_status
        .map(CanonicalStatus::from)
        .unwrap_or(CanonicalStatus::Incomplete)
}

pub fn resolve_facets(inputs: &StatusInputs) -> SyncFacets {
    SyncFacets {
        org_db: inputs.has_org && inputs.has_workspace_row,
        db_customer: inputs.has_workspace_row && inputs.has_billing_customer,
        customer_subscription: inputs.has_billing_customer && inputs.has_billing_subscription,
        canceling: inputs.has_billing_subscription && inputs.cancel_at_period_end,
    }
}

pub fn resolve(inputs: &StatusInputs) -> Resolution {
    Resolution {
        status: resolve_status(inputs),
        facets: resolve_facets(inputs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(org: bool, row: bool, customer: bool, subscription: bool) -> StatusInputs {
        StatusInputs {
            has_org: org,
            has_workspace_row: row,
            has_billing_customer: customer,
            has_billing_subscription: subscription,
            native_status: Some(NativeSubscriptionStatus::Active),
            ..Default::default()
        }
    }

    fn all_presence_combinations() -> impl Iterator<Item = StatusInputs> {
        (0u8..16).map(|bits| {
            presence(
                bits & 0b1000 != 0,
                bits & 0b0100 != 0,
                bits & 0b0010 != 0,
                bits & 0b0001 != 0,
            )
        })
    }

    #[test]
    fn test_precedence_holds_for_every_presence_combination() {
        for inputs in all_presence_combinations() {
            let expected = if !inputs.has_workspace_row {
                CanonicalStatus::NoDbRecord
            } else if !inputs.has_billing_customer {
                CanonicalStatus::NoBilling
            } else if !inputs.has_billing_subscription {
                CanonicalStatus::NoSubscription
            } else {
                CanonicalStatus::Active
            };
            assert_eq!(resolve_status(&inputs), expected, "inputs: {inputs:?}");
        }
    }

    #[test]
    fn test_missing_row_wins_over_billing_state() {
        assert_eq!(
            resolve_status(&presence(true, false, true, true)),
            CanonicalStatus::NoDbRecord
        );
    }

    #[test]
    fn test_admin_suspension_overrides_everything() {
        for mut inputs in all_presence_combinations() {
            inputs.admin_suspended = true;
            inputs.native_status = Some(NativeSubscriptionStatus::PastDue);
            assert_eq!(resolve_status(&inputs), CanonicalStatus::AdminSuspended);
        }
    }

    #[test]
    fn test_native_status_passes_through() {
        let statuses = [
            (NativeSubscriptionStatus::Active, CanonicalStatus::Active),
            (NativeSubscriptionStatus::Trialing, CanonicalStatus::Trialing),
            (NativeSubscriptionStatus::PastDue, CanonicalStatus::PastDue),
            (NativeSubscriptionStatus::Canceled, CanonicalStatus::Canceled),
            (NativeSubscriptionStatus::Unpaid, CanonicalStatus::Unpaid),
            (NativeSubscriptionStatus::Paused, CanonicalStatus::Paused),
            (NativeSubscriptionStatus::Incomplete, CanonicalStatus::Incomplete),
        ];

        for (native, canonical) in statuses {
            let inputs = StatusInputs {
                native_status: Some(native),
                ..presence(true, true, true, true)
            };
            assert_eq!(resolve_status(&inputs), canonical);
        }
    }

    #[test]
    fn test_unknown_native_status_resolves_incomplete() {
        let inputs = StatusInputs {
            native_status: None,
            ..presence(true, true, true, true)
        };
        assert_eq!(resolve_status(&inputs), CanonicalStatus::Incomplete);
    }

    #[test]
    fn test_cancel_at_period_end_keeps_status_and_raises_facet() {
        let inputs = StatusInputs {
            native_status: Some(NativeSubscriptionStatus::Trialing),
            cancel_at_period_end: true,
            ..presence(true, true, true, true)
        };

        let resolution = resolve(&inputs);
        assert_eq!(resolution.status, CanonicalStatus::Trialing);
        assert!(resolution.facets.canceling);
    }

    #[test]
    fn test_canceling_requires_a_subscription() {
        let inputs = StatusInputs {
            cancel_at_period_end: true,
            ..presence(true, true, true, false)
        };
        assert!(!resolve_facets(&inputs).canceling);
    }

    #[test]
    fn test_facets_identify_the_broken_link() {
        let orphan_org = resolve_facets(&presence(true, false, false, false));
        assert!(!orphan_org.org_db);
        assert!(!orphan_org.db_customer);

        let abandoned_checkout = resolve_facets(&presence(true, true, true, false));
        assert!(abandoned_checkout.org_db);
        assert!(abandoned_checkout.db_customer);
        assert!(!abandoned_checkout.customer_subscription);

        let healthy = resolve_facets(&presence(true, true, true, true));
        assert!(healthy.org_db && healthy.db_customer && healthy.customer_subscription);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&CanonicalStatus::NoDbRecord).unwrap(),
            "\"no_db_record\""
        );
        assert_eq!(
            serde_json::to_string(&CanonicalStatus::AdminSuspended).unwrap(),
            "\"admin_suspended\""
        );
    }
}
